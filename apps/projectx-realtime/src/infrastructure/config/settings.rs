//! Realtime Configuration Settings
//!
//! Configuration types for the hub connections, loaded from environment
//! variables.

use std::time::Duration;

use crate::domain::topic::HubKind;

/// Gateway environment the hubs belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// ProjectX demo gateway.
    #[default]
    Demo,
    /// `TopstepX` production gateway.
    TopstepX,
}

impl Environment {
    /// Parse environment from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "demo" => Some(Self::Demo),
            "topstepx" => Some(Self::TopstepX),
            _ => None,
        }
    }

    /// Get the environment name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Demo => "demo",
            Self::TopstepX => "topstepx",
        }
    }

    /// Base URL of the real-time host.
    #[must_use]
    pub const fn realtime_base_url(&self) -> &'static str {
        match self {
            Self::Demo => "https://gateway-rtc-demo.s2f.projectx.com",
            Self::TopstepX => "https://rtc.topstepx.com",
        }
    }

    /// Default URL of a hub in this environment.
    #[must_use]
    pub fn hub_url(&self, hub: HubKind) -> String {
        format!("{}{}", self.realtime_base_url(), hub.path())
    }
}

/// Complete realtime configuration.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Gateway environment.
    pub environment: Environment,
    /// Market hub URL (`https://` or `wss://`).
    pub market_hub_url: String,
    /// User hub URL (`https://` or `wss://`).
    pub user_hub_url: String,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Interval between client keep-alive pings.
    pub keep_alive_interval: Duration,
    /// Silence from the server after which the connection is considered lost.
    pub server_timeout: Duration,
    /// Timeout for the WebSocket upgrade plus hub handshake.
    pub connect_timeout: Duration,
    /// Open a hub's connection on its first subscription.
    pub auto_connect: bool,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self::for_environment(Environment::default())
    }
}

impl RealtimeConfig {
    /// Default configuration for an environment.
    #[must_use]
    pub fn for_environment(environment: Environment) -> Self {
        Self {
            environment,
            market_hub_url: environment.hub_url(HubKind::Market),
            user_hub_url: environment.hub_url(HubKind::User),
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 0,
            keep_alive_interval: Duration::from_secs(15),
            server_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            auto_connect: true,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable holds an unusable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let environment = match lookup("PROJECTX_ENVIRONMENT") {
            Some(value) => Environment::from_str_case_insensitive(&value).ok_or_else(|| {
                ConfigError::InvalidValue("PROJECTX_ENVIRONMENT".to_string(), value)
            })?,
            None => Environment::default(),
        };
        let defaults = Self::for_environment(environment);

        let config = Self {
            environment,
            market_hub_url: lookup("PROJECTX_MARKET_HUB_URL").unwrap_or(defaults.market_hub_url),
            user_hub_url: lookup("PROJECTX_USER_HUB_URL").unwrap_or(defaults.user_hub_url),
            reconnect_delay_initial: parse_duration_millis(
                &lookup,
                "PROJECTX_RECONNECT_DELAY_INITIAL_MS",
                defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_duration_secs(
                &lookup,
                "PROJECTX_RECONNECT_DELAY_MAX_SECS",
                defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: parse(
                &lookup,
                "PROJECTX_RECONNECT_DELAY_MULTIPLIER",
                defaults.reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: parse(
                &lookup,
                "PROJECTX_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
            keep_alive_interval: parse_duration_secs(
                &lookup,
                "PROJECTX_KEEP_ALIVE_INTERVAL_SECS",
                defaults.keep_alive_interval,
            ),
            server_timeout: parse_duration_secs(
                &lookup,
                "PROJECTX_SERVER_TIMEOUT_SECS",
                defaults.server_timeout,
            ),
            connect_timeout: parse_duration_secs(
                &lookup,
                "PROJECTX_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout,
            ),
            auto_connect: parse(&lookup, "PROJECTX_AUTO_CONNECT", defaults.auto_connect),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check that both hub URLs are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.market_hub_url.trim().is_empty() {
            return Err(ConfigError::EmptyValue("PROJECTX_MARKET_HUB_URL".to_string()));
        }
        if self.user_hub_url.trim().is_empty() {
            return Err(ConfigError::EmptyValue("PROJECTX_USER_HUB_URL".to_string()));
        }
        Ok(())
    }

    /// Get the configured URL of a hub.
    #[must_use]
    pub fn hub_url(&self, hub: HubKind) -> &str {
        match hub {
            HubKind::Market => &self.market_hub_url,
            HubKind::User => &self.user_hub_url,
        }
    }
}

/// Settings used only by the streaming console runner.
#[derive(Clone)]
pub struct RunnerSettings {
    /// Bearer token for the hubs.
    pub token: String,
    /// Contract to stream market data for.
    pub contract_id: Option<String>,
    /// Account to stream user data for.
    pub account_id: Option<String>,
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
}

impl RunnerSettings {
    /// Default Prometheus port.
    pub const DEFAULT_METRICS_PORT: u16 = 9090;

    /// Create runner settings from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `PROJECTX_TOKEN` is missing or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create runner settings from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let token = lookup("PROJECTX_TOKEN")
            .ok_or_else(|| ConfigError::MissingEnvVar("PROJECTX_TOKEN".to_string()))?;
        if token.trim().is_empty() {
            return Err(ConfigError::EmptyValue("PROJECTX_TOKEN".to_string()));
        }

        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        Ok(Self {
            token,
            contract_id: non_empty("PROJECTX_CONTRACT_ID"),
            account_id: non_empty("PROJECTX_ACCOUNT_ID"),
            metrics_port: parse(&lookup, "PROJECTX_METRICS_PORT", Self::DEFAULT_METRICS_PORT),
        })
    }
}

impl std::fmt::Debug for RunnerSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerSettings")
            .field("token", &"[REDACTED]")
            .field("contract_id", &self.contract_id)
            .field("account_id", &self.account_id)
            .field("metrics_port", &self.metrics_port)
            .finish()
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable has a value outside the accepted set.
    #[error("environment variable {0} has invalid value: {1}")]
    InvalidValue(String, String),
}

fn parse<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_duration_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_duration_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
