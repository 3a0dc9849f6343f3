//! ProjectX Realtime Binary
//!
//! Streams one contract's market data and one account's user data to the log.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin projectx-realtime
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `PROJECTX_TOKEN`: Gateway bearer token
//!
//! ## Optional
//! - `PROJECTX_ENVIRONMENT`: demo | topstepx (default: DEMO)
//! - `PROJECTX_CONTRACT_ID`: Contract to stream quotes, trades and depth for
//! - `PROJECTX_ACCOUNT_ID`: Account to stream orders, positions, trades and account updates for
//! - `PROJECTX_MARKET_HUB_URL` / `PROJECTX_USER_HUB_URL`: Hub URL overrides
//! - `PROJECTX_METRICS_PORT`: Prometheus metrics port, 0 disables (default: 9090)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;

use anyhow::Context;
use projectx_realtime::infrastructure::telemetry;
use projectx_realtime::{
    ConnectionStatus, RealtimeConfig, RealtimeService, RunnerSettings, StaticToken, init_metrics,
};
use serde_json::Value;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!("Starting ProjectX realtime client");

    let settings = RunnerSettings::from_env()?;
    let config = RealtimeConfig::from_env()?;
    log_config(&config, &settings);

    if settings.metrics_port != 0 {
        let addr = init_metrics(settings.metrics_port)?;
        tracing::info!(%addr, "Prometheus metrics listening");
    }

    let service = RealtimeService::new(config, Arc::new(StaticToken::new(settings.token.clone())));
    service.on_status(log_status);
    subscribe(&service, &settings);

    if let Err(e) = service.start().await {
        tracing::warn!(error = %e, "Initial connect failed, retrying in the background");
    }

    tracing::info!("Realtime client ready");

    let shutdown_token = CancellationToken::new();
    tokio::spawn(await_shutdown(shutdown_token.clone()));
    shutdown_token.cancelled().await;

    service.stop().await;

    tracing::info!("Realtime client stopped");
    Ok(())
}

/// Register logging callbacks for the configured contract and account.
fn subscribe(service: &RealtimeService, settings: &RunnerSettings) {
    if let Some(contract_id) = &settings.contract_id {
        let market = service.market();
        market.subscribe_quotes(contract_id.as_str(), |contract, quote| {
            log_event("GatewayQuote", contract, quote);
            Ok(())
        });
        market.subscribe_trades(contract_id.as_str(), |contract, trade| {
            log_event("GatewayTrade", contract, trade);
            Ok(())
        });
        market.subscribe_market_depth(contract_id.as_str(), |contract, depth| {
            log_event("GatewayDepth", contract, depth);
            Ok(())
        });
    } else {
        tracing::info!("PROJECTX_CONTRACT_ID not set, market hub idle");
    }

    if let Some(account_id) = &settings.account_id {
        let user = service.user();
        user.subscribe_orders(account_id, |account, order| {
            log_event("GatewayUserOrder", account, order);
            Ok(())
        });
        user.subscribe_positions(account_id, |account, position| {
            log_event("GatewayUserPosition", account, position);
            Ok(())
        });
        user.subscribe_trades(account_id, |account, trade| {
            log_event("GatewayUserTrade", account, trade);
            Ok(())
        });
        user.subscribe_account(account_id, |account, update| {
            log_event("GatewayUserAccount", account, update);
            Ok(())
        });
    } else {
        tracing::info!("PROJECTX_ACCOUNT_ID not set, user hub idle");
    }
}

fn log_event(event: &str, key: &str, payload: &Value) {
    tracing::info!(event, key, %payload, "Event");
}

fn log_status(status: &ConnectionStatus) {
    tracing::debug!(
        hub = %status.hub,
        state = %status.state,
        attempt = status.attempt,
        at = %status.at,
        "Hub status"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &RealtimeConfig, settings: &RunnerSettings) {
    tracing::info!(
        environment = config.environment.as_str(),
        contract_id = settings.contract_id.as_deref().unwrap_or("-"),
        account_id = settings.account_id.as_deref().unwrap_or("-"),
        metrics_port = settings.metrics_port,
        "Configuration loaded"
    );
    tracing::debug!(
        market_hub_url = %config.market_hub_url,
        user_hub_url = %config.user_hub_url,
        max_reconnect_attempts = config.max_reconnect_attempts,
        "Hub endpoints"
    );
}

/// Cancel `shutdown_token` on SIGTERM or SIGINT.
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
