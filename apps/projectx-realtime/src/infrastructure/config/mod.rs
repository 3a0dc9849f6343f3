//! Configuration Module
//!
//! Configuration loading for the hub connections and the console runner.

mod settings;

pub use settings::{ConfigError, Environment, RealtimeConfig, RunnerSettings};
