use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::services::database::PoolOptions;
use crate::services::sink::DEFAULT_BATCH_CAP;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    pub destination: DestinationConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub address: String,
    pub conn_max: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DestinationConfig {
    pub address: String,
    pub conn_max: i64,
    pub conn_max_idle: Option<i64>,
    /// 0 keeps connections forever
    pub conn_max_lifetime_secs: u64,
    pub batch_cap: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

const DEFAULT_CONN_MAX: i64 = 5;

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Try to load from .env file
        let _ = dotenv::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from defaults overridden by whatever `lookup` returns per variable
    pub fn from_lookup<F>(lookup: F) -> Result<Self, config::ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = config::Config::builder()
            .set_default("source.conn_max", DEFAULT_CONN_MAX)?
            .set_default("destination.conn_max", DEFAULT_CONN_MAX)?
            .set_default("destination.conn_max_lifetime_secs", 0)?
            .set_default("destination.batch_cap", DEFAULT_BATCH_CAP as i64)?
            .set_default("pipeline.timeout_secs", 1800)?
            .set_default("pipeline.connect_timeout_secs", 30)?
            .set_default("logging.level", "info")?;

        if let Some(source) = lookup("BYTESET_SOURCE") {
            builder = builder.set_override("source.address", source)?;
        }

        if let Some(conn_max) = lookup("BYTESET_SOURCE_CONN_MAX") {
            builder = builder.set_override(
                "source.conn_max",
                conn_max.parse::<i64>().unwrap_or(DEFAULT_CONN_MAX),
            )?;
        }

        if let Some(destination) = lookup("BYTESET_DESTINATION") {
            builder = builder.set_override("destination.address", destination)?;
        }

        if let Some(conn_max) = lookup("BYTESET_CONN_MAX") {
            builder = builder.set_override(
                "destination.conn_max",
                conn_max.parse::<i64>().unwrap_or(DEFAULT_CONN_MAX),
            )?;
        }

        if let Some(conn_max_idle) = lookup("BYTESET_CONN_MAX_IDLE") {
            if let Ok(conn_max_idle) = conn_max_idle.parse::<i64>() {
                builder = builder.set_override("destination.conn_max_idle", Some(conn_max_idle))?;
            }
        }

        if let Some(lifetime) = lookup("BYTESET_CONN_MAX_LIFETIME") {
            builder = builder.set_override(
                "destination.conn_max_lifetime_secs",
                lifetime.parse::<i64>().unwrap_or(0),
            )?;
        }

        if let Some(batch_cap) = lookup("BYTESET_BATCH_CAP") {
            builder = builder.set_override(
                "destination.batch_cap",
                batch_cap.parse::<i64>().unwrap_or(DEFAULT_BATCH_CAP as i64),
            )?;
        }

        if let Some(timeout) = lookup("BYTESET_TIMEOUT") {
            builder = builder.set_override("pipeline.timeout_secs", timeout.parse::<i64>().unwrap_or(1800))?;
        }

        if let Some(timeout) = lookup("BYTESET_CONNECT_TIMEOUT") {
            builder = builder.set_override(
                "pipeline.connect_timeout_secs",
                timeout.parse::<i64>().unwrap_or(30),
            )?;
        }

        if let Some(log_level) = lookup("RUST_LOG") {
            builder = builder.set_override("logging.level", log_level)?;
        }

        builder.build()?.try_deserialize()
    }
}

impl SourceConfig {
    /// Database sources only ping and close, so idle and lifetime stay at defaults
    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions::new(self.conn_max, None, 0)
    }
}

impl DestinationConfig {
    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions::new(self.conn_max, self.conn_max_idle, self.conn_max_lifetime_secs)
    }
}

impl PipelineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
