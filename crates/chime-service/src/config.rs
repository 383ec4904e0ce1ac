//! Configuration for a chime member.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use chime_ring::PositionStrategy;
use chime_table::TableConfig;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to parse configuration.
    #[error("Configuration error: {0}")]
    Parse(String),

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChimeConfig {
    /// Partition service settings.
    pub service: ServiceConfig,
    /// Cluster ring settings.
    pub ring: RingConfig,
    /// Reminder storage.
    pub table: TableConfig,
    /// Operator HTTP API.
    pub api: ApiConfig,
}

impl ChimeConfig {
    /// Load configuration from file and environment.
    ///
    /// Later sources override earlier ones:
    /// 1. Default values
    /// 2. `chime.toml` in the current directory (if present)
    /// 3. The given config file path (if provided)
    /// 4. Environment variables with the `CHIME_` prefix, nested with `__`
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Toml::file("chime.toml"));

        if let Some(p) = path {
            figment = figment.merge(Toml::file(p));
        }

        let config: Self = figment
            .merge(Env::prefixed("CHIME_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that deserialise but cannot work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.member_id.trim().is_empty() {
            return Err(ConfigError::Invalid("service.member_id is empty".into()));
        }
        if self.service.initial_load_attempts == 0 {
            return Err(ConfigError::Invalid(
                "service.initial_load_attempts must be at least 1".into(),
            ));
        }
        if self.service.refresh_period.is_zero() {
            return Err(ConfigError::Invalid(
                "service.refresh_period must be positive".into(),
            ));
        }
        if let PositionStrategy::Hashed { virtual_nodes: 0 } = self.ring.strategy {
            return Err(ConfigError::Invalid(
                "ring.strategy.virtual_nodes must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Partition service settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// This member's id on the ring.
    pub member_id: String,
    /// Shortest accepted non-zero reminder period, in seconds.
    #[serde(with = "serde_duration_secs")]
    pub minimum_period: Duration,
    /// How often the owned range is re-read from the table, in seconds.
    #[serde(with = "serde_duration_secs")]
    pub refresh_period: Duration,
    /// Upper bound on table initialisation at start-up, in seconds.
    #[serde(with = "serde_duration_secs")]
    pub init_timeout: Duration,
    /// How long a request waits for the initial load, in seconds.
    #[serde(with = "serde_duration_secs")]
    pub initial_load_max_wait: Duration,
    /// Failed initial loads before waiting requests are failed fast.
    pub initial_load_attempts: u32,
    /// Pause between initial load attempts, in seconds.
    #[serde(with = "serde_duration_secs")]
    pub initial_load_retry_delay: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            member_id: "chime-0".to_owned(),
            minimum_period: Duration::from_secs(60),
            refresh_period: Duration::from_secs(300),
            init_timeout: Duration::from_secs(300),
            initial_load_max_wait: Duration::from_secs(20),
            initial_load_attempts: 2,
            initial_load_retry_delay: Duration::from_secs(5),
        }
    }
}

/// Cluster ring settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    /// Member placement on the ring.
    pub strategy: PositionStrategy,
    /// Other members known at start-up. This member is always included.
    pub members: Vec<String>,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            strategy: PositionStrategy::default(),
            members: Vec::new(),
        }
    }
}

/// Operator HTTP API settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Address to listen on.
    pub listen_addr: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8090),
        }
    }
}

/// Serde helper for Duration as seconds.
mod serde_duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
