//! Sentry configuration
//!
//! Read once at startup from an optional TOML file (`SENTRY_CONFIG_FILE`)
//! and `SENTRY_*` environment variables, then passed around by value.

use anyhow::{bail, Result};
use sentry_lib::{ControlPlaneEndpoint, ProbeConfig};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming an optional configuration file
pub const CONFIG_FILE_ENV: &str = "SENTRY_CONFIG_FILE";

/// Sentry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SentryConfig {
    /// AWS region of the ECS cluster
    pub region: String,

    /// Seconds to sleep between connectivity checks
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Times Docker restarts a crashing container while ECS is unreachable
    #[serde(default)]
    pub retries: u32,

    /// Log file; stdout when unset
    #[serde(default)]
    pub log_file: Option<String>,

    /// Log severity threshold
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_timeout")]
    pub read_timeout_secs: u64,

    /// Cap on the whole request/response exchange
    #[serde(default = "default_timeout")]
    pub exchange_timeout_secs: u64,

    /// Health/metrics server port, 0 disables it
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Override for the derived `ecs.<region>.amazonaws.com` host
    #[serde(default)]
    pub endpoint_host: Option<String>,

    #[serde(default)]
    pub endpoint_port: Option<u16>,
}

fn default_interval() -> u64 {
    20
}

fn default_log_level() -> String {
    "debug".to_string()
}

fn default_timeout() -> u64 {
    10
}

fn default_api_port() -> u16 {
    9480
}

impl SentryConfig {
    /// Load configuration from the config file (if any) and environment
    pub fn load() -> Result<Self> {
        let file = std::env::var(CONFIG_FILE_ENV).ok().map(PathBuf::from);
        Self::from_sources(file, config::Environment::with_prefix("SENTRY"))
    }

    fn from_sources(file: Option<PathBuf>, env: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path));
        }

        let config: SentryConfig = builder
            .add_source(env.try_parsing(true))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.region.trim().is_empty() {
            bail!("region must not be empty");
        }
        if self.interval_secs == 0 {
            bail!("interval_secs must be at least 1");
        }
        if self.connect_timeout_secs == 0
            || self.read_timeout_secs == 0
            || self.exchange_timeout_secs == 0
        {
            bail!("probe timeouts must be at least 1 second");
        }
        Ok(())
    }

    pub fn endpoint(&self) -> ControlPlaneEndpoint {
        let mut endpoint = ControlPlaneEndpoint::for_region(self.region.trim());
        if let Some(host) = &self.endpoint_host {
            endpoint.hostname = host.clone();
        }
        if let Some(port) = self.endpoint_port {
            endpoint.port = port;
        }
        endpoint
    }

    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            exchange_timeout: Duration::from_secs(self.exchange_timeout_secs),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}
