//! Core data models for the network sentry

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Name of the ECS agent container
pub const ECS_AGENT_NAME: &str = "ecs-agent";

/// Label carried by every container the ECS agent launched
pub const ECS_CLUSTER_LABEL: &str = "com.amazonaws.ecs.cluster";

/// Port the regional ECS endpoint listens on
pub const ECS_ENDPOINT_PORT: u16 = 443;

/// Regional ECS control-plane endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlPlaneEndpoint {
    pub hostname: String,
    pub port: u16,
    pub region: String,
}

impl ControlPlaneEndpoint {
    /// Endpoint for the public ECS service in `region`
    pub fn for_region(region: impl Into<String>) -> Self {
        let region = region.into();
        Self {
            hostname: format!("ecs.{}.amazonaws.com", region),
            port: ECS_ENDPOINT_PORT,
            region,
        }
    }

    pub fn new(hostname: impl Into<String>, port: u16, region: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            region: region.into(),
        }
    }

    /// Minimal HTTP/1.1 request sent once the secure channel is up
    pub fn request(&self) -> String {
        format!(
            "GET / HTTP/1.1\r\nHost: {}\r\nAccept: text/html\r\nConnection: close\r\n\r\n",
            self.hostname
        )
    }
}

impl fmt::Display for ControlPlaneEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hostname, self.port)
    }
}

/// Why the control plane was judged unreachable
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeFailure {
    /// Resolving or connecting the TCP transport failed
    #[error("socket error: {0}")]
    Socket(String),
    /// The endpoint name could not be used for peer verification
    #[error("name resolution error: {0}")]
    NameResolution(String),
    /// The TLS handshake failed or timed out
    #[error("secure channel error: {0}")]
    SecureChannel(String),
    /// Sending the request or reading the response failed
    #[error("transfer error: {0}")]
    Transfer(String),
}

impl ProbeFailure {
    /// Short label used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ProbeFailure::Socket(_) => "socket",
            ProbeFailure::NameResolution(_) => "name_resolution",
            ProbeFailure::SecureChannel(_) => "secure_channel",
            ProbeFailure::Transfer(_) => "transfer",
        }
    }
}

/// Verdict of a single connectivity probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    Reachable,
    Unreachable(ProbeFailure),
}

impl ProbeResult {
    pub fn is_reachable(&self) -> bool {
        matches!(self, ProbeResult::Reachable)
    }
}

/// Restart policy modes the sentry reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartMode {
    /// Docker's `no` policy
    Never,
    OnFailure,
    Always,
    UnlessStopped,
}

impl fmt::Display for RestartMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RestartMode::Never => "no",
            RestartMode::OnFailure => "on-failure",
            RestartMode::Always => "always",
            RestartMode::UnlessStopped => "unless-stopped",
        };
        f.write_str(name)
    }
}

/// Container restart policy
///
/// `max_retries` is only meaningful for [`RestartMode::OnFailure`]; the
/// constructors keep it at zero for every other mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartPolicy {
    pub mode: RestartMode,
    pub max_retries: u32,
}

impl RestartPolicy {
    pub fn never() -> Self {
        Self {
            mode: RestartMode::Never,
            max_retries: 0,
        }
    }

    pub fn on_failure(max_retries: u32) -> Self {
        Self {
            mode: RestartMode::OnFailure,
            max_retries,
        }
    }

    /// Policy with any other mode; retries are dropped unless on-failure
    pub fn with_mode(mode: RestartMode, max_retries: u32) -> Self {
        match mode {
            RestartMode::OnFailure => Self::on_failure(max_retries),
            mode => Self {
                mode,
                max_retries: 0,
            },
        }
    }

    pub fn is_on_failure(&self) -> bool {
        self.mode == RestartMode::OnFailure
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::never()
    }
}

impl fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            RestartMode::OnFailure => write!(f, "{}:{}", self.mode, self.max_retries),
            mode => write!(f, "{}", mode),
        }
    }
}

/// Run state of a container as far as the sentry cares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Running,
    Paused,
    Restarting,
    Other,
}

/// Snapshot of one runtime container, read fresh every cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedContainer {
    pub id: String,
    pub name: String,
    pub labels: HashMap<String, String>,
    pub restart_policy: RestartPolicy,
    pub state: ContainerState,
    pub restart_count: u64,
}

impl ManagedContainer {
    pub fn is_paused(&self) -> bool {
        self.state == ContainerState::Paused
    }

    /// Value of the ECS cluster label, if present
    pub fn cluster(&self) -> Option<&str> {
        self.labels.get(ECS_CLUSTER_LABEL).map(String::as_str)
    }

    pub fn is_ecs_agent(&self) -> bool {
        self.name == ECS_AGENT_NAME
    }
}
