//! Control-plane connectivity probe
//!
//! A TCP connect alone cannot tell a dead host from a healthy network path
//! in front of a broken service, so the probe completes a TLS handshake with
//! hostname verification and an HTTP/1.1 exchange before it reports the
//! control plane as reachable. Every failure becomes an
//! [`ProbeResult::Unreachable`] verdict; nothing here returns `Err`.

use crate::models::{ControlPlaneEndpoint, ProbeFailure, ProbeResult};
use async_trait::async_trait;
use rustls::{ClientConfig, OwnedTrustAnchor, RootCertStore, ServerName};
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tokio_rustls::{client::TlsStream, TlsConnector};
use tracing::{debug, info, warn};

/// Read buffer size for the response; content is discarded chunk by chunk
const READ_CHUNK: usize = 1024;

/// Timeouts applied to each probe
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Budget for TCP connect and, separately, for the TLS handshake
    pub connect_timeout: Duration,
    /// Budget for each read of the response
    pub read_timeout: Duration,
    /// Budget for the whole request/response exchange
    pub exchange_timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(10),
            exchange_timeout: Duration::from_secs(10),
        }
    }
}

/// Trait for control-plane reachability checks
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Run one reachability check against `endpoint`
    async fn probe(&self, endpoint: &ControlPlaneEndpoint) -> ProbeResult;
}

/// What came back from the control plane
#[derive(Debug, Default)]
struct ExchangeSummary {
    bytes: usize,
    status_line: Option<String>,
}

/// Probe that performs a full TLS + HTTP/1.1 round-trip
pub struct TlsProbe {
    config: ProbeConfig,
    connector: TlsConnector,
}

impl TlsProbe {
    /// Create a probe trusting the bundled web PKI roots
    pub fn new(config: ProbeConfig) -> Self {
        let mut roots = RootCertStore::empty();
        roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
            OwnedTrustAnchor::from_subject_spki_name_constraints(
                ta.subject,
                ta.spki,
                ta.name_constraints,
            )
        }));

        let tls_config = ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(roots)
            .with_no_client_auth();

        Self::with_tls_config(config, Arc::new(tls_config))
    }

    /// Create a probe with a caller-supplied TLS configuration
    pub fn with_tls_config(config: ProbeConfig, tls_config: Arc<ClientConfig>) -> Self {
        Self {
            config,
            connector: TlsConnector::from(tls_config),
        }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    async fn connect(&self, endpoint: &ControlPlaneEndpoint) -> Result<TcpStream, ProbeFailure> {
        info!(phase = "connect", endpoint = %endpoint, "Creating network socket");

        match timeout(
            self.config.connect_timeout,
            TcpStream::connect((endpoint.hostname.as_str(), endpoint.port)),
        )
        .await
        {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(ProbeFailure::Socket(e.to_string())),
            Err(_) => Err(ProbeFailure::Socket(format!(
                "connect timed out after {:?}",
                self.config.connect_timeout
            ))),
        }
    }

    async fn handshake(
        &self,
        endpoint: &ControlPlaneEndpoint,
        stream: TcpStream,
    ) -> Result<TlsStream<TcpStream>, ProbeFailure> {
        info!(phase = "connect", host = %endpoint.hostname, "Connecting to host");

        let name = server_name(&endpoint.hostname)?;

        match timeout(
            self.config.connect_timeout,
            self.connector.connect(name, stream),
        )
        .await
        {
            Ok(Ok(tls)) => Ok(tls),
            Ok(Err(e)) => Err(ProbeFailure::SecureChannel(e.to_string())),
            Err(_) => Err(ProbeFailure::SecureChannel(format!(
                "TLS handshake timed out after {:?}",
                self.config.connect_timeout
            ))),
        }
    }

    async fn exchange<S>(
        &self,
        endpoint: &ControlPlaneEndpoint,
        stream: &mut S,
    ) -> Result<ExchangeSummary, ProbeFailure>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        info!(phase = "connect", "Sending and receiving data");

        let request = endpoint.request();
        stream
            .write_all(request.as_bytes())
            .await
            .map_err(|e| ProbeFailure::Transfer(e.to_string()))?;
        stream
            .flush()
            .await
            .map_err(|e| ProbeFailure::Transfer(e.to_string()))?;

        let mut summary = ExchangeSummary::default();
        let mut buf = [0u8; READ_CHUNK];
        let deadline = Instant::now() + self.config.exchange_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let wait = remaining.min(self.config.read_timeout);

            match timeout(wait, stream.read(&mut buf)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => {
                    if summary.status_line.is_none() {
                        summary.status_line = String::from_utf8_lossy(&buf[..n])
                            .lines()
                            .next()
                            .map(str::to_string);
                    }
                    summary.bytes += n;
                }
                // Peer closed the TCP stream without close_notify after answering
                Ok(Err(e)) if e.kind() == ErrorKind::UnexpectedEof && summary.bytes > 0 => break,
                Ok(Err(e)) => return Err(ProbeFailure::Transfer(e.to_string())),
                // A peer that answered but holds the connection open, or keeps
                // trickling past the exchange budget, still counts
                Err(_) if summary.bytes > 0 => break,
                Err(_) => {
                    return Err(ProbeFailure::Transfer(format!(
                        "no response within {:?}",
                        wait
                    )))
                }
            }

            if summary.bytes > 0 && Instant::now() >= deadline {
                break;
            }
        }

        Ok(summary)
    }
}

impl Default for TlsProbe {
    fn default() -> Self {
        Self::new(ProbeConfig::default())
    }
}

#[async_trait]
impl ConnectivityProbe for TlsProbe {
    async fn probe(&self, endpoint: &ControlPlaneEndpoint) -> ProbeResult {
        info!(phase = "connect", region = %endpoint.region, "Connecting to ECS");

        let outcome = async {
            let tcp = self.connect(endpoint).await?;
            let mut tls = self.handshake(endpoint, tcp).await?;
            let summary = self.exchange(endpoint, &mut tls).await?;
            let _ = tls.shutdown().await;
            Ok::<_, ProbeFailure>(summary)
        }
        .await;

        match outcome {
            Ok(summary) => {
                debug!(
                    phase = "connect",
                    bytes = summary.bytes,
                    status_line = ?summary.status_line,
                    "Response received"
                );
                info!(phase = "connect", region = %endpoint.region, "ECS is available");
                ProbeResult::Reachable
            }
            Err(failure) => {
                warn!(
                    phase = "connect",
                    region = %endpoint.region,
                    reason = failure.kind(),
                    error = %failure,
                    "ECS connectivity check failed"
                );
                ProbeResult::Unreachable(failure)
            }
        }
    }
}

/// Name used for SNI and certificate verification
fn server_name(hostname: &str) -> Result<ServerName, ProbeFailure> {
    ServerName::try_from(hostname).map_err(|e| ProbeFailure::NameResolution(e.to_string()))
}
