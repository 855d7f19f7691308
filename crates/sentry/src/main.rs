//! ECS Network Sentry
//!
//! Runs on an ECS Anywhere host and keeps ECS-managed containers alive
//! while the node cannot reach the regional ECS control plane.

use anyhow::{Context, Result};
use sentry_lib::{
    health::components, DockerRuntime, HealthRegistry, SchedulerBuilder, SentryLogger,
    StartupSettings, TlsProbe,
};
use std::fs::OpenOptions;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, fmt::writer::BoxMakeWriter, prelude::*, EnvFilter};

mod api;
mod config;

const SENTRY_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::SentryConfig::load().context("Failed to load configuration")?;
    init_tracing(&config)?;

    let endpoint = config.endpoint();
    let logger = SentryLogger::new(&endpoint.region);
    logger.log_startup(
        SENTRY_VERSION,
        &StartupSettings {
            endpoint: &endpoint,
            interval_secs: config.interval_secs,
            retries: config.retries,
            log_file: config.log_file.as_deref(),
            log_level: &config.log_level,
        },
    );

    let health_registry = HealthRegistry::for_sentry();

    let runtime = match DockerRuntime::connect().await {
        Ok(runtime) => runtime,
        Err(e) => {
            health_registry
                .set_unhealthy(components::RUNTIME, e.to_string())
                .await;
            error!(error = %e, "Docker daemon is not reachable");
            return Err(e).context("Failed to connect to the Docker daemon");
        }
    };

    let scheduler = SchedulerBuilder::new()
        .probe(Arc::new(TlsProbe::new(config.probe_config())))
        .runtime(Arc::new(runtime))
        .endpoint(endpoint)
        .interval(config.interval())
        .retries(config.retries)
        .health(health_registry.clone())
        .build()?;

    if config.api_port != 0 {
        let app_state = Arc::new(api::AppState::new(health_registry.clone()));
        let port = config.api_port;
        tokio::spawn(async move {
            if let Err(e) = api::serve(port, app_state).await {
                error!(error = %e, port, "API server stopped");
            }
        });
    }

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let loop_handle = tokio::spawn(scheduler.run(shutdown_rx));

    let reason = wait_for_shutdown().await?;
    logger.log_shutdown(reason);
    let _ = shutdown_tx.send(());

    loop_handle.await.context("Reconciliation loop panicked")?;
    info!("Shutdown complete");

    Ok(())
}

/// Install the JSON subscriber; `RUST_LOG` wins over the configured level
fn init_tracing(config: &config::SentryConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .with_context(|| format!("Invalid log level {:?}", config.log_level))?;

    let writer = match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stdout),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().with_writer(writer))
        .init();

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            Ok("SIGINT received")
        }
        _ = terminate.recv() => Ok("SIGTERM received"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("SIGINT received")
}
