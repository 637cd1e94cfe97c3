//! anycrawl-mcp server binary
//!
//! Serves the AnyCrawl tools over stdio, stateless HTTP, streamable HTTP, or
//! the multi-tenant HTTP binding, depending on `--mode`.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use anycrawl_mcp::BoxError;
use anycrawl_mcp::config::{Config, Mode};
use anycrawl_mcp::registry::{ClosePolicy, DEFAULT_TENANT, SessionRegistry, TransportKind};
use anycrawl_mcp::transport::{HttpTransport, MultiTenantTransport, StdioTransport, default_factory};

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = Config::parse();

    // stdout belongs to the protocol in stdio mode
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(format!("anycrawl_mcp={}", config.log_level))?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    config.validate()?;

    tracing::info!(
        mode = config.mode.as_str(),
        base_url = %config.base_url,
        request_timeout_secs = config.request_timeout_secs,
        "Starting anycrawl-mcp server"
    );

    let engines = config.engine_factory();
    let services = default_factory(config.request_timeout());

    match config.mode {
        Mode::Stdio => {
            let router = engines(DEFAULT_TENANT)?;
            StdioTransport::new(router).services(services).run().await?;
        }
        Mode::Stateless => {
            HttpTransport::stateless(engines)
                .services(services)
                .serve(&config.addr(), shutdown_signal())
                .await?;
        }
        Mode::Streamable => {
            let registry = Arc::new(SessionRegistry::new(
                TransportKind::Streamable,
                config.registry_config(ClosePolicy::Immediate),
            ));
            let maintenance = registry.start_maintenance();

            HttpTransport::streamable(engines, registry)
                .services(services)
                .serve(&config.addr(), shutdown_signal())
                .await?;
            maintenance.shutdown().await;
        }
        Mode::MultiTenant => {
            let streamable = Arc::new(SessionRegistry::new(
                TransportKind::Streamable,
                config.registry_config(ClosePolicy::Deferred),
            ));
            let legacy = Arc::new(SessionRegistry::new(
                TransportKind::LegacySse,
                config.registry_config(ClosePolicy::Deferred),
            ));
            let streamable_maintenance = streamable.start_maintenance();
            let legacy_maintenance = legacy.start_maintenance();

            MultiTenantTransport::new(engines, streamable, legacy)
                .services(services)
                .serve(&config.addr(), shutdown_signal())
                .await?;
            streamable_maintenance.shutdown().await;
            legacy_maintenance.shutdown().await;
        }
    }

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
