//! Softlock HTTP server.
//!
//! Connects to Redis and `PostgreSQL`, runs ledger migrations, exposes
//! Prometheus metrics on `METRICS_PORT` and serves the API until Ctrl+C or
//! SIGTERM.
//!
//! # Usage
//!
//! ```bash
//! docker run -d -p 6379:6379 redis:7-alpine
//! docker run -d -p 5432:5432 -e POSTGRES_PASSWORD=postgres -e POSTGRES_DB=softlock postgres:16
//! cargo run --bin server
//! ```

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use softlock_core::metrics::register_engine_metrics;
use softlock_core::stores::ProductionBackend;
use softlock_core::{Clock, Config, Engine, QrSigner, SystemClock};
use softlock_web::{AppState, build_router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,softlock=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Softlock server...");
    info!(
        redis = %config.redis.url,
        hold_ttl_seconds = config.holds.ttl_seconds,
        reserve_limit = config.rate_limit.reserve_requests,
        finalize_limit = config.rate_limit.finalize_requests,
        "Configuration loaded"
    );

    let metrics_addr: SocketAddr = format!(
        "{}:{}",
        config.server.metrics_host, config.server.metrics_port
    )
    .parse()
    .context("invalid metrics address")?;
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .context("failed to install Prometheus exporter")?;
    register_engine_metrics();
    info!(address = %metrics_addr, "Metrics exporter listening");

    let providers = ProductionBackend::connect(&config)
        .await
        .context("failed to connect stores")?;
    let signer = QrSigner::new(&config.qr_signing_secret).context("invalid QR signing secret")?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let engine = Engine::<ProductionBackend>::new(
        providers,
        signer,
        clock,
        config.engine_settings(),
    );

    let app = build_router(AppState::new(engine));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(address = %addr, "Server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C signal, shutting down gracefully..."),
        () = terminate => info!("Received SIGTERM signal, shutting down gracefully..."),
    }
}
