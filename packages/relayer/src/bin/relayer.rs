//! Forwarder relayer binary.

use forwarder_relayer::{create_router, AppState, Config};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting forwarder relayer");

    let settings = match Config::load().and_then(|c| c.validate()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "FATAL: Config error, fix env vars or relayer.toml");
            std::process::exit(1);
        }
    };

    info!(
        forwarder = %settings.domain.forwarder,
        chain_id = settings.domain.chain_id,
        rpc = %settings.relay_endpoint,
        roles = ?settings.required_roles.to_vec(),
        "Configuration loaded"
    );

    let state = match AppState::connect(&settings).await {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = %e, "FATAL: Startup failed");
            std::process::exit(1);
        }
    };

    info!(operator = %state.submitter().operator(), "Relayer ready");

    let cancel = CancellationToken::new();
    let sweeper = tokio::spawn(
        Arc::clone(state.submitter()).run_sweeper(settings.sweep_interval, cancel.clone()),
    );

    let app = create_router(Arc::clone(&state));

    info!(address = %settings.bind_address, "Listening");

    let listener = tokio::net::TcpListener::bind(&settings.bind_address).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, draining in-flight submissions...");
    cancel.cancel();
    let _ = sweeper.await;

    if state.submitter().drain(DRAIN_TIMEOUT).await {
        info!("All in-flight submissions drained");
    } else {
        warn!(
            remaining = state.submitter().in_flight_sends(),
            "Drain timeout, some submissions may not have been acknowledged"
        );
    }

    let pending = state.submitter().pending_count();
    if pending > 0 {
        warn!(pending, "Shutting down with unconfirmed relays; they may still confirm");
    }

    info!("Relayer shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
