//! Race timing backend entrypoint wiring the WebSocket channel, debug REST routes and
//! JSON persistence.

use std::{net::SocketAddr, path::Path, time::Duration};

use anyhow::Context;
use axum::Router;
use tokio::{net::TcpListener, task::JoinHandle, time::timeout};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use race_timing_back::{
    config::AppConfig,
    routes,
    services::coordinator::{self, Runtime},
    state::SharedState,
};

const WORKER_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let Runtime {
        state,
        persistence_worker,
        results_worker,
    } = coordinator::bootstrap(&config).await;

    // Build the HTTP router once the shared state is ready.
    let app = build_router(state.clone(), config.server.static_dir.as_deref());

    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    final_save(&state).await;

    // Workers stop once the last state handle is gone; let them drain pending work.
    drop(state);
    drain_worker("results", results_worker).await;
    drain_worker("persistence", persistence_worker).await;
    Ok(())
}

/// Wait for a background worker to finish its queue, giving up after a grace period.
async fn drain_worker(name: &str, worker: JoinHandle<()>) {
    match timeout(WORKER_DRAIN_TIMEOUT, worker).await {
        Ok(Ok(())) => info!(worker = name, "worker drained"),
        Ok(Err(err)) => error!(worker = name, error = %err, "worker ended abnormally"),
        Err(_) => warn!(worker = name, "worker still busy at shutdown; giving up"),
    }
}

/// Write the last state before exiting; a failure is logged, the process still stops.
async fn final_save(state: &SharedState) {
    match coordinator::flush(state).await {
        Ok(()) => info!("final race state saved"),
        Err(err) => error!(error = %err, "final save failed"),
    }
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState, static_dir: Option<&Path>) -> Router<()> {
    if let Some(dir) = static_dir {
        info!(dir = %dir.display(), "serving web app");
    }
    routes::router(state, static_dir)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("shutdown requested");
}
