//! MirrorTV server library.
//!
//! Wires the capture-session engine to an HTTP API, a server-sent events
//! feed and static file serving for the web UI and HLS output.

mod config;
mod error;
mod events;
mod routes;
mod state;

pub use config::ServerConfig;
pub use error::ApiError;
pub use routes::router;
pub use state::AppState;

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mirrortv_capture::{SystemWindowSource, WindowSource};
use mirrortv_engine::{spawn_engine, ErrorLog};

/// Initialize logging.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "mirrortv=debug,mirrortv_lib=debug,mirrortv_engine=debug,mirrortv_capture=debug,mirrortv_encoder=debug,mirrortv_playback=debug,tower_http=info".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Start the engine and serve HTTP until Ctrl-C or SIGTERM.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let addr = config.socket_addr().context("Invalid bind address")?;
    let engine_config = config.engine_config();

    std::fs::create_dir_all(&engine_config.stream_root).with_context(|| {
        format!("Failed to create stream directory {}", engine_config.stream_root.display())
    })?;
    if !config.public_dir.is_dir() {
        warn!(path = %config.public_dir.display(), "Public directory not found, web UI will be unavailable");
    }

    let error_log = Arc::new(ErrorLog::open(&config.error_log));
    info!(path = %config.error_log.display(), records = error_log.len(), "Error log loaded");
    let windows: Arc<dyn WindowSource> = Arc::new(SystemWindowSource);

    let stream_root = Arc::new(engine_config.stream_root.clone());
    let playlist_name: Arc<str> = engine_config.encoder.playlist_name.as_str().into();
    let (engine, _engine_thread) =
        spawn_engine(engine_config, Arc::clone(&windows), Arc::clone(&error_log))
            .context("Failed to start engine")?;

    let state = AppState {
        engine,
        windows,
        error_log,
        stream_root,
        playlist_name,
        readiness: config.readiness_policy(),
    };

    let engine = state.engine.clone();
    let app = router(state, &config.public_dir);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("MirrorTV ready on http://{}", addr);
    info!("   Viewer: http://{}/", addr);
    info!("   Events: GET http://{}/api/events", addr);
    info!("   Max concurrent streams: {}", config.max_sessions);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Stopping all streams");
            // Ending the engine also ends every SSE response.
            match tokio::task::spawn_blocking(move || engine.shutdown()).await {
                Ok(Ok(())) => info!("Engine stopped"),
                Ok(Err(e)) => warn!("Engine shutdown failed: {}", e),
                Err(e) => warn!("Engine shutdown task failed: {}", e),
            }
        })
        .await
        .context("Server error")?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, shutting down...");
        }
        _ = terminate() => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
