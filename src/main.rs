// src/main.rs

//! # Main Application Entry Point
//!
//! Sets up the asynchronous environment, initializes application-wide shared state,
//! starts the cross-instance bridge and serves the chat WebSocket endpoint.

use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tokio::net::TcpListener;

use chat_relay::{
    api::state::AppState,
    config::Config,
    models::{ApiError, ApiResult},
    routes::create_router,
    services::{bridge, history_service::TracingHistory},
};

/// The main entry point for the Tokio runtime.
#[tokio::main]
async fn main() {
    // 1. Setup Logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chat_relay=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting chat relay server...");

    if let Err(e) = run().await {
        error!("Chat relay server failed: {}", e);
        std::process::exit(1);
    }
    info!("Server stopped");
}

async fn run() -> ApiResult<()> {
    // 2. Load configuration
    let config = Config::from_env()?;

    // 3. Initialize Shared State
    let mut state = AppState::new(config.clone(), Arc::new(TracingHistory));

    let bridge_tasks = if config.bridge_enabled {
        let (handle, tasks) = bridge::start(
            &config,
            state.instance_id,
            Arc::clone(&state.dispatcher),
            state.shutdown.clone(),
        )
        .await?;
        state = state.with_bridge(handle);
        Some(tasks)
    } else {
        warn!("Bridge disabled, running as a stand-alone instance");
        None
    };

    // 4. Configure Router
    let app = create_router(state.clone());

    // 5. Configure Server Listener
    let listener = TcpListener::bind(config.bind_addr).await?;
    info!(instance_id = %state.instance_id, "Server listening on http://{}", config.bind_addr);

    // 6. Run the Server until Ctrl-C
    let shutdown = state.shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown requested, closing connections");
            shutdown.cancel();
        })
        .await;

    state.shutdown.cancel();
    state.connection_manager.close_all().await;
    if let Some(tasks) = bridge_tasks {
        tasks.join().await;
    }
    served.map_err(ApiError::from)
}
