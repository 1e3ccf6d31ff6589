//! HTTP job API in front of the generation pipeline.
//!
//! A client submits a prompt, polls the job until it leaves `running`, then
//! downloads the artifact or reads the classified error.

pub mod api;
pub mod jobs;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::SlidesmithConfig;
use crate::pipeline::{PipelineOrchestrator, sweep_expired};
use api::{AppState, SharedState};
use jobs::JobRegistry;

/// How often finished jobs are checked against the retention period.
const EVICTION_INTERVAL: Duration = Duration::from_secs(30);

/// How long shutdown waits for cancelled jobs to wind down.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Configuration for the HTTP server.
pub struct ServerConfig {
    pub port: u16,
    /// Bind on all interfaces and allow any CORS origin.
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3141,
            dev_mode: false,
        }
    }
}

/// Build the application router.
pub fn build_router(state: SharedState) -> Router {
    api::api_router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the server and run until Ctrl+C.
pub async fn start_server(config: ServerConfig, settings: SlidesmithConfig) -> Result<()> {
    let root = settings.workspace_root();
    let swept = sweep_expired(&root, settings.retention())
        .with_context(|| format!("Failed to sweep workspaces under {}", root.display()))?;
    if swept > 0 {
        tracing::info!(count = swept, "removed expired workspaces from a previous run");
    }

    let orchestrator = PipelineOrchestrator::from_config(&settings)?;
    let jobs = JobRegistry::new(orchestrator);
    jobs.spawn_eviction(settings.retention(), EVICTION_INTERVAL);

    let state = Arc::new(AppState {
        jobs: jobs.clone(),
        download_name: settings.download_name().map(str::to_string),
    });

    let mut app = build_router(state);

    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let host = if config.dev_mode { "0.0.0.0" } else { "127.0.0.1" };
    let addr = format!("{}:{}", host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    println!("slidesmith running at http://{}", local_addr);
    tracing::info!(%local_addr, endpoint = ?settings.endpoint(), "server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if tokio::time::timeout(SHUTDOWN_GRACE, jobs.shutdown())
        .await
        .is_err()
    {
        tracing::warn!("jobs still running after {:?}, exiting anyway", SHUTDOWN_GRACE);
    }
    println!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C");
        return;
    }
    println!("\nShutting down...");
}
