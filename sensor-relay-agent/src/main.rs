// Sensor Relay Agent - Telemetry relay daemon
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # Sensor Relay Agent
//!
//! Samples the configured sensor channels every tick and relays the
//! readings to an HTTP collector, exposing Prometheus metrics and a JSON
//! status endpoint.
//!
//! ## Usage
//!
//! ```bash
//! sensor-relay-agent --config agent.yaml
//!
//! # Verbose logging on a different status port
//! sensor-relay-agent --config agent.yaml --log-level debug --listen 127.0.0.1:9200
//! ```

mod config;
mod dispatcher;
mod metrics;
mod sink;
mod sources;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use clap::Parser;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing_subscriber::EnvFilter;

use sensor_relay::{MemoryStore, Pipeline, PipelineStatus};

use crate::sink::{HttpSink, SessionMonitor};

/// Sensor telemetry relay agent
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Log level or filter directive (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Override the status server listen address
    #[arg(long)]
    listen: Option<SocketAddr>,
}

/// Application state shared across handlers.
struct AppState {
    status: Arc<RwLock<PipelineStatus>>,
    start_time: std::time::Instant,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .context("parsing log level")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    tracing::info!("Sensor Relay Agent v{}", env!("CARGO_PKG_VERSION"));

    let mut cfg = config::Config::load(&cli.config)?;
    if let Some(listen) = cli.listen {
        cfg.http.listen = listen;
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(async { run(cfg).await })
}

async fn run(cfg: config::Config) -> Result<()> {
    // Set up signal handling.
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx.send(());
    });

    let (events_tx, events_rx) = mpsc::channel(cfg.pipeline.event_queue);

    // Session state must be known before the pipeline starts.
    let monitor = SessionMonitor::new(&cfg.session, events_tx.clone())?;
    monitor.initial_check().await;

    let (http_sink, sink_handle) = HttpSink::start(&cfg.sink, events_tx.clone(), monitor.state())?;

    let mut pipeline = Pipeline::new(
        cfg.pipeline_config(),
        MemoryStore::with_capacity(cfg.store.capacity),
        http_sink,
    )?;

    for entry in &cfg.channels {
        pipeline
            .add_channel(
                entry.id.clone(),
                sources::build(entry.preset, &entry.source),
                entry.channel_config(),
            )
            .with_context(|| format!("adding channel {}", entry.id))?;
        tracing::info!(
            channel = %entry.id,
            preset = ?entry.preset,
            delivery = ?entry.delivery,
            "channel registered",
        );
    }

    pipeline.start()?;

    let status = Arc::new(RwLock::new(pipeline.status()));
    let (stop_dispatch_tx, stop_dispatch_rx) = oneshot::channel();

    let dispatcher = tokio::spawn(dispatcher::run(
        pipeline,
        events_rx,
        Arc::clone(&status),
        stop_dispatch_rx,
    ));
    let ticker = tokio::spawn(dispatcher::run_ticker(cfg.pipeline.tick_period, events_tx.clone()));
    let monitor_task = tokio::spawn(monitor.run());
    drop(events_tx);

    if cfg.http.enabled {
        let state = Arc::new(AppState {
            status: Arc::clone(&status),
            start_time: std::time::Instant::now(),
        });
        let app = Router::new()
            .route("/", get(root_handler))
            .route("/metrics", get(metrics_handler))
            .route("/health", get(health_handler))
            .route("/ready", get(ready_handler))
            .route("/status", get(status_handler))
            .with_state(state);

        let listener = TcpListener::bind(cfg.http.listen)
            .await
            .with_context(|| format!("binding {}", cfg.http.listen))?;
        tracing::info!("Starting server on http://{}", cfg.http.listen);
        tracing::info!("Metrics endpoint: http://{}/metrics", cfg.http.listen);

        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .context("serving status endpoints")?;
    } else {
        let _ = shutdown_rx.await;
    }

    // Graceful shutdown.
    ticker.abort();
    monitor_task.abort();
    let _ = stop_dispatch_tx.send(());
    let pipeline = dispatcher.await.context("joining dispatcher")?;
    drop(pipeline);

    // Dropping the pipeline closes the sink queue; let queued pushes finish.
    if let Err(e) = sink_handle.await {
        tracing::debug!(error = %e, "HTTP sink join failed");
    }

    tracing::info!("sensor-relay-agent stopped");

    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to register SIGTERM handler");
                    let _ = ctrl_c.await;
                    tracing::info!("received SIGINT, shutting down");
                    return;
                }
            };

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("received SIGINT, shutting down");
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        tracing::info!("received SIGINT, shutting down");
    }
}

/// Endpoint index.
async fn root_handler() -> Html<&'static str> {
    Html(
        "<h1>Sensor Relay Agent</h1>\n\
         <p><a href=\"/metrics\">/metrics</a> <a href=\"/health\">/health</a> \
         <a href=\"/ready\">/ready</a> <a href=\"/status\">/status</a></p>\n",
    )
}

/// Prometheus text exposition of the pipeline gauges.
async fn metrics_handler() -> impl IntoResponse {
    match metrics::encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [("Content-Type", "text/plain; charset=utf-8")],
            body,
        ),
        Err(e) => {
            tracing::error!(error = %e, "encoding metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("Content-Type", "text/plain; charset=utf-8")],
                e.to_string(),
            )
        }
    }
}

/// Liveness: OK whenever the process serves requests.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// 503 until the remote session is started.
async fn ready_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.status.read().await.session.is_started() {
        (StatusCode::OK, "Ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Session stopped")
    }
}

/// Body of `/status`.
#[derive(Serialize)]
struct StatusResponse {
    version: String,
    uptime_secs: u64,
    pipeline: PipelineStatus,
}

/// Latest pipeline snapshot published by the dispatcher.
async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let pipeline = state.status.read().await.clone();
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        pipeline,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_root_links_every_endpoint() {
        let Html(body) = root_handler().await;
        for path in ["/metrics", "/health", "/ready", "/status"] {
            assert!(body.contains(&format!("href=\"{}\"", path)), "missing {}", path);
        }
        assert!(!body.contains("<style>"));
    }
}
