// Sensor Relay Agent - Event dispatcher
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Single consumer of pipeline events.
//!
//! Ticks, push completions and session transitions all arrive on one
//! queue and are handed to the [`Pipeline`] strictly one at a time.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, oneshot, RwLock};

use sensor_relay::{Event, Pipeline, PipelineStatus, SampleStore, TelemetrySink, Timestamp};

use crate::metrics;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or(0)
}

/// Drive the pipeline until `shutdown` fires or every sender is gone.
///
/// Returns the pipeline so the caller decides when the sink is dropped.
pub async fn run<S, K>(
    mut pipeline: Pipeline<S, K>,
    mut rx: mpsc::Receiver<Event>,
    status: Arc<RwLock<PipelineStatus>>,
    mut shutdown: oneshot::Receiver<()>,
) -> Pipeline<S, K>
where
    S: SampleStore,
    K: TelemetrySink,
{
    publish_status(pipeline.status(), &status).await;

    loop {
        let event = tokio::select! {
            _ = &mut shutdown => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        tracing::trace!(?event, "dispatching");
        if let Err(e) = pipeline.handle(event) {
            tracing::warn!(error = %e, "event rejected");
        }
        publish_status(pipeline.status(), &status).await;
    }

    tracing::info!(stats = ?pipeline.stats(), "dispatcher stopped");
    pipeline
}

async fn publish_status(snapshot: PipelineStatus, status: &RwLock<PipelineStatus>) {
    metrics::update_from_status(&snapshot);
    *status.write().await = snapshot;
}

/// Emit a tick every `period` until the dispatcher goes away.
pub async fn run_ticker(period: Duration, tx: mpsc::Sender<Event>) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if tx.send(Event::Tick { now: now_ms() }).await.is_err() {
            return;
        }
    }
}
