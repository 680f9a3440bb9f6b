// Sensor Relay Agent - HTTP telemetry sink
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! HTTP delivery of records and remote session tracking.
//!
//! [`HttpSink`] hands records to a bounded queue and returns immediately.
//! A worker task POSTs them with at most `workers` requests in flight and
//! reports each outcome back to the pipeline as [`Event::PushComplete`].
//! [`SessionMonitor`] polls the remote end and reports transitions as
//! [`Event::Session`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use sensor_relay::{
    Event, PushContext, PushError, PushStatus, Record, SessionState, Submission, TelemetrySink,
};

use crate::config::{SessionConfig, SinkConfig};

/// Errors setting up the HTTP client.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("building HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("invalid header {name:?}: {reason}")]
    Header { name: String, reason: String },
}

/// Map an HTTP response status to a push outcome.
///
/// Statuses saying the body itself was rejected are `Malformed`, so the
/// record is skipped instead of retried forever.
pub fn classify_status(status: StatusCode) -> PushStatus {
    if status.is_success() {
        return PushStatus::Success;
    }
    match status {
        StatusCode::BAD_REQUEST
        | StatusCode::PAYLOAD_TOO_LARGE
        | StatusCode::UNPROCESSABLE_ENTITY => PushStatus::Malformed,
        _ => PushStatus::Failed,
    }
}

struct Job {
    body: String,
    context: PushContext,
}

/// Telemetry sink POSTing JSON records to a collector.
pub struct HttpSink {
    tx: mpsc::Sender<Job>,
    session: Arc<AtomicBool>,
}

impl HttpSink {
    /// Start the worker task. Must be called inside a tokio runtime.
    ///
    /// The worker exits once the sink is dropped and every queued record
    /// has been attempted.
    pub fn start(
        cfg: &SinkConfig,
        events: mpsc::Sender<Event>,
        session: Arc<AtomicBool>,
    ) -> Result<(Self, JoinHandle<()>), SinkError> {
        let client = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .default_headers(build_headers(cfg)?)
            .build()?;

        let (tx, mut rx) = mpsc::channel::<Job>(cfg.queue_size);
        let semaphore = Arc::new(Semaphore::new(cfg.workers));
        let endpoint: Arc<str> = Arc::from(cfg.endpoint.as_str());

        let handle = tokio::spawn(async move {
            let mut in_flight = JoinSet::new();

            loop {
                tokio::select! {
                    job = rx.recv() => {
                        match job {
                            Some(job) => spawn_send(
                                &mut in_flight,
                                client.clone(),
                                Arc::clone(&endpoint),
                                Arc::clone(&semaphore),
                                events.clone(),
                                job,
                            ),
                            None => break,
                        }
                    }

                    joined = in_flight.join_next(), if !in_flight.is_empty() => {
                        if let Some(Err(e)) = joined {
                            tracing::debug!(error = %e, "HTTP push worker join failed");
                        }
                    }
                }
            }

            while let Some(joined) = in_flight.join_next().await {
                if let Err(e) = joined {
                    tracing::debug!(error = %e, "HTTP push worker join failed");
                }
            }
            tracing::debug!("HTTP sink stopped");
        });

        tracing::info!(
            endpoint = %cfg.endpoint,
            workers = cfg.workers,
            queue_size = cfg.queue_size,
            "HTTP sink started",
        );

        Ok((Self { tx, session }, handle))
    }
}

impl TelemetrySink for HttpSink {
    fn push(&mut self, record: Record, context: PushContext) -> Result<Submission, PushError> {
        let body = record
            .to_json()
            .map_err(|e| PushError::Malformed(e.to_string()))?;

        match self.tx.try_send(Job { body, context }) {
            Ok(()) => Ok(Submission::Accepted),
            Err(mpsc::error::TrySendError::Full(job)) => {
                tracing::warn!(context = ?job.context, "HTTP sink queue full");
                Ok(Submission::Busy)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(PushError::Transport("HTTP sink worker stopped".to_string()))
            }
        }
    }

    fn session_state(&self) -> SessionState {
        if self.session.load(Ordering::Acquire) {
            SessionState::Started
        } else {
            SessionState::Stopped
        }
    }
}

fn build_headers(cfg: &SinkConfig) -> Result<HeaderMap, SinkError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    for (name, value) in &cfg.headers {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| SinkError::Header {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| SinkError::Header {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}

fn spawn_send(
    in_flight: &mut JoinSet<()>,
    client: reqwest::Client,
    endpoint: Arc<str>,
    semaphore: Arc<Semaphore>,
    events: mpsc::Sender<Event>,
    job: Job,
) {
    in_flight.spawn(async move {
        let _permit = match semaphore.acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                tracing::warn!(error = %e, "HTTP sink semaphore closed");
                return;
            }
        };

        let status = send_record(&client, &endpoint, job.body).await;
        tracing::debug!(context = ?job.context, ?status, "push completed");

        let event = Event::PushComplete {
            context: job.context,
            status,
        };
        if events.send(event).await.is_err() {
            tracing::debug!("pipeline gone, dropping push completion");
        }
    });
}

/// POST one record body and classify the outcome.
async fn send_record(client: &reqwest::Client, endpoint: &str, body: String) -> PushStatus {
    match client.post(endpoint).body(body).send().await {
        Ok(resp) => {
            let status = resp.status();
            // Drain body for connection reuse.
            let _ = resp.bytes().await;
            if !status.is_success() {
                tracing::warn!(%status, "HTTP push rejected");
            }
            classify_status(status)
        }
        Err(e) => {
            tracing::warn!(error = %e, "HTTP push request failed");
            PushStatus::Failed
        }
    }
}

/// Tracks whether the remote end is reachable.
pub struct SessionMonitor {
    health_url: Option<String>,
    interval: Duration,
    client: reqwest::Client,
    state: Arc<AtomicBool>,
    events: mpsc::Sender<Event>,
}

impl SessionMonitor {
    pub fn new(cfg: &SessionConfig, events: mpsc::Sender<Event>) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(cfg.check_timeout)
            .build()?;
        Ok(Self {
            health_url: cfg.health_url.clone(),
            interval: cfg.check_interval,
            client,
            state: Arc::new(AtomicBool::new(false)),
            events,
        })
    }

    /// Shared flag read by [`HttpSink::session_state`].
    pub fn state(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.state)
    }

    /// Check once and store the result without emitting an event.
    pub async fn initial_check(&self) -> SessionState {
        let up = self.check().await;
        self.state.store(up, Ordering::Release);
        tracing::info!(session = ?to_state(up), "initial session state");
        to_state(up)
    }

    async fn check(&self) -> bool {
        let Some(url) = &self.health_url else {
            return true;
        };
        match self.client.get(url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "session health check failed");
                false
            }
        }
    }

    /// Check periodically, emitting an event on every transition.
    ///
    /// Returns when the pipeline stops accepting events. Without a health
    /// URL the session never changes and this returns immediately.
    pub async fn run(self) {
        if self.health_url.is_none() {
            return;
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let up = self.check().await;
            if self.state.swap(up, Ordering::AcqRel) == up {
                continue;
            }

            let state = to_state(up);
            tracing::info!(session = ?state, "session changed");
            if self.events.send(Event::Session(state)).await.is_err() {
                return;
            }
        }
    }
}

fn to_state(up: bool) -> SessionState {
    if up {
        SessionState::Started
    } else {
        SessionState::Stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode as AxumStatus, routing::post, Router};
    use std::collections::HashMap;

    async fn collector() -> String {
        let app = Router::new()
            .route("/ok", post(|| async { AxumStatus::OK }))
            .route("/bad", post(|| async { AxumStatus::UNPROCESSABLE_ENTITY }))
            .route("/down", post(|| async { AxumStatus::SERVICE_UNAVAILABLE }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn sink_config(endpoint: String, queue_size: usize) -> SinkConfig {
        SinkConfig {
            endpoint,
            timeout: Duration::from_secs(5),
            workers: 1,
            queue_size,
            headers: HashMap::new(),
        }
    }

    fn record() -> Record {
        let mut record = Record::new();
        record.put_int("Sensors/Light/Level", 1000, 1_000).unwrap();
        record
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(StatusCode::OK), PushStatus::Success);
        assert_eq!(classify_status(StatusCode::ACCEPTED), PushStatus::Success);
        assert_eq!(classify_status(StatusCode::BAD_REQUEST), PushStatus::Malformed);
        assert_eq!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY),
            PushStatus::Malformed
        );
        assert_eq!(
            classify_status(StatusCode::PAYLOAD_TOO_LARGE),
            PushStatus::Malformed
        );
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            PushStatus::Failed
        );
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED),
            PushStatus::Failed
        );
    }

    #[test]
    fn test_invalid_header_rejected() {
        let mut cfg = sink_config("http://localhost".to_string(), 1);
        cfg.headers
            .insert("bad header".to_string(), "value".to_string());
        assert!(matches!(
            build_headers(&cfg),
            Err(SinkError::Header { .. })
        ));
    }

    async fn push_once(path: &str) -> PushStatus {
        let base = collector().await;
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let session = Arc::new(AtomicBool::new(true));
        let (mut sink, _handle) =
            HttpSink::start(&sink_config(format!("{}{}", base, path), 4), events_tx, session)
                .unwrap();

        let context = PushContext::Channel {
            channel: "light".to_string(),
            timestamp: 1_000,
        };
        assert_eq!(
            sink.push(record(), context.clone()).unwrap(),
            Submission::Accepted
        );

        match events_rx.recv().await.unwrap() {
            Event::PushComplete { context: got, status } => {
                assert_eq!(got, context);
                status
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_push_success_reported() {
        assert_eq!(push_once("/ok").await, PushStatus::Success);
    }

    #[tokio::test]
    async fn test_push_rejected_body_is_malformed() {
        assert_eq!(push_once("/bad").await, PushStatus::Malformed);
    }

    #[tokio::test]
    async fn test_push_server_error_is_failed() {
        assert_eq!(push_once("/down").await, PushStatus::Failed);
    }

    #[tokio::test]
    async fn test_session_state_follows_flag() {
        let (events_tx, _events_rx) = mpsc::channel(1);
        let session = Arc::new(AtomicBool::new(false));
        let (sink, _handle) = HttpSink::start(
            &sink_config("http://127.0.0.1:1".to_string(), 1),
            events_tx,
            Arc::clone(&session),
        )
        .unwrap();
        assert_eq!(sink.session_state(), SessionState::Stopped);
        session.store(true, Ordering::Release);
        assert_eq!(sink.session_state(), SessionState::Started);
    }

    #[tokio::test]
    async fn test_monitor_without_health_url_is_always_up() {
        let (events_tx, _events_rx) = mpsc::channel(1);
        let monitor = SessionMonitor::new(&SessionConfig::default(), events_tx).unwrap();
        assert_eq!(monitor.initial_check().await, SessionState::Started);
        assert!(monitor.state().load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_monitor_unreachable_health_url_is_down() {
        let (events_tx, _events_rx) = mpsc::channel(1);
        let cfg = SessionConfig {
            health_url: Some("http://127.0.0.1:1/health".to_string()),
            ..SessionConfig::default()
        };
        let monitor = SessionMonitor::new(&cfg, events_tx).unwrap();
        assert_eq!(monitor.initial_check().await, SessionState::Stopped);
    }
}
