// Sensor Relay Agent - Prometheus metrics definitions
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Prometheus metrics for pipeline monitoring.
//!
//! The pipeline keeps its own cumulative counters; after each event the
//! dispatcher copies a [`PipelineStatus`] snapshot into these gauges.

use lazy_static::lazy_static;
use prometheus::{register_gauge, register_gauge_vec, Encoder, Gauge, GaugeVec, TextEncoder};

use sensor_relay::{DeliveryState, PipelineStatus};

lazy_static! {
    // ============================================================
    // Pipeline counters (from PipelineStats)
    // ============================================================

    pub static ref TICKS_TOTAL: Gauge = register_gauge!(
        "sensor_relay_ticks_total",
        "Ticks processed while the session was up"
    ).unwrap();

    pub static ref SUSPENDED_TICKS_TOTAL: Gauge = register_gauge!(
        "sensor_relay_suspended_ticks_total",
        "Ticks skipped while the session was down"
    ).unwrap();

    pub static ref READS_TOTAL: Gauge = register_gauge!(
        "sensor_relay_reads_total",
        "Successful sensor reads"
    ).unwrap();

    pub static ref READ_FAILURES_TOTAL: Gauge = register_gauge!(
        "sensor_relay_read_failures_total",
        "Failed sensor reads"
    ).unwrap();

    pub static ref RECORDS_TOTAL: Gauge = register_gauge!(
        "sensor_relay_records_total",
        "Samples recorded after crossing a threshold"
    ).unwrap();

    pub static ref STALE_RECORDS_TOTAL: Gauge = register_gauge!(
        "sensor_relay_stale_records_total",
        "Samples recorded by the staleness sweep"
    ).unwrap();

    pub static ref PUBLISHES_TOTAL: Gauge = register_gauge!(
        "sensor_relay_publishes_total",
        "Aggregate records accepted by the sink"
    ).unwrap();

    pub static ref DEFERRED_PUBLISHES_TOTAL: Gauge = register_gauge!(
        "sensor_relay_deferred_publishes_total",
        "Publishes postponed by the minimum interval"
    ).unwrap();

    pub static ref PUBLISH_FAILURES_TOTAL: Gauge = register_gauge!(
        "sensor_relay_publish_failures_total",
        "Aggregate records refused by the sink"
    ).unwrap();

    pub static ref DELIVERED_TOTAL: Gauge = register_gauge!(
        "sensor_relay_delivered_total",
        "Backlog samples acknowledged by the sink"
    ).unwrap();

    pub static ref PUSH_FAILURES_TOTAL: Gauge = register_gauge!(
        "sensor_relay_push_failures_total",
        "Backlog pushes refused or failed"
    ).unwrap();

    pub static ref MALFORMED_SKIPPED_TOTAL: Gauge = register_gauge!(
        "sensor_relay_malformed_skipped_total",
        "Backlog samples skipped as malformed"
    ).unwrap();

    pub static ref EVICTED_SAMPLES_TOTAL: Gauge = register_gauge!(
        "sensor_relay_evicted_samples_total",
        "Buffered samples dropped before delivery because the store was full"
    ).unwrap();

    /// Range: 0.0 to 1.0
    pub static ref READ_FAILURE_RATIO: Gauge = register_gauge!(
        "sensor_relay_read_failure_ratio",
        "Fraction of sensor reads that failed"
    ).unwrap();

    // ============================================================
    // Pipeline state
    // ============================================================

    /// 1 while the remote session is started.
    pub static ref SESSION_UP: Gauge = register_gauge!(
        "sensor_relay_session_up",
        "Remote session state (1=started, 0=stopped)"
    ).unwrap();

    pub static ref PENDING_FIELDS: Gauge = register_gauge!(
        "sensor_relay_pending_fields",
        "Fields waiting in the aggregate record"
    ).unwrap();

    /// Values: 0 = Idle, 1 = Pushing, 2 = Backlogged, 3 = Fault
    pub static ref CHANNEL_DELIVERY_STATE: GaugeVec = register_gauge_vec!(
        "sensor_relay_channel_delivery_state",
        "Backlog channel delivery state (0=Idle, 1=Pushing, 2=Backlogged, 3=Fault)",
        &["channel"]
    ).unwrap();

    pub static ref CHANNEL_BUFFERED: GaugeVec = register_gauge_vec!(
        "sensor_relay_channel_buffered_samples",
        "Samples buffered in the store per channel",
        &["channel"]
    ).unwrap();
}

fn state_value(state: DeliveryState) -> f64 {
    match state {
        DeliveryState::Idle => 0.0,
        DeliveryState::Pushing => 1.0,
        DeliveryState::Backlogged => 2.0,
        DeliveryState::Fault => 3.0,
    }
}

/// Copy a pipeline snapshot into the registered gauges.
pub fn update_from_status(status: &PipelineStatus) {
    let stats = &status.stats;
    TICKS_TOTAL.set(stats.ticks as f64);
    SUSPENDED_TICKS_TOTAL.set(stats.suspended_ticks as f64);
    READS_TOTAL.set(stats.reads as f64);
    READ_FAILURES_TOTAL.set(stats.read_failures as f64);
    RECORDS_TOTAL.set(stats.records as f64);
    STALE_RECORDS_TOTAL.set(stats.stale_records as f64);
    PUBLISHES_TOTAL.set(stats.publishes as f64);
    DEFERRED_PUBLISHES_TOTAL.set(stats.deferred_publishes as f64);
    PUBLISH_FAILURES_TOTAL.set(stats.publish_failures as f64);
    DELIVERED_TOTAL.set(stats.delivered as f64);
    PUSH_FAILURES_TOTAL.set(stats.push_failures as f64);
    MALFORMED_SKIPPED_TOTAL.set(stats.malformed_skipped as f64);
    EVICTED_SAMPLES_TOTAL.set(status.evicted_samples as f64);
    READ_FAILURE_RATIO.set(stats.read_failure_rate());

    SESSION_UP.set(if status.session.is_started() { 1.0 } else { 0.0 });
    PENDING_FIELDS.set(status.pending_fields as f64);

    for channel in &status.channels {
        CHANNEL_BUFFERED
            .with_label_values(&[channel.id.as_str()])
            .set(channel.buffered as f64);
        if let Some(state) = channel.delivery_state {
            CHANNEL_DELIVERY_STATE
                .with_label_values(&[channel.id.as_str()])
                .set(state_value(state));
        }
    }
}

/// Encode all registered metrics in the Prometheus text format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
