// Sensor Relay - Telemetry aggregation and delivery pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Pipeline counters

/// Running totals kept by a pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PipelineStats {
    /// Ticks processed while the session was up
    pub ticks: u64,
    /// Ticks skipped while the session was down
    pub suspended_ticks: u64,
    /// Successful sensor reads
    pub reads: u64,
    /// Failed sensor reads
    pub read_failures: u64,
    /// Samples recorded because they crossed a threshold (or were first)
    pub records: u64,
    /// Samples that could not be encoded or buffered
    pub record_failures: u64,
    /// Samples force-recorded by the staleness sweep
    pub stale_records: u64,
    /// Accepted aggregate pushes
    pub publishes: u64,
    /// Publishes postponed by the minimum interval
    pub deferred_publishes: u64,
    /// Aggregate pushes the sink refused
    pub publish_failures: u64,
    /// Accepted single-sample pushes
    pub channel_pushes: u64,
    /// Single samples acknowledged by the sink
    pub delivered: u64,
    /// Single-sample pushes refused or failed
    pub push_failures: u64,
    /// Samples skipped as malformed
    pub malformed_skipped: u64,
}

impl PipelineStats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Fraction of reads that failed
    pub fn read_failure_rate(&self) -> f64 {
        let total = self.reads + self.read_failures;
        if total == 0 {
            0.0
        } else {
            self.read_failures as f64 / total as f64
        }
    }
}
