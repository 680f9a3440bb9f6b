// Sensor Relay - Telemetry aggregation and delivery pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Publish scheduling for the aggregate record
//!
//! The [`PublishScheduler`] owns the aggregate [`Record`] and decides, once
//! per tick, whether it goes out:
//!
//! - a publish is wanted when a channel was recorded this tick, when a
//!   refused record is still waiting, or when a channel has not been
//!   recorded for longer than the maximum interval while still producing
//!   reads newer than the last publish;
//! - a wanted publish inside the minimum interval is deferred and retried
//!   on the following ticks;
//! - right before pushing, channels silent for longer than the staleness
//!   limit are force-recorded with their current reading.

use crate::channel::ChannelRegistry;
use crate::config::{DeliveryMode, PipelineConfig};
use crate::record::Record;
use crate::sink::{PushContext, Submission, TelemetrySink};
use crate::stats::PipelineStats;
use crate::value::Timestamp;

/// Outcome of one scheduler evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishDecision {
    /// No publish wanted
    Nothing,
    /// Wanted but inside the minimum interval
    Deferred,
    /// The sink accepted a record with this many fields
    Published { fields: usize },
    /// The sink did not take the record; it is kept for the next tick
    Refused,
}

/// Rate limiter and staleness sweep for aggregate publishes
#[derive(Debug, Clone)]
pub struct PublishScheduler {
    min_interval: u64,
    max_interval: u64,
    time_to_stale: u64,
    last_published_at: Option<Timestamp>,
    deferred: bool,
    record: Record,
}

impl PublishScheduler {
    /// Create a scheduler from the pipeline intervals
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            min_interval: config.min_publish_ms(),
            max_interval: config.max_publish_ms(),
            time_to_stale: config.time_to_stale_ms(),
            last_published_at: None,
            deferred: false,
            record: Record::with_capacity(config.record_capacity),
        }
    }

    /// Time of the last accepted publish
    pub fn last_published_at(&self) -> Option<Timestamp> {
        self.last_published_at
    }

    /// True when a publish is waiting for the minimum interval to elapse
    pub fn is_deferred(&self) -> bool {
        self.deferred
    }

    /// Fields recorded since the last accepted publish
    pub fn record(&self) -> &Record {
        &self.record
    }

    /// Mutable access for recording aggregate channels
    pub fn record_mut(&mut self) -> &mut Record {
        &mut self.record
    }

    /// True while the minimum interval since the last publish has not elapsed
    pub fn in_cooldown(&self, now: Timestamp) -> bool {
        self.last_published_at
            .map_or(false, |at| now.saturating_sub(at) < self.min_interval)
    }

    /// True when some aggregate channel has gone unrecorded for longer than
    /// the maximum interval but has been read since the last publish
    pub fn publish_forced(&self, now: Timestamp, channels: &ChannelRegistry) -> bool {
        channels
            .iter()
            .filter(|c| c.delivery() == DeliveryMode::Aggregate)
            .any(|c| {
                c.is_older_than(now, self.max_interval)
                    && match self.last_published_at {
                        Some(at) => c.read_newer_than(at),
                        None => c.last_read().is_some(),
                    }
            })
    }

    /// Force-record every aggregate channel that has gone stale and has an
    /// unrecorded reading. Returns the number of channels recorded.
    pub fn sweep_stale(
        &mut self,
        now: Timestamp,
        channels: &mut ChannelRegistry,
        stats: &mut PipelineStats,
    ) -> usize {
        let mut swept = 0;
        for channel in channels
            .iter_mut()
            .filter(|c| c.delivery() == DeliveryMode::Aggregate)
        {
            if !channel.is_older_than(now, self.time_to_stale) || !channel.has_unrecorded_read() {
                continue;
            }
            let Some(sample) = channel.last_read().copied() else {
                continue;
            };
            match channel.record_into(&mut self.record, sample) {
                Ok(()) => {
                    log::debug!("{}: stale, recorded reading from {}", channel.id, sample.timestamp);
                    stats.stale_records += 1;
                    swept += 1;
                }
                Err(e) => {
                    log::warn!("{}: stale reading could not be recorded: {}", channel.id, e);
                    stats.record_failures += 1;
                }
            }
        }
        swept
    }

    /// Run the publish decision for one tick.
    ///
    /// `recorded` tells whether any aggregate channel was recorded during
    /// this tick.
    pub fn evaluate<K>(
        &mut self,
        now: Timestamp,
        recorded: bool,
        channels: &mut ChannelRegistry,
        sink: &mut K,
        stats: &mut PipelineStats,
    ) -> PublishDecision
    where
        K: TelemetrySink + ?Sized,
    {
        let wanted =
            recorded || !self.record.is_empty() || self.publish_forced(now, channels);
        if !wanted && !self.deferred {
            return PublishDecision::Nothing;
        }

        if self.in_cooldown(now) {
            if !self.deferred {
                log::debug!("Publish deferred until minimum interval elapses");
                stats.deferred_publishes += 1;
            }
            self.deferred = true;
            return PublishDecision::Deferred;
        }

        self.sweep_stale(now, channels, stats);

        if self.record.is_empty() {
            self.deferred = false;
            return PublishDecision::Nothing;
        }

        let fields = self.record.len();
        match sink.push(self.record.clone(), PushContext::Aggregate) {
            Ok(Submission::Accepted) => {
                log::info!("Published {} fields", fields);
                stats.publishes += 1;
                self.last_published_at = Some(now);
                self.deferred = false;
                self.record.clear();
                PublishDecision::Published { fields }
            }
            Ok(Submission::Busy) => {
                log::error!("Aggregate publish refused: sink busy");
                stats.publish_failures += 1;
                PublishDecision::Refused
            }
            Err(e) => {
                log::error!("Aggregate publish refused: {}", e);
                stats.publish_failures += 1;
                PublishDecision::Refused
            }
        }
    }
}
