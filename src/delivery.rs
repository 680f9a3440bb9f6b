// Sensor Relay - Telemetry aggregation and delivery pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Per-channel delivery state machine
//!
//! Backlog channels push their samples one at a time. A [`DeliveryRecord`]
//! tracks the newest acknowledged sample and the one currently in flight,
//! and drains the sample store in timestamp order after a fault or while
//! newer samples pile up behind a pending push.
//!
//! ```text
//!            sample                 success (nothing left)
//!   Idle ───────────────▶ Pushing ─────────────────────────▶ Idle
//!                            │ sample
//!                            ▼
//!   Fault ──sample/drain──▶ Backlogged ──success──▶ push next (stays)
//!     ▲                      │
//!     └──────── failure ─────┘
//! ```
//!
//! The machine never calls itself back: a failed completion returns
//! [`Step::Retry`] and the driver schedules a drain as a separate event.

use std::fmt;

use crate::encoder::ChannelEncoder;
use crate::error::PushError;
use crate::record::Record;
use crate::sink::{PushContext, PushStatus, Submission, TelemetrySink};
use crate::stats::PipelineStats;
use crate::store::SampleStore;
use crate::value::{Sample, Timestamp};

/// Delivery state of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum DeliveryState {
    /// Everything announced so far has been delivered
    #[default]
    Idle,
    /// One sample in flight, nothing queued behind it
    Pushing,
    /// Samples waiting in the store; one may be in flight
    Backlogged,
    /// Last push failed; waiting for a drain
    Fault,
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeliveryState::Idle => "idle",
            DeliveryState::Pushing => "pushing",
            DeliveryState::Backlogged => "backlogged",
            DeliveryState::Fault => "fault",
        };
        f.write_str(name)
    }
}

/// What the driver must do after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Nothing further
    Settled,
    /// Enqueue a drain for this channel
    Retry,
}

/// Everything a transition needs besides the record itself
pub struct DeliveryLink<'a, S: ?Sized, K: ?Sized> {
    pub channel: &'a str,
    pub encoder: &'a ChannelEncoder,
    pub record_capacity: usize,
    pub store: &'a mut S,
    pub sink: &'a mut K,
    pub stats: &'a mut PipelineStats,
    /// False while the remote session is down; nothing is pushed then
    pub online: bool,
}

/// Result of one push attempt
enum Attempt {
    InFlight,
    Skipped,
    Refused,
    Held,
}

/// Delivery bookkeeping for one backlog channel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryRecord {
    state: DeliveryState,
    last_delivered: Option<Timestamp>,
    pending: Option<Timestamp>,
}

impl DeliveryRecord {
    /// Create an idle record with nothing delivered
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub fn state(&self) -> DeliveryState {
        self.state
    }

    /// Newest acknowledged (or skipped) sample
    pub fn last_delivered(&self) -> Option<Timestamp> {
        self.last_delivered
    }

    /// Sample currently in flight
    pub fn pending(&self) -> Option<Timestamp> {
        self.pending
    }

    /// True when a push is in flight
    pub fn in_flight(&self) -> bool {
        self.pending.is_some()
    }

    fn is_delivered(&self, timestamp: Timestamp) -> bool {
        self.last_delivered.map_or(false, |d| timestamp <= d)
    }

    fn advance(&mut self, timestamp: Timestamp) {
        self.last_delivered = Some(self.last_delivered.map_or(timestamp, |d| d.max(timestamp)));
    }

    fn skip<S, K>(&mut self, timestamp: Timestamp, link: &mut DeliveryLink<'_, S, K>)
    where
        S: SampleStore + ?Sized,
        K: ?Sized,
    {
        link.stats.malformed_skipped += 1;
        self.advance(timestamp);
        link.store.prune(link.channel, timestamp);
    }

    fn set_state(&mut self, channel: &str, state: DeliveryState) {
        if self.state != state {
            log::debug!("{}: {} -> {}", channel, self.state, state);
            self.state = state;
        }
    }

    /// A new sample for this channel has been buffered
    pub fn on_sample<S, K>(&mut self, sample: Sample, link: &mut DeliveryLink<'_, S, K>) -> Step
    where
        S: SampleStore + ?Sized,
        K: TelemetrySink + ?Sized,
    {
        if self.is_delivered(sample.timestamp) {
            log::debug!(
                "{}: sample at {} already delivered, ignoring",
                link.channel,
                sample.timestamp
            );
            return Step::Settled;
        }

        match self.state {
            DeliveryState::Idle => {
                match self.push(sample, link) {
                    Attempt::InFlight => self.set_state(link.channel, DeliveryState::Pushing),
                    Attempt::Skipped => {}
                    Attempt::Refused | Attempt::Held => {
                        self.set_state(link.channel, DeliveryState::Fault)
                    }
                }
                Step::Settled
            }
            DeliveryState::Pushing => {
                self.set_state(link.channel, DeliveryState::Backlogged);
                Step::Settled
            }
            DeliveryState::Backlogged => Step::Settled,
            DeliveryState::Fault => {
                self.set_state(link.channel, DeliveryState::Backlogged);
                self.drain(link)
            }
        }
    }

    /// The sink finished a push for this channel
    pub fn on_complete<S, K>(
        &mut self,
        timestamp: Timestamp,
        status: PushStatus,
        link: &mut DeliveryLink<'_, S, K>,
    ) -> Step
    where
        S: SampleStore + ?Sized,
        K: TelemetrySink + ?Sized,
    {
        if self.pending != Some(timestamp) {
            log::warn!(
                "{}: completion for {} does not match pending {:?}, ignoring",
                link.channel,
                timestamp,
                self.pending
            );
            return Step::Settled;
        }
        self.pending = None;

        match status {
            PushStatus::Success => {
                link.stats.delivered += 1;
                self.advance(timestamp);
                link.store.prune(link.channel, timestamp);
                self.continue_after_delivery(link)
            }
            PushStatus::Malformed => {
                log::error!(
                    "{}: sample at {} rejected as malformed, skipping",
                    link.channel,
                    timestamp
                );
                self.skip(timestamp, link);
                self.continue_after_delivery(link)
            }
            PushStatus::Failed => {
                log::warn!("{}: push of sample at {} failed", link.channel, timestamp);
                link.stats.push_failures += 1;
                self.set_state(link.channel, DeliveryState::Fault);
                Step::Retry
            }
        }
    }

    fn continue_after_delivery<S, K>(&mut self, link: &mut DeliveryLink<'_, S, K>) -> Step
    where
        S: SampleStore + ?Sized,
        K: TelemetrySink + ?Sized,
    {
        match self.state {
            DeliveryState::Pushing => {
                self.set_state(link.channel, DeliveryState::Idle);
                Step::Settled
            }
            _ => self.drain(link),
        }
    }

    /// Push the oldest undelivered sample, skipping malformed ones.
    ///
    /// Does nothing while a push is in flight.
    pub fn drain<S, K>(&mut self, link: &mut DeliveryLink<'_, S, K>) -> Step
    where
        S: SampleStore + ?Sized,
        K: TelemetrySink + ?Sized,
    {
        if self.in_flight() {
            return Step::Settled;
        }

        loop {
            let next = match link.store.next_after(link.channel, self.last_delivered) {
                Ok(next) => next,
                Err(e) => {
                    log::warn!("{}: sample store failed: {}", link.channel, e);
                    self.set_state(link.channel, DeliveryState::Fault);
                    return Step::Settled;
                }
            };

            let Some(sample) = next else {
                self.set_state(link.channel, DeliveryState::Idle);
                return Step::Settled;
            };

            match self.push(sample, link) {
                Attempt::InFlight => {
                    self.set_state(link.channel, DeliveryState::Backlogged);
                    return Step::Settled;
                }
                Attempt::Skipped => continue,
                Attempt::Refused | Attempt::Held => {
                    self.set_state(link.channel, DeliveryState::Fault);
                    return Step::Settled;
                }
            }
        }
    }

    fn push<S, K>(&mut self, sample: Sample, link: &mut DeliveryLink<'_, S, K>) -> Attempt
    where
        S: SampleStore + ?Sized,
        K: TelemetrySink + ?Sized,
    {
        if !link.online {
            log::debug!(
                "{}: session down, holding sample at {}",
                link.channel,
                sample.timestamp
            );
            return Attempt::Held;
        }

        let mut record = Record::with_capacity(link.record_capacity);
        if let Err(e) = link
            .encoder
            .encode(&mut record, sample.timestamp, &sample.value)
        {
            log::error!(
                "{}: cannot encode sample at {}: {}, skipping",
                link.channel,
                sample.timestamp,
                e
            );
            self.skip(sample.timestamp, link);
            return Attempt::Skipped;
        }

        let context = PushContext::Channel {
            channel: link.channel.to_string(),
            timestamp: sample.timestamp,
        };
        match link.sink.push(record, context) {
            Ok(Submission::Accepted) => {
                link.stats.channel_pushes += 1;
                self.pending = Some(sample.timestamp);
                Attempt::InFlight
            }
            Ok(Submission::Busy) => {
                log::warn!("{}: sink busy, sample at {} not sent", link.channel, sample.timestamp);
                link.stats.push_failures += 1;
                Attempt::Refused
            }
            Err(PushError::Malformed(reason)) => {
                log::error!(
                    "{}: sink rejected sample at {}: {}, skipping",
                    link.channel,
                    sample.timestamp,
                    reason
                );
                self.skip(sample.timestamp, link);
                Attempt::Skipped
            }
            Err(e) => {
                log::warn!("{}: push of sample at {} refused: {}", link.channel, sample.timestamp, e);
                link.stats.push_failures += 1;
                Attempt::Refused
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::SessionState;
    use crate::store::MemoryStore;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct ScriptedSink {
        answers: VecDeque<Result<Submission, PushError>>,
        pushed: Vec<Timestamp>,
    }

    impl TelemetrySink for ScriptedSink {
        fn push(&mut self, _record: Record, context: PushContext) -> Result<Submission, PushError> {
            let answer = self.answers.pop_front().unwrap_or(Ok(Submission::Accepted));
            if let (Ok(Submission::Accepted), PushContext::Channel { timestamp, .. }) =
                (&answer, context)
            {
                self.pushed.push(timestamp);
            }
            answer
        }

        fn session_state(&self) -> SessionState {
            SessionState::Started
        }
    }

    struct Harness {
        encoder: ChannelEncoder,
        store: MemoryStore,
        sink: ScriptedSink,
        stats: PipelineStats,
        record: DeliveryRecord,
        online: bool,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                encoder: ChannelEncoder::float("Sensors/Pressure/Pressure"),
                store: MemoryStore::new(),
                sink: ScriptedSink::default(),
                stats: PipelineStats::new(),
                record: DeliveryRecord::new(),
                online: true,
            }
        }

        fn sample(&mut self, ts: Timestamp, value: f64) -> Step {
            let sample = Sample::new(value, ts);
            self.store.append("p", sample).unwrap();
            let mut link = DeliveryLink {
                channel: "p",
                encoder: &self.encoder,
                record_capacity: 8,
                store: &mut self.store,
                sink: &mut self.sink,
                stats: &mut self.stats,
                online: self.online,
            };
            self.record.on_sample(sample, &mut link)
        }

        fn complete(&mut self, ts: Timestamp, status: PushStatus) -> Step {
            let mut link = DeliveryLink {
                channel: "p",
                encoder: &self.encoder,
                record_capacity: 8,
                store: &mut self.store,
                sink: &mut self.sink,
                stats: &mut self.stats,
                online: self.online,
            };
            self.record.on_complete(ts, status, &mut link)
        }

        fn drain(&mut self) -> Step {
            let mut link = DeliveryLink {
                channel: "p",
                encoder: &self.encoder,
                record_capacity: 8,
                store: &mut self.store,
                sink: &mut self.sink,
                stats: &mut self.stats,
                online: self.online,
            };
            self.record.drain(&mut link)
        }
    }

    #[test]
    fn test_fast_path() {
        let mut h = Harness::new();
        h.sample(1000, 101.0);
        assert_eq!(h.record.state(), DeliveryState::Pushing);
        assert_eq!(h.record.pending(), Some(1000));

        h.complete(1000, PushStatus::Success);
        assert_eq!(h.record.state(), DeliveryState::Idle);
        assert_eq!(h.record.last_delivered(), Some(1000));
        assert_eq!(h.store.len("p"), 0);
    }

    #[test]
    fn test_second_sample_while_pushing_backlogs() {
        let mut h = Harness::new();
        h.sample(1000, 101.0);
        h.sample(2000, 103.0);
        assert_eq!(h.record.state(), DeliveryState::Backlogged);
        assert_eq!(h.sink.pushed, vec![1000]);

        h.complete(1000, PushStatus::Success);
        assert_eq!(h.record.state(), DeliveryState::Backlogged);
        assert_eq!(h.record.pending(), Some(2000));

        h.complete(2000, PushStatus::Success);
        assert_eq!(h.record.state(), DeliveryState::Idle);
        assert_eq!(h.sink.pushed, vec![1000, 2000]);
    }

    #[test]
    fn test_failure_requests_retry() {
        let mut h = Harness::new();
        h.sample(1000, 101.0);
        assert_eq!(h.complete(1000, PushStatus::Failed), Step::Retry);
        assert_eq!(h.record.state(), DeliveryState::Fault);
        assert_eq!(h.record.last_delivered(), None);

        h.drain();
        assert_eq!(h.record.state(), DeliveryState::Backlogged);
        assert_eq!(h.record.pending(), Some(1000));
        h.complete(1000, PushStatus::Success);
        assert_eq!(h.record.state(), DeliveryState::Idle);
        assert_eq!(h.sink.pushed, vec![1000, 1000]);
    }

    #[test]
    fn test_synchronous_refusal_faults_without_retry() {
        let mut h = Harness::new();
        h.sink
            .answers
            .push_back(Err(PushError::Transport("offline".to_string())));
        assert_eq!(h.sample(1000, 101.0), Step::Settled);
        assert_eq!(h.record.state(), DeliveryState::Fault);
        assert!(!h.record.in_flight());

        h.sample(2000, 103.0);
        assert_eq!(h.record.state(), DeliveryState::Backlogged);
        assert_eq!(h.record.pending(), Some(1000));
    }

    #[test]
    fn test_busy_sink_faults() {
        let mut h = Harness::new();
        h.sink.answers.push_back(Ok(Submission::Busy));
        h.sample(1000, 101.0);
        assert_eq!(h.record.state(), DeliveryState::Fault);
        assert_eq!(h.stats.push_failures, 1);
    }

    #[test]
    fn test_malformed_completion_skips() {
        let mut h = Harness::new();
        h.sample(1000, 101.0);
        h.sample(2000, 103.0);
        h.complete(1000, PushStatus::Malformed);
        assert_eq!(h.record.last_delivered(), Some(1000));
        assert_eq!(h.record.pending(), Some(2000));
        assert_eq!(h.stats.malformed_skipped, 1);
        assert_eq!(h.store.len("p"), 1);
    }

    #[test]
    fn test_trailing_malformed_sample_leaves_store() {
        let mut h = Harness::new();
        h.sample(1000, 101.0);
        h.complete(1000, PushStatus::Malformed);
        assert_eq!(h.record.state(), DeliveryState::Idle);
        assert_eq!(h.store.len("p"), 0);
    }

    #[test]
    fn test_unencodable_samples_skipped_in_drain() {
        let mut h = Harness::new();
        h.sink
            .answers
            .push_back(Err(PushError::Transport("offline".to_string())));
        h.sample(1000, 101.0);
        h.sample(2000, f64::NAN);
        // drain: 1000 pushed, in flight
        assert_eq!(h.record.pending(), Some(1000));
        h.complete(1000, PushStatus::Success);
        // 2000 cannot be encoded, skipped, nothing else buffered
        assert_eq!(h.record.state(), DeliveryState::Idle);
        assert_eq!(h.record.last_delivered(), Some(2000));
        assert_eq!(h.stats.malformed_skipped, 1);
        assert_eq!(h.store.len("p"), 0);
    }

    #[test]
    fn test_synchronous_malformed_skipped() {
        let mut h = Harness::new();
        h.sink
            .answers
            .push_back(Err(PushError::Malformed("bad path".to_string())));
        h.sample(1000, 101.0);
        assert_eq!(h.record.state(), DeliveryState::Idle);
        assert_eq!(h.record.last_delivered(), Some(1000));
        assert_eq!(h.store.len("p"), 0);
    }

    #[test]
    fn test_offline_sample_is_held() {
        let mut h = Harness::new();
        h.online = false;
        assert_eq!(h.sample(1000, 101.0), Step::Settled);
        assert_eq!(h.record.state(), DeliveryState::Fault);
        assert!(h.sink.pushed.is_empty());
        assert_eq!(h.store.len("p"), 1);
        assert_eq!(h.stats.push_failures, 0);

        h.online = true;
        h.drain();
        assert_eq!(h.sink.pushed, vec![1000]);
        assert_eq!(h.record.state(), DeliveryState::Backlogged);
    }

    #[test]
    fn test_offline_completion_does_not_continue_drain() {
        let mut h = Harness::new();
        h.sample(1000, 101.0);
        h.sample(2000, 103.0);
        h.online = false;
        h.complete(1000, PushStatus::Success);
        assert_eq!(h.record.last_delivered(), Some(1000));
        assert_eq!(h.record.state(), DeliveryState::Fault);
        assert_eq!(h.sink.pushed, vec![1000]);

        h.drain();
        assert_eq!(h.sink.pushed, vec![1000]);
    }

    #[test]
    fn test_mismatched_completion_ignored() {
        let mut h = Harness::new();
        h.sample(1000, 101.0);
        h.complete(999, PushStatus::Success);
        assert_eq!(h.record.state(), DeliveryState::Pushing);
        assert_eq!(h.record.pending(), Some(1000));
        assert_eq!(h.record.last_delivered(), None);
    }

    #[test]
    fn test_drain_while_in_flight_is_noop() {
        let mut h = Harness::new();
        h.sample(1000, 101.0);
        h.sample(2000, 102.0);
        h.drain();
        assert_eq!(h.sink.pushed, vec![1000]);
    }

    #[test]
    fn test_old_sample_ignored() {
        let mut h = Harness::new();
        h.sample(1000, 101.0);
        h.complete(1000, PushStatus::Success);
        let mut link = DeliveryLink {
            channel: "p",
            encoder: &h.encoder,
            record_capacity: 8,
            store: &mut h.store,
            sink: &mut h.sink,
            stats: &mut h.stats,
            online: true,
        };
        h.record.on_sample(Sample::new(100.0, 1000), &mut link);
        assert_eq!(h.record.state(), DeliveryState::Idle);
        assert_eq!(h.sink.pushed, vec![1000]);
    }

    #[test]
    fn test_drain_after_outage_in_order() {
        let mut h = Harness::new();
        h.sample(1000, 101.0);
        for ts in [2000, 3000, 4000, 5000] {
            h.sample(ts, 101.0 + ts as f64 / 1000.0);
        }
        assert_eq!(h.complete(1000, PushStatus::Failed), Step::Retry);
        h.drain();
        for ts in [1000, 2000, 3000, 4000, 5000] {
            assert_eq!(h.record.pending(), Some(ts));
            h.complete(ts, PushStatus::Success);
        }
        assert_eq!(h.record.state(), DeliveryState::Idle);
        assert_eq!(h.record.last_delivered(), Some(5000));
        assert_eq!(h.stats.delivered, 5);
        assert_eq!(h.sink.pushed, vec![1000, 1000, 2000, 3000, 4000, 5000]);
    }
}
