// Sensor Relay - Telemetry aggregation and delivery pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Pipeline driver
//!
//! The [`Pipeline`] owns every channel, the aggregate scheduler, the delivery
//! records of backlog channels, the sample store and the sink. It is driven
//! entirely by [`Event`]s handed to [`Pipeline::handle`], one at a time; an
//! event and all the follow-up work it schedules run to completion before
//! `handle` returns.
//!
//! # Example
//!
//! ```rust
//! use sensor_relay::{
//!     read_fn, ChannelConfig, Event, MemoryStore, Pipeline, PipelineConfig, PushContext,
//!     PushError, Record, SessionState, Submission, TelemetrySink, Value,
//! };
//!
//! struct Discard;
//!
//! impl TelemetrySink for Discard {
//!     fn push(&mut self, _: Record, _: PushContext) -> Result<Submission, PushError> {
//!         Ok(Submission::Accepted)
//!     }
//!     fn session_state(&self) -> SessionState {
//!         SessionState::Started
//!     }
//! }
//!
//! let mut pipeline =
//!     Pipeline::new(PipelineConfig::default(), MemoryStore::new(), Discard).unwrap();
//! pipeline
//!     .add_channel("light", read_fn(|| Ok(Value::Scalar(1000.0))), ChannelConfig::light())
//!     .unwrap();
//! pipeline.start().unwrap();
//!
//! pipeline.handle(Event::Tick { now: 1_000 }).unwrap();
//! assert_eq!(pipeline.stats().publishes, 1);
//! ```

use std::collections::{HashMap, VecDeque};

use crate::channel::{ChannelId, ChannelRegistry, SensorRead};
use crate::config::{ChannelConfig, DeliveryMode, PipelineConfig};
use crate::delivery::{DeliveryLink, DeliveryRecord, DeliveryState, Step};
use crate::error::{ConfigError, RelayError, Result};
use crate::scheduler::PublishScheduler;
use crate::sink::{PushContext, PushStatus, SessionState, TelemetrySink};
use crate::stats::PipelineStats;
use crate::store::SampleStore;
use crate::value::{Sample, Timestamp, ValueKind};

/// Input to the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Periodic sampling tick
    Tick { now: Timestamp },
    /// The sink finished a push
    PushComplete {
        context: PushContext,
        status: PushStatus,
    },
    /// The remote session went up or down
    Session(SessionState),
    /// A sample for a backlog channel produced outside the tick
    Sample { channel: ChannelId, sample: Sample },
    /// Resume delivery of a backlog channel
    Drain { channel: ChannelId },
}

/// Point-in-time view of one channel
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ChannelStatus {
    pub id: ChannelId,
    pub kind: ValueKind,
    pub delivery: DeliveryMode,
    pub last_read: Option<Sample>,
    pub last_recorded: Option<Sample>,
    pub delivery_state: Option<DeliveryState>,
    pub last_delivered: Option<Timestamp>,
    pub buffered: usize,
}

/// Point-in-time view of the whole pipeline
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PipelineStatus {
    pub session: SessionState,
    pub last_published_at: Option<Timestamp>,
    pub deferred: bool,
    pub pending_fields: usize,
    /// Buffered samples dropped before delivery because the store was full
    pub evicted_samples: u64,
    pub channels: Vec<ChannelStatus>,
    pub stats: PipelineStats,
}

/// Telemetry pipeline over a sample store `S` and a sink `K`
pub struct Pipeline<S: SampleStore, K: TelemetrySink> {
    config: PipelineConfig,
    channels: ChannelRegistry,
    deliveries: HashMap<ChannelId, DeliveryRecord>,
    scheduler: PublishScheduler,
    store: S,
    sink: K,
    session: SessionState,
    started: bool,
    queue: VecDeque<Event>,
    stats: PipelineStats,
}

impl<S: SampleStore, K: TelemetrySink> Pipeline<S, K> {
    /// Create a pipeline, validating the configuration
    pub fn new(config: PipelineConfig, store: S, sink: K) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            channels: ChannelRegistry::new(config.max_channels),
            deliveries: HashMap::new(),
            scheduler: PublishScheduler::new(&config),
            config,
            store,
            sink,
            session: SessionState::Stopped,
            started: false,
            queue: VecDeque::new(),
            stats: PipelineStats::new(),
        })
    }

    /// Register a channel
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The pipeline has already started
    /// - A channel with the same ID already exists
    /// - The maximum number of channels has been reached
    /// - The detector or encoder does not support the channel's kind
    pub fn add_channel(
        &mut self,
        id: impl Into<String>,
        reader: Box<dyn SensorRead>,
        config: ChannelConfig,
    ) -> Result<()> {
        if self.started {
            return Err(ConfigError::AlreadyStarted.into());
        }
        let id = id.into();
        let delivery = config.delivery;
        self.channels.add(id.clone(), reader, config)?;
        if delivery == DeliveryMode::Backlog {
            self.deliveries.insert(id, DeliveryRecord::new());
        }
        Ok(())
    }

    /// Start the pipeline, taking the session state from the sink
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(ConfigError::AlreadyStarted.into());
        }
        self.started = true;
        let state = self.sink.session_state();
        log::info!(
            "Pipeline started with {} channels, session {:?}",
            self.channels.count(),
            state
        );
        self.session = state;
        Ok(())
    }

    /// Handle one event and every follow-up it schedules.
    ///
    /// Only caller mistakes are reported as errors; sensor, encoding and
    /// delivery failures are logged and counted.
    pub fn handle(&mut self, event: Event) -> Result<()> {
        if !self.started {
            return Err(ConfigError::NotStarted.into());
        }
        let result = self.dispatch(event);
        while let Some(follow_up) = self.queue.pop_front() {
            if let Err(e) = self.dispatch(follow_up) {
                log::warn!("Follow-up event failed: {}", e);
            }
        }
        result
    }

    fn dispatch(&mut self, event: Event) -> Result<()> {
        match event {
            Event::Tick { now } => {
                self.on_tick(now);
                Ok(())
            }
            Event::PushComplete { context, status } => {
                self.on_push_complete(context, status);
                Ok(())
            }
            Event::Session(state) => {
                self.on_session(state);
                Ok(())
            }
            Event::Sample { channel, sample } => self.on_external_sample(&channel, sample),
            Event::Drain { channel } => self.on_drain(&channel),
        }
    }

    fn on_tick(&mut self, now: Timestamp) {
        if !self.session.is_started() {
            self.stats.suspended_ticks += 1;
            return;
        }
        self.stats.ticks += 1;
        self.enqueue_faulted_drains();

        let Self {
            config,
            channels,
            deliveries,
            scheduler,
            store,
            sink,
            queue,
            stats,
            session,
            ..
        } = self;

        let mut recorded = false;
        for channel in channels.iter_mut() {
            if !channel.is_due(now) {
                continue;
            }
            let sample = match channel.read(now) {
                Ok(sample) => sample,
                Err(e) => {
                    log::warn!("{}: read failed: {}", channel.id, e);
                    stats.read_failures += 1;
                    continue;
                }
            };
            stats.reads += 1;

            if !channel.should_record() {
                continue;
            }

            match channel.delivery() {
                DeliveryMode::Aggregate => match channel.record_into(scheduler.record_mut(), sample) {
                    Ok(()) => {
                        stats.records += 1;
                        recorded = true;
                    }
                    Err(e) => {
                        log::warn!("{}: could not record reading: {}", channel.id, e);
                        stats.record_failures += 1;
                    }
                },
                DeliveryMode::Backlog => {
                    if let Err(e) = store.append(&channel.id, sample) {
                        log::warn!("{}: could not buffer reading: {}", channel.id, e);
                        stats.record_failures += 1;
                        continue;
                    }
                    channel.mark_recorded(sample);
                    stats.records += 1;

                    let Some(delivery) = deliveries.get_mut(&channel.id) else {
                        continue;
                    };
                    let mut link = DeliveryLink {
                        channel: &channel.id,
                        encoder: &channel.config.encoder,
                        record_capacity: config.record_capacity,
                        store: &mut *store,
                        sink: &mut *sink,
                        stats: &mut *stats,
                        online: session.is_started(),
                    };
                    if delivery.on_sample(sample, &mut link) == Step::Retry {
                        queue.push_back(Event::Drain {
                            channel: channel.id.clone(),
                        });
                    }
                }
            }
        }

        scheduler.evaluate(now, recorded, channels, sink, stats);
    }

    fn on_push_complete(&mut self, context: PushContext, status: PushStatus) {
        match context {
            PushContext::Aggregate => match status {
                PushStatus::Success => log::debug!("Aggregate record delivered"),
                PushStatus::Failed => log::warn!("Aggregate record lost in transit"),
                PushStatus::Malformed => log::error!("Aggregate record rejected as malformed"),
            },
            PushContext::Channel { channel, timestamp } => {
                let step = match self.link(&channel) {
                    Some((delivery, mut link)) => delivery.on_complete(timestamp, status, &mut link),
                    None => {
                        log::warn!("Completion for unknown backlog channel {}", channel);
                        return;
                    }
                };
                self.request_retry(step, channel);
            }
        }
    }

    fn on_session(&mut self, state: SessionState) {
        if self.session != state {
            log::info!("Session {:?} -> {:?}", self.session, state);
        }
        self.session = state;
        if state.is_started() {
            self.enqueue_faulted_drains();
        }
    }

    fn on_external_sample(&mut self, channel: &str, sample: Sample) -> Result<()> {
        if !self.deliveries.contains_key(channel) {
            return Err(ConfigError::ChannelNotFound(channel.to_string()).into());
        }
        self.store
            .append(channel, sample)
            .map_err(RelayError::from)?;
        let step = match self.link(channel) {
            Some((delivery, mut link)) => delivery.on_sample(sample, &mut link),
            None => Step::Settled,
        };
        self.request_retry(step, channel.to_string());
        Ok(())
    }

    fn on_drain(&mut self, channel: &str) -> Result<()> {
        if !self.session.is_started() && self.deliveries.contains_key(channel) {
            log::debug!("{}: session down, drain postponed", channel);
            return Ok(());
        }
        match self.link(channel) {
            Some((delivery, mut link)) => {
                delivery.drain(&mut link);
                Ok(())
            }
            None => Err(ConfigError::ChannelNotFound(channel.to_string()).into()),
        }
    }

    fn link<'a>(
        &'a mut self,
        channel: &'a str,
    ) -> Option<(&'a mut DeliveryRecord, DeliveryLink<'a, S, K>)> {
        let delivery = self.deliveries.get_mut(channel)?;
        let encoder = &self.channels.get(channel).ok()?.config.encoder;
        Some((
            delivery,
            DeliveryLink {
                channel,
                encoder,
                record_capacity: self.config.record_capacity,
                store: &mut self.store,
                sink: &mut self.sink,
                stats: &mut self.stats,
                online: self.session.is_started(),
            },
        ))
    }

    /// Queue a drain for `channel`; while the session is down the channel
    /// stays faulted until [`Event::Session`] brings it back.
    fn request_retry(&mut self, step: Step, channel: ChannelId) {
        if step == Step::Retry && self.session.is_started() {
            self.queue.push_back(Event::Drain { channel });
        }
    }

    fn enqueue_faulted_drains(&mut self) {
        for (id, delivery) in &self.deliveries {
            if delivery.state() == DeliveryState::Fault {
                self.queue.push_back(Event::Drain { channel: id.clone() });
            }
        }
    }

    /// True once [`Pipeline::start`] has run
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Last known session state
    pub fn session(&self) -> SessionState {
        self.session
    }

    /// Pipeline configuration
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Registered channels
    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    /// Aggregate scheduler
    pub fn scheduler(&self) -> &PublishScheduler {
        &self.scheduler
    }

    /// Delivery record of a backlog channel
    pub fn delivery(&self, channel: &str) -> Option<&DeliveryRecord> {
        self.deliveries.get(channel)
    }

    /// Delivery state of a backlog channel
    pub fn delivery_state(&self, channel: &str) -> Option<DeliveryState> {
        self.deliveries.get(channel).map(DeliveryRecord::state)
    }

    /// Counters
    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Sample store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Sink
    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Mutable sink access
    pub fn sink_mut(&mut self) -> &mut K {
        &mut self.sink
    }

    /// Snapshot of the pipeline for status reporting
    pub fn status(&self) -> PipelineStatus {
        let channels = self
            .channels
            .iter()
            .map(|c| {
                let delivery = self.deliveries.get(&c.id);
                ChannelStatus {
                    id: c.id.clone(),
                    kind: c.kind(),
                    delivery: c.delivery(),
                    last_read: c.last_read().copied(),
                    last_recorded: c.last_recorded().copied(),
                    delivery_state: delivery.map(DeliveryRecord::state),
                    last_delivered: delivery.and_then(DeliveryRecord::last_delivered),
                    buffered: self.store.len(&c.id),
                }
            })
            .collect();

        PipelineStatus {
            session: self.session,
            last_published_at: self.scheduler.last_published_at(),
            deferred: self.scheduler.is_deferred(),
            pending_fields: self.scheduler.record().len(),
            evicted_samples: self.store.evicted(),
            channels,
            stats: self.stats.clone(),
        }
    }
}

impl<S: SampleStore, K: TelemetrySink> std::fmt::Debug for Pipeline<S, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("channels", &self.channels.count())
            .field("session", &self.session)
            .field("started", &self.started)
            .field("stats", &self.stats)
            .finish()
    }
}
