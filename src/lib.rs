// Sensor Relay - Telemetry aggregation and delivery pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # Sensor Relay - Telemetry aggregation and delivery pipeline
//!
//! Periodically samples a set of sensor channels, keeps only the readings
//! that changed enough to matter, and delivers them to a remote telemetry
//! sink under rate limits, staleness guarantees and loss-free backlog
//! draining.
//!
//! ## Features
//!
//! - **Change detection**: per-channel thresholds on scalar and vector readings
//! - **Rate-limited publishing**: minimum/maximum intervals and a staleness sweep
//! - **Backlog delivery**: one push in flight per channel, in-order draining after faults
//! - **Session awareness**: ticks suspend while the remote session is down
//!
//! ## Quick Start
//!
//! ```rust
//! use sensor_relay::{
//!     read_fn, ChannelConfig, Event, MemoryStore, Pipeline, PipelineConfig, PushContext,
//!     PushError, Record, SessionState, Submission, TelemetrySink, Value,
//! };
//!
//! #[derive(Default)]
//! struct Collect(Vec<Record>);
//!
//! impl TelemetrySink for Collect {
//!     fn push(&mut self, record: Record, _: PushContext) -> Result<Submission, PushError> {
//!         self.0.push(record);
//!         Ok(Submission::Accepted)
//!     }
//!     fn session_state(&self) -> SessionState {
//!         SessionState::Started
//!     }
//! }
//!
//! let mut pipeline =
//!     Pipeline::new(PipelineConfig::default(), MemoryStore::new(), Collect::default()).unwrap();
//! pipeline
//!     .add_channel("pressure", read_fn(|| Ok(Value::Scalar(101.3))), ChannelConfig::pressure())
//!     .unwrap();
//! pipeline.start().unwrap();
//!
//! // The first reading of a channel is always recorded and published
//! pipeline.handle(Event::Tick { now: 1_000 }).unwrap();
//! assert_eq!(pipeline.sink().0.len(), 1);
//!
//! // Unchanged readings are not
//! pipeline.handle(Event::Tick { now: 2_000 }).unwrap();
//! assert_eq!(pipeline.sink().0.len(), 1);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Pipeline                                                    │
//! │  ┌──────────┐ ┌──────────┐ ┌──────────┐                      │
//! │  │ Channel  │ │ Channel  │ │ Channel  │  ...                 │
//! │  │ light    │ │ pressure │ │ accel    │                      │
//! │  │[Detector]│ │[Detector]│ │[Detector]│                      │
//! │  └────┬─────┘ └────┬─────┘ └────┬─────┘                      │
//! │       │ aggregate  │            │ backlog                    │
//! │       └─────┬──────┘            ▼                            │
//! │             ▼             ┌───────────┐   ┌──────────────┐   │
//! │      ┌────────────┐       │SampleStore│──▶│DeliveryRecord│   │
//! │      │ Scheduler  │       └───────────┘   └──────┬───────┘   │
//! │      └─────┬──────┘                              │           │
//! │            └──────────────┬──────────────────────┘           │
//! │                           ▼                                  │
//! │                    TelemetrySink  ◀── completions (Event)    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`value`]: Sensor values and samples
//! - [`detector`]: Change detection policy
//! - [`record`]: Path-keyed telemetry records
//! - [`encoder`]: Value to record encoding
//! - [`channel`]: Channels and the channel registry
//! - [`scheduler`]: Aggregate publish scheduling
//! - [`delivery`]: Per-channel delivery state machine
//! - [`store`]: Buffered sample store
//! - [`sink`]: Remote sink interface
//! - [`pipeline`]: Event-driven pipeline driver

// Modules
pub mod channel;
pub mod config;
pub mod delivery;
pub mod detector;
pub mod encoder;
pub mod error;
pub mod pipeline;
pub mod record;
pub mod scheduler;
pub mod sink;
pub mod stats;
pub mod store;
pub mod value;

// Re-exports for convenient access
pub use channel::{read_fn, Channel, ChannelId, ChannelRegistry, SensorRead};
pub use config::{ChannelConfig, DeliveryMode, PipelineConfig};
pub use delivery::{DeliveryRecord, DeliveryState};
pub use detector::{thresholds, ChangeDetector};
pub use encoder::ChannelEncoder;
pub use error::{
    ConfigError, PushError, ReadError, RecordError, RelayError, Result, StoreError,
};
pub use pipeline::{ChannelStatus, Event, Pipeline, PipelineStatus};
pub use record::{Field, FieldValue, Record};
pub use scheduler::{PublishDecision, PublishScheduler};
pub use sink::{PushContext, PushStatus, SessionState, Submission, TelemetrySink};
pub use stats::PipelineStats;
pub use store::{MemoryStore, SampleStore};
pub use value::{Position, Sample, Timestamp, Value, ValueKind, Vector3};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
