// Sensor Relay - Telemetry aggregation and delivery pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Remote telemetry sink interface
//!
//! Submission is synchronous and never blocks on the network: the sink either
//! takes the record or refuses it. The outcome of an accepted submission
//! arrives later as a completion event carrying the same [`PushContext`].

use crate::channel::ChannelId;
use crate::error::PushError;
use crate::record::Record;
use crate::value::Timestamp;

/// Synchronous answer to a push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// The sink took the record; a completion will follow
    Accepted,
    /// The sink did not take the record; nothing will follow
    Busy,
}

/// Outcome of an accepted push
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PushStatus {
    /// Acknowledged by the remote end
    Success,
    /// Lost in transit or the session dropped
    Failed,
    /// Rejected by the remote end as invalid; retrying will not help
    Malformed,
}

/// Which push a completion refers to
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PushContext {
    /// The rate-limited aggregate record
    Aggregate,
    /// One buffered sample of a backlog channel
    Channel {
        channel: ChannelId,
        timestamp: Timestamp,
    },
}

/// Connection state of the remote session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SessionState {
    Started,
    Stopped,
}

impl SessionState {
    /// True when the session is up
    pub fn is_started(&self) -> bool {
        matches!(self, SessionState::Started)
    }
}

/// Destination of recorded telemetry
pub trait TelemetrySink {
    /// Submit a record without waiting for delivery
    fn push(&mut self, record: Record, context: PushContext) -> Result<Submission, PushError>;

    /// Current session state, queried once at start-up
    fn session_state(&self) -> SessionState;
}

impl<T: TelemetrySink + ?Sized> TelemetrySink for Box<T> {
    fn push(&mut self, record: Record, context: PushContext) -> Result<Submission, PushError> {
        (**self).push(record, context)
    }

    fn session_state(&self) -> SessionState {
        (**self).session_state()
    }
}
