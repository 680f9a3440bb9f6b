// Sensor Relay - Telemetry aggregation and delivery pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Error types for Sensor Relay
//!
//! Every failure class of the pipeline has its own enum. Per-sample failures
//! ([`ReadError`], [`RecordError`], [`PushError`], [`StoreError`]) are
//! contained within the channel that produced them; only [`ConfigError`]
//! is meant to abort start-up.

use thiserror::Error;

use crate::value::ValueKind;

/// Result type alias for Sensor Relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Main error type for Sensor Relay operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RelayError {
    /// Reading a sensor failed
    #[error("Read error: {0}")]
    Read(#[from] ReadError),

    /// Writing a value into a record failed
    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    /// Submitting a record to the sink failed
    #[error("Push error: {0}")]
    Push(#[from] PushError),

    /// Buffered sample store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Transient failure to obtain a reading
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReadError {
    /// The sensor could not be reached (missing file, bus error, ...)
    #[error("Sensor unavailable: {0}")]
    Unavailable(String),

    /// The sensor answered with something that is not a number
    #[error("Unparseable reading: {0}")]
    Format(String),

    /// The sensor produced a value of the wrong shape for its channel
    #[error("Reading has kind {actual:?}, channel expects {expected:?}")]
    KindMismatch {
        expected: ValueKind,
        actual: ValueKind,
    },
}

/// Failure while encoding a value into a record
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    /// The record has no room for the new fields
    #[error("Record full: {needed} new fields, {available} free (capacity {capacity})")]
    Overflow {
        needed: usize,
        available: usize,
        capacity: usize,
    },

    /// The value cannot be represented in the record
    #[error("Cannot encode value: {0}")]
    Encode(String),
}

/// Failure to submit a record to the telemetry sink
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PushError {
    /// The sink or the link to it is down
    #[error("Transport failure: {0}")]
    Transport(String),

    /// The sink rejected the payload as invalid
    #[error("Malformed payload: {0}")]
    Malformed(String),
}

/// Failure of the buffered sample store
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Samples must be appended in strictly increasing timestamp order
    #[error("Out-of-order sample for {channel}: {timestamp} <= {newest}")]
    OutOfOrder {
        channel: String,
        timestamp: u64,
        newest: u64,
    },

    /// Backend-specific failure
    #[error("Store backend failure: {0}")]
    Backend(String),
}

/// Configuration problems detected at start-up
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Interval constants violate their required ordering
    #[error("Invalid intervals: {0}")]
    InvalidInterval(String),

    /// Channel not found
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    /// Channel already exists
    #[error("Channel already exists: {0}")]
    ChannelAlreadyExists(String),

    /// Maximum channels reached
    #[error("Maximum channels ({max}) reached")]
    MaxChannelsReached { max: usize },

    /// Detector or encoder cannot handle the channel's value kind
    #[error("Channel {channel}: {component} does not support {kind:?} values")]
    UnsupportedKind {
        channel: String,
        component: &'static str,
        kind: ValueKind,
    },

    /// Channels can only be registered before the pipeline starts
    #[error("Pipeline already started")]
    AlreadyStarted,

    /// Events can only be handled after the pipeline starts
    #[error("Pipeline not started")]
    NotStarted,

    /// A required external capability is missing
    #[error("Required service unavailable: {0}")]
    ServiceUnavailable(String),
}
