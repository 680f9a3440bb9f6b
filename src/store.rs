// Sensor Relay - Telemetry aggregation and delivery pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Buffered sample store
//!
//! Backlog channels keep every recorded sample here until the sink has
//! acknowledged it. Samples are appended in timestamp order and read back
//! oldest first with [`SampleStore::next_after`].

use std::collections::{HashMap, VecDeque};

use crate::error::StoreError;
use crate::value::{Sample, Timestamp};

/// Per-channel time-ordered sample buffer
pub trait SampleStore {
    /// Append a sample; timestamps must strictly increase per channel
    fn append(&mut self, channel: &str, sample: Sample) -> Result<(), StoreError>;

    /// Oldest sample newer than `after`, or the oldest sample when `after` is `None`
    fn next_after(
        &self,
        channel: &str,
        after: Option<Timestamp>,
    ) -> Result<Option<Sample>, StoreError>;

    /// Number of samples held for `channel`
    fn len(&self, channel: &str) -> usize;

    /// Release every sample of `channel` at or before `through`
    fn prune(&mut self, _channel: &str, _through: Timestamp) {}

    /// Samples dropped without being delivered, across all channels
    fn evicted(&self) -> u64 {
        0
    }
}

/// In-memory store keeping a bounded ring per channel
#[derive(Debug, Clone)]
pub struct MemoryStore {
    buffers: HashMap<String, VecDeque<Sample>>,
    capacity: usize,
    evicted: u64,
}

impl MemoryStore {
    /// Default number of samples kept per channel
    pub const DEFAULT_CAPACITY: usize = 100;

    /// Create a store with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    /// Create a store keeping at most `capacity` samples per channel
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffers: HashMap::new(),
            capacity: capacity.max(1),
            evicted: 0,
        }
    }

    /// Samples per channel
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleStore for MemoryStore {
    fn append(&mut self, channel: &str, sample: Sample) -> Result<(), StoreError> {
        let capacity = self.capacity;
        let buffer = self
            .buffers
            .entry(channel.to_string())
            .or_insert_with(|| VecDeque::with_capacity(capacity));

        if let Some(newest) = buffer.back() {
            if sample.timestamp <= newest.timestamp {
                return Err(StoreError::OutOfOrder {
                    channel: channel.to_string(),
                    timestamp: sample.timestamp,
                    newest: newest.timestamp,
                });
            }
        }

        if buffer.len() >= capacity {
            buffer.pop_front();
            self.evicted += 1;
            log::warn!("Sample buffer for {} full, dropped oldest sample", channel);
        }
        buffer.push_back(sample);
        Ok(())
    }

    fn next_after(
        &self,
        channel: &str,
        after: Option<Timestamp>,
    ) -> Result<Option<Sample>, StoreError> {
        let Some(buffer) = self.buffers.get(channel) else {
            return Ok(None);
        };
        Ok(match after {
            None => buffer.front().copied(),
            Some(ts) => buffer.iter().find(|s| s.timestamp > ts).copied(),
        })
    }

    fn len(&self, channel: &str) -> usize {
        self.buffers.get(channel).map_or(0, VecDeque::len)
    }

    fn prune(&mut self, channel: &str, through: Timestamp) {
        if let Some(buffer) = self.buffers.get_mut(channel) {
            while buffer.front().map_or(false, |s| s.timestamp <= through) {
                buffer.pop_front();
            }
        }
    }

    fn evicted(&self) -> u64 {
        self.evicted
    }
}

impl<T: SampleStore + ?Sized> SampleStore for Box<T> {
    fn append(&mut self, channel: &str, sample: Sample) -> Result<(), StoreError> {
        (**self).append(channel, sample)
    }

    fn next_after(
        &self,
        channel: &str,
        after: Option<Timestamp>,
    ) -> Result<Option<Sample>, StoreError> {
        (**self).next_after(channel, after)
    }

    fn len(&self, channel: &str) -> usize {
        (**self).len(channel)
    }

    fn prune(&mut self, channel: &str, through: Timestamp) {
        (**self).prune(channel, through)
    }

    fn evicted(&self) -> u64 {
        (**self).evicted()
    }
}
