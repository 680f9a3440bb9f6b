// Sensor Relay - Telemetry aggregation and delivery pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Channels and the channel registry
//!
//! A [`Channel`] bundles a sensor reader with its threshold policy, its
//! encoder, and two independent snapshots: the last successful read and the
//! last recorded sample. The [`ChannelRegistry`] owns every channel of a
//! pipeline in registration order.

use crate::config::{ChannelConfig, DeliveryMode};
use crate::error::{ConfigError, ReadError, RecordError};
use crate::record::Record;
use crate::value::{Sample, Timestamp, Value, ValueKind};

/// Unique identifier for a channel
pub type ChannelId = String;

/// Source of readings for one channel
pub trait SensorRead: Send {
    /// Take one reading
    fn read(&mut self) -> Result<Value, ReadError>;
}

impl<F> SensorRead for F
where
    F: FnMut() -> Result<Value, ReadError> + Send,
{
    fn read(&mut self) -> Result<Value, ReadError> {
        self()
    }
}

/// Box a closure as a sensor reader
pub fn read_fn<F>(f: F) -> Box<dyn SensorRead>
where
    F: FnMut() -> Result<Value, ReadError> + Send + 'static,
{
    Box::new(f)
}

/// A single sensor channel
pub struct Channel {
    /// Channel identifier
    pub id: ChannelId,
    /// Channel configuration
    pub config: ChannelConfig,
    reader: Box<dyn SensorRead>,
    last_polled: Option<Timestamp>,
    last_read: Option<Sample>,
    last_recorded: Option<Sample>,
}

impl Channel {
    /// Create a new channel, rejecting detector/encoder/kind mismatches
    pub fn new(
        id: impl Into<String>,
        reader: Box<dyn SensorRead>,
        config: ChannelConfig,
    ) -> Result<Self, ConfigError> {
        let id = id.into();
        config.validate(&id)?;
        Ok(Self {
            id,
            config,
            reader,
            last_polled: None,
            last_read: None,
            last_recorded: None,
        })
    }

    /// Read the sensor and store the result as the last read sample.
    ///
    /// On failure the previous last-read sample is kept.
    pub fn read(&mut self, now: Timestamp) -> Result<Sample, ReadError> {
        self.last_polled = Some(now);
        let value = self.reader.read()?;
        if value.kind() != self.config.kind {
            return Err(ReadError::KindMismatch {
                expected: self.config.kind,
                actual: value.kind(),
            });
        }
        let sample = Sample {
            timestamp: now,
            value,
        };
        self.last_read = Some(sample);
        Ok(sample)
    }

    /// True when the sampling period has elapsed since the last read attempt.
    ///
    /// Channels without a period are due on every tick.
    pub fn is_due(&self, now: Timestamp) -> bool {
        match (self.config.period_ms(), self.last_polled) {
            (Some(period), Some(polled)) => now.saturating_sub(polled) >= period,
            _ => true,
        }
    }

    /// Check whether the last read sample should be recorded.
    ///
    /// A channel that was never recorded accepts its first reading
    /// regardless of threshold.
    pub fn should_record(&self) -> bool {
        match (&self.last_recorded, &self.last_read) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(recorded), Some(read)) => self
                .config
                .detector
                .exceeds_threshold(&recorded.value, &read.value),
        }
    }

    /// Encode `sample` into `record` and, on success, remember it as the
    /// last recorded sample.
    pub fn record_into(&mut self, record: &mut Record, sample: Sample) -> Result<(), RecordError> {
        self.config
            .encoder
            .encode(record, sample.timestamp, &sample.value)?;
        self.last_recorded = Some(sample);
        Ok(())
    }

    /// Remember `sample` as recorded without encoding it anywhere
    pub fn mark_recorded(&mut self, sample: Sample) {
        self.last_recorded = Some(sample);
    }

    /// Time since the last recorded sample, `None` if never recorded
    pub fn age_since_recorded(&self, now: Timestamp) -> Option<u64> {
        self.last_recorded
            .map(|s| now.saturating_sub(s.timestamp))
    }

    /// True when never recorded or last recorded more than `limit_ms` ago
    pub fn is_older_than(&self, now: Timestamp, limit_ms: u64) -> bool {
        self.age_since_recorded(now)
            .map_or(true, |age| age > limit_ms)
    }

    /// True when the last read is newer than `timestamp`
    pub fn read_newer_than(&self, timestamp: Timestamp) -> bool {
        self.last_read
            .map_or(false, |s| s.timestamp > timestamp)
    }

    /// True when the last read has not been recorded yet
    pub fn has_unrecorded_read(&self) -> bool {
        match (self.last_read, self.last_recorded) {
            (Some(read), Some(recorded)) => read.timestamp > recorded.timestamp,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// Last successfully read sample
    pub fn last_read(&self) -> Option<&Sample> {
        self.last_read.as_ref()
    }

    /// Last recorded sample
    pub fn last_recorded(&self) -> Option<&Sample> {
        self.last_recorded.as_ref()
    }

    /// Value kind of this channel
    pub fn kind(&self) -> ValueKind {
        self.config.kind
    }

    /// Delivery mode of this channel
    pub fn delivery(&self) -> DeliveryMode {
        self.config.delivery
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("last_read", &self.last_read)
            .field("last_recorded", &self.last_recorded)
            .finish()
    }
}

/// Owns the channels of one pipeline
#[derive(Debug)]
pub struct ChannelRegistry {
    /// Channels in registration order
    channels: Vec<Channel>,
    /// Maximum number of channels allowed
    max_channels: usize,
}

impl ChannelRegistry {
    /// Create an empty registry with the specified maximum channels
    pub fn new(max_channels: usize) -> Self {
        Self {
            channels: Vec::new(),
            max_channels,
        }
    }

    /// Add a new channel
    pub fn add(
        &mut self,
        id: impl Into<String>,
        reader: Box<dyn SensorRead>,
        config: ChannelConfig,
    ) -> Result<(), ConfigError> {
        let id = id.into();

        if self.contains(&id) {
            return Err(ConfigError::ChannelAlreadyExists(id));
        }

        if self.channels.len() >= self.max_channels {
            return Err(ConfigError::MaxChannelsReached {
                max: self.max_channels,
            });
        }

        self.channels.push(Channel::new(id, reader, config)?);
        Ok(())
    }

    /// Get a reference to a channel
    pub fn get(&self, id: &str) -> Result<&Channel, ConfigError> {
        self.channels
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| ConfigError::ChannelNotFound(id.to_string()))
    }

    /// Get a mutable reference to a channel
    pub fn get_mut(&mut self, id: &str) -> Result<&mut Channel, ConfigError> {
        self.channels
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| ConfigError::ChannelNotFound(id.to_string()))
    }

    /// Check if a channel exists
    pub fn contains(&self, id: &str) -> bool {
        self.channels.iter().any(|c| c.id == id)
    }

    /// Get an iterator over channel IDs
    pub fn list(&self) -> impl Iterator<Item = &ChannelId> {
        self.channels.iter().map(|c| &c.id)
    }

    /// Get an iterator over channels
    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    /// Get a mutable iterator over channels
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Channel> {
        self.channels.iter_mut()
    }

    /// Get the number of channels
    pub fn count(&self) -> usize {
        self.channels.len()
    }

    /// Check if there are no channels
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new(16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use crate::value::Vector3;
    use std::time::Duration;

    fn constant(value: f64) -> Box<dyn SensorRead> {
        read_fn(move || Ok(Value::Scalar(value)))
    }

    fn sequence(values: Vec<f64>) -> Box<dyn SensorRead> {
        let mut iter = values.into_iter();
        Box::new(move || {
            iter.next()
                .map(Value::Scalar)
                .ok_or_else(|| ReadError::Unavailable("exhausted".to_string()))
        })
    }

    #[test]
    fn test_first_reading_always_recorded() {
        let mut channel = Channel::new("light", constant(5.0), ChannelConfig::light()).unwrap();
        assert!(!channel.should_record());
        channel.read(1000).unwrap();
        assert!(channel.should_record());
    }

    #[test]
    fn test_light_example() {
        let mut channel = Channel::new(
            "light",
            sequence(vec![1000.0, 1150.0, 1250.0]),
            ChannelConfig::light(),
        )
        .unwrap();
        let mut record = Record::new();

        let first = channel.read(1000).unwrap();
        assert!(channel.should_record());
        channel.record_into(&mut record, first).unwrap();

        channel.read(2000).unwrap();
        assert!(!channel.should_record());

        channel.read(3000).unwrap();
        assert!(channel.should_record());
    }

    #[test]
    fn test_read_failure_keeps_previous_read() {
        let mut channel =
            Channel::new("p", sequence(vec![101.0]), ChannelConfig::pressure()).unwrap();
        channel.read(1000).unwrap();
        assert!(channel.read(2000).is_err());
        assert_eq!(channel.last_read().unwrap().timestamp, 1000);
    }

    #[test]
    fn test_kind_mismatch_is_read_failure() {
        let reader = read_fn(|| Ok(Value::Vector(Vector3::default())));
        let mut channel = Channel::new("p", reader, ChannelConfig::pressure()).unwrap();
        assert!(matches!(
            channel.read(1000),
            Err(ReadError::KindMismatch { .. })
        ));
        assert!(channel.last_read().is_none());
    }

    #[test]
    fn test_record_failure_keeps_last_recorded() {
        let mut channel = Channel::new(
            "accel",
            read_fn(|| Ok(Value::Vector(Vector3::default()))),
            ChannelConfig::acceleration(),
        )
        .unwrap();
        let mut record = Record::with_capacity(2);
        let sample = channel.read(1000).unwrap();
        assert!(matches!(
            channel.record_into(&mut record, sample),
            Err(RecordError::Overflow { .. })
        ));
        assert!(channel.last_recorded().is_none());
    }

    #[test]
    fn test_recorded_is_a_copy() {
        let mut channel = Channel::new(
            "p",
            sequence(vec![101.0, 105.0]),
            ChannelConfig::pressure(),
        )
        .unwrap();
        let mut record = Record::new();
        let first = channel.read(1000).unwrap();
        channel.record_into(&mut record, first).unwrap();
        channel.read(2000).unwrap();
        assert_eq!(channel.last_recorded().unwrap().value, Value::Scalar(101.0));
        assert_eq!(channel.last_read().unwrap().value, Value::Scalar(105.0));
    }

    #[test]
    fn test_age_and_staleness() {
        let mut channel = Channel::new("p", constant(101.0), ChannelConfig::pressure()).unwrap();
        assert!(channel.is_older_than(0, 60_000));
        let sample = channel.read(1000).unwrap();
        channel.mark_recorded(sample);
        assert_eq!(channel.age_since_recorded(61_000), Some(60_000));
        assert!(!channel.is_older_than(61_000, 60_000));
        assert!(channel.is_older_than(61_001, 60_000));
    }

    #[test]
    fn test_unrecorded_read() {
        let mut channel = Channel::new("p", constant(101.0), ChannelConfig::pressure()).unwrap();
        assert!(!channel.has_unrecorded_read());
        let sample = channel.read(1000).unwrap();
        assert!(channel.has_unrecorded_read());
        channel.mark_recorded(sample);
        assert!(!channel.has_unrecorded_read());
        channel.read(2000).unwrap();
        assert!(channel.has_unrecorded_read());
        assert!(channel.read_newer_than(1000));
        assert!(!channel.read_newer_than(2000));
    }

    #[test]
    fn test_period_skips_ticks_inside_it() {
        let config = ChannelConfig::acceleration().with_period(Duration::from_millis(3000));
        let mut channel = Channel::new(
            "accel",
            read_fn(|| Ok(Value::Vector(Vector3::default()))),
            config,
        )
        .unwrap();
        assert!(channel.is_due(1000));
        channel.read(1000).unwrap();
        assert!(!channel.is_due(2000));
        assert!(!channel.is_due(3999));
        assert!(channel.is_due(4000));
    }

    #[test]
    fn test_failed_read_restarts_period() {
        let config = ChannelConfig::pressure().with_period(Duration::from_millis(5000));
        let mut channel = Channel::new("p", sequence(vec![]), config).unwrap();
        assert!(channel.read(1000).is_err());
        assert!(!channel.is_due(2000));
        assert!(channel.is_due(6000));

        let mut unthrottled =
            Channel::new("q", constant(101.0), ChannelConfig::pressure()).unwrap();
        unthrottled.read(1000).unwrap();
        assert!(unthrottled.is_due(1000));
    }

    #[test]
    fn test_registry_add() {
        let mut registry = ChannelRegistry::new(10);
        registry
            .add("light", constant(0.0), ChannelConfig::light())
            .unwrap();
        assert_eq!(registry.count(), 1);
        assert!(registry.contains("light"));
    }

    #[test]
    fn test_registry_duplicate() {
        let mut registry = ChannelRegistry::new(10);
        registry
            .add("light", constant(0.0), ChannelConfig::light())
            .unwrap();
        let result = registry.add("light", constant(0.0), ChannelConfig::light());
        assert!(matches!(result, Err(ConfigError::ChannelAlreadyExists(_))));
    }

    #[test]
    fn test_registry_max_channels() {
        let mut registry = ChannelRegistry::new(1);
        registry
            .add("a", constant(0.0), ChannelConfig::light())
            .unwrap();
        let result = registry.add("b", constant(0.0), ChannelConfig::light());
        assert!(matches!(result, Err(ConfigError::MaxChannelsReached { max: 1 })));
    }

    #[test]
    fn test_registry_keeps_order() {
        let mut registry = ChannelRegistry::new(10);
        for id in ["light", "pressure", "temperature"] {
            registry
                .add(id, constant(0.0), ChannelConfig::pressure())
                .unwrap();
        }
        let ids: Vec<_> = registry.list().cloned().collect();
        assert_eq!(ids, vec!["light", "pressure", "temperature"]);
    }

    #[test]
    fn test_registry_not_found() {
        let registry = ChannelRegistry::new(10);
        assert!(matches!(
            registry.get("nonexistent"),
            Err(ConfigError::ChannelNotFound(_))
        ));
    }
}
