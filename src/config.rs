// Sensor Relay - Telemetry aggregation and delivery pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Configuration types for Sensor Relay

use std::time::Duration;

use crate::detector::{thresholds, ChangeDetector};
use crate::encoder::ChannelEncoder;
use crate::error::ConfigError;
use crate::record::Record;
use crate::value::ValueKind;

/// Pipeline-level configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Period of the sampling tick (default: 1s)
    pub tick_period: Duration,

    /// Minimum time between two aggregate publishes (default: 10s)
    pub min_publish_interval: Duration,

    /// A channel not recorded for this long forces a publish (default: 120s)
    pub max_publish_interval: Duration,

    /// A channel not recorded for this long is swept into the next publish (default: 60s)
    pub time_to_stale: Duration,

    /// Maximum number of channels
    pub max_channels: usize,

    /// Maximum number of fields in the aggregate record
    pub record_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_secs(1),
            min_publish_interval: Duration::from_secs(10),
            max_publish_interval: Duration::from_secs(120),
            time_to_stale: Duration::from_secs(60),
            max_channels: 16,
            record_capacity: Record::DEFAULT_CAPACITY,
        }
    }
}

impl PipelineConfig {
    /// Check the interval ordering `min < stale < max` and the other bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_period.is_zero() {
            return Err(ConfigError::InvalidInterval(
                "tick period must be non-zero".to_string(),
            ));
        }
        if self.min_publish_interval >= self.time_to_stale {
            return Err(ConfigError::InvalidInterval(format!(
                "min publish interval ({:?}) must be shorter than time to stale ({:?})",
                self.min_publish_interval, self.time_to_stale
            )));
        }
        if self.time_to_stale >= self.max_publish_interval {
            return Err(ConfigError::InvalidInterval(format!(
                "time to stale ({:?}) must be shorter than max publish interval ({:?})",
                self.time_to_stale, self.max_publish_interval
            )));
        }
        if self.max_channels == 0 {
            return Err(ConfigError::InvalidInterval(
                "max_channels must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Minimum publish interval in milliseconds
    pub fn min_publish_ms(&self) -> u64 {
        self.min_publish_interval.as_millis() as u64
    }

    /// Maximum publish interval in milliseconds
    pub fn max_publish_ms(&self) -> u64 {
        self.max_publish_interval.as_millis() as u64
    }

    /// Time to stale in milliseconds
    pub fn time_to_stale_ms(&self) -> u64 {
        self.time_to_stale.as_millis() as u64
    }
}

/// How recorded readings of a channel leave the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum DeliveryMode {
    /// Batched into the rate-limited aggregate publish
    #[default]
    Aggregate,
    /// Buffered in the sample store and pushed one by one, draining after faults
    Backlog,
}

/// Per-channel configuration
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Shape of the values this channel produces
    pub kind: ValueKind,

    /// Threshold predicate
    pub detector: ChangeDetector,

    /// Record encoding
    pub encoder: ChannelEncoder,

    /// Delivery path
    pub delivery: DeliveryMode,

    /// Minimum time between two reads; `None` reads on every tick
    pub period: Option<Duration>,
}

impl ChannelConfig {
    /// Create a configuration from its parts
    pub fn new(kind: ValueKind, detector: ChangeDetector, encoder: ChannelEncoder) -> Self {
        Self {
            kind,
            detector,
            encoder,
            delivery: DeliveryMode::Aggregate,
            period: None,
        }
    }

    /// Ambient light level, integer, 200 raw units
    pub fn light() -> Self {
        Self::new(
            ValueKind::Scalar,
            ChangeDetector::absolute(thresholds::LIGHT_LEVEL),
            ChannelEncoder::int("Sensors/Light/Level"),
        )
    }

    /// Barometric pressure, kPa, 1.0 kPa
    pub fn pressure() -> Self {
        Self::new(
            ValueKind::Scalar,
            ChangeDetector::absolute(thresholds::PRESSURE_KPA),
            ChannelEncoder::float("Sensors/Pressure/Pressure"),
        )
    }

    /// Temperature, °C, 2.0 °C
    pub fn temperature() -> Self {
        Self::new(
            ValueKind::Scalar,
            ChangeDetector::absolute(thresholds::TEMPERATURE_C),
            ChannelEncoder::float("Sensors/Pressure/Temperature"),
        )
    }

    /// Linear acceleration, m/s², half a G
    pub fn acceleration() -> Self {
        Self::new(
            ValueKind::Vector,
            ChangeDetector::magnitude(thresholds::ACCELERATION),
            ChannelEncoder::vector("Sensors/Accelerometer/Acceleration"),
        )
    }

    /// Angular velocity, rad/s, π/2
    pub fn angular_velocity() -> Self {
        Self::new(
            ValueKind::Vector,
            ChangeDetector::magnitude(thresholds::ANGULAR_VELOCITY),
            ChannelEncoder::vector("Sensors/Accelerometer/Gyro"),
        )
    }

    /// GNSS position, recorded on any change
    pub fn position() -> Self {
        Self::new(
            ValueKind::Structured,
            ChangeDetector::AnyChange,
            ChannelEncoder::position("Sensors/Gps"),
        )
    }

    /// Same configuration with a different threshold
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.detector = self.detector.with_threshold(threshold);
        self
    }

    /// Same configuration with a different delivery mode
    pub fn with_delivery(mut self, delivery: DeliveryMode) -> Self {
        self.delivery = delivery;
        self
    }

    /// Same configuration, read at most once per `period`
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = Some(period);
        self
    }

    /// Sampling period in milliseconds, `None` when reading every tick
    pub fn period_ms(&self) -> Option<u64> {
        self.period.map(|p| p.as_millis() as u64)
    }

    /// Same configuration with a different encoder
    pub fn with_encoder(mut self, encoder: ChannelEncoder) -> Self {
        self.encoder = encoder;
        self
    }

    /// Check that the detector and encoder both handle `kind`
    pub fn validate(&self, channel: &str) -> Result<(), ConfigError> {
        if self.period.is_some_and(|p| p.is_zero()) {
            return Err(ConfigError::InvalidInterval(format!(
                "{}: sampling period must be non-zero",
                channel
            )));
        }
        if !self.detector.supports(self.kind) {
            return Err(ConfigError::UnsupportedKind {
                channel: channel.to_string(),
                component: "detector",
                kind: self.kind,
            });
        }
        if !self.encoder.supports(self.kind) {
            return Err(ConfigError::UnsupportedKind {
                channel: channel.to_string(),
                component: "encoder",
                kind: self.kind,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_config_default() {
        let config = PipelineConfig::default();
        assert_eq!(config.tick_period, Duration::from_secs(1));
        assert_eq!(config.min_publish_ms(), 10_000);
        assert_eq!(config.time_to_stale_ms(), 60_000);
        assert_eq!(config.max_publish_ms(), 120_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pipeline_config_rejects_bad_ordering() {
        let config = PipelineConfig {
            time_to_stale: Duration::from_secs(5),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidInterval(_))
        ));

        let config = PipelineConfig {
            max_publish_interval: Duration::from_secs(60),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pipeline_config_rejects_zero_tick() {
        let config = PipelineConfig {
            tick_period: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_channel_presets_validate() {
        for (name, config) in [
            ("light", ChannelConfig::light()),
            ("pressure", ChannelConfig::pressure()),
            ("temperature", ChannelConfig::temperature()),
            ("accel", ChannelConfig::acceleration()),
            ("gyro", ChannelConfig::angular_velocity()),
            ("position", ChannelConfig::position()),
        ] {
            assert!(config.validate(name).is_ok(), "{} preset invalid", name);
        }
    }

    #[test]
    fn test_channel_config_with_threshold() {
        let config = ChannelConfig::pressure().with_threshold(0.5);
        assert_eq!(config.detector.threshold(), Some(0.5));
        assert_eq!(config.delivery, DeliveryMode::Aggregate);
    }

    #[test]
    fn test_channel_config_period() {
        let config = ChannelConfig::acceleration();
        assert_eq!(config.period_ms(), None);

        let config = config.with_period(Duration::from_millis(2500));
        assert_eq!(config.period_ms(), Some(2500));
        assert!(config.validate("accel").is_ok());

        let config = ChannelConfig::light().with_period(Duration::ZERO);
        assert!(matches!(
            config.validate("light"),
            Err(ConfigError::InvalidInterval(_))
        ));
    }

    #[test]
    fn test_channel_config_kind_mismatch() {
        let config = ChannelConfig::light().with_encoder(ChannelEncoder::vector("v"));
        assert!(matches!(
            config.validate("light"),
            Err(ConfigError::UnsupportedKind {
                component: "encoder",
                ..
            })
        ));
    }
}
