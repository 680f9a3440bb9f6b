// Sensor Relay Agent - Configuration
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! YAML configuration for the agent.
//!
//! ```yaml
//! pipeline:
//!   tick_period: 1s
//!   min_publish_interval: 10s
//!   max_publish_interval: 2m
//!   time_to_stale: 1m
//! sink:
//!   endpoint: http://collector:8080/telemetry
//!   timeout: 5s
//! session:
//!   health_url: http://collector:8080/health
//!   check_interval: 5s
//! channels:
//!   - id: light
//!     preset: light
//!     source:
//!       type: sysfs_scalar
//!       path: /sys/bus/iio/devices/iio:device0/in_illuminance_input
//!   - id: accel
//!     preset: acceleration
//!     delivery: backlog
//!     period: 5s
//!     source:
//!       type: simulated
//! ```

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use sensor_relay::{ChannelConfig, ChannelEncoder, DeliveryMode, MemoryStore, PipelineConfig, Record};

/// Top-level configuration for the agent.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Pipeline intervals and limits.
    #[serde(default)]
    pub pipeline: PipelineSection,

    /// Remote telemetry sink.
    #[serde(default)]
    pub sink: SinkConfig,

    /// Remote session health checks.
    #[serde(default)]
    pub session: SessionConfig,

    /// Buffered sample store for backlog channels.
    #[serde(default)]
    pub store: StoreConfig,

    /// Status and metrics HTTP server.
    #[serde(default)]
    pub http: HttpConfig,

    /// Sensor channels, in registration order.
    #[serde(default)]
    pub channels: Vec<ChannelEntry>,
}

/// Pipeline intervals and limits.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    /// Sampling period. Default: 1s.
    #[serde(default = "default_tick_period", with = "humantime_serde")]
    pub tick_period: Duration,

    /// Minimum time between aggregate publishes. Default: 10s.
    #[serde(default = "default_min_publish_interval", with = "humantime_serde")]
    pub min_publish_interval: Duration,

    /// Silence after which a publish is forced. Default: 2m.
    #[serde(default = "default_max_publish_interval", with = "humantime_serde")]
    pub max_publish_interval: Duration,

    /// Silence after which a channel is swept into the next publish. Default: 1m.
    #[serde(default = "default_time_to_stale", with = "humantime_serde")]
    pub time_to_stale: Duration,

    /// Maximum fields in the aggregate record. Default: 64.
    #[serde(default = "default_record_capacity")]
    pub record_capacity: usize,

    /// Capacity of the dispatcher event queue. Default: 1024.
    #[serde(default = "default_event_queue")]
    pub event_queue: usize,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            tick_period: default_tick_period(),
            min_publish_interval: default_min_publish_interval(),
            max_publish_interval: default_max_publish_interval(),
            time_to_stale: default_time_to_stale(),
            record_capacity: default_record_capacity(),
            event_queue: default_event_queue(),
        }
    }
}

/// Remote telemetry sink configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    /// URL records are POSTed to.
    #[serde(default)]
    pub endpoint: String,

    /// Per-request timeout. Default: 10s.
    #[serde(default = "default_sink_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Concurrent requests. Default: 2.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Records waiting for a worker before pushes are refused. Default: 64.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// Extra HTTP headers sent with every request.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            timeout: default_sink_timeout(),
            workers: default_workers(),
            queue_size: default_queue_size(),
            headers: HashMap::new(),
        }
    }
}

/// Remote session health checks.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// URL answering 2xx while the remote end is reachable. When unset the
    /// session is considered always up.
    #[serde(default)]
    pub health_url: Option<String>,

    /// Time between health checks. Default: 5s.
    #[serde(default = "default_check_interval", with = "humantime_serde")]
    pub check_interval: Duration,

    /// Health check timeout. Default: 2s.
    #[serde(default = "default_check_timeout", with = "humantime_serde")]
    pub check_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            health_url: None,
            check_interval: default_check_interval(),
            check_timeout: default_check_timeout(),
        }
    }
}

/// Buffered sample store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Samples kept per backlog channel. Default: 100.
    #[serde(default = "default_store_capacity")]
    pub capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity: default_store_capacity(),
        }
    }
}

/// Status and metrics HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Serve /metrics, /health, /ready and /status. Default: true.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Listen address. Default: 0.0.0.0:9100.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_listen(),
        }
    }
}

/// Reference channel definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    Light,
    Pressure,
    Temperature,
    Acceleration,
    AngularVelocity,
    Position,
}

impl Preset {
    /// The library configuration for this preset.
    pub fn channel_config(&self) -> ChannelConfig {
        match self {
            Preset::Light => ChannelConfig::light(),
            Preset::Pressure => ChannelConfig::pressure(),
            Preset::Temperature => ChannelConfig::temperature(),
            Preset::Acceleration => ChannelConfig::acceleration(),
            Preset::AngularVelocity => ChannelConfig::angular_velocity(),
            Preset::Position => ChannelConfig::position(),
        }
    }
}

/// Where a channel's readings come from.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    /// One number in a file, multiplied by `scale`.
    SysfsScalar {
        path: PathBuf,
        #[serde(default = "default_scale")]
        scale: f64,
    },
    /// Three raw component files and a shared scale file.
    SysfsVector {
        scale_path: PathBuf,
        x: PathBuf,
        y: PathBuf,
        z: PathBuf,
    },
    /// Bounded random walk around the preset's typical value.
    Simulated {
        #[serde(default)]
        seed: Option<u64>,
    },
}

/// One sensor channel.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelEntry {
    /// Channel identifier.
    pub id: String,

    /// Reference definition to start from.
    pub preset: Preset,

    /// Reading source.
    pub source: SourceConfig,

    /// Delivery path. Default: aggregate.
    #[serde(default)]
    pub delivery: DeliveryMode,

    /// Threshold override.
    #[serde(default)]
    pub threshold: Option<f64>,

    /// Record path override (scalar presets) or base path (vector and position presets).
    #[serde(default)]
    pub path: Option<String>,

    /// Minimum time between reads. Default: every tick.
    #[serde(default, with = "humantime_serde")]
    pub period: Option<Duration>,
}

impl ChannelEntry {
    /// Library configuration with overrides applied.
    pub fn channel_config(&self) -> ChannelConfig {
        let mut config = self.preset.channel_config().with_delivery(self.delivery);
        if let Some(threshold) = self.threshold {
            config = config.with_threshold(threshold);
        }
        if let Some(period) = self.period {
            config = config.with_period(period);
        }
        if let Some(path) = &self.path {
            let encoder = match config.encoder {
                ChannelEncoder::Int { .. } => ChannelEncoder::int(path.clone()),
                ChannelEncoder::Float { .. } => ChannelEncoder::float(path.clone()),
                ChannelEncoder::Vector { .. } => ChannelEncoder::vector(path.clone()),
                ChannelEncoder::Position { .. } => ChannelEncoder::position(path.clone()),
                ref custom @ ChannelEncoder::Custom { .. } => custom.clone(),
            };
            config = config.with_encoder(encoder);
        }
        config
    }
}

fn default_tick_period() -> Duration {
    Duration::from_secs(1)
}

fn default_min_publish_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_max_publish_interval() -> Duration {
    Duration::from_secs(120)
}

fn default_time_to_stale() -> Duration {
    Duration::from_secs(60)
}

fn default_record_capacity() -> usize {
    Record::DEFAULT_CAPACITY
}

fn default_event_queue() -> usize {
    1024
}

fn default_sink_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_workers() -> usize {
    2
}

fn default_queue_size() -> usize {
    64
}

fn default_check_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_check_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_store_capacity() -> usize {
    MemoryStore::DEFAULT_CAPACITY
}

fn default_true() -> bool {
    true
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9100))
}

fn default_scale() -> f64 {
    1.0
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg = Self::parse(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        Ok(cfg)
    }

    /// Parse and validate configuration from YAML text.
    pub fn parse(data: &str) -> Result<Self> {
        let cfg: Config = serde_yaml::from_str(data)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.sink.endpoint.is_empty() {
            bail!("sink.endpoint is required");
        }

        if self.sink.workers == 0 {
            bail!("sink.workers must be positive");
        }

        if self.sink.queue_size == 0 {
            bail!("sink.queue_size must be positive");
        }

        if self.pipeline.event_queue == 0 {
            bail!("pipeline.event_queue must be positive");
        }

        if self.store.capacity == 0 {
            bail!("store.capacity must be positive");
        }

        if self.channels.is_empty() {
            bail!("at least one channel is required");
        }

        let mut seen = HashSet::new();
        for channel in &self.channels {
            if !seen.insert(channel.id.as_str()) {
                bail!("duplicate channel id {:?}", channel.id);
            }
            if let Some(threshold) = channel.threshold {
                if !threshold.is_finite() || threshold < 0.0 {
                    bail!("channels.{}.threshold must be a non-negative number", channel.id);
                }
            }
            if channel.period.is_some_and(|p| p.is_zero()) {
                bail!("channels.{}.period must be positive", channel.id);
            }
        }

        self.pipeline_config()
            .validate()
            .context("invalid pipeline intervals")?;

        Ok(())
    }

    /// Library pipeline configuration.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            tick_period: self.pipeline.tick_period,
            min_publish_interval: self.pipeline.min_publish_interval,
            max_publish_interval: self.pipeline.max_publish_interval,
            time_to_stale: self.pipeline.time_to_stale,
            max_channels: self.channels.len().max(1),
            record_capacity: self.pipeline.record_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
sink:
  endpoint: http://localhost:8080/telemetry
channels:
  - id: light
    preset: light
    source:
      type: simulated
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let cfg = Config::parse(MINIMAL).unwrap();
        assert_eq!(cfg.pipeline.tick_period, Duration::from_secs(1));
        assert_eq!(cfg.pipeline.max_publish_interval, Duration::from_secs(120));
        assert_eq!(cfg.sink.workers, 2);
        assert_eq!(cfg.store.capacity, 100);
        assert!(cfg.session.health_url.is_none());
        assert!(cfg.http.enabled);
        assert_eq!(cfg.channels[0].delivery, DeliveryMode::Aggregate);
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
pipeline:
  tick_period: 500ms
  min_publish_interval: 5s
  max_publish_interval: 3m
  time_to_stale: 90s
sink:
  endpoint: https://collector.example/telemetry
  timeout: 3s
  headers:
    Authorization: Bearer abc
session:
  health_url: https://collector.example/health
  check_interval: 10s
http:
  listen: 127.0.0.1:9200
channels:
  - id: accel
    preset: acceleration
    delivery: backlog
    threshold: 2.5
    path: Imu/Accel
    period: 2s
    source:
      type: sysfs_vector
      scale_path: /sys/iio/in_accel_scale
      x: /sys/iio/in_accel_x_raw
      y: /sys/iio/in_accel_y_raw
      z: /sys/iio/in_accel_z_raw
  - id: temp
    preset: temperature
    source:
      type: sysfs_scalar
      path: /sys/iio/in_temp_input
      scale: 0.001
"#;
        let cfg = Config::parse(yaml).unwrap();
        assert_eq!(cfg.pipeline.tick_period, Duration::from_millis(500));
        assert_eq!(cfg.pipeline.time_to_stale, Duration::from_secs(90));
        assert_eq!(cfg.sink.headers["Authorization"], "Bearer abc");
        assert_eq!(cfg.http.listen.port(), 9200);

        let accel = cfg.channels[0].channel_config();
        assert_eq!(accel.delivery, DeliveryMode::Backlog);
        assert_eq!(accel.detector.threshold(), Some(2.5));
        assert_eq!(accel.period, Some(Duration::from_secs(2)));
        assert_eq!(cfg.channels[1].channel_config().period, None);
        assert!(matches!(accel.encoder, ChannelEncoder::Vector { ref base } if base == "Imu/Accel"));

        assert_eq!(
            cfg.channels[1].source,
            SourceConfig::SysfsScalar {
                path: PathBuf::from("/sys/iio/in_temp_input"),
                scale: 0.001
            }
        );
    }

    #[test]
    fn test_missing_endpoint_rejected() {
        let yaml = r#"
channels:
  - id: light
    preset: light
    source:
      type: simulated
"#;
        let err = Config::parse(yaml).unwrap_err();
        assert!(err.to_string().contains("sink.endpoint"));
    }

    #[test]
    fn test_duplicate_channel_rejected() {
        let yaml = format!(
            "{}  - id: light\n    preset: pressure\n    source:\n      type: simulated\n",
            MINIMAL
        );
        let err = Config::parse(&yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate channel"));
    }

    #[test]
    fn test_zero_period_rejected() {
        let yaml = format!("{}    period: 0s\n", MINIMAL);
        let err = Config::parse(&yaml).unwrap_err();
        assert!(err.to_string().contains("period"));
    }

    #[test]
    fn test_bad_interval_ordering_rejected() {
        let yaml = format!("{}pipeline:\n  time_to_stale: 5s\n", MINIMAL);
        assert!(Config::parse(&yaml).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let cfg = Config::load(file.path()).unwrap();
        assert_eq!(cfg.channels.len(), 1);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Path::new("/nonexistent/agent.yaml")).unwrap_err();
        assert!(err.to_string().contains("reading config file"));
    }
}
