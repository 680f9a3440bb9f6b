// Sensor Relay Agent - Reading sources
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Sensor readers behind the channels.
//!
//! Industrial I/O drivers expose each reading as a text file holding one
//! number. Scalar sensors publish a processed value; vector sensors publish
//! raw per-axis counts and a shared scale factor.

use std::fs;
use std::path::{Path, PathBuf};

use rand::prelude::*;
use rand::rngs::StdRng;

use sensor_relay::{thresholds, Position, ReadError, SensorRead, Value, Vector3};

use crate::config::{Preset, SourceConfig};

/// Read a file holding a single decimal number.
pub fn read_number(path: &Path) -> Result<f64, ReadError> {
    let text = fs::read_to_string(path)
        .map_err(|e| ReadError::Unavailable(format!("{}: {}", path.display(), e)))?;
    text.trim()
        .parse::<f64>()
        .map_err(|e| ReadError::Format(format!("{}: {}", path.display(), e)))
}

/// One number, multiplied by a fixed scale.
#[derive(Debug, Clone)]
pub struct SysfsScalar {
    path: PathBuf,
    scale: f64,
}

impl SysfsScalar {
    pub fn new(path: impl Into<PathBuf>, scale: f64) -> Self {
        Self {
            path: path.into(),
            scale,
        }
    }
}

impl SensorRead for SysfsScalar {
    fn read(&mut self) -> Result<Value, ReadError> {
        Ok(Value::Scalar(read_number(&self.path)? * self.scale))
    }
}

/// Three raw axis counts scaled by a shared factor.
#[derive(Debug, Clone)]
pub struct SysfsVector {
    scale_path: PathBuf,
    axes: [PathBuf; 3],
}

impl SysfsVector {
    pub fn new(scale_path: impl Into<PathBuf>, x: PathBuf, y: PathBuf, z: PathBuf) -> Self {
        Self {
            scale_path: scale_path.into(),
            axes: [x, y, z],
        }
    }
}

impl SensorRead for SysfsVector {
    fn read(&mut self) -> Result<Value, ReadError> {
        let scale = read_number(&self.scale_path)?;
        let x = read_number(&self.axes[0])?;
        let y = read_number(&self.axes[1])?;
        let z = read_number(&self.axes[2])?;
        Ok(Value::Vector(Vector3::new(x * scale, y * scale, z * scale)))
    }
}

/// Bounded random walk around a typical reading for a preset.
pub struct Simulated {
    preset: Preset,
    rng: StdRng,
    current: Value,
}

impl Simulated {
    pub fn new(preset: Preset, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self {
            preset,
            rng,
            current: Self::baseline(preset),
        }
    }

    fn baseline(preset: Preset) -> Value {
        match preset {
            Preset::Light => Value::Scalar(800.0),
            Preset::Pressure => Value::Scalar(101.3),
            Preset::Temperature => Value::Scalar(21.0),
            Preset::Acceleration => {
                Value::Vector(Vector3::new(0.0, 0.0, thresholds::STANDARD_GRAVITY))
            }
            Preset::AngularVelocity => Value::Vector(Vector3::default()),
            Preset::Position => Value::Position(Position {
                latitude: 49.1727,
                longitude: -123.0711,
                altitude: 12.0,
                horizontal_accuracy: 5.0,
                vertical_accuracy: 8.0,
            }),
        }
    }

    fn step(&mut self, spread: f64) -> f64 {
        self.rng.gen_range(-spread..=spread)
    }

    fn walk_vector(&mut self, v: Vector3, spread: f64, center: Vector3, bound: f64) -> Vector3 {
        let clamp = |value: f64, c: f64| value.clamp(c - bound, c + bound);
        Vector3::new(
            clamp(v.x + self.step(spread), center.x),
            clamp(v.y + self.step(spread), center.y),
            clamp(v.z + self.step(spread), center.z),
        )
    }
}

impl SensorRead for Simulated {
    fn read(&mut self) -> Result<Value, ReadError> {
        let next = match (self.preset, self.current) {
            (Preset::Light, Value::Scalar(v)) => {
                Value::Scalar((v + self.step(120.0)).clamp(0.0, 5000.0))
            }
            (Preset::Pressure, Value::Scalar(v)) => {
                Value::Scalar((v + self.step(0.4)).clamp(95.0, 105.0))
            }
            (Preset::Temperature, Value::Scalar(v)) => {
                Value::Scalar((v + self.step(0.5)).clamp(-10.0, 50.0))
            }
            (Preset::Acceleration, Value::Vector(v)) => Value::Vector(self.walk_vector(
                v,
                1.5,
                Vector3::new(0.0, 0.0, thresholds::STANDARD_GRAVITY),
                8.0,
            )),
            (Preset::AngularVelocity, Value::Vector(v)) => {
                Value::Vector(self.walk_vector(v, 0.4, Vector3::default(), 3.0))
            }
            (Preset::Position, Value::Position(p)) => Value::Position(Position {
                latitude: p.latitude + self.step(0.00005),
                longitude: p.longitude + self.step(0.00005),
                altitude: (p.altitude + self.step(0.5)).max(0.0),
                horizontal_accuracy: (p.horizontal_accuracy + self.step(0.5)).clamp(1.0, 20.0),
                vertical_accuracy: (p.vertical_accuracy + self.step(0.5)).clamp(1.0, 30.0),
            }),
            (preset, _) => Self::baseline(preset),
        };
        self.current = next;
        Ok(next)
    }
}

/// Build the reader for a configured source.
pub fn build(preset: Preset, source: &SourceConfig) -> Box<dyn SensorRead> {
    match source {
        SourceConfig::SysfsScalar { path, scale } => Box::new(SysfsScalar::new(path.clone(), *scale)),
        SourceConfig::SysfsVector { scale_path, x, y, z } => Box::new(SysfsVector::new(
            scale_path.clone(),
            x.clone(),
            y.clone(),
            z.clone(),
        )),
        SourceConfig::Simulated { seed } => Box::new(Simulated::new(preset, *seed)),
    }
}
