// Sensor Relay - Telemetry aggregation and delivery pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Change detection policy
//!
//! A [`ChangeDetector`] decides whether a candidate reading differs enough
//! from the last *recorded* value to be worth recording. Detectors are plain
//! data: the threshold travels with the detector, so swapping a threshold
//! never touches the comparison logic.
//!
//! The "never recorded" case is handled by the channel, not here: a channel
//! without a recorded value accepts its first reading unconditionally.

use crate::value::{Value, ValueKind};

/// Reference thresholds for the standard channels
pub mod thresholds {
    /// Light level, raw ADC units
    pub const LIGHT_LEVEL: f64 = 200.0;
    /// Barometric pressure, kPa
    pub const PRESSURE_KPA: f64 = 1.0;
    /// Temperature, degrees Celsius
    pub const TEMPERATURE_C: f64 = 2.0;
    /// Standard gravity, m/s²
    pub const STANDARD_GRAVITY: f64 = 9.80665;
    /// Linear acceleration, m/s² (half a G, rounded)
    pub const ACCELERATION: f64 = 4.9;
    /// Angular velocity, rad/s
    pub const ANGULAR_VELOCITY: f64 = std::f64::consts::FRAC_PI_2;
}

/// Returns true when `|recorded - candidate| > threshold`
pub fn scalar_exceeds(recorded: f64, candidate: f64, threshold: f64) -> bool {
    (recorded - candidate).abs() > threshold
}

/// Returns true when the magnitude of the componentwise difference
/// exceeds `threshold`
pub fn vector_exceeds(
    recorded: &crate::value::Vector3,
    candidate: &crate::value::Vector3,
    threshold: f64,
) -> bool {
    recorded.distance(candidate) > threshold
}

/// Threshold predicate attached to a channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChangeDetector {
    /// Scalar channels: absolute difference strictly above the threshold
    AbsoluteDifference { threshold: f64 },
    /// Vector channels: length of the difference vector strictly above the threshold
    Magnitude { threshold: f64 },
    /// Any difference at all
    AnyChange,
}

impl ChangeDetector {
    /// Absolute-difference detector
    pub const fn absolute(threshold: f64) -> Self {
        Self::AbsoluteDifference { threshold }
    }

    /// Vector-magnitude detector
    pub const fn magnitude(threshold: f64) -> Self {
        Self::Magnitude { threshold }
    }

    /// Check whether this detector can compare values of `kind`
    pub fn supports(&self, kind: ValueKind) -> bool {
        match self {
            Self::AbsoluteDifference { .. } => kind == ValueKind::Scalar,
            Self::Magnitude { .. } => matches!(kind, ValueKind::Scalar | ValueKind::Vector),
            Self::AnyChange => true,
        }
    }

    /// Evaluate the candidate against the last recorded value.
    ///
    /// Values of different kinds never compare as exceeding; channels reject
    /// mismatched readings before they get here.
    pub fn exceeds_threshold(&self, recorded: &Value, candidate: &Value) -> bool {
        match (self, recorded, candidate) {
            (Self::AbsoluteDifference { threshold }, Value::Scalar(r), Value::Scalar(c)) => {
                scalar_exceeds(*r, *c, *threshold)
            }
            (Self::Magnitude { threshold }, Value::Scalar(r), Value::Scalar(c)) => {
                scalar_exceeds(*r, *c, *threshold)
            }
            (Self::Magnitude { threshold }, Value::Vector(r), Value::Vector(c)) => {
                vector_exceeds(r, c, *threshold)
            }
            (Self::AnyChange, r, c) => r.kind() == c.kind() && r != c,
            _ => false,
        }
    }

    /// The configured threshold, if any
    pub fn threshold(&self) -> Option<f64> {
        match self {
            Self::AbsoluteDifference { threshold } | Self::Magnitude { threshold } => {
                Some(*threshold)
            }
            Self::AnyChange => None,
        }
    }

    /// Same policy with a different threshold; `AnyChange` is returned as is
    pub fn with_threshold(self, threshold: f64) -> Self {
        match self {
            Self::AbsoluteDifference { .. } => Self::AbsoluteDifference { threshold },
            Self::Magnitude { .. } => Self::Magnitude { threshold },
            Self::AnyChange => Self::AnyChange,
        }
    }
}
