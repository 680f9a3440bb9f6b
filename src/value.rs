// Sensor Relay - Telemetry aggregation and delivery pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Sensor values and timestamped samples
//!
//! A channel produces exactly one [`ValueKind`] for its whole lifetime.
//! All value types are `Copy`, so storing a reading as "last recorded" is
//! always a copy and can never alias the "last read" slot.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch
pub type Timestamp = u64;

/// Shape of the values a channel produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ValueKind {
    /// Single number
    Scalar,
    /// Three-axis vector
    Vector,
    /// Position fix
    Structured,
}

/// Three-axis measurement (acceleration, angular velocity, ...)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    /// Create a vector from its components
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean length
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Euclidean length of the componentwise difference
    pub fn distance(&self, other: &Vector3) -> f64 {
        Vector3::new(self.x - other.x, self.y - other.y, self.z - other.z).magnitude()
    }

    /// True when every component is a finite number
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// GNSS position fix
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Position {
    /// Degrees
    pub latitude: f64,
    /// Degrees
    pub longitude: f64,
    /// Meters
    pub altitude: f64,
    /// Meters
    pub horizontal_accuracy: f64,
    /// Meters
    pub vertical_accuracy: f64,
}

impl Position {
    /// True when every field is a finite number
    pub fn is_finite(&self) -> bool {
        [
            self.latitude,
            self.longitude,
            self.altitude,
            self.horizontal_accuracy,
            self.vertical_accuracy,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}

/// A single reading
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Value {
    Scalar(f64),
    Vector(Vector3),
    Position(Position),
}

impl Value {
    /// The kind of this value
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Scalar(_) => ValueKind::Scalar,
            Value::Vector(_) => ValueKind::Vector,
            Value::Position(_) => ValueKind::Structured,
        }
    }

    /// True when no component is NaN or infinite
    pub fn is_finite(&self) -> bool {
        match self {
            Value::Scalar(v) => v.is_finite(),
            Value::Vector(v) => v.is_finite(),
            Value::Position(p) => p.is_finite(),
        }
    }

    /// The scalar reading, if this is one
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Value::Scalar(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Scalar(v)
    }
}

impl From<Vector3> for Value {
    fn from(v: Vector3) -> Self {
        Value::Vector(v)
    }
}

impl From<Position> for Value {
    fn from(p: Position) -> Self {
        Value::Position(p)
    }
}

/// A value and the time it was taken
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Sample {
    pub timestamp: Timestamp,
    pub value: Value,
}

impl Sample {
    /// Create a new sample
    pub fn new(value: impl Into<Value>, timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_vector_distance() {
        let a = Vector3::new(1.0, 2.0, 2.0);
        let b = Vector3::default();
        assert_relative_eq!(a.distance(&b), 3.0);
        assert_relative_eq!(b.distance(&a), 3.0);
    }

    #[test]
    fn test_value_kind() {
        assert_eq!(Value::Scalar(1.0).kind(), ValueKind::Scalar);
        assert_eq!(Value::Vector(Vector3::default()).kind(), ValueKind::Vector);
        assert_eq!(
            Value::Position(Position::default()).kind(),
            ValueKind::Structured
        );
    }

    #[test]
    fn test_value_is_finite() {
        assert!(Value::Scalar(101.3).is_finite());
        assert!(!Value::Scalar(f64::NAN).is_finite());
        assert!(!Value::Vector(Vector3::new(0.0, f64::INFINITY, 0.0)).is_finite());
        let fix = Position {
            latitude: f64::NAN,
            ..Default::default()
        };
        assert!(!Value::Position(fix).is_finite());
    }

    #[test]
    fn test_sample_from_scalar() {
        let sample = Sample::new(22.5, 1000);
        assert_eq!(sample.value.as_scalar(), Some(22.5));
        assert_eq!(sample.timestamp, 1000);
    }
}
