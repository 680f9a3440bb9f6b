// Sensor Relay - Telemetry aggregation and delivery pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Channel encoders
//!
//! A [`ChannelEncoder`] turns one [`Value`] into the record fields the sink
//! expects. Vector and position values fan out into one field per component
//! under a common base path.

use std::fmt;
use std::sync::Arc;

use crate::error::RecordError;
use crate::record::{FieldValue, Record};
use crate::value::{Timestamp, Value, ValueKind};

/// User-supplied encoding function
pub type EncodeFn =
    Arc<dyn Fn(&Value) -> std::result::Result<Vec<(String, FieldValue)>, RecordError> + Send + Sync>;

/// How a channel writes its value into a record
#[derive(Clone)]
pub enum ChannelEncoder {
    /// Scalar rounded to an integer at `path`
    Int { path: String },
    /// Scalar at `path`
    Float { path: String },
    /// Vector at `base/X`, `base/Y`, `base/Z`
    Vector { base: String },
    /// Position fix, one field per component under `base`
    Position { base: String },
    /// Arbitrary encoding for values of `kind`
    Custom { kind: ValueKind, encode: EncodeFn },
}

impl ChannelEncoder {
    /// Integer scalar encoder
    pub fn int(path: impl Into<String>) -> Self {
        Self::Int { path: path.into() }
    }

    /// Float scalar encoder
    pub fn float(path: impl Into<String>) -> Self {
        Self::Float { path: path.into() }
    }

    /// Three-axis vector encoder
    pub fn vector(base: impl Into<String>) -> Self {
        Self::Vector { base: base.into() }
    }

    /// Position fix encoder
    pub fn position(base: impl Into<String>) -> Self {
        Self::Position { base: base.into() }
    }

    /// Encoder backed by a closure
    pub fn custom<F>(kind: ValueKind, encode: F) -> Self
    where
        F: Fn(&Value) -> std::result::Result<Vec<(String, FieldValue)>, RecordError>
            + Send
            + Sync
            + 'static,
    {
        Self::Custom {
            kind,
            encode: Arc::new(encode),
        }
    }

    /// Check whether this encoder accepts values of `kind`
    pub fn supports(&self, kind: ValueKind) -> bool {
        match self {
            Self::Int { .. } | Self::Float { .. } => kind == ValueKind::Scalar,
            Self::Vector { .. } => kind == ValueKind::Vector,
            Self::Position { .. } => kind == ValueKind::Structured,
            Self::Custom { kind: k, .. } => *k == kind,
        }
    }

    /// Produce the record fields for `value`
    pub fn fields(
        &self,
        value: &Value,
    ) -> std::result::Result<Vec<(String, FieldValue)>, RecordError> {
        match (self, value) {
            (Self::Int { path }, Value::Scalar(v)) => {
                if !v.is_finite() || v.abs() >= i64::MAX as f64 {
                    return Err(RecordError::Encode(format!(
                        "{} is not representable as an integer",
                        v
                    )));
                }
                Ok(vec![(path.clone(), FieldValue::Int(v.round() as i64))])
            }
            (Self::Float { path }, Value::Scalar(v)) => {
                Ok(vec![(path.clone(), FieldValue::Float(*v))])
            }
            (Self::Vector { base }, Value::Vector(v)) => Ok(vec![
                (format!("{}/X", base), FieldValue::Float(v.x)),
                (format!("{}/Y", base), FieldValue::Float(v.y)),
                (format!("{}/Z", base), FieldValue::Float(v.z)),
            ]),
            (Self::Position { base }, Value::Position(p)) => Ok(vec![
                (format!("{}/Latitude", base), FieldValue::Float(p.latitude)),
                (format!("{}/Longitude", base), FieldValue::Float(p.longitude)),
                (format!("{}/Altitude", base), FieldValue::Float(p.altitude)),
                (
                    format!("{}/HorizontalAccuracy", base),
                    FieldValue::Float(p.horizontal_accuracy),
                ),
                (
                    format!("{}/VerticalAccuracy", base),
                    FieldValue::Float(p.vertical_accuracy),
                ),
            ]),
            (Self::Custom { kind, encode }, v) if v.kind() == *kind => encode(v),
            (_, v) => Err(RecordError::Encode(format!(
                "encoder does not accept {:?} values",
                v.kind()
            ))),
        }
    }

    /// Encode `value` into `record` at `timestamp`
    pub fn encode(
        &self,
        record: &mut Record,
        timestamp: Timestamp,
        value: &Value,
    ) -> std::result::Result<(), RecordError> {
        record.put_all(self.fields(value)?, timestamp)
    }
}

impl fmt::Debug for ChannelEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int { path } => f.debug_struct("Int").field("path", path).finish(),
            Self::Float { path } => f.debug_struct("Float").field("path", path).finish(),
            Self::Vector { base } => f.debug_struct("Vector").field("base", base).finish(),
            Self::Position { base } => f.debug_struct("Position").field("base", base).finish(),
            Self::Custom { kind, .. } => f.debug_struct("Custom").field("kind", kind).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Position, Vector3};

    #[test]
    fn test_int_rounds() {
        let encoder = ChannelEncoder::int("Sensors/Light/Level");
        let fields = encoder.fields(&Value::Scalar(1249.6)).unwrap();
        assert_eq!(
            fields,
            vec![("Sensors/Light/Level".to_string(), FieldValue::Int(1250))]
        );
    }

    #[test]
    fn test_int_rejects_nan() {
        let encoder = ChannelEncoder::int("light");
        assert!(matches!(
            encoder.fields(&Value::Scalar(f64::NAN)),
            Err(RecordError::Encode(_))
        ));
    }

    #[test]
    fn test_vector_paths() {
        let encoder = ChannelEncoder::vector("Sensors/Accelerometer/Acceleration");
        let mut record = Record::new();
        encoder
            .encode(&mut record, 1000, &Value::Vector(Vector3::new(0.1, 0.2, 9.8)))
            .unwrap();
        assert_eq!(record.len(), 3);
        assert_eq!(
            record.get("Sensors/Accelerometer/Acceleration/Z").unwrap().value,
            FieldValue::Float(9.8)
        );
    }

    #[test]
    fn test_position_paths() {
        let encoder = ChannelEncoder::position("Sensors/Gps");
        let fix = Position {
            latitude: 49.172350,
            longitude: -123.070987,
            altitude: 0.009,
            horizontal_accuracy: 14.0,
            vertical_accuracy: 8.0,
        };
        let fields = encoder.fields(&Value::Position(fix)).unwrap();
        assert_eq!(fields.len(), 5);
        assert_eq!(fields[4].0, "Sensors/Gps/VerticalAccuracy");
    }

    #[test]
    fn test_kind_mismatch() {
        let encoder = ChannelEncoder::float("p");
        assert!(!encoder.supports(ValueKind::Vector));
        assert!(encoder
            .fields(&Value::Vector(Vector3::default()))
            .is_err());
    }

    #[test]
    fn test_custom_encoder() {
        let encoder = ChannelEncoder::custom(ValueKind::Scalar, |v| {
            let celsius = v.as_scalar().unwrap_or_default();
            Ok(vec![(
                "Sensors/Temperature/Fahrenheit".to_string(),
                FieldValue::Float(celsius * 9.0 / 5.0 + 32.0),
            )])
        });
        assert!(encoder.supports(ValueKind::Scalar));
        let fields = encoder.fields(&Value::Scalar(100.0)).unwrap();
        assert_eq!(fields[0].1, FieldValue::Float(212.0));
        assert_eq!(format!("{:?}", encoder), "Custom { kind: Scalar }");
    }
}
