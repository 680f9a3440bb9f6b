// Sensor Relay - Telemetry aggregation and delivery pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Telemetry records
//!
//! A [`Record`] maps resource paths to timestamped field values. One record
//! accumulates every aggregate-mode channel recorded since the previous
//! successful publish; backlog-mode channels push one-value records.
//!
//! # Wire format
//!
//! With the `serde` feature a record serializes to a JSON object:
//!
//! ```text
//! {
//!   "Sensors/Light/Level":       { "value": 1250, "timestamp": 1700000000000 },
//!   "Sensors/Pressure/Pressure": { "value": 101.3, "timestamp": 1700000000000 }
//! }
//! ```

use std::collections::BTreeMap;

#[cfg(feature = "serde")]
use serde::Serialize;

use crate::error::RecordError;
use crate::value::Timestamp;

/// A single field value
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum FieldValue {
    Int(i64),
    Float(f64),
}

/// A field value and the time it was sampled
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct Field {
    pub value: FieldValue,
    pub timestamp: Timestamp,
}

/// Path-keyed collection of fields with a bounded number of entries
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    fields: BTreeMap<String, Field>,
    capacity: usize,
}

impl Record {
    /// Default maximum number of fields
    pub const DEFAULT_CAPACITY: usize = 64;

    /// Create an empty record with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    /// Create an empty record holding at most `capacity` fields
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: BTreeMap::new(),
            capacity,
        }
    }

    /// Write an integer field
    pub fn put_int(
        &mut self,
        path: impl Into<String>,
        value: i64,
        timestamp: Timestamp,
    ) -> Result<(), RecordError> {
        self.put_all(vec![(path.into(), FieldValue::Int(value))], timestamp)
    }

    /// Write a float field
    pub fn put_float(
        &mut self,
        path: impl Into<String>,
        value: f64,
        timestamp: Timestamp,
    ) -> Result<(), RecordError> {
        self.put_all(vec![(path.into(), FieldValue::Float(value))], timestamp)
    }

    /// Write several fields sharing one timestamp.
    ///
    /// All-or-nothing: when any field is not finite or the new paths do not
    /// fit, the record is left untouched. Rewriting an existing path does
    /// not consume capacity.
    pub fn put_all(
        &mut self,
        fields: Vec<(String, FieldValue)>,
        timestamp: Timestamp,
    ) -> Result<(), RecordError> {
        if let Some((path, _)) = fields
            .iter()
            .find(|(_, v)| matches!(v, FieldValue::Float(f) if !f.is_finite()))
        {
            return Err(RecordError::Encode(format!("non-finite value for {}", path)));
        }

        let needed = fields
            .iter()
            .filter(|(path, _)| !self.fields.contains_key(path))
            .count();
        let available = self.capacity.saturating_sub(self.fields.len());
        if needed > available {
            return Err(RecordError::Overflow {
                needed,
                available,
                capacity: self.capacity,
            });
        }

        for (path, value) in fields {
            self.fields.insert(path, Field { value, timestamp });
        }
        Ok(())
    }

    /// Get a field by path
    pub fn get(&self, path: &str) -> Option<&Field> {
        self.fields.get(path)
    }

    /// Iterate over fields in path order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Field)> {
        self.fields.iter()
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if the record has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Maximum number of fields
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Remove all fields, keeping the capacity
    pub fn clear(&mut self) {
        self.fields.clear();
    }

    /// Serialize to the JSON wire format
    #[cfg(feature = "serde")]
    pub fn to_json(&self) -> Result<String, RecordError> {
        serde_json::to_string(&self.fields).map_err(|e| RecordError::Encode(e.to_string()))
    }
}

impl Default for Record {
    fn default() -> Self {
        Self::new()
    }
}
