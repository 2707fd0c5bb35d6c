use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("field `{field}` holds a non-finite number ({value})")]
    NonFiniteNumber { field: String, value: f64 },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A single decoded attribute value.
///
/// Serialized untagged, so the stored form is plain JSON. Integers and floats
/// stay distinguishable because JSON floats always carry a fraction or
/// exponent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Integer(i64),
    Float(f64),
    Text(String),
    List(Vec<MetadataValue>),
    Map(BTreeMap<String, MetadataValue>),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetadataValue::Integer(value) => Some(*value),
            _ => None,
        }
    }

    fn find_non_finite(&self, path: &str) -> Option<(String, f64)> {
        match self {
            MetadataValue::Float(value) if !value.is_finite() => Some((path.to_owned(), *value)),
            MetadataValue::List(items) => items
                .iter()
                .enumerate()
                .find_map(|(i, item)| item.find_non_finite(&format!("{path}[{i}]"))),
            MetadataValue::Map(fields) => fields
                .iter()
                .find_map(|(name, value)| value.find_non_finite(&format!("{path}.{name}"))),
            _ => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Text(value.to_owned())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Text(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Integer(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Float(value)
    }
}

impl From<Vec<MetadataValue>> for MetadataValue {
    fn from(value: Vec<MetadataValue>) -> Self {
        MetadataValue::List(value)
    }
}

impl From<BTreeMap<String, MetadataValue>> for MetadataValue {
    fn from(value: BTreeMap<String, MetadataValue>) -> Self {
        MetadataValue::Map(value)
    }
}

/// Decoded attributes of one DICOM object, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataRecord {
    fields: BTreeMap<String, MetadataValue>,
}

impl MetadataRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&MetadataValue> {
        self.fields.get(field)
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(MetadataValue::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetadataValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Serialize into the store's JSON representation.
    ///
    /// # Errors
    ///
    /// Fails with [`EncodeError::NonFiniteNumber`] for NaN or infinite floats,
    /// which JSON cannot carry without losing them.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        if let Some((field, value)) = self
            .fields
            .iter()
            .find_map(|(name, value)| value.find_non_finite(name))
        {
            return Err(EncodeError::NonFiniteNumber { field, value });
        }
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl FromIterator<(String, MetadataValue)> for MetadataRecord {
    fn from_iter<T: IntoIterator<Item = (String, MetadataValue)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}
