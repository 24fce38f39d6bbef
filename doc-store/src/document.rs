//! Multi-valued documents and their two storage encodings.
//!
//! A [`Document`] maps field names to [`Value`]s. A field holds either a
//! scalar or a sequence; readers never need to care which, because
//! [`Document::values`] presents a scalar as a one-element sequence.
//!
//! # Encodings
//!
//! - **Blob** ([`Document::to_blob`]): the whole field map as one JSON object.
//!   Used by the string-mode store.
//! - **Field table** ([`Document::to_field_table`]): one string per field.
//!   Strings are written as-is unless they would read back as another kind,
//!   in which case they are written as a JSON string literal. Every other
//!   value, sequences included, is written as JSON text. Used by the
//!   hash-mode store.
//!
//! Both decoders are exact inverses of their encoders.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A single document value.
///
/// The variant order matters for decoding: JSON integers become
/// [`Value::Integer`], numbers with a fraction or exponent become
/// [`Value::Float`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Sequence(Vec<Value>),
}

/// Deepest sequence nesting the encoders accept. Stays well under
/// serde_json's recursion limit of 128 so every encoded value decodes again.
pub const MAX_NESTING: usize = 64;

impl Value {
    fn ensure_encodable(&self) -> Result<(), Error> {
        self.ensure_encodable_at(0)
    }

    fn ensure_encodable_at(&self, depth: usize) -> Result<(), Error> {
        match self {
            Value::Float(f) if !f.is_finite() => Err(Error::Encoding(
                serde::ser::Error::custom(format!("cannot encode non-finite float {f}")),
            )),
            Value::Sequence(_) if depth >= MAX_NESTING => Err(Error::Encoding(
                serde::ser::Error::custom(format!(
                    "sequences nested deeper than {MAX_NESTING} levels"
                )),
            )),
            Value::Sequence(values) => values
                .iter()
                .try_for_each(|value| value.ensure_encodable_at(depth + 1)),
            _ => Ok(()),
        }
    }

    fn to_field_string(&self) -> Result<String, Error> {
        self.ensure_encodable()?;
        match self {
            Value::String(s) if serde_json::from_str::<Value>(s).is_err() => Ok(s.clone()),
            other => Ok(serde_json::to_string(other)?),
        }
    }

    fn from_field_string(raw: String) -> Value {
        match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(_) => Value::String(raw),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => f.write_str(s),
            Value::Sequence(_) => {
                f.write_str(&serde_json::to_string(self).map_err(|_| fmt::Error)?)
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i.into())
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Integer(i.into())
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Value::Sequence(values.into_iter().map(Into::into).collect())
    }
}

/// An in-memory map from field name to one or many values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    fields: BTreeMap<String, Value>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` at `field`, replacing whatever was there.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Appends `value` to `field`.
    ///
    /// An absent field becomes a one-element sequence. A scalar field is
    /// first promoted to a one-element sequence.
    pub fn add(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.append(field.into(), std::iter::once(value.into()));
    }

    /// Appends every element of `values` to `field`, as [`Document::add`].
    pub fn add_all<I, V>(&mut self, field: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.append(field.into(), values.into_iter().map(Into::into));
    }

    fn append(&mut self, field: String, extra: impl IntoIterator<Item = Value>) {
        let slot = self
            .fields
            .entry(field)
            .or_insert_with(|| Value::Sequence(Vec::new()));
        let mut values = match std::mem::replace(slot, Value::Sequence(Vec::new())) {
            Value::Sequence(values) => values,
            scalar => vec![scalar],
        };
        values.extend(extra);
        *slot = Value::Sequence(values);
    }

    /// All values at `field`; a scalar reads as a one-element slice.
    pub fn values(&self, field: &str) -> &[Value] {
        match self.fields.get(field) {
            None => &[],
            Some(Value::Sequence(values)) => values,
            Some(scalar) => std::slice::from_ref(scalar),
        }
    }

    pub fn first_value(&self, field: &str) -> Option<&Value> {
        self.values(field).first()
    }

    pub fn first_value_or(&self, field: &str, default: impl Into<Value>) -> Value {
        match self.first_value(field) {
            Some(value) => value.clone(),
            None => default.into(),
        }
    }

    /// The first value at `field` in its canonical string form, or `default`.
    pub fn first_value_as_string(&self, field: &str, default: &str) -> String {
        self.first_value(field)
            .map_or_else(|| default.to_owned(), ToString::to_string)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Encodes the whole document as one JSON object.
    pub fn to_blob(&self) -> Result<Vec<u8>, Error> {
        self.fields.values().try_for_each(Value::ensure_encodable)?;
        Ok(serde_json::to_vec(&self.fields)?)
    }

    pub fn from_blob(bytes: &[u8]) -> Result<Self, Error> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Encodes each field as its own string entry.
    pub fn to_field_table(&self) -> Result<Vec<(String, String)>, Error> {
        self.fields
            .iter()
            .map(|(field, value)| Ok((field.clone(), value.to_field_string()?)))
            .collect()
    }

    pub fn from_field_table<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        entries
            .into_iter()
            .map(|(field, raw)| (field, Value::from_field_string(raw)))
            .collect()
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&serde_json::to_string(&self.fields).map_err(|_| fmt::Error)?)
    }
}
