//! Record and identifier types.
//!
//! # Invariants
//! - `RecordId` is always strictly positive.
//! - `Record` wraps a JSON object; arrays, scalars and `null` are rejected.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Repository-owned identifier field.
pub const ID_FIELD: &str = "id";
/// Repository-owned creation timestamp field (ISO-8601, UTC).
pub const CREATED_AT_FIELD: &str = "createdAt";

/// Caller-supplied record contents.
pub type Fields = Map<String, Value>;

/// Positive integer identifier, unique for the lifetime of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct RecordId(i64);

impl RecordId {
    /// Wraps `value` when it is strictly positive.
    pub fn new(value: i64) -> Result<Self, RecordValidationError> {
        if value > 0 {
            Ok(Self(value))
        } else {
            Err(RecordValidationError::InvalidId(value.to_string()))
        }
    }

    /// Parses a path segment such as `"42"`.
    ///
    /// Surrounding whitespace is ignored. Integral decimal spellings such as
    /// `"1.0"` or `"1e2"` name the same id as their integer value; fractions,
    /// zero, negatives and values beyond `MAX_EXACT_ID` are rejected.
    pub fn parse(raw: &str) -> Result<Self, RecordValidationError> {
        let trimmed = raw.trim();
        trimmed
            .parse::<i64>()
            .ok()
            .or_else(|| integral_decimal(trimmed))
            .and_then(|value| Self::new(value).ok())
            .ok_or_else(|| RecordValidationError::InvalidId(raw.to_string()))
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for RecordId {
    type Error = RecordValidationError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RecordId> for i64 {
    fn from(value: RecordId) -> Self {
        value.0
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Validation error for record payloads and identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordValidationError {
    /// Payload decoded to a JSON value other than an object.
    NotAnObject(&'static str),
    /// Payload is not valid JSON.
    MalformedJson(String),
    /// Identifier is not a positive integer.
    InvalidId(String),
}

impl Display for RecordValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAnObject(kind) => write!(f, "record must be a JSON object, got {kind}"),
            Self::MalformedJson(message) => write!(f, "record is not valid JSON: {message}"),
            Self::InvalidId(raw) => write!(f, "`{raw}` is not a positive integer id"),
        }
    }
}

impl Error for RecordValidationError {}

/// One item of the collection: an open mapping of field names to JSON values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: Fields,
}

impl Record {
    pub fn from_fields(fields: Fields) -> Self {
        Self { fields }
    }

    /// Accepts any JSON object.
    pub fn from_value(value: Value) -> Result<Self, RecordValidationError> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(RecordValidationError::NotAnObject(json_kind(&other))),
        }
    }

    /// Decodes a JSON text that must hold an object.
    pub fn from_json_str(raw: &str) -> Result<Self, RecordValidationError> {
        let value = serde_json::from_str::<Value>(raw)
            .map_err(|err| RecordValidationError::MalformedJson(err.to_string()))?;
        Self::from_value(value)
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn into_fields(self) -> Fields {
        self.fields
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.fields.insert(field.into(), value)
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    /// Stored `id` field when it holds a positive integer.
    pub fn id(&self) -> Option<RecordId> {
        self.get(ID_FIELD)
            .and_then(Value::as_i64)
            .and_then(|value| RecordId::new(value).ok())
    }

    /// Stored `createdAt` field when it holds a string.
    pub fn created_at(&self) -> Option<&str> {
        self.get(CREATED_AT_FIELD).and_then(Value::as_str)
    }

    /// Overwrites the repository-owned fields.
    pub(crate) fn stamp(&mut self, id: RecordId, created_at: String) {
        self.insert(ID_FIELD, Value::from(id.get()));
        self.insert(CREATED_AT_FIELD, Value::String(created_at));
    }
}

impl From<Fields> for Record {
    fn from(fields: Fields) -> Self {
        Self::from_fields(fields)
    }
}

/// Largest id that decimal spellings can name exactly.
const MAX_EXACT_ID: f64 = 9_007_199_254_740_991.0;

fn integral_decimal(raw: &str) -> Option<i64> {
    // f64 parsing also accepts "inf" and "NaN"; only plain decimals qualify.
    if !raw
        .bytes()
        .all(|byte| byte.is_ascii_digit() || matches!(byte, b'.' | b'e' | b'E' | b'+' | b'-'))
    {
        return None;
    }
    let value = raw.parse::<f64>().ok()?;
    (value.fract() == 0.0 && value.abs() <= MAX_EXACT_ID).then_some(value as i64)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
