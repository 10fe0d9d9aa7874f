//! Core record and fingerprint types for the error aggregation daemon
//!
//! This module defines the fundamental data structures used throughout the
//! application: the loosely-typed records received from remote processes and
//! the fixed-shape fingerprints they are deduplicated by.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Timestamp type for consistent time handling across the application
pub type Timestamp = DateTime<Utc>;

/// Label substituted wherever a record lacks a value, including the source
/// key of records that carry no source field.
pub const ABSENT_LABEL: &str = "<absent>";

/// An incoming record: a mapping from field name to loosely-typed value, as
/// decoded from one datagram.
pub type Record = HashMap<String, FieldValue>;

/// A single field value from an incoming record.
///
/// Remote processes send records with heterogeneous values; only text,
/// integers, and lists of text are meaningful for deduplication. `Absent` is
/// an explicit marker so that two records missing the same field compare
/// equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldValue {
    /// Text value
    Text(String),
    /// Integer value (e.g. a line number)
    Int(i64),
    /// List of text values
    List(Vec<String>),
    /// The field was missing from the record
    Absent,
}

impl FieldValue {
    /// Returns the text content, if this value is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Returns true for the absence marker.
    pub fn is_absent(&self) -> bool {
        matches!(self, FieldValue::Absent)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(text) => f.write_str(text),
            FieldValue::Int(number) => write!(f, "{}", number),
            FieldValue::List(items) => f.write_str(&items.join(", ")),
            FieldValue::Absent => f.write_str(ABSENT_LABEL),
        }
    }
}

/// The default fingerprint field set: which parts of a record identify "the
/// same error" for deduplication purposes.
pub const DEFAULT_FINGERPRINT_FIELDS: [&str; 8] = [
    "module", "function", "file", "message", "path", "line", "detail", "kind",
];

/// Field name with special multi-line clipping behavior during extraction.
pub const MESSAGE_FIELD: &str = "message";

/// Field name that receives the full text of a clipped multi-line message.
pub const DETAIL_FIELD: &str = "detail";

/// Field name used to group fingerprints by originating application.
pub const KIND_FIELD: &str = "kind";

/// The ordered field schema shared by every fingerprint in a process.
///
/// The schema is fixed at startup from configuration; positions of the
/// specially-handled `message`, `detail`, and `kind` fields are resolved once
/// here so extraction and reporting don't search by name on every record.
#[derive(Debug)]
pub struct FingerprintSchema {
    fields: Vec<String>,
    message_position: Option<usize>,
    detail_position: Option<usize>,
    kind_position: Option<usize>,
}

impl FingerprintSchema {
    /// Create a schema from an ordered list of field names.
    pub fn new(fields: Vec<String>) -> Self {
        let position = |name: &str| fields.iter().position(|field| field == name);
        let message_position = position(MESSAGE_FIELD);
        let detail_position = position(DETAIL_FIELD);
        let kind_position = position(KIND_FIELD);
        Self {
            fields,
            message_position,
            detail_position,
            kind_position,
        }
    }

    /// The ordered field names.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Number of fields in the schema.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True if the schema has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Position of an arbitrary field by name.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field == name)
    }

    /// Position of the `message` field, if the schema has one.
    pub fn message_position(&self) -> Option<usize> {
        self.message_position
    }

    /// Position of the `detail` field, if the schema has one.
    pub fn detail_position(&self) -> Option<usize> {
        self.detail_position
    }

    /// Position of the `kind` field, if the schema has one.
    pub fn kind_position(&self) -> Option<usize> {
        self.kind_position
    }
}

impl Default for FingerprintSchema {
    fn default() -> Self {
        Self::new(
            DEFAULT_FINGERPRINT_FIELDS
                .iter()
                .map(|field| field.to_string())
                .collect(),
        )
    }
}

/// A fixed-shape deduplication key derived from one record.
///
/// Holds one value per schema field, in schema order. Equality and hashing
/// are structural over the values only; every fingerprint in a process shares
/// the same schema, so the schema handle does not participate.
#[derive(Debug, Clone)]
pub struct Fingerprint {
    schema: Arc<FingerprintSchema>,
    values: Vec<FieldValue>,
}

impl Fingerprint {
    /// Build a fingerprint from schema-ordered values.
    ///
    /// The value count must match the schema; extraction guarantees this.
    pub fn new(schema: Arc<FingerprintSchema>, values: Vec<FieldValue>) -> Self {
        debug_assert_eq!(schema.len(), values.len());
        Self { schema, values }
    }

    /// The schema this fingerprint was built against.
    pub fn schema(&self) -> &FingerprintSchema {
        &self.schema
    }

    /// Look up a field value by name.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.schema.position(name).map(|index| &self.values[index])
    }

    /// The message field value, if the schema has one.
    pub fn message(&self) -> Option<&FieldValue> {
        self.schema.message_position().map(|index| &self.values[index])
    }

    /// The detail field value, if the schema has one.
    pub fn detail(&self) -> Option<&FieldValue> {
        self.schema.detail_position().map(|index| &self.values[index])
    }

    /// The kind field value, if the schema has one.
    pub fn kind(&self) -> Option<&FieldValue> {
        self.schema.kind_position().map(|index| &self.values[index])
    }

    /// Display label for the kind field, used to group report entries.
    pub fn kind_label(&self) -> String {
        match self.kind() {
            Some(value) => value.to_string(),
            None => ABSENT_LABEL.to_string(),
        }
    }

    /// Iterate (field name, value) pairs in schema order.
    pub fn named_values(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.schema
            .fields()
            .iter()
            .map(|field| field.as_str())
            .zip(self.values.iter())
    }
}

impl PartialEq for Fingerprint {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl Eq for Fingerprint {}

impl Hash for Fingerprint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.values.hash(state);
    }
}
