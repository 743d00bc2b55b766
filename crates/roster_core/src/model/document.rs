//! Store-level document shapes.
//!
//! # Responsibility
//! - Represent stored documents as JSON field maps keyed by document id.
//! - Describe writes, including fields the store stamps with its own clock.
//!
//! # Invariants
//! - `DocumentWrite` never carries client clock values for server timestamps.
//! - A field listed as server timestamp overrides a same-named plain value.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON object holding document fields.
pub type Fields = serde_json::Map<String, Value>;

/// Store-generated point in time, in Unix epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    pub fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub fn as_millis(self) -> i64 {
        self.0
    }

    /// Decodes a stored field value. Only integral numbers are accepted.
    pub fn from_value(value: &Value) -> Option<Self> {
        value.as_i64().map(Self)
    }
}

impl From<Timestamp> for Value {
    fn from(value: Timestamp) -> Self {
        Value::from(value.0)
    }
}

/// One document as read from a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

/// Field set for `set`/`update`/`add` document writes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentWrite {
    fields: Fields,
    server_timestamps: Vec<String>,
}

impl DocumentWrite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets one plain field value.
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        let field = field.into();
        self.server_timestamps.retain(|existing| existing != &field);
        self.fields.insert(field, value.into());
        self
    }

    /// Marks one field to be filled with the store's commit timestamp.
    pub fn server_timestamp(mut self, field: impl Into<String>) -> Self {
        let field = field.into();
        self.fields.remove(&field);
        if !self.server_timestamps.contains(&field) {
            self.server_timestamps.push(field);
        }
        self
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn server_timestamp_fields(&self) -> &[String] {
        &self.server_timestamps
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.server_timestamps.is_empty()
    }

    /// Resolves server timestamps against one commit time.
    pub fn resolve(self, commit_time: Timestamp) -> Fields {
        let mut fields = self.fields;
        for field in self.server_timestamps {
            fields.insert(field, commit_time.into());
        }
        fields
    }
}
