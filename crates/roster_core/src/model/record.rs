//! Live collection records and their write input.
//!
//! # Invariants
//! - `CollectionRecord.fields` always uses canonical field names.
//! - Records are projections of store snapshots; they are never written back
//!   as-is.

use crate::model::document::{Document, DocumentWrite, Fields, Timestamp};
use crate::model::fields::FieldAliasTable;
use crate::model::profile::{
    Specialty, FIELD_AGE, FIELD_CREATED_AT, FIELD_EMAIL, FIELD_NAME, FIELD_SPECIALTY,
    FIELD_UPDATED_AT,
};
use crate::model::validation::{
    normalize_email, require_age, require_name, ValidationError,
};
use serde_json::Value;

/// Store-assigned record id.
pub type RecordId = String;

/// One element of a materialized collection list.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionRecord {
    pub id: RecordId,
    pub fields: Fields,
}

impl CollectionRecord {
    /// Maps a stored document to a record through the alias table.
    pub fn from_document(document: Document, aliases: &FieldAliasTable) -> Self {
        Self {
            id: document.id,
            fields: aliases.resolve(document.fields),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    pub fn integer(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(Value::as_i64)
    }

    pub fn timestamp(&self, field: &str) -> Option<Timestamp> {
        self.get(field).and_then(Timestamp::from_value)
    }

    pub fn name(&self) -> Option<&str> {
        self.text(FIELD_NAME)
    }

    pub fn email(&self) -> Option<&str> {
        self.text(FIELD_EMAIL)
    }

    pub fn age(&self) -> Option<i64> {
        self.integer(FIELD_AGE)
    }

    pub fn specialty(&self) -> Option<Specialty> {
        self.text(FIELD_SPECIALTY).map(Specialty::parse)
    }

    pub fn created_at(&self) -> Option<Timestamp> {
        self.timestamp(FIELD_CREATED_AT)
    }
}

/// Validated input for adding or editing one people record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordInput {
    pub name: String,
    pub email: String,
    pub age: i64,
    pub specialty: String,
}

impl RecordInput {
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        age: i64,
        specialty: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            age,
            specialty: specialty.into(),
        }
    }

    pub fn normalized(&self) -> Self {
        Self {
            name: self.name.trim().to_string(),
            email: normalize_email(&self.email),
            age: self.age,
            specialty: self.specialty.trim().to_string(),
        }
    }

    /// Record forms only require an `@`; the stricter shape applies to accounts.
    pub fn validate(&self, min_age: u32) -> Result<(), ValidationError> {
        require_name(&self.name)?;
        if !self.email.contains('@') {
            return Err(ValidationError::InvalidEmail);
        }
        require_age(self.age, min_age)?;
        if self.specialty.is_empty() {
            return Err(ValidationError::BlankSpecialty);
        }
        Ok(())
    }

    pub(crate) fn create_write(&self) -> DocumentWrite {
        self.base_write().server_timestamp(FIELD_CREATED_AT)
    }

    pub(crate) fn update_write(&self) -> DocumentWrite {
        self.base_write().server_timestamp(FIELD_UPDATED_AT)
    }

    fn base_write(&self) -> DocumentWrite {
        DocumentWrite::new()
            .set(FIELD_NAME, self.name.as_str())
            .set(FIELD_EMAIL, self.email.as_str())
            .set(FIELD_AGE, self.age)
            .set(FIELD_SPECIALTY, self.specialty.as_str())
    }
}
