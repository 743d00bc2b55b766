//! Profile documents stored alongside identity accounts.
//!
//! # Responsibility
//! - Decode profile documents from the users collection.
//! - Build the writes issued at registration and on profile updates.
//!
//! # Invariants
//! - Profile document id equals the identity id it belongs to.
//! - Decoding never fails: undecodable fields are left unset.
//! - New writes always use canonical field names.

use crate::model::document::{Document, DocumentWrite, Timestamp};
use crate::model::fields::FieldAliasTable;
use crate::model::identity::UserId;
use crate::model::validation::{
    normalize_email, require_age, require_email, require_name, require_password, ValidationError,
};
use serde_json::Value;
use std::fmt::{Debug, Display, Formatter};

pub const FIELD_UID: &str = "uid";
pub const FIELD_NAME: &str = "name";
pub const FIELD_EMAIL: &str = "email";
pub const FIELD_AGE: &str = "age";
pub const FIELD_SPECIALTY: &str = "specialty";
pub const FIELD_EMAIL_VERIFIED: &str = "emailVerified";
pub const FIELD_PROFILE_COMPLETE: &str = "profileComplete";
pub const FIELD_CREATED_AT: &str = "createdAt";
pub const FIELD_UPDATED_AT: &str = "updatedAt";
pub const FIELD_LAST_LOGIN_AT: &str = "lastLoginAt";

/// Enum-like specialty label.
///
/// Stored as the exact label string; unknown labels survive as `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Specialty {
    Software,
    Design,
    Emca,
    Architecture,
    Accounting,
    Other(String),
}

impl Specialty {
    pub fn parse(label: &str) -> Self {
        match label.trim() {
            "Software" => Self::Software,
            "Diseño" => Self::Design,
            "Emca" => Self::Emca,
            "Arquitectura" => Self::Architecture,
            "Contaduría" => Self::Accounting,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Software => "Software",
            Self::Design => "Diseño",
            Self::Emca => "Emca",
            Self::Architecture => "Arquitectura",
            Self::Accounting => "Contaduría",
            Self::Other(label) => label.as_str(),
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Other(_))
    }

    /// Known specialties in display order.
    pub fn known() -> [Specialty; 5] {
        [
            Self::Software,
            Self::Design,
            Self::Emca,
            Self::Architecture,
            Self::Accounting,
        ]
    }
}

impl Display for Specialty {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Application profile stored in the users collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileDocument {
    pub id: UserId,
    pub name: Option<String>,
    pub email_address: Option<String>,
    pub age: Option<u32>,
    pub specialty: Option<Specialty>,
    pub profile_complete: bool,
    pub created_at: Option<Timestamp>,
    pub updated_at: Option<Timestamp>,
    pub last_login_at: Option<Timestamp>,
}

impl ProfileDocument {
    /// Decodes a stored profile document, applying profile field aliases.
    pub fn from_document(document: &Document) -> Self {
        let aliases = FieldAliasTable::profiles();
        let fields = &document.fields;
        let text = |field: &str| {
            aliases
                .lookup(fields, field)
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        let timestamp = |field: &str| aliases.lookup(fields, field).and_then(Timestamp::from_value);

        Self {
            id: document.id.clone(),
            name: text(FIELD_NAME),
            email_address: text(FIELD_EMAIL),
            age: aliases
                .lookup(fields, FIELD_AGE)
                .and_then(decode_age),
            specialty: text(FIELD_SPECIALTY)
                .filter(|label| !label.trim().is_empty())
                .map(|label| Specialty::parse(&label)),
            profile_complete: aliases
                .lookup(fields, FIELD_PROFILE_COMPLETE)
                .and_then(Value::as_bool)
                .unwrap_or(false),
            created_at: timestamp(FIELD_CREATED_AT),
            updated_at: timestamp(FIELD_UPDATED_AT),
            last_login_at: timestamp(FIELD_LAST_LOGIN_AT),
        }
    }

    /// Profile as written at registration, before the store assigns timestamps.
    pub(crate) fn from_registration(id: &str, input: &RegistrationInput) -> Self {
        Self {
            id: id.to_string(),
            name: Some(input.name.clone()),
            email_address: Some(input.email.clone()),
            age: u32::try_from(input.age).ok(),
            specialty: Some(Specialty::parse(&input.specialty)),
            profile_complete: true,
            created_at: None,
            updated_at: None,
            last_login_at: None,
        }
    }
}

/// Accepts integral numbers and numeric strings, the shapes older clients wrote.
fn decode_age(value: &Value) -> Option<u32> {
    match value {
        Value::Number(number) => number.as_u64().and_then(|age| u32::try_from(age).ok()),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Registration form input.
#[derive(Clone, PartialEq, Eq)]
pub struct RegistrationInput {
    pub name: String,
    pub email: String,
    pub password: String,
    pub age: i64,
    pub specialty: String,
}

impl RegistrationInput {
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
        age: i64,
        specialty: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            password: password.into(),
            age,
            specialty: specialty.into(),
        }
    }

    /// Trims text fields and normalizes the email. The password is kept verbatim.
    pub fn normalized(&self) -> Self {
        Self {
            name: self.name.trim().to_string(),
            email: normalize_email(&self.email),
            password: self.password.clone(),
            age: self.age,
            specialty: self.specialty.trim().to_string(),
        }
    }

    /// Validates normalized input.
    pub fn validate(&self, min_password_len: usize, min_age: u32) -> Result<(), ValidationError> {
        require_name(&self.name)?;
        require_email(&self.email)?;
        require_password(&self.password, min_password_len)?;
        require_age(self.age, min_age)?;
        if self.specialty.is_empty() {
            return Err(ValidationError::BlankSpecialty);
        }
        Ok(())
    }

    pub(crate) fn profile_write(&self, uid: &str, email_verified: bool) -> DocumentWrite {
        DocumentWrite::new()
            .set(FIELD_UID, uid)
            .set(FIELD_NAME, self.name.as_str())
            .set(FIELD_EMAIL, self.email.as_str())
            .set(FIELD_AGE, self.age)
            .set(FIELD_SPECIALTY, self.specialty.as_str())
            .set(FIELD_EMAIL_VERIFIED, email_verified)
            .set(FIELD_PROFILE_COMPLETE, true)
            .server_timestamp(FIELD_CREATED_AT)
            .server_timestamp(FIELD_UPDATED_AT)
            .server_timestamp(FIELD_LAST_LOGIN_AT)
    }
}

impl Debug for RegistrationInput {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationInput")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("age", &self.age)
            .field("specialty", &self.specialty)
            .finish()
    }
}

/// Partial profile change requested by a signed-in user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub age: Option<i64>,
    pub specialty: Option<String>,
}

impl ProfileUpdate {
    pub fn normalized(&self) -> Self {
        Self {
            name: self.name.as_deref().map(|name| name.trim().to_string()),
            age: self.age,
            specialty: self
                .specialty
                .as_deref()
                .map(|specialty| specialty.trim().to_string()),
        }
    }

    pub fn validate(&self, min_age: u32) -> Result<(), ValidationError> {
        if let Some(name) = &self.name {
            require_name(name)?;
        }
        if let Some(age) = self.age {
            require_age(age, min_age)?;
        }
        if matches!(&self.specialty, Some(specialty) if specialty.is_empty()) {
            return Err(ValidationError::BlankSpecialty);
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.age.is_none() && self.specialty.is_none()
    }

    pub(crate) fn to_write(&self) -> DocumentWrite {
        let mut write = DocumentWrite::new();
        if let Some(name) = &self.name {
            write = write.set(FIELD_NAME, name.as_str());
        }
        if let Some(age) = self.age {
            write = write.set(FIELD_AGE, age);
        }
        if let Some(specialty) = &self.specialty {
            write = write.set(FIELD_SPECIALTY, specialty.as_str());
        }
        write.server_timestamp(FIELD_UPDATED_AT)
    }
}
