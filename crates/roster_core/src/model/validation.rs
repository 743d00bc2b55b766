//! Input normalization and validation shared by profile and record writes.
//!
//! # Invariants
//! - Emails are compared and stored in trimmed lowercase form.
//! - Validation runs before any provider or store call.

use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));

/// Rejected form input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    BlankName,
    InvalidEmail,
    PasswordTooShort { min_len: usize },
    Underage { min_age: u32, age: i64 },
    BlankSpecialty,
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankName => write!(f, "name is required"),
            Self::InvalidEmail => write!(f, "email address is not valid"),
            Self::PasswordTooShort { min_len } => {
                write!(f, "password must have at least {min_len} characters")
            }
            Self::Underage { min_age, age } => {
                write!(f, "age must be at least {min_age}, got {age}")
            }
            Self::BlankSpecialty => write!(f, "specialty is required"),
        }
    }
}

impl Error for ValidationError {}

/// Trims and lowercases an email address.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Checks the `local@domain.tld` shape on an already normalized email.
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

pub(crate) fn require_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::BlankName);
    }
    Ok(())
}

pub(crate) fn require_email(email: &str) -> Result<(), ValidationError> {
    if !is_valid_email(email) {
        return Err(ValidationError::InvalidEmail);
    }
    Ok(())
}

pub(crate) fn require_password(password: &str, min_len: usize) -> Result<(), ValidationError> {
    if password.chars().count() < min_len {
        return Err(ValidationError::PasswordTooShort { min_len });
    }
    Ok(())
}

pub(crate) fn require_age(age: i64, min_age: u32) -> Result<(), ValidationError> {
    if age < i64::from(min_age) {
        return Err(ValidationError::Underage { min_age, age });
    }
    Ok(())
}
