//! Provider error classification.
//!
//! # Responsibility
//! - Map provider-defined error codes to the stable user-facing taxonomy.
//! - Keep the original diagnostic text for logs.
//!
//! # Invariants
//! - `classify` is total and pure: every input yields exactly one category.
//! - No other module inspects provider error code strings.

use crate::model::validation::ValidationError;
use crate::provider::ProviderError;
use std::error::Error;
use std::fmt::{Display, Formatter};

const GENERIC_FAILURE_MESSAGE: &str = "Operation failed.";

/// Stable, source-agnostic failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    InvalidCredentials,
    AccountNotFound,
    AccountDisabled,
    EmailInUse,
    WeakCredential,
    RateLimited,
    NetworkUnavailable,
    ConfigurationError,
    /// Input rejected before reaching any provider.
    InvalidInput,
    /// Operation needs an active session.
    NotSignedIn,
    Unknown,
}

impl ErrorCategory {
    /// Stable machine-readable id, used in log events.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid_credentials",
            Self::AccountNotFound => "account_not_found",
            Self::AccountDisabled => "account_disabled",
            Self::EmailInUse => "email_in_use",
            Self::WeakCredential => "weak_credential",
            Self::RateLimited => "rate_limited",
            Self::NetworkUnavailable => "network_unavailable",
            Self::ConfigurationError => "configuration_error",
            Self::InvalidInput => "invalid_input",
            Self::NotSignedIn => "not_signed_in",
            Self::Unknown => "unknown",
        }
    }

    /// Displayable text for the category.
    pub fn user_message(self) -> &'static str {
        match self {
            Self::InvalidCredentials => "Email or password is incorrect.",
            Self::AccountNotFound => "No account exists for this email.",
            Self::AccountDisabled => "This account has been disabled.",
            Self::EmailInUse => "This email is already registered.",
            Self::WeakCredential => "Password is too weak. Choose a longer password.",
            Self::RateLimited => "Too many attempts. Try again later.",
            Self::NetworkUnavailable => "Connection error. Check your network.",
            Self::ConfigurationError => "The service is not configured correctly.",
            Self::InvalidInput => "Some of the entered data is not valid.",
            Self::NotSignedIn => "You need to sign in to do this.",
            Self::Unknown => GENERIC_FAILURE_MESSAGE,
        }
    }
}

impl Display for ErrorCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The only error type surfaced above the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserFacingError {
    pub category: ErrorCategory,
    /// Displayable text.
    pub message: String,
    /// Original diagnostic text, for logs only.
    pub detail: String,
}

impl UserFacingError {
    /// Builds an error whose displayable text comes from the category.
    ///
    /// `Unknown` errors display `detail` instead, falling back to a generic
    /// text when `detail` is blank.
    pub fn new(category: ErrorCategory, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let message = match category {
            ErrorCategory::Unknown if !detail.trim().is_empty() => detail.clone(),
            other => other.user_message().to_string(),
        };
        Self {
            category,
            message,
            detail,
        }
    }

    pub fn not_signed_in() -> Self {
        Self::new(ErrorCategory::NotSignedIn, "no current user")
    }
}

impl Display for UserFacingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error for UserFacingError {}

impl From<ProviderError> for UserFacingError {
    fn from(value: ProviderError) -> Self {
        classify(&value.code, &value.message)
    }
}

impl From<&ProviderError> for UserFacingError {
    fn from(value: &ProviderError) -> Self {
        classify(&value.code, &value.message)
    }
}

impl From<ValidationError> for UserFacingError {
    fn from(value: ValidationError) -> Self {
        let category = match value {
            ValidationError::PasswordTooShort { .. } => ErrorCategory::WeakCredential,
            _ => ErrorCategory::InvalidInput,
        };
        let mut error = Self::new(category, value.to_string());
        // Local validation knows the configured limits; show them.
        error.message = value.to_string();
        error
    }
}

/// Classifies one provider failure.
///
/// Codes are matched after trimming, lowercasing and dropping an `auth/`
/// prefix, so `auth/wrong-password` and `WRONG-PASSWORD` classify alike.
pub fn classify(provider_error_code: &str, provider_message: &str) -> UserFacingError {
    UserFacingError::new(category_for_code(provider_error_code), provider_message)
}

/// Category lookup behind `classify`.
pub fn category_for_code(provider_error_code: &str) -> ErrorCategory {
    let normalized = provider_error_code.trim().to_ascii_lowercase();
    let code = normalized.strip_prefix("auth/").unwrap_or(&normalized);

    match code {
        "wrong-password"
        | "invalid-credential"
        | "invalid-login-credentials"
        | "invalid-email"
        | "requires-recent-login"
        | "user-mismatch" => ErrorCategory::InvalidCredentials,
        "user-not-found" => ErrorCategory::AccountNotFound,
        "user-disabled" => ErrorCategory::AccountDisabled,
        "email-already-in-use" | "already-exists" => ErrorCategory::EmailInUse,
        "weak-password" => ErrorCategory::WeakCredential,
        "too-many-requests" | "resource-exhausted" | "quota-exceeded" => {
            ErrorCategory::RateLimited
        }
        "network-request-failed" | "unavailable" | "deadline-exceeded" | "timeout" => {
            ErrorCategory::NetworkUnavailable
        }
        "configuration-not-found"
        | "operation-not-allowed"
        | "invalid-api-key"
        | "app-not-authorized"
        | "permission-denied"
        | "failed-precondition" => ErrorCategory::ConfigurationError,
        "invalid-argument" | "invalid-input" => ErrorCategory::InvalidInput,
        "no-current-user" | "unauthenticated" | "user-token-expired" | "invalid-user-token" => {
            ErrorCategory::NotSignedIn
        }
        _ => ErrorCategory::Unknown,
    }
}
