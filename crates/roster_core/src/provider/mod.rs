//! Collaborator contracts for the identity provider and document store.
//!
//! # Responsibility
//! - Define the async SPI core code talks to.
//! - Carry provider failures as raw `code + message` pairs for the classifier.
//!
//! # Invariants
//! - Provider error codes are interpreted only by `error::classifier`.
//! - Listener registrations release provider resources when removed or dropped.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod identity;
pub mod query;
pub mod registration;
pub mod store;

pub use identity::{AuthStateListener, IdentityProvider};
pub use query::{FieldFilter, OrderBy, QueryDescriptor, SortDirection};
pub use registration::ListenerRegistration;
pub use store::{DocumentStore, SnapshotListener};

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Raw failure reported by a collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    /// Provider-defined code, e.g. `auth/wrong-password` or `unavailable`.
    pub code: String,
    pub message: String,
}

impl ProviderError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl Display for ProviderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl Error for ProviderError {}
