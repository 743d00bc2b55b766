//! Identity-provider records and session credentials.

use crate::model::document::Timestamp;
use std::fmt::{Debug, Formatter};

/// Provider-assigned user id.
pub type UserId = String;

/// The identity provider's own record for one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRecord {
    /// Stable and immutable for the lifetime of the account.
    pub id: UserId,
    pub email_address: String,
    pub display_name: Option<String>,
    pub email_verified: bool,
}

/// Opaque proof of an authenticated session.
///
/// Only identity-provider implementations construct credentials; core code
/// treats the token as an opaque handle and never logs it.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    identity: IdentityRecord,
    issued_at: Timestamp,
}

impl Credential {
    pub fn new(token: impl Into<String>, identity: IdentityRecord, issued_at: Timestamp) -> Self {
        Self {
            token: token.into(),
            identity,
            issued_at,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Identity snapshot taken when the provider issued or refreshed this credential.
    pub fn identity(&self) -> &IdentityRecord {
        &self.identity
    }

    pub fn user_id(&self) -> &str {
        &self.identity.id
    }

    pub fn issued_at(&self) -> Timestamp {
        self.issued_at
    }

    /// Returns the same session handle with a newer identity snapshot.
    pub fn with_identity(mut self, identity: IdentityRecord) -> Self {
        self.identity = identity;
        self
    }
}

impl Debug for Credential {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("user_id", &self.identity.id)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}
