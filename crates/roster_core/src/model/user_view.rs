//! Reconciled user view exposed to the UI layer.

use crate::model::document::Timestamp;
use crate::model::identity::UserId;
use crate::model::profile::Specialty;

/// Read-only merge of an identity record and its profile document.
///
/// Profile-only fields are `None` when the profile document was missing or
/// could not be fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserView {
    pub id: UserId,
    pub email_address: String,
    /// Always taken from the identity provider.
    pub display_name: Option<String>,
    /// Always taken from the identity provider.
    pub email_verified: bool,
    pub name: Option<String>,
    pub age: Option<u32>,
    pub specialty: Option<Specialty>,
    pub profile_complete: bool,
    pub created_at: Option<Timestamp>,
    pub updated_at: Option<Timestamp>,
    pub last_login_at: Option<Timestamp>,
}

impl UserView {
    /// Returns whether any profile-sourced field is populated.
    pub fn has_profile(&self) -> bool {
        self.name.is_some()
            || self.age.is_some()
            || self.specialty.is_some()
            || self.created_at.is_some()
            || self.profile_complete
    }
}
