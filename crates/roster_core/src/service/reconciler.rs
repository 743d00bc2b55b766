//! Identity/profile reconciliation.
//!
//! # Invariants
//! - Never fails and never waits on the profile: a missing profile yields an
//!   identity-only view.
//! - `email_verified` and `display_name` always come from the identity record.
//! - Profile fields win on every other collision.

use crate::model::identity::IdentityRecord;
use crate::model::profile::ProfileDocument;
use crate::model::user_view::UserView;

/// Merges an identity record with its optional profile document.
pub fn reconcile(identity: &IdentityRecord, profile: Option<&ProfileDocument>) -> UserView {
    let mut view = UserView {
        id: identity.id.clone(),
        email_address: identity.email_address.clone(),
        display_name: identity.display_name.clone(),
        email_verified: identity.email_verified,
        name: None,
        age: None,
        specialty: None,
        profile_complete: false,
        created_at: None,
        updated_at: None,
        last_login_at: None,
    };

    let Some(profile) = profile else {
        return view;
    };

    if let Some(email) = profile
        .email_address
        .as_deref()
        .filter(|email| !email.trim().is_empty())
    {
        view.email_address = email.to_string();
    }
    view.name = profile.name.clone();
    view.age = profile.age;
    view.specialty = profile.specialty.clone();
    view.profile_complete = profile.profile_complete;
    view.created_at = profile.created_at;
    view.updated_at = profile.updated_at;
    view.last_login_at = profile.last_login_at;
    view
}
