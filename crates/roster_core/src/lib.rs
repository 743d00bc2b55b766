//! Core client logic for the Roster app.
//! Sessions, profile reconciliation and live people lists live here; hosts
//! inject the identity provider and document store.

pub mod config;
pub mod db;
pub mod error;
pub mod local;
pub mod logging;
pub mod model;
pub mod provider;
pub mod service;
pub mod sync;

pub use config::{load_config, ConfigError, CoreConfig};
pub use error::{classify, CoreResult, ErrorCategory, UserFacingError};
pub use local::{LocalIdentityProvider, SqliteDocumentStore};
pub use logging::{
    default_log_level, init_logging, init_logging_from_config, init_logging_with, logging_status,
    LogSettings,
};
pub use model::document::{Document, DocumentWrite, Fields, Timestamp};
pub use model::fields::FieldAliasTable;
pub use model::identity::{Credential, IdentityRecord, UserId};
pub use model::profile::{ProfileDocument, ProfileUpdate, RegistrationInput, Specialty};
pub use model::record::{CollectionRecord, RecordId, RecordInput};
pub use model::user_view::UserView;
pub use provider::{
    DocumentStore, IdentityProvider, ListenerRegistration, ProviderError, ProviderResult,
    QueryDescriptor, SortDirection,
};
pub use service::{RecordService, SessionManager, SessionObserver, SessionPhase};
pub use sync::{CollectionSnapshot, LiveCollectionSync, SnapshotChanges, SubscriptionHandle};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
