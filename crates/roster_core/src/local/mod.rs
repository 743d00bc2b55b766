//! Local collaborator backends.
//!
//! In-process implementations of the identity provider and document store,
//! used by the CLI host and by tests.

pub mod document_store;
pub mod identity;

pub use document_store::SqliteDocumentStore;
pub use identity::{LocalIdentityProvider, LocalIdentitySettings, OutboxKind, OutboxMessage};
