//! Document store SPI.

use crate::model::document::{Document, DocumentWrite};
use crate::provider::{ListenerRegistration, ProviderResult, QueryDescriptor};
use async_trait::async_trait;
use std::sync::Arc;

/// Receives every snapshot of a subscribed query, or the error that ended it.
///
/// Snapshots are complete result sets in query order.
pub type SnapshotListener = Arc<dyn Fn(ProviderResult<Vec<Document>>) + Send + Sync>;

/// Remote document database.
///
/// Timestamps in written documents come from the store's own clock.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_document(&self, collection: &str, id: &str) -> ProviderResult<Option<Document>>;

    /// Creates or fully replaces one document.
    async fn set_document(
        &self,
        collection: &str,
        id: &str,
        write: DocumentWrite,
    ) -> ProviderResult<()>;

    /// Merges fields into an existing document; fails with `not-found` otherwise.
    async fn update_document(
        &self,
        collection: &str,
        id: &str,
        write: DocumentWrite,
    ) -> ProviderResult<()>;

    /// Creates one document under a store-assigned id.
    async fn add_document(&self, collection: &str, write: DocumentWrite) -> ProviderResult<String>;

    /// Deleting a missing document succeeds.
    async fn delete_document(&self, collection: &str, id: &str) -> ProviderResult<()>;

    /// One-shot read of a query.
    async fn query(&self, query: &QueryDescriptor) -> ProviderResult<Vec<Document>>;

    /// Registers a snapshot listener for a query.
    ///
    /// The listener receives the current result set and then one snapshot per
    /// change until the registration is removed or an error is delivered.
    fn subscribe(
        &self,
        query: &QueryDescriptor,
        listener: SnapshotListener,
    ) -> ProviderResult<ListenerRegistration>;
}
