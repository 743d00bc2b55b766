//! Live collection subscriptions.
//!
//! # Responsibility
//! - Turn store snapshots into ordered, de-duplicated record lists.
//! - Report the change set between consecutive snapshots.
//! - Release store listeners on close, error, or drop.
//!
//! # Invariants
//! - Each delivery replaces the local list wholesale; no partial states.
//! - Record ids are unique within one list; the first occurrence wins.
//! - No callback starts after `close` returns.
//! - Errors end the subscription; it is never retried.

use crate::error::{CoreResult, UserFacingError};
use crate::model::document::Document;
use crate::model::fields::FieldAliasTable;
use crate::model::record::{CollectionRecord, RecordId};
use crate::provider::query::compare_by_fields;
use crate::provider::{DocumentStore, ListenerRegistration, OrderBy, ProviderResult, QueryDescriptor};
use log::{debug, info, warn};
use parking_lot::{Mutex, ReentrantMutex};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

pub type SnapshotCallback = Arc<dyn Fn(&CollectionSnapshot) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(UserFacingError) + Send + Sync>;

/// Ids that changed between two consecutive deliveries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotChanges {
    pub added: Vec<RecordId>,
    pub removed: Vec<RecordId>,
    pub modified: Vec<RecordId>,
}

impl SnapshotChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

/// One delivery: the complete current list plus what changed.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSnapshot {
    /// Starts at 1 and increases by one per delivery.
    pub sequence: u64,
    pub records: Vec<CollectionRecord>,
    pub changes: SnapshotChanges,
}

impl CollectionSnapshot {
    pub fn ids(&self) -> Vec<&str> {
        self.records.iter().map(|record| record.id.as_str()).collect()
    }
}

struct SubscriptionState {
    id: u64,
    collection: String,
    order_by: Vec<OrderBy>,
    aliases: Arc<FieldAliasTable>,
    closed: AtomicBool,
    /// Held for the whole of each delivery and by `close`.
    delivery: ReentrantMutex<()>,
    records: Mutex<Vec<CollectionRecord>>,
    sequence: AtomicU64,
    registration: Mutex<Option<ListenerRegistration>>,
    on_snapshot: SnapshotCallback,
    on_error: ErrorCallback,
}

impl SubscriptionState {
    fn deliver(&self, result: ProviderResult<Vec<Document>>) {
        let _delivery = self.delivery.lock();
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        match result {
            Ok(documents) => {
                let records = materialize(documents, &self.aliases, &self.order_by);
                let changes = {
                    let mut current = self.records.lock();
                    let changes = diff(&current, &records);
                    *current = records.clone();
                    changes
                };
                let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
                debug!(
                    "event=snapshot_deliver module=sync status=ok subscription_id={} collection={} sequence={} count={} added={} removed={} modified={}",
                    self.id,
                    self.collection,
                    sequence,
                    records.len(),
                    changes.added.len(),
                    changes.removed.len(),
                    changes.modified.len()
                );
                (self.on_snapshot)(&CollectionSnapshot {
                    sequence,
                    records,
                    changes,
                });
            }
            Err(err) => {
                let error = UserFacingError::from(&err);
                self.closed.store(true, Ordering::SeqCst);
                let registration = self.registration.lock().take();
                if let Some(registration) = registration {
                    registration.remove();
                }
                warn!(
                    "event=subscription_error module=sync status=error subscription_id={} collection={} error_category={} error_code={}",
                    self.id, self.collection, error.category, err.code
                );
                (self.on_error)(error);
            }
        }
    }

    fn close(&self) -> bool {
        let _delivery = self.delivery.lock();
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let registration = self.registration.lock().take();
        if let Some(registration) = registration {
            registration.remove();
        }
        info!(
            "event=subscription_close module=sync status=ok subscription_id={} collection={}",
            self.id, self.collection
        );
        true
    }
}

/// Owner of one live subscription. Dropping it closes the subscription.
pub struct SubscriptionHandle {
    state: Arc<SubscriptionState>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.state.id
    }

    pub fn collection(&self) -> &str {
        &self.state.collection
    }

    /// Stops deliveries and releases the store listener.
    ///
    /// Returns `true` only for the call that closed the subscription. Safe to
    /// call from inside a delivery callback.
    pub fn close(&self) -> bool {
        self.state.close()
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Copy of the most recently delivered list.
    pub fn records(&self) -> Vec<CollectionRecord> {
        self.state.records.lock().clone()
    }

    /// Number of snapshots delivered so far.
    pub fn delivered(&self) -> u64 {
        self.state.sequence.load(Ordering::SeqCst)
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.state.close();
    }
}

/// Opens live subscriptions and one-shot reads over a document store.
pub struct LiveCollectionSync {
    store: Arc<dyn DocumentStore>,
    aliases: Arc<FieldAliasTable>,
    next_id: AtomicU64,
}

impl LiveCollectionSync {
    /// Uses the people-record alias table.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self::with_aliases(store, FieldAliasTable::people_records())
    }

    pub fn with_aliases(store: Arc<dyn DocumentStore>, aliases: FieldAliasTable) -> Self {
        Self {
            store,
            aliases: Arc::new(aliases),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn aliases(&self) -> &FieldAliasTable {
        &self.aliases
    }

    /// Subscribes to `query`.
    ///
    /// `on_snapshot` receives every snapshot, the initial one included.
    /// `on_error` receives at most one error, after which the subscription is
    /// closed. When the store refuses the subscription, `on_error` runs before
    /// this returns and the handle is already closed.
    pub fn open(
        &self,
        query: &QueryDescriptor,
        on_snapshot: impl Fn(&CollectionSnapshot) + Send + Sync + 'static,
        on_error: impl Fn(UserFacingError) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(SubscriptionState {
            id,
            collection: query.collection.clone(),
            order_by: query.order_by.clone(),
            aliases: Arc::clone(&self.aliases),
            closed: AtomicBool::new(false),
            delivery: ReentrantMutex::new(()),
            records: Mutex::new(Vec::new()),
            sequence: AtomicU64::new(0),
            registration: Mutex::new(None),
            on_snapshot: Arc::new(on_snapshot),
            on_error: Arc::new(on_error),
        });

        let weak = Arc::downgrade(&state);
        let listener = Arc::new(move |result: ProviderResult<Vec<Document>>| {
            if let Some(state) = weak.upgrade() {
                state.deliver(result);
            }
        });

        match self.store.subscribe(query, listener) {
            Ok(registration) => {
                if state.closed.load(Ordering::SeqCst) {
                    registration.remove();
                } else {
                    *state.registration.lock() = Some(registration);
                }
                info!(
                    "event=subscription_open module=sync status=ok subscription_id={} collection={}",
                    id, query.collection
                );
            }
            Err(err) => {
                let error = UserFacingError::from(&err);
                state.closed.store(true, Ordering::SeqCst);
                warn!(
                    "event=subscription_open module=sync status=error subscription_id={} collection={} error_category={} error_code={}",
                    id, query.collection, error.category, err.code
                );
                (state.on_error)(error);
            }
        }

        SubscriptionHandle { state }
    }

    /// Closes a subscription; same as [`SubscriptionHandle::close`].
    pub fn close(&self, handle: &SubscriptionHandle) -> bool {
        handle.close()
    }

    /// One-shot read, mapped and ordered like a subscription snapshot.
    pub async fn fetch_once(&self, query: &QueryDescriptor) -> CoreResult<Vec<CollectionRecord>> {
        let documents = self.store.query(query).await.map_err(|err| {
            let error = UserFacingError::from(&err);
            warn!(
                "event=fetch_once module=sync status=error collection={} error_category={} error_code={}",
                query.collection, error.category, err.code
            );
            error
        })?;
        Ok(materialize(documents, &self.aliases, &query.order_by))
    }
}

/// Maps, de-duplicates and orders one snapshot.
fn materialize(
    documents: Vec<Document>,
    aliases: &FieldAliasTable,
    order_by: &[OrderBy],
) -> Vec<CollectionRecord> {
    let mut seen = HashSet::new();
    let mut records: Vec<CollectionRecord> = documents
        .into_iter()
        .filter(|document| seen.insert(document.id.clone()))
        .map(|document| CollectionRecord::from_document(document, aliases))
        .collect();

    if !order_by.is_empty() {
        let canonical: Vec<OrderBy> = order_by
            .iter()
            .map(|key| OrderBy {
                field: aliases.canonical_name(&key.field).to_string(),
                direction: key.direction,
            })
            .collect();
        records.sort_by(|a, b| compare_by_fields(&a.fields, &b.fields, &canonical));
    }
    records
}

fn diff(previous: &[CollectionRecord], current: &[CollectionRecord]) -> SnapshotChanges {
    let before: HashMap<&str, &CollectionRecord> = previous
        .iter()
        .map(|record| (record.id.as_str(), record))
        .collect();
    let after: HashSet<&str> = current.iter().map(|record| record.id.as_str()).collect();

    let mut changes = SnapshotChanges::default();
    for record in current {
        match before.get(record.id.as_str()) {
            None => changes.added.push(record.id.clone()),
            Some(old) if old.fields != record.fields => changes.modified.push(record.id.clone()),
            Some(_) => {}
        }
    }
    changes.removed = previous
        .iter()
        .filter(|record| !after.contains(record.id.as_str()))
        .map(|record| record.id.clone())
        .collect();
    changes
}
