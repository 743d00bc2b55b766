//! SQLite-backed document store.
//!
//! # Responsibility
//! - Persist JSON documents per collection in one SQLite table.
//! - Answer one-shot queries and push snapshots to live query listeners.
//!
//! # Invariants
//! - Commit timestamps are strictly increasing within one store.
//! - Documents keep their creation sequence across `set` overwrites.
//! - `update` reads, merges and writes inside one transaction under the
//!   connection lock, so concurrent partial updates never drop fields.
//! - Listeners are invoked outside the connection and listener locks.
//! - A new listener receives the current result set before `subscribe` returns.

use crate::db::{open_db, open_db_in_memory, DbError, DbResult};
use crate::model::document::{Document, DocumentWrite, Fields, Timestamp};
use crate::provider::{
    DocumentStore, ListenerRegistration, ProviderError, ProviderResult, QueryDescriptor,
    SnapshotListener,
};
use async_trait::async_trait;
use log::{debug, error};
use parking_lot::{Mutex, ReentrantMutex};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

const UPSERT_SQL: &str = "INSERT INTO documents (collection, doc_id, fields, created_seq, updated_at)
VALUES (?1, ?2, ?3, (SELECT COALESCE(MAX(created_seq), 0) + 1 FROM documents), ?4)
ON CONFLICT(collection, doc_id) DO UPDATE SET
    fields = excluded.fields,
    updated_at = excluded.updated_at;";

const SELECT_ONE_SQL: &str =
    "SELECT fields FROM documents WHERE collection = ?1 AND doc_id = ?2;";

const SELECT_COLLECTION_SQL: &str =
    "SELECT doc_id, fields FROM documents WHERE collection = ?1 ORDER BY created_seq ASC;";

/// Local [`DocumentStore`] over SQLite.
#[derive(Clone)]
pub struct SqliteDocumentStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    conn: Mutex<Connection>,
    listeners: Mutex<BTreeMap<u64, (QueryDescriptor, SnapshotListener)>>,
    next_listener_id: AtomicU64,
    last_commit_millis: Mutex<i64>,
    /// Orders snapshot deliveries; re-entered when a listener writes.
    delivery: ReentrantMutex<()>,
}

impl SqliteDocumentStore {
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        Ok(Self::from_connection(open_db(path)?))
    }

    pub fn open_in_memory() -> DbResult<Self> {
        Ok(Self::from_connection(open_db_in_memory()?))
    }

    /// Wraps a connection that already has migrations applied.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                conn: Mutex::new(conn),
                listeners: Mutex::new(BTreeMap::new()),
                next_listener_id: AtomicU64::new(1),
                last_commit_millis: Mutex::new(0),
                delivery: ReentrantMutex::new(()),
            }),
        }
    }

    /// Number of live query listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    fn commit_time(&self) -> Timestamp {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as i64)
            .unwrap_or(0);
        let mut last = self.inner.last_commit_millis.lock();
        *last = now.max(*last + 1);
        Timestamp::from_millis(*last)
    }

    fn read_document(&self, collection: &str, id: &str) -> DbResult<Option<Document>> {
        let conn = self.inner.conn.lock();
        Ok(select_fields(&conn, collection, id)?.map(|fields| Document::new(id, fields)))
    }

    fn write_document(&self, collection: &str, id: &str, fields: &Fields, at: Timestamp) -> DbResult<()> {
        let conn = self.inner.conn.lock();
        upsert_fields(&conn, collection, id, fields, at)
    }

    /// Merges `write` into an existing document. `Ok(false)` when it is missing.
    fn merge_document(&self, collection: &str, id: &str, write: DocumentWrite) -> DbResult<bool> {
        let mut conn = self.inner.conn.lock();
        let tx = conn.transaction()?;
        let Some(mut fields) = select_fields(&tx, collection, id)? else {
            return Ok(false);
        };
        let at = self.commit_time();
        for (key, value) in write.resolve(at) {
            fields.insert(key, value);
        }
        upsert_fields(&tx, collection, id, &fields, at)?;
        tx.commit()?;
        Ok(true)
    }

    fn load_collection(&self, collection: &str) -> DbResult<Vec<Document>> {
        let conn = self.inner.conn.lock();
        let mut stmt = conn.prepare(SELECT_COLLECTION_SQL)?;
        let rows = stmt.query_map(params![collection], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut documents = Vec::new();
        for row in rows {
            let (id, raw) = row?;
            documents.push(Document::new(id, decode_fields(&raw)?));
        }
        Ok(documents)
    }

    fn run_query(&self, query: &QueryDescriptor) -> DbResult<Vec<Document>> {
        Ok(query.apply(self.load_collection(&query.collection)?))
    }

    /// Pushes fresh snapshots to every listener on `collection`.
    fn notify(&self, collection: &str) {
        let _delivery = self.inner.delivery.lock();
        let targets: Vec<(u64, QueryDescriptor, SnapshotListener)> = self
            .inner
            .listeners
            .lock()
            .iter()
            .filter(|(_, (query, _))| query.collection == collection)
            .map(|(id, (query, listener))| (*id, query.clone(), Arc::clone(listener)))
            .collect();

        for (id, query, listener) in targets {
            if !self.inner.listeners.lock().contains_key(&id) {
                continue;
            }
            match self.run_query(&query) {
                Ok(documents) => listener(Ok(documents)),
                Err(err) => {
                    self.inner.listeners.lock().remove(&id);
                    listener(Err(internal("snapshot", err)));
                }
            }
        }
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn get_document(&self, collection: &str, id: &str) -> ProviderResult<Option<Document>> {
        require_collection(collection)?;
        self.read_document(collection, id)
            .map_err(|err| internal("get", err))
    }

    async fn set_document(
        &self,
        collection: &str,
        id: &str,
        write: DocumentWrite,
    ) -> ProviderResult<()> {
        require_collection(collection)?;
        require_id(id)?;
        let at = self.commit_time();
        let fields = write.resolve(at);
        self.write_document(collection, id, &fields, at)
            .map_err(|err| internal("set", err))?;
        debug!("event=document_set module=local_store status=ok collection={collection}");
        self.notify(collection);
        Ok(())
    }

    async fn update_document(
        &self,
        collection: &str,
        id: &str,
        write: DocumentWrite,
    ) -> ProviderResult<()> {
        require_collection(collection)?;
        let merged = self
            .merge_document(collection, id, write)
            .map_err(|err| internal("update", err))?;
        if !merged {
            return Err(ProviderError::new(
                "not-found",
                format!("no document `{id}` in `{collection}`"),
            ));
        }
        debug!("event=document_update module=local_store status=ok collection={collection}");
        self.notify(collection);
        Ok(())
    }

    async fn add_document(&self, collection: &str, write: DocumentWrite) -> ProviderResult<String> {
        require_collection(collection)?;
        let id = Uuid::new_v4().simple().to_string();
        let at = self.commit_time();
        let fields = write.resolve(at);
        self.write_document(collection, &id, &fields, at)
            .map_err(|err| internal("add", err))?;
        debug!("event=document_add module=local_store status=ok collection={collection}");
        self.notify(collection);
        Ok(id)
    }

    async fn delete_document(&self, collection: &str, id: &str) -> ProviderResult<()> {
        require_collection(collection)?;
        let deleted = {
            let conn = self.inner.conn.lock();
            conn.execute(
                "DELETE FROM documents WHERE collection = ?1 AND doc_id = ?2;",
                params![collection, id],
            )
            .map_err(|err| internal("delete", err.into()))?
        };
        if deleted > 0 {
            debug!("event=document_delete module=local_store status=ok collection={collection}");
            self.notify(collection);
        }
        Ok(())
    }

    async fn query(&self, query: &QueryDescriptor) -> ProviderResult<Vec<Document>> {
        require_collection(&query.collection)?;
        self.run_query(query).map_err(|err| internal("query", err))
    }

    fn subscribe(
        &self,
        query: &QueryDescriptor,
        listener: SnapshotListener,
    ) -> ProviderResult<ListenerRegistration> {
        require_collection(&query.collection)?;
        let _delivery = self.inner.delivery.lock();
        let initial = self
            .run_query(query)
            .map_err(|err| internal("subscribe", err))?;

        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .lock()
            .insert(id, (query.clone(), Arc::clone(&listener)));
        debug!(
            "event=listener_add module=local_store status=ok collection={} listener_id={}",
            query.collection, id
        );

        let weak = Arc::downgrade(&self.inner);
        let registration = ListenerRegistration::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.listeners.lock().remove(&id);
            }
        });
        listener(Ok(initial));
        Ok(registration)
    }
}

fn select_fields(conn: &Connection, collection: &str, id: &str) -> DbResult<Option<Fields>> {
    let raw: Option<String> = conn
        .query_row(SELECT_ONE_SQL, params![collection, id], |row| row.get(0))
        .optional()?;
    raw.as_deref().map(decode_fields).transpose()
}

fn upsert_fields(
    conn: &Connection,
    collection: &str,
    id: &str,
    fields: &Fields,
    at: Timestamp,
) -> DbResult<()> {
    let encoded = serde_json::to_string(fields)?;
    conn.execute(UPSERT_SQL, params![collection, id, encoded, at.as_millis()])?;
    Ok(())
}

fn decode_fields(raw: &str) -> DbResult<Fields> {
    Ok(serde_json::from_str(raw)?)
}

fn require_collection(collection: &str) -> ProviderResult<()> {
    if collection.trim().is_empty() {
        return Err(ProviderError::new(
            "invalid-argument",
            "collection name cannot be empty",
        ));
    }
    Ok(())
}

fn require_id(id: &str) -> ProviderResult<()> {
    if id.trim().is_empty() {
        return Err(ProviderError::new(
            "invalid-argument",
            "document id cannot be empty",
        ));
    }
    Ok(())
}

fn internal(op: &str, err: DbError) -> ProviderError {
    error!("event=local_store_{op} module=local_store status=error error={err}");
    ProviderError::new("internal", err.to_string())
}
