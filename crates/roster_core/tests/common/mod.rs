#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use roster_core::{
    CoreConfig, Document, DocumentStore, DocumentWrite, ListenerRegistration,
    LocalIdentityProvider, ProviderError, ProviderResult, QueryDescriptor, RegistrationInput,
    SessionManager, SqliteDocumentStore,
};
use roster_core::provider::SnapshotListener;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Local store with switchable failures and a manual snapshot feed.
pub struct FlakyStore {
    inner: SqliteDocumentStore,
    pub fail_set: AtomicBool,
    pub fail_get: AtomicBool,
    pub fail_update: AtomicBool,
    pub fail_query: AtomicBool,
    pub fail_subscribe: AtomicBool,
    pub set_calls: AtomicUsize,
    captured: Mutex<Vec<SnapshotListener>>,
    get_hook: Mutex<Option<GetHook>>,
}

type GetHook = Arc<dyn Fn() + Send + Sync>;

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: SqliteDocumentStore::open_in_memory().expect("in-memory store should open"),
            fail_set: AtomicBool::new(false),
            fail_get: AtomicBool::new(false),
            fail_update: AtomicBool::new(false),
            fail_query: AtomicBool::new(false),
            fail_subscribe: AtomicBool::new(false),
            set_calls: AtomicUsize::new(0),
            captured: Mutex::new(Vec::new()),
            get_hook: Mutex::new(None),
        })
    }

    pub fn inner(&self) -> &SqliteDocumentStore {
        &self.inner
    }

    /// Runs `hook` at the start of every later `get_document` call.
    pub fn before_get(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.get_hook.lock() = Some(Arc::new(hook));
    }

    /// Pushes a snapshot straight to every listener seen so far.
    pub fn emit(&self, documents: Vec<Document>) {
        let listeners: Vec<SnapshotListener> = self.captured.lock().clone();
        for listener in listeners {
            listener(Ok(documents.clone()));
        }
    }

    /// Pushes a terminal error to every listener seen so far.
    pub fn emit_error(&self, code: &str) {
        let listeners: Vec<SnapshotListener> = self.captured.lock().clone();
        for listener in listeners {
            listener(Err(ProviderError::new(code, "listener failed")));
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listener_count()
    }
}

fn injected(code: &str) -> ProviderError {
    ProviderError::new(code, "injected failure")
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn get_document(&self, collection: &str, id: &str) -> ProviderResult<Option<Document>> {
        let hook = self.get_hook.lock().clone();
        if let Some(hook) = hook {
            hook();
        }
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(injected("unavailable"));
        }
        self.inner.get_document(collection, id).await
    }

    async fn set_document(
        &self,
        collection: &str,
        id: &str,
        write: DocumentWrite,
    ) -> ProviderResult<()> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_set.load(Ordering::SeqCst) {
            return Err(injected("permission-denied"));
        }
        self.inner.set_document(collection, id, write).await
    }

    async fn update_document(
        &self,
        collection: &str,
        id: &str,
        write: DocumentWrite,
    ) -> ProviderResult<()> {
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(injected("unavailable"));
        }
        self.inner.update_document(collection, id, write).await
    }

    async fn add_document(&self, collection: &str, write: DocumentWrite) -> ProviderResult<String> {
        self.inner.add_document(collection, write).await
    }

    async fn delete_document(&self, collection: &str, id: &str) -> ProviderResult<()> {
        self.inner.delete_document(collection, id).await
    }

    async fn query(&self, query: &QueryDescriptor) -> ProviderResult<Vec<Document>> {
        if self.fail_query.load(Ordering::SeqCst) {
            return Err(injected("unavailable"));
        }
        self.inner.query(query).await
    }

    fn subscribe(
        &self,
        query: &QueryDescriptor,
        listener: SnapshotListener,
    ) -> ProviderResult<ListenerRegistration> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(injected("permission-denied"));
        }
        self.captured.lock().push(Arc::clone(&listener));
        self.inner.subscribe(query, listener)
    }
}

pub struct Harness {
    pub identity: Arc<LocalIdentityProvider>,
    pub store: Arc<FlakyStore>,
    pub session: Arc<SessionManager>,
}

pub fn harness() -> Harness {
    harness_with(CoreConfig::default())
}

pub fn harness_with(config: CoreConfig) -> Harness {
    let identity = Arc::new(LocalIdentityProvider::new());
    let store = FlakyStore::new();
    let session = Arc::new(SessionManager::new(
        identity.clone(),
        store.clone(),
        config,
    ));
    Harness {
        identity,
        store,
        session,
    }
}

pub fn registration(email: &str) -> RegistrationInput {
    RegistrationInput::new("Ana Pérez", email, "secret1", 25, "Software")
}

pub fn doc(id: &str, value: Value) -> Document {
    match value {
        Value::Object(fields) => Document::new(id, fields),
        _ => panic!("test document must be an object"),
    }
}
