//! Remote gateway abstraction.

use crate::error::{SyncError, SyncResult};
use crate::store::write_atomic;
use lexisync_protocol::{
    ChangeSet, ChangesSinceRequest, CollectionId, Entity, ListPage, ListRequest, Mutation, Origin,
    PendingChange, PushRequest, PushResult, Timestamp,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Stateless request functions against the remote backend.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, an in-memory backend for tests and fixtures).
pub trait RemoteGateway: Send + Sync + 'static {
    /// Fetches one page of a collection.
    fn list(&self, request: &ListRequest) -> impl Future<Output = SyncResult<ListPage>> + Send;

    /// Fetches the changes of a collection since a timestamp.
    fn changes_since(
        &self,
        request: &ChangesSinceRequest,
    ) -> impl Future<Output = SyncResult<ChangeSet>> + Send;

    /// Pushes queued local mutations.
    fn push_pending(
        &self,
        request: &PushRequest,
    ) -> impl Future<Output = SyncResult<PushResult>> + Send;
}

/// Injected failure for a collection of a [`MemoryGateway`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureMode {
    /// Requests fail with a retryable transport error.
    Transport(String),
    /// Requests fail with a parse error.
    Parse(String),
    /// Requests never complete.
    Timeout,
}

/// How a [`MemoryGateway`] answers pushes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PushMode {
    /// Accept and store every change.
    #[default]
    AcceptAll,
    /// Reject every change.
    RejectAll,
    /// Fail the request with a transport error.
    Fail(String),
}

type ListHook = Arc<dyn Fn(&ListRequest) + Send + Sync>;

/// A deleted entity as seen by `changes_since`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tombstone {
    /// Collection of the deleted entity.
    pub collection: CollectionId,
    /// Id of the deleted entity.
    pub id: String,
    /// Deletion time.
    pub deleted_at: Timestamp,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Fixture {
    #[serde(default)]
    entities: Vec<Entity>,
    #[serde(default)]
    tombstones: Vec<Tombstone>,
}

#[derive(Debug, Default)]
struct Backend {
    entities: BTreeMap<CollectionId, BTreeMap<String, Entity>>,
    tombstones: Vec<Tombstone>,
    failures: HashMap<CollectionId, FailureMode>,
    push_mode: PushMode,
    pushed: Vec<PendingChange>,
}

impl Backend {
    fn check(&self, collection: CollectionId) -> Option<FailureMode> {
        self.failures.get(&collection).cloned()
    }

    fn table(&self, collection: CollectionId) -> impl Iterator<Item = &Entity> {
        self.entities.get(&collection).into_iter().flat_map(|t| t.values())
    }

    fn put(&mut self, entity: Entity) {
        self.tombstones
            .retain(|t| !(t.collection == entity.collection && t.id == entity.id));
        self.entities
            .entry(entity.collection)
            .or_default()
            .insert(entity.id.clone(), entity);
    }

    fn remove(&mut self, collection: CollectionId, id: &str, at: Timestamp) {
        if let Some(table) = self.entities.get_mut(&collection) {
            table.remove(id);
        }
        self.tombstones.push(Tombstone {
            collection,
            id: id.to_string(),
            deleted_at: at,
        });
    }
}

/// In-memory backend.
///
/// Serves paging, filtering and change feeds over a set of entities and
/// supports per-collection failure injection. Used by tests and by the CLI
/// as a fixture backend.
#[derive(Default)]
pub struct MemoryGateway {
    backend: RwLock<Backend>,
    list_hook: RwLock<Option<ListHook>>,
    latency: RwLock<Option<Duration>>,
    list_calls: AtomicU64,
    changes_calls: AtomicU64,
    push_calls: AtomicU64,
}

impl MemoryGateway {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend holding `entities`.
    pub fn with_entities(entities: impl IntoIterator<Item = Entity>) -> Self {
        let gateway = Self::new();
        gateway.insert_many(entities);
        gateway
    }

    /// Parses a JSON fixture.
    pub fn from_json(bytes: &[u8]) -> SyncResult<Self> {
        let fixture: Fixture = serde_json::from_slice(bytes)
            .map_err(|e| SyncError::Parse(format!("invalid fixture: {e}")))?;
        let gateway = Self::new();
        {
            let mut backend = gateway.backend.write();
            for entity in fixture.entities {
                entity.validate()?;
                backend.put(entity);
            }
            backend.tombstones = fixture.tombstones;
        }
        Ok(gateway)
    }

    /// Loads a JSON fixture from disk.
    pub fn load_fixture(path: impl AsRef<Path>) -> SyncResult<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_json(&bytes)
    }

    /// Serializes the backend contents as a JSON fixture.
    pub fn to_json(&self) -> SyncResult<Vec<u8>> {
        let backend = self.backend.read();
        let fixture = Fixture {
            entities: backend
                .entities
                .values()
                .flat_map(|t| t.values().cloned())
                .collect(),
            tombstones: backend.tombstones.clone(),
        };
        serde_json::to_vec_pretty(&fixture)
            .map_err(|e| SyncError::Store(format!("failed to encode fixture: {e}")))
    }

    /// Writes the backend contents to disk, replacing the file atomically.
    pub fn save_fixture(&self, path: impl AsRef<Path>) -> SyncResult<()> {
        write_atomic(path.as_ref(), &self.to_json()?)
    }

    /// Inserts or replaces an entity.
    pub fn insert(&self, entity: Entity) {
        self.backend.write().put(entity);
    }

    /// Inserts or replaces several entities.
    pub fn insert_many(&self, entities: impl IntoIterator<Item = Entity>) {
        let mut backend = self.backend.write();
        for entity in entities {
            backend.put(entity);
        }
    }

    /// Deletes an entity, leaving a tombstone stamped `at`.
    pub fn delete(&self, collection: CollectionId, id: &str, at: Timestamp) {
        self.backend.write().remove(collection, id, at);
    }

    /// Makes every request for `collection` fail.
    pub fn fail_collection(&self, collection: CollectionId, mode: FailureMode) {
        self.backend.write().failures.insert(collection, mode);
    }

    /// Removes an injected failure.
    pub fn clear_failure(&self, collection: CollectionId) {
        self.backend.write().failures.remove(&collection);
    }

    /// Sets how pushes are answered.
    pub fn set_push_mode(&self, mode: PushMode) {
        self.backend.write().push_mode = mode;
    }

    /// Installs a hook invoked on every list request before it is answered.
    pub fn set_list_hook<F>(&self, hook: F)
    where
        F: Fn(&ListRequest) + Send + Sync + 'static,
    {
        *self.list_hook.write() = Some(Arc::new(hook));
    }

    /// Delays every response.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.write() = Some(latency);
    }

    /// Number of list requests served.
    pub fn list_calls(&self) -> u64 {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Number of change-feed requests served.
    pub fn changes_calls(&self) -> u64 {
        self.changes_calls.load(Ordering::SeqCst)
    }

    /// Number of push requests served.
    pub fn push_calls(&self) -> u64 {
        self.push_calls.load(Ordering::SeqCst)
    }

    /// Every change received through a push, accepted or not.
    pub fn pushed(&self) -> Vec<PendingChange> {
        self.backend.read().pushed.clone()
    }

    /// Returns the stored entity, if any.
    pub fn get(&self, collection: CollectionId, id: &str) -> Option<Entity> {
        self.backend
            .read()
            .entities
            .get(&collection)
            .and_then(|t| t.get(id))
            .cloned()
    }

    /// Number of entities in a collection.
    pub fn len(&self, collection: CollectionId) -> usize {
        self.backend.read().table(collection).count()
    }

    /// Returns true if the backend holds no entities.
    pub fn is_empty(&self) -> bool {
        self.backend.read().entities.values().all(BTreeMap::is_empty)
    }

    async fn delay(&self) {
        let latency = *self.latency.read();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    async fn fail(mode: FailureMode) -> SyncError {
        match mode {
            FailureMode::Transport(message) => SyncError::transport_retryable(message),
            FailureMode::Parse(message) => SyncError::Parse(message),
            FailureMode::Timeout => std::future::pending().await,
        }
    }
}

impl RemoteGateway for MemoryGateway {
    async fn list(&self, request: &ListRequest) -> SyncResult<ListPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let hook = self.list_hook.read().clone();
        if let Some(hook) = hook {
            hook(request);
        }
        self.delay().await;

        let failure = self.backend.read().check(request.collection);
        if let Some(mode) = failure {
            return Err(Self::fail(mode).await);
        }

        let backend = self.backend.read();
        let matching: Vec<&Entity> = backend
            .table(request.collection)
            .filter(|e| request.filter.matches(e))
            .collect();
        let total = matching.len() as u64;
        let start = (request.page as usize).saturating_mul(request.limit as usize);
        let items = matching
            .into_iter()
            .skip(start)
            .take(request.limit as usize)
            .cloned()
            .collect();
        Ok(ListPage::new(items, total))
    }

    async fn changes_since(&self, request: &ChangesSinceRequest) -> SyncResult<ChangeSet> {
        self.changes_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;

        let failure = self.backend.read().check(request.collection);
        if let Some(mode) = failure {
            return Err(Self::fail(mode).await);
        }

        let backend = self.backend.read();
        let upserts = backend
            .table(request.collection)
            .filter(|e| e.updated_at > request.since)
            .cloned()
            .collect();
        let deletions = backend
            .tombstones
            .iter()
            .filter(|t| t.collection == request.collection && t.deleted_at > request.since)
            .map(|t| t.id.clone())
            .collect();
        Ok(ChangeSet::new(upserts, deletions))
    }

    async fn push_pending(&self, request: &PushRequest) -> SyncResult<PushResult> {
        self.push_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;

        let mut backend = self.backend.write();
        backend.pushed.extend(request.changes.iter().cloned());
        match backend.push_mode.clone() {
            PushMode::AcceptAll => {
                for change in &request.changes {
                    match &change.mutation {
                        Mutation::Upsert { entity } => {
                            backend.put(entity.clone().with_origin(Origin::Remote));
                        }
                        Mutation::Delete { collection, id } => {
                            backend.remove(*collection, id, change.queued_at);
                        }
                    }
                }
                Ok(PushResult::accept_all(request))
            }
            PushMode::RejectAll => Ok(PushResult {
                accepted: Vec::new(),
                rejected: request.changes.iter().map(|c| c.op_id).collect(),
            }),
            PushMode::Fail(message) => Err(SyncError::transport_retryable(message)),
        }
    }
}

impl std::fmt::Debug for MemoryGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryGateway")
            .field("list_calls", &self.list_calls())
            .field("changes_calls", &self.changes_calls())
            .field("push_calls", &self.push_calls())
            .finish_non_exhaustive()
    }
}
