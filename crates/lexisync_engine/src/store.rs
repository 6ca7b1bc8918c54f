//! Local entity store.
//!
//! The store owns the cached entities, the queue of unpushed local
//! mutations, remote changes staged behind those mutations, and the delta
//! cursor of every collection.
//!
//! # Merge rules
//!
//! - Remote snapshots merge last-write-wins by `updated_at`
//! - A remote change to an id with a pending local mutation is staged and
//!   replayed once the mutation is acknowledged
//! - Online-origin snapshots only fill gaps
//!
//! Every write is idempotent: re-applying an equal or older snapshot is a
//! no-op.

use crate::error::{SyncError, SyncResult};
use lexisync_protocol::{
    decide_merge, decide_online_insert, CollectionId, Entity, MergeDecision, Mutation, Origin,
    PendingChange, PendingQueue, Timestamp,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::{debug, warn};

/// Counts produced by a merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    /// Snapshots written or entities removed.
    pub applied: u64,
    /// Changes that were equal, older or already applied.
    pub skipped: u64,
    /// Changes held behind a pending local mutation.
    pub staged: u64,
}

impl MergeReport {
    /// Adds another report's counts to this one.
    pub fn absorb(&mut self, other: MergeReport) {
        self.applied += other.applied;
        self.skipped += other.skipped;
        self.staged += other.staged;
    }

    /// Total number of changes considered.
    pub fn total(&self) -> u64 {
        self.applied + self.skipped + self.staged
    }
}

/// Storage used by the sync engine.
///
/// The engine is the only writer of remote data; local edits enter through
/// [`LocalStore::enqueue_pending_change`].
pub trait LocalStore: Send + Sync + 'static {
    /// Returns the cached entity, if any.
    fn get(&self, collection: CollectionId, id: &str) -> Option<Entity>;

    /// Merges remote snapshots into a collection.
    ///
    /// Incoming entities are cached as [`Origin::Remote`] whatever origin
    /// they carry on the wire.
    fn upsert_many(&self, collection: CollectionId, entities: Vec<Entity>)
        -> SyncResult<MergeReport>;

    /// Applies remote deletions to a collection.
    fn remove_many(&self, collection: CollectionId, ids: &[String]) -> SyncResult<MergeReport>;

    /// Finds a cached vocabulary entry by word, ignoring ASCII case.
    fn find_word(&self, word: &str) -> Option<Entity>;

    /// Caches an online-origin snapshot if the id is unknown. Returns true if stored.
    fn insert_online(&self, entity: Entity) -> SyncResult<bool>;

    /// Applies a local mutation optimistically and queues it for push.
    fn enqueue_pending_change(&self, mutation: Mutation) -> SyncResult<u64>;

    /// Number of queued mutations.
    fn pending_count(&self) -> u64;

    /// Oldest queued mutations, up to `limit`.
    fn pending_batch(&self, limit: usize) -> Vec<PendingChange>;

    /// Resolves pushed mutations and replays changes staged behind them.
    fn acknowledge(&self, op_ids: &[u64]) -> SyncResult<MergeReport>;

    /// Delta cursor of a collection.
    fn cursor(&self, collection: CollectionId) -> Option<Timestamp>;

    /// Advances the delta cursor of a collection.
    fn set_cursor(&self, collection: CollectionId, cursor: Timestamp) -> SyncResult<()>;

    /// All cached entities of a collection, ordered by id.
    fn list(&self, collection: CollectionId) -> Vec<Entity>;

    /// Number of cached entities in a collection.
    fn len(&self, collection: CollectionId) -> usize;
}

/// A remote change waiting for a local mutation to resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
enum Staged {
    Upsert { entity: Entity },
    Delete,
}

#[derive(Debug, Default)]
struct Tables {
    entities: BTreeMap<CollectionId, BTreeMap<String, Entity>>,
    pending: PendingQueue,
    staged: HashMap<(CollectionId, String), Staged>,
    cursors: BTreeMap<CollectionId, Timestamp>,
}

impl Tables {
    fn table(&mut self, collection: CollectionId) -> &mut BTreeMap<String, Entity> {
        self.entities.entry(collection).or_default()
    }

    fn lookup(&self, collection: CollectionId, id: &str) -> Option<&Entity> {
        self.entities.get(&collection).and_then(|t| t.get(id))
    }

    fn merge_upsert(&mut self, entity: Entity) -> MergeDecision {
        let has_pending = self.pending.has_pending_for(entity.collection, &entity.id);
        let decision = decide_merge(
            self.lookup(entity.collection, &entity.id),
            &entity,
            has_pending,
        );
        match decision {
            MergeDecision::Apply => {
                self.table(entity.collection).insert(entity.id.clone(), entity);
            }
            MergeDecision::Stage => {
                let key = entity.id.clone();
                self.stage(entity.collection, key, Staged::Upsert { entity });
            }
            MergeDecision::KeepLocal => {}
        }
        decision
    }

    fn merge_delete(&mut self, collection: CollectionId, id: &str) -> MergeDecision {
        if self.pending.has_pending_for(collection, id) {
            self.stage(collection, id.to_string(), Staged::Delete);
            return MergeDecision::Stage;
        }
        match self.table(collection).remove(id) {
            Some(_) => MergeDecision::Apply,
            None => MergeDecision::KeepLocal,
        }
    }

    fn stage(&mut self, collection: CollectionId, id: String, change: Staged) {
        let key = (collection, id);
        if let (Some(Staged::Upsert { entity: held }), Staged::Upsert { entity: incoming }) =
            (self.staged.get(&key), &change)
        {
            if incoming.updated_at <= held.updated_at {
                return;
            }
        }
        self.staged.insert(key, change);
    }

    fn count(report: &mut MergeReport, decision: MergeDecision) {
        match decision {
            MergeDecision::Apply => report.applied += 1,
            MergeDecision::KeepLocal => report.skipped += 1,
            MergeDecision::Stage => report.staged += 1,
        }
    }
}

/// In-memory [`LocalStore`] with JSON snapshot persistence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of remote changes staged behind pending mutations.
    pub fn staged_count(&self) -> usize {
        self.tables.read().staged.len()
    }

    /// Queued mutations in order.
    pub fn pending(&self) -> Vec<PendingChange> {
        self.tables.read().pending.pending().cloned().collect()
    }

    /// Writes a JSON snapshot to `path`, replacing it atomically.
    pub fn save(&self, path: impl AsRef<Path>) -> SyncResult<()> {
        let path = path.as_ref();
        let snapshot = Snapshot::capture(&self.tables.read());
        let bytes = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| SyncError::Store(format!("failed to encode snapshot: {e}")))?;

        write_atomic(path, &bytes)?;
        debug!(path = %path.display(), "store snapshot saved");
        Ok(())
    }

    /// Restores a store from a snapshot. A missing file yields an empty store.
    pub fn load(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }
        let bytes = std::fs::read(path)?;
        let snapshot: Snapshot = serde_json::from_slice(&bytes).map_err(|e| {
            SyncError::Store(format!("failed to decode snapshot {}: {e}", path.display()))
        })?;
        Ok(Self {
            tables: RwLock::new(snapshot.restore()),
        })
    }
}

/// Writes `bytes` to a sibling temp file, syncs it, then renames it over
/// `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> SyncResult<()> {
    let mut name = path
        .file_name()
        .ok_or_else(|| SyncError::Store(format!("not a file path: {}", path.display())))?
        .to_os_string();
    name.push(".tmp");
    let tmp = path.with_file_name(name);

    let mut file = File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(&tmp, path)?;
    Ok(())
}

impl LocalStore for MemoryStore {
    fn get(&self, collection: CollectionId, id: &str) -> Option<Entity> {
        self.tables.read().lookup(collection, id).cloned()
    }

    fn upsert_many(
        &self,
        collection: CollectionId,
        entities: Vec<Entity>,
    ) -> SyncResult<MergeReport> {
        let mut report = MergeReport::default();
        let mut tables = self.tables.write();
        for entity in entities {
            if entity.collection != collection {
                warn!(%collection, id = %entity.id, "entity from another collection skipped");
                report.skipped += 1;
                continue;
            }
            let decision = tables.merge_upsert(entity.with_origin(Origin::Remote));
            Tables::count(&mut report, decision);
        }
        Ok(report)
    }

    fn remove_many(&self, collection: CollectionId, ids: &[String]) -> SyncResult<MergeReport> {
        let mut report = MergeReport::default();
        let mut tables = self.tables.write();
        for id in ids {
            let decision = tables.merge_delete(collection, id);
            Tables::count(&mut report, decision);
        }
        Ok(report)
    }

    fn find_word(&self, word: &str) -> Option<Entity> {
        let tables = self.tables.read();
        tables
            .entities
            .get(&CollectionId::Vocabularies)?
            .values()
            .find(|e| {
                e.as_vocabulary()
                    .is_some_and(|v| v.word.eq_ignore_ascii_case(word))
            })
            .cloned()
    }

    fn insert_online(&self, entity: Entity) -> SyncResult<bool> {
        entity.validate()?;
        let entity = entity.with_origin(Origin::Online);
        let mut tables = self.tables.write();
        let has_pending = tables.pending.has_pending_for(entity.collection, &entity.id);
        let decision =
            decide_online_insert(tables.lookup(entity.collection, &entity.id), has_pending);
        if decision.applies() {
            tables.table(entity.collection).insert(entity.id.clone(), entity);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn enqueue_pending_change(&self, mutation: Mutation) -> SyncResult<u64> {
        let mut tables = self.tables.write();
        let mutation = match mutation {
            Mutation::Upsert { entity } => {
                entity.validate()?;
                let entity = entity.with_origin(Origin::Local);
                tables
                    .table(entity.collection)
                    .insert(entity.id.clone(), entity.clone());
                Mutation::Upsert { entity }
            }
            Mutation::Delete { collection, id } => {
                tables.table(collection).remove(&id);
                Mutation::Delete { collection, id }
            }
        };
        let op_id = tables.pending.append(mutation, Timestamp::now());
        Ok(op_id)
    }

    fn pending_count(&self) -> u64 {
        self.tables.read().pending.pending_count() as u64
    }

    fn pending_batch(&self, limit: usize) -> Vec<PendingChange> {
        self.tables
            .read()
            .pending
            .pending_batch(limit)
            .into_iter()
            .cloned()
            .collect()
    }

    fn acknowledge(&self, op_ids: &[u64]) -> SyncResult<MergeReport> {
        let mut report = MergeReport::default();
        let mut tables = self.tables.write();
        let resolved = tables.pending.acknowledge(op_ids);

        for change in resolved {
            let collection = change.mutation.collection();
            let id = change.mutation.entity_id().to_string();
            if tables.pending.has_pending_for(collection, &id) {
                continue;
            }

            // The backend now holds the local value.
            if let Some(entity) = tables.table(collection).get_mut(&id) {
                if entity.origin == Origin::Local {
                    entity.origin = Origin::Remote;
                }
            }

            let decision = match tables.staged.remove(&(collection, id.clone())) {
                Some(Staged::Upsert { entity }) => tables.merge_upsert(entity),
                Some(Staged::Delete) => tables.merge_delete(collection, &id),
                None => continue,
            };
            Tables::count(&mut report, decision);
        }
        Ok(report)
    }

    fn cursor(&self, collection: CollectionId) -> Option<Timestamp> {
        self.tables.read().cursors.get(&collection).copied()
    }

    fn set_cursor(&self, collection: CollectionId, cursor: Timestamp) -> SyncResult<()> {
        self.tables.write().cursors.insert(collection, cursor);
        Ok(())
    }

    fn list(&self, collection: CollectionId) -> Vec<Entity> {
        self.tables
            .read()
            .entities
            .get(&collection)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    fn len(&self, collection: CollectionId) -> usize {
        self.tables
            .read()
            .entities
            .get(&collection)
            .map_or(0, BTreeMap::len)
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StagedEntry {
    collection: CollectionId,
    id: String,
    change: Staged,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot {
    #[serde(default)]
    entities: Vec<Entity>,
    #[serde(default)]
    pending: PendingQueue,
    #[serde(default)]
    staged: Vec<StagedEntry>,
    #[serde(default)]
    cursors: Vec<(CollectionId, Timestamp)>,
}

impl Snapshot {
    fn capture(tables: &Tables) -> Self {
        let mut staged: Vec<StagedEntry> = tables
            .staged
            .iter()
            .map(|((collection, id), change)| StagedEntry {
                collection: *collection,
                id: id.clone(),
                change: change.clone(),
            })
            .collect();
        staged.sort_by(|a, b| (a.collection, &a.id).cmp(&(b.collection, &b.id)));

        Self {
            entities: tables
                .entities
                .values()
                .flat_map(|t| t.values().cloned())
                .collect(),
            pending: tables.pending.clone(),
            staged,
            cursors: tables.cursors.iter().map(|(c, t)| (*c, *t)).collect(),
        }
    }

    fn restore(self) -> Tables {
        let mut tables = Tables {
            pending: self.pending,
            cursors: self.cursors.into_iter().collect(),
            ..Tables::default()
        };
        for entity in self.entities {
            tables.table(entity.collection).insert(entity.id.clone(), entity);
        }
        for entry in self.staged {
            tables.staged.insert((entry.collection, entry.id), entry.change);
        }
        tables
    }
}
