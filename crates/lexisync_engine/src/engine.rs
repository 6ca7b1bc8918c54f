//! Sync engine.
//!
//! A run pulls every requested collection concurrently, one task per
//! collection, then pushes a batch of pending local mutations. Partial
//! failures are recorded per collection; only precondition violations are
//! returned as errors.

use crate::config::SyncConfig;
use crate::dictionary::DictionaryLookup;
use crate::error::{SyncError, SyncResult};
use crate::gateway::RemoteGateway;
use crate::state::{
    ActiveJob, CollectionProgress, ProgressStatus, StatePublisher, SyncKind, SyncState,
};
use crate::store::{LocalStore, MergeReport};
use lexisync_protocol::{
    ChangesSinceRequest, CollectionId, Entity, ListRequest, Mutation, PushRequest, Timestamp,
};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Cooperative cancellation signal shared by a job and its callers.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates an unsignalled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> SyncResult<()> {
        if self.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Statistics about sync runs.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    /// Runs that reached completion, cancelled ones included.
    pub runs_completed: u64,
    /// Runs that ended with a cancelled collection.
    pub runs_cancelled: u64,
    /// Remote snapshots and deletions written to the store.
    pub entities_applied: u64,
    /// Remote changes ignored as equal or older.
    pub stale_skipped: u64,
    /// Remote changes staged behind pending mutations.
    pub staged: u64,
    /// Pending mutations acknowledged by the backend.
    pub pushes_acknowledged: u64,
    /// Request retries.
    pub retries: u64,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of the push phase of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSummary {
    /// Mutations sent.
    pub attempted: usize,
    /// Mutations the backend stored.
    pub accepted: usize,
    /// Mutations the backend refused; they stay queued.
    pub rejected: usize,
    /// Failure of the push request, if any.
    pub error: Option<String>,
}

/// Summary of a finished run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    /// Job id.
    pub job_id: u64,
    /// Run kind.
    pub kind: SyncKind,
    /// When the job was claimed.
    pub started_at: Timestamp,
    /// When the final state was published.
    pub finished_at: Timestamp,
    /// Terminal progress of every requested collection.
    pub collections: BTreeMap<CollectionId, CollectionProgress>,
    /// Push phase result; `None` if nothing was pushed.
    pub push: Option<PushSummary>,
}

impl Outcome {
    /// Terminal status of a collection, if it was requested.
    pub fn status(&self, collection: CollectionId) -> Option<&ProgressStatus> {
        self.collections.get(&collection).map(|p| &p.status)
    }

    /// Returns true if every requested collection succeeded.
    pub fn is_success(&self) -> bool {
        self.collections
            .values()
            .all(|p| p.status == ProgressStatus::Succeeded)
    }

    /// Returns true if at least one collection succeeded.
    pub fn any_succeeded(&self) -> bool {
        self.collections
            .values()
            .any(|p| p.status == ProgressStatus::Succeeded)
    }

    /// Returns true if any collection was cancelled.
    pub fn was_cancelled(&self) -> bool {
        self.collections
            .values()
            .any(|p| p.status == ProgressStatus::Cancelled)
    }

    /// Entities received across all collections.
    pub fn items_synced(&self) -> u64 {
        self.collections.values().map(|p| p.items_synced).sum()
    }
}

/// A claimed sync run.
///
/// Produced by [`SyncEngine::begin`] and consumed by [`SyncEngine::execute`].
/// Dropping a job that never executed releases the run and publishes the
/// requested collections as cancelled.
#[derive(Debug)]
pub struct SyncJob {
    id: u64,
    kind: SyncKind,
    collections: BTreeSet<CollectionId>,
    started_at: Timestamp,
    cancel: CancelToken,
    release: Option<Release>,
}

impl SyncJob {
    /// Job id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Run kind.
    pub fn kind(&self) -> SyncKind {
        self.kind
    }

    /// Requested collections.
    pub fn collections(&self) -> &BTreeSet<CollectionId> {
        &self.collections
    }

    /// When the job was claimed.
    pub fn started_at(&self) -> Timestamp {
        self.started_at
    }

    /// The job's cancel token.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }
}

impl Drop for SyncJob {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            warn!(job = self.id, "sync job abandoned");
            release.abandon(&self.collections);
        }
    }
}

#[derive(Debug)]
struct Release {
    active: Arc<AtomicBool>,
    current: Arc<Mutex<Option<CancelToken>>>,
    state: StatePublisher,
    interval: Duration,
}

impl Release {
    fn abandon(self, collections: &BTreeSet<CollectionId>) {
        self.current.lock().take();
        let next = Timestamp::now().saturating_add(self.interval);
        let active = &self.active;
        self.state.update(|s| {
            for c in collections {
                let progress = s.progress_mut(*c);
                if !progress.status.is_terminal() {
                    progress.status = ProgressStatus::Cancelled;
                }
            }
            s.is_active = false;
            s.active_job = None;
            s.next_scheduled_sync = Some(next);
            active.store(false, Ordering::SeqCst);
        });
    }
}

/// The sync engine orchestrates runs between a gateway and a store.
///
/// At most one run is in flight at a time; the claim is taken atomically
/// before any network access.
pub struct SyncEngine<G: RemoteGateway, S: LocalStore> {
    config: SyncConfig,
    gateway: Arc<G>,
    store: Arc<S>,
    state: StatePublisher,
    active: Arc<AtomicBool>,
    current: Arc<Mutex<Option<CancelToken>>>,
    next_job_id: AtomicU64,
    stats: RwLock<SyncStats>,
}

impl<G: RemoteGateway, S: LocalStore> SyncEngine<G, S> {
    /// Creates a new sync engine.
    pub fn new(config: SyncConfig, gateway: Arc<G>, store: Arc<S>) -> SyncResult<Self> {
        config.validate()?;
        let state = StatePublisher::new();
        state.update(|s| s.pending_changes = store.pending_count());
        Ok(Self {
            config,
            gateway,
            store,
            state,
            active: Arc::new(AtomicBool::new(false)),
            current: Arc::new(Mutex::new(None)),
            next_job_id: AtomicU64::new(1),
            stats: RwLock::new(SyncStats::default()),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the gateway.
    pub fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    /// Returns the store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Returns the current state snapshot.
    pub fn state(&self) -> SyncState {
        self.state.snapshot()
    }

    /// Subscribes to state changes.
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns true while a run is in flight.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Mirrors connectivity into the published state.
    pub fn set_offline(&self, offline: bool) {
        self.state.update(|s| s.is_offline = offline);
    }

    /// Publishes the next timer deadline. Ignored while a run is active.
    pub fn schedule_next(&self, at: Timestamp) {
        self.state.update(|s| {
            if !s.is_active {
                s.next_scheduled_sync = Some(at);
            }
        });
    }

    /// Signals the active job's token. Returns false when idle.
    pub fn cancel(&self) -> bool {
        match self.current.lock().as_ref() {
            Some(token) => {
                info!("sync cancellation requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Claims a run.
    ///
    /// Fails with [`SyncError::EmptyCollections`] for an empty set and with
    /// [`SyncError::AlreadyRunning`] while another run is in flight.
    pub fn begin(
        &self,
        kind: SyncKind,
        collections: impl IntoIterator<Item = CollectionId>,
        cancel: CancelToken,
    ) -> SyncResult<SyncJob> {
        let collections: BTreeSet<CollectionId> = collections.into_iter().collect();
        if collections.is_empty() {
            return Err(SyncError::EmptyCollections);
        }
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(%kind, "sync rejected, a run is active");
            return Err(SyncError::AlreadyRunning);
        }

        let id = self.next_job_id.fetch_add(1, Ordering::SeqCst);
        let started_at = Timestamp::now();
        *self.current.lock() = Some(cancel.clone());

        self.state.update(|s| {
            s.is_active = true;
            s.next_scheduled_sync = None;
            s.active_job = Some(ActiveJob {
                id,
                kind,
                started_at,
            });
            for c in &collections {
                *s.progress_mut(*c) = CollectionProgress::running();
            }
        });
        info!(job = id, %kind, collections = collections.len(), "sync started");

        Ok(SyncJob {
            id,
            kind,
            collections,
            started_at,
            cancel,
            release: Some(Release {
                active: Arc::clone(&self.active),
                current: Arc::clone(&self.current),
                state: self.state.clone(),
                interval: self.config.sync_interval,
            }),
        })
    }

    /// Claims and executes a run.
    pub async fn run_sync(
        self: &Arc<Self>,
        kind: SyncKind,
        collections: impl IntoIterator<Item = CollectionId>,
        cancel: CancelToken,
    ) -> SyncResult<Outcome> {
        let job = self.begin(kind, collections, cancel)?;
        Ok(self.execute(job).await)
    }

    /// Executes a claimed run to completion.
    pub async fn execute(self: &Arc<Self>, mut job: SyncJob) -> Outcome {
        let mut tasks = JoinSet::new();
        for &collection in &job.collections {
            let engine = Arc::clone(self);
            let token = job.cancel.clone();
            let kind = job.kind;
            tasks.spawn(async move {
                let progress = engine.sync_collection(kind, collection, &token).await;
                (collection, progress)
            });
        }

        let mut results = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((collection, progress)) => {
                    results.insert(collection, progress);
                }
                Err(e) => warn!(error = %e, "collection task failed"),
            }
        }
        for c in &job.collections {
            results.entry(*c).or_insert_with(|| CollectionProgress {
                status: ProgressStatus::Failed("collection task failed".into()),
                ..CollectionProgress::default()
            });
        }

        let push = if job.cancel.is_cancelled() {
            None
        } else {
            self.push_phase(&job.cancel).await
        };

        // The run completes here; the drop guard must not fire.
        job.release = None;
        self.finish(&job, results, push)
    }

    /// Applies a local edit optimistically and queues it for push.
    pub fn enqueue_local_change(&self, mutation: Mutation) -> SyncResult<u64> {
        let op_id = self.store.enqueue_pending_change(mutation)?;
        // Read under the watch lock so publications follow queue order.
        let mut pending = 0;
        self.state.update(|s| {
            pending = self.store.pending_count();
            s.pending_changes = pending;
        });
        debug!(op_id, pending, "local change queued");
        Ok(op_id)
    }

    /// Looks a word up locally, then through `dictionary`.
    ///
    /// An online result is cached only if no entity with its id exists.
    pub async fn lookup_word<D: DictionaryLookup>(
        &self,
        dictionary: &D,
        word: &str,
    ) -> SyncResult<Option<Entity>> {
        let needle = word.trim();
        let local = self.store.find_word(needle);
        if local.is_some() {
            return Ok(local);
        }

        let Some(entity) = dictionary.lookup(needle).await else {
            debug!(word = needle, "dictionary lookup found nothing");
            return Ok(None);
        };
        if self.store.insert_online(entity.clone())? {
            Ok(Some(entity))
        } else {
            Ok(self.store.get(entity.collection, &entity.id))
        }
    }

    async fn sync_collection(
        &self,
        kind: SyncKind,
        collection: CollectionId,
        token: &CancelToken,
    ) -> CollectionProgress {
        let mut progress = CollectionProgress::running();
        let result = match kind {
            SyncKind::Full => self.full_sync(collection, token, &mut progress).await,
            SyncKind::Delta => self.delta_sync(collection, token, &mut progress).await,
        };

        progress.status = match result {
            Ok(()) => ProgressStatus::Succeeded,
            Err(SyncError::Cancelled) => {
                info!(%collection, synced = progress.items_synced, "collection cancelled");
                ProgressStatus::Cancelled
            }
            Err(e) => {
                warn!(%collection, error = %e, "collection sync failed");
                self.stats.write().last_error = Some(e.to_string());
                ProgressStatus::Failed(e.to_string())
            }
        };
        self.publish_terminal(collection, &progress);
        progress
    }

    async fn full_sync(
        &self,
        collection: CollectionId,
        token: &CancelToken,
        progress: &mut CollectionProgress,
    ) -> SyncResult<()> {
        let limit = self.config.page_size;
        let mut page = 0u32;
        loop {
            token.check()?;
            let request = ListRequest::new(collection, page, limit);
            let fetched = self.call(token, || self.gateway.list(&request)).await?;
            if token.is_cancelled() {
                debug!(%collection, page, "discarding page fetched after cancel");
                return Err(SyncError::Cancelled);
            }

            let received = fetched.items.len();
            let report = self.store.upsert_many(collection, fetched.items)?;
            self.record_merge(report);

            progress.items_synced += received as u64;
            progress.items_total = fetched.total.max(progress.items_synced);
            self.publish_progress(collection, progress);
            debug!(%collection, page, received, applied = report.applied, "page merged");

            if received < limit as usize {
                return Ok(());
            }
            page += 1;
        }
    }

    async fn delta_sync(
        &self,
        collection: CollectionId,
        token: &CancelToken,
        progress: &mut CollectionProgress,
    ) -> SyncResult<()> {
        token.check()?;
        let since = self.store.cursor(collection).unwrap_or(Timestamp::EPOCH);
        let request = ChangesSinceRequest::new(collection, since);
        let changes = self
            .call(token, || self.gateway.changes_since(&request))
            .await?;
        token.check()?;

        let received = (changes.upserts.len() + changes.deletions.len()) as u64;
        progress.items_total = received;

        let mut report = self.store.upsert_many(collection, changes.upserts)?;
        report.absorb(self.store.remove_many(collection, &changes.deletions)?);
        self.record_merge(report);

        progress.items_synced = received;
        self.publish_progress(collection, progress);
        debug!(%collection, %since, received, applied = report.applied, "changes merged");
        Ok(())
    }

    async fn push_phase(&self, token: &CancelToken) -> Option<PushSummary> {
        let batch = self.store.pending_batch(self.config.push_batch_size as usize);
        if batch.is_empty() {
            return None;
        }

        let attempted = batch.len();
        let request = PushRequest::new(batch);
        let mut summary = PushSummary {
            attempted,
            ..PushSummary::default()
        };

        match self
            .call(token, || self.gateway.push_pending(&request))
            .await
        {
            Ok(result) => {
                summary.accepted = result.accepted.len();
                summary.rejected = result.rejected.len();
                match self.store.acknowledge(&result.accepted) {
                    Ok(replayed) => self.record_merge(replayed),
                    Err(e) => {
                        warn!(error = %e, "failed to acknowledge pushed changes");
                        summary.error = Some(e.to_string());
                    }
                }
                self.stats.write().pushes_acknowledged += summary.accepted as u64;
                info!(attempted, accepted = summary.accepted, rejected = summary.rejected, "push finished");
            }
            Err(e) => {
                warn!(attempted, error = %e, "push failed");
                self.stats.write().last_error = Some(e.to_string());
                summary.error = Some(e.to_string());
            }
        }
        Some(summary)
    }

    /// Runs a gateway request under the per-request timeout, retrying
    /// retryable failures with backoff.
    async fn call<T, F, Fut>(&self, token: &CancelToken, mut op: F) -> SyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let retry = &self.config.retry;
        let timeout = self.config.request_timeout;
        let mut attempt = 0u32;
        loop {
            let result = match tokio::time::timeout(timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(SyncError::Timeout(timeout)),
            };
            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt + 1 < retry.max_attempts => {
                    attempt += 1;
                    self.stats.write().retries += 1;
                    let delay = retry.delay_for_attempt(attempt);
                    debug!(attempt, ?delay, error = %e, "retrying request");
                    tokio::time::sleep(delay).await;
                    token.check()?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn record_merge(&self, report: MergeReport) {
        let mut stats = self.stats.write();
        stats.entities_applied += report.applied;
        stats.stale_skipped += report.skipped;
        stats.staged += report.staged;
    }

    fn publish_progress(&self, collection: CollectionId, progress: &CollectionProgress) {
        self.state.update(|s| {
            let slot = s.progress_mut(collection);
            slot.items_synced = progress.items_synced;
            slot.items_total = progress.items_total;
        });
    }

    /// Publishes a terminal status unless this is the last running
    /// collection, whose status lands with the final transition.
    fn publish_terminal(&self, collection: CollectionId, progress: &CollectionProgress) {
        self.state.update(|s| {
            let others_running = CollectionId::ALL
                .iter()
                .any(|c| *c != collection && s.progress(*c).status.is_running());
            let slot = s.progress_mut(collection);
            slot.items_synced = progress.items_synced;
            slot.items_total = progress.items_total;
            if others_running {
                slot.status = progress.status.clone();
            }
        });
    }

    fn finish(
        &self,
        job: &SyncJob,
        results: BTreeMap<CollectionId, CollectionProgress>,
        push: Option<PushSummary>,
    ) -> Outcome {
        for (collection, progress) in &results {
            if progress.status == ProgressStatus::Succeeded {
                if let Err(e) = self.store.set_cursor(*collection, job.started_at) {
                    warn!(%collection, error = %e, "failed to advance cursor");
                }
            }
        }

        let finished_at = Timestamp::now();
        let any_succeeded = results
            .values()
            .any(|p| p.status == ProgressStatus::Succeeded);
        let cancelled = results
            .values()
            .any(|p| p.status == ProgressStatus::Cancelled);
        let next = finished_at.saturating_add(self.config.sync_interval);

        {
            let mut stats = self.stats.write();
            stats.runs_completed += 1;
            if cancelled {
                stats.runs_cancelled += 1;
            }
        }

        self.current.lock().take();
        let active = &self.active;
        let store = &self.store;
        let mut pending = 0;
        self.state.update(|s| {
            pending = store.pending_count();
            for (collection, progress) in &results {
                *s.progress_mut(*collection) = progress.clone();
            }
            s.is_active = false;
            s.active_job = None;
            s.next_scheduled_sync = Some(next);
            if any_succeeded {
                s.last_sync_time = Some(finished_at);
            }
            s.pending_changes = pending;
            active.store(false, Ordering::SeqCst);
        });

        info!(
            job = job.id,
            kind = %job.kind,
            succeeded = any_succeeded,
            cancelled,
            pending,
            "sync finished"
        );

        Outcome {
            job_id: job.id,
            kind: job.kind,
            started_at: job.started_at,
            finished_at,
            collections: results,
            push,
        }
    }
}

impl<G: RemoteGateway, S: LocalStore> std::fmt::Debug for SyncEngine<G, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.config)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::gateway::{FailureMode, MemoryGateway, PushMode};
    use crate::store::MemoryStore;
    use lexisync_protocol::{Resource, Vocabulary};

    const V: CollectionId = CollectionId::Vocabularies;
    const R: CollectionId = CollectionId::Resources;

    fn vocab(id: &str, ts: u64) -> Entity {
        Entity::vocabulary(
            id,
            Timestamp(ts),
            Vocabulary {
                word: id.into(),
                translation: "t".into(),
                ..Default::default()
            },
        )
    }

    fn resource(id: &str, ts: u64) -> Entity {
        Entity::resource(
            id,
            Timestamp(ts),
            Resource {
                title: id.into(),
                ..Default::default()
            },
        )
    }

    fn engine(
        gateway: MemoryGateway,
        page_size: u32,
    ) -> Arc<SyncEngine<MemoryGateway, MemoryStore>> {
        let config = SyncConfig::new("memory://")
            .with_page_size(page_size)
            .with_retry(RetryConfig::no_retry());
        Arc::new(SyncEngine::new(config, Arc::new(gateway), Arc::new(MemoryStore::new())).unwrap())
    }

    #[test]
    fn new_rejects_invalid_config() {
        let config = SyncConfig::new("memory://").with_page_size(0);
        let result = SyncEngine::new(
            config,
            Arc::new(MemoryGateway::new()),
            Arc::new(MemoryStore::new()),
        );
        assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
    }

    #[test]
    fn begin_rejects_empty_set_and_second_claim() {
        let engine = engine(MemoryGateway::new(), 10);
        assert_eq!(
            engine
                .begin(SyncKind::Full, Vec::new(), CancelToken::new())
                .unwrap_err(),
            SyncError::EmptyCollections
        );

        let job = engine.begin(SyncKind::Full, [V], CancelToken::new()).unwrap();
        assert!(engine.state().is_active);
        assert!(engine.state().next_scheduled_sync.is_none());
        assert_eq!(
            engine.begin(SyncKind::Delta, [R], CancelToken::new()).unwrap_err(),
            SyncError::AlreadyRunning
        );
        drop(job);
    }

    #[test]
    fn dropped_job_releases_claim() {
        let engine = engine(MemoryGateway::new(), 10);
        let job = engine.begin(SyncKind::Full, [V, R], CancelToken::new()).unwrap();
        drop(job);

        let state = engine.state();
        assert!(!state.is_active);
        assert!(state.next_scheduled_sync.is_some());
        assert_eq!(state.vocabulary_progress.status, ProgressStatus::Cancelled);
        assert!(!engine.cancel());
        assert!(engine.begin(SyncKind::Full, [V], CancelToken::new()).is_ok());
    }

    #[tokio::test]
    async fn full_sync_paginates_and_counts() {
        let gateway = MemoryGateway::with_entities((0..25).map(|i| vocab(&format!("v{i:02}"), 1)));
        let engine = engine(gateway, 10);

        let outcome = engine
            .run_sync(SyncKind::Full, [V], CancelToken::new())
            .await
            .unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.collections[&V].items_synced, 25);
        assert_eq!(outcome.collections[&V].items_total, 25);
        assert_eq!(engine.gateway().list_calls(), 3);
        assert_eq!(engine.store().len(V), 25);
        assert_eq!(engine.stats().entities_applied, 25);
    }

    #[tokio::test]
    async fn exact_multiple_ends_on_empty_page() {
        let gateway = MemoryGateway::with_entities((0..20).map(|i| vocab(&format!("v{i:02}"), 1)));
        let engine = engine(gateway, 10);
        engine
            .run_sync(SyncKind::Full, [V], CancelToken::new())
            .await
            .unwrap();
        assert_eq!(engine.gateway().list_calls(), 3);
    }

    #[tokio::test]
    async fn delta_uses_and_advances_cursor() {
        let gateway = MemoryGateway::with_entities([vocab("a", 5), vocab("b", 7)]);
        let engine = engine(gateway, 10);

        let outcome = engine
            .run_sync(SyncKind::Delta, [V], CancelToken::new())
            .await
            .unwrap();
        assert!(outcome.is_success());
        assert_eq!(engine.store().len(V), 2);
        assert_eq!(engine.store().cursor(V), Some(outcome.started_at));

        engine.gateway().delete(V, "a", Timestamp::now().saturating_add(Duration::from_secs(60)));
        engine
            .run_sync(SyncKind::Delta, [V], CancelToken::new())
            .await
            .unwrap();
        assert!(engine.store().get(V, "a").is_none());
    }

    #[tokio::test]
    async fn failed_collection_keeps_cursor() {
        let gateway = MemoryGateway::with_entities([resource("r1", 1)]);
        gateway.fail_collection(R, FailureMode::Parse("garbage".into()));
        let engine = engine(gateway, 10);

        let outcome = engine
            .run_sync(SyncKind::Delta, [R], CancelToken::new())
            .await
            .unwrap();
        assert!(matches!(outcome.status(R), Some(ProgressStatus::Failed(_))));
        assert_eq!(engine.store().cursor(R), None);
        assert!(engine.state().last_sync_time.is_none());
        assert!(!engine.state().is_active);
    }

    #[tokio::test]
    async fn push_acknowledges_accepted_changes() {
        let engine = engine(MemoryGateway::new(), 10);
        engine
            .enqueue_local_change(Mutation::upsert(vocab("mine", 3)))
            .unwrap();
        assert_eq!(engine.state().pending_changes, 1);

        let outcome = engine
            .run_sync(SyncKind::Delta, [V], CancelToken::new())
            .await
            .unwrap();
        let push = outcome.push.unwrap();
        assert_eq!(push.accepted, 1);
        assert_eq!(engine.state().pending_changes, 0);
        assert!(engine.gateway().get(V, "mine").is_some());
    }

    #[tokio::test]
    async fn rejected_changes_stay_queued() {
        let gateway = MemoryGateway::new();
        gateway.set_push_mode(PushMode::RejectAll);
        let engine = engine(gateway, 10);
        engine
            .enqueue_local_change(Mutation::upsert(vocab("mine", 3)))
            .unwrap();

        let outcome = engine
            .run_sync(SyncKind::Delta, [V], CancelToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.push.unwrap().rejected, 1);
        assert_eq!(engine.state().pending_changes, 1);
    }

    #[tokio::test]
    async fn push_failure_does_not_fail_collections() {
        let gateway = MemoryGateway::new();
        gateway.set_push_mode(PushMode::Fail("503".into()));
        let engine = engine(gateway, 10);
        engine
            .enqueue_local_change(Mutation::upsert(vocab("mine", 3)))
            .unwrap();

        let outcome = engine
            .run_sync(SyncKind::Delta, [V], CancelToken::new())
            .await
            .unwrap();
        assert!(outcome.is_success());
        assert!(outcome.push.unwrap().error.is_some());
        assert_eq!(engine.state().pending_changes, 1);
    }

    #[tokio::test]
    async fn lookup_word_prefers_local_and_caches_online() {
        struct Fixed;
        impl DictionaryLookup for Fixed {
            async fn lookup(&self, word: &str) -> Option<Entity> {
                Some(
                    Entity::vocabulary(
                        crate::dictionary::online_id(word),
                        Timestamp(1),
                        Vocabulary {
                            word: word.into(),
                            translation: "online".into(),
                            ..Default::default()
                        },
                    )
                    .with_origin(lexisync_protocol::Origin::Online),
                )
            }
        }

        let engine = engine(MemoryGateway::new(), 10);
        engine.store().upsert_many(V, vec![vocab("perro", 1)]).unwrap();

        let local = engine.lookup_word(&Fixed, "Perro").await.unwrap().unwrap();
        assert_eq!(local.id, "perro");

        let online = engine.lookup_word(&Fixed, "gato").await.unwrap().unwrap();
        assert_eq!(online.id, "online-gato");
        assert_eq!(
            engine.store().get(V, "online-gato").unwrap().origin,
            lexisync_protocol::Origin::Online
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn published_pending_count_tracks_concurrent_edits() {
        let gateway = MemoryGateway::with_entities((0..30).map(|i| vocab(&format!("v{i:02}"), 1)));
        gateway.set_push_mode(PushMode::RejectAll);
        let engine = engine(gateway, 5);

        let editor = {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                for i in 0..200 {
                    engine
                        .enqueue_local_change(Mutation::upsert(vocab(&format!("l{i:03}"), 2)))
                        .unwrap();
                }
            })
        };
        for _ in 0..10 {
            engine
                .run_sync(SyncKind::Full, [V], CancelToken::new())
                .await
                .unwrap();
        }
        editor.join().unwrap();

        // Nothing is ever accepted, so the last publication must see every edit.
        assert_eq!(engine.state().pending_changes, 200);
        assert_eq!(engine.store().pending_count(), 200);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fails_collection() {
        let gateway = MemoryGateway::with_entities([vocab("a", 1)]);
        gateway.fail_collection(V, FailureMode::Timeout);
        let engine = engine(gateway, 10);

        let outcome = engine
            .run_sync(SyncKind::Full, [V], CancelToken::new())
            .await
            .unwrap();
        match outcome.status(V) {
            Some(ProgressStatus::Failed(cause)) => assert!(cause.contains("timed out")),
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_retryable_errors() {
        let gateway = MemoryGateway::with_entities([vocab("a", 1)]);
        gateway.fail_collection(V, FailureMode::Transport("reset".into()));
        let config = SyncConfig::new("memory://").with_retry(
            RetryConfig::new(3)
                .with_initial_delay(Duration::from_millis(10))
                .with_jitter(false),
        );
        let engine = Arc::new(
            SyncEngine::new(config, Arc::new(gateway), Arc::new(MemoryStore::new())).unwrap(),
        );

        let outcome = engine
            .run_sync(SyncKind::Full, [V], CancelToken::new())
            .await
            .unwrap();
        assert!(matches!(outcome.status(V), Some(ProgressStatus::Failed(_))));
        assert_eq!(engine.gateway().list_calls(), 3);
        assert_eq!(engine.stats().retries, 2);
    }
}
