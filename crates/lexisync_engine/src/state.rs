//! Process-wide sync state published to observers.

use lexisync_protocol::{CollectionId, Timestamp};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Kind of sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncKind {
    /// Paginate every requested collection from the first page.
    Full,
    /// Fetch changes since each collection's cursor.
    Delta,
}

impl fmt::Display for SyncKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncKind::Full => f.write_str("full"),
            SyncKind::Delta => f.write_str("delta"),
        }
    }
}

/// Status of one collection within a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "state", content = "cause")]
pub enum ProgressStatus {
    /// No run has touched the collection yet.
    #[default]
    Idle,
    /// The collection is being synced.
    Running,
    /// The collection finished without error.
    Succeeded,
    /// A transport, parse or timeout error stopped the collection.
    Failed(String),
    /// The run was cancelled before the collection finished.
    Cancelled,
}

impl ProgressStatus {
    /// Returns true once the collection can make no further progress in this run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressStatus::Succeeded | ProgressStatus::Failed(_) | ProgressStatus::Cancelled
        )
    }

    /// Returns true while the collection is running.
    pub fn is_running(&self) -> bool {
        matches!(self, ProgressStatus::Running)
    }
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressStatus::Idle => f.write_str("idle"),
            ProgressStatus::Running => f.write_str("running"),
            ProgressStatus::Succeeded => f.write_str("succeeded"),
            ProgressStatus::Failed(cause) => write!(f, "failed: {cause}"),
            ProgressStatus::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Progress of one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionProgress {
    /// Entities received so far.
    pub items_synced: u64,
    /// Entities expected, as reported by the backend.
    pub items_total: u64,
    /// Current status.
    pub status: ProgressStatus,
}

impl CollectionProgress {
    /// A fresh record for a collection that is about to run.
    pub fn running() -> Self {
        Self {
            items_synced: 0,
            items_total: 0,
            status: ProgressStatus::Running,
        }
    }
}

/// The job currently in flight, for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveJob {
    /// Job id.
    pub id: u64,
    /// Run kind.
    pub kind: SyncKind,
    /// When the job was claimed.
    pub started_at: Timestamp,
}

/// Snapshot of the sync subsystem.
///
/// # Invariants
///
/// - `is_active` implies at least one progress record is `Running`
/// - `next_scheduled_sync` is `None` while active and set once a run ends
/// - `pending_changes` drops only after a successful push
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    /// True while a run is in flight.
    pub is_active: bool,
    /// Mirrors the connectivity monitor.
    pub is_offline: bool,
    /// End of the last run in which a collection succeeded.
    pub last_sync_time: Option<Timestamp>,
    /// When the timer will next fire.
    pub next_scheduled_sync: Option<Timestamp>,
    /// Number of unpushed local mutations.
    pub pending_changes: u64,
    /// Progress of the vocabularies collection.
    pub vocabulary_progress: CollectionProgress,
    /// Progress of the resources collection.
    pub resource_progress: CollectionProgress,
    /// The job in flight, if any.
    pub active_job: Option<ActiveJob>,
}

impl SyncState {
    /// Returns the progress record of a collection.
    pub fn progress(&self, collection: CollectionId) -> &CollectionProgress {
        match collection {
            CollectionId::Vocabularies => &self.vocabulary_progress,
            CollectionId::Resources => &self.resource_progress,
        }
    }

    /// Returns the progress record of a collection for update.
    pub fn progress_mut(&mut self, collection: CollectionId) -> &mut CollectionProgress {
        match collection {
            CollectionId::Vocabularies => &mut self.vocabulary_progress,
            CollectionId::Resources => &mut self.resource_progress,
        }
    }

    /// Returns true if any collection is still running.
    pub fn any_running(&self) -> bool {
        CollectionId::ALL
            .iter()
            .any(|c| self.progress(*c).status.is_running())
    }
}

/// Single writer of [`SyncState`].
///
/// Every change is applied under the channel lock, so subscribers only ever
/// observe complete snapshots.
#[derive(Debug, Clone)]
pub struct StatePublisher {
    tx: Arc<watch::Sender<SyncState>>,
}

impl StatePublisher {
    /// Creates a publisher holding the default state.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SyncState::default());
        Self { tx: Arc::new(tx) }
    }

    /// Returns a copy of the current state.
    pub fn snapshot(&self) -> SyncState {
        self.tx.borrow().clone()
    }

    /// Subscribes to state changes.
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.tx.subscribe()
    }

    /// Applies `f` as one transition and notifies subscribers.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut SyncState),
    {
        self.tx.send_modify(f);
    }
}

impl Default for StatePublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(!ProgressStatus::Idle.is_terminal());
        assert!(!ProgressStatus::Running.is_terminal());
        assert!(ProgressStatus::Succeeded.is_terminal());
        assert!(ProgressStatus::Failed("timeout".into()).is_terminal());
        assert!(ProgressStatus::Cancelled.is_terminal());
    }

    #[test]
    fn progress_by_collection() {
        let mut state = SyncState::default();
        state.progress_mut(CollectionId::Resources).status = ProgressStatus::Running;
        assert!(state.any_running());
        assert_eq!(
            state.progress(CollectionId::Vocabularies).status,
            ProgressStatus::Idle
        );
    }

    #[tokio::test]
    async fn publisher_notifies_subscribers() {
        let publisher = StatePublisher::new();
        let mut rx = publisher.subscribe();

        publisher.update(|s| {
            s.is_active = true;
            s.pending_changes = 3;
        });

        rx.changed().await.unwrap();
        let seen = rx.borrow_and_update().clone();
        assert!(seen.is_active);
        assert_eq!(seen.pending_changes, 3);
        assert_eq!(publisher.snapshot(), seen);
    }

    #[test]
    fn status_serializes_with_cause() {
        let json = serde_json::to_value(ProgressStatus::Failed("boom".into())).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["cause"], "boom");
    }
}
