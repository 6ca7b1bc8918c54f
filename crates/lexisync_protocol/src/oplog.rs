//! Queue of local mutations awaiting acknowledgement by the backend.

use crate::entity::{CollectionId, Entity, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// A local change to one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "op")]
pub enum Mutation {
    /// Entity was created or edited locally.
    Upsert {
        /// The new snapshot.
        entity: Entity,
    },
    /// Entity was deleted locally.
    Delete {
        /// Collection of the deleted entity.
        collection: CollectionId,
        /// Id of the deleted entity.
        id: String,
    },
}

impl Mutation {
    /// Creates an upsert mutation.
    pub fn upsert(entity: Entity) -> Self {
        Mutation::Upsert { entity }
    }

    /// Creates a delete mutation.
    pub fn delete(collection: CollectionId, id: impl Into<String>) -> Self {
        Mutation::Delete {
            collection,
            id: id.into(),
        }
    }

    /// Returns the affected collection.
    pub fn collection(&self) -> CollectionId {
        match self {
            Mutation::Upsert { entity } => entity.collection,
            Mutation::Delete { collection, .. } => *collection,
        }
    }

    /// Returns the affected entity id.
    pub fn entity_id(&self) -> &str {
        match self {
            Mutation::Upsert { entity } => &entity.id,
            Mutation::Delete { id, .. } => id,
        }
    }
}

/// A queued mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingChange {
    /// Queue-assigned operation id.
    pub op_id: u64,
    /// The mutation.
    pub mutation: Mutation,
    /// When the mutation was queued.
    pub queued_at: Timestamp,
}

impl PendingChange {
    /// Creates a pending change.
    pub fn new(op_id: u64, mutation: Mutation, queued_at: Timestamp) -> Self {
        Self {
            op_id,
            mutation,
            queued_at,
        }
    }
}

/// FIFO queue of unpushed local mutations.
///
/// # Invariants
///
/// - Operation ids are assigned monotonically, starting at 1
/// - Entries stay in queue order
/// - An entry leaves the queue only through [`PendingQueue::acknowledge`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingQueue {
    entries: VecDeque<PendingChange>,
    next_op_id: u64,
}

impl PendingQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            next_op_id: 1,
        }
    }

    /// Appends a mutation and returns its operation id.
    pub fn append(&mut self, mutation: Mutation, queued_at: Timestamp) -> u64 {
        let op_id = self.next_op_id;
        self.next_op_id += 1;
        self.entries
            .push_back(PendingChange::new(op_id, mutation, queued_at));
        op_id
    }

    /// Returns all pending changes in queue order.
    pub fn pending(&self) -> impl Iterator<Item = &PendingChange> {
        self.entries.iter()
    }

    /// Returns the oldest pending changes, up to a limit.
    pub fn pending_batch(&self, limit: usize) -> Vec<&PendingChange> {
        self.entries.iter().take(limit).collect()
    }

    /// Returns the number of pending changes.
    pub fn pending_count(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if any queued mutation touches the entity.
    pub fn has_pending_for(&self, collection: CollectionId, id: &str) -> bool {
        self.entries.iter().any(|c| {
            c.mutation.collection() == collection && c.mutation.entity_id() == id
        })
    }

    /// Removes the given operations and returns them.
    ///
    /// Unknown ids are ignored, so acknowledging twice is harmless.
    pub fn acknowledge(&mut self, op_ids: &[u64]) -> Vec<PendingChange> {
        let mut removed = Vec::new();
        self.entries.retain(|c| {
            if op_ids.contains(&c.op_id) {
                removed.push(c.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Returns the next operation id.
    pub fn next_op_id(&self) -> u64 {
        self.next_op_id
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for PendingQueue {
    fn default() -> Self {
        Self::new()
    }
}
