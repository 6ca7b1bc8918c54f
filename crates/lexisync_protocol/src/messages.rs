//! Protocol messages exchanged with the remote backend.

use crate::entity::{CollectionId, Entity, Timestamp};
use crate::error::{ProtocolError, ProtocolResult};
use crate::oplog::PendingChange;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

fn encode<T: Serialize>(value: &T) -> ProtocolResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(ProtocolError::encoding)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    serde_json::from_slice(bytes).map_err(ProtocolError::decoding)
}

/// Filters accepted by the list endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFilter {
    /// Free-text search.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    /// Part of speech (vocabularies only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_of_speech: Option<String>,
}

impl ListFilter {
    /// A filter that matches everything.
    pub fn none() -> Self {
        Self::default()
    }

    /// Sets the search text.
    pub fn with_search(mut self, text: impl Into<String>) -> Self {
        self.search = Some(text.into());
        self
    }

    /// Sets the part of speech.
    pub fn with_part_of_speech(mut self, pos: impl Into<String>) -> Self {
        self.part_of_speech = Some(pos.into());
        self
    }

    /// Returns true if the filter has no criteria.
    pub fn is_empty(&self) -> bool {
        self.search.is_none() && self.part_of_speech.is_none()
    }

    /// Returns true if `entity` passes the filter.
    pub fn matches(&self, entity: &Entity) -> bool {
        if let Some(text) = &self.search {
            if !entity.matches_search(text) {
                return false;
            }
        }
        if let Some(pos) = &self.part_of_speech {
            let entity_pos = entity
                .as_vocabulary()
                .and_then(|v| v.part_of_speech.as_deref());
            if !entity_pos.is_some_and(|p| p.eq_ignore_ascii_case(pos)) {
                return false;
            }
        }
        true
    }

    /// Renders the filter as URL query pairs.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(search) = &self.search {
            pairs.push(("search", search.clone()));
        }
        if let Some(pos) = &self.part_of_speech {
            pairs.push(("partOfSpeech", pos.clone()));
        }
        pairs
    }
}

/// Request for one page of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRequest {
    /// Collection to list.
    pub collection: CollectionId,
    /// Zero-based page index.
    pub page: u32,
    /// Page size.
    pub limit: u32,
    /// Filters.
    #[serde(default)]
    pub filter: ListFilter,
}

impl ListRequest {
    /// Creates an unfiltered list request.
    pub fn new(collection: CollectionId, page: u32, limit: u32) -> Self {
        Self {
            collection,
            page,
            limit,
            filter: ListFilter::none(),
        }
    }

    /// Sets the filter.
    pub fn with_filter(mut self, filter: ListFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// One page of a collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListPage {
    /// Entities on this page.
    pub items: Vec<Entity>,
    /// Total number of matching entities.
    pub total: u64,
}

impl ListPage {
    /// Creates a page.
    pub fn new(items: Vec<Entity>, total: u64) -> Self {
        Self { items, total }
    }

    /// Encodes to JSON.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode(self)
    }

    /// Decodes from JSON and checks every item belongs to `collection`.
    pub fn decode(bytes: &[u8], collection: CollectionId) -> ProtocolResult<Self> {
        let page: Self = decode(bytes)?;
        check_items(&page.items, collection)?;
        Ok(page)
    }
}

/// Request for the changes of a collection since a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesSinceRequest {
    /// Collection to query.
    pub collection: CollectionId,
    /// Exclusive lower bound on `updated_at`.
    pub since: Timestamp,
}

impl ChangesSinceRequest {
    /// Creates a changes-since request.
    pub fn new(collection: CollectionId, since: Timestamp) -> Self {
        Self { collection, since }
    }
}

/// Changed and deleted entities of a collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// New or modified entities.
    #[serde(default)]
    pub upserts: Vec<Entity>,
    /// Ids of deleted entities.
    #[serde(default)]
    pub deletions: Vec<String>,
}

impl ChangeSet {
    /// Creates a change set.
    pub fn new(upserts: Vec<Entity>, deletions: Vec<String>) -> Self {
        Self { upserts, deletions }
    }

    /// Returns true if there are no changes.
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletions.is_empty()
    }

    /// Encodes to JSON.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode(self)
    }

    /// Decodes from JSON and checks every upsert belongs to `collection`.
    pub fn decode(bytes: &[u8], collection: CollectionId) -> ProtocolResult<Self> {
        let changes: Self = decode(bytes)?;
        check_items(&changes.upserts, collection)?;
        Ok(changes)
    }
}

/// Local mutations sent to the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    /// Mutations in queue order.
    pub changes: Vec<PendingChange>,
}

impl PushRequest {
    /// Creates a push request.
    pub fn new(changes: Vec<PendingChange>) -> Self {
        Self { changes }
    }

    /// Encodes to JSON.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode(self)
    }

    /// Decodes from JSON.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode(bytes)
    }
}

/// Backend verdict on a push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResult {
    /// Operation ids the backend stored.
    #[serde(default)]
    pub accepted: Vec<u64>,
    /// Operation ids the backend refused.
    #[serde(default)]
    pub rejected: Vec<u64>,
}

impl PushResult {
    /// Accepts every change of a request.
    pub fn accept_all(request: &PushRequest) -> Self {
        Self {
            accepted: request.changes.iter().map(|c| c.op_id).collect(),
            rejected: Vec::new(),
        }
    }

    /// Encodes to JSON.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode(self)
    }

    /// Decodes from JSON.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode(bytes)
    }
}

fn check_items(items: &[Entity], collection: CollectionId) -> ProtocolResult<()> {
    for item in items {
        item.validate()?;
        if item.collection != collection {
            return Err(ProtocolError::invalid_structure(format!(
                "entity {} belongs to {}, expected {}",
                item.id, item.collection, collection
            )));
        }
    }
    Ok(())
}
