//! Entity snapshots and their identifiers.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime};

/// A synchronized collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionId {
    /// Vocabulary entries.
    Vocabularies,
    /// Learning resources.
    Resources,
}

impl CollectionId {
    /// Every collection, in sync order.
    pub const ALL: [CollectionId; 2] = [CollectionId::Vocabularies, CollectionId::Resources];

    /// Returns the wire name of the collection.
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionId::Vocabularies => "vocabularies",
            CollectionId::Resources => "resources",
        }
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollectionId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vocabularies" | "vocabulary" => Ok(CollectionId::Vocabularies),
            "resources" | "resource" => Ok(CollectionId::Resources),
            other => Err(ProtocolError::UnknownCollection(other.to_string())),
        }
    }
}

/// Milliseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// The Unix epoch, used as the cursor of a collection that never synced.
    pub const EPOCH: Timestamp = Timestamp(0);

    /// Creates a timestamp from milliseconds.
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the current wall-clock time.
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Returns the raw millisecond value.
    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Adds a duration, saturating at the maximum.
    pub fn saturating_add(self, duration: Duration) -> Self {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(millis))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Where an entity snapshot came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Received from the remote backend.
    #[default]
    Remote,
    /// Created or edited on this device.
    Local,
    /// Produced by the online dictionary lookup.
    Online,
}

/// A vocabulary entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vocabulary {
    /// The word or phrase being learned.
    pub word: String,
    /// Translation into the learner's language.
    #[serde(default)]
    pub translation: String,
    /// Dictionary definition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
    /// Part of speech (noun, verb, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_of_speech: Option<String>,
    /// Example sentences.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,
    /// Language code of `word`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// A learning resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// Display title.
    pub title: String,
    /// Link to the resource.
    #[serde(default)]
    pub url: String,
    /// Resource kind (article, video, podcast, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Short description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Collection-specific payload of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityBody {
    /// Vocabulary payload.
    Vocabulary(Vocabulary),
    /// Resource payload.
    Resource(Resource),
}

impl EntityBody {
    /// Returns the collection this payload belongs to.
    pub fn collection(&self) -> CollectionId {
        match self {
            EntityBody::Vocabulary(_) => CollectionId::Vocabularies,
            EntityBody::Resource(_) => CollectionId::Resources,
        }
    }
}

/// An immutable entity snapshot.
///
/// A sync never patches an entity; a newer snapshot replaces the old one
/// wholesale. `updated_at` is the server timestamp used for
/// last-write-wins resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Unique id within the collection.
    pub id: String,
    /// Collection tag.
    pub collection: CollectionId,
    /// Authoritative modification time.
    pub updated_at: Timestamp,
    /// Where this snapshot came from.
    #[serde(default)]
    pub origin: Origin,
    /// Collection-specific payload.
    pub body: EntityBody,
}

impl Entity {
    /// Creates a remote-origin vocabulary entity.
    pub fn vocabulary(id: impl Into<String>, updated_at: Timestamp, body: Vocabulary) -> Self {
        Self {
            id: id.into(),
            collection: CollectionId::Vocabularies,
            updated_at,
            origin: Origin::Remote,
            body: EntityBody::Vocabulary(body),
        }
    }

    /// Creates a remote-origin resource entity.
    pub fn resource(id: impl Into<String>, updated_at: Timestamp, body: Resource) -> Self {
        Self {
            id: id.into(),
            collection: CollectionId::Resources,
            updated_at,
            origin: Origin::Remote,
            body: EntityBody::Resource(body),
        }
    }

    /// Creates a device-local entity with a fresh UUID.
    pub fn new_local(body: EntityBody, updated_at: Timestamp) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            collection: body.collection(),
            updated_at,
            origin: Origin::Local,
            body,
        }
    }

    /// Returns a copy tagged with the given origin.
    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    /// Returns the vocabulary payload, if any.
    pub fn as_vocabulary(&self) -> Option<&Vocabulary> {
        match &self.body {
            EntityBody::Vocabulary(v) => Some(v),
            EntityBody::Resource(_) => None,
        }
    }

    /// Returns the resource payload, if any.
    pub fn as_resource(&self) -> Option<&Resource> {
        match &self.body {
            EntityBody::Resource(r) => Some(r),
            EntityBody::Vocabulary(_) => None,
        }
    }

    /// Checks that the collection tag agrees with the payload and the id is set.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.id.is_empty() {
            return Err(ProtocolError::invalid_structure("entity id is empty"));
        }
        if self.body.collection() != self.collection {
            return Err(ProtocolError::invalid_structure(format!(
                "entity {} tagged {} carries a {} payload",
                self.id,
                self.collection,
                self.body.collection()
            )));
        }
        Ok(())
    }

    /// Returns true if `text` occurs (case-insensitively) in the searchable fields.
    pub fn matches_search(&self, text: &str) -> bool {
        let needle = text.to_lowercase();
        let contains = |s: &str| s.to_lowercase().contains(&needle);
        match &self.body {
            EntityBody::Vocabulary(v) => {
                contains(&v.word)
                    || contains(&v.translation)
                    || v.definition.as_deref().is_some_and(contains)
            }
            EntityBody::Resource(r) => {
                contains(&r.title) || r.description.as_deref().is_some_and(contains)
            }
        }
    }
}
