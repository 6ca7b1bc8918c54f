//! # LexiSync Protocol
//!
//! Entity model and wire types for LexiSync.
//!
//! This crate provides:
//! - `Entity` snapshots for the `vocabularies` and `resources` collections
//! - List, changes-since and push messages with JSON codecs
//! - The last-write-wins merge decision
//! - `PendingQueue` for local mutations awaiting a push
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod entity;
mod error;
mod messages;
mod oplog;

pub use conflict::{decide_merge, decide_online_insert, MergeDecision};
pub use entity::{CollectionId, Entity, EntityBody, Origin, Resource, Timestamp, Vocabulary};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{ChangeSet, ChangesSinceRequest, ListFilter, ListPage, ListRequest, PushRequest, PushResult};
pub use oplog::{Mutation, PendingChange, PendingQueue};
