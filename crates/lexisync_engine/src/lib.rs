//! # LexiSync Engine
//!
//! Offline-first synchronization engine for the LexiSync vocabulary client.
//!
//! This crate provides:
//! - Connectivity monitor with deduplicated transition events
//! - Local store with last-write-wins merging and a pending-change queue
//! - Remote gateway abstraction (in-memory and HTTP)
//! - Sync engine running full and delta syncs per collection
//! - Scheduler with a repeating timer and debounced reconnect trigger
//!
//! ## Architecture
//!
//! Data flows gateway → engine → store for reads, and store pending queue →
//! engine → gateway for writes. A run pulls every requested collection
//! concurrently, then pushes one batch of pending mutations.
//!
//! ## Key Invariants
//!
//! - At most one run is in flight
//! - An incoming snapshot replaces a cached one only if strictly newer
//! - Remote changes to ids with a pending local mutation are staged
//! - Partial failures are recorded per collection, never returned as errors
//! - Every run ends with one state transition that re-arms the timer

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connectivity;
mod dictionary;
mod engine;
mod error;
mod gateway;
mod http;
mod scheduler;
mod state;
mod store;

pub use config::{RetryConfig, SyncConfig};
pub use connectivity::{
    ConnectivityMonitor, ConnectivityStatus, LinkType, NetworkCheck, Subscription,
};
pub use dictionary::{
    online_id, Definition, DefinitionSource, DictionaryLookup, OnlineDictionary,
    TranslationSource,
};
pub use engine::{CancelToken, Outcome, PushSummary, SyncEngine, SyncJob, SyncStats};
pub use error::{SyncError, SyncResult};
pub use gateway::{FailureMode, MemoryGateway, PushMode, RemoteGateway, Tombstone};
pub use http::{HttpClient, HttpGateway};
pub use scheduler::{ReconnectDebouncer, Scheduler, SchedulerHandle, SyncHandle};
pub use state::{
    ActiveJob, CollectionProgress, ProgressStatus, StatePublisher, SyncKind, SyncState,
};
pub use store::{LocalStore, MemoryStore, MergeReport};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
