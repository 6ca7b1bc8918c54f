//! Sync command implementation.

use lexisync_engine::{
    CancelToken, MemoryGateway, MemoryStore, Outcome, SyncConfig, SyncEngine, SyncKind,
    SyncState, SyncStats,
};
use lexisync_protocol::CollectionId;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Options of one sync invocation.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Run a delta sync instead of a full one.
    pub delta: bool,
    /// Collections to sync; empty means all.
    pub collections: Vec<CollectionId>,
    /// Page size override.
    pub page_size: Option<u32>,
}

/// Sync result.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Run summary.
    pub outcome: Outcome,
    /// State after the run.
    pub state: SyncState,
    /// Engine statistics.
    pub stats: SyncStats,
}

/// Runs the sync command.
pub fn run(
    backend: &Path,
    store_path: &Path,
    options: &SyncOptions,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let report = execute(backend, store_path, options)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            print_text_output(&report);
        }
    }

    Ok(())
}

/// Runs one sync and persists the store and the backend fixture.
pub fn execute(
    backend: &Path,
    store_path: &Path,
    options: &SyncOptions,
) -> Result<SyncReport, Box<dyn std::error::Error>> {
    if !backend.exists() {
        return Err(format!("No backend fixture found at {:?}", backend).into());
    }

    let gateway = Arc::new(MemoryGateway::load_fixture(backend)?);
    let store = Arc::new(MemoryStore::load(store_path)?);

    let mut config = SyncConfig::new(format!("file://{}", backend.display()));
    if let Some(size) = options.page_size {
        config = config.with_page_size(size);
    }
    let engine = Arc::new(SyncEngine::new(
        config,
        Arc::clone(&gateway),
        Arc::clone(&store),
    )?);

    let kind = if options.delta {
        SyncKind::Delta
    } else {
        SyncKind::Full
    };
    let collections = if options.collections.is_empty() {
        CollectionId::ALL.to_vec()
    } else {
        options.collections.clone()
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let outcome = runtime.block_on(engine.run_sync(kind, collections, CancelToken::new()))?;

    store.save(store_path)?;
    // Pushed changes land in the fixture, like a real backend would keep them.
    gateway.save_fixture(backend)?;
    debug!(store = %store_path.display(), "store saved");

    Ok(SyncReport {
        outcome,
        state: engine.state(),
        stats: engine.stats(),
    })
}

fn print_text_output(report: &SyncReport) {
    let outcome = &report.outcome;
    println!("LexiSync {} sync (job {})", outcome.kind, outcome.job_id);
    println!("==========================");
    println!();
    println!("Collections:");
    for (collection, progress) in &outcome.collections {
        println!(
            "  {:<13} {} ({}/{})",
            collection.as_str(),
            progress.status,
            progress.items_synced,
            progress.items_total
        );
    }

    if let Some(push) = &outcome.push {
        println!();
        println!("Push:");
        println!("  Attempted: {}", push.attempted);
        println!("  Accepted:  {}", push.accepted);
        println!("  Rejected:  {}", push.rejected);
        if let Some(error) = &push.error {
            println!("  Error:     {}", error);
        }
    }

    println!();
    println!("Merge:");
    println!("  Applied: {}", report.stats.entities_applied);
    println!("  Skipped: {}", report.stats.stale_skipped);
    println!("  Staged:  {}", report.stats.staged);
    println!();
    println!("Pending changes: {}", report.state.pending_changes);
    match report.state.next_scheduled_sync {
        Some(next) => println!("Next sync:       {}", next),
        None => println!("Next sync:       -"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexisync_engine::{LocalStore, ProgressStatus};
    use lexisync_testkit::prelude::*;

    #[test]
    fn full_sync_persists_store() {
        let files = TempFiles::new();
        let backend = files.write_fixture(
            "backend.json",
            &[vocab("v1", 5), vocab("v2", 6), resource("r1", 7)],
        );
        let store_path = files.file("store.json");

        let report = execute(&backend, &store_path, &SyncOptions::default()).unwrap();
        assert!(report.outcome.is_success());
        assert_eq!(report.stats.entities_applied, 3);

        let store = MemoryStore::load(&store_path).unwrap();
        assert_eq!(store.len(CollectionId::Vocabularies), 2);
        assert_eq!(store.len(CollectionId::Resources), 1);
    }

    #[test]
    fn collection_filter_limits_run() {
        let files = TempFiles::new();
        let backend = files.write_fixture("backend.json", &[vocab("v1", 5), resource("r1", 7)]);
        let store_path = files.file("store.json");
        let options = SyncOptions {
            delta: true,
            collections: vec![CollectionId::Resources],
            page_size: None,
        };

        let report = execute(&backend, &store_path, &options).unwrap();
        assert_eq!(report.outcome.collections.len(), 1);
        assert_eq!(
            report.outcome.status(CollectionId::Resources),
            Some(&ProgressStatus::Succeeded)
        );
        let store = MemoryStore::load(&store_path).unwrap();
        assert_eq!(store.len(CollectionId::Vocabularies), 0);
    }

    #[test]
    fn missing_backend_is_an_error() {
        let files = TempFiles::new();
        let result = execute(
            &files.file("absent.json"),
            &files.file("store.json"),
            &SyncOptions::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let files = TempFiles::new();
        let backend = files.write_fixture("backend.json", &[vocab("v1", 5)]);
        let options = SyncOptions {
            page_size: Some(0),
            ..SyncOptions::default()
        };
        assert!(execute(&backend, &files.file("store.json"), &options).is_err());
    }
}
