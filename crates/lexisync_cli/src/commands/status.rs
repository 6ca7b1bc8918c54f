//! Status command implementation.

use lexisync_engine::{LocalStore, MemoryStore};
use lexisync_protocol::{CollectionId, Timestamp};
use serde::Serialize;
use std::path::Path;

/// Store status result.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResult {
    /// Store path.
    pub path: String,
    /// Per-collection statistics.
    pub collections: Vec<CollectionStatus>,
    /// Local mutations awaiting push.
    pub pending_changes: u64,
    /// Remote changes held back behind pending mutations.
    pub staged_changes: usize,
}

/// Statistics for a single collection.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionStatus {
    /// Collection.
    pub collection: CollectionId,
    /// Number of cached entities.
    pub entity_count: usize,
    /// Delta cursor, if the collection ever synced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Timestamp>,
}

/// Runs the status command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No store found at {:?}", path).into());
    }
    let result = inspect(path)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Collects the status of a store snapshot.
pub fn inspect(path: &Path) -> Result<StatusResult, Box<dyn std::error::Error>> {
    let store = MemoryStore::load(path)?;
    let collections = CollectionId::ALL
        .iter()
        .map(|&collection| CollectionStatus {
            collection,
            entity_count: store.len(collection),
            cursor: store.cursor(collection),
        })
        .collect();

    Ok(StatusResult {
        path: path.display().to_string(),
        collections,
        pending_changes: store.pending_count(),
        staged_changes: store.staged_count(),
    })
}

fn print_text_output(result: &StatusResult) {
    println!("LexiSync Store Status");
    println!("=====================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Collections:");
    for status in &result.collections {
        let cursor = status
            .cursor
            .map_or_else(|| "never synced".to_string(), |c| format!("synced up to {c}"));
        println!(
            "  {:<13} {} entities, {}",
            status.collection.as_str(),
            status.entity_count,
            cursor
        );
    }
    println!();
    println!("Queue:");
    println!("  Pending changes: {}", result.pending_changes);
    println!("  Staged changes:  {}", result.staged_changes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexisync_protocol::Mutation;
    use lexisync_testkit::prelude::*;

    #[test]
    fn reports_counts_and_queue() {
        let files = TempFiles::new();
        let path = files.file("store.json");
        let store = MemoryStore::new();
        store
            .upsert_many(CollectionId::Vocabularies, vec![vocab("v1", 1), vocab("v2", 1)])
            .unwrap();
        store
            .set_cursor(CollectionId::Vocabularies, Timestamp(42))
            .unwrap();
        store
            .enqueue_pending_change(Mutation::upsert(local_vocab("hola", 3)))
            .unwrap();
        store.save(&path).unwrap();

        let result = inspect(&path).unwrap();
        assert_eq!(result.pending_changes, 1);
        assert_eq!(result.collections[0].entity_count, 3);
        assert_eq!(result.collections[0].cursor, Some(Timestamp(42)));
        assert_eq!(result.collections[1].entity_count, 0);
        assert_eq!(result.collections[1].cursor, None);
    }

    #[test]
    fn missing_store_is_an_error() {
        let files = TempFiles::new();
        assert!(run(&files.file("absent.json"), "text").is_err());
    }
}
