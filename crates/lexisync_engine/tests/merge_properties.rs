//! Property tests for store merging.

use lexisync_engine::{LocalStore, MemoryStore};
use lexisync_protocol::{CollectionId, Entity, Timestamp};
use lexisync_testkit::generators::remote_stream_strategy;
use proptest::prelude::*;
use std::collections::BTreeMap;

const V: CollectionId = CollectionId::Vocabularies;

fn newest_per_id(stream: &[Entity]) -> BTreeMap<String, Timestamp> {
    let mut newest = BTreeMap::new();
    for entity in stream {
        let slot = newest.entry(entity.id.clone()).or_insert(entity.updated_at);
        if entity.updated_at > *slot {
            *slot = entity.updated_at;
        }
    }
    newest
}

fn timestamps(store: &MemoryStore) -> BTreeMap<String, Timestamp> {
    store
        .list(V)
        .into_iter()
        .map(|e| (e.id, e.updated_at))
        .collect()
}

proptest! {
    #[test]
    fn store_keeps_newest_snapshot(stream in remote_stream_strategy(V, 40)) {
        let store = MemoryStore::new();
        for entity in stream.iter().cloned() {
            store.upsert_many(V, vec![entity]).unwrap();
        }
        prop_assert_eq!(timestamps(&store), newest_per_id(&stream));
    }

    #[test]
    fn merge_order_does_not_matter(stream in remote_stream_strategy(V, 40)) {
        let forward = MemoryStore::new();
        forward.upsert_many(V, stream.clone()).unwrap();

        let backward = MemoryStore::new();
        backward.upsert_many(V, stream.iter().rev().cloned().collect()).unwrap();

        prop_assert_eq!(timestamps(&forward), timestamps(&backward));
    }

    #[test]
    fn replaying_a_stream_applies_nothing(stream in remote_stream_strategy(V, 40)) {
        let store = MemoryStore::new();
        store.upsert_many(V, stream.clone()).unwrap();
        let before = store.list(V);

        let report = store.upsert_many(V, stream.clone()).unwrap();
        prop_assert_eq!(report.applied, 0);
        prop_assert_eq!(report.skipped, stream.len() as u64);
        prop_assert_eq!(store.list(V), before);
    }

    #[test]
    fn deletes_are_idempotent(stream in remote_stream_strategy(V, 20)) {
        let store = MemoryStore::new();
        store.upsert_many(V, stream.clone()).unwrap();
        let ids: Vec<String> = stream.iter().map(|e| e.id.clone()).collect();

        store.remove_many(V, &ids).unwrap();
        store.remove_many(V, &ids).unwrap();
        prop_assert_eq!(store.len(V), 0);
    }
}
