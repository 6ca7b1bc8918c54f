//! Test fixtures.
//!
//! Builders for vocabulary and resource snapshots, paged datasets with
//! predictable ids, and temporary files for snapshot tests.

use lexisync_protocol::{
    CollectionId, Entity, EntityBody, Origin, Resource, Timestamp, Vocabulary,
};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A remote-origin vocabulary snapshot.
pub fn vocab(id: &str, updated_at: u64) -> Entity {
    Entity::vocabulary(
        id,
        Timestamp(updated_at),
        Vocabulary {
            word: format!("word-{id}"),
            translation: format!("translation-{id}"),
            ..Default::default()
        },
    )
}

/// A remote-origin vocabulary snapshot with a given word.
pub fn word(id: &str, updated_at: u64, word: &str, translation: &str) -> Entity {
    Entity::vocabulary(
        id,
        Timestamp(updated_at),
        Vocabulary {
            word: word.into(),
            translation: translation.into(),
            ..Default::default()
        },
    )
}

/// A remote-origin resource snapshot.
pub fn resource(id: &str, updated_at: u64) -> Entity {
    Entity::resource(
        id,
        Timestamp(updated_at),
        Resource {
            title: format!("title-{id}"),
            url: format!("https://example.com/{id}"),
            ..Default::default()
        },
    )
}

/// A device-local vocabulary snapshot with a fresh id.
pub fn local_vocab(word: &str, updated_at: u64) -> Entity {
    Entity::new_local(
        EntityBody::Vocabulary(Vocabulary {
            word: word.into(),
            ..Default::default()
        }),
        Timestamp(updated_at),
    )
}

/// Builds `count` entities of a collection with zero-padded ids.
///
/// Ids sort in creation order, so page `n` of size `k` holds entities
/// `n*k .. (n+1)*k`.
pub fn dataset(collection: CollectionId, count: usize, updated_at: u64) -> Vec<Entity> {
    (0..count)
        .map(|i| {
            let id = dataset_id(collection, i);
            match collection {
                CollectionId::Vocabularies => vocab(&id, updated_at),
                CollectionId::Resources => resource(&id, updated_at),
            }
        })
        .collect()
}

/// Id of the `index`th entity of [`dataset`].
pub fn dataset_id(collection: CollectionId, index: usize) -> String {
    let prefix = match collection {
        CollectionId::Vocabularies => 'v',
        CollectionId::Resources => 'r',
    };
    format!("{prefix}{index:05}")
}

/// Ids of the entities on one page of [`dataset`].
pub fn page_ids(collection: CollectionId, page: usize, page_size: usize) -> Vec<String> {
    (page * page_size..(page + 1) * page_size)
        .map(|i| dataset_id(collection, i))
        .collect()
}

/// Returns true if every entity has the given origin.
pub fn all_from(entities: &[Entity], origin: Origin) -> bool {
    entities.iter().all(|e| e.origin == origin)
}

/// Serializes entities as a backend fixture document.
pub fn fixture_json(entities: &[Entity]) -> Vec<u8> {
    serde_json::to_vec_pretty(&serde_json::json!({ "entities": entities }))
        .expect("Failed to encode fixture")
}

/// A temporary directory holding store snapshots and backend fixtures.
pub struct TempFiles {
    dir: TempDir,
}

impl TempFiles {
    /// Creates a fresh temporary directory.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Returns the directory path.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Returns the path of a file inside the directory.
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Writes a backend fixture and returns its path.
    pub fn write_fixture(&self, name: &str, entities: &[Entity]) -> PathBuf {
        let path = self.file(name);
        std::fs::write(&path, fixture_json(entities)).expect("Failed to write fixture");
        path
    }
}

impl Default for TempFiles {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataset_ids_sort_in_order() {
        let entities = dataset(CollectionId::Resources, 12, 1);
        let mut ids: Vec<_> = entities.iter().map(|e| e.id.clone()).collect();
        let original = ids.clone();
        ids.sort();
        assert_eq!(ids, original);
        assert_eq!(entities[0].id, "r00000");
        assert_eq!(entities[0].collection, CollectionId::Resources);
    }

    #[test]
    fn page_ids_match_dataset() {
        let entities = dataset(CollectionId::Vocabularies, 50, 1);
        let ids = page_ids(CollectionId::Vocabularies, 2, 10);
        assert_eq!(ids.first(), Some(&entities[20].id));
        assert_eq!(ids.last(), Some(&entities[29].id));
    }

    #[test]
    fn builders_tag_origin() {
        assert!(all_from(&[vocab("a", 1), resource("b", 1)], Origin::Remote));
        assert_eq!(local_vocab("hola", 1).origin, Origin::Local);
    }

    #[test]
    fn fixture_file_written() {
        let files = TempFiles::new();
        let path = files.write_fixture("backend.json", &[vocab("a", 1)]);
        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(json["entities"][0]["id"], "a");
    }
}
