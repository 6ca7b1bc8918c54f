//! Add-word command implementation.

use lexisync_engine::{LocalStore, MemoryStore};
use lexisync_protocol::{Entity, EntityBody, Mutation, Timestamp, Vocabulary};
use std::path::Path;
use tracing::info;

/// Runs the add-word command.
pub fn run(
    path: &Path,
    word: &str,
    translation: &str,
    part_of_speech: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (op_id, entity) = add(path, word, translation, part_of_speech)?;
    println!("Queued {} as {} (op {})", word.trim(), entity.id, op_id);
    Ok(())
}

/// Queues a new vocabulary entry in the store at `path`.
pub fn add(
    path: &Path,
    word: &str,
    translation: &str,
    part_of_speech: Option<String>,
) -> Result<(u64, Entity), Box<dyn std::error::Error>> {
    let word = word.trim();
    if word.is_empty() {
        return Err("Word must not be empty".into());
    }

    let store = MemoryStore::load(path)?;
    let entity = Entity::new_local(
        EntityBody::Vocabulary(Vocabulary {
            word: word.to_string(),
            translation: translation.trim().to_string(),
            part_of_speech,
            ..Default::default()
        }),
        Timestamp::now(),
    );
    entity.validate()?;

    let op_id = store.enqueue_pending_change(Mutation::upsert(entity.clone()))?;
    store.save(path)?;
    info!(op_id, id = %entity.id, pending = store.pending_count(), "word queued");
    Ok((op_id, entity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexisync_protocol::{CollectionId, Origin};
    use lexisync_testkit::prelude::*;

    #[test]
    fn queued_word_survives_reload() {
        let files = TempFiles::new();
        let path = files.file("store.json");

        let (_, entity) = add(&path, " perro ", "dog", Some("noun".into())).unwrap();
        add(&path, "gato", "cat", None).unwrap();

        let store = MemoryStore::load(&path).unwrap();
        assert_eq!(store.pending_count(), 2);
        let cached = store.get(CollectionId::Vocabularies, &entity.id).unwrap();
        assert_eq!(cached.origin, Origin::Local);
        assert_eq!(cached.as_vocabulary().unwrap().word, "perro");
    }

    #[test]
    fn blank_word_is_rejected() {
        let files = TempFiles::new();
        assert!(add(&files.file("store.json"), "   ", "x", None).is_err());
    }
}
