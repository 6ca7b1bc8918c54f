//! Property-based test generators using proptest.
//!
//! Provides strategies for generating entities and remote change streams
//! that respect the data model's invariants.

use lexisync_protocol::{CollectionId, Entity, Origin, Resource, Timestamp, Vocabulary};
use proptest::prelude::*;

/// Strategy for generating collection ids.
pub fn collection_strategy() -> impl Strategy<Value = CollectionId> {
    prop_oneof![Just(CollectionId::Vocabularies), Just(CollectionId::Resources)]
}

/// Strategy for generating entity ids from a small pool, so collisions occur.
pub fn entity_id_strategy() -> impl Strategy<Value = String> {
    (0u8..8).prop_map(|n| format!("e{n}"))
}

/// Strategy for generating server timestamps.
pub fn timestamp_strategy() -> impl Strategy<Value = Timestamp> {
    (0u64..1_000).prop_map(Timestamp)
}

/// Strategy for generating words.
pub fn word_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z]{1,12}").expect("Invalid regex")
}

/// Strategy for generating vocabulary payloads.
pub fn vocabulary_strategy() -> impl Strategy<Value = Vocabulary> {
    (
        word_strategy(),
        word_strategy(),
        prop::option::of(prop_oneof![
            Just("noun".to_string()),
            Just("verb".to_string()),
            Just("adjective".to_string()),
        ]),
    )
        .prop_map(|(word, translation, part_of_speech)| Vocabulary {
            word,
            translation,
            part_of_speech,
            ..Default::default()
        })
}

/// Strategy for generating resource payloads.
pub fn resource_strategy() -> impl Strategy<Value = Resource> {
    word_strategy().prop_map(|title| Resource {
        url: format!("https://example.com/{title}"),
        title,
        ..Default::default()
    })
}

/// Strategy for generating remote-origin entities of one collection.
pub fn entity_strategy(collection: CollectionId) -> BoxedStrategy<Entity> {
    match collection {
        CollectionId::Vocabularies => {
            (entity_id_strategy(), timestamp_strategy(), vocabulary_strategy())
                .prop_map(|(id, ts, body)| Entity::vocabulary(id, ts, body))
                .boxed()
        }
        CollectionId::Resources => {
            (entity_id_strategy(), timestamp_strategy(), resource_strategy())
                .prop_map(|(id, ts, body)| Entity::resource(id, ts, body))
                .boxed()
        }
    }
}

/// Strategy for generating a stream of remote snapshots for one collection.
pub fn remote_stream_strategy(
    collection: CollectionId,
    max_len: usize,
) -> impl Strategy<Value = Vec<Entity>> {
    prop::collection::vec(entity_strategy(collection), 0..max_len)
}

/// Strategy for generating an entity with an arbitrary origin.
pub fn any_origin_entity_strategy() -> impl Strategy<Value = Entity> {
    (
        collection_strategy().prop_flat_map(entity_strategy),
        prop_oneof![Just(Origin::Remote), Just(Origin::Local), Just(Origin::Online)],
    )
        .prop_map(|(entity, origin)| entity.with_origin(origin))
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_entities_are_valid(entity in any_origin_entity_strategy()) {
            prop_assert!(entity.validate().is_ok());
        }

        #[test]
        fn stream_stays_in_collection(stream in remote_stream_strategy(CollectionId::Resources, 20)) {
            prop_assert!(stream.iter().all(|e| e.collection == CollectionId::Resources));
        }
    }
}
