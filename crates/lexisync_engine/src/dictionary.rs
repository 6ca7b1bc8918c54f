//! Online dictionary lookup.
//!
//! Combines a definition source and a translation source into a single
//! online-origin vocabulary snapshot. Both sources are best-effort.

use lexisync_protocol::{Entity, Origin, Timestamp, Vocabulary};
use std::future::Future;
use tracing::debug;

/// A dictionary definition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Definition {
    /// Definition text.
    pub text: String,
    /// Part of speech, if known.
    pub part_of_speech: Option<String>,
    /// Example sentences.
    pub examples: Vec<String>,
}

/// Source of word definitions.
pub trait DefinitionSource: Send + Sync {
    /// Looks up a word.
    fn define(&self, word: &str) -> impl Future<Output = Result<Option<Definition>, String>> + Send;
}

/// Source of translations.
pub trait TranslationSource: Send + Sync {
    /// Translates a word.
    fn translate(&self, word: &str) -> impl Future<Output = Result<Option<String>, String>> + Send;
}

/// Produces vocabulary snapshots for words missing from the local store.
pub trait DictionaryLookup: Send + Sync {
    /// Looks up a word. `None` if nothing could be found.
    fn lookup(&self, word: &str) -> impl Future<Output = Option<Entity>> + Send;
}

/// Returns the id used for the online snapshot of `word`.
pub fn online_id(word: &str) -> String {
    format!("online-{}", word.trim().to_lowercase())
}

/// Dictionary backed by a definition source and a translation source.
#[derive(Debug, Clone)]
pub struct OnlineDictionary<D, T> {
    definitions: D,
    translations: T,
}

impl<D: DefinitionSource, T: TranslationSource> OnlineDictionary<D, T> {
    /// Creates a dictionary from its two sources.
    pub fn new(definitions: D, translations: T) -> Self {
        Self {
            definitions,
            translations,
        }
    }
}

impl<D: DefinitionSource, T: TranslationSource> DictionaryLookup for OnlineDictionary<D, T> {
    async fn lookup(&self, word: &str) -> Option<Entity> {
        let word = word.trim();
        if word.is_empty() {
            return None;
        }

        let (definition, translation) = tokio::join!(
            self.definitions.define(word),
            self.translations.translate(word)
        );

        let definition = definition
            .map_err(|e| debug!(word, error = %e, "definition source failed"))
            .ok()
            .flatten();
        let translation = translation
            .map_err(|e| debug!(word, error = %e, "translation source failed"))
            .ok()
            .flatten();

        if definition.is_none() && translation.is_none() {
            return None;
        }

        let definition = definition.unwrap_or_default();
        let body = Vocabulary {
            word: word.to_string(),
            translation: translation.unwrap_or_default(),
            definition: Some(definition.text).filter(|t| !t.is_empty()),
            part_of_speech: definition.part_of_speech,
            examples: definition.examples,
            language: None,
        };
        Some(Entity::vocabulary(online_id(word), Timestamp::now(), body).with_origin(Origin::Online))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Defs(Result<Option<Definition>, String>);
    struct Trans(Result<Option<String>, String>);

    impl DefinitionSource for Defs {
        async fn define(&self, _word: &str) -> Result<Option<Definition>, String> {
            self.0.clone()
        }
    }

    impl TranslationSource for Trans {
        async fn translate(&self, _word: &str) -> Result<Option<String>, String> {
            self.0.clone()
        }
    }

    fn definition() -> Definition {
        Definition {
            text: "a domesticated feline".into(),
            part_of_speech: Some("noun".into()),
            examples: vec!["El gato duerme.".into()],
        }
    }

    #[tokio::test]
    async fn combines_both_sources() {
        let dict = OnlineDictionary::new(Defs(Ok(Some(definition()))), Trans(Ok(Some("cat".into()))));
        let entity = dict.lookup(" Gato ").await.unwrap();

        assert_eq!(entity.id, "online-gato");
        assert_eq!(entity.origin, Origin::Online);
        let vocab = entity.as_vocabulary().unwrap();
        assert_eq!(vocab.word, "Gato");
        assert_eq!(vocab.translation, "cat");
        assert_eq!(vocab.part_of_speech.as_deref(), Some("noun"));
    }

    #[tokio::test]
    async fn one_source_is_enough() {
        let dict = OnlineDictionary::new(Defs(Err("503".into())), Trans(Ok(Some("cat".into()))));
        let entity = dict.lookup("gato").await.unwrap();
        let vocab = entity.as_vocabulary().unwrap();
        assert_eq!(vocab.translation, "cat");
        assert!(vocab.definition.is_none());
    }

    #[tokio::test]
    async fn both_unreachable_is_absent() {
        let dict = OnlineDictionary::new(Defs(Err("dns".into())), Trans(Err("dns".into())));
        assert!(dict.lookup("gato").await.is_none());

        let empty = OnlineDictionary::new(Defs(Ok(None)), Trans(Ok(None)));
        assert!(empty.lookup("gato").await.is_none());
        assert!(empty.lookup("   ").await.is_none());
    }
}
