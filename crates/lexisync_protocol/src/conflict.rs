//! Conflict detection and resolution.
//!
//! The merge policy is fixed: last write wins by server `updated_at`.
//! An entity produced by the online dictionary is never authoritative and
//! only fills a gap, while a remote snapshot always replaces one.

use crate::entity::{Entity, Origin};

/// What to do with an incoming snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    /// Replace (or insert) the local snapshot.
    Apply,
    /// Keep the local snapshot; the incoming one is equal or older.
    KeepLocal,
    /// Hold the incoming snapshot until a pending local mutation resolves.
    Stage,
}

impl MergeDecision {
    /// Returns true if the incoming snapshot should be written.
    pub fn applies(&self) -> bool {
        matches!(self, MergeDecision::Apply)
    }
}

/// Decides how an incoming remote snapshot merges with the local one.
///
/// `has_pending` reports whether the id has an unpushed local mutation;
/// such ids are never overwritten.
pub fn decide_merge(local: Option<&Entity>, incoming: &Entity, has_pending: bool) -> MergeDecision {
    if has_pending {
        return MergeDecision::Stage;
    }
    match local {
        None => MergeDecision::Apply,
        Some(local) if local.origin == Origin::Online && incoming.origin != Origin::Online => {
            MergeDecision::Apply
        }
        Some(local) if incoming.updated_at > local.updated_at => MergeDecision::Apply,
        Some(_) => MergeDecision::KeepLocal,
    }
}

/// Decides whether an online-origin snapshot may be cached.
pub fn decide_online_insert(local: Option<&Entity>, has_pending: bool) -> MergeDecision {
    if local.is_none() && !has_pending {
        MergeDecision::Apply
    } else {
        MergeDecision::KeepLocal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Timestamp, Vocabulary};

    fn vocab(id: &str, ts: u64) -> Entity {
        Entity::vocabulary(
            id,
            Timestamp(ts),
            Vocabulary {
                word: format!("word-{ts}"),
                ..Default::default()
            },
        )
    }

    #[test]
    fn absent_local_applies() {
        assert_eq!(decide_merge(None, &vocab("v1", 1), false), MergeDecision::Apply);
    }

    #[test]
    fn last_write_wins() {
        let local = vocab("v1", 10);
        assert_eq!(
            decide_merge(Some(&local), &vocab("v1", 5), false),
            MergeDecision::KeepLocal
        );
        assert_eq!(
            decide_merge(Some(&local), &vocab("v1", 10), false),
            MergeDecision::KeepLocal
        );
        assert_eq!(
            decide_merge(Some(&local), &vocab("v1", 15), false),
            MergeDecision::Apply
        );
    }

    #[test]
    fn pending_mutation_stages() {
        let local = vocab("v1", 10);
        assert_eq!(
            decide_merge(Some(&local), &vocab("v1", 99), true),
            MergeDecision::Stage
        );
        assert_eq!(decide_merge(None, &vocab("v1", 99), true), MergeDecision::Stage);
    }

    #[test]
    fn remote_replaces_online_lookup() {
        let online = vocab("v1", 50).with_origin(Origin::Online);
        assert!(decide_merge(Some(&online), &vocab("v1", 1), false).applies());
    }

    #[test]
    fn online_only_fills_gaps() {
        let remote = vocab("v1", 1);
        assert_eq!(decide_online_insert(Some(&remote), false), MergeDecision::KeepLocal);
        assert_eq!(decide_online_insert(None, true), MergeDecision::KeepLocal);
        assert_eq!(decide_online_insert(None, false), MergeDecision::Apply);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn pending_always_stages(local in 0u64..100, incoming in 0u64..100) {
                let decision = decide_merge(Some(&vocab("v1", local)), &vocab("v1", incoming), true);
                prop_assert_eq!(decision, MergeDecision::Stage);
            }

            #[test]
            fn applies_exactly_when_newer(local in 0u64..100, incoming in 0u64..100) {
                let decision = decide_merge(Some(&vocab("v1", local)), &vocab("v1", incoming), false);
                prop_assert_eq!(decision.applies(), incoming > local);
            }
        }
    }
}
