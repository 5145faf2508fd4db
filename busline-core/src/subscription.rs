//! Subscription registry (spec §4.6) and the `(code, topic)` matching
//! rules that gate broadcast delivery.

use dashmap::DashMap;

use crate::ids::{ObjectId, SessionId};

/// How a subscription entry participates in cache replay (spec §4.6's
/// Normal vs `ManualUpdate` distinction).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    Normal,
    ManualUpdate,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct Key {
    session: SessionId,
    object_id: ObjectId,
    code: i32,
    topic: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Subscriber {
    pub session: SessionId,
    pub object_id: ObjectId,
}

/// Registry of `(session, object_id, code, topic) -> kind` entries.
///
/// Mutated only on the owning endpoint's context worker (spec §5), so the
/// map itself uses `dashmap` for the same reason the teacher's transport
/// layer reaches for concurrent maps at connection-scale fan-out: cheap
/// concurrent reads from multiple broadcaster call sites even though
/// writes are serialized by convention, not by a lock here.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: DashMap<Key, SubscriptionKind>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &self,
        session: SessionId,
        object_id: ObjectId,
        code: i32,
        topic: impl Into<String>,
        kind: SubscriptionKind,
    ) {
        self.entries.insert(
            Key {
                session,
                object_id,
                code,
                topic: topic.into(),
            },
            kind,
        );
    }

    pub fn unsubscribe(&self, session: SessionId, object_id: ObjectId, code: i32, topic: &str) {
        self.entries.remove(&Key {
            session,
            object_id,
            code,
            topic: topic.to_string(),
        });
    }

    /// Drops every entry held by a dead session (spec §4.10: "subscriptions
    /// held by that session are erased").
    pub fn drop_session(&self, session: SessionId) {
        self.entries.retain(|k, _| k.session != session);
    }

    /// Resolves the subscribers a broadcast on `(code, topic)` must reach,
    /// applying spec §4.6's three rules:
    ///
    /// 1. exact `(code, topic)` match fires;
    /// 2. if `topic` is non-empty and no exact subscriber exists for a
    ///    given `(session, object_id)`, that subscriber's empty-topic
    ///    entry for the same code still fires (scoped per-bucket, per
    ///    Open Question 2);
    /// 3. `ManualUpdate` entries never fire here, only via
    ///    [`SubscriptionRegistry::manual_update_targets`].
    pub fn broadcast_targets(&self, code: i32, topic: &str) -> Vec<Subscriber> {
        let mut exact_buckets = std::collections::HashSet::new();
        let mut out = Vec::new();

        for entry in self.entries.iter() {
            let key = entry.key();
            if key.code != code || *entry.value() != SubscriptionKind::Normal {
                continue;
            }
            if key.topic == topic {
                exact_buckets.insert((key.session, key.object_id));
                out.push(Subscriber {
                    session: key.session,
                    object_id: key.object_id,
                });
            }
        }

        if !topic.is_empty() {
            for entry in self.entries.iter() {
                let key = entry.key();
                if key.code != code || *entry.value() != SubscriptionKind::Normal {
                    continue;
                }
                if key.topic.is_empty() && !exact_buckets.contains(&(key.session, key.object_id)) {
                    out.push(Subscriber {
                        session: key.session,
                        object_id: key.object_id,
                    });
                }
            }
        }

        out
    }

    /// Subscribers whose cache walk should include `ManualUpdate` entries
    /// (spec §4.5's `Update` sub-kind handling).
    pub fn manual_update_targets(&self, code: i32) -> Vec<Subscriber> {
        self.entries
            .iter()
            .filter(|e| e.key().code == code && *e.value() == SubscriptionKind::ManualUpdate)
            .map(|e| Subscriber {
                session: e.key().session,
                object_id: e.key().object_id,
            })
            .collect()
    }

    /// Normal-kind subscribers of `(code, topic)`, used for subscribe-time
    /// cache replay (spec §4.6; Open Question 1 excludes `ManualUpdate`
    /// from this walk).
    pub fn normal_targets_for_replay(&self, session: SessionId, object_id: ObjectId) -> Vec<(i32, String)> {
        self.entries
            .iter()
            .filter(|e| {
                e.key().session == session
                    && e.key().object_id == object_id
                    && *e.value() == SubscriptionKind::Normal
            })
            .map(|e| (e.key().code, e.key().topic.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid() -> SessionId {
        SessionId::next()
    }

    #[test]
    fn exact_match_fires() {
        let reg = SubscriptionRegistry::new();
        let s = sid();
        reg.subscribe(s, ObjectId::new(1), 10, "t1", SubscriptionKind::Normal);
        let targets = reg.broadcast_targets(10, "t1");
        assert_eq!(targets, vec![Subscriber { session: s, object_id: ObjectId::new(1) }]);
    }

    #[test]
    fn empty_topic_subscriber_catches_nonempty_broadcast_when_no_exact_entry() {
        let reg = SubscriptionRegistry::new();
        let s = sid();
        reg.subscribe(s, ObjectId::new(1), 10, "", SubscriptionKind::Normal);
        let targets = reg.broadcast_targets(10, "specific");
        assert_eq!(targets.len(), 1);
    }

    #[test]
    fn exact_entry_in_one_bucket_does_not_suppress_wildcard_in_another_bucket() {
        // Open Question 2 / scenario 4: per-(session, object_id) scoping.
        let reg = SubscriptionRegistry::new();
        let s1 = sid();
        let s2 = sid();
        reg.subscribe(s1, ObjectId::new(1), 10, "specific", SubscriptionKind::Normal);
        reg.subscribe(s2, ObjectId::new(1), 10, "", SubscriptionKind::Normal);
        let targets = reg.broadcast_targets(10, "specific");
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn manual_update_entries_never_appear_in_broadcast_targets() {
        let reg = SubscriptionRegistry::new();
        let s = sid();
        reg.subscribe(s, ObjectId::new(1), 10, "t1", SubscriptionKind::ManualUpdate);
        assert!(reg.broadcast_targets(10, "t1").is_empty());
        assert_eq!(reg.manual_update_targets(10).len(), 1);
    }

    #[test]
    fn drop_session_erases_all_its_entries() {
        let reg = SubscriptionRegistry::new();
        let s = sid();
        reg.subscribe(s, ObjectId::new(1), 10, "t1", SubscriptionKind::Normal);
        reg.drop_session(s);
        assert!(reg.broadcast_targets(10, "t1").is_empty());
    }

    proptest::proptest! {
        /// Spec §8's wildcard rule, generalized over an arbitrary non-empty
        /// topic: an empty-topic subscription on one session always
        /// receives the broadcast, and an exact subscription on that same
        /// topic on a second session always receives it too — neither
        /// entry ever suppresses the other's own bucket.
        #[test]
        fn wildcard_and_exact_subscribers_each_always_receive_their_own_bucket(topic in "[a-z]{1,8}") {
            let reg = SubscriptionRegistry::new();
            let wildcard_session = sid();
            let exact_session = sid();
            reg.subscribe(wildcard_session, ObjectId::new(1), 10, "", SubscriptionKind::Normal);
            reg.subscribe(exact_session, ObjectId::new(1), 10, topic.clone(), SubscriptionKind::Normal);

            let targets = reg.broadcast_targets(10, &topic);
            let wildcard_expected = Subscriber { session: wildcard_session, object_id: ObjectId::new(1) };
            let exact_expected = Subscriber { session: exact_session, object_id: ObjectId::new(1) };
            proptest::prop_assert!(targets.contains(&wildcard_expected));
            proptest::prop_assert!(targets.contains(&exact_expected));
            proptest::prop_assert_eq!(targets.len(), 2);
        }
    }
}
