//! Subscription Registry
//!
//! Per-hub bookkeeping of the Desired topic set and the callbacks attached to
//! each topic. Pure in-memory state, no I/O.
//!
//! # Design
//!
//! The registry tracks:
//! - Which topics the caller currently wants (the Desired set)
//! - An ordered callback list per topic (registration order, duplicates allowed)
//! - A unique id per registration so one callback can be removed by handle
//!
//! A single `RwLock` guards the map. Dispatch takes a snapshot of the
//! callbacks under the read lock and runs them after releasing it, so a
//! callback may itself subscribe or unsubscribe without deadlocking.

use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde_json::Value;

use crate::domain::topic::Topic;

// =============================================================================
// Types
// =============================================================================

/// Error returned by a failing callback.
pub type CallbackError = Box<dyn Error + Send + Sync>;

/// Result of one callback invocation.
pub type CallbackResult = Result<(), CallbackError>;

/// A registered event callback: `(topic_key, payload)`.
///
/// The payload is passed through verbatim from the wire.
pub type Callback = Arc<dyn Fn(&str, &Value) -> CallbackResult + Send + Sync>;

/// Identifies one callback registration.
///
/// Returned by `add` and accepted by `remove`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    topic: Topic,
    id: u64,
}

impl SubscriptionHandle {
    /// Get the topic this registration belongs to.
    #[must_use]
    pub const fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Get the registration id (unique per registry).
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.topic, self.id)
    }
}

/// Outcome of adding a callback.
#[derive(Debug, Clone)]
pub struct Registration {
    /// Handle for targeted removal.
    pub handle: SubscriptionHandle,
    /// True when the topic was not desired before this call.
    pub topic_added: bool,
}

/// Outcome of removing a callback by handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// The handle was not registered (already removed, or topic cleared).
    NotFound,
    /// The callback was removed; other callbacks keep the topic desired.
    CallbackRemoved,
    /// The last callback was removed and the topic left the Desired set.
    TopicRemoved,
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of desired topics.
    pub topics: usize,
    /// Number of registered callbacks across all topics.
    pub callbacks: usize,
}

struct Entry {
    id: u64,
    callback: Callback,
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Thread-safe registry of desired topics and their callbacks.
pub struct SubscriptionRegistry {
    topics: RwLock<BTreeMap<Topic, Vec<Entry>>>,
    next_id: AtomicU64,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            topics: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Append a callback to a topic, creating the topic if needed.
    pub fn add(&self, topic: Topic, callback: Callback) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut topics = self.topics.write();

        let entries = topics.entry(topic.clone()).or_default();
        let topic_added = entries.is_empty();
        entries.push(Entry { id, callback });

        Registration {
            handle: SubscriptionHandle { topic, id },
            topic_added,
        }
    }

    /// Remove a single callback by handle.
    ///
    /// The topic is dropped from the Desired set when its last callback goes.
    pub fn remove(&self, handle: &SubscriptionHandle) -> Removal {
        let mut topics = self.topics.write();

        let Some(entries) = topics.get_mut(&handle.topic) else {
            return Removal::NotFound;
        };
        let Some(position) = entries.iter().position(|entry| entry.id == handle.id) else {
            return Removal::NotFound;
        };

        entries.remove(position);
        if entries.is_empty() {
            topics.remove(&handle.topic);
            Removal::TopicRemoved
        } else {
            Removal::CallbackRemoved
        }
    }

    /// Remove every callback for a topic.
    ///
    /// Returns true if the topic was desired.
    pub fn remove_all(&self, topic: &Topic) -> bool {
        self.topics.write().remove(topic).is_some()
    }

    /// Snapshot the callbacks for a topic in registration order.
    #[must_use]
    pub fn callbacks_for(&self, topic: &Topic) -> Vec<Callback> {
        self.topics.read().get(topic).map_or_else(Vec::new, |entries| {
            entries
                .iter()
                .map(|entry| Arc::clone(&entry.callback))
                .collect()
        })
    }

    /// Get the Desired set.
    #[must_use]
    pub fn all_topics(&self) -> BTreeSet<Topic> {
        self.topics.read().keys().cloned().collect()
    }

    /// Check whether a topic is desired.
    #[must_use]
    pub fn contains(&self, topic: &Topic) -> bool {
        self.topics.read().contains_key(topic)
    }

    /// Check whether no topic is desired.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.topics.read().is_empty()
    }

    /// Remove every topic, returning the ones that were desired.
    pub fn clear(&self) -> BTreeSet<Topic> {
        let mut topics = self.topics.write();
        std::mem::take(&mut *topics).into_keys().collect()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let topics = self.topics.read();
        RegistryStats {
            topics: topics.len(),
            callbacks: topics.values().map(Vec::len).sum(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::thread;

    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    fn noop() -> Callback {
        Arc::new(|_, _| Ok(()))
    }

    fn recording(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> Callback {
        let log = Arc::clone(log);
        Arc::new(move |key, _| {
            log.lock().unwrap().push(format!("{tag}:{key}"));
            Ok(())
        })
    }

    #[test]
    fn add_first_callback_adds_topic() {
        let registry = SubscriptionRegistry::new();
        let topic = Topic::market_quote("CON.F.US.ENQ.H25");

        let registration = registry.add(topic.clone(), noop());

        assert!(registration.topic_added);
        assert_eq!(registration.handle.topic(), &topic);
        assert!(registry.contains(&topic));
    }

    #[test]
    fn add_second_callback_keeps_topic() {
        let registry = SubscriptionRegistry::new();
        let topic = Topic::market_quote("CON.F.US.ENQ.H25");

        let first = registry.add(topic.clone(), noop());
        let second = registry.add(topic.clone(), noop());

        assert!(first.topic_added);
        assert!(!second.topic_added);
        assert_ne!(first.handle.id(), second.handle.id());
        assert_eq!(registry.stats(), RegistryStats { topics: 1, callbacks: 2 });
    }

    #[test]
    fn callbacks_fire_in_registration_order() {
        let registry = SubscriptionRegistry::new();
        let topic = Topic::user_order("42");
        let log = Arc::new(Mutex::new(Vec::new()));

        registry.add(topic.clone(), recording(&log, "a"));
        registry.add(topic.clone(), recording(&log, "b"));
        registry.add(topic.clone(), recording(&log, "c"));

        for callback in registry.callbacks_for(&topic) {
            callback("42", &json!({})).unwrap();
        }

        assert_eq!(*log.lock().unwrap(), vec!["a:42", "b:42", "c:42"]);
    }

    #[test]
    fn remove_one_handle_leaves_sibling() {
        let registry = SubscriptionRegistry::new();
        let topic = Topic::market_trade("CON.F.US.ENQ.H25");
        let log = Arc::new(Mutex::new(Vec::new()));

        let first = registry.add(topic.clone(), recording(&log, "first"));
        registry.add(topic.clone(), recording(&log, "second"));

        assert_eq!(registry.remove(&first.handle), Removal::CallbackRemoved);
        assert!(registry.contains(&topic));

        for callback in registry.callbacks_for(&topic) {
            callback("CON.F.US.ENQ.H25", &json!({})).unwrap();
        }
        assert_eq!(*log.lock().unwrap(), vec!["second:CON.F.US.ENQ.H25"]);
    }

    #[test]
    fn remove_last_handle_removes_topic() {
        let registry = SubscriptionRegistry::new();
        let topic = Topic::market_depth("CON.F.US.ENQ.H25");

        let registration = registry.add(topic.clone(), noop());

        assert_eq!(registry.remove(&registration.handle), Removal::TopicRemoved);
        assert!(!registry.contains(&topic));
        assert!(registry.is_empty());
    }

    #[test]
    fn remove_twice_is_not_found() {
        let registry = SubscriptionRegistry::new();
        let registration = registry.add(Topic::user_trade("1"), noop());

        registry.remove(&registration.handle);
        assert_eq!(registry.remove(&registration.handle), Removal::NotFound);
    }

    #[test]
    fn stale_handle_does_not_remove_new_registration() {
        let registry = SubscriptionRegistry::new();
        let topic = Topic::user_position("1");

        let old = registry.add(topic.clone(), noop());
        assert!(registry.remove_all(&topic));
        registry.add(topic.clone(), noop());

        assert_eq!(registry.remove(&old.handle), Removal::NotFound);
        assert!(registry.contains(&topic));
    }

    #[test]
    fn remove_all_drops_every_callback() {
        let registry = SubscriptionRegistry::new();
        let topic = Topic::user_account("9");

        registry.add(topic.clone(), noop());
        registry.add(topic.clone(), noop());

        assert!(registry.remove_all(&topic));
        assert!(registry.callbacks_for(&topic).is_empty());
        assert!(!registry.remove_all(&topic));
    }

    #[test]
    fn callbacks_for_unknown_topic_is_empty() {
        let registry = SubscriptionRegistry::new();
        assert!(registry.callbacks_for(&Topic::market_quote("X")).is_empty());
    }

    #[test]
    fn different_kinds_same_key_are_independent() {
        let registry = SubscriptionRegistry::new();
        let key = "CON.F.US.ENQ.H25";

        registry.add(Topic::market_quote(key), noop());
        registry.add(Topic::market_trade(key), noop());
        registry.remove_all(&Topic::market_quote(key));

        assert!(!registry.contains(&Topic::market_quote(key)));
        assert!(registry.contains(&Topic::market_trade(key)));
    }

    #[test]
    fn all_topics_lists_desired_set() {
        let registry = SubscriptionRegistry::new();
        registry.add(Topic::market_quote("A"), noop());
        registry.add(Topic::market_quote("A"), noop());
        registry.add(Topic::market_depth("B"), noop());

        let topics = registry.all_topics();
        assert_eq!(topics.len(), 2);
        assert!(topics.contains(&Topic::market_quote("A")));
        assert!(topics.contains(&Topic::market_depth("B")));
    }

    #[test]
    fn clear_returns_previous_topics() {
        let registry = SubscriptionRegistry::new();
        registry.add(Topic::user_order("1"), noop());
        registry.add(Topic::user_trade("1"), noop());

        let cleared = registry.clear();

        assert_eq!(cleared.len(), 2);
        assert!(registry.is_empty());
        assert_eq!(registry.stats(), RegistryStats::default());
    }

    #[test]
    fn snapshot_is_unaffected_by_later_removal() {
        let registry = SubscriptionRegistry::new();
        let topic = Topic::market_quote("A");
        let registration = registry.add(topic.clone(), noop());

        let snapshot = registry.callbacks_for(&topic);
        registry.remove(&registration.handle);

        assert_eq!(snapshot.len(), 1);
        assert!(registry.callbacks_for(&topic).is_empty());
    }

    #[test]
    fn callback_may_mutate_registry_during_dispatch() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let topic = Topic::market_quote("A");

        let inner = Arc::clone(&registry);
        registry.add(
            topic.clone(),
            Arc::new(move |key, _| {
                inner.add(Topic::market_trade(key), Arc::new(|_, _| Ok(())));
                Ok(())
            }),
        );

        for callback in registry.callbacks_for(&topic) {
            callback("A", &json!({})).unwrap();
        }

        assert!(registry.contains(&Topic::market_trade("A")));
    }

    #[test]
    fn thread_safety_concurrent_add_and_dispatch() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let mut handles = vec![];

        for i in 0..10 {
            let registry = Arc::clone(&registry);
            handles.push(thread::spawn(move || {
                let topic = Topic::market_quote(format!("C{}", i % 3));
                for _ in 0..100 {
                    let registration = registry.add(topic.clone(), Arc::new(|_, _| Ok(())));
                    for callback in registry.callbacks_for(&topic) {
                        callback("k", &Value::Null).unwrap();
                    }
                    registry.remove(&registration.handle);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(registry.is_empty());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(u8),
        RemoveHandle(usize),
        RemoveAll(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..4).prop_map(Op::Add),
            (0usize..16).prop_map(Op::RemoveHandle),
            (0u8..4).prop_map(Op::RemoveAll),
        ]
    }

    proptest! {
        #[test]
        fn desired_set_matches_topics_with_callbacks(ops in prop::collection::vec(op(), 0..64)) {
            let registry = SubscriptionRegistry::new();
            let mut handles: Vec<SubscriptionHandle> = Vec::new();
            let mut model: BTreeMap<Topic, usize> = BTreeMap::new();

            for op in ops {
                match op {
                    Op::Add(n) => {
                        let topic = Topic::market_quote(n.to_string());
                        let registration = registry.add(topic.clone(), noop());
                        let count = model.entry(topic).or_default();
                        prop_assert_eq!(registration.topic_added, *count == 0);
                        *count += 1;
                        handles.push(registration.handle);
                    }
                    Op::RemoveHandle(i) => {
                        if handles.is_empty() {
                            continue;
                        }
                        let handle = handles.remove(i % handles.len());
                        let removal = registry.remove(&handle);
                        if let Some(count) = model.get_mut(handle.topic()) {
                            *count -= 1;
                            if *count == 0 {
                                model.remove(handle.topic());
                                prop_assert_eq!(removal, Removal::TopicRemoved);
                            } else {
                                prop_assert_eq!(removal, Removal::CallbackRemoved);
                            }
                        }
                    }
                    Op::RemoveAll(n) => {
                        let topic = Topic::market_quote(n.to_string());
                        prop_assert_eq!(registry.remove_all(&topic), model.remove(&topic).is_some());
                        handles.retain(|handle| handle.topic() != &topic);
                    }
                }
            }

            let expected: BTreeSet<Topic> = model.keys().cloned().collect();
            prop_assert_eq!(registry.all_topics(), expected);
            prop_assert_eq!(registry.stats().callbacks, model.values().sum::<usize>());
        }
    }
}
