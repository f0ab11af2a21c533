//! # Subscription Registry
//!
//! Process-wide table of active key subscriptions. One entry per key holds the
//! last known value and every subscriber callback for that key. The entry is
//! created by the first subscription and removed when the last one is dropped.
//!
//! Callbacks are always invoked with the registry lock released, so a callback
//! may read, write or unsubscribe freely.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Subscriber callback, receives the new value (`None` = absent)
pub type Callback = Arc<dyn Fn(Option<&str>) + Send + Sync>;

struct KeyEntry {
    current: Option<String>,
    subscribers: Vec<(u64, Callback)>,
}

/// Registry of key subscriptions shared by every store handle of a context
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: Mutex<HashMap<String, KeyEntry>>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, KeyEntry>> {
        // A panicking subscriber never holds the lock, so poisoning is benign
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register `callback` for `key` and invoke it with the current value
    ///
    /// `load` reads the initial value and only runs when this is the first
    /// subscription to `key`; later subscribers share the cached value.
    pub fn subscribe<E>(
        self: &Arc<Self>,
        key: &str,
        load: impl FnOnce() -> Result<Option<String>, E>,
        callback: Callback,
    ) -> Result<Subscription, E> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let current = {
            let mut entries = self.lock();
            let entry = match entries.entry(key.to_string()) {
                Entry::Occupied(occupied) => occupied.into_mut(),
                Entry::Vacant(vacant) => {
                    let current = load()?;
                    tracing::trace!(key, "Registry entry created");
                    vacant.insert(KeyEntry {
                        current,
                        subscribers: Vec::new(),
                    })
                }
            };
            entry.subscribers.push((id, Arc::clone(&callback)));
            entry.current.clone()
        };

        callback(current.as_deref());

        Ok(Subscription {
            registry: Arc::downgrade(self),
            key: key.to_string(),
            id,
        })
    }

    /// Record a new value for `key` and notify its subscribers.
    /// Does nothing if nobody is subscribed to `key` or the value is unchanged.
    pub fn notify(&self, key: &str, value: Option<&str>) {
        let callbacks = {
            let mut entries = self.lock();
            match entries.get_mut(key) {
                Some(entry) if entry.current.as_deref() == value => return,
                Some(entry) => {
                    entry.current = value.map(String::from);
                    entry
                        .subscribers
                        .iter()
                        .map(|(_, callback)| Arc::clone(callback))
                        .collect::<Vec<_>>()
                }
                None => return,
            }
        };

        for callback in callbacks {
            callback(value);
        }
    }

    /// Notify every subscribed key that its value is now absent
    pub fn notify_all_absent(&self) {
        let callbacks = {
            let mut entries = self.lock();
            entries
                .values_mut()
                .flat_map(|entry| {
                    entry.current = None;
                    entry
                        .subscribers
                        .iter()
                        .map(|(_, callback)| Arc::clone(callback))
                        .collect::<Vec<_>>()
                })
                .collect::<Vec<_>>()
        };

        for callback in callbacks {
            callback(None);
        }
    }

    /// Last value seen by the registry for `key`, if anyone is subscribed
    pub fn current(&self, key: &str) -> Option<Option<String>> {
        self.lock().get(key).map(|entry| entry.current.clone())
    }

    pub fn is_registered(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn subscriber_count(&self, key: &str) -> usize {
        self.lock()
            .get(key)
            .map(|entry| entry.subscribers.len())
            .unwrap_or(0)
    }

    /// Keys with at least one subscriber
    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    fn unsubscribe(&self, key: &str, id: u64) {
        let mut entries = self.lock();
        if let Some(entry) = entries.get_mut(key) {
            entry.subscribers.retain(|(existing, _)| *existing != id);
            if entry.subscribers.is_empty() {
                entries.remove(key);
                tracing::trace!(key, "Registry entry removed");
            }
        }
    }
}

/// Unsubscribes when dropped
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    registry: Weak<SubscriptionRegistry>,
    key: String,
    id: u64,
}

impl Subscription {
    /// A token not attached to any registry
    pub fn inert() -> Self {
        Self {
            registry: Weak::new(),
            key: String::new(),
            id: 0,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Stop receiving notifications
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(&self.key, self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    fn recorder() -> (Arc<Mutex<Vec<Option<String>>>>, Callback) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: Callback = Arc::new(move |value: Option<&str>| {
            sink.lock().unwrap().push(value.map(String::from));
        });
        (seen, callback)
    }

    fn load(value: Option<&str>) -> impl FnOnce() -> Result<Option<String>, Infallible> + '_ {
        move || Ok(value.map(String::from))
    }

    #[test]
    fn test_shared_entry_and_initial_load() {
        let registry = SubscriptionRegistry::new();
        let (first_seen, first) = recorder();
        let (second_seen, second) = recorder();

        let _a = registry.subscribe("k", load(Some("stored")), first).unwrap();
        // Second subscriber reuses the cached value; load must not run
        let _b = registry
            .subscribe("k", || -> Result<Option<String>, Infallible> { panic!("reloaded") }, second)
            .unwrap();

        assert_eq!(registry.subscriber_count("k"), 2);
        assert_eq!(registry.keys(), vec!["k".to_string()]);
        assert_eq!(*first_seen.lock().unwrap(), vec![Some("stored".to_string())]);
        assert_eq!(*second_seen.lock().unwrap(), vec![Some("stored".to_string())]);
    }

    #[test]
    fn test_entry_removed_with_last_subscriber() {
        let registry = SubscriptionRegistry::new();
        let (seen, callback) = recorder();

        let a = registry.subscribe("k", load(None), Arc::clone(&callback)).unwrap();
        let b = registry.subscribe("k", load(None), callback).unwrap();

        drop(a);
        assert!(registry.is_registered("k"));
        registry.notify("k", Some("v"));

        b.unsubscribe();
        assert!(!registry.is_registered("k"));
        registry.notify("k", Some("ignored"));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![None, None, Some("v".to_string())]
        );
    }

    #[test]
    fn test_unchanged_value_is_not_renotified() {
        let registry = SubscriptionRegistry::new();
        let (seen, callback) = recorder();
        let _sub = registry.subscribe("k", load(None), callback).unwrap();

        registry.notify("k", Some("x"));
        registry.notify("k", Some("x"));
        registry.notify("k", None);
        registry.notify("k", None);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![None, Some("x".to_string()), None]
        );
    }

    #[test]
    fn test_notify_all_absent_reaches_every_key() {
        let registry = SubscriptionRegistry::new();
        let (seen_a, a) = recorder();
        let (seen_b, b) = recorder();

        let _a = registry.subscribe("a", load(Some("1")), a).unwrap();
        let _b = registry.subscribe("b", load(None), b).unwrap();

        registry.notify_all_absent();

        assert_eq!(*seen_a.lock().unwrap(), vec![Some("1".to_string()), None]);
        assert_eq!(*seen_b.lock().unwrap(), vec![None, None]);
        assert_eq!(registry.current("a"), Some(None));
    }

    #[test]
    fn test_callback_may_unsubscribe_reentrantly() {
        let registry = SubscriptionRegistry::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let inner = Arc::clone(&slot);

        let callback: Callback = Arc::new(move |value: Option<&str>| {
            if value == Some("stop") {
                inner.lock().unwrap().take();
            }
        });

        let subscription = registry.subscribe("k", load(None), callback).unwrap();
        *slot.lock().unwrap() = Some(subscription);

        registry.notify("k", Some("stop"));
        assert!(!registry.is_registered("k"));
    }

    #[test]
    fn test_failed_load_registers_nothing() {
        let registry = SubscriptionRegistry::new();
        let (_, callback) = recorder();

        let result = registry.subscribe("k", || Err("backend down"), callback);
        assert!(result.is_err());
        assert!(!registry.is_registered("k"));
    }
}
