//! # Local Storage
//!
//! Reactive view over a `StorageBackend`. Writes made through `LocalStorage`
//! notify subscribers in the same context synchronously; writes made by other
//! contexts arrive as `StorageEvent`s and are applied by `handle_event`.
//! A context never receives events for its own writes, so a write notifies
//! the originating context once (directly) and every other context once (bus).
//!
//! Without a backend (`LocalStorage::detached`) every key is absent and no
//! notification is ever sent.

use std::sync::{Arc, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use super::backend::{StorageBackend, StorageEvent};
use super::registry::{Callback, Subscription, SubscriptionRegistry};
use crate::error::StoreError;

/// Reactive key-value store, with or without a backend
#[derive(Clone)]
pub enum LocalStorage {
    /// No storage available; every key reads as absent
    Detached,
    /// Backed by persistent storage
    Live(Arc<LiveStorage>),
}

/// Backend plus the registry of this context's subscriptions
pub struct LiveStorage {
    backend: Arc<dyn StorageBackend>,
    registry: Arc<SubscriptionRegistry>,
}

impl LocalStorage {
    pub fn detached() -> Self {
        Self::Detached
    }

    /// Live store with its own registry
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self::with_registry(backend, SubscriptionRegistry::new())
    }

    /// Live store sharing an existing registry
    pub fn with_registry(
        backend: Arc<dyn StorageBackend>,
        registry: Arc<SubscriptionRegistry>,
    ) -> Self {
        Self::Live(Arc::new(LiveStorage { backend, registry }))
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live(_))
    }

    /// Registry of the live store
    pub fn registry(&self) -> Option<&Arc<SubscriptionRegistry>> {
        match self {
            Self::Detached => None,
            Self::Live(live) => Some(&live.registry),
        }
    }

    /// Handle bound to a single key
    pub fn key(&self, key: impl Into<String>) -> KeyStore {
        KeyStore {
            storage: self.clone(),
            key: key.into(),
        }
    }

    /// Current value of `key`
    pub fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self {
            Self::Detached => Ok(None),
            Self::Live(live) => live.backend.get_item(key),
        }
    }

    /// Subscribe to `key`; `callback` runs now with the current value and
    /// again on every change until the returned token is dropped
    pub fn subscribe(
        &self,
        key: &str,
        callback: impl Fn(Option<&str>) + Send + Sync + 'static,
    ) -> Result<Subscription, StoreError> {
        self.subscribe_callback(key, Arc::new(callback))
    }

    fn subscribe_callback(&self, key: &str, callback: Callback) -> Result<Subscription, StoreError> {
        match self {
            Self::Detached => {
                callback(None);
                Ok(Subscription::inert())
            }
            Self::Live(live) => {
                let backend = Arc::clone(&live.backend);
                live.registry
                    .subscribe(key, || backend.get_item(key), callback)
            }
        }
    }

    /// Write `value` (`None` deletes the key) and notify this context's subscribers
    pub fn set(&self, key: &str, value: Option<&str>) -> Result<(), StoreError> {
        match value {
            Some(value) => self.set_item(key, value),
            None => self.remove_item(key),
        }
    }

    pub fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if let Self::Live(live) = self {
            live.backend.set_item(key, value)?;
            live.registry.notify(key, Some(value));
        }
        Ok(())
    }

    pub fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        if let Self::Live(live) = self {
            live.backend.remove_item(key)?;
            live.registry.notify(key, None);
        }
        Ok(())
    }

    /// Remove every key; all subscribed keys are notified with absent
    pub fn clear(&self) -> Result<(), StoreError> {
        if let Self::Live(live) = self {
            live.backend.clear()?;
            live.registry.notify_all_absent();
        }
        Ok(())
    }

    /// Apply a change notification from another context
    pub fn handle_event(&self, event: &StorageEvent) {
        if let Self::Live(live) = self {
            live.apply(event);
        }
    }

    /// Spawn a task applying foreign storage events until the store is dropped
    ///
    /// Returns `None` when detached or when the backend has no event stream.
    pub fn listen(&self) -> Option<JoinHandle<()>> {
        let Self::Live(live) = self else {
            return None;
        };
        let mut events = live.backend.events()?;
        let weak: Weak<LiveStorage> = Arc::downgrade(live);

        Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => match weak.upgrade() {
                        Some(live) => live.apply(&event),
                        None => break,
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Storage listener lagged, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            tracing::debug!("Storage listener stopped");
        }))
    }
}

impl LiveStorage {
    fn apply(&self, event: &StorageEvent) {
        if event.source == self.backend.area_id() {
            return;
        }
        match &event.key {
            Some(key) => self.registry.notify(key, event.new_value.as_deref()),
            None => self.registry.notify_all_absent(),
        }
    }
}

/// A subscribable raw string value
pub trait RawStore: Send + Sync {
    fn key(&self) -> &str;

    fn get(&self) -> Result<Option<String>, StoreError>;

    fn set(&self, value: Option<&str>) -> Result<(), StoreError>;

    fn subscribe_callback(&self, callback: Callback) -> Result<Subscription, StoreError>;

    /// Replace the value with `f(current)`
    fn update(
        &self,
        f: impl FnOnce(Option<String>) -> Option<String>,
    ) -> Result<(), StoreError>
    where
        Self: Sized,
    {
        let next = f(self.get()?);
        self.set(next.as_deref())
    }
}

/// `LocalStorage` bound to one key
#[derive(Clone)]
pub struct KeyStore {
    storage: LocalStorage,
    key: String,
}

impl KeyStore {
    pub fn subscribe(
        &self,
        callback: impl Fn(Option<&str>) + Send + Sync + 'static,
    ) -> Result<Subscription, StoreError> {
        self.subscribe_callback(Arc::new(callback))
    }
}

impl RawStore for KeyStore {
    fn key(&self) -> &str {
        &self.key
    }

    fn get(&self) -> Result<Option<String>, StoreError> {
        self.storage.get(&self.key)
    }

    fn set(&self, value: Option<&str>) -> Result<(), StoreError> {
        self.storage.set(&self.key, value)
    }

    fn subscribe_callback(&self, callback: Callback) -> Result<Subscription, StoreError> {
        self.storage.subscribe_callback(&self.key, callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::shared::SharedStorage;
    use std::sync::Mutex;
    use std::time::Duration;

    type Seen = Arc<Mutex<Vec<Option<String>>>>;

    fn recorder() -> (Seen, impl Fn(Option<&str>) + Send + Sync + 'static) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |value: Option<&str>| {
            sink.lock().unwrap().push(value.map(String::from))
        })
    }

    fn values(seen: &Seen) -> Vec<Option<String>> {
        seen.lock().unwrap().clone()
    }

    fn some(value: &str) -> Option<String> {
        Some(value.to_string())
    }

    #[test]
    fn test_detached_store() {
        let storage = LocalStorage::detached();
        let (seen, callback) = recorder();

        let _sub = storage.subscribe("theme", callback).unwrap();
        storage.set("theme", Some("dark")).unwrap();
        storage.clear().unwrap();

        assert_eq!(storage.get("theme").unwrap(), None);
        assert_eq!(values(&seen), vec![None]);
        assert!(storage.listen().is_none());
    }

    #[test]
    fn test_set_then_remove_notifies_in_order() {
        let storage = LocalStorage::new(Arc::new(SharedStorage::in_memory().area()));
        let (first_seen, first) = recorder();
        let (second_seen, second) = recorder();

        let _a = storage.subscribe("k", first).unwrap();
        let _b = storage.key("k").subscribe(second).unwrap();

        storage.set("k", Some("x")).unwrap();
        storage.set("k", None).unwrap();

        assert_eq!(storage.get("k").unwrap(), None);
        assert_eq!(values(&first_seen), vec![None, some("x"), None]);
        assert_eq!(values(&second_seen), vec![None, some("x"), None]);
    }

    #[test]
    fn test_repeated_writes_notify_only_on_change() {
        let storage = LocalStorage::new(Arc::new(SharedStorage::in_memory().area()));
        let (seen, callback) = recorder();
        let _sub = storage.subscribe("k", callback).unwrap();

        storage.set("k", Some("x")).unwrap();
        storage.set("k", Some("x")).unwrap();
        storage.set("k", None).unwrap();
        storage.set("k", None).unwrap();

        assert_eq!(values(&seen), vec![None, some("x"), None]);
    }

    #[test]
    fn test_subscribe_sees_stored_value() {
        let area = SharedStorage::in_memory().area();
        area.set_item("lang", "en").unwrap();
        let storage = LocalStorage::new(Arc::new(area));
        let (seen, callback) = recorder();

        let _sub = storage.subscribe("lang", callback).unwrap();
        assert_eq!(values(&seen), vec![some("en")]);
    }

    #[test]
    fn test_foreign_event_notifies_once_and_own_event_is_ignored() {
        let shared = SharedStorage::in_memory();
        let here = LocalStorage::new(Arc::new(shared.area()));
        let there = LocalStorage::new(Arc::new(shared.area()));
        let mut bus = shared.area().events().unwrap();

        let (here_seen, here_cb) = recorder();
        let (there_seen, there_cb) = recorder();
        let _h = here.subscribe("k", here_cb).unwrap();
        let _t = there.subscribe("k", there_cb).unwrap();

        here.set("k", Some("v")).unwrap();
        let event = bus.try_recv().unwrap();

        // Delivered to both contexts; only the other one reacts
        here.handle_event(&event);
        there.handle_event(&event);

        assert_eq!(values(&here_seen), vec![None, some("v")]);
        assert_eq!(values(&there_seen), vec![None, some("v")]);
    }

    #[test]
    fn test_foreign_clear_notifies_every_key() {
        let shared = SharedStorage::in_memory();
        let writer = shared.area();
        let storage = LocalStorage::new(Arc::new(shared.area()));
        let mut bus = shared.area().events().unwrap();

        writer.set_item("a", "1").unwrap();
        let _ = bus.try_recv();

        let (seen_a, a) = recorder();
        let (seen_b, b) = recorder();
        let _a = storage.subscribe("a", a).unwrap();
        let _b = storage.subscribe("b", b).unwrap();

        writer.clear().unwrap();
        storage.handle_event(&bus.try_recv().unwrap());

        assert_eq!(values(&seen_a), vec![some("1"), None]);
        // Already absent, still notified exactly once
        assert_eq!(values(&seen_b), vec![None, None]);
    }

    #[test]
    fn test_update_reads_current_value() {
        let storage = LocalStorage::new(Arc::new(SharedStorage::in_memory().area()));
        let counter = storage.key("visits");

        for _ in 0..3 {
            counter
                .update(|current| {
                    let n: u32 = current.and_then(|v| v.parse().ok()).unwrap_or(0);
                    Some((n + 1).to_string())
                })
                .unwrap();
        }

        assert_eq!(counter.get().unwrap(), some("3"));
    }

    #[tokio::test]
    async fn test_listen_applies_events_from_other_contexts() {
        let shared = SharedStorage::in_memory();
        let other = LocalStorage::new(Arc::new(shared.area()));
        let storage = LocalStorage::new(Arc::new(shared.area()));
        let handle = storage.listen().unwrap();

        let (seen, callback) = recorder();
        let _sub = storage.subscribe("k", callback).unwrap();

        other.set("k", Some("remote")).unwrap();
        storage.set("k", Some("local")).unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while values(&seen).len() < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let seen = values(&seen);
        assert_eq!(seen.len(), 3, "{:?}", seen);
        assert!(seen.contains(&some("remote")));
        assert!(seen.contains(&some("local")));

        drop(storage);
        drop(other);
        handle.abort();
    }
}
