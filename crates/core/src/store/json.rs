//! # JSON Store
//!
//! Typed projection of a raw string store. Reads always parse the current raw
//! value; nothing parsed is cached. An absent value yields the configured
//! default (or `JsonStoreError::Missing`), a malformed one always yields
//! `JsonStoreError::Decode`.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;

use super::local::{KeyStore, RawStore};
use super::registry::Subscription;
use crate::error::JsonStoreError;

type DefaultFn<T> = Arc<dyn Fn() -> T + Send + Sync>;

/// JSON view of a raw store
pub struct JsonStore<T, S = KeyStore> {
    raw: S,
    default: Option<DefaultFn<T>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T, S: Clone> Clone for JsonStore<T, S> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            default: self.default.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T, S> JsonStore<T, S>
where
    T: Serialize + DeserializeOwned + 'static,
    S: RawStore,
{
    /// No default: an absent value reads as `JsonStoreError::Missing`
    pub fn new(raw: S) -> Self {
        Self {
            raw,
            default: None,
            _marker: PhantomData,
        }
    }

    /// Absent values read as a clone of `value`
    pub fn with_default(self, value: T) -> Self
    where
        T: Clone + Send + Sync,
    {
        self.with_default_fn(move || value.clone())
    }

    /// Absent values read as `f()`
    pub fn with_default_fn(mut self, f: impl Fn() -> T + Send + Sync + 'static) -> Self {
        self.default = Some(Arc::new(f));
        self
    }

    pub fn raw(&self) -> &S {
        &self.raw
    }

    /// Parse the current raw value
    pub fn get(&self) -> Result<T, JsonStoreError> {
        let raw = self.raw.get()?;
        decode(self.raw.key(), raw.as_deref(), self.default.as_ref())
    }

    /// Serialize and write `value`
    pub fn set(&self, value: &T) -> Result<(), JsonStoreError> {
        let encoded = serde_json::to_string(value).map_err(|source| JsonStoreError::Encode {
            key: self.raw.key().to_string(),
            source,
        })?;
        self.raw.set(Some(&encoded))?;
        Ok(())
    }

    /// Replace the value with `f(current)`
    pub fn update(&self, f: impl FnOnce(T) -> T) -> Result<(), JsonStoreError> {
        let next = f(self.get()?);
        self.set(&next)
    }

    /// Delete the underlying raw value
    pub fn remove(&self) -> Result<(), JsonStoreError> {
        self.raw.set(None)?;
        Ok(())
    }

    /// Subscribe to parsed values; decode failures are delivered as errors
    pub fn subscribe(
        &self,
        callback: impl Fn(Result<T, JsonStoreError>) + Send + Sync + 'static,
    ) -> Result<Subscription, JsonStoreError> {
        let key = self.raw.key().to_string();
        let default = self.default.clone();

        let subscription = self.raw.subscribe_callback(Arc::new(move |raw: Option<&str>| {
            let decoded = decode(&key, raw, default.as_ref());
            if let Err(JsonStoreError::Decode { source, .. }) = &decoded {
                tracing::warn!(key = %key, error = %source, "Stored value is not valid JSON");
            }
            callback(decoded)
        }))?;

        Ok(subscription)
    }
}

fn decode<T: DeserializeOwned>(
    key: &str,
    raw: Option<&str>,
    default: Option<&DefaultFn<T>>,
) -> Result<T, JsonStoreError> {
    match raw {
        Some(raw) => serde_json::from_str(raw).map_err(|source| JsonStoreError::Decode {
            key: key.to_string(),
            source,
        }),
        None => match default {
            Some(default) => Ok(default()),
            None => Err(JsonStoreError::Missing(key.to_string())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::local::LocalStorage;
    use crate::store::shared::SharedStorage;
    use serde::Deserialize;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Prefs {
        theme: String,
        font_size: u8,
    }

    fn default_prefs() -> Prefs {
        Prefs {
            theme: "light".to_string(),
            font_size: 14,
        }
    }

    fn storage() -> LocalStorage {
        LocalStorage::new(Arc::new(SharedStorage::in_memory().area()))
    }

    #[test]
    fn test_absent_uses_default_and_malformed_is_error() {
        let storage = storage();
        let prefs = JsonStore::new(storage.key("prefs")).with_default_fn(default_prefs);

        assert_eq!(prefs.get().unwrap(), default_prefs());

        storage.set("prefs", Some("not-json")).unwrap();
        let err = prefs.get().unwrap_err();
        assert!(matches!(err, JsonStoreError::Decode { .. }), "{:?}", err);
    }

    #[test]
    fn test_absent_without_default_is_missing() {
        let store: JsonStore<Prefs> = JsonStore::new(storage().key("prefs"));
        assert!(matches!(store.get(), Err(JsonStoreError::Missing(key)) if key == "prefs"));
    }

    #[test]
    fn test_set_update_and_remove() {
        let storage = storage();
        let prefs = JsonStore::new(storage.key("prefs")).with_default(default_prefs());

        prefs
            .update(|mut p| {
                p.theme = "dark".to_string();
                p
            })
            .unwrap();

        assert_eq!(
            storage.get("prefs").unwrap().as_deref(),
            Some(r#"{"theme":"dark","font_size":14}"#)
        );
        assert_eq!(prefs.get().unwrap().theme, "dark");

        prefs.remove().unwrap();
        assert_eq!(prefs.get().unwrap(), default_prefs());
    }

    #[test]
    fn test_reads_are_never_cached() {
        let storage = storage();
        let count: JsonStore<u32> = JsonStore::new(storage.key("count")).with_default(0);

        count.set(&5).unwrap();
        assert_eq!(count.get().unwrap(), 5);

        // Raw write behind the projection's back
        storage.set_item("count", "6").unwrap();
        assert_eq!(count.get().unwrap(), 6);
    }

    #[test]
    fn test_subscribe_delivers_parsed_values_and_errors() {
        let storage = storage();
        let count: JsonStore<u32> = JsonStore::new(storage.key("count")).with_default(0);
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let _sub = count
            .subscribe(move |value| {
                let entry = match value {
                    Ok(n) => n.to_string(),
                    Err(JsonStoreError::Decode { .. }) => "decode".to_string(),
                    Err(other) => other.to_string(),
                };
                sink.lock().unwrap().push(entry);
            })
            .unwrap();

        count.set(&1).unwrap();
        storage.set_item("count", "{oops").unwrap();
        storage.remove_item("count").unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["0", "1", "decode", "0"]);
    }
}
