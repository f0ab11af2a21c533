//! # Shared Storage
//!
//! Origin-scoped key-value storage shared by several execution contexts.
//! Each context gets its own `StorageArea`; a write through one area is
//! broadcast as a `StorageEvent` to every subscriber of the shared bus.
//! Supports in-memory and SQLite persistence.

use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

use super::backend::{AreaId, StorageBackend, StorageEvent};
use crate::db::HarborDb;
use crate::error::StoreError;

/// Capacity of the cross-context event bus
const EVENT_CAPACITY: usize = 256;

/// Persistence selection
enum Persistence {
    /// Lost when the last handle is dropped
    Memory(Mutex<BTreeMap<String, String>>),
    /// `local_storage` table of the shared HarborDb
    Sqlite(Arc<Mutex<Connection>>),
}

impl Persistence {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self {
            Persistence::Memory(map) => Ok(map
                .lock()
                .map_err(|e| StoreError::backend(format!("Lock error: {}", e)))?
                .get(key)
                .cloned()),
            Persistence::Sqlite(conn) => {
                let conn = conn
                    .lock()
                    .map_err(|e| StoreError::backend(format!("Lock error: {}", e)))?;
                conn.query_row(
                    "SELECT value FROM local_storage WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()
                .map_err(StoreError::backend)
            }
        }
    }

    /// Store `value` (or delete when `None`), returning the previous value
    fn replace(&self, key: &str, value: Option<&str>) -> Result<Option<String>, StoreError> {
        match self {
            Persistence::Memory(map) => {
                let mut map = map
                    .lock()
                    .map_err(|e| StoreError::backend(format!("Lock error: {}", e)))?;
                Ok(match value {
                    Some(value) => map.insert(key.to_string(), value.to_string()),
                    None => map.remove(key),
                })
            }
            Persistence::Sqlite(conn) => {
                let mut conn = conn
                    .lock()
                    .map_err(|e| StoreError::backend(format!("Lock error: {}", e)))?;
                let tx = conn.transaction().map_err(StoreError::backend)?;
                let old: Option<String> = tx
                    .query_row(
                        "SELECT value FROM local_storage WHERE key = ?1",
                        params![key],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(StoreError::backend)?;
                let written = match value {
                    Some(value) => tx.execute(
                        r#"
                        INSERT INTO local_storage (key, value) VALUES (?1, ?2)
                        ON CONFLICT(key) DO UPDATE SET value = ?2
                        "#,
                        params![key, value],
                    ),
                    None => tx.execute("DELETE FROM local_storage WHERE key = ?1", params![key]),
                };
                written.map_err(StoreError::backend)?;
                tx.commit().map_err(StoreError::backend)?;
                Ok(old)
            }
        }
    }

    /// Remove everything, returning whether anything was stored
    fn clear(&self) -> Result<bool, StoreError> {
        match self {
            Persistence::Memory(map) => {
                let mut map = map
                    .lock()
                    .map_err(|e| StoreError::backend(format!("Lock error: {}", e)))?;
                let had_entries = !map.is_empty();
                map.clear();
                Ok(had_entries)
            }
            Persistence::Sqlite(conn) => {
                let conn = conn
                    .lock()
                    .map_err(|e| StoreError::backend(format!("Lock error: {}", e)))?;
                let removed = conn
                    .execute("DELETE FROM local_storage", [])
                    .map_err(StoreError::backend)?;
                Ok(removed > 0)
            }
        }
    }
}

struct SharedInner {
    persistence: Persistence,
    events: broadcast::Sender<StorageEvent>,
    next_area: AtomicU64,
}

/// Storage shared by every context of one origin
#[derive(Clone)]
pub struct SharedStorage {
    inner: Arc<SharedInner>,
}

impl SharedStorage {
    /// Ephemeral storage
    pub fn in_memory() -> Self {
        Self::with_persistence(Persistence::Memory(Mutex::new(BTreeMap::new())))
    }

    /// Storage persisted in the `local_storage` table
    pub fn sqlite(db: &HarborDb) -> Self {
        Self::with_persistence(Persistence::Sqlite(db.connection()))
    }

    fn with_persistence(persistence: Persistence) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(SharedInner {
                persistence,
                events,
                next_area: AtomicU64::new(1),
            }),
        }
    }

    /// A new view for one execution context
    pub fn area(&self) -> StorageArea {
        StorageArea {
            id: self.inner.next_area.fetch_add(1, Ordering::Relaxed),
            shared: Arc::clone(&self.inner),
        }
    }
}

/// One context's view of a `SharedStorage`
#[derive(Clone)]
pub struct StorageArea {
    id: AreaId,
    shared: Arc<SharedInner>,
}

impl StorageArea {
    fn publish(&self, key: Option<&str>, old_value: Option<String>, new_value: Option<&str>) {
        let event = StorageEvent {
            key: key.map(String::from),
            old_value,
            new_value: new_value.map(String::from),
            source: self.id,
        };
        // No receivers is fine: nobody else is listening
        let _ = self.shared.events.send(event);
    }
}

impl StorageBackend for StorageArea {
    fn area_id(&self) -> AreaId {
        self.id
    }

    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.shared.persistence.get(key)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let old = self.shared.persistence.replace(key, Some(value))?;
        if old.as_deref() != Some(value) {
            self.publish(Some(key), old, Some(value));
        }
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        let old = self.shared.persistence.replace(key, None)?;
        if old.is_some() {
            self.publish(Some(key), old, None);
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        if self.shared.persistence.clear()? {
            self.publish(None, None, None);
        }
        Ok(())
    }

    fn events(&self) -> Option<broadcast::Receiver<StorageEvent>> {
        Some(self.shared.events.subscribe())
    }
}
