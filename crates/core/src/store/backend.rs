use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::StoreError;

/// Identity of one execution context's view of a shared storage area
pub type AreaId = u64;

/// Change notification delivered to the other contexts sharing a storage area
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEvent {
    /// Changed key, `None` when the whole area was cleared
    pub key: Option<String>,
    pub old_value: Option<String>,
    /// New value, `None` when the key was removed
    pub new_value: Option<String>,
    /// Area that performed the write
    pub source: AreaId,
}

impl StorageEvent {
    pub fn is_clear(&self) -> bool {
        self.key.is_none()
    }
}

/// A persistent string key-value store
pub trait StorageBackend: Send + Sync {
    /// Identity of this view; events it caused carry the same id
    fn area_id(&self) -> AreaId;

    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn remove_item(&self, key: &str) -> Result<(), StoreError>;

    fn clear(&self) -> Result<(), StoreError>;

    /// Stream of changes made through any view of the same storage.
    /// `None` if the backend has no cross-context notifications.
    fn events(&self) -> Option<broadcast::Receiver<StorageEvent>> {
        None
    }
}
