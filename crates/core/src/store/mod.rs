//! # Store Module
//!
//! Reactive key-value storage that stays in sync across execution contexts.
//!
//! ## Architecture
//!
//! ```text
//!        JsonStore<T> (typed projection)
//!                    ↓
//!     KeyStore ── LocalStorage (Detached | Live) ── SubscriptionRegistry
//!                    ↓
//!   StorageBackend (StorageArea of a SharedStorage: memory or SQLite)
//!                    ↓
//!       broadcast bus of StorageEvent → other contexts' `listen()`
//! ```

pub mod backend;
pub mod json;
pub mod local;
pub mod registry;
pub mod shared;

pub use backend::{AreaId, StorageBackend, StorageEvent};
pub use json::JsonStore;
pub use local::{KeyStore, LiveStorage, LocalStorage, RawStore};
pub use registry::{Callback, Subscription, SubscriptionRegistry};
pub use shared::{SharedStorage, StorageArea};
