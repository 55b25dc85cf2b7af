//! The persistent (cross-request) store capability.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreError;

/// A key/value store that outlives a single request and understands TTLs.
///
/// Values cross this boundary as [`serde_json::Value`] so that any backend, local or
/// remote, can hold them. Implementations must be safe to call concurrently,
/// including concurrent writes to the same key.
///
/// # Contract
///
/// - `get` returns `None` for a missing key **and** for an expired one.
/// - `set` with `ttl = None` (or a zero duration) stores the value until it is
///   deleted; otherwise the entry expires `ttl` after the write.
/// - `delete` of an absent key is not an error.
///
/// # Examples
///
/// ```rust
/// use std::{collections::HashMap, sync::Mutex, time::Duration};
///
/// use reqcache::cache::PersistentStore;
/// use reqcache::StoreError;
/// use serde_json::Value;
///
/// #[derive(Default)]
/// struct NoTtlStore(Mutex<HashMap<String, Value>>);
///
/// #[async_trait::async_trait]
/// impl PersistentStore for NoTtlStore {
///     async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
///         Ok(self.0.lock().unwrap().get(key).cloned())
///     }
///     async fn set(&self, key: &str, value: Value, _ttl: Option<Duration>) -> Result<(), StoreError> {
///         self.0.lock().unwrap().insert(key.to_owned(), value);
///         Ok(())
///     }
///     async fn delete(&self, key: &str) -> Result<(), StoreError> {
///         self.0.lock().unwrap().remove(key);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Fetch the live value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Store `value` under `key`, replacing any previous entry.
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Remove any entry stored under `key`.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Short backend name used in log records.
    fn name(&self) -> &'static str {
        "custom"
    }
}
