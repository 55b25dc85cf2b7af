//! In-memory persistent store with lazy and periodic expiry.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, Mutex, RwLock, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, trace, warn};

use super::{
    config::CacheConfig,
    lock::{mutex_lock, rw_read, rw_write},
    store::PersistentStore,
};
use crate::error::StoreError;

const SOURCE: &str = "cache::memory";

struct Entry {
    value: Value,
    // `None` means the entry lives until it is deleted.
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

struct Inner {
    entries: RwLock<HashMap<String, Entry>>,
    closed: AtomicBool,
}

impl Inner {
    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "purge_expired");
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }
}

/// Process-local [`PersistentStore`] backed by a hash map.
///
/// Expired entries are never returned. They are removed lazily when a read runs
/// into them, and in bulk by a background task every
/// [`sweep_interval`](CacheConfig::sweep_interval) so keys that are never read again
/// do not pile up.
///
/// The sweep task needs a tokio runtime; a store built outside one only expires
/// lazily. Call [`close`](Self::close) at shutdown to stop the sweep. A closed store
/// rejects every operation with [`StoreError::Closed`].
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use reqcache::cache::{MemoryStore, PersistentStore};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), reqcache::StoreError> {
/// let store = MemoryStore::new();
/// store.set("greeting", "hi".into(), Some(Duration::from_secs(1))).await?;
/// assert_eq!(store.get("greeting").await?, Some("hi".into()));
/// store.close();
/// # Ok(())
/// # }
/// ```
pub struct MemoryStore {
    inner: Arc<Inner>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a store that sweeps every 60 seconds.
    pub fn new() -> Self {
        Self::with_config(&CacheConfig::default())
    }

    /// Create a store using the sweep interval from `config`.
    pub fn with_config(config: &CacheConfig) -> Self {
        let inner = Arc::new(Inner {
            entries: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        });

        let sweeper = if config.sweep_enabled() {
            spawn_sweeper(Arc::downgrade(&inner), config.sweep_interval)
        } else {
            None
        };

        Self {
            inner,
            sweeper: Mutex::new(sweeper),
        }
    }

    /// Remove every expired entry now, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        self.inner.purge_expired()
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        rw_read(&self.inner.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop the background sweep and release all entries.
    ///
    /// Idempotent. The store must not be used afterwards.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = mutex_lock(&self.sweeper, SOURCE, "close").take() {
            handle.abort();
        }
        rw_write(&self.inner.entries, SOURCE, "close").clear();
        debug!(store = "memory", "memory store closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.is_closed() {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }
}

// The task holds only a weak reference so a dropped store is not kept alive by it.
fn spawn_sweeper(inner: Weak<Inner>, period: Duration) -> Option<JoinHandle<()>> {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        warn!(
            store = "memory",
            "no tokio runtime available, expired entries are only purged on read"
        );
        return None;
    };

    Some(runtime.spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            let Some(inner) = inner.upgrade() else { break };
            if inner.closed.load(Ordering::SeqCst) {
                break;
            }
            let purged = inner.purge_expired();
            if purged > 0 {
                debug!(store = "memory", purged, "swept expired entries");
            }
        }
    }))
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.ensure_open()?;
        let now = Instant::now();

        {
            let entries = rw_read(&self.inner.entries, SOURCE, "get");
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }

        // Re-check under the write lock: a concurrent `set` may have refreshed it.
        let mut entries = rw_write(&self.inner.entries, SOURCE, "get.expire");
        if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(key);
            trace!(store = "memory", key, "dropped expired entry on read");
            return Ok(None);
        }
        Ok(entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.ensure_open()?;
        // A deadline past what `Instant` can represent is treated as no deadline.
        let expires_at = ttl
            .filter(|ttl| !ttl.is_zero())
            .and_then(|ttl| Instant::now().checked_add(ttl));

        rw_write(&self.inner.entries, SOURCE, "set")
            .insert(key.to_owned(), Entry { value, expires_at });
        trace!(store = "memory", key, ttl = ?ttl, "stored entry");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.ensure_open()?;
        rw_write(&self.inner.entries, SOURCE, "delete").remove(key);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        if let Some(handle) = mutex_lock(&self.sweeper, SOURCE, "drop").take() {
            handle.abort();
        }
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entries", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;

    fn store() -> MemoryStore {
        MemoryStore::with_config(&CacheConfig::new().with_sweep_interval(Duration::ZERO))
    }

    // ── get / set / delete ────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn set_then_get_before_expiry() {
        let store = store();
        store
            .set("key1", json!("value1"), Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(store.get("key1").await.unwrap(), Some(json!("value1")));
    }

    #[tokio::test(start_paused = true)]
    async fn get_after_expiry_is_absent_and_purges() {
        let store = store();
        store
            .set("key2", json!("value2"), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("key2").await.unwrap(), None);
        assert_eq!(store.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_is_inclusive_of_deadline() {
        let store = store();
        store
            .set("k", json!(1), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_millis(10)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn no_ttl_never_expires() {
        let store = store();
        store.set("forever", json!(true), None).await.unwrap();
        store
            .set("zero", json!(false), Some(Duration::ZERO))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(3600 * 24)).await;

        assert_eq!(store.get("forever").await.unwrap(), Some(json!(true)));
        assert_eq!(store.get("zero").await.unwrap(), Some(json!(false)));
    }

    #[tokio::test(start_paused = true)]
    async fn unrepresentable_ttl_never_expires() {
        let store = store();
        store
            .set("huge", json!("kept"), Some(Duration::MAX))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(3600 * 24 * 365)).await;
        assert_eq!(store.get("huge").await.unwrap(), Some(json!("kept")));
    }

    #[tokio::test]
    async fn delete_removes_key() {
        let store = store();
        store
            .set("key3", json!("value3"), Some(Duration::from_secs(1)))
            .await
            .unwrap();
        store.delete("key3").await.unwrap();
        assert_eq!(store.get("key3").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_missing_key_is_ok() {
        assert!(store().delete("nope").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn set_overwrites_value_and_expiry() {
        let store = store();
        store
            .set("k", json!(1), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        store.set("k", json!(2), None).await.unwrap();
        tokio::time::advance(Duration::from_millis(50)).await;
        assert_eq!(store.get("k").await.unwrap(), Some(json!(2)));
    }

    // ── sweep ─────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn purge_expired_counts_removed_entries() {
        let store = store();
        store
            .set("short", json!(1), Some(Duration::from_millis(1)))
            .await
            .unwrap();
        store.set("long", json!(2), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn background_sweep_purges_unread_entries() {
        let store = MemoryStore::new();
        store
            .set("stale", json!("x"), Some(Duration::from_secs(1)))
            .await
            .unwrap();
        store.set("kept", json!("y"), None).await.unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(store.len(), 2);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(store.len(), 1);
        store.close();
    }

    #[test]
    fn store_without_runtime_has_no_sweeper() {
        let store = MemoryStore::new();
        assert!(mutex_lock(&store.sweeper, SOURCE, "test").is_none());
    }

    // ── close ─────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn close_stops_sweep_and_rejects_use() {
        let store = MemoryStore::new();
        store.set("k", json!(1), None).await.unwrap();
        store.close();
        store.close();

        assert!(store.is_closed());
        assert!(store.is_empty());
        assert!(mutex_lock(&store.sweeper, SOURCE, "test").is_none());
        assert!(matches!(store.get("k").await, Err(StoreError::Closed)));
        assert!(matches!(
            store.set("k", json!(1), None).await,
            Err(StoreError::Closed)
        ));
        assert!(matches!(store.delete("k").await, Err(StoreError::Closed)));
    }

    // ── concurrency ───────────────────────────────────────────────────────────

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writes_to_same_key() {
        let store = Arc::new(store());
        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store.set("shared", json!(i), None).await.unwrap();
                    store.get("shared").await.unwrap()
                })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap().is_some());
        }
        assert_eq!(store.len(), 1);
    }
}
