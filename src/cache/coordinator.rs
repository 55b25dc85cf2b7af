//! The cache coordinator: one entry point that layers the request scope and the
//! persistent store in front of an async query.

use std::{
    fmt,
    future::Future,
    sync::{Arc, Mutex, OnceLock},
    time::Duration,
};

use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, info};

use super::{
    config::CacheConfig, key::derive_key, lock::mutex_lock, memory::MemoryStore,
    store::PersistentStore,
};
use crate::{context::RequestScope, error::CacheError};

const SOURCE: &str = "cache::coordinator";

/// Per-call options for [`QueryCache::cached_query`].
///
/// Everything has a default: no key, no auto-keying, empty prefix, `()` arguments,
/// cross-request caching off, the cache's default store, no forced refresh, and the
/// request scope bound to the current task.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use reqcache::cache::QueryOptions;
///
/// let by_key = QueryOptions::keyed("user:42").ttl(Duration::from_secs(30));
/// let by_args = QueryOptions::new().auto_key(true).prefix("users").args((42, "active"));
/// # let _ = (by_key, by_args);
/// ```
pub struct QueryOptions<A = ()> {
    key: Option<String>,
    auto_key: bool,
    prefix: String,
    args: A,
    ttl: Duration,
    store: Option<Arc<dyn PersistentStore>>,
    force_refresh: bool,
    scope: Option<RequestScope>,
}

impl Default for QueryOptions<()> {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryOptions<()> {
    pub fn new() -> Self {
        Self {
            key: None,
            auto_key: false,
            prefix: String::new(),
            args: (),
            ttl: Duration::ZERO,
            store: None,
            force_refresh: false,
            scope: None,
        }
    }

    /// Shorthand for `QueryOptions::new().key(key)`.
    pub fn keyed(key: impl Into<String>) -> Self {
        Self::new().key(key)
    }
}

impl<A> QueryOptions<A> {
    /// Explicit cache key. Required unless [`auto_key`](Self::auto_key) is set.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Derive the key from a hash of the arguments instead of using [`key`](Self::key).
    pub fn auto_key(mut self, enabled: bool) -> Self {
        self.auto_key = enabled;
        self
    }

    /// Namespace for derived keys, producing `"<prefix>:<digest>"`.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Arguments handed to the query function and hashed when auto-keying.
    ///
    /// For hashing, `args` is read as an argument list: a tuple or sequence is the
    /// list itself, `()` is the empty list, and any other value is a single argument,
    /// so `.args(42)` and `.args((42,))` derive the same key. See
    /// [`canonical_args`](super::canonical_args).
    pub fn args<B>(self, args: B) -> QueryOptions<B> {
        QueryOptions {
            key: self.key,
            auto_key: self.auto_key,
            prefix: self.prefix,
            args,
            ttl: self.ttl,
            store: self.store,
            force_refresh: self.force_refresh,
            scope: self.scope,
        }
    }

    /// Lifetime of the cross-request entry. Zero disables the persistent layer.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// [`ttl`](Self::ttl) in milliseconds.
    pub fn ttl_ms(self, ttl_ms: u64) -> Self {
        self.ttl(Duration::from_millis(ttl_ms))
    }

    /// Use `store` instead of the cache's default in-memory store.
    pub fn store(mut self, store: Arc<dyn PersistentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Skip both cache layers on read; the fresh result is still written back.
    pub fn force_refresh(mut self, force: bool) -> Self {
        self.force_refresh = force;
        self
    }

    /// Use this request scope instead of the one bound to the current task.
    pub fn scope(mut self, scope: RequestScope) -> Self {
        self.scope = Some(scope);
        self
    }
}

impl<A> fmt::Debug for QueryOptions<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryOptions")
            .field("key", &self.key)
            .field("auto_key", &self.auto_key)
            .field("prefix", &self.prefix)
            .field("ttl", &self.ttl)
            .field("store", &self.store.as_ref().map(|store| store.name()))
            .field("force_refresh", &self.force_refresh)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Cache context: configuration plus the lazily created default persistent store.
///
/// Most applications use one `QueryCache` for the whole process (see [`global`]);
/// tests build their own so instances stay isolated.
///
/// # Examples
///
/// ```rust
/// use reqcache::{cache::{QueryCache, QueryOptions}, context, CacheError};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), CacheError> {
/// let cache = QueryCache::new();
///
/// let name = context::run(async {
///     cache
///         .cached_query(QueryOptions::keyed("user:1"), |()| async {
///             Ok::<_, CacheError>(String::from("ada"))
///         })
///         .await
/// })
/// .await?;
///
/// assert_eq!(name, "ada");
/// # Ok(())
/// # }
/// ```
pub struct QueryCache {
    config: CacheConfig,
    default_store: Mutex<Option<Arc<MemoryStore>>>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryCache {
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    pub fn with_config(config: CacheConfig) -> Self {
        Self {
            config,
            default_store: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Returns the default store, creating it on first use.
    pub fn default_store(&self) -> Arc<MemoryStore> {
        let mut slot = mutex_lock(&self.default_store, SOURCE, "default_store");
        Arc::clone(slot.get_or_insert_with(|| {
            info!(
                sweep_interval = ?self.config.sweep_interval,
                "creating default memory store"
            );
            Arc::new(MemoryStore::with_config(&self.config))
        }))
    }

    /// Stops the default store's sweep and drops it.
    ///
    /// Its entries are lost; the next call that needs a persistent store creates a
    /// fresh one.
    pub fn close_default_store(&self) {
        let store = mutex_lock(&self.default_store, SOURCE, "close").take();
        if let Some(store) = store {
            store.close();
            info!("default memory store closed");
        }
    }

    fn resolve_store(
        &self,
        explicit: Option<Arc<dyn PersistentStore>>,
    ) -> Arc<dyn PersistentStore> {
        match explicit {
            Some(store) => store,
            None => self.default_store(),
        }
    }

    /// Returns the cached result for the call described by `options`, running
    /// `query_fn` only on a miss.
    ///
    /// Lookup order:
    ///
    /// 1. derive the key (explicit or hashed from the arguments);
    /// 2. the request scope, when one is active and `force_refresh` is off;
    /// 3. the persistent store, when the TTL is non-zero and `force_refresh` is off.
    ///    A hit is copied into the request scope;
    /// 4. otherwise `query_fn(args)`. Its result is written to the persistent store
    ///    (TTL non-zero) and to the request scope (if any).
    ///
    /// Concurrent calls for the same key are not coalesced: each miss runs the query.
    ///
    /// # Errors
    ///
    /// - An error returned by `query_fn` is passed back unchanged and nothing is cached.
    /// - [`CacheError::Configuration`] when no key is given and auto-keying is off;
    ///   raised before any lookup.
    /// - [`CacheError::Store`] when the persistent store fails. A failing read is not
    ///   treated as a miss.
    /// - [`CacheError::Codec`] / [`CacheError::TypeMismatch`] when a cached value
    ///   cannot be turned back into a `T`.
    pub async fn cached_query<A, T, E, F, Fut>(
        &self,
        options: QueryOptions<A>,
        query_fn: F,
    ) -> Result<T, E>
    where
        A: Serialize,
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        E: From<CacheError>,
        F: FnOnce(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let QueryOptions {
            key,
            auto_key,
            prefix,
            args,
            ttl,
            store,
            force_refresh,
            scope,
        } = options;

        let key = derive_key(key.as_deref(), auto_key, &prefix, &args)?;
        let scope = scope.or_else(RequestScope::current);

        if !force_refresh {
            if let Some(scope) = &scope {
                match scope.get::<T>(&key) {
                    Some(Ok(value)) => {
                        debug!(key = %key, layer = "scope", outcome = "hit", "cached query");
                        return Ok(value);
                    }
                    Some(Err(expected)) => {
                        return Err(CacheError::TypeMismatch { key, expected }.into());
                    }
                    None => {}
                }
            }
        }

        let store = (!ttl.is_zero()).then(|| self.resolve_store(store));

        if let Some(store) = &store {
            if !force_refresh {
                let cached = store
                    .get(&key)
                    .await
                    .map_err(|source| CacheError::store("get", source))?;

                if let Some(raw) = cached {
                    let value: T = serde_json::from_value(raw).map_err(|source| CacheError::Codec {
                        key: key.clone(),
                        source,
                    })?;
                    debug!(key = %key, layer = store.name(), outcome = "hit", "cached query");
                    if let Some(scope) = &scope {
                        scope.insert(key, value.clone());
                    }
                    return Ok(value);
                }
            }
        }

        let outcome = if force_refresh { "refresh" } else { "miss" };
        debug!(key = %key, outcome, "running query");
        let value = query_fn(args).await?;

        // The persistent write goes first so a failing store leaves the scope untouched.
        if let Some(store) = &store {
            let encoded = serde_json::to_value(&value).map_err(|source| CacheError::Codec {
                key: key.clone(),
                source,
            })?;
            store
                .set(&key, encoded, Some(ttl))
                .await
                .map_err(|source| CacheError::store("set", source))?;
        }

        if let Some(scope) = &scope {
            scope.insert(key, value.clone());
        }

        Ok(value)
    }

    /// Removes `key` from the current request scope (if any) and from `store`, or
    /// from the default store when `store` is `None`.
    ///
    /// A default store that has not been created yet holds nothing, so it is left
    /// uncreated.
    ///
    /// # Errors
    ///
    /// [`CacheError::Store`] if the persistent delete fails.
    pub async fn invalidate(
        &self,
        key: &str,
        store: Option<Arc<dyn PersistentStore>>,
    ) -> Result<(), CacheError> {
        if let Some(scope) = RequestScope::current() {
            scope.remove(key);
        }

        if let Some(store) = store.or_else(|| self.existing_default_store()) {
            store
                .delete(key)
                .await
                .map_err(|source| CacheError::store("delete", source))?;
        }
        debug!(key, "invalidated cache entry");
        Ok(())
    }

    fn existing_default_store(&self) -> Option<Arc<dyn PersistentStore>> {
        let slot = mutex_lock(&self.default_store, SOURCE, "existing_default_store");
        slot.clone().map(|store| store as Arc<dyn PersistentStore>)
    }
}

impl fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let store = mutex_lock(&self.default_store, SOURCE, "debug");
        f.debug_struct("QueryCache")
            .field("config", &self.config)
            .field("default_store", &*store)
            .finish()
    }
}

static GLOBAL: OnceLock<QueryCache> = OnceLock::new();

/// The process-wide [`QueryCache`], built with the default configuration.
pub fn global() -> &'static QueryCache {
    GLOBAL.get_or_init(QueryCache::new)
}

/// [`QueryCache::cached_query`] on the process-wide cache.
pub async fn cached_query<A, T, E, F, Fut>(options: QueryOptions<A>, query_fn: F) -> Result<T, E>
where
    A: Serialize,
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    E: From<CacheError>,
    F: FnOnce(A) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    global().cached_query(options, query_fn).await
}

/// Closes the process-wide default store; call during shutdown or test teardown.
pub fn close_default_store() {
    if let Some(cache) = GLOBAL.get() {
        cache.close_default_store();
    }
}
