//! # reqcache
//!
//! Request-scoped memoization for async query functions, with an optional
//! cross-request cache whose entries expire after a TTL.
//!
//! Each inbound request runs inside a [`context::run`] scope (usually opened by
//! [`middleware::RequestCacheMiddleware`]). Inside it, [`cache::QueryCache::cached_query`]
//! answers repeated queries from the request scope, then from a
//! [`cache::PersistentStore`] when a TTL is set, and only runs the query on a full miss.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::time::Duration;
//! use reqcache::{CacheError, QueryCache, QueryOptions, context};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), CacheError> {
//! let cache = QueryCache::new();
//!
//! let user = context::run(async {
//!     let options = QueryOptions::new()
//!         .auto_key(true)
//!         .prefix("users")
//!         .args(42_u64)
//!         .ttl(Duration::from_secs(30));
//!
//!     cache
//!         .cached_query(options, |id| async move {
//!             Ok::<_, CacheError>(format!("user #{id}"))
//!         })
//!         .await
//! })
//! .await?;
//!
//! assert_eq!(user, "user #42");
//! cache.close_default_store();
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod context;
pub mod error;
pub mod middleware;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{
    CacheConfig, MemoryStore, PersistentStore, QueryCache, QueryOptions, cached_query,
    close_default_store, global, hash_key,
};
pub use context::RequestScope;
pub use error::{BoxError, CacheError, StoreError};
