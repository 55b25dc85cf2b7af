//! Caching layer — request-local memoization backed by an optional TTL store.
//!
//! ## Core types
//!
//! - [`QueryCache`] — coordinator; [`QueryCache::cached_query`] is the single entry point.
//! - [`QueryOptions`] — per-call key, arguments, TTL, store override and refresh flag.
//! - [`PersistentStore`] — capability trait for cross-request stores.
//! - [`MemoryStore`] — in-process reference store with background expiry.
//! - [`CacheConfig`] — shared settings such as the sweep interval.
//!
//! The request-local layer lives in [`crate::context`].

mod config;
mod coordinator;
mod key;
pub(crate) mod lock;
mod memory;
mod store;

pub use config::{CacheConfig, DEFAULT_SWEEP_INTERVAL};
pub use coordinator::{QueryCache, QueryOptions, cached_query, close_default_store, global};
pub use key::{canonical_args, derive_key, hash_key};
pub use memory::MemoryStore;
pub use store::PersistentStore;
