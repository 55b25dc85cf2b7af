//! Error types shared by the cache layers.
//!
//! [`CacheError`] is what [`cached_query`](crate::cache::QueryCache::cached_query)
//! converts its own failures into. Errors returned by the query function itself are
//! never wrapped: they come back to the caller exactly as the query produced them.

use thiserror::Error;

/// Boxed error used at the boundaries where the concrete type belongs to the caller.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by a [`PersistentStore`](crate::cache::PersistentStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store was shut down and must not be used again.
    #[error("store has been closed")]
    Closed,

    /// The backend (network, disk, remote cache…) rejected the operation.
    #[error("store backend error: {0}")]
    Backend(#[source] BoxError),

    /// A value could not be encoded or decoded by the backend.
    #[error("store codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl StoreError {
    /// Wraps any backend error, for use by external store implementations.
    pub fn backend<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Backend(err.into())
    }
}

/// Errors raised by the cache coordinator.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The call options are unusable, e.g. no key while auto-keying is off.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A persistent-store operation failed. Never downgraded to a cache miss.
    #[error("persistent store `{op}` failed: {source}")]
    Store {
        op: &'static str,
        #[source]
        source: StoreError,
    },

    /// A result could not be converted to or from its cached representation.
    #[error("failed to convert cached value for key `{key}`: {source}")]
    Codec {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The argument list could not be serialized into an auto-generated key.
    #[error("failed to serialize query arguments for an auto-generated key: {0}")]
    Arguments(#[source] serde_json::Error),

    /// The request scope holds a value of another type under this key.
    #[error("request scope holds a value for key `{key}` that is not a `{expected}`")]
    TypeMismatch { key: String, expected: &'static str },

    /// A query failure, for callers that use `CacheError` as their query error type.
    #[error("query failed: {0}")]
    Query(#[source] BoxError),
}

impl CacheError {
    /// Wraps a query function's error.
    pub fn query<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Query(err.into())
    }

    pub(crate) fn store(op: &'static str, source: StoreError) -> Self {
        Self::Store { op, source }
    }

    /// Returns `true` for [`CacheError::Configuration`].
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}
