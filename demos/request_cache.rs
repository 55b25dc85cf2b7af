//! Runs a few simulated requests through a cached pipeline.
//!
//! ```text
//! RUST_LOG=reqcache=debug cargo run --example request_cache
//! ```

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use reqcache::{
    CacheError, QueryCache, QueryOptions,
    middleware::{Pipeline, RequestCacheMiddleware, ScopeStatsMiddleware},
};
use tracing_subscriber::EnvFilter;

// Stand-in for a database round trip.
async fn load_user(id: u64, reads: &AtomicUsize) -> Result<String, CacheError> {
    reads.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(5)).await;
    Ok(format!("user-{id}"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("reqcache=debug")),
        )
        .init();

    let cache = Arc::new(QueryCache::new());
    let reads = Arc::new(AtomicUsize::new(0));

    let pipeline = Pipeline::new({
        let (cache, reads) = (Arc::clone(&cache), Arc::clone(&reads));
        move |id: u64| {
            let (cache, reads) = (Arc::clone(&cache), Arc::clone(&reads));
            async move {
                // The profile and the header both need the user; only one read happens.
                let mut parts = Vec::new();
                for section in ["header", "profile"] {
                    let options = QueryOptions::new()
                        .auto_key(true)
                        .prefix("users")
                        .args(id)
                        .ttl(Duration::from_millis(200));
                    let reads = Arc::clone(&reads);
                    let query = |id| async move { load_user(id, &reads).await };
                    let user = cache.cached_query(options, query).await?;
                    parts.push(format!("{section}:{user}"));
                }
                Ok::<_, CacheError>(parts.join(" "))
            }
        }
    })
    .layer(RequestCacheMiddleware)
    .layer(ScopeStatsMiddleware);

    for id in [1, 1, 2] {
        println!("{}", pipeline.call(id).await?);
    }
    println!("database reads: {}", reads.load(Ordering::SeqCst));

    cache.close_default_store();
    Ok(())
}
