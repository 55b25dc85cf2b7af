//! Per-request context — the request-local layer of the cache.
//!
//! A [`RequestScope`] is a type-erased map from cache key to an already computed
//! result. One scope is opened per logical request with [`run`] and stays bound to
//! that request's task across every `.await` inside it. Concurrent requests each get
//! their own scope and never observe each other's entries.
//!
//! The binding is a tokio task-local, so it does **not** follow work handed to
//! `tokio::spawn`. To carry a scope into another task, take the handle with
//! [`RequestScope::current`] and bind it there with [`RequestScope::enter`]. The
//! same handle can also be passed explicitly to a query through
//! [`QueryOptions::scope`](crate::cache::QueryOptions::scope).

use std::{
    any::Any,
    collections::HashMap,
    fmt,
    future::Future,
    sync::{Arc, Mutex},
};

use crate::cache::lock::mutex_lock;

const SOURCE: &str = "context";

type Entries = HashMap<String, Arc<dyn Any + Send + Sync>>;

tokio::task_local! {
    static CURRENT: RequestScope;
}

/// Handle to one request's local result map.
///
/// Cloning the handle shares the map; it does not copy it.
#[derive(Clone, Default)]
pub struct RequestScope {
    entries: Arc<Mutex<Entries>>,
}

impl RequestScope {
    /// Create a new, empty scope that is not yet bound to any task.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the scope bound to the current task, if any.
    ///
    /// Outside of [`run`] / [`RequestScope::enter`] this is `None`, which the
    /// coordinator treats as "request-local caching disabled".
    pub fn current() -> Option<Self> {
        CURRENT.try_with(Clone::clone).ok()
    }

    /// Runs `fut` with this scope bound as the current one.
    ///
    /// Binding inside an already bound scope shadows the outer scope until `fut`
    /// completes.
    pub async fn enter<F>(self, fut: F) -> F::Output
    where
        F: Future,
    {
        CURRENT.scope(self, fut).await
    }

    /// Get the value stored under `key`, if present and of type `T`.
    ///
    /// Returns `Some(Err(type_name))` when a value exists but has another type.
    pub(crate) fn get<T>(&self, key: &str) -> Option<Result<T, &'static str>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let entries = mutex_lock(&self.entries, SOURCE, "get");
        entries.get(key).map(|value| {
            value
                .downcast_ref::<T>()
                .cloned()
                .ok_or(std::any::type_name::<T>())
        })
    }

    /// Store `value` under `key`, replacing anything already there.
    pub fn insert<T>(&self, key: impl Into<String>, value: T)
    where
        T: Send + Sync + 'static,
    {
        mutex_lock(&self.entries, SOURCE, "insert").insert(key.into(), Arc::new(value));
    }

    /// Returns `true` if the scope holds an entry for `key`.
    pub fn contains(&self, key: &str) -> bool {
        mutex_lock(&self.entries, SOURCE, "contains").contains_key(key)
    }

    /// Remove the entry for `key`, returning whether one was present.
    pub fn remove(&self, key: &str) -> bool {
        mutex_lock(&self.entries, SOURCE, "remove")
            .remove(key)
            .is_some()
    }

    /// Drop every entry in the scope.
    pub fn clear(&self) {
        mutex_lock(&self.entries, SOURCE, "clear").clear();
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "len").len()
    }

    /// Returns `true` if the scope holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for RequestScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestScope")
            .field("entries", &self.len())
            .finish()
    }
}

/// Runs `body` inside a fresh, empty request scope.
///
/// Every cached query awaited (directly or transitively) by `body` shares this
/// scope. The scope is discarded when `body` completes; its output, including any
/// error it carries, is returned unchanged.
///
/// # Examples
///
/// ```rust
/// use reqcache::context::{self, RequestScope};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let inside = context::run(async { RequestScope::current().is_some() }).await;
/// assert!(inside);
/// assert!(RequestScope::current().is_none());
/// # }
/// ```
pub async fn run<F>(body: F) -> F::Output
where
    F: Future,
{
    RequestScope::new().enter(body).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_scope_is_empty() {
        let scope = RequestScope::new();
        assert!(scope.is_empty());
        assert_eq!(scope.len(), 0);
    }

    #[test]
    fn insert_get_remove() {
        let scope = RequestScope::new();
        scope.insert("a", 1_u32);
        assert!(scope.contains("a"));
        assert_eq!(scope.get::<u32>("a"), Some(Ok(1)));
        assert!(scope.remove("a"));
        assert!(!scope.remove("a"));
        assert_eq!(scope.get::<u32>("a"), None);
    }

    #[test]
    fn get_with_wrong_type_reports_expected_type() {
        let scope = RequestScope::new();
        scope.insert("a", String::from("x"));
        assert_eq!(scope.get::<u32>("a"), Some(Err("u32")));
    }

    #[test]
    fn clones_share_entries() {
        let scope = RequestScope::new();
        let other = scope.clone();
        other.insert("k", "v");
        assert!(scope.contains("k"));
        scope.clear();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn no_scope_outside_run() {
        assert!(RequestScope::current().is_none());
    }

    #[tokio::test]
    async fn scope_survives_await_points() {
        run(async {
            RequestScope::current().unwrap().insert("k", 7_i64);
            tokio::task::yield_now().await;
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            let scope = RequestScope::current().unwrap();
            assert_eq!(scope.get::<i64>("k"), Some(Ok(7)));
        })
        .await;
    }

    #[tokio::test]
    async fn each_run_gets_a_fresh_scope() {
        run(async { RequestScope::current().unwrap().insert("k", 1_u8) }).await;
        run(async { assert!(RequestScope::current().unwrap().is_empty()) }).await;
    }

    #[tokio::test]
    async fn nested_scope_shadows_outer() {
        run(async {
            RequestScope::current().unwrap().insert("outer", 1_u8);
            run(async {
                let inner = RequestScope::current().unwrap();
                assert!(!inner.contains("outer"));
                inner.insert("inner", 2_u8);
            })
            .await;
            let outer = RequestScope::current().unwrap();
            assert!(outer.contains("outer"));
            assert!(!outer.contains("inner"));
        })
        .await;
    }

    #[tokio::test]
    async fn concurrent_scopes_are_isolated() {
        let a = run(async {
            RequestScope::current().unwrap().insert("k", "a");
            tokio::task::yield_now().await;
            RequestScope::current().unwrap().get::<&str>("k")
        });
        let b = run(async {
            tokio::task::yield_now().await;
            let scope = RequestScope::current().unwrap();
            let seen = scope.contains("k");
            scope.insert("k", "b");
            (seen, scope.get::<&str>("k"))
        });

        let (a, (b_saw_a, b)) = tokio::join!(a, b);
        assert_eq!(a, Some(Ok("a")));
        assert!(!b_saw_a);
        assert_eq!(b, Some(Ok("b")));
    }

    #[tokio::test]
    async fn enter_carries_scope_into_spawned_task() {
        let scope = RequestScope::new();
        let handle = scope.clone();
        tokio::spawn(handle.enter(async {
            RequestScope::current().unwrap().insert("spawned", true);
        }))
        .await
        .unwrap();
        assert_eq!(scope.get::<bool>("spawned"), Some(Ok(true)));
    }
}
