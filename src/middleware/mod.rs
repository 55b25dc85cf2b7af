//! Middleware pipeline — framework adapters that open a cache scope per request.
//!
//! The cache itself only needs "run this request's handler inside a fresh scope".
//! This module packages that as a small, framework-agnostic middleware stack that is
//! generic over the request and response types, so any server loop can call into it.
//!
//! ## Core types
//!
//! - [`Middleware`] — trait implemented by all middleware.
//! - [`Next`] — cursor into the remaining middleware chain; call [`Next::run`] to
//!   advance to the next layer.
//! - [`MiddlewareHandler`] — type-erased, cheaply-cloneable middleware function.
//! - [`from_middleware`] — converts a [`Middleware`] into a [`MiddlewareHandler`].
//! - [`Pipeline`] — an endpoint plus its ordered middleware stack.
//! - [`RequestCacheMiddleware`] — opens a fresh [`RequestScope`] around the rest of
//!   the chain.
//! - [`ScopeStatsMiddleware`] — logs duration and request-scope size per request.
//! - [`with_request_cache`] — wraps a bare handler function instead of a pipeline.

use std::{future::Future, pin::Pin, sync::Arc};

use tokio::time::Instant;

use crate::context::{self, RequestScope};

/// A boxed, `Send` future as returned by middleware and endpoints.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// The innermost handler of a [`Pipeline`].
pub type Endpoint<Req, Res> = Arc<dyn Fn(Req) -> BoxFuture<Res> + Send + Sync + 'static>;

/// A type-erased, reference-counted middleware function.
///
/// Every entry in the middleware stack is stored as a `MiddlewareHandler`.
/// The [`Arc`] wrapper makes handlers cheap to clone so that [`Next`] can
/// advance through the chain without copying closures.
pub type MiddlewareHandler<Req, Res> =
    Arc<dyn Fn(Req, Next<Req, Res>) -> BoxFuture<Res> + Send + Sync + 'static>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
pub fn from_middleware<Req, Res, M>(middleware: Arc<M>) -> MiddlewareHandler<Req, Res>
where
    Req: 'static,
    Res: 'static,
    M: Middleware<Req, Res> + 'static,
{
    Arc::new(move |req: Req, next: Next<Req, Res>| {
        middleware.handle(req, next)
    })
}

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is consumed by [`run`](Self::run), so it cannot be called more than once
/// per middleware invocation. Once every middleware has run, the pipeline's endpoint
/// handles the request.
pub struct Next<Req, Res> {
    middlewares: Vec<MiddlewareHandler<Req, Res>>,
    endpoint: Endpoint<Req, Res>,
    // Tracks which middleware to invoke on the next `run` call.
    index: usize,
}

impl<Req, Res> Next<Req, Res> {
    /// Creates a new `Next` positioned at the start of `middlewares`.
    pub fn new(
        middlewares: Vec<MiddlewareHandler<Req, Res>>,
        endpoint: Endpoint<Req, Res>,
    ) -> Self {
        Self {
            middlewares,
            endpoint,
            index: 0,
        }
    }

    /// Invokes the next middleware in the chain, or the endpoint when the chain is
    /// exhausted, and returns its response.
    pub async fn run(mut self, req: Req) -> Res {
        if self.index < self.middlewares.len() {
            let handler = Arc::clone(&self.middlewares[self.index]);
            self.index += 1;
            handler(req, self).await
        } else {
            (self.endpoint)(req).await
        }
    }
}

/// The core trait for all middleware.
///
/// Implementors receive the request and a [`Next`] cursor. They may pass the
/// request through, short-circuit with their own response, or decorate the
/// downstream response.
///
/// # Contract
///
/// - Implementations **must** be `Send + Sync` because middleware is shared across
///   Tokio tasks.
/// - `handle` **must** return a pinned, `Send` future.
pub trait Middleware<Req, Res>: Send + Sync {
    /// Handle the request and optionally delegate to the next middleware.
    fn handle(&self, req: Req, next: Next<Req, Res>) -> BoxFuture<Res>;
}

/// An endpoint wrapped in an ordered middleware stack.
///
/// Middleware run in the order they were added; the first one added is the
/// outermost.
///
/// # Examples
///
/// ```rust
/// use reqcache::middleware::{Pipeline, RequestCacheMiddleware};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let pipeline = Pipeline::new(|name: String| async move { format!("hello {name}") })
///     .layer(RequestCacheMiddleware);
///
/// assert_eq!(pipeline.call("ada".to_owned()).await, "hello ada");
/// # }
/// ```
pub struct Pipeline<Req, Res> {
    middlewares: Vec<MiddlewareHandler<Req, Res>>,
    endpoint: Endpoint<Req, Res>,
}

impl<Req, Res> Clone for Pipeline<Req, Res> {
    fn clone(&self) -> Self {
        Self {
            middlewares: self.middlewares.clone(),
            endpoint: Arc::clone(&self.endpoint),
        }
    }
}

impl<Req, Res> Pipeline<Req, Res>
where
    Req: 'static,
    Res: 'static,
{
    /// Creates a pipeline that hands every request to `handler`.
    pub fn new<H, F>(handler: H) -> Self
    where
        H: Fn(Req) -> F + Send + Sync + 'static,
        F: Future<Output = Res> + Send + 'static,
    {
        let endpoint: Endpoint<Req, Res> = Arc::new(move |req: Req| -> BoxFuture<Res> {
            Box::pin(handler(req))
        });
        Self {
            middlewares: Vec::new(),
            endpoint,
        }
    }

    /// Appends `middleware` to the stack.
    pub fn layer<M>(mut self, middleware: M) -> Self
    where
        M: Middleware<Req, Res> + 'static,
    {
        self.middlewares.push(from_middleware(Arc::new(middleware)));
        self
    }

    /// Number of middleware in the stack.
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Runs `req` through the stack and the endpoint.
    pub async fn call(&self, req: Req) -> Res {
        Next::new(self.middlewares.clone(), Arc::clone(&self.endpoint))
            .run(req)
            .await
    }
}

/// Opens a fresh request scope around the rest of the chain.
///
/// Every cached query awaited downstream, in later middleware or in the endpoint,
/// shares the scope for that one request. Place it before any middleware that
/// issues cached queries.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestCacheMiddleware;

impl<Req, Res> Middleware<Req, Res> for RequestCacheMiddleware
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    fn handle(&self, req: Req, next: Next<Req, Res>) -> BoxFuture<Res> {
        Box::pin(context::run(next.run(req)))
    }
}

/// Logs each request's duration and how many results its request scope holds.
///
/// Emits a single `tracing::debug!` record after the downstream chain completes.
/// Place it after [`RequestCacheMiddleware`] so it sees the scope.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScopeStatsMiddleware;

impl<Req, Res> Middleware<Req, Res> for ScopeStatsMiddleware
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    fn handle(&self, req: Req, next: Next<Req, Res>) -> BoxFuture<Res> {
        Box::pin(async move {
            let start = Instant::now();
            let response = next.run(req).await;

            let cached = RequestScope::current().map(|scope| scope.len());
            tracing::debug!(
                duration = ?start.elapsed(),
                scoped_entries = ?cached,
                "request finished"
            );

            response
        })
    }
}

/// Wraps a plain handler so each call runs inside a fresh request scope.
///
/// Useful for server loops that take a bare `Fn(Request) -> Future` rather than a
/// [`Pipeline`].
pub fn with_request_cache<Req, H, F>(
    handler: H,
) -> impl Fn(Req) -> BoxFuture<F::Output> + Send + Sync + 'static
where
    Req: 'static,
    H: Fn(Req) -> F + Send + Sync + 'static,
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    move |req: Req| -> BoxFuture<F::Output> { Box::pin(context::run(handler(req))) }
}
