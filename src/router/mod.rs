//! Request routing — map URL patterns and HTTP methods to handler functions.
//!
//! [`Router`] collects `(method, pattern, handler)` registrations during startup.
//! Starting a server consumes it and freezes the registrations into an immutable
//! [`RouteTable`] shared by every connection task, so lookups never take a lock
//! and routes cannot be added once requests are being served.
//!
//! | Pattern              | Example match              | Captured params              |
//! |----------------------|----------------------------|------------------------------|
//! | `/users`             | `/users`                   | *(none)*                     |
//! | `/users/:id`         | `/users/42`                | `id → "42"`                  |
//! | `/a/:x/:y`           | `/a/1/2`                   | `x → "1"`, `y → "2"`         |
//!
//! # Ordering contract
//!
//! Within one method, routes are tried in registration order and the first
//! pattern that matches wins. There is no "most specific match" ranking: if a
//! literal route such as `/users/me` should take precedence over `/users/:id`,
//! register it first.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::context::{Params, RequestContext};
use crate::dispatcher::Dispatcher;
use crate::http::Method;
use crate::server::{Server, ServerError};

pub mod pattern;

pub use pattern::{Pattern, PatternError, Segment};

/// Error type a handler may fail with. Any `std::error::Error` converts into it via `?`.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// What a handler returns once it has finished its work.
///
/// Returning `Ok(())` without having called a send operation is still a fault:
/// the dispatcher answers `500` on the handler's behalf.
pub type HandlerResult = Result<(), HandlerError>;

/// Type-erased, heap-allocated async handler that receives a [`RequestContext`].
///
/// Handlers are stored behind `Arc<dyn Fn(…)>` so they can be cloned into the
/// task that runs them without copying the underlying closure. In practice you
/// never construct this type directly; use [`Router::get`], [`Router::post`],
/// and the other method-specific helpers instead.
pub type Handler = Arc<dyn Fn(RequestContext) -> HandlerFuture + Send + Sync + 'static>;

/// The boxed future a [`Handler`] returns.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// Errors raised while registering a route.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error("route {method} {pattern} is already registered")]
    Duplicate { method: Method, pattern: String },
}

/// Why a `(method, path)` pair has no handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("no route matches the path")]
    NotFound,

    #[error("the path is routed, but not for this method")]
    MethodNotAllowed {
        /// Methods under which the path does match, in id order.
        allowed: Vec<Method>,
    },
}

/// One registered route.
pub struct RouteEntry {
    method: Method,
    pattern: Pattern,
    handler: Handler,
}

impl RouteEntry {
    pub fn method(&self) -> Method {
        self.method
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }
}

impl fmt::Debug for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteEntry")
            .field("method", &self.method)
            .field("pattern", &self.pattern.as_str())
            .finish_non_exhaustive()
    }
}

/// A successful lookup: the winning entry and the parameters its pattern captured.
#[derive(Debug)]
pub struct RouteMatch<'a> {
    pub entry: &'a RouteEntry,
    pub params: Params,
}

/// Routes grouped by method, each group in registration order.
#[derive(Debug, Default)]
pub struct RouteTable {
    by_method: [Vec<RouteEntry>; 5],
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a route.
    ///
    /// # Errors
    ///
    /// - [`RouteError::Pattern`] if `pattern` does not compile.
    /// - [`RouteError::Duplicate`] if the same method and pattern are already
    ///   registered; the existing route stays in place.
    pub fn register(
        &mut self,
        method: Method,
        pattern: &str,
        handler: Handler,
    ) -> Result<(), RouteError> {
        let pattern = Pattern::compile(pattern)?;
        let entries = &mut self.by_method[method.index()];

        if entries.iter().any(|e| e.pattern == pattern) {
            return Err(RouteError::Duplicate {
                method,
                pattern: pattern.as_str().to_owned(),
            });
        }

        if let Some(earlier) = entries.iter().find(|e| e.pattern.same_shape(&pattern)) {
            warn!(
                %method,
                route = %pattern,
                shadowed_by = %earlier.pattern,
                "route can never match: an earlier route accepts the same paths"
            );
        }

        debug!(%method, route = %pattern, "route registered");
        entries.push(RouteEntry {
            method,
            pattern,
            handler,
        });
        Ok(())
    }

    /// Find the handler for `method` and `path`.
    ///
    /// # Errors
    ///
    /// - [`ResolveError::MethodNotAllowed`] if no route matches under `method`
    ///   but some route matches the path under another method.
    /// - [`ResolveError::NotFound`] otherwise.
    pub fn resolve(&self, method: Method, path: &str) -> Result<RouteMatch<'_>, ResolveError> {
        for entry in &self.by_method[method.index()] {
            if let Some(params) = entry.pattern.matches(path) {
                return Ok(RouteMatch { entry, params });
            }
        }

        Err(self.unroutable(path))
    }

    /// Classify a path that has no handler for the request's method: 405 when any
    /// method routes it, 404 otherwise.
    pub fn unroutable(&self, path: &str) -> ResolveError {
        let allowed = self.allowed_methods(path);
        if allowed.is_empty() {
            ResolveError::NotFound
        } else {
            ResolveError::MethodNotAllowed { allowed }
        }
    }

    /// Methods under which some registered pattern matches `path`, in id order.
    pub fn allowed_methods(&self, path: &str) -> Vec<Method> {
        Method::ALL
            .into_iter()
            .filter(|m| {
                self.by_method[m.index()]
                    .iter()
                    .any(|e| e.pattern.matches(path).is_some())
            })
            .collect()
    }

    /// Routes registered for `method`, in match order.
    pub fn entries(&self, method: Method) -> &[RouteEntry] {
        &self.by_method[method.index()]
    }

    pub fn len(&self) -> usize {
        self.by_method.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_method.iter().all(Vec::is_empty)
    }
}

/// Collects route registrations before the server starts.
///
/// # Examples
///
/// ```rust,no_run
/// use switchyard::Router;
/// use switchyard::context::RequestContext;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut router = Router::new();
///
/// router.get("/ping", |mut ctx: RequestContext| async move {
///     ctx.send_text("pong")?;
///     Ok(())
/// })?;
///
/// router.get("/users/:id", |mut ctx: RequestContext| async move {
///     let id = ctx.param("id").unwrap_or("unknown").to_owned();
///     ctx.send_json(&serde_json::json!({ "id": id }))?;
///     Ok(())
/// })?;
///
/// router.start("127.0.0.1:8080")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct Router {
    table: RouteTable,
}

impl Router {
    /// Create a new, empty `Router` with no registered routes.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use switchyard::Router;
    ///
    /// let router = Router::new();
    /// assert!(router.is_empty());
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `method` requests whose path matches `pattern`.
    ///
    /// The handler receives the request's [`RequestContext`] and must call one
    /// of its send operations before finishing.
    ///
    /// # Errors
    ///
    /// See [`RouteTable::register`]. Registration errors are meant to abort startup.
    pub fn route<H, F>(&mut self, method: Method, pattern: &str, handler: H) -> Result<(), RouteError>
    where
        H: Fn(RequestContext) -> F + Send + Sync + 'static,
        F: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler: Handler =
            Arc::new(move |ctx: RequestContext| -> HandlerFuture { Box::pin(handler(ctx)) });
        self.table.register(method, pattern, handler)
    }

    /// Register a handler for `GET` requests matching `pattern`.
    ///
    /// # Errors
    ///
    /// See [`Router::route`].
    pub fn get<H, F>(&mut self, pattern: &str, handler: H) -> Result<(), RouteError>
    where
        H: Fn(RequestContext) -> F + Send + Sync + 'static,
        F: Future<Output = HandlerResult> + Send + 'static,
    {
        self.route(Method::Get, pattern, handler)
    }

    /// Register a handler for `POST` requests matching `pattern`.
    ///
    /// # Errors
    ///
    /// See [`Router::route`].
    pub fn post<H, F>(&mut self, pattern: &str, handler: H) -> Result<(), RouteError>
    where
        H: Fn(RequestContext) -> F + Send + Sync + 'static,
        F: Future<Output = HandlerResult> + Send + 'static,
    {
        self.route(Method::Post, pattern, handler)
    }

    /// Register a handler for `PUT` requests matching `pattern`.
    ///
    /// # Errors
    ///
    /// See [`Router::route`].
    pub fn put<H, F>(&mut self, pattern: &str, handler: H) -> Result<(), RouteError>
    where
        H: Fn(RequestContext) -> F + Send + Sync + 'static,
        F: Future<Output = HandlerResult> + Send + 'static,
    {
        self.route(Method::Put, pattern, handler)
    }

    /// Register a handler for `PATCH` requests matching `pattern`.
    ///
    /// # Errors
    ///
    /// See [`Router::route`].
    pub fn patch<H, F>(&mut self, pattern: &str, handler: H) -> Result<(), RouteError>
    where
        H: Fn(RequestContext) -> F + Send + Sync + 'static,
        F: Future<Output = HandlerResult> + Send + 'static,
    {
        self.route(Method::Patch, pattern, handler)
    }

    /// Register a handler for `DELETE` requests matching `pattern`.
    ///
    /// # Errors
    ///
    /// See [`Router::route`].
    pub fn delete<H, F>(&mut self, pattern: &str, handler: H) -> Result<(), RouteError>
    where
        H: Fn(RequestContext) -> F + Send + Sync + 'static,
        F: Future<Output = HandlerResult> + Send + 'static,
    {
        self.route(Method::Delete, pattern, handler)
    }

    /// Return the number of routes registered in this router.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Return `true` if no routes have been registered.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Read-only view of the registrations so far.
    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    /// Freeze the routes and build the dispatcher that serves them.
    pub fn into_dispatcher(self) -> Dispatcher {
        Dispatcher::new(self.table)
    }

    /// Listen on `address` (`host:port`) with default settings and serve until
    /// the listener fails.
    ///
    /// Builds its own multi-threaded Tokio runtime and blocks the calling thread.
    /// From async code use [`Server::bind`] and [`Server::serve`] instead.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] if the runtime cannot be built, the address cannot
    /// be bound, or the listener fails.
    pub fn start(self, address: &str) -> Result<(), ServerError> {
        self.start_with_config(address, ServerConfig::default())
    }

    /// Like [`start`](Self::start) with explicit server settings.
    ///
    /// # Errors
    ///
    /// As [`start`](Self::start), plus [`ServerError::Config`] for invalid settings.
    pub fn start_with_config(self, address: &str, config: ServerConfig) -> Result<(), ServerError> {
        config.validate()?;

        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder.enable_all();
        if let Some(threads) = config.worker_threads {
            builder.worker_threads(threads);
        }
        let runtime = builder.build().map_err(ServerError::Runtime)?;

        runtime.block_on(async move {
            let server = Server::bind_with_config(address, config).await?;
            server.serve(self).await
        })
    }
}
