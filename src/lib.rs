//! # switchyard
//!
//! An embeddable async HTTP/1.1 request router.
//!
//! Routes are registered on a [`Router`] as `(method, pattern, handler)` triples.
//! Patterns are `/`-separated and may contain `:name` parameters. Each matched
//! request is handed to its handler as a [`RequestContext`], and the handler
//! answers by calling exactly one of the context's `send_*` operations. The
//! [`Dispatcher`] makes sure every request gets exactly one response: `404` or
//! `405` when nothing matches, `500` when a handler fails or never responds.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use switchyard::{HandlerResult, RequestContext, Router};
//!
//! async fn hello(mut ctx: RequestContext) -> HandlerResult {
//!     let name = ctx.param("name").unwrap_or("world").to_owned();
//!     ctx.send_text(format!("Hello, {name}!"))?;
//!     Ok(())
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut router = Router::new();
//!     router.get("/hello/:name", hello)?;
//!
//!     // Blocks until the listener fails.
//!     router.start("127.0.0.1:8080")?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod dispatcher;
pub mod http;
pub mod router;
pub mod server;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use config::{ConfigError, ServerConfig};
pub use context::{ContextError, Params, RequestContext};
pub use dispatcher::Dispatcher;
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::{HandlerError, HandlerResult, ResolveError, RouteError, RouteTable, Router};
pub use server::{Server, ServerError};
