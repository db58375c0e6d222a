//! # lithe
//!
//! A file-system routed HTTP runtime on a from-scratch async HTTP/1.1 server.
//!
//! Routes live in a directory tree. Every directory holding a `route.rs` or
//! `route.toml` becomes a URL pattern (`api/users/[id]/route.rs` serves
//! `/users/:id`), and each verb the route exports is registered for it.
//! Requests to a known path with an unexported verb get a `405` with an
//! `Allow` header, unknown paths a `404`. Handlers return a declarative
//! [`Reply`] and read the request through the ambient [`context`] accessors.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lithe::{App, Reply, RouteModule, RouteModules, context};
//!
//! // api/users/[id]/route.rs
//! fn user() -> RouteModule {
//!     RouteModule::new()
//!         .get(|_req| async {
//!             let id = context::param("id")?;
//!             Ok::<_, context::ContextError>(Reply::json(serde_json::json!({ "id": id })))
//!         })
//!         .delete(|_req| async { Reply::empty().status(lithe::StatusCode::NoContent) })
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), lithe::ServeError> {
//!     App::new()
//!         .modules(RouteModules::new().module("users/[id]", user))
//!         .serve()
//!         .await
//! }
//! ```

pub mod app;
pub mod config;
pub mod context;
pub mod http;
pub mod middleware;
pub mod reload;
pub mod reply;
pub mod router;
pub mod routes;
pub mod security;
pub mod server;

pub use app::{App, Bound, ServeError};
pub use config::{AppConfig, ConfigError, CorsOptions, CorsPolicy, Environment};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use reply::{HandlerError, Reply, ReplyBody, Respond};
pub use router::{Router, Verb};
pub use routes::{LoadError, ModuleLoader, RouteModule, RouteModules};
pub use server::{Server, ServerError};
