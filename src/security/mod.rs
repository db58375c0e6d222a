//! Security middleware.
//!
//! Currently only CORS; authentication is left to route-level middleware
//! (see [`middleware::from_fn`](crate::middleware::from_fn)).

pub mod cors;

pub use cors::CorsMiddleware;
