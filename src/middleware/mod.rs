//! Middleware pipeline: composable logic around request handling.
//!
//! Middleware runs at two levels:
//!
//! - **app level**, around the whole router (the request logger, CORS);
//! - **route level**, attached to a route module and run inside the request
//!   context, so it can stash values with [`context::set`](crate::context::set)
//!   for the handler to read.
//!
//! Both levels share [`Middleware`] and [`Next`]. A chain always ends in an
//! [`Endpoint`]: the router for app-level chains, the route handler for
//! route-level ones.

use std::{future::Future, pin::Pin, sync::Arc};

use tokio::time::Instant;
use tracing::info;

use crate::http::{Request, Response};

/// Boxed, `Send` future resolving to a [`Response`].
pub type ResponseFuture = Pin<Box<dyn Future<Output = Response> + Send>>;

/// Type-erased terminal of a middleware chain.
pub type Endpoint = Arc<dyn Fn(Request) -> ResponseFuture + Send + Sync + 'static>;

/// A type-erased, reference-counted middleware function.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use lithe::http::Request;
/// use lithe::middleware::{MiddlewareHandler, Next};
///
/// let passthrough: MiddlewareHandler = Arc::new(|req: Request, next: Next| {
///     Box::pin(async move { next.run(req).await })
/// });
/// ```
pub type MiddlewareHandler = Arc<dyn Fn(Request, Next) -> ResponseFuture + Send + Sync + 'static>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |req: Request, next: Next| middleware.handle(req, next))
}

/// Wraps an async closure as a [`MiddlewareHandler`].
///
/// ```rust,no_run
/// use lithe::{Reply, context, http::StatusCode};
/// use lithe::middleware::from_fn;
///
/// let require_token = from_fn(|req, next| async move {
///     let token = req.headers().get("authorization").map(str::to_owned);
///     match token {
///         Some(token) => {
///             context::set("token", token);
///             next.run(req).await
///         }
///         None => Reply::json(serde_json::json!({ "error": "No token provided" }))
///             .status(StatusCode::Unauthorized)
///             .into_response(),
///     }
/// });
/// ```
pub fn from_fn<F, Fut>(f: F) -> MiddlewareHandler
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    Arc::new(move |req: Request, next: Next| Box::pin(f(req, next)))
}

/// A cursor into the remaining middleware chain for a single request.
///
/// Consumed by [`run`](Self::run), so each middleware can forward at most once.
pub struct Next {
    middlewares: Arc<[MiddlewareHandler]>,
    index: usize,
    endpoint: Endpoint,
}

impl Next {
    /// Positions a cursor at the start of `middlewares`, ending in `endpoint`.
    pub fn new(middlewares: Arc<[MiddlewareHandler]>, endpoint: Endpoint) -> Self {
        Self {
            middlewares,
            index: 0,
            endpoint,
        }
    }

    /// Invokes the next middleware, or the endpoint once the chain is exhausted.
    pub async fn run(mut self, req: Request) -> Response {
        match self.middlewares.get(self.index).cloned() {
            Some(handler) => {
                self.index += 1;
                handler(req, self).await
            }
            None => (self.endpoint)(req).await,
        }
    }
}

/// The core trait for lithe middleware.
///
/// Implementors may pass the request through (`next.run(req).await`),
/// short-circuit with their own [`Response`], or decorate the downstream
/// response. Middleware is shared across tasks, hence `Send + Sync`.
pub trait Middleware: Send + Sync {
    fn handle(&self, req: Request, next: Next) -> ResponseFuture;
}

/// Logs method, path, status and latency of every request at `info`.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, req: Request, next: Next) -> ResponseFuture {
        Box::pin(async move {
            let start = Instant::now();
            let method = req.method().to_string();
            let path = req.path().to_owned();

            let response = next.run(req).await;

            info!(
                %method,
                %path,
                status = response.status().as_u16(),
                elapsed = ?start.elapsed(),
                "request served"
            );
            response
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::http::StatusCode;

    fn request(path: &str) -> Request {
        let raw = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        Request::parse(raw.as_bytes()).unwrap().0
    }

    fn echo_endpoint() -> Endpoint {
        Arc::new(|req: Request| {
            Box::pin(async move { Response::new(StatusCode::Ok).body(req.path().to_owned()) })
        })
    }

    #[tokio::test]
    async fn empty_chain_reaches_endpoint() {
        let next = Next::new(Arc::from(Vec::new()), echo_endpoint());
        let response = next.run(request("/users")).await;
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(response.body_bytes(), b"/users");
    }

    #[tokio::test]
    async fn middleware_runs_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = |label: &'static str, seen: Arc<Mutex<Vec<&'static str>>>| {
            from_fn(move |req, next| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().unwrap().push(label);
                    next.run(req).await
                }
            })
        };
        let chain: Arc<[MiddlewareHandler]> = Arc::from(vec![
            record("outer", Arc::clone(&seen)),
            record("inner", Arc::clone(&seen)),
        ]);

        Next::new(chain, echo_endpoint()).run(request("/")).await;
        assert_eq!(*seen.lock().unwrap(), vec!["outer", "inner"]);
    }

    #[tokio::test]
    async fn middleware_can_short_circuit() {
        let deny = from_fn(|_req, _next| async { Response::new(StatusCode::Unauthorized) });
        let response = Next::new(Arc::from(vec![deny]), echo_endpoint())
            .run(request("/secret"))
            .await;
        assert_eq!(response.status(), StatusCode::Unauthorized);
    }

    #[tokio::test]
    async fn logger_passes_response_through() {
        let chain: Arc<[MiddlewareHandler]> = Arc::from(vec![from_middleware(Arc::new(LoggerMiddleware))]);
        let response = Next::new(chain, echo_endpoint()).run(request("/log")).await;
        assert_eq!(response.body_bytes(), b"/log");
    }
}
