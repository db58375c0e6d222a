//! Verb registration and request dispatch.
//!
//! A [`Router`] holds an ordered list of `(verb, pattern) → handler` entries and,
//! per pattern, the verbs registered for it. Dispatching a request resolves to
//! exactly one of three outcomes:
//!
//! 1. a route whose pattern and verb both match, tried in registration order:
//!    the handler runs inside a fresh [`RequestContext`](crate::context::RequestContext).
//!    A `HEAD` request no route exports `HEAD` for falls back to the `GET`
//!    route, and the server drops the body;
//! 2. some pattern matches the path but none of its verbs do:
//!    `405 Method Not Allowed` with an `Allow` header;
//! 3. nothing matches: `404 Not Found` with the path echoed back.
//!
//! Every handler runs in its own task. A handler that errors, panics or returns
//! something other than a [`Reply`] is answered with a 500 whose body never
//! carries the failure details; those go to the log.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, error};

use crate::context::{self, PathParams, RequestContext};
use crate::http::{Method, Request, Response, StatusCode};
use crate::middleware::{Endpoint, MiddlewareHandler, Next};
use crate::reply::{HandlerError, Reply, Respond};

pub mod pattern;

pub use pattern::Pattern;

/// Body of the 500 sent when a handler returns something that is not a reply.
pub const NOT_A_RESPONSE_BODY: &str = "Handler must return a Response";
/// Body of the 500 sent when a handler fails or panics.
pub const INTERNAL_ERROR_BODY: &str = "Internal server error";

/// The verbs a route module can export.
///
/// [`Verb::All`] matches every request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Options,
    Head,
    All,
}

impl Verb {
    /// Every verb, in the order route modules are checked for exports.
    pub const REGISTRATION_ORDER: [Verb; 8] = [
        Verb::Get,
        Verb::Post,
        Verb::Put,
        Verb::Patch,
        Verb::Delete,
        Verb::Options,
        Verb::Head,
        Verb::All,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
            Verb::Put => "PUT",
            Verb::Patch => "PATCH",
            Verb::Delete => "DELETE",
            Verb::Options => "OPTIONS",
            Verb::Head => "HEAD",
            Verb::All => "ALL",
        }
    }

    /// Parses an exact, upper-case verb name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::REGISTRATION_ORDER.into_iter().find(|v| v.as_str() == name)
    }

    pub fn matches(self, method: &Method) -> bool {
        match self {
            Verb::All => true,
            Verb::Get => method == &Method::Get,
            Verb::Post => method == &Method::Post,
            Verb::Put => method == &Method::Put,
            Verb::Patch => method == &Method::Patch,
            Verb::Delete => method == &Method::Delete,
            Verb::Options => method == &Method::Options,
            Verb::Head => method == &Method::Head,
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Boxed future a [`Handler`] resolves to.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Reply, HandlerError>> + Send>>;

/// Type-erased route handler.
///
/// Handlers receive the request by value and produce anything implementing
/// [`Respond`]. Use [`IntoHandler`] rather than building one by hand.
pub type Handler = Arc<dyn Fn(Request) -> HandlerFuture + Send + Sync + 'static>;

/// Conversion trait for async handler functions.
///
/// Any `Fn(Request) -> impl Future<Output = impl Respond> + Send` that is
/// `Send + Sync + 'static` qualifies through the blanket impl.
pub trait IntoHandler: Send + Sync + 'static {
    fn into_handler(self) -> Handler;
}

impl<T, F, R> IntoHandler for T
where
    T: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = R> + Send + 'static,
    R: Respond,
{
    fn into_handler(self) -> Handler {
        Arc::new(move |req| {
            let fut = (self)(req);
            Box::pin(async move { fut.await.into_reply() })
        })
    }
}

// A registered route binding verb + pattern to a handler and its middleware.
struct Route {
    verb: Verb,
    pattern: Pattern,
    handler: Handler,
    middleware: Arc<[MiddlewareHandler]>,
}

/// How a request resolved against the registration table.
#[derive(Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Index of the matching route and the parameters it captured.
    Matched(usize, PathParams),
    /// The path is known but not for this method; the allowed verbs.
    MethodNotAllowed(Vec<Verb>),
    NotFound,
}

/// Registration table and dispatcher.
///
/// # Examples
///
/// ```rust,no_run
/// use lithe::{Reply, Router, context};
///
/// let mut router = Router::new();
/// router.get("/ping", |_req| async { Reply::text("pong") });
/// router.get("/users/:id", |_req| async {
///     let id = context::param("id")?.unwrap_or_default();
///     Ok::<_, context::ContextError>(Reply::json(serde_json::json!({ "id": id })))
/// });
/// assert_eq!(router.allowed("/users/:id"), Some(&[lithe::Verb::Get][..]));
/// ```
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
    allowed: Vec<(Pattern, Vec<Verb>)>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `verb` on `pattern`.
    pub fn route(&mut self, verb: Verb, pattern: &str, handler: impl IntoHandler) {
        self.register(verb, pattern, handler.into_handler(), Arc::from(Vec::new()));
    }

    /// Registers an already type-erased handler with route-level middleware.
    pub fn register(
        &mut self,
        verb: Verb,
        pattern: &str,
        handler: Handler,
        middleware: Arc<[MiddlewareHandler]>,
    ) {
        let pattern = Pattern::parse(pattern);
        match self.allowed.iter_mut().find(|(p, _)| p == &pattern) {
            Some((_, verbs)) if verbs.contains(&verb) => {}
            Some((_, verbs)) => verbs.push(verb),
            None => self.allowed.push((pattern.clone(), vec![verb])),
        }
        self.routes.push(Route {
            verb,
            pattern,
            handler,
            middleware,
        });
    }

    pub fn get(&mut self, pattern: &str, handler: impl IntoHandler) {
        self.route(Verb::Get, pattern, handler);
    }

    pub fn post(&mut self, pattern: &str, handler: impl IntoHandler) {
        self.route(Verb::Post, pattern, handler);
    }

    pub fn put(&mut self, pattern: &str, handler: impl IntoHandler) {
        self.route(Verb::Put, pattern, handler);
    }

    pub fn patch(&mut self, pattern: &str, handler: impl IntoHandler) {
        self.route(Verb::Patch, pattern, handler);
    }

    pub fn delete(&mut self, pattern: &str, handler: impl IntoHandler) {
        self.route(Verb::Delete, pattern, handler);
    }

    /// Number of `(verb, pattern)` registrations.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Verbs registered for `pattern`, in registration order.
    pub fn allowed(&self, pattern: &str) -> Option<&[Verb]> {
        let pattern = Pattern::parse(pattern);
        self.allowed
            .iter()
            .find(|(p, _)| p == &pattern)
            .map(|(_, verbs)| verbs.as_slice())
    }

    /// Resolves `method` + `path` without running anything.
    pub fn resolve(&self, method: &Method, path: &str) -> Resolution {
        if let Some(found) = self.first_match(|verb| verb.matches(method), path) {
            return found;
        }
        if method == &Method::Head {
            if let Some(found) = self.first_match(|verb| verb == Verb::Get, path) {
                return found;
            }
        }

        let mut allowed: Vec<Verb> = Vec::new();
        for (pattern, verbs) in &self.allowed {
            if pattern.matches(path).is_some() {
                for verb in verbs {
                    if !allowed.contains(verb) {
                        allowed.push(*verb);
                    }
                }
            }
        }

        if allowed.is_empty() {
            Resolution::NotFound
        } else {
            Resolution::MethodNotAllowed(allowed)
        }
    }

    fn first_match(&self, accepts: impl Fn(Verb) -> bool, path: &str) -> Option<Resolution> {
        self.routes.iter().enumerate().find_map(|(index, route)| {
            if !accepts(route.verb) {
                return None;
            }
            route
                .pattern
                .matches(path)
                .map(|params| Resolution::Matched(index, params))
        })
    }

    /// Dispatches `request` and returns the response to write.
    pub async fn dispatch(&self, request: Request) -> Response {
        match self.resolve(request.method(), request.path()) {
            Resolution::Matched(index, params) => invoke(&self.routes[index], request, params).await,
            Resolution::MethodNotAllowed(verbs) => {
                debug!(method = %request.method(), path = %request.path(), "method not allowed");
                method_not_allowed(&verbs)
            }
            Resolution::NotFound => not_found(request.path()),
        }
    }
}

/// `404` with `{"error": "Not Found", "path": path}`.
pub fn not_found(path: &str) -> Response {
    Response::new(StatusCode::NotFound).json(&json!({ "error": "Not Found", "path": path }))
}

/// `405` with an `Allow` header listing `verbs`.
pub fn method_not_allowed(verbs: &[Verb]) -> Response {
    let allow = verbs
        .iter()
        .map(|v| v.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    Response::new(StatusCode::MethodNotAllowed)
        .header("Allow", allow)
        .json(&json!({ "error": "Method Not Allowed" }))
}

fn internal_error(message: &str) -> Response {
    Response::new(StatusCode::InternalServerError).json(&json!({ "error": message }))
}

// Runs one matched route: decode the body, install the context, run the route
// middleware and the handler in a dedicated task, translate the outcome.
async fn invoke(route: &Route, request: Request, params: PathParams) -> Response {
    let method = request.method().clone();
    let path = request.path().to_owned();

    let body = match decode_body(&request) {
        Ok(body) => body,
        Err(e) => {
            debug!(%method, %path, error = %e, "rejecting malformed JSON body");
            return Response::new(StatusCode::BadRequest)
                .json(&json!({ "error": "Invalid JSON body" }));
        }
    };

    let ctx = RequestContext::new(request.clone(), params, body);
    let handler = Arc::clone(&route.handler);
    let endpoint: Endpoint = Arc::new(move |req: Request| {
        let handler = Arc::clone(&handler);
        Box::pin(async move { render(handler(req).await) })
    });
    let chain = Next::new(Arc::clone(&route.middleware), endpoint);

    let task = tokio::spawn(context::scope(ctx, chain.run(request)));
    match task.await {
        Ok(response) => response,
        Err(e) => {
            error!(%method, %path, error = %e, "route handler panicked");
            internal_error(INTERNAL_ERROR_BODY)
        }
    }
}

fn render(outcome: Result<Reply, HandlerError>) -> Response {
    match outcome {
        Ok(reply) => reply.into_response(),
        Err(HandlerError::NotAResponse { returned }) => {
            error!(returned, "route handler did not return a Response");
            internal_error(NOT_A_RESPONSE_BODY)
        }
        Err(HandlerError::Failed(e)) => {
            error!(error = %e, "route handler failed");
            internal_error(INTERNAL_ERROR_BODY)
        }
    }
}

fn decode_body(request: &Request) -> Result<Value, serde_json::Error> {
    if request.body().is_empty() || !request.is_json() {
        return Ok(Value::Null);
    }
    request.json()
}
