//! Cross-Origin Resource Sharing.

use crate::config::{CorsOptions, CorsPolicy};
use crate::http::{Method, Request, Response, StatusCode};
use crate::middleware::{Middleware, Next, ResponseFuture};

const DEFAULT_METHODS: [&str; 6] = ["GET", "HEAD", "PUT", "PATCH", "POST", "DELETE"];
const DEFAULT_MAX_AGE: u64 = 3600;

/// Validates the `Origin` header, answers preflight requests and decorates
/// responses with `Access-Control-*` headers.
///
/// - Requests without an `Origin`, or with one outside the allow-list, pass
///   through untouched.
/// - `OPTIONS` requests carrying `Access-Control-Request-Method` are answered
///   with `204 No Content`; the routes never see them.
/// - Every other allowed request runs normally and gets the headers appended.
///   A specific (non-`*`) origin also adds `Vary: Origin`.
///
/// # Examples
///
/// ```rust
/// use lithe::security::CorsMiddleware;
///
/// let cors = CorsMiddleware::permissive()
///     .allow_header("X-Request-ID")
///     .max_age(600);
/// ```
#[derive(Debug, Clone)]
pub struct CorsMiddleware {
    allowed_origins: Vec<String>,
    allowed_methods: Vec<String>,
    allowed_headers: Vec<String>,
    max_age: u64,
}

impl Default for CorsMiddleware {
    fn default() -> Self {
        Self::permissive()
    }
}

impl CorsMiddleware {
    /// Any origin, the common methods, and whatever headers the client asks for.
    pub fn permissive() -> Self {
        Self {
            allowed_origins: vec!["*".to_owned()],
            allowed_methods: DEFAULT_METHODS.iter().map(|m| (*m).to_owned()).collect(),
            allowed_headers: Vec::new(),
            max_age: DEFAULT_MAX_AGE,
        }
    }

    /// Builds the middleware for `policy`, or `None` when CORS is disabled.
    pub fn from_policy(policy: &CorsPolicy) -> Option<Self> {
        match policy {
            CorsPolicy::Disabled => None,
            CorsPolicy::Permissive => Some(Self::permissive()),
            CorsPolicy::Custom(options) => Some(Self::from_options(options)),
        }
    }

    pub fn from_options(options: &CorsOptions) -> Self {
        let defaults = Self::permissive();
        Self {
            allowed_origins: options.origins.clone().unwrap_or(defaults.allowed_origins),
            allowed_methods: options.methods.clone().unwrap_or(defaults.allowed_methods),
            allowed_headers: options.headers.clone().unwrap_or_default(),
            max_age: options.max_age.unwrap_or(defaults.max_age),
        }
    }

    /// Adds an allowed origin. `"*"` admits every origin.
    #[must_use]
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.allowed_origins.push(origin.into());
        self
    }

    #[must_use]
    pub fn allow_method(mut self, method: impl Into<String>) -> Self {
        self.allowed_methods.push(method.into());
        self
    }

    /// Adds an allowed request header. With none configured, the preflight
    /// echoes `Access-Control-Request-Headers` back.
    #[must_use]
    pub fn allow_header(mut self, header: impl Into<String>) -> Self {
        self.allowed_headers.push(header.into());
        self
    }

    #[must_use]
    pub fn max_age(mut self, seconds: u64) -> Self {
        self.max_age = seconds;
        self
    }

    fn resolve_origin(&self, origin: &str) -> Option<String> {
        if self.allowed_origins.iter().any(|o| o == "*") {
            Some("*".to_owned())
        } else if self.allowed_origins.iter().any(|o| o == origin) {
            Some(origin.to_owned())
        } else {
            None
        }
    }
}

impl Middleware for CorsMiddleware {
    fn handle(&self, req: Request, next: Next) -> ResponseFuture {
        let cors = self.clone();

        Box::pin(async move {
            let Some(origin) = req.headers().get("origin").map(str::to_owned) else {
                return next.run(req).await;
            };
            let Some(allow_origin) = cors.resolve_origin(&origin) else {
                return next.run(req).await;
            };
            let vary = allow_origin != "*";
            let methods = cors.allowed_methods.join(", ");

            let is_preflight = req.method() == &Method::Options
                && req.headers().contains("access-control-request-method");
            if is_preflight {
                let headers = if cors.allowed_headers.is_empty() {
                    req.headers()
                        .get("access-control-request-headers")
                        .unwrap_or_default()
                        .to_owned()
                } else {
                    cors.allowed_headers.join(", ")
                };
                let mut resp = Response::new(StatusCode::NoContent)
                    .header("Access-Control-Allow-Origin", allow_origin)
                    .header("Access-Control-Allow-Methods", methods)
                    .header("Access-Control-Max-Age", cors.max_age.to_string());
                if !headers.is_empty() {
                    resp.set_header("Access-Control-Allow-Headers", headers);
                }
                if vary {
                    resp.add_header("Vary", "Origin");
                }
                return resp;
            }

            let mut resp = next.run(req).await;
            resp.set_header("Access-Control-Allow-Origin", allow_origin);
            if !cors.allowed_headers.is_empty() {
                resp.set_header("Access-Control-Expose-Headers", cors.allowed_headers.join(", "));
            }
            if vary {
                resp.add_header("Vary", "Origin");
            }
            resp
        })
    }
}
