//! Request-scoped context reachable from anywhere inside a handler.
//!
//! While the dispatcher runs a route handler it installs a [`RequestContext`]
//! as the current context of that handler's task. The free functions in this
//! module ([`body`], [`param`], [`query`], [`get`], [`set`], ...) read it
//! without the handler having to thread it through its call graph:
//!
//! ```rust,no_run
//! use lithe::{Reply, context};
//!
//! async fn show_user(_req: lithe::Request) -> Result<Reply, context::ContextError> {
//!     let id = context::param("id")?.unwrap_or_default();
//!     let viewer = context::get("user");
//!     Ok(Reply::json(serde_json::json!({ "id": id, "viewer": viewer })))
//! }
//! ```
//!
//! The context lives in task-local storage, so two requests served at the same
//! time on different worker threads each see only their own. Outside a handler
//! the request accessors fail with [`ContextError::NoActiveRequest`]; [`set`]
//! and [`get`] fall back to a process-wide map instead.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{LazyLock, PoisonError, RwLock};

use serde_json::Value;
use thiserror::Error;

use crate::http::{QueryParams, Request};

tokio::task_local! {
    static CURRENT: RefCell<RequestContext>;
}

static GLOBAL: LazyLock<RwLock<HashMap<String, Value>>> = LazyLock::new(Default::default);

/// Raised by accessors that only make sense while a request is being handled.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("{accessor} must be called inside a route handler")]
    NoActiveRequest { accessor: &'static str },
}

/// Path parameters captured by the matched route pattern.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct PathParams {
    map: HashMap<String, String>,
}

impl PathParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.map.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Everything a handler can reach for the request it is serving.
#[derive(Debug)]
pub struct RequestContext {
    request: Request,
    params: PathParams,
    body: Value,
    values: HashMap<String, Value>,
}

impl RequestContext {
    /// Builds the context for `request`. `body` is the already-decoded JSON
    /// body, or [`Value::Null`] when the request carried none.
    pub fn new(request: Request, params: PathParams, body: Value) -> Self {
        Self {
            request,
            params,
            body,
            values: HashMap::new(),
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn params(&self) -> &PathParams {
        &self.params
    }

    pub fn body(&self) -> &Value {
        &self.body
    }
}

/// Runs `future` with `ctx` installed as the current context.
///
/// The context is dropped when the future completes, whichever way it
/// completes, so nothing from one request outlives its handler.
pub async fn scope<F>(ctx: RequestContext, future: F) -> F::Output
where
    F: Future,
{
    CURRENT.scope(RefCell::new(ctx), future).await
}

/// Returns `true` while called from inside [`scope`].
pub fn is_active() -> bool {
    CURRENT.try_with(|_| ()).is_ok()
}

fn with_current<R>(
    accessor: &'static str,
    f: impl FnOnce(&RequestContext) -> R,
) -> Result<R, ContextError> {
    CURRENT
        .try_with(|cell| f(&cell.borrow()))
        .map_err(|_| ContextError::NoActiveRequest { accessor })
}

/// A clone of the request being served.
pub fn current() -> Result<Request, ContextError> {
    with_current("context::current", |ctx| ctx.request.clone())
}

/// The decoded JSON body of the request being served.
pub fn body() -> Result<Value, ContextError> {
    with_current("context::body", |ctx| ctx.body.clone())
}

/// A single path parameter by name.
pub fn param(name: &str) -> Result<Option<String>, ContextError> {
    with_current("context::param", |ctx| ctx.params.get(name).map(str::to_owned))
}

pub fn params() -> Result<PathParams, ContextError> {
    with_current("context::params", |ctx| ctx.params.clone())
}

pub fn query() -> Result<QueryParams, ContextError> {
    with_current("context::query", |ctx| ctx.request.query().clone())
}

/// Stores `value` under `key` for the rest of the current request, or in the
/// process-wide map when no request is active.
pub fn set(key: impl Into<String>, value: impl Into<Value>) {
    let key = key.into();
    let value = value.into();
    if is_active() {
        CURRENT.with(|cell| {
            cell.borrow_mut().values.insert(key, value);
        });
    } else {
        GLOBAL
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, value);
    }
}

/// Looks `key` up in the current request first, then in the process-wide map.
pub fn get(key: &str) -> Option<Value> {
    let scoped = CURRENT
        .try_with(|cell| cell.borrow().values.get(key).cloned())
        .ok()
        .flatten();
    scoped.or_else(|| {
        GLOBAL
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    })
}

/// Removes `key` from the current request's map, or from the process-wide map
/// outside a request. Returns the removed value.
pub fn remove(key: &str) -> Option<Value> {
    if is_active() {
        CURRENT.with(|cell| cell.borrow_mut().values.remove(key))
    } else {
        GLOBAL
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }
}
