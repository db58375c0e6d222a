//! Declarative replies and their translation into HTTP responses.
//!
//! Route handlers never write to the socket. They return a [`Reply`], an inert
//! description of the response, and the dispatcher translates it with
//! [`Reply::into_response`] exactly once.
//!
//! | Constructor            | Status | Body                               |
//! |------------------------|--------|------------------------------------|
//! | [`Reply::json`]        | 200    | the value, `application/json`      |
//! | [`Reply::message`]     | 200    | `{"message": value}`               |
//! | [`Reply::text`]        | 200    | `text/plain`                       |
//! | [`Reply::html`]        | 200    | `text/html`                        |
//! | [`Reply::redirect`]    | 302    | empty, `Location` set              |
//! | [`Reply::not_found`]   | 404    | `{"error": message}`               |
//!
//! Descriptors that arrive untyped (for example a `route.toml` table) go
//! through [`ReplyFields`], which resolves several populated fields with a
//! fixed precedence: redirect, then json, message, text, html.

use std::collections::BTreeMap;
use std::error::Error as StdError;

use serde::{Deserialize, Deserializer};
use serde_json::{Value, json};
use thiserror::Error;

use crate::http::{Response, StatusCode};

/// Boxed error type handlers may fail with.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// The single payload a [`Reply`] carries.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyBody {
    Json(Value),
    Message(Value),
    Text(String),
    Html(String),
    Redirect(String),
    Empty,
}

/// A declarative HTTP response.
///
/// # Examples
///
/// ```
/// use lithe::Reply;
/// use lithe::http::StatusCode;
/// use serde_json::json;
///
/// let response = Reply::json(json!({ "id": 42 }))
///     .status(StatusCode::Created)
///     .header("X-Resource", "user")
///     .into_response();
///
/// assert_eq!(response.status(), StatusCode::Created);
/// assert_eq!(response.headers().get("x-resource"), Some("user"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    status: Option<StatusCode>,
    headers: Vec<(String, String)>,
    body: ReplyBody,
}

impl Reply {
    fn with_body(body: ReplyBody) -> Self {
        Self {
            status: None,
            headers: Vec::new(),
            body,
        }
    }

    pub fn json(value: impl Into<Value>) -> Self {
        Self::with_body(ReplyBody::Json(value.into()))
    }

    /// Serializes any `Serialize` value into a JSON reply.
    pub fn serialize<T: serde::Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::json(serde_json::to_value(value)?))
    }

    /// Shorthand for `{"message": value}`.
    pub fn message(value: impl Into<Value>) -> Self {
        Self::with_body(ReplyBody::Message(value.into()))
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::with_body(ReplyBody::Text(text.into()))
    }

    pub fn html(html: impl Into<String>) -> Self {
        Self::with_body(ReplyBody::Html(html.into()))
    }

    /// A `302 Found` redirect to `target`. Override the status with
    /// [`status`](Self::status) for 301/303/307/308.
    pub fn redirect(target: impl Into<String>) -> Self {
        Self::with_body(ReplyBody::Redirect(target.into())).status(StatusCode::Found)
    }

    /// An empty reply; status defaults to 200.
    pub fn empty() -> Self {
        Self::with_body(ReplyBody::Empty)
    }

    /// `200 OK` with `data` as JSON.
    pub fn ok(data: impl Into<Value>) -> Self {
        Self::json(data).status(StatusCode::Ok)
    }

    /// `404 Not Found` with `{"error": message}`, defaulting to `"Not Found"`.
    pub fn not_found(message: Option<&str>) -> Self {
        Self::json(json!({ "error": message.unwrap_or("Not Found") })).status(StatusCode::NotFound)
    }

    #[must_use]
    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    /// Adds a response header. Later values for the same name win.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(&self) -> &ReplyBody {
        &self.body
    }

    pub fn status_code(&self) -> Option<StatusCode> {
        self.status
    }

    /// Translates the description into a [`Response`].
    ///
    /// The status is applied once, before anything else. A redirect answers
    /// with `Location` only (the header map is not applied). Otherwise the
    /// header map is applied before the body, and the body writer sets the
    /// `Content-Type` that matches the payload kind. JSON payloads keep a
    /// `Content-Type` from the header map; text and HTML always set theirs.
    pub fn into_response(self) -> Response {
        let Self {
            status,
            headers,
            body,
        } = self;

        if let ReplyBody::Redirect(target) = body {
            return Response::new(status.unwrap_or(StatusCode::Found)).header("Location", target);
        }

        let mut response = Response::new(status.unwrap_or(StatusCode::Ok));
        for (name, value) in headers {
            response.set_header(name, value);
        }

        let custom_type = response.headers().get("content-type").map(str::to_owned);
        let with_type = |response: Response| match &custom_type {
            Some(content_type) => response.header("Content-Type", content_type.as_str()),
            None => response,
        };

        match body {
            ReplyBody::Json(value) => with_type(response.json(&value)),
            ReplyBody::Message(value) => with_type(response.json(&json!({ "message": value }))),
            ReplyBody::Text(text) => response.typed_body("text/plain; charset=utf-8", text),
            ReplyBody::Html(html) => response.typed_body("text/html; charset=utf-8", html),
            ReplyBody::Empty | ReplyBody::Redirect(_) => response,
        }
    }
}

/// Errors turning an untyped descriptor into a [`Reply`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReplyError {
    #[error("unsupported status code {0}")]
    UnknownStatus(u16),
}

/// An untyped response description where any payload field may be set.
///
/// Presence is what counts for `json`: `null`, `0` and `false` are real
/// payloads. `text` and `html` only count when non-empty. Unknown keys are
/// ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReplyFields {
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default, deserialize_with = "present")]
    pub json: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    pub message: Option<Value>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub redirect: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl ReplyFields {
    /// Every key a descriptor understands.
    pub const FIELDS: &'static [&'static str] =
        &["status", "json", "message", "text", "html", "redirect", "headers"];
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl TryFrom<ReplyFields> for Reply {
    type Error = ReplyError;

    fn try_from(fields: ReplyFields) -> Result<Self, Self::Error> {
        let status = fields
            .status
            .map(|code| StatusCode::from_u16(code).ok_or(ReplyError::UnknownStatus(code)))
            .transpose()?;

        let body = if let Some(target) = fields.redirect {
            ReplyBody::Redirect(target)
        } else if let Some(value) = fields.json {
            ReplyBody::Json(value)
        } else if let Some(value) = fields.message {
            ReplyBody::Message(value)
        } else if let Some(text) = fields.text.filter(|t| !t.is_empty()) {
            ReplyBody::Text(text)
        } else if let Some(html) = fields.html.filter(|h| !h.is_empty()) {
            ReplyBody::Html(html)
        } else {
            ReplyBody::Empty
        };

        Ok(Self {
            status,
            headers: fields.headers.into_iter().collect(),
            body,
        })
    }
}

/// Why a handler invocation did not produce a usable [`Reply`].
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler returned something that is not a reply. This is a bug in
    /// the route, not in the server.
    #[error("handler must return a Response, got {returned}")]
    NotAResponse { returned: &'static str },

    #[error(transparent)]
    Failed(BoxError),
}

/// Conversion from a handler's return value into a [`Reply`].
///
/// Implemented for [`Reply`] itself, `Option<R>` (where `None` is a contract
/// violation), `Result<R, E>` for any error convertible into [`BoxError`],
/// and for values that are never valid replies (`()`, a bare JSON value) so
/// routes returning them compile and fail with a 500 at request time.
pub trait Respond: Send + 'static {
    fn into_reply(self) -> Result<Reply, HandlerError>;
}

impl Respond for Reply {
    fn into_reply(self) -> Result<Reply, HandlerError> {
        Ok(self)
    }
}

impl<R: Respond> Respond for Option<R> {
    fn into_reply(self) -> Result<Reply, HandlerError> {
        match self {
            Some(inner) => inner.into_reply(),
            None => Err(HandlerError::NotAResponse { returned: "None" }),
        }
    }
}

impl<R, E> Respond for Result<R, E>
where
    R: Respond,
    E: Into<BoxError> + Send + 'static,
{
    fn into_reply(self) -> Result<Reply, HandlerError> {
        match self {
            Ok(inner) => inner.into_reply(),
            Err(e) => Err(HandlerError::Failed(e.into())),
        }
    }
}

impl Respond for () {
    fn into_reply(self) -> Result<Reply, HandlerError> {
        Err(HandlerError::NotAResponse { returned: "()" })
    }
}

impl Respond for Value {
    fn into_reply(self) -> Result<Reply, HandlerError> {
        Err(HandlerError::NotAResponse {
            returned: "a bare JSON value",
        })
    }
}
