//! HTTP/1.1 request parsing using the [`httparse`] crate.

use bytes::Bytes;
use serde_json::{Map, Value};
use thiserror::Error;

use super::{Headers, Method};

/// Errors that can occur while parsing an HTTP/1.1 request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete, more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },
}

/// Decoded query string parameters.
///
/// A key may repeat (`?tag=a&tag=b`); [`get`](Self::get) returns the first
/// value and [`get_all`](Self::get_all) every value.
///
/// # Examples
///
/// ```
/// use lithe::http::QueryParams;
///
/// let query = QueryParams::parse("tag=a&tag=b&q=hello+world");
/// assert_eq!(query.get("q"), Some("hello world"));
/// assert_eq!(query.get_all("tag").collect::<Vec<_>>(), vec!["a", "b"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    /// Percent-decodes an `application/x-www-form-urlencoded` query string.
    pub fn parse(query: &str) -> Self {
        let pairs = form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        Self { pairs }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.pairs
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Renders the parameters as a JSON object: a string for keys seen once,
    /// an array of strings for repeated keys.
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for (key, value) in &self.pairs {
            match map.get_mut(key) {
                None => {
                    map.insert(key.clone(), Value::String(value.clone()));
                }
                Some(Value::Array(values)) => values.push(Value::String(value.clone())),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, Value::String(value.clone())]);
                }
            }
        }
        Value::Object(map)
    }
}

/// A fully parsed HTTP/1.1 request.
///
/// # Examples
///
/// ```
/// use lithe::http::Request;
///
/// let raw = b"GET /users?page=2 HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let (request, _offset) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.path(), "/users");
/// assert_eq!(request.query().get("page"), Some("2"));
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    query: QueryParams,
    body: Bytes,
}

impl Request {
    const MAX_HEADERS: usize = 64;

    /// Parses the request head in `buf`.
    ///
    /// Returns the request and the offset at which its body starts. The body
    /// is the `Content-Length` bytes after the head (as many as are buffered);
    /// without that header it is empty.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`]: the head is not fully buffered yet.
    /// - [`RequestError::Parse`]: the head is malformed.
    /// - [`RequestError::MissingField`]: method, path or version is absent.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method = match raw_req.method {
            Some(m) => m.parse::<Method>().unwrap_or_else(|never| match never {}),
            None => return Err(RequestError::MissingField { field: "method" }),
        };

        let raw_path = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?;

        let (path, query) = match raw_path.split_once('?') {
            Some((path, query)) => (path.to_owned(), QueryParams::parse(query)),
            None => (raw_path.to_owned(), QueryParams::default()),
        };

        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.append(header.name, value);
            }
        }

        let available = &buf[body_offset..];
        let declared = header_map
            .get("content-length")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        let body = Bytes::copy_from_slice(&available[..declared.min(available.len())]);

        Ok((
            Self {
                method,
                path,
                version,
                headers: header_map,
                query,
                body,
            },
            body_offset,
        ))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request path, without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn query(&self) -> &QueryParams {
        &self.query
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns `true` when the `Content-Type` header names a JSON media type.
    pub fn is_json(&self) -> bool {
        self.headers
            .get("content-type")
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("json"))
    }

    /// Deserializes the body as JSON.
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: serde::de::DeserializeOwned,
    {
        serde_json::from_slice(&self.body)
    }

    /// HTTP/1.1 keeps connections alive unless told otherwise; HTTP/1.0 only
    /// when asked to.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(conn) => conn.eq_ignore_ascii_case("keep-alive"),
            None => self.version == 1,
        }
    }

    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.trim().parse().ok()
    }
}
