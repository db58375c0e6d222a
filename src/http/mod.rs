//! HTTP/1.1 protocol types.
//!
//! [`Method`], [`StatusCode`], [`Headers`], [`Request`] and [`Response`] are the
//! wire-level vocabulary the router, the reply translator and the server share.

use std::fmt;

pub mod headers;
pub mod request;
pub mod response;

pub use headers::Headers;
pub use request::{QueryParams, Request};
pub use response::Response;

/// Declares [`StatusCode`] together with its numeric and reason-phrase tables so
/// the three can never drift apart.
macro_rules! status_codes {
    ($($variant:ident = $code:literal, $reason:literal;)+) => {
        /// An HTTP response status code.
        ///
        /// Codes without a named variant are kept in [`StatusCode::Custom`],
        /// so any three-digit code can be sent.
        ///
        /// # Examples
        ///
        /// ```
        /// use lithe::http::StatusCode;
        ///
        /// let status = StatusCode::from_u16(405).unwrap();
        /// assert_eq!(status, StatusCode::MethodNotAllowed);
        /// assert_eq!(status.canonical_reason(), "Method Not Allowed");
        ///
        /// let custom = StatusCode::from_u16(599).unwrap();
        /// assert_eq!(custom, StatusCode::Custom(599));
        /// assert_eq!(custom.canonical_reason(), "");
        /// ```
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum StatusCode {
            $($variant,)+
            /// Any other code in `100..=999`.
            Custom(u16),
        }

        impl StatusCode {
            /// Returns the numeric status code as a `u16`.
            pub fn as_u16(self) -> u16 {
                match self {
                    $(Self::$variant => $code,)+
                    Self::Custom(code) => code,
                }
            }

            /// Looks up the status for a numeric code. Only codes outside
            /// `100..=999` are rejected.
            pub fn from_u16(code: u16) -> Option<Self> {
                match code {
                    $($code => Some(Self::$variant),)+
                    100..=999 => Some(Self::Custom(code)),
                    _ => None,
                }
            }

            /// Returns the canonical reason phrase, empty for custom codes.
            pub fn canonical_reason(self) -> &'static str {
                match self {
                    $(Self::$variant => $reason,)+
                    Self::Custom(_) => "",
                }
            }
        }
    };
}

status_codes! {
    Continue = 100, "Continue";
    SwitchingProtocols = 101, "Switching Protocols";
    Ok = 200, "OK";
    Created = 201, "Created";
    Accepted = 202, "Accepted";
    NonAuthoritativeInformation = 203, "Non-Authoritative Information";
    NoContent = 204, "No Content";
    ResetContent = 205, "Reset Content";
    PartialContent = 206, "Partial Content";
    MultipleChoices = 300, "Multiple Choices";
    MovedPermanently = 301, "Moved Permanently";
    Found = 302, "Found";
    SeeOther = 303, "See Other";
    NotModified = 304, "Not Modified";
    TemporaryRedirect = 307, "Temporary Redirect";
    PermanentRedirect = 308, "Permanent Redirect";
    BadRequest = 400, "Bad Request";
    Unauthorized = 401, "Unauthorized";
    PaymentRequired = 402, "Payment Required";
    Forbidden = 403, "Forbidden";
    NotFound = 404, "Not Found";
    MethodNotAllowed = 405, "Method Not Allowed";
    NotAcceptable = 406, "Not Acceptable";
    RequestTimeout = 408, "Request Timeout";
    Conflict = 409, "Conflict";
    Gone = 410, "Gone";
    LengthRequired = 411, "Length Required";
    PreconditionFailed = 412, "Precondition Failed";
    PayloadTooLarge = 413, "Payload Too Large";
    UriTooLong = 414, "URI Too Long";
    UnsupportedMediaType = 415, "Unsupported Media Type";
    RangeNotSatisfiable = 416, "Range Not Satisfiable";
    ExpectationFailed = 417, "Expectation Failed";
    ImATeapot = 418, "I'm a teapot";
    UnprocessableEntity = 422, "Unprocessable Entity";
    Locked = 423, "Locked";
    PreconditionRequired = 428, "Precondition Required";
    TooManyRequests = 429, "Too Many Requests";
    RequestHeaderFieldsTooLarge = 431, "Request Header Fields Too Large";
    UnavailableForLegalReasons = 451, "Unavailable For Legal Reasons";
    InternalServerError = 500, "Internal Server Error";
    NotImplemented = 501, "Not Implemented";
    BadGateway = 502, "Bad Gateway";
    ServiceUnavailable = 503, "Service Unavailable";
    GatewayTimeout = 504, "Gateway Timeout";
    HttpVersionNotSupported = 505, "HTTP Version Not Supported";
}

impl StatusCode {
    /// Returns `true` for 3xx codes.
    pub fn is_redirection(self) -> bool {
        (300..400).contains(&self.as_u16())
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.canonical_reason() {
            "" => write!(f, "{}", self.as_u16()),
            reason => write!(f, "{} {reason}", self.as_u16()),
        }
    }
}

impl From<StatusCode> for u16 {
    fn from(code: StatusCode) -> u16 {
        code.as_u16()
    }
}

/// An HTTP request method.
///
/// Non-standard methods are kept verbatim in [`Method::Custom`] so the router
/// can still answer them with a 405.
///
/// # Examples
///
/// ```
/// use lithe::http::Method;
///
/// let method: Method = "DELETE".parse().unwrap();
/// assert_eq!(method, Method::Delete);
/// assert_eq!(method.as_str(), "DELETE");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
    Connect,
    Trace,
    Custom(String),
}

impl Method {
    /// Returns the method as a string slice.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Patch => "PATCH",
            Self::Connect => "CONNECT",
            Self::Trace => "TRACE",
            Self::Custom(s) => s.as_str(),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "GET" => Self::Get,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "HEAD" => Self::Head,
            "OPTIONS" => Self::Options,
            "PATCH" => Self::Patch,
            "CONNECT" => Self::Connect,
            "TRACE" => Self::Trace,
            other => Self::Custom(other.to_owned()),
        })
    }
}
