//! HTTP/1.1 protocol types and parsing.
//!
//! This module provides the primitives shared by the router and the transport:
//! [`Method`], [`StatusCode`], [`Headers`], [`Body`], [`Request`], and [`Response`].

use std::fmt;

use thiserror::Error;

pub mod body;
pub mod headers;
pub mod request;
pub mod response;

pub use body::{Body, BodyError, BodySender};
pub use headers::Headers;
pub use request::Request;
pub use response::Response;

/// An HTTP response status code.
///
/// Only the codes the router and transport actually emit are listed, plus the
/// common ones handlers are likely to want.
///
/// # Examples
///
/// ```
/// use switchyard::http::StatusCode;
///
/// let status = StatusCode::MethodNotAllowed;
/// assert_eq!(status.as_u16(), 405);
/// assert_eq!(status.canonical_reason(), "Method Not Allowed");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum StatusCode {
    // 2xx Success
    Ok = 200,
    Created = 201,
    NoContent = 204,

    // 4xx Client Error
    BadRequest = 400,
    NotFound = 404,
    MethodNotAllowed = 405,
    PayloadTooLarge = 413,
    RequestHeaderFieldsTooLarge = 431,

    // 5xx Server Error
    InternalServerError = 500,
    NotImplemented = 501,
}

impl StatusCode {
    /// Returns the numeric status code as a `u16`.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the canonical reason phrase for this status code.
    pub fn canonical_reason(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Created => "Created",
            Self::NoContent => "No Content",
            Self::BadRequest => "Bad Request",
            Self::NotFound => "Not Found",
            Self::MethodNotAllowed => "Method Not Allowed",
            Self::PayloadTooLarge => "Payload Too Large",
            Self::RequestHeaderFieldsTooLarge => "Request Header Fields Too Large",
            Self::InternalServerError => "Internal Server Error",
            Self::NotImplemented => "Not Implemented",
        }
    }

    /// Returns `true` for 2xx codes.
    pub fn is_success(self) -> bool {
        (200..300).contains(&self.as_u16())
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.canonical_reason())
    }
}

impl From<StatusCode> for u16 {
    fn from(code: StatusCode) -> u16 {
        code.as_u16()
    }
}

/// Returned when a wire method token or numeric id does not name a routable method.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported HTTP method: {0}")]
pub struct UnknownMethod(pub String);

/// A routable HTTP request method.
///
/// The discriminants are stable identifiers (`GET = 0` … `DELETE = 4`) and are
/// safe to persist or exchange with callers that refer to methods by number.
///
/// # Examples
///
/// ```
/// use switchyard::http::Method;
///
/// let method: Method = "PATCH".parse().unwrap();
/// assert_eq!(method, Method::Patch);
/// assert_eq!(method.id(), 3);
/// assert_eq!(Method::from_id(3), Some(Method::Patch));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Method {
    /// GET — retrieve a representation of the target resource.
    Get = 0,
    /// POST — perform resource-specific processing on the request payload.
    Post = 1,
    /// PUT — replace the target resource's current representation.
    Put = 2,
    /// PATCH — apply partial modifications to a resource.
    Patch = 3,
    /// DELETE — remove the target resource.
    Delete = 4,
}

impl Method {
    /// Every routable method, in id order.
    pub const ALL: [Method; 5] = [
        Method::Get,
        Method::Post,
        Method::Put,
        Method::Patch,
        Method::Delete,
    ];

    /// Returns the stable numeric id of this method.
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Looks a method up by its stable numeric id.
    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(usize::from(id)).copied()
    }

    /// Returns the method as the uppercase wire token.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    // Slot of this method in per-method tables.
    pub(crate) fn index(self) -> usize {
        usize::from(self.id())
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = UnknownMethod;

    /// Parses the wire token. Tokens are case-sensitive, as in HTTP/1.1.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            other => Err(UnknownMethod(other.to_owned())),
        }
    }
}

impl TryFrom<u8> for Method {
    type Error = UnknownMethod;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Self::from_id(id).ok_or_else(|| UnknownMethod(id.to_string()))
    }
}

impl AsRef<str> for Method {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}
