//! Per-request context: the handler's view of one request and its only way to respond.
//!
//! A [`RequestContext`] owns the headers, body, and matched path parameters of a
//! single request. Exactly one of the `send_*` operations may succeed on it;
//! that call hands the [`Reply`] to the dispatcher and releases the request's
//! header and body storage. Any later send fails with
//! [`ContextError::AlreadyResponded`] and leaves the first reply untouched.

use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{trace, warn};

use crate::http::request::parse_query_string;
use crate::http::response::FRAMING_HEADERS;
use crate::http::{Body, Headers, Request, Response, StatusCode};

/// Errors returned to handler code by the send operations.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("a response was already sent for this request")]
    AlreadyResponded,

    #[error("failed to serialize response body: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid response header {name:?}")]
    InvalidHeader { name: String },

    #[error("response header {name:?} is written by the transport")]
    ReservedHeader { name: String },
}

/// Path parameters extracted from the matched route.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Params {
    map: HashMap<String, String>,
}

impl Params {
    /// Create a new empty parameters map
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// Insert a value into the parameters map
    pub fn insert(&mut self, key: String, value: String) {
        self.map.insert(key, value);
    }

    /// Get a value from the parameters map
    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterate over `(name, value)` pairs in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn into_map(self) -> HashMap<String, String> {
        self.map
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Params {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            map: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// The body of a finalized response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyBody {
    /// UTF-8 text, sent as `text/plain; charset=utf-8`.
    Text(String),
    /// Raw bytes with a caller-declared content type.
    Bytes { content_type: String, bytes: Bytes },
    /// A JSON document, sent as `application/json`.
    Json(Bytes),
}

/// The single response a handler produced, plus any headers it staged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub body: ReplyBody,
    pub headers: Headers,
}

impl Reply {
    /// Render this reply as a `200 OK` HTTP response.
    ///
    /// A staged `Content-Type` takes the place of the one implied by the body.
    pub fn into_response(self) -> Response {
        let Reply { body, headers } = self;
        let (content_type, response) = match body {
            ReplyBody::Text(text) => (
                "text/plain; charset=utf-8".to_owned(),
                Response::new(StatusCode::Ok).body(text),
            ),
            ReplyBody::Bytes {
                content_type,
                bytes,
            } => (content_type, Response::new(StatusCode::Ok).body_bytes(bytes)),
            ReplyBody::Json(bytes) => (
                "application/json".to_owned(),
                Response::new(StatusCode::Ok).body_bytes(bytes),
            ),
        };

        let response = if headers.contains("content-type") {
            response
        } else {
            response.header("Content-Type", content_type)
        };
        response.headers_from(headers)
    }
}

/// Receiving half of a context's reply slot, held by the dispatcher.
pub type ReplyReceiver = oneshot::Receiver<Reply>;

// Lazily materialized request body.
#[derive(Debug)]
enum BodyState {
    Pending(Body),
    Ready(Bytes),
    Unreadable,
    Released,
}

/// Per-request context handed to a route handler.
///
/// # Examples
///
/// ```
/// use switchyard::context::{ContextError, RequestContext, ReplyBody};
/// use switchyard::http::Request;
///
/// let request = Request::new("GET", "/").header("Content-Type", "text/plain");
/// let (mut ctx, mut reply) = RequestContext::new(request, None);
///
/// assert_eq!(ctx.header("content-type"), Some("text/plain"));
/// ctx.send_text("first").unwrap();
/// assert!(matches!(ctx.send_text("second"), Err(ContextError::AlreadyResponded)));
///
/// let reply = reply.try_recv().unwrap();
/// assert_eq!(reply.body, ReplyBody::Text("first".to_owned()));
/// ```
#[derive(Debug)]
pub struct RequestContext {
    path: String,
    query: Option<String>,
    headers: Option<Headers>,
    body: BodyState,
    params: Option<Params>,
    response_headers: Headers,
    reply: Option<oneshot::Sender<Reply>>,
}

impl RequestContext {
    /// Wrap `request` in a new context.
    ///
    /// `params` is `None` when no parameters were extracted for this request.
    /// The returned receiver yields the reply once a send operation succeeds, and
    /// reports closure if the context is dropped without responding.
    pub fn new(request: Request, params: Option<Params>) -> (Self, ReplyReceiver) {
        let (tx, rx) = oneshot::channel();
        let parts = request.into_parts();
        let ctx = Self {
            path: parts.path,
            query: parts.query,
            headers: Some(parts.headers),
            body: BodyState::Pending(parts.body),
            params,
            response_headers: Headers::new(),
            reply: Some(tx),
        };
        (ctx, rx)
    }

    /// The request path (without the query string).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Case-insensitive header lookup; `None` if missing or the context is finalized.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.as_ref()?.get(name)
    }

    /// Number of distinct header names present; `0` once the context is finalized.
    ///
    /// Repeated lines for one name count once, whatever their case.
    pub fn header_count(&self) -> usize {
        self.headers.as_ref().map_or(0, Headers::len_keys)
    }

    /// Every request header; `None` once the context is finalized.
    pub fn headers(&self) -> Option<&Headers> {
        self.headers.as_ref()
    }

    /// The matched path parameters, or `None` if none were extracted for this request.
    pub fn params(&self) -> Option<&Params> {
        self.params.as_ref()
    }

    /// Shorthand for a single path parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.as_ref()?.get(name)
    }

    /// Decoded query parameters, or `None` if the request had no query string.
    pub fn query_params(&self) -> Option<HashMap<String, String>> {
        self.query.as_deref().map(parse_query_string)
    }

    /// Shorthand for a single query parameter.
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.query_params()?.remove(name)
    }

    /// The raw request body.
    ///
    /// The body is read from its source on the first call and cached; later
    /// calls return the same bytes. Returns `None` if the transport failed
    /// while delivering the body, or once the context is finalized.
    pub async fn body(&mut self) -> Option<Bytes> {
        if let BodyState::Pending(_) = self.body {
            let BodyState::Pending(source) =
                std::mem::replace(&mut self.body, BodyState::Unreadable)
            else {
                return None;
            };
            match source.collect().await {
                Ok(bytes) => self.body = BodyState::Ready(bytes),
                Err(e) => warn!(path = %self.path, error = %e, "request body unreadable"),
            }
        }

        match &self.body {
            BodyState::Ready(bytes) => Some(bytes.clone()),
            _ => None,
        }
    }

    /// Stage a header for the eventual response. Ignored once a response was sent.
    ///
    /// Repeated names are sent as repeated header lines. `Content-Type` is the
    /// exception: the last staged value wins and replaces the type implied by
    /// the send operation.
    ///
    /// # Errors
    ///
    /// - [`ContextError::InvalidHeader`] if the name is not an HTTP token or the
    ///   value contains a control character such as CR or LF.
    /// - [`ContextError::ReservedHeader`] for `Content-Length`,
    ///   `Transfer-Encoding`, and `Connection`.
    pub fn add_header(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), ContextError> {
        if self.is_finalized() {
            return Ok(());
        }
        let name = name.into();
        let value = value.into();
        check_header(&name, &value)?;

        if name.eq_ignore_ascii_case("content-type") {
            self.response_headers.set(name, value);
        } else {
            self.response_headers.insert(name, value);
        }
        Ok(())
    }

    /// Returns `true` once a send operation has succeeded.
    pub fn is_finalized(&self) -> bool {
        self.reply.is_none()
    }

    /// Respond with UTF-8 text.
    ///
    /// # Errors
    ///
    /// [`ContextError::AlreadyResponded`] if a response was already sent.
    pub fn send_text(&mut self, text: impl Into<String>) -> Result<(), ContextError> {
        self.finalize(ReplyBody::Text(text.into()))
    }

    /// Respond with raw bytes under the given content type.
    ///
    /// # Errors
    ///
    /// [`ContextError::AlreadyResponded`] if a response was already sent.
    pub fn send_bytes(
        &mut self,
        content_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Result<(), ContextError> {
        self.finalize(ReplyBody::Bytes {
            content_type: content_type.into(),
            bytes: bytes.into(),
        })
    }

    /// Respond with `value` serialized as JSON.
    ///
    /// A serialization failure leaves the context open, so the handler may
    /// still send something else.
    ///
    /// # Errors
    ///
    /// - [`ContextError::AlreadyResponded`] if a response was already sent.
    /// - [`ContextError::Serialize`] if `value` cannot be encoded.
    pub fn send_json<T>(&mut self, value: &T) -> Result<(), ContextError>
    where
        T: Serialize + ?Sized,
    {
        if self.is_finalized() {
            return Err(ContextError::AlreadyResponded);
        }
        let mut writer = BytesMut::with_capacity(128).writer();
        serde_json::to_writer(&mut writer, value)?;
        self.finalize(ReplyBody::Json(writer.into_inner().freeze()))
    }

    /// Respond with an already-encoded JSON document, sent as-is.
    ///
    /// # Errors
    ///
    /// [`ContextError::AlreadyResponded`] if a response was already sent.
    pub fn send_raw_json(&mut self, json: impl Into<Bytes>) -> Result<(), ContextError> {
        self.finalize(ReplyBody::Json(json.into()))
    }

    // The one commit point: hand the reply over and drop request storage.
    fn finalize(&mut self, body: ReplyBody) -> Result<(), ContextError> {
        let tx = self.reply.take().ok_or(ContextError::AlreadyResponded)?;

        let reply = Reply {
            body,
            headers: std::mem::take(&mut self.response_headers),
        };

        self.headers = None;
        self.body = BodyState::Released;

        if tx.send(reply).is_err() {
            warn!(path = %self.path, "reply dropped, the dispatcher is no longer waiting");
        } else {
            trace!(path = %self.path, "reply committed");
        }

        Ok(())
    }
}

fn check_header(name: &str, value: &str) -> Result<(), ContextError> {
    let is_token = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b));
    let is_clean = value.bytes().all(|b| b == b'\t' || !b.is_ascii_control());
    if !is_token || !is_clean {
        return Err(ContextError::InvalidHeader {
            name: name.to_owned(),
        });
    }
    if FRAMING_HEADERS
        .iter()
        .any(|reserved| name.eq_ignore_ascii_case(reserved))
    {
        return Err(ContextError::ReservedHeader {
            name: name.to_owned(),
        });
    }
    Ok(())
}
