//! Transport-neutral request value and HTTP/1.1 head parsing using the [`httparse`] crate.

use std::collections::HashMap;

use thiserror::Error;

use super::{Body, Headers, Method};

/// Errors that can occur while parsing an HTTP/1.1 request head.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete — more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid Content-Length header: {value}")]
    InvalidContentLength { value: String },
}

/// An already-decoded inbound request, as handed to the dispatcher.
///
/// This is the boundary between the transport and the router: whatever accepts
/// connections builds one of these (from [`Request::parse`] or the builder
/// methods) and the router never looks at sockets.
///
/// # Examples
///
/// ```
/// use switchyard::http::{Method, Request};
///
/// let request = Request::new("GET", "/hello?name=world").header("Host", "localhost");
///
/// assert_eq!(request.method(), Some(Method::Get));
/// assert_eq!(request.path(), "/hello");
/// assert_eq!(request.query_string(), Some("name=world"));
/// assert_eq!(request.headers().get("host"), Some("localhost"));
/// ```
#[derive(Debug)]
pub struct Request {
    method: String,
    path: String,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    query: Option<String>,
    body: Body,
}

/// The owned pieces of a [`Request`], taken apart by the request context.
#[derive(Debug)]
pub struct Parts {
    pub method: String,
    pub path: String,
    pub version: u8,
    pub headers: Headers,
    pub query: Option<String>,
    pub body: Body,
}

impl Request {
    /// Maximum number of headers we support per request.
    pub const MAX_HEADERS: usize = 64;

    /// Creates an HTTP/1.1 request with no headers and an empty body.
    ///
    /// `target` is the request target as it appears on the request line; a
    /// `?query` suffix is split off into [`query_string`](Self::query_string).
    pub fn new(method: impl Into<String>, target: &str) -> Self {
        let (path, query) = split_target(target);
        Self {
            method: method.into(),
            path,
            version: 1,
            headers: Headers::new(),
            query,
            body: Body::Empty,
        }
    }

    /// Appends a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Replaces the body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    /// Parse an HTTP/1.1 request head from a byte slice.
    ///
    /// Returns the parsed `Request` (with an empty body) and the byte offset at
    /// which the body begins in `buf`, i.e. immediately after the `\r\n\r\n`
    /// header terminator. The caller attaches the body once
    /// [`content_length`](Self::content_length) bytes are available.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`] — more data is needed to complete the request headers.
    /// - [`RequestError::Parse`] — the data is malformed and cannot be parsed.
    /// - [`RequestError::MissingField`] — a required field (method, path, version) is absent.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        Self::parse_with_limit(buf, Self::MAX_HEADERS)
    }

    /// Like [`parse`](Self::parse) with an explicit header-count ceiling.
    ///
    /// # Errors
    ///
    /// As [`parse`](Self::parse); exceeding `max_headers` yields
    /// `RequestError::Parse(httparse::Error::TooManyHeaders)`.
    pub fn parse_with_limit(
        buf: &[u8],
        max_headers: usize,
    ) -> Result<(Self, usize), RequestError> {
        let mut headers = vec![httparse::EMPTY_HEADER; max_headers];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method = raw_req
            .method
            .ok_or(RequestError::MissingField { field: "method" })?
            .to_owned();

        let raw_path = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?;
        let (path, query) = split_target(raw_path);

        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            match std::str::from_utf8(header.value) {
                Ok(value) => header_map.insert(header.name, value),
                Err(_) => header_map.insert_unreadable(header.name),
            }
        }

        Ok((
            Self {
                method,
                path,
                version,
                headers: header_map,
                query,
                body: Body::Empty,
            },
            body_offset,
        ))
    }

    /// Returns the routable method, or `None` for any other wire token.
    pub fn method(&self) -> Option<Method> {
        self.method.parse().ok()
    }

    /// Returns the method token exactly as received.
    pub fn method_str(&self) -> &str {
        &self.method
    }

    /// Returns the request path (without the query string).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the HTTP minor version number (0 = HTTP/1.0, 1 = HTTP/1.1).
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Returns the request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Returns `true` if the connection should be kept alive after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive. HTTP/1.0 defaults to close unless
    /// `Connection: keep-alive` is explicitly set.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(conn) => conn.eq_ignore_ascii_case("keep-alive"),
            None => self.version == 1,
        }
    }

    /// Returns the declared body length, `0` when no `Content-Length` header is present.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::InvalidContentLength`] if the header is not a number.
    pub fn content_length(&self) -> Result<usize, RequestError> {
        if !self.headers.contains("content-length") {
            return Ok(0);
        }
        let value = self
            .headers
            .get("content-length")
            .ok_or_else(|| RequestError::InvalidContentLength {
                value: "<non-UTF-8>".to_owned(),
            })?;
        value
            .trim()
            .parse()
            .map_err(|_| RequestError::InvalidContentLength {
                value: value.to_owned(),
            })
    }

    /// Returns `true` if `Transfer-Encoding` names any coding other than `identity`.
    ///
    /// Such bodies are not delimited by `Content-Length`, so the built-in
    /// transport refuses them.
    pub fn has_transfer_coding(&self) -> bool {
        if !self.headers.contains("transfer-encoding") {
            return false;
        }
        let mut codings = self
            .headers
            .get_all("transfer-encoding")
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .peekable();
        // A present but unreadable header still announces some coding.
        codings.peek().is_none() || codings.any(|coding| !coding.eq_ignore_ascii_case("identity"))
    }

    /// Splits the request into its owned parts.
    pub fn into_parts(self) -> Parts {
        Parts {
            method: self.method,
            path: self.path,
            version: self.version,
            headers: self.headers,
            query: self.query,
            body: self.body,
        }
    }
}

fn split_target(target: &str) -> (String, Option<String>) {
    match target.split_once('?') {
        Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
        None => (target.to_owned(), None),
    }
}

/// Parses a URL query string (`key=value&key2=value2`) into a `HashMap`.
///
/// Keys and values have `+` decoded as a space; no percent-decoding is applied.
/// Empty pairs (`a=1&&b=2`) are skipped. For a repeated key the last value wins.
pub fn parse_query_string(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (key.replace('+', " "), value.replace('+', " "))
        })
        .collect()
}
