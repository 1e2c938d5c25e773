//! Request body sources.
//!
//! A [`Body`] is either already buffered by the transport or arrives as a
//! sequence of chunks over a channel. Either way it is read at most once; the
//! request context caches the materialized bytes.

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::sync::mpsc;

/// Failure reported by a transport while streaming a body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("request body could not be read: {reason}")]
pub struct BodyError {
    reason: String,
}

impl BodyError {
    /// Creates a body error carrying a human-readable reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Producer half of a streamed [`Body`], held by the transport.
pub type BodySender = mpsc::Sender<Result<Bytes, BodyError>>;

/// The raw body of one request.
#[derive(Debug, Default)]
pub enum Body {
    /// No body was sent.
    #[default]
    Empty,
    /// The whole body is already in memory.
    Full(Bytes),
    /// Chunks still arriving from the transport; the stream ends when every
    /// sender is dropped.
    Streaming(mpsc::Receiver<Result<Bytes, BodyError>>),
}

impl Body {
    /// Creates a streamed body and the sender the transport feeds it through.
    ///
    /// `buffer` is the number of chunks that may be queued before the sender waits.
    ///
    /// # Examples
    ///
    /// ```
    /// use bytes::Bytes;
    /// use switchyard::http::Body;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let (tx, body) = Body::channel(4);
    /// tx.send(Ok(Bytes::from_static(b"hel"))).await.unwrap();
    /// tx.send(Ok(Bytes::from_static(b"lo"))).await.unwrap();
    /// drop(tx);
    /// assert_eq!(body.collect().await.unwrap(), Bytes::from_static(b"hello"));
    /// # }
    /// ```
    pub fn channel(buffer: usize) -> (BodySender, Body) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (tx, Body::Streaming(rx))
    }

    /// Reads the body to the end.
    ///
    /// # Errors
    ///
    /// Returns the first [`BodyError`] the transport pushed into a streamed body.
    pub async fn collect(self) -> Result<Bytes, BodyError> {
        match self {
            Body::Empty => Ok(Bytes::new()),
            Body::Full(bytes) => Ok(bytes),
            Body::Streaming(mut rx) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = rx.recv().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        if bytes.is_empty() {
            Body::Empty
        } else {
            Body::Full(bytes)
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Bytes::from(bytes).into()
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Bytes::from_static(text.as_bytes()).into()
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Bytes::from(text).into()
    }
}
