//! Async TCP transport using Tokio.
//!
//! Accepts TCP connections, reads complete HTTP/1.1 requests, and hands each one
//! to the [`Dispatcher`]. Supports HTTP/1.1 persistent connections (keep-alive)
//! out of the box. Every connection runs on its own task, and every handler on
//! its own task beneath that.

use std::future::Future;
use std::net::SocketAddr;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, ServerConfig};
use crate::dispatcher::Dispatcher;
use crate::http::{
    Body, StatusCode,
    request::{Request, RequestError},
    response::Response,
};
use crate::router::Router;

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build the async runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// The switchyard HTTP server.
///
/// # Examples
///
/// ```rust,no_run
/// use switchyard::{Router, Server};
/// use switchyard::context::RequestContext;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut router = Router::new();
///     router.get("/", |mut ctx: RequestContext| async move {
///         ctx.send_text("Hello!")?;
///         Ok(())
///     })?;
///
///     let server = Server::bind("127.0.0.1:8080").await?;
///     server.serve(router).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: ServerConfig,
}

impl Server {
    /// Binds the server to the given TCP address with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        Self::bind_with_config(addr, ServerConfig::default()).await
    }

    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] if `config` is out of range and
    /// [`ServerError::Bind`] if the address cannot be bound.
    pub async fn bind_with_config(
        addr: impl AsRef<str>,
        config: ServerConfig,
    ) -> Result<Self, ServerError> {
        config.validate()?;
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            config,
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Freezes `router` and serves it until the listener fails.
    ///
    /// # Errors
    ///
    /// Currently never returns `Ok`; accept errors are logged and retried.
    pub async fn serve(self, router: Router) -> Result<(), ServerError> {
        self.serve_with_shutdown(router, std::future::pending()).await
    }

    /// Freezes `router` and serves it until `shutdown` resolves.
    ///
    /// Once `shutdown` completes no new connections are accepted; connections
    /// already open finish on their own tasks.
    ///
    /// # Errors
    ///
    /// Reserved for listener failures; accept errors are logged and retried.
    pub async fn serve_with_shutdown(
        self,
        router: Router,
        shutdown: impl Future<Output = ()> + Send,
    ) -> Result<(), ServerError> {
        let dispatcher = router.into_dispatcher();
        info!(
            address = %self.local_addr,
            routes = dispatcher.table().len(),
            "switchyard listening"
        );

        tokio::pin!(shutdown);

        loop {
            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                () = &mut shutdown => {
                    info!(address = %self.local_addr, "shutdown requested, no longer accepting");
                    return Ok(());
                }
            };

            let (stream, peer_addr) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let dispatcher = dispatcher.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, dispatcher, config).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// Handles a single TCP connection over its lifetime.
///
/// HTTP/1.1 connections are persistent by default: we loop, reading one
/// request per iteration, until the peer closes the connection or signals
/// `Connection: close`.
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    dispatcher: Dispatcher,
    config: ServerConfig,
) -> Result<(), std::io::Error> {
    let mut buf = BytesMut::with_capacity(config.initial_buffer_size);

    loop {
        // Pipelined requests may already be fully buffered; only read when the
        // buffer cannot yield a complete request.
        let frame = match next_request(&buf, &config) {
            Frame::Complete(request, body_offset, total) => Some((request, body_offset, total)),
            Frame::NeedMore => None,
            Frame::Reject(status, reason) => {
                warn!(peer = %peer_addr, %status, %reason, "rejecting request");
                let response = Response::new(status).body(reason).keep_alive(false);
                stream.write_all(&response.into_bytes()).await?;
                break;
            }
        };

        let Some((request, body_offset, total)) = frame else {
            let bytes_read = stream.read_buf(&mut buf).await?;
            if bytes_read == 0 {
                debug!(peer = %peer_addr, "connection closed by peer");
                break;
            }
            continue;
        };

        let frame = buf.split_to(total).freeze();
        let request = request.body(Body::from(frame.slice(body_offset..)));
        let keep_alive = request.is_keep_alive();

        debug!(
            peer = %peer_addr,
            method = %request.method_str(),
            path = %request.path(),
            "dispatching request"
        );

        let response = dispatcher.dispatch(request).await.keep_alive(keep_alive);
        stream.write_all(&response.into_bytes()).await?;
        stream.flush().await?;

        if !keep_alive {
            debug!(peer = %peer_addr, "Connection: close, shutting down");
            break;
        }
    }

    Ok(())
}

// What the buffered bytes amount to so far.
enum Frame {
    // Parsed head, body offset, and total length (head + body) in the buffer.
    Complete(Request, usize, usize),
    NeedMore,
    Reject(StatusCode, String),
}

fn next_request(buf: &[u8], config: &ServerConfig) -> Frame {
    if buf.is_empty() {
        return Frame::NeedMore;
    }

    let (request, body_offset) = match Request::parse_with_limit(buf, config.max_headers) {
        Ok(pair) => pair,
        Err(RequestError::Incomplete) => {
            return if buf.len() > config.max_request_size {
                Frame::Reject(StatusCode::PayloadTooLarge, "Request entity too large".into())
            } else {
                Frame::NeedMore
            };
        }
        Err(RequestError::Parse(httparse::Error::TooManyHeaders)) => {
            return Frame::Reject(
                StatusCode::RequestHeaderFieldsTooLarge,
                "Too many request headers".into(),
            );
        }
        Err(e) => return Frame::Reject(StatusCode::BadRequest, format!("Bad Request: {e}")),
    };

    if request.has_transfer_coding() {
        return Frame::Reject(
            StatusCode::NotImplemented,
            "Transfer-Encoding is not supported".into(),
        );
    }

    let content_length = match request.content_length() {
        Ok(n) => n,
        Err(e) => return Frame::Reject(StatusCode::BadRequest, format!("Bad Request: {e}")),
    };

    let total = body_offset.saturating_add(content_length);
    if total > config.max_request_size {
        return Frame::Reject(StatusCode::PayloadTooLarge, "Request entity too large".into());
    }
    if buf.len() < total {
        return Frame::NeedMore;
    }

    Frame::Complete(request, body_offset, total)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::oneshot;

    use super::*;
    use crate::context::RequestContext;
    use crate::router::HandlerResult;

    async fn user(mut ctx: RequestContext) -> HandlerResult {
        let id = ctx.param("id").unwrap_or_default().to_owned();
        ctx.send_text(format!("user {id}"))?;
        Ok(())
    }

    async fn echo(mut ctx: RequestContext) -> HandlerResult {
        let body = ctx.body().await.unwrap_or_default();
        ctx.send_bytes("application/octet-stream", body)?;
        Ok(())
    }

    async fn spawn_server(config: ServerConfig) -> (SocketAddr, oneshot::Sender<()>) {
        let mut router = Router::new();
        router.get("/users/:id", user).unwrap();
        router.post("/echo", echo).unwrap();

        let server = Server::bind_with_config("127.0.0.1:0", config).await.unwrap();
        let addr = server.local_addr();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        tokio::spawn(server.serve_with_shutdown(router, async move {
            let _ = stop_rx.await;
        }));
        (addr, stop_tx)
    }

    async fn exchange(addr: SocketAddr, raw: &[u8]) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(raw).await.unwrap();
        let mut out = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut out))
            .await
            .unwrap()
            .unwrap();
        String::from_utf8_lossy(&out).into_owned()
    }

    fn frame(buf: &[u8]) -> Frame {
        next_request(buf, &ServerConfig::default())
    }

    #[test]
    fn frame_waits_for_body() {
        assert!(matches!(frame(b""), Frame::NeedMore));
        assert!(matches!(
            frame(b"POST /echo HTTP/1.1\r\nContent-Length: 5\r\n\r\nhel"),
            Frame::NeedMore
        ));
        let raw = b"POST /echo HTTP/1.1\r\nContent-Length: 5\r\n\r\nhelloGET";
        match frame(raw) {
            Frame::Complete(_, offset, total) => {
                assert_eq!(&raw[offset..total], b"hello");
            }
            _ => panic!("expected a complete frame"),
        }
    }

    #[test]
    fn frame_rejects_oversized_and_malformed() {
        let config = ServerConfig {
            max_request_size: 64,
            initial_buffer_size: 64,
            ..ServerConfig::default()
        };
        let raw = b"POST /echo HTTP/1.1\r\nContent-Length: 1000\r\n\r\n";
        assert!(matches!(
            next_request(raw, &config),
            Frame::Reject(StatusCode::PayloadTooLarge, _)
        ));
        assert!(matches!(
            frame(b"POST / HTTP/1.1\r\nContent-Length: x\r\n\r\n"),
            Frame::Reject(StatusCode::BadRequest, _)
        ));
        assert!(matches!(
            frame(b"G\x00T / HTTP/1.1\r\n\r\n"),
            Frame::Reject(StatusCode::BadRequest, _)
        ));
    }

    #[test]
    fn frame_rejects_transfer_codings() {
        let raw = b"POST /echo HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n";
        assert!(matches!(
            frame(raw),
            Frame::Reject(StatusCode::NotImplemented, _)
        ));
        let raw = b"POST /echo HTTP/1.1\r\nTransfer-Encoding: identity\r\nContent-Length: 2\r\n\r\nhi";
        assert!(matches!(frame(raw), Frame::Complete(_, _, total) if total == raw.len()));
    }

    #[tokio::test]
    async fn chunked_request_is_refused_and_closed() {
        let (addr, _stop) = spawn_server(ServerConfig::default()).await;
        let raw = b"POST /echo HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n";
        let res = exchange(addr, raw).await;
        assert!(res.starts_with("HTTP/1.1 501 Not Implemented\r\n"), "{res}");
        assert!(res.contains("Connection: close\r\n"), "{res}");
        assert_eq!(res.matches("HTTP/1.1").count(), 1, "{res}");
    }

    #[tokio::test]
    async fn serves_routes_over_tcp() {
        let (addr, _stop) = spawn_server(ServerConfig::default()).await;

        let res = exchange(addr, b"GET /users/42 HTTP/1.1\r\nConnection: close\r\n\r\n").await;
        assert!(res.starts_with("HTTP/1.1 200 OK\r\n"), "{res}");
        assert!(res.ends_with("\r\n\r\nuser 42"), "{res}");

        let res = exchange(addr, b"GET /nope HTTP/1.1\r\nConnection: close\r\n\r\n").await;
        assert!(res.starts_with("HTTP/1.1 404 Not Found\r\n"), "{res}");

        let res = exchange(addr, b"DELETE /echo HTTP/1.1\r\nConnection: close\r\n\r\n").await;
        assert!(res.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"), "{res}");
        assert!(res.contains("Allow: POST\r\n"), "{res}");
    }

    #[tokio::test]
    async fn keep_alive_serves_pipelined_requests_in_order() {
        let (addr, _stop) = spawn_server(ServerConfig::default()).await;

        let raw = b"POST /echo HTTP/1.1\r\nContent-Length: 3\r\n\r\nabc\
GET /users/7 HTTP/1.1\r\nConnection: close\r\n\r\n";
        let res = exchange(addr, raw).await;
        let first = res.find("\r\n\r\nabc").unwrap();
        let second = res.find("\r\n\r\nuser 7").unwrap();
        assert!(first < second, "{res}");
        assert_eq!(res.matches("HTTP/1.1 200 OK").count(), 2);
    }

    #[tokio::test]
    async fn oversized_request_gets_413() {
        let config = ServerConfig {
            max_request_size: 128,
            initial_buffer_size: 64,
            ..ServerConfig::default()
        };
        let (addr, _stop) = spawn_server(config).await;
        let res = exchange(addr, b"POST /echo HTTP/1.1\r\nContent-Length: 4096\r\n\r\n").await;
        assert!(res.starts_with("HTTP/1.1 413 Payload Too Large\r\n"), "{res}");
    }

    #[tokio::test]
    async fn shutdown_stops_accepting() {
        let mut router = Router::new();
        router.get("/users/:id", user).unwrap();
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.serve_with_shutdown(router, async move {
            let _ = stop_rx.await;
        }));

        stop_tx.send(()).unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.is_ok());
    }

    #[tokio::test]
    async fn bind_rejects_invalid_config() {
        let config = ServerConfig {
            max_headers: 0,
            ..ServerConfig::default()
        };
        assert!(matches!(
            Server::bind_with_config("127.0.0.1:0", config).await,
            Err(ServerError::Config(_))
        ));
    }
}
