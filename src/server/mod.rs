//! Async TCP front end using Tokio.
//!
//! Accepts TCP connections and dispatches fully buffered HTTP/1.1 requests to
//! a handler function. Supports HTTP/1.1 persistent connections (keep-alive)
//! and pipelined requests.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::http::{
    StatusCode,
    request::{Request, RequestError},
    response::Response,
};

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
}

/// Default cap on a complete HTTP request (head plus body) we will buffer (8 MiB).
pub const DEFAULT_MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// The proxy's HTTP front end.
///
/// Binds to a TCP address and dispatches incoming HTTP/1.1 requests to a
/// handler function.
///
/// # Examples
///
/// ```rust,no_run
/// use edgecache::server::Server;
/// use edgecache::http::{Response, StatusCode};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = Server::bind("127.0.0.1:8787").await?;
///     server.run(|_req| async {
///         Response::new(StatusCode::Ok).body("Hello!")
///     }).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    max_request_size: usize,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
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
            max_request_size: DEFAULT_MAX_REQUEST_SIZE,
        })
    }

    /// Sets the largest request (head plus body) accepted before answering `413`.
    #[must_use]
    pub fn max_request_size(mut self, bytes: usize) -> Self {
        self.max_request_size = bytes;
        self
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts accepting connections and dispatching requests to `handler`.
    ///
    /// The handler receives a [`Request`] whose body has been read in full and
    /// must return a [`Future`] that resolves to a [`Response`]. The handler is
    /// wrapped in an [`Arc`] and shared across all spawned Tokio tasks, so it
    /// must be `Send + Sync + 'static`.
    ///
    /// This method runs until the process is terminated or an unrecoverable
    /// listener error occurs.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn run<H, F>(self, handler: H) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        let handler = Arc::new(handler);
        info!(address = %self.local_addr, "edgecache listening");

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let handler = Arc::clone(&handler);
            let max_request_size = self.max_request_size;

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, handler, max_request_size).await
                {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// Handles a single TCP connection over its lifetime.
///
/// HTTP/1.1 connections are persistent by default: we loop, answering every
/// complete request in the buffer, until the peer closes the connection or
/// signals `Connection: close`.
async fn handle_connection<H, F>(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    handler: Arc<H>,
    max_request_size: usize,
) -> Result<(), std::io::Error>
where
    H: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        // Drain every complete request already buffered before reading again.
        loop {
            if buf.is_empty() {
                break;
            }

            let oversized = match Request::parse_head(&buf) {
                Ok(head) => head.total_len() > max_request_size,
                Err(RequestError::Incomplete) => buf.len() > max_request_size,
                Err(e) => {
                    return reject(&mut stream, peer_addr, &e).await;
                }
            };
            if oversized {
                warn!(peer = %peer_addr, limit = max_request_size, "request too large, sending 413");
                let response = Response::new(StatusCode::PayloadTooLarge)
                    .body("Request entity too large")
                    .keep_alive(false);
                stream.write_all(&response.into_bytes()).await?;
                return Ok(());
            }

            let (request, consumed) = match Request::parse(&buf) {
                Ok(pair) => pair,
                // Head or body not fully received yet, read more data.
                Err(RequestError::Incomplete) => break,
                Err(e) => return reject(&mut stream, peer_addr, &e).await,
            };

            let keep_alive = request.is_keep_alive();

            debug!(
                peer = %peer_addr,
                method = %request.method(),
                path = %request.path(),
                body_bytes = request.body().len(),
                "dispatching request"
            );

            let response = handler(request).await.keep_alive(keep_alive);
            stream.write_all(&response.into_bytes()).await?;
            stream.flush().await?;

            let _ = buf.split_to(consumed);

            if !keep_alive {
                debug!(peer = %peer_addr, "Connection: close, shutting down");
                return Ok(());
            }
        }

        let bytes_read = stream.read_buf(&mut buf).await?;
        if bytes_read == 0 {
            debug!(peer = %peer_addr, "connection closed by peer");
            return Ok(());
        }
    }
}

// Answers a request that cannot be framed and closes the connection.
async fn reject(
    stream: &mut TcpStream,
    peer_addr: SocketAddr,
    error: &RequestError,
) -> Result<(), std::io::Error> {
    let status = match error {
        RequestError::UnsupportedTransferEncoding { .. } => StatusCode::LengthRequired,
        _ => StatusCode::BadRequest,
    };
    warn!(peer = %peer_addr, error = %error, status = status.as_u16(), "rejecting request");
    let response = Response::new(status)
        .body(format!("{}: {error}", status.canonical_reason()))
        .keep_alive(false);
    stream.write_all(&response.into_bytes()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn spawn_echo(max_request_size: usize) -> SocketAddr {
        let server = Server::bind("127.0.0.1:0")
            .await
            .unwrap()
            .max_request_size(max_request_size);
        let addr = server.local_addr();
        tokio::spawn(server.run(|req: Request| async move {
            Response::new(StatusCode::Ok).body_bytes(req.body().clone())
        }));
        addr
    }

    async fn exchange(addr: SocketAddr, raw: &[u8]) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(raw).await.unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        String::from_utf8_lossy(&out).into_owned()
    }

    #[tokio::test]
    async fn echoes_body_and_closes() {
        let addr = spawn_echo(DEFAULT_MAX_REQUEST_SIZE).await;
        let reply = exchange(
            addr,
            b"POST /v1/scrape HTTP/1.1\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello",
        )
        .await;
        assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(reply.ends_with("\r\n\r\nhello"));
        assert!(reply.contains("Connection: close\r\n"));
    }

    #[tokio::test]
    async fn pipelined_requests_are_answered_in_order() {
        let addr = spawn_echo(DEFAULT_MAX_REQUEST_SIZE).await;
        let reply = exchange(
            addr,
            b"POST / HTTP/1.1\r\nContent-Length: 3\r\n\r\nonePOST / HTTP/1.1\r\nContent-Length: 3\r\nConnection: close\r\n\r\ntwo",
        )
        .await;
        let one = reply.find("\r\n\r\none").unwrap();
        let two = reply.find("\r\n\r\ntwo").unwrap();
        assert!(one < two);
    }

    #[tokio::test]
    async fn declared_oversize_is_rejected_early() {
        let addr = spawn_echo(64).await;
        let reply = exchange(addr, b"POST / HTTP/1.1\r\nContent-Length: 1000\r\n\r\n").await;
        assert!(reply.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
    }

    #[tokio::test]
    async fn chunked_is_length_required() {
        let addr = spawn_echo(DEFAULT_MAX_REQUEST_SIZE).await;
        let reply = exchange(
            addr,
            b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n0\r\n\r\n",
        )
        .await;
        assert!(reply.starts_with("HTTP/1.1 411 Length Required\r\n"));
    }

    #[tokio::test]
    async fn overflowing_content_length_is_bad_request() {
        let addr = spawn_echo(DEFAULT_MAX_REQUEST_SIZE).await;
        let raw = format!(
            "POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n",
            usize::MAX - 5
        );
        let reply = exchange(addr, raw.as_bytes()).await;
        assert!(reply.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }

    #[tokio::test]
    async fn garbage_is_bad_request() {
        let addr = spawn_echo(DEFAULT_MAX_REQUEST_SIZE).await;
        let reply = exchange(addr, b"\x00\x01 not http\r\n\r\n").await;
        assert!(reply.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }
}
