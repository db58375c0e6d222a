//! TCP listener and HTTP/1.1 connection handling.
//!
//! One task per connection; connections are persistent unless the client asks
//! for `Connection: close` or sends HTTP/1.0 without keep-alive.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::http::{Method, Request, Response, StatusCode, request::RequestError};

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

/// Largest request (head plus body) accepted. Anything bigger, buffered or
/// declared through `Content-Length`, is answered with 413.
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

const INITIAL_BUF_SIZE: usize = 4096;

/// A bound listener.
///
/// # Examples
///
/// ```rust,no_run
/// use lithe::server::Server;
/// use lithe::http::{Request, Response, StatusCode};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = Server::bind("127.0.0.1:8080").await?;
///     server.run(|_req: Request| async {
///         Response::new(StatusCode::Ok).body("Hello!")
///     }).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds `addr` (`host:port`; port `0` picks a free one).
    ///
    /// # Errors
    ///
    /// [`ServerError::Bind`] if the address is taken or not permitted.
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_owned(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves `handler` until the process ends.
    pub async fn run<H, F>(self, handler: H) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        self.run_until(handler, std::future::pending()).await
    }

    /// Serves `handler` until `shutdown` resolves, then drops the listener.
    ///
    /// Connections already accepted keep running on their own tasks; no new
    /// connection is accepted once this returns.
    pub async fn run_until<H, F, S>(self, handler: H, shutdown: S) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
        S: Future<Output = ()>,
    {
        let handler = Arc::new(handler);
        info!(address = %self.local_addr, "lithe listening");
        tokio::pin!(shutdown);

        loop {
            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                () = &mut shutdown => {
                    info!(address = %self.local_addr, "listener closed");
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
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, handler).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

// Reads requests off one connection until the peer closes it or opts out of
// keep-alive.
async fn handle_connection<H, F>(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    handler: Arc<H>,
) -> Result<(), std::io::Error>
where
    H: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        if stream.read_buf(&mut buf).await? == 0 {
            debug!(peer = %peer_addr, "connection closed by peer");
            break;
        }

        if buf.len() > MAX_REQUEST_SIZE {
            warn!(peer = %peer_addr, size = buf.len(), "request too large");
            stream.write_all(&too_large().into_bytes()).await?;
            break;
        }

        // A pipelined client may have sent several requests in one read.
        while !buf.is_empty() {
            let (request, body_offset) = match Request::parse(&buf) {
                Ok(pair) => pair,
                Err(RequestError::Incomplete) => break,
                Err(e) => {
                    warn!(peer = %peer_addr, error = %e, "malformed request");
                    stream.write_all(&bad_request(e).into_bytes()).await?;
                    return Ok(());
                }
            };

            let declared = match request.headers().get("content-length") {
                None => 0,
                Some(_) => match request.content_length() {
                    Some(len) => len,
                    None => {
                        warn!(peer = %peer_addr, "invalid Content-Length");
                        let response = bad_request("invalid Content-Length");
                        stream.write_all(&response.into_bytes()).await?;
                        return Ok(());
                    }
                },
            };
            let total = match body_offset.checked_add(declared) {
                Some(total) if total <= MAX_REQUEST_SIZE => total,
                _ => {
                    warn!(peer = %peer_addr, declared, "declared body too large");
                    stream.write_all(&too_large().into_bytes()).await?;
                    return Ok(());
                }
            };
            if buf.len() < total {
                break;
            }

            let keep_alive = request.is_keep_alive();
            let head = request.method() == &Method::Head;
            let response = handler(request)
                .await
                .keep_alive(keep_alive)
                .omit_body(head);
            stream.write_all(&response.into_bytes()).await?;
            stream.flush().await?;
            let _ = buf.split_to(total);

            if !keep_alive {
                debug!(peer = %peer_addr, "closing connection");
                return Ok(());
            }
        }
    }

    Ok(())
}

fn too_large() -> Response {
    Response::new(StatusCode::PayloadTooLarge)
        .body("Request entity too large")
        .keep_alive(false)
}

fn bad_request(reason: impl std::fmt::Display) -> Response {
    Response::new(StatusCode::BadRequest)
        .body(format!("Bad Request: {reason}"))
        .keep_alive(false)
}
