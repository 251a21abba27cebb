//! Single-request loopback listener
//!
//! A [`ListenerSession`] owns the sockets bound for one [`RedirectTarget`]
//! and serves exactly one HTTP request on them.
//! [`ListenerSession::respond_once`] consumes the session, so every socket is
//! released when it returns, whatever the outcome (callback captured,
//! cancelled, or failed).
//!
//! # How the listener works
//!
//! 1. The bind addresses come from the redirect host: `localhost` binds
//!    `127.0.0.1` and, when the host has IPv6, `[::1]` on the same port; an
//!    address literal binds exactly that address.
//! 2. Every accepted connection gets its own reader task with a bounded
//!    request-head timeout. Connections that close or stay idle without
//!    sending a request line (browser preconnects, port scanners) are
//!    dropped and the listener keeps accepting.
//! 3. The first connection that delivers a request head wins. Its target is
//!    rebuilt into the URI the browser requested and handed to the response
//!    builder.
//! 4. The page is written with `Connection: close`. A failed write is logged
//!    and the captured URI is still returned.
//!
//! Cancellation is observed for the whole accept/read loop; a cancelled wait
//! writes nothing.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{Result, SigninError};
use crate::webui::pages::CallbackPage;
use crate::webui::redirect::RedirectTarget;

/// Upper bound on the request line plus headers.
const MAX_REQUEST_HEAD_BYTES: usize = 16 * 1024;

/// How long one connection may take to deliver its request head.
const REQUEST_HEAD_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// ListenerSession
// ---------------------------------------------------------------------------

/// Bound loopback sockets waiting for one callback request.
#[derive(Debug)]
pub struct ListenerSession {
    primary: TcpListener,
    secondary: Option<TcpListener>,
    host: String,
    port: u16,
}

impl ListenerSession {
    /// Binds the loopback addresses of `target`. Port `0` lets the OS
    /// choose; a `localhost` target then binds `[::1]` on the port the OS
    /// picked for `127.0.0.1`.
    ///
    /// # Errors
    ///
    /// Returns [`SigninError::Transport`] when the primary bind fails (port
    /// in use, permission denied). The `[::1]` half of a `localhost` bind is
    /// best effort.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use loopback_signin::webui::{ListenerSession, RedirectTarget};
    ///
    /// # async fn example() -> loopback_signin::error::Result<()> {
    /// let session = ListenerSession::bind(&RedirectTarget::localhost(0)?).await?;
    /// assert_ne!(session.port(), 0);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn bind(target: &RedirectTarget) -> Result<Self> {
        let addrs = target.bind_addrs();
        let (first, rest) = addrs.split_first().ok_or_else(|| {
            SigninError::InvalidConfiguration(format!(
                "redirect URI has no bindable address: {}",
                target.uri()
            ))
        })?;

        let primary = bind_addr(SocketAddr::new(*first, target.port())).await?;
        let port = primary
            .local_addr()
            .map_err(|e| SigninError::transport("failed to read listener address", e))?
            .port();

        let mut secondary = None;
        if let Some(addr) = rest.first() {
            let addr = SocketAddr::new(*addr, port);
            match TcpListener::bind(addr).await {
                Ok(listener) => secondary = Some(listener),
                Err(e) => tracing::debug!(%addr, error = %e, "Secondary loopback bind skipped"),
            }
        }

        tracing::debug!(
            port,
            host = target.host(),
            dual_stack = secondary.is_some(),
            "Loopback listener bound"
        );
        Ok(Self {
            primary,
            secondary,
            host: target.host().to_string(),
            port,
        })
    }

    /// The bound port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Waits for one request, answers it with `response_builder`'s page and
    /// returns the captured request URI.
    ///
    /// The wait observes `cancellation` while accepting and while reading
    /// request heads; a cancelled wait writes nothing and fails with
    /// [`SigninError::Cancelled`].
    ///
    /// # Errors
    ///
    /// - [`SigninError::Cancelled`] when `cancellation` fires first.
    /// - [`SigninError::Transport`] on accept failures or a malformed
    ///   request line (answered with `400 Bad Request`).
    pub async fn respond_once<F>(
        self,
        response_builder: F,
        cancellation: &CancellationToken,
    ) -> Result<Url>
    where
        F: FnOnce(&Url) -> CallbackPage,
    {
        let port = self.port;
        let received = tokio::select! {
            biased;

            _ = cancellation.cancelled() => {
                tracing::debug!(port, "Listener cancelled before a callback arrived");
                return Err(SigninError::Cancelled.into());
            }

            received = self.next_request() => received?,
        };

        let (mut stream, target) = received;

        let captured = match request_uri(&self.host, port, &target) {
            Ok(uri) => uri,
            Err(e) => {
                let _ = write_response(&mut stream, "400 Bad Request", &[], "").await;
                return Err(e);
            }
        };

        tracing::debug!(uri = %captured, "Captured callback request");

        let written = match response_builder(&captured) {
            CallbackPage::Html(body) => {
                write_response(
                    &mut stream,
                    "200 OK",
                    &[("Content-Type", "text/html; charset=utf-8")],
                    &body,
                )
                .await
            }
            CallbackPage::Redirect(location) => {
                write_response(&mut stream, "302 Found", &[("Location", location.as_str())], "")
                    .await
            }
        };
        if let Err(e) = written {
            tracing::warn!(error = %e, "Callback captured but the browser page could not be written");
        }

        Ok(captured)
    }

    /// Accepts connections until one delivers a request line.
    async fn next_request(&self) -> Result<(TcpStream, String)> {
        let mut pending = JoinSet::new();

        loop {
            tokio::select! {
                accepted = self.accept() => {
                    let (stream, peer) = accepted
                        .map_err(|e| SigninError::transport("failed to accept callback connection", e))?;
                    tracing::debug!(%peer, "Accepted callback connection");
                    pending.spawn(read_incoming(stream, peer));
                }

                Some(joined) = pending.join_next() => match joined {
                    Ok(Incoming::Request { stream, target }) => return Ok((stream, target)),
                    Ok(Incoming::Malformed { mut stream, request_line }) => {
                        let _ = write_response(&mut stream, "400 Bad Request", &[], "").await;
                        return Err(SigninError::transport(
                            "malformed callback request",
                            std::io::Error::new(
                                std::io::ErrorKind::InvalidData,
                                format!("unexpected request line: {request_line:?}"),
                            ),
                        )
                        .into());
                    }
                    Ok(Incoming::Dropped) => {}
                    Err(e) => tracing::debug!(error = %e, "Callback reader task ended abnormally"),
                },
            }
        }
    }

    async fn accept(&self) -> std::io::Result<(TcpStream, SocketAddr)> {
        match &self.secondary {
            None => self.primary.accept().await,
            Some(secondary) => tokio::select! {
                accepted = self.primary.accept() => accepted,
                accepted = secondary.accept() => accepted,
            },
        }
    }
}

/// Binds `port` on `localhost`, serves exactly one request and returns its
/// URI.
///
/// Convenience over [`ListenerSession::bind`] followed by
/// [`ListenerSession::respond_once`].
///
/// # Examples
///
/// ```no_run
/// use tokio_util::sync::CancellationToken;
/// use loopback_signin::webui::{listen_once_and_respond, CallbackPage};
///
/// # async fn example() -> loopback_signin::error::Result<()> {
/// let cancel = CancellationToken::new();
/// let uri = listen_once_and_respond(
///     8400,
///     |_uri| CallbackPage::Html("<p>done</p>".to_string()),
///     &cancel,
/// )
/// .await?;
/// println!("captured {uri}");
/// # Ok(())
/// # }
/// ```
pub async fn listen_once_and_respond<F>(
    port: u16,
    response_builder: F,
    cancellation: &CancellationToken,
) -> Result<Url>
where
    F: FnOnce(&Url) -> CallbackPage,
{
    let session = ListenerSession::bind(&RedirectTarget::localhost(port)?).await?;
    session.respond_once(response_builder, cancellation).await
}

// ---------------------------------------------------------------------------
// Connection handling
// ---------------------------------------------------------------------------

/// What one accepted connection turned out to be.
enum Incoming {
    Request { stream: TcpStream, target: String },
    Malformed { stream: TcpStream, request_line: String },
    Dropped,
}

async fn read_incoming(mut stream: TcpStream, peer: SocketAddr) -> Incoming {
    let head = tokio::time::timeout(REQUEST_HEAD_TIMEOUT, read_request_head(&mut stream)).await;
    match head {
        Err(_) => {
            tracing::debug!(%peer, "Connection idle without a request; dropped");
            Incoming::Dropped
        }
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::InvalidData => Incoming::Malformed {
            stream,
            request_line: e.to_string(),
        },
        Ok(Err(e)) => {
            tracing::debug!(%peer, error = %e, "Connection failed before a request; dropped");
            Incoming::Dropped
        }
        Ok(Ok(request_line)) if request_line.is_empty() => {
            tracing::debug!(%peer, "Connection closed without a request; dropped");
            Incoming::Dropped
        }
        Ok(Ok(request_line)) => match parse_request_target(&request_line) {
            Some(target) => Incoming::Request {
                target: target.to_string(),
                stream,
            },
            None => Incoming::Malformed {
                stream,
                request_line,
            },
        },
    }
}

async fn bind_addr(addr: SocketAddr) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| SigninError::transport(format!("failed to bind {addr}"), e))?;
    Ok(listener)
}

/// Reads the request head and returns the request line.
///
/// An empty string means the peer closed before sending anything.
async fn read_request_head(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    let mut total = 0usize;

    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;

        // EOF before the blank line: take what arrived.
        if n == 0 {
            break;
        }

        total += n;
        if total > MAX_REQUEST_HEAD_BYTES {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "request head over limit",
            ));
        }

        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            if request_line.is_empty() {
                // Tolerate leading empty lines before the request line.
                continue;
            }
            break;
        }
        if request_line.is_empty() {
            request_line = trimmed.to_string();
        }
    }

    Ok(request_line)
}

/// Extracts the origin-form target from `GET /path?query HTTP/1.1`.
fn parse_request_target(request_line: &str) -> Option<&str> {
    let mut parts = request_line.split_whitespace();
    let _method = parts.next()?;
    let target = parts.next()?;
    let version = parts.next()?;
    if parts.next().is_some() || !version.starts_with("HTTP/") || !target.starts_with('/') {
        return None;
    }
    Some(target)
}

/// Rebuilds the callback URI seen by the browser.
fn request_uri(host: &str, port: u16, target: &str) -> Result<Url> {
    let uri = Url::parse(&format!("http://{host}:{port}{target}"))?;
    Ok(uri)
}

async fn write_response(
    stream: &mut TcpStream,
    status: &str,
    headers: &[(&str, &str)],
    body: &str,
) -> Result<()> {
    let mut response = format!("HTTP/1.1 {status}\r\n");
    for (name, value) in headers {
        response.push_str(&format!("{name}: {value}\r\n"));
    }
    response.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    ));
    response.push_str(body);

    stream
        .write_all(response.as_bytes())
        .await
        .map_err(|e| SigninError::transport("failed to write callback response", e))?;
    stream
        .flush()
        .await
        .map_err(|e| SigninError::transport("failed to flush callback response", e))?;
    let _ = stream.shutdown().await;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_target_get_with_query() {
        assert_eq!(
            parse_request_target("GET /?code=abc&state=xyz HTTP/1.1"),
            Some("/?code=abc&state=xyz")
        );
    }

    #[test]
    fn test_parse_request_target_rejects_garbage() {
        assert_eq!(parse_request_target(""), None);
        assert_eq!(parse_request_target("GET"), None);
        assert_eq!(parse_request_target("GET /path"), None);
        assert_eq!(parse_request_target("GET /path FTP/1.0"), None);
        assert_eq!(parse_request_target("GET http://evil.example/ HTTP/1.1"), None);
        assert_eq!(parse_request_target("GET / HTTP/1.1 extra"), None);
    }

    #[test]
    fn test_request_uri_reconstruction() {
        let uri = request_uri("localhost", 4321, "/callback?code=abc").unwrap();
        assert_eq!(uri.as_str(), "http://localhost:4321/callback?code=abc");
        assert_eq!(uri.port(), Some(4321));
        assert_eq!(uri.path(), "/callback");
    }

    #[test]
    fn test_request_uri_keeps_ipv6_host() {
        let uri = request_uri("[::1]", 4321, "/?code=abc").unwrap();
        assert_eq!(uri.as_str(), "http://[::1]:4321/?code=abc");
    }

    #[tokio::test]
    async fn test_bind_port_zero_reports_assigned_port() {
        let session = ListenerSession::bind(&RedirectTarget::localhost(0).unwrap())
            .await
            .unwrap();
        assert_ne!(session.port(), 0);
    }

    #[tokio::test]
    async fn test_bind_in_use_port_is_transport_error() {
        let first = ListenerSession::bind(&RedirectTarget::localhost(0).unwrap())
            .await
            .unwrap();
        let err = ListenerSession::bind(&RedirectTarget::localhost(first.port()).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SigninError>(),
            Some(SigninError::Transport { .. })
        ));
    }

    #[tokio::test]
    async fn test_ipv4_literal_binds_only_that_address() {
        let target = RedirectTarget::from_uri(&Url::parse("http://127.0.0.1:0/").unwrap()).unwrap();
        let session = ListenerSession::bind(&target).await.unwrap();
        assert!(session.secondary.is_none());
        assert_eq!(session.host, "127.0.0.1");
    }

    #[tokio::test]
    async fn test_precancelled_token_returns_cancelled_and_releases_port() {
        let session = ListenerSession::bind(&RedirectTarget::localhost(0).unwrap())
            .await
            .unwrap();
        let port = session.port();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = session
            .respond_once(|_| CallbackPage::Html(String::new()), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SigninError>(),
            Some(SigninError::Cancelled)
        ));
        assert!(std::net::TcpListener::bind(("127.0.0.1", port)).is_ok());
    }

    #[tokio::test]
    async fn test_closed_connection_is_dropped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.shutdown().await.unwrap();
        });
        let (stream, peer) = listener.accept().await.unwrap();
        client.await.unwrap();
        assert!(matches!(read_incoming(stream, peer).await, Incoming::Dropped));
    }

    #[tokio::test]
    async fn test_oversized_head_is_malformed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let header = format!("X-Padding: {}\r\n", "a".repeat(MAX_REQUEST_HEAD_BYTES));
            let _ = stream.write_all(b"GET / HTTP/1.1\r\n").await;
            let _ = stream.write_all(header.as_bytes()).await;
            stream
        });
        let (stream, peer) = listener.accept().await.unwrap();
        let incoming = read_incoming(stream, peer).await;
        drop(client.await.unwrap());
        assert!(matches!(incoming, Incoming::Malformed { .. }));
    }
}
