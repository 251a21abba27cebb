//! Loopback redirect targets and the free-port finder
//!
//! A [`RedirectTarget`] is the validated form of the redirect URI handed to
//! the interceptor. Construction fails with
//! [`SigninError::InvalidConfiguration`] for any host that is not a loopback
//! address, so no socket is ever bound for a non-loopback redirect.
//!
//! The target also decides where the listener binds. A browser resolving
//! `localhost` may try either loopback family, so a `localhost` target binds
//! both `127.0.0.1` and `[::1]`; address literals bind only themselves.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use url::{Host, Url};

use crate::error::{Result, SigninError};

// ---------------------------------------------------------------------------
// RedirectTarget
// ---------------------------------------------------------------------------

/// A validated loopback redirect URI.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use loopback_signin::webui::RedirectTarget;
///
/// let uri = Url::parse("http://localhost:8400/callback").unwrap();
/// let target = RedirectTarget::from_uri(&uri).unwrap();
/// assert_eq!(target.port(), 8400);
/// assert_eq!(target.host(), "localhost");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectTarget {
    host: String,
    port: u16,
    uri: Url,
    bind_addrs: Vec<IpAddr>,
}

impl RedirectTarget {
    /// Validates `uri` as a loopback redirect.
    ///
    /// The port falls back to the scheme default when the URI does not name
    /// one, so `http://localhost` resolves to port 80.
    ///
    /// # Errors
    ///
    /// Returns [`SigninError::InvalidConfiguration`] when the scheme is not
    /// `http`, the host is missing or not loopback, or no port can be
    /// determined.
    pub fn from_uri(uri: &Url) -> Result<Self> {
        if uri.scheme() != "http" {
            return Err(SigninError::InvalidConfiguration(format!(
                "only http loopback redirect URIs are supported, got {uri}"
            ))
            .into());
        }

        let host = uri.host().ok_or_else(|| {
            SigninError::InvalidConfiguration(format!("redirect URI has no host: {uri}"))
        })?;

        if !is_loopback_host(&host) {
            return Err(SigninError::InvalidConfiguration(format!(
                "only loopback redirect URIs are supported; configure http://localhost or \
                 http://localhost:port during app registration (got {uri})"
            ))
            .into());
        }

        let port = uri.port_or_known_default().ok_or_else(|| {
            SigninError::InvalidConfiguration(format!("redirect URI has no port: {uri}"))
        })?;

        let bind_addrs = match &host {
            Host::Domain(_) => localhost_addrs(),
            Host::Ipv4(addr) => vec![IpAddr::V4(*addr)],
            Host::Ipv6(addr) => vec![IpAddr::V6(*addr)],
        };

        Ok(Self {
            host: host.to_string(),
            port,
            uri: uri.clone(),
            bind_addrs,
        })
    }

    /// `http://localhost:<port>/`. Port `0` leaves the choice to the
    /// listener's bind.
    pub fn localhost(port: u16) -> Result<Self> {
        Self::from_uri(&Url::parse(&format!("http://localhost:{port}/"))?)
    }

    /// Host component as written in the redirect URI.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port the listener must bind.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The original redirect URI.
    pub fn uri(&self) -> &Url {
        &self.uri
    }

    /// Addresses the listener binds, primary first.
    pub fn bind_addrs(&self) -> &[IpAddr] {
        &self.bind_addrs
    }
}

fn localhost_addrs() -> Vec<IpAddr> {
    vec![IpAddr::V4(Ipv4Addr::LOCALHOST), IpAddr::V6(Ipv6Addr::LOCALHOST)]
}

/// Returns `true` for `localhost`, any `127.0.0.0/8` address and `::1`.
pub fn is_loopback_host(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(name) => name.eq_ignore_ascii_case("localhost"),
        Host::Ipv4(addr) => addr.is_loopback(),
        Host::Ipv6(addr) => addr.is_loopback(),
    }
}

// ---------------------------------------------------------------------------
// Free-port finder
// ---------------------------------------------------------------------------

/// Picks a free loopback port and returns `http://localhost:<port>`.
///
/// Binds `127.0.0.1:0`, reads back the port the OS assigned and releases the
/// probe listener immediately. Another process can claim the port between
/// this release and the later bind by the listener; that window is inherent
/// to ephemeral-port probing and is accepted, not mitigated.
///
/// # Errors
///
/// Returns [`SigninError::Transport`] when the probe bind fails.
///
/// # Examples
///
/// ```
/// use loopback_signin::webui::find_free_loopback_redirect_uri;
///
/// let uri = find_free_loopback_redirect_uri().unwrap();
/// assert_eq!(uri.host_str(), Some("localhost"));
/// assert!(uri.port().is_some());
/// ```
pub fn find_free_loopback_redirect_uri() -> Result<Url> {
    let probe_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
    let port = {
        let probe = std::net::TcpListener::bind(probe_addr)
            .map_err(|e| SigninError::transport("failed to bind port probe", e))?;
        probe
            .local_addr()
            .map_err(|e| SigninError::transport("failed to read probe address", e))?
            .port()
    };

    tracing::debug!(port, "Found free loopback port");
    Ok(Url::parse(&format!("http://localhost:{port}"))?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
