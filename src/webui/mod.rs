//! Loopback-redirect web UI
//!
//! Everything needed to run the authorization step of an interactive
//! sign-in in the user's own browser:
//!
//! - `redirect`: loopback redirect validation and the free-port finder
//! - `listener`: a single-request HTTP listener on the loopback interface
//! - `browser`: default-browser launching with platform fallbacks
//! - `pages`: success/failure pages shown after the redirect
//! - `callback`: parsing of the captured redirect URI
//! - `interceptor`: the state machine tying the pieces together

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Result;

pub mod browser;
pub mod callback;
pub mod interceptor;
pub mod listener;
pub mod pages;
pub mod redirect;

pub use browser::{LaunchStrategy, SystemBrowser, UrlLauncher};
pub use callback::{CallbackOutcome, CapturedCallback};
pub use interceptor::{CustomBrowserWebUi, InterceptState};
pub use listener::{listen_once_and_respond, ListenerSession};
pub use pages::{BrowserPages, CallbackPage};
pub use redirect::{find_free_loopback_redirect_uri, RedirectTarget};

/// Pluggable authorization step of an interactive token acquisition.
///
/// Given the authorization URL and the expected redirect URI, an
/// implementation gets the user through the authorization server and returns
/// the full URI the server redirected to, including its query string.
#[async_trait]
pub trait CustomWebUi: Send + Sync {
    /// Runs the authorization step and returns the captured redirect URI.
    ///
    /// # Errors
    ///
    /// - `InvalidConfiguration` when the redirect URI is unusable.
    /// - `Cancelled` when `cancellation` fires before the redirect arrives.
    /// - `UnsupportedPlatform` / `Transport` when the browser or the
    ///   listener cannot be started.
    async fn acquire_authorization_code(
        &self,
        authorization_uri: &Url,
        redirect_uri: &Url,
        cancellation: CancellationToken,
    ) -> Result<Url>;
}
