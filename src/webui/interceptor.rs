//! Authorization-URI interception over a loopback redirect
//!
//! [`CustomBrowserWebUi`] opens the authorization URL in a browser and waits
//! for the identity provider to redirect back to a loopback listener. One
//! call is one attempt:
//!
//! ```text
//! Idle -> BrowserLaunched -> WaitingForCallback -> Completed | Failed | Cancelled
//! ```
//!
//! # How an attempt works
//!
//! 1. The redirect URI is validated as a [`RedirectTarget`]; a non-loopback
//!    or non-`http` URI fails with `InvalidConfiguration` before anything is
//!    bound.
//! 2. The listener binds the target's addresses. It is bound before the
//!    browser is launched so the redirect can never arrive ahead of the bind.
//! 3. The authorization URL is handed to the [`UrlLauncher`]. A launch
//!    failure drops the listener and is returned as is.
//! 4. The listener serves the one callback request with the page from
//!    [`BrowserPages`] and the captured URI is returned. An `error` callback
//!    still returns the captured URI; turning it into an error is the
//!    caller's job.
//!
//! Cancellation at any point during the wait ends the attempt as
//! `Cancelled` with the listener released.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{Result, SigninError};
use crate::webui::browser::{SystemBrowser, UrlLauncher};
use crate::webui::callback::CapturedCallback;
use crate::webui::listener::ListenerSession;
use crate::webui::pages::BrowserPages;
use crate::webui::redirect::RedirectTarget;
use crate::webui::CustomWebUi;

// ---------------------------------------------------------------------------
// Interception states
// ---------------------------------------------------------------------------

/// States of one interception attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptState {
    /// Nothing has happened yet
    Idle,
    /// The authorization URL was handed to the browser
    BrowserLaunched,
    /// The listener is waiting for the redirect
    WaitingForCallback,
    /// A callback without `error` was captured
    Completed,
    /// A callback carrying `error` was captured
    Failed,
    /// The wait was cancelled before any callback arrived
    Cancelled,
}

impl InterceptState {
    /// Terminal states release the listener before control returns.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    fn can_transition_to(&self, next: InterceptState) -> bool {
        use InterceptState::*;
        matches!(
            (self, next),
            (Idle, BrowserLaunched)
                | (BrowserLaunched, WaitingForCallback)
                | (WaitingForCallback, Completed)
                | (WaitingForCallback, Failed)
                | (WaitingForCallback, Cancelled)
        )
    }
}

impl fmt::Display for InterceptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::BrowserLaunched => "browser_launched",
            Self::WaitingForCallback => "waiting_for_callback",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Tracks and logs the state of one attempt.
#[derive(Debug)]
struct Attempt {
    port: u16,
    state: InterceptState,
}

impl Attempt {
    fn new(port: u16) -> Self {
        Self {
            port,
            state: InterceptState::Idle,
        }
    }

    fn advance(&mut self, next: InterceptState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid interception transition {} -> {}",
            self.state,
            next
        );
        tracing::debug!(port = self.port, from = %self.state, to = %next, "Interception state");
        self.state = next;
    }
}

// ---------------------------------------------------------------------------
// CustomBrowserWebUi
// ---------------------------------------------------------------------------

/// Loopback-redirect implementation of [`CustomWebUi`].
///
/// # Examples
///
/// ```no_run
/// use tokio_util::sync::CancellationToken;
/// use url::Url;
/// use loopback_signin::webui::{find_free_loopback_redirect_uri, CustomBrowserWebUi, CustomWebUi};
///
/// # async fn example() -> loopback_signin::error::Result<()> {
/// let web_ui = CustomBrowserWebUi::new();
/// let redirect = find_free_loopback_redirect_uri()?;
/// let authorize = Url::parse("https://login.example.com/authorize?client_id=abc")?;
/// let captured = web_ui
///     .acquire_authorization_code(&authorize, &redirect, CancellationToken::new())
///     .await?;
/// println!("redirected to {captured}");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CustomBrowserWebUi {
    launcher: Arc<dyn UrlLauncher>,
    pages: BrowserPages,
}

impl CustomBrowserWebUi {
    /// System browser and the default pages.
    pub fn new() -> Self {
        Self::with_launcher(Arc::new(SystemBrowser::for_current_platform()))
    }

    /// A custom launcher and the default pages.
    pub fn with_launcher(launcher: Arc<dyn UrlLauncher>) -> Self {
        Self {
            launcher,
            pages: BrowserPages::default(),
        }
    }

    /// Replaces the pages shown after the redirect.
    pub fn pages(mut self, pages: BrowserPages) -> Self {
        self.pages = pages;
        self
    }

    async fn intercept(
        &self,
        authorization_uri: &Url,
        target: &RedirectTarget,
        cancellation: &CancellationToken,
    ) -> Result<Url> {
        let session = ListenerSession::bind(target).await?;
        let mut attempt = Attempt::new(session.port());

        self.launcher.launch_url(authorization_uri.as_str())?;
        attempt.advance(InterceptState::BrowserLaunched);

        attempt.advance(InterceptState::WaitingForCallback);
        let pages = &self.pages;
        let result = session
            .respond_once(
                |uri| {
                    tracing::info!(uri = %uri, "Intercepted an authorization callback");
                    pages.render(&CapturedCallback::new(uri.clone()))
                },
                cancellation,
            )
            .await;

        match result {
            Ok(uri) => {
                if CapturedCallback::new(uri.clone()).is_error() {
                    attempt.advance(InterceptState::Failed);
                } else {
                    attempt.advance(InterceptState::Completed);
                }
                Ok(uri)
            }
            Err(e) => {
                if matches!(e.downcast_ref::<SigninError>(), Some(SigninError::Cancelled)) {
                    attempt.advance(InterceptState::Cancelled);
                }
                Err(e)
            }
        }
    }
}

impl Default for CustomBrowserWebUi {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CustomBrowserWebUi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomBrowserWebUi")
            .field("pages", &self.pages)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CustomWebUi for CustomBrowserWebUi {
    async fn acquire_authorization_code(
        &self,
        authorization_uri: &Url,
        redirect_uri: &Url,
        cancellation: CancellationToken,
    ) -> Result<Url> {
        let target = RedirectTarget::from_uri(redirect_uri)?;
        self.intercept(authorization_uri, &target, &cancellation).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        use InterceptState::*;
        assert!(Idle.can_transition_to(BrowserLaunched));
        assert!(BrowserLaunched.can_transition_to(WaitingForCallback));
        assert!(WaitingForCallback.can_transition_to(Completed));
        assert!(WaitingForCallback.can_transition_to(Failed));
        assert!(WaitingForCallback.can_transition_to(Cancelled));
    }

    #[test]
    fn test_invalid_transitions() {
        use InterceptState::*;
        assert!(!Idle.can_transition_to(WaitingForCallback));
        assert!(!Completed.can_transition_to(Idle));
        assert!(!Cancelled.can_transition_to(Completed));
        assert!(!BrowserLaunched.can_transition_to(Completed));
    }

    #[test]
    fn test_terminal_states() {
        assert!(InterceptState::Completed.is_terminal());
        assert!(InterceptState::Failed.is_terminal());
        assert!(InterceptState::Cancelled.is_terminal());
        assert!(!InterceptState::WaitingForCallback.is_terminal());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(InterceptState::WaitingForCallback.to_string(), "waiting_for_callback");
    }
}
