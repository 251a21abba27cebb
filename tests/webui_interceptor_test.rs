//! Authorization-URI interceptor integration tests
//!
//! Exercises [`CustomBrowserWebUi`] end to end with launchers that play the
//! browser's part:
//!
//! - non-loopback redirect URIs are rejected before anything is bound
//! - completed and failed callbacks both return the captured URI
//! - the browser requests the redirect URI as written, `localhost` or `[::1]`
//! - launch failures and cancellation release the listener
//! - concurrent attempts use their own ports and capture their own URIs

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use url::Url;

use loopback_signin::error::SigninError;
use loopback_signin::webui::pages::{FAILURE_MARKER, SUCCESS_MARKER};
use loopback_signin::webui::{
    find_free_loopback_redirect_uri, CapturedCallback, CustomBrowserWebUi, CustomWebUi,
};

use common::{ipv6_loopback_available, BrokenLauncher, BrowserPlayer, BrowserReply};

fn authorization_uri(redirect: &Url, state: &str) -> Url {
    let mut uri = Url::parse("https://login.example.com/tenant/oauth2/v2.0/authorize").unwrap();
    uri.query_pairs_mut()
        .append_pair("client_id", "client-123")
        .append_pair("redirect_uri", redirect.as_str())
        .append_pair("state", state);
    uri
}

fn port_is_free(port: u16) -> bool {
    std::net::TcpListener::bind(("127.0.0.1", port)).is_ok()
}

#[tokio::test]
async fn test_non_loopback_redirect_rejected_without_launch() {
    let player = Arc::new(BrowserPlayer::new(BrowserReply::Code("c".to_string())));
    let web_ui = CustomBrowserWebUi::with_launcher(player.clone());
    let redirect = Url::parse("http://example.com:8080/callback").unwrap();

    let err = web_ui
        .acquire_authorization_code(
            &authorization_uri(&redirect, "s"),
            &redirect,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<SigninError>(),
        Some(SigninError::InvalidConfiguration(_))
    ));
    assert_eq!(player.launches(), 0);
}

#[tokio::test]
async fn test_https_redirect_rejected() {
    let web_ui = CustomBrowserWebUi::with_launcher(Arc::new(BrokenLauncher));
    let redirect = Url::parse("https://localhost:8443/").unwrap();
    let err = web_ui
        .acquire_authorization_code(
            &authorization_uri(&redirect, "s"),
            &redirect,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SigninError>(),
        Some(SigninError::InvalidConfiguration(_))
    ));
}

#[tokio::test]
async fn test_completed_attempt_returns_code_uri() {
    let player = Arc::new(BrowserPlayer::new(BrowserReply::Code("ABC123".to_string())));
    let web_ui = CustomBrowserWebUi::with_launcher(player.clone());
    let redirect = find_free_loopback_redirect_uri().unwrap();

    let captured = web_ui
        .acquire_authorization_code(
            &authorization_uri(&redirect, "state-1"),
            &redirect,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let callback = CapturedCallback::new(captured);
    assert_eq!(callback.param("code"), Some("ABC123"));
    assert_eq!(callback.param("state"), Some("state-1"));
    assert_eq!(callback.raw_uri().port(), redirect.port());

    let pages = player.wait_for_pages(1).await;
    assert!(pages[0].contains(SUCCESS_MARKER));
    assert_eq!(player.launches(), 1);
}

#[tokio::test]
async fn test_localhost_redirect_is_requested_by_name() {
    let player = Arc::new(BrowserPlayer::new(BrowserReply::Code("by-name".to_string())));
    let web_ui = CustomBrowserWebUi::with_launcher(player.clone());
    let redirect = find_free_loopback_redirect_uri().unwrap();
    assert_eq!(redirect.host_str(), Some("localhost"));

    let captured = web_ui
        .acquire_authorization_code(
            &authorization_uri(&redirect, "s"),
            &redirect,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(captured.host_str(), Some("localhost"));
    assert_eq!(CapturedCallback::new(captured).param("code"), Some("by-name"));
}

#[tokio::test]
async fn test_ipv6_loopback_redirect_completes() {
    if !ipv6_loopback_available() {
        eprintln!("skipping: no IPv6 loopback on this host");
        return;
    }
    let port = find_free_loopback_redirect_uri().unwrap().port().unwrap();
    let redirect = Url::parse(&format!("http://[::1]:{port}/")).unwrap();
    let player = Arc::new(BrowserPlayer::new(BrowserReply::Code("ABC123".to_string())));
    let web_ui = CustomBrowserWebUi::with_launcher(player.clone());

    let captured = tokio::time::timeout(
        Duration::from_secs(5),
        web_ui.acquire_authorization_code(
            &authorization_uri(&redirect, "v6"),
            &redirect,
            CancellationToken::new(),
        ),
    )
    .await
    .expect("IPv6 redirect was never received")
    .unwrap();

    assert_eq!(captured.as_str(), format!("http://[::1]:{port}/?code=ABC123&state=v6"));
    let pages = player.wait_for_pages(1).await;
    assert!(pages[0].contains(SUCCESS_MARKER));
}

#[tokio::test]
async fn test_failed_attempt_still_returns_uri() {
    let player = Arc::new(BrowserPlayer::new(BrowserReply::Error(
        "access_denied".to_string(),
        "User cancelled".to_string(),
    )));
    let web_ui = CustomBrowserWebUi::with_launcher(player.clone());
    let redirect = find_free_loopback_redirect_uri().unwrap();

    let captured = web_ui
        .acquire_authorization_code(
            &authorization_uri(&redirect, "s"),
            &redirect,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let callback = CapturedCallback::new(captured);
    assert!(callback.is_error());
    assert_eq!(callback.param("error_description"), Some("User cancelled"));

    let pages = player.wait_for_pages(1).await;
    assert!(pages[0].contains(FAILURE_MARKER));
    assert!(pages[0].contains("User cancelled"));
}

#[tokio::test]
async fn test_launch_failure_releases_listener() {
    let web_ui = CustomBrowserWebUi::with_launcher(Arc::new(BrokenLauncher));
    let redirect = find_free_loopback_redirect_uri().unwrap();
    let port = redirect.port().unwrap();

    let err = web_ui
        .acquire_authorization_code(
            &authorization_uri(&redirect, "s"),
            &redirect,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<SigninError>(),
        Some(SigninError::UnsupportedPlatform(_))
    ));
    assert!(port_is_free(port));
}

#[tokio::test]
async fn test_cancelled_attempt_is_prompt_and_releases_listener() {
    let player = Arc::new(BrowserPlayer::new(BrowserReply::Ignore));
    let web_ui = CustomBrowserWebUi::with_launcher(player.clone());
    let redirect = find_free_loopback_redirect_uri().unwrap();
    let port = redirect.port().unwrap();
    let cancel = CancellationToken::new();

    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        })
    };

    let result = tokio::time::timeout(
        Duration::from_secs(2),
        web_ui.acquire_authorization_code(&authorization_uri(&redirect, "s"), &redirect, cancel),
    )
    .await
    .expect("interceptor did not observe cancellation in time");
    canceller.await.unwrap();

    assert!(matches!(
        result.unwrap_err().downcast_ref::<SigninError>(),
        Some(SigninError::Cancelled)
    ));
    assert_eq!(player.launches(), 1);
    assert!(port_is_free(port));
}

#[tokio::test]
async fn test_concurrent_attempts_capture_their_own_uris() {
    let first = find_free_loopback_redirect_uri().unwrap();
    let mut second = find_free_loopback_redirect_uri().unwrap();
    while second.port() == first.port() {
        second = find_free_loopback_redirect_uri().unwrap();
    }

    let web_ui_a = CustomBrowserWebUi::with_launcher(Arc::new(BrowserPlayer::new(
        BrowserReply::Code("code-a".to_string()),
    )));
    let web_ui_b = CustomBrowserWebUi::with_launcher(Arc::new(BrowserPlayer::new(
        BrowserReply::Code("code-b".to_string()),
    )));

    let auth_a = authorization_uri(&first, "state-a");
    let auth_b = authorization_uri(&second, "state-b");

    let (a, b) = tokio::join!(
        web_ui_a.acquire_authorization_code(&auth_a, &first, CancellationToken::new()),
        web_ui_b.acquire_authorization_code(&auth_b, &second, CancellationToken::new()),
    );

    let a = CapturedCallback::new(a.unwrap());
    let b = CapturedCallback::new(b.unwrap());
    assert_eq!(a.param("code"), Some("code-a"));
    assert_eq!(a.param("state"), Some("state-a"));
    assert_eq!(b.param("code"), Some("code-b"));
    assert_eq!(b.param("state"), Some("state-b"));
    assert_ne!(a.raw_uri().port(), b.raw_uri().port());
}
