use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine as _;
use url::Url;

use loopback_signin::error::{Result, SigninError};
use loopback_signin::webui::UrlLauncher;

/// GETs `url`, retrying while the listener is not accepting yet.
#[allow(dead_code)]
pub async fn get_with_retry(client: &reqwest::Client, url: &str) -> reqwest::Response {
    let mut last_err = None;
    for _ in 0..50 {
        match client.get(url).send().await {
            Ok(resp) => return resp,
            Err(e) => {
                last_err = Some(e);
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
    }
    panic!("GET {url} never succeeded: {last_err:?}");
}

/// Whether this host can bind the IPv6 loopback address.
#[allow(dead_code)]
pub fn ipv6_loopback_available() -> bool {
    std::net::TcpListener::bind("[::1]:0").is_ok()
}

/// A compact JWT with `claims` as payload; header and signature are dummies.
#[allow(dead_code)]
pub fn unsigned_jwt(claims: &serde_json::Value) -> String {
    let payload =
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(claims.to_string().as_bytes());
    format!("eyJhbGciOiJub25lIn0.{payload}.c2ln")
}

/// What the simulated browser does after the authorization server page.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub enum BrowserReply {
    /// Redirect back with `code` and the request's `state`
    Code(String),
    /// Redirect back with `code` and a different `state`
    CodeWithState(String, String),
    /// Redirect back with `error` and `error_description`
    Error(String, String),
    /// Never redirect back
    Ignore,
}

/// A [`UrlLauncher`] that plays the browser: it reads `redirect_uri` and
/// `state` from the authorization URL and requests the redirect URI exactly
/// as given, host included.
#[allow(dead_code)]
pub struct BrowserPlayer {
    reply: BrowserReply,
    launches: AtomicUsize,
    pages: Arc<Mutex<Vec<String>>>,
}

#[allow(dead_code)]
impl BrowserPlayer {
    pub fn new(reply: BrowserReply) -> Self {
        Self {
            reply,
            launches: AtomicUsize::new(0),
            pages: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Bodies of the pages the listener answered with, in arrival order.
    pub fn pages(&self) -> Vec<String> {
        self.pages.lock().unwrap().clone()
    }

    /// Waits until `n` pages were received.
    pub async fn wait_for_pages(&self, n: usize) -> Vec<String> {
        for _ in 0..100 {
            let pages = self.pages();
            if pages.len() >= n {
                return pages;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.pages()
    }
}

impl UrlLauncher for BrowserPlayer {
    fn launch_url(&self, url: &str) -> Result<()> {
        self.launches.fetch_add(1, Ordering::SeqCst);

        let authorize = Url::parse(url)?;
        let params: HashMap<String, String> = authorize.query_pairs().into_owned().collect();
        let redirect = params.get("redirect_uri").ok_or_else(|| {
            SigninError::InvalidConfiguration("authorization URL has no redirect_uri".to_string())
        })?;
        let state = params.get("state").cloned().unwrap_or_default();

        let mut callback = Url::parse(redirect)?;
        match &self.reply {
            BrowserReply::Code(code) => {
                callback
                    .query_pairs_mut()
                    .append_pair("code", code)
                    .append_pair("state", &state);
            }
            BrowserReply::CodeWithState(code, forged) => {
                callback
                    .query_pairs_mut()
                    .append_pair("code", code)
                    .append_pair("state", forged);
            }
            BrowserReply::Error(error, description) => {
                callback
                    .query_pairs_mut()
                    .append_pair("error", error)
                    .append_pair("error_description", description);
            }
            BrowserReply::Ignore => return Ok(()),
        }

        let pages = Arc::clone(&self.pages);
        tokio::spawn(async move {
            let client = reqwest::Client::new();
            let resp = get_with_retry(&client, callback.as_str()).await;
            let body = resp.text().await.unwrap_or_default();
            pages.lock().unwrap().push(body);
        });
        Ok(())
    }
}

/// A launcher that always fails.
#[allow(dead_code)]
pub struct BrokenLauncher;

impl UrlLauncher for BrokenLauncher {
    fn launch_url(&self, _url: &str) -> Result<()> {
        Err(SigninError::UnsupportedPlatform("test".to_string()).into())
    }
}
