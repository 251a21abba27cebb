//! Public client application
//!
//! [`PublicClientApplication`] is the token provider used by the CLI. It
//! answers silent requests from the token cache, runs interactive sign-in
//! through a [`CustomWebUi`], and supports the device code flow for hosts
//! without a browser.
//!
//! Endpoints are derived from the authority:
//!
//! - `<authority>/oauth2/v2.0/authorize`
//! - `<authority>/oauth2/v2.0/token`
//! - `<authority>/oauth2/v2.0/devicecode`
//!
//! Refresh tokens are not used; an expired cache entry yields
//! [`TokenLookup::NotFound`] and the caller signs in again.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::auth::account::{Account, IdTokenClaims};
use crate::auth::pkce::{self, PkceChallenge};
use crate::auth::token_cache::{CachedToken, TokenCache, RESERVED_SCOPES};
use crate::auth::{AuthenticationResult, TokenLookup, TokenProvider};
use crate::error::{Result, SigninError};
use crate::webui::{find_free_loopback_redirect_uri, CallbackOutcome, CapturedCallback, CustomWebUi};

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// One year; longer `expires_in` values are treated as this.
const MAX_EXPIRES_IN: u64 = 365 * 24 * 60 * 60;

/// Settings a [`PublicClientApplication`] is built from.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Application (client) id
    pub client_id: String,
    /// Authority URL, e.g. `https://login.microsoftonline.com/common`
    pub authority: Url,
    /// Fixed redirect URI; `None` picks a free loopback port per attempt
    pub redirect_uri: Option<Url>,
    /// How long interactive sign-in waits for the browser redirect
    pub interactive_timeout: Duration,
}

/// Raw token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// OAuth error body (`error`, `error_description`).
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Device code endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCodePrompt {
    /// Code the user types at the verification URI
    pub user_code: String,
    device_code: String,
    /// Where the user signs in
    pub verification_uri: String,
    /// Lifetime of the device code in seconds
    pub expires_in: u64,
    /// Polling interval in seconds
    #[serde(default = "default_poll_interval")]
    pub interval: u64,
    /// Human-readable instructions from the server
    #[serde(default)]
    pub message: Option<String>,
}

fn default_poll_interval() -> u64 {
    5
}

impl DeviceCodePrompt {
    /// The server's message, or a generic one built from the code.
    pub fn instructions(&self) -> String {
        self.message.clone().unwrap_or_else(|| {
            format!(
                "To sign in, use a web browser to open the page {} and enter the code {} to authenticate.",
                self.verification_uri, self.user_code
            )
        })
    }
}

/// Token provider for a public (no secret) client.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use url::Url;
/// use loopback_signin::auth::{ClientOptions, MemoryBackend, PublicClientApplication, TokenCache};
///
/// let app = PublicClientApplication::new(
///     ClientOptions {
///         client_id: "00000000-0000-0000-0000-000000000000".to_string(),
///         authority: Url::parse("https://login.microsoftonline.com/common").unwrap(),
///         redirect_uri: None,
///         interactive_timeout: Duration::from_secs(30),
///     },
///     TokenCache::new(Box::new(MemoryBackend::new())),
/// );
/// assert!(app.token_endpoint().ends_with("/oauth2/v2.0/token"));
/// ```
pub struct PublicClientApplication {
    http: reqwest::Client,
    options: ClientOptions,
    cache: TokenCache,
    cancellation: CancellationToken,
}

impl PublicClientApplication {
    pub fn new(options: ClientOptions, cache: TokenCache) -> Self {
        Self {
            http: reqwest::Client::new(),
            options,
            cache,
            cancellation: CancellationToken::new(),
        }
    }

    /// Cancelling `token` aborts any interactive or device code wait.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Uses a preconfigured HTTP client.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    fn endpoint(&self, name: &str) -> String {
        format!(
            "{}/oauth2/v2.0/{name}",
            self.options.authority.as_str().trim_end_matches('/')
        )
    }

    pub fn authorize_endpoint(&self) -> String {
        self.endpoint("authorize")
    }

    pub fn token_endpoint(&self) -> String {
        self.endpoint("token")
    }

    pub fn device_code_endpoint(&self) -> String {
        self.endpoint("devicecode")
    }

    /// Builds the authorization URL for one interactive attempt.
    pub fn authorization_url(
        &self,
        scopes: &[String],
        redirect_uri: &Url,
        state: &str,
        pkce: &PkceChallenge,
    ) -> Result<Url> {
        let mut url = Url::parse(&self.authorize_endpoint())?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.options.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", redirect_uri.as_str())
            .append_pair("response_mode", "query")
            .append_pair("scope", &scope_string(scopes))
            .append_pair("state", state)
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", pkce.method)
            .append_pair("prompt", "select_account");
        Ok(url)
    }

    /// Runs the device code flow.
    ///
    /// `on_prompt` is called once with the code the user must enter.
    ///
    /// # Errors
    ///
    /// - [`SigninError::DeviceCode`] when the code expires, is declined, or
    ///   the server reports another error.
    /// - [`SigninError::Cancelled`] when the cancellation token fires.
    pub async fn acquire_token_with_device_code<F>(
        &self,
        scopes: &[String],
        on_prompt: F,
    ) -> Result<AuthenticationResult>
    where
        F: FnOnce(&DeviceCodePrompt) + Send,
    {
        let scope = scope_string(scopes);
        let resp = self
            .http
            .post(self.device_code_endpoint())
            .header("Accept", "application/json")
            .form(&[("client_id", self.options.client_id.as_str()), ("scope", scope.as_str())])
            .send()
            .await
            .map_err(|e| SigninError::DeviceCode(format!("device code request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read error body>".to_string());
            return Err(SigninError::DeviceCode(format!(
                "device code endpoint returned {status}: {body}"
            ))
            .into());
        }

        let prompt: DeviceCodePrompt = resp
            .json()
            .await
            .map_err(|e| SigninError::DeviceCode(format!("failed to parse device code: {e}")))?;
        on_prompt(&prompt);

        let mut interval = Duration::from_secs(prompt.interval);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(prompt.expires_in);

        loop {
            tokio::select! {
                biased;
                _ = self.cancellation.cancelled() => return Err(SigninError::Cancelled.into()),
                _ = tokio::time::sleep(interval) => {}
            }

            let body: serde_json::Value = self
                .http
                .post(self.token_endpoint())
                .header("Accept", "application/json")
                .form(&[
                    ("grant_type", DEVICE_CODE_GRANT),
                    ("client_id", self.options.client_id.as_str()),
                    ("device_code", prompt.device_code.as_str()),
                ])
                .send()
                .await
                .map_err(|e| SigninError::DeviceCode(format!("token poll failed: {e}")))?
                .json()
                .await
                .map_err(|e| {
                    SigninError::DeviceCode(format!("failed to parse token poll response: {e}"))
                })?;

            match parse_device_poll(body)? {
                DevicePoll::Token(raw) => {
                    tracing::info!("Device code flow completed");
                    return self.complete(raw, scopes);
                }
                DevicePoll::Pending => tracing::debug!("authorization_pending; continuing to poll"),
                DevicePoll::SlowDown => {
                    interval += Duration::from_secs(5);
                    tracing::debug!(?interval, "slow_down received; backing off");
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(SigninError::DeviceCode(
                    "device code expired before authorization".to_string(),
                )
                .into());
            }
        }
    }

    /// Exchanges an authorization code for tokens.
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &Url,
        code_verifier: &str,
        scopes: &[String],
    ) -> Result<TokenResponse> {
        let scope = scope_string(scopes);
        let mut params: HashMap<&str, &str> = HashMap::new();
        params.insert("grant_type", "authorization_code");
        params.insert("client_id", &self.options.client_id);
        params.insert("code", code);
        params.insert("redirect_uri", redirect_uri.as_str());
        params.insert("code_verifier", code_verifier);
        params.insert("scope", &scope);

        let resp = self
            .http
            .post(self.token_endpoint())
            .header("Accept", "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| SigninError::TokenEndpoint(format!("token exchange request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            let detail = match serde_json::from_str::<ErrorResponse>(&body) {
                Ok(err) => format!(
                    "{}: {}",
                    err.error,
                    err.error_description.unwrap_or_default()
                ),
                Err(_) => body,
            };
            return Err(SigninError::TokenEndpoint(format!("{status}: {detail}")).into());
        }

        Ok(resp
            .json()
            .await
            .map_err(|e| SigninError::TokenEndpoint(format!("failed to parse token response: {e}")))?)
    }

    /// Turns a token response into a result and writes it to the cache.
    fn complete(&self, raw: TokenResponse, requested: &[String]) -> Result<AuthenticationResult> {
        let id_token = raw
            .id_token
            .as_deref()
            .ok_or_else(|| SigninError::TokenEndpoint("token response has no id_token".to_string()))?;
        let account = IdTokenClaims::decode_unverified(id_token)?.to_account()?;

        let expires_at = raw
            .expires_in
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs.min(MAX_EXPIRES_IN) as i64));
        let scopes = match raw.scope {
            Some(granted) => granted.split_whitespace().map(str::to_string).collect(),
            None => requested.to_vec(),
        };

        let token = CachedToken {
            access_token: raw.access_token,
            token_type: raw.token_type,
            expires_at,
            scopes,
        };

        if let Err(e) = self.cache.store(&account, &token) {
            tracing::warn!("Failed to cache token: {e}");
        }

        Ok(AuthenticationResult::from_cached(account, token))
    }

    /// Runs the interactive attempt under a child of the client's
    /// cancellation token that also fires after the configured timeout.
    async fn authorize_interactive(
        &self,
        web_ui: &dyn CustomWebUi,
        authorization_uri: &Url,
        redirect_uri: &Url,
    ) -> Result<Url> {
        let attempt = self.cancellation.child_token();
        let timer = {
            let attempt = attempt.clone();
            let timeout = self.options.interactive_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                tracing::warn!(?timeout, "Timed out waiting for the browser redirect");
                attempt.cancel();
            })
        };

        let captured = web_ui
            .acquire_authorization_code(authorization_uri, redirect_uri, attempt)
            .await;
        timer.abort();
        captured
    }
}

#[async_trait]
impl TokenProvider for PublicClientApplication {
    async fn accounts(&self) -> Result<Vec<Account>> {
        self.cache.accounts()
    }

    async fn acquire_token_silent(
        &self,
        scopes: &[String],
        account: Option<&Account>,
    ) -> Result<TokenLookup> {
        let account = match account {
            Some(account) => account.clone(),
            None => match self.cache.accounts()?.into_iter().next() {
                Some(first) => first,
                None => {
                    tracing::debug!("No cached accounts");
                    return Ok(TokenLookup::NotFound);
                }
            },
        };

        match self.cache.lookup(&account.home_account_id)? {
            Some(entry) if !entry.token.is_expired() && entry.token.covers(scopes) => {
                tracing::debug!(account = %account.username, "Using cached token");
                Ok(TokenLookup::Found(AuthenticationResult::from_cached(
                    entry.account,
                    entry.token,
                )))
            }
            Some(_) => {
                tracing::debug!(account = %account.username, "Cached token expired or lacks scopes");
                Ok(TokenLookup::NotFound)
            }
            None => Ok(TokenLookup::NotFound),
        }
    }

    async fn acquire_token_interactive(
        &self,
        scopes: &[String],
        web_ui: &dyn CustomWebUi,
    ) -> Result<AuthenticationResult> {
        let redirect_uri = match &self.options.redirect_uri {
            Some(uri) => uri.clone(),
            None => find_free_loopback_redirect_uri()?,
        };
        let pkce = PkceChallenge::generate();
        let state = pkce::generate_state();
        let authorization_uri = self.authorization_url(scopes, &redirect_uri, &state, &pkce)?;

        tracing::info!(redirect_uri = %redirect_uri, "Starting interactive sign-in");
        let captured = self
            .authorize_interactive(web_ui, &authorization_uri, &redirect_uri)
            .await?;

        let code = authorization_code(&CapturedCallback::new(captured), &state)?;
        let raw = self
            .exchange_code(&code, &redirect_uri, &pkce.verifier, scopes)
            .await?;
        self.complete(raw, scopes)
    }

    async fn remove_account(&self, account: &Account) -> Result<()> {
        if self.cache.remove(&account.home_account_id)? {
            tracing::info!(account = %account.username, "Removed account from token cache");
        }
        Ok(())
    }
}

/// Requested scopes plus the reserved ones, space separated, no duplicates.
pub fn scope_string(scopes: &[String]) -> String {
    let mut all: Vec<&str> = Vec::new();
    for scope in scopes.iter().map(String::as_str).chain(RESERVED_SCOPES) {
        if !all.iter().any(|s| s.eq_ignore_ascii_case(scope)) {
            all.push(scope);
        }
    }
    all.join(" ")
}

/// Extracts the code from a callback, checking `state`.
fn authorization_code(callback: &CapturedCallback, expected_state: &str) -> Result<String> {
    match callback.outcome() {
        CallbackOutcome::Error { error, description } => {
            Err(SigninError::AuthorizationDenied { error, description }.into())
        }
        CallbackOutcome::Code { code, state } => {
            if state.as_deref() != Some(expected_state) {
                return Err(SigninError::StateMismatch.into());
            }
            Ok(code)
        }
        CallbackOutcome::Empty => Err(SigninError::TokenEndpoint(
            "authorization code missing from callback".to_string(),
        )
        .into()),
    }
}

enum DevicePoll {
    Token(TokenResponse),
    Pending,
    SlowDown,
}

fn parse_device_poll(body: serde_json::Value) -> Result<DevicePoll> {
    if body.get("access_token").and_then(|v| v.as_str()).is_some() {
        let raw: TokenResponse = serde_json::from_value(body)?;
        return Ok(DevicePoll::Token(raw));
    }

    match body.get("error").and_then(|v| v.as_str()) {
        Some("authorization_pending") => Ok(DevicePoll::Pending),
        Some("slow_down") => Ok(DevicePoll::SlowDown),
        Some("expired_token") => {
            Err(SigninError::DeviceCode("device code expired before authorization".to_string()).into())
        }
        Some("authorization_declined") => {
            Err(SigninError::DeviceCode("the user declined the sign-in".to_string()).into())
        }
        Some(other) => Err(SigninError::DeviceCode(format!("device flow error: {other}")).into()),
        None => Ok(DevicePoll::Pending),
    }
}

impl AuthenticationResult {
    pub(crate) fn from_cached(account: Account, token: CachedToken) -> Self {
        Self {
            access_token: token.access_token,
            token_type: token.token_type,
            expires_at: token.expires_at,
            scopes: token.scopes,
            account,
        }
    }

    /// Seconds until expiry, `None` for non-expiring tokens.
    pub fn expires_in(&self) -> Option<i64> {
        self.expires_at
            .map(|at: DateTime<Utc>| (at - Utc::now()).num_seconds())
    }
}
