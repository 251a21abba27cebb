//! Token acquisition
//!
//! The [`TokenProvider`] trait is the seam between the CLI and the identity
//! platform. [`PublicClientApplication`] implements it on top of the
//! loopback web UI in [`crate::webui`], a keyring-backed [`TokenCache`], and
//! the device code flow.

pub mod account;
pub mod client;
pub mod pkce;
pub mod token_cache;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::webui::CustomWebUi;

pub use account::{Account, IdTokenClaims};
pub use client::{ClientOptions, DeviceCodePrompt, PublicClientApplication};
pub use token_cache::{CacheBackend, CacheEntry, CachedToken, KeyringBackend, MemoryBackend, TokenCache};

/// A token and the account it was issued to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticationResult {
    /// Bearer token for the resource API
    #[serde(skip_serializing)]
    pub access_token: String,
    pub token_type: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: Vec<String>,
    pub account: Account,
}

/// Result of a silent lookup. A miss is not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenLookup {
    Found(AuthenticationResult),
    NotFound,
}

impl TokenLookup {
    pub fn found(self) -> Option<AuthenticationResult> {
        match self {
            Self::Found(result) => Some(result),
            Self::NotFound => None,
        }
    }
}

/// Acquires access tokens.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Accounts with cached tokens.
    async fn accounts(&self) -> Result<Vec<Account>>;

    /// Returns a cached token for `scopes`.
    ///
    /// With `account == None` the first cached account is used. Expired
    /// tokens and tokens missing a requested scope yield
    /// [`TokenLookup::NotFound`].
    async fn acquire_token_silent(
        &self,
        scopes: &[String],
        account: Option<&Account>,
    ) -> Result<TokenLookup>;

    /// Signs the user in through `web_ui`.
    async fn acquire_token_interactive(
        &self,
        scopes: &[String],
        web_ui: &dyn CustomWebUi,
    ) -> Result<AuthenticationResult>;

    /// Forgets `account` and its tokens.
    async fn remove_account(&self, account: &Account) -> Result<()>;
}
