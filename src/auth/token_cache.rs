//! Token cache persisted in the OS keyring
//!
//! The whole cache is one JSON document stored under a single keyring entry
//! (service name from configuration, user = client id). Tokens are stored as
//! issued; the keyring is the only protection. Tests and
//! `cache.enabled: false` use the in-memory backend instead.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::account::Account;
use crate::error::{Result, SigninError};

/// Scopes every sign-in requests implicitly; never required for a cache hit.
pub const RESERVED_SCOPES: [&str; 3] = ["openid", "profile", "offline_access"];

/// An access token as stored in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedToken {
    /// The bearer token
    pub access_token: String,

    /// Usually `Bearer`
    pub token_type: String,

    /// Absolute expiry; `None` means non-expiring
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_seconds_option"
    )]
    pub expires_at: Option<DateTime<Utc>>,

    /// Scopes granted with this token
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl CachedToken {
    /// `true` when the token expires within the next five minutes.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            None => false,
            Some(expires_at) => Utc::now() >= expires_at - Duration::seconds(300),
        }
    }

    /// `true` when every non-reserved requested scope was granted.
    ///
    /// Comparison ignores ASCII case; granted scopes may carry a resource
    /// prefix (`https://graph.microsoft.com/User.Read` covers `user.read`).
    pub fn covers(&self, requested: &[String]) -> bool {
        requested
            .iter()
            .filter(|s| !RESERVED_SCOPES.iter().any(|r| r.eq_ignore_ascii_case(s)))
            .all(|wanted| {
                self.scopes.iter().any(|granted| {
                    granted.eq_ignore_ascii_case(wanted)
                        || granted
                            .rsplit_once('/')
                            .is_some_and(|(_, short)| short.eq_ignore_ascii_case(wanted))
                })
            })
    }
}

/// One cached account and its latest token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub account: Account,
    pub token: CachedToken,
}

/// Serialized form of the cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TokenCacheDocument {
    #[serde(default)]
    accounts: BTreeMap<String, CacheEntry>,
}

/// Where the serialized cache lives.
pub trait CacheBackend: Send + Sync {
    /// Returns the stored document, `None` when nothing is stored.
    fn load(&self) -> Result<Option<String>>;
    /// Replaces the stored document.
    fn save(&self, data: &str) -> Result<()>;
    /// Removes the stored document.
    fn clear(&self) -> Result<()>;
}

/// OS keyring storage (Keychain, Secret Service, Credential Manager).
#[derive(Debug, Clone)]
pub struct KeyringBackend {
    service: String,
    user: String,
}

impl KeyringBackend {
    pub fn new(service: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            user: user.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry> {
        Ok(keyring::Entry::new(&self.service, &self.user).map_err(SigninError::Keyring)?)
    }
}

impl CacheBackend for KeyringBackend {
    fn load(&self) -> Result<Option<String>> {
        match self.entry()?.get_password() {
            Ok(data) => Ok(Some(data)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(SigninError::Keyring(e).into()),
        }
    }

    fn save(&self, data: &str) -> Result<()> {
        self.entry()?
            .set_password(data)
            .map_err(SigninError::Keyring)?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match self.entry()?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(SigninError::Keyring(e).into()),
        }
    }
}

/// Process-local storage.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    data: Mutex<Option<String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheBackend for MemoryBackend {
    fn load(&self) -> Result<Option<String>> {
        Ok(self.data.lock().map_err(|_| poisoned())?.clone())
    }

    fn save(&self, data: &str) -> Result<()> {
        *self.data.lock().map_err(|_| poisoned())? = Some(data.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.data.lock().map_err(|_| poisoned())? = None;
        Ok(())
    }
}

fn poisoned() -> SigninError {
    SigninError::Config("token cache lock poisoned".to_string())
}

/// Account-keyed token cache over a [`CacheBackend`].
///
/// # Examples
///
/// ```
/// use loopback_signin::auth::{Account, CachedToken, MemoryBackend, TokenCache};
///
/// let cache = TokenCache::new(Box::new(MemoryBackend::new()));
/// let account = Account {
///     home_account_id: "oid.tid".to_string(),
///     username: "ada@contoso.com".to_string(),
///     tenant_id: Some("tid".to_string()),
/// };
/// let token = CachedToken {
///     access_token: "at".to_string(),
///     token_type: "Bearer".to_string(),
///     expires_at: None,
///     scopes: vec!["User.Read".to_string()],
/// };
/// cache.store(&account, &token).unwrap();
/// assert_eq!(cache.accounts().unwrap(), vec![account]);
/// ```
pub struct TokenCache {
    backend: Box<dyn CacheBackend>,
}

impl TokenCache {
    pub fn new(backend: Box<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    fn load_document(&self) -> Result<TokenCacheDocument> {
        match self.backend.load()? {
            Some(data) if !data.trim().is_empty() => Ok(serde_json::from_str(&data)?),
            _ => Ok(TokenCacheDocument::default()),
        }
    }

    fn save_document(&self, document: &TokenCacheDocument) -> Result<()> {
        if document.accounts.is_empty() {
            return self.backend.clear();
        }
        self.backend.save(&serde_json::to_string(document)?)
    }

    /// Cached accounts, ordered by home account id.
    pub fn accounts(&self) -> Result<Vec<Account>> {
        Ok(self
            .load_document()?
            .accounts
            .into_values()
            .map(|entry| entry.account)
            .collect())
    }

    /// The cache entry for `home_account_id`.
    pub fn lookup(&self, home_account_id: &str) -> Result<Option<CacheEntry>> {
        Ok(self.load_document()?.accounts.remove(home_account_id))
    }

    /// Inserts or replaces the token for `account`.
    pub fn store(&self, account: &Account, token: &CachedToken) -> Result<()> {
        let mut document = self.load_document()?;
        document.accounts.insert(
            account.home_account_id.clone(),
            CacheEntry {
                account: account.clone(),
                token: token.clone(),
            },
        );
        self.save_document(&document)?;
        tracing::debug!(account = %account.username, "Token cache updated");
        Ok(())
    }

    /// Removes `home_account_id`; returns whether it was present.
    pub fn remove(&self, home_account_id: &str) -> Result<bool> {
        let mut document = self.load_document()?;
        let removed = document.accounts.remove(home_account_id).is_some();
        if removed {
            self.save_document(&document)?;
        }
        Ok(removed)
    }

    /// Drops every cached account.
    pub fn clear(&self) -> Result<()> {
        self.backend.clear()
    }
}
