//! Configuration management for loopback-signin
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::auth::ClientOptions;
use crate::error::{Result, SigninError};
use crate::webui::{BrowserPages, RedirectTarget};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Application registration and authority
    #[serde(default)]
    pub client: ClientConfig,

    /// Downstream profile API
    #[serde(default)]
    pub graph: GraphConfig,

    /// Browser and loopback listener settings
    #[serde(default)]
    pub webui: WebUiConfig,

    /// Token cache settings
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Application registration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Application (client) id of a public client registration
    #[serde(default)]
    pub client_id: String,

    /// Tenant id, domain, or one of `common`, `organizations`, `consumers`
    #[serde(default = "default_tenant_id")]
    pub tenant_id: String,

    /// Identity platform instance
    #[serde(default = "default_instance")]
    pub instance: String,

    /// Full authority URL; overrides `instance` + `tenant_id` when set
    /// (B2C policy authorities, test servers)
    #[serde(default)]
    pub authority: Option<String>,

    /// Fixed loopback redirect URI; a free port is used when unset
    #[serde(default)]
    pub redirect_uri: Option<String>,

    /// Scopes requested for the resource API
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
}

fn default_tenant_id() -> String {
    "common".to_string()
}

fn default_instance() -> String {
    "https://login.microsoftonline.com".to_string()
}

fn default_scopes() -> Vec<String> {
    vec!["user.read".to_string()]
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            tenant_id: default_tenant_id(),
            instance: default_instance(),
            authority: None,
            redirect_uri: None,
            scopes: default_scopes(),
        }
    }
}

/// Profile API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Base URL; the profile is read from `<api_url>/me`
    #[serde(default = "default_graph_api_url")]
    pub api_url: String,
}

fn default_graph_api_url() -> String {
    "https://graph.microsoft.com/v1.0".to_string()
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            api_url: default_graph_api_url(),
        }
    }
}

/// Browser sign-in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebUiConfig {
    /// Seconds to wait for the browser redirect
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Pages shown in the browser after the redirect
    #[serde(default)]
    pub pages: BrowserPages,
}

fn default_timeout_seconds() -> u64 {
    30
}

impl Default for WebUiConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            pages: BrowserPages::default(),
        }
    }
}

/// Token cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Persist tokens in the OS keyring; when false tokens live for one run
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,

    /// Keyring service name
    #[serde(default = "default_cache_service")]
    pub service: String,
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_service() -> String {
    "loopback-signin".to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            service: default_cache_service(),
        }
    }
}

impl Config {
    /// Load configuration from file, environment variables and CLI
    ///
    /// Missing files fall back to defaults. Environment variables
    /// (`LOOPBACK_SIGNIN_*`) override the file; CLI flags override both.
    ///
    /// # Errors
    ///
    /// Returns [`SigninError::Config`] if the file exists but cannot be read
    /// or parsed.
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| SigninError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| SigninError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(client_id) = std::env::var("LOOPBACK_SIGNIN_CLIENT_ID") {
            self.client.client_id = client_id;
        }

        if let Ok(tenant_id) = std::env::var("LOOPBACK_SIGNIN_TENANT_ID") {
            self.client.tenant_id = tenant_id;
        }

        if let Ok(instance) = std::env::var("LOOPBACK_SIGNIN_INSTANCE") {
            self.client.instance = instance;
        }

        if let Ok(authority) = std::env::var("LOOPBACK_SIGNIN_AUTHORITY") {
            tracing::debug!(authority = %authority, "Env override: LOOPBACK_SIGNIN_AUTHORITY");
            self.client.authority = Some(authority);
        }

        if let Ok(redirect_uri) = std::env::var("LOOPBACK_SIGNIN_REDIRECT_URI") {
            self.client.redirect_uri = Some(redirect_uri);
        }

        if let Ok(scopes) = std::env::var("LOOPBACK_SIGNIN_SCOPES") {
            self.client.scopes = scopes
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Ok(api_url) = std::env::var("LOOPBACK_SIGNIN_GRAPH_API_URL") {
            self.graph.api_url = api_url;
        }

        if let Ok(timeout) = std::env::var("LOOPBACK_SIGNIN_TIMEOUT_SECONDS") {
            if let Ok(value) = timeout.parse() {
                self.webui.timeout_seconds = value;
            } else {
                tracing::warn!("Invalid LOOPBACK_SIGNIN_TIMEOUT_SECONDS: {}", timeout);
            }
        }

        if let Ok(enabled) = std::env::var("LOOPBACK_SIGNIN_CACHE_ENABLED") {
            match enabled.parse::<bool>() {
                Ok(v) => {
                    self.cache.enabled = v;
                    tracing::debug!(enabled = v, "Env override: LOOPBACK_SIGNIN_CACHE_ENABLED");
                }
                Err(_) => {
                    tracing::warn!("Invalid value for LOOPBACK_SIGNIN_CACHE_ENABLED: {}", enabled);
                }
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }

        if let crate::cli::Commands::Signin {
            timeout,
            redirect_uri,
        } = &cli.command
        {
            if let Some(timeout) = timeout {
                self.webui.timeout_seconds = *timeout;
            }
            if let Some(redirect_uri) = redirect_uri {
                self.client.redirect_uri = Some(redirect_uri.clone());
            }
        }
    }

    /// Authority URL: the explicit `authority`, or `instance` + `tenant_id`.
    pub fn authority_url(&self) -> Result<Url> {
        let raw = match &self.client.authority {
            Some(authority) => authority.clone(),
            None => format!(
                "{}/{}",
                self.client.instance.trim_end_matches('/'),
                self.client.tenant_id
            ),
        };
        Url::parse(&raw)
            .map_err(|e| SigninError::Config(format!("Invalid authority '{}': {}", raw, e)).into())
    }

    /// The configured redirect URI, if any.
    pub fn redirect_url(&self) -> Result<Option<Url>> {
        self.client
            .redirect_uri
            .as_deref()
            .map(|raw| {
                Url::parse(raw).map_err(|e| {
                    SigninError::Config(format!("Invalid redirect_uri '{}': {}", raw, e)).into()
                })
            })
            .transpose()
    }

    /// How long interactive sign-in waits for the redirect.
    pub fn interactive_timeout(&self) -> Duration {
        Duration::from_secs(self.webui.timeout_seconds)
    }

    /// Options for [`crate::auth::PublicClientApplication`].
    pub fn client_options(&self) -> Result<ClientOptions> {
        Ok(ClientOptions {
            client_id: self.client.client_id.clone(),
            authority: self.authority_url()?,
            redirect_uri: self.redirect_url()?,
            interactive_timeout: self.interactive_timeout(),
        })
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`SigninError::Config`] for missing or malformed values and
    /// [`SigninError::InvalidConfiguration`] for a redirect URI that is not
    /// a plain-HTTP loopback address.
    pub fn validate(&self) -> Result<()> {
        if self.client.client_id.trim().is_empty() {
            return Err(SigninError::Config(
                "client.client_id must be set (or LOOPBACK_SIGNIN_CLIENT_ID)".to_string(),
            )
            .into());
        }

        if self.client.scopes.is_empty() {
            return Err(
                SigninError::Config("client.scopes must not be empty".to_string()).into(),
            );
        }

        self.authority_url()?;

        if let Some(redirect) = self.redirect_url()? {
            RedirectTarget::from_uri(&redirect)?;
        }

        Url::parse(&self.graph.api_url).map_err(|e| {
            SigninError::Config(format!("Invalid graph.api_url '{}': {}", self.graph.api_url, e))
        })?;

        if self.webui.timeout_seconds == 0 {
            return Err(SigninError::Config(
                "webui.timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.cache.enabled && self.cache.service.trim().is_empty() {
            return Err(SigninError::Config(
                "cache.service must not be empty when the cache is enabled".to_string(),
            )
            .into());
        }

        Ok(())
    }
}
