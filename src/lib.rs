//! loopback-signin library
//!
//! Console sign-in against an identity platform authority. The interactive
//! flow opens the system browser and captures the authorization redirect on
//! a single-request loopback listener; the resulting bearer token is used to
//! call a profile API.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `webui`: loopback redirect listener, browser launcher, free-port finder
//!   and the interception state machine
//! - `auth`: token provider, PKCE, token cache and account model
//! - `graph`: profile API client
//! - `config`: configuration management and validation
//! - `error`: error types and result aliases
//! - `cli` / `commands`: command-line interface and handlers
//!
//! # Example
//!
//! ```no_run
//! use loopback_signin::auth::{PublicClientApplication, TokenCache, MemoryBackend, TokenProvider};
//! use loopback_signin::webui::CustomBrowserWebUi;
//! use loopback_signin::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::default();
//!     config.client.client_id = "00000000-0000-0000-0000-000000000000".to_string();
//!     config.validate()?;
//!
//!     let app = PublicClientApplication::new(
//!         config.client_options()?,
//!         TokenCache::new(Box::new(MemoryBackend::new())),
//!     );
//!     let result = app
//!         .acquire_token_interactive(&config.client.scopes, &CustomBrowserWebUi::new())
//!         .await?;
//!     println!("signed in as {}", result.account.username);
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod graph;
pub mod webui;

// Re-export commonly used types
pub use auth::{AuthenticationResult, PublicClientApplication, TokenLookup, TokenProvider};
pub use config::Config;
pub use error::{Result, SigninError};
pub use webui::{find_free_loopback_redirect_uri, CustomBrowserWebUi, CustomWebUi};
