/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint.

- `signin`      : cached token first, then interactive browser sign-in
- `silent`      : cached token only
- `device_code` : device code sign-in for hosts without a browser
- `accounts`    : token cache listing and clearing

Handlers build a [`PublicClientApplication`] from the configuration and hand
it to the library components; they own nothing but console output.
*/

use crate::auth::{
    AuthenticationResult, CacheBackend, KeyringBackend, MemoryBackend, PublicClientApplication,
    TokenCache,
};
use crate::config::Config;
use crate::error::Result;
use crate::graph::{ProfileClient, UserProfile};
use colored::Colorize;
use tokio_util::sync::CancellationToken;

// Token cache listing and clearing
pub mod accounts;

/// Builds the token provider described by `config`.
///
/// The keyring entry is keyed by the client id so different registrations
/// never share cached tokens.
pub fn build_application(
    config: &Config,
    cancellation: CancellationToken,
) -> Result<PublicClientApplication> {
    let backend: Box<dyn CacheBackend> = if config.cache.enabled {
        Box::new(KeyringBackend::new(
            &config.cache.service,
            &config.client.client_id,
        ))
    } else {
        tracing::debug!("Token cache disabled; tokens live for this run only");
        Box::new(MemoryBackend::new())
    };

    Ok(
        PublicClientApplication::new(config.client_options()?, TokenCache::new(backend))
            .with_cancellation(cancellation),
    )
}

/// Calls the profile endpoint with the acquired token.
pub async fn fetch_profile(config: &Config, result: &AuthenticationResult) -> Result<UserProfile> {
    ProfileClient::new(config.graph.api_url.clone())
        .get_me(&result.access_token)
        .await
}

fn print_result(result: &AuthenticationResult, profile: &UserProfile) {
    println!();
    println!("{}", "Signed in".green().bold());
    println!("  Account:  {}", result.account.username);
    if let Some(tenant) = &result.account.tenant_id {
        println!("  Tenant:   {}", tenant);
    }
    match result.expires_at {
        Some(at) => println!("  Expires:  {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("  Expires:  never"),
    }
    println!("  Scopes:   {}", result.scopes.join(" "));
    println!();
    println!("{}", "Profile".green().bold());
    println!("  Id:       {}", profile.id);
    println!(
        "  Name:     {}",
        profile.display_name.as_deref().unwrap_or("-")
    );
    println!("  Mail:     {}", profile.mail.as_deref().unwrap_or("-"));
    println!();
}

// Interactive sign-in command handler
pub mod signin {
    use super::*;
    use crate::auth::{TokenLookup, TokenProvider};
    use crate::webui::{CustomBrowserWebUi, CustomWebUi};

    /// Run the `signin` command
    ///
    /// Tries the token cache first and falls back to the browser. The
    /// resulting token is used to fetch and print the user's profile.
    pub async fn run_signin(config: Config, cancellation: CancellationToken) -> Result<()> {
        let app = build_application(&config, cancellation)?;
        let web_ui = CustomBrowserWebUi::new().pages(config.webui.pages.clone());

        let result = acquire_token(&app, &web_ui, &config.client.scopes).await?;
        let profile = fetch_profile(&config, &result).await?;
        print_result(&result, &profile);
        Ok(())
    }

    /// Silent lookup, then interactive sign-in on a miss.
    pub async fn acquire_token(
        provider: &dyn TokenProvider,
        web_ui: &dyn CustomWebUi,
        scopes: &[String],
    ) -> Result<AuthenticationResult> {
        match provider.acquire_token_silent(scopes, None).await? {
            TokenLookup::Found(result) => {
                tracing::info!(account = %result.account.username, "Using cached token");
                Ok(result)
            }
            TokenLookup::NotFound => {
                println!(
                    "{}",
                    "Opening the browser to sign in; complete the sign-in there.".cyan()
                );
                provider.acquire_token_interactive(scopes, web_ui).await
            }
        }
    }

}

// Silent (cache-only) command handler
pub mod silent {
    use super::*;
    use crate::auth::{TokenLookup, TokenProvider};

    /// Run the `silent` command
    ///
    /// Never opens a browser. A cache miss is reported, not treated as a
    /// failure.
    pub async fn run_silent(config: Config, cancellation: CancellationToken) -> Result<()> {
        let app = build_application(&config, cancellation)?;

        match app.acquire_token_silent(&config.client.scopes, None).await? {
            TokenLookup::Found(result) => {
                let profile = fetch_profile(&config, &result).await?;
                print_result(&result, &profile);
            }
            TokenLookup::NotFound => {
                println!(
                    "{}",
                    "No usable cached token. Run `loopback-signin signin` first.".yellow()
                );
            }
        }
        Ok(())
    }
}

// Device code command handler
pub mod device_code {
    use super::*;

    /// Run the `device-code` command
    pub async fn run_device_code(config: Config, cancellation: CancellationToken) -> Result<()> {
        let app = build_application(&config, cancellation)?;

        let result = app
            .acquire_token_with_device_code(&config.client.scopes, |prompt| {
                println!("{}", prompt.instructions().yellow());
            })
            .await?;

        let profile = fetch_profile(&config, &result).await?;
        print_result(&result, &profile);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_application_with_memory_cache() {
        let mut config = Config::default();
        config.client.client_id = "client".to_string();
        config.cache.enabled = false;
        let app = build_application(&config, CancellationToken::new()).unwrap();
        assert_eq!(
            app.token_endpoint(),
            "https://login.microsoftonline.com/common/oauth2/v2.0/token"
        );
    }

    #[test]
    fn test_build_application_rejects_bad_authority() {
        let mut config = Config::default();
        config.client.authority = Some("not a url".to_string());
        assert!(build_application(&config, CancellationToken::new()).is_err());
    }
}
