use crate::auth::TokenProvider;
use crate::commands::build_application;
use crate::config::Config;
use crate::error::Result;
use colored::Colorize;
use tokio_util::sync::CancellationToken;

/// List cached accounts
pub async fn list_accounts(config: Config) -> Result<()> {
    let app = build_application(&config, CancellationToken::new())?;
    let accounts = app.accounts().await?;

    if accounts.is_empty() {
        println!("{}", "No cached accounts found.".yellow());
        return Ok(());
    }

    println!("\nCached accounts:");
    for account in &accounts {
        println!(
            "  {}  {}",
            account.username.cyan(),
            account.home_account_id.dimmed()
        );
    }
    println!();
    Ok(())
}

/// Remove every cached account
pub async fn clear_cache(config: Config) -> Result<()> {
    let app = build_application(&config, CancellationToken::new())?;
    let accounts = app.accounts().await?;

    for account in &accounts {
        app.remove_account(account).await?;
    }

    println!(
        "{}",
        format!("Removed {} cached account(s)", accounts.len()).green()
    );
    Ok(())
}
