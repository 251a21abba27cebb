//! loopback-signin - console sign-in through the system browser
//!
#![doc = "loopback-signin - console sign-in through the system browser"]
#![doc = "Main entry point for the loopback-signin application."]

use anyhow::Result;
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use loopback_signin::cli::{Cli, Commands};
use loopback_signin::commands;
use loopback_signin::config::Config;

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let cli = Cli::parse_args();

    init_tracing(cli.verbose, cli.json_logs);

    if let Err(e) = run(cli).await {
        eprintln!("{}", format!("Error: {:#}", e).red());
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    // Ctrl-C aborts any wait for the browser or the device code
    let cancellation = CancellationToken::new();
    {
        let token = cancellation.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted; cancelling sign-in");
                token.cancel();
            }
        });
    }

    match cli.command {
        Commands::Signin { .. } => {
            tracing::info!("Starting interactive sign-in");
            commands::signin::run_signin(config, cancellation).await
        }
        Commands::Silent => {
            tracing::info!("Starting silent token acquisition");
            commands::silent::run_silent(config, cancellation).await
        }
        Commands::DeviceCode => {
            tracing::info!("Starting device code sign-in");
            commands::device_code::run_device_code(config, cancellation).await
        }
        Commands::Accounts => commands::accounts::list_accounts(config).await,
        Commands::ClearCache => commands::accounts::clear_cache(config).await,
    }
}

/// Initialize tracing subscriber with environment filter
///
/// `RUST_LOG` wins over `--verbose`. Logs go to stderr so command output on
/// stdout stays clean.
fn init_tracing(verbose: bool, json: bool) {
    let default_directive = if verbose {
        "loopback_signin=debug"
    } else {
        "loopback_signin=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let registry = tracing_subscriber::registry().with(env_filter);

    if json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
