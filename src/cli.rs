//! Command-line interface definition for loopback-signin
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for interactive, silent and device code sign-in as
//! well as token cache management.

use clap::{Parser, Subcommand};

/// loopback-signin - sign in through the system browser and call the profile API
///
/// Interactive sign-in opens the default browser and captures the
/// authorization redirect on a loopback listener.
#[derive(Parser, Debug, Clone)]
#[command(name = "loopback-signin")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Sign in (cached token first, then the browser) and show the profile
    Signin {
        /// Seconds to wait for the browser redirect
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Fixed loopback redirect URI (default: a free port on localhost)
        #[arg(long)]
        redirect_uri: Option<String>,
    },

    /// Use a cached token only; fails when none is usable
    Silent,

    /// Sign in with the device code flow and show the profile
    DeviceCode,

    /// List cached accounts
    Accounts,

    /// Remove every cached account
    ClearCache,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
