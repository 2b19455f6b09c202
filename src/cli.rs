//! Command-line interface definition for tokenkeeper
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for token acquisition, request authorization and
//! discovery inspection.

use clap::{Parser, Subcommand};

/// tokenkeeper - OAuth 2.0 client credentials and bearer token validation
///
/// Acquire access tokens for this service and validate the bearer tokens
/// other services present to it.
#[derive(Parser, Debug, Clone)]
#[command(name = "tokenkeeper")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "TOKENKEEPER_CONFIG",
        default_value = "config/config.yaml"
    )]
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

/// Available commands for tokenkeeper
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Acquire an access token with the configured client credentials
    Token {
        /// Print the token and its expiry as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a bearer token and print the authorization verdict
    Authorize {
        /// Full Authorization header value, e.g. "Bearer eyJ..."
        #[arg(long, conflicts_with = "token", required_unless_present = "token")]
        header: Option<String>,

        /// Raw JWT; sent as "Bearer <token>"
        #[arg(long)]
        token: Option<String>,
    },

    /// Fetch and print the identity provider's OIDC configuration
    Discover {
        /// Override the discovery document URL from config
        #[arg(long)]
        metadata_url: Option<String>,
    },
}

impl Cli {
    /// Parse command line arguments
    ///
    /// # Returns
    ///
    /// Returns the parsed CLI structure
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/config.yaml".to_string()),
            verbose: false,
            json_logs: false,
            command: Commands::Token { json: false },
        }
    }
}
