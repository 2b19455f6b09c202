//! tokenkeeper - OAuth 2.0 client credentials and bearer token validation
//!
#![doc = "tokenkeeper - OAuth 2.0 client credentials and bearer token validation"]
#![doc = "Main entry point for the tokenkeeper CLI."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tokenkeeper::cli::{Cli, Commands};
use tokenkeeper::commands;
use tokenkeeper::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Initialize tracing
    init_tracing(cli.verbose, cli.json_logs);

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    // Execute command
    match cli.command {
        Commands::Token { json } => {
            tracing::info!("Acquiring access token");
            commands::token::run_token(config, json).await?;
            Ok(())
        }
        Commands::Authorize { header, token } => {
            tracing::info!("Validating bearer token");
            let authorized = commands::authorize::run_authorize(config, header, token).await?;
            if !authorized {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Discover { .. } => {
            tracing::info!("Starting OIDC discovery");
            commands::discover::run_discover(config).await?;
            Ok(())
        }
    }
}

/// Initialize tracing subscriber with environment filter
///
/// Logs go to stderr so command output on stdout stays machine-readable.
fn init_tracing(verbose: bool, json_logs: bool) {
    let default_filter = if verbose {
        "tokenkeeper=debug"
    } else {
        "tokenkeeper=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
