//! tokenkeeper - OAuth 2.0 client credentials and bearer token validation
//!
//! This library provides the two halves of service-to-service
//! authentication against an OpenID Connect identity provider.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `auth`: Discovery cache, token manager and bearer token validator
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//! - `commands`: Handlers behind the CLI subcommands
//!
//! # Example
//!
//! ```no_run
//! use tokenkeeper::{Config, TokenManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     let manager = TokenManager::new(config.http_client()?, config.identity_server.clone())?;
//!     let token = manager.get_token().await?;
//!     println!("{token}");
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

// Re-export commonly used types
pub use auth::discovery::{DiscoveryCache, OidcConfiguration};
pub use auth::grant::ClientIdentity;
pub use auth::manager::TokenManager;
pub use auth::validator::{is_token_expired, BearerTokenValidator};
pub use auth::verdict::{AuthorizeVerdict, Claims, ErrorResponse, TokenRejection};
pub use config::Config;
pub use error::{Result, TokenKeeperError};
