//! Error types for tokenkeeper
//!
//! This module defines the error kinds surfaced by the discovery cache and
//! the token manager, using `thiserror` for ergonomic error handling.
//! Bearer token validation never returns these errors; it reports every
//! outcome as an [`AuthorizeVerdict`](crate::auth::verdict::AuthorizeVerdict).

use thiserror::Error;

/// Main error type for tokenkeeper operations
///
/// Callers receive these wrapped in [`anyhow::Error`] and can recover the
/// kind with `downcast_ref::<TokenKeeperError>()`.
#[derive(Error, Debug)]
pub enum TokenKeeperError {
    /// Settings file, environment or CLI configuration problems
    #[error("Configuration error: {0}")]
    Config(String),

    /// The OIDC discovery document or key set could not be fetched or parsed
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// The token endpoint rejected the request or returned incomplete data
    #[error("Token acquisition error: {0}")]
    Acquisition(String),

    /// The caller cancelled the operation before it completed
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// A token could not be decoded
    #[error("Token format error: {0}")]
    TokenFormat(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for tokenkeeper operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;
