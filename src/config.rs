//! Configuration management for tokenkeeper
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::auth::discovery::{metadata_url_for_authority, DiscoveryCache};
use crate::auth::grant::ClientIdentity;
use crate::auth::manager::TokenManager;
use crate::error::{Result, TokenKeeperError};

/// Main configuration structure for tokenkeeper
///
/// Holds the outbound client identity, the inbound authorization settings
/// and the HTTP client settings shared by both.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Identity provider and client credentials for outbound calls
    #[serde(default)]
    pub identity_server: ClientIdentity,

    /// Inbound bearer token validation settings
    #[serde(default)]
    pub authorization: AuthorizationConfig,

    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,
}

/// Bearer token validation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationConfig {
    /// Audience inbound tokens must be issued for
    #[serde(default)]
    pub valid_audience: String,

    /// Discovery document URL; derived from the authority when empty
    #[serde(default)]
    pub oidc_metadata_url: String,

    /// Tolerance applied to `exp` and `nbf`, in seconds
    #[serde(default = "default_clock_skew_seconds")]
    pub clock_skew_seconds: u64,

    /// Re-fetch the discovery document after this many seconds
    #[serde(default)]
    pub discovery_refresh_seconds: Option<u64>,
}

fn default_clock_skew_seconds() -> u64 {
    60
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            valid_audience: String::new(),
            oidc_metadata_url: String::new(),
            clock_skew_seconds: default_clock_skew_seconds(),
            discovery_refresh_seconds: None,
        }
    }
}

/// HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-request timeout in seconds
    #[serde(default = "default_http_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_http_timeout_seconds() -> u64 {
    30
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_http_timeout_seconds(),
        }
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Returns
    ///
    /// Returns the loaded and merged configuration
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
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
            .map_err(|e| TokenKeeperError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| TokenKeeperError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        // Identity server overrides
        if let Ok(authority) = std::env::var("TOKENKEEPER_AUTHORITY") {
            self.identity_server.authority = authority;
        }

        if let Ok(client_id) = std::env::var("TOKENKEEPER_CLIENT_ID") {
            self.identity_server.client_id = client_id;
        }

        if let Ok(client_secret) = std::env::var("TOKENKEEPER_CLIENT_SECRET") {
            self.identity_server.client_secret = client_secret;
        }

        if let Ok(scope) = std::env::var("TOKENKEEPER_SCOPE") {
            self.identity_server.scope = scope;
        }

        // Authorization overrides
        if let Ok(audience) = std::env::var("TOKENKEEPER_VALID_AUDIENCE") {
            self.authorization.valid_audience = audience;
        }

        if let Ok(metadata_url) = std::env::var("TOKENKEEPER_OIDC_METADATA_URL") {
            self.authorization.oidc_metadata_url = metadata_url;
        }

        if let Ok(skew) = std::env::var("TOKENKEEPER_CLOCK_SKEW_SECONDS") {
            if let Ok(value) = skew.parse() {
                self.authorization.clock_skew_seconds = value;
            } else {
                tracing::warn!("Invalid TOKENKEEPER_CLOCK_SKEW_SECONDS: {}", skew);
            }
        }

        // HTTP overrides
        if let Ok(timeout) = std::env::var("TOKENKEEPER_HTTP_TIMEOUT_SECONDS") {
            if let Ok(value) = timeout.parse() {
                self.http.timeout_seconds = value;
            } else {
                tracing::warn!("Invalid TOKENKEEPER_HTTP_TIMEOUT_SECONDS: {}", timeout);
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }

        if let crate::cli::Commands::Discover {
            metadata_url: Some(url),
        } = &cli.command
        {
            self.authorization.oidc_metadata_url = url.clone();
        }
    }

    /// Validate the configuration
    ///
    /// Checks the settings every command depends on. Commands that need the
    /// client credentials or the audience additionally call
    /// [`validate_identity_server`](Self::validate_identity_server) or
    /// [`validate_authorization`](Self::validate_authorization).
    ///
    /// # Errors
    ///
    /// Returns error if any validation check fails
    pub fn validate(&self) -> Result<()> {
        if self.http.timeout_seconds == 0 {
            return Err(TokenKeeperError::Config(
                "http.timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.authorization.clock_skew_seconds > 3600 {
            return Err(TokenKeeperError::Config(
                "authorization.clock_skew_seconds must be less than or equal to 3600".to_string(),
            )
            .into());
        }

        if self.authorization.discovery_refresh_seconds == Some(0) {
            return Err(TokenKeeperError::Config(
                "authorization.discovery_refresh_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.identity_server.authority.is_empty()
            && self.authorization.oidc_metadata_url.is_empty()
        {
            return Err(TokenKeeperError::Config(
                "identity_server.authority or authorization.oidc_metadata_url must be set"
                    .to_string(),
            )
            .into());
        }

        self.metadata_url()?;

        Ok(())
    }

    /// Validate the settings the token manager needs
    ///
    /// # Errors
    ///
    /// Returns error if the authority or client credentials are missing
    pub fn validate_identity_server(&self) -> Result<()> {
        let identity = &self.identity_server;

        if identity.authority.is_empty() {
            return Err(TokenKeeperError::Config(
                "identity_server.authority cannot be empty".to_string(),
            )
            .into());
        }

        Url::parse(&identity.authority).map_err(|e| {
            TokenKeeperError::Config(format!(
                "identity_server.authority is not a valid URL: {}",
                e
            ))
        })?;

        if identity.client_id.is_empty() {
            return Err(TokenKeeperError::Config(
                "identity_server.client_id cannot be empty".to_string(),
            )
            .into());
        }

        if identity.client_secret.is_empty() {
            return Err(TokenKeeperError::Config(
                "identity_server.client_secret cannot be empty".to_string(),
            )
            .into());
        }

        Ok(())
    }

    /// Validate the settings the bearer token validator needs
    ///
    /// # Errors
    ///
    /// Returns error if no audience is configured
    pub fn validate_authorization(&self) -> Result<()> {
        if self.authorization.valid_audience.is_empty() {
            return Err(TokenKeeperError::Config(
                "authorization.valid_audience cannot be empty".to_string(),
            )
            .into());
        }

        Ok(())
    }

    /// The discovery document URL
    ///
    /// Uses `authorization.oidc_metadata_url` when set, otherwise the
    /// well-known location under `identity_server.authority`.
    ///
    /// # Errors
    ///
    /// Returns error if the configured URL cannot be parsed
    pub fn metadata_url(&self) -> Result<Url> {
        if self.authorization.oidc_metadata_url.is_empty() {
            return metadata_url_for_authority(&self.identity_server.authority).map_err(|e| {
                TokenKeeperError::Config(format!(
                    "identity_server.authority is not a valid URL: {}",
                    e
                ))
                .into()
            });
        }

        Url::parse(&self.authorization.oidc_metadata_url).map_err(|e| {
            TokenKeeperError::Config(format!(
                "authorization.oidc_metadata_url is not a valid URL: {}",
                e
            ))
            .into()
        })
    }

    /// Builds the HTTP client shared by discovery and the token endpoint
    ///
    /// # Errors
    ///
    /// Returns error if the TLS backend cannot be initialized
    pub fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(self.http.timeout_seconds))
            .build()
            .map_err(|e| TokenKeeperError::Http(e).into())
    }

    /// Builds the discovery cache for the configured metadata URL
    ///
    /// # Errors
    ///
    /// Returns error if the metadata URL is invalid
    pub fn discovery_cache(&self, http: reqwest::Client) -> Result<DiscoveryCache> {
        let cache = DiscoveryCache::new(http, self.metadata_url()?);
        Ok(match self.authorization.discovery_refresh_seconds {
            Some(seconds) => cache.with_refresh_interval(Duration::from_secs(seconds)),
            None => cache,
        })
    }

    /// Builds the token manager for `identity_server`
    ///
    /// The manager discovers its token endpoint from
    /// `identity_server.authority`; `authorization.oidc_metadata_url` only
    /// applies to inbound validation.
    ///
    /// # Errors
    ///
    /// Returns error if the authority is not a valid URL
    pub fn token_manager(&self, http: reqwest::Client) -> Result<TokenManager> {
        let cache = DiscoveryCache::for_authority(http.clone(), &self.identity_server.authority)?;
        let cache = match self.authorization.discovery_refresh_seconds {
            Some(seconds) => cache.with_refresh_interval(Duration::from_secs(seconds)),
            None => cache,
        };
        Ok(TokenManager::with_discovery(
            http,
            self.identity_server.clone(),
            Arc::new(cache),
        ))
    }

    /// Clock skew as a `Duration`
    pub fn clock_skew(&self) -> Duration {
        Duration::from_secs(self.authorization.clock_skew_seconds)
    }
}
