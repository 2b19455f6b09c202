/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint.

It exposes three top-level command modules:

- `token`     — Acquire an access token with the configured credentials
- `authorize` — Validate a bearer token and print the verdict
- `discover`  — Print the identity provider's OIDC configuration

The handlers are thin wrappers over the `auth` components.
*/

use std::sync::Arc;

use crate::auth::discovery::DiscoveryCache;
use crate::config::Config;
use crate::error::Result;

/// Builds the HTTP client and the inbound discovery cache.
fn discovery_from_config(config: &Config) -> Result<(reqwest::Client, Arc<DiscoveryCache>)> {
    let http = config.http_client()?;
    let discovery = Arc::new(config.discovery_cache(http.clone())?);
    Ok((http, discovery))
}

// Token command handler
pub mod token {
    //! Client-credentials token acquisition.

    use super::*;

    /// Acquire an access token and print it
    ///
    /// # Arguments
    ///
    /// * `config` - Loaded configuration
    /// * `json` - Print `{access_token, token_type, expires_at}` instead of
    ///   the bare token
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is incomplete or no token could be
    /// acquired
    pub async fn run_token(config: Config, json: bool) -> Result<()> {
        config.validate_identity_server()?;

        let manager = config.token_manager(config.http_client()?)?;

        let token = manager.get_token().await?;

        if json {
            let output = serde_json::json!({
                "access_token": token,
                "token_type": "Bearer",
                "expires_at": manager.expires_at().await.map(|t| t.to_rfc3339()),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            println!("{}", token);
        }

        Ok(())
    }
}

// Authorize command handler
pub mod authorize {
    //! Bearer token validation.
    //!
    //! Ctrl-C while the OIDC configuration is loading cancels the attempt.

    use super::*;
    use crate::auth::validator::{BearerTokenValidator, BEARER_PREFIX};
    use tokio_util::sync::CancellationToken;

    /// Builds the `Authorization` header value from the CLI arguments.
    ///
    /// An explicit header wins; a bare token is prefixed with `Bearer `.
    pub fn header_value(header: Option<String>, token: Option<String>) -> String {
        match (header, token) {
            (Some(header), _) => header,
            (None, Some(token)) => format!("{}{}", BEARER_PREFIX, token),
            (None, None) => String::new(),
        }
    }

    /// Validate a bearer token and print the verdict as JSON
    ///
    /// # Returns
    ///
    /// Returns `true` if the token was authorized
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is incomplete or the verdict
    /// cannot be serialized
    pub async fn run_authorize(
        config: Config,
        header: Option<String>,
        token: Option<String>,
    ) -> Result<bool> {
        config.validate_authorization()?;

        let (_, discovery) = discovery_from_config(&config)?;
        let validator = BearerTokenValidator::new(
            discovery,
            config.authorization.valid_audience.clone(),
        )
        .with_clock_skew(config.clock_skew());

        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, cancelling authorization");
                on_interrupt.cancel();
            }
        });

        let header = header_value(header, token);
        let verdict = validator.authorize(&header, Some(&cancel)).await;
        interrupt.abort();

        println!("{}", serde_json::to_string_pretty(&verdict.to_wire())?);

        Ok(verdict.is_authorized())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_header_value_prefers_header() {
            assert_eq!(
                header_value(Some("Basic abc".to_string()), Some("tok".to_string())),
                "Basic abc"
            );
        }

        #[test]
        fn test_header_value_prefixes_token() {
            assert_eq!(header_value(None, Some("tok".to_string())), "Bearer tok");
        }

        #[test]
        fn test_header_value_empty_without_input() {
            assert_eq!(header_value(None, None), "");
        }
    }
}

// Discover command handler
pub mod discover {
    //! OIDC configuration inspection.

    use super::*;

    /// Fetch the OIDC configuration and print issuer, token endpoint and
    /// signing key ids
    ///
    /// # Errors
    ///
    /// Returns error if the discovery document or key set cannot be loaded
    pub async fn run_discover(config: Config) -> Result<()> {
        let (_, discovery) = discovery_from_config(&config)?;
        tracing::info!("Fetching OIDC configuration from {}", discovery.metadata_url());

        let configuration = discovery.get_configuration().await?;

        println!("Issuer:         {}", configuration.issuer);
        println!("Token endpoint: {}", configuration.token_endpoint);
        println!("Signing keys:   {}", configuration.signing_keys.len());
        for key in &configuration.signing_keys {
            let kid = key.key_id.as_deref().unwrap_or("<no kid>");
            match key.algorithm {
                Some(alg) => println!("  - {} ({:?})", kid, alg),
                None => println!("  - {}", kid),
            }
        }

        Ok(())
    }
}
