//! Client-credentials token manager
//!
//! This module coordinates discovery, the token endpoint grants and the
//! in-memory token record into the single façade outbound callers use.
//!
//! The [`TokenManager`] is the sole owner of one identity's token state.
//! Callers interact with it through three methods:
//!
//! - [`TokenManager::get_token`] -- returns a valid access token, refreshing
//!   or reacquiring as necessary.
//! - [`TokenManager::invalidate`] -- forgets the cached token after a
//!   downstream service rejected it.
//! - [`TokenManager::authorize_request`] -- attaches `Authorization: Bearer
//!   <token>` to an outgoing request.
//!
//! # Cancellation
//!
//! `get_token` takes no cancellation signal. Dropping its future aborts the
//! in-flight HTTP request and releases the lock without touching the cached
//! record, so the next caller simply performs the round trip again. Every
//! round trip is bounded by the timeout configured on the HTTP client.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokenkeeper::auth::grant::ClientIdentity;
//! use tokenkeeper::auth::manager::TokenManager;
//!
//! # async fn example() -> tokenkeeper::error::Result<()> {
//! let manager = Arc::new(TokenManager::new(
//!     reqwest::Client::new(),
//!     ClientIdentity {
//!         authority: "https://auth.example.com".to_string(),
//!         client_id: "billing-service".to_string(),
//!         client_secret: "s3cr3t".to_string(),
//!         scope: "invoices.read".to_string(),
//!     },
//! )?);
//!
//! let token = manager.get_token().await?;
//! println!("access token: {token}");
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::auth::discovery::DiscoveryCache;
use crate::auth::grant::{ClientIdentity, RefreshOutcome, TokenGrant, TokenResponse};
use crate::auth::token_store::AccessTokenRecord;
use crate::error::Result;

// ---------------------------------------------------------------------------
// TokenManager
// ---------------------------------------------------------------------------

/// Owns the access token for one [`ClientIdentity`].
///
/// # Thread safety
///
/// `TokenManager` is internally synchronized; share it with `Arc`. The token
/// record sits behind a `tokio::sync::Mutex` that is held across the token
/// endpoint round trip, so at most one acquisition or refresh is in flight
/// per manager. Callers that queued behind it find the fresh token when they
/// get the lock and return it without another request.
pub struct TokenManager {
    discovery: Arc<DiscoveryCache>,
    grant: TokenGrant,
    record: Mutex<AccessTokenRecord>,
}

impl TokenManager {
    /// Creates a manager that discovers its token endpoint from
    /// `identity.authority`.
    ///
    /// # Errors
    ///
    /// Returns [`TokenKeeperError::Discovery`](crate::error::TokenKeeperError::Discovery)
    /// if the authority is not a valid URL.
    pub fn new(http: reqwest::Client, identity: ClientIdentity) -> Result<Self> {
        let discovery = Arc::new(DiscoveryCache::for_authority(
            http.clone(),
            &identity.authority,
        )?);
        Ok(Self::with_discovery(http, identity, discovery))
    }

    /// Creates a manager that resolves its token endpoint through an existing
    /// discovery cache.
    pub fn with_discovery(
        http: reqwest::Client,
        identity: ClientIdentity,
        discovery: Arc<DiscoveryCache>,
    ) -> Self {
        Self {
            discovery,
            grant: TokenGrant::new(http, identity),
            record: Mutex::new(AccessTokenRecord::default()),
        }
    }

    /// The identity this manager acquires tokens for.
    pub fn identity(&self) -> &ClientIdentity {
        self.grant.identity()
    }

    /// Returns a currently valid access token.
    ///
    /// The resolution order is:
    ///
    /// 1. If the cached token has not expired, return it.
    /// 2. If a refresh token is cached, refresh. When the authorization
    ///    server rejects the refresh token, reacquire once with the
    ///    client-credentials grant.
    /// 3. Otherwise reacquire with the client-credentials grant.
    /// 4. Cache the new token with `expires_at = now + expires_in`.
    ///
    /// # Errors
    ///
    /// Returns [`TokenKeeperError::Discovery`](crate::error::TokenKeeperError::Discovery)
    /// if the token endpoint cannot be discovered and
    /// [`TokenKeeperError::Acquisition`](crate::error::TokenKeeperError::Acquisition)
    /// if no token could be obtained. Only a rejected refresh token is
    /// recovered from; every other failure reaches the caller.
    pub async fn get_token(&self) -> Result<String> {
        let mut record = self.record.lock().await;

        if record.is_fresh(Utc::now()) {
            return Ok(record.access_token.clone());
        }

        let response = if record.has_refresh_token() {
            let refresh_token = record.refresh_token.clone();
            match self.refresh(&refresh_token).await? {
                RefreshOutcome::Refreshed(response) => {
                    tracing::info!(client_id = %self.identity().client_id, "Refreshed access token");
                    response
                }
                RefreshOutcome::Rejected(reason) => {
                    tracing::warn!(
                        client_id = %self.identity().client_id,
                        reason = %reason,
                        "Refresh token rejected, requesting a new access token"
                    );
                    record.clear();
                    self.reacquire().await?
                }
            }
        } else {
            self.reacquire().await?
        };

        *record = AccessTokenRecord::from_response(response, Utc::now());
        tracing::debug!(expires_at = ?record.expires_at, "Cached access token");

        Ok(record.access_token.clone())
    }

    /// The discovery document URL the token endpoint is resolved from.
    pub fn metadata_url(&self) -> &url::Url {
        self.discovery.metadata_url()
    }

    /// Expiry of the cached access token, if one has been acquired.
    pub async fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.record.lock().await.expires_at
    }

    /// Forgets the cached token so the next [`get_token`](Self::get_token)
    /// performs a full client-credentials acquisition.
    ///
    /// Use when a downstream service answers `401 Unauthorized` for a token
    /// that had not expired yet.
    pub async fn invalidate(&self) {
        self.record.lock().await.clear();
        tracing::info!(client_id = %self.identity().client_id, "Cached access token invalidated");
    }

    /// Attaches `Authorization: Bearer <token>` to `request`.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`get_token`](Self::get_token).
    pub async fn authorize_request(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder> {
        let token = self.get_token().await?;
        Ok(request.bearer_auth(token))
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    /// Requests a brand new token with the client-credentials grant.
    async fn reacquire(&self) -> Result<TokenResponse> {
        let configuration = self.discovery.get_configuration().await?;
        let response = self
            .grant
            .client_credentials(&configuration.token_endpoint)
            .await
            .map_err(|e| {
                tracing::error!(client_id = %self.identity().client_id, error = %e, "Error retrieving access token");
                e
            })?;
        tracing::info!(client_id = %self.identity().client_id, "Retrieved new access token");
        Ok(response)
    }

    /// Exchanges the cached refresh token.
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshOutcome> {
        let configuration = self.discovery.get_configuration().await?;
        self.grant
            .refresh(&configuration.token_endpoint, refresh_token)
            .await
            .map_err(|e| {
                tracing::error!(client_id = %self.identity().client_id, error = %e, "Error refreshing access token");
                e
            })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
