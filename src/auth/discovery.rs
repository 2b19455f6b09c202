//! OpenID Connect discovery with an in-process cache
//!
//! This module fetches the OIDC discovery document and the signing key set it
//! points at, and memoizes the result for the lifetime of a
//! [`DiscoveryCache`].
//!
//! # Discovery sequence
//!
//! 1. `GET <metadata_url>` returns the discovery document, from which the
//!    `issuer`, `token_endpoint` and `jwks_uri` fields are read.
//! 2. `GET <jwks_uri>` returns the JSON Web Key Set.
//! 3. Every usable signature key is converted into a
//!    [`jsonwebtoken::DecodingKey`] once, so validation never touches the
//!    network.
//!
//! The cache loads at most once, even when many tasks ask for the
//! configuration at the same time. It is not re-fetched afterwards unless
//! [`DiscoveryCache::invalidate`] is called or a refresh interval was
//! configured; signing-key rotation upstream is therefore not picked up by
//! default.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::Jwk;
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{Result, TokenKeeperError};

/// Well-known path appended to an authority to locate its discovery document.
pub const WELL_KNOWN_OPENID_CONFIGURATION: &str = "/.well-known/openid-configuration";

// ---------------------------------------------------------------------------
// Wire documents
// ---------------------------------------------------------------------------

/// OpenID Connect discovery document as served by the identity provider.
///
/// Only the fields this crate needs are modelled; everything else lands in
/// `extra`.
///
/// # Examples
///
/// ```
/// use tokenkeeper::auth::discovery::DiscoveryDocument;
///
/// let json = r#"{
///     "issuer": "https://auth.example.com",
///     "token_endpoint": "https://auth.example.com/connect/token",
///     "jwks_uri": "https://auth.example.com/.well-known/jwks"
/// }"#;
///
/// let doc: DiscoveryDocument = serde_json::from_str(json).unwrap();
/// assert_eq!(doc.issuer, "https://auth.example.com");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryDocument {
    /// The issuer identifier tokens must carry in their `iss` claim.
    pub issuer: String,

    /// The OAuth 2.0 token endpoint (RFC 6749 section 3.2).
    pub token_endpoint: String,

    /// Location of the JSON Web Key Set holding the signing keys.
    pub jwks_uri: String,

    /// Grant types the server advertises, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_types_supported: Option<Vec<String>>,

    /// Additional metadata fields not explicitly modelled above.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Raw key set; keys stay untyped so one unsupported entry cannot poison the
/// rest of the set.
#[derive(Debug, Deserialize)]
struct RawKeySet {
    #[serde(default)]
    keys: Vec<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// OidcConfiguration
// ---------------------------------------------------------------------------

/// A verification key taken from the provider's JWK set.
#[derive(Clone)]
pub struct SigningKey {
    /// The `kid` the provider published for this key.
    pub key_id: Option<String>,

    /// The `alg` the provider pinned this key to, if any.
    pub algorithm: Option<Algorithm>,

    /// Key material ready for signature verification.
    pub key: DecodingKey,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// The resolved OIDC configuration shared by every validation and token
/// request that goes through one [`DiscoveryCache`].
#[derive(Debug, Clone)]
pub struct OidcConfiguration {
    /// Expected `iss` claim value.
    pub issuer: String,

    /// Token endpoint used for client-credentials and refresh grants.
    pub token_endpoint: Url,

    /// Verification keys, in the order the provider published them.
    pub signing_keys: Vec<SigningKey>,
}

impl OidcConfiguration {
    /// Returns the key published under `key_id`, if any.
    pub fn key_by_id(&self, key_id: &str) -> Option<&SigningKey> {
        self.signing_keys
            .iter()
            .find(|k| k.key_id.as_deref() == Some(key_id))
    }

    /// Returns the `kid` of every signing key, skipping keys without one.
    pub fn key_ids(&self) -> Vec<&str> {
        self.signing_keys
            .iter()
            .filter_map(|k| k.key_id.as_deref())
            .collect()
    }
}

/// Converts one JWK into a [`SigningKey`].
///
/// Returns `None` for encryption keys and for keys `jsonwebtoken` cannot
/// verify with.
fn signing_key_from_value(value: serde_json::Value) -> Option<SigningKey> {
    let key_id = value.get("kid").and_then(|v| v.as_str()).map(str::to_string);

    if value.get("use").and_then(|v| v.as_str()) == Some("enc") {
        tracing::debug!(kid = ?key_id, "Skipping encryption key in key set");
        return None;
    }

    let algorithm = match value.get("alg").and_then(|v| v.as_str()) {
        Some(alg) => match Algorithm::from_str(alg) {
            Ok(alg) => Some(alg),
            Err(_) => {
                tracing::warn!(kid = ?key_id, alg, "Skipping key with unsupported algorithm");
                return None;
            }
        },
        None => None,
    };

    let jwk: Jwk = match serde_json::from_value(value) {
        Ok(jwk) => jwk,
        Err(e) => {
            tracing::warn!(kid = ?key_id, error = %e, "Skipping unparseable key");
            return None;
        }
    };

    match DecodingKey::from_jwk(&jwk) {
        Ok(key) => Some(SigningKey {
            key_id,
            algorithm,
            key,
        }),
        Err(e) => {
            tracing::warn!(kid = ?key_id, error = %e, "Skipping unusable key");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Fetch helpers
// ---------------------------------------------------------------------------

/// Builds the discovery document URL for an authority.
///
/// # Examples
///
/// ```
/// use tokenkeeper::auth::discovery::metadata_url_for_authority;
///
/// let url = metadata_url_for_authority("https://auth.example.com/realms/main/").unwrap();
/// assert_eq!(
///     url.as_str(),
///     "https://auth.example.com/realms/main/.well-known/openid-configuration"
/// );
/// ```
pub fn metadata_url_for_authority(authority: &str) -> Result<Url> {
    let trimmed = authority.trim_end_matches('/');
    Url::parse(&format!("{trimmed}{WELL_KNOWN_OPENID_CONFIGURATION}")).map_err(|e| {
        TokenKeeperError::Discovery(format!("invalid authority URL {authority}: {e}")).into()
    })
}

/// Fetches and parses the discovery document at `metadata_url`.
///
/// # Errors
///
/// Returns [`TokenKeeperError::Discovery`] if the request fails, the server
/// answers with a non-success status, or the body is not a discovery
/// document.
pub async fn fetch_discovery_document(
    http: &reqwest::Client,
    metadata_url: &Url,
) -> Result<DiscoveryDocument> {
    let resp = http
        .get(metadata_url.clone())
        .send()
        .await
        .map_err(|e| TokenKeeperError::Discovery(format!("metadata fetch failed: {e}")))?;

    if !resp.status().is_success() {
        return Err(TokenKeeperError::Discovery(format!(
            "metadata endpoint returned {}: {}",
            resp.status(),
            metadata_url
        ))
        .into());
    }

    let doc: DiscoveryDocument = resp.json().await.map_err(|e| {
        TokenKeeperError::Discovery(format!("failed to parse discovery document: {e}"))
    })?;

    Ok(doc)
}

/// Fetches the key set at `jwks_uri` and converts every usable key.
///
/// # Errors
///
/// Returns [`TokenKeeperError::Discovery`] if the request fails or the body
/// is not a key set. Individual unusable keys are skipped, not reported.
pub async fn fetch_signing_keys(http: &reqwest::Client, jwks_uri: &Url) -> Result<Vec<SigningKey>> {
    let resp = http
        .get(jwks_uri.clone())
        .send()
        .await
        .map_err(|e| TokenKeeperError::Discovery(format!("key set fetch failed: {e}")))?;

    if !resp.status().is_success() {
        return Err(TokenKeeperError::Discovery(format!(
            "key set endpoint returned {}: {}",
            resp.status(),
            jwks_uri
        ))
        .into());
    }

    let raw: RawKeySet = resp
        .json()
        .await
        .map_err(|e| TokenKeeperError::Discovery(format!("failed to parse key set: {e}")))?;

    Ok(raw
        .keys
        .into_iter()
        .filter_map(signing_key_from_value)
        .collect())
}

/// Resolves the full [`OidcConfiguration`] behind `metadata_url`.
///
/// # Errors
///
/// Returns [`TokenKeeperError::Discovery`] when either document is missing or
/// malformed, or when the advertised endpoints are not valid URLs.
pub async fn fetch_configuration(
    http: &reqwest::Client,
    metadata_url: &Url,
) -> Result<OidcConfiguration> {
    let doc = fetch_discovery_document(http, metadata_url).await?;

    let token_endpoint = Url::parse(&doc.token_endpoint).map_err(|e| {
        TokenKeeperError::Discovery(format!(
            "invalid token_endpoint {}: {e}",
            doc.token_endpoint
        ))
    })?;
    let jwks_uri = Url::parse(&doc.jwks_uri).map_err(|e| {
        TokenKeeperError::Discovery(format!("invalid jwks_uri {}: {e}", doc.jwks_uri))
    })?;

    let signing_keys = fetch_signing_keys(http, &jwks_uri).await?;
    if signing_keys.is_empty() {
        tracing::warn!(%jwks_uri, "Key set contains no usable signing keys");
    }

    Ok(OidcConfiguration {
        issuer: doc.issuer,
        token_endpoint,
        signing_keys,
    })
}

// ---------------------------------------------------------------------------
// DiscoveryCache
// ---------------------------------------------------------------------------

struct CachedConfiguration {
    configuration: Arc<OidcConfiguration>,
    fetched_at: Instant,
}

/// Lazily loads and memoizes the OIDC configuration for one metadata URL.
///
/// # Thread safety
///
/// `DiscoveryCache` is internally synchronized; share it with `Arc`. The
/// write lock is held across the fetch, so concurrent first callers wait for
/// a single load instead of issuing their own.
///
/// # Examples
///
/// ```no_run
/// use tokenkeeper::auth::discovery::DiscoveryCache;
/// use url::Url;
///
/// # async fn example() -> tokenkeeper::error::Result<()> {
/// let cache = DiscoveryCache::new(
///     reqwest::Client::new(),
///     Url::parse("https://auth.example.com/.well-known/openid-configuration")?,
/// );
/// let config = cache.get_configuration().await?;
/// println!("issuer: {}", config.issuer);
/// # Ok(())
/// # }
/// ```
pub struct DiscoveryCache {
    http: reqwest::Client,
    metadata_url: Url,
    refresh_interval: Option<Duration>,
    cache: RwLock<Option<CachedConfiguration>>,
}

impl DiscoveryCache {
    /// Creates a cache for the discovery document at `metadata_url`.
    pub fn new(http: reqwest::Client, metadata_url: Url) -> Self {
        Self {
            http,
            metadata_url,
            refresh_interval: None,
            cache: RwLock::new(None),
        }
    }

    /// Creates a cache for `<authority>/.well-known/openid-configuration`.
    ///
    /// # Errors
    ///
    /// Returns [`TokenKeeperError::Discovery`] if `authority` is not a URL.
    pub fn for_authority(http: reqwest::Client, authority: &str) -> Result<Self> {
        Ok(Self::new(http, metadata_url_for_authority(authority)?))
    }

    /// Re-fetches the configuration once it is older than `interval`.
    ///
    /// Without this the configuration is kept for the lifetime of the cache.
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = Some(interval);
        self
    }

    /// The discovery document URL this cache reads from.
    pub fn metadata_url(&self) -> &Url {
        &self.metadata_url
    }

    /// Returns the cached configuration, loading it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`TokenKeeperError::Discovery`] if the load fails. Nothing is
    /// cached on failure, so the next call tries again.
    pub async fn get_configuration(&self) -> Result<Arc<OidcConfiguration>> {
        {
            let cache = self.cache.read().await;
            if let Some(ref cached) = *cache {
                if self.is_current(cached) {
                    return Ok(Arc::clone(&cached.configuration));
                }
            }
        }

        let mut cache = self.cache.write().await;

        // Another task may have loaded it while we waited for the write lock.
        if let Some(ref cached) = *cache {
            if self.is_current(cached) {
                return Ok(Arc::clone(&cached.configuration));
            }
        }

        tracing::debug!(metadata_url = %self.metadata_url, "Loading OIDC configuration");
        let configuration = match fetch_configuration(&self.http, &self.metadata_url).await {
            Ok(configuration) => Arc::new(configuration),
            Err(e) => {
                tracing::error!(metadata_url = %self.metadata_url, error = %e, "OIDC discovery failed");
                return Err(e);
            }
        };

        tracing::info!(
            issuer = %configuration.issuer,
            keys = configuration.signing_keys.len(),
            "Loaded OIDC configuration"
        );

        *cache = Some(CachedConfiguration {
            configuration: Arc::clone(&configuration),
            fetched_at: Instant::now(),
        });

        Ok(configuration)
    }

    /// Like [`get_configuration`](Self::get_configuration), but gives up as
    /// soon as `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`TokenKeeperError::Cancelled`] on cancellation, otherwise the
    /// same errors as `get_configuration`.
    pub async fn get_configuration_with_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Arc<OidcConfiguration>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TokenKeeperError::Cancelled(
                "OIDC configuration load was cancelled".to_string(),
            )
            .into()),
            result = self.get_configuration() => result,
        }
    }

    /// Drops the cached configuration so the next call fetches it again.
    ///
    /// Use after the provider rotates its signing keys.
    pub async fn invalidate(&self) {
        let mut cache = self.cache.write().await;
        if cache.take().is_some() {
            tracing::info!(metadata_url = %self.metadata_url, "OIDC configuration invalidated");
        }
    }

    fn is_current(&self, cached: &CachedConfiguration) -> bool {
        match self.refresh_interval {
            None => true,
            Some(interval) => cached.fetched_at.elapsed() < interval,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
