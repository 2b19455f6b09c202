//! Bearer token validation against a cached OIDC configuration
//!
//! One call to [`BearerTokenValidator::authorize`] walks a small state
//! machine:
//!
//! 1. Load the OIDC configuration through the [`DiscoveryCache`]. A failure
//!    here is ours, not the caller's, and ends in
//!    [`AuthorizeVerdict::InternalError`].
//! 2. Parse the `Authorization` header ([`parse_bearer_header`]). Bounds are
//!    checked before any slicing.
//! 3. Verify the JWT signature with the cached signing keys, then its issuer,
//!    audience and lifetime.
//! 4. Turn the payload into [`Claims`].
//!
//! Every path produces a verdict; nothing is returned as an error.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Validation};
use tokio_util::sync::CancellationToken;

use crate::auth::discovery::{DiscoveryCache, OidcConfiguration, SigningKey};
use crate::auth::verdict::{AuthorizeVerdict, Claims, TokenRejection, ValidatedToken};
use crate::error::{Result, TokenKeeperError};

/// Authentication scheme prefix, including the separating space.
pub const BEARER_PREFIX: &str = "Bearer ";

/// Default tolerance applied to `exp` and `nbf` checks.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(60);

type Payload = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Header parsing
// ---------------------------------------------------------------------------

/// Why an `Authorization` header did not yield a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderError {
    /// No token: empty, too short, or whitespace after the scheme.
    Missing,
    /// Not a `Bearer` credential.
    Malformed,
    /// Contains control characters.
    InvalidCharacters,
}

/// Extracts the token from a `Bearer <token>` header value.
///
/// # Examples
///
/// ```
/// use tokenkeeper::auth::validator::{parse_bearer_header, HeaderError};
///
/// assert_eq!(parse_bearer_header("Bearer abc.def.ghi"), Ok("abc.def.ghi"));
/// assert_eq!(parse_bearer_header("   "), Err(HeaderError::Missing));
/// assert_eq!(parse_bearer_header("Basic xyz"), Err(HeaderError::Malformed));
/// ```
pub fn parse_bearer_header(header: &str) -> std::result::Result<&str, HeaderError> {
    if header
        .chars()
        .any(|c| c.is_control() && !c.is_whitespace())
    {
        return Err(HeaderError::InvalidCharacters);
    }

    if header.trim().is_empty() || header.len() < BEARER_PREFIX.len() {
        return Err(HeaderError::Missing);
    }

    // Whatever follows the scheme-sized prefix must carry a token, whether or
    // not the prefix itself turns out to be "Bearer ".
    if let Some(rest) = header.get(BEARER_PREFIX.len()..) {
        if rest.trim().is_empty() {
            return Err(HeaderError::Missing);
        }
    }

    header
        .strip_prefix(BEARER_PREFIX)
        .map(str::trim)
        .ok_or(HeaderError::Malformed)
}

// ---------------------------------------------------------------------------
// Validation error mapping
// ---------------------------------------------------------------------------

/// Maps a `jsonwebtoken` failure to the rejection reported to the caller.
fn rejection_for(kind: &ErrorKind) -> TokenRejection {
    match kind {
        ErrorKind::InvalidSignature => TokenRejection::SignatureInvalid,
        ErrorKind::ExpiredSignature => TokenRejection::Expired,
        ErrorKind::ImmatureSignature => TokenRejection::InvalidLifetime,
        ErrorKind::InvalidIssuer => TokenRejection::InvalidIssuer,
        ErrorKind::InvalidAudience => TokenRejection::InvalidAudience,
        ErrorKind::MissingRequiredClaim(claim) => match claim.as_str() {
            "exp" | "nbf" => TokenRejection::InvalidLifetime,
            "iss" => TokenRejection::InvalidIssuer,
            "aud" => TokenRejection::InvalidAudience,
            _ => TokenRejection::Invalid,
        },
        _ => TokenRejection::Invalid,
    }
}

// ---------------------------------------------------------------------------
// BearerTokenValidator
// ---------------------------------------------------------------------------

/// Validates inbound bearer tokens for one audience.
///
/// # Thread safety
///
/// `BearerTokenValidator` is internally synchronized; share it with `Arc`.
/// Once the configuration is cached, validation is read-only and runs with
/// unlimited concurrency.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use tokenkeeper::auth::discovery::DiscoveryCache;
/// use tokenkeeper::auth::validator::BearerTokenValidator;
/// use url::Url;
///
/// # async fn example() -> tokenkeeper::error::Result<()> {
/// let discovery = Arc::new(DiscoveryCache::new(
///     reqwest::Client::new(),
///     Url::parse("https://auth.example.com/.well-known/openid-configuration")?,
/// ));
/// let validator = BearerTokenValidator::new(discovery, "orders-api");
///
/// let verdict = validator.authorize("Bearer eyJhbGciOi...", None).await;
/// if let Some(user) = verdict.user_id() {
///     println!("request made by {user}");
/// }
/// # Ok(())
/// # }
/// ```
pub struct BearerTokenValidator {
    discovery: Arc<DiscoveryCache>,
    valid_audience: String,
    clock_skew: Duration,
    current_user_id: RwLock<Option<String>>,
}

impl BearerTokenValidator {
    /// Creates a validator accepting tokens issued for `valid_audience`.
    pub fn new(discovery: Arc<DiscoveryCache>, valid_audience: impl Into<String>) -> Self {
        Self {
            discovery,
            valid_audience: valid_audience.into(),
            clock_skew: DEFAULT_CLOCK_SKEW,
            current_user_id: RwLock::new(None),
        }
    }

    /// Overrides the tolerance applied to `exp` and `nbf`.
    pub fn with_clock_skew(mut self, clock_skew: Duration) -> Self {
        self.clock_skew = clock_skew;
        self
    }

    /// The audience tokens must be issued for.
    pub fn valid_audience(&self) -> &str {
        &self.valid_audience
    }

    /// The discovery cache this validator reads keys from.
    pub fn discovery(&self) -> &Arc<DiscoveryCache> {
        &self.discovery
    }

    /// Authorizes the request carrying `header` as its `Authorization` value.
    ///
    /// `cancel` aborts the configuration load; a cancelled attempt yields
    /// [`AuthorizeVerdict::InternalError`].
    pub async fn authorize(
        &self,
        header: &str,
        cancel: Option<&CancellationToken>,
    ) -> AuthorizeVerdict {
        let configuration = match cancel {
            Some(cancel) => self.discovery.get_configuration_with_cancel(cancel).await,
            None => self.discovery.get_configuration().await,
        };
        let configuration = match configuration {
            Ok(configuration) => configuration,
            Err(e) => {
                tracing::error!(error = %e, "Authorization failed: OIDC configuration unavailable");
                return AuthorizeVerdict::InternalError {
                    message: e.to_string(),
                };
            }
        };

        let token = match parse_bearer_header(header) {
            Ok(token) => token,
            Err(HeaderError::Missing) => {
                return AuthorizeVerdict::unauthorized(TokenRejection::MissingToken)
            }
            Err(HeaderError::Malformed) => {
                return AuthorizeVerdict::unauthorized(TokenRejection::MalformedToken)
            }
            Err(HeaderError::InvalidCharacters) => {
                return AuthorizeVerdict::InvalidRequest {
                    message: "The authorization header contains invalid characters.".to_string(),
                }
            }
        };

        let verdict = self.validate(token, &configuration);
        match &verdict {
            AuthorizeVerdict::Authorized { claims, .. } => {
                tracing::debug!(user_id = ?claims.user_id(), "Bearer token authorized");
                self.remember_user_id(claims.user_id());
            }
            AuthorizeVerdict::Unauthorized { reason } => {
                tracing::debug!(reason = %reason, "Bearer token rejected");
            }
            _ => {}
        }
        verdict
    }

    /// User id of the most recently authorized token on this instance.
    ///
    /// Prefer [`AuthorizeVerdict::user_id`]; this accessor is shared by every
    /// caller of the validator and only reflects whichever authorization
    /// succeeded last.
    pub fn current_user_id(&self) -> Option<String> {
        match self.current_user_id.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn remember_user_id(&self, user_id: Option<&str>) {
        let mut guard = match self.current_user_id.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = user_id.map(str::to_string);
    }

    /// Checks signature, issuer, audience and lifetime of `token`.
    fn validate(&self, token: &str, configuration: &OidcConfiguration) -> AuthorizeVerdict {
        let header = match jsonwebtoken::decode_header(token) {
            Ok(header) => header,
            Err(e) => {
                tracing::debug!(error = %e, "Bearer token header could not be decoded");
                return AuthorizeVerdict::unauthorized(TokenRejection::Invalid);
            }
        };

        // A named key must exist; an unnamed token is tried against every key.
        let candidates: Vec<&SigningKey> = match header.kid.as_deref() {
            Some(kid) => configuration.key_by_id(kid).into_iter().collect(),
            None => configuration.signing_keys.iter().collect(),
        };

        let validation = self.validation_for(header.alg, &configuration.issuer);

        for candidate in candidates {
            if candidate.algorithm.is_some_and(|alg| alg != header.alg) {
                continue;
            }
            match jsonwebtoken::decode::<Payload>(token, &candidate.key, &validation) {
                Ok(data) => {
                    return AuthorizeVerdict::Authorized {
                        token: ValidatedToken {
                            raw: token.to_string(),
                            header: data.header,
                        },
                        claims: Claims::from_payload(&data.claims),
                    };
                }
                Err(e) => match e.kind() {
                    // The key family does not fit this token; try the next key.
                    ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => continue,
                    kind => return AuthorizeVerdict::unauthorized(rejection_for(kind)),
                },
            }
        }

        AuthorizeVerdict::unauthorized(TokenRejection::SignatureInvalid)
    }

    fn validation_for(&self, algorithm: Algorithm, issuer: &str) -> Validation {
        let mut validation = Validation::new(algorithm);
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[self.valid_audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.leeway = self.clock_skew.as_secs();
        validation
    }
}

// ---------------------------------------------------------------------------
// Unverified expiry check
// ---------------------------------------------------------------------------

/// Reads `exp` from a JWT without verifying it and compares it with `now`.
///
/// This is a scheduling hint only, for example to decide whether a token
/// held elsewhere is worth presenting. It proves nothing about the token.
///
/// # Errors
///
/// Returns [`TokenKeeperError::TokenFormat`] if `jwt` is not a three-part
/// compact JWT, its payload is not base64url JSON, or it has no numeric
/// `exp` claim.
///
/// # Examples
///
/// ```
/// use tokenkeeper::auth::validator::is_token_expired_at;
///
/// // {"alg":"none"} . {"exp":1000} . (no signature)
/// let jwt = "eyJhbGciOiJub25lIn0.eyJleHAiOjEwMDB9.";
/// assert!(is_token_expired_at(jwt, 1000).unwrap());
/// assert!(!is_token_expired_at(jwt, 999).unwrap());
/// ```
pub fn is_token_expired_at(jwt: &str, now: i64) -> Result<bool> {
    let parts: Vec<&str> = jwt.trim().split('.').collect();
    if parts.len() != 3 {
        return Err(TokenKeeperError::TokenFormat(format!(
            "expected 3 dot-separated segments, found {}",
            parts.len()
        ))
        .into());
    }

    let payload = URL_SAFE_NO_PAD
        .decode(parts[1].trim_end_matches('='))
        .map_err(|e| TokenKeeperError::TokenFormat(format!("payload is not base64url: {e}")))?;
    let payload: Payload = serde_json::from_slice(&payload)
        .map_err(|e| TokenKeeperError::TokenFormat(format!("payload is not a JSON object: {e}")))?;

    let exp = payload
        .get("exp")
        .and_then(|exp| exp.as_i64().or_else(|| exp.as_f64().map(|f| f as i64)))
        .ok_or_else(|| TokenKeeperError::TokenFormat("token has no exp claim".to_string()))?;

    Ok(exp <= now)
}

/// [`is_token_expired_at`] against the current time.
///
/// # Errors
///
/// Same as [`is_token_expired_at`].
pub fn is_token_expired(jwt: &str) -> Result<bool> {
    is_token_expired_at(jwt, Utc::now().timestamp())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn unsigned_jwt(payload: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload.to_string());
        format!("{header}.{body}.")
    }

    #[test]
    fn test_is_token_expired_past_and_future() {
        let now = Utc::now().timestamp();
        let expired = unsigned_jwt(serde_json::json!({ "exp": now - 10 }));
        let live = unsigned_jwt(serde_json::json!({ "exp": now + 3600 }));
        assert!(is_token_expired(&expired).unwrap());
        assert!(!is_token_expired(&live).unwrap());
    }

    #[test]
    fn test_is_token_expired_requires_exp() {
        let jwt = unsigned_jwt(serde_json::json!({ "sub": "user" }));
        let err = is_token_expired(&jwt).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TokenKeeperError>(),
            Some(TokenKeeperError::TokenFormat(_))
        ));
    }

    #[test]
    fn test_is_token_expired_rejects_non_jwt() {
        assert!(is_token_expired("not-a-jwt").is_err());
        assert!(is_token_expired("a.!!!.c").is_err());
    }

    // End-to-end authorization against a mock identity provider is covered in
    // tests/validator_test.rs.

    #[test]
    fn test_parse_bearer_header_extracts_token() {
        assert_eq!(parse_bearer_header("Bearer abc"), Ok("abc"));
    }

    #[test]
    fn test_parse_bearer_header_trims_token() {
        assert_eq!(parse_bearer_header("Bearer  abc  "), Ok("abc"));
    }

    #[test]
    fn test_parse_bearer_header_empty_is_missing() {
        assert_eq!(parse_bearer_header(""), Err(HeaderError::Missing));
    }

    #[test]
    fn test_parse_bearer_header_whitespace_is_missing() {
        assert_eq!(parse_bearer_header("   "), Err(HeaderError::Missing));
    }

    #[test]
    fn test_parse_bearer_header_shorter_than_prefix_is_missing() {
        assert_eq!(parse_bearer_header("Bearer"), Err(HeaderError::Missing));
        assert_eq!(parse_bearer_header("abc"), Err(HeaderError::Missing));
    }

    #[test]
    fn test_parse_bearer_header_prefix_only_is_missing() {
        assert_eq!(parse_bearer_header("Bearer "), Err(HeaderError::Missing));
        assert_eq!(parse_bearer_header("Bearer    "), Err(HeaderError::Missing));
    }

    #[test]
    fn test_parse_bearer_header_other_scheme_is_malformed() {
        assert_eq!(parse_bearer_header("Basic xyz"), Err(HeaderError::Malformed));
        assert_eq!(
            parse_bearer_header("bearer abc.def"),
            Err(HeaderError::Malformed)
        );
    }

    #[test]
    fn test_parse_bearer_header_multibyte_input_does_not_panic() {
        // Byte 7 falls inside a multi-byte character.
        assert_eq!(
            parse_bearer_header("Bearerééé token"),
            Err(HeaderError::Malformed)
        );
    }

    #[test]
    fn test_parse_bearer_header_control_characters_are_invalid() {
        assert_eq!(
            parse_bearer_header("Bearer abc\u{0}def"),
            Err(HeaderError::InvalidCharacters)
        );
    }

    #[test]
    fn test_parse_bearer_header_tab_only_is_missing() {
        assert_eq!(parse_bearer_header("Bearer \t"), Err(HeaderError::Missing));
    }

    #[test]
    fn test_rejection_for_maps_lifetime_errors() {
        assert_eq!(
            rejection_for(&ErrorKind::ExpiredSignature),
            TokenRejection::Expired
        );
        assert_eq!(
            rejection_for(&ErrorKind::ImmatureSignature),
            TokenRejection::InvalidLifetime
        );
        assert_eq!(
            rejection_for(&ErrorKind::MissingRequiredClaim("exp".to_string())),
            TokenRejection::InvalidLifetime
        );
    }

    #[test]
    fn test_rejection_for_maps_issuer_and_audience() {
        assert_eq!(
            rejection_for(&ErrorKind::InvalidIssuer),
            TokenRejection::InvalidIssuer
        );
        assert_eq!(
            rejection_for(&ErrorKind::MissingRequiredClaim("iss".to_string())),
            TokenRejection::InvalidIssuer
        );
        assert_eq!(
            rejection_for(&ErrorKind::InvalidAudience),
            TokenRejection::InvalidAudience
        );
        assert_eq!(
            rejection_for(&ErrorKind::MissingRequiredClaim("aud".to_string())),
            TokenRejection::InvalidAudience
        );
    }

    #[test]
    fn test_rejection_for_maps_everything_else_to_invalid() {
        assert_eq!(
            rejection_for(&ErrorKind::InvalidSignature),
            TokenRejection::SignatureInvalid
        );
        assert_eq!(rejection_for(&ErrorKind::InvalidToken), TokenRejection::Invalid);
        assert_eq!(
            rejection_for(&ErrorKind::InvalidAlgorithm),
            TokenRejection::Invalid
        );
    }
}
