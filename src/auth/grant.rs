//! OAuth 2.0 token endpoint grants
//!
//! This module issues the two grants a [`TokenManager`] needs:
//!
//! - `client_credentials` to acquire a token as the service itself;
//! - `refresh_token` to exchange a refresh token for a new access token.
//!
//! Both are form-encoded POSTs to the token endpoint taken from discovery.
//! A refresh the authorization server refuses is not an error: it comes back
//! as [`RefreshOutcome::Rejected`] so the caller can fall back to a fresh
//! client-credentials grant.
//!
//! [`TokenManager`]: super::manager::TokenManager

use std::fmt;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, TokenKeeperError};

// ---------------------------------------------------------------------------
// ClientIdentity
// ---------------------------------------------------------------------------

/// The outbound identity a token manager authenticates as.
///
/// # Examples
///
/// ```
/// use tokenkeeper::auth::grant::ClientIdentity;
///
/// let identity = ClientIdentity {
///     authority: "https://auth.example.com".to_string(),
///     client_id: "billing-service".to_string(),
///     client_secret: "s3cr3t".to_string(),
///     scope: "invoices.read".to_string(),
/// };
///
/// // The secret never shows up in debug output.
/// assert!(!format!("{identity:?}").contains("s3cr3t"));
/// ```
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ClientIdentity {
    /// Base URL of the identity provider.
    #[serde(default)]
    pub authority: String,

    /// OAuth client identifier.
    #[serde(default)]
    pub client_id: String,

    /// OAuth client secret.
    #[serde(default)]
    pub client_secret: String,

    /// Space-separated scopes requested with the client-credentials grant.
    #[serde(default)]
    pub scope: String,
}

impl fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("authority", &self.authority)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("scope", &self.scope)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Token endpoint responses
// ---------------------------------------------------------------------------

/// Raw JSON body from the token endpoint, success or error.
#[derive(Debug, Default, Deserialize)]
struct RawTokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

impl RawTokenResponse {
    fn describe_error(&self) -> String {
        match (&self.error, &self.error_description) {
            (Some(error), Some(description)) => format!("{error}: {description}"),
            (Some(error), None) => error.clone(),
            (None, Some(description)) => description.clone(),
            (None, None) => "no error details".to_string(),
        }
    }

    /// Checks that every field a usable token needs is present.
    fn into_complete(self) -> std::result::Result<TokenResponse, String> {
        if let Some(ref error) = self.error {
            return Err(format!("token endpoint reported {error}"));
        }
        let access_token = self
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| "response is missing access_token".to_string())?;
        let refresh_token = self
            .refresh_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| "response is missing refresh_token".to_string())?;
        let expires_in = self
            .expires_in
            .ok_or_else(|| "response is missing expires_in".to_string())?;

        Ok(TokenResponse {
            access_token,
            refresh_token,
            expires_in,
        })
    }
}

/// A complete, successful token endpoint response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenResponse {
    /// The new access token.
    pub access_token: String,

    /// The refresh token to use once the access token expires.
    pub refresh_token: String,

    /// Access token lifetime in seconds.
    pub expires_in: u64,
}

/// Result of a refresh-token grant that reached the authorization server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The refresh token was accepted.
    Refreshed(TokenResponse),

    /// The authorization server refused the refresh token itself. Carries the
    /// server's reason for logging.
    Rejected(String),
}

/// Returns `true` when a refresh failure means the refresh token is no longer
/// usable: 401, 403, or 400 with `invalid_grant`.
fn is_refresh_rejection(status: StatusCode, error: Option<&str>) -> bool {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => true,
        StatusCode::BAD_REQUEST => error == Some("invalid_grant"),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// TokenGrant
// ---------------------------------------------------------------------------

/// Issues token endpoint grants for one [`ClientIdentity`].
///
/// `TokenGrant` holds no token state; caching is the job of
/// [`TokenManager`](super::manager::TokenManager).
pub struct TokenGrant {
    http: reqwest::Client,
    identity: ClientIdentity,
}

impl TokenGrant {
    /// Creates a grant issuer for `identity`.
    pub fn new(http: reqwest::Client, identity: ClientIdentity) -> Self {
        Self { http, identity }
    }

    /// The identity this grant issuer authenticates as.
    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    /// Requests a token with the `client_credentials` grant.
    ///
    /// # Errors
    ///
    /// Returns [`TokenKeeperError::Acquisition`] if the request cannot be
    /// sent, the endpoint answers with an error, or the response lacks the
    /// access token, the refresh token or `expires_in`.
    pub async fn client_credentials(&self, token_endpoint: &Url) -> Result<TokenResponse> {
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.identity.client_id.as_str()),
            ("client_secret", self.identity.client_secret.as_str()),
            ("scope", self.identity.scope.as_str()),
        ];

        let resp = self
            .http
            .post(token_endpoint.clone())
            .form(&params)
            .send()
            .await
            .map_err(|e| TokenKeeperError::Acquisition(format!("token request failed: {e}")))?;

        let status = resp.status();
        let raw = read_token_body(resp).await;

        if !status.is_success() {
            return Err(TokenKeeperError::Acquisition(format!(
                "token endpoint returned {status}: {}",
                raw.describe_error()
            ))
            .into());
        }

        raw.into_complete().map_err(|reason| {
            TokenKeeperError::Acquisition(format!("client credentials grant failed: {reason}"))
                .into()
        })
    }

    /// Exchanges `refresh_token` for a new access token.
    ///
    /// # Returns
    ///
    /// [`RefreshOutcome::Refreshed`] on success, [`RefreshOutcome::Rejected`]
    /// when the server refuses the refresh token.
    ///
    /// # Errors
    ///
    /// Returns [`TokenKeeperError::Acquisition`] for transport failures, any
    /// other error status, and incomplete success responses.
    pub async fn refresh(&self, token_endpoint: &Url, refresh_token: &str) -> Result<RefreshOutcome> {
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.identity.client_id.as_str()),
            ("client_secret", self.identity.client_secret.as_str()),
            ("refresh_token", refresh_token),
        ];

        let resp = self
            .http
            .post(token_endpoint.clone())
            .form(&params)
            .send()
            .await
            .map_err(|e| TokenKeeperError::Acquisition(format!("refresh request failed: {e}")))?;

        let status = resp.status();
        let raw = read_token_body(resp).await;

        if !status.is_success() {
            if is_refresh_rejection(status, raw.error.as_deref()) {
                return Ok(RefreshOutcome::Rejected(format!(
                    "{status}: {}",
                    raw.describe_error()
                )));
            }
            return Err(TokenKeeperError::Acquisition(format!(
                "refresh endpoint returned {status}: {}",
                raw.describe_error()
            ))
            .into());
        }

        raw.into_complete()
            .map(RefreshOutcome::Refreshed)
            .map_err(|reason| {
                TokenKeeperError::Acquisition(format!("refresh grant failed: {reason}")).into()
            })
    }
}

/// Reads a token endpoint body, tolerating non-JSON error pages.
async fn read_token_body(resp: reqwest::Response) -> RawTokenResponse {
    let text = resp.text().await.unwrap_or_default();
    serde_json::from_str(&text).unwrap_or_else(|_| RawTokenResponse {
        error_description: (!text.is_empty()).then_some(text),
        ..RawTokenResponse::default()
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // Request/response behaviour against a mock token endpoint is covered in
    // tests/token_manager_test.rs.

    fn raw(json: serde_json::Value) -> RawTokenResponse {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_into_complete_accepts_full_response() {
        let token = raw(serde_json::json!({
            "access_token": "a",
            "refresh_token": "r",
            "expires_in": 300,
            "token_type": "Bearer"
        }))
        .into_complete()
        .unwrap();
        assert_eq!(
            token,
            TokenResponse {
                access_token: "a".to_string(),
                refresh_token: "r".to_string(),
                expires_in: 300,
            }
        );
    }

    #[test]
    fn test_into_complete_requires_refresh_token() {
        let result = raw(serde_json::json!({
            "access_token": "a",
            "expires_in": 300
        }))
        .into_complete();
        assert!(result.unwrap_err().contains("refresh_token"));
    }

    #[test]
    fn test_into_complete_rejects_empty_access_token() {
        let result = raw(serde_json::json!({
            "access_token": "",
            "refresh_token": "r",
            "expires_in": 300
        }))
        .into_complete();
        assert!(result.unwrap_err().contains("access_token"));
    }

    #[test]
    fn test_into_complete_requires_expires_in() {
        let result = raw(serde_json::json!({
            "access_token": "a",
            "refresh_token": "r"
        }))
        .into_complete();
        assert!(result.unwrap_err().contains("expires_in"));
    }

    #[test]
    fn test_into_complete_reports_error_field() {
        let result = raw(serde_json::json!({ "error": "invalid_scope" })).into_complete();
        assert!(result.unwrap_err().contains("invalid_scope"));
    }

    #[test]
    fn test_describe_error_combines_fields() {
        let body = raw(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "refresh token revoked"
        }));
        assert_eq!(body.describe_error(), "invalid_grant: refresh token revoked");
        assert_eq!(RawTokenResponse::default().describe_error(), "no error details");
    }

    #[test]
    fn test_is_refresh_rejection_classification() {
        assert!(is_refresh_rejection(StatusCode::UNAUTHORIZED, None));
        assert!(is_refresh_rejection(StatusCode::FORBIDDEN, None));
        assert!(is_refresh_rejection(
            StatusCode::BAD_REQUEST,
            Some("invalid_grant")
        ));
        assert!(!is_refresh_rejection(
            StatusCode::BAD_REQUEST,
            Some("invalid_request")
        ));
        assert!(!is_refresh_rejection(StatusCode::INTERNAL_SERVER_ERROR, None));
        assert!(!is_refresh_rejection(StatusCode::SERVICE_UNAVAILABLE, None));
    }

    #[test]
    fn test_client_identity_debug_redacts_secret() {
        let identity = ClientIdentity {
            authority: "https://auth.example.com".to_string(),
            client_id: "svc".to_string(),
            client_secret: "hunter2".to_string(),
            scope: "api".to_string(),
        };
        let rendered = format!("{identity:?}");
        assert!(rendered.contains("svc"));
        assert!(!rendered.contains("hunter2"));
    }
}
