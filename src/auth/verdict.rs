//! Authorization verdicts and derived identity claims
//!
//! Every call to
//! [`BearerTokenValidator::authorize`](super::validator::BearerTokenValidator::authorize)
//! ends in exactly one [`AuthorizeVerdict`]. Failures are values here, not
//! errors: the validator never hands a raw error back to its caller.

use std::fmt;

use jsonwebtoken::Header;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

/// Claim type that carries the subject identifier in a JWT.
pub const SUBJECT_CLAIM: &str = "sub";

/// The standard name-identifier claim type, used when a token carries no
/// `sub`.
pub const NAME_IDENTIFIER_CLAIM: &str =
    "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/nameidentifier";

/// Machine-readable error code for rejected tokens.
pub const INVALID_TOKEN: &str = "invalid_token";

/// Machine-readable error code for malformed requests.
pub const INVALID_REQUEST: &str = "invalid_request";

/// Machine-readable error code for failures on our side.
pub const INTERNAL_SERVER_ERROR: &str = "internal_server_error";

// ---------------------------------------------------------------------------
// Claims
// ---------------------------------------------------------------------------

/// One `(type, value)` identity attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    /// Claim type, e.g. `sub` or `email`.
    #[serde(rename = "type")]
    pub claim_type: String,

    /// Claim value rendered as a string.
    pub value: String,
}

/// The ordered claim set extracted from a validated token.
///
/// Claims are ordered by type; an array-valued claim contributes one entry
/// per element, in array order.
///
/// # Examples
///
/// ```
/// use tokenkeeper::auth::verdict::Claims;
///
/// let payload = serde_json::json!({ "sub": "user-42", "roles": ["admin", "ops"] });
/// let claims = Claims::from_payload(payload.as_object().unwrap());
///
/// assert_eq!(claims.user_id(), Some("user-42"));
/// assert_eq!(claims.find_all("roles").collect::<Vec<_>>(), vec!["admin", "ops"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Claims(Vec<Claim>);

impl Claims {
    /// Flattens a decoded JWT payload into claims.
    pub fn from_payload(payload: &serde_json::Map<String, serde_json::Value>) -> Self {
        let mut claims = Vec::with_capacity(payload.len());
        for (claim_type, value) in payload {
            match value {
                serde_json::Value::Array(items) => {
                    for item in items {
                        claims.push(Claim {
                            claim_type: claim_type.clone(),
                            value: claim_value(item),
                        });
                    }
                }
                other => claims.push(Claim {
                    claim_type: claim_type.clone(),
                    value: claim_value(other),
                }),
            }
        }
        claims.sort_by(|a, b| a.claim_type.cmp(&b.claim_type));
        Self(claims)
    }

    /// First value of `claim_type`, if present.
    pub fn find(&self, claim_type: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|c| c.claim_type == claim_type)
            .map(|c| c.value.as_str())
    }

    /// Every value of `claim_type`, in order.
    pub fn find_all<'a>(&'a self, claim_type: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |c| c.claim_type == claim_type)
            .map(|c| c.value.as_str())
    }

    /// The user id: `sub`, falling back to the name-identifier claim.
    pub fn user_id(&self) -> Option<&str> {
        self.find(SUBJECT_CLAIM)
            .or_else(|| self.find(NAME_IDENTIFIER_CLAIM))
    }

    /// Iterates over every claim.
    pub fn iter(&self) -> std::slice::Iter<'_, Claim> {
        self.0.iter()
    }

    /// Number of claims.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when there are no claims.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn claim_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// ValidatedToken
// ---------------------------------------------------------------------------

/// A bearer token whose signature, issuer, audience and lifetime checked out.
#[derive(Debug, Clone)]
pub struct ValidatedToken {
    /// The compact JWT as presented by the caller.
    pub raw: String,

    /// The decoded JOSE header.
    pub header: Header,
}

impl ValidatedToken {
    /// The `kid` the token was signed with, if the header named one.
    pub fn key_id(&self) -> Option<&str> {
        self.header.kid.as_deref()
    }
}

// ---------------------------------------------------------------------------
// TokenRejection
// ---------------------------------------------------------------------------

/// Why a bearer token was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRejection {
    /// No token was supplied.
    MissingToken,
    /// The header is not a `Bearer` credential.
    MalformedToken,
    /// No trusted key verifies the signature.
    SignatureInvalid,
    /// The token is past its `exp`.
    Expired,
    /// The token is not yet valid or has no expiry.
    InvalidLifetime,
    /// `iss` is missing or not the configured issuer.
    InvalidIssuer,
    /// `aud` is missing or not the configured audience.
    InvalidAudience,
    /// Any other validation failure.
    Invalid,
}

impl TokenRejection {
    /// Human-readable description reported as `error_description`.
    pub fn description(self) -> &'static str {
        match self {
            Self::MissingToken => "The request is missing a required token.",
            Self::MalformedToken => "The request contains a malformed token.",
            Self::SignatureInvalid => "The token signature is invalid.",
            Self::Expired => "The token has expired.",
            Self::InvalidLifetime => "The token's lifetime is invalid.",
            Self::InvalidIssuer => "The token issuer is invalid.",
            Self::InvalidAudience => "The token audience is invalid.",
            Self::Invalid => "The token is invalid.",
        }
    }
}

impl fmt::Display for TokenRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

// ---------------------------------------------------------------------------
// ErrorResponse
// ---------------------------------------------------------------------------

/// OAuth-style error body: `{"error": ..., "error_description": ...}`.
///
/// # Examples
///
/// ```
/// use tokenkeeper::auth::verdict::ErrorResponse;
///
/// let body = ErrorResponse::new("invalid_token", None);
/// assert_eq!(serde_json::to_string(&body).unwrap(), r#"{"error":"invalid_token"}"#);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code such as `invalid_token`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl ErrorResponse {
    /// Builds an error body from a code and an optional description.
    pub fn new(error: impl Into<String>, description: Option<String>) -> Self {
        Self {
            error: Some(error.into()),
            error_description: description,
        }
    }
}

// ---------------------------------------------------------------------------
// AuthorizeVerdict
// ---------------------------------------------------------------------------

/// Outcome of one bearer token authorization attempt.
#[derive(Debug, Clone)]
pub enum AuthorizeVerdict {
    /// The token is valid; its claims travel with the verdict.
    Authorized {
        /// The validated token.
        token: ValidatedToken,
        /// Claims extracted from the token payload.
        claims: Claims,
    },

    /// The token is missing or failed validation (401).
    Unauthorized {
        /// What was wrong with the token.
        reason: TokenRejection,
    },

    /// The request itself is unusable (400).
    InvalidRequest {
        /// Human-readable description.
        message: String,
    },

    /// Authorization could not be decided because of a failure on our side
    /// (500).
    InternalError {
        /// Human-readable description.
        message: String,
    },
}

impl AuthorizeVerdict {
    /// Builds an `Unauthorized` verdict.
    pub fn unauthorized(reason: TokenRejection) -> Self {
        Self::Unauthorized { reason }
    }

    /// Returns `true` for [`AuthorizeVerdict::Authorized`].
    pub fn is_authorized(&self) -> bool {
        matches!(self, Self::Authorized { .. })
    }

    /// HTTP status equivalent of this verdict.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Authorized { .. } => StatusCode::OK,
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Self::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The claims of an authorized token.
    pub fn claims(&self) -> Option<&Claims> {
        match self {
            Self::Authorized { claims, .. } => Some(claims),
            _ => None,
        }
    }

    /// The validated token of an authorized verdict.
    pub fn validated_token(&self) -> Option<&ValidatedToken> {
        match self {
            Self::Authorized { token, .. } => Some(token),
            _ => None,
        }
    }

    /// The user id derived from an authorized token's claims.
    pub fn user_id(&self) -> Option<&str> {
        self.claims().and_then(Claims::user_id)
    }

    /// The rejection reason of an unauthorized verdict.
    pub fn rejection(&self) -> Option<TokenRejection> {
        match self {
            Self::Unauthorized { reason } => Some(*reason),
            _ => None,
        }
    }

    /// Machine-readable error code, `None` when authorized.
    pub fn error_code(&self) -> Option<&'static str> {
        match self {
            Self::Authorized { .. } => None,
            Self::Unauthorized { .. } => Some(INVALID_TOKEN),
            Self::InvalidRequest { .. } => Some(INVALID_REQUEST),
            Self::InternalError { .. } => Some(INTERNAL_SERVER_ERROR),
        }
    }

    /// Human-readable description, `None` when authorized.
    pub fn error_description(&self) -> Option<&str> {
        match self {
            Self::Authorized { .. } => None,
            Self::Unauthorized { reason } => Some(reason.description()),
            Self::InvalidRequest { message } | Self::InternalError { message } => {
                Some(message.as_str())
            }
        }
    }

    /// The error body to send back for a failed authorization.
    pub fn error_response(&self) -> Option<ErrorResponse> {
        let code = self.error_code()?;
        Some(ErrorResponse::new(
            code,
            self.error_description().map(str::to_string),
        ))
    }

    /// The serializable shape handed to callers outside this crate.
    pub fn to_wire(&self) -> VerdictBody {
        let status = match self {
            Self::Authorized { .. } => VerdictStatus::Authorized,
            Self::Unauthorized { .. } | Self::InvalidRequest { .. } => VerdictStatus::Unauthorized,
            Self::InternalError { .. } => VerdictStatus::InternalError,
        };
        VerdictBody {
            status,
            status_code: self.status_code().as_u16(),
            error: self.error_code().map(str::to_string),
            error_description: self.error_description().map(str::to_string),
            claims: self.claims().cloned(),
            key_id: self
                .validated_token()
                .and_then(ValidatedToken::key_id)
                .map(str::to_string),
        }
    }
}

/// Coarse verdict classification on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    /// 200-class.
    Authorized,
    /// 400 or 401.
    Unauthorized,
    /// 500.
    InternalError,
}

/// Wire representation of an [`AuthorizeVerdict`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictBody {
    /// Coarse classification.
    pub status: VerdictStatus,

    /// HTTP status equivalent.
    pub status_code: u16,

    /// Machine-readable error code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,

    /// Claims, present only when authorized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claims: Option<Claims>,

    /// `kid` of the key that verified the token, when the token named one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn claims_of(json: serde_json::Value) -> Claims {
        Claims::from_payload(json.as_object().unwrap())
    }

    fn authorized(json: serde_json::Value) -> AuthorizeVerdict {
        AuthorizeVerdict::Authorized {
            token: ValidatedToken {
                raw: "a.b.c".to_string(),
                header: Header::default(),
            },
            claims: claims_of(json),
        }
    }

    #[test]
    fn test_claims_are_ordered_by_type_and_flatten_arrays() {
        let claims = claims_of(serde_json::json!({
            "sub": "u1",
            "aud": ["api", "admin"],
            "exp": 1700000000
        }));
        let rendered: Vec<(&str, &str)> = claims
            .iter()
            .map(|c| (c.claim_type.as_str(), c.value.as_str()))
            .collect();
        assert_eq!(
            rendered,
            vec![
                ("aud", "api"),
                ("aud", "admin"),
                ("exp", "1700000000"),
                ("sub", "u1")
            ]
        );
    }

    #[test]
    fn test_claim_order_does_not_depend_on_payload_order() {
        let mut payload = serde_json::Map::new();
        payload.insert("sub".to_string(), serde_json::json!("u1"));
        payload.insert("role".to_string(), serde_json::json!(["writer", "reader"]));
        payload.insert("aud".to_string(), serde_json::json!("api"));

        let rendered: Vec<(String, String)> = Claims::from_payload(&payload)
            .iter()
            .map(|c| (c.claim_type.clone(), c.value.clone()))
            .collect();
        assert_eq!(
            rendered,
            vec![
                ("aud".to_string(), "api".to_string()),
                ("role".to_string(), "writer".to_string()),
                ("role".to_string(), "reader".to_string()),
                ("sub".to_string(), "u1".to_string()),
            ]
        );
    }

    #[test]
    fn test_user_id_prefers_sub() {
        let claims = claims_of(serde_json::json!({
            "sub": "from-sub",
            NAME_IDENTIFIER_CLAIM: "from-name-id"
        }));
        assert_eq!(claims.user_id(), Some("from-sub"));
    }

    #[test]
    fn test_user_id_falls_back_to_name_identifier() {
        let claims = claims_of(serde_json::json!({ NAME_IDENTIFIER_CLAIM: "from-name-id" }));
        assert_eq!(claims.user_id(), Some("from-name-id"));
    }

    #[test]
    fn test_user_id_absent() {
        let claims = claims_of(serde_json::json!({ "email": "a@example.com" }));
        assert_eq!(claims.user_id(), None);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            authorized(serde_json::json!({})).status_code(),
            StatusCode::OK
        );
        assert_eq!(
            AuthorizeVerdict::unauthorized(TokenRejection::Expired).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthorizeVerdict::InvalidRequest {
                message: "bad".to_string()
            }
            .status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AuthorizeVerdict::InternalError {
                message: "boom".to_string()
            }
            .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_unauthorized_always_uses_invalid_token_code() {
        for reason in [
            TokenRejection::MissingToken,
            TokenRejection::MalformedToken,
            TokenRejection::SignatureInvalid,
            TokenRejection::Expired,
            TokenRejection::InvalidLifetime,
            TokenRejection::InvalidIssuer,
            TokenRejection::InvalidAudience,
            TokenRejection::Invalid,
        ] {
            let verdict = AuthorizeVerdict::unauthorized(reason);
            assert_eq!(verdict.error_code(), Some(INVALID_TOKEN));
            assert_eq!(verdict.error_description(), Some(reason.description()));
        }
    }

    #[test]
    fn test_error_response_for_authorized_is_none() {
        assert!(authorized(serde_json::json!({})).error_response().is_none());
    }

    #[test]
    fn test_wire_shape_for_unauthorized() {
        let body = AuthorizeVerdict::unauthorized(TokenRejection::Expired).to_wire();
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "status": "unauthorized",
                "status_code": 401,
                "error": "invalid_token",
                "error_description": "The token has expired."
            })
        );
    }

    #[test]
    fn test_wire_shape_for_invalid_request_reports_unauthorized_400() {
        let body = AuthorizeVerdict::InvalidRequest {
            message: "bad header".to_string(),
        }
        .to_wire();
        assert_eq!(body.status, VerdictStatus::Unauthorized);
        assert_eq!(body.status_code, 400);
        assert_eq!(body.error.as_deref(), Some(INVALID_REQUEST));
    }

    #[test]
    fn test_wire_shape_for_authorized_carries_claims() {
        let body = authorized(serde_json::json!({ "sub": "user-42" })).to_wire();
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "status": "authorized",
                "status_code": 200,
                "claims": [{ "type": "sub", "value": "user-42" }]
            })
        );
    }

    #[test]
    fn test_wire_shape_carries_key_id_when_present() {
        let mut header = Header::default();
        header.kid = Some("signing-key-1".to_string());
        let verdict = AuthorizeVerdict::Authorized {
            token: ValidatedToken {
                raw: "a.b.c".to_string(),
                header,
            },
            claims: claims_of(serde_json::json!({ "sub": "user-42" })),
        };

        let body = verdict.to_wire();
        assert_eq!(body.key_id.as_deref(), Some("signing-key-1"));

        let unauthorized = AuthorizeVerdict::Unauthorized {
            reason: TokenRejection::Expired,
        };
        assert!(unauthorized.to_wire().key_id.is_none());
    }

    #[test]
    fn test_error_response_serialization_skips_missing_fields() {
        let body = ErrorResponse::default();
        assert_eq!(serde_json::to_string(&body).unwrap(), "{}");
    }
}
