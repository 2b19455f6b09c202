//! Shared helpers for the integration tests
//!
//! A [`MockServer`] plays the identity provider: it serves the discovery
//! document, the key set from `tests/fixtures/jwks.json` and, when a test
//! mounts one, the token endpoint.

use std::sync::Arc;

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tokenkeeper::auth::discovery::DiscoveryCache;

/// `kid` of the key published in `jwks.json`.
pub const SIGNING_KEY_ID: &str = "signing-key-1";

/// Audience the test validators accept.
pub const AUDIENCE: &str = "orders-api";

const SIGNING_KEY_PEM: &[u8] = include_bytes!("../fixtures/signing_key.pem");
const ROGUE_KEY_PEM: &[u8] = include_bytes!("../fixtures/rogue_key.pem");
const JWKS: &str = include_str!("../fixtures/jwks.json");

/// Discovery document whose endpoints all live on `base_url`.
#[allow(dead_code)]
pub fn discovery_body(base_url: &str) -> serde_json::Value {
    serde_json::json!({
        "issuer": base_url,
        "token_endpoint": format!("{}/connect/token", base_url),
        "jwks_uri": format!("{}/.well-known/jwks", base_url),
        "grant_types_supported": ["client_credentials", "refresh_token"]
    })
}

/// Mounts the discovery document and key set on `server`.
#[allow(dead_code)]
pub async fn mount_discovery(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(discovery_body(&server.uri())))
        .mount(server)
        .await;

    mount_jwks(server).await;
}

/// Mounts only the key set on `server`.
#[allow(dead_code)]
pub async fn mount_jwks(server: &MockServer) {
    let jwks: serde_json::Value = serde_json::from_str(JWKS).expect("fixture jwks.json is JSON");
    Mock::given(method("GET"))
        .and(path("/.well-known/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks))
        .mount(server)
        .await;
}

/// Discovery cache pointed at `server`.
#[allow(dead_code)]
pub fn discovery_for(server: &MockServer) -> Arc<DiscoveryCache> {
    Arc::new(
        DiscoveryCache::for_authority(reqwest::Client::new(), &server.uri())
            .expect("mock server URI is a valid authority"),
    )
}

/// Seconds since the Unix epoch.
#[allow(dead_code)]
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Claims for a token that passes validation against `server`.
#[allow(dead_code)]
pub fn valid_claims(server: &MockServer) -> serde_json::Value {
    serde_json::json!({
        "iss": server.uri(),
        "aud": AUDIENCE,
        "sub": "user-42",
        "exp": now() + 3600,
        "iat": now(),
        "scope": ["orders.read", "orders.write"]
    })
}

/// Signs `claims` with the published key under `kid`.
#[allow(dead_code)]
pub fn sign_with_kid(claims: &serde_json::Value, kid: Option<&str>) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = kid.map(str::to_string);
    let key = EncodingKey::from_rsa_pem(SIGNING_KEY_PEM).expect("fixture key is valid PEM");
    encode(&header, claims, &key).expect("token signs")
}

/// Signs `claims` with the published key.
#[allow(dead_code)]
pub fn sign(claims: &serde_json::Value) -> String {
    sign_with_kid(claims, Some(SIGNING_KEY_ID))
}

/// Signs `claims` with a key the provider never published, claiming the
/// published `kid`.
#[allow(dead_code)]
pub fn sign_with_rogue_key(claims: &serde_json::Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(SIGNING_KEY_ID.to_string());
    let key = EncodingKey::from_rsa_pem(ROGUE_KEY_PEM).expect("fixture key is valid PEM");
    encode(&header, claims, &key).expect("token signs")
}

/// Successful token endpoint body.
#[allow(dead_code)]
pub fn token_body(access_token: &str, refresh_token: &str, expires_in: u64) -> serde_json::Value {
    serde_json::json!({
        "access_token": access_token,
        "refresh_token": refresh_token,
        "expires_in": expires_in,
        "token_type": "Bearer"
    })
}
