//! Command handler integration tests using wiremock
//!
//! The outbound identity provider and the inbound token issuer may be
//! different servers; each command must talk to the right one.

mod common;

use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tokenkeeper::auth::grant::ClientIdentity;
use tokenkeeper::commands;
use tokenkeeper::config::{AuthorizationConfig, Config};

use common::token_body;

fn split_config(identity_server: &MockServer, inbound_issuer: &MockServer) -> Config {
    Config {
        identity_server: ClientIdentity {
            authority: identity_server.uri(),
            client_id: "billing-service".to_string(),
            client_secret: "s3cr3t".to_string(),
            scope: "invoices.read".to_string(),
        },
        authorization: AuthorizationConfig {
            valid_audience: common::AUDIENCE.to_string(),
            oidc_metadata_url: format!(
                "{}/.well-known/openid-configuration",
                inbound_issuer.uri()
            ),
            ..AuthorizationConfig::default()
        },
        ..Config::default()
    }
}

#[tokio::test]
async fn test_token_command_discovers_from_authority() {
    let idp = MockServer::start().await;
    common::mount_discovery(&idp).await;
    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body(
            "outbound-token",
            "refresh-1",
            3600,
        )))
        .expect(1)
        .mount(&idp)
        .await;

    let inbound = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&inbound)
        .await;

    let config = split_config(&idp, &inbound);
    commands::token::run_token(config, false).await.unwrap();
}

#[tokio::test]
async fn test_token_manager_ignores_inbound_metadata_url() {
    let idp = MockServer::start().await;
    common::mount_discovery(&idp).await;
    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body(
            "outbound-token",
            "refresh-1",
            3600,
        )))
        .mount(&idp)
        .await;
    let inbound = MockServer::start().await;

    let config = split_config(&idp, &inbound);
    let manager = config.token_manager(config.http_client().unwrap()).unwrap();

    assert!(manager.metadata_url().as_str().starts_with(&idp.uri()));
    assert_eq!(manager.get_token().await.unwrap(), "outbound-token");
}
