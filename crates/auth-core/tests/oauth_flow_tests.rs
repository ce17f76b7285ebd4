//! OAuth authorization-code flow against a mock provider

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use common::*;
use identity_auth_core::config::{AuthConfig, OAuthProviderConfig};
use identity_auth_core::store::{InMemoryGrantStore, InMemoryUserStore, UserStore};
use identity_auth_core::types::{AuthOutcome, AuthPayload, AuthType, OAuthPayload};
use identity_auth_core::{AuthError, AuthService, RequestContext};
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn acme_config(server: &MockServer, attribute_mapping: HashMap<String, String>) -> AuthConfig {
    let mut config = base_config();
    config.auth_type = AuthType::OAuth;
    config.oauth.providers.insert(
        "acme".to_string(),
        OAuthProviderConfig {
            client_id: "lms-client".into(),
            client_secret: "lms-secret".into(),
            redirect_uri: "https://lms.example.com/oauth/callback".into(),
            scopes: vec!["openid".into(), "email".into()],
            auth_url: format!("{}/authorize", server.uri()),
            token_url: format!("{}/token", server.uri()),
            userinfo_url: format!("{}/userinfo", server.uri()),
            attribute_mapping,
            tenant: None,
        },
    );
    config
}

async fn mount_provider(server: &MockServer, userinfo: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=good-code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "provider-at",
            "refresh_token": "provider-rt",
            "expires_in": 3600,
            "token_type": "Bearer"
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .and(header("authorization", "Bearer provider-at"))
        .respond_with(ResponseTemplate::new(200).set_body_json(userinfo))
        .mount(server)
        .await;
}

fn start() -> AuthPayload {
    AuthPayload::OAuth(OAuthPayload {
        provider: "acme".to_string(),
        code: None,
        state: None,
    })
}

fn callback(code: &str, state: &str) -> AuthPayload {
    AuthPayload::OAuth(OAuthPayload {
        provider: "acme".to_string(),
        code: Some(code.to_string()),
        state: Some(state.to_string()),
    })
}

async fn issued_state(service: &AuthService, ctx: &RequestContext) -> String {
    match service.authenticate(ctx, None, start()).await.unwrap() {
        AuthOutcome::Redirect(redirect) => redirect.state.unwrap(),
        other => panic!("expected redirect, got {:?}", other),
    }
}

#[tokio::test]
async fn test_start_redirects_to_provider_with_state() {
    let server = MockServer::start().await;
    let service = AuthService::builder(acme_config(&server, HashMap::new()))
        .build()
        .await
        .unwrap();

    let outcome = service.authenticate(&RequestContext::new(), None, start()).await.unwrap();
    let AuthOutcome::Redirect(redirect) = outcome else {
        panic!("expected redirect");
    };
    let state = redirect.state.clone().unwrap();
    let url = reqwest::Url::parse(&redirect.url).unwrap();
    let query: HashMap<_, _> = url.query_pairs().into_owned().collect();

    assert_eq!(url.path(), "/authorize");
    assert_eq!(query["client_id"], "lms-client");
    assert_eq!(query["response_type"], "code");
    assert_eq!(query["scope"], "openid email");
    assert_eq!(query["state"], state);
    assert!(redirect.saml_request.is_none());

    // a redirect is not an authentication result
    let snapshot = service.metrics();
    assert_eq!(snapshot.authentications_succeeded + snapshot.authentications_failed, 0);
}

#[tokio::test]
async fn test_callback_provisions_user_and_stores_grant() {
    let server = MockServer::start().await;
    mount_provider(
        &server,
        json!({"sub": "acme-7", "email": "erin@example.com", "given_name": "Erin", "family_name": "Hale"}),
    )
    .await;
    let users = Arc::new(InMemoryUserStore::new());
    let grants = Arc::new(InMemoryGrantStore::new());
    let service = AuthService::builder(acme_config(&server, HashMap::new()))
        .user_store(users.clone())
        .grant_store(grants.clone())
        .build()
        .await
        .unwrap();
    let ctx = RequestContext::new();

    let state = issued_state(&service, &ctx).await;
    let outcome = service.authenticate(&ctx, None, callback("good-code", &state)).await.unwrap();
    let identity = outcome.identity().unwrap().clone();
    assert_eq!(identity.email, "erin@example.com");
    assert_eq!(identity.display_name, "Erin Hale");
    assert_eq!(identity.provider.as_deref(), Some("acme"));
    assert_eq!(identity.roles, vec!["user"]);

    let grant = service
        .session_manager()
        .oauth_grant(&identity.user_id, "acme")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(grant.provider_user_id, "acme-7");
    assert_eq!(grant.access_token, "provider-at");
    assert_eq!(grant.refresh_token.as_deref(), Some("provider-rt"));

    // a second login reuses the account and supersedes the grant
    let state = issued_state(&service, &ctx).await;
    let again = service.authenticate(&ctx, None, callback("good-code", &state)).await.unwrap();
    assert_eq!(again.identity().unwrap().user_id, identity.user_id);
    assert_eq!(users.user_count(), 1);
    assert_eq!(grants.len(), 1);

    let tokens = again.tokens().unwrap();
    let validated = service.validate_token(&ctx, &tokens.access_token).await.unwrap();
    assert_eq!(validated.provider.as_deref(), Some("acme"));
    assert_eq!(service.metrics().authentications_succeeded, 2);
}

#[tokio::test]
async fn test_state_is_single_use() {
    let server = MockServer::start().await;
    mount_provider(&server, json!({"sub": "acme-8", "email": "finn@example.com"})).await;
    let service = AuthService::builder(acme_config(&server, HashMap::new()))
        .build()
        .await
        .unwrap();
    let ctx = RequestContext::new();

    let state = issued_state(&service, &ctx).await;
    assert!(service.authenticate(&ctx, None, callback("good-code", &state)).await.is_ok());
    assert!(matches!(
        service.authenticate(&ctx, None, callback("good-code", &state)).await,
        Err(AuthError::AuthenticationFailed)
    ));
    assert!(matches!(
        service.authenticate(&ctx, None, callback("good-code", "never-issued")).await,
        Err(AuthError::AuthenticationFailed)
    ));
}

#[tokio::test]
async fn test_callback_without_state_is_rejected() {
    let server = MockServer::start().await;
    let service = AuthService::builder(acme_config(&server, HashMap::new()))
        .build()
        .await
        .unwrap();
    let payload = AuthPayload::OAuth(OAuthPayload {
        provider: "acme".to_string(),
        code: Some("good-code".to_string()),
        state: None,
    });

    assert!(matches!(
        service.authenticate(&RequestContext::new(), None, payload).await,
        Err(AuthError::AuthenticationFailed)
    ));
}

#[tokio::test]
async fn test_rejected_code_fails_authentication() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_grant"})))
        .mount(&server)
        .await;
    let service = AuthService::builder(acme_config(&server, HashMap::new()))
        .build()
        .await
        .unwrap();
    let ctx = RequestContext::new();

    let state = issued_state(&service, &ctx).await;
    assert!(matches!(
        service.authenticate(&ctx, None, callback("stale-code", &state)).await,
        Err(AuthError::AuthenticationFailed)
    ));
    assert_eq!(service.metrics().authentications_failed, 1);
}

#[tokio::test]
async fn test_provider_outage_is_upstream_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;
    let service = AuthService::builder(acme_config(&server, HashMap::new()))
        .build()
        .await
        .unwrap();
    let ctx = RequestContext::new();

    let state = issued_state(&service, &ctx).await;
    assert!(matches!(
        service.authenticate(&ctx, None, callback("good-code", &state)).await,
        Err(AuthError::Upstream(_))
    ));
}

#[tokio::test]
async fn test_attribute_mapping_overrides_defaults() {
    let server = MockServer::start().await;
    mount_provider(
        &server,
        json!({"uid": 991, "mail": "gwen@example.com", "email": "ignored@example.com", "first": "Gwen"}),
    )
    .await;
    let mapping = HashMap::from([
        ("id".to_string(), "uid".to_string()),
        ("email".to_string(), "mail".to_string()),
        ("first_name".to_string(), "first".to_string()),
    ]);
    let users = Arc::new(InMemoryUserStore::new());
    let service = AuthService::builder(acme_config(&server, mapping))
        .user_store(users.clone())
        .build()
        .await
        .unwrap();
    let ctx = RequestContext::new();

    let state = issued_state(&service, &ctx).await;
    let outcome = service.authenticate(&ctx, None, callback("good-code", &state)).await.unwrap();
    assert_eq!(outcome.identity().unwrap().email, "gwen@example.com");

    let user = users.get_user_by_email("gwen@example.com").await.unwrap().unwrap();
    assert_eq!(user.first_name, "Gwen");
    assert!(users.get_user_by_email("ignored@example.com").await.unwrap().is_none());

    let grant = service
        .session_manager()
        .oauth_grant(&user.id, "acme")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(grant.provider_user_id, "991");
}

#[tokio::test]
async fn test_unknown_provider_is_validation_error() {
    let server = MockServer::start().await;
    let service = AuthService::builder(acme_config(&server, HashMap::new()))
        .build()
        .await
        .unwrap();
    let payload = AuthPayload::OAuth(OAuthPayload {
        provider: "github".to_string(),
        code: None,
        state: None,
    });

    assert!(matches!(
        service.authenticate(&RequestContext::new(), None, payload).await,
        Err(AuthError::Validation(_))
    ));
}
