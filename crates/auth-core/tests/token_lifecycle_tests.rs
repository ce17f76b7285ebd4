//! Token issuance, revocation and refresh

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use identity_auth_core::config::RuntimeEnvironment;
use identity_auth_core::jwt::{JwtConfig, SecretValidator, TokenBlacklist, TokenService};
use identity_auth_core::store::{InMemorySharedCache, InMemoryUserStore};
use identity_auth_core::types::{AuthPayload, CredentialsPayload, Identity};
use identity_auth_core::{AuthError, AuthService, RequestContext};

fn identity() -> Identity {
    Identity {
        user_id: "user-42".to_string(),
        email: "carol@example.com".to_string(),
        display_name: "Carol".to_string(),
        roles: vec!["user".to_string(), "admin".to_string()],
        provider: None,
        groups: Vec::new(),
    }
}

fn token_service(cache: Arc<dyn identity_auth_core::store::SharedCache>) -> TokenService {
    let config = JwtConfig {
        secret: STRONG_SECRET.to_string(),
        ..Default::default()
    };
    TokenService::new(config, RuntimeEnvironment::Production, TokenBlacklist::new(cache)).unwrap()
}

async fn service_with_user() -> AuthService {
    let users = Arc::new(InMemoryUserStore::new());
    users
        .add_user("carol@example.com", "hunter2hunter2", "Carol", "Danvers", &["user"])
        .await
        .unwrap();
    AuthService::builder(base_config())
        .user_store(users)
        .build()
        .await
        .unwrap()
}

fn login(email: &str, password: &str) -> AuthPayload {
    AuthPayload::Credentials(CredentialsPayload {
        email: email.to_string(),
        password: password.to_string(),
    })
}

#[tokio::test]
async fn test_blacklisted_token_fails_immediately() {
    let service = token_service(Arc::new(InMemorySharedCache::new()));
    let pair = service.issue_pair(&identity()).unwrap();
    assert!(service.validate_access_token(&pair.access_token).await.is_ok());

    let signature = TokenBlacklist::signature_of(&pair.access_token).unwrap();
    service
        .blacklist()
        .add(signature, Duration::from_secs(900))
        .await
        .unwrap();

    assert!(matches!(
        service.validate_access_token(&pair.access_token).await,
        Err(AuthError::TokenRevoked)
    ));
    // the refresh token of the same pair is unaffected
    assert!(service.validate_refresh_token(&pair.refresh_token).await.is_ok());
}

#[tokio::test]
async fn test_logout_then_validate() {
    let service = service_with_user().await;
    let ctx = RequestContext::new().with_client_ip("203.0.113.7");

    let outcome = service
        .authenticate(&ctx, None, login("carol@example.com", "hunter2hunter2"))
        .await
        .unwrap();
    let tokens = outcome.tokens().unwrap().clone();

    let identity = service.validate_token(&ctx, &tokens.access_token).await.unwrap();
    assert_eq!(identity.email, "carol@example.com");
    assert_eq!(identity.display_name, "Carol Danvers");
    assert_eq!(identity.roles, vec!["user"]);

    service.logout(&ctx, &tokens.access_token).await.unwrap();
    assert!(matches!(
        service.validate_token(&ctx, &tokens.access_token).await,
        Err(AuthError::TokenRevoked)
    ));
}

#[tokio::test]
async fn test_refresh_rotates_and_revokes_used_token() {
    let service = service_with_user().await;
    let ctx = RequestContext::new();

    let first = service
        .authenticate(&ctx, None, login("carol@example.com", "hunter2hunter2"))
        .await
        .unwrap()
        .tokens()
        .unwrap()
        .clone();

    let second = service.refresh(&ctx, &first.refresh_token).await.unwrap();
    assert_ne!(second.refresh_token, first.refresh_token);
    assert!(service.validate_token(&ctx, &second.access_token).await.is_ok());

    assert!(matches!(
        service.refresh(&ctx, &first.refresh_token).await,
        Err(AuthError::TokenRevoked)
    ));
    // an access token cannot be used to refresh
    assert!(matches!(
        service.refresh(&ctx, &second.access_token).await,
        Err(AuthError::InvalidToken(_))
    ));
}

#[tokio::test]
async fn test_logout_everywhere_revokes_existing_tokens() {
    let service = token_service(Arc::new(InMemorySharedCache::new()));
    let first = service.issue_pair(&identity()).unwrap();
    let second = service.issue_pair(&identity()).unwrap();

    service.revoke_user("user-42").await.unwrap();

    for token in [&first.access_token, &second.access_token] {
        assert!(matches!(
            service.validate_access_token(token).await,
            Err(AuthError::TokenRevoked)
        ));
    }
}

#[tokio::test]
async fn test_tokens_issued_after_logout_everywhere_stay_valid() {
    let service = token_service(Arc::new(InMemorySharedCache::new()));
    let before = service.issue_pair(&identity()).unwrap();

    service.revoke_user("user-42").await.unwrap();
    let after = service.issue_pair(&identity()).unwrap();

    assert!(matches!(
        service.validate_access_token(&before.access_token).await,
        Err(AuthError::TokenRevoked)
    ));
    let claims = service.validate_access_token(&after.access_token).await.unwrap();
    assert_eq!(claims.sub, "user-42");
    assert!(service.validate_refresh_token(&after.refresh_token).await.is_ok());
}

#[tokio::test]
async fn test_login_right_after_logout_everywhere() {
    let service = service_with_user().await;
    let ctx = RequestContext::new();
    let first = service
        .authenticate(&ctx, None, login("carol@example.com", "hunter2hunter2"))
        .await
        .unwrap();
    let user_id = first.identity().unwrap().user_id.clone();

    service.logout_everywhere(&ctx, &user_id).await.unwrap();
    let second = service
        .authenticate(&ctx, None, login("carol@example.com", "hunter2hunter2"))
        .await
        .unwrap();

    let tokens = second.tokens().unwrap();
    assert!(service.validate_token(&ctx, &tokens.access_token).await.is_ok());
    assert!(service.refresh(&ctx, &tokens.refresh_token).await.is_ok());
}

#[tokio::test]
async fn test_refresh_token_redeemed_once_across_nodes() {
    let cache: Arc<dyn identity_auth_core::store::SharedCache> = Arc::new(InMemorySharedCache::new());
    let node_a = token_service(cache.clone());
    let node_b = token_service(cache);
    let pair = node_a.issue_pair(&identity()).unwrap();

    let (a, b) = tokio::join!(node_a.refresh(&pair.refresh_token), node_b.refresh(&pair.refresh_token));
    let rotated = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(rotated, 1);
    assert!([a, b].into_iter().any(|r| matches!(r, Err(AuthError::TokenRevoked))));
}

#[tokio::test]
async fn test_validation_fails_closed_when_blacklist_unreachable() {
    let cache = Arc::new(FlakyCache::new());
    let service = token_service(cache.clone());
    let pair = service.issue_pair(&identity()).unwrap();

    cache.set_down(true);
    assert!(matches!(
        service.validate_access_token(&pair.access_token).await,
        Err(AuthError::Cache(_))
    ));

    cache.set_down(false);
    assert!(service.validate_access_token(&pair.access_token).await.is_ok());
}

#[tokio::test]
async fn test_forged_token_cannot_be_revoked() {
    let service = token_service(Arc::new(InMemorySharedCache::new()));
    let other = TokenService::new(
        JwtConfig {
            secret: "Zq8!nR3@kL5#pW7$xT2%mB9^hJ4&cV6*".to_string(),
            ..Default::default()
        },
        RuntimeEnvironment::Production,
        TokenBlacklist::new(Arc::new(InMemorySharedCache::new())),
    )
    .unwrap();
    let forged = other.issue_pair(&identity()).unwrap();

    assert!(matches!(
        service.revoke(&forged.access_token).await,
        Err(AuthError::InvalidToken(_))
    ));
}

#[test]
fn test_secret_validator_modes() {
    assert!(SecretValidator::new(RuntimeEnvironment::Production)
        .validate_secret("short")
        .is_err());

    let report = SecretValidator::new(RuntimeEnvironment::Development)
        .validate_secret("short")
        .unwrap();
    assert_eq!(report.warnings.len(), 4);
}

#[tokio::test]
async fn test_weak_secret_blocks_production_startup() {
    let mut config = base_config();
    config.jwt.secret = "short".to_string();
    config.environment = RuntimeEnvironment::Production;
    assert!(matches!(
        AuthService::builder(config.clone()).build().await,
        Err(AuthError::Configuration(_))
    ));

    config.environment = RuntimeEnvironment::Development;
    assert!(AuthService::builder(config).build().await.is_ok());
}
