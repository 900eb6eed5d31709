//! End-to-end flows through the auth orchestrator with in-memory backends.

use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;

use gardisto::auth::{
    AuthError, AuthService, LoginOutcome, MemoryCredentialRepo, RateLimitAction, RateLimitQuota,
    RateLimiter,
};
use gardisto::kv::MemoryStore;

const EMAIL: &str = "a@b.com";
const PASSWORD: &str = "Str0ng!Pass";
const IP: &str = "1.2.3.4";

fn service() -> (AuthService, Arc<MemoryCredentialRepo>) {
    let repo = Arc::new(MemoryCredentialRepo::new());
    let auth = AuthService::new(
        Arc::clone(&repo) as Arc<dyn gardisto::auth::CredentialRepo>,
        Arc::new(MemoryStore::new()),
        &SecretString::from("integration-secret".to_string()),
    );
    (auth, repo)
}

async fn register_and_login(auth: &AuthService) -> LoginOutcome {
    auth.register(EMAIL, PASSWORD, Some("Alice"), IP)
        .await
        .expect("registration should succeed");
    auth.login(EMAIL, PASSWORD, IP)
        .await
        .expect("login should succeed")
}

#[tokio::test]
async fn register_login_authorize_logout_roundtrip() {
    let (auth, _) = service();

    let profile = auth
        .register(EMAIL, PASSWORD, Some("Alice"), IP)
        .await
        .expect("registration should succeed");
    assert_eq!(profile.email, EMAIL);
    assert_eq!(profile.display_name, "Alice");

    // The serialized profile never carries password material.
    let json = serde_json::to_string(&profile).expect("profile serializes");
    assert!(!json.to_lowercase().contains("password"));
    assert!(!json.contains("hash"));

    let outcome = auth
        .login(EMAIL, PASSWORD, IP)
        .await
        .expect("login should succeed");
    let authorized = auth
        .authorize(&outcome.access_token)
        .await
        .expect("fresh access token should authorize");
    assert_eq!(authorized.id, profile.id);

    auth.logout(&outcome.access_token, Some(outcome.refresh_token.as_str()))
        .await;

    assert_eq!(
        auth.authorize(&outcome.access_token).await.unwrap_err(),
        AuthError::Unauthenticated
    );
    assert_eq!(
        auth.refresh(&outcome.refresh_token).await.unwrap_err(),
        AuthError::InvalidToken
    );
}

#[tokio::test]
async fn login_error_shape_does_not_reveal_account_existence() {
    let (auth, _) = service();
    auth.register(EMAIL, PASSWORD, None, IP)
        .await
        .expect("registration should succeed");

    let wrong_password = auth.login(EMAIL, "wrong-P4ss!", IP).await.unwrap_err();
    let unknown_email = auth
        .login("nobody@b.com", "wrong-P4ss!", IP)
        .await
        .unwrap_err();

    assert_eq!(wrong_password, AuthError::InvalidCredentials);
    assert_eq!(unknown_email, AuthError::InvalidCredentials);
    assert_eq!(wrong_password.to_string(), unknown_email.to_string());
}

#[tokio::test]
async fn refresh_preserves_subject_and_old_access_token_stays_valid() {
    let (auth, _) = service();
    let outcome = register_and_login(&auth).await;

    let original = auth
        .authorize(&outcome.access_token)
        .await
        .expect("access token should authorize");

    let refreshed = auth
        .refresh(&outcome.refresh_token)
        .await
        .expect("refresh should succeed");
    let via_new_token = auth
        .authorize(&refreshed.access_token)
        .await
        .expect("new access token should authorize");
    assert_eq!(via_new_token.id, original.id);

    // Non-rotating refresh: the old access token is untouched and the
    // refresh token keeps working.
    assert!(auth.authorize(&outcome.access_token).await.is_ok());
    assert!(auth.refresh(&outcome.refresh_token).await.is_ok());
}

#[tokio::test]
async fn sixth_login_within_window_is_rate_limited() {
    let (auth, _) = service();
    auth.register(EMAIL, PASSWORD, None, "9.9.9.9")
        .await
        .expect("registration should succeed");

    for _ in 0..5 {
        let _ = auth.login(EMAIL, "wrong-P4ss!", IP).await;
    }

    let err = auth.login(EMAIL, PASSWORD, IP).await.unwrap_err();
    match err {
        AuthError::RateLimited { retry_after } => assert!(retry_after > Duration::ZERO),
        other => panic!("expected RateLimited, got {other:?}"),
    }

    // A different client identity is unaffected.
    assert!(auth.login(EMAIL, PASSWORD, "5.6.7.8").await.is_ok());
}

#[tokio::test]
async fn rate_limit_window_expiry_allows_login_again() {
    let repo = Arc::new(MemoryCredentialRepo::new());
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    // The window must outlast a bcrypt verification, which takes a
    // sizeable fraction of a second at the default cost.
    let window = Duration::from_secs(2);
    let limiter = RateLimiter::new(store.clone()).with_quota(
        RateLimitAction::Login,
        RateLimitQuota { limit: 1, window },
    );
    let auth = AuthService::new(
        repo,
        store,
        &SecretString::from("integration-secret".to_string()),
    )
    .with_rate_limiter(limiter);

    auth.register(EMAIL, PASSWORD, None, IP)
        .await
        .expect("registration should succeed");

    assert!(auth.login(EMAIL, PASSWORD, IP).await.is_ok());
    assert!(matches!(
        auth.login(EMAIL, PASSWORD, IP).await.unwrap_err(),
        AuthError::RateLimited { .. }
    ));

    tokio::time::sleep(window + Duration::from_millis(100)).await;
    assert!(auth.login(EMAIL, PASSWORD, IP).await.is_ok());
}

#[tokio::test]
async fn inactive_accounts_cannot_login_refresh_or_authorize() {
    let (auth, repo) = service();
    let outcome = register_and_login(&auth).await;
    let credential = auth
        .authorize(&outcome.access_token)
        .await
        .expect("access token should authorize");

    repo.set_active(credential.id, false).await;

    assert_eq!(
        auth.login(EMAIL, PASSWORD, IP).await.unwrap_err(),
        AuthError::Inactive
    );
    assert_eq!(
        auth.refresh(&outcome.refresh_token).await.unwrap_err(),
        AuthError::Inactive
    );
    assert_eq!(
        auth.authorize(&outcome.access_token).await.unwrap_err(),
        AuthError::Unauthenticated
    );
}

#[tokio::test]
async fn change_password_flow() {
    let (auth, _) = service();
    let outcome = register_and_login(&auth).await;
    let credential = auth
        .authorize(&outcome.access_token)
        .await
        .expect("access token should authorize");

    // Wrong current password is rejected before policy checks.
    assert_eq!(
        auth.change_password(credential.id, "wrong-P4ss!", "An0ther!Pass")
            .await
            .unwrap_err(),
        AuthError::InvalidCredentials
    );

    // Weak replacement is rejected.
    assert!(matches!(
        auth.change_password(credential.id, PASSWORD, "weak")
            .await
            .unwrap_err(),
        AuthError::WeakPassword(_)
    ));

    auth.change_password(credential.id, PASSWORD, "An0ther!Pass")
        .await
        .expect("password change should succeed");

    assert_eq!(
        auth.login(EMAIL, PASSWORD, "2.2.2.2").await.unwrap_err(),
        AuthError::InvalidCredentials
    );
    assert!(auth.login(EMAIL, "An0ther!Pass", "3.3.3.3").await.is_ok());

    // Existing tokens are deliberately untouched by a password change.
    assert!(auth.authorize(&outcome.access_token).await.is_ok());
}

#[tokio::test]
async fn logout_with_degraded_revocation_still_succeeds() {
    let (auth, _) = service();
    let outcome = register_and_login(&auth).await;

    // Garbage tokens never fail logout either.
    auth.logout("garbage", None).await;
    auth.logout(&outcome.access_token, Some("garbage")).await;

    assert_eq!(
        auth.authorize(&outcome.access_token).await.unwrap_err(),
        AuthError::Unauthenticated
    );
}
