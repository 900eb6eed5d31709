//! Auth orchestrator.
//!
//! Composes the password policy, token service, revocation store, and rate
//! limiter into the register/login/refresh/logout/change-password flows.
//! Collaborators are injected once at startup; the orchestrator itself holds
//! no per-request state.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::blacklist::TokenBlacklist;
use crate::auth::password::{PasswordPolicy, PasswordRejection};
use crate::auth::rate_limit::{RateLimitAction, RateLimiter};
use crate::auth::repository::{Credential, CredentialRepo, NewCredential, RepoError};
use crate::auth::token::{TokenError, TokenKind, TokenService};
use crate::kv::KeyValueStore;
use crate::retry::{with_backoff, BackoffPolicy};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Covers unknown email and wrong password alike, so responses never
    /// reveal whether an address is registered.
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("account is inactive")]
    Inactive,
    #[error("email already registered")]
    AlreadyExists,
    #[error(transparent)]
    WeakPassword(#[from] PasswordRejection),
    #[error("rate limit exceeded")]
    RateLimited { retry_after: Duration },
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("not authenticated")]
    Unauthenticated,
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("internal error")]
    Internal,
}

impl From<RepoError> for AuthError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Duplicate => Self::AlreadyExists,
            RepoError::Unavailable(detail) => Self::Unavailable(detail),
        }
    }
}

/// The caller-facing view of a credential. Never carries the hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PublicProfile {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub is_active: bool,
    pub is_verified: bool,
}

impl From<&Credential> for PublicProfile {
    fn from(credential: &Credential) -> Self {
        Self {
            id: credential.id,
            email: credential.email.clone(),
            display_name: credential.display_name.clone(),
            is_active: credential.is_active,
            is_verified: credential.is_verified,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub profile: PublicProfile,
    pub access_token: String,
    pub refresh_token: String,
    /// Access-token lifetime in seconds.
    pub expires_in: i64,
}

#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub access_token: String,
    pub expires_in: i64,
}

pub struct AuthService {
    repo: Arc<dyn CredentialRepo>,
    tokens: TokenService,
    policy: PasswordPolicy,
    blacklist: TokenBlacklist,
    limiter: RateLimiter,
    backoff: BackoffPolicy,
}

impl AuthService {
    #[must_use]
    pub fn new(
        repo: Arc<dyn CredentialRepo>,
        store: Arc<dyn KeyValueStore>,
        secret: &SecretString,
    ) -> Self {
        Self {
            repo,
            tokens: TokenService::new(secret),
            policy: PasswordPolicy::new(),
            blacklist: TokenBlacklist::new(Arc::clone(&store)),
            limiter: RateLimiter::new(store),
            backoff: BackoffPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_token_service(mut self, tokens: TokenService) -> Self {
        self.tokens = tokens;
        self
    }

    #[must_use]
    pub fn with_password_policy(mut self, policy: PasswordPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Create a credential. `identifier` is the client identity used for
    /// rate limiting, typically the remote IP.
    ///
    /// # Errors
    ///
    /// `RateLimited`, `WeakPassword`, `AlreadyExists`, or `Unavailable`.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
        identifier: &str,
    ) -> Result<PublicProfile, AuthError> {
        self.enforce_limit(identifier, RateLimitAction::Registration)
            .await?;

        let email = normalize_email(email);
        self.policy.validate(password)?;
        let password_hash = self.policy.hash(password).map_err(|err| {
            error!("password hashing failed: {err}");
            AuthError::Internal
        })?;

        let display_name = display_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map_or_else(|| default_display_name(&email), ToString::to_string);

        let new = NewCredential {
            email: email.clone(),
            password_hash,
            display_name,
        };
        let created = with_backoff(&self.backoff, RepoError::is_transient, || {
            self.repo.insert(new.clone())
        })
        .await?;

        info!("registered credential for {email}");
        Ok(PublicProfile::from(&created))
    }

    /// Authenticate and mint an access/refresh pair.
    ///
    /// Rate limiting fails closed here: exceeding the login quota rejects
    /// the attempt with a retry-after, before any credential lookup.
    ///
    /// # Errors
    ///
    /// `RateLimited`, `InvalidCredentials`, `Inactive`, or `Unavailable`.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        identifier: &str,
    ) -> Result<LoginOutcome, AuthError> {
        self.enforce_limit(identifier, RateLimitAction::Login).await?;

        let email = normalize_email(email);
        let credential = with_backoff(&self.backoff, RepoError::is_transient, || {
            self.repo.find_by_email(&email)
        })
        .await?;

        // Unknown email and wrong password collapse into one outcome.
        let credential = match credential {
            Some(found) if self.policy.verify(password, &found.password_hash) => found,
            _ => {
                warn!("failed login attempt for {email}");
                return Err(AuthError::InvalidCredentials);
            }
        };

        if !credential.is_active {
            return Err(AuthError::Inactive);
        }

        let access_token = self.issue(&credential.id, TokenKind::Access)?;
        let refresh_token = self.issue(&credential.id, TokenKind::Refresh)?;

        // Best-effort; a missed timestamp is not worth failing a login.
        if let Err(err) = self.repo.touch_last_login(credential.id).await {
            warn!("failed to record last login for {email}: {err}");
        }

        info!("login succeeded for {email}");
        Ok(LoginOutcome {
            profile: PublicProfile::from(&credential),
            access_token,
            refresh_token,
            expires_in: self.tokens.access_ttl_seconds(),
        })
    }

    /// Mint a new access token from a refresh token.
    ///
    /// The refresh token itself is reused, not rotated; its replay window
    /// is bounded only by its own expiry or an explicit logout.
    ///
    /// # Errors
    ///
    /// `InvalidToken` when the token is expired, revoked, of the wrong
    /// type, or its subject no longer exists; `Inactive` when the account
    /// was deactivated; `Unavailable` on repository failure.
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshOutcome, AuthError> {
        if self.blacklist.is_revoked(refresh_token).await {
            return Err(AuthError::InvalidToken);
        }

        let claims = self
            .tokens
            .verify(refresh_token, TokenKind::Refresh)
            .map_err(|_| AuthError::InvalidToken)?;
        let id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidToken)?;

        let credential = with_backoff(&self.backoff, RepoError::is_transient, || {
            self.repo.find_by_id(id)
        })
        .await?
        .ok_or(AuthError::InvalidToken)?;

        if !credential.is_active {
            return Err(AuthError::Inactive);
        }

        let access_token = self.issue(&credential.id, TokenKind::Access)?;
        Ok(RefreshOutcome {
            access_token,
            expires_in: self.tokens.access_ttl_seconds(),
        })
    }

    /// Revoke the presented tokens for the remainder of their lifetimes.
    ///
    /// Best-effort: tokens that fail signature checks are ignored and
    /// degraded revocation storage is logged, never surfaced. The caller
    /// always observes success.
    pub async fn logout(&self, access_token: &str, refresh_token: Option<&str>) {
        self.revoke_remaining(access_token).await;
        if let Some(refresh_token) = refresh_token {
            self.revoke_remaining(refresh_token).await;
        }
    }

    /// Replace the password after re-verifying the current one.
    ///
    /// Existing tokens stay valid; pair with [`AuthService::logout`] when
    /// the caller wants them gone.
    ///
    /// # Errors
    ///
    /// `InvalidCredentials` when the current password does not match,
    /// `WeakPassword` when the new one fails policy, `Unavailable` on
    /// repository failure.
    pub async fn change_password(
        &self,
        credential_id: Uuid,
        current: &str,
        new: &str,
    ) -> Result<(), AuthError> {
        let credential = with_backoff(&self.backoff, RepoError::is_transient, || {
            self.repo.find_by_id(credential_id)
        })
        .await?
        .ok_or(AuthError::InvalidCredentials)?;

        if !self.policy.verify(current, &credential.password_hash) {
            return Err(AuthError::InvalidCredentials);
        }

        self.policy.validate(new)?;
        let password_hash = self.policy.hash(new).map_err(|err| {
            error!("password hashing failed: {err}");
            AuthError::Internal
        })?;

        with_backoff(&self.backoff, RepoError::is_transient, || {
            self.repo.update_password(credential_id, &password_hash)
        })
        .await?;

        info!("password changed for credential {credential_id}");
        Ok(())
    }

    /// Resolve a bearer token to its credential. The gate every protected
    /// operation calls first.
    ///
    /// # Errors
    ///
    /// `Unauthenticated` for every rejected token, whether revoked,
    /// expired, malformed, of the wrong type, or pointing at a missing or
    /// inactive account; `Unavailable` on repository failure.
    pub async fn authorize(&self, bearer_token: &str) -> Result<Credential, AuthError> {
        if self.blacklist.is_revoked(bearer_token).await {
            return Err(AuthError::Unauthenticated);
        }

        let claims = self
            .tokens
            .verify(bearer_token, TokenKind::Access)
            .map_err(|_| AuthError::Unauthenticated)?;
        let id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::Unauthenticated)?;

        let credential = with_backoff(&self.backoff, RepoError::is_transient, || {
            self.repo.find_by_id(id)
        })
        .await?
        .ok_or(AuthError::Unauthenticated)?;

        if !credential.is_active {
            return Err(AuthError::Unauthenticated);
        }

        Ok(credential)
    }

    async fn enforce_limit(
        &self,
        identifier: &str,
        action: RateLimitAction,
    ) -> Result<(), AuthError> {
        let status = self.limiter.check_and_increment(identifier, action).await;
        if status.limited {
            return Err(AuthError::RateLimited {
                retry_after: status.retry_after.unwrap_or(Duration::from_secs(60)),
            });
        }
        Ok(())
    }

    fn issue(&self, id: &Uuid, kind: TokenKind) -> Result<String, AuthError> {
        let subject = id.to_string();
        let result = match kind {
            TokenKind::Access => self.tokens.issue_access(&subject),
            TokenKind::Refresh => self.tokens.issue_refresh(&subject),
        };
        result.map_err(|err: TokenError| {
            error!("token signing failed: {err}");
            AuthError::Internal
        })
    }

    async fn revoke_remaining(&self, token: &str) {
        let Some(claims) = self.tokens.peek(token) else {
            return;
        };
        let ttl = Duration::from_secs(claims.remaining_seconds());
        self.blacklist.revoke(token, ttl).await;
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Local part of the email, used when registration omits a display name.
fn default_display_name(email: &str) -> String {
    email
        .split('@')
        .next()
        .unwrap_or(email)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::repository::MemoryCredentialRepo;
    use crate::kv::MemoryStore;

    fn service() -> AuthService {
        AuthService::new(
            Arc::new(MemoryCredentialRepo::new()),
            Arc::new(MemoryStore::new()),
            &SecretString::from("test-secret".to_string()),
        )
    }

    #[tokio::test]
    async fn register_normalizes_email_and_defaults_display_name() -> Result<(), AuthError> {
        let auth = service();
        let profile = auth
            .register("  Alice@Example.COM ", "Str0ng!Pass", None, "1.2.3.4")
            .await?;

        assert_eq!(profile.email, "alice@example.com");
        assert_eq!(profile.display_name, "alice");
        assert!(profile.is_active);
        assert!(!profile.is_verified);
        Ok(())
    }

    #[tokio::test]
    async fn register_rejects_duplicates_and_weak_passwords() -> Result<(), AuthError> {
        let auth = service();
        auth.register("a@b.com", "Str0ng!Pass", None, "1.2.3.4")
            .await?;

        assert_eq!(
            auth.register("a@b.com", "Str0ng!Pass", None, "1.2.3.4")
                .await
                .unwrap_err(),
            AuthError::AlreadyExists
        );
        assert!(matches!(
            auth.register("b@b.com", "weak", None, "1.2.3.4")
                .await
                .unwrap_err(),
            AuthError::WeakPassword(_)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_email_are_indistinguishable() -> Result<(), AuthError> {
        let auth = service();
        auth.register("a@b.com", "Str0ng!Pass", None, "1.2.3.4")
            .await?;

        let wrong_password = auth.login("a@b.com", "wrong", "1.1.1.1").await.unwrap_err();
        let unknown_email = auth
            .login("nobody@b.com", "wrong", "2.2.2.2")
            .await
            .unwrap_err();

        assert_eq!(wrong_password, AuthError::InvalidCredentials);
        assert_eq!(wrong_password, unknown_email);
        Ok(())
    }

    #[tokio::test]
    async fn login_issues_distinct_token_kinds() -> Result<(), AuthError> {
        let auth = service();
        auth.register("a@b.com", "Str0ng!Pass", None, "1.2.3.4")
            .await?;
        let outcome = auth.login("a@b.com", "Str0ng!Pass", "1.2.3.4").await?;

        assert!(auth.authorize(&outcome.access_token).await.is_ok());
        // A refresh token never substitutes for an access token.
        assert_eq!(
            auth.authorize(&outcome.refresh_token).await.unwrap_err(),
            AuthError::Unauthenticated
        );
        // And refresh rejects the access token.
        assert_eq!(
            auth.refresh(&outcome.access_token).await.unwrap_err(),
            AuthError::InvalidToken
        );
        Ok(())
    }

    #[tokio::test]
    async fn sixth_login_attempt_is_rate_limited() -> Result<(), AuthError> {
        let auth = service();
        auth.register("a@b.com", "Str0ng!Pass", None, "9.9.9.9")
            .await?;

        for _ in 0..5 {
            auth.login("a@b.com", "wrong", "1.2.3.4").await.ok();
        }
        let err = auth
            .login("a@b.com", "Str0ng!Pass", "1.2.3.4")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AuthError::RateLimited { retry_after } if retry_after > Duration::ZERO
        ));
        Ok(())
    }

    #[tokio::test]
    async fn logout_is_best_effort_even_for_garbage() {
        let auth = service();
        // Neither token parses; logout still completes.
        auth.logout("garbage", Some("also-garbage")).await;
    }
}
