//! Authentication and request-protection core.

pub mod blacklist;
pub mod breaker;
pub mod password;
pub mod rate_limit;
pub mod repository;
pub mod service;
pub mod token;

pub use blacklist::TokenBlacklist;
pub use breaker::{BreakerError, BreakerStats, CircuitBreaker, CircuitState};
pub use password::{PasswordPolicy, PasswordRejection};
pub use rate_limit::{RateLimitAction, RateLimitQuota, RateLimitStatus, RateLimiter};
pub use repository::{
    Credential, CredentialRepo, MemoryCredentialRepo, NewCredential, PgCredentialRepo, RepoError,
};
pub use service::{AuthError, AuthService, LoginOutcome, PublicProfile, RefreshOutcome};
pub use token::{Claims, TokenError, TokenKind, TokenService};
