//! Fixed-window rate limiting keyed by client identity and action.
//!
//! Counters live in the shared key-value store so limits hold across
//! service instances. The increment is the store's atomic INCR, never a
//! read-then-write in the application. Store failures fail open: we never
//! block legitimate traffic because the counting substrate is down.

use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::kv::KeyValueStore;

const RATELIMIT_PREFIX: &str = "ratelimit:";

const DEFAULT_LOGIN_QUOTA: RateLimitQuota = RateLimitQuota {
    limit: 5,
    window: Duration::from_secs(60),
};
const DEFAULT_REGISTRATION_QUOTA: RateLimitQuota = RateLimitQuota {
    limit: 3,
    window: Duration::from_secs(300),
};
const DEFAULT_GENERAL_QUOTA: RateLimitQuota = RateLimitQuota {
    limit: 100,
    window: Duration::from_secs(60),
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitAction {
    Login,
    Registration,
    General,
}

impl RateLimitAction {
    fn key_part(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Registration => "registration",
            Self::General => "general",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitQuota {
    pub limit: i64,
    pub window: Duration,
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub limited: bool,
    pub current: i64,
    pub limit: i64,
    /// Seconds until the window resets; surfaced as Retry-After.
    pub retry_after: Option<Duration>,
}

impl RateLimitStatus {
    fn allowed(current: i64, limit: i64) -> Self {
        Self {
            limited: false,
            current,
            limit,
            retry_after: None,
        }
    }
}

pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
    login: RateLimitQuota,
    registration: RateLimitQuota,
    general: RateLimitQuota,
}

impl RateLimiter {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            login: DEFAULT_LOGIN_QUOTA,
            registration: DEFAULT_REGISTRATION_QUOTA,
            general: DEFAULT_GENERAL_QUOTA,
        }
    }

    #[must_use]
    pub fn with_quota(mut self, action: RateLimitAction, quota: RateLimitQuota) -> Self {
        match action {
            RateLimitAction::Login => self.login = quota,
            RateLimitAction::Registration => self.registration = quota,
            RateLimitAction::General => self.general = quota,
        }
        self
    }

    #[must_use]
    pub fn quota(&self, action: RateLimitAction) -> RateLimitQuota {
        match action {
            RateLimitAction::Login => self.login,
            RateLimitAction::Registration => self.registration,
            RateLimitAction::General => self.general,
        }
    }

    /// Count this request against `(identifier, action)` and report whether
    /// it exceeds the window quota.
    ///
    /// A fresh window starts the counter at 1 with the window TTL; within a
    /// window the counter is incremented until the limit, after which calls
    /// are limited and carry the remaining window as retry-after.
    pub async fn check_and_increment(
        &self,
        identifier: &str,
        action: RateLimitAction,
    ) -> RateLimitStatus {
        let quota = self.quota(action);
        let key = format!("{RATELIMIT_PREFIX}{}:{identifier}", action.key_part());

        let current = match self.store.get(&key).await {
            Ok(value) => value.and_then(|v| v.parse::<i64>().ok()).unwrap_or(0),
            Err(err) => {
                warn!("rate limiter degraded, allowing request: {err}");
                return RateLimitStatus::allowed(0, quota.limit);
            }
        };

        if current >= quota.limit {
            let retry_after = match self.store.ttl_remaining(&key).await {
                Ok(ttl) => ttl.unwrap_or(quota.window),
                Err(err) => {
                    warn!("rate limiter degraded, allowing request: {err}");
                    return RateLimitStatus::allowed(current, quota.limit);
                }
            };
            warn!(
                "rate limit exceeded for {identifier} on {}: {current}/{} (resets in {}s)",
                action.key_part(),
                quota.limit,
                retry_after.as_secs()
            );
            return RateLimitStatus {
                limited: true,
                current,
                limit: quota.limit,
                retry_after: Some(retry_after),
            };
        }

        let count = match self.store.incr(&key).await {
            Ok(count) => count,
            Err(err) => {
                warn!("rate limiter degraded, allowing request: {err}");
                return RateLimitStatus::allowed(current + 1, quota.limit);
            }
        };
        // First hit in the window owns setting the TTL.
        if count == 1 {
            if let Err(err) = self.store.expire(&key, quota.window).await {
                warn!("failed to attach rate-limit window: {err}");
            }
        }

        RateLimitStatus::allowed(count, quota.limit)
    }
}
