//! Token revocation store.
//!
//! Revoked tokens are keyed in the shared key-value store with a TTL equal
//! to their remaining lifetime, so the blacklist never outgrows the set of
//! still-valid tokens. Reads fail open: if the store is down we prioritize
//! availability of authentication over strict revocation enforcement.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::kv::KeyValueStore;

const BLACKLIST_PREFIX: &str = "blacklist:token:";

pub struct TokenBlacklist {
    store: Arc<dyn KeyValueStore>,
}

impl TokenBlacklist {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Blacklist `token` for `ttl`. Best-effort: returns false and logs
    /// when the store is unavailable.
    pub async fn revoke(&self, token: &str, ttl: Duration) -> bool {
        // A zero TTL would be rejected by the store; one second is the
        // shortest meaningful revocation for an already-expiring token.
        let ttl = if ttl.is_zero() {
            Duration::from_secs(1)
        } else {
            ttl
        };
        let key = format!("{BLACKLIST_PREFIX}{token}");
        match self.store.set_with_ttl(&key, "1", ttl).await {
            Ok(()) => {
                info!("token added to blacklist (ttl: {}s)", ttl.as_secs());
                true
            }
            Err(err) => {
                warn!("failed to blacklist token: {err}");
                false
            }
        }
    }

    /// Whether `token` has been revoked. Fails open on store errors.
    pub async fn is_revoked(&self, token: &str) -> bool {
        let key = format!("{BLACKLIST_PREFIX}{token}");
        match self.store.exists(&key).await {
            Ok(revoked) => revoked,
            Err(err) => {
                warn!("blacklist check degraded, treating token as not revoked: {err}");
                false
            }
        }
    }

    /// Number of currently blacklisted tokens. Diagnostic only.
    pub async fn count(&self) -> usize {
        match self.store.count_prefix(BLACKLIST_PREFIX).await {
            Ok(count) => count,
            Err(err) => {
                warn!("failed to count blacklisted tokens: {err}");
                0
            }
        }
    }
}
