//! Rate limiting for ferry-relay.
//!
//! Uploads are limited per source IP address with a keyed governor limiter
//! backed by DashMap. Downloads are not limited: each link serves at most
//! one successful download anyway.

use crate::config::LimitsConfig;
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

/// Type alias for a keyed rate limiter using DashMap.
type KeyedLimiter<K> = RateLimiter<
    K,
    dashmap::DashMap<K, InMemoryState>,
    DefaultClock,
    NoOpMiddleware<governor::clock::QuantaInstant>,
>;

/// Rate limiters for the relay server.
#[derive(Clone)]
pub struct RateLimits {
    /// Limits upload sessions per source IP.
    ///
    /// Configured via `limits.uploads_per_minute`.
    upload_limiter: Arc<KeyedLimiter<IpAddr>>,
}

impl std::fmt::Debug for RateLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimits")
            .field("upload_limiter", &"KeyedLimiter<IpAddr>")
            .finish()
    }
}

impl RateLimits {
    /// Create rate limiters from configuration.
    ///
    /// # Panics
    ///
    /// Panics if `uploads_per_minute` is zero; `Config::validate` rejects that.
    pub fn new(config: &LimitsConfig) -> Self {
        let uploads_per_minute =
            NonZeroU32::new(config.uploads_per_minute).expect("uploads_per_minute must be > 0");
        let upload_quota = Quota::per_minute(uploads_per_minute);

        Self {
            upload_limiter: Arc::new(RateLimiter::keyed(upload_quota)),
        }
    }

    /// Check if an upload from `ip` is allowed.
    pub fn check_upload(&self, ip: &IpAddr) -> Result<(), RateLimitError> {
        self.upload_limiter
            .check_key(ip)
            .map_err(|_| RateLimitError::UploadLimitExceeded)
    }

    /// Get the number of tracked upload keys (for metrics).
    pub fn upload_keys_count(&self) -> usize {
        self.upload_limiter.len()
    }

    /// Evict entries whose quota has fully recharged.
    ///
    /// Call periodically from the maintenance task.
    pub fn shrink(&self) {
        self.upload_limiter.retain_recent();
    }
}

/// Rate limit error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    /// Too many uploads from this address.
    #[error("upload rate limit exceeded")]
    UploadLimitExceeded,
}
