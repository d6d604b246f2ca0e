//! Shared relay state.
//!
//! `FerryRelay` is handed (behind an `Arc`) to every SSH session and HTTP
//! request. It owns the tunnel registry, the rate limiters, the metrics and
//! the collaborator handles; it holds no other mutable state.

use crate::accounts::{AccountDirectory, InMemoryUsage, StaticAccounts, UsageRecorder};
use crate::config::Config;
use crate::limits::RateLimits;
use crate::registry::Registry;
use ferry_core::LinkGenerator;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

/// Operational metrics for monitoring relay activity.
///
/// All counters are monotonically increasing (reset only on restart).
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Uploads that were published as tunnels.
    pub uploads_total: AtomicU64,
    /// Upload sessions that ended before publishing (timeout, bad directives...).
    pub upload_failures: AtomicU64,
    /// Tunnels consumed by a direct download.
    pub downloads_total: AtomicU64,
    /// Tunnels revoked through the delete link.
    pub deletes_total: AtomicU64,
    /// Tunnels that reached their lifetime unclaimed.
    pub expirations_total: AtomicU64,
    /// Payload bytes received over SSH.
    pub bytes_received: AtomicU64,
    /// Payload bytes served over HTTP.
    pub bytes_sent: AtomicU64,
    /// Upload sessions rejected by the rate limiter.
    pub rate_limit_hits: AtomicU64,
}

/// Main relay state.
pub struct FerryRelay {
    config: Config,
    registry: Registry,
    rate_limits: RateLimits,
    metrics: RelayMetrics,
    accounts: Arc<dyn AccountDirectory>,
    usage: Arc<dyn UsageRecorder>,
}

impl std::fmt::Debug for FerryRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FerryRelay")
            .field("config", &self.config)
            .field("rate_limits", &self.rate_limits)
            .field("metrics", &self.metrics)
            .field("tunnels", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl FerryRelay {
    /// Create a relay with explicit collaborators.
    pub fn new(
        config: Config,
        accounts: Arc<dyn AccountDirectory>,
        usage: Arc<dyn UsageRecorder>,
    ) -> Self {
        let registry = Registry::new(
            LinkGenerator::new(config.upload.link_length),
            config.limits.max_active_tunnels,
        );
        let rate_limits = RateLimits::new(&config.limits);
        Self {
            config,
            registry,
            rate_limits,
            metrics: RelayMetrics::default(),
            accounts,
            usage,
        }
    }

    /// Create a relay backed by config-file accounts and in-memory usage counters.
    pub fn standalone(config: Config) -> Self {
        let accounts = Arc::new(StaticAccounts::from_entries(&config.accounts));
        Self::new(config, accounts, Arc::new(InMemoryUsage::new()))
    }

    /// Get the relay configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the tunnel registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Get access to the rate limiters.
    pub fn rate_limits(&self) -> &RateLimits {
        &self.rate_limits
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Get the account directory.
    pub fn accounts(&self) -> &dyn AccountDirectory {
        self.accounts.as_ref()
    }

    /// Get the usage recorder.
    pub fn usage(&self) -> &dyn UsageRecorder {
        self.usage.as_ref()
    }

    /// Number of published tunnels.
    pub fn active_tunnels(&self) -> usize {
        self.registry.published_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccountEntry;

    #[tokio::test]
    async fn standalone_uses_configured_accounts() {
        let mut config = Config::default();
        config.accounts.push(AccountEntry {
            fingerprint: "fp".into(),
            subdomain: "alex".into(),
        });
        let relay = FerryRelay::standalone(config);

        let account = relay.accounts().find_by_ssh_fingerprint("fp").await.unwrap();
        assert_eq!(account.unwrap().subdomain.as_deref(), Some("alex"));
        assert_eq!(relay.active_tunnels(), 0);
    }

    #[test]
    fn registry_uses_configured_link_length() {
        let mut config = Config::default();
        config.upload.link_length = 10;
        let relay = FerryRelay::standalone(config);

        let reservation = relay.registry().reserve().unwrap();
        assert_eq!(reservation.link().as_str().len(), 10);
    }

    #[test]
    fn debug_omits_collaborators() {
        let relay = FerryRelay::standalone(Config::default());
        let debug = format!("{:?}", relay);
        assert!(debug.contains("FerryRelay"));
        assert!(debug.contains("tunnels: 0"));
    }
}
