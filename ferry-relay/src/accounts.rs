//! Seams to the account and usage services.
//!
//! User accounts and usage counters live outside the relay. The relay only
//! needs two calls: who owns an SSH key, and "this IP uploaded once more".
//! The in-memory implementations here back a standalone deployment and the
//! tests.

use crate::config::AccountEntry;
use crate::error::CollaboratorError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::net::IpAddr;

/// A known sender account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderAccount {
    /// Verified subdomain; `None` for accounts that never claimed one.
    pub subdomain: Option<String>,
}

/// Resolves SSH keys to accounts.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// Find the account owning a key.
    ///
    /// `fingerprint` is the SHA-256 key fingerprint in base64, without the
    /// `SHA256:` prefix.
    async fn find_by_ssh_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<SenderAccount>, CollaboratorError>;
}

/// Counts uploads per source address.
#[async_trait]
pub trait UsageRecorder: Send + Sync {
    /// Record one upload from `ip`.
    async fn record_usage(&self, ip: IpAddr) -> Result<(), CollaboratorError>;
}

/// Accounts listed in the configuration file.
#[derive(Debug, Clone, Default)]
pub struct StaticAccounts {
    by_fingerprint: HashMap<String, SenderAccount>,
}

impl StaticAccounts {
    /// Build the directory from `[[accounts]]` entries.
    pub fn from_entries(entries: &[AccountEntry]) -> Self {
        let by_fingerprint = entries
            .iter()
            .map(|entry| {
                let fingerprint = entry
                    .fingerprint
                    .strip_prefix("SHA256:")
                    .unwrap_or(&entry.fingerprint)
                    .to_string();
                let account = SenderAccount {
                    subdomain: Some(entry.subdomain.clone()).filter(|s| !s.is_empty()),
                };
                (fingerprint, account)
            })
            .collect();
        Self { by_fingerprint }
    }

    /// Number of known accounts.
    pub fn len(&self) -> usize {
        self.by_fingerprint.len()
    }

    /// Whether no accounts are configured.
    pub fn is_empty(&self) -> bool {
        self.by_fingerprint.is_empty()
    }
}

#[async_trait]
impl AccountDirectory for StaticAccounts {
    async fn find_by_ssh_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<SenderAccount>, CollaboratorError> {
        Ok(self.by_fingerprint.get(fingerprint).cloned())
    }
}

/// Process-local usage counters.
#[derive(Debug, Default)]
pub struct InMemoryUsage {
    counts: DashMap<IpAddr, u64>,
}

impl InMemoryUsage {
    /// Create empty counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Uploads recorded for `ip`.
    pub fn usage(&self, ip: &IpAddr) -> u64 {
        self.counts.get(ip).map(|count| *count).unwrap_or(0)
    }
}

#[async_trait]
impl UsageRecorder for InMemoryUsage {
    async fn record_usage(&self, ip: IpAddr) -> Result<(), CollaboratorError> {
        *self.counts.entry(ip).or_insert(0) += 1;
        Ok(())
    }
}
