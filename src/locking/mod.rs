//! # Locking
//!
//! At most one active reconciliation per key, across control loops and replicas.
//!
//! Two interchangeable backends:
//! - [`InMemoryLocker`] - a guarded set of held keys, single replica only
//! - [`LeaseLocker`] - coordination.k8s.io Leases with a bounded TTL
//!
//! [`LockError::AlreadyLocked`] is a normal contention signal, callers requeue
//! shortly without reporting a failure. [`LockError::Backend`] is a real error.

mod lease;
mod memory;

use async_trait::async_trait;
use thiserror::Error;

pub use lease::{lease_expired, LeaseLocker};
pub use memory::InMemoryLocker;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock '{0}' is already held")]
    AlreadyLocked(String),

    #[error("lock backend failure for '{key}': {message}")]
    Backend { key: String, message: String },
}

/// Proof of a held lock, handed back on release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockSession {
    key: String,
    token: String,
}

impl LockSession {
    pub(crate) fn new(key: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            token: token.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn token(&self) -> &str {
        &self.token
    }
}

#[async_trait]
pub trait Locker: Send + Sync {
    async fn obtain(&self, key: &str) -> Result<LockSession, LockError>;

    /// Release a held lock. Failures are logged, an unreleased lease expires on its own.
    async fn release(&self, session: LockSession);
}

/// Lock key of a namespaced resource
pub fn lock_key(kind: &str, namespace: &str, name: &str) -> String {
    format!("{}/{namespace}/{name}", kind.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_key() {
        assert_eq!(
            lock_key("ScheduledBackup", "backups", "app1"),
            "scheduledbackup/backups/app1"
        );
    }
}
