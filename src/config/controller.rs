//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Backend used by the lock manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockBackend {
    /// Lease objects in the cluster, safe across replicas
    Lease,
    /// Process-local set of keys, single replica only
    Memory,
}

impl FromStr for LockBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lease" => Ok(Self::Lease),
            "memory" | "in-memory" => Ok(Self::Memory),
            other => Err(format!(
                "unknown lock backend '{other}', expected 'lease' or 'memory'"
            )),
        }
    }
}

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Command-line flags are applied on top in `main`.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Lock manager backend
    pub lock_backend: LockBackend,
    /// Namespace holding lock and leader election leases
    pub lock_namespace: String,
    /// TTL of a lock lease (seconds)
    pub lock_ttl_secs: u64,
    /// Identity written into leases (pod name in-cluster)
    pub identity: String,
    /// Whether a leader lease must be held before the control loops start
    pub leader_election: bool,
    /// Path or name of the backup-maker generator binary
    pub backup_maker_binary: PathBuf,
    /// Path or name of the gpg binary
    pub gpg_binary: PathBuf,
    /// HTTP port for metrics and probes
    pub metrics_port: u16,
    /// Deadline of a single reconcile pass (seconds)
    pub reconcile_timeout_secs: u64,
    /// Attempts of a status read-modify-write before giving up
    pub status_update_attempts: u32,
    /// Maximum concurrent reconciliations per control loop (0 means unbounded)
    pub max_concurrent_reconciliations: u16,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            lock_backend: LockBackend::Lease,
            lock_namespace: DEFAULT_LOCK_NAMESPACE.to_string(),
            lock_ttl_secs: DEFAULT_LOCK_TTL_SECS,
            identity: CONTROLLER_NAME.to_string(),
            leader_election: false,
            backup_maker_binary: PathBuf::from(DEFAULT_BACKUP_MAKER_BINARY),
            gpg_binary: PathBuf::from(DEFAULT_GPG_BINARY),
            metrics_port: DEFAULT_METRICS_PORT,
            reconcile_timeout_secs: DEFAULT_RECONCILE_TIMEOUT_SECS,
            status_update_attempts: DEFAULT_STATUS_UPDATE_ATTEMPTS,
            max_concurrent_reconciliations: 10,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            lock_backend: env_var_or_default("LOCK_BACKEND", LockBackend::Lease),
            lock_namespace: env_var_or_default_str(
                "LOCK_NAMESPACE",
                &env_var_or_default_str("POD_NAMESPACE", DEFAULT_LOCK_NAMESPACE),
            ),
            lock_ttl_secs: env_var_or_default("LOCK_TTL_SECS", DEFAULT_LOCK_TTL_SECS),
            identity: env_var_or_default_str("POD_NAME", CONTROLLER_NAME),
            leader_election: env_var_or_default_bool("LEADER_ELECT", false),
            backup_maker_binary: PathBuf::from(env_var_or_default_str(
                "BACKUP_MAKER_BINARY",
                DEFAULT_BACKUP_MAKER_BINARY,
            )),
            gpg_binary: PathBuf::from(env_var_or_default_str("GPG_BINARY", DEFAULT_GPG_BINARY)),
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            reconcile_timeout_secs: env_var_or_default(
                "RECONCILE_TIMEOUT_SECS",
                DEFAULT_RECONCILE_TIMEOUT_SECS,
            ),
            status_update_attempts: env_var_or_default(
                "STATUS_UPDATE_ATTEMPTS",
                DEFAULT_STATUS_UPDATE_ATTEMPTS,
            ),
            max_concurrent_reconciliations: env_var_or_default(
                "MAX_CONCURRENT_RECONCILIATIONS",
                10,
            ),
        }
    }

    /// Get lock lease TTL
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs.max(crate::constants::MIN_LOCK_TTL_SECS))
    }

    /// Get reconcile pass deadline
    ///
    /// Leases are not renewed while a pass runs, so with the lease backend the
    /// deadline is clamped to end `LOCK_TTL_MARGIN_SECS` before the lease expires.
    pub fn reconcile_timeout(&self) -> Duration {
        let configured = self.reconcile_timeout_secs.max(1);
        let secs = match self.lock_backend {
            LockBackend::Lease => configured.min(
                self.lock_ttl()
                    .as_secs()
                    .saturating_sub(crate::constants::LOCK_TTL_MARGIN_SECS),
            ),
            LockBackend::Memory => configured,
        };
        Duration::from_secs(secs)
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as boolean or return default
fn env_var_or_default_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| {
            let v_lower = v.to_lowercase();
            v_lower == "true" || v_lower == "1" || v_lower == "yes" || v_lower == "on"
        })
        .unwrap_or(default)
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
