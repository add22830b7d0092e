//! Command-line flags of the controller binary.
//!
//! Flags override the environment loaded by [`ControllerConfig::from_env`].

use clap::Parser;

use crate::config::{ControllerConfig, LockBackend};

#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "backup-maker-controller",
    version,
    about = "Turns ScheduledBackup and RequestedBackupAction resources into backup Jobs and CronJobs"
)]
pub struct Args {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long)]
    pub debug: bool,

    /// Port serving /metrics, /healthz and /readyz
    #[arg(long)]
    pub metrics_port: Option<u16>,

    /// Hold the leader Lease before starting the control loops
    #[arg(long)]
    pub leader_elect: bool,

    /// Lock backend: lease or memory
    #[arg(long)]
    pub lock_backend: Option<LockBackend>,

    /// Use the in-memory lock, only safe with a single replica
    #[arg(long)]
    pub disable_distributed_lock: bool,
}

impl Args {
    pub fn apply(&self, config: &mut ControllerConfig) {
        if let Some(port) = self.metrics_port {
            config.metrics_port = port;
        }
        if self.leader_elect {
            config.leader_election = true;
        }
        if let Some(backend) = self.lock_backend {
            config.lock_backend = backend;
        }
        if self.disable_distributed_lock {
            config.lock_backend = LockBackend::Memory;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from([
            "backup-maker-controller",
            "--metrics-port",
            "9090",
            "--leader-elect",
            "--lock-backend",
            "memory",
        ]);
        let mut config = ControllerConfig::default();
        args.apply(&mut config);

        assert_eq!(config.metrics_port, 9090);
        assert!(config.leader_election);
        assert_eq!(config.lock_backend, LockBackend::Memory);
    }

    #[test]
    fn test_disable_distributed_lock_wins() {
        let args = Args::parse_from([
            "backup-maker-controller",
            "--lock-backend",
            "lease",
            "--disable-distributed-lock",
        ]);
        let mut config = ControllerConfig::default();
        args.apply(&mut config);
        assert_eq!(config.lock_backend, LockBackend::Memory);
    }

    #[test]
    fn test_no_flags_keep_config() {
        let args = Args::parse_from(["backup-maker-controller"]);
        let mut config = ControllerConfig::default();
        args.apply(&mut config);

        assert_eq!(config.metrics_port, ControllerConfig::default().metrics_port);
        assert!(!config.leader_election);
        assert_eq!(config.lock_backend, LockBackend::Lease);
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        let result = Args::try_parse_from(["backup-maker-controller", "--lock-backend", "etcd"]);
        assert!(result.is_err());
    }
}
