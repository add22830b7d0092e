//! # Controller
//!
//! Reconcile functions of every control loop.
//!
//! - `scheduled_backup`: renders and applies the objects of a ScheduledBackup
//! - `requested_backup_action`: renders and applies the Job of a one-shot request
//! - `observer`: mirrors the health of owned children into the owner's status
//! - `template`: keeps the ClusterBackupProcedureTemplate cache warm
//! - `context`: shared state, locking and deadline around a pass, error policy
//! - `status`: status writes with retry on version conflicts
//! - `backoff`: Fibonacci backoff used by the error policy

pub mod backoff;
pub mod context;
pub mod observer;
pub mod requested_backup_action;
pub mod scheduled_backup;
pub mod status;
pub mod template;

pub use context::{Reconciler, ReconcilerError};
pub use status::{update_status_with_retry, StatusError};
