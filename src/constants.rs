//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// API group of every custom resource handled by the controller
pub const API_GROUP: &str = "riotkit.org";

/// API version of every custom resource handled by the controller
pub const API_VERSION: &str = "v1alpha1";

/// Name reported as the event source and used as field manager
pub const CONTROLLER_NAME: &str = "backup-maker-controller";

/// Label carrying the tracking id of every applied document
pub const LABEL_TRACKING_ID: &str = "riotkit.org/job-tracking-id";

/// Label put on GPG secrets generated by the controller
pub const LABEL_TYPE: &str = "riotkit.org/type";

/// Value of [`LABEL_TYPE`] for generated GPG secrets
pub const LABEL_TYPE_GPG_SECRET: &str = "GPGSecret";

/// Annotation holding the e-mail a generated GPG key was issued for
pub const ANNOTATION_EMAIL: &str = "riotkit.org/e-mail";

/// Condition type written by the schedule and action loops
pub const CONDITION_TYPE_INSTALLATION: &str = "BackupObjectsInstallation";

/// Condition reason written by the schedule and action loops
pub const CONDITION_REASON_SPEC_UPDATED: &str = "SpecWasUpdated";

/// Template kind selecting the internal template (no cluster lookup)
pub const INTERNAL_TEMPLATE_KIND: &str = "internal";

/// Variable path receiving the access token
pub const VAR_REPOSITORY_TOKEN: &str = "Repository.token";

/// Variable path receiving the GPG key selected for the operation
pub const VAR_GPG_KEY_CONTENT: &str = "HelmValues.gpgKeyContent";

/// Variable path receiving the workload kind of a requested action
pub const VAR_KIND_TYPE: &str = "HelmValues.kindType";

/// Default workload kind for a requested action
pub const DEFAULT_ACTION_KIND_TYPE: &str = "Job";

/// Default cron expression of a ScheduledBackup
pub const DEFAULT_CRON_SCHEDULE: &str = "00 02 * * *";

/// Window during which an in-progress condition blocks another schedule reconcile (seconds)
pub const RECONCILE_DEBOUNCE_SECS: i64 = 60;

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default lock lease TTL (seconds)
pub const DEFAULT_LOCK_TTL_SECS: u64 = 60;

/// Shortest lock lease TTL accepted from configuration (seconds)
pub const MIN_LOCK_TTL_SECS: u64 = 15;

/// Part of the lock lease TTL a reconcile pass may never use (seconds)
pub const LOCK_TTL_MARGIN_SECS: u64 = 10;

/// Default namespace holding lock and leader leases
pub const DEFAULT_LOCK_NAMESPACE: &str = "backup-maker-controller";

/// Name of the leader election lease
pub const LEADER_LEASE_NAME: &str = "backup-maker-controller-leader";

/// Default backup-maker generator binary
pub const DEFAULT_BACKUP_MAKER_BINARY: &str = "bmg";

/// Default gpg binary
pub const DEFAULT_GPG_BINARY: &str = "gpg";

/// Default deadline of a single reconcile pass (seconds)
pub const DEFAULT_RECONCILE_TIMEOUT_SECS: u64 = 45;

/// Default number of attempts of a status read-modify-write
pub const DEFAULT_STATUS_UPDATE_ATTEMPTS: u32 = 5;

/// Requeue delay when the lock is held by someone else (seconds)
pub const REQUEUE_ALREADY_LOCKED_SECS: u64 = 10;

/// Requeue delay when a dependency is not there yet (seconds)
pub const REQUEUE_MISSING_DEPENDENCY_SECS: u64 = 5;

/// Requeue delay after a failed schedule apply (seconds)
pub const REQUEUE_SCHEDULE_APPLY_FAILED_SECS: u64 = 60;

/// Requeue delay after a failed action apply (seconds)
pub const REQUEUE_ACTION_APPLY_FAILED_SECS: u64 = 15;

/// Requeue delay when the referenced ScheduledBackup cannot be read (seconds)
pub const REQUEUE_SCHEDULE_LOOKUP_FAILED_SECS: u64 = 30;

/// Requeue delay after a failed health lookup (seconds)
pub const REQUEUE_HEALTH_FAILED_SECS: u64 = 30;

/// Requeue delay while a requested action still runs (seconds)
pub const REQUEUE_ACTION_RUNNING_SECS: u64 = 10;

/// Number of polls while waiting for a deleted object to disappear
pub const DELETION_WAIT_ATTEMPTS: u32 = 20;

/// Interval between deletion polls (milliseconds)
pub const DELETION_WAIT_INTERVAL_MS: u64 = 500;

/// First delay of the error policy backoff (minutes)
pub const ERROR_BACKOFF_MIN_MINUTES: u64 = 1;

/// Cap of the error policy backoff (minutes)
pub const ERROR_BACKOFF_MAX_MINUTES: u64 = 10;
