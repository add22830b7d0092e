use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use super::status::{ChildReference, Condition, ConditionStatus, JobHealthStatus};
use crate::constants::{DEFAULT_CRON_SCHEDULE, INTERNAL_TEMPLATE_KIND, RECONCILE_DEBOUNCE_SECS};

/// Backup or restore processing path
#[derive(Debug, Clone, Copy, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    #[default]
    Backup,
    Restore,
}

impl Operation {
    pub const ALL: [Operation; 2] = [Operation::Backup, Operation::Restore];

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Backup => "backup",
            Operation::Restore => "restore",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    kind = "ScheduledBackup",
    group = "riotkit.org",
    version = "v1alpha1",
    namespaced,
    status = "ScheduledBackupStatus",
    shortname = "sb",
    printcolumn = r#"{"name":"Operation", "type":"string", "jsonPath":".spec.operation"}, {"name":"Healthy", "type":"boolean", "jsonPath":".status.healthy"}, {"name":"Installed", "type":"string", "jsonPath":".status.conditions[?(@.type==\"BackupObjectsInstallation\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledBackupSpec {
    /// Collection id on the backup repository server
    pub collection_id: String,
    pub template_ref: TemplateRef,
    pub gpg_key_secret_ref: GpgKeySecretSpec,
    pub token_secret_ref: TokenSecretSpec,
    #[serde(default)]
    pub vars_secret_ref: VarsSecretSpec,
    /// YAML document merged into the template variables
    #[serde(default)]
    pub vars: String,
    #[serde(default)]
    pub cron_job: CronJobSpec,
    #[serde(default)]
    pub operation: Operation,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TemplateRef {
    pub name: String,
    /// `internal` or `ClusterBackupProcedureTemplate`
    #[serde(default = "default_template_kind")]
    pub kind: String,
}

impl TemplateRef {
    pub fn is_internal(&self) -> bool {
        self.kind == INTERNAL_TEMPLATE_KIND
    }
}

/// Secret holding the GPG key pair.
///
/// The `*_key` fields are names of entries inside the secret.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GpgKeySecretSpec {
    pub secret_name: String,
    #[serde(default = "default_public_key")]
    pub public_key: String,
    #[serde(default = "default_private_key")]
    pub private_key: String,
    #[serde(default = "default_passphrase_key")]
    pub passphrase_key: String,
    /// Identity the key pair is generated for
    #[serde(default)]
    pub email: String,
    #[serde(default = "default_email_key")]
    pub email_key: String,
    #[serde(default)]
    pub create_if_not_exists: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenSecretSpec {
    pub secret_name: String,
    pub token_key: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VarsSecretSpec {
    #[serde(default)]
    pub secret_name: String,
    /// When not empty only these entries are imported
    #[serde(default)]
    pub import_only_keys: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CronJobSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_schedule_every")]
    pub schedule_every: String,
}

impl Default for CronJobSpec {
    fn default() -> Self {
        Self {
            enabled: false,
            schedule_every: default_schedule_every(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledBackupStatus {
    #[serde(default)]
    pub last_applied_spec_hash: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub owned_references: Vec<ChildReference>,
    #[serde(default)]
    pub children_resources_health: Vec<JobHealthStatus>,
    #[serde(default)]
    pub healthy: bool,
}

fn default_template_kind() -> String {
    "ClusterBackupProcedureTemplate".to_string()
}

fn default_public_key() -> String {
    "key.pub".to_string()
}

fn default_private_key() -> String {
    "key".to_string()
}

fn default_passphrase_key() -> String {
    "passphrase".to_string()
}

fn default_email_key() -> String {
    "email".to_string()
}

fn default_schedule_every() -> String {
    DEFAULT_CRON_SCHEDULE.to_string()
}

/// SHA-256 of the JSON form of a spec, hex encoded
pub fn spec_hash<S: Serialize>(spec: &S) -> String {
    let serialized = serde_json::to_vec(spec).unwrap_or_default();
    format!("{:x}", Sha256::digest(&serialized))
}

impl ScheduledBackup {
    pub fn has_spec_changed(&self) -> bool {
        let last_applied = self
            .status
            .as_ref()
            .map(|s| s.last_applied_spec_hash.as_str())
            .unwrap_or_default();
        spec_hash(&self.spec) != last_applied
    }

    /// Time left until an in-progress condition stops blocking new reconciles.
    ///
    /// `None` when no condition went `Unknown` within the debounce window.
    pub fn reconcile_in_progress_for(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        let window = chrono::Duration::seconds(RECONCILE_DEBOUNCE_SECS);
        self.status
            .as_ref()?
            .conditions
            .iter()
            .filter(|c| c.status == ConditionStatus::Unknown)
            .filter_map(Condition::transitioned_at)
            .map(|at| window - (now - at))
            .filter(|left| *left > chrono::Duration::zero())
            .max()
    }

    pub fn is_being_reconciled_already(&self, now: DateTime<Utc>) -> bool {
        self.reconcile_in_progress_for(now).is_some()
    }

    pub fn owned_references(&self) -> &[ChildReference] {
        self.status
            .as_ref()
            .map(|s| s.owned_references.as_slice())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::set_condition;
    use kube::api::ObjectMeta;

    pub(crate) fn backup() -> ScheduledBackup {
        let spec: ScheduledBackupSpec = serde_yaml::from_str(
            r#"
collectionId: "111-222-333-444"
templateRef:
  name: pg15
gpgKeySecretRef:
  secretName: backup-keys
  email: backups@example.org
  createIfNotExists: true
tokenSecretRef:
  secretName: backup-token
  tokenKey: token
operation: backup
cronJob:
  enabled: true
"#,
        )
        .unwrap();
        ScheduledBackup {
            metadata: ObjectMeta {
                name: Some("app1".to_string()),
                namespace: Some("backups".to_string()),
                ..Default::default()
            },
            spec,
            status: None,
        }
    }

    #[test]
    fn test_spec_defaults() {
        let backup = backup();
        assert_eq!(backup.spec.gpg_key_secret_ref.public_key, "key.pub");
        assert_eq!(backup.spec.gpg_key_secret_ref.private_key, "key");
        assert_eq!(backup.spec.cron_job.schedule_every, "00 02 * * *");
        assert_eq!(backup.spec.template_ref.kind, "ClusterBackupProcedureTemplate");
        assert!(backup.spec.vars_secret_ref.secret_name.is_empty());
    }

    #[test]
    fn test_spec_hash_is_stable_and_content_sensitive() {
        let a = backup();
        let mut b = backup();
        assert_eq!(spec_hash(&a.spec), spec_hash(&b.spec));
        assert_eq!(spec_hash(&a.spec).len(), 64);

        b.spec.cron_job.schedule_every = "00 03 * * *".to_string();
        assert_ne!(spec_hash(&a.spec), spec_hash(&b.spec));
    }

    #[test]
    fn test_has_spec_changed() {
        let mut backup = backup();
        assert!(backup.has_spec_changed());

        backup.status = Some(ScheduledBackupStatus {
            last_applied_spec_hash: spec_hash(&backup.spec),
            ..Default::default()
        });
        assert!(!backup.has_spec_changed());
    }

    #[test]
    fn test_debounce_window() {
        let mut backup = backup();
        let now = Utc::now();
        let mut status = ScheduledBackupStatus::default();
        set_condition(
            &mut status.conditions,
            Condition::installation(ConditionStatus::Unknown, "working", None),
            now - chrono::Duration::seconds(20),
        );
        backup.status = Some(status);

        let left = backup.reconcile_in_progress_for(now).unwrap();
        assert!(left <= chrono::Duration::seconds(40));
        assert!(backup.is_being_reconciled_already(now));

        // A stuck in-progress condition stops blocking once the window is over
        assert!(!backup.is_being_reconciled_already(now + chrono::Duration::seconds(41)));
    }

    #[test]
    fn test_finished_condition_does_not_debounce() {
        let mut backup = backup();
        let now = Utc::now();
        let mut status = ScheduledBackupStatus::default();
        set_condition(
            &mut status.conditions,
            Condition::installation(ConditionStatus::True, "done", None),
            now,
        );
        backup.status = Some(status);

        assert!(!backup.is_being_reconciled_already(now));
    }
}
