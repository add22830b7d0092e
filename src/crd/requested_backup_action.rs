use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::scheduled_backup::Operation;
use super::status::{ChildReference, Condition, JobHealthStatus};
use crate::constants::DEFAULT_ACTION_KIND_TYPE;

#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    kind = "RequestedBackupAction",
    group = "riotkit.org",
    version = "v1alpha1",
    namespaced,
    status = "RequestedBackupActionStatus",
    shortname = "rba",
    printcolumn = r#"{"name":"Action", "type":"string", "jsonPath":".spec.action"}, {"name":"Processed", "type":"boolean", "jsonPath":".status.processed"}, {"name":"Healthy", "type":"boolean", "jsonPath":".status.healthy"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RequestedBackupActionSpec {
    pub action: Operation,
    /// Version to restore, ignored for backups
    #[serde(default)]
    pub target_version: Option<String>,
    pub scheduled_backup_ref: ScheduledBackupRef,
    /// Workload kind passed to the template
    #[serde(default)]
    pub kind_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledBackupRef {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequestedBackupActionStatus {
    /// Once true the action is never processed again
    #[serde(default)]
    pub processed: bool,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub owned_references: Vec<ChildReference>,
    #[serde(default)]
    pub children_resources_health: Vec<JobHealthStatus>,
    #[serde(default)]
    pub healthy: bool,
}

impl RequestedBackupAction {
    pub fn is_processed(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.processed)
    }

    pub fn kind_type(&self) -> &str {
        self.spec
            .kind_type
            .as_deref()
            .filter(|k| !k.is_empty())
            .unwrap_or(DEFAULT_ACTION_KIND_TYPE)
    }

    pub fn owned_references(&self) -> &[ChildReference] {
        self.status
            .as_ref()
            .map(|s| s.owned_references.as_slice())
            .unwrap_or_default()
    }
}
