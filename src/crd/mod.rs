//! # Custom Resource Definitions
//!
//! CRD types for the Backup Maker Controller.
//!
//! ## Module Structure
//!
//! - `scheduled_backup.rs` - ScheduledBackup, the long-lived backup definition
//! - `requested_backup_action.rs` - RequestedBackupAction, a one-shot backup or restore trigger
//! - `template.rs` - ClusterBackupProcedureTemplate, a cluster-wide procedure template
//! - `status.rs` - Status types shared by both namespaced resources

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;

mod requested_backup_action;
mod scheduled_backup;
mod status;
mod template;

pub use requested_backup_action::{
    RequestedBackupAction, RequestedBackupActionSpec, RequestedBackupActionStatus,
    ScheduledBackupRef,
};
pub use scheduled_backup::{
    spec_hash, CronJobSpec, GpgKeySecretSpec, Operation, ScheduledBackup, ScheduledBackupSpec,
    ScheduledBackupStatus, TemplateRef, TokenSecretSpec, VarsSecretSpec,
};
pub use status::{
    set_condition, ChildReference, Condition, ConditionStatus, JobHealthStatus,
};
pub use template::{ClusterBackupProcedureTemplate, ClusterBackupProcedureTemplateSpec};

/// Definitions of every custom resource, in install order
pub fn custom_resource_definitions() -> Vec<CustomResourceDefinition> {
    vec![
        ClusterBackupProcedureTemplate::crd(),
        ScheduledBackup::crd(),
        RequestedBackupAction::crd(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_resource_definitions() {
        let names: Vec<String> = custom_resource_definitions()
            .into_iter()
            .map(|crd| crd.metadata.name.unwrap_or_default())
            .collect();
        assert_eq!(
            names,
            vec![
                "clusterbackupproceduretemplates.riotkit.org",
                "scheduledbackups.riotkit.org",
                "requestedbackupactions.riotkit.org",
            ]
        );
    }

    #[test]
    fn test_template_is_cluster_scoped() {
        let crd = ClusterBackupProcedureTemplate::crd();
        assert_eq!(crd.spec.scope, "Cluster");
        assert_eq!(ScheduledBackup::crd().spec.scope, "Namespaced");
    }
}
