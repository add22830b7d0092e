use kube::core::GroupVersionKind;

use crate::crd::Operation;

pub fn secret_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("", "v1", "Secret")
}

pub fn config_map_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("", "v1", "ConfigMap")
}

pub fn job_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("batch", "v1", "Job")
}

pub fn cron_job_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("batch", "v1", "CronJob")
}

fn sealed_secret_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("bitnami.com", "v1alpha1", "SealedSecret")
}

fn external_secret_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("kubernetes-client.io", "v1", "ExternalSecret")
}

/// Ordered set of kinds an aggregate may apply and own
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceTypes {
    kinds: Vec<GroupVersionKind>,
}

impl ResourceTypes {
    /// Kinds a ScheduledBackup owns when rendering `rendered`.
    ///
    /// The CronJob only belongs to the rendering of the schedule's own
    /// operation, and only when the schedule has its cron trigger enabled.
    pub fn for_scheduled_backup(
        schedule_operation: Operation,
        cron_enabled: bool,
        rendered: Operation,
    ) -> Self {
        let mut kinds = vec![
            secret_gvk(),
            config_map_gvk(),
            sealed_secret_gvk(),
            external_secret_gvk(),
        ];
        if cron_enabled && schedule_operation == rendered {
            kinds.push(cron_job_gvk());
        }
        Self { kinds }
    }

    /// Kinds a RequestedBackupAction owns: a single runnable Job
    pub fn for_requested_backup_action() -> Self {
        Self {
            kinds: vec![job_gvk()],
        }
    }

    pub fn accepts(&self, gvk: &GroupVersionKind) -> bool {
        self.kinds.iter().any(|k| k == gvk)
    }

    pub fn kinds(&self) -> &[GroupVersionKind] {
        &self.kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_owns_cron_job_only_for_its_own_enabled_operation() {
        let backup = ResourceTypes::for_scheduled_backup(Operation::Backup, true, Operation::Backup);
        assert!(backup.accepts(&cron_job_gvk()));
        assert!(backup.accepts(&secret_gvk()));
        assert!(backup.accepts(&config_map_gvk()));
        assert!(!backup.accepts(&job_gvk()));

        let restore = ResourceTypes::for_scheduled_backup(Operation::Backup, true, Operation::Restore);
        assert!(!restore.accepts(&cron_job_gvk()));
        assert!(restore.accepts(&secret_gvk()));

        let disabled = ResourceTypes::for_scheduled_backup(Operation::Backup, false, Operation::Backup);
        assert!(!disabled.accepts(&cron_job_gvk()));
    }

    #[test]
    fn test_action_owns_only_jobs() {
        let types = ResourceTypes::for_requested_backup_action();
        assert_eq!(types.kinds(), &[job_gvk()]);
        assert!(!types.accepts(&cron_job_gvk()));
        assert!(!types.accepts(&secret_gvk()));
    }

    #[test]
    fn test_version_is_part_of_the_match() {
        let types = ResourceTypes::for_requested_backup_action();
        assert!(!types.accepts(&GroupVersionKind::gvk("batch", "v1beta1", "Job")));
    }
}
