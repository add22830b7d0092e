//! # Health observers
//!
//! Read the health of owned children and mirror it into the owner's status.
//! Triggered by the owner and by changes of the Jobs and CronJobs it owns.

use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::context::{instrumented, resource_key, Reconciler, ReconcilerError};
use super::status::{report_status_failure, update_status_with_retry};
use super::{requested_backup_action, scheduled_backup};
use crate::cluster::{ClusterClient, StatusApi};
use crate::constants::{REQUEUE_ACTION_RUNNING_SECS, REQUEUE_HEALTH_FAILED_SECS};
use crate::crd::{ChildReference, JobHealthStatus, RequestedBackupAction, ScheduledBackup};
use crate::events::{actions, reasons};
use crate::health::HealthReport;
use crate::observability::metrics;

const SCHEDULE_OBSERVER: &str = "ScheduledBackupObserver";
const ACTION_OBSERVER: &str = "RequestedBackupActionObserver";

pub async fn observe_scheduled_backup(
    backup: Arc<ScheduledBackup>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    instrumented(SCHEDULE_OBSERVER, backup.as_ref(), &ctx, async {
        if backup.meta().deletion_timestamp.is_some() {
            return Ok(Action::await_change());
        }
        let key = resource_key(scheduled_backup::KIND, backup.as_ref());
        let pass = observe(&ctx, backup.as_ref(), SCHEDULE_OBSERVER, false);
        ctx.locked(key.clone(), ctx.within_deadline(&key, pass))
            .await
    })
    .await
}

pub async fn observe_requested_backup_action(
    action: Arc<RequestedBackupAction>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    instrumented(ACTION_OBSERVER, action.as_ref(), &ctx, async {
        if action.meta().deletion_timestamp.is_some() {
            return Ok(Action::await_change());
        }
        let key = resource_key(requested_backup_action::KIND, action.as_ref());
        let pass = observe(&ctx, action.as_ref(), ACTION_OBSERVER, true);
        ctx.locked(key.clone(), ctx.within_deadline(&key, pass))
            .await
    })
    .await
}

pub fn schedule_error_policy(
    backup: Arc<ScheduledBackup>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    super::context::error_policy(SCHEDULE_OBSERVER, backup.as_ref(), error, &ctx)
}

pub fn action_error_policy(
    action: Arc<RequestedBackupAction>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    super::context::error_policy(ACTION_OBSERVER, action.as_ref(), error, &ctx)
}

/// Owner kinds whose status carries child health
pub trait HealthOwner: Resource<DynamicType = ()> + ResourceExt + Send + Sync {
    fn owned_children(&self) -> &[ChildReference];

    fn recorded_health(&self) -> (&[JobHealthStatus], bool);

    fn record_health(&mut self, report: &HealthReport);
}

impl HealthOwner for ScheduledBackup {
    fn owned_children(&self) -> &[ChildReference] {
        self.owned_references()
    }

    fn recorded_health(&self) -> (&[JobHealthStatus], bool) {
        match self.status.as_ref() {
            Some(s) => (s.children_resources_health.as_slice(), s.healthy),
            None => (&[][..], false),
        }
    }

    fn record_health(&mut self, report: &HealthReport) {
        let status = self.status.get_or_insert_with(Default::default);
        status.children_resources_health = report.statuses.clone();
        status.healthy = report.healthy;
    }
}

impl HealthOwner for RequestedBackupAction {
    fn owned_children(&self) -> &[ChildReference] {
        self.owned_references()
    }

    fn recorded_health(&self) -> (&[JobHealthStatus], bool) {
        match self.status.as_ref() {
            Some(s) => (s.children_resources_health.as_slice(), s.healthy),
            None => (&[][..], false),
        }
    }

    fn record_health(&mut self, report: &HealthReport) {
        let status = self.status.get_or_insert_with(Default::default);
        status.children_resources_health = report.statuses.clone();
        status.healthy = report.healthy;
    }
}

/// Whether `report` differs from what the owner already shows
pub fn health_changed<K: HealthOwner>(owner: &K, report: &HealthReport) -> bool {
    let (statuses, healthy) = owner.recorded_health();
    statuses != report.statuses.as_slice() || healthy != report.healthy
}

async fn observe<K>(
    ctx: &Reconciler,
    owner: &K,
    observer: &'static str,
    wait_while_running: bool,
) -> Result<Action, ReconcilerError>
where
    K: HealthOwner + Clone + std::fmt::Debug,
    dyn ClusterClient: StatusApi<K>,
{
    let namespace = owner.namespace().unwrap_or_default();
    let report = match ctx
        .health
        .report(owner.owned_children(), &namespace)
        .await
    {
        Ok(report) => report,
        Err(e) => {
            warn!("Cannot read health of owned objects: {}", e);
            ctx.events
                .publish(
                    &owner.object_ref(&()),
                    EventType::Warning,
                    reasons::ERROR_OCCURRED,
                    actions::OBSERVE,
                    Some(format!("Cannot read health of owned objects: {e}")),
                )
                .await;
            metrics::increment_requeues(observer, "health-failed");
            return Ok(Action::requeue(Duration::from_secs(
                REQUEUE_HEALTH_FAILED_SECS,
            )));
        }
    };

    if wait_while_running && report.is_running() {
        debug!("Owned objects are still running, checking again later");
        metrics::increment_requeues(observer, "running");
        return Ok(Action::requeue(Duration::from_secs(
            REQUEUE_ACTION_RUNNING_SECS,
        )));
    }

    if !health_changed(owner, &report) {
        debug!(healthy = report.healthy, "Health unchanged");
        return Ok(Action::await_change());
    }

    let result = update_status_with_retry(
        ctx.cluster.as_ref(),
        &namespace,
        &owner.name_any(),
        ctx.config.status_update_attempts,
        |latest: &mut K| latest.record_health(&report),
    )
    .await;
    if let Err(e) = result {
        report_status_failure(ctx.events.as_ref(), &owner.object_ref(&()), &e).await;
        return Err(e.into());
    }

    debug!(
        healthy = report.healthy,
        children = report.statuses.len(),
        "Health recorded"
    );
    Ok(Action::await_change())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::GroupVersionKind;

    fn action() -> RequestedBackupAction {
        let spec = serde_yaml::from_str("action: backup\nscheduledBackupRef:\n  name: app1\n")
            .unwrap();
        RequestedBackupAction::new("backup-app1", spec)
    }

    fn succeeded(id: &str) -> JobHealthStatus {
        JobHealthStatus::succeeded(
            ChildReference::new(&GroupVersionKind::gvk("batch", "v1", "Job"), id),
            "done",
        )
    }

    #[test]
    fn test_fresh_owner_sees_healthy_report_as_changed() {
        let report = HealthReport {
            statuses: vec![succeeded("a")],
            healthy: true,
        };
        assert!(health_changed(&action(), &report));
    }

    #[test]
    fn test_recorded_report_is_unchanged() {
        let report = HealthReport {
            statuses: vec![succeeded("a")],
            healthy: true,
        };
        let mut owner = action();
        owner.record_health(&report);

        assert!(!health_changed(&owner, &report));
        assert!(health_changed(
            &owner,
            &HealthReport {
                statuses: vec![succeeded("a")],
                healthy: false,
            }
        ));
    }
}
