//! # ScheduledBackup loop
//!
//! Renders the helper objects of both operations plus the CronJob of the
//! scheduled one, and applies them whenever the spec hash moves.

use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::context::{instrumented, resource_key, Reconciler, ReconcilerError};
use super::status::{report_status_failure, update_status_with_retry, StatusError};
use crate::constants::{REQUEUE_MISSING_DEPENDENCY_SECS, REQUEUE_SCHEDULE_APPLY_FAILED_SECS};
use crate::crd::{
    set_condition, spec_hash, ChildReference, Condition, ConditionStatus, ScheduledBackup,
};
use crate::domain::Renderable;
use crate::events::{actions, reasons};
use crate::factory::ActionHint;
use crate::observability::metrics;

pub const KIND: &str = "ScheduledBackup";

pub const MESSAGE_IN_PROGRESS: &str =
    "Reconciling to template and push target objects to the cluster (Jobs/CronJobs and related things)";
pub const MESSAGE_SUCCEEDED: &str = "Successfully templated and applied objects to the cluster";

pub async fn reconcile(
    backup: Arc<ScheduledBackup>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    instrumented(KIND, backup.as_ref(), &ctx, reconcile_scheduled_backup(&backup, &ctx)).await
}

pub fn error_policy(
    backup: Arc<ScheduledBackup>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    super::context::error_policy(KIND, backup.as_ref(), error, &ctx)
}

async fn reconcile_scheduled_backup(
    backup: &ScheduledBackup,
    ctx: &Reconciler,
) -> Result<Action, ReconcilerError> {
    if backup.meta().deletion_timestamp.is_some() {
        debug!("ScheduledBackup is being deleted, nothing to do");
        return Ok(Action::await_change());
    }
    if !backup.has_spec_changed() {
        debug!("Spec unchanged since last apply, skipping");
        return Ok(Action::await_change());
    }
    if let Some(left) = backup.reconcile_in_progress_for(chrono::Utc::now()) {
        let delay = left.to_std().unwrap_or(Duration::from_secs(1));
        debug!("Another reconcile is in progress, retrying in {}s", delay.as_secs());
        metrics::increment_requeues(KIND, "in-progress");
        return Ok(Action::requeue(delay));
    }

    let key = resource_key(KIND, backup);
    ctx.locked(key.clone(), async {
        let result = ctx
            .within_deadline(&key, apply_scheduled_backup(backup, ctx))
            .await;
        if let Err(e @ ReconcilerError::Timeout { .. }) = &result {
            let message = format!("Cannot template or apply objects to the cluster: {e}");
            let _ = mark(ctx, backup, ConditionStatus::False, &message, None).await;
            warn_event(ctx, backup, message).await;
        }
        result
    })
    .await
}

async fn apply_scheduled_backup(
    backup: &ScheduledBackup,
    ctx: &Reconciler,
) -> Result<Action, ReconcilerError> {
    let mut aggregate = match ctx.factory.hydrate_scheduled_backup(backup, None).await {
        Ok(aggregate) => aggregate,
        Err(e) => {
            let message = format!("Cannot find required dependencies: {e}");
            let _ = mark(ctx, backup, ConditionStatus::False, &message, None).await;
            warn_event(ctx, backup, message).await;
            return match e.hint() {
                ActionHint::Requeue => {
                    metrics::increment_requeues(KIND, "missing-dependency");
                    Ok(Action::requeue(Duration::from_secs(
                        REQUEUE_MISSING_DEPENDENCY_SECS,
                    )))
                }
                ActionHint::None => Err(e.into()),
            };
        }
    };

    let _ = mark(ctx, backup, ConditionStatus::Unknown, MESSAGE_IN_PROGRESS, None).await;

    if let Err(e) = ctx.engine.apply(&mut aggregate).await {
        let message = format!("Cannot template or apply objects to the cluster: {e}");
        let _ = mark(ctx, backup, ConditionStatus::False, &message, None).await;
        warn_event(ctx, backup, message).await;
        if e.is_fatal() {
            return Err(e.into());
        }
        metrics::increment_requeues(KIND, "apply-failed");
        return Ok(Action::requeue(Duration::from_secs(
            REQUEUE_SCHEDULE_APPLY_FAILED_SECS,
        )));
    }

    let applied = Applied {
        spec_hash: spec_hash(&backup.spec),
        owned_references: aggregate.owned_references().to_vec(),
    };
    mark(
        ctx,
        backup,
        ConditionStatus::True,
        MESSAGE_SUCCEEDED,
        Some(applied),
    )
    .await?;
    info!(
        children = aggregate.owned_references().len(),
        "ScheduledBackup applied"
    );
    ctx.events
        .publish(
            &backup.object_ref(&()),
            EventType::Normal,
            reasons::UPDATED,
            actions::RECONCILE,
            Some(MESSAGE_SUCCEEDED.to_string()),
        )
        .await;

    Ok(Action::await_change())
}

/// What a successful pass records next to its condition
struct Applied {
    spec_hash: String,
    owned_references: Vec<ChildReference>,
}

/// Write the installation condition, reporting a write that gave up
async fn mark(
    ctx: &Reconciler,
    backup: &ScheduledBackup,
    status: ConditionStatus,
    message: &str,
    applied: Option<Applied>,
) -> Result<(), StatusError> {
    let condition = Condition::installation(status, message, backup.meta().generation);
    let result = update_status_with_retry(
        ctx.cluster.as_ref(),
        &backup.namespace().unwrap_or_default(),
        &backup.name_any(),
        ctx.config.status_update_attempts,
        |latest: &mut ScheduledBackup| {
            let now = chrono::Utc::now();
            let status = latest.status.get_or_insert_with(Default::default);
            set_condition(&mut status.conditions, condition.clone(), now);
            if let Some(applied) = &applied {
                status.last_applied_spec_hash = applied.spec_hash.clone();
                status.owned_references = applied.owned_references.clone();
            }
        },
    )
    .await;

    if let Err(e) = &result {
        report_status_failure(ctx.events.as_ref(), &backup.object_ref(&()), e).await;
    }
    result.map(|_| ())
}

async fn warn_event(ctx: &Reconciler, backup: &ScheduledBackup, message: String) {
    ctx.events
        .publish(
            &backup.object_ref(&()),
            EventType::Warning,
            reasons::ERROR_OCCURRED,
            actions::RECONCILE,
            Some(message),
        )
        .await;
}
