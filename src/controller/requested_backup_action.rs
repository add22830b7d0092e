//! # RequestedBackupAction loop
//!
//! Turns a one-shot backup or restore request into a single Job rendered from
//! the referenced schedule. A processed request is never rendered again.

use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::context::{instrumented, resource_key, Reconciler, ReconcilerError};
use super::status::{report_status_failure, update_status_with_retry, StatusError};
use crate::cluster::StatusApi;
use crate::constants::{
    REQUEUE_ACTION_APPLY_FAILED_SECS, REQUEUE_MISSING_DEPENDENCY_SECS,
    REQUEUE_SCHEDULE_LOOKUP_FAILED_SECS,
};
use crate::crd::{
    set_condition, ChildReference, Condition, ConditionStatus, RequestedBackupAction,
};
use crate::domain::Renderable;
use crate::events::{actions, reasons};
use crate::factory::ActionHint;
use crate::observability::metrics;

pub const KIND: &str = "RequestedBackupAction";

pub const MESSAGE_SUCCEEDED: &str = "Successfully templated and applied objects to the cluster";

pub async fn reconcile(
    action: Arc<RequestedBackupAction>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    instrumented(KIND, action.as_ref(), &ctx, reconcile_action(&action, &ctx)).await
}

pub fn error_policy(
    action: Arc<RequestedBackupAction>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    super::context::error_policy(KIND, action.as_ref(), error, &ctx)
}

async fn reconcile_action(
    action: &RequestedBackupAction,
    ctx: &Reconciler,
) -> Result<Action, ReconcilerError> {
    if action.meta().deletion_timestamp.is_some() {
        return Ok(Action::await_change());
    }
    if action.is_processed() {
        debug!("Action was already processed");
        return Ok(Action::await_change());
    }

    let key = resource_key(KIND, action);
    ctx.locked(key.clone(), async {
        let result = ctx.within_deadline(&key, process_action(action, ctx)).await;
        if let Err(e @ ReconcilerError::Timeout { .. }) = &result {
            let message = format!("Cannot template or apply objects to the cluster: {e}");
            let _ = mark(ctx, action, ConditionStatus::False, &message, None).await;
            warn_event(ctx, action, message).await;
        }
        result
    })
    .await
}

async fn process_action(
    action: &RequestedBackupAction,
    ctx: &Reconciler,
) -> Result<Action, ReconcilerError> {
    // The watch cache may lag behind a status written by a pass that just finished
    let namespace = action.namespace().unwrap_or_default();
    let fresh: RequestedBackupAction =
        StatusApi::<RequestedBackupAction>::get_latest(
            ctx.cluster.as_ref(),
            &namespace,
            &action.name_any(),
        )
        .await
        .map_err(|source| StatusError::Fetch {
            name: format!("{namespace}/{}", action.name_any()),
            source,
        })?;
    if fresh.is_processed() {
        debug!("Action was processed by a concurrent pass");
        return Ok(Action::await_change());
    }

    let schedule_name = &action.spec.scheduled_backup_ref.name;
    let backup = match ctx
        .cluster
        .get_scheduled_backup(&namespace, schedule_name)
        .await
    {
        Ok(backup) => backup,
        Err(source) => {
            let error = ReconcilerError::ScheduledBackupLookup {
                name: schedule_name.clone(),
                source,
            };
            let message = format!("Cannot find required dependencies: {error}");
            let _ = mark(ctx, action, ConditionStatus::False, &message, None).await;
            warn_event(ctx, action, message).await;
            metrics::increment_requeues(KIND, "missing-schedule");
            return Ok(Action::requeue(Duration::from_secs(
                REQUEUE_SCHEDULE_LOOKUP_FAILED_SECS,
            )));
        }
    };

    let mut aggregate = match ctx
        .factory
        .hydrate_requested_backup_action(action, &backup)
        .await
    {
        Ok(aggregate) => aggregate,
        Err(e) => {
            let message = format!("Cannot find required dependencies: {e}");
            let _ = mark(ctx, action, ConditionStatus::False, &message, None).await;
            warn_event(ctx, action, message).await;
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

    if let Err(e) = ctx.engine.apply(&mut aggregate).await {
        let message = format!("Cannot template or apply objects to the cluster: {e}");
        let _ = mark(ctx, action, ConditionStatus::False, &message, None).await;
        warn_event(ctx, action, message).await;
        if e.is_fatal() {
            return Err(e.into());
        }
        metrics::increment_requeues(KIND, "apply-failed");
        return Ok(Action::requeue(Duration::from_secs(
            REQUEUE_ACTION_APPLY_FAILED_SECS,
        )));
    }

    let owned = aggregate.owned_references().to_vec();
    info!(
        operation = %aggregate.operation(),
        children = owned.len(),
        "RequestedBackupAction processed"
    );
    mark(ctx, action, ConditionStatus::True, MESSAGE_SUCCEEDED, Some(owned)).await?;
    ctx.events
        .publish(
            &action.object_ref(&()),
            EventType::Normal,
            reasons::UPDATED,
            actions::RECONCILE,
            Some(MESSAGE_SUCCEEDED.to_string()),
        )
        .await;

    Ok(Action::await_change())
}

/// Write the installation condition; `processed` is set together with the children
async fn mark(
    ctx: &Reconciler,
    action: &RequestedBackupAction,
    status: ConditionStatus,
    message: &str,
    processed_with: Option<Vec<ChildReference>>,
) -> Result<(), StatusError> {
    let condition = Condition::installation(status, message, action.meta().generation);
    let result = update_status_with_retry(
        ctx.cluster.as_ref(),
        &action.namespace().unwrap_or_default(),
        &action.name_any(),
        ctx.config.status_update_attempts,
        |latest: &mut RequestedBackupAction| {
            let status = latest.status.get_or_insert_with(Default::default);
            set_condition(&mut status.conditions, condition.clone(), chrono::Utc::now());
            if let Some(owned) = &processed_with {
                status.processed = true;
                status.owned_references = owned.clone();
            }
        },
    )
    .await;

    if let Err(e) = &result {
        report_status_failure(ctx.events.as_ref(), &action.object_ref(&()), e).await;
        if processed_with.is_some() {
            warn!("Objects were applied but the action is not marked processed yet");
        }
    }
    result.map(|_| ())
}

async fn warn_event(ctx: &Reconciler, action: &RequestedBackupAction, message: String) {
    ctx.events
        .publish(
            &action.object_ref(&()),
            EventType::Warning,
            reasons::ERROR_OCCURRED,
            actions::RECONCILE,
            Some(message),
        )
        .await;
}
