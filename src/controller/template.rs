//! ClusterBackupProcedureTemplate loop.
//!
//! Nothing is reconciled. Running the loop keeps its reflector store warm so
//! template lookups are served from memory.

use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use tracing::debug;

use super::context::{Reconciler, ReconcilerError};
use crate::crd::ClusterBackupProcedureTemplate;

pub const KIND: &str = "ClusterBackupProcedureTemplate";

pub async fn reconcile(
    template: Arc<ClusterBackupProcedureTemplate>,
    _ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    debug!(template = %template.name_any(), "Template cached");
    Ok(Action::await_change())
}

pub fn error_policy(
    template: Arc<ClusterBackupProcedureTemplate>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    super::context::error_policy(KIND, template.as_ref(), error, &ctx)
}
