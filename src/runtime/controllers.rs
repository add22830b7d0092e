//! # Control loops
//!
//! One kube-runtime `Controller` per loop, all sharing a single [`Reconciler`].
//!
//! | loop                        | watches                              |
//! |-----------------------------|--------------------------------------|
//! | ScheduledBackup             | ScheduledBackup                      |
//! | RequestedBackupAction       | RequestedBackupAction                |
//! | ScheduledBackup observer    | ScheduledBackup, owned Jobs/CronJobs |
//! | RequestedBackupAction obs.  | RequestedBackupAction, owned Jobs    |
//! | templates                   | ClusterBackupProcedureTemplate       |

use futures::StreamExt;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use kube::api::Api;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::{Client, Resource};
use kube_runtime::controller::{self, Controller};
use kube_runtime::watcher;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cluster::KubeCluster;
use crate::config::{ControllerConfig, LockBackend};
use crate::constants::CONTROLLER_NAME;
use crate::controller::{
    observer, requested_backup_action, scheduled_backup, template, Reconciler, ReconcilerError,
};
use crate::crd::{ClusterBackupProcedureTemplate, RequestedBackupAction, ScheduledBackup};
use crate::events::KubeEventPublisher;
use crate::gpg::GpgCliKeyPairProvider;
use crate::locking::{InMemoryLocker, LeaseLocker, Locker};
use crate::render::BackupMakerRenderer;

/// Build the shared context against a live cluster.
///
/// Templates are served from `templates`, the reflector store of the template loop.
pub fn build_reconciler(
    client: Client,
    config: ControllerConfig,
    templates: Store<ClusterBackupProcedureTemplate>,
) -> Reconciler {
    let locker: Arc<dyn Locker> = match config.lock_backend {
        LockBackend::Lease => Arc::new(LeaseLocker::new(
            client.clone(),
            &config.lock_namespace,
            &config.identity,
            config.lock_ttl(),
        )),
        LockBackend::Memory => Arc::new(InMemoryLocker::new()),
    };
    info!(backend = ?config.lock_backend, "Lock manager selected");

    let cluster = Arc::new(KubeCluster::new(client.clone()).with_template_cache(templates));
    Reconciler::new(
        cluster,
        locker,
        Arc::new(BackupMakerRenderer::new(config.backup_maker_binary.clone())),
        Arc::new(GpgCliKeyPairProvider::new(config.gpg_binary.clone())),
        Arc::new(KubeEventPublisher::new(client, CONTROLLER_NAME)),
        config,
    )
}

fn controller_config(config: &ControllerConfig) -> controller::Config {
    controller::Config::default().concurrency(config.max_concurrent_reconciliations)
}

/// Drain a controller's output, logging failures the error policy already handled
async fn drain<K>(
    loop_name: &'static str,
    stream: impl futures::Stream<
        Item = Result<
            (ObjectRef<K>, controller::Action),
            controller::Error<ReconcilerError, watcher::Error>,
        >,
    >,
) where
    K: Resource + Debug,
    K::DynamicType: Debug + Clone + Eq + std::hash::Hash,
{
    stream
        .for_each(|result| async move {
            match result {
                Ok((object, action)) => debug!(%loop_name, object = %object, ?action, "Reconciled"),
                Err(e) => warn!(%loop_name, "Control loop error: {}", e),
            }
        })
        .await;
    info!(%loop_name, "Control loop stopped");
}

/// Run every control loop until a shutdown signal arrives
pub async fn run(client: Client, config: ControllerConfig) {
    let settings = controller_config(&config);
    let templates = Controller::new(
        Api::<ClusterBackupProcedureTemplate>::all(client.clone()),
        watcher::Config::default(),
    )
    .with_config(settings.clone());
    let ctx = Arc::new(build_reconciler(client.clone(), config, templates.store()));

    let schedules = Controller::new(
        Api::<ScheduledBackup>::all(client.clone()),
        watcher::Config::default(),
    )
    .with_config(settings.clone())
    .shutdown_on_signal()
    .run(scheduled_backup::reconcile, scheduled_backup::error_policy, ctx.clone());

    let actions = Controller::new(
        Api::<RequestedBackupAction>::all(client.clone()),
        watcher::Config::default(),
    )
    .with_config(settings.clone())
    .shutdown_on_signal()
    .run(
        requested_backup_action::reconcile,
        requested_backup_action::error_policy,
        ctx.clone(),
    );

    let schedule_observer = Controller::new(
        Api::<ScheduledBackup>::all(client.clone()),
        watcher::Config::default(),
    )
    .owns(Api::<Job>::all(client.clone()), watcher::Config::default())
    .owns(Api::<CronJob>::all(client.clone()), watcher::Config::default())
    .with_config(settings.clone())
    .shutdown_on_signal()
    .run(
        observer::observe_scheduled_backup,
        observer::schedule_error_policy,
        ctx.clone(),
    );

    let action_observer = Controller::new(
        Api::<RequestedBackupAction>::all(client.clone()),
        watcher::Config::default(),
    )
    .owns(Api::<Job>::all(client.clone()), watcher::Config::default())
    .with_config(settings)
    .shutdown_on_signal()
    .run(
        observer::observe_requested_backup_action,
        observer::action_error_policy,
        ctx.clone(),
    );

    let templates = templates
        .shutdown_on_signal()
        .run(template::reconcile, template::error_policy, ctx);

    info!("Control loops started");
    tokio::join!(
        drain("templates", templates),
        drain("scheduledbackup", schedules),
        drain("requestedbackupaction", actions),
        drain("scheduledbackup-observer", schedule_observer),
        drain("requestedbackupaction-observer", action_observer),
    );
}
