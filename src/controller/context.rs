//! Shared state of every control loop and the plumbing around a reconcile pass.

use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn, Instrument};

use super::backoff::BackoffState;
use super::status::StatusError;
use crate::apply::{ApplyEngine, ApplyError};
use crate::cluster::{ClusterClient, ClusterError};
use crate::config::ControllerConfig;
use crate::constants::REQUEUE_ALREADY_LOCKED_SECS;
use crate::events::EventPublisher;
use crate::factory::{AggregateFactory, HydrationError};
use crate::gpg::KeyPairProvider;
use crate::health::{HealthAggregator, KubernetesJobResourceType};
use crate::locking::{lock_key, LockError, Locker};
use crate::observability::metrics;
use crate::render::Renderer;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("{0}")]
    Hydration(#[from] HydrationError),

    #[error("{0}")]
    Apply(#[from] ApplyError),

    #[error(transparent)]
    Status(#[from] StatusError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("cannot read ScheduledBackup '{name}': {source}")]
    ScheduledBackupLookup {
        name: String,
        #[source]
        source: ClusterError,
    },

    #[error("reconcile of {key} did not finish within {after:?}")]
    Timeout { key: String, after: Duration },
}

/// Context handed to every control loop
pub struct Reconciler {
    pub cluster: Arc<dyn ClusterClient>,
    pub locker: Arc<dyn Locker>,
    pub factory: AggregateFactory,
    pub engine: ApplyEngine,
    pub health: HealthAggregator,
    pub events: Arc<dyn EventPublisher>,
    pub config: ControllerConfig,
    // Keyed like locks, see `lock_key`
    backoff_states: Mutex<HashMap<String, BackoffState>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("factory", &self.factory)
            .field("engine", &self.engine)
            .field("health", &self.health)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new<C>(
        cluster: Arc<C>,
        locker: Arc<dyn Locker>,
        renderer: Arc<dyn Renderer>,
        key_pairs: Arc<dyn KeyPairProvider>,
        events: Arc<dyn EventPublisher>,
        config: ControllerConfig,
    ) -> Self
    where
        C: ClusterClient + 'static,
    {
        let health = HealthAggregator::new()
            .register(Arc::new(KubernetesJobResourceType::new(cluster.clone())));
        Self {
            factory: AggregateFactory::new(cluster.clone(), key_pairs),
            engine: ApplyEngine::new(cluster.clone(), renderer, events.clone()),
            health,
            cluster,
            locker,
            events,
            config,
            backoff_states: Mutex::new(HashMap::new()),
        }
    }

    /// Run `work` while holding the lock of `key`.
    ///
    /// A lock held by someone else is not an error, the key is requeued shortly.
    pub async fn locked<Fut>(&self, key: String, work: Fut) -> Result<Action, ReconcilerError>
    where
        Fut: Future<Output = Result<Action, ReconcilerError>>,
    {
        let session = match self.locker.obtain(&key).await {
            Ok(session) => session,
            Err(LockError::AlreadyLocked(_)) => {
                debug!(lock.key = %key, "Already locked, requeueing");
                return Ok(Action::requeue(Duration::from_secs(
                    REQUEUE_ALREADY_LOCKED_SECS,
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let result = work.await;
        self.locker.release(session).await;
        result
    }

    /// Bound `work` by the reconcile deadline, dropping it when the deadline passes
    pub async fn within_deadline<Fut>(&self, key: &str, work: Fut) -> Result<Action, ReconcilerError>
    where
        Fut: Future<Output = Result<Action, ReconcilerError>>,
    {
        let deadline = self.config.reconcile_timeout();
        match tokio::time::timeout(deadline, work).await {
            Ok(result) => result,
            Err(_) => {
                warn!(lock.key = %key, "Reconcile pass hit its {}s deadline", deadline.as_secs());
                Err(ReconcilerError::Timeout {
                    key: key.to_string(),
                    after: deadline,
                })
            }
        }
    }

    /// Delay before retrying a failed resource, growing with each failure
    pub fn next_error_delay(&self, key: &str) -> (Duration, u32) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states.entry(key.to_string()).or_default();
                let delay = state.next_delay();
                (delay, state.error_count)
            }
            Err(e) => {
                warn!("Backoff table poisoned, using the minimum delay: {}", e);
                (BackoffState::new().next_delay(), 1)
            }
        }
    }

    pub fn reset_backoff(&self, key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states.remove(key);
        }
    }
}

/// Key identifying a namespaced resource in locks and backoff bookkeeping
pub fn resource_key<K: ResourceExt>(kind: &str, object: &K) -> String {
    lock_key(
        kind,
        &object.namespace().unwrap_or_default(),
        &object.name_any(),
    )
}

/// Wrap a reconcile pass with its span, metrics and backoff reset
pub async fn instrumented<K, Fut>(
    kind: &'static str,
    object: &K,
    ctx: &Reconciler,
    pass: Fut,
) -> Result<Action, ReconcilerError>
where
    K: ResourceExt,
    Fut: Future<Output = Result<Action, ReconcilerError>>,
{
    let span = tracing::info_span!(
        "reconcile",
        resource.kind = kind,
        resource.name = %object.name_any(),
        resource.namespace = %object.namespace().unwrap_or_default(),
    );
    let started = Instant::now();
    metrics::increment_reconciliations(kind);

    let result = pass.instrument(span).await;

    metrics::observe_reconciliation_duration(kind, started.elapsed().as_secs_f64());
    match &result {
        Ok(_) => ctx.reset_backoff(&resource_key(kind, object)),
        Err(_) => metrics::increment_reconciliation_errors(kind),
    }
    result
}

/// Error policy shared by every control loop: per-resource Fibonacci backoff
pub fn error_policy<K: ResourceExt>(
    kind: &'static str,
    object: &K,
    error: &ReconcilerError,
    ctx: &Reconciler,
) -> Action {
    let key = resource_key(kind, object);
    let (delay, error_count) = ctx.next_error_delay(&key);
    error!(
        resource.kind = kind,
        resource.name = %object.name_any(),
        error_count,
        "Reconciliation failed: {}",
        error
    );
    info!(
        resource.kind = kind,
        resource.name = %object.name_any(),
        "Retrying with Fibonacci backoff in {}s",
        delay.as_secs()
    );
    metrics::increment_requeues(kind, "error-backoff");
    Action::requeue(delay)
}
