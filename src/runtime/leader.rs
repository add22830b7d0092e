//! Leader election using a coordination.k8s.io Lease.
//!
//! Acquisition and renewal are compare-and-swap writes guarded by the Lease's
//! resourceVersion, so two replicas never both believe they lead.

use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::coordination::v1::Lease;
use kube::api::{Api, PostParams};
use kube::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::locking::lease_expired;

const LEASE_DURATION: Duration = Duration::from_secs(30);
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);
/// Without a successful renewal for this long the leader steps down, before the lease lapses
const RENEW_DEADLINE: Duration = Duration::from_secs(20);

#[derive(Debug, Error)]
pub enum LeaderElectionError {
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("cannot build leader lease: {0}")]
    Lease(#[from] serde_json::Error),
}

pub struct LeaderElector {
    client: Client,
    lease_name: String,
    namespace: String,
    identity: String,
}

impl LeaderElector {
    pub fn new(client: Client, lease_name: &str, namespace: &str, identity: &str) -> Self {
        Self {
            client,
            lease_name: lease_name.to_string(),
            namespace: namespace.to_string(),
            identity: identity.to_string(),
        }
    }

    /// Block until the lease is ours, then keep renewing it in the background
    pub async fn acquire(self: Arc<Self>) -> LeaderGuard {
        info!(identity = %self.identity, lease = %self.lease_name, "Waiting for leadership...");
        let renewed_at = loop {
            let attempt = Instant::now();
            match self.try_acquire_or_renew().await {
                Ok(true) => break attempt,
                Ok(false) => debug!(identity = %self.identity, "Lease held by another replica"),
                Err(e) => warn!(identity = %self.identity, error = %e, "Failed to acquire leader lease"),
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        };
        info!(identity = %self.identity, "Leadership acquired");

        let (lost_tx, lost_rx) = oneshot::channel();
        let elector = Arc::clone(&self);
        let renewal = tokio::spawn(async move { elector.renewal_loop(renewed_at, lost_tx).await });
        LeaderGuard {
            renewal,
            lost: Some(lost_rx),
        }
    }

    async fn renewal_loop(&self, mut renewed_at: Instant, lost: oneshot::Sender<()>) {
        let mut interval = RENEW_INTERVAL;
        loop {
            tokio::time::sleep(interval).await;
            let attempt = Instant::now();
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    debug!(identity = %self.identity, "Leader lease renewed");
                    renewed_at = attempt;
                    interval = RENEW_INTERVAL;
                }
                Ok(false) => {
                    warn!(identity = %self.identity, "Leader lease was taken over");
                    let _ = lost.send(());
                    return;
                }
                Err(e) => {
                    warn!(identity = %self.identity, error = %e, "Failed to renew leader lease");
                    if renewal_overdue(renewed_at, Instant::now()) {
                        warn!(
                            identity = %self.identity,
                            "No renewal for {}s, stepping down",
                            RENEW_DEADLINE.as_secs()
                        );
                        let _ = lost.send(());
                        return;
                    }
                    interval = RETRY_INTERVAL;
                }
            }
        }
    }

    async fn try_acquire_or_renew(&self) -> Result<bool, LeaderElectionError> {
        let api: Api<Lease> = Api::namespaced(self.client.clone(), &self.namespace);
        let now = Utc::now();

        let existing = match api.get(&self.lease_name).await {
            Ok(lease) => lease,
            Err(kube::Error::Api(e)) if e.code == 404 => {
                let lease = self.desired_lease(now, now, None, 0)?;
                return match api.create(&PostParams::default(), &lease).await {
                    Ok(_) => Ok(true),
                    Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
                    Err(e) => Err(e.into()),
                };
            }
            Err(e) => return Err(e.into()),
        };

        let spec = existing.spec.as_ref();
        let holder = spec.and_then(|s| s.holder_identity.as_deref());
        let ours = holder == Some(self.identity.as_str());
        if !ours && !lease_expired(spec, now) {
            return Ok(false);
        }

        let transitions = spec.and_then(|s| s.lease_transitions).unwrap_or(0);
        let lease = if ours {
            let acquired = spec
                .and_then(|s| serde_json::to_value(s.acquire_time.as_ref()?).ok())
                .and_then(|v| v.as_str().map(str::to_string))
                .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
                .map_or(now, |t| t.with_timezone(&Utc));
            self.desired_lease(
                acquired,
                now,
                existing.metadata.resource_version.clone(),
                transitions,
            )?
        } else {
            self.desired_lease(
                now,
                now,
                existing.metadata.resource_version.clone(),
                transitions + 1,
            )?
        };

        match api
            .replace(&self.lease_name, &PostParams::default(), &lease)
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn desired_lease(
        &self,
        acquired: DateTime<Utc>,
        renewed: DateTime<Utc>,
        resource_version: Option<String>,
        transitions: i32,
    ) -> Result<Lease, serde_json::Error> {
        serde_json::from_value(serde_json::json!({
            "metadata": {
                "name": self.lease_name,
                "namespace": self.namespace,
                "resourceVersion": resource_version,
            },
            "spec": {
                "holderIdentity": self.identity,
                "leaseDurationSeconds": LEASE_DURATION.as_secs(),
                "acquireTime": acquired.to_rfc3339_opts(SecondsFormat::Micros, true),
                "renewTime": renewed.to_rfc3339_opts(SecondsFormat::Micros, true),
                "leaseTransitions": transitions,
            },
        }))
    }
}

/// Whether the last successful renewal is too old to keep acting as leader
fn renewal_overdue(renewed_at: Instant, now: Instant) -> bool {
    now.saturating_duration_since(renewed_at) >= RENEW_DEADLINE
}

/// Held leadership; resolves [`LeaderGuard::lost`] when the lease is taken over
pub struct LeaderGuard {
    renewal: JoinHandle<()>,
    lost: Option<oneshot::Receiver<()>>,
}

impl LeaderGuard {
    pub async fn lost(&mut self) {
        match self.lost.take() {
            Some(lost) => {
                let _ = lost.await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        self.renewal.abort();
    }
}
