//! Lease-backed locks.
//!
//! Each key maps to one Lease. Acquisition creates the Lease, or takes over an
//! expired one using resourceVersion compare-and-swap. A holder that crashes
//! before releasing blocks the key for at most one TTL.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use kube::api::{Api, DeleteParams, PostParams, Preconditions};
use kube::Client;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{LockError, LockSession, Locker};
use crate::observability::metrics;

/// Prefix of lock lease names
const LEASE_NAME_PREFIX: &str = "backup-maker-lock-";

pub struct LeaseLocker {
    client: Client,
    namespace: String,
    identity: String,
    ttl: Duration,
}

impl std::fmt::Debug for LeaseLocker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseLocker")
            .field("namespace", &self.namespace)
            .field("identity", &self.identity)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl LeaseLocker {
    pub fn new(client: Client, namespace: &str, identity: &str, ttl: Duration) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
            identity: identity.to_string(),
            ttl,
        }
    }

    fn api(&self) -> Api<Lease> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn desired_lease(
        &self,
        lease_name: &str,
        holder: &str,
        now: DateTime<Utc>,
        resource_version: Option<String>,
        transitions: i32,
    ) -> Result<Lease, LockError> {
        let now = now.to_rfc3339_opts(SecondsFormat::Micros, true);
        serde_json::from_value(serde_json::json!({
            "metadata": {
                "name": lease_name,
                "namespace": self.namespace,
                "resourceVersion": resource_version,
            },
            "spec": {
                "holderIdentity": holder,
                "leaseDurationSeconds": i32::try_from(self.ttl.as_secs()).unwrap_or(i32::MAX),
                "acquireTime": now,
                "renewTime": now,
                "leaseTransitions": transitions,
            },
        }))
        .map_err(|e| LockError::Backend {
            key: lease_name.to_string(),
            message: format!("cannot build lease: {e}"),
        })
    }

    fn backend_error(key: &str, error: &kube::Error) -> LockError {
        LockError::Backend {
            key: key.to_string(),
            message: error.to_string(),
        }
    }

    async fn take_over_if_expired(
        &self,
        key: &str,
        lease_name: &str,
        holder: &str,
    ) -> Result<LockSession, LockError> {
        let api = self.api();
        let existing = match api.get(lease_name).await {
            Ok(lease) => lease,
            // Released between our create and get, the caller retries shortly
            Err(kube::Error::Api(e)) if e.code == 404 => {
                return Err(LockError::AlreadyLocked(key.to_string()))
            }
            Err(e) => return Err(Self::backend_error(key, &e)),
        };

        let now = Utc::now();
        if !lease_expired(existing.spec.as_ref(), now) {
            return Err(LockError::AlreadyLocked(key.to_string()));
        }

        let transitions = existing
            .spec
            .as_ref()
            .and_then(|s| s.lease_transitions)
            .unwrap_or(0);
        let lease = self.desired_lease(
            lease_name,
            holder,
            now,
            existing.metadata.resource_version.clone(),
            transitions + 1,
        )?;

        match api.replace(lease_name, &PostParams::default(), &lease).await {
            Ok(_) => {
                info!(lock.key = %key, lease = %lease_name, "Took over expired lock lease");
                Ok(LockSession::new(key, holder))
            }
            Err(kube::Error::Api(e)) if e.code == 409 => {
                Err(LockError::AlreadyLocked(key.to_string()))
            }
            Err(e) => Err(Self::backend_error(key, &e)),
        }
    }
}

/// Name of the Lease guarding `key`, a valid DNS subdomain whatever the key
pub fn lease_name(key: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(key.as_bytes()));
    format!("{LEASE_NAME_PREFIX}{}", &digest[..20])
}

/// Whether a lease may be taken over at `now`
pub fn lease_expired(spec: Option<&LeaseSpec>, now: DateTime<Utc>) -> bool {
    let Some(spec) = spec else {
        return true;
    };
    if spec.holder_identity.as_deref().unwrap_or_default().is_empty() {
        return true;
    }
    match (renewed_at(spec), spec.lease_duration_seconds) {
        (Some(renewed), Some(duration)) => {
            now > renewed + chrono::Duration::seconds(i64::from(duration))
        }
        _ => true,
    }
}

fn renewed_at(spec: &LeaseSpec) -> Option<DateTime<Utc>> {
    let raw = serde_json::to_value(spec.renew_time.as_ref()?).ok()?;
    DateTime::parse_from_rfc3339(raw.as_str()?)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[async_trait]
impl Locker for LeaseLocker {
    async fn obtain(&self, key: &str) -> Result<LockSession, LockError> {
        let lease_name = lease_name(key);
        let holder = format!("{}-{}", self.identity, uuid::Uuid::new_v4());
        let lease = self.desired_lease(&lease_name, &holder, Utc::now(), None, 0)?;

        let result = match self.api().create(&PostParams::default(), &lease).await {
            Ok(_) => {
                debug!(lock.key = %key, lease = %lease_name, "Lock lease created");
                Ok(LockSession::new(key, holder))
            }
            Err(kube::Error::Api(e)) if e.code == 409 => {
                self.take_over_if_expired(key, &lease_name, &holder).await
            }
            Err(e) => Err(Self::backend_error(key, &e)),
        };

        if matches!(result, Err(LockError::AlreadyLocked(_))) {
            metrics::increment_lock_contention();
        }
        result
    }

    async fn release(&self, session: LockSession) {
        let api = self.api();
        let lease_name = lease_name(session.key());

        let existing = match api.get(&lease_name).await {
            Ok(lease) => lease,
            Err(kube::Error::Api(e)) if e.code == 404 => return,
            Err(e) => {
                warn!(lock.key = %session.key(), "Cannot read lock lease for release: {}", e);
                return;
            }
        };

        let holder = existing
            .spec
            .as_ref()
            .and_then(|s| s.holder_identity.as_deref());
        if holder != Some(session.token()) {
            debug!(lock.key = %session.key(), "Lock lease was taken over, nothing to release");
            return;
        }

        let params = DeleteParams {
            preconditions: Some(Preconditions {
                resource_version: existing.metadata.resource_version.clone(),
                uid: existing.metadata.uid.clone(),
            }),
            ..Default::default()
        };
        match api.delete(&lease_name, &params).await {
            Ok(_) => debug!(lock.key = %session.key(), "Lock lease released"),
            Err(kube::Error::Api(e)) if e.code == 404 || e.code == 409 => {
                debug!(lock.key = %session.key(), "Lock lease changed before release");
            }
            Err(e) => warn!(lock.key = %session.key(), "Cannot release lock lease: {}", e),
        }
    }
}
