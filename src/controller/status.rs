//! Status read-modify-write with bounded retry on version conflicts.
//!
//! Every write starts from a fresh read, so a mutation is never applied on top
//! of a status another writer already replaced.

use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::EventType;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cluster::{ClusterError, StatusApi};
use crate::events::{actions, reasons, EventPublisher};
use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("cannot read {name} before writing its status: {source}")]
    Fetch {
        name: String,
        #[source]
        source: ClusterError,
    },

    #[error("cannot write status of {name}: {source}")]
    Write {
        name: String,
        #[source]
        source: ClusterError,
    },

    #[error("status of {name} kept conflicting after {attempts} attempts: {message}")]
    RetriesExhausted {
        name: String,
        attempts: u32,
        message: String,
    },
}

/// Re-fetch, mutate and write the status until it sticks or `attempts` conflicts occurred
pub async fn update_status_with_retry<K, A, F>(
    api: &A,
    namespace: &str,
    name: &str,
    attempts: u32,
    mut mutate: F,
) -> Result<K, StatusError>
where
    K: Send + Sync,
    A: StatusApi<K> + ?Sized,
    F: FnMut(&mut K) + Send,
{
    let attempts = attempts.max(1);
    let qualified = format!("{namespace}/{name}");
    let mut last_conflict = String::new();

    for attempt in 1..=attempts {
        let mut latest = api
            .get_latest(namespace, name)
            .await
            .map_err(|source| StatusError::Fetch {
                name: qualified.clone(),
                source,
            })?;
        mutate(&mut latest);

        match api.write_status(&latest).await {
            Ok(written) => return Ok(written),
            Err(ClusterError::Conflict(message)) => {
                metrics::increment_status_update_conflicts();
                debug!(object = %qualified, attempt, "Status write conflicted, retrying");
                last_conflict = message;
            }
            Err(source) => {
                return Err(StatusError::Write {
                    name: qualified,
                    source,
                })
            }
        }
    }

    Err(StatusError::RetriesExhausted {
        name: qualified,
        attempts,
        message: last_conflict,
    })
}

/// Surface a status write that gave up as a Warning event
pub async fn report_status_failure(
    events: &dyn EventPublisher,
    object_ref: &ObjectReference,
    error: &StatusError,
) {
    warn!("{}", error);
    if matches!(error, StatusError::RetriesExhausted { .. }) {
        events
            .publish(
                object_ref,
                EventType::Warning,
                reasons::STATUS_UPDATE_FAILED,
                actions::RECONCILE,
                Some(error.to_string()),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Counter object whose writes conflict a fixed number of times
    struct Flaky {
        stored: Mutex<u32>,
        conflicts_left: Mutex<u32>,
    }

    impl Flaky {
        fn new(conflicts: u32) -> Self {
            Self {
                stored: Mutex::new(0),
                conflicts_left: Mutex::new(conflicts),
            }
        }
    }

    #[async_trait]
    impl StatusApi<u32> for Flaky {
        async fn get_latest(&self, _namespace: &str, _name: &str) -> Result<u32, ClusterError> {
            Ok(*self.stored.lock().unwrap())
        }

        async fn write_status(&self, object: &u32) -> Result<u32, ClusterError> {
            let mut left = self.conflicts_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(ClusterError::Conflict("the object has been modified".to_string()));
            }
            *self.stored.lock().unwrap() = *object;
            Ok(*object)
        }
    }

    #[tokio::test]
    async fn test_conflicts_are_retried_from_a_fresh_read() {
        let api = Flaky::new(2);
        let mut calls = 0;
        let written = update_status_with_retry(&api, "backups", "app1", 5, |value: &mut u32| {
            calls += 1;
            *value += 1;
        })
        .await
        .unwrap();

        assert_eq!(written, 1);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_are_reported() {
        let api = Flaky::new(10);
        let result =
            update_status_with_retry(&api, "backups", "app1", 3, |value: &mut u32| *value += 1)
                .await;

        match result {
            Err(StatusError::RetriesExhausted { attempts, name, .. }) => {
                assert_eq!(attempts, 3);
                assert_eq!(name, "backups/app1");
            }
            other => panic!("expected exhausted retries, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_other_write_errors_are_not_retried() {
        struct Broken;

        #[async_trait]
        impl StatusApi<u32> for Broken {
            async fn get_latest(&self, _: &str, _: &str) -> Result<u32, ClusterError> {
                Ok(0)
            }

            async fn write_status(&self, _: &u32) -> Result<u32, ClusterError> {
                Err(ClusterError::Invalid("status.healthy: wrong type".to_string()))
            }
        }

        let mut calls = 0;
        let result = update_status_with_retry(&Broken, "backups", "app1", 5, |_: &mut u32| {
            calls += 1;
        })
        .await;

        assert!(matches!(result, Err(StatusError::Write { .. })));
        assert_eq!(calls, 1);
    }
}
