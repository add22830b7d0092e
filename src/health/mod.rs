//! # Health Aggregation
//!
//! Reports the state of every child a resource owns.
//!
//! Each [`ChildReference`] is dispatched to the first registered
//! [`JobResourceType`] adapter claiming its kind. References of kinds no
//! adapter claims are skipped.

mod job;

use async_trait::async_trait;
use kube::core::GroupVersionKind;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::cluster::ClusterError;
use crate::crd::{ChildReference, JobHealthStatus};

pub use job::{summarize_jobs, KubernetesJobResourceType};

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("cannot list {kind} objects: {source}")]
    List {
        kind: String,
        #[source]
        source: ClusterError,
    },

    #[error("cannot find any {kind} labelled with {selector}")]
    ChildMissing { kind: String, selector: String },
}

/// Adapter reporting the health of one kind of runnable child
#[async_trait]
pub trait JobResourceType: Send + Sync {
    fn matches(&self, gvk: &GroupVersionKind) -> bool;

    async fn health_status(
        &self,
        tracking_id: &str,
        namespace: &str,
    ) -> Result<JobHealthStatus, HealthError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HealthReport {
    pub statuses: Vec<JobHealthStatus>,
    /// False as soon as one child failed
    pub healthy: bool,
}

impl HealthReport {
    pub fn is_running(&self) -> bool {
        self.statuses.iter().any(|s| s.running)
    }
}

/// Ordered registry of adapters
#[derive(Clone, Default)]
pub struct HealthAggregator {
    adapters: Vec<Arc<dyn JobResourceType>>,
}

impl std::fmt::Debug for HealthAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthAggregator")
            .field("adapters", &self.adapters.len())
            .finish()
    }
}

impl HealthAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, adapter: Arc<dyn JobResourceType>) -> Self {
        self.adapters.push(adapter);
        self
    }

    fn adapter_for(&self, gvk: &GroupVersionKind) -> Option<&Arc<dyn JobResourceType>> {
        self.adapters.iter().find(|a| a.matches(gvk))
    }

    pub async fn report(
        &self,
        owned_references: &[ChildReference],
        namespace: &str,
    ) -> Result<HealthReport, HealthError> {
        let mut report = HealthReport {
            statuses: Vec::with_capacity(owned_references.len()),
            healthy: true,
        };

        for reference in owned_references {
            let gvk = reference.gvk();
            let Some(adapter) = self.adapter_for(&gvk) else {
                debug!(kind = %reference.kind, api_version = %reference.api_version, "No health adapter for kind, skipping");
                continue;
            };

            let status = adapter
                .health_status(&reference.tracking_id, namespace)
                .await?;
            if status.failed {
                report.healthy = false;
            }
            report.statuses.push(status);
        }
        Ok(report)
    }
}
