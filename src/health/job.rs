use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use kube::core::GroupVersionKind;
use kube::ResourceExt;
use std::sync::Arc;

use super::{HealthError, JobResourceType};
use crate::cluster::JobLister;
use crate::constants::LABEL_TRACKING_ID;
use crate::crd::{ChildReference, JobHealthStatus};
use crate::domain::job_gvk;

/// Health of `batch/v1` Jobs found through the tracking label
pub struct KubernetesJobResourceType {
    lister: Arc<dyn JobLister>,
}

impl KubernetesJobResourceType {
    pub fn new(lister: Arc<dyn JobLister>) -> Self {
        Self { lister }
    }
}

#[async_trait]
impl JobResourceType for KubernetesJobResourceType {
    fn matches(&self, gvk: &GroupVersionKind) -> bool {
        *gvk == job_gvk()
    }

    async fn health_status(
        &self,
        tracking_id: &str,
        namespace: &str,
    ) -> Result<JobHealthStatus, HealthError> {
        let selector = format!("{LABEL_TRACKING_ID}={tracking_id}");
        let jobs = self
            .lister
            .list_jobs(namespace, &selector)
            .await
            .map_err(|source| HealthError::List {
                kind: "Job".to_string(),
                source,
            })?;
        summarize_jobs(&jobs, tracking_id, namespace)
    }
}

/// Fold the Jobs carrying one tracking id into a single status.
///
/// The first failed Job wins, otherwise any active Job means running.
pub fn summarize_jobs(
    jobs: &[Job],
    tracking_id: &str,
    namespace: &str,
) -> Result<JobHealthStatus, HealthError> {
    if jobs.is_empty() {
        return Err(HealthError::ChildMissing {
            kind: "job".to_string(),
            selector: format!("{LABEL_TRACKING_ID}={tracking_id}"),
        });
    }
    let reference = ChildReference::new(&job_gvk(), tracking_id);

    let mut running = false;
    for job in jobs {
        let status = job.status.as_ref();
        if status.and_then(|s| s.failed).unwrap_or(0) > 0 {
            return Ok(JobHealthStatus::failed(
                reference,
                format!(
                    "Job {}/{} failed",
                    job.namespace().unwrap_or_else(|| namespace.to_string()),
                    job.name_any()
                ),
            ));
        }
        if status.and_then(|s| s.active).unwrap_or(0) > 0 {
            running = true;
        }
    }

    let message = format!(
        "All labelled jobs by {LABEL_TRACKING_ID}={tracking_id} succeed in {namespace} namespace"
    );
    Ok(if running {
        JobHealthStatus::running(reference, message)
    } else {
        JobHealthStatus::succeeded(reference, message)
    })
}
