//! # Cluster Access
//!
//! The control-plane operations the reconcilers depend on, split by concern:
//!
//! - [`ResourceStore`] - typed reads and writes of dependencies (secrets, templates, schedules)
//! - [`StatusApi`] - fresh reads and version-guarded status writes of a primary resource
//! - [`DynamicCluster`] - get/create/replace/delete of rendered documents by group/version/kind
//! - [`JobLister`] - label-selected listing of Jobs for health reporting
//!
//! [`KubeCluster`] implements all of them against a live API server.

mod kube_cluster;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Secret;
use kube::api::DynamicObject;
use kube::core::GroupVersionKind;
use thiserror::Error;

use crate::crd::{ClusterBackupProcedureTemplate, RequestedBackupAction, ScheduledBackup};

pub use kube_cluster::KubeCluster;

/// Errors returned by cluster operations, classified by how callers react to them
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Optimistic concurrency failure, the object changed since it was read
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("field is immutable: {0}")]
    Immutable(String),

    #[error("cannot resolve API resource for {0}")]
    UnknownKind(String),

    #[error("invalid object: {0}")]
    Invalid(String),

    #[error("kubernetes API error: {0}")]
    Kube(#[source] kube::Error),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ClusterError::Conflict(_))
    }
}

impl From<kube::Error> for ClusterError {
    fn from(error: kube::Error) -> Self {
        match &error {
            kube::Error::Api(response) if response.code == 404 => {
                ClusterError::NotFound(response.message.clone())
            }
            kube::Error::Api(response) if response.code == 409 && response.reason == "AlreadyExists" => {
                ClusterError::AlreadyExists(response.message.clone())
            }
            kube::Error::Api(response) if response.code == 409 => {
                ClusterError::Conflict(response.message.clone())
            }
            kube::Error::Api(response) if response.message.contains("immutable") => {
                ClusterError::Immutable(response.message.clone())
            }
            _ => ClusterError::Kube(error),
        }
    }
}

/// Typed access to the resources an aggregate is hydrated from
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, ClusterError>;

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, ClusterError>;

    /// Replace a secret, guarded by its resourceVersion when set
    async fn replace_secret(&self, secret: &Secret) -> Result<Secret, ClusterError>;

    async fn get_template(&self, name: &str)
        -> Result<ClusterBackupProcedureTemplate, ClusterError>;

    async fn get_scheduled_backup(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ScheduledBackup, ClusterError>;
}

/// Status access of a primary resource kind
#[async_trait]
pub trait StatusApi<K>: Send + Sync {
    /// Read the current object, bypassing any cache
    async fn get_latest(&self, namespace: &str, name: &str) -> Result<K, ClusterError>;

    /// Persist `object.status`, failing with [`ClusterError::Conflict`] when
    /// `object.metadata.resourceVersion` is stale
    async fn write_status(&self, object: &K) -> Result<K, ClusterError>;
}

/// Untyped object access keyed by group/version/kind
#[async_trait]
pub trait DynamicCluster: Send + Sync {
    async fn get_object(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, ClusterError>;

    async fn create_object(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClusterError>;

    async fn replace_object(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClusterError>;

    /// Delete an object; deleting a missing object is not an error
    async fn delete_object(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), ClusterError>;
}

#[async_trait]
pub trait JobLister: Send + Sync {
    async fn list_jobs(&self, namespace: &str, label_selector: &str)
        -> Result<Vec<Job>, ClusterError>;
}

/// Everything the control loops need from the cluster
pub trait ClusterClient:
    ResourceStore
    + DynamicCluster
    + JobLister
    + StatusApi<ScheduledBackup>
    + StatusApi<RequestedBackupAction>
{
}

impl<T> ClusterClient for T where
    T: ResourceStore
        + DynamicCluster
        + JobLister
        + StatusApi<ScheduledBackup>
        + StatusApi<RequestedBackupAction>
{
}
