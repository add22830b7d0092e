//! [`KubeCluster`]: the cluster traits implemented with kube-rs.

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::core::GroupVersionKind;
use kube::discovery::{ApiCapabilities, ApiResource, Scope};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Debug;
use tokio::sync::RwLock;
use tracing::debug;

use super::{ClusterError, DynamicCluster, JobLister, ResourceStore, StatusApi};
use crate::constants::CONTROLLER_NAME;
use crate::crd::{ClusterBackupProcedureTemplate, RequestedBackupAction, ScheduledBackup};

/// Cluster access through a kube [`Client`].
///
/// REST mappings of rendered kinds are discovered once and cached.
/// Templates are served from the template loop's reflector store when available.
pub struct KubeCluster {
    client: Client,
    templates: Option<Store<ClusterBackupProcedureTemplate>>,
    mappings: RwLock<HashMap<GroupVersionKind, (ApiResource, ApiCapabilities)>>,
}

impl std::fmt::Debug for KubeCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeCluster")
            .field("template_cache", &self.templates.is_some())
            .finish_non_exhaustive()
    }
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            templates: None,
            mappings: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_template_cache(mut self, store: Store<ClusterBackupProcedureTemplate>) -> Self {
        self.templates = Some(store);
        self
    }

    async fn api_for(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
    ) -> Result<Api<DynamicObject>, ClusterError> {
        let cached = self.mappings.read().await.get(gvk).cloned();
        let (resource, capabilities) = match cached {
            Some(mapping) => mapping,
            None => {
                let mapping = kube::discovery::pinned_kind(&self.client, gvk)
                    .await
                    .map_err(|e| {
                        ClusterError::UnknownKind(format!(
                            "{}/{}: {e}",
                            gvk.api_version(),
                            gvk.kind
                        ))
                    })?;
                debug!(
                    api_version = %gvk.api_version(),
                    kind = %gvk.kind,
                    plural = %mapping.0.plural,
                    "Discovered REST mapping"
                );
                self.mappings
                    .write()
                    .await
                    .insert(gvk.clone(), mapping.clone());
                mapping
            }
        };

        Ok(match capabilities.scope {
            Scope::Cluster => Api::all_with(self.client.clone(), &resource),
            Scope::Namespaced => Api::namespaced_with(self.client.clone(), namespace, &resource),
        })
    }
}

fn object_name<K: Resource>(object: &K) -> Result<String, ClusterError> {
    object
        .meta()
        .name
        .clone()
        .ok_or_else(|| ClusterError::Invalid("object has no metadata.name".to_string()))
}

fn object_namespace<K: Resource>(object: &K) -> Result<String, ClusterError> {
    object
        .meta()
        .namespace
        .clone()
        .ok_or_else(|| ClusterError::Invalid("object has no metadata.namespace".to_string()))
}

/// Merge-patch the status subresource, carrying the resourceVersion as a precondition
async fn write_status_guarded<K>(client: &Client, object: &K) -> Result<K, ClusterError>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned,
{
    let name = object_name(object)?;
    let namespace = object_namespace(object)?;
    let serialized =
        serde_json::to_value(object).map_err(|e| ClusterError::Invalid(e.to_string()))?;

    let patch = serde_json::json!({
        "metadata": {
            "resourceVersion": object.meta().resource_version,
        },
        "status": serialized.get("status").cloned().unwrap_or(serde_json::Value::Null),
    });

    let api: Api<K> = Api::namespaced(client.clone(), &namespace);
    Ok(api
        .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?)
}

#[async_trait]
impl ResourceStore for KubeCluster {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, ClusterError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, ClusterError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &object_namespace(secret)?);
        let params = PostParams {
            field_manager: Some(CONTROLLER_NAME.to_string()),
            ..Default::default()
        };
        Ok(api.create(&params, secret).await?)
    }

    async fn replace_secret(&self, secret: &Secret) -> Result<Secret, ClusterError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &object_namespace(secret)?);
        let params = PostParams {
            field_manager: Some(CONTROLLER_NAME.to_string()),
            ..Default::default()
        };
        Ok(api.replace(&object_name(secret)?, &params, secret).await?)
    }

    async fn get_template(
        &self,
        name: &str,
    ) -> Result<ClusterBackupProcedureTemplate, ClusterError> {
        if let Some(template) = self
            .templates
            .as_ref()
            .and_then(|store| store.get(&ObjectRef::new(name)))
        {
            return Ok(template.as_ref().clone());
        }

        debug!(template = %name, "Template not in cache, reading from the API");
        let api: Api<ClusterBackupProcedureTemplate> = Api::all(self.client.clone());
        Ok(api.get(name).await?)
    }

    async fn get_scheduled_backup(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ScheduledBackup, ClusterError> {
        let api: Api<ScheduledBackup> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }
}

#[async_trait]
impl StatusApi<ScheduledBackup> for KubeCluster {
    async fn get_latest(&self, namespace: &str, name: &str) -> Result<ScheduledBackup, ClusterError> {
        let api: Api<ScheduledBackup> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn write_status(&self, object: &ScheduledBackup) -> Result<ScheduledBackup, ClusterError> {
        write_status_guarded(&self.client, object).await
    }
}

#[async_trait]
impl StatusApi<RequestedBackupAction> for KubeCluster {
    async fn get_latest(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<RequestedBackupAction, ClusterError> {
        let api: Api<RequestedBackupAction> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn write_status(
        &self,
        object: &RequestedBackupAction,
    ) -> Result<RequestedBackupAction, ClusterError> {
        write_status_guarded(&self.client, object).await
    }
}

#[async_trait]
impl DynamicCluster for KubeCluster {
    async fn get_object(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, ClusterError> {
        let api = self.api_for(gvk, namespace).await?;
        Ok(api.get_opt(name).await?)
    }

    async fn create_object(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClusterError> {
        let api = self.api_for(gvk, namespace).await?;
        let params = PostParams {
            field_manager: Some(CONTROLLER_NAME.to_string()),
            ..Default::default()
        };
        Ok(api.create(&params, object).await?)
    }

    async fn replace_object(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClusterError> {
        let api = self.api_for(gvk, namespace).await?;
        let params = PostParams {
            field_manager: Some(CONTROLLER_NAME.to_string()),
            ..Default::default()
        };
        Ok(api.replace(&object_name(object)?, &params, object).await?)
    }

    async fn delete_object(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), ClusterError> {
        let api = self.api_for(gvk, namespace).await?;
        match api.delete(name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl JobLister for KubeCluster {
    async fn list_jobs(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Job>, ClusterError> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        let jobs = api
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(jobs.items)
    }
}
