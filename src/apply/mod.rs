//! # Apply Engine
//!
//! Renders an aggregate and reconciles the resulting documents against the cluster.
//!
//! Every document is stamped with the owner's controller reference, the owner's
//! namespace and a tracking label. Existing objects keep their tracking id so a
//! repeated apply records the same [`ChildReference`]. An update rejected for an
//! immutable field deletes the object, waits for it to disappear and creates it again.

pub mod metadata;

use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::DynamicObject;
use kube::core::GroupVersionKind;
use kube::runtime::events::EventType;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::cluster::{ClusterError, DynamicCluster};
use crate::constants::{DELETION_WAIT_ATTEMPTS, DELETION_WAIT_INTERVAL_MS};
use crate::crd::{ChildReference, Operation};
use crate::domain::{Renderable, VarsError};
use crate::events::{actions, reasons, EventPublisher};
use crate::observability::metrics;
use crate::render::{document_gvk, RenderError, RenderRequest, Renderer};
use metadata::{display_name, prepare_document, tracking_id_of};

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("cannot compose vars: {0}")]
    Vars(#[from] VarsError),

    #[error("cannot render {operation} manifests: {source}")]
    Render {
        operation: Operation,
        #[source]
        source: RenderError,
    },

    #[error("renderer produced no objects owned by this resource")]
    NothingRendered,

    #[error("rendered {0} has neither metadata.name nor metadata.generateName")]
    MissingName(String),

    #[error("cannot fetch {object} to check if it exists: {source}")]
    Fetch {
        object: String,
        #[source]
        source: ClusterError,
    },

    #[error("cannot create {object}: {source}")]
    Create {
        object: String,
        #[source]
        source: ClusterError,
    },

    #[error("cannot update {object}: {source}")]
    Update {
        object: String,
        #[source]
        source: ClusterError,
    },

    #[error("cannot delete {object} for recreation: {source}")]
    Delete {
        object: String,
        #[source]
        source: ClusterError,
    },

    #[error("{0} was not gone in time for recreation")]
    DeletionTimeout(String),
}

impl ApplyError {
    /// Misconfiguration that waiting will not fix
    pub fn is_fatal(&self) -> bool {
        match self {
            ApplyError::NothingRendered | ApplyError::MissingName(_) | ApplyError::Vars(_) => true,
            ApplyError::Render { source, .. } => source.is_fatal(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
    Recreated,
}

impl ApplyOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ApplyOutcome::Created => "created",
            ApplyOutcome::Updated => "updated",
            ApplyOutcome::Recreated => "recreated",
        }
    }

    fn reason(self) -> &'static str {
        match self {
            ApplyOutcome::Created => reasons::CREATED,
            ApplyOutcome::Updated => reasons::UPDATED,
            ApplyOutcome::Recreated => reasons::RECREATED,
        }
    }
}

/// A rendered document with its resolved kind
#[derive(Debug, Clone)]
pub struct RenderedDocument {
    pub gvk: GroupVersionKind,
    pub object: DynamicObject,
}

/// Where and on behalf of whom documents are applied
struct ApplyContext<'a> {
    owner: Option<&'a OwnerReference>,
    object_ref: &'a ObjectReference,
    namespace: &'a str,
    kind: &'static str,
}

pub struct ApplyEngine {
    cluster: Arc<dyn DynamicCluster>,
    renderer: Arc<dyn Renderer>,
    events: Arc<dyn EventPublisher>,
}

impl std::fmt::Debug for ApplyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplyEngine").finish_non_exhaustive()
    }
}

impl ApplyEngine {
    pub fn new(
        cluster: Arc<dyn DynamicCluster>,
        renderer: Arc<dyn Renderer>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            cluster,
            renderer,
            events,
        }
    }

    /// Render every target of the aggregate, keeping only the kinds it may own
    pub async fn render<R: Renderable + ?Sized>(
        &self,
        aggregate: &R,
    ) -> Result<Vec<RenderedDocument>, ApplyError> {
        let backup = aggregate.backup();
        let mut documents = Vec::new();

        for target in aggregate.render_targets() {
            let request = RenderRequest {
                template: backup.template.clone(),
                operation: target.operation,
                vars: backup.vars_document(target.operation)?,
                gpg_key: backup.gpg_key_for(target.operation).map(Zeroizing::new),
                schedule: backup.schedule().to_string(),
                namespace: backup.namespace(),
                name: backup.name(),
            };
            let rendered = self
                .renderer
                .render(&request)
                .await
                .map_err(|source| ApplyError::Render {
                    operation: target.operation,
                    source,
                })?;

            for object in rendered {
                match document_gvk(&object) {
                    Some(gvk) if target.resource_types.accepts(&gvk) => {
                        documents.push(RenderedDocument { gvk, object });
                    }
                    gvk => debug!(
                        operation = %target.operation,
                        object = %display_name(&object),
                        kind = ?gvk.map(|g| g.kind),
                        "Skipping rendered object not owned by {}",
                        aggregate.kind()
                    ),
                }
            }
        }
        Ok(documents)
    }

    /// Render and apply, recording every applied child on the aggregate
    pub async fn apply<R: Renderable + ?Sized>(&self, aggregate: &mut R) -> Result<usize, ApplyError> {
        let documents = self.render(aggregate).await?;
        if documents.is_empty() {
            return Err(ApplyError::NothingRendered);
        }

        let owner = aggregate.owner_reference();
        let object_ref = aggregate.object_reference();
        let namespace = aggregate.namespace();
        let context = ApplyContext {
            owner: owner.as_ref(),
            object_ref: &object_ref,
            namespace: &namespace,
            kind: aggregate.kind(),
        };

        let count = documents.len();
        for RenderedDocument { gvk, object } in documents {
            let tracking_id = self.apply_document(&context, &gvk, object).await?;
            aggregate.add_owned_reference(ChildReference::new(&gvk, tracking_id));
        }

        info!(
            kind = aggregate.kind(),
            name = %aggregate.name(),
            namespace = %namespace,
            count,
            "Applied rendered objects"
        );
        Ok(count)
    }

    /// Create or update one document, returning its tracking id
    async fn apply_document(
        &self,
        context: &ApplyContext<'_>,
        gvk: &GroupVersionKind,
        mut document: DynamicObject,
    ) -> Result<String, ApplyError> {
        let mut tracking_id = Uuid::new_v4().to_string();
        prepare_document(&mut document, context.owner, context.namespace, &tracking_id);
        let object = format!("{}/{} {}", gvk.api_version(), gvk.kind, display_name(&document));

        let Some(name) = document.metadata.name.clone() else {
            if document.metadata.generate_name.is_none() {
                return Err(ApplyError::MissingName(object));
            }
            let created = self.create(context, gvk, &document, &object).await?;
            self.record(context, gvk, &created, ApplyOutcome::Created).await;
            return Ok(tracking_id);
        };

        let existing = self
            .cluster
            .get_object(gvk, context.namespace, &name)
            .await
            .map_err(|source| ApplyError::Fetch {
                object: object.clone(),
                source,
            })?;

        let Some(existing) = existing else {
            let created = self.create(context, gvk, &document, &object).await?;
            self.record(context, gvk, &created, ApplyOutcome::Created).await;
            return Ok(tracking_id);
        };

        if let Some(id) = tracking_id_of(&existing) {
            tracking_id = id.to_string();
            prepare_document(&mut document, context.owner, context.namespace, &tracking_id);
        }
        document.metadata.resource_version = existing.metadata.resource_version.clone();

        match self
            .cluster
            .replace_object(gvk, context.namespace, &document)
            .await
        {
            Ok(updated) => {
                self.record(context, gvk, &updated, ApplyOutcome::Updated).await;
                Ok(tracking_id)
            }
            Err(ClusterError::Immutable(message)) => {
                warn!(object = %object, reason = %message, "Immutable field changed, recreating object");
                self.recreate(context, gvk, &name, &mut document, &object)
                    .await?;
                Ok(tracking_id)
            }
            Err(source) => Err(ApplyError::Update { object, source }),
        }
    }

    async fn create(
        &self,
        context: &ApplyContext<'_>,
        gvk: &GroupVersionKind,
        document: &DynamicObject,
        object: &str,
    ) -> Result<DynamicObject, ApplyError> {
        self.cluster
            .create_object(gvk, context.namespace, document)
            .await
            .map_err(|source| ApplyError::Create {
                object: object.to_string(),
                source,
            })
    }

    async fn recreate(
        &self,
        context: &ApplyContext<'_>,
        gvk: &GroupVersionKind,
        name: &str,
        document: &mut DynamicObject,
        object: &str,
    ) -> Result<(), ApplyError> {
        self.cluster
            .delete_object(gvk, context.namespace, name)
            .await
            .map_err(|source| ApplyError::Delete {
                object: object.to_string(),
                source,
            })?;
        self.wait_until_gone(gvk, context.namespace, name, object)
            .await?;

        document.metadata.resource_version = None;
        document.metadata.uid = None;
        let created = self.create(context, gvk, document, object).await?;
        self.record(context, gvk, &created, ApplyOutcome::Recreated)
            .await;
        Ok(())
    }

    async fn wait_until_gone(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
        object: &str,
    ) -> Result<(), ApplyError> {
        for _ in 0..DELETION_WAIT_ATTEMPTS {
            let current = self
                .cluster
                .get_object(gvk, namespace, name)
                .await
                .map_err(|source| ApplyError::Fetch {
                    object: object.to_string(),
                    source,
                })?;
            if current.is_none() {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(DELETION_WAIT_INTERVAL_MS)).await;
        }
        Err(ApplyError::DeletionTimeout(object.to_string()))
    }

    async fn record(
        &self,
        context: &ApplyContext<'_>,
        gvk: &GroupVersionKind,
        applied: &DynamicObject,
        outcome: ApplyOutcome,
    ) {
        let verb = match outcome {
            ApplyOutcome::Created => "Creating",
            ApplyOutcome::Updated => "Updating",
            ApplyOutcome::Recreated => "Recreating",
        };
        let note = format!(
            "{verb} {}/{}, named {}",
            gvk.api_version(),
            gvk.kind,
            display_name(applied)
        );
        debug!(outcome = outcome.as_str(), "{note}");
        metrics::increment_applied_objects(context.kind, outcome.as_str());
        self.events
            .publish(
                context.object_ref,
                EventType::Normal,
                outcome.reason(),
                actions::APPLY,
                Some(note),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_errors() {
        assert!(ApplyError::NothingRendered.is_fatal());
        assert!(ApplyError::Vars(VarsError::NotAMapping).is_fatal());
        assert!(ApplyError::MissingName("v1/Secret <unnamed>".to_string()).is_fatal());
        assert!(ApplyError::Render {
            operation: Operation::Backup,
            source: RenderError::InvalidDocument {
                index: 0,
                message: "missing apiVersion or kind".to_string(),
            },
        }
        .is_fatal());
        assert!(!ApplyError::Render {
            operation: Operation::Backup,
            source: RenderError::Command("exit status 1".to_string()),
        }
        .is_fatal());
        assert!(!ApplyError::DeletionTimeout("batch/v1 Job backups/app1".to_string()).is_fatal());
        assert!(!ApplyError::Update {
            object: "batch/v1 Job backups/app1".to_string(),
            source: ClusterError::Conflict("stale".to_string()),
        }
        .is_fatal());
    }

    #[test]
    fn test_outcome_reasons() {
        assert_eq!(ApplyOutcome::Created.reason(), "Created");
        assert_eq!(ApplyOutcome::Updated.reason(), "Updated");
        assert_eq!(ApplyOutcome::Recreated.reason(), "Recreated");
    }
}
