//! # Aggregate Factory
//!
//! Hydrates a primary resource together with every resource it depends on.
//!
//! Hydration is side-effecting: a missing GPG secret is generated when the
//! schedule asks for it, and a partially populated one is repaired in place.

use k8s_openapi::api::core::v1::Secret;
use kube::{Resource, ResourceExt};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cluster::{ClusterError, ResourceStore};
use crate::constants::VAR_REPOSITORY_TOKEN;
use crate::crd::{Operation, RequestedBackupAction, ScheduledBackup};
use crate::domain::{
    RequestedBackupActionAggregate, ScheduledBackupAggregate, Template, VarsError,
};
use crate::gpg::secret::{key_identity, read_secret_value};
use crate::gpg::{
    create_new_gpg_secret, should_update, update_gpg_secret_with_recreated_gpg_key,
    KeyPairError, KeyPairProvider,
};

/// How the caller should react to a hydration failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionHint {
    /// Not retryable by waiting; left to the generic error policy
    None,
    /// A dependency is expected to appear, try again shortly
    Requeue,
}

#[derive(Debug, Error)]
pub enum HydrationError {
    #[error("GPG secret '{0}' does not exist and .spec.gpgKeySecretRef.createIfNotExists is false, waiting for it")]
    GpgSecretMissing(String),

    #[error("cannot fetch GPG secret '{name}': {source}")]
    GpgSecret {
        name: String,
        #[source]
        source: ClusterError,
    },

    #[error("cannot store GPG secret '{name}': {source}")]
    GpgSecretWrite {
        name: String,
        #[source]
        source: ClusterError,
    },

    #[error("cannot generate GPG key pair: {0}")]
    KeyPair(#[from] KeyPairError),

    #[error("cannot fetch ClusterBackupProcedureTemplate '{name}': {source}")]
    Template {
        name: String,
        #[source]
        source: ClusterError,
    },

    #[error("cannot fetch access token Secret '{name}': {source}")]
    TokenSecret {
        name: String,
        #[source]
        source: ClusterError,
    },

    #[error("cannot fetch vars Secret '{name}': {source}")]
    VarsSecret {
        name: String,
        #[source]
        source: ClusterError,
    },

    #[error("cannot compose vars: {0}")]
    Vars(#[from] VarsError),
}

impl HydrationError {
    pub fn hint(&self) -> ActionHint {
        match self {
            HydrationError::Vars(_) => ActionHint::None,
            _ => ActionHint::Requeue,
        }
    }
}

pub struct AggregateFactory {
    store: Arc<dyn ResourceStore>,
    key_pairs: Arc<dyn KeyPairProvider>,
}

impl std::fmt::Debug for AggregateFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateFactory").finish_non_exhaustive()
    }
}

impl AggregateFactory {
    pub fn new(store: Arc<dyn ResourceStore>, key_pairs: Arc<dyn KeyPairProvider>) -> Self {
        Self { store, key_pairs }
    }

    /// Hydrate a schedule for rendering `operation` (the schedule's own when `None`)
    pub async fn hydrate_scheduled_backup(
        &self,
        backup: &ScheduledBackup,
        operation: Option<Operation>,
    ) -> Result<ScheduledBackupAggregate, HydrationError> {
        let namespace = backup.namespace().unwrap_or_default();
        let operation = operation.unwrap_or(backup.spec.operation);
        debug!(
            scheduled_backup = %backup.name_any(),
            namespace = %namespace,
            operation = %operation,
            "Hydrating ScheduledBackup"
        );

        let gpg_secret = self.hydrate_gpg_secret(backup, &namespace).await?;
        let template = self.hydrate_template(backup).await?;
        let token_secret = self.hydrate_token_secret(backup, &namespace).await?;
        let vars_secret = self.hydrate_vars_secret(backup, &namespace).await?;

        let mut aggregate = ScheduledBackupAggregate::new(
            backup.clone(),
            template,
            gpg_secret,
            token_secret,
            vars_secret,
        );

        let token_key = &backup.spec.token_secret_ref.token_key;
        match read_secret_value(&aggregate.token_secret, token_key).filter(|t| !t.is_empty()) {
            Some(token) => {
                aggregate
                    .additional_vars
                    .insert(VAR_REPOSITORY_TOKEN.to_string(), token);
            }
            None => debug!(key = %token_key, "Access token secret has no value under the token key, skipping"),
        }

        // Malformed variable paths surface here rather than in the renderer
        aggregate.vars_document(operation)?;
        Ok(aggregate)
    }

    /// Hydrate an action together with the schedule it references
    pub async fn hydrate_requested_backup_action(
        &self,
        action: &RequestedBackupAction,
        backup: &ScheduledBackup,
    ) -> Result<RequestedBackupActionAggregate, HydrationError> {
        let scheduled = self
            .hydrate_scheduled_backup(backup, Some(action.spec.action))
            .await?;
        Ok(RequestedBackupActionAggregate::new(action.clone(), scheduled))
    }

    async fn hydrate_gpg_secret(
        &self,
        backup: &ScheduledBackup,
        namespace: &str,
    ) -> Result<Secret, HydrationError> {
        let spec = &backup.spec.gpg_key_secret_ref;
        let name = spec.secret_name.clone();
        let email = key_identity(spec, namespace);

        match self.store.get_secret(namespace, &name).await {
            Ok(secret) if spec.create_if_not_exists && should_update(&secret, spec) => {
                info!(secret = %name, "GPG secret is missing key material, regenerating it");

                // The cached copy may be stale, repair the latest version
                let mut latest = self
                    .store
                    .get_secret(namespace, &name)
                    .await
                    .map_err(|source| HydrationError::GpgSecret {
                        name: name.clone(),
                        source,
                    })?;
                let updated = update_gpg_secret_with_recreated_gpg_key(
                    &mut latest,
                    spec,
                    &email,
                    false,
                    self.key_pairs.as_ref(),
                )
                .await?;
                if !updated {
                    return Ok(latest);
                }
                self.store
                    .replace_secret(&latest)
                    .await
                    .map_err(|source| HydrationError::GpgSecretWrite { name, source })
            }
            Ok(secret) => Ok(secret),
            Err(e) if e.is_not_found() => {
                if !spec.create_if_not_exists {
                    info!(secret = %name, "GPG secret does not exist, waiting for it to appear");
                    return Err(HydrationError::GpgSecretMissing(name));
                }

                warn!(
                    secret = %name,
                    "Creating a new GPG key pair. Copy this Secret somewhere safe, backups cannot be restored without it"
                );
                let owner_references = backup.controller_owner_ref(&()).into_iter().collect();
                let secret = create_new_gpg_secret(
                    &name,
                    namespace,
                    &email,
                    owner_references,
                    spec,
                    self.key_pairs.as_ref(),
                )
                .await?;
                self.store
                    .create_secret(&secret)
                    .await
                    .map_err(|source| HydrationError::GpgSecretWrite { name, source })
            }
            Err(source) => Err(HydrationError::GpgSecret { name, source }),
        }
    }

    async fn hydrate_template(&self, backup: &ScheduledBackup) -> Result<Template, HydrationError> {
        let template_ref = &backup.spec.template_ref;
        if template_ref.is_internal() {
            return Ok(Template::Internal {
                name: template_ref.name.clone(),
            });
        }

        let template = self
            .store
            .get_template(&template_ref.name)
            .await
            .map_err(|source| HydrationError::Template {
                name: template_ref.name.clone(),
                source,
            })?;
        debug!(template = %template_ref.name, "Fetched ClusterBackupProcedureTemplate");
        Ok(Template::Cluster(template))
    }

    async fn hydrate_token_secret(
        &self,
        backup: &ScheduledBackup,
        namespace: &str,
    ) -> Result<Secret, HydrationError> {
        let name = &backup.spec.token_secret_ref.secret_name;
        self.store
            .get_secret(namespace, name)
            .await
            .map_err(|source| HydrationError::TokenSecret {
                name: name.clone(),
                source,
            })
    }

    async fn hydrate_vars_secret(
        &self,
        backup: &ScheduledBackup,
        namespace: &str,
    ) -> Result<Option<Secret>, HydrationError> {
        let name = &backup.spec.vars_secret_ref.secret_name;
        if name.is_empty() {
            return Ok(None);
        }
        self.store
            .get_secret(namespace, name)
            .await
            .map(Some)
            .map_err(|source| HydrationError::VarsSecret {
                name: name.clone(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_vars_errors_are_fatal() {
        assert_eq!(
            HydrationError::Vars(VarsError::MalformedPath("a..b".to_string())).hint(),
            ActionHint::None
        );
        assert_eq!(
            HydrationError::GpgSecretMissing("keys".to_string()).hint(),
            ActionHint::Requeue
        );
        assert_eq!(
            HydrationError::TokenSecret {
                name: "token".to_string(),
                source: ClusterError::NotFound("token".to_string()),
            }
            .hint(),
            ActionHint::Requeue
        );
    }
}
