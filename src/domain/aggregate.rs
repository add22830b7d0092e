//! Hydrated, in-memory views of a primary resource and everything it depends on.
//!
//! An aggregate is rebuilt on every reconcile pass and never shared between passes.

use k8s_openapi::api::core::v1::{ObjectReference, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use serde_yaml::Value;
use std::collections::BTreeMap;

use super::ownership::ResourceTypes;
use super::template::Template;
use super::vars::{merge_vars, VarsError};
use crate::constants::{VAR_GPG_KEY_CONTENT, VAR_KIND_TYPE};
use crate::crd::{ChildReference, Operation, RequestedBackupAction, ScheduledBackup};
use crate::gpg::secret::{read_secret_value, secret_entries};

/// One rendering pass: the operation to render and the kinds kept from its output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderTarget {
    pub operation: Operation,
    pub resource_types: ResourceTypes,
}

/// Anything the apply engine can render, own objects for and report on
pub trait Renderable: Send + Sync {
    /// Kind of the owning resource, used in log fields and lock keys
    fn kind(&self) -> &'static str;

    fn name(&self) -> String;

    fn namespace(&self) -> String;

    /// Controller owner reference stamped onto every applied document
    fn owner_reference(&self) -> Option<OwnerReference>;

    /// Reference events are attached to
    fn object_reference(&self) -> ObjectReference;

    /// Schedule aggregate supplying template, secrets and variables
    fn backup(&self) -> &ScheduledBackupAggregate;

    fn render_targets(&self) -> Vec<RenderTarget>;

    fn owned_references(&self) -> &[ChildReference];

    /// Record an applied child; a reference already present is not added twice
    fn add_owned_reference(&mut self, reference: ChildReference);
}

fn push_unique(references: &mut Vec<ChildReference>, reference: ChildReference) {
    if !references.contains(&reference) {
        references.push(reference);
    }
}

#[derive(Debug, Clone)]
pub struct ScheduledBackupAggregate {
    pub scheduled_backup: ScheduledBackup,
    pub template: Template,
    pub gpg_secret: Secret,
    pub token_secret: Secret,
    pub vars_secret: Option<Secret>,
    /// Derived variables keyed by dotted path, e.g. `Repository.token`
    pub additional_vars: BTreeMap<String, String>,
    owned_references: Vec<ChildReference>,
}

impl ScheduledBackupAggregate {
    pub fn new(
        scheduled_backup: ScheduledBackup,
        template: Template,
        gpg_secret: Secret,
        token_secret: Secret,
        vars_secret: Option<Secret>,
    ) -> Self {
        let owned_references = scheduled_backup.owned_references().to_vec();
        Self {
            scheduled_backup,
            template,
            gpg_secret,
            token_secret,
            vars_secret,
            additional_vars: BTreeMap::new(),
            owned_references,
        }
    }

    pub fn operation(&self) -> Operation {
        self.scheduled_backup.spec.operation
    }

    pub fn cron_enabled(&self) -> bool {
        self.scheduled_backup.spec.cron_job.enabled
    }

    pub fn schedule(&self) -> &str {
        &self.scheduled_backup.spec.cron_job.schedule_every
    }

    /// Public key for backups, private key for restores
    pub fn gpg_key_for(&self, operation: Operation) -> Option<String> {
        let spec = &self.scheduled_backup.spec.gpg_key_secret_ref;
        let key = match operation {
            Operation::Backup => &spec.public_key,
            Operation::Restore => &spec.private_key,
        };
        read_secret_value(&self.gpg_secret, key).filter(|v| !v.is_empty())
    }

    /// Variable document handed to the renderer for `operation`
    pub fn vars_document(&self, operation: Operation) -> Result<Value, VarsError> {
        let mut additional = self.additional_vars.clone();
        if let Some(key) = self.gpg_key_for(operation) {
            additional.insert(VAR_GPG_KEY_CONTENT.to_string(), key);
        }
        let entries = self
            .vars_secret
            .as_ref()
            .map(secret_entries)
            .unwrap_or_default();

        merge_vars(
            &self.scheduled_backup.spec.vars,
            &additional,
            &entries,
            &self.scheduled_backup.spec.vars_secret_ref.import_only_keys,
        )
    }
}

impl Renderable for ScheduledBackupAggregate {
    fn kind(&self) -> &'static str {
        "ScheduledBackup"
    }

    fn name(&self) -> String {
        self.scheduled_backup.name_any()
    }

    fn namespace(&self) -> String {
        self.scheduled_backup.namespace().unwrap_or_default()
    }

    fn owner_reference(&self) -> Option<OwnerReference> {
        self.scheduled_backup.controller_owner_ref(&())
    }

    fn object_reference(&self) -> ObjectReference {
        self.scheduled_backup.object_ref(&())
    }

    fn backup(&self) -> &ScheduledBackupAggregate {
        self
    }

    /// Helper objects for every operation, so a later restore finds its own
    fn render_targets(&self) -> Vec<RenderTarget> {
        Operation::ALL
            .into_iter()
            .map(|operation| RenderTarget {
                operation,
                resource_types: ResourceTypes::for_scheduled_backup(
                    self.operation(),
                    self.cron_enabled(),
                    operation,
                ),
            })
            .collect()
    }

    fn owned_references(&self) -> &[ChildReference] {
        &self.owned_references
    }

    fn add_owned_reference(&mut self, reference: ChildReference) {
        push_unique(&mut self.owned_references, reference);
    }
}

#[derive(Debug, Clone)]
pub struct RequestedBackupActionAggregate {
    pub action: RequestedBackupAction,
    pub scheduled: ScheduledBackupAggregate,
    owned_references: Vec<ChildReference>,
}

impl RequestedBackupActionAggregate {
    /// Bind an action to its schedule aggregate.
    ///
    /// The schedule's operation is replaced by the requested action and its
    /// cron trigger is switched off.
    pub fn new(action: RequestedBackupAction, mut scheduled: ScheduledBackupAggregate) -> Self {
        scheduled.scheduled_backup.spec.cron_job.enabled = false;
        scheduled.scheduled_backup.spec.operation = action.spec.action;
        scheduled
            .additional_vars
            .insert(VAR_KIND_TYPE.to_string(), action.kind_type().to_string());

        let owned_references = action.owned_references().to_vec();
        Self {
            action,
            scheduled,
            owned_references,
        }
    }

    pub fn operation(&self) -> Operation {
        self.action.spec.action
    }
}

impl Renderable for RequestedBackupActionAggregate {
    fn kind(&self) -> &'static str {
        "RequestedBackupAction"
    }

    fn name(&self) -> String {
        self.action.name_any()
    }

    fn namespace(&self) -> String {
        self.action.namespace().unwrap_or_default()
    }

    fn owner_reference(&self) -> Option<OwnerReference> {
        self.action.controller_owner_ref(&())
    }

    fn object_reference(&self) -> ObjectReference {
        self.action.object_ref(&())
    }

    fn backup(&self) -> &ScheduledBackupAggregate {
        &self.scheduled
    }

    fn render_targets(&self) -> Vec<RenderTarget> {
        vec![RenderTarget {
            operation: self.operation(),
            resource_types: ResourceTypes::for_requested_backup_action(),
        }]
    }

    fn owned_references(&self) -> &[ChildReference] {
        &self.owned_references
    }

    fn add_owned_reference(&mut self, reference: ChildReference) {
        push_unique(&mut self.owned_references, reference);
    }
}
