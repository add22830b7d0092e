//! Status types shared by ScheduledBackup and RequestedBackupAction.

use chrono::{DateTime, Utc};
use kube::core::GroupVersionKind;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Tri-state status of a condition
#[derive(Debug, Clone, Copy, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub r#type: String,
    pub status: ConditionStatus,
    /// RFC3339 time of the last status change
    #[serde(default)]
    pub last_transition_time: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Build the condition tracking installation of rendered objects
    pub fn installation(
        status: ConditionStatus,
        message: impl Into<String>,
        observed_generation: Option<i64>,
    ) -> Self {
        Self {
            r#type: crate::constants::CONDITION_TYPE_INSTALLATION.to_string(),
            status,
            last_transition_time: None,
            reason: Some(crate::constants::CONDITION_REASON_SPEC_UPDATED.to_string()),
            message: Some(message.into()),
            observed_generation,
        }
    }

    /// Parsed `last_transition_time`, `None` when absent or malformed
    pub fn transitioned_at(&self) -> Option<DateTime<Utc>> {
        self.last_transition_time
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
    }
}

/// Insert or replace the condition of the same type.
///
/// `last_transition_time` only moves when the status value changes.
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition, now: DateTime<Utc>) {
    match conditions.iter_mut().find(|c| c.r#type == condition.r#type) {
        Some(existing) => {
            if existing.status != condition.status || existing.last_transition_time.is_none() {
                existing.last_transition_time = Some(now.to_rfc3339());
            }
            existing.status = condition.status;
            existing.reason = condition.reason;
            existing.message = condition.message;
            existing.observed_generation = condition.observed_generation;
        }
        None => {
            let mut condition = condition;
            condition.last_transition_time = Some(now.to_rfc3339());
            conditions.push(condition);
        }
    }
}

/// Weak reference to an object spawned by the controller.
///
/// The object name may be generated by the API server, so identity is
/// recovered through the tracking label instead.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct ChildReference {
    pub api_version: String,
    pub kind: String,
    pub tracking_id: String,
}

impl ChildReference {
    pub fn new(gvk: &GroupVersionKind, tracking_id: impl Into<String>) -> Self {
        Self {
            api_version: gvk.api_version(),
            kind: gvk.kind.clone(),
            tracking_id: tracking_id.into(),
        }
    }

    pub fn gvk(&self) -> GroupVersionKind {
        let (group, version) = self
            .api_version
            .split_once('/')
            .unwrap_or(("", self.api_version.as_str()));
        GroupVersionKind::gvk(group, version, &self.kind)
    }
}

/// Health snapshot of a single child reference
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobHealthStatus {
    pub child_reference: ChildReference,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub failed: bool,
    #[serde(default)]
    pub succeeded: bool,
}

impl JobHealthStatus {
    pub fn running(child_reference: ChildReference, message: impl Into<String>) -> Self {
        Self {
            child_reference,
            message: message.into(),
            running: true,
            failed: false,
            succeeded: false,
        }
    }

    pub fn failed(child_reference: ChildReference, message: impl Into<String>) -> Self {
        Self {
            child_reference,
            message: message.into(),
            running: false,
            failed: true,
            succeeded: false,
        }
    }

    pub fn succeeded(child_reference: ChildReference, message: impl Into<String>) -> Self {
        Self {
            child_reference,
            message: message.into(),
            running: false,
            failed: false,
            succeeded: true,
        }
    }
}
