//! # Rendering
//!
//! Turns a template, a variable document and an operation into the
//! Kubernetes documents to apply.
//!
//! - [`Renderer`] - the rendering seam
//! - [`BackupMakerRenderer`] - drives the backup-maker generator binary
//! - [`parse_documents`] - multi-document YAML to untyped objects

mod cli;
mod parse;

use async_trait::async_trait;
use kube::api::DynamicObject;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::crd::Operation;
use crate::domain::Template;

pub use cli::BackupMakerRenderer;
pub use parse::{document_gvk, parse_documents};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("renderer binary '{0}' not found")]
    BinaryNotFound(String),

    #[error("cannot prepare rendering workspace: {0}")]
    Workspace(#[source] std::io::Error),

    #[error("cannot serialize {what}: {message}")]
    Serialize { what: &'static str, message: String },

    #[error("error while generating manifests: {0}")]
    Command(String),

    #[error("cannot read rendered manifests at '{path}': {source}")]
    Output {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse rendered YAML: {0}")]
    Parse(#[source] serde_yaml::Error),

    #[error("rendered document #{index} is not a Kubernetes object: {message}")]
    InvalidDocument { index: usize, message: String },
}

impl RenderError {
    /// Output that rendering the same template again would reproduce
    pub fn is_fatal(&self) -> bool {
        matches!(self, RenderError::Parse(_) | RenderError::InvalidDocument { .. })
    }
}

/// Everything a renderer needs for one operation
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub template: Template,
    pub operation: Operation,
    /// Fully merged variable document
    pub vars: serde_yaml::Value,
    /// Public key for backups, private key for restores
    pub gpg_key: Option<Zeroizing<String>>,
    /// Cron expression of the schedule
    pub schedule: String,
    pub namespace: String,
    /// Name of the schedule, used as the job name
    pub name: String,
}

#[async_trait]
pub trait Renderer: Send + Sync {
    /// Render documents in output order
    async fn render(&self, request: &RenderRequest) -> Result<Vec<DynamicObject>, RenderError>;
}
