//! Renderer backed by the backup-maker generator (`bmg`) command line tool.
//!
//! Each call works in a private temporary directory:
//!
//! ```text
//! <workspace>/
//!   definition.yaml                  merged variables
//!   gpg.key                          key selected for the operation
//!   templates/<operation>/<name>.tmpl
//!   definition/<name>.json           template metadata
//!   output/<operation>.yaml          rendered manifests
//! ```

use async_trait::async_trait;
use kube::api::DynamicObject;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{debug, info};

use super::{parse_documents, RenderError, RenderRequest, Renderer};

#[derive(Debug, Clone)]
pub struct BackupMakerRenderer {
    binary: PathBuf,
}

impl BackupMakerRenderer {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn write(path: &Path, content: &[u8]) -> Result<(), RenderError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(RenderError::Workspace)?;
        }
        tokio::fs::write(path, content)
            .await
            .map_err(RenderError::Workspace)
    }

    /// Lay out template script, metadata, variables and key inside `workspace`
    async fn prepare_workspace(
        workspace: &Path,
        request: &RenderRequest,
    ) -> Result<(), RenderError> {
        let operation = request.operation.as_str();
        let name = request.template.name();

        if let Some(script) = request.template.script(request.operation) {
            let definition = serde_json::json!({
                "defaultImage": "this-should-be-overridden",
                "backupTemplate": format!("{name}.tmpl"),
                "restoreTemplate": format!("{name}.tmpl"),
            });
            let definition = serde_json::to_vec(&definition).map_err(|e| RenderError::Serialize {
                what: "template definition",
                message: e.to_string(),
            })?;
            Self::write(
                &workspace.join("definition").join(format!("{name}.json")),
                &definition,
            )
            .await?;
            Self::write(
                &workspace
                    .join("templates")
                    .join(operation)
                    .join(format!("{name}.tmpl")),
                script.as_bytes(),
            )
            .await?;
        } else {
            debug!(template = %name, "Template provides no script, using the one bundled with the image");
        }

        let vars = serde_yaml::to_string(&request.vars).map_err(|e| RenderError::Serialize {
            what: "definition.yaml",
            message: e.to_string(),
        })?;
        Self::write(&workspace.join("definition.yaml"), vars.as_bytes()).await?;

        let key = request.gpg_key.as_deref().map(String::as_str).unwrap_or_default();
        Self::write(&workspace.join("gpg.key"), key.as_bytes()).await?;

        tokio::fs::create_dir_all(workspace.join("output"))
            .await
            .map_err(RenderError::Workspace)
    }
}

#[async_trait]
impl Renderer for BackupMakerRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<Vec<DynamicObject>, RenderError> {
        let binary = which::which(&self.binary)
            .map_err(|_| RenderError::BinaryNotFound(self.binary.display().to_string()))?;
        let workspace = tempfile::Builder::new()
            .prefix("bmg-")
            .tempdir()
            .map_err(RenderError::Workspace)?;
        Self::prepare_workspace(workspace.path(), request).await?;

        let operation = request.operation.as_str();
        let mut command = tokio::process::Command::new(&binary);
        command
            .current_dir(workspace.path())
            .arg("generate")
            .arg(operation)
            .arg("--kubernetes")
            .args(["--template", request.template.name()])
            .args(["--definition", "definition.yaml"])
            .args(["--gpg-key-path", "gpg.key"])
            .args(["--output-dir", "output"])
            .args(["--templates-dir", "templates"])
            .args(["--schedule", request.schedule.as_str()])
            .args(["--job-name", request.name.as_str()])
            .args(["--namespace", request.namespace.as_str()]);
        if let Some(image) = request.template.image() {
            command.args(["--image", image]);
        }

        debug!(
            template = %request.template.name(),
            operation = %operation,
            "Running backup-maker generator"
        );
        let output = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| RenderError::Command(e.to_string()))?;
        if !output.status.success() {
            return Err(RenderError::Command(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let manifests = workspace.path().join("output").join(format!("{operation}.yaml"));
        let content = tokio::fs::read_to_string(&manifests)
            .await
            .map_err(|source| RenderError::Output {
                path: manifests.display().to_string(),
                source,
            })?;
        let documents = parse_documents(&content)?;

        info!(
            template = %request.template.name(),
            operation = %operation,
            documents = documents.len(),
            "Rendered manifests"
        );
        Ok(documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ClusterBackupProcedureTemplate, ClusterBackupProcedureTemplateSpec, Operation};
    use crate::domain::Template;
    use zeroize::Zeroizing;

    fn request(template: Template) -> RenderRequest {
        RenderRequest {
            template,
            operation: Operation::Backup,
            vars: serde_yaml::from_str("Repository:\n  token: abc\n").unwrap(),
            gpg_key: Some(Zeroizing::new("PUBLIC KEY".to_string())),
            schedule: "00 02 * * *".to_string(),
            namespace: "backups".to_string(),
            name: "app1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_workspace_layout_for_cluster_template() {
        let workspace = tempfile::tempdir().unwrap();
        let template = Template::Cluster(ClusterBackupProcedureTemplate::new(
            "pg15",
            ClusterBackupProcedureTemplateSpec {
                image: "ghcr.io/riotkit-org/backup-maker:latest".to_string(),
                backup: "pg_dumpall".to_string(),
                restore: "psql".to_string(),
            },
        ));

        BackupMakerRenderer::prepare_workspace(workspace.path(), &request(template))
            .await
            .unwrap();

        let script =
            std::fs::read_to_string(workspace.path().join("templates/backup/pg15.tmpl")).unwrap();
        assert_eq!(script, "pg_dumpall");
        let definition: serde_json::Value = serde_json::from_slice(
            &std::fs::read(workspace.path().join("definition/pg15.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(definition["backupTemplate"], "pg15.tmpl");
        let vars = std::fs::read_to_string(workspace.path().join("definition.yaml")).unwrap();
        assert!(vars.contains("token: abc"));
        let key = std::fs::read_to_string(workspace.path().join("gpg.key")).unwrap();
        assert_eq!(key, "PUBLIC KEY");
        assert!(workspace.path().join("output").is_dir());
    }

    #[tokio::test]
    async fn test_internal_template_writes_no_script() {
        let workspace = tempfile::tempdir().unwrap();
        let template = Template::Internal {
            name: "pg15".to_string(),
        };

        BackupMakerRenderer::prepare_workspace(workspace.path(), &request(template))
            .await
            .unwrap();

        assert!(!workspace.path().join("templates").exists());
        assert!(workspace.path().join("definition.yaml").is_file());
    }

    #[tokio::test]
    async fn test_missing_binary_is_reported() {
        let renderer = BackupMakerRenderer::new("/nonexistent/bmg");
        let result = renderer
            .render(&request(Template::Internal {
                name: "pg15".to_string(),
            }))
            .await;
        assert!(matches!(result, Err(RenderError::BinaryNotFound(_))));
    }
}
