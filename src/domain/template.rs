use crate::crd::{ClusterBackupProcedureTemplate, Operation};

/// Procedure template an aggregate is rendered with
#[derive(Debug, Clone, PartialEq)]
pub enum Template {
    /// Fetched from the cluster by name
    Cluster(ClusterBackupProcedureTemplate),
    /// Bundled with the workload image, carries no script or image
    Internal { name: String },
}

impl Template {
    pub fn name(&self) -> &str {
        match self {
            Template::Cluster(template) => template.metadata.name.as_deref().unwrap_or_default(),
            Template::Internal { name } => name,
        }
    }

    pub fn image(&self) -> Option<&str> {
        match self {
            Template::Cluster(template) => {
                Some(template.spec.image.as_str()).filter(|i| !i.is_empty())
            }
            Template::Internal { .. } => None,
        }
    }

    pub fn script(&self, operation: Operation) -> Option<&str> {
        match self {
            Template::Cluster(template) => {
                let script = match operation {
                    Operation::Backup => template.spec.backup.as_str(),
                    Operation::Restore => template.spec.restore.as_str(),
                };
                Some(script).filter(|s| !s.is_empty())
            }
            Template::Internal { .. } => None,
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, Template::Internal { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ClusterBackupProcedureTemplateSpec;

    #[test]
    fn test_internal_template_has_no_script_or_image() {
        let template = Template::Internal {
            name: "pg15".to_string(),
        };
        assert_eq!(template.name(), "pg15");
        assert!(template.image().is_none());
        assert!(template.script(Operation::Backup).is_none());
        assert!(template.is_internal());
    }

    #[test]
    fn test_cluster_template_selects_script_by_operation() {
        let template = Template::Cluster(ClusterBackupProcedureTemplate::new(
            "pg15",
            ClusterBackupProcedureTemplateSpec {
                image: "ghcr.io/riotkit-org/backup-maker:latest".to_string(),
                backup: "pg_dump".to_string(),
                restore: String::new(),
            },
        ));
        assert_eq!(template.name(), "pg15");
        assert_eq!(template.image(), Some("ghcr.io/riotkit-org/backup-maker:latest"));
        assert_eq!(template.script(Operation::Backup), Some("pg_dump"));
        assert!(template.script(Operation::Restore).is_none());
    }

    #[test]
    fn test_cluster_templates_compare_by_content() {
        let spec = ClusterBackupProcedureTemplateSpec {
            image: "ghcr.io/riotkit-org/backup-maker:latest".to_string(),
            backup: "pg_dump".to_string(),
            restore: "psql".to_string(),
        };
        let cached = Template::Cluster(ClusterBackupProcedureTemplate::new("pg15", spec.clone()));
        let fetched = Template::Cluster(ClusterBackupProcedureTemplate::new("pg15", spec));
        assert_eq!(cached, fetched);
        assert_ne!(
            cached,
            Template::Internal {
                name: "pg15".to_string()
            }
        );
    }
}
