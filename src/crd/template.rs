use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Cluster-wide backup procedure: the image and the scripts it runs.
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[kube(
    kind = "ClusterBackupProcedureTemplate",
    group = "riotkit.org",
    version = "v1alpha1",
    shortname = "cbpt",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterBackupProcedureTemplateSpec {
    pub image: String,
    /// Script executed for backups
    #[serde(default)]
    pub backup: String,
    /// Script executed for restores
    #[serde(default)]
    pub restore: String,
}
