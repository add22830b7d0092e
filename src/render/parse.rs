use kube::api::DynamicObject;
use kube::core::GroupVersionKind;
use serde::Deserialize;

use super::RenderError;

/// Parse `---` separated YAML into objects, skipping empty documents
pub fn parse_documents(content: &str) -> Result<Vec<DynamicObject>, RenderError> {
    let mut objects = Vec::new();
    for (index, document) in serde_yaml::Deserializer::from_str(content).enumerate() {
        let value = serde_yaml::Value::deserialize(document).map_err(RenderError::Parse)?;
        if value.is_null() {
            continue;
        }

        let invalid = |message: String| RenderError::InvalidDocument { index, message };
        let json = serde_json::to_value(&value).map_err(|e| invalid(e.to_string()))?;
        let object: DynamicObject =
            serde_json::from_value(json).map_err(|e| invalid(e.to_string()))?;
        if document_gvk(&object).is_none() {
            return Err(invalid("missing apiVersion or kind".to_string()));
        }
        objects.push(object);
    }
    Ok(objects)
}

/// Group/version/kind declared by a document
pub fn document_gvk(object: &DynamicObject) -> Option<GroupVersionKind> {
    let types = object.types.as_ref()?;
    if types.api_version.is_empty() || types.kind.is_empty() {
        return None;
    }
    let (group, version) = types
        .api_version
        .split_once('/')
        .unwrap_or(("", types.api_version.as_str()));
    Some(GroupVersionKind::gvk(group, version, &types.kind))
}
