use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::DynamicObject;

use crate::constants::LABEL_TRACKING_ID;

/// Stamp namespace, owner reference and tracking label onto a rendered document
pub fn prepare_document(
    document: &mut DynamicObject,
    owner: Option<&OwnerReference>,
    namespace: &str,
    tracking_id: &str,
) {
    document.metadata.namespace = Some(namespace.to_string());

    if let Some(owner) = owner {
        let references = document.metadata.owner_references.get_or_insert_with(Vec::new);
        match references.iter_mut().find(|r| r.uid == owner.uid) {
            Some(existing) => *existing = owner.clone(),
            None => references.push(owner.clone()),
        }
    }

    document
        .metadata
        .labels
        .get_or_insert_with(Default::default)
        .insert(LABEL_TRACKING_ID.to_string(), tracking_id.to_string());
}

pub fn tracking_id_of(object: &DynamicObject) -> Option<&str> {
    object
        .metadata
        .labels
        .as_ref()?
        .get(LABEL_TRACKING_ID)
        .map(String::as_str)
        .filter(|id| !id.is_empty())
}

/// `namespace/name`, falling back to the generateName prefix
pub fn display_name(object: &DynamicObject) -> String {
    let name = object
        .metadata
        .name
        .as_deref()
        .or(object.metadata.generate_name.as_deref())
        .unwrap_or_default();
    match object.metadata.namespace.as_deref() {
        Some(namespace) => format!("{namespace}/{name}"),
        None => name.to_string(),
    }
}
