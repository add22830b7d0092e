//! GPG key secrets: creation, inspection and in-place repair.

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;
use tracing::info;

use super::{ArmoredKeyPair, KeyPairError, KeyPairProvider};
use crate::constants::{ANNOTATION_EMAIL, LABEL_TYPE, LABEL_TYPE_GPG_SECRET};
use crate::crd::GpgKeySecretSpec;

/// Value of `key` in a secret, looking at `stringData` first, then `data`
pub fn read_secret_value(secret: &Secret, key: &str) -> Option<String> {
    if let Some(value) = secret.string_data.as_ref().and_then(|d| d.get(key)) {
        return Some(value.clone());
    }
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|v| String::from_utf8_lossy(&v.0).into_owned())
}

/// All entries of a secret, `stringData` taking precedence over `data`
pub fn secret_entries(secret: &Secret) -> BTreeMap<String, String> {
    let mut entries: BTreeMap<String, String> = secret
        .data
        .iter()
        .flatten()
        .map(|(k, v)| (k.clone(), String::from_utf8_lossy(&v.0).into_owned()))
        .collect();
    entries.extend(
        secret
            .string_data
            .iter()
            .flatten()
            .map(|(k, v)| (k.clone(), v.clone())),
    );
    entries
}

/// Identity a key pair is generated for
pub fn key_identity(spec: &GpgKeySecretSpec, namespace: &str) -> String {
    if spec.email.is_empty() {
        format!("{}@{namespace}", spec.secret_name)
    } else {
        spec.email.clone()
    }
}

fn write_key_pair(secret: &mut Secret, spec: &GpgKeySecretSpec, email: &str, pair: &ArmoredKeyPair) {
    let entries = [
        (spec.public_key.as_str(), pair.public_key.as_str()),
        (spec.private_key.as_str(), pair.private_key.as_str()),
        (spec.passphrase_key.as_str(), ""),
        (spec.email_key.as_str(), email),
    ];

    let data = secret.data.get_or_insert_with(BTreeMap::new);
    for (key, value) in entries {
        data.insert(key.to_string(), ByteString(value.as_bytes().to_vec()));
    }
    // stringData would shadow the fresh data on the next write
    if let Some(string_data) = secret.string_data.as_mut() {
        for (key, _) in entries {
            string_data.remove(key);
        }
    }
}

/// Build a new GPG key secret with a freshly generated key pair
pub async fn create_new_gpg_secret(
    name: &str,
    namespace: &str,
    email: &str,
    owner_references: Vec<OwnerReference>,
    spec: &GpgKeySecretSpec,
    provider: &dyn KeyPairProvider,
) -> Result<Secret, KeyPairError> {
    let pair = provider.generate(email).await?;

    let mut secret = Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                LABEL_TYPE.to_string(),
                LABEL_TYPE_GPG_SECRET.to_string(),
            )])),
            annotations: Some(BTreeMap::from([(
                ANNOTATION_EMAIL.to_string(),
                email.to_string(),
            )])),
            owner_references: Some(owner_references),
            ..Default::default()
        },
        ..Default::default()
    };
    write_key_pair(&mut secret, spec, email, &pair);

    info!(secret = %format!("{namespace}/{name}"), "Prepared new GPG key secret");
    Ok(secret)
}

/// Whether the secret lacks the public or the private key
pub fn should_update(secret: &Secret, spec: &GpgKeySecretSpec) -> bool {
    [&spec.public_key, &spec.private_key]
        .into_iter()
        .any(|key| read_secret_value(secret, key).is_none_or(|v| v.trim().is_empty()))
}

/// Regenerate the key pair inside an existing secret.
///
/// Returns `false` without touching the secret when it is complete and `force` is off.
pub async fn update_gpg_secret_with_recreated_gpg_key(
    secret: &mut Secret,
    spec: &GpgKeySecretSpec,
    email: &str,
    force: bool,
    provider: &dyn KeyPairProvider,
) -> Result<bool, KeyPairError> {
    if !force && !should_update(secret, spec) {
        return Ok(false);
    }

    let pair = provider.generate(email).await?;
    write_key_pair(secret, spec, email, &pair);
    secret
        .metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(ANNOTATION_EMAIL.to_string(), email.to_string());

    info!(
        secret = %secret.metadata.name.as_deref().unwrap_or("unknown"),
        "Regenerated GPG key pair in existing secret"
    );
    Ok(true)
}
