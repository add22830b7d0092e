use regex::Regex;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use thiserror::Error;

static PATH_SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]+$").expect("Failed to compile PATH_SEGMENT regex")
});

#[derive(Debug, Error)]
pub enum VarsError {
    #[error("cannot parse vars document: {0}")]
    Parse(#[source] serde_yaml::Error),

    #[error("vars document must be a mapping")]
    NotAMapping,

    #[error("malformed variable path '{0}'")]
    MalformedPath(String),

    #[error("variable path '{path}' runs into a non-mapping value at '{segment}'")]
    Collision { path: String, segment: String },
}

/// Set `value` at a dotted `path` (e.g. `Repository.token`), creating
/// intermediate mappings as needed
pub fn expand_dotted_path(document: &mut Mapping, path: &str, value: &str) -> Result<(), VarsError> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| !PATH_SEGMENT.is_match(s)) {
        return Err(VarsError::MalformedPath(path.to_string()));
    }
    let Some((last, parents)) = segments.split_last() else {
        return Err(VarsError::MalformedPath(path.to_string()));
    };

    let mut current = document;
    for segment in parents {
        let key = Value::String((*segment).to_string());
        if !current.contains_key(&key) {
            current.insert(key.clone(), Value::Mapping(Mapping::new()));
        }
        current = match current.get_mut(&key) {
            Some(Value::Mapping(nested)) => nested,
            _ => {
                return Err(VarsError::Collision {
                    path: path.to_string(),
                    segment: (*segment).to_string(),
                })
            }
        };
    }
    current.insert(
        Value::String((*last).to_string()),
        Value::String(value.to_string()),
    );
    Ok(())
}

/// Compose the variable document handed to the renderer.
///
/// `additional` is applied first, then `secret_entries`. A non-empty
/// `allow_list` limits which secret entries are imported, others are dropped.
pub fn merge_vars(
    base: &str,
    additional: &BTreeMap<String, String>,
    secret_entries: &BTreeMap<String, String>,
    allow_list: &[String],
) -> Result<Value, VarsError> {
    let mut document = if base.trim().is_empty() {
        Mapping::new()
    } else {
        match serde_yaml::from_str::<Value>(base).map_err(VarsError::Parse)? {
            Value::Mapping(mapping) => mapping,
            Value::Null => Mapping::new(),
            _ => return Err(VarsError::NotAMapping),
        }
    };

    for (path, value) in additional {
        expand_dotted_path(&mut document, path, value)?;
    }
    for (path, value) in secret_entries {
        if allow_list.is_empty() || allow_list.iter().any(|allowed| allowed == path) {
            expand_dotted_path(&mut document, path, value)?;
        }
    }
    Ok(Value::Mapping(document))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_additional_vars_and_secret_entries_expand_into_nested_document() {
        let merged = merge_vars(
            "{}",
            &map(&[("HelmValues.gpgKeyContent", "X")]),
            &map(&[("Repository.token", "Y")]),
            &[],
        )
        .unwrap();

        let expected: Value =
            serde_yaml::from_str("HelmValues:\n  gpgKeyContent: X\nRepository:\n  token: Y\n")
                .unwrap();
        assert_eq!(merged, expected);
    }

    #[test]
    fn test_secret_entries_override_additional_vars() {
        let merged = merge_vars(
            "",
            &map(&[("Repository.token", "from-token-secret")]),
            &map(&[("Repository.token", "from-vars-secret")]),
            &[],
        )
        .unwrap();

        assert_eq!(merged["Repository"]["token"], Value::from("from-vars-secret"));
    }

    #[test]
    fn test_allow_list_drops_unlisted_entries() {
        let merged = merge_vars(
            "",
            &BTreeMap::new(),
            &map(&[("Params.password", "secret"), ("Params.user", "postgres")]),
            &["Params.user".to_string()],
        )
        .unwrap();

        assert_eq!(merged["Params"]["user"], Value::from("postgres"));
        assert!(merged["Params"].get("password").is_none());
    }

    #[test]
    fn test_base_document_is_preserved() {
        let merged = merge_vars(
            "Params:\n  hostname: postgres.db.svc\n  port: 5432\n",
            &map(&[("Params.user", "postgres")]),
            &BTreeMap::new(),
            &[],
        )
        .unwrap();

        assert_eq!(merged["Params"]["hostname"], Value::from("postgres.db.svc"));
        assert_eq!(merged["Params"]["port"].as_u64(), Some(5432));
        assert_eq!(merged["Params"]["user"], Value::from("postgres"));
    }

    #[test]
    fn test_malformed_paths_are_rejected() {
        for path in ["", "a..b", ".a", "a.", "a b", "a[0]"] {
            let result = merge_vars("", &map(&[(path, "x")]), &BTreeMap::new(), &[]);
            assert!(
                matches!(result, Err(VarsError::MalformedPath(_))),
                "expected {path:?} to be rejected"
            );
        }
    }

    #[test]
    fn test_path_through_scalar_is_rejected() {
        let result = merge_vars(
            "Repository: plain-string\n",
            &map(&[("Repository.token", "x")]),
            &BTreeMap::new(),
            &[],
        );
        assert!(matches!(result, Err(VarsError::Collision { .. })));
    }

    #[test]
    fn test_non_mapping_base_is_rejected() {
        let result = merge_vars("- a\n- b\n", &BTreeMap::new(), &BTreeMap::new(), &[]);
        assert!(matches!(result, Err(VarsError::NotAMapping)));
    }
}
