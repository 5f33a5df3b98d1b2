//! Asset discovery: source hash → local path.

use super::read_optional_json;
use crate::core::error::LdkError;
use crate::core::types::StackTemplate;
use indexmap::IndexMap;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::warn;

const ASSET_PATH_METADATA: &str = "aws:asset:path";

/// Load a per-stack asset manifest. A missing file is logged and yields an
/// empty map.
pub fn load_asset_manifest(
    path: &Path,
    assembly_dir: &Path,
) -> Result<IndexMap<String, PathBuf>, LdkError> {
    match read_optional_json(path, "asset manifest")? {
        Some(raw) => parse_asset_manifest(&raw, assembly_dir, path),
        None => Ok(IndexMap::new()),
    }
}

/// Read the `files` section. Paths are relative to the assembly directory.
pub fn parse_asset_manifest(
    raw: &Value,
    assembly_dir: &Path,
    source: &Path,
) -> Result<IndexMap<String, PathBuf>, LdkError> {
    let files = match raw.get("files") {
        None | Some(Value::Null) => return Ok(IndexMap::new()),
        Some(Value::Object(files)) => files,
        Some(_) => return Err(LdkError::structure(source, "files must be an object")),
    };

    let mut assets = IndexMap::new();
    for (hash, entry) in files {
        match entry.pointer("/source/path").and_then(Value::as_str) {
            Some(rel) => {
                assets.insert(hash.clone(), assembly_dir.join(rel));
            }
            None => warn!("asset {} in {} has no source path; skipping", hash, source.display()),
        }
    }
    Ok(assets)
}

/// Assets named by per-resource `aws:asset:path` metadata.
pub fn metadata_assets(template: &StackTemplate, assembly_dir: &Path) -> IndexMap<String, PathBuf> {
    let mut assets = IndexMap::new();
    for resource in template.resources.values() {
        let Some(rel) = resource
            .metadata
            .get(ASSET_PATH_METADATA)
            .and_then(Value::as_str)
        else {
            continue;
        };
        match asset_hash(rel) {
            Some(hash) => {
                assets.entry(hash).or_insert_with(|| assembly_dir.join(rel));
            }
            None => warn!(
                "cannot derive asset hash from '{}' on {}",
                rel, resource.logical_id
            ),
        }
    }
    assets
}

/// Hash from an asset directory or bundle name: `asset.<hash>[.zip]`.
pub fn asset_hash(path: &str) -> Option<String> {
    let name = Path::new(path).file_name()?.to_str()?;
    let hash = name.strip_prefix("asset.")?;
    let hash = hash.strip_suffix(".zip").unwrap_or(hash);
    (!hash.is_empty()).then(|| hash.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::template::parse_template;
    use crate::test_utils::{capture_logs, write_json};
    use serde_json::json;

    #[test]
    fn test_asset_manifest_files() {
        let dir = tempfile::tempdir().unwrap();
        write_json(
            dir.path(),
            "AppStack.assets.json",
            &json!({
                "version": "36.0.0",
                "files": {
                    "abc123": {
                        "source": {"path": "asset.abc123", "packaging": "zip"},
                        "destinations": {"current": {"bucketName": "b", "objectKey": "abc123.zip"}}
                    },
                    "broken": {"source": {}}
                },
                "dockerImages": {}
            }),
        );
        let assets =
            load_asset_manifest(&dir.path().join("AppStack.assets.json"), dir.path()).unwrap();
        assert_eq!(assets.len(), 1);
        assert_eq!(assets["abc123"], dir.path().join("asset.abc123"));
    }

    #[test]
    fn test_asset_manifest_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let (assets, logs) =
            capture_logs(|| load_asset_manifest(&dir.path().join("Gone.assets.json"), dir.path()));
        assert!(assets.unwrap().is_empty());
        assert!(logs.contains("asset manifest"));
    }

    #[test]
    fn test_asset_manifest_bad_files_shape() {
        let err = parse_asset_manifest(&json!({"files": []}), Path::new("."), Path::new("a.json"))
            .unwrap_err();
        assert!(matches!(err, LdkError::Structure { .. }));
    }

    #[test]
    fn test_metadata_assets() {
        let t = parse_template(
            &json!({"Resources": {
                "Fn": {
                    "Type": "AWS::Lambda::Function",
                    "Metadata": {"aws:asset:path": "asset.f00d", "aws:asset:property": "Code"}
                },
                "Other": {"Type": "AWS::SQS::Queue", "Metadata": {"aws:asset:path": "weird"}}
            }}),
            "S",
            Path::new("S.template.json"),
        )
        .unwrap();
        let dir = Path::new("/work/cdk.out");
        let assets = metadata_assets(&t, dir);
        assert_eq!(assets.len(), 1);
        assert_eq!(assets["f00d"], dir.join("asset.f00d"));
    }

    #[test]
    fn test_asset_hash() {
        assert_eq!(asset_hash("asset.abc").as_deref(), Some("abc"));
        assert_eq!(asset_hash("cdk.out/asset.abc.zip").as_deref(), Some("abc"));
        assert_eq!(asset_hash("asset."), None);
        assert_eq!(asset_hash("bundle"), None);
    }
}
