//! `manifest.json`: the artifact index of a cloud assembly.

use super::read_json;
use crate::core::error::LdkError;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const MANIFEST_FILE: &str = "manifest.json";

const STACK_ARTIFACT: &str = "aws:cloudformation:stack";
const ASSET_MANIFEST_ARTIFACT: &str = "cdk:asset-manifest";
const TREE_ARTIFACT: &str = "cdk:tree";
const NESTED_ASSEMBLY_ARTIFACT: &str = "cdk:cloud-assembly";

#[derive(Debug, Deserialize)]
struct RawManifest {
    #[serde(default)]
    artifacts: IndexMap<String, RawArtifact>,
}

#[derive(Debug, Deserialize)]
struct RawArtifact {
    #[serde(rename = "type", default)]
    artifact_type: String,
    #[serde(default)]
    properties: Value,
    #[serde(default)]
    dependencies: Vec<String>,
}

/// A stack artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct StackArtifact {
    pub name: String,
    pub template_path: PathBuf,
    pub dependencies: Vec<String>,
}

/// An asset manifest artifact and the stack it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetManifestArtifact {
    pub name: String,
    pub path: PathBuf,
    pub stack: Option<String>,
}

/// The recognised artifacts of one assembly directory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    pub dir: PathBuf,
    pub stacks: Vec<StackArtifact>,
    pub asset_manifests: Vec<AssetManifestArtifact>,
    pub tree_path: Option<PathBuf>,
    /// Directories of nested assemblies
    pub nested: Vec<PathBuf>,
}

/// Load `manifest.json` from an assembly directory. `None` when it is absent.
pub fn load_manifest(dir: &Path) -> Result<Option<Manifest>, LdkError> {
    let path = dir.join(MANIFEST_FILE);
    if !path.exists() {
        debug!("no {} in {}", MANIFEST_FILE, dir.display());
        return Ok(None);
    }
    let raw = read_json(&path)?;
    parse_manifest(raw, dir, &path).map(Some)
}

/// Interpret a parsed manifest document. Relative paths resolve against `dir`.
pub fn parse_manifest(raw: Value, dir: &Path, source: &Path) -> Result<Manifest, LdkError> {
    let raw: RawManifest =
        serde_json::from_value(raw).map_err(|e| LdkError::structure(source, e.to_string()))?;

    let mut manifest = Manifest {
        dir: dir.to_path_buf(),
        ..Manifest::default()
    };

    for (name, artifact) in &raw.artifacts {
        match artifact.artifact_type.as_str() {
            STACK_ARTIFACT => {
                let file = match string_property(&artifact.properties, "templateFile") {
                    Some(f) => f,
                    None => {
                        warn!("stack '{}' has no templateFile; assuming default name", name);
                        format!("{}.template.json", name)
                    }
                };
                manifest.stacks.push(StackArtifact {
                    name: name.clone(),
                    template_path: dir.join(file),
                    dependencies: artifact.dependencies.clone(),
                });
            }
            ASSET_MANIFEST_ARTIFACT => match string_property(&artifact.properties, "file") {
                Some(file) => manifest.asset_manifests.push(AssetManifestArtifact {
                    name: name.clone(),
                    path: dir.join(file),
                    stack: None,
                }),
                None => warn!("asset manifest '{}' has no file property; skipping", name),
            },
            TREE_ARTIFACT => match string_property(&artifact.properties, "file") {
                Some(file) => manifest.tree_path = Some(dir.join(file)),
                None => warn!("tree artifact '{}' has no file property; skipping", name),
            },
            NESTED_ASSEMBLY_ARTIFACT => {
                match string_property(&artifact.properties, "directoryName") {
                    Some(sub) => manifest.nested.push(dir.join(sub)),
                    None => warn!("nested assembly '{}' has no directoryName; skipping", name),
                }
            }
            other => debug!("ignoring artifact '{}' of type '{}'", name, other),
        }
    }

    // Stacks list their asset manifest among their dependencies.
    for asset in &mut manifest.asset_manifests {
        asset.stack = manifest
            .stacks
            .iter()
            .find(|s| s.dependencies.iter().any(|d| d == &asset.name))
            .map(|s| s.name.clone())
            .or_else(|| asset.name.strip_suffix(".assets").map(str::to_string));
    }

    Ok(manifest)
}

fn string_property(properties: &Value, key: &str) -> Option<String> {
    properties.get(key).and_then(Value::as_str).map(str::to_string)
}
