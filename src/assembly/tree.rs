//! Construct tree (`tree.json`).

use super::read_optional_json;
use crate::core::error::LdkError;
use crate::core::types::ConstructNode;
use indexmap::IndexMap;
use serde_json::Value;
use std::path::Path;

const CFN_TYPE_ATTRIBUTE: &str = "aws:cdk:cloudformation:type";

/// Load a construct tree; a missing file is logged and yields `None`.
pub fn load_tree(path: &Path) -> Result<Option<ConstructNode>, LdkError> {
    match read_optional_json(path, "construct tree")? {
        Some(raw) => parse_tree(&raw, path).map(Some),
        None => Ok(None),
    }
}

/// Build the construct tree from a `{"tree": {...}}` document.
pub fn parse_tree(raw: &Value, source: &Path) -> Result<ConstructNode, LdkError> {
    let root = raw
        .get("tree")
        .ok_or_else(|| LdkError::structure(source, "missing top-level 'tree'"))?;
    parse_node(root, "", "").map_err(|message| LdkError::structure(source, message))
}

fn parse_node(raw: &Value, key: &str, parent_path: &str) -> Result<ConstructNode, String> {
    let obj = raw
        .as_object()
        .ok_or_else(|| format!("construct '{}' is not an object", key))?;

    let id = obj
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or(key)
        .to_string();
    let path = match obj.get("path").and_then(Value::as_str) {
        Some(p) => p.to_string(),
        None if parent_path.is_empty() => id.clone(),
        None => format!("{}/{}", parent_path, id),
    };

    let attributes: IndexMap<String, Value> = obj
        .get("attributes")
        .and_then(Value::as_object)
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();
    let cfn_type = attributes
        .get(CFN_TYPE_ATTRIBUTE)
        .and_then(Value::as_str)
        .map(str::to_string);

    let children = match obj.get("children") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Object(map)) => map
            .iter()
            .map(|(k, child)| parse_node(child, k, &path))
            .collect::<Result<_, _>>()?,
        Some(Value::Array(list)) => list
            .iter()
            .map(|child| parse_node(child, "", &path))
            .collect::<Result<_, _>>()?,
        Some(_) => return Err(format!("children of '{}' must be a map or list", path)),
    };

    Ok(ConstructNode {
        id,
        path,
        cfn_type,
        attributes,
        children,
    })
}

/// Construct path of a template resource found by tree search: an L1 node
/// under `stack` whose path ends in the logical id (or `<id>/Resource`).
pub fn construct_path_for(root: &ConstructNode, stack: &str, logical_id: &str) -> Option<String> {
    let prefix = format!("{}/", stack);
    let direct = format!("/{}", logical_id);
    let resource = format!("/{}/Resource", logical_id);
    root.cfn_nodes()
        .into_iter()
        .find(|n| {
            n.path.starts_with(&prefix) && (n.path.ends_with(&direct) || n.path.ends_with(&resource))
        })
        .map(|n| n.path.clone())
}
