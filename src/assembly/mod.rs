//! Readers for the files of a synthesized cloud assembly.
//!
//! Every reader is synchronous and side-effect free apart from file reads.
//! Malformed JSON is an error; a missing optional file is logged and skipped.

pub mod assets;
pub mod digest;
pub mod manifest;
pub mod projection;
pub mod template;
pub mod tree;

use crate::core::error::LdkError;
use serde_json::Value;
use std::path::Path;

/// Read and parse a JSON file.
pub fn read_json(path: &Path) -> Result<Value, LdkError> {
    let content = std::fs::read_to_string(path).map_err(|e| LdkError::io(path, e))?;
    serde_json::from_str(&content).map_err(|e| LdkError::json(path, e))
}

/// Read a JSON file that may legitimately be absent.
pub fn read_optional_json(path: &Path, what: &str) -> Result<Option<Value>, LdkError> {
    if !path.exists() {
        tracing::warn!("{} {} not found; skipping", what, path.display());
        return Ok(None);
    }
    read_json(path).map(Some)
}
