//! BLAKE3 content digests of asset bundles, shown by `ldk inspect`.

use crate::core::error::LdkError;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Digest of an asset bundle: a single file, or a directory walked in sorted
/// order with relative paths mixed in. Symlinks are skipped.
/// Returns `"blake3:{hex}"`.
pub fn digest_asset(path: &Path) -> Result<String, LdkError> {
    let meta = std::fs::metadata(path).map_err(|e| LdkError::io(path, e))?;
    if meta.is_dir() {
        digest_directory(path)
    } else {
        digest_file(path)
    }
}

fn file_hash(path: &Path) -> Result<blake3::Hash, LdkError> {
    let file = File::open(path).map_err(|e| LdkError::io(path, e))?;
    let mut hasher = blake3::Hasher::new();
    hasher
        .update_reader(file)
        .map_err(|e| LdkError::io(path, e))?;
    Ok(hasher.finalize())
}

fn digest_file(path: &Path) -> Result<String, LdkError> {
    Ok(format!("blake3:{}", file_hash(path)?.to_hex()))
}

fn digest_directory(root: &Path) -> Result<String, LdkError> {
    let mut files: Vec<(String, PathBuf)> = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let read_dir = std::fs::read_dir(&dir).map_err(|e| LdkError::io(&dir, e))?;
        for entry in read_dir {
            let entry = entry.map_err(|e| LdkError::io(&dir, e))?;
            let path = entry.path();
            let file_type = entry.file_type().map_err(|e| LdkError::io(&path, e))?;
            if file_type.is_symlink() {
                continue;
            }
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                let rel = path
                    .strip_prefix(root)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .replace('\\', "/");
                files.push((rel, path));
            }
        }
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = blake3::Hasher::new();
    for (rel, path) in &files {
        hasher.update(rel.as_bytes());
        hasher.update(b"\0");
        hasher.update(file_hash(path)?.as_bytes());
        hasher.update(b"\n");
    }
    Ok(format!("blake3:{}", hasher.finalize().to_hex()))
}
