//! Local file helpers for artifacts staged before upload.

use std::io;
use std::path::{Path, PathBuf};

/// Atomically write raw bytes to a file.
///
/// Writes to a `.tmp` sibling file, then renames onto the target path.
/// Creates parent directories if they don't exist.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Atomically write pretty-printed JSON.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, data: &T) -> io::Result<()> {
    let json = serde_json::to_string_pretty(data).map_err(io::Error::other)?;
    atomic_write(path, json.as_bytes())
}

/// Atomically write YAML.
pub fn atomic_write_yaml<T: serde::Serialize>(path: &Path, data: &T) -> io::Result<()> {
    let yaml = serde_yaml::to_string(data).map_err(io::Error::other)?;
    atomic_write(path, yaml.as_bytes())
}

/// Every regular file below `root`, as paths relative to `root`, sorted.
pub fn collect_files(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if let Ok(relative) = path.strip_prefix(root) {
                files.push(relative.to_path_buf());
            }
        }
    }
    files.sort();
    Ok(files)
}
