//! Content-aware file writes.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Writes `content` to `path` only when it differs from what is already on
/// disk. Creates parent directories as needed. Returns `true` when the file
/// was actually written.
///
/// Skipping identical writes keeps mtimes stable, which is what makes stamp
/// comparison a usable freshness proxy.
pub fn write_if_different(path: &Path, content: &[u8]) -> Result<bool> {
    let exists = path
        .try_exists()
        .with_context(|| format!("Failed to check existence of {}", path.display()))?;
    if exists {
        let existing =
            fs::read(path).with_context(|| format!("Failed to read file: {}", path.display()))?;
        if existing == content {
            debug!(path = %path.display(), "Content unchanged, skipping write");
            return Ok(false);
        }
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(path, content)
        .with_context(|| format!("Failed to write file: {}", path.display()))?;
    debug!(path = %path.display(), bytes = content.len(), "File written");
    Ok(true)
}
