//! Atomic file creation (temp file in the target directory + rename).
//!
//! Readers scanning a sandbox directory never observe partially written files:
//! content is staged in a hidden `.tmp*` sibling and renamed into place.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;

use anyhow::{Context, Result};
use tempfile::NamedTempFile;

fn stage(path: &Path, contents: &[u8]) -> Result<NamedTempFile> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp = NamedTempFile::new_in(parent)
        .with_context(|| format!("create temp file in {}", parent.display()))?;
    tmp.write_all(contents)
        .with_context(|| format!("write temp file for {}", path.display()))?;
    tmp.flush()
        .with_context(|| format!("flush temp file for {}", path.display()))?;
    Ok(tmp)
}

/// Write `contents` to `path`, replacing any existing file.
pub fn write_replace(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = stage(path, contents)?;
    tmp.persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

/// Create `path` with `contents` only if it does not exist yet.
///
/// Returns `Ok(false)` when another file already holds the name.
pub fn create_new(path: &Path, contents: &[u8]) -> Result<bool> {
    let tmp = stage(path, contents)?;
    match tmp.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(err) if err.error.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(err) => Err(err.error).with_context(|| format!("create {}", path.display())),
    }
}
