//! Per-invocation scratch directories.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;
use tracing::{debug, warn};

const SCRATCH_PREFIX: &str = "sandbox_run_";

/// A fresh, empty working directory owned by exactly one invocation.
///
/// Removed by `close()` or, on any other exit path (early return, panic
/// unwinding), by `Drop`. Removal failures are logged and swallowed.
#[derive(Debug)]
pub struct ScratchDir {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl ScratchDir {
    /// Create a new scratch dir under `parent`, or the system temp dir.
    pub fn create(parent: Option<&Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(SCRATCH_PREFIX);
        let dir = match parent {
            Some(parent) => {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create scratch parent {}", parent.display()))?;
                builder.tempdir_in(parent)
            }
            None => builder.tempdir(),
        }
        .context("create scratch dir")?;
        let path = dir.path().to_path_buf();
        debug!(path = %path.display(), "scratch dir created");
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the code to be executed as the single file in this directory.
    pub fn write_script(&self, file_name: &str, code: &str) -> Result<PathBuf> {
        let script = self.path.join(file_name);
        fs::write(&script, code).with_context(|| format!("write script {}", script.display()))?;
        Ok(script)
    }

    /// Remove the directory now.
    pub fn close(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if let Some(dir) = self.dir.take()
            && let Err(err) = dir.close()
        {
            warn!(path = %self.path.display(), err = %err, "failed to remove scratch dir");
        }
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        self.remove();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_dir_is_fresh_and_removed_on_close() {
        let parent = tempfile::tempdir().expect("tempdir");
        let scratch = ScratchDir::create(Some(parent.path())).expect("create");
        let path = scratch.path().to_path_buf();
        assert!(path.is_dir());
        assert_eq!(fs::read_dir(&path).expect("read dir").count(), 0);

        let script = scratch.write_script("script.py", "print(1)").expect("write");
        assert_eq!(fs::read_to_string(script).expect("read"), "print(1)");

        scratch.close();
        assert!(!path.exists());
    }

    #[test]
    fn scratch_dir_is_removed_on_drop() {
        let parent = tempfile::tempdir().expect("tempdir");
        let path = {
            let scratch = ScratchDir::create(Some(parent.path())).expect("create");
            scratch.write_script("leftover.txt", "x").expect("write");
            scratch.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn every_scratch_dir_is_distinct() {
        let parent = tempfile::tempdir().expect("tempdir");
        let a = ScratchDir::create(Some(parent.path())).expect("a");
        let b = ScratchDir::create(Some(parent.path())).expect("b");
        assert_ne!(a.path(), b.path());
    }
}
