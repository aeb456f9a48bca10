//! Sandbox directory layout and scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::io::config::{SandboxConfig, write_config};

/// All canonical paths below a sandbox root.
#[derive(Debug, Clone)]
pub struct SandboxPaths {
    pub root: PathBuf,
    /// Approved project store.
    pub files_dir: PathBuf,
    /// One JSON record per execution.
    pub logs_dir: PathBuf,
    /// Pending requests and disposable tasks.
    pub pending_dir: PathBuf,
    pub config_path: PathBuf,
    /// Plain-text scheduler diagnostics.
    pub autorun_log_path: PathBuf,
}

impl SandboxPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            files_dir: root.join("files"),
            logs_dir: root.join("logs"),
            pending_dir: root.join("pending"),
            config_path: root.join("config.toml"),
            autorun_log_path: root.join("autorun.log"),
            root,
        }
    }

    /// Create the store, log and pending directories if missing.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.files_dir, &self.logs_dir, &self.pending_dir] {
            fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        }
        Ok(())
    }
}

/// Options for `init_sandbox`.
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Overwrite an existing `config.toml` with defaults.
    pub force: bool,
}

/// Create the sandbox layout under `root` and a default config when absent.
pub fn init_sandbox(root: &Path, options: &InitOptions) -> Result<SandboxPaths> {
    let paths = SandboxPaths::new(root);
    paths.ensure_dirs()?;
    if options.force || !paths.config_path.exists() {
        debug!(path = %paths.config_path.display(), "writing default config");
        write_config(&paths.config_path, &SandboxConfig::default())?;
    }
    Ok(paths)
}
