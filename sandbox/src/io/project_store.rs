//! Approved project store (`<root>/files/`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use crate::core::names::sanitize_script_name;
use crate::error::SandboxError;
use crate::io::atomic::write_replace;
use crate::io::ids::iso_timestamp;

/// Listing entry for one stored project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectInfo {
    pub name: String,
    pub size: u64,
    pub created: String,
}

/// Flat directory of approved scripts sharing one suffix.
#[derive(Debug, Clone)]
pub struct ProjectStore {
    dir: PathBuf,
    suffix: String,
}

impl ProjectStore {
    pub fn new(dir: impl Into<PathBuf>, suffix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            suffix: suffix.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Store name for a user-supplied project name.
    pub fn sanitize(&self, name: &str) -> Result<String> {
        sanitize_script_name(name, &self.suffix)
            .ok_or_else(|| SandboxError::bad_request(format!("unusable project name {name:?}")).into())
    }

    /// Save (or replace) a project and return its path.
    pub fn save(&self, name: &str, code: &str) -> Result<PathBuf> {
        let file_name = self.sanitize(name)?;
        let path = self.dir.join(&file_name);
        write_replace(&path, code.as_bytes())?;
        info!(project = %file_name, "project saved");
        Ok(path)
    }

    /// Projects carrying the store suffix, most recently modified first.
    pub fn list(&self) -> Result<Vec<ProjectInfo>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut found: Vec<(SystemTime, ProjectInfo)> = Vec::new();
        for entry in fs::read_dir(&self.dir).with_context(|| format!("read {}", self.dir.display()))? {
            let entry = entry.with_context(|| format!("read entry in {}", self.dir.display()))?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !name.ends_with(&self.suffix) || name.starts_with('.') {
                continue;
            }
            let meta = match entry.metadata() {
                Ok(meta) if meta.is_file() => meta,
                _ => continue,
            };
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            let created = meta.created().unwrap_or(modified);
            found.push((
                modified,
                ProjectInfo {
                    name,
                    size: meta.len(),
                    created: iso_timestamp(created),
                },
            ));
        }
        found.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.name.cmp(&b.1.name)));
        debug!(count = found.len(), "listed projects");
        Ok(found.into_iter().map(|(_, info)| info).collect())
    }

    /// Path of an existing project. `NotFound` when absent.
    pub fn path_for(&self, name: &str) -> Result<PathBuf> {
        let file_name = self.sanitize(name)?;
        let path = self.dir.join(&file_name);
        if !path.is_file() {
            return Err(SandboxError::not_found(file_name).into());
        }
        Ok(path)
    }

    pub fn read(&self, name: &str) -> Result<(String, String)> {
        let path = self.path_for(name)?;
        let file_name = self.sanitize(name)?;
        let code = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        Ok((file_name, code))
    }
}
