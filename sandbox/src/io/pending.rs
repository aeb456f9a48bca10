//! Pending queue (`<root>/pending/`).
//!
//! Holds two artifact kinds side by side: reviewed requests (code file plus a
//! `.request.json` descriptor) and disposable `autotask_*` files consumed by
//! the scheduler. Scans classify every entry into a [`PendingArtifact`].

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::core::artifact::{DisposableTask, ListedRequest, PendingArtifact};
use crate::core::names::{
    descriptor_file_name, is_descriptor_file, parse_task_file_name, request_code_file_name,
    sanitize_script_name, task_file_name,
};
use crate::core::text::truncate_chars;
use crate::core::types::{PendingRequest, REQUEST_PREVIEW_CHARS};
use crate::error::SandboxError;
use crate::io::atomic::{create_new, write_replace};
use crate::io::ids::{compact_timestamp, epoch_millis, short_id};
use crate::io::schema::SchemaCheck;

const NAME_ATTEMPTS: usize = 64;

#[derive(Debug, Clone)]
pub struct PendingQueue {
    dir: PathBuf,
    suffix: String,
}

impl PendingQueue {
    pub fn new(dir: impl Into<PathBuf>, suffix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            suffix: suffix.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File a request for review. Only a bounded preview goes into the descriptor.
    pub fn submit(&self, name: &str, code: &str, reason: &str) -> Result<ListedRequest> {
        let sanitized = sanitize_script_name(name, &self.suffix)
            .ok_or_else(|| SandboxError::bad_request(format!("unusable request name {name:?}")))?;
        fs::create_dir_all(&self.dir).with_context(|| format!("create {}", self.dir.display()))?;
        let dir = fs::canonicalize(&self.dir)
            .with_context(|| format!("resolve {}", self.dir.display()))?;

        let timestamp = compact_timestamp();
        let mut code_path = None;
        for _ in 0..NAME_ATTEMPTS {
            let candidate = dir.join(request_code_file_name(&timestamp, &short_id(), &sanitized));
            if create_new(&candidate, code.as_bytes())? {
                code_path = Some(candidate);
                break;
            }
        }
        let code_path =
            code_path.ok_or_else(|| anyhow!("no free request name in {}", dir.display()))?;
        let code_file = code_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("request path has no file name"))?;

        let request = PendingRequest {
            timestamp,
            name: sanitized,
            reason: reason.to_string(),
            code_preview: truncate_chars(code, REQUEST_PREVIEW_CHARS).to_string(),
            code_full_path: code_path.to_string_lossy().into_owned(),
        };
        let descriptor_path = dir.join(descriptor_file_name(code_file));
        let mut buf = serde_json::to_string_pretty(&request).context("serialize request")?;
        buf.push('\n');
        write_replace(&descriptor_path, buf.as_bytes())?;
        info!(name = %request.name, descriptor = %descriptor_path.display(), "request submitted");
        Ok(ListedRequest {
            descriptor_path,
            request,
        })
    }

    /// Every classifiable artifact in the queue. Unreadable descriptors are skipped.
    pub fn scan(&self) -> Result<Vec<PendingArtifact>> {
        let mut artifacts: Vec<PendingArtifact> = self
            .list_requests()?
            .into_iter()
            .map(PendingArtifact::Request)
            .collect();
        artifacts.extend(self.list_tasks()?.into_iter().map(PendingArtifact::Task));
        Ok(artifacts)
    }

    /// Pending requests, newest first.
    pub fn list_requests(&self) -> Result<Vec<ListedRequest>> {
        let mut names: Vec<String> = self
            .file_names()?
            .into_iter()
            .filter(|name| is_descriptor_file(name))
            .collect();
        names.sort_unstable_by(|a, b| b.cmp(a));

        let check = SchemaCheck::pending_request()?;
        let mut requests = Vec::new();
        for name in names {
            let descriptor_path = self.dir.join(&name);
            match load_descriptor(&descriptor_path, &check) {
                Ok(request) => requests.push(ListedRequest {
                    descriptor_path,
                    request,
                }),
                Err(err) => debug!(file = %name, err = %format!("{err:#}"), "skipping descriptor"),
            }
        }
        Ok(requests)
    }

    /// Disposable tasks, oldest first.
    pub fn list_tasks(&self) -> Result<Vec<DisposableTask>> {
        let mut tasks: Vec<DisposableTask> = self
            .file_names()?
            .into_iter()
            .filter_map(|file_name| {
                let id = parse_task_file_name(&file_name, &self.suffix)?;
                Some(DisposableTask {
                    path: self.dir.join(&file_name),
                    file_name,
                    id,
                })
            })
            .collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.file_name.cmp(&b.file_name)));
        Ok(tasks)
    }

    /// Resolve a descriptor reference (file name or path) inside this queue.
    ///
    /// Only the final component is used, so references can never point outside
    /// the pending directory.
    pub fn resolve_descriptor(&self, reference: &str) -> Result<PathBuf> {
        let file_name = reference
            .rsplit(|ch| ch == '/' || ch == '\\')
            .next()
            .unwrap_or_default();
        if !is_descriptor_file(file_name) {
            return Err(
                SandboxError::bad_request(format!("not a request descriptor: {reference}")).into(),
            );
        }
        let path = self.dir.join(file_name);
        if !path.is_file() {
            return Err(
                SandboxError::bad_request(format!("no pending request {file_name}")).into(),
            );
        }
        Ok(path)
    }

    /// Parse and schema-check one descriptor.
    pub fn load_request(&self, descriptor_path: &Path) -> Result<PendingRequest> {
        load_descriptor(descriptor_path, &SchemaCheck::pending_request()?)
    }

    /// Write a new disposable task. The id starts at `epoch_ms` and moves
    /// forward until a free name is found.
    pub fn create_task(&self, code: &str, epoch_ms: u128) -> Result<DisposableTask> {
        for offset in 0..NAME_ATTEMPTS as u128 {
            let id = epoch_ms + offset;
            let file_name = task_file_name(id, &self.suffix);
            let path = self.dir.join(&file_name);
            if create_new(&path, code.as_bytes())? {
                debug!(task = %file_name, "task created");
                return Ok(DisposableTask {
                    path,
                    file_name,
                    id,
                });
            }
        }
        Err(anyhow!("no free task name in {}", self.dir.display()))
    }

    pub fn create_task_now(&self, code: &str) -> Result<DisposableTask> {
        self.create_task(code, epoch_millis())
    }

    /// Full source code of an artifact.
    pub fn read_code(&self, artifact: &PendingArtifact) -> Result<String> {
        let path = artifact.code_path();
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
    }

    /// Remove an artifact that reached a terminal state.
    ///
    /// A consumed task loses its code file. An approved request loses its
    /// descriptor; its code has already moved into the store.
    pub fn retire(&self, artifact: &PendingArtifact) -> Result<()> {
        let path = match artifact {
            PendingArtifact::Task(task) => task.path.as_path(),
            PendingArtifact::Request(listed) => listed.descriptor_path.as_path(),
        };
        fs::remove_file(path).with_context(|| format!("remove {}", path.display()))
    }

    fn file_names(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir).with_context(|| format!("read {}", self.dir.display()))? {
            match entry {
                Ok(entry) => {
                    if let Ok(name) = entry.file_name().into_string() {
                        names.push(name);
                    }
                }
                Err(err) => warn!(err = %err, "unreadable pending entry"),
            }
        }
        Ok(names)
    }
}

fn load_descriptor(path: &Path, check: &SchemaCheck) -> Result<PendingRequest> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let value: Value =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    check
        .check(&value)
        .with_context(|| format!("validate {}", path.display()))?;
    serde_json::from_value(value).with_context(|| format!("deserialize {}", path.display()))
}
