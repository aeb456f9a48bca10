//! Approval workflow: promote a pending request into the project store.
//!
//! Every check runs before the first mutation, so a rejected approval leaves
//! both the descriptor and its code file where they were.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::artifact::{ArtifactEvent, ArtifactState, ListedRequest, PendingArtifact};
use crate::error::SandboxError;
use crate::io::pending::PendingQueue;
use crate::io::project_store::ProjectStore;

/// Approve the request referenced by `descriptor_ref` and return the new
/// project path.
///
/// The code file is moved (not copied) into the store under the request's
/// sanitized name; the descriptor is deleted afterwards. An existing project
/// with that name is never replaced.
#[instrument(skip_all, fields(descriptor = %descriptor_ref))]
pub fn approve(queue: &PendingQueue, store: &ProjectStore, descriptor_ref: &str) -> Result<PathBuf> {
    let descriptor_path = queue.resolve_descriptor(descriptor_ref)?;
    let request = queue
        .load_request(&descriptor_path)
        .map_err(|err| SandboxError::bad_request(format!("malformed descriptor: {err:#}")))?;
    let file_name = store.sanitize(&request.name)?;
    let artifact = PendingArtifact::Request(ListedRequest {
        descriptor_path,
        request,
    });

    let code_path = artifact.code_path().to_path_buf();
    if !code_path.is_file() {
        return Err(SandboxError::bad_request(format!(
            "code file missing: {}",
            code_path.display()
        ))
        .into());
    }
    ensure_inside(queue.dir(), &code_path)?;
    let target = store.dir().join(&file_name);
    if target.exists() {
        return Err(SandboxError::bad_request(format!(
            "project {file_name} already exists"
        ))
        .into());
    }

    match artifact.apply(ArtifactEvent::Approve) {
        Ok(ArtifactState::Approved) => {}
        Ok(state) => {
            return Err(SandboxError::bad_request(format!(
                "approval left request in state {state:?}"
            ))
            .into());
        }
        Err(err) => return Err(SandboxError::bad_request(err.to_string()).into()),
    }

    fs::create_dir_all(store.dir())
        .with_context(|| format!("create {}", store.dir().display()))?;
    fs::rename(&code_path, &target).with_context(|| {
        format!("move {} to {}", code_path.display(), target.display())
    })?;

    if let Err(err) = queue.retire(&artifact) {
        warn!(err = %format!("{err:#}"), "approved request left its descriptor behind");
    }
    info!(project = %file_name, "request approved");
    Ok(target)
}

fn ensure_inside(pending_dir: &Path, code_path: &Path) -> Result<()> {
    let pending = fs::canonicalize(pending_dir)
        .with_context(|| format!("resolve {}", pending_dir.display()))?;
    let code = fs::canonicalize(code_path)
        .with_context(|| format!("resolve {}", code_path.display()))?;
    if code.parent() != Some(pending.as_path()) {
        return Err(SandboxError::bad_request(format!(
            "code file outside pending directory: {}",
            code_path.display()
        ))
        .into());
    }
    Ok(())
}
