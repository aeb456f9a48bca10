//! Pending artifact state machine.
//!
//! The pending directory holds two kinds of artifacts with different
//! lifecycles:
//!
//! ```text
//! Request: Pending --approve--> Approved   (code promoted, descriptor deleted)
//! Task:    Pending --attempt--> Consumed   (file deleted after one run attempt)
//! ```
//!
//! Requests are never consumed by the scheduler and tasks never go through
//! approval. Both terminal states are reached exactly once.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::core::types::PendingRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Descriptor-backed submission awaiting review.
    Request,
    /// Bare, autogenerated code file with no review value.
    Task,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactState {
    Pending,
    Approved,
    Consumed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactEvent {
    /// A reviewer approved the artifact.
    Approve,
    /// The scheduler made one execution attempt (successful or not).
    ExecutionAttempted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid transition for {kind:?} in state {state:?} on {event:?}")]
pub struct InvalidTransition {
    pub kind: ArtifactKind,
    pub state: ArtifactState,
    pub event: ArtifactEvent,
}

/// Apply `event` to an artifact of `kind` currently in `state`.
pub fn transition(
    kind: ArtifactKind,
    state: ArtifactState,
    event: ArtifactEvent,
) -> Result<ArtifactState, InvalidTransition> {
    match (kind, state, event) {
        (ArtifactKind::Request, ArtifactState::Pending, ArtifactEvent::Approve) => {
            Ok(ArtifactState::Approved)
        }
        (ArtifactKind::Task, ArtifactState::Pending, ArtifactEvent::ExecutionAttempted) => {
            Ok(ArtifactState::Consumed)
        }
        _ => Err(InvalidTransition { kind, state, event }),
    }
}

/// A disposable task file in the pending directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisposableTask {
    pub path: PathBuf,
    pub file_name: String,
    /// Epoch-millisecond identifier encoded in the file name.
    pub id: u128,
}

/// A pending request together with the location of its descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedRequest {
    pub descriptor_path: PathBuf,
    pub request: PendingRequest,
}

/// One artifact found in the pending directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingArtifact {
    Request(ListedRequest),
    Task(DisposableTask),
}

impl PendingArtifact {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            PendingArtifact::Request(_) => ArtifactKind::Request,
            PendingArtifact::Task(_) => ArtifactKind::Task,
        }
    }

    /// Apply `event` to this artifact while it sits in the pending directory.
    ///
    /// `Ok(Approved)` means promote the code, `Ok(Consumed)` means delete it.
    /// An error means the event does not apply to this kind of artifact.
    pub fn apply(&self, event: ArtifactEvent) -> Result<ArtifactState, InvalidTransition> {
        transition(self.kind(), ArtifactState::Pending, event)
    }

    /// Path of the file holding the full source code.
    pub fn code_path(&self) -> &Path {
        match self {
            PendingArtifact::Request(listed) => Path::new(&listed.request.code_full_path),
            PendingArtifact::Task(task) => &task.path,
        }
    }
}
