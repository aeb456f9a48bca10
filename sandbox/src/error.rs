//! Typed errors surfaced to sandbox callers.
//!
//! Everything else travels as `anyhow::Error`. Callers discriminate with
//! `err.downcast_ref::<SandboxError>()`, which also sees through added context.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    /// A named project or record does not exist.
    #[error("not found: {name}")]
    NotFound { name: String },

    /// The request was rejected before anything was mutated.
    #[error("bad request: {reason}")]
    BadRequest { reason: String },
}

impl SandboxError {
    pub fn not_found(name: impl Into<String>) -> Self {
        SandboxError::NotFound { name: name.into() }
    }

    pub fn bad_request(reason: impl Into<String>) -> Self {
        SandboxError::BadRequest {
            reason: reason.into(),
        }
    }
}

/// The typed error inside `err`, if any.
pub fn classify(err: &anyhow::Error) -> Option<&SandboxError> {
    err.downcast_ref::<SandboxError>()
}
