//! Shared record types for executions, logs and pending requests.
//!
//! Field names of the persisted records are part of the on-disk layout read by
//! viewers; renames here are breaking changes.

use serde::{Deserialize, Serialize};

/// Cap applied to `output` when a run is persisted to the log directory.
pub const LOG_OUTPUT_CHARS: usize = 10_000;
/// Cap applied to `code_preview` in execution log records.
pub const LOG_PREVIEW_CHARS: usize = 2_000;
/// Cap applied to `code_preview` in pending request descriptors.
pub const REQUEST_PREVIEW_CHARS: usize = 4_000;

/// Error text reported when a run exceeds its wall-clock budget.
pub const TIMEOUT_ERROR: &str = "timeout";

/// Outcome of one sandboxed invocation, as returned to the caller.
///
/// `ok` means the child ran to completion within its budget. A non-zero exit
/// status is still `ok`; the fault text is part of `output` and the status is
/// kept in `exit_code`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub ok: bool,
    pub output: String,
    pub error: Option<String>,
    /// Wall-clock seconds of the child call. `None` on timeout or when the
    /// child never started.
    pub elapsed: Option<f64>,
    pub exit_code: Option<i32>,
    /// Bytes of merged output dropped beyond the capture limit.
    #[serde(default)]
    pub output_truncated_bytes: usize,
}

impl ExecutionResult {
    pub fn timed_out(output: String, output_truncated_bytes: usize) -> Self {
        Self {
            ok: false,
            output,
            error: Some(TIMEOUT_ERROR.to_string()),
            elapsed: None,
            exit_code: None,
            output_truncated_bytes,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            output: String::new(),
            error: Some(error.into()),
            elapsed: None,
            exit_code: None,
            output_truncated_bytes: 0,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.error.as_deref() == Some(TIMEOUT_ERROR)
    }
}

/// What kind of code an invocation ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    Snippet,
    Project,
}

/// One persisted execution record (`logs/<ts>_<id>.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(rename = "ts")]
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: RunKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    pub ok: bool,
    pub error: Option<String>,
    pub elapsed: Option<f64>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    pub output: String,
    pub code_preview: String,
}

/// Audit descriptor for a pending request (`pending/<code>.request.json`).
///
/// Only a bounded preview of the code is kept here; the full source lives in
/// the sibling file referenced by `code_full_path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequest {
    #[serde(rename = "ts")]
    pub timestamp: String,
    pub name: String,
    pub reason: String,
    pub code_preview: String,
    pub code_full_path: String,
}

/// Scheduler firing mode, selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutorunMode {
    /// Re-run approved projects from the store.
    Projects,
    /// Run (and consume) disposable tasks from the pending directory.
    Autotasks,
}

impl AutorunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AutorunMode::Projects => "projects",
            AutorunMode::Autotasks => "autotasks",
        }
    }
}
