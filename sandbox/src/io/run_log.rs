//! Execution log records under `<root>/logs/`.
//!
//! One immutable JSON file per invocation. Records are only ever created,
//! never rewritten; listing tolerates foreign or damaged files.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::core::names::{is_log_file, log_file_name};
use crate::core::text::truncate_chars;
use crate::core::types::{ExecutionResult, LOG_OUTPUT_CHARS, LOG_PREVIEW_CHARS, LogRecord, RunKind};
use crate::error::SandboxError;
use crate::io::atomic::create_new;
use crate::io::ids::short_id;
use crate::io::schema::SchemaCheck;

const NAME_ATTEMPTS: usize = 8;

/// Build the persisted record for one invocation, applying the log caps.
pub fn record_for(
    timestamp: String,
    kind: RunKind,
    project: Option<&str>,
    code: &str,
    result: &ExecutionResult,
) -> LogRecord {
    LogRecord {
        timestamp,
        kind,
        project: project.map(str::to_string),
        ok: result.ok,
        error: result.error.clone(),
        elapsed: result.elapsed,
        exit_code: result.exit_code,
        output: truncate_chars(&result.output, LOG_OUTPUT_CHARS).to_string(),
        code_preview: truncate_chars(code, LOG_PREVIEW_CHARS).to_string(),
    }
}

/// Persist `record` as a new file and return its path.
pub fn write_record(logs_dir: &Path, record: &LogRecord) -> Result<PathBuf> {
    let mut buf = serde_json::to_string_pretty(record).context("serialize log record")?;
    buf.push('\n');
    for _ in 0..NAME_ATTEMPTS {
        let path = logs_dir.join(log_file_name(&record.timestamp, &short_id()));
        if create_new(&path, buf.as_bytes())? {
            debug!(path = %path.display(), "log record written");
            return Ok(path);
        }
    }
    Err(anyhow!(
        "no free log name in {} after {NAME_ATTEMPTS} attempts",
        logs_dir.display()
    ))
}

/// A log record together with its file name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub file_name: String,
    #[serde(flatten)]
    pub record: LogRecord,
}

/// Up to `limit` records, newest first. Unparsable files are skipped.
pub fn list_logs(logs_dir: &Path, limit: usize) -> Result<Vec<LogEntry>> {
    if !logs_dir.exists() {
        return Ok(Vec::new());
    }
    let mut names: Vec<String> = fs::read_dir(logs_dir)
        .with_context(|| format!("read {}", logs_dir.display()))?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| is_log_file(name))
        .collect();
    names.sort_unstable_by(|a, b| b.cmp(a));

    let check = SchemaCheck::log_record()?;
    let mut entries = Vec::new();
    for file_name in names {
        if entries.len() >= limit {
            break;
        }
        match load_record(&logs_dir.join(&file_name), &check) {
            Ok(record) => entries.push(LogEntry { file_name, record }),
            Err(err) => debug!(file = %file_name, err = %err, "skipping log record"),
        }
    }
    Ok(entries)
}

/// Read one record by file name.
pub fn read_log(logs_dir: &Path, file_name: &str) -> Result<LogRecord> {
    if !is_log_file(file_name) {
        return Err(SandboxError::bad_request(format!("not a log record name: {file_name}")).into());
    }
    let path = logs_dir.join(file_name);
    if !path.is_file() {
        return Err(SandboxError::not_found(file_name).into());
    }
    load_record(&path, &SchemaCheck::log_record()?)
}

fn load_record(path: &Path, check: &SchemaCheck) -> Result<LogRecord> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let value: Value =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    check
        .check(&value)
        .with_context(|| format!("validate {}", path.display()))?;
    serde_json::from_value(value).with_context(|| format!("deserialize {}", path.display()))
}
