//! Script runner abstraction.
//!
//! The [`ScriptRunner`] trait decouples the execution engine from process
//! spawning. Tests use scripted runners that return predetermined outputs
//! without launching an interpreter.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, instrument};

use crate::io::process::{CommandOutput, run_merged_with_timeout};

/// Parameters for one interpreter invocation.
#[derive(Debug, Clone)]
pub struct ScriptRequest {
    /// Interpreter program.
    pub program: String,
    /// Arguments placed before the script path.
    pub args: Vec<String>,
    pub script_path: PathBuf,
    /// Scratch directory used as the child's working directory.
    pub workdir: PathBuf,
    /// Complete child environment. Nothing else is inherited.
    pub env: BTreeMap<OsString, OsString>,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

/// Abstraction over script execution backends.
pub trait ScriptRunner {
    /// Run the script to completion or until the timeout elapses.
    ///
    /// `Err` means the child could not be launched or supervised.
    fn run_script(&self, request: &ScriptRequest) -> Result<CommandOutput>;
}

/// Runner that spawns the configured interpreter as a child process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ScriptRunner for ProcessRunner {
    #[instrument(skip_all, fields(program = %request.program, timeout_secs = request.timeout.as_secs_f64()))]
    fn run_script(&self, request: &ScriptRequest) -> Result<CommandOutput> {
        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args)
            .arg(&request.script_path)
            .current_dir(&request.workdir)
            .env_clear()
            .envs(&request.env);
        debug!(script = %request.script_path.display(), "launching interpreter");
        run_merged_with_timeout(cmd, request.timeout, request.output_limit_bytes)
    }
}
