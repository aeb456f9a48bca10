//! Execution engine: runs snippets and stored projects as isolated children.
//!
//! Each invocation gets a fresh scratch directory holding only the script,
//! a scrubbed environment and a hard timeout. Exactly one log record is
//! written per invocation; failing to write it never changes the result.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::env::scrubbed_env;
use crate::core::types::{ExecutionResult, RunKind};
use crate::io::config::ExecConfig;
use crate::io::ids::compact_timestamp;
use crate::io::init::SandboxPaths;
use crate::io::interpreter::{ProcessRunner, ScriptRequest, ScriptRunner};
use crate::io::process::CommandOutput;
use crate::io::project_store::ProjectStore;
use crate::io::run_log::{record_for, write_record};
use crate::io::scratch::ScratchDir;

pub struct Engine<R: ScriptRunner = ProcessRunner> {
    exec: ExecConfig,
    store: ProjectStore,
    logs_dir: PathBuf,
    runner: R,
}

impl Engine<ProcessRunner> {
    pub fn new(paths: &SandboxPaths, exec: ExecConfig) -> Self {
        Self::with_runner(paths, exec, ProcessRunner)
    }
}

impl<R: ScriptRunner> Engine<R> {
    pub fn with_runner(paths: &SandboxPaths, exec: ExecConfig, runner: R) -> Self {
        let store = ProjectStore::new(&paths.files_dir, exec.script_suffix.clone());
        Self {
            exec,
            store,
            logs_dir: paths.logs_dir.clone(),
            runner,
        }
    }

    pub fn exec_config(&self) -> &ExecConfig {
        &self.exec
    }

    pub fn store(&self) -> &ProjectStore {
        &self.store
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Run an ad hoc snippet.
    #[instrument(skip_all, fields(timeout_secs = timeout.as_secs_f64()))]
    pub fn run(&self, code: &str, timeout: Duration) -> ExecutionResult {
        let script_name = format!("script{}", self.exec.script_suffix);
        self.invoke(RunKind::Snippet, None, &script_name, code, timeout)
    }

    /// Run a stored project. `NotFound` when the project is absent.
    #[instrument(skip_all, fields(project = %name, timeout_secs = timeout.as_secs_f64()))]
    pub fn run_named(&self, name: &str, timeout: Duration) -> Result<ExecutionResult> {
        let (file_name, code) = self.store.read(name)?;
        Ok(self.invoke(RunKind::Project, Some(&file_name), &file_name, &code, timeout))
    }

    fn invoke(
        &self,
        kind: RunKind,
        project: Option<&str>,
        script_name: &str,
        code: &str,
        timeout: Duration,
    ) -> ExecutionResult {
        let result = self.execute(script_name, code, timeout);
        info!(
            kind = ?kind,
            ok = result.ok,
            error = result.error.as_deref().unwrap_or(""),
            "invocation finished"
        );
        let record = record_for(compact_timestamp(), kind, project, code, &result);
        match write_record(&self.logs_dir, &record) {
            Ok(path) => debug!(log = %path.display(), "run logged"),
            Err(err) => warn!(err = %format!("{err:#}"), "failed to write run log"),
        }
        result
    }

    fn execute(&self, script_name: &str, code: &str, timeout: Duration) -> ExecutionResult {
        let scratch = match ScratchDir::create(self.exec.scratch_dir.as_deref()) {
            Ok(scratch) => scratch,
            Err(err) => return ExecutionResult::failed(format!("{err:#}")),
        };
        let result = match self.launch(&scratch, script_name, code, timeout) {
            Ok(out) => result_from_output(&out),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "script could not be run");
                ExecutionResult::failed(format!("{err:#}"))
            }
        };
        scratch.close();
        result
    }

    fn launch(
        &self,
        scratch: &ScratchDir,
        script_name: &str,
        code: &str,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let script_path = scratch.write_script(script_name, code)?;
        let request = ScriptRequest {
            program: self.exec.interpreter.clone(),
            args: self.exec.interpreter_args.clone(),
            script_path,
            workdir: scratch.path().to_path_buf(),
            env: scrubbed_env(std::env::vars_os(), &self.exec.env_allowlist, &self.exec.extra_env),
            timeout,
            output_limit_bytes: self.exec.capture_limit_bytes,
        };
        self.runner
            .run_script(&request)
            .with_context(|| format!("run {}", self.exec.interpreter))
    }
}

fn result_from_output(out: &CommandOutput) -> ExecutionResult {
    let mut output = out.output_lossy();
    output.push_str(&out.truncated_notice());
    if out.timed_out {
        return ExecutionResult::timed_out(output, out.output_truncated);
    }
    ExecutionResult {
        ok: true,
        output,
        error: None,
        elapsed: Some(out.elapsed.as_secs_f64()),
        exit_code: out.exit_code,
        output_truncated_bytes: out.output_truncated,
    }
}
