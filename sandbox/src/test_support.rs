//! Test-only fixtures: a throwaway sandbox root and a scripted process runner.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::engine::Engine;
use crate::io::config::{ExecConfig, SandboxConfig, write_config};
use crate::io::init::{InitOptions, SandboxPaths, init_sandbox};
use crate::io::interpreter::{ScriptRequest, ScriptRunner};
use crate::io::pending::PendingQueue;
use crate::io::process::CommandOutput;

/// Sandbox root in a temp dir, removed on drop.
pub struct TestSandbox {
    temp: TempDir,
    pub paths: SandboxPaths,
    pub config: SandboxConfig,
}

impl Default for TestSandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl TestSandbox {
    /// Default configuration, scratch dirs kept next to the sandbox root.
    pub fn new() -> Self {
        Self::from_config(SandboxConfig::default())
    }

    /// Configuration that runs scripts with `sh` instead of Python.
    pub fn with_sh() -> Self {
        let mut config = SandboxConfig::default();
        config.exec = sh_exec_config();
        config.autorun.task_templates = vec!["echo hello from idle task".to_string()];
        Self::from_config(config)
    }

    pub fn from_config(mut config: SandboxConfig) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("sandbox");
        let paths = init_sandbox(&root, &InitOptions::default()).expect("init sandbox");
        config.exec.scratch_dir = Some(temp.path().join("scratch"));
        write_config(&paths.config_path, &config).expect("write config");
        Self {
            temp,
            paths,
            config,
        }
    }

    pub fn root(&self) -> &Path {
        &self.paths.root
    }

    /// Parent of every scratch dir created by engines from this fixture.
    pub fn scratch_parent(&self) -> std::path::PathBuf {
        self.temp.path().join("scratch")
    }

    pub fn engine(&self) -> Engine {
        Engine::new(&self.paths, self.config.exec.clone())
    }

    pub fn engine_with<R: ScriptRunner>(&self, runner: R) -> Engine<R> {
        Engine::with_runner(&self.paths, self.config.exec.clone(), runner)
    }

    pub fn queue(&self) -> PendingQueue {
        PendingQueue::new(&self.paths.pending_dir, self.config.exec.script_suffix.clone())
    }

    /// Count of files currently in the logs directory.
    pub fn log_count(&self) -> usize {
        fs::read_dir(&self.paths.logs_dir)
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

/// Exec settings that launch scripts with `sh` and keep `PATH`.
pub fn sh_exec_config() -> ExecConfig {
    ExecConfig {
        interpreter: "sh".to_string(),
        interpreter_args: Vec::new(),
        script_suffix: ".sh".to_string(),
        extra_env: [("SANDBOXED".to_string(), "1".to_string())]
            .into_iter()
            .collect(),
        ..ExecConfig::default()
    }
}

enum Scripted {
    Output {
        output: String,
        exit_code: Option<i32>,
        elapsed: Duration,
    },
    Timeout {
        output: String,
    },
    Error(String),
    Panic(String),
}

/// Runner returning queued outcomes in order; an empty queue yields a clean,
/// silent exit. Records every request and the script text it pointed at.
#[derive(Default)]
pub struct ScriptedRunner {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<ScriptRequest>>,
    sources: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_output(&self, output: &str, exit_code: Option<i32>, elapsed: Duration) {
        self.push(Scripted::Output {
            output: output.to_string(),
            exit_code,
            elapsed,
        });
    }

    pub fn push_timeout(&self, output: &str) {
        self.push(Scripted::Timeout {
            output: output.to_string(),
        });
    }

    pub fn push_error(&self, message: &str) {
        self.push(Scripted::Error(message.to_string()));
    }

    pub fn push_panic(&self, message: &str) {
        self.push(Scripted::Panic(message.to_string()));
    }

    pub fn requests(&self) -> Vec<ScriptRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    /// Script text seen by each call, in call order.
    pub fn sources(&self) -> Vec<String> {
        self.sources.lock().expect("sources lock").clone()
    }

    fn push(&self, item: Scripted) {
        self.script.lock().expect("script lock").push_back(item);
    }
}

impl ScriptRunner for ScriptedRunner {
    fn run_script(&self, request: &ScriptRequest) -> Result<CommandOutput> {
        let source = fs::read_to_string(&request.script_path).unwrap_or_default();
        self.sources.lock().expect("sources lock").push(source);
        self.requests.lock().expect("requests lock").push(request.clone());
        let next = self.script.lock().expect("script lock").pop_front();
        match next {
            None => Ok(CommandOutput {
                exit_code: Some(0),
                output: Vec::new(),
                output_truncated: 0,
                timed_out: false,
                elapsed: Duration::ZERO,
            }),
            Some(Scripted::Output {
                output,
                exit_code,
                elapsed,
            }) => Ok(CommandOutput {
                exit_code,
                output: output.into_bytes(),
                output_truncated: 0,
                timed_out: false,
                elapsed,
            }),
            Some(Scripted::Timeout { output }) => Ok(CommandOutput {
                exit_code: None,
                output: output.into_bytes(),
                output_truncated: 0,
                timed_out: true,
                elapsed: request.timeout,
            }),
            Some(Scripted::Error(message)) => Err(anyhow!(message)),
            Some(Scripted::Panic(message)) => panic!("{message}"),
        }
    }
}
