//! Sandbox configuration stored under `<root>/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use minijinja::Environment;
use serde::{Deserialize, Serialize};

use crate::core::types::AutorunMode;

/// Sandbox configuration (TOML).
///
/// Edited by humans; missing fields default to the values below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct SandboxConfig {
    pub exec: ExecConfig,
    pub autorun: AutorunConfig,
}

/// How sandboxed code is launched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecConfig {
    /// Interpreter program, resolved through the scrubbed `PATH`.
    pub interpreter: String,

    /// Arguments placed before the script path (`-I` = isolated mode).
    pub interpreter_args: Vec<String>,

    /// Canonical script suffix for stored and generated code.
    pub script_suffix: String,

    /// Default wall-clock budget for ad hoc snippets.
    pub snippet_timeout_secs: u64,

    /// Default wall-clock budget for named projects.
    pub project_timeout_secs: u64,

    /// Merged stdout/stderr kept in memory beyond this many bytes is dropped.
    pub capture_limit_bytes: usize,

    /// Inherited variables passed through to the child. Everything else is removed.
    pub env_allowlist: Vec<String>,

    /// Parent directory for per-run scratch dirs. System temp dir when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<PathBuf>,

    /// Variables always set in the child environment.
    pub extra_env: BTreeMap<String, String>,
}

impl Default for ExecConfig {
    fn default() -> Self {
        let mut extra_env = BTreeMap::new();
        extra_env.insert("PYTHONUNBUFFERED".to_string(), "1".to_string());
        Self {
            interpreter: "python3".to_string(),
            interpreter_args: vec!["-I".to_string()],
            script_suffix: ".py".to_string(),
            snippet_timeout_secs: 7,
            project_timeout_secs: 10,
            capture_limit_bytes: 1_000_000,
            env_allowlist: ["PATH", "SYSTEMROOT", "TMP", "TEMP", "TMPDIR"]
                .iter()
                .map(|name| name.to_string())
                .collect(),
            scratch_dir: None,
            extra_env,
        }
    }
}

impl ExecConfig {
    pub fn snippet_timeout(&self) -> Duration {
        Duration::from_secs(self.snippet_timeout_secs)
    }

    pub fn project_timeout(&self) -> Duration {
        Duration::from_secs(self.project_timeout_secs)
    }
}

/// Idle scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AutorunConfig {
    pub enabled: bool,

    /// Seconds of inactivity before cycles start firing.
    pub idle_secs: u64,

    /// Seconds slept between idle checks.
    pub poll_interval_secs: u64,

    pub mode: AutorunMode,

    /// Upper bound on executions per firing cycle.
    pub max_runs_per_cycle: usize,

    /// Synthesize tasks when the pending queue holds none (autotasks mode).
    pub generate_tasks: bool,

    /// Task bodies (minijinja templates, `now` in scope).
    pub task_templates: Vec<String>,
}

impl Default for AutorunConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            idle_secs: 200,
            poll_interval_secs: 20,
            mode: AutorunMode::Autotasks,
            max_runs_per_cycle: 2,
            generate_tasks: true,
            task_templates: vec![
                "print('Hello from the sandbox!')".to_string(),
                "x = sum(range(10)); print('Sum 0-9 =', x)".to_string(),
                "for i in range(3): print('Task iteration', i)".to_string(),
                "print('Idle task executed at {{ now }}')".to_string(),
            ],
        }
    }
}

impl AutorunConfig {
    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(anyhow!("autorun.poll_interval_secs must be > 0"));
        }
        if self.max_runs_per_cycle == 0 {
            return Err(anyhow!("autorun.max_runs_per_cycle must be > 0"));
        }
        if self.generate_tasks && self.task_templates.is_empty() {
            return Err(anyhow!(
                "autorun.task_templates must be non-empty when generate_tasks is set"
            ));
        }
        let env = Environment::new();
        for (idx, template) in self.task_templates.iter().enumerate() {
            env.template_from_str(template)
                .map_err(|err| anyhow!("autorun.task_templates[{idx}] is invalid: {err}"))?;
        }
        Ok(())
    }
}

impl SandboxConfig {
    pub fn validate(&self) -> Result<()> {
        let exec = &self.exec;
        if exec.interpreter.trim().is_empty() {
            return Err(anyhow!("exec.interpreter must be non-empty"));
        }
        if !exec.script_suffix.starts_with('.') || exec.script_suffix.len() < 2 {
            return Err(anyhow!("exec.script_suffix must look like \".py\""));
        }
        if exec.snippet_timeout_secs == 0 || exec.project_timeout_secs == 0 {
            return Err(anyhow!("exec timeouts must be > 0"));
        }
        if exec.capture_limit_bytes == 0 {
            return Err(anyhow!("exec.capture_limit_bytes must be > 0"));
        }
        self.autorun.validate()
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `SandboxConfig::default()`.
pub fn load_config(path: &Path) -> Result<SandboxConfig> {
    if !path.exists() {
        let cfg = SandboxConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: SandboxConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &SandboxConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    crate::io::atomic::write_replace(path, buf.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, SandboxConfig::default());
        assert_eq!(cfg.exec.snippet_timeout_secs, 7);
        assert_eq!(cfg.exec.project_timeout_secs, 10);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let mut cfg = SandboxConfig::default();
        cfg.autorun.mode = AutorunMode::Projects;
        cfg.exec.scratch_dir = Some(temp.path().join("scratch"));
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[autorun]\nidle_secs = 5\nmode = \"projects\"\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.autorun.idle_secs, 5);
        assert_eq!(cfg.autorun.mode, AutorunMode::Projects);
        assert_eq!(cfg.autorun.poll_interval_secs, 20);
        assert_eq!(cfg.exec.interpreter, "python3");
    }

    #[test]
    fn rejects_zero_run_limit_and_bad_templates() {
        let mut cfg = SandboxConfig::default();
        cfg.autorun.max_runs_per_cycle = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = SandboxConfig::default();
        cfg.autorun.task_templates = vec!["print('{{ unclosed')".to_string()];
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("task_templates[0]"));
    }

    #[test]
    fn rejects_bad_suffix() {
        let mut cfg = SandboxConfig::default();
        cfg.exec.script_suffix = "py".to_string();
        assert!(cfg.validate().is_err());
    }
}
