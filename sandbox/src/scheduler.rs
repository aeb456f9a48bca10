//! Idle scheduler: fires execution cycles once the host has been idle long enough.
//!
//! One background thread polls at a fixed interval. Each poll re-reads the
//! autorun configuration (when file-backed), derives a [`SchedulerPhase`] from
//! the idle time and, when firing, runs one bounded cycle through the engine.
//! All state shared with other threads lives in [`SchedulerContext`].
//!
//! # Stop semantics
//!
//! `request_stop` clears the running flag and wakes a sleeping loop. The flag
//! is checked at poll boundaries and between runs of a cycle; an invocation
//! already in flight is never preempted.

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, Thread};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::core::artifact::{ArtifactEvent, ArtifactState, PendingArtifact};
use crate::core::idle::{SchedulerPhase, phase_for};
use crate::core::types::AutorunMode;
use crate::engine::Engine;
use crate::generator::generate_tasks;
use crate::io::config::{AutorunConfig, load_config};
use crate::io::interpreter::{ProcessRunner, ScriptRunner};
use crate::io::pending::PendingQueue;

/// Process-wide scheduler state shared between the loop and its observers.
#[derive(Debug)]
pub struct SchedulerContext {
    epoch: Instant,
    /// Milliseconds after `epoch` of the last activity signal.
    last_activity_ms: AtomicU64,
    running: AtomicBool,
    phase: AtomicU8,
    waker: OnceLock<Thread>,
}

impl Default for SchedulerContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerContext {
    /// A running context whose idle clock starts now.
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            running: AtomicBool::new(true),
            phase: AtomicU8::new(SchedulerPhase::Waiting.as_u8()),
            waker: OnceLock::new(),
        }
    }

    /// Reset the idle clock. Accepted in every phase, including after stop.
    pub fn signal_activity(&self) {
        self.last_activity_ms.store(self.now_ms(), Ordering::SeqCst);
    }

    pub fn idle_for(&self) -> Duration {
        let last = self.last_activity_ms.load(Ordering::SeqCst);
        Duration::from_millis(self.now_ms().saturating_sub(last))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> SchedulerPhase {
        SchedulerPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    /// Ask the loop to stop at its next boundary and wake it if sleeping.
    pub fn request_stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.waker.get() {
            thread.unpark();
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            phase: self.phase(),
            running: self.is_running(),
            idle_secs: self.idle_for().as_secs_f64(),
        }
    }

    fn set_phase(&self, phase: SchedulerPhase) {
        self.phase.store(phase.as_u8(), Ordering::SeqCst);
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Sleep for `interval`, returning early once a stop is requested.
    fn sleep(&self, interval: Duration) {
        let deadline = Instant::now() + interval;
        while self.is_running() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::park_timeout(deadline - now);
        }
    }
}

/// Snapshot for observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerStatus {
    pub phase: SchedulerPhase,
    pub running: bool,
    pub idle_secs: f64,
}

/// Where the loop gets its autorun settings from.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    Fixed(AutorunConfig),
    /// Re-read every poll; the last good configuration is kept on failure.
    File(PathBuf),
}

/// What one firing cycle did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub mode: AutorunMode,
    /// Execution attempts made (successful or not).
    pub runs: usize,
    /// Attempts whose result was not `ok`.
    pub failures: usize,
    /// Tasks synthesized because the queue was empty.
    pub generated: usize,
}

impl CycleReport {
    fn new(mode: AutorunMode) -> Self {
        Self {
            mode,
            runs: 0,
            failures: 0,
            generated: 0,
        }
    }
}

pub struct Scheduler<R: ScriptRunner = ProcessRunner> {
    ctx: Arc<SchedulerContext>,
    engine: Arc<Engine<R>>,
    queue: PendingQueue,
    source: ConfigSource,
    current: AutorunConfig,
}

impl<R: ScriptRunner> Scheduler<R> {
    pub fn new(
        ctx: Arc<SchedulerContext>,
        engine: Arc<Engine<R>>,
        queue: PendingQueue,
        source: ConfigSource,
    ) -> Result<Self> {
        let current = match &source {
            ConfigSource::Fixed(cfg) => {
                cfg.validate()?;
                cfg.clone()
            }
            ConfigSource::File(path) => load_config(path)?.autorun,
        };
        Ok(Self {
            ctx,
            engine,
            queue,
            source,
            current,
        })
    }

    pub fn context(&self) -> &Arc<SchedulerContext> {
        &self.ctx
    }

    /// Configuration in effect for the latest poll.
    pub fn config(&self) -> &AutorunConfig {
        &self.current
    }

    /// One poll: refresh configuration, update the phase, fire when idle.
    pub fn tick(&mut self) -> Result<Option<CycleReport>> {
        self.refresh_config();
        let cfg = self.current.clone();
        let phase = phase_for(cfg.enabled, self.ctx.idle_for(), cfg.idle_threshold());
        self.ctx.set_phase(phase);
        if phase != SchedulerPhase::Firing {
            debug!(phase = ?phase, "autorun idle check");
            return Ok(None);
        }
        self.run_cycle(&cfg).map(Some)
    }

    /// `tick`, with errors and panics contained and logged.
    pub fn tick_guarded(&mut self) {
        match panic::catch_unwind(AssertUnwindSafe(|| self.tick())) {
            Ok(Ok(Some(report))) => info!(
                mode = report.mode.as_str(),
                runs = report.runs,
                failures = report.failures,
                generated = report.generated,
                "autorun cycle finished"
            ),
            Ok(Ok(None)) => {}
            Ok(Err(err)) => error!(err = %format!("{err:#}"), "autorun cycle failed"),
            Err(payload) => error!(panic = %panic_message(payload.as_ref()), "autorun cycle panicked"),
        }
    }

    /// Run one firing cycle in the configured mode.
    #[instrument(skip_all, fields(mode = cfg.mode.as_str(), limit = cfg.max_runs_per_cycle))]
    pub fn run_cycle(&self, cfg: &AutorunConfig) -> Result<CycleReport> {
        match cfg.mode {
            AutorunMode::Projects => self.run_projects(cfg),
            AutorunMode::Autotasks => self.run_autotasks(cfg),
        }
    }

    /// Poll until a stop is requested.
    pub fn run_loop(mut self) {
        if self.ctx.waker.set(thread::current()).is_err() {
            warn!("scheduler context already has a loop attached");
        }
        info!(
            enabled = self.current.enabled,
            idle_secs = self.current.idle_secs,
            poll_interval_secs = self.current.poll_interval_secs,
            "autorun loop started"
        );
        while self.ctx.is_running() {
            self.tick_guarded();
            self.ctx.sleep(self.current.poll_interval());
        }
        self.ctx.set_phase(SchedulerPhase::Stopped);
        info!("autorun loop stopped");
    }

    fn refresh_config(&mut self) {
        let ConfigSource::File(path) = &self.source else {
            return;
        };
        match load_config(path) {
            Ok(cfg) => self.current = cfg.autorun,
            Err(err) => warn!(
                path = %path.display(),
                err = %format!("{err:#}"),
                "keeping last good autorun config"
            ),
        }
    }

    fn limit_reached(&self, report: &CycleReport, cfg: &AutorunConfig) -> bool {
        report.runs >= cfg.max_runs_per_cycle || !self.ctx.is_running()
    }

    fn run_projects(&self, cfg: &AutorunConfig) -> Result<CycleReport> {
        let mut report = CycleReport::new(AutorunMode::Projects);
        let projects = self.engine.store().list().context("list projects")?;
        let timeout = self.engine.exec_config().project_timeout();
        for project in projects {
            if self.limit_reached(&report, cfg) {
                break;
            }
            match self.engine.run_named(&project.name, timeout) {
                Ok(result) => {
                    report.runs += 1;
                    if !result.ok {
                        report.failures += 1;
                    }
                }
                Err(err) => warn!(
                    project = %project.name,
                    err = %format!("{err:#}"),
                    "autorun project failed"
                ),
            }
        }
        Ok(report)
    }

    fn run_autotasks(&self, cfg: &AutorunConfig) -> Result<CycleReport> {
        let mut report = CycleReport::new(AutorunMode::Autotasks);
        let mut tasks = self.consumable_artifacts()?;
        if tasks.is_empty() && cfg.generate_tasks {
            report.generated =
                generate_tasks(&self.queue, &cfg.task_templates, cfg.max_runs_per_cycle)?.len();
            tasks = self.consumable_artifacts()?;
        }
        let timeout = self.engine.exec_config().snippet_timeout();
        for task in tasks {
            if self.limit_reached(&report, cfg) {
                break;
            }
            let path = task.code_path().display().to_string();
            let ok = match self.queue.read_code(&task) {
                Ok(code) => self.engine.run(&code, timeout).ok,
                Err(err) => {
                    warn!(task = %path, err = %format!("{err:#}"), "unreadable task");
                    false
                }
            };
            report.runs += 1;
            if !ok {
                report.failures += 1;
            }
            match task.apply(ArtifactEvent::ExecutionAttempted) {
                Ok(ArtifactState::Consumed) => {
                    if let Err(err) = self.queue.retire(&task) {
                        warn!(task = %path, err = %format!("{err:#}"), "failed to remove task");
                    }
                }
                state => debug!(task = %path, state = ?state, "task kept"),
            }
            debug!(task = %path, ok, "task attempted");
        }
        Ok(report)
    }

    /// Pending artifacts that an execution attempt consumes. Requests never qualify.
    fn consumable_artifacts(&self) -> Result<Vec<PendingArtifact>> {
        let artifacts = self.queue.scan().context("scan pending")?;
        Ok(artifacts
            .into_iter()
            .filter(|artifact| {
                artifact.apply(ArtifactEvent::ExecutionAttempted) == Ok(ArtifactState::Consumed)
            })
            .collect())
    }
}

impl<R: ScriptRunner + Send + Sync + 'static> Scheduler<R> {
    /// Start the loop on its own thread.
    pub fn spawn(self) -> Result<SchedulerHandle> {
        let ctx = Arc::clone(&self.ctx);
        let thread = thread::Builder::new()
            .name("autorun".to_string())
            .spawn(move || self.run_loop())
            .context("spawn autorun thread")?;
        Ok(SchedulerHandle {
            ctx,
            thread: Some(thread),
        })
    }
}

/// Owner of a running scheduler thread.
#[derive(Debug)]
pub struct SchedulerHandle {
    ctx: Arc<SchedulerContext>,
    thread: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn context(&self) -> &Arc<SchedulerContext> {
        &self.ctx
    }

    /// Request a stop and wait for the loop to exit.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        self.ctx.request_stop();
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|payload| anyhow!("autorun thread panicked: {}", panic_message(payload.as_ref()))),
            None => Ok(()),
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            error!(err = %err, "autorun shutdown failed");
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use crate::io::config::{SandboxConfig, write_config};
    use crate::io::run_log::list_logs;
    use crate::test_support::{ScriptedRunner, TestSandbox};

    fn firing_config(mode: AutorunMode, limit: usize) -> AutorunConfig {
        AutorunConfig {
            enabled: true,
            idle_secs: 0,
            poll_interval_secs: 1,
            mode,
            max_runs_per_cycle: limit,
            generate_tasks: true,
            task_templates: vec!["print('idle')".to_string()],
        }
    }

    fn scheduler(
        sandbox: &TestSandbox,
        runner: ScriptedRunner,
        cfg: AutorunConfig,
    ) -> Scheduler<ScriptedRunner> {
        Scheduler::new(
            Arc::new(SchedulerContext::new()),
            Arc::new(sandbox.engine_with(runner)),
            sandbox.queue(),
            ConfigSource::Fixed(cfg),
        )
        .expect("scheduler")
    }

    #[test]
    fn activity_resets_idle_clock() {
        let ctx = SchedulerContext::new();
        thread::sleep(Duration::from_millis(60));
        assert!(ctx.idle_for() >= Duration::from_millis(50));
        ctx.signal_activity();
        assert!(ctx.idle_for() < Duration::from_millis(50));
    }

    #[test]
    fn disabled_and_waiting_do_not_fire() {
        let sandbox = TestSandbox::new();
        let mut cfg = firing_config(AutorunMode::Autotasks, 1);
        cfg.enabled = false;
        let mut sched = scheduler(&sandbox, ScriptedRunner::new(), cfg);
        assert_eq!(sched.tick().expect("tick"), None);
        assert_eq!(sched.context().phase(), SchedulerPhase::Disabled);

        let mut cfg = firing_config(AutorunMode::Autotasks, 1);
        cfg.idle_secs = 3600;
        let mut sched = scheduler(&sandbox, ScriptedRunner::new(), cfg);
        assert_eq!(sched.tick().expect("tick"), None);
        assert_eq!(sched.context().phase(), SchedulerPhase::Waiting);
        assert!(sandbox.queue().list_tasks().expect("tasks").is_empty());
        assert_eq!(sandbox.log_count(), 0);
    }

    #[test]
    fn autotasks_generates_runs_and_deletes_one_task() {
        let sandbox = TestSandbox::new();
        let mut sched = scheduler(
            &sandbox,
            ScriptedRunner::new(),
            firing_config(AutorunMode::Autotasks, 1),
        );
        let report = sched.tick().expect("tick").expect("fired");
        assert_eq!(
            report,
            CycleReport {
                mode: AutorunMode::Autotasks,
                runs: 1,
                failures: 0,
                generated: 1,
            }
        );
        assert_eq!(sched.context().phase(), SchedulerPhase::Firing);
        assert!(sandbox.queue().list_tasks().expect("tasks").is_empty());

        let logs = list_logs(&sandbox.paths.logs_dir, 10).expect("logs");
        assert_eq!(logs.len(), 1);
        assert!(logs[0].record.ok);
        assert_eq!(logs[0].record.code_preview, "print('idle')");
    }

    #[test]
    fn existing_tasks_are_used_before_generating() {
        let sandbox = TestSandbox::new();
        let queue = sandbox.queue();
        for (id, body) in [(1, "print(1)"), (2, "print(2)"), (3, "print(3)")] {
            queue.create_task(body, id).expect("task");
        }
        let runner = ScriptedRunner::new();
        runner.push_error("boom");
        let mut sched = scheduler(&sandbox, runner, firing_config(AutorunMode::Autotasks, 2));

        let report = sched.tick().expect("tick").expect("fired");
        assert_eq!(report.generated, 0);
        assert_eq!(report.runs, 2);
        assert_eq!(report.failures, 1);

        let left: Vec<_> = queue.list_tasks().expect("tasks").into_iter().map(|t| t.id).collect();
        assert_eq!(left, [3]);
        assert_eq!(sched.engine.runner().sources(), ["print(1)", "print(2)"]);
    }

    #[test]
    fn unreadable_task_counts_as_failure_and_is_removed() {
        let sandbox = TestSandbox::new();
        let queue = sandbox.queue();
        let garbled = queue.create_task("", 1).expect("task");
        fs::write(&garbled.path, [0xff, 0xfe]).expect("write");
        let mut sched = scheduler(
            &sandbox,
            ScriptedRunner::new(),
            firing_config(AutorunMode::Autotasks, 1),
        );

        let report = sched.tick().expect("tick").expect("fired");
        assert_eq!(report.runs, 1);
        assert_eq!(report.failures, 1);
        assert_eq!(report.generated, 0);
        assert!(!garbled.path.exists());
        assert!(sched.engine.runner().sources().is_empty());

        let report = sched.tick().expect("tick").expect("fired");
        assert_eq!(report.generated, 1);
        assert_eq!(report.failures, 0);
    }

    #[test]
    fn pending_requests_are_never_consumed() {
        let sandbox = TestSandbox::new();
        let queue = sandbox.queue();
        queue.submit("review_me", "print('r')", "needs eyes").expect("submit");
        let mut sched = scheduler(
            &sandbox,
            ScriptedRunner::new(),
            firing_config(AutorunMode::Autotasks, 2),
        );
        sched.tick().expect("tick");
        assert_eq!(queue.list_requests().expect("requests").len(), 1);
        assert!(
            sched
                .engine
                .runner()
                .sources()
                .iter()
                .all(|code| code == "print('idle')")
        );
    }

    #[test]
    fn projects_mode_respects_limit_and_keeps_files() {
        let sandbox = TestSandbox::new();
        let runner = ScriptedRunner::new();
        runner.push_timeout("");
        let sched = scheduler(&sandbox, runner, firing_config(AutorunMode::Projects, 2));
        for name in ["a", "b", "c"] {
            sched.engine.store().save(name, "print(0)").expect("save");
        }

        let report = sched
            .run_cycle(&firing_config(AutorunMode::Projects, 2))
            .expect("cycle");
        assert_eq!(report.runs, 2);
        assert_eq!(report.failures, 1);
        assert_eq!(sched.engine.store().list().expect("list").len(), 3);
        assert_eq!(sandbox.log_count(), 2);
    }

    #[test]
    fn panics_in_a_cycle_are_contained() {
        let sandbox = TestSandbox::new();
        let runner = ScriptedRunner::new();
        runner.push_panic("interpreter exploded");
        let mut sched = scheduler(&sandbox, runner, firing_config(AutorunMode::Autotasks, 1));

        sched.tick_guarded();
        assert_eq!(sandbox.queue().list_tasks().expect("tasks").len(), 1);
        let scratch_left = std::fs::read_dir(sandbox.scratch_parent())
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(scratch_left, 0);

        sched.tick_guarded();
        assert!(sandbox.queue().list_tasks().expect("tasks").is_empty());
        assert_eq!(sandbox.log_count(), 1);
    }

    #[test]
    fn file_source_is_reread_and_last_good_kept() {
        let sandbox = TestSandbox::new();
        let mut config = SandboxConfig::default();
        config.autorun.enabled = false;
        write_config(&sandbox.paths.config_path, &config).expect("write");

        let mut sched = Scheduler::new(
            Arc::new(SchedulerContext::new()),
            Arc::new(sandbox.engine_with(ScriptedRunner::new())),
            sandbox.queue(),
            ConfigSource::File(sandbox.paths.config_path.clone()),
        )
        .expect("scheduler");
        sched.tick().expect("tick");
        assert_eq!(sched.context().phase(), SchedulerPhase::Disabled);

        config.autorun.enabled = true;
        config.autorun.idle_secs = 3600;
        write_config(&sandbox.paths.config_path, &config).expect("write");
        sched.tick().expect("tick");
        assert_eq!(sched.context().phase(), SchedulerPhase::Waiting);

        std::fs::write(&sandbox.paths.config_path, "[autorun\nbroken").expect("corrupt");
        sched.tick().expect("tick");
        assert_eq!(sched.config().idle_secs, 3600);
        assert_eq!(sched.context().phase(), SchedulerPhase::Waiting);
    }

    #[test]
    fn stop_wakes_a_sleeping_loop() {
        let sandbox = TestSandbox::new();
        let mut cfg = firing_config(AutorunMode::Autotasks, 1);
        cfg.idle_secs = 3600;
        cfg.poll_interval_secs = 600;
        let sched = scheduler(&sandbox, ScriptedRunner::new(), cfg);
        let handle = sched.spawn().expect("spawn");
        let ctx = Arc::clone(handle.context());
        thread::sleep(Duration::from_millis(100));

        let started = Instant::now();
        handle.stop().expect("stop");
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(ctx.phase(), SchedulerPhase::Stopped);
        assert!(!ctx.is_running());

        ctx.signal_activity();
        assert_eq!(ctx.phase(), SchedulerPhase::Stopped);
        assert_eq!(sandbox.log_count(), 0);
    }

    #[test]
    fn stop_before_first_poll_never_fires() {
        let sandbox = TestSandbox::new();
        let sched = scheduler(
            &sandbox,
            ScriptedRunner::new(),
            firing_config(AutorunMode::Autotasks, 1),
        );
        sched.context().request_stop();
        let handle = sched.spawn().expect("spawn");
        let ctx = Arc::clone(handle.context());
        handle.stop().expect("stop");
        assert_eq!(ctx.phase(), SchedulerPhase::Stopped);
        assert_eq!(sandbox.log_count(), 0);
    }
}
