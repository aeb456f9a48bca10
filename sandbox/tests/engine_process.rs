//! Engine tests against real child processes.
//!
//! Scripts run under `sh` so the suite needs no Python install.

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use sandbox::core::types::{LOG_OUTPUT_CHARS, RunKind};
use sandbox::io::config::SandboxConfig;
use sandbox::io::run_log::list_logs;
use sandbox::test_support::{TestSandbox, sh_exec_config};

#[test]
fn merged_output_and_exit_code_are_returned() {
    let sandbox = TestSandbox::with_sh();
    let engine = sandbox.engine();

    let result = engine.run("echo out; echo err >&2; echo done", Duration::from_secs(10));
    assert!(result.ok, "{result:?}");
    assert_eq!(result.output, "out\nerr\ndone\n");
    assert_eq!(result.exit_code, Some(0));
    assert!(result.elapsed.is_some());

    let failing = engine.run("echo fail; exit 5", Duration::from_secs(10));
    assert!(failing.ok);
    assert_eq!(failing.exit_code, Some(5));
    assert_eq!(failing.output, "fail\n");
}

#[test]
fn runaway_script_is_killed_at_timeout() {
    let sandbox = TestSandbox::with_sh();
    let engine = sandbox.engine();

    let started = Instant::now();
    let result = engine.run("echo started; exec sleep 30", Duration::from_secs(1));
    assert!(started.elapsed() < Duration::from_secs(6));
    assert!(!result.ok);
    assert_eq!(result.error.as_deref(), Some("timeout"));
    assert_eq!(result.elapsed, None);
    assert_eq!(result.output, "started\n");

    let logs = list_logs(&sandbox.paths.logs_dir, 10).expect("logs");
    assert_eq!(logs.len(), 1);
    assert!(!logs[0].record.ok);
    assert_eq!(logs[0].record.error.as_deref(), Some("timeout"));
    assert_eq!(logs[0].record.elapsed, None);
}

#[test]
fn environment_is_scrubbed() {
    let sandbox = TestSandbox::with_sh();
    let engine = sandbox.engine();

    let result = engine.run(
        "echo \"home=${HOME:-none} cargo=${CARGO_MANIFEST_DIR:-none} flag=$SANDBOXED path=${PATH:+set}\"",
        Duration::from_secs(10),
    );
    let expected_path = if std::env::var_os("PATH").is_some() { "set" } else { "" };
    assert_eq!(
        result.output,
        format!("home=none cargo=none flag=1 path={expected_path}\n")
    );
}

#[test]
fn each_run_gets_a_fresh_scratch_dir_that_is_removed() {
    let sandbox = TestSandbox::with_sh();
    let engine = sandbox.engine();

    let first = engine.run("pwd; ls -A; echo leftover > junk.txt", Duration::from_secs(10));
    let second = engine.run("pwd; ls -A", Duration::from_secs(10));

    let first_lines: Vec<&str> = first.output.lines().collect();
    let second_lines: Vec<&str> = second.output.lines().collect();
    assert_eq!(first_lines[1..], ["script.sh"]);
    assert_eq!(second_lines[1..], ["script.sh"]);
    assert_ne!(first_lines[0], second_lines[0]);
    for dir in [first_lines[0], second_lines[0]] {
        assert!(!PathBuf::from(dir).exists(), "{dir} should be removed");
    }
    let remaining = fs::read_dir(sandbox.scratch_parent())
        .expect("scratch parent")
        .count();
    assert_eq!(remaining, 0);
}

#[test]
fn named_project_runs_from_the_store() {
    let sandbox = TestSandbox::with_sh();
    let engine = sandbox.engine();
    engine
        .store()
        .save("greet", "echo hello from $(basename \"$0\")")
        .expect("save");

    let result = engine
        .run_named("greet.sh", Duration::from_secs(10))
        .expect("run named");
    assert_eq!(result.output, "hello from greet.sh\n");

    let logs = list_logs(&sandbox.paths.logs_dir, 10).expect("logs");
    assert_eq!(logs[0].record.kind, RunKind::Project);
    assert_eq!(logs[0].record.project.as_deref(), Some("greet.sh"));
}

#[test]
fn caller_gets_full_output_but_log_is_capped() {
    let sandbox = TestSandbox::with_sh();
    let engine = sandbox.engine();

    let script = format!("head -c {} /dev/zero | tr '\\0' 'a'", LOG_OUTPUT_CHARS * 2);
    let result = engine.run(&script, Duration::from_secs(10));
    assert_eq!(result.output.len(), LOG_OUTPUT_CHARS * 2);

    let logs = list_logs(&sandbox.paths.logs_dir, 10).expect("logs");
    assert_eq!(logs[0].record.output.chars().count(), LOG_OUTPUT_CHARS);
}

#[test]
fn capture_limit_bounds_memory_and_reports_truncation() {
    let mut config = SandboxConfig::default();
    config.exec = sh_exec_config();
    config.exec.capture_limit_bytes = 100;
    let sandbox = TestSandbox::from_config(config);
    let engine = sandbox.engine();

    let result = engine.run("head -c 1000 /dev/zero | tr '\\0' 'b'", Duration::from_secs(10));
    assert!(result.ok);
    assert_eq!(result.output_truncated_bytes, 900);
    assert!(result.output.starts_with(&"b".repeat(100)));
    assert!(result.output.contains("[output truncated 900 bytes]"));
}

#[test]
fn missing_interpreter_is_a_failed_result_with_a_log() {
    let mut config = SandboxConfig::default();
    config.exec = sh_exec_config();
    config.exec.interpreter = "no-such-interpreter-5e2a".to_string();
    let sandbox = TestSandbox::from_config(config);
    let engine = sandbox.engine();

    let result = engine.run("echo hi", Duration::from_secs(5));
    assert!(!result.ok);
    assert!(result.error.is_some());
    assert_eq!(result.elapsed, None);
    assert_eq!(sandbox.log_count(), 1);
}

#[test]
fn background_job_keeps_output_and_is_cleaned_up() {
    let sandbox = TestSandbox::with_sh();
    let engine = sandbox.engine();

    let started = Instant::now();
    let result = engine.run("echo hi; sleep 3 &", Duration::from_secs(5));
    assert!(result.ok, "{result:?}");
    assert_eq!(result.output, "hi\n");
    assert!(started.elapsed() < Duration::from_secs(3));

    let logs = list_logs(&sandbox.paths.logs_dir, 10).expect("logs");
    assert_eq!(logs[0].record.output, "hi\n");
}

#[cfg(target_os = "linux")]
#[test]
fn timeout_leaves_no_background_process_running() {
    let sandbox = TestSandbox::with_sh();
    let engine = sandbox.engine();

    let result = engine.run(
        "sleep 30 >/dev/null 2>&1 & echo $!; wait",
        Duration::from_secs(1),
    );
    assert_eq!(result.error.as_deref(), Some("timeout"));
    let pid: u32 = result.output.trim().parse().expect("background pid");

    let deadline = Instant::now() + Duration::from_secs(3);
    while is_running(pid) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(50));
    }
    assert!(!is_running(pid), "pid {pid} still running after timeout");
}

#[cfg(target_os = "linux")]
fn is_running(pid: u32) -> bool {
    match fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat
            .rsplit(')')
            .next()
            .is_some_and(|rest| !rest.trim_start().starts_with('Z')),
        Err(_) => false,
    }
}
