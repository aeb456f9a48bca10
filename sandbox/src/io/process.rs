//! Helpers for running child processes with timeouts and bounded output.

use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// How long to wait for the output reader after the child is gone.
///
/// The child's process group is killed once the child is reaped, which closes
/// every pipe copy it handed out. A process that left the group (`setsid`) can
/// still hold the pipe; the reader is then abandoned after this grace period
/// and the bytes read so far are kept.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Captured child process output, stdout and stderr merged.
#[derive(Debug)]
pub struct CommandOutput {
    /// Exit code, or `None` when the child was killed (on timeout or by a signal).
    pub exit_code: Option<i32>,
    pub output: Vec<u8>,
    pub output_truncated: usize,
    pub timed_out: bool,
    /// Wall-clock time from spawn until the child was reaped.
    pub elapsed: Duration,
}

impl CommandOutput {
    pub fn output_lossy(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }

    pub fn truncated_notice(&self) -> String {
        if self.output_truncated > 0 {
            format!("\n[output truncated {} bytes]\n", self.output_truncated)
        } else {
            String::new()
        }
    }
}

/// Bytes kept from the merged stream plus the count of dropped ones.
#[derive(Debug, Default)]
struct Capture {
    kept: Vec<u8>,
    dropped: usize,
}

impl Capture {
    fn push(&mut self, chunk: &[u8], limit: usize) {
        let keep = chunk.len().min(limit.saturating_sub(self.kept.len()));
        self.kept.extend_from_slice(&chunk[..keep]);
        self.dropped += chunk.len() - keep;
    }
}

/// Run a command with a hard timeout, merging stdout and stderr into one stream.
///
/// Both streams share a single pipe, so the captured text keeps the order in
/// which the child wrote it. The pipe is drained on a reader thread while the
/// child runs; `output_limit_bytes` bounds what is kept in memory (bytes beyond
/// it are read and counted, not stored).
///
/// On Unix the child leads its own process group. The group is killed on
/// timeout and again once the child has been reaped, so nothing the script
/// started in the background outlives the call.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs_f64(), output_limit_bytes))]
pub fn run_merged_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    let (reader, writer) = std::io::pipe().context("create output pipe")?;
    let writer_err = writer.try_clone().context("clone output pipe")?;
    cmd.stdin(Stdio::null())
        .stdout(Stdio::from(writer))
        .stderr(Stdio::from(writer_err));
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!("spawning child process");
    let start = Instant::now();
    let spawned = cmd.spawn();
    // The command still owns the parent's copies of the write end; dropping it
    // lets the reader observe EOF once the child exits.
    drop(cmd);
    let mut child = match spawned {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };
    let pid = child.id();

    let capture = Arc::new(Mutex::new(Capture::default()));
    let sink = Arc::clone(&capture);
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(read_stream_limited(reader, output_limit_bytes, &sink));
    });

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => Some(status),
        None => {
            warn!(
                timeout_secs = timeout.as_secs_f64(),
                "command timed out, killing"
            );
            timed_out = true;
            kill_process_group(pid);
            if let Err(err) = child.kill() {
                debug!(err = %err, "direct kill after group kill");
            }
            child.wait().context("wait command after kill")?;
            None
        }
    };
    let elapsed = start.elapsed();
    kill_process_group(pid);

    match rx.recv_timeout(DRAIN_GRACE) {
        Ok(result) => result.context("read output")?,
        Err(mpsc::RecvTimeoutError::Timeout) => {
            warn!("output pipe still open after child exit, keeping partial output");
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            return Err(anyhow!("output reader thread panicked"));
        }
    }
    let Capture { kept: output, dropped: output_truncated } = std::mem::take(&mut *lock(&capture));

    if output_truncated > 0 {
        warn!(output_truncated, "output truncated");
    }

    let exit_code = status.and_then(|s| s.code());
    debug!(exit_code = ?exit_code, timed_out, "command finished");
    Ok(CommandOutput {
        exit_code,
        output,
        output_truncated,
        timed_out,
        elapsed,
    })
}

fn lock(capture: &Mutex<Capture>) -> MutexGuard<'_, Capture> {
    capture.lock().unwrap_or_else(PoisonError::into_inner)
}

/// SIGKILL every process left in the group led by `pid`.
#[cfg(unix)]
fn kill_process_group(pid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => debug!(pgid = raw, "process group killed"),
        Err(Errno::ESRCH) => {}
        Err(err) => warn!(pgid = raw, err = %err, "failed to kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize, sink: &Mutex<Capture>) -> Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            return Ok(());
        }
        lock(sink).push(&chunk[..n], limit);
    }
}
