//! Supervision of child processes running in-sandbox commands.
//!
//! # Notes on stdout/stderr capture and timeouts
//!
//! Do not read stdout/stderr only after process exit: if the child writes enough data to fill a
//! pipe, the child can block forever and never exit (deadlock). Both streams are therefore drained
//! on dedicated reader threads that forward chunks over channels; the supervisor accumulates those
//! chunks into buffers on every poll tick, so partial output survives a forced termination.
//!
//! Timeouts are enforced with millisecond precision and a hard kill (SIGKILL). The timed-out case
//! is reported as a completed execution, not an error: whatever output was captured up to the kill
//! is returned, with [`ExecOutput::timed_out`] set and the exit code fixed at
//! [`EXIT_CODE_KILLED`]. Callers that need to tell a timeout apart from a normal completion check
//! the flag.
//!
//! The final drain after exit is itself bounded: a grandchild that inherited the pipes can hold
//! them open past the child's death, and the caller's wait must stay within timeout + epsilon.

use std::io::Read;
use std::process::Child;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::RuntimeError;

/// Exit code reported when the supervisor kills a process (128 + SIGKILL).
pub const EXIT_CODE_KILLED: i32 = 137;

/// Upper bound on the post-exit drain of remaining buffered output.
const FINAL_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Output captured from a supervised command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    /// Standard output from the command.
    pub stdout: String,
    /// Standard error from the command.
    pub stderr: String,
    /// Exit code from the command (0 typically indicates success).
    pub exit_code: i32,
    /// True when the process was forcibly terminated at the timeout.
    pub timed_out: bool,
}

impl ExecOutput {
    /// Returns `true` if the command ran to completion with exit code 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    /// Standard output followed by standard error, with surrounding whitespace trimmed.
    ///
    /// Ordering between the two streams is not preserved relative to each other,
    /// only within each stream.
    #[must_use]
    pub fn combined(&self) -> String {
        let mut out = String::with_capacity(self.stdout.len() + self.stderr.len());
        out.push_str(&self.stdout);
        out.push_str(&self.stderr);
        out.trim().to_string()
    }
}

/// Supervises a spawned child until it exits or the wall-clock timeout fires.
///
/// The child's stdout and stderr must have been spawned with `Stdio::piped()`.
/// Reader threads forward both streams in chunks while the supervisor polls
/// `try_wait()` at `poll_interval`, accumulating output as it arrives; on
/// timeout the child is killed and reaped, and whatever was captured up to
/// that point is returned.
///
/// # Errors
///
/// Returns `RuntimeError::Wait` if waiting on the child fails.
pub fn supervise(
    mut child: Child,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<ExecOutput, RuntimeError> {
    let stdout_rx = spawn_reader(child.stdout.take());
    let stderr_rx = spawn_reader(child.stderr.take());

    let mut stdout_buf: Vec<u8> = Vec::new();
    let mut stderr_buf: Vec<u8> = Vec::new();

    let start = Instant::now();
    let (exit_code, timed_out) = loop {
        while let Ok(chunk) = stdout_rx.try_recv() {
            stdout_buf.extend_from_slice(&chunk);
        }
        while let Ok(chunk) = stderr_rx.try_recv() {
            stderr_buf.extend_from_slice(&chunk);
        }

        match child.try_wait() {
            Ok(Some(status)) => break (exit_code_of(status), false),
            Ok(None) => {
                if start.elapsed() > timeout {
                    debug!(elapsed_ms = %start.elapsed().as_millis(), "command timed out, sending SIGKILL");
                    let _ = child.kill();
                    let _ = child.wait();
                    break (EXIT_CODE_KILLED, true);
                }
                thread::sleep(poll_interval);
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(RuntimeError::Wait {
                    context: e.to_string(),
                });
            }
        }
    };

    // Final drain. Normally the pipes close with the child and the readers
    // disconnect immediately; a surviving grandchild can hold them open, so
    // the drain has its own deadline. Readers that outlive it exit on their
    // next send once the receivers are dropped.
    let drain_deadline = Instant::now() + FINAL_DRAIN_TIMEOUT;
    drain(&stdout_rx, &mut stdout_buf, drain_deadline);
    drain(&stderr_rx, &mut stderr_buf, drain_deadline);

    let output = ExecOutput {
        stdout: String::from_utf8_lossy(&stdout_buf).into_owned(),
        stderr: String::from_utf8_lossy(&stderr_buf).into_owned(),
        exit_code,
        timed_out,
    };

    debug!(
        exit_code = output.exit_code,
        timed_out,
        elapsed_ms = %start.elapsed().as_millis(),
        "command completed"
    );
    Ok(output)
}

/// Spawns a thread forwarding a stream over a channel in chunks.
fn spawn_reader<R: Read + Send + 'static>(reader: Option<R>) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    thread::spawn(move || {
        let Some(mut reader) = reader else { return };
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(chunk[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}

/// Receives remaining chunks until the reader disconnects or the deadline passes.
fn drain(rx: &mpsc::Receiver<Vec<u8>>, buf: &mut Vec<u8>, deadline: Instant) {
    loop {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        match rx.recv_timeout(deadline - now) {
            Ok(chunk) => buf.extend_from_slice(&chunk),
            Err(_) => return,
        }
    }
}

/// Exit code of a terminated child: the code if it exited, `128 + signal`
/// if a signal killed it, `-1` if neither is available.
fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status
            .code()
            .or_else(|| status.signal().map(|s| 128 + s))
            .unwrap_or(-1)
    }
    #[cfg(not(unix))]
    {
        status.code().unwrap_or(-1)
    }
}
