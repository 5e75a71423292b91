//! Process Runner (C2): spawns/supervises short-lived probe processes and
//! long-lived transcoder processes, capturing bounded output and enforcing
//! termination-then-kill timeout escalation.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{AppError, Result};

/// Bounded ring buffer for captured child-process output lines, matching
/// the ambient log-buffering convention (§10.3 of SPEC_FULL.md).
const OUTPUT_BUFFER_LINES: usize = 2000;

pub struct ProcessRunner {
    max_captured_bytes: usize,
}

impl ProcessRunner {
    pub fn new(max_captured_bytes: usize) -> Self {
        Self { max_captured_bytes }
    }

    /// Synchronous: run to completion (or timeout/cancel), returning
    /// captured stdout. Never blocks the caller indefinitely — the process
    /// is killed on timeout or cancellation.
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<String> {
        let mut child = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| AppError::SpawnFailed(format!("{program}: {e}")))?;

        let mut stdout = child.stdout.take().expect("stdout piped");
        let max_bytes = self.max_captured_bytes;

        let read_fut = async move {
            let mut buf = Vec::new();
            let mut chunk = vec![0u8; 8192];
            loop {
                match stdout.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if buf.len() < max_bytes {
                            let take = n.min(max_bytes - buf.len());
                            buf.extend_from_slice(&chunk[..take]);
                        }
                    }
                    Err(_) => break,
                }
            }
            buf
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                Self::terminate(&mut child).await;
                Err(AppError::Canceled)
            }
            _ = tokio::time::sleep(timeout) => {
                Self::terminate(&mut child).await;
                Err(AppError::ProcessTimeout)
            }
            out = read_fut => {
                match child.wait().await {
                    Ok(status) if status.success() => Ok(String::from_utf8_lossy(&out).to_string()),
                    Ok(status) => Err(AppError::ProcessExitNonZero(format!("{program} exited with {status}"))),
                    Err(e) => Err(AppError::Internal(format!("failed to wait for {program}: {e}"))),
                }
            }
        }
    }

    /// Long-running: spawn and return a handle exposing `stop`/`wait` and
    /// a bounded buffer of recent output lines.
    pub fn spawn(&self, program: &str, args: &[String]) -> Result<ProcessHandle> {
        let mut child = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| AppError::SpawnFailed(format!("{program}: {e}")))?;

        let pid = child.id();
        let output = Arc::new(Mutex::new(VecDeque::with_capacity(OUTPUT_BUFFER_LINES)));
        let exited = Arc::new(Notify::new());

        if let Some(stdout) = child.stdout.take() {
            let output = output.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let mut buf = output.lock();
                    if buf.len() >= OUTPUT_BUFFER_LINES {
                        buf.pop_front();
                    }
                    buf.push_back(line);
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let output = output.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let mut buf = output.lock();
                    if buf.len() >= OUTPUT_BUFFER_LINES {
                        buf.pop_front();
                    }
                    buf.push_back(line);
                }
            });
        }

        debug!(program, pid, "spawned process");

        Ok(ProcessHandle {
            child,
            pid,
            output,
            exited,
        })
    }

    async fn terminate(child: &mut Child) {
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}

pub struct ProcessHandle {
    child: Child,
    pid: Option<u32>,
    output: Arc<Mutex<VecDeque<String>>>,
    exited: Arc<Notify>,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn recent_output(&self) -> Vec<String> {
        self.output.lock().iter().cloned().collect()
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Stop: SIGTERM first so ffmpeg can flush and finalize its container,
    /// then escalate to SIGKILL after `termination_timeout`, then log a
    /// leak after `kill_timeout`.
    pub async fn stop(&mut self, termination_timeout: Duration, kill_timeout: Duration) -> Result<()> {
        match self.pid {
            Some(pid) => {
                use nix::sys::signal::{kill, Signal};
                use nix::unistd::Pid;
                if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                    warn!("failed to send SIGTERM to process {pid}: {e}");
                }
            }
            None => warn!("process has no pid, cannot send SIGTERM"),
        }

        let waited = tokio::time::timeout(termination_timeout, self.child.wait()).await;
        if waited.is_ok() {
            self.exited.notify_waiters();
            return Ok(());
        }

        if let Err(e) = self.child.start_kill() {
            warn!("failed to SIGKILL process {:?}: {e}", self.pid);
        }

        let killed = tokio::time::timeout(kill_timeout, self.child.wait()).await;
        match killed {
            Ok(_) => {
                self.exited.notify_waiters();
                Ok(())
            }
            Err(_) => {
                warn!(pid = ?self.pid, "process did not exit after kill timeout, considering it leaked");
                Err(AppError::ProcessKilled)
            }
        }
    }

    pub async fn wait(&mut self) -> Result<std::process::ExitStatus> {
        self.child
            .wait()
            .await
            .map_err(|e| AppError::Internal(format!("wait failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn execute_captures_stdout_on_success() {
        let runner = ProcessRunner::new(4096);
        let cancel = CancellationToken::new();
        let out = runner
            .execute(&cancel, "echo", &["hello".to_string()], Duration::from_secs(2))
            .await
            .unwrap();
        assert!(out.contains("hello"));
    }

    #[tokio::test]
    async fn execute_times_out_long_running_process() {
        let runner = ProcessRunner::new(4096);
        let cancel = CancellationToken::new();
        let result = runner
            .execute(&cancel, "sleep", &["5".to_string()], Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(AppError::ProcessTimeout)));
    }

    #[tokio::test]
    async fn execute_honors_cancellation() {
        let runner = ProcessRunner::new(4096);
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel_clone.cancel();
        });
        let result = runner
            .execute(&cancel, "sleep", &["5".to_string()], Duration::from_secs(5))
            .await;
        assert!(matches!(result, Err(AppError::Canceled)));
    }

    #[tokio::test]
    async fn execute_reports_nonzero_exit() {
        let runner = ProcessRunner::new(4096);
        let cancel = CancellationToken::new();
        let result = runner
            .execute(&cancel, "false", &[], Duration::from_secs(2))
            .await;
        assert!(matches!(result, Err(AppError::ProcessExitNonZero(_))));
    }
}
