//! Supervision of a node process started by this run.

use std::{
    collections::VecDeque,
    path::PathBuf,
    process::{ExitStatus, Stdio},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::{
    process::{Child, Command},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;

use crate::{
    DeployError,
    process::{self, OutputLine, OutputStream},
};

/// Substring the node prints once it accepts connections.
pub const DEFAULT_READINESS_MARKER: &str = "Listening on";

/// Default bound on the time between spawning the node and seeing the marker.
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(10);

/// Time a node gets to exit after the termination signal before it is killed.
const TERMINATE_GRACE_PERIOD: Duration = Duration::from_secs(3);

/// Number of output lines kept for diagnostics when startup fails.
const RECENT_OUTPUT_LINES: usize = 50;

/// Lifecycle of a supervised node start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum SupervisorState {
    NotStarted,
    Starting,
    Ready,
    StartFailed,
    TimedOut,
}

/// The process the supervisor spawns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeCommand {
    pub program: String,
    pub args: Vec<String>,
    pub work_dir: Option<PathBuf>,
}

impl NodeCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            work_dir: None,
        }
    }

    /// Run the process from `dir`.
    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }
}

/// Ownership record of a node process started by this run.
///
/// Clones share the same process. Termination is idempotent: only the first
/// call signals the process, later calls return immediately.
#[derive(Debug, Clone)]
pub struct NodeProcessHandle {
    inner: Arc<HandleInner>,
}

#[derive(Debug)]
struct HandleInner {
    pid: Option<u32>,
    child: Mutex<Option<Child>>,
    terminated: AtomicBool,
}

impl NodeProcessHandle {
    /// Take ownership of a spawned child.
    pub fn new(child: Child) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                pid: child.id(),
                child: Mutex::new(Some(child)),
                terminated: AtomicBool::new(false),
            }),
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.inner.pid
    }

    /// Whether [`terminate`](Self::terminate) has completed.
    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.load(Ordering::SeqCst)
    }

    /// Stop the process: termination signal first, kill after the grace period.
    ///
    /// Returns the exit status when this call was the one that stopped the process.
    pub async fn terminate(&self) -> Option<ExitStatus> {
        let child = self
            .inner
            .child
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(mut child) = child else {
            tracing::trace!(pid = ?self.inner.pid, "Node process already terminated");
            return None;
        };

        tracing::info!(pid = ?self.inner.pid, "Stopping node process...");
        send_termination_signal(&mut child);

        let status = match tokio::time::timeout(TERMINATE_GRACE_PERIOD, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                tracing::warn!(
                    pid = ?self.inner.pid,
                    error = %e,
                    "Failed to wait for node process"
                );
                None
            }
            Err(_) => {
                tracing::warn!(
                    pid = ?self.inner.pid,
                    "Node process ignored the termination signal, killing it"
                );
                if let Err(e) = child.kill().await {
                    tracing::warn!(
                        pid = ?self.inner.pid,
                        error = %e,
                        "Failed to kill node process"
                    );
                }
                None
            }
        };

        self.inner.terminated.store(true, Ordering::SeqCst);
        tracing::debug!(pid = ?self.inner.pid, ?status, "Node process stopped");

        status
    }
}

#[cfg(unix)]
fn send_termination_signal(child: &mut Child) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return;
    };

    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        tracing::debug!(pid, error = %e, "Failed to send SIGTERM, killing instead");
        let _ = child.start_kill();
    }
}

#[cfg(not(unix))]
fn send_termination_signal(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        tracing::debug!(error = %e, "Failed to kill node process");
    }
}

enum StartOutcome {
    Ready,
    TimedOut,
    Exited,
    Cancelled,
}

/// Starts a node process and waits for its readiness marker.
#[derive(Debug)]
pub struct NodeSupervisor {
    readiness_marker: String,
    start_timeout: Duration,
    state: SupervisorState,
    handle: Option<NodeProcessHandle>,
}

impl NodeSupervisor {
    pub fn new(readiness_marker: impl Into<String>, start_timeout: Duration) -> Self {
        Self {
            readiness_marker: readiness_marker.into(),
            start_timeout,
            state: SupervisorState::NotStarted,
            handle: None,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Handle of the last spawned process, kept even when startup failed.
    pub fn handle(&self) -> Option<&NodeProcessHandle> {
        self.handle.as_ref()
    }

    /// Spawn `command` and wait until its output contains the readiness marker.
    ///
    /// Both stdout and stderr are scanned. On timeout, early exit or
    /// cancellation the process is terminated before the error is returned.
    pub async fn start(
        &mut self,
        command: &NodeCommand,
        cancel: &CancellationToken,
    ) -> Result<NodeProcessHandle, DeployError> {
        self.state = SupervisorState::Starting;

        tracing::info!(
            program = %command.program,
            args = ?command.args,
            work_dir = ?command.work_dir,
            "Starting node..."
        );

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &command.work_dir {
            cmd.current_dir(dir);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.state = SupervisorState::StartFailed;
                return Err(DeployError::NodeStartFailed {
                    reason: format!("failed to spawn `{}`: {}", command.program, e),
                    output: String::new(),
                });
            }
        };

        let (tx, mut rx) = mpsc::channel(process::OUTPUT_CHANNEL_CAPACITY);
        if let Some(stdout) = child.stdout.take() {
            process::forward_lines(stdout, OutputStream::Stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            process::forward_lines(stderr, OutputStream::Stderr, tx.clone());
        }
        // The channel closes once both forwarders are done, i.e. the node exited.
        drop(tx);

        let handle = NodeProcessHandle::new(child);
        self.handle = Some(handle.clone());

        let mut recent = VecDeque::with_capacity(RECENT_OUTPUT_LINES);
        let deadline = tokio::time::sleep(self.start_timeout);
        tokio::pin!(deadline);

        let outcome = loop {
            tokio::select! {
                _ = cancel.cancelled() => break StartOutcome::Cancelled,
                _ = &mut deadline => break StartOutcome::TimedOut,
                line = rx.recv() => match line {
                    Some(line) => {
                        tracing::debug!(stream = %line.stream, "node: {}", line.text);
                        let ready = line.text.contains(&self.readiness_marker);
                        remember(&mut recent, line.text);
                        if ready {
                            break StartOutcome::Ready;
                        }
                    }
                    None => break StartOutcome::Exited,
                },
            }
        };

        let output = recent.into_iter().collect::<Vec<_>>().join("\n");

        match outcome {
            StartOutcome::Ready => {
                self.state = SupervisorState::Ready;
                tracing::info!(pid = ?handle.pid(), "Node is ready");
                drain_output(rx);
                Ok(handle)
            }
            StartOutcome::TimedOut => {
                self.state = SupervisorState::TimedOut;
                tracing::warn!(
                    timeout = ?self.start_timeout,
                    marker = %self.readiness_marker,
                    "Node did not report readiness in time"
                );
                handle.terminate().await;
                Err(DeployError::NodeStartTimeout {
                    timeout: self.start_timeout,
                    output,
                })
            }
            StartOutcome::Exited => {
                self.state = SupervisorState::StartFailed;
                let reason = match handle.terminate().await {
                    Some(status) => format!("node exited before it was ready ({status})"),
                    None => "node closed its output before it was ready".to_string(),
                };
                Err(DeployError::NodeStartFailed { reason, output })
            }
            StartOutcome::Cancelled => {
                self.state = SupervisorState::StartFailed;
                handle.terminate().await;
                Err(DeployError::Interrupted)
            }
        }
    }
}

fn remember(recent: &mut VecDeque<String>, line: String) {
    if recent.len() == RECENT_OUTPUT_LINES {
        recent.pop_front();
    }
    recent.push_back(line);
}

/// Keep consuming node output after readiness so the pipes never fill up.
fn drain_output(mut rx: mpsc::Receiver<OutputLine>) {
    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            tracing::debug!(stream = %line.stream, "node: {}", line.text);
        }
        tracing::trace!("Node output closed");
    });
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> NodeCommand {
        NodeCommand::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    #[tokio::test]
    async fn test_ready_when_marker_is_printed() {
        let mut supervisor = NodeSupervisor::new(DEFAULT_READINESS_MARKER, Duration::from_secs(5));
        let cancel = CancellationToken::new();

        let handle = supervisor
            .start(&sh("echo booting; echo 'Listening on 127.0.0.1:8545'; exec sleep 30"), &cancel)
            .await
            .unwrap();

        assert_eq!(supervisor.state(), SupervisorState::Ready);
        assert!(!handle.is_terminated());

        handle.terminate().await;
        assert!(handle.is_terminated());
    }

    #[tokio::test]
    async fn test_marker_on_stderr_counts() {
        let mut supervisor = NodeSupervisor::new(DEFAULT_READINESS_MARKER, Duration::from_secs(5));
        let cancel = CancellationToken::new();

        let handle = supervisor
            .start(&sh("echo 'Listening on 0.0.0.0:8545' >&2; exec sleep 30"), &cancel)
            .await
            .unwrap();

        assert_eq!(supervisor.state(), SupervisorState::Ready);
        handle.terminate().await;
    }

    #[tokio::test]
    async fn test_marker_after_invalid_utf8_is_seen() {
        let mut supervisor = NodeSupervisor::new(DEFAULT_READINESS_MARKER, Duration::from_secs(5));
        let cancel = CancellationToken::new();

        let handle = supervisor
            .start(
                &sh("printf 'banner \\377\\n'; echo 'Listening on 127.0.0.1:8545'; exec sleep 30"),
                &cancel,
            )
            .await
            .unwrap();

        assert_eq!(supervisor.state(), SupervisorState::Ready);
        handle.terminate().await;
    }

    #[tokio::test]
    async fn test_times_out_without_marker() {
        let timeout = Duration::from_millis(300);
        let mut supervisor = NodeSupervisor::new(DEFAULT_READINESS_MARKER, timeout);
        let cancel = CancellationToken::new();

        let started = std::time::Instant::now();
        let err = supervisor
            .start(&sh("echo booting; exec sleep 30"), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::NodeStartTimeout { .. }));
        assert_eq!(err.captured_output(), Some("booting"));
        assert_eq!(supervisor.state(), SupervisorState::TimedOut);
        assert!(supervisor.handle().unwrap().is_terminated());
        assert!(started.elapsed() < timeout + TERMINATE_GRACE_PERIOD);
    }

    #[tokio::test]
    async fn test_exit_before_ready_is_start_failure() {
        let mut supervisor = NodeSupervisor::new(DEFAULT_READINESS_MARKER, Duration::from_secs(5));
        let cancel = CancellationToken::new();

        let err = supervisor
            .start(&sh("echo 'address already in use' >&2; exit 3"), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::NodeStartFailed { .. }));
        assert!(err.captured_output().unwrap().contains("address already in use"));
        assert_eq!(supervisor.state(), SupervisorState::StartFailed);
    }

    #[tokio::test]
    async fn test_missing_binary_is_start_failure() {
        let mut supervisor = NodeSupervisor::new(DEFAULT_READINESS_MARKER, Duration::from_secs(1));
        let cancel = CancellationToken::new();

        let err = supervisor
            .start(
                &NodeCommand::new("devchain-missing-node-binary", Vec::new()),
                &cancel,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::NodeStartFailed { .. }));
        assert!(supervisor.handle().is_none());
    }

    #[tokio::test]
    async fn test_cancellation_terminates_node() {
        let mut supervisor = NodeSupervisor::new(DEFAULT_READINESS_MARKER, Duration::from_secs(30));
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let err = supervisor
            .start(&sh("exec sleep 30"), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::Interrupted));
        assert!(supervisor.handle().unwrap().is_terminated());
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let child = Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let handle = NodeProcessHandle::new(child);
        let clone = handle.clone();

        assert!(handle.terminate().await.is_some());
        assert!(clone.is_terminated());
        assert!(clone.terminate().await.is_none());
        assert!(handle.is_terminated());
    }
}
