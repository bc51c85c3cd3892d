//! Real worker launcher
//!
//! Spawns the worker binary with piped stdio. Frames are written by a writer
//! task and read by a reader task, so a caller that gives up on a call (timeout,
//! cancellation) never leaves half a frame on either pipe.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{OptimizerError, OptimizerResult};
use crate::services::process_output_handler::{configure_child_stdio, spawn_stderr_forwarder};
use crate::traits::{WorkerLauncher, WorkerLink};
use shared::{codec, process_debug, process_warn, ProcessId, WorkerRequest, WorkerResponse};

/// Frames buffered per direction
const CHANNEL_CAPACITY: usize = 16;

/// Launches worker processes from a binary on disk
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    /// Worker executable
    program: PathBuf,

    /// Extra arguments appended after the standard ones
    args: Vec<String>,

    /// Log level to pass to spawned workers
    log_level: String,

    /// Pipe worker stderr into our tracing instead of inheriting it
    forward_logs: bool,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            log_level: "info".to_string(),
            forward_logs: false,
        }
    }

    /// Configure extra worker arguments (fluent API)
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Configure log level (fluent API)
    pub fn with_log_level(mut self, log_level: String) -> Self {
        self.log_level = log_level;
        self
    }

    /// Configure log forwarding (fluent API)
    pub fn with_forward_logs(mut self, forward_logs: bool) -> Self {
        self.forward_logs = forward_logs;
        self
    }

    fn command(&self, slot: usize) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--id")
            .arg(slot.to_string())
            .arg("--log-level")
            .arg(&self.log_level)
            .args(&self.args)
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self, slot: usize) -> OptimizerResult<Box<dyn WorkerLink>> {
        let process_name = format!("worker_{slot}");
        let mut cmd = self.command(slot);
        configure_child_stdio(&mut cmd, self.forward_logs, &process_name);

        let spawn_failed = |message: String| OptimizerError::WorkerSpawnFailed { slot, message };

        let mut child = cmd
            .spawn()
            .map_err(|e| spawn_failed(format!("{}: {e}", self.program.display())))?;
        let stdin = child.stdin.take().ok_or_else(|| spawn_failed("stdin not piped".to_string()))?;
        let stdout = child.stdout.take().ok_or_else(|| spawn_failed("stdout not piped".to_string()))?;
        let child = spawn_stderr_forwarder(child, process_name.clone());

        process_debug!(
            ProcessId::current(),
            "🏭 Spawned {} (PID: {:?}) from {}",
            process_name,
            child.id(),
            self.program.display()
        );

        Ok(Box::new(ProcessLink::new(slot, child, stdin, stdout)))
    }
}

/// Link to a spawned worker process
pub struct ProcessLink {
    slot: usize,
    child: Child,
    requests: mpsc::Sender<WorkerRequest>,
    responses: mpsc::Receiver<WorkerResponse>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl ProcessLink {
    fn new(slot: usize, child: Child, stdin: ChildStdin, stdout: ChildStdout) -> Self {
        let (request_tx, request_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (response_tx, response_rx) = mpsc::channel(CHANNEL_CAPACITY);

        Self {
            slot,
            child,
            requests: request_tx,
            responses: response_rx,
            writer: tokio::spawn(write_requests(slot, stdin, request_rx)),
            reader: tokio::spawn(read_responses(slot, stdout, response_tx)),
        }
    }

    fn died(&self, message: &str) -> OptimizerError {
        OptimizerError::WorkerDied {
            slot: self.slot,
            message: message.to_string(),
        }
    }

    #[cfg(unix)]
    fn request_termination(&self) {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = self.child.id() {
            if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                process_debug!(ProcessId::current(), "📤 SIGTERM to worker {} failed: {}", self.slot, e);
            }
        }
    }

    #[cfg(not(unix))]
    fn request_termination(&self) {}
}

async fn write_requests(slot: usize, mut stdin: ChildStdin, mut requests: mpsc::Receiver<WorkerRequest>) {
    while let Some(request) = requests.recv().await {
        if let Err(e) = codec::write_frame(&mut stdin, &request).await {
            process_debug!(ProcessId::current(), "📪 Worker {} stdin closed: {}", slot, e);
            break;
        }
    }
}

async fn read_responses(slot: usize, mut stdout: ChildStdout, responses: mpsc::Sender<WorkerResponse>) {
    loop {
        match codec::read_frame::<_, WorkerResponse>(&mut stdout).await {
            Ok(Some(response)) => {
                if responses.send(response).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                process_debug!(ProcessId::current(), "📪 Worker {} closed its output", slot);
                break;
            }
            Err(e) => {
                process_warn!(ProcessId::current(), "⚠️ Worker {} sent an unreadable frame: {}", slot, e);
                break;
            }
        }
    }
}

#[async_trait]
impl WorkerLink for ProcessLink {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn send(&mut self, request: &WorkerRequest) -> OptimizerResult<()> {
        self.requests
            .send(request.clone())
            .await
            .map_err(|_| self.died("input stream closed"))
    }

    async fn recv(&mut self) -> OptimizerResult<WorkerResponse> {
        match self.responses.recv().await {
            Some(response) => Ok(response),
            None => Err(self.died("output stream closed")),
        }
    }

    async fn terminate(&mut self, grace: Duration) -> OptimizerResult<()> {
        if !grace.is_zero() && self.is_alive() {
            self.request_termination();
            if let Ok(status) = tokio::time::timeout(grace, self.child.wait()).await {
                process_debug!(ProcessId::current(), "🛑 Worker {} exited: {:?}", self.slot, status);
            }
        }
        if self.is_alive() {
            self.child.kill().await?;
        }
        let _ = self.child.wait().await;
        self.writer.abort();
        self.reader.abort();
        Ok(())
    }
}
