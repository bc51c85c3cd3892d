//! Helper to handle worker stderr
//!
//! Worker stdout is the protocol channel and is never touched here. Stderr
//! carries the worker's own tracing output:
//! - forwarding enabled: pipe it and re-emit each line through our tracing at debug
//! - forwarding disabled: inherit the parent's stderr

use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use shared::{ProcessId, process_debug};

/// Configure stdio for a worker process
pub fn configure_child_stdio(cmd: &mut tokio::process::Command, forward_logs: bool, process_name: &str) {
    cmd.stdin(Stdio::piped()).stdout(Stdio::piped());

    if forward_logs {
        cmd.stderr(Stdio::piped());
        process_debug!(
            ProcessId::current(),
            "📡 {} logs will be forwarded through the optimizer's tracing",
            process_name
        );
    } else {
        cmd.stderr(Stdio::inherit());
        process_debug!(
            ProcessId::current(),
            "🔗 {} logs go straight to the parent's stderr",
            process_name
        );
    }
}

/// If stderr was piped, spawn a task that forwards it line by line.
/// Draining the pipe also keeps a chatty worker from blocking on a full buffer.
pub fn spawn_stderr_forwarder(mut child: Child, process_name: String) -> Child {
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let reader = BufReader::new(stderr);
            let mut lines = reader.lines();

            while let Ok(Some(line)) = lines.next_line().await {
                process_debug!(ProcessId::current(), "[{}] {}", process_name, line);
            }
        });
    }

    child
}
