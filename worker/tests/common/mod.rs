//! Helpers for tests that drive the real worker binary

#![allow(dead_code)]

use serde_json::json;
use shared::codec::{read_frame, write_frame};
use shared::{EvaluationPair, NodeId, WorkerRequest, WorkerResponse};
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

/// Path of the worker binary built for this test run
pub fn worker_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_worker"))
}

/// Worker process with its protocol pipes
pub struct RunningWorker {
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
}

impl RunningWorker {
    pub async fn spawn(args: &[&str]) -> Self {
        let mut child = Command::new(worker_bin())
            .args(args)
            .arg("--log-level")
            .arg("warn")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .expect("worker binary should start");
        let stdin = child.stdin.take().unwrap();
        let stdout = child.stdout.take().unwrap();
        Self { child, stdin, stdout }
    }

    pub async fn send(&mut self, request: &WorkerRequest) {
        write_frame(&mut self.stdin, request).await.unwrap();
    }

    /// Next response, `None` once the worker closed its output
    pub async fn recv(&mut self) -> Option<WorkerResponse> {
        tokio::time::timeout(Duration::from_secs(10), read_frame(&mut self.stdout))
            .await
            .expect("worker answered in time")
            .unwrap()
    }
}

/// JSON build description with the given nodes
pub fn build(nodes: &[NodeId]) -> Vec<u8> {
    serde_json::to_vec(&json!({ "nodes": nodes })).unwrap()
}

pub fn pair(baseline: &[NodeId], candidate: &[NodeId]) -> EvaluationPair {
    EvaluationPair {
        baseline: build(baseline),
        candidate: build(candidate),
    }
}

/// Weight table file; keep the handle alive while workers read it
pub fn weights_file(table: serde_json::Value) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{table}").unwrap();
    file
}
