//! Bounded pool of persistent evaluator processes
//!
//! Each slot owns one worker behind a tokio mutex, so a slot carries at most one
//! in-flight request. Dispatch rotates over slots, restarts dead workers in place
//! and keeps batch results in input order.

use futures_util::future::join_all;
use serde::Serialize;
use shared::{process_debug, process_error, process_warn, EvaluationPair, ProcessId, ScoreDeltas, WorkerRequest, WorkerResponse};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::{timeout, timeout_at, Instant};

use crate::config::PoolConfig;
use crate::error::{OptimizerError, OptimizerResult};
use crate::traits::{WorkerLauncher, WorkerLink};

/// Outcome of one scoring call that reached the oracle
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    Scored(ScoreDeltas),
    /// The oracle ran and reported that it cannot score the candidate
    Rejected { message: String },
}

impl Evaluation {
    pub fn deltas(&self) -> Option<&ScoreDeltas> {
        match self {
            Evaluation::Scored(deltas) => Some(deltas),
            Evaluation::Rejected { .. } => None,
        }
    }
}

/// Lifecycle of a pool slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum WorkerStatus {
    Starting = 0,
    Alive = 1,
    /// Process is gone; restarted on next use
    Dead = 2,
    /// Restart failed; only the health check retries it
    Failed = 3,
    Stopped = 4,
}

impl WorkerStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerStatus::Starting,
            1 => WorkerStatus::Alive,
            2 => WorkerStatus::Dead,
            3 => WorkerStatus::Failed,
            _ => WorkerStatus::Stopped,
        }
    }
}

/// Result of a health sweep over all slots
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthReport {
    /// Slots able to take work after the sweep, busy ones included
    pub alive: usize,
    /// Slots found dead, failed or stuck on timeouts
    pub dead: usize,
    pub restarted: usize,
    pub restart_failed: usize,
}

/// Point-in-time diagnostics of one slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerSnapshot {
    pub slot: usize,
    pub pid: Option<u32>,
    pub status: WorkerStatus,
    pub epoch: u32,
    pub restarts: u32,
    pub consecutive_timeouts: u32,
}

type LinkSlot = Option<Box<dyn WorkerLink>>;

/// One pool slot
struct WorkerHandle {
    slot: usize,
    pid: AtomicU32,
    status: AtomicU8,
    epoch: AtomicU32,
    sequence: AtomicU64,
    consecutive_timeouts: AtomicU32,
    restarts: AtomicU32,
    /// Serialization lock; holding it grants exclusive use of the process
    link: Arc<Mutex<LinkSlot>>,
}

impl WorkerHandle {
    fn new(slot: usize) -> Self {
        Self {
            slot,
            pid: AtomicU32::new(0),
            status: AtomicU8::new(WorkerStatus::Starting as u8),
            epoch: AtomicU32::new(0),
            sequence: AtomicU64::new(0),
            consecutive_timeouts: AtomicU32::new(0),
            restarts: AtomicU32::new(0),
            link: Arc::new(Mutex::new(None)),
        }
    }

    fn status(&self) -> WorkerStatus {
        WorkerStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: WorkerStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// Sequence ids carry the epoch in the high half so responses from a
    /// previous process can never match a current request
    fn next_sequence(&self) -> u64 {
        let epoch = u64::from(self.epoch.load(Ordering::Acquire));
        let counter = self.sequence.fetch_add(1, Ordering::AcqRel) & 0xFFFF_FFFF;
        (epoch << 32) | counter
    }

    fn begin_epoch(&self) {
        self.set_status(WorkerStatus::Starting);
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.sequence.store(0, Ordering::Release);
        self.consecutive_timeouts.store(0, Ordering::Release);
        self.pid.store(0, Ordering::Release);
    }

    fn record_timeout(&self) -> u32 {
        self.consecutive_timeouts.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn record_answer(&self) {
        self.consecutive_timeouts.store(0, Ordering::Release);
    }

    fn snapshot(&self) -> WorkerSnapshot {
        let pid = self.pid.load(Ordering::Acquire);
        WorkerSnapshot {
            slot: self.slot,
            pid: (pid != 0).then_some(pid),
            status: self.status(),
            epoch: self.epoch.load(Ordering::Acquire),
            restarts: self.restarts.load(Ordering::Acquire),
            consecutive_timeouts: self.consecutive_timeouts.load(Ordering::Acquire),
        }
    }
}

/// Pool of evaluator workers started through a [`WorkerLauncher`]
pub struct WorkerPool<L>
where
    L: WorkerLauncher + 'static,
{
    launcher: L,
    config: PoolConfig,
    handles: Vec<Arc<WorkerHandle>>,
    cursor: AtomicUsize,
}

impl<L> WorkerPool<L>
where
    L: WorkerLauncher + 'static,
{
    pub fn new(launcher: L, config: PoolConfig) -> Self {
        Self {
            launcher,
            config,
            handles: Vec::new(),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Start `count` workers and wait for their ready handshake.
    ///
    /// Slots whose worker fails to start stay in the pool as `Failed` so the
    /// health check can retry them.
    ///
    /// # Returns
    /// Number of workers that reported ready
    pub async fn start(&mut self, count: usize) -> usize {
        let first_slot = self.handles.len();
        let new_handles: Vec<Arc<WorkerHandle>> =
            (first_slot..first_slot + count).map(|slot| Arc::new(WorkerHandle::new(slot))).collect();

        let this = &*self;
        let spawns = new_handles.iter().map(|handle| async move {
            let mut guard = handle.link.lock().await;
            this.spawn_into(handle, &mut guard).await
        });
        let started = join_all(spawns)
            .await
            .into_iter()
            .filter(|result| match result {
                Ok(()) => true,
                Err(e) => {
                    process_error!(ProcessId::current(), "⚠️ Worker failed to start: {}", e);
                    false
                }
            })
            .count();

        self.handles.extend(new_handles);
        process_debug!(ProcessId::current(), "🚀 Started {}/{} workers", started, count);
        started
    }

    /// Score one pair on the next available worker.
    ///
    /// A call lost to a dying worker is retried once on the restarted slot.
    pub async fn evaluate(&self, pair: &EvaluationPair, call_timeout: Duration) -> OptimizerResult<Evaluation> {
        let (handle, mut guard) = self.acquire().await?;
        match self.dispatch(&handle, &mut guard, pair, call_timeout).await {
            Err(OptimizerError::WorkerDied { slot, message }) => {
                process_warn!(
                    ProcessId::current(),
                    "💀 Worker {} died during a call ({}), restarting and retrying",
                    slot,
                    message
                );
                self.restart_locked(&handle, &mut guard).await?;
                self.dispatch(&handle, &mut guard, pair, call_timeout).await
            }
            other => other,
        }
    }

    /// Score every pair concurrently; results come back in input order.
    ///
    /// Items lost to infrastructure failures are retried once after a health
    /// sweep. Fails as a whole only when no worker is left alive.
    pub async fn evaluate_batch(
        &self,
        pairs: &[EvaluationPair],
        call_timeout: Duration,
    ) -> OptimizerResult<Vec<OptimizerResult<Evaluation>>> {
        let mut results = join_all(pairs.iter().map(|pair| self.evaluate(pair, call_timeout))).await;

        let failed: Vec<usize> = results
            .iter()
            .enumerate()
            .filter(|(_, result)| matches!(result, Err(e) if e.is_infrastructure()))
            .map(|(index, _)| index)
            .collect();

        if !failed.is_empty() {
            let report = self.health_check().await;
            process_warn!(
                ProcessId::current(),
                "🔁 {} of {} batch items hit worker failures, retrying ({:?})",
                failed.len(),
                pairs.len(),
                report
            );
            if report.alive == 0 {
                return Err(OptimizerError::NoLiveWorkers);
            }

            let retried = join_all(failed.iter().map(|&index| self.evaluate(&pairs[index], call_timeout))).await;
            for (index, result) in failed.into_iter().zip(retried) {
                results[index] = result;
            }
            if self.live_count() == 0 {
                return Err(OptimizerError::NoLiveWorkers);
            }
        }

        Ok(results)
    }

    /// Restart every slot that is dead, failed, no longer running, or stuck on
    /// repeated timeouts. Busy slots count as alive.
    pub async fn health_check(&self) -> HealthReport {
        let mut report = HealthReport::default();

        for handle in &self.handles {
            if handle.status() == WorkerStatus::Stopped {
                continue;
            }
            let Ok(mut guard) = Arc::clone(&handle.link).try_lock_owned() else {
                report.alive += 1;
                continue;
            };

            let stuck = handle.consecutive_timeouts.load(Ordering::Acquire) >= self.config.max_consecutive_timeouts;
            let healthy = handle.status() == WorkerStatus::Alive
                && guard.as_mut().is_some_and(|link| link.is_alive())
                && !stuck;
            if healthy {
                report.alive += 1;
                continue;
            }

            report.dead += 1;
            match self.restart_locked(handle, &mut guard).await {
                Ok(()) => {
                    report.restarted += 1;
                    report.alive += 1;
                }
                Err(e) => {
                    report.restart_failed += 1;
                    process_error!(ProcessId::current(), "❌ Health check could not restart worker {}: {}", handle.slot, e);
                }
            }
        }

        process_debug!(ProcessId::current(), "🩺 Health check: {:?}", report);
        report
    }

    /// Ask every worker to exit, killing those that outlive the grace period
    pub async fn shutdown(&self) {
        let grace = self.config.shutdown_grace();
        let stops = self.handles.iter().map(|handle| async move {
            let mut guard = handle.link.lock().await;
            if let Some(mut link) = guard.take() {
                let _ = link.send(&WorkerRequest::Exit).await;
                if let Err(e) = link.terminate(grace).await {
                    process_warn!(ProcessId::current(), "⚠️ Worker {} did not stop cleanly: {}", handle.slot, e);
                }
            }
            handle.set_status(WorkerStatus::Stopped);
            process_debug!(ProcessId::current(), "🛑 Stopped worker {}", handle.slot);
        });
        join_all(stops).await;
    }

    /// Slots currently alive, busy ones included
    pub fn live_count(&self) -> usize {
        self.handles
            .iter()
            .filter(|handle| handle.status() == WorkerStatus::Alive)
            .count()
    }

    pub fn snapshot(&self) -> Vec<WorkerSnapshot> {
        self.handles.iter().map(|handle| handle.snapshot()).collect()
    }

    /// Pick a slot and lock it.
    ///
    /// Rotates from the cursor, taking the first idle usable slot and restarting
    /// it first when its worker is dead. When every usable slot is busy, waits for
    /// the first busy slot in rotation order.
    async fn acquire(&self) -> OptimizerResult<(Arc<WorkerHandle>, OwnedMutexGuard<LinkSlot>)> {
        let count = self.handles.len();
        if count == 0 {
            return Err(OptimizerError::NoLiveWorkers);
        }

        let start = self.cursor.fetch_add(1, Ordering::Relaxed);
        let mut busy: Option<&Arc<WorkerHandle>> = None;

        for offset in 0..count {
            let handle = &self.handles[(start + offset) % count];
            if matches!(handle.status(), WorkerStatus::Failed | WorkerStatus::Stopped) {
                continue;
            }
            let Ok(mut guard) = Arc::clone(&handle.link).try_lock_owned() else {
                busy.get_or_insert(handle);
                continue;
            };
            if self.ensure_running(handle, &mut guard).await.is_ok() {
                return Ok((Arc::clone(handle), guard));
            }
        }

        let Some(handle) = busy else {
            return Err(OptimizerError::NoLiveWorkers);
        };
        let mut guard = Arc::clone(&handle.link).lock_owned().await;
        match handle.status() {
            WorkerStatus::Failed | WorkerStatus::Stopped => Err(OptimizerError::unavailable(format!(
                "worker {} became unusable while waiting",
                handle.slot
            ))),
            _ => {
                self.ensure_running(handle, &mut guard).await?;
                Ok((Arc::clone(handle), guard))
            }
        }
    }

    /// Restart a locked slot whose worker is gone
    async fn ensure_running(&self, handle: &WorkerHandle, guard: &mut LinkSlot) -> OptimizerResult<()> {
        let running = handle.status() == WorkerStatus::Alive && guard.as_mut().is_some_and(|link| link.is_alive());
        if running {
            return Ok(());
        }
        if handle.status() == WorkerStatus::Alive {
            handle.set_status(WorkerStatus::Dead);
        }
        self.restart_locked(handle, guard).await
    }

    async fn dispatch(
        &self,
        handle: &WorkerHandle,
        guard: &mut LinkSlot,
        pair: &EvaluationPair,
        call_timeout: Duration,
    ) -> OptimizerResult<Evaluation> {
        let slot = handle.slot;
        let Some(link) = guard.as_mut() else {
            handle.set_status(WorkerStatus::Dead);
            return Err(OptimizerError::WorkerDied {
                slot,
                message: "no process attached".to_string(),
            });
        };

        let sequence = handle.next_sequence();
        let deadline = Instant::now() + call_timeout;
        let request = WorkerRequest::Evaluate {
            sequence,
            pair: pair.clone(),
        };

        let timed_out = |handle: &WorkerHandle| {
            let streak = handle.record_timeout();
            process_warn!(ProcessId::current(), "⏱️ Worker {} timed out ({} in a row)", slot, streak);
            OptimizerError::WorkerTimeout {
                slot,
                timeout: call_timeout,
            }
        };
        let died = |handle: &WorkerHandle, error: OptimizerError| {
            handle.set_status(WorkerStatus::Dead);
            OptimizerError::WorkerDied {
                slot,
                message: error.to_string(),
            }
        };

        match timeout_at(deadline, link.send(&request)).await {
            Err(_) => return Err(timed_out(handle)),
            Ok(Err(e)) => return Err(died(handle, e)),
            Ok(Ok(())) => {}
        }

        loop {
            let response = match timeout_at(deadline, link.recv()).await {
                Err(_) => return Err(timed_out(handle)),
                Ok(Err(e)) => return Err(died(handle, e)),
                Ok(Ok(response)) => response,
            };
            match response {
                WorkerResponse::Scored { sequence: answered, deltas } if answered == sequence => {
                    handle.record_answer();
                    return Ok(Evaluation::Scored(deltas));
                }
                WorkerResponse::Failed { sequence: answered, message } if answered == sequence => {
                    handle.record_answer();
                    return Ok(Evaluation::Rejected { message });
                }
                stale => {
                    process_debug!(ProcessId::current(), "🗑️ Worker {} discarded stale response {:?}", slot, stale.sequence());
                }
            }
        }
    }

    async fn restart_locked(&self, handle: &WorkerHandle, guard: &mut LinkSlot) -> OptimizerResult<()> {
        handle.restarts.fetch_add(1, Ordering::AcqRel);
        process_debug!(ProcessId::current(), "🔄 Restarting worker {}", handle.slot);
        self.spawn_into(handle, guard).await
    }

    /// Replace whatever runs in the slot with a fresh worker and wait for `Ready`
    async fn spawn_into(&self, handle: &WorkerHandle, guard: &mut LinkSlot) -> OptimizerResult<()> {
        if let Some(mut old) = guard.take() {
            let _ = old.terminate(Duration::ZERO).await;
        }
        handle.begin_epoch();

        let mut link = match self.launcher.launch(handle.slot).await {
            Ok(link) => link,
            Err(e) => {
                handle.set_status(WorkerStatus::Failed);
                return Err(e);
            }
        };

        let failure = match timeout(self.config.startup_timeout(), link.recv()).await {
            Ok(Ok(WorkerResponse::Ready { worker_id })) => {
                handle.pid.store(link.pid().unwrap_or(0), Ordering::Release);
                *guard = Some(link);
                handle.set_status(WorkerStatus::Alive);
                process_debug!(ProcessId::current(), "✅ Worker {} ready (reported id {})", handle.slot, worker_id);
                return Ok(());
            }
            Ok(Ok(other)) => format!("expected Ready, got {other:?}"),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("no Ready within {:?}", self.config.startup_timeout()),
        };

        let _ = link.terminate(Duration::ZERO).await;
        handle.set_status(WorkerStatus::Failed);
        Err(OptimizerError::WorkerSpawnFailed {
            slot: handle.slot,
            message: failure,
        })
    }
}
