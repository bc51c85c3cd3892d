//! Service-specific tests
//!
//! Pool tests run against in-memory fake workers that speak the same request /
//! response protocol as the real binary, with knobs for the failure modes the
//! pool has to survive.


// Common test utilities for services
#[cfg(test)]
pub mod common {
    use async_trait::async_trait;
    use shared::{EvaluationPair, ScoreDeltas, WorkerRequest, WorkerResponse};
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::time::Instant;

    use crate::config::PoolConfig;
    use crate::error::{OptimizerError, OptimizerResult};
    use crate::traits::{WorkerLauncher, WorkerLink};

    /// How one fake worker process behaves
    #[derive(Debug, Clone, Default)]
    pub struct FakeBehavior {
        /// Answer this many calls, then exit
        pub exit_after: Option<usize>,
        /// Die without answering when this call number (1-based) arrives
        pub die_on_call: Option<usize>,
        /// The first `slow_calls` answers arrive after `delay`
        pub slow_calls: usize,
        pub delay: Duration,
        /// Report every candidate as unscorable
        pub reject: bool,
        /// Never send the ready handshake
        pub silent: bool,
    }

    /// Launcher handing out [`FakeLink`]s
    #[derive(Clone, Default)]
    pub struct FakeLauncher {
        default: FakeBehavior,
        first_launch: HashMap<usize, FakeBehavior>,
        broken_slots: HashSet<usize>,
        launches: Arc<Mutex<HashMap<usize, usize>>>,
    }

    impl FakeLauncher {
        pub fn new() -> Self {
            Self::default()
        }

        /// Behavior of every launch not covered by `with_first_launch`
        pub fn with_default(mut self, behavior: FakeBehavior) -> Self {
            self.default = behavior;
            self
        }

        /// Behavior of the first process started in `slot`; restarts get the default
        pub fn with_first_launch(mut self, slot: usize, behavior: FakeBehavior) -> Self {
            self.first_launch.insert(slot, behavior);
            self
        }

        /// Every launch in `slot` fails
        pub fn with_broken_slot(mut self, slot: usize) -> Self {
            self.broken_slots.insert(slot);
            self
        }

        pub fn launches(&self, slot: usize) -> usize {
            self.launches.lock().unwrap().get(&slot).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl WorkerLauncher for FakeLauncher {
        async fn launch(&self, slot: usize) -> OptimizerResult<Box<dyn WorkerLink>> {
            let previous = {
                let mut launches = self.launches.lock().unwrap();
                let count = launches.entry(slot).or_insert(0);
                *count += 1;
                *count - 1
            };
            if self.broken_slots.contains(&slot) {
                return Err(OptimizerError::WorkerSpawnFailed {
                    slot,
                    message: "binary missing".to_string(),
                });
            }
            let behavior = match (previous, self.first_launch.get(&slot)) {
                (0, Some(first)) => first.clone(),
                _ => self.default.clone(),
            };
            Ok(Box::new(FakeLink::new(slot, behavior)))
        }
    }

    /// In-memory worker. Candidate blobs are decimal numbers and come back as
    /// the throughput delta, which makes result order easy to check.
    pub struct FakeLink {
        slot: usize,
        behavior: FakeBehavior,
        alive: bool,
        calls: usize,
        pending: VecDeque<(Instant, WorkerResponse)>,
    }

    impl FakeLink {
        pub fn new(slot: usize, behavior: FakeBehavior) -> Self {
            let mut pending = VecDeque::new();
            if !behavior.silent {
                pending.push_back((Instant::now(), WorkerResponse::Ready { worker_id: slot as u32 }));
            }
            Self {
                slot,
                behavior,
                alive: true,
                calls: 0,
                pending,
            }
        }

        fn answer(&mut self, sequence: u64, pair: &EvaluationPair) {
            self.calls += 1;
            if self.behavior.die_on_call == Some(self.calls) {
                self.alive = false;
                return;
            }

            let response = if self.behavior.reject {
                WorkerResponse::Failed {
                    sequence,
                    message: "cannot score".to_string(),
                }
            } else {
                let value = String::from_utf8_lossy(&pair.candidate).parse::<f64>().unwrap_or(0.0);
                WorkerResponse::Scored {
                    sequence,
                    deltas: ScoreDeltas::new(value, 0.0, 0.0),
                }
            };
            let ready_at = if self.calls <= self.behavior.slow_calls {
                Instant::now() + self.behavior.delay
            } else {
                Instant::now()
            };
            self.pending.push_back((ready_at, response));

            if self.behavior.exit_after == Some(self.calls) {
                self.alive = false;
            }
        }
    }

    #[async_trait]
    impl WorkerLink for FakeLink {
        fn pid(&self) -> Option<u32> {
            Some(10_000 + self.slot as u32)
        }

        fn is_alive(&mut self) -> bool {
            self.alive
        }

        async fn send(&mut self, request: &WorkerRequest) -> OptimizerResult<()> {
            if !self.alive {
                return Err(OptimizerError::WorkerDied {
                    slot: self.slot,
                    message: "broken pipe".to_string(),
                });
            }
            match request {
                WorkerRequest::Evaluate { sequence, pair } => self.answer(*sequence, pair),
                WorkerRequest::Ping { sequence } => {
                    self.pending.push_back((Instant::now(), WorkerResponse::Pong { sequence: *sequence }))
                }
                WorkerRequest::Exit => self.alive = false,
            }
            Ok(())
        }

        async fn recv(&mut self) -> OptimizerResult<WorkerResponse> {
            let Some(&(ready_at, _)) = self.pending.front() else {
                if self.alive {
                    std::future::pending::<()>().await;
                }
                return Err(OptimizerError::WorkerDied {
                    slot: self.slot,
                    message: "output stream closed".to_string(),
                });
            };
            tokio::time::sleep_until(ready_at).await;
            let (_, response) = self.pending.pop_front().unwrap();
            Ok(response)
        }

        async fn terminate(&mut self, _grace: Duration) -> OptimizerResult<()> {
            self.alive = false;
            Ok(())
        }
    }

    pub fn pool_config(call_timeout_ms: u64) -> PoolConfig {
        PoolConfig {
            size: 2,
            call_timeout_ms,
            startup_timeout_ms: 200,
            max_consecutive_timeouts: 1,
            shutdown_grace_ms: 10,
        }
    }

    /// Pair whose candidate blob the fake workers score as `value`
    pub fn pair(value: f64) -> EvaluationPair {
        EvaluationPair {
            baseline: b"0".to_vec(),
            candidate: value.to_string().into_bytes(),
        }
    }
}
