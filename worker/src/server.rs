//! Request loop over the worker's stdio
//!
//! Announces readiness with exactly one `Ready` frame, then answers one response
//! frame per request until the optimizer asks it to exit or closes the input.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::codec::{read_frame, write_frame};
use shared::{process_debug, process_info, process_warn, AllocationSnapshot, EvaluationPair, ProcessId, WorkerRequest, WorkerResponse};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{WorkerError, WorkerResult};
use crate::oracle::ScoringOracle;

/// Knobs for one serve loop
#[derive(Debug, Clone, Default)]
pub struct ServeOptions {
    /// Reported in the `Ready` frame
    pub worker_id: u32,
    /// Stop after answering this many evaluations
    pub exit_after: Option<usize>,
    /// Probability of dying without an answer when an evaluation arrives
    pub crash_rate: f64,
    pub seed: Option<u64>,
}

/// Why the serve loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeEnd {
    ExitRequested,
    InputClosed,
    CallLimit,
    /// Simulated crash; the caller should exit abnormally
    Crashed,
}

/// Serve requests from `reader`, answering on `writer`
pub async fn serve<R, W, O>(mut reader: R, mut writer: W, oracle: &O, options: ServeOptions) -> WorkerResult<ServeEnd>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    O: ScoringOracle + ?Sized,
{
    let mut rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut answered = 0usize;

    write_frame(
        &mut writer,
        &WorkerResponse::Ready {
            worker_id: options.worker_id,
        },
    )
    .await?;
    process_info!(ProcessId::current(), "✅ Worker {} ready", options.worker_id);

    loop {
        let Some(request) = read_frame::<_, WorkerRequest>(&mut reader).await? else {
            process_info!(ProcessId::current(), "📭 Input closed");
            return Ok(ServeEnd::InputClosed);
        };

        match request {
            WorkerRequest::Evaluate { sequence, pair } => {
                if options.crash_rate > 0.0 && rng.gen_bool(options.crash_rate.min(1.0)) {
                    process_warn!(ProcessId::current(), "💥 Simulated crash on request {}", sequence);
                    return Ok(ServeEnd::Crashed);
                }

                let response = match evaluate(oracle, &pair).await {
                    Ok(deltas) => WorkerResponse::Scored { sequence, deltas },
                    Err(e) if e.is_per_candidate() => {
                        process_debug!(ProcessId::current(), "🚫 Request {} not scored: {}", sequence, e);
                        WorkerResponse::Failed {
                            sequence,
                            message: e.to_string(),
                        }
                    }
                    Err(e) => return Err(e),
                };
                write_frame(&mut writer, &response).await?;

                answered += 1;
                if options.exit_after == Some(answered) {
                    process_info!(ProcessId::current(), "🛑 Call limit of {} reached", answered);
                    return Ok(ServeEnd::CallLimit);
                }
            }
            WorkerRequest::Ping { sequence } => {
                write_frame(&mut writer, &WorkerResponse::Pong { sequence }).await?;
            }
            WorkerRequest::Exit => {
                process_info!(ProcessId::current(), "👋 Exit requested");
                return Ok(ServeEnd::ExitRequested);
            }
        }
    }
}

async fn evaluate<O>(oracle: &O, pair: &EvaluationPair) -> WorkerResult<shared::ScoreDeltas>
where
    O: ScoringOracle + ?Sized,
{
    let decode = |bytes: &[u8]| {
        AllocationSnapshot::from_json_bytes(bytes).map_err(|e| WorkerError::BadDescription { message: e.to_string() })
    };
    let baseline = decode(&pair.baseline)?;
    let candidate = decode(&pair.candidate)?;
    oracle.score(&baseline, &candidate).await
}
