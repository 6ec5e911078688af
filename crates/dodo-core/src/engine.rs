//! Load engine: worker scheduling, cancellation and outcome collection
//!
//! `run` spawns the effective number of dodos, partitions the request
//! budget across them, streams per-request increments to the progress
//! listener and concatenates the per-worker outcome buffers on teardown.
//! Cancellation is cooperative: workers check the token at the top of
//! every iteration and every in-flight exchange races the token and an
//! explicit per-request timer.

use crate::client::ClientPool;
use crate::error::{DodoError, Result};
use crate::plan::CompiledPlan;
use crate::progress::ProgressListener;
use crate::request::{MaterializedRequest, RequestFactory};
use crate::template::FunctionRegistry;
use rand::rngs::StdRng;
use rand::SeedableRng;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// One completed request attempt: the grouping label (status code or
/// error kind) and the measured exchange time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub label: String,
    pub elapsed: Duration,
}

impl Outcome {
    pub fn new(label: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            label: label.into(),
            elapsed,
        }
    }
}

/// Drives a compiled plan against a client pool.
pub struct LoadEngine {
    plan: Arc<CompiledPlan>,
    pool: Arc<ClientPool>,
    registry: Arc<FunctionRegistry>,
}

impl LoadEngine {
    pub fn new(
        plan: Arc<CompiledPlan>,
        pool: Arc<ClientPool>,
        registry: Arc<FunctionRegistry>,
    ) -> Self {
        Self {
            plan,
            pool,
            registry,
        }
    }

    /// Run the workload to completion (budget exhausted, deadline hit, or
    /// `token` cancelled) and return every recorded outcome.
    ///
    /// Returns [`DodoError::Interrupted`] when the run was cancelled
    /// before a single outcome was recorded.
    pub async fn run(
        &self,
        progress: Arc<dyn ProgressListener>,
        token: CancellationToken,
    ) -> Result<Vec<Outcome>> {
        if self.pool.is_empty() {
            return Err(DodoError::NoUsableClient);
        }

        // Deadline scope: a child token the deadline task cancels, so the
        // caller's token stays untouched and still propagates downward.
        let owns_token = self.plan.duration.is_some();
        let token = match self.plan.duration {
            Some(deadline) => {
                let child = token.child_token();
                let timer = child.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = tokio::time::sleep(deadline) => timer.cancel(),
                        _ = timer.cancelled() => {}
                    }
                });
                child
            }
            None => token,
        };

        let workers = self.plan.effective_dodos();
        let budget = self.plan.request_count;

        let (tx, progress_task) = spawn_progress(budget, Arc::clone(&progress));
        progress.start(
            (budget > 0).then_some(budget),
            &format!("Sending requests with {workers} dodos"),
        );

        let mut handles = Vec::with_capacity(workers as usize);
        for dodo_id in 0..workers {
            let dodo = Dodo {
                id: dodo_id,
                quota: (budget > 0).then(|| worker_quota(budget, workers, dodo_id)),
                plan: Arc::clone(&self.plan),
                pool: Arc::clone(&self.pool),
                registry: Arc::clone(&self.registry),
                token: token.clone(),
                tx: tx.clone(),
            };
            handles.push(tokio::spawn(dodo.run()));
        }
        drop(tx);

        let mut outcomes = Vec::new();
        let mut panic = None;
        for handle in handles {
            match handle.await {
                Ok(buffer) => outcomes.extend(buffer),
                Err(err) if err.is_panic() => panic = Some(err.into_panic()),
                Err(_) => {}
            }
        }

        let cancelled = token.is_cancelled();
        if owns_token {
            // Reap the deadline task; this is our child token, not the
            // caller's.
            token.cancel();
        }
        let _ = progress_task.await;
        progress.finish(panic.is_none() && !cancelled);

        if let Some(payload) = panic {
            std::panic::resume_unwind(payload);
        }
        if cancelled && outcomes.is_empty() {
            return Err(DodoError::Interrupted);
        }
        Ok(outcomes)
    }
}

/// Requests assigned to worker `idx` out of `workers`: the floor-partition
/// of `budget` whose per-worker quotas always sum to the exact budget.
fn worker_quota(budget: u64, workers: u64, idx: u64) -> u64 {
    let next = (u128::from(idx + 1) * u128::from(budget) / u128::from(workers)) as u64;
    let prev = (u128::from(idx) * u128::from(budget) / u128::from(workers)) as u64;
    next - prev
}

/// Increment stream from workers to the progress task. Bounded to the
/// full budget when one is set, so sends can never block a worker.
#[derive(Clone)]
enum IncrementTx {
    Bounded(mpsc::Sender<()>),
    Unbounded(mpsc::UnboundedSender<()>),
}

impl IncrementTx {
    fn send(&self) {
        match self {
            Self::Bounded(tx) => {
                let _ = tx.try_send(());
            }
            Self::Unbounded(tx) => {
                let _ = tx.send(());
            }
        }
    }
}

fn spawn_progress(
    budget: u64,
    progress: Arc<dyn ProgressListener>,
) -> (IncrementTx, JoinHandle<()>) {
    if budget > 0 {
        let (tx, mut rx) = mpsc::channel::<()>(budget as usize);
        let handle = tokio::spawn(async move {
            // Runs until every worker sender is dropped, so increments
            // sent during teardown are still drained.
            while rx.recv().await.is_some() {
                progress.increment(1);
            }
        });
        (IncrementTx::Bounded(tx), handle)
    } else {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let handle = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                progress.increment(1);
            }
        });
        (IncrementTx::Unbounded(tx), handle)
    }
}

/// A single worker.
struct Dodo {
    id: u64,
    /// `None` for open-ended (duration-driven) runs.
    quota: Option<u64>,
    plan: Arc<CompiledPlan>,
    pool: Arc<ClientPool>,
    registry: Arc<FunctionRegistry>,
    token: CancellationToken,
    tx: IncrementTx,
}

impl Dodo {
    async fn run(self) -> Vec<Outcome> {
        let mut factory =
            RequestFactory::new(Arc::clone(&self.plan), Arc::clone(&self.registry), self.id);
        // Client selection draws from its own stream so pool size never
        // perturbs the request-content sequence.
        let mut sel_rng = StdRng::seed_from_u64(
            (self.plan.seed ^ self.id).wrapping_add(0x9E37_79B9_7F4A_7C15),
        );
        let mut cursor = self.pool.cursor(&mut sel_rng);

        let mut outcomes = Vec::with_capacity(self.quota.unwrap_or(0) as usize);
        let mut sent: u64 = 0;

        loop {
            if self.quota.is_some_and(|q| sent >= q) {
                break;
            }
            if self.token.is_cancelled() {
                break;
            }

            let request = factory.next();
            let render_failed = request.render_failed;
            let client = self.pool.client(cursor.next(&mut sel_rng)).clone();
            let started = Instant::now();

            let label = tokio::select! {
                // Aborted by the run context: deliberately not recorded,
                // a cancelled in-flight call is not a latency sample.
                _ = self.token.cancelled() => break,
                result = exchange(client, request, self.plan.timeout) => match result {
                    Ok(status) => status.as_u16().to_string(),
                    Err(ExchangeError::Timeout) => "timeout".to_string(),
                    Err(ExchangeError::Transport(err)) => classify(&err).to_string(),
                },
            };
            let elapsed = started.elapsed();

            let label = if render_failed {
                "template error".to_string()
            } else {
                label
            };
            outcomes.push(Outcome { label, elapsed });
            sent += 1;
            self.tx.send();
        }

        tracing::debug!(dodo = self.id, outcomes = outcomes.len(), "dodo finished");
        outcomes
    }
}

enum ExchangeError {
    Timeout,
    Transport(reqwest::Error),
}

/// One full exchange bounded by an explicit timer: connect, write, read
/// status, drain the body. The timer is raced deliberately; the client's
/// own timeout is not trusted to enforce the bound alone.
async fn exchange(
    client: Client,
    request: MaterializedRequest,
    timeout: Duration,
) -> std::result::Result<StatusCode, ExchangeError> {
    match tokio::time::timeout(timeout, send_and_drain(client, request)).await {
        Err(_) => Err(ExchangeError::Timeout),
        Ok(Ok(status)) => Ok(status),
        Ok(Err(err)) => Err(ExchangeError::Transport(err)),
    }
}

async fn send_and_drain(
    client: Client,
    request: MaterializedRequest,
) -> reqwest::Result<StatusCode> {
    let mut response = client.execute(request.into_reqwest()).await?;
    let status = response.status();
    // Drain in chunks without buffering; an unconsumed body would pin its
    // pooled connection.
    while response.chunk().await?.is_some() {}
    Ok(status)
}

/// Map a transport failure to its canonical outcome label.
fn classify(err: &reqwest::Error) -> &'static str {
    if err.is_timeout() {
        return "timeout";
    }
    if chain_mentions_tls(err) {
        return "tls error";
    }
    if let Some(kind) = io_kind(err) {
        if matches!(
            kind,
            std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::BrokenPipe
        ) {
            return "connection reset";
        }
    }
    if err.is_connect() {
        return "dial error";
    }
    if err.is_body() || err.is_decode() || err.is_request() {
        return "protocol error";
    }
    "unknown error"
}

fn io_kind(err: &reqwest::Error) -> Option<std::io::ErrorKind> {
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        if let Some(io) = inner.downcast_ref::<std::io::Error>() {
            return Some(io.kind());
        }
        source = inner.source();
    }
    None
}

fn chain_mentions_tls(err: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        let text = inner.to_string().to_ascii_lowercase();
        if text.contains("certificate") || text.contains("tls") || text.contains("handshake") {
            return true;
        }
        source = inner.source();
    }
    false
}
