use crate::config::ScanConfig;
use crate::input::JobSource;
use crate::output;
use crate::types::{ScanOutcome, ScanResult, ScanSummary, ScanTarget};
use crate::worker::{SharedJobs, Worker};
use anyhow::{Context, Result};
use reqwest::Client;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Scan every target from `source`, streaming results to `sink` until the
/// input is exhausted or the deadline in `config` fires.
///
/// - Runs exactly `config.workers` fetch workers over a shared bounded job queue.
/// - The deadline is the only time bound; it fires the run's cancellation token.
/// - Results completed before cancellation are still written.
pub async fn scan<R, W>(config: ScanConfig, source: JobSource<R>, sink: &mut W) -> Result<ScanSummary>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
{
    scan_with_cancel(config, source, sink, CancellationToken::new()).await
}

/// Variant that accepts a `CancellationToken` to allow external cancellation.
pub async fn scan_with_cancel<R, W>(
    config: ScanConfig,
    source: JobSource<R>,
    sink: &mut W,
    cancel: CancellationToken,
) -> Result<ScanSummary>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
{
    config.validate()?;
    let client = Client::builder()
        .user_agent(config.user_agent.as_str())
        .build()
        .context("failed to build HTTP client")?;

    let stats = ScanStats::default();
    let deadline = run_deadline(Instant::now(), config.timeout);

    let (job_tx, job_rx) = mpsc::channel::<ScanTarget>(config.queue_capacity);
    let (result_tx, result_rx) = mpsc::channel::<ScanResult>(config.queue_capacity);
    let jobs: SharedJobs = Arc::new(Mutex::new(job_rx));

    let mut tasks = JoinSet::new();
    for id in 0..config.workers {
        let worker = Worker {
            id,
            client: client.clone(),
            jobs: jobs.clone(),
            results: result_tx.clone(),
            cancel: cancel.clone(),
            stats: stats.clone(),
        };
        tasks.spawn(worker.run());
    }
    // Only workers hold result senders now, so the queue closes after the last one exits.
    drop(result_tx);
    drop(jobs);
    tasks.spawn(dispatch(source, job_tx, cancel.clone(), stats.clone()));

    info!(
        workers = config.workers,
        timeout = ?config.timeout,
        "scan started"
    );

    let pipeline = drain(result_rx, sink, &stats, tasks);
    tokio::pin!(pipeline);

    // Completion is polled first so it wins a tie with the deadline.
    let outcome = tokio::select! {
        biased;
        res = &mut pipeline => {
            res?;
            ScanOutcome::Completed
        }
        _ = time::sleep_until(deadline) => {
            cancel.cancel();
            ScanOutcome::TimedOut
        }
        _ = cancel.cancelled() => ScanOutcome::Interrupted,
    };

    if outcome != ScanOutcome::Completed {
        match time::timeout(config.shutdown_grace, &mut pipeline).await {
            Ok(res) => res?,
            Err(_) => warn!(
                grace = ?config.shutdown_grace,
                "tasks still running after shutdown grace, aborting"
            ),
        }
    }

    let summary = stats.summary(outcome);
    info!(
        outcome = ?summary.outcome,
        dispatched = summary.dispatched,
        fetched = summary.fetched,
        failed = summary.failed,
        emitted = summary.emitted,
        skipped = summary.skipped,
        "scan finished"
    );
    Ok(summary)
}

/// Deadlines past what `Instant` can represent are clamped to this horizon.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn run_deadline(start: Instant, timeout: Duration) -> Instant {
    start
        .checked_add(timeout)
        .unwrap_or_else(|| start + FAR_FUTURE)
}

/// Feed targets into the job queue until the source ends or the run is cancelled.
/// The queue closes when `jobs` is dropped on return.
async fn dispatch<R>(
    mut source: JobSource<R>,
    jobs: mpsc::Sender<ScanTarget>,
    cancel: CancellationToken,
    stats: ScanStats,
) where
    R: AsyncBufRead + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            target = source.next_target() => target,
        };
        let Some(target) = next else {
            break;
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = jobs.send(target) => {
                if sent.is_err() {
                    // Every worker is gone.
                    break;
                }
                stats.record_dispatch();
            }
        }
    }
    debug!(dispatched = stats.dispatched.load(Ordering::Relaxed), "job queue closed");
}

/// Aggregate results until the result queue closes, then join every task.
/// Dropping this future aborts whatever is left in `tasks`.
async fn drain<W>(
    results: mpsc::Receiver<ScanResult>,
    sink: &mut W,
    stats: &ScanStats,
    mut tasks: JoinSet<()>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let emitted = output::aggregate(results, sink, stats).await?;
    while let Some(joined) = tasks.join_next().await {
        joined.context("scan task panicked")?;
    }
    debug!(emitted, "result stream drained");
    Ok(())
}

/// Run counters shared by the dispatcher, workers and aggregator.
#[derive(Clone, Debug, Default)]
pub struct ScanStats {
    pub dispatched: Arc<AtomicU64>,
    pub fetched: Arc<AtomicU64>,
    pub failed: Arc<AtomicU64>,
    pub emitted: Arc<AtomicU64>,
    pub skipped: Arc<AtomicU64>,
}

impl ScanStats {
    pub fn record_dispatch(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch(&self) {
        self.fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_emit(&self) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skip(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn summary(&self, outcome: ScanOutcome) -> ScanSummary {
        ScanSummary {
            outcome,
            dispatched: self.dispatched.load(Ordering::Relaxed),
            fetched: self.fetched.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            emitted: self.emitted.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}
