//! Extraction job execution: a small worker pool over the DB-backed queue.
//!
//! Jobs live in `extraction_jobs` (see `common::store`), so the queue
//! survives restarts and the api process can enqueue work for this one.
//! Workers claim pending jobs with an atomic UPDATE, run the pipeline under
//! a wall-clock budget, and record the terminal state. Every pipeline error
//! is caught here and mapped to a short user-safe message — callers learn of
//! failures only by polling job status, never via an unhandled fault.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use common::db::AsyncDb;
use common::error::{ArchiveError, ProviderError, ScoreError};
use common::store;
use common::types::{ExtractionJob, WalletAddress};

use crate::features::ScoringParams;
use crate::pipeline::{run_extraction, ChainSource};
use crate::scoring::ScoreWeights;

pub struct JobContext<S> {
    pub db: AsyncDb,
    pub source: Arc<S>,
    pub params: Arc<ScoringParams>,
    pub weights: ScoreWeights,
    /// Wall-clock budget per job; exceeding it fails the job instead of
    /// retrying indefinitely.
    pub job_timeout: Duration,
    /// Fallback poll interval for jobs enqueued by other processes.
    pub poll_interval: Duration,
    pub notify: Arc<Notify>,
}

impl<S> Clone for JobContext<S> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            source: Arc::clone(&self.source),
            params: Arc::clone(&self.params),
            weights: self.weights,
            job_timeout: self.job_timeout,
            poll_interval: self.poll_interval,
            notify: Arc::clone(&self.notify),
        }
    }
}

/// Insert a job for `address` (or return the active one) and wake a worker.
pub async fn enqueue(
    db: &AsyncDb,
    notify: &Notify,
    address: WalletAddress,
) -> Result<(ExtractionJob, bool)> {
    let (job, created) = db
        .call_named("jobs.enqueue", move |conn| store::create_job(conn, &address))
        .await?;
    if created {
        notify.notify_one();
    }
    Ok((job, created))
}

/// Enqueue an extraction job for every known wallet (periodic re-score).
pub async fn enqueue_all_wallets(db: &AsyncDb, notify: &Notify) -> Result<u64> {
    let addresses = db
        .call_named("jobs.list_wallets", |conn| store::list_wallet_addresses(conn))
        .await?;

    let mut enqueued = 0u64;
    for raw in addresses {
        let Ok(address) = WalletAddress::parse(&raw) else {
            tracing::warn!(address = %raw, "skipping wallet with non-canonical address");
            continue;
        };
        let (_, created) = enqueue(db, notify, address).await?;
        if created {
            enqueued += 1;
        }
    }
    tracing::info!(enqueued, "re-score pass enqueued wallets");
    Ok(enqueued)
}

pub fn spawn_workers<S>(ctx: JobContext<S>, count: usize) -> Vec<JoinHandle<()>>
where
    S: ChainSource + Send + Sync + 'static,
{
    (0..count)
        .map(|worker_id| {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                worker_loop(ctx, worker_id).await;
            })
        })
        .collect()
}

async fn worker_loop<S: ChainSource + Send + Sync>(ctx: JobContext<S>, worker_id: usize) {
    loop {
        let claimed = ctx
            .db
            .call_named("jobs.claim", |conn| store::claim_next_pending(conn))
            .await;

        match claimed {
            Ok(Some(job)) => {
                tracing::info!(worker_id, job_id = %job.id, address = %job.address, "extraction job started");
                run_claimed(&ctx, &job).await;
            }
            Ok(None) => {
                // Idle: wake on in-process enqueue, or poll for jobs created
                // by the api process.
                tokio::select! {
                    () = ctx.notify.notified() => {}
                    () = tokio::time::sleep(ctx.poll_interval) => {}
                }
            }
            Err(e) => {
                tracing::error!(worker_id, error = %e, "failed to claim next job");
                tokio::time::sleep(ctx.poll_interval).await;
            }
        }
    }
}

async fn run_claimed<S: ChainSource + Send + Sync>(ctx: &JobContext<S>, job: &ExtractionJob) {
    // Addresses are validated at creation; a malformed row here means the
    // table was touched out of band. Fail the job, don't crash the worker.
    let address = match WalletAddress::parse(&job.address) {
        Ok(a) => a,
        Err(_) => {
            fail_job(ctx, &job.id, "malformed wallet address").await;
            record_outcome("failed");
            return;
        }
    };

    let outcome = tokio::time::timeout(
        ctx.job_timeout,
        run_extraction(&ctx.db, ctx.source.as_ref(), &address, &ctx.params, ctx.weights),
    )
    .await;

    match outcome {
        Err(_elapsed) => {
            tracing::warn!(job_id = %job.id, address = %job.address, "extraction exceeded its time budget");
            fail_job(ctx, &job.id, "extraction timed out").await;
            record_outcome("timeout");
        }
        Ok(Err(error)) => {
            // Detailed cause goes to the log; the job row gets the short
            // categorized message only.
            tracing::error!(job_id = %job.id, address = %job.address, error = ?error, "extraction job failed");
            fail_job(ctx, &job.id, categorize(&error)).await;
            record_outcome("failed");
        }
        Ok(Ok(snapshot)) => {
            let job_id = job.id.clone();
            let marked = ctx
                .db
                .call_named("jobs.complete", move |conn| store::mark_completed(conn, &job_id))
                .await;
            match marked {
                Ok(true) => {
                    tracing::info!(
                        job_id = %job.id,
                        address = %job.address,
                        total_score = snapshot.total_score,
                        "extraction job completed"
                    );
                    record_outcome("completed");
                }
                Ok(false) => {
                    // The watchdog beat us to a terminal state; the snapshot
                    // is still persisted and valid.
                    tracing::warn!(job_id = %job.id, "job already terminal when completing");
                }
                Err(e) => {
                    tracing::error!(job_id = %job.id, error = %e, "failed to record job completion");
                }
            }
        }
    }
}

async fn fail_job<S>(ctx: &JobContext<S>, id: &str, message: &'static str) {
    let job_id = id.to_string();
    let res = ctx
        .db
        .call_named("jobs.fail", move |conn| store::mark_failed(conn, &job_id, message))
        .await;
    if let Err(e) = res {
        tracing::error!(job_id = %id, error = %e, "failed to record job failure");
    }
}

fn record_outcome(outcome: &'static str) {
    metrics::counter!("wallet_health_jobs_total", "outcome" => outcome).increment(1);
}

/// Map a pipeline error to the short user-safe message stored on the job.
fn categorize(error: &anyhow::Error) -> &'static str {
    if let Some(provider) = error.downcast_ref::<ProviderError>() {
        return match provider {
            ProviderError::RateLimited => "chain provider rate limit exceeded",
            ProviderError::Unavailable { .. } | ProviderError::Transport(_) => {
                "chain provider unavailable"
            }
            ProviderError::Request { .. } => "chain provider rejected the request",
            ProviderError::Rpc(_) | ProviderError::Decode(_) => {
                "chain provider returned an invalid response"
            }
        };
    }
    if error.downcast_ref::<ArchiveError>().is_some() {
        return "raw archive write failed";
    }
    if error.downcast_ref::<ScoreError>().is_some() {
        return "internal scoring error";
    }
    "extraction failed"
}
