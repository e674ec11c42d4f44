//! Shared persistence queries over the relational tables.
//!
//! Everything here is a plain function over `&rusqlite::Connection`, so the
//! same code serves the sync `Database` (CLI) and the `AsyncDb` background
//! thread (etl workers, api handlers).

use anyhow::Result;
use rand::Rng;
use rusqlite::{Connection, OptionalExtension};

use crate::types::{
    ComponentScores, ExtractionJob, FeatureSnapshot, JobStatus, SnapshotMetrics, WalletAddress,
};

/// Opaque extraction-job token: 32 hex chars.
pub fn new_job_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

// ---- feature snapshots ----

fn snapshot_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FeatureSnapshot> {
    Ok(FeatureSnapshot {
        address: row.get(0)?,
        score_date: row.get(1)?,
        components: ComponentScores {
            activity: row.get(2)?,
            diversification: row.get(3)?,
            risk: row.get(4)?,
            profitability: row.get(5)?,
            stability: row.get(6)?,
        },
        total_score: row.get(7)?,
        metrics: SnapshotMetrics {
            tx_count: row.get(8)?,
            recent_tx_count: row.get(9)?,
            position_count: row.get(10)?,
        },
    })
}

const SNAPSHOT_COLUMNS: &str = "address, score_date, activity_score, diversification_score, \
     risk_score, profitability_score, stability_score, total_score, \
     tx_count, recent_tx_count, position_count";

/// Upsert the `(address, score_date)` snapshot row. Re-running extraction the
/// same day overwrites, so history stays a bounded daily series.
pub fn save_snapshot(conn: &Connection, snapshot: &FeatureSnapshot) -> Result<()> {
    conn.execute(
        "INSERT INTO features_daily
            (address, score_date, activity_score, diversification_score,
             risk_score, profitability_score, stability_score, total_score,
             tx_count, recent_tx_count, position_count, computed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, datetime('now'))
         ON CONFLICT(address, score_date) DO UPDATE SET
            activity_score = excluded.activity_score,
            diversification_score = excluded.diversification_score,
            risk_score = excluded.risk_score,
            profitability_score = excluded.profitability_score,
            stability_score = excluded.stability_score,
            total_score = excluded.total_score,
            tx_count = excluded.tx_count,
            recent_tx_count = excluded.recent_tx_count,
            position_count = excluded.position_count,
            computed_at = datetime('now')",
        rusqlite::params![
            snapshot.address,
            snapshot.score_date,
            snapshot.components.activity,
            snapshot.components.diversification,
            snapshot.components.risk,
            snapshot.components.profitability,
            snapshot.components.stability,
            snapshot.total_score,
            snapshot.metrics.tx_count,
            snapshot.metrics.recent_tx_count,
            snapshot.metrics.position_count,
        ],
    )?;
    Ok(())
}

/// Most recent snapshot for an address, if any.
pub fn latest_snapshot(conn: &Connection, address: &str) -> Result<Option<FeatureSnapshot>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {SNAPSHOT_COLUMNS} FROM features_daily
                 WHERE address = ?1 ORDER BY score_date DESC LIMIT 1"
            ),
            rusqlite::params![address],
            snapshot_from_row,
        )
        .optional()?;
    Ok(row)
}

/// Daily snapshots for an address, most recent first, bounded by what exists
/// within the trailing `days` window. No synthetic padding.
pub fn snapshot_history(conn: &Connection, address: &str, days: u32) -> Result<Vec<FeatureSnapshot>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SNAPSHOT_COLUMNS} FROM features_daily
         WHERE address = ?1 AND score_date >= date('now', '-' || ?2 || ' days')
         ORDER BY score_date DESC"
    ))?;
    let rows = stmt
        .query_map(rusqlite::params![address, days], snapshot_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ---- wallets ----

/// Register or refresh a wallet row. `first_seen` only ever moves earlier,
/// `last_seen` only ever moves later.
pub fn touch_wallet(
    conn: &Connection,
    address: &str,
    first_seen: Option<i64>,
    last_seen: Option<i64>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO wallets (address, first_seen, last_seen, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(address) DO UPDATE SET
            first_seen = MIN(COALESCE(wallets.first_seen, excluded.first_seen), COALESCE(excluded.first_seen, wallets.first_seen)),
            last_seen = MAX(COALESCE(wallets.last_seen, excluded.last_seen), COALESCE(excluded.last_seen, wallets.last_seen)),
            updated_at = datetime('now')",
        rusqlite::params![address, first_seen, last_seen],
    )?;
    Ok(())
}

/// All registered wallet addresses (for the periodic re-score pass).
pub fn list_wallet_addresses(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT address FROM wallets ORDER BY address")?;
    let rows = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ---- extraction jobs ----

fn job_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExtractionJob> {
    let status: String = row.get(2)?;
    let status = JobStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown job status: {status}").into(),
        )
    })?;
    Ok(ExtractionJob {
        id: row.get(0)?,
        address: row.get(1)?,
        status,
        error_message: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

const JOB_COLUMNS: &str = "id, address, status, error_message, created_at, updated_at";

/// Create an extraction job for `address`, or return the already-active one.
///
/// At most one pending/processing job per address exists at a time: a second
/// request while one is active returns the existing job's id instead of
/// spawning a duplicate pipeline (and duplicate provider calls). The bool is
/// true when a new row was inserted.
pub fn create_job(conn: &Connection, address: &WalletAddress) -> Result<(ExtractionJob, bool)> {
    if let Some(active) = find_active_job(conn, address.as_str())? {
        return Ok((active, false));
    }

    let id = new_job_id();
    let job = conn.query_row(
        &format!(
            "INSERT INTO extraction_jobs (id, address) VALUES (?1, ?2)
             RETURNING {JOB_COLUMNS}"
        ),
        rusqlite::params![id, address.as_str()],
        job_from_row,
    )?;
    Ok((job, true))
}

/// Oldest pending/processing job for an address, if any.
pub fn find_active_job(conn: &Connection, address: &str) -> Result<Option<ExtractionJob>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {JOB_COLUMNS} FROM extraction_jobs
                 WHERE address = ?1 AND status IN ('pending', 'processing')
                 ORDER BY created_at, rowid LIMIT 1"
            ),
            rusqlite::params![address],
            job_from_row,
        )
        .optional()?;
    Ok(row)
}

/// Atomically claim the oldest pending job: pending → processing.
///
/// The single UPDATE both selects and transitions the row, so concurrent
/// workers can never claim the same job twice.
pub fn claim_next_pending(conn: &Connection) -> Result<Option<ExtractionJob>> {
    let row = conn
        .query_row(
            &format!(
                "UPDATE extraction_jobs
                 SET status = 'processing', updated_at = datetime('now')
                 WHERE id = (
                     SELECT id FROM extraction_jobs
                     WHERE status = 'pending'
                     ORDER BY created_at, rowid LIMIT 1
                 )
                 RETURNING {JOB_COLUMNS}"
            ),
            [],
            job_from_row,
        )
        .optional()?;
    Ok(row)
}

/// processing → completed. Returns false if the job was not in `processing`
/// (terminal states are never overwritten).
pub fn mark_completed(conn: &Connection, id: &str) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE extraction_jobs
         SET status = 'completed', error_message = NULL, updated_at = datetime('now')
         WHERE id = ?1 AND status = 'processing'",
        rusqlite::params![id],
    )?;
    Ok(changed > 0)
}

/// pending/processing → failed with a short user-safe message. Returns false
/// if the job was already terminal.
pub fn mark_failed(conn: &Connection, id: &str, message: &str) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE extraction_jobs
         SET status = 'failed', error_message = ?2, updated_at = datetime('now')
         WHERE id = ?1 AND status IN ('pending', 'processing')",
        rusqlite::params![id, message],
    )?;
    Ok(changed > 0)
}

/// Flip any job stuck in `processing` longer than `stale_secs` to `failed`.
/// Applied on every job read, so a crashed worker can never leave a job
/// apparently running forever.
fn reap_if_stale(conn: &Connection, id: &str, stale_secs: u64) -> Result<()> {
    conn.execute(
        "UPDATE extraction_jobs
         SET status = 'failed',
             error_message = 'extraction timed out',
             updated_at = datetime('now')
         WHERE id = ?1 AND status = 'processing'
           AND updated_at <= datetime('now', '-' || ?2 || ' seconds')",
        rusqlite::params![id, stale_secs],
    )?;
    Ok(())
}

/// Fetch a job by id with the stale-processing watchdog applied.
pub fn get_job(conn: &Connection, id: &str, stale_secs: u64) -> Result<Option<ExtractionJob>> {
    reap_if_stale(conn, id, stale_secs)?;
    let row = conn
        .query_row(
            &format!("SELECT {JOB_COLUMNS} FROM extraction_jobs WHERE id = ?1"),
            rusqlite::params![id],
            job_from_row,
        )
        .optional()?;
    Ok(row)
}

/// Most recently created job for an address, watchdog applied.
pub fn latest_job_for_address(
    conn: &Connection,
    address: &str,
    stale_secs: u64,
) -> Result<Option<ExtractionJob>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {JOB_COLUMNS} FROM extraction_jobs
                 WHERE address = ?1 ORDER BY created_at DESC, rowid DESC LIMIT 1"
            ),
            rusqlite::params![address],
            job_from_row,
        )
        .optional()?;
    match row {
        Some(job) if job.status == JobStatus::Processing => get_job(conn, &job.id, stale_secs),
        other => Ok(other),
    }
}
