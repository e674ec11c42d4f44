use anyhow::Result;
use rusqlite::Connection;

pub struct Database {
    pub conn: Connection,
}

/// Async database wrapper around `tokio_rusqlite::Connection`.
///
/// All SQLite work runs on a dedicated background thread, keeping the Tokio
/// runtime cooperative. Clone is cheap (shared sender to that thread), and
/// because every write funnels through the single connection, statements from
/// concurrent tasks are serialized by construction.
#[derive(Clone)]
pub struct AsyncDb {
    conn: tokio_rusqlite::Connection,
}

impl AsyncDb {
    /// Open a database at `path`, set PRAGMAs (WAL, foreign keys,
    /// busy_timeout) and run migrations on the background thread.
    ///
    /// Another process (api next to etl, or a stray sqlite3 session) can hold
    /// the write lock during startup; migrations retry with backoff instead
    /// of crash-looping under systemd.
    pub async fn open(path: &str) -> Result<Self> {
        let conn = tokio_rusqlite::Connection::open(path).await?;

        let mut backoff = std::time::Duration::from_secs(1);
        let max_backoff = std::time::Duration::from_secs(30);
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5 * 60);

        loop {
            let res = conn
                .call(|conn| -> std::result::Result<(), rusqlite::Error> {
                    conn.busy_timeout(std::time::Duration::from_secs(1))?;
                    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
                    apply_migrations(conn)?;
                    conn.busy_timeout(std::time::Duration::from_secs(30))?;
                    Ok(())
                })
                .await;

            match res {
                Ok(()) => break,
                Err(tokio_rusqlite::Error::Error(err)) => {
                    let locked = matches!(
                        err,
                        rusqlite::Error::SqliteFailure(
                            rusqlite::ffi::Error {
                                code: rusqlite::ffi::ErrorCode::DatabaseBusy
                                    | rusqlite::ffi::ErrorCode::DatabaseLocked,
                                ..
                            },
                            _,
                        )
                    );
                    if !locked {
                        return Err(anyhow::Error::from(err).context("AsyncDb::open: migration failed"));
                    }
                    if std::time::Instant::now() >= deadline {
                        return Err(anyhow::Error::from(err)
                            .context("AsyncDb::open: database stayed locked too long"));
                    }
                    tracing::warn!(wait_for = ?backoff, "database locked; retrying migrations");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(max_backoff);
                }
                Err(other) => return Err(anyhow::anyhow!("AsyncDb::open: {other}")),
            }
        }

        Ok(Self { conn })
    }

    /// Run a closure on the background SQLite thread and return its result.
    pub async fn call<F, R>(&self, function: F) -> Result<R>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.conn.call(move |conn| function(conn)).await.map_err(
            |e: tokio_rusqlite::Error<anyhow::Error>| match e {
                tokio_rusqlite::Error::ConnectionClosed => {
                    anyhow::anyhow!("database connection closed")
                }
                tokio_rusqlite::Error::Close((_, err)) => {
                    anyhow::anyhow!("database close error: {err}")
                }
                tokio_rusqlite::Error::Error(err) => err,
                other => anyhow::anyhow!("database error: {other}"),
            },
        )
    }

    /// Like [`Self::call`], but records latency/error metrics for the named
    /// operation. Measures full wall-clock time including queueing on the
    /// SQLite thread.
    pub async fn call_named<F, R>(&self, op: &'static str, function: F) -> Result<R>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let start = std::time::Instant::now();
        let res = self.call(function).await;
        let ms = start.elapsed().as_secs_f64() * 1000.0;

        let status = if res.is_ok() { "ok" } else { "err" };
        metrics::histogram!("wallet_health_db_query_latency_ms", "op" => op, "status" => status)
            .record(ms);
        if res.is_err() {
            metrics::counter!("wallet_health_db_query_errors_total", "op" => op).increment(1);
        }

        res
    }
}

impl Database {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        // Retry for up to 30s when another connection holds the write lock.
        conn.busy_timeout(std::time::Duration::from_secs(30))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    pub fn run_migrations(&self) -> Result<()> {
        apply_migrations(&self.conn).map_err(anyhow::Error::from)
    }
}

fn apply_migrations(conn: &Connection) -> std::result::Result<(), rusqlite::Error> {
    migrate_rename_wallet_scores_to_features_daily(conn)?;
    conn.execute_batch(SCHEMA)?;
    migrate_features_daily_metrics_columns(conn)?;
    migrate_transactions_transfer_value(conn)?;
    Ok(())
}

/// Rename table wallet_scores → features_daily (for DBs created before the
/// snapshot metrics landed in the same row).
fn migrate_rename_wallet_scores_to_features_daily(
    conn: &Connection,
) -> std::result::Result<(), rusqlite::Error> {
    let old_exists: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='wallet_scores'",
        [],
        |row| row.get(0),
    )?;
    let new_exists: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='features_daily'",
        [],
        |row| row.get(0),
    )?;
    if old_exists > 0 && new_exists == 0 {
        conn.execute("ALTER TABLE wallet_scores RENAME TO features_daily", [])?;
    }
    Ok(())
}

/// Add snapshot metric columns to features_daily if missing.
fn migrate_features_daily_metrics_columns(
    conn: &Connection,
) -> std::result::Result<(), rusqlite::Error> {
    let required: [(&str, &str); 3] = [
        ("tx_count", "INTEGER NOT NULL DEFAULT 0"),
        ("recent_tx_count", "INTEGER NOT NULL DEFAULT 0"),
        ("position_count", "INTEGER NOT NULL DEFAULT 0"),
    ];
    for (name, ty) in required {
        let has: i64 = conn.query_row(
            "SELECT COUNT(*) FROM pragma_table_info('features_daily') WHERE name=?1",
            rusqlite::params![name],
            |row| row.get(0),
        )?;
        if has == 0 {
            conn.execute(
                &format!("ALTER TABLE features_daily ADD COLUMN {name} {ty}"),
                [],
            )?;
        }
    }
    Ok(())
}

/// Add transfer_value to transactions if missing (used by the risk and
/// stability heuristics).
fn migrate_transactions_transfer_value(
    conn: &Connection,
) -> std::result::Result<(), rusqlite::Error> {
    let has: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info('transactions') WHERE name='transfer_value'",
        [],
        |row| row.get(0),
    )?;
    if has == 0 {
        conn.execute("ALTER TABLE transactions ADD COLUMN transfer_value REAL", [])?;
    }
    Ok(())
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS wallets (
    address TEXT PRIMARY KEY,          -- canonical lowercase 0x + 40 hex
    chain TEXT NOT NULL DEFAULT 'eth_mainnet',
    first_seen INTEGER,                -- unix epoch of earliest known tx; only ever decreases
    last_seen INTEGER,                 -- unix epoch of newest known tx; only ever increases
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS transactions (
    hash TEXT PRIMARY KEY,             -- natural key; re-ingestion upserts
    address TEXT NOT NULL,
    block_number INTEGER,
    timestamp INTEGER NOT NULL,        -- unix epoch
    gas_cost_usd REAL,
    tx_type TEXT,                      -- external, internal, erc20, erc721, erc1155
    contracts_involved TEXT,           -- JSON array of contract addresses
    transfer_value REAL,               -- amount in asset units
    raw_json TEXT,
    ingested_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS positions (
    address TEXT NOT NULL,
    token TEXT NOT NULL,
    protocol TEXT NOT NULL DEFAULT '', -- '' = no protocol (surfaced as NULL upstream)
    balance REAL NOT NULL,
    usd_value REAL,
    observed_at INTEGER NOT NULL,      -- unix epoch; latest observation wins
    raw_json TEXT,
    UNIQUE(address, token, protocol)
);

CREATE TABLE IF NOT EXISTS features_daily (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    address TEXT NOT NULL,
    score_date TEXT NOT NULL,          -- UTC calendar day, %Y-%m-%d
    activity_score REAL NOT NULL,
    diversification_score REAL NOT NULL,
    risk_score REAL NOT NULL,
    profitability_score REAL NOT NULL,
    stability_score REAL NOT NULL,
    total_score REAL NOT NULL,
    tx_count INTEGER NOT NULL DEFAULT 0,
    recent_tx_count INTEGER NOT NULL DEFAULT 0,
    position_count INTEGER NOT NULL DEFAULT 0,
    computed_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(address, score_date)
);

CREATE TABLE IF NOT EXISTS extraction_jobs (
    id TEXT PRIMARY KEY,               -- opaque random token
    address TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',  -- pending, processing, completed, failed
    error_message TEXT,                -- set only when status = 'failed'
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS raw_fetches (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    address TEXT NOT NULL,
    payload_kind TEXT NOT NULL,        -- transactions, positions
    fetched_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
    raw_json TEXT NOT NULL             -- unmodified provider page, append-only
);

CREATE INDEX IF NOT EXISTS idx_transactions_address ON transactions(address);
CREATE INDEX IF NOT EXISTS idx_transactions_address_timestamp ON transactions(address, timestamp);
CREATE INDEX IF NOT EXISTS idx_positions_address ON positions(address);
CREATE INDEX IF NOT EXISTS idx_features_daily_address_date ON features_daily(address, score_date DESC);
CREATE INDEX IF NOT EXISTS idx_extraction_jobs_address_created ON extraction_jobs(address, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_extraction_jobs_status ON extraction_jobs(status);
CREATE INDEX IF NOT EXISTS idx_raw_fetches_address_kind ON raw_fetches(address, payload_kind, fetched_at);
"#;
