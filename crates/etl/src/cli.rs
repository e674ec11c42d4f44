use anyhow::Result;
use common::db::Database;
use common::store;
use common::types::WalletAddress;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run,
    Wallets,
    Wallet { address: String },
    Jobs,
    Seed { addresses: Vec<String> },
    Score { address: String },
}

pub fn parse_args<I>(mut args: I) -> std::result::Result<Command, String>
where
    I: Iterator<Item = String>,
{
    // Drop argv[0].
    let _ = args.next();

    let Some(cmd) = args.next() else {
        return Ok(Command::Run);
    };

    match cmd.as_str() {
        "run" => Ok(Command::Run),
        "wallets" => Ok(Command::Wallets),
        "wallet" => {
            let address = args
                .next()
                .ok_or_else(|| "usage: etl wallet <address>".to_string())?;
            Ok(Command::Wallet { address })
        }
        "jobs" => Ok(Command::Jobs),
        "seed" => {
            let addresses: Vec<String> = args.collect();
            if addresses.is_empty() {
                return Err("usage: etl seed <address>...".to_string());
            }
            Ok(Command::Seed { addresses })
        }
        "score" => {
            let address = args
                .next()
                .ok_or_else(|| "usage: etl score <address>".to_string())?;
            Ok(Command::Score { address })
        }
        other => Err(format!("unknown command: {other}")),
    }
}

pub fn run_command(db: &Database, cmd: Command) -> Result<()> {
    match cmd {
        Command::Run | Command::Score { .. } => Ok(()), // handled in main
        Command::Wallets => show_wallets(db),
        Command::Wallet { address } => show_wallet(db, &address),
        Command::Jobs => show_jobs(db),
        Command::Seed { addresses } => seed_wallets(db, &addresses),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WalletRow {
    pub address: String,
    pub first_seen: Option<i64>,
    pub last_seen: Option<i64>,
    pub latest_score: Option<f64>,
}

pub fn query_wallets(db: &Database) -> Result<Vec<WalletRow>> {
    let mut stmt = db.conn.prepare(
        r"
        SELECT w.address, w.first_seen, w.last_seen,
               (SELECT total_score FROM features_daily f
                WHERE f.address = w.address
                ORDER BY f.score_date DESC LIMIT 1)
        FROM wallets w
        ORDER BY w.address
        LIMIT 200
        ",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(WalletRow {
            address: row.get(0)?,
            first_seen: row.get(1)?,
            last_seen: row.get(2)?,
            latest_score: row.get(3)?,
        })
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

fn show_wallets(db: &Database) -> Result<()> {
    println!("Known wallets:");
    for r in query_wallets(db)? {
        println!(
            "{}  first_seen={:?}  last_seen={:?}  score={:?}",
            r.address, r.first_seen, r.last_seen, r.latest_score
        );
    }
    Ok(())
}

fn show_wallet(db: &Database, address: &str) -> Result<()> {
    println!("Wallet: {address}");

    match store::latest_snapshot(&db.conn, address)? {
        Some(snapshot) => {
            println!(
                "  {}  total={:.4}  activity={:.4} diversification={:.4} risk={:.4} profitability={:.4} stability={:.4}",
                snapshot.score_date,
                snapshot.total_score,
                snapshot.components.activity,
                snapshot.components.diversification,
                snapshot.components.risk,
                snapshot.components.profitability,
                snapshot.components.stability,
            );
            println!(
                "  tx_count={}  recent_tx_count={}  position_count={}",
                snapshot.metrics.tx_count,
                snapshot.metrics.recent_tx_count,
                snapshot.metrics.position_count
            );
        }
        None => println!("  (no snapshot yet)"),
    }

    match store::latest_job_for_address(&db.conn, address, 300)? {
        Some(job) => println!(
            "  latest job: {}  status={}  error={:?}",
            job.id,
            job.status.as_str(),
            job.error_message
        ),
        None => println!("  (no jobs yet)"),
    }

    Ok(())
}

fn show_jobs(db: &Database) -> Result<()> {
    let mut stmt = db.conn.prepare(
        r"
        SELECT id, address, status, error_message, created_at
        FROM extraction_jobs
        ORDER BY created_at DESC, rowid DESC
        LIMIT 20
        ",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, Option<String>>(3)?,
            row.get::<_, String>(4)?,
        ))
    })?;

    println!("Recent extraction jobs:");
    for r in rows {
        let (id, address, status, error, created_at) = r?;
        println!("{created_at}  {status:<10}  {id}  {address}  {error:?}");
    }
    Ok(())
}

fn seed_wallets(db: &Database, addresses: &[String]) -> Result<()> {
    for raw in addresses {
        let address = match WalletAddress::parse(raw) {
            Ok(a) => a,
            Err(e) => {
                eprintln!("skipping {raw}: {e}");
                continue;
            }
        };
        store::touch_wallet(&db.conn, address.as_str(), None, None)?;
        let (job, created) = store::create_job(&db.conn, &address)?;
        if created {
            println!("{address}  job={} (pending)", job.id);
        } else {
            println!("{address}  job={} (already active)", job.id);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        let db = Database::open(":memory:").unwrap();
        db.run_migrations().unwrap();
        db
    }

    #[test]
    fn test_parse_args_defaults_to_run() {
        let cmd = parse_args(vec!["etl".to_string()].into_iter()).unwrap();
        assert_eq!(cmd, Command::Run);
    }

    #[test]
    fn test_parse_score_command() {
        let cmd = parse_args(
            vec!["etl".to_string(), "score".to_string(), "0xabc".to_string()].into_iter(),
        )
        .unwrap();
        assert_eq!(
            cmd,
            Command::Score {
                address: "0xabc".to_string()
            }
        );
    }

    #[test]
    fn test_parse_seed_requires_addresses() {
        let err = parse_args(vec!["etl".to_string(), "seed".to_string()].into_iter()).unwrap_err();
        assert!(err.contains("usage"));
    }

    #[test]
    fn test_parse_unknown_command() {
        let err = parse_args(vec!["etl".to_string(), "bogus".to_string()].into_iter()).unwrap_err();
        assert!(err.contains("unknown command"));
    }

    #[test]
    fn test_seed_creates_wallets_and_jobs() {
        let db = test_db();
        seed_wallets(
            &db,
            &[
                "0x1111111111111111111111111111111111111111".to_string(),
                "not-an-address".to_string(),
            ],
        )
        .unwrap();

        let wallets: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM wallets", [], |r| r.get(0))
            .unwrap();
        let jobs: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM extraction_jobs", [], |r| r.get(0))
            .unwrap();
        assert_eq!(wallets, 1); // invalid address skipped
        assert_eq!(jobs, 1);
    }

    #[test]
    fn test_query_wallets_includes_latest_score() {
        let db = test_db();
        store::touch_wallet(&db.conn, "0xabc", Some(1_000), Some(2_000)).unwrap();
        db.conn
            .execute(
                "INSERT INTO features_daily
                    (address, score_date, activity_score, diversification_score,
                     risk_score, profitability_score, stability_score, total_score)
                 VALUES ('0xabc', '2026-08-06', 0, 0, 0.5, 0, 0.3, 0.16)",
                [],
            )
            .unwrap();

        let rows = query_wallets(&db).unwrap();
        assert_eq!(rows.len(), 1);
        assert!((rows[0].latest_score.unwrap() - 0.16).abs() < 1e-12);
    }
}
