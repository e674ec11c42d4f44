use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

mod archive;
mod cli;
mod features;
mod ingest;
mod jobs;
mod metrics;
mod pipeline;
mod scheduler;
mod scoring;

use common::chain::ChainClient;
use common::config::Config;
use common::db::{AsyncDb, Database};
use common::types::WalletAddress;
use features::ScoringParams;
use scoring::ScoreWeights;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    let dispatch = common::observability::build_dispatch("etl", &config.general.log_level);
    tracing::dispatcher::set_global_default(dispatch).map_err(anyhow::Error::msg)?;

    tracing::info!("wallet_health etl starting");

    if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    let cmd = cli::parse_args(std::env::args()).map_err(anyhow::Error::msg)?;
    match cmd {
        cli::Command::Run => {}
        cli::Command::Score { address } => {
            return score_once(&config, &address).await;
        }
        other => {
            // Inspection/seed commands use the sync Database and exit.
            let db = Database::open(&config.database.path)?;
            db.run_migrations()?;
            cli::run_command(&db, other)?;
            return Ok(());
        }
    }

    metrics::install_prometheus(config.observability.prometheus_port)?;
    metrics::describe();

    let db = AsyncDb::open(&config.database.path).await?;
    let cfg = Arc::new(config);
    let notify = Arc::new(tokio::sync::Notify::new());

    let ctx = jobs::JobContext {
        db: db.clone(),
        source: Arc::new(chain_client(&cfg)),
        params: Arc::new(ScoringParams::from_config(&cfg.scoring)),
        weights: ScoreWeights::from_config(&cfg.scoring),
        job_timeout: Duration::from_secs(cfg.jobs.job_timeout_secs),
        poll_interval: Duration::from_secs(cfg.jobs.poll_interval_secs),
        notify: Arc::clone(&notify),
    };
    let _workers = jobs::spawn_workers(ctx, cfg.jobs.worker_count);
    tracing::info!(worker_count = cfg.jobs.worker_count, "extraction workers started");

    if cfg.rescore.enabled {
        let (tick_tx, mut tick_rx) = tokio::sync::mpsc::channel::<()>(8);
        let _scheduler = scheduler::start(vec![scheduler::JobSpec {
            name: "daily_rescore".to_string(),
            interval: Duration::from_secs(cfg.rescore.interval_secs),
            tick: tick_tx,
        }]);

        let rescore_db = db.clone();
        let rescore_notify = Arc::clone(&notify);
        tokio::spawn(async move {
            while tick_rx.recv().await.is_some() {
                if let Err(e) = jobs::enqueue_all_wallets(&rescore_db, &rescore_notify).await {
                    tracing::warn!(error = %e, "re-score pass failed");
                }
            }
        });
        tracing::info!(
            interval_secs = cfg.rescore.interval_secs,
            "daily re-score scheduler started"
        );
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    Ok(())
}

fn chain_client(cfg: &Config) -> ChainClient {
    let api_key = std::env::var(&cfg.chain.api_key_env).unwrap_or_default();
    if api_key.is_empty() {
        tracing::warn!(
            var = %cfg.chain.api_key_env,
            "provider API key env var not set; provider calls will fail"
        );
    }
    ChainClient::new(
        &cfg.chain.rpc_url,
        &api_key,
        Duration::from_secs(cfg.chain.request_timeout_secs),
        Duration::from_millis(cfg.chain.rate_limit_delay_ms),
        cfg.chain.max_attempts,
        Duration::from_millis(cfg.chain.backoff_base_ms),
    )
}

/// `etl score <address>`: run one extraction inline and print the snapshot.
async fn score_once(config: &Config, raw_address: &str) -> Result<()> {
    let address = WalletAddress::parse(raw_address).map_err(anyhow::Error::from)?;
    let db = AsyncDb::open(&config.database.path).await?;
    let source = chain_client(config);
    let params = ScoringParams::from_config(&config.scoring);
    let weights = ScoreWeights::from_config(&config.scoring);

    let snapshot = pipeline::run_extraction(&db, &source, &address, &params, weights).await?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
