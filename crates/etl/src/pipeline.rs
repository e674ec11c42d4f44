//! The extraction pipeline: fetch → archive → normalize → extract → score.
//!
//! Steps run strictly in this order within one run. Every provider page is
//! archived before its rows are derived, so a failure mid-pagination still
//! leaves usable archived data behind.

use anyhow::Result;
use std::time::Instant;

use common::chain::{BalancesPage, ChainClient, TransfersPage};
use common::db::AsyncDb;
use common::error::ProviderError;
use common::store;
use common::types::{FeatureSnapshot, PayloadKind, WalletAddress};

use crate::archive;
use crate::features::{self, ScoringParams};
use crate::ingest;
use crate::scoring::{self, ScoreWeights};

/// Abstraction over the chain-data provider so tests can substitute fakes.
pub trait ChainSource {
    fn fetch_transfers_page(
        &self,
        address: &str,
        page_key: Option<&str>,
    ) -> impl std::future::Future<Output = Result<TransfersPage, ProviderError>> + Send;

    fn fetch_token_balances(
        &self,
        address: &str,
    ) -> impl std::future::Future<Output = Result<BalancesPage, ProviderError>> + Send;
}

impl ChainSource for ChainClient {
    async fn fetch_transfers_page(
        &self,
        address: &str,
        page_key: Option<&str>,
    ) -> Result<TransfersPage, ProviderError> {
        let start = Instant::now();
        let res = ChainClient::fetch_transfers_page(self, address, None, page_key).await;
        record_provider_call("transfers", start, res.is_ok());
        res
    }

    async fn fetch_token_balances(&self, address: &str) -> Result<BalancesPage, ProviderError> {
        let start = Instant::now();
        let res = ChainClient::fetch_token_balances(self, address).await;
        record_provider_call("balances", start, res.is_ok());
        res
    }
}

fn record_provider_call(endpoint: &'static str, start: Instant, ok: bool) {
    let ms = start.elapsed().as_secs_f64() * 1000.0;
    metrics::histogram!("wallet_health_provider_latency_ms", "endpoint" => endpoint).record(ms);
    let status = if ok { "ok" } else { "error" };
    metrics::counter!("wallet_health_provider_requests_total", "endpoint" => endpoint, "status" => status)
        .increment(1);
}

/// Run the full pipeline for one address and return the persisted snapshot.
///
/// Paginates transfers to exhaustion (the cursor is resumable, each page
/// archived then upserted), snapshots token balances the same way, then
/// recomputes the component scores over everything known for the address and
/// upserts today's `features_daily` row.
pub async fn run_extraction<S: ChainSource>(
    db: &AsyncDb,
    source: &S,
    address: &WalletAddress,
    params: &ScoringParams,
    weights: ScoreWeights,
) -> Result<FeatureSnapshot> {
    let mut page_key: Option<String> = None;
    let mut pages = 0u64;
    let mut tx_rows = 0u64;

    loop {
        let page = source
            .fetch_transfers_page(address.as_str(), page_key.as_deref())
            .await?;
        let TransfersPage {
            transfers,
            page_key: next_key,
            raw_body,
        } = page;
        pages += 1;

        let addr = address.clone();
        let written = db
            .call_named("pipeline.ingest_transfers", move |conn| {
                archive::put(conn, addr.as_str(), PayloadKind::Transactions, &raw_body)
                    .map_err(anyhow::Error::from)?;
                ingest::upsert_transfers(conn, addr.as_str(), &transfers)
            })
            .await?;
        tx_rows += written;

        page_key = next_key;
        if page_key.is_none() {
            break;
        }
    }

    let balances = source.fetch_token_balances(address.as_str()).await?;
    let observed_at = chrono::Utc::now().timestamp();
    let addr = address.clone();
    let position_rows = db
        .call_named("pipeline.ingest_balances", move |conn| {
            archive::put(conn, addr.as_str(), PayloadKind::Positions, &balances.raw_body)
                .map_err(anyhow::Error::from)?;
            ingest::upsert_balances(conn, addr.as_str(), &balances.balances, observed_at)
        })
        .await?;

    tracing::info!(
        address = %address,
        pages,
        tx_rows,
        position_rows,
        "fetch and normalization complete"
    );

    let addr = address.clone();
    let params = params.clone();
    let snapshot = db
        .call_named("pipeline.score", move |conn| {
            let txs = ingest::load_transactions(conn, addr.as_str())?;
            let positions = ingest::load_positions(conn, addr.as_str())?;

            let now = chrono::Utc::now();
            let (partial, metrics) = features::extract(&txs, &positions, now.timestamp(), &params);
            let (components, total) =
                scoring::finalize(partial, &weights).map_err(anyhow::Error::from)?;

            let snapshot = FeatureSnapshot {
                address: addr.to_string(),
                score_date: now.format("%Y-%m-%d").to_string(),
                components,
                total_score: total,
                metrics,
            };
            store::save_snapshot(conn, &snapshot)?;

            let first_seen = txs.iter().map(|t| t.timestamp).min();
            let last_seen = txs.iter().map(|t| t.timestamp).max();
            store::touch_wallet(conn, addr.as_str(), first_seen, last_seen)?;

            Ok(snapshot)
        })
        .await?;

    metrics::counter!("wallet_health_snapshots_written_total").increment(1);
    Ok(snapshot)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use common::chain::{RawTokenBalance, RawTransfer};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted provider for pipeline and job tests: serves transfer pages in
    /// order, then balances. `failure_script` entries are consumed one per
    /// call — `Some(err)` fails that call, `None` lets it through; an empty
    /// script always succeeds.
    pub struct FakeChainSource {
        pub transfer_pages: Vec<TransfersPage>,
        pub balances: BalancesPage,
        pub failure_script: Mutex<std::collections::VecDeque<Option<ProviderError>>>,
        pub calls: AtomicUsize,
        pub delay: Option<std::time::Duration>,
    }

    impl FakeChainSource {
        pub fn new(transfer_pages: Vec<TransfersPage>, balances: BalancesPage) -> Self {
            Self {
                transfer_pages,
                balances,
                failure_script: Mutex::new(std::collections::VecDeque::new()),
                calls: AtomicUsize::new(0),
                delay: None,
            }
        }

        pub fn script_failures(
            &self,
            script: impl IntoIterator<Item = Option<ProviderError>>,
        ) {
            self.failure_script.lock().unwrap().extend(script);
        }

        pub fn paged(transfers: Vec<Vec<RawTransfer>>, balances: Vec<RawTokenBalance>) -> Self {
            let last = transfers.len().saturating_sub(1);
            let pages = transfers
                .into_iter()
                .enumerate()
                .map(|(i, batch)| TransfersPage {
                    transfers: batch,
                    page_key: (i < last).then(|| format!("page-{}", i + 1)),
                    raw_body: format!("{{\"page\":{i}}}").into_bytes(),
                })
                .collect();
            Self::new(
                pages,
                BalancesPage {
                    balances,
                    raw_body: b"{\"tokenBalances\":[]}".to_vec(),
                },
            )
        }

        fn next_failure(&self) -> Option<ProviderError> {
            self.failure_script.lock().unwrap().pop_front().flatten()
        }
    }

    impl ChainSource for FakeChainSource {
        async fn fetch_transfers_page(
            &self,
            _address: &str,
            page_key: Option<&str>,
        ) -> Result<TransfersPage, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(err) = self.next_failure() {
                return Err(err);
            }
            let idx = page_key
                .and_then(|k| k.strip_prefix("page-"))
                .and_then(|n| n.parse::<usize>().ok())
                .unwrap_or(0);
            Ok(self.transfer_pages.get(idx).cloned().unwrap_or_default())
        }

        async fn fetch_token_balances(
            &self,
            _address: &str,
        ) -> Result<BalancesPage, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.next_failure() {
                return Err(err);
            }
            Ok(self.balances.clone())
        }
    }
}
