//! Feature extraction: transactions + positions → five component scores.
//!
//! Pure functions of their inputs — no network, no persistence — so every
//! formula is testable with plain fixtures. Each component is clamped to
//! [0, 1] after computation regardless of input magnitude.

use std::collections::HashSet;

use common::types::{PartialComponents, Position, SnapshotMetrics, Transaction};

const DAY_SECS: i64 = 86_400;
const WEEK_SECS: i64 = 7 * DAY_SECS;
const RECENT_WINDOW_DAYS: i64 = 30;
const ANOMALY_WINDOW_DAYS: i64 = 90;
const CONSISTENCY_WEEKS: i64 = 13;
const ACTIVITY_TX_TARGET: f64 = 10.0;
const ACTIVITY_CONTRACT_TARGET: f64 = 5.0;
const DIVERSIFICATION_TOKEN_TARGET: f64 = 10.0;
const PROFITABILITY_TX_TARGET: f64 = 50.0;
const WALLET_AGE_TARGET_DAYS: f64 = 730.0;

/// Heuristic knobs for the risk/stability components. These are operational
/// data (token lists change, thresholds get tuned), so they come from
/// configuration rather than constants.
#[derive(Debug, Clone)]
pub struct ScoringParams {
    pub stablecoins: HashSet<String>,
    pub high_risk_tokens: HashSet<String>,
    pub outlier_sigma: f64,
    pub panic_window_secs: i64,
}

impl ScoringParams {
    pub fn from_config(cfg: &common::config::Scoring) -> Self {
        Self {
            stablecoins: cfg
                .stablecoins
                .iter()
                .map(|t| t.to_ascii_lowercase())
                .collect(),
            high_risk_tokens: cfg
                .high_risk_tokens
                .iter()
                .map(|t| t.to_ascii_lowercase())
                .collect(),
            outlier_sigma: cfg.outlier_sigma,
            panic_window_secs: i64::try_from(cfg.panic_window_hours).unwrap_or(24) * 3_600,
        }
    }
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            stablecoins: HashSet::new(),
            high_risk_tokens: HashSet::new(),
            outlier_sigma: 3.0,
            panic_window_secs: 24 * 3_600,
        }
    }
}

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    (mean, variance.max(0.0).sqrt())
}

/// A position counts as "held" when it has positive USD value; when the
/// provider supplied no pricing, a positive raw balance is the fallback.
fn is_held(position: &Position) -> bool {
    position.usd_value.map_or(position.balance > 0.0, |v| v > 0.0)
}

/// Fraction of total USD value held in `tokens`. Zero when nothing is priced.
fn usd_ratio(positions: &[Position], tokens: &HashSet<String>) -> f64 {
    let total: f64 = positions.iter().filter_map(|p| p.usd_value).sum();
    if total <= 0.0 {
        return 0.0;
    }
    let matched: f64 = positions
        .iter()
        .filter(|p| tokens.contains(&p.token))
        .filter_map(|p| p.usd_value)
        .sum();
    matched / total
}

/// `0.6 * min(recent_tx / 10, 1) + 0.4 * min(unique_contracts_30d / 5, 1)`
pub fn activity_score(txs: &[Transaction], now_epoch: i64) -> f64 {
    let cutoff = now_epoch - RECENT_WINDOW_DAYS * DAY_SECS;
    let recent: Vec<&Transaction> = txs.iter().filter(|t| t.timestamp >= cutoff).collect();
    let contracts: HashSet<&str> = recent
        .iter()
        .flat_map(|t| t.contracts_involved.iter().map(String::as_str))
        .collect();

    clamp01(
        0.6 * (recent.len() as f64 / ACTIVITY_TX_TARGET).min(1.0)
            + 0.4 * (contracts.len() as f64 / ACTIVITY_CONTRACT_TARGET).min(1.0),
    )
}

/// `0.7 * min(unique_tokens_held / 10, 1) + 0.3 * (1 - concentration)` where
/// concentration is the largest single position's share of total USD value.
/// Zero positions means zero diversification, not a free concentration bonus.
pub fn diversification_score(positions: &[Position]) -> f64 {
    let held_count = positions.iter().filter(|p| is_held(p)).count();
    if held_count == 0 {
        return 0.0;
    }

    let values: Vec<f64> = positions
        .iter()
        .filter_map(|p| p.usd_value)
        .filter(|v| *v > 0.0)
        .collect();
    let total: f64 = values.iter().sum();
    let concentration = if total > 0.0 {
        values.iter().cloned().fold(0.0f64, f64::max) / total
    } else {
        0.0
    };

    clamp01(
        0.7 * (held_count as f64 / DIVERSIFICATION_TOKEN_TARGET).min(1.0)
            + 0.3 * (1.0 - concentration),
    )
}

/// Fraction of the trailing 90 days' transactions whose gas cost or transfer
/// value exceeds `mean + sigma * std` of the wallet's own distribution.
pub fn anomalous_tx_ratio(txs: &[Transaction], now_epoch: i64, params: &ScoringParams) -> f64 {
    let cutoff = now_epoch - ANOMALY_WINDOW_DAYS * DAY_SECS;
    let window: Vec<&Transaction> = txs.iter().filter(|t| t.timestamp >= cutoff).collect();
    if window.is_empty() {
        return 0.0;
    }

    let gas: Vec<f64> = window.iter().filter_map(|t| t.gas_cost_usd).collect();
    let values: Vec<f64> = window.iter().filter_map(|t| t.transfer_value).collect();
    let (gas_mean, gas_std) = mean_std(&gas);
    let (value_mean, value_std) = mean_std(&values);

    let anomalous = window
        .iter()
        .filter(|t| {
            let gas_outlier = gas_std > 0.0
                && t.gas_cost_usd
                    .is_some_and(|g| g > gas_mean + params.outlier_sigma * gas_std);
            let value_outlier = value_std > 0.0
                && t.transfer_value
                    .is_some_and(|v| v > value_mean + params.outlier_sigma * value_std);
            gas_outlier || value_outlier
        })
        .count();

    anomalous as f64 / window.len() as f64
}

/// Higher = safer:
/// `clamp(0.5 + 0.4 * stablecoin_ratio - 0.3 * high_risk_ratio - 0.2 * anomalous_ratio, 0, 1)`.
/// With no positions both holding ratios are zero, so only the base term and
/// the anomaly penalty apply.
pub fn risk_score(
    txs: &[Transaction],
    positions: &[Position],
    now_epoch: i64,
    params: &ScoringParams,
) -> f64 {
    let stable_ratio = usd_ratio(positions, &params.stablecoins);
    let risky_ratio = usd_ratio(positions, &params.high_risk_tokens);
    let anomalous = anomalous_tx_ratio(txs, now_epoch, params);
    clamp01(0.5 + 0.4 * stable_ratio - 0.3 * risky_ratio - 0.2 * anomalous)
}

/// Proxy without a price feed:
/// `0.5 * min(tx_count_90d / 50, 1) + 0.5 * consistency`, consistency being
/// the fraction of the last 13 weekly buckets containing at least one
/// transaction.
pub fn profitability_score(txs: &[Transaction], now_epoch: i64) -> f64 {
    let cutoff = now_epoch - ANOMALY_WINDOW_DAYS * DAY_SECS;
    let count_90d = txs.iter().filter(|t| t.timestamp >= cutoff).count();

    let buckets: HashSet<i64> = txs
        .iter()
        .filter(|t| t.timestamp <= now_epoch)
        .map(|t| (now_epoch - t.timestamp) / WEEK_SECS)
        .filter(|w| *w < CONSISTENCY_WEEKS)
        .collect();
    let consistency = buckets.len() as f64 / CONSISTENCY_WEEKS as f64;

    clamp01(0.5 * (count_90d as f64 / PROFITABILITY_TX_TARGET).min(1.0) + 0.5 * consistency)
}

/// Fraction of outgoing transfers that follow an anomalously large transfer
/// of the same wallet within the panic window. A heuristic proxy for
/// panic selling, not a price-based realized-loss calculation.
pub fn panic_sell_ratio(txs: &[Transaction], params: &ScoringParams) -> f64 {
    if txs.is_empty() {
        return 0.0;
    }

    let values: Vec<f64> = txs.iter().filter_map(|t| t.transfer_value).collect();
    let (mean, std) = mean_std(&values);
    if std <= 0.0 {
        return 0.0;
    }
    let threshold = mean + params.outlier_sigma * std;

    let mut sorted: Vec<&Transaction> = txs.iter().collect();
    sorted.sort_by_key(|t| t.timestamp);

    let mut last_spike: Option<i64> = None;
    let mut panic_count = 0usize;
    for tx in sorted {
        if let Some(spike_ts) = last_spike {
            if tx.timestamp > spike_ts && tx.timestamp - spike_ts <= params.panic_window_secs {
                panic_count += 1;
            }
        }
        if tx.transfer_value.is_some_and(|v| v > threshold) {
            last_spike = Some(tx.timestamp);
        }
    }

    panic_count as f64 / txs.len() as f64
}

/// `0.3 * stablecoin_ratio + 0.4 * min(wallet_age_days / 730, 1) + 0.3 * (1 - panic_sell_ratio)`.
pub fn stability_score(
    txs: &[Transaction],
    positions: &[Position],
    now_epoch: i64,
    params: &ScoringParams,
) -> f64 {
    let stable_ratio = usd_ratio(positions, &params.stablecoins);

    let age_days = txs
        .iter()
        .map(|t| t.timestamp)
        .min()
        .map(|first| (now_epoch - first) as f64 / DAY_SECS as f64)
        .unwrap_or(0.0)
        .max(0.0);
    let age_term = (age_days / WALLET_AGE_TARGET_DAYS).min(1.0);

    let panic = panic_sell_ratio(txs, params);

    clamp01(0.3 * stable_ratio + 0.4 * age_term + 0.3 * (1.0 - panic))
}

/// Compute all five components plus the supporting counts. The result is a
/// [`PartialComponents`] so the scoring engine can enforce the all-five
/// invariant at the type level.
pub fn extract(
    txs: &[Transaction],
    positions: &[Position],
    now_epoch: i64,
    params: &ScoringParams,
) -> (PartialComponents, SnapshotMetrics) {
    let components = PartialComponents {
        activity: Some(activity_score(txs, now_epoch)),
        diversification: Some(diversification_score(positions)),
        risk: Some(risk_score(txs, positions, now_epoch, params)),
        profitability: Some(profitability_score(txs, now_epoch)),
        stability: Some(stability_score(txs, positions, now_epoch, params)),
    };

    let recent_cutoff = now_epoch - RECENT_WINDOW_DAYS * DAY_SECS;
    let metrics = SnapshotMetrics {
        tx_count: txs.len() as i64,
        recent_tx_count: txs.iter().filter(|t| t.timestamp >= recent_cutoff).count() as i64,
        position_count: positions.iter().filter(|p| is_held(p)).count() as i64,
    };

    (components, metrics)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_790_000_000;

    fn tx(hash: &str, age_days: i64, contracts: &[&str]) -> Transaction {
        Transaction {
            hash: hash.to_string(),
            address: "0xabc".to_string(),
            block_number: Some(1),
            timestamp: NOW - age_days * DAY_SECS,
            gas_cost_usd: Some(1.0),
            tx_type: Some("erc20".to_string()),
            contracts_involved: contracts.iter().map(|c| (*c).to_string()).collect(),
            transfer_value: Some(10.0),
        }
    }

    fn position(token: &str, usd: Option<f64>) -> Position {
        Position {
            address: "0xabc".to_string(),
            token: token.to_string(),
            protocol: None,
            balance: 1.0,
            usd_value: usd,
            observed_at: NOW,
        }
    }

    fn stable_params() -> ScoringParams {
        ScoringParams {
            stablecoins: ["0xusdc".to_string()].into_iter().collect(),
            high_risk_tokens: ["0xmeme".to_string()].into_iter().collect(),
            ..ScoringParams::default()
        }
    }

    #[test]
    fn test_empty_wallet_is_deterministic_low_score() {
        let params = stable_params();
        let (partial, metrics) = extract(&[], &[], NOW, &params);
        let c = partial.complete().unwrap();

        assert!(c.activity.abs() < f64::EPSILON);
        assert!(c.diversification.abs() < f64::EPSILON);
        assert!(c.profitability.abs() < f64::EPSILON);
        // Risk falls back to its base term only.
        assert!((c.risk - 0.5).abs() < 1e-12);
        // Stability keeps only the panic term: 0.3 * (1 - 0).
        assert!((c.stability - 0.3).abs() < 1e-12);

        assert_eq!(metrics.tx_count, 0);
        assert_eq!(metrics.recent_tx_count, 0);
        assert_eq!(metrics.position_count, 0);
    }

    #[test]
    fn test_activity_saturates_both_terms() {
        // 15 transactions in the last 30 days touching 6 unique contracts:
        // 0.6 * 1 + 0.4 * 1 = 1.0.
        let txs: Vec<Transaction> = (0..15)
            .map(|i| {
                let contract = format!("0xc{}", i % 6);
                tx(&format!("0x{i}"), i % 20, &[contract.as_str()])
            })
            .collect();
        assert!((activity_score(&txs, NOW) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_activity_partial() {
        // 5 recent transactions on one contract: 0.6 * 0.5 + 0.4 * 0.2 = 0.38.
        let txs: Vec<Transaction> = (0..5)
            .map(|i| tx(&format!("0x{i}"), 3, &["0xc1"]))
            .collect();
        assert!((activity_score(&txs, NOW) - 0.38).abs() < 1e-9);
    }

    #[test]
    fn test_activity_ignores_old_transactions() {
        let txs: Vec<Transaction> = (0..50)
            .map(|i| tx(&format!("0x{i}"), 60 + i, &["0xc1"]))
            .collect();
        assert!(activity_score(&txs, NOW).abs() < f64::EPSILON);
    }

    #[test]
    fn test_diversification_zero_positions() {
        assert!(diversification_score(&[]).abs() < f64::EPSILON);
    }

    #[test]
    fn test_diversification_single_position_fully_concentrated() {
        // One token with all the value: 0.7 * 0.1 + 0.3 * (1 - 1) = 0.07.
        let positions = vec![position("0xa", Some(100.0))];
        assert!((diversification_score(&positions) - 0.07).abs() < 1e-9);
    }

    #[test]
    fn test_diversification_spread_positions() {
        // 10 equal tokens: 0.7 * 1.0 + 0.3 * (1 - 0.1) = 0.97.
        let positions: Vec<Position> = (0..10)
            .map(|i| position(&format!("0x{i}"), Some(50.0)))
            .collect();
        assert!((diversification_score(&positions) - 0.97).abs() < 1e-9);
    }

    #[test]
    fn test_diversification_unpriced_balances_count_as_held() {
        let positions: Vec<Position> = (0..4)
            .map(|i| position(&format!("0x{i}"), None))
            .collect();
        // 4 held tokens, no pricing: 0.7 * 0.4 + 0.3 * 1.0.
        assert!((diversification_score(&positions) - 0.58).abs() < 1e-9);
    }

    #[test]
    fn test_risk_stablecoin_heavy_wallet_scores_safer() {
        let params = stable_params();
        let positions = vec![
            position("0xusdc", Some(900.0)),
            position("0xother", Some(100.0)),
        ];
        let score = risk_score(&[], &positions, NOW, &params);
        // 0.5 + 0.4 * 0.9 = 0.86.
        assert!((score - 0.86).abs() < 1e-9);
    }

    #[test]
    fn test_risk_meme_heavy_wallet_scores_riskier() {
        let params = stable_params();
        let positions = vec![
            position("0xmeme", Some(900.0)),
            position("0xother", Some(100.0)),
        ];
        let score = risk_score(&[], &positions, NOW, &params);
        // 0.5 - 0.3 * 0.9 = 0.23.
        assert!((score - 0.23).abs() < 1e-9);
    }

    #[test]
    fn test_anomalous_ratio_flags_outliers() {
        let params = ScoringParams::default();
        let mut txs: Vec<Transaction> = (0..50)
            .map(|i| tx(&format!("0x{i}"), i % 80, &[]))
            .collect();
        // One wildly oversized transfer inside the 90-day window.
        txs.push(Transaction {
            transfer_value: Some(100_000.0),
            ..tx("0xwhale", 5, &[])
        });
        let ratio = anomalous_tx_ratio(&txs, NOW, &params);
        assert!(ratio > 0.0);
        assert!(ratio < 0.1);
    }

    #[test]
    fn test_anomalous_ratio_uniform_values_is_zero() {
        let params = ScoringParams::default();
        let txs: Vec<Transaction> = (0..20).map(|i| tx(&format!("0x{i}"), 1, &[])).collect();
        assert!(anomalous_tx_ratio(&txs, NOW, &params).abs() < f64::EPSILON);
    }

    #[test]
    fn test_profitability_zero_transactions() {
        assert!(profitability_score(&[], NOW).abs() < f64::EPSILON);
    }

    #[test]
    fn test_profitability_consistent_weekly_activity() {
        // One tx in each of the last 13 weeks, 13 total in 90 days:
        // 0.5 * (13/50) + 0.5 * 1.0 = 0.63.
        let txs: Vec<Transaction> = (0..13)
            .map(|week| tx(&format!("0x{week}"), week * 7 + 1, &[]))
            .collect();
        assert!((profitability_score(&txs, NOW) - 0.63).abs() < 1e-9);
    }

    #[test]
    fn test_profitability_saturates_on_volume() {
        // 60 txs all in the last week: volume term saturates, one bucket of 13.
        let txs: Vec<Transaction> = (0..60).map(|i| tx(&format!("0x{i}"), 0, &[])).collect();
        let expected = 0.5 + 0.5 * (1.0 / 13.0);
        assert!((profitability_score(&txs, NOW) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_panic_sell_ratio_counts_sells_after_spike() {
        let params = ScoringParams::default();
        let mut txs: Vec<Transaction> = (0..30)
            .map(|i| {
                let mut t = tx(&format!("0x{i}"), 0, &[]);
                t.timestamp = NOW - 80 * DAY_SECS + i * DAY_SECS; // spread out
                t
            })
            .collect();
        // A huge transfer, then two transfers within 24h of it.
        let spike_ts = NOW - 10 * DAY_SECS;
        txs.push(Transaction {
            timestamp: spike_ts,
            transfer_value: Some(1_000_000.0),
            ..tx("0xspike", 0, &[])
        });
        txs.push(Transaction {
            timestamp: spike_ts + 3_600,
            ..tx("0xpanic1", 0, &[])
        });
        txs.push(Transaction {
            timestamp: spike_ts + 7_200,
            ..tx("0xpanic2", 0, &[])
        });

        let ratio = panic_sell_ratio(&txs, &params);
        assert!((ratio - 2.0 / 33.0).abs() < 1e-9);
    }

    #[test]
    fn test_panic_sell_ratio_no_spike_is_zero() {
        let params = ScoringParams::default();
        let txs: Vec<Transaction> = (0..10).map(|i| tx(&format!("0x{i}"), i, &[])).collect();
        assert!(panic_sell_ratio(&txs, &params).abs() < f64::EPSILON);
    }

    #[test]
    fn test_stability_old_wallet_with_stables() {
        let params = stable_params();
        let txs = vec![tx("0xold", 800, &[])]; // older than the 730-day target
        let positions = vec![position("0xusdc", Some(100.0))];
        let score = stability_score(&txs, &positions, NOW, &params);
        // 0.3 * 1.0 + 0.4 * 1.0 + 0.3 * 1.0 = 1.0.
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_all_components_clamped_under_pathological_inputs() {
        let params = stable_params();
        // 10,000 transactions with huge values and ancient history.
        let txs: Vec<Transaction> = (0..10_000)
            .map(|i| {
                let mut t = tx(&format!("0x{i}"), i % 2_000, &["0xc1", "0xc2", "0xc3"]);
                t.transfer_value = Some(1e18);
                t.gas_cost_usd = Some(1e9);
                t
            })
            .collect();
        let positions: Vec<Position> = (0..500)
            .map(|i| position(&format!("0x{i}"), Some(1e12)))
            .collect();

        let (partial, _) = extract(&txs, &positions, NOW, &params);
        let c = partial.complete().unwrap();
        for score in [
            c.activity,
            c.diversification,
            c.risk,
            c.profitability,
            c.stability,
        ] {
            assert!((0.0..=1.0).contains(&score), "score out of range: {score}");
        }

        // And the degenerate opposite: zero of everything.
        let (partial, _) = extract(&[], &[], NOW, &params);
        let c = partial.complete().unwrap();
        for score in [
            c.activity,
            c.diversification,
            c.risk,
            c.profitability,
            c.stability,
        ] {
            assert!((0.0..=1.0).contains(&score));
        }
    }

    #[test]
    fn test_metrics_counts() {
        let params = ScoringParams::default();
        let txs = vec![
            tx("0xr1", 5, &[]),
            tx("0xr2", 10, &[]),
            tx("0xold", 100, &[]),
        ];
        let positions = vec![position("0xa", Some(5.0)), position("0xb", Some(0.0))];
        let (_, metrics) = extract(&txs, &positions, NOW, &params);
        assert_eq!(metrics.tx_count, 3);
        assert_eq!(metrics.recent_tx_count, 2);
        assert_eq!(metrics.position_count, 1);
    }
}
