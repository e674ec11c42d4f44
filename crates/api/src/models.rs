use common::types::FeatureSnapshot;
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub days: Option<u32>,
}

#[derive(Deserialize)]
pub struct CompareRequest {
    pub addresses: Vec<String>,
}

/// One compared wallet: its latest snapshot, or `null` when the address has
/// no data yet.
#[derive(Serialize)]
pub struct CompareEntry {
    pub address: String,
    pub snapshot: Option<FeatureSnapshot>,
}

/// Aggregates over the wallets that had data.
#[derive(Serialize)]
pub struct CompareStats {
    pub average_total_score: f64,
    pub min_total_score: f64,
    pub max_total_score: f64,
}

#[derive(Serialize)]
pub struct CompareResponse {
    pub wallets: Vec<CompareEntry>,
    pub missing: Vec<String>,
    /// Absent when no compared wallet has a snapshot.
    pub stats: Option<CompareStats>,
}
