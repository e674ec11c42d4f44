use serde::{Deserialize, Serialize};

use crate::error::{AddressError, ScoreError};

/// Canonical wallet address: lowercase `0x` + 40 hex characters.
///
/// All ingestion paths go through [`WalletAddress::parse`], so every address
/// in the database is already canonical and string comparison is exact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct WalletAddress(String);

impl WalletAddress {
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        let trimmed = raw.trim();
        let hex_part = trimmed.strip_prefix("0x").ok_or(AddressError)?;
        if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AddressError);
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a raw archive record holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Transactions,
    Positions,
}

impl PayloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transactions => "transactions",
            Self::Positions => "positions",
        }
    }
}

/// A normalized on-chain transaction, keyed by its hash.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub hash: String,
    pub address: String,
    pub block_number: Option<i64>,
    /// Unix epoch seconds.
    pub timestamp: i64,
    pub gas_cost_usd: Option<f64>,
    pub tx_type: Option<String>,
    pub contracts_involved: Vec<String>,
    /// Transfer amount in asset units; approximates USD for stablecoins.
    pub transfer_value: Option<f64>,
}

/// Current-state token position. Latest observation overwrites prior ones.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub address: String,
    pub token: String,
    pub protocol: Option<String>,
    pub balance: f64,
    pub usd_value: Option<f64>,
    /// Unix epoch seconds of the observation.
    pub observed_at: i64,
}

/// The five normalized component scores, each guaranteed in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentScores {
    pub activity: f64,
    pub diversification: f64,
    pub risk: f64,
    pub profitability: f64,
    pub stability: f64,
}

/// Component scores under construction. The scoring engine refuses to
/// compute a total until all five are present — a missing component is a
/// bug, never silently defaulted.
#[derive(Debug, Clone, Copy, Default)]
pub struct PartialComponents {
    pub activity: Option<f64>,
    pub diversification: Option<f64>,
    pub risk: Option<f64>,
    pub profitability: Option<f64>,
    pub stability: Option<f64>,
}

impl PartialComponents {
    pub fn complete(self) -> Result<ComponentScores, ScoreError> {
        Ok(ComponentScores {
            activity: self
                .activity
                .ok_or(ScoreError::IncompleteComponents("activity"))?,
            diversification: self
                .diversification
                .ok_or(ScoreError::IncompleteComponents("diversification"))?,
            risk: self.risk.ok_or(ScoreError::IncompleteComponents("risk"))?,
            profitability: self
                .profitability
                .ok_or(ScoreError::IncompleteComponents("profitability"))?,
            stability: self
                .stability
                .ok_or(ScoreError::IncompleteComponents("stability"))?,
        })
    }
}

/// Supporting counts persisted next to the scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetrics {
    pub tx_count: i64,
    pub recent_tx_count: i64,
    pub position_count: i64,
}

/// One persisted daily score record, keyed `(address, score_date)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureSnapshot {
    pub address: String,
    /// UTC calendar day, `%Y-%m-%d`.
    pub score_date: String,
    pub components: ComponentScores,
    pub total_score: f64,
    pub metrics: SnapshotMetrics,
}

/// Closed job lifecycle. `Completed` and `Failed` are terminal; no code path
/// transitions out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

/// One on-demand extraction run for one address.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionJob {
    pub id: String,
    pub address: String,
    pub status: JobStatus,
    /// Set only in the `Failed` state; always a short user-safe description.
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_canonicalized_to_lowercase() {
        let addr = WalletAddress::parse("0xA0B86991C6218B36c1d19D4a2e9Eb0cE3606eB48").unwrap();
        assert_eq!(addr.as_str(), "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48");
    }

    #[test]
    fn test_address_rejects_bad_input() {
        assert!(WalletAddress::parse("").is_err());
        assert!(WalletAddress::parse("0x1234").is_err());
        assert!(WalletAddress::parse("a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48").is_err());
        assert!(WalletAddress::parse("0xzzzz6991c6218b36c1d19d4a2e9eb0ce3606eb48").is_err());
    }

    #[test]
    fn test_partial_components_complete() {
        let partial = PartialComponents {
            activity: Some(0.5),
            diversification: Some(0.2),
            risk: Some(0.5),
            profitability: Some(0.1),
            stability: Some(0.3),
        };
        let scores = partial.complete().unwrap();
        assert!((scores.activity - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_partial_components_missing_is_error() {
        let partial = PartialComponents {
            activity: Some(0.5),
            diversification: Some(0.2),
            risk: None,
            profitability: Some(0.1),
            stability: Some(0.3),
        };
        let err = partial.complete().unwrap_err();
        assert!(err.to_string().contains("risk"));
    }

    #[test]
    fn test_job_status_round_trip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("running"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Pending.is_active());
        assert!(JobStatus::Processing.is_active());
    }
}
