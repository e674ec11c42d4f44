use anyhow::Result;
use serde::Deserialize;
use std::str::FromStr;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub general: General,
    pub database: Database,
    pub chain: Chain,
    pub scoring: Scoring,
    pub jobs: Jobs,
    pub rescore: Rescore,
    pub observability: Observability,
    pub api: Option<Api>,
}

#[derive(Debug, Deserialize)]
pub struct General {
    pub log_level: String,
}

#[derive(Debug, Deserialize)]
pub struct Database {
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct Chain {
    pub rpc_url: String,
    /// Environment variable holding the provider API key. The key itself is
    /// never stored in configuration files.
    pub api_key_env: String,
    pub request_timeout_secs: u64,
    pub rate_limit_delay_ms: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scoring {
    pub weight_activity: f64,
    pub weight_diversification: f64,
    pub weight_risk: f64,
    pub weight_profitability: f64,
    pub weight_stability: f64,
    pub outlier_sigma: f64,
    pub panic_window_hours: u64,
    pub stablecoins: Vec<String>,
    pub high_risk_tokens: Vec<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Jobs {
    pub worker_count: usize,
    pub poll_interval_secs: u64,
    pub job_timeout_secs: u64,
    pub stale_processing_secs: u64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Rescore {
    pub enabled: bool,
    pub interval_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct Observability {
    pub prometheus_port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Api {
    pub host: String,
    pub port: u16,
}

impl Config {
    pub fn load() -> Result<Self> {
        let content = std::fs::read_to_string("config/default.toml")?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }
}

impl FromStr for Config {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_toml_str(s)
    }
}
