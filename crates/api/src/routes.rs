use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

use common::db::AsyncDb;
use common::store;
use common::types::{ExtractionJob, FeatureSnapshot, WalletAddress};

use crate::models::{
    CompareEntry, CompareRequest, CompareResponse, CompareStats, HealthResponse, HistoryQuery,
    MessageResponse,
};

/// Shared application state available to all handlers.
pub struct AppState {
    pub db: AsyncDb,
    /// Watchdog threshold applied when reading job rows.
    pub stale_secs: u64,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/wallets/compare", post(compare))
        .route("/wallets/{address}/score", get(current_score))
        .route("/wallets/{address}/history", get(history))
        .route("/wallets/{address}/extract", post(create_extraction))
        .route("/wallets/{address}/jobs/latest", get(latest_job))
        .route("/jobs/{id}", get(job_status))
        .with_state(state)
}

type ApiError = (StatusCode, Json<MessageResponse>);

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(MessageResponse {
            message: message.into(),
        }),
    )
}

fn not_found(message: impl Into<String>) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(MessageResponse {
            message: message.into(),
        }),
    )
}

fn internal(err: &anyhow::Error) -> ApiError {
    tracing::error!(error = %err, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(MessageResponse {
            message: "internal error".to_string(),
        }),
    )
}

fn parse_address(raw: &str) -> Result<WalletAddress, ApiError> {
    WalletAddress::parse(raw).map_err(|e| bad_request(e.to_string()))
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn current_score(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> Result<Json<FeatureSnapshot>, ApiError> {
    let address = parse_address(&address)?;
    let snapshot = state
        .db
        .call(move |conn| store::latest_snapshot(conn, address.as_str()))
        .await
        .map_err(|e| internal(&e))?;
    snapshot
        .map(Json)
        .ok_or_else(|| not_found("no score snapshot for address"))
}

async fn history(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<FeatureSnapshot>>, ApiError> {
    let address = parse_address(&address)?;
    let days = query.days.unwrap_or(30).min(365);
    let snapshots = state
        .db
        .call(move |conn| store::snapshot_history(conn, address.as_str(), days))
        .await
        .map_err(|e| internal(&e))?;
    Ok(Json(snapshots))
}

async fn compare(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CompareRequest>,
) -> Result<Json<CompareResponse>, ApiError> {
    if !(2..=10).contains(&req.addresses.len()) {
        return Err(bad_request("compare requires between 2 and 10 addresses"));
    }
    let mut addresses = Vec::with_capacity(req.addresses.len());
    for raw in &req.addresses {
        addresses.push(parse_address(raw)?);
    }

    let entries: Vec<CompareEntry> = state
        .db
        .call(move |conn| {
            addresses
                .iter()
                .map(|address| {
                    Ok(CompareEntry {
                        address: address.to_string(),
                        snapshot: store::latest_snapshot(conn, address.as_str())?,
                    })
                })
                .collect()
        })
        .await
        .map_err(|e| internal(&e))?;

    let missing: Vec<String> = entries
        .iter()
        .filter(|e| e.snapshot.is_none())
        .map(|e| e.address.clone())
        .collect();

    let totals: Vec<f64> = entries
        .iter()
        .filter_map(|e| e.snapshot.as_ref().map(|s| s.total_score))
        .collect();
    let stats = (!totals.is_empty()).then(|| CompareStats {
        average_total_score: totals.iter().sum::<f64>() / totals.len() as f64,
        min_total_score: totals.iter().cloned().fold(f64::INFINITY, f64::min),
        max_total_score: totals.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
    });

    Ok(Json(CompareResponse {
        wallets: entries,
        missing,
        stats,
    }))
}

/// Create an extraction job, or return the address's already-active one.
/// 202 for a freshly created job, 200 when an active job was reused.
async fn create_extraction(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> Result<(StatusCode, Json<ExtractionJob>), ApiError> {
    let address = parse_address(&address)?;
    let (job, created) = state
        .db
        .call(move |conn| {
            // Register the wallet up front so the periodic re-score pass
            // covers it even if this first extraction fails.
            store::touch_wallet(conn, address.as_str(), None, None)?;
            store::create_job(conn, &address)
        })
        .await
        .map_err(|e| internal(&e))?;

    let status = if created {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(job)))
}

async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ExtractionJob>, ApiError> {
    let stale_secs = state.stale_secs;
    let job = state
        .db
        .call(move |conn| store::get_job(conn, &id, stale_secs))
        .await
        .map_err(|e| internal(&e))?;
    job.map(Json).ok_or_else(|| not_found("unknown job id"))
}

async fn latest_job(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> Result<Json<ExtractionJob>, ApiError> {
    let address = parse_address(&address)?;
    let stale_secs = state.stale_secs;
    let job = state
        .db
        .call(move |conn| store::latest_job_for_address(conn, address.as_str(), stale_secs))
        .await
        .map_err(|e| internal(&e))?;
    job.map(Json)
        .ok_or_else(|| not_found("no extraction jobs for address"))
}
