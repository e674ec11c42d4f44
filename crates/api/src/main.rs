mod models;
mod routes;

use anyhow::Result;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use common::config::{Api, Config};
use common::db::AsyncDb;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    let dispatch = common::observability::build_dispatch("api", &config.general.log_level);
    tracing::dispatcher::set_global_default(dispatch).map_err(anyhow::Error::msg)?;

    let api_cfg = config.api.clone().unwrap_or(Api {
        host: "0.0.0.0".to_string(),
        port: 8080,
    });

    if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = AsyncDb::open(&config.database.path).await?;

    let state = Arc::new(routes::AppState {
        db,
        stale_secs: config.jobs.stale_processing_secs,
    });
    let app = routes::router(state).layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", api_cfg.host, api_cfg.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "wallet_health api listening");
    axum::serve(listener, app).await?;
    Ok(())
}
