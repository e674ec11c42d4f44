use anyhow::Result;
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

pub fn describe() {
    describe_counter!(
        "wallet_health_jobs_total",
        "Extraction jobs finished, labeled by outcome."
    );
    describe_counter!(
        "wallet_health_snapshots_written_total",
        "Daily feature snapshots written."
    );
    describe_counter!(
        "wallet_health_provider_requests_total",
        "Chain provider requests made."
    );
    describe_histogram!(
        "wallet_health_provider_latency_ms",
        "Chain provider request latency in milliseconds."
    );
    describe_histogram!(
        "wallet_health_db_query_latency_ms",
        "SQLite operation latency in milliseconds."
    );
    describe_counter!(
        "wallet_health_db_query_errors_total",
        "SQLite operations that returned an error."
    );
}

pub fn install_prometheus(port: u16) -> Result<PrometheusHandle> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    Ok(PrometheusBuilder::new()
        .with_http_listener(addr)
        .install_recorder()?)
}
