//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Chain resolution
//! - Process exits
//! - Readiness polling
//! - Peering attempts

use crate::coordination::PeerDirection;
use crate::error::{MeshError, MeshResult};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, CounterVec, Encoder, Gauge, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Chain metrics
    pub static ref CHAINS_RESOLVED: Gauge = register_gauge!(
        "chainmesh_chains_resolved",
        "Number of chains resolved from the base directory"
    ).unwrap();

    pub static ref PROCESS_EXITS: CounterVec = register_counter_vec!(
        "chainmesh_process_exits_total",
        "Chain process exits by outcome",
        &["chain", "outcome"]
    ).unwrap();

    // Readiness metrics
    pub static ref READINESS_POLLS: CounterVec = register_counter_vec!(
        "chainmesh_readiness_polls_total",
        "Enode queries by result",
        &["chain", "result"]
    ).unwrap();

    pub static ref NODES_READY: Gauge = register_gauge!(
        "chainmesh_nodes_ready",
        "Number of chains that have reported an enode"
    ).unwrap();

    // Peering metrics
    pub static ref PEERING_ATTEMPTS: CounterVec = register_counter_vec!(
        "chainmesh_peering_attempts_total",
        "Pair peering outcomes by final direction and result",
        &["direction", "result"]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> MeshResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            MeshError::Config(format!("cannot bind metrics port {}: {}", self.port, e))
        })?;
        axum::serve(listener, app)
            .await
            .map_err(|e| MeshError::Internal(format!("metrics server failed: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    render().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Encode every registered metric in the text exposition format
pub fn render() -> MeshResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| MeshError::Internal(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| MeshError::Internal(e.to_string()))
}

// Helper functions to record metrics

pub fn record_chains_resolved(count: usize) {
    CHAINS_RESOLVED.set(count as f64);
}

pub fn record_process_exit(chain: &str, outcome: &str) {
    PROCESS_EXITS.with_label_values(&[chain, outcome]).inc();
}

pub fn record_readiness_poll(chain: &str, ready: bool) {
    let result = if ready { "ready" } else { "pending" };
    READINESS_POLLS.with_label_values(&[chain, result]).inc();
}

pub fn record_nodes_ready(count: usize) {
    NODES_READY.set(count as f64);
}

pub fn record_peering(direction: PeerDirection, result: &MeshResult<bool>) {
    let result = match result {
        Ok(true) => "added",
        Ok(false) => "rejected",
        Err(_) => "error",
    };
    let direction = direction.to_string();
    PEERING_ATTEMPTS
        .with_label_values(&[direction.as_str(), result])
        .inc();
}
