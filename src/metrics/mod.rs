//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Nonce allocations and deferrals
//! - Transaction status transitions
//! - Publish failures

use crate::error::{PendingReason, WalletError, WalletResult};
use crate::state::TxStatus;

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_int_counter, register_int_gauge, CounterVec, Encoder,
    IntCounter, IntGauge, TextEncoder,
};
use std::net::SocketAddr;
use tracing::{error, info};

lazy_static! {
    pub static ref NONCE_ALLOCATED: IntCounter = register_int_counter!(
        "wallet_nonce_allocations_total",
        "Total nonces allocated"
    ).unwrap();

    pub static ref NONCE_PENDING: CounterVec = register_counter_vec!(
        "wallet_nonce_pending_total",
        "Allocation attempts deferred, by reason",
        &["reason"]
    ).unwrap();

    pub static ref NONCE_QUERIES_OUTSTANDING: IntGauge = register_int_gauge!(
        "wallet_nonce_queries_outstanding",
        "Network transaction count queries in flight"
    ).unwrap();

    pub static ref TX_STATUS: CounterVec = register_counter_vec!(
        "wallet_transactions_total",
        "Transactions entering each status",
        &["status"]
    ).unwrap();

    pub static ref PUBLISH_FAILURES: IntCounter = register_int_counter!(
        "wallet_publish_failures_total",
        "Total failed transaction broadcasts"
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

    pub async fn run(&self) -> WalletResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| WalletError::Internal(format!("Failed to bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| WalletError::Internal(e.to_string()))
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    render().map_err(|e| {
        error!("Failed to encode metrics: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// Text exposition of every registered metric
pub fn render() -> WalletResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| WalletError::Internal(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| WalletError::Internal(e.to_string()))
}

// Helper functions to record metrics

pub fn record_nonce_allocated() {
    NONCE_ALLOCATED.inc();
}

pub fn record_nonce_pending(reason: PendingReason) {
    NONCE_PENDING.with_label_values(&[reason.as_str()]).inc();
}

pub fn set_outstanding_nonce_queries(count: usize) {
    NONCE_QUERIES_OUTSTANDING.set(count as i64);
}

pub fn record_tx_status(status: TxStatus) {
    TX_STATUS.with_label_values(&[status.as_str()]).inc();
}

pub fn record_publish_failure() {
    PUBLISH_FAILURES.inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_recorded_metrics() {
        record_tx_status(TxStatus::Confirmed);
        record_nonce_pending(PendingReason::AllocationInFlight);

        let text = render().unwrap();
        assert!(text.contains("wallet_transactions_total"));
        assert!(text.contains("status=\"confirmed\""));
        assert!(text.contains("reason=\"allocation_in_flight\""));
    }
}
