//! # Prometheus Metrics
//!
//! Exposes operational metrics for the node. Scraped by Prometheus at the
//! `/metrics` HTTP endpoint on the configured metrics port.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] with
//! the `microchain` prefix so they do not collide with the default global
//! registry.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

use microchain_protocol::network::NodeStatus;

/// Holds every Prometheus metric handle for the node.
///
/// Clone-friendly: prometheus handles are reference counted, so clones
/// update the same series.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Peers in the routing table.
    pub peers: IntGauge,
    /// Confirmed transactions waiting in the pool.
    pub transactions_in_pool: IntGauge,
    /// Transactions waiting for our counter-signature.
    pub pending_transactions: IntGauge,
    /// Blocks in the local chain.
    pub blocks: IntGauge,
    /// Accepted count of the chain tip tally.
    pub chain_accepted: IntGauge,
    /// Rejected count of the chain tip tally.
    pub chain_rejected: IntGauge,
    /// Pending transactions confirmed through the API.
    pub confirmations_total: IntCounter,
    /// Pending transactions rejected through the API.
    pub rejections_total: IntCounter,
    /// Transactions sent to peers through the API, genesis included.
    pub transactions_sent_total: IntCounter,
    /// Blocks sealed by this node.
    pub blocks_sealed_total: IntCounter,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("microchain".into()), None)?;

        let peers = gauge(&registry, "peers", "Peers in the routing table")?;
        let transactions_in_pool = gauge(
            &registry,
            "transactions_in_pool",
            "Confirmed transactions held in the transaction pool",
        )?;
        let pending_transactions = gauge(
            &registry,
            "pending_transactions",
            "Transactions awaiting this node's counter-signature",
        )?;
        let blocks = gauge(&registry, "blocks", "Blocks in the local chain")?;
        let chain_accepted = gauge(
            &registry,
            "chain_accepted",
            "Accepted transactions in the chain tip tally",
        )?;
        let chain_rejected = gauge(
            &registry,
            "chain_rejected",
            "Rejected transactions in the chain tip tally",
        )?;

        let confirmations_total = counter(
            &registry,
            "confirmations_total",
            "Pending transactions confirmed through the admin API",
        )?;
        let rejections_total = counter(
            &registry,
            "rejections_total",
            "Pending transactions rejected through the admin API",
        )?;
        let transactions_sent_total = counter(
            &registry,
            "transactions_sent_total",
            "Transactions sent through the admin API",
        )?;
        let blocks_sealed_total =
            counter(&registry, "blocks_sealed_total", "Blocks sealed by this node")?;

        Ok(Self {
            registry,
            peers,
            transactions_in_pool,
            pending_transactions,
            blocks,
            chain_accepted,
            chain_rejected,
            confirmations_total,
            rejections_total,
            transactions_sent_total,
            blocks_sealed_total,
        })
    }

    /// Copies the gauges from a status snapshot.
    pub fn observe(&self, status: &NodeStatus) {
        self.peers.set(to_i64(status.peers as u64));
        self.transactions_in_pool.set(to_i64(status.transactions as u64));
        self.pending_transactions.set(to_i64(status.pendings as u64));
        self.blocks.set(to_i64(status.blocks));
        self.chain_accepted.set(to_i64(status.accepted));
        self.chain_rejected.set(to_i64(status.rejected));
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGauge, prometheus::Error> {
    let gauge = IntGauge::new(name, help)?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, prometheus::Error> {
    let counter = IntCounter::new(name, help)?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

fn to_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

pub type SharedMetrics = Arc<NodeMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(State(metrics): State<SharedMetrics>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
