//! Prometheus metrics for pattern server replicas and clients.

use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Arc;

/// Cluster-specific Prometheus metrics.
#[derive(Clone)]
pub struct ClusterMetrics {
    registry: Arc<Registry>,
    /// Chunks currently served by this process.
    pub chunks_owned: IntGauge,
    /// Peers in the latest membership snapshot.
    pub peers: IntGauge,
    /// Rebalances by result (success, failure).
    pub rebalances_total: IntCounterVec,
    pub rebalance_duration_seconds: HistogramVec,
    /// Chunk queries by result (ok, not_owner, not_found, error).
    pub queries_total: IntCounterVec,
    /// Client reads re-sent after a misroute.
    pub retries_total: IntCounter,
}

impl ClusterMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let chunks_owned = IntGauge::new("motif_cluster_chunks_owned", "Chunks owned by this replica")
            .expect("failed to create chunks_owned gauge");

        let peers = IntGauge::new("motif_cluster_peers", "Peers in the current membership snapshot")
            .expect("failed to create peers gauge");

        let rebalances_total = IntCounterVec::new(
            Opts::new("motif_cluster_rebalances_total", "Total rebalances by result"),
            &["result"],
        )
        .expect("failed to create rebalances_total counter");

        let rebalance_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "motif_cluster_rebalance_duration_seconds",
                "Rebalance duration in seconds",
            )
            .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 30.0]),
            &["result"],
        )
        .expect("failed to create rebalance_duration_seconds histogram");

        let queries_total = IntCounterVec::new(
            Opts::new("motif_cluster_queries_total", "Chunk queries by result"),
            &["result"],
        )
        .expect("failed to create queries_total counter");

        let retries_total = IntCounter::new(
            "motif_cluster_retries_total",
            "Client reads retried after a misroute",
        )
        .expect("failed to create retries_total counter");

        registry
            .register(Box::new(chunks_owned.clone()))
            .expect("failed to register chunks_owned");
        registry
            .register(Box::new(peers.clone()))
            .expect("failed to register peers");
        registry
            .register(Box::new(rebalances_total.clone()))
            .expect("failed to register rebalances_total");
        registry
            .register(Box::new(rebalance_duration_seconds.clone()))
            .expect("failed to register rebalance_duration_seconds");
        registry
            .register(Box::new(queries_total.clone()))
            .expect("failed to register queries_total");
        registry
            .register(Box::new(retries_total.clone()))
            .expect("failed to register retries_total");

        Self {
            registry: Arc::new(registry),
            chunks_owned,
            peers,
            rebalances_total,
            rebalance_duration_seconds,
            queries_total,
            retries_total,
        }
    }

    /// Record a completed rebalance.
    pub fn record_rebalance(&self, success: bool, owned: usize, peers: usize, duration_secs: f64) {
        let result = if success { "success" } else { "failure" };
        self.rebalances_total.with_label_values(&[result]).inc();
        self.rebalance_duration_seconds
            .with_label_values(&[result])
            .observe(duration_secs);
        if success {
            self.chunks_owned.set(owned as i64);
            self.peers.set(peers as i64);
        }
    }

    pub fn record_query(&self, result: &str) {
        self.queries_total.with_label_values(&[result]).inc();
    }

    /// Get Prometheus text output.
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if encoder.encode(&metric_families, &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for ClusterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_metrics_gather() {
        let m = ClusterMetrics::new();
        m.record_rebalance(true, 4, 2, 0.01);
        m.record_query("not_owner");
        let output = m.gather();
        assert!(output.contains("motif_cluster_chunks_owned 4"));
        assert!(output.contains("motif_cluster_peers 2"));
        assert!(output.contains("motif_cluster_queries_total"));
        assert_eq!(m.queries_total.with_label_values(&["not_owner"]).get(), 1);
    }
}
