//! # Prometheus Metrics
//!
//! Exposes the propagation layer's counters at `/metrics`. The event loop
//! publishes a [`PropagationStats`] snapshot after every event; the node
//! copies each snapshot into the gauges below.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] so they
//! do not collide with any default global registry consumers.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

use lattice_protocol::network::PropagationStats;

/// Prometheus handles for every propagation counter.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    pub connected_peers: IntGauge,
    pub synced_peers: IntGauge,
    pub known_messages: IntGauge,
    pub pending_requests: IntGauge,
    pub announces_sent: IntGauge,
    pub send_failures: IntGauge,
    pub full_requests_sent: IntGauge,
    pub requests_exhausted: IntGauge,
    pub stale_timers: IntGauge,
    pub candidates_queued: IntGauge,
    pub selector_prunes: IntGauge,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("lattice".into()), None)?;

        let gauge = |name: &str, help: &str| -> Result<IntGauge, prometheus::Error> {
            let gauge = IntGauge::new(name, help)?;
            registry.register(Box::new(gauge.clone()))?;
            Ok(gauge)
        };

        let connected_peers = gauge("connected_peers", "Number of live peer sessions")?;
        let synced_peers = gauge("synced_peers", "Peers that reported being synced")?;
        let known_messages = gauge("known_messages", "Payloads held in full")?;
        let pending_requests = gauge("pending_requests", "Announced hashes still being fetched")?;
        let announces_sent = gauge("announces_sent", "Announces delivered to peer links")?;
        let send_failures = gauge("send_failures", "Per-peer write failures")?;
        let full_requests_sent = gauge("full_requests_sent", "Full-message requests sent")?;
        let requests_exhausted = gauge(
            "requests_exhausted",
            "Hashes abandoned after every announcing peer was asked",
        )?;
        let stale_timers = gauge("stale_timers", "Timer firings ignored as stale")?;
        let candidates_queued = gauge("candidates_queued", "Consensus candidates queued")?;
        let selector_prunes = gauge("selector_prunes", "Candidate queues dropped as beaten")?;

        Ok(Self {
            registry,
            connected_peers,
            synced_peers,
            known_messages,
            pending_requests,
            announces_sent,
            send_failures,
            full_requests_sent,
            requests_exhausted,
            stale_timers,
            candidates_queued,
            selector_prunes,
        })
    }

    /// Copies a stats snapshot into the gauges.
    pub fn update(&self, stats: &PropagationStats) {
        self.connected_peers.set(stats.connected_peers as i64);
        self.synced_peers.set(stats.synced_peers as i64);
        self.known_messages.set(stats.known_messages as i64);
        self.pending_requests.set(stats.pending_requests as i64);
        self.announces_sent.set(stats.announces_sent as i64);
        self.send_failures.set(stats.send_failures as i64);
        self.full_requests_sent.set(stats.full_requests_sent as i64);
        self.requests_exhausted.set(stats.requests_exhausted as i64);
        self.stale_timers.set(stats.stale_timers as i64);
        self.candidates_queued.set(stats.candidates_queued as i64);
        self.selector_prunes.set(stats.selector_prunes as i64);
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_exported() {
        let metrics = NodeMetrics::new().unwrap();
        metrics.update(&PropagationStats {
            connected_peers: 3,
            pending_requests: 2,
            announces_sent: 17,
            ..PropagationStats::default()
        });

        let body = metrics.encode().unwrap();
        assert!(body.contains("lattice_connected_peers 3"));
        assert!(body.contains("lattice_pending_requests 2"));
        assert!(body.contains("lattice_announces_sent 17"));
        assert!(body.contains("lattice_selector_prunes 0"));
    }

    #[tokio::test]
    async fn handler_serves_text_format() {
        let metrics = Arc::new(NodeMetrics::new().unwrap());
        let response = metrics_handler(axum::extract::State(metrics)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
