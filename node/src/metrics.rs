//! # Prometheus Metrics
//!
//! Operational counters for the node, served at `/metrics` on the metrics
//! port. All metrics live in a dedicated registry with the `quill` prefix.
//!
//! Ledger counters are driven by [`LedgerEvent`]s. Peer metrics are sampled
//! from the replication engine on every scrape.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

use quill_protocol::network::ReplicationEngine;
use quill_protocol::storage::{LedgerEvent, Origin};

#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Blocks appended, whether produced here or received from a peer.
    pub blocks_appended_total: IntCounter,
    /// `NEW_BLOCK`s that did not extend the tip.
    pub blocks_rejected_total: IntCounter,
    /// Times the local chain was replaced by a longer one.
    pub chain_replacements_total: IntCounter,
    /// Longer candidate chains that failed validation.
    pub chains_rejected_total: IntCounter,
    pub chain_length: IntGauge,
    pub connected_peers: IntGauge,
    /// Outbound frames discarded on full peer queues.
    pub peer_frames_dropped_total: IntCounter,
    /// Posts accepted through `POST /newPost`.
    pub posts_submitted_total: IntCounter,
}

fn counter(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntCounter> {
    let counter = IntCounter::new(name, help)?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntGauge> {
    let gauge = IntGauge::new(name, help)?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

impl NodeMetrics {
    /// Create and register every metric. Call once at startup.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("quill".into()), None)?;

        Ok(Self {
            blocks_appended_total: counter(
                &registry,
                "blocks_appended_total",
                "Blocks appended to the local chain",
            )?,
            blocks_rejected_total: counter(
                &registry,
                "blocks_rejected_total",
                "Received blocks that did not extend the local tip",
            )?,
            chain_replacements_total: counter(
                &registry,
                "chain_replacements_total",
                "Local chain replaced by a longer valid chain",
            )?,
            chains_rejected_total: counter(
                &registry,
                "chains_rejected_total",
                "Longer candidate chains that failed validation",
            )?,
            chain_length: gauge(&registry, "chain_length", "Blocks in the local chain")?,
            connected_peers: gauge(&registry, "connected_peers", "Active peer links")?,
            peer_frames_dropped_total: counter(
                &registry,
                "peer_frames_dropped_total",
                "Outbound frames dropped because a peer queue was full",
            )?,
            posts_submitted_total: counter(
                &registry,
                "posts_submitted_total",
                "Posts accepted through the HTTP API",
            )?,
            registry,
        })
    }

    /// Update counters for one ledger event. `len` is the chain length after
    /// the event.
    pub fn observe(&self, event: &LedgerEvent, len: usize) {
        match event {
            LedgerEvent::BlockAppended { origin, .. } => {
                self.blocks_appended_total.inc();
                if *origin == Origin::Local {
                    self.posts_submitted_total.inc();
                }
            }
            LedgerEvent::ChainReplaced { .. } => self.chain_replacements_total.inc(),
            LedgerEvent::BlockRejected { .. } => self.blocks_rejected_total.inc(),
            LedgerEvent::ChainRejected { .. } => self.chains_rejected_total.inc(),
        }
        self.chain_length.set(len as i64);
    }

    /// Copy the engine's live values into the peer metrics.
    pub fn sample_engine(&self, engine: &ReplicationEngine) {
        self.connected_peers.set(engine.peer_count() as i64);
        let dropped = engine.dropped_frames();
        let recorded = self.peer_frames_dropped_total.get();
        if dropped > recorded {
            self.peer_frames_dropped_total.inc_by(dropped - recorded);
        }
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// State for the metrics router.
#[derive(Clone)]
pub struct MetricsState {
    pub metrics: Arc<NodeMetrics>,
    pub engine: Arc<ReplicationEngine>,
}

/// `GET /metrics`.
pub async fn metrics_handler(State(state): State<MetricsState>) -> impl IntoResponse {
    state.metrics.sample_engine(&state.engine);

    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(%e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
