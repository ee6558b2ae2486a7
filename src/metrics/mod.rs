//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Party connectivity and status transitions
//! - UTXO fetch outcomes and fetch guard decisions
//! - Transfer and commit submissions
//! - Push channel health

use crate::error::{PanelError, PanelResult};
use crate::events::{HeadTag, PanelEvent};

use axum::{routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::{info, warn};

lazy_static! {
    // Party metrics
    pub static ref PARTY_CONNECTED: GaugeVec = register_gauge_vec!(
        "headwatch_party_connected",
        "Party node reachability (1=connected, 0=disconnected)",
        &["party"]
    ).unwrap();

    pub static ref STATUS_TRANSITIONS: CounterVec = register_counter_vec!(
        "headwatch_status_transitions_total",
        "Head status transitions by new tag",
        &["party", "tag"]
    ).unwrap();

    pub static ref PUSH_REJECTED: CounterVec = register_counter_vec!(
        "headwatch_push_rejected_total",
        "Push statuses rejected in favour of a fresh poll",
        &["party"]
    ).unwrap();

    pub static ref SUBSCRIBER_RECONNECTS: CounterVec = register_counter_vec!(
        "headwatch_subscriber_reconnects_total",
        "Push channel reconnect attempts",
        &["party"]
    ).unwrap();

    // UTXO metrics
    pub static ref UTXO_FETCHES: CounterVec = register_counter_vec!(
        "headwatch_utxo_fetches_total",
        "UTXO fetch completions by outcome",
        &["party", "outcome"]
    ).unwrap();

    pub static ref FETCH_SUPPRESSED: CounterVec = register_counter_vec!(
        "headwatch_fetch_suppressed_total",
        "UTXO fetch requests suppressed by the in-flight guard",
        &["party"]
    ).unwrap();

    pub static ref FETCH_FORCE_CLEARED: CounterVec = register_counter_vec!(
        "headwatch_fetch_force_cleared_total",
        "In-flight guards cleared after a stuck fetch",
        &["party"]
    ).unwrap();

    pub static ref UTXO_SET_SIZE: GaugeVec = register_gauge_vec!(
        "headwatch_utxo_set_size",
        "Entries in the published UTXO set",
        &["party"]
    ).unwrap();

    // Submission metrics
    pub static ref SUBMISSIONS: CounterVec = register_counter_vec!(
        "headwatch_submissions_total",
        "Transfer and commit submissions by outcome",
        &["kind", "outcome"]
    ).unwrap();

    pub static ref SUBMISSION_LATENCY: HistogramVec = register_histogram_vec!(
        "headwatch_submission_latency_seconds",
        "Time from submission to node response",
        &["kind"],
        vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).unwrap();

    // Event metrics
    pub static ref EVENTS_EMITTED: CounterVec = register_counter_vec!(
        "headwatch_events_emitted_total",
        "Panel events emitted by type",
        &["event_type"]
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

    pub async fn run(&self) -> PanelResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| PanelError::Config(format!("Failed to bind metrics {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| PanelError::Config(format!("Metrics server failed: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

// Helper functions to record metrics

pub fn record_party_connected(party: &str, connected: bool) {
    PARTY_CONNECTED
        .with_label_values(&[party])
        .set(if connected { 1.0 } else { 0.0 });
}

pub fn record_status_transition(party: &str, tag: Option<HeadTag>) {
    let tag = tag.map(|t| t.name()).unwrap_or("disconnected");
    STATUS_TRANSITIONS.with_label_values(&[party, tag]).inc();
}

pub fn record_push_rejected(party: &str) {
    PUSH_REJECTED.with_label_values(&[party]).inc();
}

pub fn record_subscriber_reconnect(party: &str) {
    SUBSCRIBER_RECONNECTS.with_label_values(&[party]).inc();
}

pub fn record_utxo_fetch(party: &str, outcome: &str) {
    UTXO_FETCHES.with_label_values(&[party, outcome]).inc();
}

pub fn record_fetch_suppressed(party: &str) {
    FETCH_SUPPRESSED.with_label_values(&[party]).inc();
}

pub fn record_fetch_force_cleared(party: &str) {
    FETCH_FORCE_CLEARED.with_label_values(&[party]).inc();
}

pub fn record_utxo_set_size(party: &str, size: usize) {
    UTXO_SET_SIZE.with_label_values(&[party]).set(size as f64);
}

pub fn record_submission(kind: &str, outcome: &str) {
    SUBMISSIONS.with_label_values(&[kind, outcome]).inc();
}

pub fn record_submission_latency(kind: &str, latency_secs: f64) {
    SUBMISSION_LATENCY
        .with_label_values(&[kind])
        .observe(latency_secs);
}

pub fn record_event(event: &PanelEvent) {
    EVENTS_EMITTED.with_label_values(&[event.name()]).inc();
}
