//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define sink metrics (streams, phases, decode errors)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `extproc_streams_total` (counter): finished streams by outcome
//! - `extproc_active_streams` (gauge): currently open streams
//! - `extproc_phases_total` (counter): answered phases by phase
//! - `extproc_instruction_decode_errors_total` (counter): rejected instructions
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Labels are fixed strings, never caller-supplied values

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_stream_opened() {
    metrics::gauge!("extproc_active_streams").increment(1.0);
}

/// `outcome` is one of `closed`, `aborted`, `failed`.
pub fn record_stream_closed(outcome: &'static str) {
    metrics::gauge!("extproc_active_streams").decrement(1.0);
    metrics::counter!("extproc_streams_total", "outcome" => outcome).increment(1);
}

pub fn record_phase(phase: &'static str) {
    metrics::counter!("extproc_phases_total", "phase" => phase).increment(1);
}

pub fn record_decode_error() {
    metrics::counter!("extproc_instruction_decode_errors_total").increment(1);
}
