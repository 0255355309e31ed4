//! Prometheus metrics (§4.10): counters for total calls and outcomes,
//! gauges for active calls, histograms for turn latency and TTS/STT
//! timing. Grounded in the teacher's `metrics` + `metrics-exporter-prometheus`
//! wiring (`voice-agent-server/Cargo.toml`); this module only differs in
//! which names it registers.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub const CALLS_TOTAL: &str = "voxrelay_calls_total";
pub const CALLS_ACTIVE: &str = "voxrelay_calls_active";
pub const CALL_OUTCOME_TOTAL: &str = "voxrelay_call_outcome_total";
pub const TURN_LATENCY_MS: &str = "voxrelay_turn_latency_ms";
pub const TTS_TTFB_MS: &str = "voxrelay_tts_time_to_first_byte_ms";
pub const STT_TTF_MS: &str = "voxrelay_stt_time_to_final_ms";
pub const TOOL_INVOCATIONS_TOTAL: &str = "voxrelay_tool_invocations_total";

/// Installs the global Prometheus recorder and returns the handle the
/// `/metrics` endpoint renders from.
pub fn init_metrics() -> PrometheusHandle {
    let builder = PrometheusBuilder::new();
    builder
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

pub fn record_call_started() {
    metrics::counter!(CALLS_TOTAL).increment(1);
    metrics::gauge!(CALLS_ACTIVE).increment(1.0);
}

pub fn record_call_ended(outcome: &str) {
    metrics::gauge!(CALLS_ACTIVE).decrement(1.0);
    metrics::counter!(CALL_OUTCOME_TOTAL, "outcome" => outcome.to_string()).increment(1);
}

pub fn record_turn_latency(duration: std::time::Duration) {
    metrics::histogram!(TURN_LATENCY_MS).record(duration.as_millis() as f64);
}

pub fn record_tts_ttfb(duration: std::time::Duration) {
    metrics::histogram!(TTS_TTFB_MS).record(duration.as_millis() as f64);
}

pub fn record_stt_ttf(duration: std::time::Duration) {
    metrics::histogram!(STT_TTF_MS).record(duration.as_millis() as f64);
}

pub fn record_tool_invocation(tool: &str, status: &str) {
    metrics::counter!(TOOL_INVOCATIONS_TOTAL, "tool" => tool.to_string(), "status" => status.to_string()).increment(1);
}
