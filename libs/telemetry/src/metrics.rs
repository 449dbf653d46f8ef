use std::sync::atomic::{AtomicBool, Ordering};

use metrics::Label;
use tracing::Span;

use crate::context::TelemetryLabels;

static ENABLED: AtomicBool = AtomicBool::new(true);

pub fn telemetry_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

/// Turns metric recording off, e.g. for noisy load tests.
pub fn set_telemetry_enabled(enabled: bool) {
    ENABLED.store(enabled, Ordering::Relaxed);
}

pub fn with_common_fields(
    span: &Span,
    channel: &str,
    workspace: Option<&str>,
    msg_id: Option<&str>,
) {
    span.record("channel", tracing::field::display(channel));
    if let Some(workspace) = workspace {
        span.record("workspace", tracing::field::display(workspace));
    }
    if let Some(msg_id) = msg_id {
        span.record("msg_id", tracing::field::display(msg_id));
    }
}

fn labels(labels: &TelemetryLabels) -> Vec<Label> {
    labels
        .tags()
        .into_iter()
        .map(|(key, value)| Label::new(key, value))
        .collect()
}

pub fn record_counter(name: &'static str, value: u64, labels_in: &TelemetryLabels) {
    if telemetry_enabled() {
        metrics::counter!(name, labels(labels_in)).increment(value);
    }
}

pub fn record_histogram(name: &'static str, value: f64, labels_in: &TelemetryLabels) {
    if telemetry_enabled() {
        metrics::histogram!(name, labels(labels_in)).record(value);
    }
}

pub fn record_gauge(name: &'static str, value: i64, labels_in: &TelemetryLabels) {
    if telemetry_enabled() {
        metrics::gauge!(name, labels(labels_in)).set(value as f64);
    }
}
