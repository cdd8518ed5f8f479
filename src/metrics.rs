//! Prometheus metrics for the bridge tracker
//!
//! There is no HTTP endpoint. When a textfile path is configured the
//! exposition text is rewritten after every pass, for a node-exporter
//! textfile collector to pick up.

use std::io::Write;
use std::path::Path;

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec, CounterVec,
    Encoder, Gauge, GaugeVec, HistogramVec, TextEncoder,
};

use crate::store::PendingTransfers;
use crate::types::{Layer, Status};

lazy_static! {
    // Record lifecycle
    pub static ref TRANSITIONS: CounterVec = register_counter_vec!(
        "bridge_tracker_transitions_total",
        "Status transitions applied to transfer records",
        &["layer", "to"]
    ).unwrap();

    pub static ref RECORDS_DROPPED: CounterVec = register_counter_vec!(
        "bridge_tracker_records_dropped_total",
        "Records removed from the store without reaching a terminal status",
        &["reason"]
    ).unwrap();

    pub static ref OPEN_RECORDS: GaugeVec = register_gauge_vec!(
        "bridge_tracker_open_records",
        "Records currently in the store",
        &["layer", "status"]
    ).unwrap();

    pub static ref FAILED_RELAYS: CounterVec = register_counter_vec!(
        "bridge_tracker_failed_relays_total",
        "Messages whose execution on the destination layer failed",
        &["layer"]
    ).unwrap();

    // Side effects
    pub static ref SIDE_EFFECTS: CounterVec = register_counter_vec!(
        "bridge_tracker_side_effects_total",
        "Transactions submitted by the worker",
        &["action", "status"]
    ).unwrap();

    // Passes
    pub static ref PASS_DURATION: HistogramVec = register_histogram_vec!(
        "bridge_tracker_pass_duration_seconds",
        "Duration of a scanner, worker or watcher pass",
        &["job"],
        vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]
    ).unwrap();

    pub static ref PASS_FAILURES: CounterVec = register_counter_vec!(
        "bridge_tracker_pass_failures_total",
        "Passes aborted by a store or setup error",
        &["job"]
    ).unwrap();

    // Health
    pub static ref UP: Gauge = register_gauge!(
        "bridge_tracker_up",
        "Whether the tracker is up and running"
    ).unwrap();
}

/// Record a status transition
pub fn record_transition(layer: Layer, to: Status) {
    TRANSITIONS
        .with_label_values(&[layer.as_str(), to.as_str()])
        .inc();
}

/// Record a removed record
pub fn record_dropped(reason: &str) {
    RECORDS_DROPPED.with_label_values(&[reason]).inc();
}

/// Record a failed execution of a message sent from `layer`
pub fn record_failed_relay(layer: Layer) {
    FAILED_RELAYS.with_label_values(&[layer.as_str()]).inc();
}

/// Record a submitted side effect
pub fn record_side_effect(action: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    SIDE_EFFECTS.with_label_values(&[action, status]).inc();
}

pub fn record_pass(job: &str, seconds: f64) {
    PASS_DURATION.with_label_values(&[job]).observe(seconds);
}

pub fn record_pass_failure(job: &str) {
    PASS_FAILURES.with_label_values(&[job]).inc();
}

/// Refresh the open-records gauge from the store contents
pub fn set_open_records(transfers: &PendingTransfers) {
    OPEN_RECORDS.reset();
    for ((layer, status), count) in transfers.counts() {
        OPEN_RECORDS
            .with_label_values(&[layer.as_str(), status.as_str()])
            .set(count as f64);
    }
}

/// Render the default registry in the text exposition format
pub fn render() -> eyre::Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Atomically replace `path` with the current exposition text
pub fn write_textfile(path: &Path) -> eyre::Result<()> {
    let text = render()?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(text.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_registered_metrics() {
        UP.set(1.0);
        record_transition(Layer::L2, Status::Ready);
        let text = render().unwrap();
        assert!(text.contains("bridge_tracker_up 1"));
        assert!(text.contains("bridge_tracker_transitions_total"));
    }

    #[test]
    fn test_write_textfile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.prom");
        record_side_effect("withdraw", true);
        write_textfile(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("bridge_tracker_side_effects_total"));
    }
}
