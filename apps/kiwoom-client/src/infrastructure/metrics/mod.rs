//! Prometheus Metrics Module
//!
//! Counters and gauges for the stream dispatcher and the REST client.
//!
//! # Metrics Categories
//!
//! - **Frames**: frames received per `trnm`
//! - **Callbacks**: dispatched / failed invocations per routing key, the
//!   number waiting for a permit, and handler duration
//! - **Connections**: successful connects and fatal dispatch failures
//! - **REST**: requests per API id
//!
//! Recording is a no-op until a recorder is installed with [`init_metrics`].

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder.
///
/// Calling this again returns the handle installed by the first call.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed, for example because
/// another global recorder is already set.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "kiwoom_frames_received_total",
        "Total frames taken off the inbound queue"
    );
    describe_counter!(
        "kiwoom_callbacks_dispatched_total",
        "Total callback invocations scheduled by the dispatcher"
    );
    describe_counter!(
        "kiwoom_callback_failures_total",
        "Total callback invocations that returned an error"
    );
    describe_gauge!(
        "kiwoom_callbacks_waiting",
        "Callback invocations waiting for a concurrency permit"
    );
    describe_histogram!(
        "kiwoom_callback_duration_seconds",
        "Time spent executing callback bodies"
    );
    describe_counter!(
        "kiwoom_connections_total",
        "Total successful stream connections"
    );
    describe_counter!(
        "kiwoom_dispatch_failures_total",
        "Total fatal dispatcher failures"
    );
    describe_counter!(
        "kiwoom_rest_requests_total",
        "Total REST requests by API id"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a frame taken off the inbound queue.
pub fn record_frame_received(trnm: &str) {
    counter!("kiwoom_frames_received_total", "trnm" => trnm.to_string()).increment(1);
}

/// Record a callback invocation scheduled for a routing key.
pub fn record_callback_dispatched(key: &str) {
    counter!("kiwoom_callbacks_dispatched_total", "key" => key.to_string()).increment(1);
}

/// Record a callback invocation that failed.
pub fn record_callback_failure(key: &str) {
    counter!("kiwoom_callback_failures_total", "key" => key.to_string()).increment(1);
}

/// Update the number of invocations waiting for a permit.
pub fn set_callbacks_waiting(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("kiwoom_callbacks_waiting").set(count as f64);
}

/// Record how long a callback body ran.
pub fn record_callback_duration(key: &str, duration: Duration) {
    histogram!("kiwoom_callback_duration_seconds", "key" => key.to_string())
        .record(duration.as_secs_f64());
}

/// Record a successful stream connection.
pub fn record_connection() {
    counter!("kiwoom_connections_total").increment(1);
}

/// Record a fatal dispatcher failure.
pub fn record_dispatch_failure() {
    counter!("kiwoom_dispatch_failures_total").increment(1);
}

/// Record a REST request.
pub fn record_rest_request(api_id: &str) {
    counter!("kiwoom_rest_requests_total", "api_id" => api_id.to_string()).increment(1);
}

// =============================================================================
// Tests
// =============================================================================
