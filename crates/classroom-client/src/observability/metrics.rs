//! Metrics definitions for the classroom client.
//!
//! All metrics follow Prometheus naming conventions:
//! - `classroom_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `outcome`: success, unauthorized, transient
//! - `reason`: unauthorized, retries_exhausted, transport
//! - `step`: the seven teardown steps
//! - `kind`: microphone, camera, screen
//! - `error`: permission_denied, unavailable, close
//!
//! With no recorder installed every call is a no-op.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record the outcome of one credential fetch attempt.
///
/// Metric: `classroom_credential_fetch_total`
/// Labels: `outcome`
pub fn record_credential_fetch(outcome: &'static str, duration: Duration) {
    counter!("classroom_credential_fetch_total", "outcome" => outcome).increment(1);
    histogram!("classroom_credential_fetch_duration_seconds", "outcome" => outcome)
        .record(duration.as_secs_f64());
}

/// Record a scheduled credential retry.
///
/// Metric: `classroom_credential_retries_total`
/// Labels: none
pub fn record_retry_scheduled() {
    counter!("classroom_credential_retries_total").increment(1);
}

/// Record a session entering `Failed`.
///
/// Metric: `classroom_session_failures_total`
/// Labels: `reason`
pub fn record_session_failure(reason: &'static str) {
    counter!("classroom_session_failures_total", "reason" => reason).increment(1);
}

/// Record a teardown step that failed and was skipped.
///
/// Metric: `classroom_teardown_step_failures_total`
/// Labels: `step`
pub fn record_teardown_step_failure(step: &'static str) {
    counter!("classroom_teardown_step_failures_total", "step" => step).increment(1);
}

/// Record how long a full teardown took.
///
/// Metric: `classroom_teardown_duration_seconds`
/// Labels: none
pub fn record_teardown_duration(duration: Duration) {
    histogram!("classroom_teardown_duration_seconds").record(duration.as_secs_f64());
}

/// Record a capture device failure.
///
/// Metric: `classroom_device_errors_total`
/// Labels: `kind`, `error`
pub fn record_device_error(kind: &'static str, error: &'static str) {
    counter!("classroom_device_errors_total", "kind" => kind, "error" => error).increment(1);
}

/// Record a failed transport publish.
///
/// Metric: `classroom_publish_failures_total`
/// Labels: `kind`
pub fn record_publish_failure(kind: &'static str) {
    counter!("classroom_publish_failures_total", "kind" => kind).increment(1);
}

/// Set the number of tracks currently published.
///
/// Metric: `classroom_published_tracks`
/// Labels: none
pub fn set_published_tracks(count: usize) {
    // Bounded by the three capture kinds.
    #[allow(clippy::cast_precision_loss)]
    gauge!("classroom_published_tracks").set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    // No recorder is installed; these exercise the recording paths only.

    #[test]
    fn test_record_credential_fetch() {
        record_credential_fetch("success", Duration::from_millis(40));
        record_credential_fetch("unauthorized", Duration::from_millis(12));
        record_credential_fetch("transient", Duration::from_secs(10));
        record_retry_scheduled();
    }

    #[test]
    fn test_record_session_failure() {
        record_session_failure("unauthorized");
        record_session_failure("retries_exhausted");
        record_session_failure("transport");
    }

    #[test]
    fn test_record_teardown() {
        record_teardown_step_failure("release_camera");
        record_teardown_duration(Duration::from_millis(120));
    }

    #[test]
    fn test_record_devices() {
        record_device_error("camera", "permission_denied");
        record_publish_failure("screen");
        set_published_tracks(0);
        set_published_tracks(3);
    }
}
