//! Observability for the classroom client.
//!
//! # Privacy by Default
//!
//! Tokens are `SecretString` and never appear in logs or metric labels.
//! Metric labels are bounded enums (see [`metrics`]).
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `classroom_credential_fetch_total` | Counter | `outcome` | Credential fetch attempts |
//! | `classroom_credential_fetch_duration_seconds` | Histogram | `outcome` | Fetch latency |
//! | `classroom_credential_retries_total` | Counter | none | Backoff retries scheduled |
//! | `classroom_session_failures_total` | Counter | `reason` | Sessions entering `Failed` |
//! | `classroom_teardown_step_failures_total` | Counter | `step` | Skipped teardown steps |
//! | `classroom_teardown_duration_seconds` | Histogram | none | Teardown time |
//! | `classroom_device_errors_total` | Counter | `kind`, `error` | Capture failures |
//! | `classroom_publish_failures_total` | Counter | `kind` | Transport publish failures |
//! | `classroom_published_tracks` | Gauge | none | Tracks currently published |

pub mod metrics;

pub use metrics::{
    record_credential_fetch, record_device_error, record_publish_failure,
    record_retry_scheduled, record_session_failure, record_teardown_duration,
    record_teardown_step_failure, set_published_tracks,
};
