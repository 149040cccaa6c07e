//! HTTP handlers for directory-service.

pub mod distribution_lists;
pub mod health;
pub mod metrics;
pub mod sites;
pub mod tickets;

pub use health::{health_check, readiness_check};
pub use metrics::metrics_endpoint;

use axum::http::StatusCode;
use service_core::resilience::SyncReport;

/// 207 when some members could not be synced, `ok` otherwise.
pub(crate) fn status_for<T>(report: &SyncReport<T>, ok: StatusCode) -> StatusCode {
    if report.is_complete() {
        ok
    } else {
        StatusCode::MULTI_STATUS
    }
}
