pub mod health;
pub mod payloads;
pub mod schedules;

use axum::{
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::{json, Value};
use stayplan_scheduler::SchedulerError;

/// Error half of every handler result: a status plus `{"error", "code"}`.
pub type ApiError = (StatusCode, Json<Value>);

pub fn error_response(status: StatusCode, code: &str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(json!({ "error": message.into(), "code": code })),
    )
}

/// Map a store/engine error to its HTTP status.
pub fn scheduler_error(e: SchedulerError) -> ApiError {
    let status = match e {
        SchedulerError::InvalidSchedule(_) => StatusCode::BAD_REQUEST,
        SchedulerError::ScheduleNotFound { .. } => StatusCode::NOT_FOUND,
        SchedulerError::PayloadMissing { .. }
        | SchedulerError::Submission(_)
        | SchedulerError::SubmissionTimeout { .. } => StatusCode::BAD_GATEWAY,
        SchedulerError::Database(_) | SchedulerError::Serialization(_) => {
            tracing::error!("request failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error_response(status, e.code(), e.to_string())
}

/// The calling user, taken from the `x-user-id` header set by the upstream
/// auth proxy.
pub struct Caller {
    pub user_id: String,
    /// IANA zone from `x-user-timezone`; empty when absent.
    pub timezone: String,
}

pub fn caller(headers: &HeaderMap) -> Result<Caller, ApiError> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .unwrap_or_default()
            .to_string()
    };
    let user_id = header("x-user-id");
    if user_id.is_empty() {
        return Err(error_response(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "missing 'x-user-id' header",
        ));
    }
    Ok(Caller {
        user_id,
        timezone: header("x-user-timezone"),
    })
}
