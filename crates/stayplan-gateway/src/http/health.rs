use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use stayplan_scheduler::timezone::format_utc;

use crate::app::AppState;

/// GET /health: liveness probe with build metadata.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "build": env!("STAYPLAN_GIT_SHA"),
        "time": format_utc(state.clock.now()),
        "poll_interval_secs": state.config.scheduler.poll_interval_secs,
    }))
}
