//! Schedule management: create, list, delete and inspect run history.
//!
//! Every route is scoped to the caller from `x-user-id`; another owner's
//! schedules are invisible rather than forbidden.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use stayplan_scheduler::{NewSchedule, Schedule};

use super::{caller, scheduler_error, ApiError};
use crate::app::AppState;

const DEFAULT_RUN_LIMIT: usize = 20;
const MAX_RUN_LIMIT: usize = 100;

#[derive(Deserialize)]
pub struct CreateScheduleRequest {
    pub name: String,
    pub schedule_type: String,
    pub schedule_data: Value,
    #[serde(default)]
    pub collection_id: Option<String>,
    #[serde(default)]
    pub search_id: Option<String>,
}

#[derive(Deserialize)]
pub struct RunsQuery {
    pub limit: Option<usize>,
}

/// POST /schedules
pub async fn create_schedule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateScheduleRequest>,
) -> Result<(StatusCode, Json<Schedule>), ApiError> {
    let caller = caller(&headers)?;
    let schedule = state
        .store
        .create(
            NewSchedule {
                user_id: caller.user_id,
                name: req.name,
                schedule_type: req.schedule_type,
                schedule_data: req.schedule_data,
                collection_id: req.collection_id,
                search_id: req.search_id,
                user_timezone: caller.timezone,
            },
            state.clock.now(),
        )
        .map_err(scheduler_error)?;
    Ok((StatusCode::CREATED, Json(schedule)))
}

/// GET /schedules: the caller's active schedules, soonest first.
pub async fn list_schedules(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let caller = caller(&headers)?;
    let schedules = state
        .store
        .list_active(&caller.user_id)
        .map_err(scheduler_error)?;
    Ok(Json(json!({ "schedules": schedules })))
}

/// DELETE /schedules/{id}: idempotent soft delete.
pub async fn delete_schedule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let caller = caller(&headers)?;
    state
        .store
        .deactivate(&id, &caller.user_id, state.clock.now())
        .map_err(scheduler_error)?;
    info!(schedule_id = %id, user_id = %caller.user_id, "delete requested");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /schedules/{id}/runs?limit=N
pub async fn list_runs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<Value>, ApiError> {
    let caller = caller(&headers)?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_RUN_LIMIT)
        .clamp(1, MAX_RUN_LIMIT);
    let runs = state
        .store
        .list_runs(&id, &caller.user_id, limit)
        .map_err(scheduler_error)?;
    Ok(Json(json!({ "runs": runs })))
}
