use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use stayplan_scheduler::SearchItem;

use super::{caller, error_response, scheduler_error, ApiError};
use crate::app::AppState;

/// Body of `POST /collections` and `POST /searches`.
#[derive(Deserialize)]
pub struct SavePayloadRequest {
    pub name: String,
    pub items: Vec<SearchItem>,
}

fn validate(req: &SavePayloadRequest) -> Result<(), ApiError> {
    if req.name.trim().is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, "INVALID_PAYLOAD", "name is required"));
    }
    if req.items.is_empty() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "INVALID_PAYLOAD",
            "at least one item is required",
        ));
    }
    Ok(())
}

/// POST /collections
pub async fn create_collection(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<SavePayloadRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let caller = caller(&headers)?;
    validate(&req)?;
    let id = state
        .store
        .insert_collection(&caller.user_id, req.name.trim(), &req.items, state.clock.now())
        .map_err(scheduler_error)?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

/// POST /searches
pub async fn create_search(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<SavePayloadRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let caller = caller(&headers)?;
    validate(&req)?;
    let id = state
        .store
        .insert_search(&caller.user_id, req.name.trim(), &req.items, state.clock.now())
        .map_err(scheduler_error)?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}
