use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use stayplan_core::StayplanConfig;
use stayplan_scheduler::{Clock, ScheduleStore};

/// Shared state handed to every handler as `Arc<AppState>`.
pub struct AppState {
    pub config: StayplanConfig,
    pub store: Arc<ScheduleStore>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(config: StayplanConfig, store: Arc<ScheduleStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            store,
            clock,
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    use crate::http::{health, payloads, schedules};

    Router::new()
        .route("/health", get(health::health_handler))
        .route(
            "/schedules",
            post(schedules::create_schedule).get(schedules::list_schedules),
        )
        .route("/schedules/{id}", delete(schedules::delete_schedule))
        .route("/schedules/{id}/runs", get(schedules::list_runs))
        .route("/collections", post(payloads::create_collection))
        .route("/searches", post(payloads::create_search))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};
    use stayplan_scheduler::ManualClock;
    use tower::ServiceExt;

    fn router() -> Router {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let store = Arc::new(ScheduleStore::new(conn).unwrap());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 10, 19, 11, 25, 0).unwrap(),
        ));
        build_router(Arc::new(AppState::new(StayplanConfig::default(), store, clock)))
    }

    async fn call(
        router: &Router,
        method: &str,
        uri: &str,
        user: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            req = req.header("x-user-id", user);
        }
        let req = match body {
            Some(b) => req
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    fn search_body() -> Value {
        json!({
            "name": "quick look",
            "items": [{
                "website": {"name": "booking", "pos": ["IN"]},
                "location": "Goa",
                "checkInDate": "2026-12-20",
                "checkOutDate": "2026-12-22",
                "adults": 2,
                "starRating": "4"
            }]
        })
    }

    #[tokio::test]
    async fn health_is_open() {
        let (status, body) = call(&router(), "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn schedules_require_a_caller() {
        let (status, body) = call(&router(), "GET", "/schedules", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn create_list_runs_and_delete() {
        let app = router();
        let (status, search) =
            call(&app, "POST", "/searches", Some("a@x.com"), Some(search_body())).await;
        assert_eq!(status, StatusCode::CREATED);
        let search_id = search["id"].as_str().unwrap().to_string();

        let (status, created) = call(
            &app,
            "POST",
            "/schedules",
            Some("a@x.com"),
            Some(json!({
                "name": "goa watch",
                "schedule_type": "daily",
                "schedule_data": {"time": "17:00", "timezone": "Asia/Kolkata"},
                "search_id": search_id,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["next_run_at"], "2026-10-19T11:30:00Z");
        assert_eq!(created["schedule_type"], "daily");
        let id = created["id"].as_str().unwrap().to_string();

        let (_, listed) = call(&app, "GET", "/schedules", Some("a@x.com"), None).await;
        assert_eq!(listed["schedules"].as_array().unwrap().len(), 1);
        let (_, others) = call(&app, "GET", "/schedules", Some("b@x.com"), None).await;
        assert!(others["schedules"].as_array().unwrap().is_empty());

        let (status, runs) =
            call(&app, "GET", &format!("/schedules/{id}/runs"), Some("a@x.com"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(runs["runs"].as_array().unwrap().is_empty());

        let (status, _) =
            call(&app, "DELETE", &format!("/schedules/{id}"), Some("b@x.com"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, listed) = call(&app, "GET", "/schedules", Some("a@x.com"), None).await;
        assert_eq!(listed["schedules"].as_array().unwrap().len(), 1);

        let (status, _) =
            call(&app, "DELETE", &format!("/schedules/{id}"), Some("a@x.com"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, listed) = call(&app, "GET", "/schedules", Some("a@x.com"), None).await;
        assert!(listed["schedules"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn owner_timezone_header_is_used() {
        let app = router();
        let (status, created) = {
            let req = Request::builder()
                .method("POST")
                .uri("/schedules")
                .header("x-user-id", "a@x.com")
                .header("x-user-timezone", "Asia/Tokyo")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({
                        "name": "tokyo",
                        "schedule_type": "daily",
                        "schedule_data": {"time": "09:00"},
                    })
                    .to_string(),
                ))
                .unwrap();
            let resp = app.clone().oneshot(req).await.unwrap();
            let status = resp.status();
            let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
            (status, serde_json::from_slice::<Value>(&bytes).unwrap())
        };
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["schedule_data"]["timezone"], "Asia/Tokyo");
        assert_eq!(created["next_run_at"], "2026-10-20T00:00:00Z");
    }

    #[tokio::test]
    async fn invalid_schedule_is_bad_request() {
        let (status, body) = call(
            &router(),
            "POST",
            "/schedules",
            Some("a@x.com"),
            Some(json!({
                "name": "bad",
                "schedule_type": "hourly",
                "schedule_data": {"time": "09:00"},
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_SCHEDULE");
    }

    #[tokio::test]
    async fn foreign_search_cannot_be_scheduled() {
        let app = router();
        let (_, search) =
            call(&app, "POST", "/searches", Some("alice@x.com"), Some(search_body())).await;
        let search_id = search["id"].as_str().unwrap().to_string();

        let (status, body) = call(
            &app,
            "POST",
            "/schedules",
            Some("mallory@x.com"),
            Some(json!({
                "name": "borrowed",
                "schedule_type": "daily",
                "schedule_data": {"time": "09:00", "timezone": "UTC"},
                "search_id": search_id,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_SCHEDULE");

        let (_, listed) = call(&app, "GET", "/schedules", Some("mallory@x.com"), None).await;
        assert!(listed["schedules"].as_array().unwrap().is_empty());
    }
}
