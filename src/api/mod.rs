//! Read-only HTTP surface over the snapshot store. Never triggers a capture.

mod error;

pub use error::{ApiError, ApiResult};

use axum::{
    extract::State,
    http::{HeaderValue, Method},
    response::Json,
    routing::get,
    Router,
};
use chrono::Utc;
use serde_json::Value;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::{models::format_timestamp, settings::Settings, store::SnapshotStore};

const ENABLE_LOGS: bool = true;

use crate::log_warn;

pub const LATEST_ROUTE: &str = "/api/get-aqi-data";

#[derive(Clone)]
pub struct ApiState {
    store: SnapshotStore,
}

pub fn router(store: SnapshotStore, settings: &Settings) -> Router {
    Router::new()
        .route("/", get(health))
        .route(LATEST_ROUTE, get(latest_snapshot))
        .layer(cors_layer(settings))
        .with_state(ApiState { store })
}

fn cors_layer(settings: &Settings) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods([Method::GET]);
    if settings.allows_any_origin() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = settings
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                log_warn!("Ignoring invalid CORS origin '{origin}'");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

async fn health() -> &'static str {
    "India AQI Backend is running."
}

/// Current snapshot document plus a request-time `currentTime`.
async fn latest_snapshot(State(state): State<ApiState>) -> ApiResult<Json<Value>> {
    let store = state.store.clone();
    let document = tokio::task::spawn_blocking(move || store.read_current())
        .await
        .map_err(|err| ApiError::internal(format!("read task failed: {err}")))??;

    let Value::Object(mut body) = document else {
        return Err(ApiError::data_missing());
    };
    body.insert(
        "currentTime".into(),
        Value::String(format_timestamp(&Utc::now())),
    );
    Ok(Json(Value::Object(body)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::Snapshot, store::POINTER_FILE};
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::json;
    use std::fs;
    use tower::ServiceExt;

    fn app(dir: &std::path::Path) -> (SnapshotStore, Router) {
        let store = SnapshotStore::open(dir).unwrap();
        let router = router(store.clone(), &Settings::default());
        (store, router)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn not_ready_before_first_capture() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, app) = app(dir.path());

        let (status, body) = get_json(app, LATEST_ROUTE).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].as_str().unwrap().contains("not available"));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn serves_latest_snapshot_with_current_time() {
        let dir = tempfile::tempdir().unwrap();
        let (store, app) = app(dir.path());
        let snapshot = Snapshot::new(Utc::now(), json!({ "list": [{ "city": "Delhi", "aqi": 412 }] }));
        store.publish(&snapshot).unwrap();

        let (status, body) = get_json(app, LATEST_ROUTE).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], snapshot.data);
        assert_eq!(body["capturedAt"], json!(format_timestamp(&snapshot.captured_at)));
        assert!(body["currentTime"].is_string());
    }

    #[tokio::test]
    async fn dangling_pointer_is_data_missing() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, app) = app(dir.path());
        fs::write(
            dir.path().join(POINTER_FILE),
            r#"{ "capturedAt": "2024-01-01T00:00:00.000Z", "filename": "aqi_2024_01_01_00_00_00.json" }"#,
        )
        .unwrap();

        let (status, body) = get_json(app, LATEST_ROUTE).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({ "error": "Data file missing." }));
    }

    #[tokio::test]
    async fn corrupt_pointer_is_data_missing() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, app) = app(dir.path());
        fs::write(dir.path().join(POINTER_FILE), "{{{").unwrap();

        let (status, _) = get_json(app, LATEST_ROUTE).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_route_answers_plain_text() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, app) = app(dir.path());

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"India AQI Backend is running.");
    }
}
