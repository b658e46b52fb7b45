//! Axum router configuration

use axum::{
    http::{header, Method},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

use super::handlers::{
    create_job, delete_job, get_artifact, get_job, health_check, list_jobs, version_check,
};

/// Create the Axum router with all routes
pub fn create_router(state: Arc<AppState>) -> Router {
    let router = Router::new()
        // Health and version endpoints
        .route("/health", get(health_check))
        .route("/version", get(version_check))
        // Jobs
        .route("/jobs", post(create_job))
        .route("/jobs/{id}", get(get_job).delete(delete_job))
        .route("/jobs/{id}/artifacts/{kind}", get(get_artifact))
        // Debug endpoints
        .route("/debug/jobs", get(list_jobs))
        .layer(TraceLayer::new_for_http());

    let router = if state.config.cors_enabled {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers([header::ACCEPT, header::CONTENT_TYPE, header::ORIGIN])
            .expose_headers([header::CONTENT_DISPOSITION])
            .max_age(Duration::from_secs(3600));
        router.layer(cors)
    } else {
        router
    };

    router.with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::ServerConfig;
    use crate::integration::fixtures::{media_playlist, FakeEngine, FakeHttp};
    use crate::lookup::StaticLookup;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tempfile::{tempdir, TempDir};
    use tower::util::ServiceExt;
    use url::Url;

    fn test_app() -> (TempDir, Router) {
        let root = tempdir().unwrap();
        let http = Arc::new(FakeHttp::new());
        http.serve("http://cdn.example/1234/index.m3u8", media_playlist(&["a.ts", "b.ts"]));
        http.serve("http://cdn.example/1234/a.ts", "AAAA");
        http.serve("http://cdn.example/1234/b.ts", "BBBB");
        let lookup = StaticLookup::new().with(
            "1234",
            vec![Url::parse("http://cdn.example/1234/index.m3u8").unwrap()],
        );
        let config = ServerConfig {
            workspace_root: root.path().to_path_buf(),
            ..Default::default()
        };
        let state = AppState::with_parts(
            config,
            http,
            Arc::new(FakeEngine::new()),
            None,
            Arc::new(lookup),
            Arc::new(SystemClock),
        );
        (root, create_router(Arc::new(state)))
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, body.to_vec())
    }

    fn post_job(body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/jobs")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (_root, app) = test_app();
        let (status, _, body) = send(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"OK");
    }

    #[tokio::test]
    async fn test_job_round_trip() {
        let (_root, app) = test_app();

        let (status, _, body) = send(&app, post_job(r#"{"input":"1234"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        let job: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(job["state"], "ready");
        assert_eq!(job["progress"], 100);
        assert_eq!(job["artifacts"].as_array().unwrap().len(), 2);
        let id = job["id"].as_str().unwrap().to_string();

        let (status, headers, body) = send(&app, get(&format!("/jobs/{}/artifacts/video", id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"AAAABBBB");
        assert_eq!(headers[header::CONTENT_LENGTH], "8");
        assert_eq!(headers[header::CONTENT_TYPE], "video/mp2t");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            format!("attachment; filename=\"{}-video.ts\"", id).as_str()
        );

        let (status, headers, _) = send(&app, get(&format!("/jobs/{}/artifacts/audio", id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "audio/mpeg");

        let (status, _, _) = send(&app, get(&format!("/jobs/{}/artifacts/transcript", id))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _, body) = send(&app, get("/debug/jobs")).await;
        assert_eq!(status, StatusCode::OK);
        let jobs: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(jobs.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_ready_job_expires_it() {
        let (_root, app) = test_app();
        let (_, _, body) = send(&app, post_job(r#"{"input":"1234"}"#)).await;
        let job: Value = serde_json::from_slice(&body).unwrap();
        let id = job["id"].as_str().unwrap().to_string();

        let delete = Request::builder()
            .method(Method::DELETE)
            .uri(format!("/jobs/{}", id))
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(&app, delete).await;
        assert_eq!(status, StatusCode::OK);
        let cancelled: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(cancelled["state"], "expired");

        let (status, _, body) = send(&app, get(&format!("/jobs/{}/artifacts/audio", id))).await;
        assert_eq!(status, StatusCode::GONE);
        let err: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(err["error"], "workspace_expired");
    }

    #[tokio::test]
    async fn test_invalid_input_is_bad_request() {
        let (_root, app) = test_app();
        let (status, _, body) = send(&app, post_job(r#"{"input":"not a recording"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let err: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(err["error"], "input_validation");

        let (status, _, _) = send(&app, post_job(r#"{"input":"1234","transcribe":true}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_reference_fails_upstream() {
        let (_root, app) = test_app();
        let (status, _, _) = send(&app, post_job(r#"{"input":"https://cdn.example/none/index.m3u8"}"#)).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let (_root, app) = test_app();
        let (status, _, _) = send(&app, get("/jobs/8d1f9a7e-0a51-4b4e-9a57-0c7f6a0c3d11")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _, _) = send(&app, get("/jobs/not-a-uuid")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_accepted_without_wait() {
        let (_root, app) = test_app();
        let (status, _, body) = send(&app, post_job(r#"{"input":"1234","wait":false}"#)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let job: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(job["state"], "pending");
    }

    #[tokio::test]
    async fn test_cors_options() {
        let (_root, app) = test_app();

        // Pre-flight OPTIONS request
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/jobs")
            .header(header::ORIGIN, "http://localhost:8080")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
            .body(Body::empty())
            .unwrap();

        let (status, headers, _) = send(&app, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
        assert!(headers
            .get(header::ACCESS_CONTROL_ALLOW_METHODS)
            .unwrap()
            .to_str()
            .unwrap()
            .contains("POST"));
    }
}
