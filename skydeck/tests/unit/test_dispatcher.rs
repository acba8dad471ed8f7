//! Dispatcher API tests

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use skydeck::dispatcher::serve::build_router;
use skydeck::dispatcher::state::DispatcherState;
use skydeck::errors::PlatformError;
use skydeck::runtime::{ContainerRuntime, LaunchReceipt, LaunchRequest, NetworkPlacement};
use skydeck::slug::Slug;
use tower::ServiceExt;

#[derive(Default)]
struct RecordingRuntime {
    launches: Mutex<Vec<LaunchRequest>>,
    fail: bool,
}

#[async_trait]
impl ContainerRuntime for RecordingRuntime {
    async fn launch(&self, request: &LaunchRequest) -> Result<LaunchReceipt, PlatformError> {
        if self.fail {
            return Err(PlatformError::RuntimeError("no capacity".to_string()));
        }
        self.launches.lock().unwrap().push(request.clone());
        Ok(LaunchReceipt {
            task_id: Some("task-1".to_string()),
        })
    }
}

fn state(runtime: Arc<RecordingRuntime>) -> Arc<DispatcherState> {
    let base_environment = BTreeMap::from([
        ("STORE_ENDPOINT".to_string(), "http://minio:9000/sites".to_string()),
        ("BROKER_HOST".to_string(), "mqtt".to_string()),
    ]);
    Arc::new(DispatcherState::new(
        runtime,
        "localhost:8000".to_string(),
        "skydeck-builder".to_string(),
        NetworkPlacement {
            subnets: vec!["subnet-a".to_string()],
            security_groups: vec!["sg-1".to_string()],
            assign_public_ip: true,
        },
        base_environment,
    ))
}

async fn post(runtime: Arc<RecordingRuntime>, path: &str, body: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = build_router(state(runtime)).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test]
async fn test_supplied_slug_is_used_verbatim() {
    let runtime = Arc::new(RecordingRuntime::default());
    let (status, body) = post(
        runtime.clone(),
        "/api/deployments",
        r#"{"repositoryUrl":"https://github.com/acme/site","slug":"brave-tiger"}"#,
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "queued");
    assert_eq!(body["data"]["slug"], "brave-tiger");
    assert_eq!(body["data"]["url"], "http://brave-tiger.localhost:8000");

    let launches = runtime.launches.lock().unwrap();
    assert_eq!(launches.len(), 1);
    let launch = &launches[0];
    assert_eq!(launch.image, "skydeck-builder");
    assert_eq!(launch.environment["GIT_REPOSITORY_URL"], "https://github.com/acme/site");
    assert_eq!(launch.environment["PROJECT_ID"], "brave-tiger");
    assert_eq!(launch.environment["STORE_ENDPOINT"], "http://minio:9000/sites");
    assert_eq!(launch.environment["BROKER_HOST"], "mqtt");
    assert_eq!(launch.placement.subnets, vec!["subnet-a"]);
}

#[tokio::test]
async fn test_generated_slug_when_absent() {
    let runtime = Arc::new(RecordingRuntime::default());
    let (status, body) = post(
        runtime.clone(),
        "/api/deployments",
        r#"{"repositoryUrl":"https://github.com/acme/site"}"#,
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    let slug = body["data"]["slug"].as_str().unwrap();
    assert_eq!(slug.split('-').count(), 4);
    assert!(Slug::parse(slug).is_ok());
    assert_eq!(
        runtime.launches.lock().unwrap()[0].environment["PROJECT_ID"],
        slug
    );
}

#[tokio::test]
async fn test_missing_repository_url_is_rejected() {
    for body in [r#"{}"#, r#"{"repositoryUrl":"   "}"#, r#"{"slug":"brave-tiger"}"#] {
        let runtime = Arc::new(RecordingRuntime::default());
        let (status, response) = post(runtime.clone(), "/api/deployments", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
        assert_eq!(response["status"], "error");
        assert!(runtime.launches.lock().unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_invalid_slug_and_malformed_json_are_rejected() {
    let runtime = Arc::new(RecordingRuntime::default());
    let (status, _) = post(
        runtime.clone(),
        "/api/deployments",
        r#"{"repositoryUrl":"https://github.com/acme/site","slug":"Not_A_Label"}"#,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = post(runtime.clone(), "/api/deployments", "{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
    assert!(runtime.launches.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_launch_failure_returns_error_without_slug() {
    let runtime = Arc::new(RecordingRuntime {
        fail: true,
        ..Default::default()
    });
    let (status, body) = post(
        runtime,
        "/api/deployments",
        r#"{"repositoryUrl":"https://github.com/acme/site","slug":"brave-tiger"}"#,
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["status"], "error");
    assert!(body.get("data").is_none());
}

#[tokio::test]
async fn test_legacy_upload_route() {
    let runtime = Arc::new(RecordingRuntime::default());
    let (status, body) = post(
        runtime.clone(),
        "/api/upload",
        r#"{"gitUrl":"https://github.com/acme/site","existingSlug":"old-site"}"#,
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["slug"], "old-site");
    assert_eq!(runtime.launches.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_health() {
    let request = Request::builder()
        .uri("/api/health")
        .body(Body::empty())
        .unwrap();
    let response = build_router(state(Arc::new(RecordingRuntime::default())))
        .oneshot(request)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "dispatcher");
    assert!(body["timestamp"].is_string());
}
