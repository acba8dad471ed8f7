//! Traffic router tests against loopback upstreams

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::body::{Body, Bytes};
use axum::extract::Request as UpstreamRequest;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::response::IntoResponse;
use axum::Router;
use http_body_util::BodyExt;
use skydeck::router::classify::Classifier;
use skydeck::router::proxy::{RouterState, Upstreams};
use skydeck::router::serve::build_router;
use tokio::net::TcpListener;
use tower::ServiceExt;

use crate::common::{closed_addr, spawn_server};

/// (path and query, Host header) of each request an upstream saw
type Seen = Arc<Mutex<Vec<(String, String)>>>;

async fn spawn_store(seen: Seen) -> SocketAddr {
    let app = Router::new().fallback(move |request: UpstreamRequest| {
        let seen = seen.clone();
        async move {
            let host = request
                .headers()
                .get(header::HOST)
                .and_then(|h| h.to_str().ok())
                .unwrap_or_default()
                .to_string();
            let path = request.uri().to_string();
            seen.lock().unwrap().push((path, host));
            (
                [
                    (header::CONTENT_TYPE, "text/html"),
                    (header::CACHE_CONTROL, "max-age=60"),
                    (header::ETAG, "\"abc\""),
                    (header::HeaderName::from_static("x-amz-request-id"), "REQ1"),
                ],
                "<html>site</html>",
            )
        }
    });
    spawn_server(app).await
}

async fn spawn_dispatcher(seen: Seen) -> SocketAddr {
    let app = Router::new().fallback(move |headers: HeaderMap, request: UpstreamRequest| {
        let seen = seen.clone();
        async move {
            let path = request.uri().to_string();
            let host = headers
                .get(header::HOST)
                .and_then(|h| h.to_str().ok())
                .unwrap_or_default()
                .to_string();
            let body: Bytes = request.into_body().collect().await.unwrap().to_bytes();
            seen.lock().unwrap().push((path, host));
            (
                StatusCode::ACCEPTED,
                [(header::HeaderName::from_static("x-dispatcher"), "yes")],
                body,
            )
                .into_response()
        }
    });
    spawn_server(app).await
}

fn router(landing: SocketAddr, dispatcher: SocketAddr, broadcaster: SocketAddr, store: SocketAddr) -> Router {
    router_with_timeout(landing, dispatcher, broadcaster, store, Duration::from_secs(5))
}

fn router_with_timeout(
    landing: SocketAddr,
    dispatcher: SocketAddr,
    broadcaster: SocketAddr,
    store: SocketAddr,
    timeout: Duration,
) -> Router {
    let upstreams = Upstreams::new(
        &format!("http://{}", landing),
        &format!("http://{}", dispatcher),
        &format!("http://{}", broadcaster),
        &format!("http://{}", store),
    )
    .unwrap();
    let state = RouterState::new(Classifier::new("platform.example:8000"), upstreams, timeout).unwrap();
    build_router(Arc::new(state))
}

fn request(method: &str, host: &str, uri: &str, body: Body) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::HOST, host)
        .body(body)
        .unwrap()
}

#[tokio::test]
async fn test_subdomain_root_serves_index_from_store() {
    let seen: Seen = Default::default();
    let store = spawn_store(seen.clone()).await;
    let unused = closed_addr().await;
    let app = router(unused, unused, unused, store);

    let response = app
        .oneshot(request("GET", "foo.platform.example:8000", "/", Body::empty()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    assert_eq!(headers[header::CONTENT_TYPE], "text/html");
    assert_eq!(headers[header::CACHE_CONTROL], "max-age=60");
    assert_eq!(headers[header::ETAG], "\"abc\"");
    assert!(headers.get("x-amz-request-id").is_none());
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"<html>site</html>");

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, "/__outputs/foo/index.html");
    assert_eq!(seen[0].1, store.to_string());
}

#[tokio::test]
async fn test_asset_path_is_kept() {
    let seen: Seen = Default::default();
    let store = spawn_store(seen.clone()).await;
    let unused = closed_addr().await;
    let app = router(unused, unused, unused, store);

    let response = app
        .oneshot(request("GET", "brave-tiger.platform.example", "/assets/app.js?v=3", Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(seen.lock().unwrap()[0].0, "/__outputs/brave-tiger/assets/app.js?v=3");
}

#[tokio::test]
async fn test_api_requests_reach_dispatcher() {
    let seen: Seen = Default::default();
    let dispatcher = spawn_dispatcher(seen.clone()).await;
    let unused = closed_addr().await;
    let app = router(unused, dispatcher, unused, unused);

    let payload = r#"{"repositoryUrl":"https://github.com/acme/site"}"#;
    let response = app
        .oneshot(request("POST", "platform.example:8000", "/api/deployments", Body::from(payload)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(response.headers()["x-dispatcher"], "yes");
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], payload.as_bytes());

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].0, "/api/deployments");
    assert_eq!(seen[0].1, dispatcher.to_string());
}

#[tokio::test]
async fn test_landing_page_on_bare_domain() {
    let seen: Seen = Default::default();
    let landing = spawn_dispatcher(seen.clone()).await;
    let unused = closed_addr().await;
    let app = router(landing, unused, unused, unused);

    let response = app
        .oneshot(request("GET", "platform.example:8000", "/", Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(seen.lock().unwrap()[0].0, "/");
}

#[tokio::test]
async fn test_options_short_circuits() {
    let seen: Seen = Default::default();
    let store = spawn_store(seen.clone()).await;
    let dispatcher = spawn_dispatcher(seen.clone()).await;
    let app = router(dispatcher, dispatcher, dispatcher, store);

    let response = app
        .oneshot(request("OPTIONS", "foo.platform.example", "/api/deployments", Body::empty()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_METHODS],
        "GET, POST, PUT, DELETE, OPTIONS"
    );
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_unreachable_upstream_is_a_proxy_error() {
    let down = closed_addr().await;
    let app = router(down, down, down, down);

    let response = app
        .clone()
        .oneshot(request("GET", "foo.platform.example", "/", Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"proxy error occurred");

    // the router keeps serving
    let response = app
        .oneshot(request("OPTIONS", "foo.platform.example", "/", Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

/// Accepts connections and never answers on them
async fn spawn_silent_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    addr
}

#[tokio::test]
async fn test_silent_upstream_times_out_as_proxy_error() {
    let silent = spawn_silent_upstream().await;
    let unused = closed_addr().await;
    let app = router_with_timeout(unused, unused, unused, silent, Duration::from_millis(300));

    let started = Instant::now();
    let response = tokio::time::timeout(
        Duration::from_secs(10),
        app.oneshot(request("GET", "foo.platform.example", "/", Body::empty())),
    )
    .await
    .expect("router answered")
    .unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"proxy error occurred");
}

#[tokio::test]
async fn test_request_without_host_is_rejected() {
    let seen: Seen = Default::default();
    let store = spawn_store(seen.clone()).await;
    let unused = closed_addr().await;
    let app = router(unused, unused, unused, store);

    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    assert!(seen.lock().unwrap().is_empty());
}
