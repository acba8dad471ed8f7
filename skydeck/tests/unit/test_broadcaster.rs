//! Log broadcaster end-to-end tests

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures::{SinkExt, StreamExt};
use http_body_util::BodyExt;
use serde_json::Value;
use skydeck::broadcaster::registry::SubscriptionRegistry;
use skydeck::broadcaster::relay;
use skydeck::broadcaster::serve::{build_router, BroadcasterState};
use skydeck::broker::memory::MemoryBroker;
use skydeck::broker::topics::Topics;
use skydeck::broker::Broker;
use skydeck::router::classify::Classifier;
use skydeck::router::proxy::{RouterState, Upstreams};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;

use crate::common::{closed_addr, spawn_server};

type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Broadcaster with an in-memory broker feeding its relay
async fn spawn_broadcaster() -> (SocketAddr, Arc<MemoryBroker>, Arc<SubscriptionRegistry>) {
    let broker = Arc::new(MemoryBroker::default());
    let registry = Arc::new(SubscriptionRegistry::new());
    let stream = broker.subscribe_prefix(Topics::LOG_PREFIX).await.unwrap();
    tokio::spawn(relay::run(stream, registry.clone(), std::future::pending()));

    let state = Arc::new(BroadcasterState {
        registry: registry.clone(),
    });
    let addr = spawn_server(build_router(state)).await;
    (addr, broker, registry)
}

async fn next_json(client: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(10), client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn subscribe(client: &mut Client, topic: &str) {
    let frame = format!(r#"{{"event":"subscribe","data":"{}"}}"#, topic);
    client.send(Message::Text(frame.into())).await.unwrap();
    let ack = next_json(client).await;
    assert_eq!(ack["event"], "subscribed");
    assert_eq!(ack["data"], topic);
}

async fn publish(broker: &MemoryBroker, slug: &str, payload: &str) {
    broker
        .publish(&Topics::logs(slug), payload.as_bytes().to_vec())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_events_reach_subscribers_in_order() {
    let (addr, broker, _registry) = spawn_broadcaster().await;
    let (mut client, _) = connect_async(format!("ws://{}/socket/ws", addr)).await.unwrap();
    let (mut other, _) = connect_async(format!("ws://{}/socket/ws", addr)).await.unwrap();

    subscribe(&mut client, "logs-brave-tiger").await;
    subscribe(&mut other, "logs-calm-otter").await;

    publish(&broker, "brave-tiger", r#"{"message":"starting build process"}"#).await;
    publish(&broker, "calm-otter", r#"{"message":"not for you"}"#).await;
    publish(&broker, "brave-tiger", "definitely not json").await;
    publish(&broker, "brave-tiger", r#"{"message":"uploaded index.html"}"#).await;

    let first = next_json(&mut client).await;
    assert_eq!(first["event"], "log");
    assert_eq!(first["data"]["message"], "starting build process");
    let second = next_json(&mut client).await;
    assert_eq!(second["data"]["message"], "uploaded index.html");

    let theirs = next_json(&mut other).await;
    assert_eq!(theirs["data"]["message"], "not for you");
}

#[tokio::test]
async fn test_unsubscribe_and_disconnect() {
    let (addr, broker, registry) = spawn_broadcaster().await;
    let (mut client, _) = connect_async(format!("ws://{}/socket/ws", addr)).await.unwrap();
    subscribe(&mut client, "logs-brave-tiger").await;
    assert_eq!(registry.member_count("logs-brave-tiger").await, 1);

    client
        .send(Message::Text(
            r#"{"event":"unsubscribe","data":"logs-brave-tiger"}"#
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
    let ack = next_json(&mut client).await;
    assert_eq!(ack["event"], "unsubscribed");
    assert_eq!(registry.member_count("logs-brave-tiger").await, 0);

    publish(&broker, "brave-tiger", r#"{"message":"late"}"#).await;

    subscribe(&mut client, "logs-calm-otter").await;
    client.close(None).await.unwrap();

    // the server drops the connection once the close handshake is done
    for _ in 0..50 {
        if registry.connection_count().await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(registry.connection_count().await, 0);
    assert_eq!(registry.member_count("logs-calm-otter").await, 0);
}

#[tokio::test]
async fn test_plain_http_gets_liveness() {
    let state = Arc::new(BroadcasterState {
        registry: Arc::new(SubscriptionRegistry::new()),
    });
    for (method, uri) in [("GET", "/"), ("POST", "/anything"), ("GET", "/socket/ws")] {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = build_router(state.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{} {}", method, uri);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "broadcaster");
    }
}

#[tokio::test]
async fn test_router_bridges_log_stream() {
    let (broadcaster, broker, _registry) = spawn_broadcaster().await;
    let unused = closed_addr().await;
    let upstreams = Upstreams::new(
        &format!("http://{}", unused),
        &format!("http://{}", unused),
        &format!("http://{}", broadcaster),
        &format!("http://{}", unused),
    )
    .unwrap();
    let state = RouterState::new(Classifier::new("localhost"), upstreams, Duration::from_secs(5)).unwrap();
    let router = spawn_server(skydeck::router::serve::build_router(Arc::new(state))).await;

    let (mut client, _) = connect_async(format!("ws://{}/socket/ws", router)).await.unwrap();
    subscribe(&mut client, "logs-brave-tiger").await;

    publish(&broker, "brave-tiger", r#"{"message":"through the router"}"#).await;
    let event = next_json(&mut client).await;
    assert_eq!(event["event"], "log");
    assert_eq!(event["data"]["message"], "through the router");
}
