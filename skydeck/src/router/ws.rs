//! WebSocket bridging
//!
//! Upgrade requests for the log stream are answered only after the upstream
//! connection is open; frames are then copied in both directions until
//! either side closes.

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        FromRequestParts, Request, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::{frame::coding::CloseCode, CloseFrame as UpstreamCloseFrame, Message as UpstreamMessage},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info};
use url::Url;

use crate::errors::PlatformError;

type Upstream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// `ws://` or `wss://` form of an `http://` or `https://` URL
pub fn websocket_url(url: &Url) -> Result<Url, PlatformError> {
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(PlatformError::ConfigError(format!(
                "unsupported URL scheme '{}'",
                other
            )))
        }
    };
    let mut url = url.clone();
    url.set_scheme(scheme)
        .map_err(|_| PlatformError::ConfigError("failed to set scheme".to_string()))?;
    Ok(url)
}

/// Connect to `target` and upgrade the client request onto it
pub async fn bridge(target: &str, request: Request) -> Result<Response, PlatformError> {
    let (mut parts, _body) = request.into_parts();
    let upgrade = WebSocketUpgrade::from_request_parts(&mut parts, &())
        .await
        .map_err(|e| PlatformError::ProxyError(e.to_string()))?;

    let (upstream, _) = connect_async(target)
        .await
        .map_err(|e| PlatformError::ProxyError(format!("websocket connect failed: {}", e)))?;
    info!("Bridging WebSocket to {}", target);

    Ok(upgrade.on_upgrade(move |socket| pump(socket, upstream)))
}

async fn pump(client: WebSocket, upstream: Upstream) {
    let (mut client_tx, mut client_rx) = client.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();

    let client_to_upstream = async {
        while let Some(Ok(message)) = client_rx.next().await {
            let Some(message) = to_upstream(message) else {
                continue;
            };
            let closing = matches!(message, UpstreamMessage::Close(_));
            if upstream_tx.send(message).await.is_err() || closing {
                break;
            }
        }
        let _ = upstream_tx.close().await;
    };

    let upstream_to_client = async {
        while let Some(Ok(message)) = upstream_rx.next().await {
            let Some(message) = to_client(message) else {
                continue;
            };
            let closing = matches!(message, Message::Close(_));
            if client_tx.send(message).await.is_err() || closing {
                break;
            }
        }
        let _ = client_tx.close().await;
    };

    tokio::select! {
        _ = client_to_upstream => debug!("Client side of bridge closed"),
        _ = upstream_to_client => debug!("Upstream side of bridge closed"),
    }
}

/// Pings and pongs are answered by each side's own stack and not copied
fn to_upstream(message: Message) -> Option<UpstreamMessage> {
    match message {
        Message::Text(text) => Some(UpstreamMessage::Text(text.as_str().to_string().into())),
        Message::Binary(data) => Some(UpstreamMessage::Binary(data)),
        Message::Close(frame) => Some(UpstreamMessage::Close(frame.map(|f| UpstreamCloseFrame {
            code: CloseCode::from(f.code),
            reason: f.reason.as_str().to_string().into(),
        }))),
        Message::Ping(_) | Message::Pong(_) => None,
    }
}

fn to_client(message: UpstreamMessage) -> Option<Message> {
    match message {
        UpstreamMessage::Text(text) => Some(Message::Text(text.as_str().to_string().into())),
        UpstreamMessage::Binary(data) => Some(Message::Binary(data)),
        UpstreamMessage::Close(frame) => Some(Message::Close(frame.map(|f| CloseFrame {
            code: f.code.into(),
            reason: f.reason.as_str().to_string().into(),
        }))),
        UpstreamMessage::Ping(_) | UpstreamMessage::Pong(_) | UpstreamMessage::Frame(_) => None,
    }
}
