//! Reverse proxy

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    response::Response,
};
use http::{header, HeaderMap, HeaderName, HeaderValue, Method};
use tracing::{debug, error, warn};
use url::Url;

use crate::app::options::RouterOptions;
use crate::errors::PlatformError;
use crate::router::classify::{Classifier, RequestInfo, Route};
use crate::router::{cors, ws};
use crate::store::OUTPUTS_PREFIX;

/// Largest request body forwarded upstream
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Upper bound on establishing an upstream connection
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Response headers passed through from the store
const ARTIFACT_HEADERS: [HeaderName; 3] = [header::CONTENT_TYPE, header::CACHE_CONTROL, header::ETAG];

/// Connection scoped headers that are never forwarded
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Base URLs requests are forwarded to
#[derive(Debug, Clone)]
pub struct Upstreams {
    landing: String,
    dispatcher: String,
    broadcaster: String,
    broadcaster_ws: String,
    store_public: String,
    /// `Host` header sent to the store
    store_host: HeaderValue,
}

impl Upstreams {
    pub fn new(
        landing_url: &str,
        dispatcher_url: &str,
        broadcaster_url: &str,
        store_public_url: &str,
    ) -> Result<Self, PlatformError> {
        let store = parse_url(store_public_url)?;
        let host = store.host_str().ok_or_else(|| {
            PlatformError::ConfigError(format!("store URL has no host: {}", store_public_url))
        })?;
        let authority = match store.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        let store_host = HeaderValue::from_str(&authority)
            .map_err(|e| PlatformError::ConfigError(e.to_string()))?;

        Ok(Self {
            landing: trim(landing_url),
            dispatcher: trim(dispatcher_url),
            broadcaster: trim(broadcaster_url),
            broadcaster_ws: trim(ws::websocket_url(&parse_url(broadcaster_url)?)?.as_str()),
            store_public: trim(store_public_url),
            store_host,
        })
    }

    /// Full upstream URL for a classified request
    pub fn target(&self, route: &Route, path: &str, query: Option<&str>) -> String {
        let mut target = match route {
            Route::LogStream => format!("{}{}", self.broadcaster_ws, path),
            Route::Landing => format!("{}{}", self.landing, path),
            Route::Api => format!("{}{}", self.dispatcher, path),
            Route::LogPolling => format!("{}{}", self.broadcaster, path),
            Route::Artifact { slug } => {
                let path = if path == "/" { "/index.html" } else { path };
                format!("{}/{}/{}{}", self.store_public, OUTPUTS_PREFIX, slug, path)
            }
        };
        if let Some(query) = query {
            target.push('?');
            target.push_str(query);
        }
        target
    }

    pub fn store_host(&self) -> &HeaderValue {
        &self.store_host
    }
}

fn parse_url(value: &str) -> Result<Url, PlatformError> {
    Url::parse(value).map_err(|e| PlatformError::ConfigError(format!("invalid URL '{}': {}", value, e)))
}

fn trim(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// Router state shared across requests
pub struct RouterState {
    pub classifier: Classifier,
    pub upstreams: Upstreams,
    pub client: reqwest::Client,

    /// Time allowed between sending a request and receiving response headers.
    /// Response bodies stream without a deadline.
    pub upstream_timeout: Duration,
}

impl RouterState {
    pub fn new(
        classifier: Classifier,
        upstreams: Upstreams,
        upstream_timeout: Duration,
    ) -> Result<Self, PlatformError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(CONNECT_TIMEOUT.min(upstream_timeout))
            .build()?;
        Ok(Self {
            classifier,
            upstreams,
            client,
            upstream_timeout,
        })
    }

    pub fn from_options(options: &RouterOptions) -> Result<Self, PlatformError> {
        Self::new(
            Classifier::new(&options.platform_domain),
            Upstreams::new(
                &options.landing_url,
                &options.dispatcher_url,
                &options.broadcaster_url,
                &options.store_public_url,
            )?,
            options.upstream_timeout,
        )
    }
}

/// Handle every request the router receives
pub async fn proxy_handler(State(state): State<Arc<RouterState>>, request: Request) -> Response {
    if request.method() == Method::OPTIONS {
        return cors::preflight();
    }

    let host = request_host(&request);
    let path = request.uri().path().to_string();
    let route = state.classifier.classify(&RequestInfo {
        host: &host,
        path: &path,
        upgrade: is_upgrade(request.headers()),
    });
    if matches!(&route, Route::Artifact { slug } if slug.is_empty()) {
        warn!("rejecting request without a deployment host - {:?} {}", host, request.uri());
        return cors::bad_request("missing deployment host");
    }
    let target = state.upstreams.target(&route, &path, request.uri().query());
    debug!("proxying request - {}{} -> {}", host, request.uri(), target);

    let request_uri = request.uri().clone();
    let request_headers = request.headers().clone();
    let result = match route {
        Route::LogStream => ws::bridge(&target, request).await,
        _ => forward(&state, &route, &target, request).await,
    };

    match result {
        Ok(response) => {
            debug!("proxy response - {} for {}", response.status(), request_uri);
            response
        }
        Err(e) => {
            error!(
                "proxy error - {}; request URL - {}; target - {}; request headers - {:?}",
                e, request_uri, target, request_headers
            );
            cors::proxy_error()
        }
    }
}

async fn forward(
    state: &RouterState,
    route: &Route,
    target: &str,
    request: Request,
) -> Result<Response, PlatformError> {
    let (parts, body) = request.into_parts();
    let body = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| PlatformError::ProxyError(format!("failed to read request body: {}", e)))?;

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);
    headers.remove(header::HOST);
    if matches!(route, Route::Artifact { .. }) {
        headers.insert(header::HOST, state.upstreams.store_host().clone());
    }

    let send = state
        .client
        .request(parts.method, target)
        .headers(headers)
        .body(body)
        .send();
    let upstream = tokio::time::timeout(state.upstream_timeout, send)
        .await
        .map_err(|_| {
            PlatformError::ProxyError(format!(
                "no response from upstream within {:?}",
                state.upstream_timeout
            ))
        })??;

    let status = upstream.status();
    let mut response_headers = match route {
        Route::Artifact { .. } => pick(upstream.headers(), &ARTIFACT_HEADERS),
        _ => {
            let mut headers = upstream.headers().clone();
            strip_hop_by_hop(&mut headers);
            headers
        }
    };
    cors::apply(&mut response_headers);

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    Ok(response)
}

fn request_host(request: &Request) -> String {
    request
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
        .or_else(|| request.uri().authority().map(|a| a.to_string()))
        .unwrap_or_default()
}

/// Whether a request asks to switch to the WebSocket protocol
pub fn is_upgrade(headers: &HeaderMap) -> bool {
    let connection_upgrade = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    let websocket = headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("websocket"));
    connection_upgrade && websocket
}

/// Remove hop-by-hop headers, including those named by `Connection`
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();
    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

fn pick(headers: &HeaderMap, names: &[HeaderName]) -> HeaderMap {
    let mut picked = HeaderMap::new();
    for name in names {
        if let Some(value) = headers.get(name) {
            picked.insert(name.clone(), value.clone());
        }
    }
    picked
}
