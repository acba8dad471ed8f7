//! CORS headers on router responses

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::Response,
};

const ALLOW_ORIGIN: &str = "*";
const ALLOW_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";
const ALLOW_HEADERS: &str = "Origin, X-Requested-With, Content-Type, Accept, Authorization";

fn cors_headers() -> [(header::HeaderName, HeaderValue); 3] {
    [
        (
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static(ALLOW_ORIGIN),
        ),
        (
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOW_METHODS),
        ),
        (
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOW_HEADERS),
        ),
    ]
}

/// Add CORS headers. Headers already present are kept.
pub fn apply(headers: &mut HeaderMap) {
    for (name, value) in cors_headers() {
        headers.entry(name).or_insert(value);
    }
}

fn plain(status: StatusCode, body: &'static str) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    apply(headers);
    response
}

/// Answer to an `OPTIONS` request
pub fn preflight() -> Response {
    plain(StatusCode::OK, "OK")
}

/// Answer to a request the router cannot place
pub fn bad_request(reason: &'static str) -> Response {
    plain(StatusCode::BAD_REQUEST, reason)
}

/// Answer when an upstream could not be reached
pub fn proxy_error() -> Response {
    plain(StatusCode::INTERNAL_SERVER_ERROR, "proxy error occurred")
}
