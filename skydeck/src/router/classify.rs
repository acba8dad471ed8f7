//! Request classification
//!
//! An ordered rule table evaluated top-down; the first matching rule decides
//! the route. Requests no rule claims are artifact requests for the slug in
//! the first host label.

use crate::utils::strip_port;

/// Path prefix of broadcaster traffic
pub const SOCKET_PREFIX: &str = "/socket/";

/// Path prefix of dispatcher traffic
pub const API_PREFIX: &str = "/api/";

/// Where a request is forwarded to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// WebSocket upgrade bridged to the broadcaster
    LogStream,
    /// Landing page on the bare platform domain
    Landing,
    Api,
    /// Plain HTTP traffic for the broadcaster
    LogPolling,
    /// Deployed site files from the store
    Artifact { slug: String },
}

/// The parts of a request classification looks at
#[derive(Debug, Clone, Copy)]
pub struct RequestInfo<'a> {
    /// `Host` header value, may carry a port
    pub host: &'a str,
    pub path: &'a str,
    /// Whether the request asks for a WebSocket upgrade
    pub upgrade: bool,
}

struct Rule {
    matches: fn(&RequestInfo<'_>, &str) -> bool,
    route: Route,
}

fn is_log_stream(req: &RequestInfo<'_>, _domain: &str) -> bool {
    req.upgrade && req.path.starts_with(SOCKET_PREFIX)
}

fn is_landing(req: &RequestInfo<'_>, domain: &str) -> bool {
    req.path == "/" && hostname(req.host) == domain
}

fn is_api(req: &RequestInfo<'_>, _domain: &str) -> bool {
    req.path.starts_with(API_PREFIX)
}

fn is_log_polling(req: &RequestInfo<'_>, _domain: &str) -> bool {
    req.path.starts_with(SOCKET_PREFIX)
}

fn hostname(host: &str) -> String {
    strip_port(host).to_ascii_lowercase()
}

pub struct Classifier {
    /// Bare platform hostname, without port
    domain: String,
    rules: Vec<Rule>,
}

impl Classifier {
    pub fn new(platform_domain: &str) -> Self {
        let rules = vec![
            Rule {
                matches: is_log_stream,
                route: Route::LogStream,
            },
            Rule {
                matches: is_landing,
                route: Route::Landing,
            },
            Rule {
                matches: is_api,
                route: Route::Api,
            },
            Rule {
                matches: is_log_polling,
                route: Route::LogPolling,
            },
        ];
        Self {
            domain: hostname(platform_domain),
            rules,
        }
    }

    pub fn classify(&self, req: &RequestInfo<'_>) -> Route {
        self.rules
            .iter()
            .find(|rule| (rule.matches)(req, &self.domain))
            .map(|rule| rule.route.clone())
            .unwrap_or_else(|| Route::Artifact {
                slug: subdomain(req.host),
            })
    }
}

/// First dot-delimited label of the host, lowercased
pub fn subdomain(host: &str) -> String {
    let name = hostname(host);
    match name.split_once('.') {
        Some((label, _)) => label.to_string(),
        None => name,
    }
}
