//! Skydeck
//!
//! Preview deployments for static front-end projects: a dispatcher that
//! launches build containers, the build executor that runs inside them, a
//! log broadcaster that streams build progress to browsers and a traffic
//! router that serves every deployment under its own subdomain.

pub mod app;
pub mod broadcaster;
pub mod broker;
pub mod builder;
pub mod dispatcher;
pub mod errors;
pub mod logs;
pub mod router;
pub mod runtime;
pub mod slug;
pub mod store;
pub mod utils;
