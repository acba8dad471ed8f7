//! Deployment dispatcher
//!
//! Accepts deployment requests, assigns a slug and launches one build
//! container per request.

pub mod handlers;
pub mod serve;
pub mod state;
