//! Log broadcaster
//!
//! Bridges build progress from the broker to browsers. Each WebSocket client
//! joins the topics it cares about and receives every progress event
//! published on them.

pub mod events;
pub mod registry;
pub mod relay;
pub mod serve;
pub mod socket;
