//! Traffic router
//!
//! Single public entry point. Classifies every request by host and path and
//! forwards it to the landing page, the dispatcher, the broadcaster or the
//! artifact store.

pub mod classify;
pub mod cors;
pub mod proxy;
pub mod serve;
pub mod ws;
