//! Request and response bodies of the skydeck HTTP APIs

pub mod models;
