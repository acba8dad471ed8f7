//! Request and response bodies of the container task-launch API

pub mod models;
