//! HTTP API: server, routing, and request/response mapping over the billing engine.

pub mod app;
pub mod context;
pub mod middleware;
