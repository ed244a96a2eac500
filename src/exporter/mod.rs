//! Metrics exporter: exposition encoding and the HTTP server that serves it.

pub mod metrics;
pub mod server;
