//! rrproxy - a round-robin HTTP reverse-proxy load balancer.
//!
//! Requests are spread over a fixed, ordered set of HTTP backends:
//! - round-robin selection that skips backends marked dead
//! - bounded same-backend retries, then failover to the next live backend
//! - periodic active health checks that revive or retire backends
//! - Prometheus metrics and structured logging

pub mod backend;
pub mod config;
pub mod frontend;
pub mod health;
pub mod metrics;
pub mod proxy;
pub mod util;

pub use config::Config;
