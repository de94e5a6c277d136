//! HTTP API for Shellgate

mod health;

pub use health::health_routes;
