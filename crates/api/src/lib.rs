//! HTTP API: routing, guard middleware and account flows over axum.

pub mod app;
pub mod authz;
pub mod context;
pub mod middleware;
