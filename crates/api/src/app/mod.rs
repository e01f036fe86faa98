//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: backends and the account flows
//! - `routes/`: HTTP handlers (account flows, protected resources)
//! - `dto.rs`: request DTOs, redirects, session cookie, JSON envelope mapping
//! - `errors.rs`: field errors and consistent error responses
//! - `messages.rs`: notice codes and texts

use std::sync::Arc;

use axum::{Extension, Router, middleware::from_fn_with_state, routing::get};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod extract;
pub mod messages;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs` and tests).
pub fn build_app(services: Arc<AppServices>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router(&services))
        .layer(
            ServiceBuilder::new()
                .layer(Extension(services.clone()))
                .layer(from_fn_with_state(services, middleware::session_middleware)),
        )
}

pub use services::AppServices;
