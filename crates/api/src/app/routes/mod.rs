use std::sync::Arc;

use axum::{Router, middleware::from_fn_with_state};

use bastion_auth::GuardPolicy;

use crate::app::services::AppServices;
use crate::middleware::{GuardState, guard_middleware};

pub mod account;
pub mod protected;
pub mod system;

/// Put `routes` behind the access guard with `policy`.
pub fn guarded(services: &Arc<AppServices>, policy: GuardPolicy, routes: Router) -> Router {
    routes.route_layer(from_fn_with_state(GuardState::new(services.clone(), policy), guard_middleware))
}

/// Every routed endpoint except health.
pub fn router(services: &Arc<AppServices>) -> Router {
    Router::new()
        .merge(account::router(services))
        .merge(protected::router(services))
}
