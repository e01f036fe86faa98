//! Example protected resources, one per guard flavour.

use std::sync::Arc;

use axum::{Json, Router, extract::Extension, response::IntoResponse, routing::get};

use bastion_auth::GuardPolicy;

use crate::app::routes::guarded;
use crate::app::services::AppServices;
use crate::context::{CurrentIdentity, SessionContext};

pub fn router(services: &Arc<AppServices>) -> Router {
    let protect = |path: &str, policy: GuardPolicy| guarded(services, policy, Router::new().route(path, get(whoami)));

    Router::new()
        .route("/", get(index))
        .merge(protect("/profile", GuardPolicy::login_required()))
        .merge(protect("/admin", GuardPolicy::roles_required(["admin"])))
        .merge(protect("/admin_and_editor", GuardPolicy::roles_required(["admin", "editor"])))
        .merge(protect("/admin_or_editor", GuardPolicy::roles_accepted(["admin", "editor"])))
        .merge(protect("/token", GuardPolicy::auth_token_required()))
        .merge(protect(
            "/token/editor",
            GuardPolicy::auth_token_required().and_roles_accepted(["editor", "author"]),
        ))
        .merge(protect("/http", GuardPolicy::http_auth_required()))
}

pub async fn index(Extension(session): Extension<SessionContext>) -> impl IntoResponse {
    Json(serde_json::json!({
        "authenticated": session.is_authenticated(),
        "email": session.identity().map(|i| i.email.clone()),
    }))
}

pub async fn whoami(Extension(current): Extension<CurrentIdentity>) -> impl IntoResponse {
    let identity = current.identity();
    Json(serde_json::json!({
        "id": identity.id.to_string(),
        "email": identity.email,
        "roles": identity.role_names(),
    }))
}
