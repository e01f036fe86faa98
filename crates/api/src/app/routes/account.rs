use std::sync::Arc;

use axum::{
    Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    middleware::from_fn_with_state,
    response::Response,
    routing::{get, post},
};
use serde_json::json;

use bastion_auth::GuardPolicy;

use crate::app::errors::{self, FlowError};
use crate::app::extract::Payload;
use crate::app::services::{AppServices, FlowOutcome, ResetCheck};
use crate::app::{dto, routes::guarded};
use crate::context::{CurrentIdentity, SessionContext};
use crate::middleware::unit_of_work_middleware;

/// Account endpoints, mounted at the configured URLs. Optional flows are only
/// routed when their feature flag is on. Each request is one unit of work on
/// the identity store.
pub fn router(services: &Arc<AppServices>) -> Router {
    let config = &services.config;

    let mut router = Router::new()
        .route(&config.login_url, post(login))
        .route(&config.logout_url, get(logout));

    if config.passwordless {
        router = router.route(&format!("{}/:token", config.login_url), get(token_login));
    }
    if config.registerable {
        router = router.route(&config.register_url, post(register));
    }
    if config.confirmable {
        router = router
            .route(&config.confirm_url, post(send_confirmation))
            .route(&format!("{}/:token", config.confirm_url), get(confirm_email));
    }
    if config.recoverable {
        router = router
            .route(&config.reset_url, post(forgot_password))
            .route(
                &format!("{}/:token", config.reset_url),
                get(reset_password_form).post(reset_password),
            );
    }
    if config.changeable {
        router = router.merge(guarded(
            services,
            GuardPolicy::login_required(),
            Router::new().route(&config.change_url, post(change_password)),
        ));
    }

    router.route_layer(from_fn_with_state(services.clone(), unit_of_work_middleware))
}

fn respond(result: Result<FlowOutcome, FlowError>, json: bool, include_auth_token: bool) -> Response {
    match result {
        Ok(outcome) => dto::outcome_response(outcome, json, include_auth_token),
        Err(e) => errors::flow_error_to_response(e),
    }
}

/// Authenticated users are sent to the post-login view instead of the form.
fn already_logged_in(services: &AppServices, session: &SessionContext) -> Option<Response> {
    session
        .is_authenticated()
        .then(|| dto::redirect(&services.config.post_login_view, None))
}

pub async fn login(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<SessionContext>,
    Query(query): Query<dto::NextQuery>,
    Payload { body, json }: Payload<dto::LoginRequest>,
) -> Response {
    if let Some(response) = already_logged_in(&services, &session) {
        return response;
    }

    if services.config.passwordless {
        return respond(services.send_login_instructions(&body.email), json, false);
    }

    let next = body.next.as_deref().or(query.next.as_deref());
    respond(services.login(&body.email, &body.password, next, &session), json, true)
}

pub async fn logout(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<SessionContext>,
    Query(query): Query<dto::NextQuery>,
) -> Response {
    respond(services.logout(&session, query.next.as_deref()), false, false)
}

pub async fn register(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<SessionContext>,
    Payload { body, json }: Payload<dto::RegisterRequest>,
) -> Response {
    if let Some(response) = already_logged_in(&services, &session) {
        return response;
    }
    respond(services.register(&body.into(), &session), json, false)
}

pub async fn token_login(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<SessionContext>,
    Path(token): Path<String>,
) -> Response {
    if let Some(response) = already_logged_in(&services, &session) {
        return response;
    }
    respond(services.token_login(&token, &session), false, false)
}

pub async fn send_confirmation(
    Extension(services): Extension<Arc<AppServices>>,
    Payload { body, json }: Payload<dto::EmailRequest>,
) -> Response {
    respond(services.send_confirmation(&body.email), json, false)
}

pub async fn confirm_email(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<SessionContext>,
    Path(token): Path<String>,
) -> Response {
    respond(services.confirm_email(&token, &session), false, false)
}

pub async fn forgot_password(
    Extension(services): Extension<Arc<AppServices>>,
    Payload { body, json }: Payload<dto::EmailRequest>,
) -> Response {
    respond(services.forgot_password(&body.email), json, false)
}

/// Link target from the reset mail: validates the token before the form is shown.
pub async fn reset_password_form(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<SessionContext>,
    Path(token): Path<String>,
) -> Response {
    if let Some(response) = already_logged_in(&services, &session) {
        return response;
    }
    match services.check_reset_token(&token) {
        Ok(ResetCheck::Ready(identity)) => errors::envelope(
            StatusCode::OK,
            json!({ "user": dto::user_json(&identity, false), "reset_token": "valid" }),
        ),
        Ok(ResetCheck::Rejected(outcome)) => dto::outcome_response(outcome, false, false),
        Err(e) => errors::flow_error_to_response(e),
    }
}

pub async fn reset_password(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(session): Extension<SessionContext>,
    Path(token): Path<String>,
    Payload { body, json }: Payload<dto::ResetPasswordRequest>,
) -> Response {
    if let Some(response) = already_logged_in(&services, &session) {
        return response;
    }
    let result = services.reset_password(&token, &body.password, &body.password_confirm, &session);
    respond(result, json, false)
}

pub async fn change_password(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(current): Extension<CurrentIdentity>,
    Payload { body, json }: Payload<dto::ChangePasswordRequest>,
) -> Response {
    respond(services.change_password(current.identity(), &body.into()), json, false)
}
