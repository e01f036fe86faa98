use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::Response,
};

use bastion_auth::{BasicCredentials, GuardPolicy, GuardRequest};
use bastion_core::SessionId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::authz;
use crate::context::{CurrentIdentity, PendingCommit, SessionContext};

/// Resolve the session cookie into a [`SessionContext`] extension.
///
/// Unknown, malformed or orphaned sessions are treated as anonymous.
pub async fn session_middleware(State(services): State<Arc<AppServices>>, mut req: Request, next: Next) -> Response {
    let context = dto::session_cookie(req.headers())
        .and_then(|raw| raw.parse::<SessionId>().ok())
        .and_then(|session_id| {
            services
                .resolve_session(session_id)
                .filter(|identity| identity.active)
                .map(|identity| SessionContext::new(session_id, identity))
        })
        .unwrap_or_default();

    req.extensions_mut().insert(context);
    next.run(req).await
}

/// Run an account request as one unit of work on the identity store.
///
/// Staged writes are committed only when the response carries
/// [`PendingCommit`] and is a success or redirect; every other outcome rolls
/// them back. A failed commit is rolled back too and replaces the response
/// with a 500.
pub async fn unit_of_work_middleware(State(services): State<Arc<AppServices>>, req: Request, next: Next) -> Response {
    let _unit = services.unit_of_work.lock().await;
    let mut response = next.run(req).await;

    let wants_commit = response.extensions_mut().remove::<PendingCommit>().is_some();
    let status = response.status();
    if !(wants_commit && (status.is_success() || status.is_redirection())) {
        rollback(&services);
        return response;
    }

    match services.identities.commit() {
        Ok(()) => response,
        Err(e) => {
            tracing::warn!(error = %e, "commit after response failed");
            rollback(&services);
            errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "commit_failed", "changes could not be saved")
        }
    }
}

fn rollback(services: &AppServices) {
    if let Err(e) = services.identities.rollback() {
        tracing::warn!(error = %e, "rollback of staged identity changes failed");
    }
}

/// State for one guarded route: the services plus that route's policy.
#[derive(Clone)]
pub struct GuardState {
    pub services: Arc<AppServices>,
    pub policy: Arc<GuardPolicy>,
}

impl GuardState {
    pub fn new(services: Arc<AppServices>, policy: GuardPolicy) -> Self {
        Self {
            services,
            policy: Arc::new(policy),
        }
    }
}

/// Run the access guard for the route's policy. On allow the admitted
/// identity is available to the handler as [`CurrentIdentity`].
pub async fn guard_middleware(State(state): State<GuardState>, mut req: Request, next: Next) -> Response {
    let guard_request = guard_request(&state.services, &req);

    match authz::decision_to_result(state.services.guard.check(&state.policy, &guard_request)) {
        Ok(identity) => {
            req.extensions_mut().insert(CurrentIdentity(identity));
            next.run(req).await
        }
        Err(response) => response,
    }
}

fn guard_request(services: &AppServices, req: &Request) -> GuardRequest {
    let headers = req.headers();
    let config = &services.config;

    let mut guard_request = GuardRequest::new(
        req.uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| req.uri().path().to_string()),
    );
    guard_request.referrer = header_str(headers, header::REFERER.as_str()).map(str::to_string);
    guard_request.session_identity = req
        .extensions()
        .get::<SessionContext>()
        .and_then(|ctx| ctx.identity().cloned());
    guard_request.header_token = header_str(headers, &config.token_authentication_header).map(str::to_string);
    guard_request.query_token = req
        .uri()
        .query()
        .and_then(|q| query_param(q, &config.token_authentication_key));
    guard_request.basic =
        header_str(headers, header::AUTHORIZATION.as_str()).and_then(BasicCredentials::from_authorization_header);

    guard_request
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn query_param(query: &str, key: &str) -> Option<String> {
    serde_urlencoded::from_str::<Vec<(String, String)>>(query)
        .ok()?
        .into_iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_param_decodes_values() {
        assert_eq!(query_param("a=1&auth_token=12%2B3", "auth_token"), Some("12+3".to_string()));
        assert_eq!(query_param("a=1", "auth_token"), None);
    }
}
