//! Mapping guard decisions onto HTTP responses.

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::Response;

use bastion_auth::{GuardDecision, Identity};

use crate::app::{dto, errors, messages};

/// `Ok(identity)` when the handler may run, otherwise the response to send.
///
/// - anonymous on a session route: 302 to the login view with `next`
/// - anonymous on a token/basic route: 401 (basic adds the realm challenge)
/// - authenticated without the roles: 302 back with a notice, never 403
pub fn decision_to_result(decision: GuardDecision) -> Result<Identity, Response> {
    match decision {
        GuardDecision::Allow(identity) => Ok(identity),
        GuardDecision::RedirectToLogin { location } => Err(dto::redirect(&location, Some(messages::LOGIN))),
        GuardDecision::Unauthorized { challenge } => {
            let mut response = errors::json_error(StatusCode::UNAUTHORIZED, "unauthorized", "Unauthorized");
            if let Some(value) = challenge.and_then(|c| HeaderValue::from_str(&c).ok()) {
                response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
            }
            Err(response)
        }
        GuardDecision::Denied { location, denied } => {
            tracing::debug!(requirement = %denied.requirement, "soft deny");
            Err(dto::redirect(&location, Some(messages::UNAUTHORIZED)))
        }
    }
}

#[cfg(test)]
mod tests {
    use bastion_auth::{PermissionDenied, PermissionRequirement};
    use bastion_core::IdentityId;

    use super::*;

    #[test]
    fn allow_passes_identity_through() {
        let identity = Identity::new(IdentityId::new(), "joe@lp.com");
        assert_eq!(decision_to_result(GuardDecision::Allow(identity.clone())).ok(), Some(identity));
    }

    #[test]
    fn basic_challenge_becomes_www_authenticate() {
        let response = decision_to_result(GuardDecision::Unauthorized {
            challenge: Some("Basic realm=\"Login Required\"".into()),
        })
        .unwrap_err();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Basic realm=\"Login Required\"");
    }

    #[test]
    fn denial_is_a_redirect_not_a_403() {
        let response = decision_to_result(GuardDecision::Denied {
            location: "/".into(),
            denied: PermissionDenied {
                requirement: PermissionRequirement::all_of(["admin"]),
                held: vec![],
            },
        })
        .unwrap_err();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[messages::NOTICE_HEADER], "UNAUTHORIZED");
    }
}
