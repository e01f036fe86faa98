use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;

use bastion_auth::Identity;

use crate::app::errors;
use crate::app::messages::{NOTICE_HEADER, Notice};
use crate::app::services::{ChangePasswordForm, FlowOutcome, RegisterForm, SessionChange};
use crate::context::PendingCommit;

pub const SESSION_COOKIE: &str = "session";

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    pub next: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EmailRequest {
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    pub password_confirm: Option<String>,
}

impl From<RegisterRequest> for RegisterForm {
    fn from(value: RegisterRequest) -> Self {
        Self {
            email: value.email,
            password: value.password,
            password_confirm: value.password_confirm,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ResetPasswordRequest {
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub password_confirm: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChangePasswordRequest {
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub new_password: String,
    #[serde(default)]
    pub new_password_confirm: String,
}

impl From<ChangePasswordRequest> for ChangePasswordForm {
    fn from(value: ChangePasswordRequest) -> Self {
        Self {
            password: value.password,
            new_password: value.new_password,
            new_password_confirm: value.new_password_confirm,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct NextQuery {
    pub next: Option<String>,
}

// -------------------------
// Response mapping
// -------------------------

/// 302 to `location`, with the notice code as a header when present.
pub fn redirect(location: &str, notice: Option<Notice>) -> Response {
    let mut response = StatusCode::FOUND.into_response();
    if let Ok(value) = HeaderValue::from_str(location) {
        response.headers_mut().insert(header::LOCATION, value);
    }
    if let Some(notice) = notice {
        response
            .headers_mut()
            .insert(NOTICE_HEADER, HeaderValue::from_static(notice.code));
    }
    response
}

/// Render a flow outcome: a redirect for form posts and token links, the
/// JSON envelope for JSON requests.
pub fn outcome_response(outcome: FlowOutcome, json: bool, include_auth_token: bool) -> Response {
    let mut response = if json {
        let user = outcome.identity.as_ref().map(|i| user_json(i, include_auth_token));
        errors::envelope(StatusCode::OK, json!({ "user": user }))
    } else {
        redirect(&outcome.location, outcome.notice)
    };

    apply_session_cookie(response.headers_mut(), outcome.session);
    if outcome.commit {
        response.extensions_mut().insert(PendingCommit);
    }
    response
}

pub fn user_json(identity: &Identity, include_auth_token: bool) -> serde_json::Value {
    let mut user = json!({ "id": identity.id.to_string() });
    if include_auth_token {
        user["authentication_token"] = json!(identity.authentication_token);
    }
    user
}

fn apply_session_cookie(headers: &mut HeaderMap, change: SessionChange) {
    let cookie = match change {
        SessionChange::Keep => return,
        SessionChange::Start(session_id) => {
            format!("{SESSION_COOKIE}={session_id}; Path=/; HttpOnly; SameSite=Lax")
        }
        SessionChange::End => format!("{SESSION_COOKIE}=; Path=/; HttpOnly; Max-Age=0"),
    };
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        headers.append(header::SET_COOKIE, value);
    }
}

/// Session id from the request's `Cookie` header, if any.
pub fn session_cookie(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

pub fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim_start().starts_with("application/json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::messages;

    #[test]
    fn redirect_carries_location_and_notice() {
        let response = redirect("/confirm", Some(messages::INVALID_CONFIRMATION_TOKEN));
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], "/confirm");
        assert_eq!(response.headers()[NOTICE_HEADER], "INVALID_CONFIRMATION_TOKEN");
    }

    #[test]
    fn session_cookie_is_found_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; session=abc; lang=en"));
        assert_eq!(session_cookie(&headers), Some("abc"));

        headers.insert(header::COOKIE, HeaderValue::from_static("session="));
        assert_eq!(session_cookie(&headers), None);
    }

    #[test]
    fn json_detection_uses_content_type() {
        let mut headers = HeaderMap::new();
        assert!(!is_json(&headers));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json; charset=utf-8"));
        assert!(is_json(&headers));
    }
}
