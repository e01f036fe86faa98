use std::collections::BTreeMap;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use bastion_auth::{EncodeError, PasswordError, StoreError};

use crate::app::messages::Notice;

/// Per-field validation messages, rendered as `{"field": ["message", ...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<&'static str, Vec<&'static str>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: &'static str, notice: Notice) -> Self {
        let mut errors = Self::new();
        errors.push(field, notice);
        errors
    }

    pub fn push(&mut self, field: &'static str, notice: Notice) {
        self.0.entry(field).or_default().push(notice.text);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn field(&self, field: &str) -> &[&'static str] {
        self.0.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// `Ok(())` when empty, otherwise the errors as a `FlowError`.
    pub fn into_result(self) -> Result<(), FlowError> {
        if self.is_empty() { Ok(()) } else { Err(FlowError::Invalid(self)) }
    }
}

/// Failure of an account flow.
///
/// `Invalid` is the caller's fault (400 with field errors). The rest are
/// backend failures and map to 500.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("submitted form is invalid")]
    Invalid(FieldErrors),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Password(#[from] PasswordError),

    #[error(transparent)]
    Token(#[from] EncodeError),
}

impl FlowError {
    pub fn invalid(field: &'static str, notice: Notice) -> Self {
        FlowError::Invalid(FieldErrors::single(field, notice))
    }
}

pub fn flow_error_to_response(err: FlowError) -> axum::response::Response {
    match err {
        FlowError::Invalid(errors) => envelope(StatusCode::BAD_REQUEST, json!({ "errors": errors })),
        FlowError::Store(e) => {
            tracing::warn!(error = %e, "account flow failed in the identity store");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", "identity store unavailable")
        }
        FlowError::Password(e) => {
            tracing::warn!(error = %e, "password hashing failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "password_error", "password could not be processed")
        }
        FlowError::Token(e) => {
            tracing::warn!(error = %e, "token issue failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "token_error", "token could not be issued")
        }
    }
}

/// `{"meta": {"code": N}, "response": ...}` body used by every JSON flow.
pub fn envelope(status: StatusCode, response: serde_json::Value) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "meta": { "code": status.as_u16() },
            "response": response,
        })),
    )
        .into_response()
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
