use axum::extract::{Form, FromRequest, Request};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::app::{dto, errors};

/// Request body accepted as either JSON or an urlencoded form.
///
/// `json` records which one arrived so the handler can answer in kind.
#[derive(Debug)]
pub struct Payload<T> {
    pub body: T,
    pub json: bool,
}

#[axum::async_trait]
impl<S, T> FromRequest<S> for Payload<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send + 'static,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        if dto::is_json(req.headers()) {
            let Json(body) = Json::<T>::from_request(req, state)
                .await
                .map_err(|e| malformed(e.body_text()))?;
            return Ok(Self { body, json: true });
        }

        let Form(body) = Form::<T>::from_request(req, state)
            .await
            .map_err(|e| malformed(e.body_text()))?;
        Ok(Self { body, json: false })
    }
}

fn malformed(detail: String) -> Response {
    errors::envelope(StatusCode::BAD_REQUEST, json!({ "errors": { "body": [detail] } }))
}
