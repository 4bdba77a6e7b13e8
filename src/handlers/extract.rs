//! Request extractors whose rejections render as JSON `AppError`s.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, FromRequestParts, Path, Request};
use axum::http::StatusCode;
use axum::http::request::Parts;
use serde::de::DeserializeOwned;

use crate::error::{AppError, sanitize_serde_error};

/// `Json<T>` whose failures become 400 responses with a client-safe message.
#[derive(Debug)]
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(JsonBody(value)),
            Err(rejection) => Err(json_rejection(rejection)),
        }
    }
}

fn json_rejection(rejection: JsonRejection) -> AppError {
    let message = match rejection {
        JsonRejection::JsonDataError(e) => sanitize_serde_error(&e.body_text()),
        JsonRejection::JsonSyntaxError(e) => sanitize_serde_error(&e.body_text()),
        JsonRejection::MissingJsonContentType(_) => {
            "request must have a Content-Type of application/json".to_string()
        }
        JsonRejection::BytesRejection(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            "body is too large".to_string()
        }
        _ => "body contains invalid JSON".to_string(),
    };
    AppError::BadRequest(message)
}

/// A positive integer `{id}` path parameter.
///
/// Anything else (negative, zero, fractional, non-numeric) is a 404, since no
/// resource can live at such a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceId(pub i64);

impl<S> FromRequestParts<S> for ResourceId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(raw) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|_| AppError::NotFound)?;
        parse_id(&raw).map(ResourceId).ok_or(AppError::NotFound)
    }
}

fn parse_id(raw: &str) -> Option<i64> {
    raw.parse::<i64>().ok().filter(|id| *id >= 1)
}
