use std::collections::BTreeMap;

use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use crate::store::StoreError;

/// Message returned for every unexpected failure. Never carries detail.
pub const SERVER_ERROR_MESSAGE: &str =
    "the server encountered a problem and could not process your request";

/// Application-wide error types with appropriate HTTP status codes.
///
/// Every variant renders as a JSON object with a single `error` field. The
/// `Internal` payload is logged server-side and replaced by
/// [`SERVER_ERROR_MESSAGE`] in the response.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("invalid or missing authentication token")]
    InvalidAuthenticationToken,

    #[error("invalid authentication credentials")]
    InvalidCredentials,

    #[error("you must be authenticated to access this resource")]
    AuthenticationRequired,

    #[error("your user account must be activated to access this resource")]
    InactiveAccount,

    #[error("your user account doesn't have the necessary permissions to access this resource")]
    NotPermitted,

    #[error("the requested resource could not be found")]
    NotFound,

    #[error("the {0} method is not supported for this resource")]
    MethodNotAllowed(Method),

    #[error("{0}")]
    BadRequest(String),

    #[error("unable to update the record due to an edit conflict, please try again")]
    EditConflict,

    #[error("failed validation")]
    FailedValidation(BTreeMap<String, String>),
}

impl AppError {
    /// HTTP status code this error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Internal(_) | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::InvalidAuthenticationToken
            | AppError::InvalidCredentials
            | AppError::AuthenticationRequired => StatusCode::UNAUTHORIZED,
            AppError::InactiveAccount | AppError::NotPermitted => StatusCode::FORBIDDEN,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::EditConflict => StatusCode::CONFLICT,
            AppError::FailedValidation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }

    /// Build a single-field validation failure.
    pub fn validation(field: &str, message: &str) -> Self {
        AppError::FailedValidation(BTreeMap::from([(field.to_string(), message.to_string())]))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Log the full error details server-side for debugging
        // but only expose sanitized messages to clients
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }

        let mut response = match self {
            AppError::FailedValidation(errors) => {
                (status, axum::Json(json!({ "error": errors }))).into_response()
            }
            AppError::Internal(_) | AppError::ConfigError(_) => {
                error_response(status, SERVER_ERROR_MESSAGE)
            }
            other => error_response(status, &other.to_string()),
        };

        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }

        response
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RecordNotFound => AppError::NotFound,
            StoreError::EditConflict => AppError::EditConflict,
            StoreError::DuplicateEmail => {
                AppError::validation("email", "a user with this email address already exists")
            }
            StoreError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

/// Build a `{"error": message}` JSON response without logging.
pub fn error_response(status: StatusCode, message: &str) -> Response {
    (status, axum::Json(json!({ "error": message }))).into_response()
}

/// Turn a serde error message into something safe to show a client.
///
/// Serde messages can name internal types, so only the field name is kept
/// when one can be recovered.
pub fn sanitize_serde_error(msg: &str) -> String {
    if msg.contains("missing field")
        && let Some(field) = backticked(msg)
    {
        return format!("body is missing field \"{field}\"");
    }

    if msg.contains("unknown field")
        && let Some(field) = backticked(msg)
    {
        return format!("body contains unknown key \"{field}\"");
    }

    if msg.contains("invalid runtime format") {
        return "invalid runtime format".to_string();
    }

    if msg.contains("invalid type") {
        return "body contains incorrect JSON type".to_string();
    }

    if msg.contains("EOF while parsing") {
        return "body contains badly-formed JSON".to_string();
    }

    "body contains invalid JSON".to_string()
}

fn backticked(msg: &str) -> Option<&str> {
    let start = msg.find('`')?;
    let rest = msg.get(start + 1..)?;
    let end = rest.find('`')?;
    rest.get(..end)
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_internal_error_hides_detail() {
        let response = AppError::Internal("db exploded at 0xdeadbeef".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert_eq!(body["error"], SERVER_ERROR_MESSAGE);
    }

    #[tokio::test]
    async fn test_unauthorized_sets_www_authenticate() {
        let response = AppError::InvalidAuthenticationToken.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");

        let body = body_json(response).await;
        assert_eq!(body["error"], "invalid or missing authentication token");
    }

    #[tokio::test]
    async fn test_validation_error_body_is_field_map() {
        let response = AppError::validation("token", "must be provided").into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = body_json(response).await;
        assert_eq!(body["error"]["token"], "must be provided");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::RateLimited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(AppError::AuthenticationRequired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::InactiveAccount.status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::NotPermitted.status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::EditConflict.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_store_errors_convert() {
        assert!(matches!(
            AppError::from(StoreError::RecordNotFound),
            AppError::NotFound
        ));
        assert!(matches!(
            AppError::from(StoreError::DuplicateEmail),
            AppError::FailedValidation(_)
        ));
    }

    #[test]
    fn test_sanitize_missing_field() {
        let msg = "missing field `title` at line 1 column 2";
        assert_eq!(sanitize_serde_error(msg), "body is missing field \"title\"");
    }

    #[test]
    fn test_sanitize_unknown_field() {
        let msg = "unknown field `rating`, expected one of `title`, `year`";
        assert_eq!(sanitize_serde_error(msg), "body contains unknown key \"rating\"");
    }

    #[test]
    fn test_sanitize_fallback() {
        assert_eq!(
            sanitize_serde_error("something odd"),
            "body contains invalid JSON"
        );
    }
}
