//! Issuing bearer tokens.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::extract::JsonBody;
use super::verify_password;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{Scope, Token};
use crate::state::AppState;
use crate::store::StoreError;
use crate::validation::{Validator, validate_email, validate_password_plaintext};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialsRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthenticationTokenEnvelope {
    pub authentication_token: Token,
}

/// Exchange email and password for an authentication token.
///
/// # Response Body (201)
///
/// ```json
/// { "authentication_token": { "token": "Y3QMGX3PJ3WLRL2YRTQGQ6", "expiry": "2024-01-16T10:30:00Z" } }
/// ```
#[instrument(skip_all)]
pub async fn create_authentication_token(
    State(state): State<AppState>,
    JsonBody(input): JsonBody<CredentialsRequest>,
) -> AppResult<(StatusCode, Json<AuthenticationTokenEnvelope>)> {
    let mut v = Validator::new();
    validate_email(&mut v, &input.email);
    validate_password_plaintext(&mut v, &input.password);
    v.finish()?;

    let user = match state.stores.users.get_by_email(&input.email).await {
        Ok(user) => user,
        Err(StoreError::RecordNotFound) => {
            metrics::record_auth_failure("invalid_credentials");
            return Err(AppError::InvalidCredentials);
        }
        Err(e) => return Err(e.into()),
    };

    if !verify_password(user.password.clone(), input.password).await? {
        warn!(user_id = user.id, "Password mismatch");
        metrics::record_auth_failure("invalid_credentials");
        return Err(AppError::InvalidCredentials);
    }

    let token = state
        .stores
        .tokens
        .new_token(user.id, state.config.auth_token_ttl, Scope::Authentication)
        .await?;

    info!(user_id = user.id, "Authentication token issued");
    Ok((
        StatusCode::CREATED,
        Json(AuthenticationTokenEnvelope {
            authentication_token: token,
        }),
    ))
}
