//! Account registration and activation.
//!
//! # Flow
//!
//! 1. `POST /v1/users` creates an inactive account granted `movies:read`
//!    and emails an activation token (202 Accepted).
//! 2. `PUT /v1/users/activated` redeems that token and activates the account.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use super::extract::JsonBody;
use super::hash_password;
use crate::error::{AppError, AppResult};
use crate::models::{MOVIES_READ, NewUser, RegisterUserRequest, Scope, User};
use crate::state::AppState;
use crate::store::StoreError;
use crate::validation::{Validator, validate_token_plaintext, validate_user};

#[derive(Debug, Serialize)]
pub struct UserEnvelope {
    pub user: User,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActivateUserRequest {
    pub token: String,
}

#[instrument(skip_all)]
pub async fn register_user(
    State(state): State<AppState>,
    JsonBody(input): JsonBody<RegisterUserRequest>,
) -> AppResult<(StatusCode, Json<UserEnvelope>)> {
    let mut v = Validator::new();
    validate_user(&mut v, &input.name, &input.email, &input.password);
    v.finish()?;

    let password = hash_password(input.password).await?;
    let user = state
        .stores
        .users
        .insert(NewUser {
            name: input.name,
            email: input.email,
            password,
        })
        .await?;

    state
        .stores
        .permissions
        .add_for_user(user.id, &[MOVIES_READ])
        .await?;

    let token = state
        .stores
        .tokens
        .new_token(user.id, state.config.activation_token_ttl, Scope::Activation)
        .await?;

    let mailer = state.mailer.clone();
    let recipient = user.clone();
    state.spawn_background(async move {
        if let Err(e) = mailer.send_activation(&recipient, &token).await {
            error!(user_id = recipient.id, error = %e, "Failed to send activation email");
        }
    });

    info!(user_id = user.id, "User registered");
    Ok((StatusCode::ACCEPTED, Json(UserEnvelope { user })))
}

#[instrument(skip_all)]
pub async fn activate_user(
    State(state): State<AppState>,
    JsonBody(input): JsonBody<ActivateUserRequest>,
) -> AppResult<Json<UserEnvelope>> {
    let mut v = Validator::new();
    validate_token_plaintext(&mut v, &input.token);
    v.finish()?;

    let mut user = match state
        .stores
        .users
        .get_for_token(Scope::Activation, &input.token)
        .await
    {
        Ok(user) => user,
        Err(StoreError::RecordNotFound) => {
            return Err(AppError::validation(
                "token",
                "invalid or expired activation token",
            ));
        }
        Err(e) => return Err(e.into()),
    };

    user.activated = true;
    let user = state.stores.users.update(&user).await?;

    state
        .stores
        .tokens
        .delete_all_for_user(Scope::Activation, user.id)
        .await?;

    info!(user_id = user.id, "User activated");
    Ok(Json(UserEnvelope { user }))
}
