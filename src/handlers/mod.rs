mod extract;
mod health;
mod movies;
mod tokens;
mod users;

use axum::http::Method;
use tokio::task;

use crate::error::{AppError, AppResult};
use crate::models::Password;

pub use extract::{JsonBody, ResourceId};
pub use health::{debug_vars, healthcheck};
pub use movies::{
    EXPECTED_VERSION_HEADER, create_movie, delete_movie, list_movies, show_movie, update_movie,
};
pub use tokens::create_authentication_token;
pub use users::{activate_user, register_user};

/// Fallback for paths no route matches.
pub async fn not_found() -> AppError {
    AppError::NotFound
}

/// Fallback for known paths requested with an unsupported method.
pub async fn method_not_allowed(method: Method) -> AppError {
    AppError::MethodNotAllowed(method)
}

// Argon2 hashing is CPU bound and runs on the blocking pool.

async fn hash_password(plaintext: String) -> AppResult<Password> {
    task::spawn_blocking(move || Password::hash(&plaintext))
        .await
        .map_err(|e| AppError::Internal(format!("password hashing task failed: {e}")))?
        .map_err(|e| AppError::Internal(format!("password hashing failed: {e}")))
}

async fn verify_password(hash: Password, plaintext: String) -> AppResult<bool> {
    task::spawn_blocking(move || hash.matches(&plaintext))
        .await
        .map_err(|e| AppError::Internal(format!("password verification task failed: {e}")))
}
