//! Movie catalog endpoints.
//!
//! # Endpoints
//!
//! - `GET /v1/movies` - List all movies (`movies:read`)
//! - `POST /v1/movies` - Create a movie (`movies:write`)
//! - `GET /v1/movies/{id}` - Show one movie (`movies:read`)
//! - `PATCH /v1/movies/{id}` - Partial update (`movies:write`)
//! - `DELETE /v1/movies/{id}` - Delete (`movies:write`)
//!
//! # Optimistic Locking
//!
//! Every movie carries a `version`. A `PATCH` may send `X-Expected-Version`;
//! if it no longer matches, or another writer updates the movie first, the
//! request fails with 409 and the client should re-read and retry.

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::IntoResponse;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{info, instrument};

use super::extract::{JsonBody, ResourceId};
use crate::error::{AppError, AppResult};
use crate::models::{Movie, MovieUpdate, NewMovie};
use crate::state::AppState;
use crate::validation::{Validator, validate_movie};

/// Header carrying the version a `PATCH` expects to overwrite.
pub const EXPECTED_VERSION_HEADER: &str = "x-expected-version";

#[derive(Debug, Serialize)]
pub struct MovieEnvelope {
    pub movie: Movie,
}

#[derive(Debug, Serialize)]
pub struct MoviesEnvelope {
    pub movies: Vec<Movie>,
}

#[instrument(skip(state))]
pub async fn list_movies(State(state): State<AppState>) -> AppResult<Json<MoviesEnvelope>> {
    let movies = state.stores.movies.get_all().await?;
    Ok(Json(MoviesEnvelope { movies }))
}

#[instrument(skip(state, input))]
pub async fn create_movie(
    State(state): State<AppState>,
    JsonBody(input): JsonBody<NewMovie>,
) -> AppResult<impl IntoResponse> {
    let candidate = Movie {
        id: 0,
        created_at: Utc::now(),
        title: input.title.clone(),
        year: input.year,
        runtime: input.runtime,
        genres: input.genres.clone(),
        version: 0,
    };
    let mut v = Validator::new();
    validate_movie(&mut v, &candidate);
    v.finish()?;

    let movie = state.stores.movies.insert(input).await?;
    info!(movie_id = movie.id, "Movie created");

    let location = HeaderValue::from_str(&format!("/v1/movies/{}", movie.id))
        .map_err(|e| AppError::Internal(format!("invalid location header: {e}")))?;

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(MovieEnvelope { movie }),
    ))
}

#[instrument(skip(state))]
pub async fn show_movie(
    State(state): State<AppState>,
    ResourceId(id): ResourceId,
) -> AppResult<Json<MovieEnvelope>> {
    let movie = state.stores.movies.get(id).await?;
    Ok(Json(MovieEnvelope { movie }))
}

fn expected_version(headers: &HeaderMap) -> AppResult<Option<i32>> {
    let Some(value) = headers.get(EXPECTED_VERSION_HEADER) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<i32>().ok())
        .map(Some)
        .ok_or_else(|| AppError::BadRequest("X-Expected-Version must be an integer".to_string()))
}

#[instrument(skip(state, headers, update))]
pub async fn update_movie(
    State(state): State<AppState>,
    ResourceId(id): ResourceId,
    headers: HeaderMap,
    JsonBody(update): JsonBody<MovieUpdate>,
) -> AppResult<Json<MovieEnvelope>> {
    let mut movie = state.stores.movies.get(id).await?;

    if let Some(expected) = expected_version(&headers)?
        && expected != movie.version
    {
        return Err(AppError::EditConflict);
    }

    movie.apply(update);
    let mut v = Validator::new();
    validate_movie(&mut v, &movie);
    v.finish()?;

    let movie = state.stores.movies.update(&movie).await?;
    info!(movie_id = movie.id, version = movie.version, "Movie updated");
    Ok(Json(MovieEnvelope { movie }))
}

#[instrument(skip(state))]
pub async fn delete_movie(
    State(state): State<AppState>,
    ResourceId(id): ResourceId,
) -> AppResult<Json<serde_json::Value>> {
    state.stores.movies.delete(id).await?;
    info!(movie_id = id, "Movie deleted");
    Ok(Json(json!({ "message": "movie successfully deleted" })))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_version_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(expected_version(&headers).unwrap(), None);

        headers.insert(EXPECTED_VERSION_HEADER, HeaderValue::from_static("3"));
        assert_eq!(expected_version(&headers).unwrap(), Some(3));

        headers.insert(EXPECTED_VERSION_HEADER, HeaderValue::from_static("three"));
        assert!(matches!(
            expected_version(&headers),
            Err(AppError::BadRequest(_))
        ));
    }
}
