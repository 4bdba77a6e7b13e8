//! Field checks for request bodies.
//!
//! Failures are collected per field and reported together as a 422
//! `{"error": {"field": "message", ...}}` response. Only the first failure
//! recorded for a field is kept.

use std::collections::{BTreeMap, HashSet};

use chrono::{Datelike, Utc};

use crate::error::{AppError, AppResult};
use crate::models::token::TOKEN_PLAINTEXT_LEN;
use crate::models::{Movie, Runtime};

// =============================================================================
// Validation Constants
// =============================================================================

/// Maximum length for a movie title, in bytes.
pub const MAX_TITLE_LENGTH: usize = 500;

/// Year of the earliest surviving motion picture.
pub const MIN_MOVIE_YEAR: i32 = 1888;

/// Maximum number of genres per movie.
pub const MAX_GENRES: usize = 5;

/// Maximum length for a user name, in bytes.
pub const MAX_NAME_LENGTH: usize = 500;

/// Password length bounds, in bytes. Argon2 accepts more, but anything
/// longer than this is almost certainly not typed by a person.
pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const MAX_PASSWORD_LENGTH: usize = 72;

/// Collects field errors.
#[derive(Debug, Default)]
pub struct Validator {
    errors: BTreeMap<String, String>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `message` for `field` unless `ok` holds.
    pub fn check(&mut self, ok: bool, field: &str, message: &str) {
        if !ok {
            self.errors
                .entry(field.to_string())
                .or_insert_with(|| message.to_string());
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// `Ok` if nothing was recorded, otherwise a `FailedValidation` error.
    pub fn finish(self) -> AppResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::FailedValidation(self.errors))
        }
    }
}

pub fn validate_movie(v: &mut Validator, movie: &Movie) {
    let current_year = Utc::now().year();

    v.check(!movie.title.is_empty(), "title", "must be provided");
    v.check(
        movie.title.len() <= MAX_TITLE_LENGTH,
        "title",
        "must not be more than 500 bytes long",
    );

    v.check(movie.year != 0, "year", "must be provided");
    v.check(movie.year >= MIN_MOVIE_YEAR, "year", "must be greater than 1888");
    v.check(movie.year <= current_year, "year", "must not be in the future");

    let Runtime(minutes) = movie.runtime;
    v.check(minutes != 0, "runtime", "must be provided");
    v.check(minutes > 0, "runtime", "must be a positive integer");

    v.check(!movie.genres.is_empty(), "genres", "must contain at least 1 genre");
    v.check(
        movie.genres.len() <= MAX_GENRES,
        "genres",
        "must not contain more than 5 genres",
    );
    let unique: HashSet<&String> = movie.genres.iter().collect();
    v.check(
        unique.len() == movie.genres.len(),
        "genres",
        "must not contain duplicate values",
    );
}

pub fn validate_email(v: &mut Validator, email: &str) {
    v.check(!email.is_empty(), "email", "must be provided");
    v.check(
        is_plausible_email(email),
        "email",
        "must be a valid email address",
    );
}

pub fn validate_password_plaintext(v: &mut Validator, password: &str) {
    v.check(!password.is_empty(), "password", "must be provided");
    v.check(
        password.len() >= MIN_PASSWORD_LENGTH,
        "password",
        "must be at least 8 bytes long",
    );
    v.check(
        password.len() <= MAX_PASSWORD_LENGTH,
        "password",
        "must not be more than 72 bytes long",
    );
}

pub fn validate_user(v: &mut Validator, name: &str, email: &str, password: &str) {
    v.check(!name.is_empty(), "name", "must be provided");
    v.check(
        name.len() <= MAX_NAME_LENGTH,
        "name",
        "must not be more than 500 bytes long",
    );
    validate_email(v, email);
    validate_password_plaintext(v, password);
}

pub fn validate_token_plaintext(v: &mut Validator, plaintext: &str) {
    v.check(!plaintext.is_empty(), "token", "must be provided");
    v.check(
        plaintext.len() == TOKEN_PLAINTEXT_LEN,
        "token",
        "must be 22 bytes long",
    );
}

/// One `@`, a non-empty local part, and a dotted domain without spaces.
fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.contains(char::is_whitespace)
        && domain
            .split('.')
            .all(|label| !label.is_empty())
        && domain.contains('.')
}
