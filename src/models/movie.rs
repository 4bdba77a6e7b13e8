use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

/// A catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Movie {
    pub id: i64,
    #[serde(skip)]
    pub created_at: DateTime<Utc>,
    pub title: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub year: i32,
    #[serde(skip_serializing_if = "Runtime::is_zero")]
    pub runtime: Runtime,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub genres: Vec<String>,
    /// Incremented on every update; used for optimistic locking.
    pub version: i32,
}

fn is_zero(n: &i32) -> bool {
    *n == 0
}

/// Fields supplied when creating a movie.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewMovie {
    pub title: String,
    pub year: i32,
    pub runtime: Runtime,
    #[serde(default)]
    pub genres: Vec<String>,
}

/// Partial update; absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MovieUpdate {
    pub title: Option<String>,
    pub year: Option<i32>,
    pub runtime: Option<Runtime>,
    pub genres: Option<Vec<String>>,
}

impl Movie {
    /// Apply a partial update in place.
    pub fn apply(&mut self, update: MovieUpdate) {
        if let Some(title) = update.title {
            self.title = title;
        }
        if let Some(year) = update.year {
            self.year = year;
        }
        if let Some(runtime) = update.runtime {
            self.runtime = runtime;
        }
        if let Some(genres) = update.genres {
            self.genres = genres;
        }
    }
}

/// Movie runtime in minutes, encoded in JSON as `"<n> mins"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Runtime(pub i32);

impl Runtime {
    fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} mins", self.0)
    }
}

impl Serialize for Runtime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Runtime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.strip_suffix(" mins")
            .and_then(|n| n.parse::<i32>().ok())
            .map(Runtime)
            .ok_or_else(|| de::Error::custom("invalid runtime format"))
    }
}
