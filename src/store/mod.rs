//! Storage capabilities, one trait per entity.
//!
//! Handlers and middleware only ever see these traits as `Arc<dyn ...>`
//! trait objects bundled in [`Stores`], so a SQL-backed implementation and
//! the in-memory [`MemoryStore`] are interchangeable.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Movie, NewMovie, NewUser, Permissions, Scope, Token, User};

mod memory;

pub use memory::MemoryStore;

/// Persistence failures surfaced to callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("record not found")]
    RecordNotFound,

    #[error("edit conflict")]
    EditConflict,

    #[error("duplicate email")]
    DuplicateEmail,

    #[error("storage failure: {0}")]
    Internal(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait MovieStore: Send + Sync {
    async fn insert(&self, movie: NewMovie) -> StoreResult<Movie>;
    async fn get(&self, id: i64) -> StoreResult<Movie>;
    /// Persist `movie` if its `version` still matches the stored one.
    async fn update(&self, movie: &Movie) -> StoreResult<Movie>;
    async fn delete(&self, id: i64) -> StoreResult<()>;
    async fn get_all(&self) -> StoreResult<Vec<Movie>>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn insert(&self, user: NewUser) -> StoreResult<User>;
    async fn get_by_email(&self, email: &str) -> StoreResult<User>;
    /// Persist `user` if its `version` still matches the stored one.
    async fn update(&self, user: &User) -> StoreResult<User>;
    /// Resolve the owner of an unexpired token of the given scope.
    async fn get_for_token(&self, scope: Scope, plaintext: &str) -> StoreResult<User>;
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Generate a token, persist its hash and return it with the plaintext.
    async fn new_token(&self, user_id: i64, ttl: Duration, scope: Scope) -> StoreResult<Token> {
        let token = Token::generate(user_id, ttl, scope);
        self.insert(&token).await?;
        Ok(token)
    }

    async fn insert(&self, token: &Token) -> StoreResult<()>;
    async fn delete_all_for_user(&self, scope: Scope, user_id: i64) -> StoreResult<()>;
}

#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn get_all_for_user(&self, user_id: i64) -> StoreResult<Permissions>;
    async fn add_for_user(&self, user_id: i64, codes: &[&str]) -> StoreResult<()>;
}

/// The full set of storage collaborators.
#[derive(Clone)]
pub struct Stores {
    pub movies: Arc<dyn MovieStore>,
    pub users: Arc<dyn UserStore>,
    pub tokens: Arc<dyn TokenStore>,
    pub permissions: Arc<dyn PermissionStore>,
}

impl Stores {
    /// All four capabilities backed by one shared [`MemoryStore`].
    pub fn in_memory() -> Self {
        Self::from_memory(Arc::new(MemoryStore::new()))
    }

    pub fn from_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            movies: store.clone(),
            users: store.clone(),
            tokens: store.clone(),
            permissions: store,
        }
    }
}
