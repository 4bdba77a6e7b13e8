//! In-memory implementation of every storage capability.
//!
//! Used by the default binary and by tests. All tables live behind a single
//! `tokio::sync::RwLock`, which gives each operation the same atomicity a
//! single SQL statement would have.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{MovieStore, PermissionStore, StoreError, StoreResult, TokenStore, UserStore};
use crate::models::token::{TokenHash, hash_plaintext};
use crate::models::{Movie, NewMovie, NewUser, Permissions, Scope, Token, User};

#[derive(Default)]
struct Tables {
    movies: BTreeMap<i64, Movie>,
    last_movie_id: i64,
    users: BTreeMap<i64, User>,
    last_user_id: i64,
    tokens: HashMap<TokenHash, Token>,
    permissions: HashMap<i64, Permissions>,
}

/// Thread-safe in-memory store.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MovieStore for MemoryStore {
    async fn insert(&self, movie: NewMovie) -> StoreResult<Movie> {
        let mut tables = self.tables.write().await;
        tables.last_movie_id += 1;

        let movie = Movie {
            id: tables.last_movie_id,
            created_at: Utc::now(),
            title: movie.title,
            year: movie.year,
            runtime: movie.runtime,
            genres: movie.genres,
            version: 1,
        };
        tables.movies.insert(movie.id, movie.clone());
        Ok(movie)
    }

    async fn get(&self, id: i64) -> StoreResult<Movie> {
        self.tables
            .read()
            .await
            .movies
            .get(&id)
            .cloned()
            .ok_or(StoreError::RecordNotFound)
    }

    async fn update(&self, movie: &Movie) -> StoreResult<Movie> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .movies
            .get_mut(&movie.id)
            .ok_or(StoreError::EditConflict)?;

        if stored.version != movie.version {
            return Err(StoreError::EditConflict);
        }

        *stored = Movie {
            version: movie.version + 1,
            created_at: stored.created_at,
            ..movie.clone()
        };
        Ok(stored.clone())
    }

    async fn delete(&self, id: i64) -> StoreResult<()> {
        self.tables
            .write()
            .await
            .movies
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::RecordNotFound)
    }

    async fn get_all(&self) -> StoreResult<Vec<Movie>> {
        Ok(self.tables.read().await.movies.values().cloned().collect())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn insert(&self, user: NewUser) -> StoreResult<User> {
        let mut tables = self.tables.write().await;
        if tables.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::DuplicateEmail);
        }

        tables.last_user_id += 1;
        let user = User {
            id: tables.last_user_id,
            created_at: Utc::now(),
            name: user.name,
            email: user.email,
            password: user.password,
            activated: false,
            version: 1,
        };
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_by_email(&self, email: &str) -> StoreResult<User> {
        self.tables
            .read()
            .await
            .users
            .values()
            .find(|u| u.email == email)
            .cloned()
            .ok_or(StoreError::RecordNotFound)
    }

    async fn update(&self, user: &User) -> StoreResult<User> {
        let mut tables = self.tables.write().await;
        if tables
            .users
            .values()
            .any(|u| u.id != user.id && u.email == user.email)
        {
            return Err(StoreError::DuplicateEmail);
        }

        let stored = tables
            .users
            .get_mut(&user.id)
            .ok_or(StoreError::EditConflict)?;
        if stored.version != user.version {
            return Err(StoreError::EditConflict);
        }

        *stored = User {
            version: user.version + 1,
            ..user.clone()
        };
        Ok(stored.clone())
    }

    async fn get_for_token(&self, scope: Scope, plaintext: &str) -> StoreResult<User> {
        let hash = hash_plaintext(plaintext);
        let now = Utc::now();
        let tables = self.tables.read().await;

        let token = tables
            .tokens
            .get(&hash)
            .filter(|t| t.scope == scope && !t.is_expired_at(now))
            .ok_or(StoreError::RecordNotFound)?;

        tables
            .users
            .get(&token.user_id)
            .cloned()
            .ok_or(StoreError::RecordNotFound)
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn insert(&self, token: &Token) -> StoreResult<()> {
        let stored = Token {
            plaintext: String::new(),
            ..token.clone()
        };
        let now = Utc::now();
        let mut tables = self.tables.write().await;
        tables.tokens.retain(|_, t| !t.is_expired_at(now));
        tables.tokens.insert(token.hash, stored);
        Ok(())
    }

    async fn delete_all_for_user(&self, scope: Scope, user_id: i64) -> StoreResult<()> {
        self.tables
            .write()
            .await
            .tokens
            .retain(|_, t| !(t.scope == scope && t.user_id == user_id));
        Ok(())
    }
}

#[async_trait]
impl PermissionStore for MemoryStore {
    async fn get_all_for_user(&self, user_id: i64) -> StoreResult<Permissions> {
        Ok(self
            .tables
            .read()
            .await
            .permissions
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_for_user(&self, user_id: i64, codes: &[&str]) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let granted = tables.permissions.entry(user_id).or_default();
        for code in codes {
            granted.insert(*code);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::models::{MOVIES_READ, MOVIES_WRITE, Password, Runtime};

    fn new_user(email: &str) -> NewUser {
        NewUser {
            name: "Test User".to_string(),
            email: email.to_string(),
            password: Password::hash("pa55word").unwrap(),
        }
    }

    fn new_movie(title: &str) -> NewMovie {
        NewMovie {
            title: title.to_string(),
            year: 2021,
            runtime: Runtime(105),
            genres: vec!["comedy".to_string()],
        }
    }

    #[tokio::test]
    async fn test_movie_ids_are_sequential() {
        let store = MemoryStore::new();
        let first = MovieStore::insert(&store, new_movie("One")).await.unwrap();
        let second = MovieStore::insert(&store, new_movie("Two")).await.unwrap();

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(first.version, 1);
    }

    #[tokio::test]
    async fn test_movie_update_bumps_version() {
        let store = MemoryStore::new();
        let mut movie = MovieStore::insert(&store, new_movie("One")).await.unwrap();
        movie.title = "Uno".to_string();

        let updated = MovieStore::update(&store, &movie).await.unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(MovieStore::get(&store, 1).await.unwrap().title, "Uno");
    }

    #[tokio::test]
    async fn test_stale_movie_update_conflicts() {
        let store = MemoryStore::new();
        let movie = MovieStore::insert(&store, new_movie("One")).await.unwrap();
        MovieStore::update(&store, &movie).await.unwrap();

        let result = MovieStore::update(&store, &movie).await;
        assert_eq!(result.unwrap_err(), StoreError::EditConflict);
    }

    #[tokio::test]
    async fn test_delete_missing_movie() {
        let store = MemoryStore::new();
        let result = MovieStore::delete(&store, 42).await;
        assert_eq!(result.unwrap_err(), StoreError::RecordNotFound);
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let store = MemoryStore::new();
        UserStore::insert(&store, new_user("a@example.com")).await.unwrap();

        let result = UserStore::insert(&store, new_user("a@example.com")).await;
        assert_eq!(result.unwrap_err(), StoreError::DuplicateEmail);
    }

    #[tokio::test]
    async fn test_get_for_token_resolves_owner() {
        let store = MemoryStore::new();
        let user = UserStore::insert(&store, new_user("a@example.com")).await.unwrap();
        let token = store
            .new_token(user.id, Duration::from_secs(60), Scope::Authentication)
            .await
            .unwrap();

        let found = store
            .get_for_token(Scope::Authentication, &token.plaintext)
            .await
            .unwrap();
        assert_eq!(found.id, user.id);
    }

    #[tokio::test]
    async fn test_get_for_token_checks_scope() {
        let store = MemoryStore::new();
        let user = UserStore::insert(&store, new_user("a@example.com")).await.unwrap();
        let token = store
            .new_token(user.id, Duration::from_secs(60), Scope::Activation)
            .await
            .unwrap();

        let result = store
            .get_for_token(Scope::Authentication, &token.plaintext)
            .await;
        assert_eq!(result.unwrap_err(), StoreError::RecordNotFound);
    }

    #[tokio::test]
    async fn test_get_for_token_rejects_expired() {
        let store = MemoryStore::new();
        let user = UserStore::insert(&store, new_user("a@example.com")).await.unwrap();
        let mut token = Token::generate(user.id, Duration::from_secs(60), Scope::Authentication);
        token.expiry = Utc::now() - chrono::Duration::seconds(1);
        TokenStore::insert(&store, &token).await.unwrap();

        let result = store
            .get_for_token(Scope::Authentication, &token.plaintext)
            .await;
        assert_eq!(result.unwrap_err(), StoreError::RecordNotFound);
    }

    #[tokio::test]
    async fn test_stored_token_drops_plaintext() {
        let store = MemoryStore::new();
        let token = Token::generate(1, Duration::from_secs(60), Scope::Activation);
        TokenStore::insert(&store, &token).await.unwrap();

        let tables = store.tables.read().await;
        assert!(tables.tokens.values().all(|t| t.plaintext.is_empty()));
    }

    #[tokio::test]
    async fn test_delete_all_for_user_is_scoped() {
        let store = MemoryStore::new();
        let activation = store
            .new_token(1, Duration::from_secs(60), Scope::Activation)
            .await
            .unwrap();
        let auth = store
            .new_token(1, Duration::from_secs(60), Scope::Authentication)
            .await
            .unwrap();

        store.delete_all_for_user(Scope::Activation, 1).await.unwrap();

        let tables = store.tables.read().await;
        assert!(!tables.tokens.contains_key(&activation.hash));
        assert!(tables.tokens.contains_key(&auth.hash));
    }

    #[tokio::test]
    async fn test_insert_prunes_expired_tokens() {
        let store = MemoryStore::new();
        let mut stale = Token::generate(1, Duration::from_secs(60), Scope::Authentication);
        stale.expiry = Utc::now() - chrono::Duration::seconds(1);
        TokenStore::insert(&store, &stale).await.unwrap();

        let fresh = store
            .new_token(1, Duration::from_secs(60), Scope::Authentication)
            .await
            .unwrap();

        let tables = store.tables.read().await;
        assert!(!tables.tokens.contains_key(&stale.hash));
        assert!(tables.tokens.contains_key(&fresh.hash));
        assert_eq!(tables.tokens.len(), 1);
    }

    #[tokio::test]
    async fn test_permissions_accumulate() {
        let store = MemoryStore::new();
        assert!(store.get_all_for_user(1).await.unwrap().is_empty());

        store.add_for_user(1, &[MOVIES_READ]).await.unwrap();
        store.add_for_user(1, &[MOVIES_WRITE]).await.unwrap();

        let permissions = store.get_all_for_user(1).await.unwrap();
        assert!(permissions.includes(MOVIES_READ));
        assert!(permissions.includes(MOVIES_WRITE));
        assert!(store.get_all_for_user(2).await.unwrap().is_empty());
    }
}
