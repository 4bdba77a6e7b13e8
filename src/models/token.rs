use std::fmt;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Length of an encoded token plaintext (16 random bytes, base64url, no padding).
pub const TOKEN_PLAINTEXT_LEN: usize = 22;

/// What a token may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Activation,
    Authentication,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Activation => "activation",
            Scope::Authentication => "authentication",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SHA-256 digest of a token plaintext. Only the digest is ever stored.
pub type TokenHash = [u8; 32];

/// A bearer or activation credential.
///
/// `plaintext` is only populated on the value handed back to the caller at
/// creation time; stored copies keep just the hash.
#[derive(Clone, Serialize)]
pub struct Token {
    #[serde(rename = "token")]
    pub plaintext: String,
    #[serde(skip)]
    pub hash: TokenHash,
    #[serde(skip)]
    pub user_id: i64,
    pub expiry: DateTime<Utc>,
    #[serde(skip)]
    pub scope: Scope,
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("user_id", &self.user_id)
            .field("expiry", &self.expiry)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl Token {
    /// Generate a fresh random token for `user_id` valid for `ttl`.
    pub fn generate(user_id: i64, ttl: Duration, scope: Scope) -> Self {
        let mut bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut bytes);
        let plaintext = URL_SAFE_NO_PAD.encode(bytes);

        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let expiry = Utc::now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            hash: hash_plaintext(&plaintext),
            plaintext,
            user_id,
            expiry,
            scope,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry <= now
    }
}

/// Hash a token plaintext for storage or lookup.
pub fn hash_plaintext(plaintext: &str) -> TokenHash {
    Sha256::digest(plaintext.as_bytes()).into()
}

/// Cheap structural check performed before any store lookup.
pub fn is_well_formed(plaintext: &str) -> bool {
    plaintext.len() == TOKEN_PLAINTEXT_LEN
        && plaintext
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_token_is_well_formed() {
        let token = Token::generate(1, Duration::from_secs(60), Scope::Authentication);
        assert_eq!(token.plaintext.len(), TOKEN_PLAINTEXT_LEN);
        assert!(is_well_formed(&token.plaintext));
        assert_eq!(token.hash, hash_plaintext(&token.plaintext));
    }

    #[test]
    fn test_generated_tokens_are_unique() {
        let a = Token::generate(1, Duration::from_secs(60), Scope::Activation);
        let b = Token::generate(1, Duration::from_secs(60), Scope::Activation);
        assert_ne!(a.plaintext, b.plaintext);
    }

    #[test]
    fn test_expiry_in_future() {
        let token = Token::generate(1, Duration::from_secs(3600), Scope::Authentication);
        assert!(!token.is_expired_at(Utc::now()));
        assert!(token.is_expired_at(Utc::now() + chrono::Duration::hours(2)));
    }

    #[test]
    fn test_is_well_formed_rejects_bad_input() {
        assert!(!is_well_formed(""));
        assert!(!is_well_formed("forifjd"));
        assert!(!is_well_formed("aaaaaaaaaaaaaaaaaaaaa!"));
        assert!(is_well_formed("aaaaaaaaaaaaaaaaaaaaaa"));
    }

    #[test]
    fn test_token_json_shape() {
        let token = Token::generate(9, Duration::from_secs(60), Scope::Authentication);
        let value = serde_json::to_value(&token).unwrap();
        assert_eq!(value["token"], token.plaintext.as_str());
        assert!(value.get("expiry").is_some());
        assert!(value.get("user_id").is_none());
        assert!(value.get("hash").is_none());
    }

    #[test]
    fn test_debug_hides_plaintext() {
        let token = Token::generate(9, Duration::from_secs(60), Scope::Authentication);
        assert!(!format!("{token:?}").contains(&token.plaintext));
    }
}
