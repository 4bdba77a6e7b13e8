//! Delivery of account activation tokens.
//!
//! SMTP delivery is out of scope; [`LogMailer`] records each delivery in the
//! log so a development setup can pick the token up from there.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use crate::models::{Token, User};

#[derive(Error, Debug)]
pub enum MailError {
    #[error("mail delivery failed: {0}")]
    Delivery(String),
}

/// Sends user-facing notifications.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver the welcome message carrying `token`'s plaintext to `user`.
    async fn send_activation(&self, user: &User, token: &Token) -> Result<(), MailError>;
}

/// Mailer that writes deliveries to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_activation(&self, user: &User, token: &Token) -> Result<(), MailError> {
        info!(
            user_id = user.id,
            recipient = %user.email,
            expiry = %token.expiry,
            "Activation email sent"
        );
        debug!(user_id = user.id, activation_token = %token.plaintext, "Activation token issued");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::models::{Password, Scope};

    #[tokio::test]
    async fn test_log_mailer_always_succeeds() {
        let user = User {
            id: 1,
            created_at: Utc::now(),
            name: "Dana".to_string(),
            email: "dana@example.com".to_string(),
            password: Password::hash("pa55word1234").unwrap(),
            activated: false,
            version: 1,
        };
        let token = Token::generate(user.id, Duration::from_secs(60), Scope::Activation);

        assert!(LogMailer.send_activation(&user, &token).await.is_ok());
    }
}
