//! Request-scoped caller identity.
//!
//! The authentication middleware inserts exactly one [`Identity`] into the
//! request extensions; downstream layers and handlers read it back through
//! [`IdentityExt`]. A request that never passed through authentication reads
//! as [`Identity::Anonymous`].

use std::sync::Arc;

use axum::http::Request;

use super::{Permissions, User};

/// Who is making the request.
#[derive(Debug, Clone, Default)]
pub enum Identity {
    /// No credential was presented.
    #[default]
    Anonymous,
    /// A credential resolved to a known user.
    User(Arc<AuthenticatedUser>),
}

/// The parts of a user the pipeline needs for authorization decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub id: i64,
    pub email: String,
    pub activated: bool,
    pub permissions: Permissions,
}

static ANONYMOUS: Identity = Identity::Anonymous;

impl Identity {
    pub fn authenticated(user: &User, permissions: Permissions) -> Self {
        Identity::User(Arc::new(AuthenticatedUser {
            id: user.id,
            email: user.email.clone(),
            activated: user.activated,
            permissions,
        }))
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Identity::Anonymous)
    }

    pub fn user(&self) -> Option<&AuthenticatedUser> {
        match self {
            Identity::Anonymous => None,
            Identity::User(user) => Some(user),
        }
    }
}

/// Extension trait to read the caller identity from a request.
pub trait IdentityExt {
    /// The attached identity, or anonymous if none was attached.
    fn identity(&self) -> &Identity;
}

impl<B> IdentityExt for Request<B> {
    fn identity(&self) -> &Identity {
        self.extensions().get::<Identity>().unwrap_or(&ANONYMOUS)
    }
}
