//! Per-route permission enforcement.
//!
//! Applied with `MethodRouter::route_layer` so each method on a path can
//! demand its own permission code. Reads the [`Identity`] attached by
//! [`super::auth`] and checks, in order:
//!
//! 1. anonymous → 401 `you must be authenticated to access this resource`
//! 2. not activated → 403 `your user account must be activated ...`
//! 3. permission code not granted → 403 `... doesn't have the necessary permissions ...`
//!
//! Only a request passing all three reaches the handler.

use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{Request, Response};
use axum::response::IntoResponse;
use tower::{Layer, Service};
use tracing::debug;

use crate::error::AppError;
use crate::metrics;
use crate::models::{Identity, IdentityExt};

/// Decide whether `identity` may use a route requiring `code`.
pub fn authorize(identity: &Identity, code: &str) -> Result<(), AppError> {
    let Some(user) = identity.user() else {
        return Err(AppError::AuthenticationRequired);
    };
    if !user.activated {
        return Err(AppError::InactiveAccount);
    }
    if !user.permissions.includes(code) {
        return Err(AppError::NotPermitted);
    }
    Ok(())
}

fn failure_reason(err: &AppError) -> &'static str {
    match err {
        AppError::AuthenticationRequired => "unauthenticated",
        AppError::InactiveAccount => "inactive",
        _ => "forbidden",
    }
}

/// Layer requiring the caller to hold a permission code.
#[derive(Debug, Clone, Copy)]
pub struct RequirePermissionLayer {
    code: &'static str,
}

impl RequirePermissionLayer {
    pub fn new(code: &'static str) -> Self {
        Self { code }
    }
}

impl<S> Layer<S> for RequirePermissionLayer {
    type Service = RequirePermission<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequirePermission {
            inner,
            code: self.code,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequirePermission<S> {
    inner: S,
    code: &'static str,
}

impl<S> Service<Request<Body>> for RequirePermission<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        match authorize(req.identity(), self.code) {
            Ok(()) => {
                let mut inner = self.inner.clone();
                Box::pin(async move { inner.call(req).await })
            }
            Err(err) => {
                debug!(
                    path = %req.uri().path(),
                    permission = self.code,
                    "Permission check failed"
                );
                metrics::record_auth_failure(failure_reason(&err));
                let response = err.into_response();
                Box::pin(async move { Ok(response) })
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::get;
    use tower::ServiceExt;

    use crate::models::{AuthenticatedUser, MOVIES_READ, MOVIES_WRITE, Permissions};

    fn user(activated: bool, codes: &[&str]) -> Identity {
        Identity::User(Arc::new(AuthenticatedUser {
            id: 1,
            email: "bob@example.com".to_string(),
            activated,
            permissions: codes.iter().copied().collect(),
        }))
    }

    #[test]
    fn test_authorize_order() {
        assert!(matches!(
            authorize(&Identity::Anonymous, MOVIES_READ),
            Err(AppError::AuthenticationRequired)
        ));
        // Inactive wins over missing permission.
        assert!(matches!(
            authorize(&user(false, &[]), MOVIES_READ),
            Err(AppError::InactiveAccount)
        ));
        assert!(matches!(
            authorize(&user(true, &[MOVIES_READ]), MOVIES_WRITE),
            Err(AppError::NotPermitted)
        ));
        assert!(authorize(&user(true, &[MOVIES_READ]), MOVIES_READ).is_ok());
    }

    #[test]
    fn test_empty_permissions_never_pass() {
        let identity = Identity::User(Arc::new(AuthenticatedUser {
            id: 2,
            email: "carol@example.com".to_string(),
            activated: true,
            permissions: Permissions::new(),
        }));
        assert!(authorize(&identity, MOVIES_READ).is_err());
    }

    async fn status_for(identity: Option<Identity>) -> StatusCode {
        let app = Router::new().route(
            "/",
            get(|| async { "ok" }).route_layer(RequirePermissionLayer::new(MOVIES_READ)),
        );
        let mut req = Request::builder().uri("/").body(Body::empty()).unwrap();
        if let Some(identity) = identity {
            req.extensions_mut().insert(identity);
        }
        app.oneshot(req).await.unwrap().status()
    }

    #[tokio::test]
    async fn test_layer_statuses() {
        assert_eq!(status_for(None).await, StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(Some(user(false, &[MOVIES_READ]))).await, StatusCode::FORBIDDEN);
        assert_eq!(status_for(Some(user(true, &[MOVIES_WRITE]))).await, StatusCode::FORBIDDEN);
        assert_eq!(status_for(Some(user(true, &[MOVIES_READ]))).await, StatusCode::OK);
    }
}
