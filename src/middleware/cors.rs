//! Cross-origin resource sharing against an allow-list of trusted origins.
//!
//! # Behavior
//!
//! - Every response gets `Vary: Origin` appended, whether or not the request
//!   carried an `Origin` header, so caches never serve one origin's response
//!   to another.
//! - A request whose `Origin` matches a trusted entry gets that origin echoed
//!   in `Access-Control-Allow-Origin`. The wildcard `*` is never sent.
//! - A preflight (`OPTIONS` with `Access-Control-Request-Method`) from a
//!   trusted origin is answered here with 200 and an empty body; it never
//!   reaches routing.
//! - Anything else passes through untouched apart from `Vary`.
//!
//! # Patterns
//!
//! Entries match exactly, or may contain a single `*` standing for one or
//! more characters:
//!
//! ```text
//! https://example.com         exact
//! https://*.example.com       any subdomain of example.com
//! http://localhost:*          any port on localhost
//! ```

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{HeaderValue, Method, Request, Response, StatusCode, header};
use tower::{Layer, Service};
use tracing::debug;

/// Methods advertised to trusted preflight requests.
pub const PREFLIGHT_ALLOW_METHODS: &str = "OPTIONS, PUT, PATCH, DELETE";

/// Request headers advertised to trusted preflight requests.
pub const PREFLIGHT_ALLOW_HEADERS: &str = "Authorization, Content-Type";

/// One entry of the trusted origin list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginPattern {
    Exact(String),
    Wildcard { prefix: String, suffix: String },
}

impl OriginPattern {
    /// Parse an entry, splitting on the first `*`.
    ///
    /// Callers must reject entries with a second `*` beforehand
    /// ([`crate::config::Config::validate`] does).
    pub fn parse(entry: &str) -> Self {
        match entry.split_once('*') {
            Some((prefix, suffix)) => OriginPattern::Wildcard {
                prefix: prefix.to_string(),
                suffix: suffix.to_string(),
            },
            None => OriginPattern::Exact(entry.to_string()),
        }
    }

    pub fn matches(&self, origin: &str) -> bool {
        match self {
            OriginPattern::Exact(exact) => exact == origin,
            OriginPattern::Wildcard { prefix, suffix } => {
                origin.len() > prefix.len() + suffix.len()
                    && origin.starts_with(prefix.as_str())
                    && origin.ends_with(suffix.as_str())
            }
        }
    }
}

/// The configured allow-list.
#[derive(Debug, Clone, Default)]
pub struct TrustedOrigins {
    patterns: Vec<OriginPattern>,
}

impl TrustedOrigins {
    pub fn new<S: AsRef<str>>(entries: &[S]) -> Self {
        Self {
            patterns: entries
                .iter()
                .map(AsRef::as_ref)
                .filter(|e| !e.is_empty())
                .map(OriginPattern::parse)
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Whether `origin` is trusted. The empty origin never is.
    pub fn allows(&self, origin: &str) -> bool {
        !origin.is_empty() && self.patterns.iter().any(|p| p.matches(origin))
    }
}

/// CORS layer for the Tower middleware stack.
#[derive(Clone)]
pub struct CorsLayer {
    origins: Arc<TrustedOrigins>,
}

impl CorsLayer {
    pub fn new(origins: TrustedOrigins) -> Self {
        Self {
            origins: Arc::new(origins),
        }
    }
}

impl<S> Layer<S> for CorsLayer {
    type Service = CorsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorsService {
            inner,
            origins: self.origins.clone(),
        }
    }
}

#[derive(Clone)]
pub struct CorsService<S> {
    inner: S,
    origins: Arc<TrustedOrigins>,
}

impl<S> CorsService<S> {
    /// The request's `Origin` value if it is on the allow-list.
    fn trusted_origin<B>(&self, req: &Request<B>) -> Option<HeaderValue> {
        let value = req.headers().get(header::ORIGIN)?;
        let origin = value.to_str().ok()?;
        self.origins.allows(origin).then(|| value.clone())
    }
}

fn is_preflight<B>(req: &Request<B>) -> bool {
    req.method() == Method::OPTIONS
        && req
            .headers()
            .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD)
}

fn preflight_response(origin: HeaderValue) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    headers.append(header::VARY, HeaderValue::from_static("Origin"));
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(PREFLIGHT_ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(PREFLIGHT_ALLOW_HEADERS),
    );
    response
}

impl<S> Service<Request<Body>> for CorsService<S>
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
        let origin = self.trusted_origin(&req);

        if let Some(origin) = origin.clone()
            && is_preflight(&req)
        {
            debug!(path = %req.uri().path(), "Answered CORS preflight");
            let response = preflight_response(origin);
            return Box::pin(async move { Ok(response) });
        }

        let mut inner = self.inner.clone();
        Box::pin(async move {
            let mut response = inner.call(req).await?;

            let headers = response.headers_mut();
            headers.append(header::VARY, HeaderValue::from_static("Origin"));
            if let Some(origin) = origin {
                headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
            }
            Ok(response)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::routing::get;
    use tower::ServiceExt;

    fn trusted() -> TrustedOrigins {
        TrustedOrigins::new(&["localhost:8080", "https://*.example.com"])
    }

    #[test]
    fn test_exact_match() {
        let origins = trusted();
        assert!(origins.allows("localhost:8080"));
        assert!(!origins.allows("localhost:8081"));
        assert!(!origins.allows("LOCALHOST:8080"));
    }

    #[test]
    fn test_wildcard_match() {
        let origins = trusted();
        assert!(origins.allows("https://api.example.com"));
        assert!(origins.allows("https://a.b.example.com"));
        // The wildcard must stand for at least one character.
        assert!(!origins.allows("https://.example.com"));
        assert!(!origins.allows("https://example.com"));
        assert!(!origins.allows("http://api.example.com"));
    }

    #[test]
    fn test_empty_origin_never_matches() {
        assert!(!trusted().allows(""));
        assert!(!TrustedOrigins::new(&[""]).allows(""));
        assert!(TrustedOrigins::new::<&str>(&[]).is_empty());
    }

    #[test]
    fn test_pattern_parse() {
        assert_eq!(
            OriginPattern::parse("http://localhost:*"),
            OriginPattern::Wildcard {
                prefix: "http://localhost:".to_string(),
                suffix: String::new(),
            }
        );
        assert!(OriginPattern::parse("http://localhost:*").matches("http://localhost:3000"));
    }

    fn app() -> Router {
        Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(CorsLayer::new(trusted()))
    }

    fn preflight(origin: &str) -> Request<Body> {
        Request::builder()
            .method(Method::OPTIONS)
            .uri("/")
            .header(header::ORIGIN, origin)
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "PUT")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_trusted_preflight_short_circuits() {
        let response = app().oneshot(preflight("localhost:8080")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::VARY], "Origin");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "localhost:8080");
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_METHODS],
            PREFLIGHT_ALLOW_METHODS
        );
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_HEADERS],
            PREFLIGHT_ALLOW_HEADERS
        );

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_untrusted_preflight_falls_through() {
        // No OPTIONS route exists, so routing answers 405.
        let response = app().oneshot(preflight("https://evil.com")).await.unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[header::VARY], "Origin");
        assert!(
            !response
                .headers()
                .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        );
    }

    #[tokio::test]
    async fn test_simple_request_from_trusted_origin() {
        let req = Request::builder()
            .uri("/")
            .header(header::ORIGIN, "https://app.example.com")
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(req).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://app.example.com"
        );
        assert!(
            !response
                .headers()
                .contains_key(header::ACCESS_CONTROL_ALLOW_METHODS)
        );
    }

    #[tokio::test]
    async fn test_vary_without_origin_header() {
        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = app().oneshot(req).await.unwrap();

        assert_eq!(response.headers()[header::VARY], "Origin");
        assert!(
            !response
                .headers()
                .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        );
    }
}
