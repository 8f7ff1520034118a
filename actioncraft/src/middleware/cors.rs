//! CORS handling (spec §4.3), mirroring [`super::security`]'s hand-rolled
//! `tower::Layer` shape rather than `tower_http::cors::CorsLayer` — the
//! wildcard/reflect/credentials rules below switch behavior per request in a
//! way a single static `CorsLayer` configuration can't express.

use axum::{
    body::Body,
    http::{header, HeaderValue, Method, Request, Response, StatusCode},
};
use std::sync::Arc;

/// The configured allow-list. `Wildcard` reflects the request origin and
/// allows credentials when an `Origin` header is present, and otherwise
/// emits a literal `*` with no credentials (spec §4.3).
#[derive(Debug, Clone)]
pub enum AllowedOrigins {
    /// `allowed_origins == ["*"]`.
    Wildcard,
    /// An explicit allow-list.
    List(Vec<String>),
}

impl AllowedOrigins {
    /// Build from the configured origin list, treating `["*"]` specially.
    #[must_use]
    pub fn from_config(origins: &[String]) -> Self {
        if origins.iter().any(|o| o == "*") {
            Self::Wildcard
        } else {
            Self::List(origins.to_vec())
        }
    }
}

struct CorsDecision {
    allow_origin: Option<String>,
    allow_credentials: bool,
    vary_origin: bool,
}

fn decide(allowed: &AllowedOrigins, origin: Option<&str>) -> CorsDecision {
    match (allowed, origin) {
        (AllowedOrigins::Wildcard, None) => CorsDecision {
            allow_origin: Some("*".to_string()),
            allow_credentials: false,
            vary_origin: false,
        },
        (AllowedOrigins::Wildcard, Some(origin)) => CorsDecision {
            allow_origin: Some(origin.to_string()),
            allow_credentials: true,
            vary_origin: true,
        },
        (AllowedOrigins::List(list), Some(origin)) if list.iter().any(|o| o == origin) => CorsDecision {
            allow_origin: Some(origin.to_string()),
            allow_credentials: true,
            vary_origin: true,
        },
        _ => CorsDecision {
            allow_origin: None,
            allow_credentials: false,
            vary_origin: false,
        },
    }
}

fn apply(response: &mut Response<Body>, decision: &CorsDecision) {
    let headers = response.headers_mut();
    if let Some(origin) = &decision.allow_origin {
        if let Ok(value) = HeaderValue::from_str(origin) {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
        }
    }
    if decision.allow_credentials {
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
    }
    if decision.vary_origin {
        headers.insert(header::VARY, HeaderValue::from_static("Origin"));
    }
}

/// Tower layer implementing spec §4.3's CORS rules, including the generic
/// `OPTIONS` short-circuit (200, empty body, same headers).
#[derive(Clone)]
pub struct CorsLayer {
    allowed: Arc<AllowedOrigins>,
}

impl CorsLayer {
    /// Build a layer from the configured origin list.
    #[must_use]
    pub fn new(allowed_origins: &[String]) -> Self {
        Self {
            allowed: Arc::new(AllowedOrigins::from_config(allowed_origins)),
        }
    }
}

impl<S> tower::Layer<S> for CorsLayer {
    type Service = CorsMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorsMiddleware {
            inner,
            allowed: self.allowed.clone(),
        }
    }
}

/// The [`tower::Service`] produced by [`CorsLayer`].
#[derive(Clone)]
pub struct CorsMiddleware<S> {
    inner: S,
    allowed: Arc<AllowedOrigins>,
}

impl<S> tower::Service<Request<Body>> for CorsMiddleware<S>
where
    S: tower::Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future =
        std::pin::Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let origin = request
            .headers()
            .get(header::ORIGIN)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let decision = decide(&self.allowed, origin.as_deref());

        if request.method() == Method::OPTIONS {
            let mut response = Response::builder()
                .status(StatusCode::OK)
                .body(Body::empty())
                .unwrap_or_else(|_| Response::new(Body::empty()));
            apply(&mut response, &decision);
            return Box::pin(async move { Ok(response) });
        }

        let future = self.inner.call(request);
        Box::pin(async move {
            let mut response = future.await?;
            apply(&mut response, &decision);
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_without_origin_is_literal_star_no_credentials() {
        let decision = decide(&AllowedOrigins::Wildcard, None);
        assert_eq!(decision.allow_origin.as_deref(), Some("*"));
        assert!(!decision.allow_credentials);
        assert!(!decision.vary_origin);
    }

    #[test]
    fn wildcard_with_origin_reflects_and_allows_credentials() {
        let decision = decide(&AllowedOrigins::Wildcard, Some("https://example.com"));
        assert_eq!(decision.allow_origin.as_deref(), Some("https://example.com"));
        assert!(decision.allow_credentials);
        assert!(decision.vary_origin);
    }

    #[test]
    fn listed_origin_reflects_and_allows_credentials() {
        let allowed = AllowedOrigins::List(vec!["https://a.test".to_string()]);
        let decision = decide(&allowed, Some("https://a.test"));
        assert_eq!(decision.allow_origin.as_deref(), Some("https://a.test"));
        assert!(decision.allow_credentials);
    }

    #[test]
    fn non_matching_origin_omits_allow_origin_and_credentials() {
        let allowed = AllowedOrigins::List(vec!["https://a.test".to_string()]);
        let decision = decide(&allowed, Some("https://evil.test"));
        assert!(decision.allow_origin.is_none());
        assert!(!decision.allow_credentials);
    }
}
