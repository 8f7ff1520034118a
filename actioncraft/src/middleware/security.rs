//! Security headers applied to every HTTP response (spec §4.3, §6).

use axum::{
    body::Body,
    http::{header, HeaderName, Request, Response},
    middleware::Next,
    response::IntoResponse,
};
use std::fmt;

/// Which security headers to emit and how.
#[derive(Debug, Clone)]
pub struct SecurityHeadersConfig {
    /// `X-Frame-Options`.
    pub frame_options: Option<FrameOptions>,
    /// `X-Content-Type-Options: nosniff`.
    pub content_type_options: bool,
    /// `X-XSS-Protection`.
    pub xss_protection: Option<bool>,
    /// `Strict-Transport-Security`.
    pub hsts: Option<HstsConfig>,
    /// `Content-Security-Policy`.
    pub csp: Option<String>,
    /// `Referrer-Policy`.
    pub referrer_policy: Option<ReferrerPolicy>,
}

/// `X-Frame-Options` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOptions {
    /// Prevent all framing.
    Deny,
    /// Allow framing from the same origin.
    SameOrigin,
}

impl fmt::Display for FrameOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deny => write!(f, "DENY"),
            Self::SameOrigin => write!(f, "SAMEORIGIN"),
        }
    }
}

/// `Strict-Transport-Security` parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HstsConfig {
    /// `max-age`, in seconds.
    pub max_age: u32,
    /// Apply to subdomains.
    pub include_subdomains: bool,
    /// Request inclusion in browser preload lists.
    pub preload: bool,
}

impl HstsConfig {
    /// One year, subdomains included, preload requested.
    #[must_use]
    pub const fn strict() -> Self {
        Self {
            max_age: 31_536_000,
            include_subdomains: true,
            preload: true,
        }
    }

    /// One year, no subdomains, no preload.
    #[must_use]
    pub const fn moderate() -> Self {
        Self {
            max_age: 31_536_000,
            include_subdomains: false,
            preload: false,
        }
    }
}

impl fmt::Display for HstsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "max-age={}", self.max_age)?;
        if self.include_subdomains {
            write!(f, "; includeSubDomains")?;
        }
        if self.preload {
            write!(f, "; preload")?;
        }
        Ok(())
    }
}

/// `Referrer-Policy` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferrerPolicy {
    /// Never send a referrer.
    NoReferrer,
    /// Omit the referrer on a downgrade (HTTPS to HTTP).
    NoReferrerWhenDowngrade,
    /// Send only the origin.
    Origin,
    /// Full URL same-origin, origin only cross-origin.
    OriginWhenCrossOrigin,
    /// Send the referrer only to the same origin.
    SameOrigin,
    /// Origin only, omitted on downgrade.
    StrictOrigin,
    /// Full URL same-origin, origin cross-origin, omitted on downgrade.
    StrictOriginWhenCrossOrigin,
    /// Always send the full URL.
    UnsafeUrl,
}

impl fmt::Display for ReferrerPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoReferrer => write!(f, "no-referrer"),
            Self::NoReferrerWhenDowngrade => write!(f, "no-referrer-when-downgrade"),
            Self::Origin => write!(f, "origin"),
            Self::OriginWhenCrossOrigin => write!(f, "origin-when-cross-origin"),
            Self::SameOrigin => write!(f, "same-origin"),
            Self::StrictOrigin => write!(f, "strict-origin"),
            Self::StrictOriginWhenCrossOrigin => write!(f, "strict-origin-when-cross-origin"),
            Self::UnsafeUrl => write!(f, "unsafe-url"),
        }
    }
}

impl SecurityHeadersConfig {
    /// Production defaults: deny framing, HSTS with preload, a same-origin CSP.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            frame_options: Some(FrameOptions::Deny),
            content_type_options: true,
            xss_protection: Some(true),
            hsts: Some(HstsConfig::strict()),
            csp: Some("default-src 'self'".to_string()),
            referrer_policy: Some(ReferrerPolicy::StrictOriginWhenCrossOrigin),
        }
    }

    /// Development defaults: no HSTS, a permissive CSP that allows inline scripts.
    #[must_use]
    pub fn development() -> Self {
        Self {
            frame_options: Some(FrameOptions::SameOrigin),
            content_type_options: true,
            xss_protection: None,
            hsts: None,
            csp: Some(
                "default-src 'self' 'unsafe-inline' 'unsafe-eval'; img-src 'self' data:"
                    .to_string(),
            ),
            referrer_policy: Some(ReferrerPolicy::StrictOriginWhenCrossOrigin),
        }
    }

    /// All headers disabled; enable individually with the builder methods.
    #[must_use]
    pub const fn custom() -> Self {
        Self {
            frame_options: None,
            content_type_options: false,
            xss_protection: None,
            hsts: None,
            csp: None,
            referrer_policy: None,
        }
    }

    /// Set `X-Frame-Options`.
    #[must_use]
    pub const fn with_frame_options(mut self, options: FrameOptions) -> Self {
        self.frame_options = Some(options);
        self
    }

    /// Enable `X-Content-Type-Options: nosniff`.
    #[must_use]
    pub const fn with_content_type_options(mut self) -> Self {
        self.content_type_options = true;
        self
    }

    /// Set `X-XSS-Protection`.
    #[must_use]
    pub const fn with_xss_protection(mut self, block_mode: bool) -> Self {
        self.xss_protection = Some(block_mode);
        self
    }

    /// Set `Strict-Transport-Security`.
    #[must_use]
    pub const fn with_hsts(mut self, config: HstsConfig) -> Self {
        self.hsts = Some(config);
        self
    }

    /// Set `Content-Security-Policy`.
    #[must_use]
    pub fn with_csp(mut self, policy: String) -> Self {
        self.csp = Some(policy);
        self
    }

    /// Set `Referrer-Policy`.
    #[must_use]
    pub const fn with_referrer_policy(mut self, policy: ReferrerPolicy) -> Self {
        self.referrer_policy = Some(policy);
        self
    }
}

impl Default for SecurityHeadersConfig {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::development()
        } else {
            Self::strict()
        }
    }
}

/// Tower layer adding security headers to every response.
#[derive(Clone)]
pub struct SecurityHeadersLayer {
    config: SecurityHeadersConfig,
}

impl SecurityHeadersLayer {
    /// Build a layer from `config`.
    #[must_use]
    pub const fn new(config: SecurityHeadersConfig) -> Self {
        Self { config }
    }
}

impl<S> tower::Layer<S> for SecurityHeadersLayer {
    type Service = SecurityHeadersMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SecurityHeadersMiddleware {
            inner,
            config: self.config.clone(),
        }
    }
}

/// The [`tower::Service`] produced by [`SecurityHeadersLayer`].
#[derive(Clone)]
pub struct SecurityHeadersMiddleware<S> {
    inner: S,
    config: SecurityHeadersConfig,
}

impl<S> tower::Service<Request<Body>> for SecurityHeadersMiddleware<S>
where
    S: tower::Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let config = self.config.clone();
        let future = self.inner.call(request);

        Box::pin(async move {
            let mut response = future.await?;
            add_security_headers(&mut response, &config);
            Ok(response)
        })
    }
}

fn add_security_headers(response: &mut Response<Body>, config: &SecurityHeadersConfig) {
    let headers = response.headers_mut();

    if let Some(frame_options) = &config.frame_options {
        if let Ok(value) = frame_options.to_string().parse() {
            headers.insert(HeaderName::from_static("x-frame-options"), value);
        }
    }

    if config.content_type_options {
        headers.insert(
            HeaderName::from_static("x-content-type-options"),
            "nosniff".parse().expect("static header value"),
        );
    }

    if let Some(block_mode) = config.xss_protection {
        let value = if block_mode { "1; mode=block" } else { "1" };
        if let Ok(value) = value.parse() {
            headers.insert(HeaderName::from_static("x-xss-protection"), value);
        }
    }

    if let Some(hsts) = &config.hsts {
        if let Ok(value) = hsts.to_string().parse() {
            headers.insert(header::STRICT_TRANSPORT_SECURITY, value);
        }
    }

    if let Some(csp) = &config.csp {
        if let Ok(value) = csp.parse() {
            headers.insert(header::CONTENT_SECURITY_POLICY, value);
        }
    }

    if let Some(referrer_policy) = &config.referrer_policy {
        if let Ok(value) = referrer_policy.to_string().parse() {
            headers.insert(header::REFERRER_POLICY, value);
        }
    }
}

/// `axum::middleware::from_fn` entry point, for call sites that thread
/// config through rather than using [`SecurityHeadersLayer`] directly.
pub async fn security_headers(
    request: Request<Body>,
    next: Next,
    config: SecurityHeadersConfig,
) -> impl IntoResponse {
    let mut response = next.run(request).await;
    add_security_headers(&mut response, &config);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, response::IntoResponse, routing::get, Router};
    use tower::ServiceExt;

    async fn test_handler() -> impl IntoResponse {
        (axum::http::StatusCode::OK, "ok")
    }

    #[tokio::test]
    async fn strict_config_sets_expected_headers() {
        let app = Router::new()
            .route("/", get(test_handler))
            .layer(SecurityHeadersLayer::new(SecurityHeadersConfig::strict()));

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let headers = response.headers();
        assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
        assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
        assert_eq!(headers.get("x-xss-protection").unwrap(), "1; mode=block");
        assert!(headers.contains_key("strict-transport-security"));
        assert!(headers.contains_key("content-security-policy"));
        assert_eq!(
            headers.get("referrer-policy").unwrap(),
            "strict-origin-when-cross-origin"
        );
    }

    #[tokio::test]
    async fn development_config_omits_hsts_and_xss() {
        let app = Router::new()
            .route("/", get(test_handler))
            .layer(SecurityHeadersLayer::new(
                SecurityHeadersConfig::development(),
            ));

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let headers = response.headers();
        assert_eq!(headers.get("x-frame-options").unwrap(), "SAMEORIGIN");
        assert!(!headers.contains_key("x-xss-protection"));
        assert!(!headers.contains_key("strict-transport-security"));
    }

    #[test]
    fn hsts_display_matches_expected_directives() {
        assert_eq!(
            HstsConfig::strict().to_string(),
            "max-age=31536000; includeSubDomains; preload"
        );
        assert_eq!(HstsConfig::moderate().to_string(), "max-age=31536000");
    }
}
