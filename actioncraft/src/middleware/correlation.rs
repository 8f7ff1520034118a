//! Correlation id echoing (spec §4.3): never generated, only echoed back
//! when the deployment trusts its upstream proxy to have set it.

use crate::config::CorrelationIdConfig;
use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};

/// `axum::middleware::from_fn_with_state` entry point.
pub async fn echo_correlation_id(
    State(config): State<CorrelationIdConfig>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let incoming = if config.trust_proxy {
        request
            .headers()
            .get(&config.header_name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    } else {
        None
    };

    let mut response = next.run(request).await;
    if let Some(value) = incoming {
        if let Ok(header_value) = value.parse() {
            if let Ok(name) = axum::http::HeaderName::try_from(config.header_name.as_str()) {
                response.headers_mut().insert(name, header_value);
            }
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, routing::get, Router};
    use tower::ServiceExt;

    async fn ok() -> &'static str {
        "ok"
    }

    fn app(config: CorrelationIdConfig) -> Router {
        Router::new().route("/", get(ok)).layer(axum::middleware::from_fn_with_state(
            config,
            echo_correlation_id,
        ))
    }

    #[tokio::test]
    async fn echoes_when_trusted_and_present() {
        let config = CorrelationIdConfig {
            trust_proxy: true,
            header_name: "X-Request-Id".to_string(),
        };
        let response = app(config)
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header("X-Request-Id", "abc-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers().get("X-Request-Id").unwrap(), "abc-123");
    }

    #[tokio::test]
    async fn omits_when_not_trusted() {
        let config = CorrelationIdConfig {
            trust_proxy: false,
            header_name: "X-Request-Id".to_string(),
        };
        let response = app(config)
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header("X-Request-Id", "abc-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.headers().get("X-Request-Id").is_none());
    }

    #[tokio::test]
    async fn never_generates_one() {
        let config = CorrelationIdConfig {
            trust_proxy: true,
            header_name: "X-Request-Id".to_string(),
        };
        let response = app(config)
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.headers().get("X-Request-Id").is_none());
    }
}
