//! End-to-end scenarios against the demo action/channel set (spec §8).
//!
//! Scenarios that dispatch an action always touch Redis (session
//! load-or-create runs before every action, spec §4.1 step 2), so each test
//! checks [`TestApp::require_redis`] first and logs + returns early when no
//! scratch database is reachable, rather than failing the suite in an
//! environment with no Redis running.

use actioncraft::testing::TestApp;
use axum_test::{TestServer, TestServerConfig, Transport};
use serde_json::json;

/// The fallback handler extracts `ConnectInfo<SocketAddr>` (needed for the
/// rate limiter's per-IP key), which axum-test's default in-process mock
/// transport never populates — a real bound socket is required.
fn test_server(app: axum::Router) -> TestServer {
    TestServer::new_with_config(
        app,
        TestServerConfig {
            transport: Some(Transport::HttpRandomPort),
            ..TestServerConfig::default()
        },
    )
    .expect("test server")
}

#[tokio::test(flavor = "multi_thread")]
async fn wrong_method_on_a_bound_route_is_not_found() {
    let app = TestApp::build().expect("pool construction is lazy, never dials out");
    let server = test_server(app.router);

    // `createUser` is bound to POST /users; GET on the same path has no
    // binding and must 404 rather than fall through to some other handler
    // (spec §8: "any other method on the same path returns 404").
    let response = server.get("/users").await;
    response.assert_status_not_found();
}

#[tokio::test(flavor = "multi_thread")]
async fn create_user_and_send_message_round_trip() {
    let app = TestApp::build().expect("pool construction is lazy, never dials out");
    if !app.require_redis().await {
        eprintln!("skipping create_user_and_send_message_round_trip: no Redis reachable at TEST_REDIS_URL");
        return;
    }

    let server = test_server(app.router);

    let created = server.post("/users").json(&json!({ "name": "Mario Mario" })).await;
    created.assert_status_ok();
    assert_eq!(created.json::<serde_json::Value>()["name"], "Mario Mario");
    let cookie = created
        .maybe_cookie("__session")
        .expect("a fresh connection gets a session cookie");

    let sent = server
        .post("/messages")
        .add_cookie(cookie)
        .json(&json!({ "body": "Marco" }))
        .await;
    sent.assert_status_ok();
    let body = sent.json::<serde_json::Value>();
    assert_eq!(body["body"], "Marco");
    assert_eq!(body["channel"], "messages");
}

#[tokio::test(flavor = "multi_thread")]
async fn send_message_without_a_session_cookie_is_rejected() {
    // `sendMessage` requires an authenticated-looking session (`RequireSession`),
    // but a brand new connection's session starts with an empty data map, so
    // `has_truthy_user_id` is false and the action must reject it.
    let app = TestApp::build().expect("pool construction is lazy, never dials out");
    if !app.require_redis().await {
        eprintln!("skipping send_message_without_a_session_cookie_is_rejected: no Redis reachable");
        return;
    }

    let server = test_server(app.router);
    let response = server.post("/messages").json(&json!({ "body": "Marco" })).await;
    response.assert_status(axum::http::StatusCode::UNAUTHORIZED);
}

#[tokio::test(flavor = "multi_thread")]
async fn unauthenticated_caller_is_rate_limited_past_its_window_budget() {
    let app = TestApp::build_with(|config| {
        config.rate_limit.enabled = true;
        config.rate_limit.unauth_limit = 2;
        config.rate_limit.window_ms = 60_000;
    })
    .expect("pool construction is lazy, never dials out");
    if !app.require_redis().await {
        eprintln!("skipping unauthenticated_caller_is_rate_limited_past_its_window_budget: no Redis reachable");
        return;
    }

    let server = test_server(app.router);

    // Every unauthenticated request shares one per-IP budget of 2 in this
    // window; the third must be rejected with a `Retry-After` hint rather
    // than silently falling through to the action.
    server.get("/users").await.assert_status_not_found();
    server.get("/users").await.assert_status_not_found();

    let throttled = server.get("/users").await;
    throttled.assert_status(axum::http::StatusCode::TOO_MANY_REQUESTS);
    let retry_after = throttled
        .headers()
        .get("Retry-After")
        .expect("rate-limited responses carry a Retry-After hint");
    assert!(retry_after.to_str().expect("ascii header").parse::<u64>().is_ok());
}
