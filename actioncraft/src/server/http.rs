//! The HTTP fallback handler (spec §4.3 "Routing"): a single entry point
//! that upgrades WebSocket requests, serves static files, or routes to an
//! action by method + path.

use super::ws;
use crate::action::dispatch::{act, DispatchContext};
use crate::action::registry::HttpMethod;
use crate::connection::{Connection, ConnectionType};
use crate::error::ActionError;
use crate::server::static_files;
use crate::state::AppState;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::body::Bytes;
use axum::Json;
use axum_extra::extract::cookie::CookieJar;
use serde_json::{Map, Value};
use std::net::SocketAddr;
use uuid::Uuid;

/// Single fallback covering every method/path: WebSocket upgrade, static
/// files, then action routing, in that order (spec §4.3).
#[allow(clippy::too_many_arguments)]
pub async fn fallback(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    cookies: CookieJar,
    ws_upgrade: Option<WebSocketUpgrade>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let cookie_name = state.sessions.cookie_name();
    let existing_id = cookies.get(cookie_name).and_then(|c| Uuid::parse_str(c.value()).ok());
    let (connection_id, is_new) = existing_id.map_or_else(|| (Uuid::new_v4(), true), |id| (id, false));
    let peer_identifier = addr.ip().to_string();

    if let Some(upgrade) = ws_upgrade {
        let connection = Connection::new(ConnectionType::WebSocket, peer_identifier, connection_id);
        return upgrade.on_upgrade(move |socket| ws::handle_socket(socket, state, connection));
    }

    if method == Method::GET && state.config.web_server.static_enabled {
        if let Some(response) = static_files::serve(&state.config.web_server, uri.path(), &headers) {
            return response;
        }
    }

    let Some(route_path) = uri.path().strip_prefix(&state.config.web_server.api_route) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some(http_method) = HttpMethod::from_http(&method) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some((action, path_params)) = state.actions.match_route(http_method, route_path) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let params = match build_params(&method, &uri, &body, &path_params) {
        Ok(params) => params,
        Err(()) => return StatusCode::BAD_REQUEST.into_response(),
    };

    let connection = Connection::new(ConnectionType::Web, peer_identifier, connection_id);
    state.connections.insert(connection.clone());
    let mut ctx = DispatchContext { state: state.clone(), connection };
    let result = act(&mut ctx, action.name(), params).await;
    state
        .connections
        .remove(ctx.connection.transport, &ctx.connection.peer_identifier, ctx.connection.id);

    let mut response = render(result);
    response.headers_mut().insert(
        "X-SERVER-NAME",
        state
            .config
            .process
            .name
            .parse()
            .unwrap_or_else(|_| "server".parse().expect("literal header value")),
    );
    if is_new {
        let cookie = axum_extra::extract::cookie::Cookie::build((cookie_name.to_string(), connection_id.to_string()))
            .path("/")
            .http_only(true)
            .max_age(cookie::time::Duration::seconds(
                i64::try_from(state.sessions.ttl_secs()).unwrap_or(i64::MAX),
            ))
            .build();
        if let Ok(value) = cookie.encoded().to_string().parse() {
            response.headers_mut().append(axum::http::header::SET_COOKIE, value);
        }
    }
    response
}

fn render(result: Result<Value, ActionError>) -> Response {
    match result {
        Ok(value) => Json(value).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Merge path-captured params with the request body (non-`GET`) or query
/// string (`GET`), path params taking precedence.
///
/// # Errors
///
/// Returns `Err(())` if a non-`GET` body is present but is not valid JSON.
fn build_params(
    method: &Method,
    uri: &Uri,
    body: &Bytes,
    path_params: &std::collections::HashMap<String, String>,
) -> Result<Value, ()> {
    let mut map = if *method == Method::GET {
        parse_query(uri.query().unwrap_or(""))
    } else if body.is_empty() {
        Map::new()
    } else {
        match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => return Err(()),
        }
    };
    for (key, value) in path_params {
        map.insert(key.clone(), Value::String(value.clone()));
    }
    Ok(Value::Object(map))
}

fn parse_query(query: &str) -> Map<String, Value> {
    let mut map = Map::new();
    for pair in query.split('&').filter(|s| !s.is_empty()) {
        let mut parts = pair.splitn(2, '=');
        let Some(key) = parts.next() else { continue };
        let value = parts.next().unwrap_or("");
        let key = percent_decode(key);
        let value = percent_decode(value);
        map.insert(key, Value::String(value));
    }
    map
}

fn percent_decode(input: &str) -> String {
    let replaced = input.replace('+', " ");
    let bytes = replaced.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(value) = u8::from_str_radix(&replaced[i + 1..i + 3], 16) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_query_decodes_and_splits_pairs() {
        let params = parse_query("name=Mario%20B&tag=a+b");
        assert_eq!(params.get("name").unwrap(), "Mario B");
        assert_eq!(params.get("tag").unwrap(), "a b");
    }

    #[test]
    fn build_params_path_params_override_body() {
        let mut path_params = std::collections::HashMap::new();
        path_params.insert("id".to_string(), "7".to_string());
        let uri: Uri = "/api/widget/7".parse().unwrap();
        let body = Bytes::from_static(br#"{"id":"wrong","name":"x"}"#);
        let params = build_params(&Method::POST, &uri, &body, &path_params).unwrap();
        assert_eq!(params["id"], Value::String("7".to_string()));
        assert_eq!(params["name"], Value::String("x".to_string()));
    }

    #[test]
    fn build_params_rejects_malformed_json_body() {
        let path_params = std::collections::HashMap::new();
        let uri: Uri = "/api/widget".parse().unwrap();
        let body = Bytes::from_static(b"not json");
        assert!(build_params(&Method::POST, &uri, &body, &path_params).is_err());
    }
}
