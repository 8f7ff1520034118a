//! Static file serving with conditional GETs (spec §4.3 "Static files"),
//! generalized from the teacher's `middleware::file_serving` (uploaded-file
//! storage + range requests) to "a configured static directory" with whole-
//! file GET plus `ETag`/`Last-Modified` validation — this spec has no range
//! request requirement.

use crate::config::WebServerConfig;
use axum::{
    body::Body,
    http::{header, HeaderMap, Response, StatusCode},
    response::IntoResponse,
};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

/// Try to serve `request_path` (the full request path, including
/// `static_route`) out of `config.static_directory`. Returns `None` if the
/// path isn't under the static route, doesn't exist, or attempts traversal —
/// callers should fall through to action routing in every `None` case, per
/// spec (a traversal attempt looks exactly like a missing file).
pub fn serve(config: &WebServerConfig, request_path: &str, headers: &HeaderMap) -> Option<Response<Body>> {
    let relative = request_path.strip_prefix(&config.static_route)?;
    let resolved = resolve_within(Path::new(&config.static_directory), relative)?;

    let mut resolved = resolved;
    if resolved.is_dir() {
        resolved = resolved.join("index.html");
    }

    let metadata = std::fs::metadata(&resolved).ok()?;
    if !metadata.is_file() {
        return None;
    }

    let etag = config.static_etag.then(|| etag_for(&metadata));
    let last_modified = metadata.modified().ok().map(httpdate::fmt_http_date);

    if not_modified(headers, etag.as_deref(), last_modified.as_deref()) {
        return Some(
            Response::builder()
                .status(StatusCode::NOT_MODIFIED)
                .body(Body::empty())
                .unwrap_or_else(|_| Response::new(Body::empty())),
        );
    }

    let bytes = std::fs::read(&resolved).ok()?;
    let content_type = mime_guess::from_path(&resolved).first_or_octet_stream();

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type.as_ref())
        .header(header::CACHE_CONTROL, "public, max-age=3600");
    if let Some(etag) = &etag {
        builder = builder.header(header::ETAG, etag);
    }
    if let Some(last_modified) = &last_modified {
        builder = builder.header(header::LAST_MODIFIED, last_modified);
    }
    Some(
        builder
            .body(Body::from(bytes))
            .unwrap_or_else(|_| Response::new(Body::empty())),
    )
}

/// Join `directory` with `relative`, rejecting any path that would escape
/// it — `..` segments, absolute segments, and (via `canonicalize`) symlink
/// escapes (spec §4.3: "reject path traversal ... by returning as if the
/// file does not exist").
fn resolve_within(directory: &Path, relative: &str) -> Option<PathBuf> {
    let relative = relative.trim_start_matches('/');
    let decoded = percent_decode(relative);
    let mut joined = directory.to_path_buf();
    for component in Path::new(&decoded).components() {
        match component {
            Component::Normal(part) => joined.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    let base = directory.canonicalize().ok()?;
    if !joined.exists() {
        // Validate the parent exists and is still within `base`, since the
        // leaf (`index.html`) may not exist yet when we check.
        let parent = joined.parent()?.canonicalize().ok()?;
        return parent.starts_with(&base).then_some(joined);
    }
    let canonical = joined.canonicalize().ok()?;
    canonical.starts_with(&base).then_some(joined)
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(value) = u8::from_str_radix(&input[i + 1..i + 3], 16) {
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

fn etag_for(metadata: &std::fs::Metadata) -> String {
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|m| m.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs());
    let len = metadata.len();
    format!(r#""{len}-{mtime}""#)
}

fn not_modified(headers: &HeaderMap, etag: Option<&str>, last_modified: Option<&str>) -> bool {
    if let (Some(etag), Some(if_none_match)) = (etag, headers.get(header::IF_NONE_MATCH)) {
        if if_none_match.to_str().is_ok_and(|v| v == etag) {
            return true;
        }
    }
    if let (Some(last_modified), Some(if_modified_since)) = (last_modified, headers.get(header::IF_MODIFIED_SINCE)) {
        if if_modified_since.to_str().is_ok_and(|v| v == last_modified) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config(dir: &Path) -> WebServerConfig {
        WebServerConfig {
            static_directory: dir.to_string_lossy().into_owned(),
            static_route: "/".to_string(),
            static_etag: true,
            ..WebServerConfig::default()
        }
    }

    #[test]
    fn serves_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("hello.txt")).unwrap();
        file.write_all(b"hi").unwrap();

        let response = serve(&config(dir.path()), "/hello.txt", &HeaderMap::new()).expect("served");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn rejects_parent_traversal() {
        let dir = tempfile::tempdir().unwrap();
        assert!(serve(&config(dir.path()), "/../Cargo.toml", &HeaderMap::new()).is_none());
    }

    #[test]
    fn rejects_percent_encoded_traversal() {
        let dir = tempfile::tempdir().unwrap();
        assert!(serve(&config(dir.path()), "/%2e%2e/Cargo.toml", &HeaderMap::new()).is_none());
    }

    #[test]
    fn missing_file_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(serve(&config(dir.path()), "/missing.txt", &HeaderMap::new()).is_none());
    }

    #[test]
    fn if_none_match_yields_304() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"content").unwrap();
        let first = serve(&config(dir.path()), "/a.txt", &HeaderMap::new()).unwrap();
        let etag = first.headers().get(header::ETAG).unwrap().to_str().unwrap().to_string();

        let mut headers = HeaderMap::new();
        headers.insert(header::IF_NONE_MATCH, etag.parse().unwrap());
        let second = serve(&config(dir.path()), "/a.txt", &headers).unwrap();
        assert_eq!(second.status(), StatusCode::NOT_MODIFIED);
    }
}
