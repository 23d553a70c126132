use std::io::Cursor;
use std::path::Path;

use tiny_http::{Header, Method, Request, Response, StatusCode};
use tracing::debug;

use crate::handlers;
use crate::query::{is_safe_component, parse_query};

pub type HttpResponse = Response<Cursor<Vec<u8>>>;

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

fn respond_bytes(status: u16, content_type: &str, body: Vec<u8>) -> HttpResponse {
    let len = body.len();
    let headers = Header::from_bytes(&b"Content-Type"[..], content_type.as_bytes())
        .into_iter()
        .collect();
    Response::new(StatusCode(status), headers, Cursor::new(body), Some(len), None)
}

pub fn html_response(body: String) -> HttpResponse {
    respond_bytes(200, "text/html; charset=utf-8", body.into_bytes())
}

pub fn json_response(body: String) -> HttpResponse {
    respond_bytes(200, "application/json", body.into_bytes())
}

pub fn png_response(body: Vec<u8>) -> HttpResponse {
    respond_bytes(200, "image/png", body)
}

pub fn not_found() -> HttpResponse {
    respond_bytes(404, "text/plain", b"404 Not Found".to_vec())
}

pub fn bad_request(reason: &str) -> HttpResponse {
    respond_bytes(400, "text/plain", format!("400 Bad Request: {}", reason).into_bytes())
}

pub fn server_error(reason: &str) -> HttpResponse {
    respond_bytes(500, "text/plain", format!("500 Internal Server Error: {}", reason).into_bytes())
}

// ---------------------------------------------------------------------------
// Request dispatcher
// ---------------------------------------------------------------------------

/// Routes one request. Only `GET` is served; every path component is checked
/// before it touches the filesystem.
pub fn dispatch(request: Request, logdir: &Path) {
    let url = request.url().to_owned();
    let (path, query) = match url.find('?') {
        Some(pos) => (&url[..pos], &url[pos + 1..]),
        None => (url.as_str(), ""),
    };
    debug!(method = %request.method(), path, "request");

    let response = if *request.method() != Method::Get {
        respond_bytes(405, "text/plain", b"405 Method Not Allowed".to_vec())
    } else {
        route(logdir, path, query)
    };
    let _ = request.respond(response);
}

fn route(logdir: &Path, path: &str, query: &str) -> HttpResponse {
    let parts: Vec<String> = path
        .split('/')
        .filter(|p| !p.is_empty())
        .map(crate::query::url_decode)
        .collect();
    if parts.iter().any(|p| !is_safe_component(p)) {
        return bad_request("invalid path component");
    }
    let parts: Vec<&str> = parts.iter().map(String::as_str).collect();

    match parts.as_slice() {
        [] => handlers::runs::handle_index(logdir),
        ["runs", run] => handlers::runs::handle_run(logdir, run),
        ["runs", run, "scalars"] => {
            let pairs = parse_query(query);
            handlers::runs::handle_scalars(logdir, run, crate::query::query_get(&pairs, "tag"))
        }
        ["runs", run, "text"] => handlers::runs::handle_text(logdir, run),
        ["runs", run, "videos"] => handlers::media::handle_videos(logdir, run),
        ["runs", run, "videos", rest @ ..] if rest.len() >= 2 => {
            handlers::media::handle_frame(logdir, run, rest)
        }
        _ => not_found(),
    }
}
