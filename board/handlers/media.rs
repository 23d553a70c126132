use std::path::Path;

use phyre_steve::summary::{list_videos, VIDEOS_DIR};

use crate::routes::{bad_request, json_response, not_found, png_response, server_error, HttpResponse};

/// `GET /runs/{run}/videos`
///
/// Lists every logged video tag with its frame file names.
pub fn handle_videos(logdir: &Path, run: &str) -> HttpResponse {
    let dir = logdir.join(run);
    if !dir.is_dir() {
        return not_found();
    }
    match list_videos(&dir).map(|videos| serde_json::to_string(&videos)) {
        Ok(Ok(json)) => json_response(json),
        Ok(Err(e)) => server_error(&e.to_string()),
        Err(e) => server_error(&e.to_string()),
    }
}

/// `GET /runs/{run}/videos/{tag...}/{frame}.png`
///
/// `parts` has already been checked component by component.
pub fn handle_frame(logdir: &Path, run: &str, parts: &[&str]) -> HttpResponse {
    let Some((frame, tag)) = parts.split_last() else {
        return not_found();
    };
    if !frame.ends_with(".png") {
        return bad_request("only PNG frames are served");
    }

    let mut path = logdir.join(run).join(VIDEOS_DIR);
    for component in tag {
        path.push(component);
    }
    path.push(frame);

    match std::fs::read(&path) {
        Ok(bytes) => png_response(bytes),
        Err(_) => not_found(),
    }
}
