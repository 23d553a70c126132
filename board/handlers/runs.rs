use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use phyre_steve::summary::{list_videos, read_scalars, read_text, ScalarEvent, SCALARS_FILE, TEXT_FILE};
use tracing::warn;

use crate::query::{html_escape, url_encode};
use crate::render::render_page;
use crate::routes::{html_response, json_response, not_found, server_error, HttpResponse};

/// Subdirectories of `logdir` the trainer has written summaries into, newest
/// name last.
pub fn list_runs(logdir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(logdir) else {
        return Vec::new();
    };
    let mut runs: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| {
            let p = e.path();
            p.join(SCALARS_FILE).is_file() || p.join(TEXT_FILE).is_file()
        })
        .filter_map(|e| e.file_name().to_str().map(str::to_owned))
        .collect();
    runs.sort();
    runs
}

fn run_dir(logdir: &Path, run: &str) -> Option<PathBuf> {
    let dir = logdir.join(run);
    dir.is_dir().then_some(dir)
}

// ---------------------------------------------------------------------------
// GET /
// ---------------------------------------------------------------------------

pub fn handle_index(logdir: &Path) -> HttpResponse {
    let runs = list_runs(logdir);
    let body = if runs.is_empty() {
        format!(
            "<p class=\"hint\">No runs under {}.</p>",
            html_escape(&logdir.display().to_string())
        )
    } else {
        let items: String = runs
            .iter()
            .rev()
            .map(|r| format!("<li><a href=\"/runs/{}\">{}</a></li>\n", url_encode(r), html_escape(r)))
            .collect();
        format!("<ul>\n{}</ul>", items)
    };
    html_response(render_page("Runs", &body))
}

// ---------------------------------------------------------------------------
// GET /runs/{run}
// ---------------------------------------------------------------------------

pub fn handle_run(logdir: &Path, run: &str) -> HttpResponse {
    let Some(dir) = run_dir(logdir, run) else {
        return not_found();
    };
    let (scalars, text, videos) = match (read_scalars(&dir), read_text(&dir), list_videos(&dir)) {
        (Ok(s), Ok(t), Ok(v)) => (s, t, v),
        (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => {
            warn!(run, error = %e, "failed to read run");
            return server_error(&e.to_string());
        }
    };

    let mut body = String::new();

    let mut by_tag: BTreeMap<&str, Vec<&ScalarEvent>> = BTreeMap::new();
    for event in &scalars {
        by_tag.entry(event.tag.as_str()).or_default().push(event);
    }
    body.push_str("<h2>Scalars</h2>\n");
    if by_tag.is_empty() {
        body.push_str("<p class=\"hint\">No scalars yet.</p>\n");
    }
    for (tag, events) in &by_tag {
        body.push_str(&format!(
            "<h3><a href=\"/runs/{}/scalars?tag={}\">{}</a></h3>\n{}\n",
            url_encode(run),
            url_encode(tag),
            html_escape(tag),
            build_svg_curve(events)
        ));
    }

    body.push_str("<h2>Text</h2>\n");
    for event in &text {
        body.push_str(&format!(
            "<h3>{} (step {})</h3>\n<pre>{}</pre>\n",
            html_escape(&event.tag),
            event.step,
            html_escape(&event.text)
        ));
    }

    body.push_str("<h2>Videos</h2>\n");
    if videos.is_empty() {
        body.push_str("<p class=\"hint\">No videos yet.</p>\n");
    }
    for video in &videos {
        let Some(first) = video.frames.first() else {
            continue;
        };
        let tag_path: Vec<String> = video.tag.split('/').map(url_encode).collect();
        body.push_str(&format!(
            "<h3>{} ({} frames)</h3>\n<img class=\"frame\" src=\"/runs/{}/videos/{}/{}\">\n",
            html_escape(&video.tag),
            video.frames.len(),
            url_encode(run),
            tag_path.join("/"),
            url_encode(first)
        ));
    }

    html_response(render_page(run, &body))
}

// ---------------------------------------------------------------------------
// GET /runs/{run}/scalars?tag=..
// ---------------------------------------------------------------------------

pub fn handle_scalars(logdir: &Path, run: &str, tag: Option<&str>) -> HttpResponse {
    let Some(dir) = run_dir(logdir, run) else {
        return not_found();
    };
    match read_scalars(&dir) {
        Ok(events) => {
            let selected: Vec<&ScalarEvent> = events
                .iter()
                .filter(|e| tag.map_or(true, |t| e.tag == t))
                .collect();
            match serde_json::to_string(&selected) {
                Ok(json) => json_response(json),
                Err(e) => server_error(&e.to_string()),
            }
        }
        Err(e) => server_error(&e.to_string()),
    }
}

// ---------------------------------------------------------------------------
// GET /runs/{run}/text
// ---------------------------------------------------------------------------

pub fn handle_text(logdir: &Path, run: &str) -> HttpResponse {
    let Some(dir) = run_dir(logdir, run) else {
        return not_found();
    };
    match read_text(&dir).map(|events| serde_json::to_string(&events)) {
        Ok(Ok(json)) => json_response(json),
        Ok(Err(e)) => server_error(&e.to_string()),
        Err(e) => server_error(&e.to_string()),
    }
}

// ---------------------------------------------------------------------------
// SVG scalar curve
// ---------------------------------------------------------------------------

fn build_svg_curve(events: &[&ScalarEvent]) -> String {
    let points: Vec<(f64, f64)> = events
        .iter()
        .filter(|e| e.value.is_finite())
        .map(|e| (e.step as f64, e.value))
        .collect();
    if points.len() < 2 {
        return match points.first() {
            Some((step, value)) => format!("<p class=\"hint\">{:.6} at step {}</p>", value, step),
            None => "<p class=\"hint\">No finite values.</p>".into(),
        };
    }

    let w = 760.0f64;
    let h = 200.0f64;
    let pad_l = 70.0f64;
    let pad_r = 16.0f64;
    let pad_t = 12.0f64;
    let pad_b = 26.0f64;

    let (min_x, max_x) = bounds(points.iter().map(|p| p.0));
    let (min_y, max_y) = bounds(points.iter().map(|p| p.1));

    let px = |x: f64, y: f64| -> (f64, f64) {
        let sx = pad_l + (x - min_x) / (max_x - min_x + 1e-12) * (w - pad_l - pad_r);
        let sy = pad_t + (max_y - y) / (max_y - min_y + 1e-12) * (h - pad_t - pad_b);
        (sx, sy)
    };

    let path: String = points
        .iter()
        .enumerate()
        .map(|(i, &(x, y))| {
            let (sx, sy) = px(x, y);
            if i == 0 { format!("M{:.1},{:.1}", sx, sy) } else { format!(" L{:.1},{:.1}", sx, sy) }
        })
        .collect();

    let grey_grid = "#f0f2f5";
    let grey_text = "#999";
    let y_labels: String = (0..=4)
        .map(|g| {
            let frac = g as f64 / 4.0;
            let val = min_y + (max_y - min_y) * frac;
            let y = pad_t + (1.0 - frac) * (h - pad_t - pad_b);
            format!(
                "<text x=\"{:.1}\" y=\"{:.1}\" text-anchor=\"end\" fill=\"{}\" font-size=\"10\">{:.4}</text>\n\
                 <line x1=\"{:.1}\" y1=\"{:.1}\" x2=\"{:.1}\" y2=\"{:.1}\" stroke=\"{}\" stroke-width=\"1\"/>",
                pad_l - 4.0, y + 4.0, grey_text, val,
                pad_l, y, w - pad_r, y, grey_grid
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let x_labels: String = [min_x, (min_x + max_x) / 2.0, max_x]
        .iter()
        .map(|&x| {
            let (sx, _) = px(x, min_y);
            format!(
                "<text x=\"{:.1}\" y=\"{:.1}\" text-anchor=\"middle\" fill=\"{}\" font-size=\"10\">{:.0}</text>",
                sx, h - 4.0, grey_text, x
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "<svg class=\"chart\" width=\"{}\" height=\"{}\" xmlns=\"http://www.w3.org/2000/svg\">\n\
         {}\n{}\n\
         <path d=\"{}\" stroke=\"#dc2626\" stroke-width=\"1.5\" fill=\"none\"/>\n\
         </svg>",
        w, h, y_labels, x_labels, path
    )
}

fn bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(step: u64, value: f64) -> ScalarEvent {
        ScalarEvent { tag: "TRAIN/loss".into(), step, value, wall_time: 0.0 }
    }

    #[test]
    fn curve_needs_two_points() {
        let a = event(0, 1.0);
        assert!(build_svg_curve(&[&a]).contains("hint"));

        let b = event(10, 0.5);
        let svg = build_svg_curve(&[&a, &b]);
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("M70.0,"));
    }

    #[test]
    fn only_dirs_with_summaries_are_runs() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("empty")).unwrap();
        let run = tmp.path().join("2026-10-18T09:00:00.000000");
        std::fs::create_dir(&run).unwrap();
        std::fs::write(run.join(SCALARS_FILE), b"").unwrap();

        assert_eq!(list_runs(tmp.path()), vec!["2026-10-18T09:00:00.000000"]);
    }
}
