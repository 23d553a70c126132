//! Run summaries: scalar curves, text notes and visualization videos, stored
//! as plain files inside a run directory.

pub mod reader;
pub mod writer;

use serde::{Deserialize, Serialize};

pub use reader::{list_videos, read_scalars, read_text, VideoEntry};
pub use writer::SummaryWriter;

pub const SCALARS_FILE: &str = "scalars.jsonl";
pub const TEXT_FILE: &str = "text.jsonl";
pub const VIDEOS_DIR: &str = "videos";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarEvent {
    pub tag: String,
    pub step: u64,
    pub value: f64,
    /// Seconds since the Unix epoch.
    pub wall_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextEvent {
    pub tag: String,
    pub step: u64,
    pub text: String,
    pub wall_time: f64,
}

/// Turns a `/`-separated tag into safe relative path components.
pub fn tag_components(tag: &str) -> Vec<String> {
    tag.split('/')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let cleaned: String = part
                .chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '=' | '.') {
                        c
                    } else {
                        '_'
                    }
                })
                .collect();
            if cleaned.chars().all(|c| c == '.') {
                cleaned.replace('.', "_")
            } else {
                cleaned
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_become_safe_components() {
        assert_eq!(
            tag_components("TRAIN_recons/epoch=001/batch=00010"),
            vec!["TRAIN_recons", "epoch=001", "batch=00010"]
        );
        assert_eq!(tag_components("../x y//."), vec!["__", "x_y", "_"]);
    }
}
