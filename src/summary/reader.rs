use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::data::fsvisit::FsVisitor;
use crate::error::Result;
use crate::summary::{ScalarEvent, TextEvent, SCALARS_FILE, TEXT_FILE, VIDEOS_DIR};

/// One logged video: its tag and frame file names in order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoEntry {
    pub tag: String,
    pub frames: Vec<String>,
}

pub fn read_scalars(run_dir: &Path) -> Result<Vec<ScalarEvent>> {
    read_lines(&run_dir.join(SCALARS_FILE))
}

pub fn read_text(run_dir: &Path) -> Result<Vec<TextEvent>> {
    read_lines(&run_dir.join(TEXT_FILE))
}

/// Every directory under `videos/` holding PNG frames, keyed by tag.
pub fn list_videos(run_dir: &Path) -> Result<Vec<VideoEntry>> {
    let root = run_dir.join(VIDEOS_DIR);
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let mut by_tag: BTreeMap<String, Vec<String>> = BTreeMap::new();
    FsVisitor::new(|path: &Path, _| {
        if path.extension().and_then(|e| e.to_str()) != Some("png") {
            return;
        }
        let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
            return;
        };
        let Ok(rel) = parent.strip_prefix(&root) else {
            return;
        };
        let tag = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        by_tag
            .entry(tag)
            .or_default()
            .push(name.to_string_lossy().into_owned());
    })
    .go(&root)?;

    Ok(by_tag
        .into_iter()
        .map(|(tag, frames)| VideoEntry { tag, frames })
        .collect())
}

/// Parses a JSON-lines file. A missing file reads as empty; a torn last line
/// (the writer may still be running) is skipped.
fn read_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(File::open(path)?);
    let lines: Vec<String> = reader.lines().collect::<std::io::Result<_>>()?;
    let last = lines.len().saturating_sub(1);

    let mut events = Vec::with_capacity(lines.len());
    for (i, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(event) => events.push(event),
            Err(_) if i == last => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn torn_final_line_is_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join(SCALARS_FILE),
            "{\"tag\":\"a\",\"step\":1,\"value\":2.0,\"wall_time\":0.0}\n{\"tag\":\"a\",\"st",
        )
        .unwrap();
        let events = read_scalars(tmp.path()).unwrap();
        assert_eq!(events.len(), 1);
        assert!(read_text(tmp.path()).unwrap().is_empty());
    }

    #[test]
    fn corrupt_middle_line_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join(SCALARS_FILE),
            "garbage\n{\"tag\":\"a\",\"step\":1,\"value\":2.0,\"wall_time\":0.0}\n",
        )
        .unwrap();
        assert!(read_scalars(tmp.path()).is_err());
    }

    #[test]
    fn videos_are_grouped_by_tag() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join(VIDEOS_DIR).join("TRAIN_recons/epoch=001/batch=00000");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("frame_0001.png"), b"").unwrap();
        std::fs::write(dir.join("frame_0000.png"), b"").unwrap();

        let videos = list_videos(tmp.path()).unwrap();
        assert_eq!(videos.len(), 1);
        assert_eq!(videos[0].tag, "TRAIN_recons/epoch=001/batch=00000");
        assert_eq!(videos[0].frames, vec!["frame_0000.png", "frame_0001.png"]);
    }
}
