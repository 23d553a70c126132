use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use ndarray::{Array4, ArrayView3, Axis};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::summary::{tag_components, ScalarEvent, TextEvent, SCALARS_FILE, TEXT_FILE, VIDEOS_DIR};

/// Appends summaries to files in a run directory.
pub struct SummaryWriter {
    dir: PathBuf,
    scalars: BufWriter<File>,
    text: BufWriter<File>,
}

impl SummaryWriter {
    /// Opens (creating if needed) the summary files under `dir`.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let open = |name: &str| -> Result<BufWriter<File>> {
            let file = OpenOptions::new().create(true).append(true).open(dir.join(name))?;
            Ok(BufWriter::new(file))
        };
        Ok(SummaryWriter {
            scalars: open(SCALARS_FILE)?,
            text: open(TEXT_FILE)?,
            dir,
        })
    }

    pub fn log_dir(&self) -> &Path {
        &self.dir
    }

    pub fn add_scalar(&mut self, tag: &str, value: f64, step: u64) -> Result<()> {
        let event = ScalarEvent {
            tag: tag.to_owned(),
            step,
            value,
            wall_time: wall_time(),
        };
        write_line(&mut self.scalars, &event)
    }

    pub fn add_text(&mut self, tag: &str, text: &str, step: u64) -> Result<()> {
        let event = TextEvent {
            tag: tag.to_owned(),
            step,
            text: text.to_owned(),
            wall_time: wall_time(),
        };
        write_line(&mut self.text, &event)
    }

    /// Writes a `[T, C, H, W]` video (`C` of 1 or 3, values in `[0, 1]`) as
    /// one PNG per frame under `videos/<tag>/`. Returns that directory.
    pub fn add_video(&mut self, tag: &str, frames: &Array4<f32>) -> Result<PathBuf> {
        let mut out_dir = self.dir.join(VIDEOS_DIR);
        for part in tag_components(tag) {
            out_dir.push(part);
        }
        fs::create_dir_all(&out_dir)?;

        for (t, frame) in frames.axis_iter(Axis(0)).enumerate() {
            let img = frame_to_image(frame)?;
            img.save(out_dir.join(format!("frame_{:04}.png", t)))?;
        }
        Ok(out_dir)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.scalars.flush()?;
        self.text.flush()?;
        Ok(())
    }

    pub fn close(mut self) -> Result<()> {
        self.flush()
    }
}

fn write_line<T: Serialize>(out: &mut BufWriter<File>, event: &T) -> Result<()> {
    serde_json::to_writer(&mut *out, event)?;
    out.write_all(b"\n")?;
    Ok(())
}

fn wall_time() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

fn frame_to_image(frame: ArrayView3<'_, f32>) -> Result<RgbImage> {
    let (c, h, w) = frame.dim();
    if c != 1 && c != 3 {
        return Err(Error::Shape(format!("cannot draw a frame with {} channels", c)));
    }
    let to_u8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;

    Ok(RgbImage::from_fn(w as u32, h as u32, |x, y| {
        let (y, x) = (y as usize, x as usize);
        if c == 1 {
            let v = to_u8(frame[[0, y, x]]);
            Rgb([v, v, v])
        } else {
            Rgb([
                to_u8(frame[[0, y, x]]),
                to_u8(frame[[1, y, x]]),
                to_u8(frame[[2, y, x]]),
            ])
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summary::{read_scalars, read_text};

    #[test]
    fn scalars_and_text_are_appended_as_json_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let mut writer = SummaryWriter::new(tmp.path()).unwrap();
        writer.add_scalar("TRAIN/loss", 1.5, 0).unwrap();
        writer.add_scalar("TRAIN/loss", 1.25, 10).unwrap();
        writer.add_text("hparams", "a=1__b=2", 0).unwrap();
        writer.close().unwrap();

        let scalars = read_scalars(tmp.path()).unwrap();
        assert_eq!(scalars.len(), 2);
        assert_eq!(scalars[1].step, 10);
        assert_eq!(scalars[1].value, 1.25);
        assert_eq!(read_text(tmp.path()).unwrap()[0].text, "a=1__b=2");
    }

    #[test]
    fn video_frames_are_written_as_png() {
        let tmp = tempfile::tempdir().unwrap();
        let mut writer = SummaryWriter::new(tmp.path()).unwrap();
        let mut frames = Array4::<f32>::zeros((2, 3, 4, 5));
        frames[[1, 0, 3, 4]] = 1.0;

        let dir = writer.add_video("VAL_recons/epoch=051", &frames).unwrap();
        assert!(dir.ends_with("videos/VAL_recons/epoch=051"));

        let img = image::open(dir.join("frame_0001.png")).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (5, 4));
        assert_eq!(img.get_pixel(4, 3).0, [255, 0, 0]);
        assert!(dir.join("frame_0000.png").is_file());
    }

    #[test]
    fn rejects_unsupported_channel_counts() {
        let tmp = tempfile::tempdir().unwrap();
        let mut writer = SummaryWriter::new(tmp.path()).unwrap();
        assert!(writer.add_video("x", &Array4::<f32>::zeros((1, 2, 2, 2))).is_err());
    }
}
