use clap::ValueEnum;
use ndarray::{s, Array2, Array5, Axis};
use serde::{Deserialize, Serialize};

use crate::data::dataset::{video_len, Video};
use crate::error::{Error, Result};

/// How videos of different lengths are reconciled into one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum CollatePolicy {
    /// Clip every video to the shortest one.
    Truncate,
    /// Repeat each video's last frame up to the longest one.
    Pad,
}

/// A collated batch.
///
/// `video` is `[B, T, C, H, W]`. The meaning of `mask` (`[B, T]`) depends on
/// `policy`: after padding it is `true` on synthetic frames; after truncation
/// every frame is real and the mask is all `true`.
#[derive(Debug, Clone)]
pub struct Batch {
    pub video: Array5<f32>,
    pub mask: Array2<bool>,
    pub policy: CollatePolicy,
}

impl Batch {
    pub fn batch_size(&self) -> usize {
        self.video.len_of(Axis(0))
    }

    pub fn num_frames(&self) -> usize {
        self.video.len_of(Axis(1))
    }

    /// Whether frame `t` of sample `b` came from the dataset.
    pub fn is_real_frame(&self, b: usize, t: usize) -> bool {
        match self.policy {
            CollatePolicy::Truncate => true,
            CollatePolicy::Pad => !self.mask[[b, t]],
        }
    }

    /// First `n` samples, with their masks.
    pub fn head(&self, n: usize) -> Batch {
        let n = n.min(self.batch_size());
        Batch {
            video: self.video.slice(s![..n, .., .., .., ..]).to_owned(),
            mask: self.mask.slice(s![..n, ..]).to_owned(),
            policy: self.policy,
        }
    }
}

pub fn collate(samples: &[Video], policy: CollatePolicy) -> Result<Batch> {
    match policy {
        CollatePolicy::Truncate => make_batch_truncated(samples),
        CollatePolicy::Pad => make_batch_padded(samples),
    }
}

/// Pads every video to the batch's longest by repeating its final frame.
pub fn make_batch_padded(samples: &[Video]) -> Result<Batch> {
    let (c, h, w) = frame_shape(samples)?;
    let max_len = samples.iter().map(video_len).max().unwrap_or(0);

    let mut video = Array5::<f32>::zeros((samples.len(), max_len, c, h, w));
    let mut mask = Array2::<bool>::from_elem((samples.len(), max_len), false);

    for (b, sample) in samples.iter().enumerate() {
        let len = video_len(sample);
        video.slice_mut(s![b, ..len, .., .., ..]).assign(sample);

        let last = sample.index_axis(Axis(0), len - 1);
        for t in len..max_len {
            video.slice_mut(s![b, t, .., .., ..]).assign(&last);
            mask[[b, t]] = true;
        }
    }

    Ok(Batch {
        video,
        mask,
        policy: CollatePolicy::Pad,
    })
}

/// Clips every video to the batch's shortest.
pub fn make_batch_truncated(samples: &[Video]) -> Result<Batch> {
    let (c, h, w) = frame_shape(samples)?;
    let min_len = samples.iter().map(video_len).min().unwrap_or(0);

    let mut video = Array5::<f32>::zeros((samples.len(), min_len, c, h, w));
    for (b, sample) in samples.iter().enumerate() {
        video
            .slice_mut(s![b, .., .., .., ..])
            .assign(&sample.slice(s![..min_len, .., .., ..]));
    }

    Ok(Batch {
        video,
        mask: Array2::from_elem((samples.len(), min_len), true),
        policy: CollatePolicy::Truncate,
    })
}

/// Common `[C, H, W]` of all samples.
fn frame_shape(samples: &[Video]) -> Result<(usize, usize, usize)> {
    let first = samples
        .first()
        .ok_or_else(|| Error::Collate("cannot collate an empty list of videos".into()))?;
    let (_, c, h, w) = first.dim();

    for (i, sample) in samples.iter().enumerate() {
        let (t, sc, sh, sw) = sample.dim();
        if t == 0 {
            return Err(Error::Collate(format!("video {} has no frames", i)));
        }
        if (sc, sh, sw) != (c, h, w) {
            return Err(Error::Collate(format!(
                "video {} has frames of shape {:?}, expected {:?}",
                i,
                (sc, sh, sw),
                (c, h, w)
            )));
        }
    }
    Ok((c, h, w))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    fn video(len: usize, fill: f32) -> Video {
        Array4::from_shape_fn((len, 3, 2, 2), |(t, _, _, _)| fill + t as f32)
    }

    #[test]
    fn truncation_uses_shortest_length() {
        let samples = vec![video(5, 0.0), video(3, 10.0), video(4, 20.0)];
        let batch = make_batch_truncated(&samples).unwrap();

        assert_eq!(batch.video.dim(), (3, 3, 3, 2, 2));
        assert!(batch.mask.iter().all(|&m| m));
        assert_eq!(batch.video[[0, 2, 0, 0, 0]], 2.0);
        assert_eq!(batch.video[[1, 2, 1, 1, 1]], 12.0);
        assert!(batch.is_real_frame(2, 2));
    }

    #[test]
    fn padding_repeats_last_frame_and_marks_it() {
        let samples = vec![video(2, 0.0), video(4, 10.0)];
        let batch = make_batch_padded(&samples).unwrap();

        assert_eq!(batch.num_frames(), 4);
        for t in 0..4 {
            assert_eq!(batch.mask[[0, t]], t >= 2);
            assert!(!batch.mask[[1, t]]);
        }
        // Padded frames equal the last real frame.
        assert_eq!(batch.video[[0, 2, 0, 0, 0]], 1.0);
        assert_eq!(batch.video[[0, 3, 2, 1, 0]], 1.0);
        assert_eq!(batch.video[[1, 3, 0, 0, 0]], 13.0);
        assert!(!batch.is_real_frame(0, 3));
        assert!(batch.is_real_frame(0, 1));
    }

    #[test]
    fn rejects_empty_and_mismatched_inputs() {
        assert!(make_batch_padded(&[]).is_err());
        assert!(make_batch_truncated(&[]).is_err());

        let odd = Array4::<f32>::zeros((2, 3, 4, 4));
        assert!(collate(&[video(2, 0.0), odd], CollatePolicy::Pad).is_err());

        let empty = Array4::<f32>::zeros((0, 3, 2, 2));
        assert!(collate(&[empty], CollatePolicy::Truncate).is_err());
    }

    #[test]
    fn head_keeps_masks_aligned() {
        let batch = make_batch_padded(&[video(1, 0.0), video(3, 0.0), video(2, 0.0)]).unwrap();
        let head = batch.head(2);
        assert_eq!(head.batch_size(), 2);
        assert_eq!(head.mask.dim(), (2, 3));
        assert!(head.mask[[0, 2]]);
        assert_eq!(batch.head(10).batch_size(), 3);
    }
}
