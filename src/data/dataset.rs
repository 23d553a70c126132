use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use ndarray::{Array3, Array4, Axis};
use ndarray_npy::ReadNpyExt;
use tracing::debug;

use crate::data::fsvisit::FsVisitor;
use crate::data::phyre::{max_pool_2x2, observations_to_float_rgb};
use crate::error::{Error, Result};

/// One decoded video, time-major `[T, C, H, W]`, values in `[0, 1]`.
pub type Video = Array4<f32>;

/// File extension of serialized simulation videos.
pub const VIDEO_EXTENSION: &str = "npy";

/// Random-access collection of videos.
pub trait VideoDataset: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decodes sample `idx`.
    fn get(&self, idx: usize) -> Result<Video>;
}

/// PHYRE rollouts stored as `.npy` arrays of object codes, shape `[T, W, H]`.
///
/// Files are discovered once at construction. Each `get` decodes the whole
/// video from disk; nothing is cached.
#[derive(Debug, Clone)]
pub struct PhyreVideoDataset {
    video_paths: Vec<PathBuf>,
}

impl PhyreVideoDataset {
    /// Collects every `.npy` file under `base_path`.
    pub fn discover(base_path: impl AsRef<Path>) -> Result<Self> {
        let mut video_paths = Vec::new();
        FsVisitor::new(|path: &Path, _| {
            if path.extension().and_then(|e| e.to_str()) == Some(VIDEO_EXTENSION) {
                video_paths.push(path.to_path_buf());
            }
        })
        .go(base_path.as_ref())?;

        debug!(
            root = %base_path.as_ref().display(),
            videos = video_paths.len(),
            "discovered videos"
        );
        Ok(PhyreVideoDataset { video_paths })
    }

    pub fn from_paths(video_paths: Vec<PathBuf>) -> Self {
        PhyreVideoDataset { video_paths }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.video_paths
    }
}

impl VideoDataset for PhyreVideoDataset {
    fn len(&self) -> usize {
        self.video_paths.len()
    }

    fn get(&self, idx: usize) -> Result<Video> {
        let path = self.video_paths.get(idx).ok_or_else(|| {
            Error::Shape(format!(
                "index {} out of bounds for dataset of {} videos",
                idx,
                self.video_paths.len()
            ))
        })?;

        let codes = read_codes(path)?;
        let rgb = observations_to_float_rgb(codes.view())?;
        Ok(max_pool_2x2(&rgb))
    }
}

/// Integer element types a code array may be stored as.
pub const CODE_DTYPES: &str = "i64, i32, i16, i8, u32, u16, u8";

/// Reads a `[T, W, H]` code array stored as any of `CODE_DTYPES`.
pub fn read_codes(path: &Path) -> Result<Array3<i64>> {
    let open = || -> Result<BufReader<File>> { Ok(BufReader::new(File::open(path)?)) };

    let first_err = match Array3::<i64>::read_npy(open()?) {
        Ok(arr) => return Ok(arr),
        Err(e) => e,
    };
    macro_rules! widen_from {
        ($($t:ty),*) => {
            $(
                if let Ok(arr) = Array3::<$t>::read_npy(open()?) {
                    return Ok(arr.mapv(i64::from));
                }
            )*
        };
    }
    widen_from!(i32, i16, i8, u32, u16, u8);

    Err(Error::Npy {
        path: path.to_path_buf(),
        reason: format!("expected an integer array ({}): {}", CODE_DTYPES, first_err),
    })
}

/// Number of frames in a decoded video.
pub fn video_len(video: &Video) -> usize {
    video.len_of(Axis(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray_npy::WriteNpyExt;

    fn write_codes<T: ndarray_npy::WritableElement>(path: &Path, codes: &Array3<T>) {
        let file = File::create(path).unwrap();
        codes.write_npy(file).unwrap();
    }

    #[test]
    fn loads_time_major_downsampled_video() {
        let tmp = tempfile::tempdir().unwrap();
        let codes = Array3::<i64>::from_shape_fn((7, 8, 6), |(t, w, h)| ((t + w + h) % 7) as i64);
        write_codes(&tmp.path().join("a.npy"), &codes);
        std::fs::write(tmp.path().join("notes.txt"), b"ignored").unwrap();

        let ds = PhyreVideoDataset::discover(tmp.path()).unwrap();
        assert_eq!(ds.len(), 1);

        let video = ds.get(0).unwrap();
        assert_eq!(video.dim(), (7, 3, 4, 3));
        assert_eq!(video_len(&video), 7);
        assert!(video.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn accepts_narrow_integer_codes() {
        let tmp = tempfile::tempdir().unwrap();
        let codes = Array3::<u8>::from_elem((2, 4, 4), 3);
        write_codes(&tmp.path().join("b.npy"), &codes);

        let ds = PhyreVideoDataset::discover(tmp.path()).unwrap();
        let video = ds.get(0).unwrap();
        assert_eq!(video.dim(), (2, 3, 2, 2));
        assert!((video[[0, 2, 0, 0]] - 217.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn accepts_every_integer_width() {
        let tmp = tempfile::tempdir().unwrap();
        write_codes(&tmp.path().join("a.npy"), &Array3::<i16>::from_elem((1, 2, 2), 6));
        write_codes(&tmp.path().join("b.npy"), &Array3::<u16>::from_elem((1, 2, 2), 2));
        write_codes(&tmp.path().join("c.npy"), &Array3::<i8>::from_elem((1, 2, 2), 1));

        assert_eq!(read_codes(&tmp.path().join("a.npy")).unwrap()[[0, 1, 1]], 6);
        assert_eq!(read_codes(&tmp.path().join("b.npy")).unwrap()[[0, 0, 0]], 2);
        assert_eq!(read_codes(&tmp.path().join("c.npy")).unwrap()[[0, 1, 0]], 1);
    }

    #[test]
    fn float_codes_name_the_accepted_types() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("f.npy");
        write_codes(&path, &Array3::<f32>::zeros((1, 2, 2)));
        match read_codes(&path) {
            Err(Error::Npy { reason, .. }) => assert!(reason.contains(CODE_DTYPES)),
            other => panic!("expected an npy error, got {:?}", other.map(|a| a.dim())),
        }
    }

    #[test]
    fn malformed_file_propagates_error() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("bad.npy"), b"not numpy").unwrap();
        let ds = PhyreVideoDataset::discover(tmp.path()).unwrap();
        assert!(matches!(ds.get(0), Err(Error::Npy { .. })));
        assert!(ds.get(5).is_err());
    }
}
