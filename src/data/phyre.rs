//! PHYRE scene rendering helpers.
//!
//! A PHYRE observation is a 2D grid of object codes. These helpers turn a
//! stack of observations into float RGB frames and shrink them.

use ndarray::{Array4, ArrayView3, Axis};

use crate::error::{Error, Result};

/// sRGB colour for each PHYRE object code.
pub const PALETTE: [[u8; 3]; 7] = [
    [255, 255, 255], // white (background)
    [244, 117, 63],  // red
    [2, 179, 80],    // green
    [24, 126, 217],  // blue
    [135, 74, 173],  // purple
    [112, 112, 112], // gray
    [0, 0, 0],       // black
];

/// Float RGB colour in `[0, 1]` for one object code.
pub fn code_to_rgb(code: i64) -> Result<[f32; 3]> {
    let idx = usize::try_from(code).map_err(|_| Error::UnknownColor { code })?;
    let rgb = PALETTE.get(idx).ok_or(Error::UnknownColor { code })?;
    Ok([
        rgb[0] as f32 / 255.0,
        rgb[1] as f32 / 255.0,
        rgb[2] as f32 / 255.0,
    ])
}

/// Maps `[T, W, H]` object codes to `[T, 3, W, H]` float RGB.
///
/// Row 0 of a scene is its floor, so the first spatial axis is flipped to put
/// the floor at the bottom of the rendered image.
pub fn observations_to_float_rgb(codes: ArrayView3<'_, i64>) -> Result<Array4<f32>> {
    let (t, w, h) = codes.dim();
    let mut rgb = Array4::<f32>::zeros((t, 3, w, h));

    for ((ti, wi, hi), &code) in codes.indexed_iter() {
        let colour = code_to_rgb(code)?;
        let row = w - 1 - wi;
        for (c, value) in colour.iter().enumerate() {
            rgb[[ti, c, row, hi]] = *value;
        }
    }
    Ok(rgb)
}

/// 2x2 max pooling with stride 2 over the last two axes of `[T, C, H, W]`.
/// A trailing odd row or column is dropped.
pub fn max_pool_2x2(video: &Array4<f32>) -> Array4<f32> {
    let (t, c, h, w) = video.dim();
    let (oh, ow) = (h / 2, w / 2);
    let mut out = Array4::<f32>::zeros((t, c, oh, ow));

    for (ti, frame) in video.axis_iter(Axis(0)).enumerate() {
        for (ci, plane) in frame.axis_iter(Axis(0)).enumerate() {
            for i in 0..oh {
                for j in 0..ow {
                    let m = plane[[2 * i, 2 * j]]
                        .max(plane[[2 * i, 2 * j + 1]])
                        .max(plane[[2 * i + 1, 2 * j]])
                        .max(plane[[2 * i + 1, 2 * j + 1]]);
                    out[[ti, ci, i, j]] = m;
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn renders_codes_and_flips_rows() {
        let mut codes = Array3::<i64>::zeros((1, 2, 2));
        codes[[0, 0, 0]] = 6; // floor-left is black
        let rgb = observations_to_float_rgb(codes.view()).unwrap();
        assert_eq!(rgb.dim(), (1, 3, 2, 2));
        // Floor row ends up last.
        assert_eq!(rgb[[0, 0, 1, 0]], 0.0);
        assert_eq!(rgb[[0, 0, 0, 0]], 1.0);
        assert_eq!(rgb[[0, 2, 1, 1]], 1.0);
    }

    #[test]
    fn unknown_code_is_rejected() {
        let codes = Array3::<i64>::from_elem((1, 1, 1), 42);
        let err = observations_to_float_rgb(codes.view()).unwrap_err();
        assert!(matches!(err, Error::UnknownColor { code: 42 }));
        assert!(code_to_rgb(-1).is_err());
    }

    #[test]
    fn max_pool_halves_and_takes_maximum() {
        let mut video = Array4::<f32>::zeros((2, 1, 5, 4));
        video[[1, 0, 3, 2]] = 0.7;
        video[[0, 0, 4, 3]] = 0.9; // dropped odd row
        let pooled = max_pool_2x2(&video);
        assert_eq!(pooled.dim(), (2, 1, 2, 2));
        assert_eq!(pooled[[1, 0, 1, 1]], 0.7);
        assert_eq!(pooled.iter().cloned().fold(0.0f32, f32::max), 0.7);
    }
}
