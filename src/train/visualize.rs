use ndarray::{s, Array3, Array4, Array5, Array6, Axis};

use crate::error::{Error, Result};

/// Gap between tiles in `make_grid`, in pixels.
pub const GRID_PADDING: usize = 2;
/// Fill value of the gaps.
pub const GRID_PAD_VALUE: f32 = 0.8;

/// Lays out `[N, C, H, W]` tiles row-major, `nrow` per row, separated and
/// framed by `padding` pixels of `pad_value`. Returns `[C, H', W']`.
pub fn make_grid(tiles: &Array4<f32>, nrow: usize, padding: usize, pad_value: f32) -> Array3<f32> {
    let (n, c, h, w) = tiles.dim();
    let xmaps = nrow.max(1).min(n.max(1));
    let ymaps = (n + xmaps - 1) / xmaps;
    let (cell_h, cell_w) = (h + padding, w + padding);

    let mut grid = Array3::<f32>::from_elem(
        (c, ymaps * cell_h + padding, xmaps * cell_w + padding),
        pad_value,
    );
    for (k, tile) in tiles.axis_iter(Axis(0)).enumerate() {
        let (y, x) = (k / xmaps, k % xmaps);
        let top = y * cell_h + padding;
        let left = x * cell_w + padding;
        grid.slice_mut(s![.., top..top + h, left..left + w]).assign(&tile);
    }
    grid
}

/// Builds the per-frame comparison video: for each of the first `n` samples
/// a row of original, reconstruction, autoregressive reconstruction and one
/// tile per slot attention map. Inputs may hold different numbers of
/// samples; only the leading ones are drawn. Returns `[T, C, H', W']`.
pub fn visualize(
    video: &Array5<f32>,
    recon: &Array5<f32>,
    generated: &Array5<f32>,
    attns: &Array6<f32>,
    n: usize,
) -> Result<Array4<f32>> {
    let (b, t_len, c, h, w) = video.dim();
    let frame_dims = |a: &Array5<f32>| {
        let (_, t, c, h, w) = a.dim();
        (t, c, h, w)
    };
    if frame_dims(recon) != (t_len, c, h, w) || frame_dims(generated) != (t_len, c, h, w) {
        return Err(Error::Shape(format!(
            "visualization inputs disagree: video {:?}, recon {:?}, generated {:?}",
            video.dim(),
            recon.dim(),
            generated.dim()
        )));
    }
    let (ab, at, slots, ac, ah, aw) = attns.dim();
    if (at, ac, ah, aw) != (t_len, c, h, w) {
        return Err(Error::Shape(format!(
            "attention maps {:?} do not match video {:?}",
            attns.dim(),
            video.dim()
        )));
    }

    // Every input only needs to cover the samples drawn.
    let b = b
        .min(recon.len_of(Axis(0)))
        .min(generated.len_of(Axis(0)))
        .min(ab);
    let n = n.min(b);
    let per_sample = slots + 3;
    let mut frames = Vec::with_capacity(t_len);

    for t in 0..t_len {
        let mut tiles = Array4::<f32>::zeros((n * per_sample, c, h, w));
        for i in 0..n {
            let base = i * per_sample;
            tiles.slice_mut(s![base, .., .., ..]).assign(&video.slice(s![i, t, .., .., ..]));
            tiles.slice_mut(s![base + 1, .., .., ..]).assign(&recon.slice(s![i, t, .., .., ..]));
            tiles.slice_mut(s![base + 2, .., .., ..]).assign(&generated.slice(s![i, t, .., .., ..]));
            for slot in 0..slots {
                tiles
                    .slice_mut(s![base + 3 + slot, .., .., ..])
                    .assign(&attns.slice(s![i, t, slot, .., .., ..]));
            }
        }
        frames.push(make_grid(&tiles, per_sample, GRID_PADDING, GRID_PAD_VALUE));
    }

    let views: Vec<_> = frames.iter().map(|f| f.view()).collect();
    ndarray::stack(Axis(0), &views).map_err(|e| Error::Shape(e.to_string()))
}
