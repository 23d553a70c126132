//! Reference implementation of [`VideoModel`].
//!
//! Every pixel is assigned to one of `vocab_size` code-book colours through a
//! temperature-controlled softmax over negative squared distances, then
//! decoded as `gain * mix + bias`. Gradients are
//! closed-form (the assignment is treated as a constant), so it exercises the
//! whole training driver without an autodiff engine.

use ndarray::{s, Array5, Array6, ArrayView1, ArrayView3, ArrayViewMut3, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::data::collate::Batch;
use crate::error::{Error, Result};
use crate::loss::{CrossEntropyLoss, MseLoss};
use crate::model::{ModelOutput, Param, VideoModel};

pub const PALETTE_PARAM: &str = "dvae.palette";
pub const GAIN_PARAM: &str = "steve_encoder.gain";
pub const BIAS_PARAM: &str = "steve_decoder.bias";

const CHANNELS: usize = 3;

#[derive(Debug, Clone)]
pub struct PaletteConfig {
    pub vocab_size: usize,
    pub num_slots: usize,
    /// Shards a batch is split into; each reports its own losses.
    pub replicas: usize,
    pub seed: u64,
}

pub struct PaletteModel {
    config: PaletteConfig,
    palette: Param,
    gain: Param,
    bias: Param,
    training: bool,
    /// Gradients of the last training forward, committed by `backward`.
    pending: Option<PendingGrads>,
}

struct PendingGrads {
    palette: Vec<f32>,
    gain: f32,
    bias: [f32; CHANNELS],
}

impl PaletteModel {
    pub fn new(config: PaletteConfig) -> Result<Self> {
        if config.vocab_size == 0 {
            return Err(Error::Shape("vocab_size must be at least 1".into()));
        }
        let mut rng = StdRng::seed_from_u64(config.seed);
        let palette_values = (0..config.vocab_size * CHANNELS)
            .map(|_| rng.gen::<f32>())
            .collect();

        Ok(PaletteModel {
            palette: Param::new(PALETTE_PARAM, vec![config.vocab_size, CHANNELS], palette_values),
            gain: Param::new(GAIN_PARAM, vec![1], vec![1.0]),
            bias: Param::zeros(BIAS_PARAM, vec![CHANNELS]),
            training: true,
            pending: None,
            config,
        })
    }

    fn colour(&self, k: usize) -> &[f32] {
        &self.palette.value[k * CHANNELS..(k + 1) * CHANNELS]
    }

    /// Writes the assignment of `pixel` over the code book into `weights`
    /// (soft, or one-hot when `hard`) and returns the nearest code. The buffer
    /// is reused across pixels.
    fn assign(&self, pixel: [f32; CHANNELS], tau: f32, hard: bool, weights: &mut Vec<f32>) -> usize {
        weights.clear();
        weights.extend((0..self.config.vocab_size).map(|k| {
            -self
                .colour(k)
                .iter()
                .zip(pixel.iter())
                .map(|(p, x)| (p - x).powi(2))
                .sum::<f32>()
        }));

        let nearest = weights
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i)
            .unwrap_or(0);

        if hard {
            weights.fill(0.0);
            weights[nearest] = 1.0;
            return nearest;
        }

        let tau = tau.max(f32::EPSILON);
        let max = weights[nearest];
        weights.iter_mut().for_each(|l| *l = ((*l - max) / tau).exp());
        let total: f32 = weights.iter().sum();
        weights.iter_mut().for_each(|w| *w /= total);
        nearest
    }

    fn mix(&self, weights: &[f32]) -> [f32; CHANNELS] {
        let mut mix = [0.0; CHANNELS];
        for (k, w) in weights.iter().enumerate() {
            if *w == 0.0 {
                continue;
            }
            for (c, p) in self.colour(k).iter().enumerate() {
                mix[c] += w * p;
            }
        }
        mix
    }

    fn decode(&self, mix: [f32; CHANNELS]) -> [f32; CHANNELS] {
        let gain = self.gain.value[0];
        let mut out = [0.0; CHANNELS];
        for c in 0..CHANNELS {
            out[c] = gain * mix[c] + self.bias.value[c];
        }
        out
    }

    /// Hard reconstruction of one `[C, H, W]` frame into `out`.
    fn quantise_frame(&self, frame: ArrayView3<'_, f32>, mut out: ArrayViewMut3<'_, f32>) {
        let (_, h, w) = frame.dim();
        let mut weights = Vec::with_capacity(self.config.vocab_size);
        for i in 0..h {
            for j in 0..w {
                let px = pixel_at(frame.slice(s![.., i, j]));
                self.assign(px, 1.0, true, &mut weights);
                let rgb = self.decode(self.mix(&weights));
                for c in 0..CHANNELS {
                    out[[c, i, j]] = rgb[c];
                }
            }
        }
    }

    fn replica_of(&self, b: usize, batch_size: usize) -> usize {
        let replicas = self.replica_count(batch_size);
        b * replicas / batch_size
    }

    fn replica_count(&self, batch_size: usize) -> usize {
        self.config.replicas.clamp(1, batch_size.max(1))
    }
}

fn pixel_at(view: ArrayView1<'_, f32>) -> [f32; CHANNELS] {
    [view[0], view[1], view[2]]
}

fn check_channels(video: &Array5<f32>) -> Result<()> {
    let channels = video.len_of(Axis(2));
    if channels != CHANNELS {
        return Err(Error::Shape(format!(
            "palette model expects {} channels, got {}",
            CHANNELS, channels
        )));
    }
    Ok(())
}

impl VideoModel for PaletteModel {
    fn forward(&mut self, batch: &Batch, tau: f32, hard: bool) -> Result<ModelOutput> {
        let video = &batch.video;
        check_channels(video)?;
        let (bs, t_len, _, h, w) = video.dim();
        let replicas = self.replica_count(bs);
        let slots = self.config.num_slots;

        // Elements each replica averages its MSE over.
        let mut real_elems = vec![0usize; replicas];
        for b in 0..bs {
            let r = self.replica_of(b, bs);
            for t in 0..t_len {
                if batch.is_real_frame(b, t) {
                    real_elems[r] += CHANNELS * h * w;
                }
            }
        }

        let mut recon = Array5::<f32>::zeros(video.raw_dim());
        let mut attns = Array6::<f32>::zeros((bs, t_len, slots, CHANNELS, h, w));
        let mut sq_err = vec![0.0f32; replicas];
        let mut ce_sum = vec![0.0f32; replicas];
        let mut pixels = vec![0usize; replicas];

        let mut grads = self.training.then(|| PendingGrads {
            palette: vec![0.0; self.palette.numel()],
            gain: 0.0,
            bias: [0.0; CHANNELS],
        });
        let gain = self.gain.value[0];
        let mut weights = Vec::with_capacity(self.config.vocab_size);

        for b in 0..bs {
            let r = self.replica_of(b, bs);
            for t in 0..t_len {
                let real = batch.is_real_frame(b, t);
                for i in 0..h {
                    for j in 0..w {
                        let px = pixel_at(video.slice(s![b, t, .., i, j]));
                        let nearest = self.assign(px, tau, hard, &mut weights);
                        let mix = self.mix(&weights);
                        let out = self.decode(mix);

                        for c in 0..CHANNELS {
                            recon[[b, t, c, i, j]] = out[c];
                        }
                        for slot in 0..slots.min(weights.len()) {
                            for c in 0..CHANNELS {
                                attns[[b, t, slot, c, i, j]] = px[c] * weights[slot];
                            }
                        }

                        if !real {
                            continue;
                        }
                        sq_err[r] += MseLoss::loss(&out, &px) * CHANNELS as f32;
                        ce_sum[r] += CrossEntropyLoss::loss_for_index(&weights, nearest);
                        pixels[r] += 1;

                        if let Some(g) = grads.as_mut() {
                            // d(mean over replicas of per-replica MSE)/d(out)
                            let scale = (CHANNELS as f32 / real_elems[r] as f32) / replicas as f32;
                            let d_out: Vec<f32> = MseLoss::derivative(&out, &px)
                                .into_iter()
                                .map(|d| d * scale)
                                .collect();
                            for c in 0..CHANNELS {
                                g.bias[c] += d_out[c];
                                g.gain += d_out[c] * mix[c];
                            }
                            for (k, wk) in weights.iter().enumerate() {
                                if *wk == 0.0 {
                                    continue;
                                }
                                for c in 0..CHANNELS {
                                    g.palette[k * CHANNELS + c] += d_out[c] * gain * wk;
                                }
                            }
                        }
                    }
                }
            }
        }

        let mse = sq_err
            .iter()
            .zip(real_elems.iter())
            .map(|(s, n)| if *n == 0 { 0.0 } else { s / *n as f32 })
            .collect();
        let cross_entropy = ce_sum
            .iter()
            .zip(pixels.iter())
            .map(|(s, n)| if *n == 0 { 0.0 } else { s / *n as f32 })
            .collect();

        self.pending = grads;
        Ok(ModelOutput {
            recon,
            cross_entropy,
            mse,
            attns,
        })
    }

    fn backward(&mut self) -> Result<()> {
        let pending = self.pending.take().ok_or_else(|| {
            Error::Shape("backward called without a training-mode forward pass".into())
        })?;
        for (g, d) in self.palette.grad.iter_mut().zip(pending.palette) {
            *g += d;
        }
        self.gain.grad[0] += pending.gain;
        for (g, d) in self.bias.grad.iter_mut().zip(pending.bias) {
            *g += d;
        }
        Ok(())
    }

    fn reconstruct_autoregressive(&mut self, batch: &Batch) -> Result<Array5<f32>> {
        let video = &batch.video;
        check_channels(video)?;
        let (bs, t_len, _, _, _) = video.dim();
        let mut generated = Array5::<f32>::zeros(video.raw_dim());

        if t_len == 0 {
            return Ok(generated);
        }
        for b in 0..bs {
            self.quantise_frame(video.slice(s![b, 0, .., .., ..]), generated.slice_mut(s![b, 0, .., .., ..]));
            for t in 1..t_len {
                let prev = generated.slice(s![b, t - 1, .., .., ..]).to_owned();
                self.quantise_frame(prev.view(), generated.slice_mut(s![b, t, .., .., ..]));
            }
        }
        Ok(generated)
    }

    fn params(&self) -> Vec<&Param> {
        vec![&self.palette, &self.gain, &self.bias]
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        vec![&mut self.palette, &mut self.gain, &mut self.bias]
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
        if !training {
            self.pending = None;
        }
    }

    fn num_slots(&self) -> usize {
        self.config.num_slots
    }
}
