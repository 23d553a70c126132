use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::time::Instant;

use ndarray::{s, Array5};
use tracing::{debug, info, warn};

use crate::data::collate::{Batch, CollatePolicy};
use crate::data::dataset::VideoDataset;
use crate::data::loader::{DataLoader, LoaderConfig};
use crate::error::{Error, Result};
use crate::loss::CompositeLoss;
use crate::model::{ModelOutput, VideoModel};
use crate::optim::{clip_grad_norm, Adam, AdamConfig, GradNorm, ParamGroup};
use crate::summary::SummaryWriter;
use crate::train::checkpoint::{best_model_until_file, Checkpoint, BEST_MODEL_FILE, CHECKPOINT_FILE};
use crate::train::epoch_stats::EpochStats;
use crate::train::schedule::TrainingSchedule;
use crate::train::train_config::TrainConfig;
use crate::train::visualize::visualize;

/// Training batches between two log points.
pub const LOG_INTERVAL: usize = 10;
/// Samples drawn in each visualization.
pub const VIS_SAMPLES: usize = 8;
/// Validation reconstructions are only drawn from this epoch on.
pub const VAL_VIS_FROM_EPOCH: usize = 50;

/// Optimizer group order; learning rates are set by index.
const DVAE_GROUP: usize = 0;
const ENCODER_GROUP: usize = 1;
const DECODER_GROUP: usize = 2;

/// Outcome of a finished run.
#[derive(Debug, Clone)]
pub struct TrainReport {
    pub log_dir: PathBuf,
    pub epochs: Vec<EpochStats>,
    pub best_val_loss: f64,
    pub best_epoch: usize,
}

/// Creates `<log_path>/<local ISO-8601 timestamp>/`.
pub fn create_run_dir(log_path: &Path) -> Result<PathBuf> {
    let stamp = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string();
    let dir = log_path.join(stamp);
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Optimizer with the dVAE, slot encoder and decoder groups. The encoder and
/// decoder start at zero and are warmed up by the schedule.
pub fn build_optimizer(config: &TrainConfig) -> Adam {
    Adam::new(
        vec![
            ParamGroup::new("dvae", config.lr_dvae),
            ParamGroup::new("steve_encoder", 0.0),
            ParamGroup::new("steve_decoder", 0.0),
        ],
        AdamConfig::default(),
    )
}

/// Runs the whole training job described by `config`.
///
/// Resumes from `config.checkpoint_path` when that file exists, trains up to
/// `config.epochs`, and after every epoch validates and writes the
/// checkpoint, best-model snapshots and hyperparameter dumps into `log_dir`.
/// If `progress` is given, each epoch's stats are sent there too; a dropped
/// receiver is ignored.
pub fn run<M: VideoModel + ?Sized>(
    config: &TrainConfig,
    model: &mut M,
    train_set: Arc<dyn VideoDataset>,
    val_set: Arc<dyn VideoDataset>,
    log_dir: &Path,
    progress: Option<&mpsc::Sender<EpochStats>>,
) -> Result<TrainReport> {
    let mut writer = SummaryWriter::new(log_dir)?;
    writer.add_text("hparams", &config.hparam_string()?, 0)?;

    let mut train_loader = DataLoader::new(train_set, loader_config(config, config.seed))?;
    let mut val_loader = DataLoader::new(val_set, loader_config(config, config.seed.wrapping_add(1)))?;
    ensure_batches("train", &train_loader)?;
    ensure_batches("validation", &val_loader)?;
    let train_epoch_size = train_loader.len();
    let val_epoch_size = val_loader.len();

    let schedule = TrainingSchedule::new(
        config.tau_start,
        config.tau_final,
        config.tau_steps,
        config.lr_warmup_steps,
        config.lr_half_life,
        config.lr_dvae,
        config.lr_enc,
        config.lr_dec,
    )?;
    let mut optimizer = build_optimizer(config);
    optimizer.warn_unmatched(&model.params_mut());

    let (start_epoch, mut best_val_loss, mut best_epoch) =
        match Checkpoint::load_if_present(&config.checkpoint_path)? {
            Some(checkpoint) => {
                model.load_state_dict(&checkpoint.model)?;
                optimizer.load_state(checkpoint.optimizer)?;
                (checkpoint.epoch, checkpoint.best_val_loss, checkpoint.best_epoch)
            }
            None => (0, f64::INFINITY, 0),
        };

    if config.collate == CollatePolicy::Truncate {
        info!("batches are truncated to their shortest video; trailing frames of longer videos are not trained on");
    }
    info!(
        log_dir = %log_dir.display(),
        train_batches = train_epoch_size,
        val_batches = val_epoch_size,
        start_epoch,
        epochs = config.epochs,
        "starting training"
    );

    let mut global_step = (start_epoch * train_epoch_size) as u64;
    let mut tau = schedule.at(global_step).tau;
    let mut history = Vec::new();

    for epoch in start_epoch..config.epochs {
        let t_start = Instant::now();
        model.set_training(true);
        let mut loss_sum = 0.0f64;
        let mut loss_count = 0usize;

        for (batch_idx, batch) in train_loader.iter().enumerate() {
            let batch = batch?;
            if epoch == start_epoch && batch_idx == 0 {
                check_frame_size(&batch, config.image_size);
            }
            global_step = (epoch * train_epoch_size + batch_idx) as u64;

            let step = schedule.at(global_step);
            tau = step.tau;
            optimizer.set_lr(DVAE_GROUP, step.lr_dvae);
            optimizer.set_lr(ENCODER_GROUP, step.lr_enc);
            optimizer.set_lr(DECODER_GROUP, step.lr_dec);

            model.zero_grad();
            let output = model.forward(&batch, tau as f32, config.hard)?;
            let loss = CompositeLoss::from_replicas(&output.cross_entropy, &output.mse, config.use_dp)?;
            model.backward()?;
            {
                let mut params = model.params_mut();
                let norm = clip_grad_norm(&mut params, config.clip, GradNorm::Inf);
                debug!(step = global_step, grad_norm = norm, "clipped gradients");
                optimizer.step(&mut params);
            }

            loss_sum += loss.total() as f64;
            loss_count += 1;

            if batch_idx % LOG_INTERVAL == 0 {
                info!(
                    "Train Epoch: {:3} [{:5}/{:5}] \t Loss: {:.6} \t MSE: {:.6}",
                    epoch + 1,
                    batch_idx,
                    train_epoch_size,
                    loss.total(),
                    loss.mse
                );
                writer.add_scalar("TRAIN/loss", loss.total() as f64, global_step)?;
                writer.add_scalar("TRAIN/cross_entropy", loss.cross_entropy as f64, global_step)?;
                writer.add_scalar("TRAIN/mse", loss.mse as f64, global_step)?;
                writer.add_scalar("TRAIN/tau", tau, global_step)?;
                writer.add_scalar("TRAIN/lr_dvae", optimizer.lr(DVAE_GROUP), global_step)?;
                writer.add_scalar("TRAIN/lr_enc", optimizer.lr(ENCODER_GROUP), global_step)?;
                writer.add_scalar("TRAIN/lr_dec", optimizer.lr(DECODER_GROUP), global_step)?;

                let tag = format!("TRAIN_recons/epoch={:03}/batch={:05}", epoch + 1, batch_idx);
                log_reconstructions(model, &mut writer, &tag, &batch, &output)?;
            }
        }

        // Validation, no gradients.
        model.set_training(false);
        let mut val_cross_entropy = 0.0f64;
        let mut val_mse = 0.0f64;
        let mut last_val: Option<(Batch, ModelOutput)> = None;

        for batch in val_loader.iter() {
            let batch = batch?;
            let output = model.forward(&batch, tau as f32, config.hard)?;
            let loss = CompositeLoss::from_replicas(&output.cross_entropy, &output.mse, config.use_dp)?;
            val_cross_entropy += loss.cross_entropy as f64;
            val_mse += loss.mse as f64;
            last_val = Some((batch, output));
        }
        val_cross_entropy /= val_epoch_size as f64;
        val_mse /= val_epoch_size as f64;
        let val_loss = val_mse + val_cross_entropy;

        let epoch_no = (epoch + 1) as u64;
        writer.add_scalar("VAL/loss", val_loss, epoch_no)?;
        writer.add_scalar("VAL/cross_entropy", val_cross_entropy, epoch_no)?;
        writer.add_scalar("VAL/mse", val_mse, epoch_no)?;
        info!("====> Epoch: {:3} \t Loss = {:.6}", epoch + 1, val_loss);

        let improved = val_loss < best_val_loss;
        if improved {
            best_val_loss = val_loss;
            best_epoch = epoch + 1;

            let state = model.state_dict();
            state.save_json(log_dir.join(BEST_MODEL_FILE))?;
            if global_step < config.steps {
                state.save_json(log_dir.join(best_model_until_file(config.steps)))?;
            }

            if epoch >= VAL_VIS_FROM_EPOCH {
                if let Some((batch, output)) = &last_val {
                    let tag = format!("VAL_recons/epoch={:03}", epoch + 1);
                    log_reconstructions(model, &mut writer, &tag, batch, output)?;
                }
            }
        }
        writer.add_scalar("VAL/best_loss", best_val_loss, epoch_no)?;

        let checkpoint = Checkpoint {
            epoch: epoch + 1,
            best_val_loss,
            best_epoch,
            model: model.state_dict(),
            optimizer: optimizer.state(),
        };
        checkpoint.save_json(log_dir.join(CHECKPOINT_FILE))?;
        config.save_dumps(log_dir)?;
        writer.flush()?;

        info!("====> Best Loss = {:.6} @ Epoch {}", best_val_loss, best_epoch);

        let stats = EpochStats {
            epoch: epoch + 1,
            total_epochs: config.epochs,
            global_step,
            train_loss: if loss_count == 0 { 0.0 } else { loss_sum / loss_count as f64 },
            val_loss,
            val_cross_entropy,
            val_mse,
            best_val_loss,
            best_epoch,
            improved,
            elapsed_ms: t_start.elapsed().as_millis() as u64,
        };
        if let Some(tx) = progress {
            if tx.send(stats.clone()).is_err() {
                debug!("progress receiver dropped");
            }
        }
        history.push(stats);
    }

    writer.close()?;
    Ok(TrainReport {
        log_dir: log_dir.to_path_buf(),
        epochs: history,
        best_val_loss,
        best_epoch,
    })
}

fn loader_config(config: &TrainConfig, seed: u64) -> LoaderConfig {
    LoaderConfig {
        batch_size: config.batch_size,
        shuffle: true,
        drop_last: true,
        num_workers: config.num_workers,
        policy: config.collate,
        seed,
    }
}

fn ensure_batches(name: &'static str, loader: &DataLoader) -> Result<()> {
    if loader.is_empty() {
        return Err(Error::EmptyLoader {
            name,
            samples: loader.dataset_len(),
            batch_size: loader.batch_size(),
        });
    }
    Ok(())
}

fn check_frame_size(batch: &Batch, image_size: usize) {
    let (_, _, _, h, w) = batch.video.dim();
    if h != image_size || w != image_size {
        warn!(
            height = h,
            width = w,
            image_size,
            "frames do not match the configured image size"
        );
    }
}

/// Draws original, reconstruction, autoregressive reconstruction and
/// attention maps of the first samples of `batch`.
fn log_reconstructions<M: VideoModel + ?Sized>(
    model: &mut M,
    writer: &mut SummaryWriter,
    tag: &str,
    batch: &Batch,
    output: &ModelOutput,
) -> Result<()> {
    let head = batch.head(VIS_SAMPLES);
    let generated: Array5<f32> = model.reconstruct_autoregressive(&head)?;
    let attns = output.attns.slice(s![..head.batch_size(), .., .., .., .., ..]).to_owned();
    let frames = visualize(&head.video, &output.recon, &generated, &attns, VIS_SAMPLES)?;
    writer.add_video(tag, &frames)?;
    Ok(())
}
