use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use phyre_steve::data::{PhyreVideoDataset, VideoDataset};
use phyre_steve::logging::init_tracing;
use phyre_steve::model::{PaletteConfig, PaletteModel};
use phyre_steve::train::{create_run_dir, run, TrainConfig};

fn main() -> Result<()> {
    let config = TrainConfig::parse();
    init_tracing(config.verbose);

    let train_set = PhyreVideoDataset::discover(&config.data_path)
        .with_context(|| format!("reading training videos from {}", config.data_path.display()))?;
    let val_set: Arc<dyn VideoDataset> = match &config.val_data_path {
        Some(path) => Arc::new(
            PhyreVideoDataset::discover(path)
                .with_context(|| format!("reading validation videos from {}", path.display()))?,
        ),
        None => Arc::new(train_set.clone()),
    };
    info!(
        train_videos = train_set.len(),
        val_videos = val_set.len(),
        collate = ?config.collate,
        "datasets ready"
    );

    let mut model = PaletteModel::new(PaletteConfig {
        vocab_size: config.vocab_size,
        num_slots: config.num_slots,
        replicas: config.replicas(),
        seed: config.seed,
    })?;

    let log_dir = create_run_dir(&config.log_path)
        .with_context(|| format!("creating run directory under {}", config.log_path.display()))?;
    let report = run(&config, &mut model, Arc::new(train_set), val_set, &log_dir, None)?;

    info!(
        log_dir = %report.log_dir.display(),
        best_val_loss = report.best_val_loss,
        best_epoch = report.best_epoch,
        "training finished"
    );
    Ok(())
}
