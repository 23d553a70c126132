use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser};
use serde::{Deserialize, Serialize};

use crate::data::collate::CollatePolicy;
use crate::error::Result;

/// Machine-readable hyperparameter dump, reloadable with `TrainConfig::load_json`.
pub const ARGS_FILE: &str = "args.json";
/// Indented, key-sorted hyperparameter dump for people.
pub const ARGS_READABLE_FILE: &str = "args_readable.json";

/// Every knob of a training run.
///
/// Parsed from the command line and written next to each checkpoint so a
/// run's architecture can be rebuilt exactly. The model-size fields describe
/// the slot model and are carried through for reproducibility even when the
/// model in use ignores some of them.
#[derive(Parser, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[command(
    name = "phyre-steve",
    about = "Train a slot-based video model on PHYRE simulation videos"
)]
pub struct TrainConfig {
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
    #[arg(long, default_value_t = 5)]
    pub batch_size: usize,
    /// Threads decoding batches ahead of the training loop.
    #[arg(long, default_value_t = 4)]
    pub num_workers: usize,
    #[arg(long, default_value_t = 3)]
    pub img_channels: usize,
    /// Side length of the downsampled frames the model expects.
    #[arg(long, default_value_t = 64)]
    pub image_size: usize,

    /// Checkpoint to resume from, if it exists.
    #[arg(long, default_value = "checkpoint.json")]
    pub checkpoint_path: PathBuf,
    /// Directory searched recursively for `.npy` videos.
    #[arg(long, default_value = "data")]
    pub data_path: PathBuf,
    /// Validation videos; the training set is reused when absent.
    #[arg(long)]
    pub val_data_path: Option<PathBuf>,
    #[arg(long, default_value = "logs/")]
    pub log_path: PathBuf,

    #[arg(long, default_value_t = 3e-4)]
    pub lr_dvae: f64,
    #[arg(long, default_value_t = 1e-4)]
    pub lr_enc: f64,
    #[arg(long, default_value_t = 3e-4)]
    pub lr_dec: f64,
    #[arg(long, default_value_t = 30000)]
    pub lr_warmup_steps: u64,
    #[arg(long, default_value_t = 250000)]
    pub lr_half_life: u64,
    /// Gradient clipping threshold (infinity norm).
    #[arg(long, default_value_t = 0.05)]
    pub clip: f32,
    #[arg(long, default_value_t = 1)]
    pub epochs: usize,
    /// Step budget for the "best model until N steps" snapshot.
    #[arg(long, default_value_t = 200000)]
    pub steps: u64,

    #[arg(long, default_value_t = 2)]
    pub num_iterations: usize,
    #[arg(long, default_value_t = 4)]
    pub num_slots: usize,
    #[arg(long, default_value_t = 64)]
    pub cnn_hidden_size: usize,
    #[arg(long, default_value_t = 192)]
    pub slot_size: usize,
    #[arg(long, default_value_t = 192)]
    pub mlp_hidden_size: usize,
    #[arg(long, default_value_t = 1)]
    pub num_predictor_blocks: usize,
    #[arg(long, default_value_t = 4)]
    pub num_predictor_heads: usize,
    #[arg(long, default_value_t = 0.0)]
    pub predictor_dropout: f64,

    #[arg(long, default_value_t = 4096)]
    pub vocab_size: usize,
    #[arg(long, default_value_t = 8)]
    pub num_decoder_blocks: usize,
    #[arg(long, default_value_t = 4)]
    pub num_decoder_heads: usize,
    #[arg(long, default_value_t = 192)]
    pub d_model: usize,
    #[arg(long, default_value_t = 0.1)]
    pub dropout: f64,

    #[arg(long, default_value_t = 1.0)]
    pub tau_start: f64,
    #[arg(long, default_value_t = 0.1)]
    pub tau_final: f64,
    #[arg(long, default_value_t = 30000)]
    pub tau_steps: u64,

    /// Force one-hot latent selection.
    #[arg(long)]
    pub hard: bool,
    /// Split batches across data-parallel replicas and average their losses.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub use_dp: bool,
    /// How videos of different lengths are batched.
    #[arg(long, value_enum, default_value_t = CollatePolicy::Truncate)]
    pub collate: CollatePolicy,

    /// More log output (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count)]
    #[serde(skip)]
    pub verbose: u8,
}

impl TrainConfig {
    /// Replica count the model should shard each batch into.
    pub fn replicas(&self) -> usize {
        if !self.use_dp {
            return 1;
        }
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        cores.min(self.batch_size).max(1)
    }

    /// `key=value` pairs joined by `__`, keys sorted.
    pub fn hparam_string(&self) -> Result<String> {
        let value = serde_json::to_value(self)?;
        let pairs: Vec<String> = value
            .as_object()
            .map(|map| {
                map.iter()
                    .map(|(k, v)| match v {
                        serde_json::Value::String(s) => format!("{}={}", k, s),
                        other => format!("{}={}", k, other),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(pairs.join("__"))
    }

    /// Writes `args.json` and `args_readable.json` into `dir`.
    pub fn save_dumps(&self, dir: &Path) -> Result<()> {
        serde_json::to_writer(BufWriter::new(File::create(dir.join(ARGS_FILE))?), self)?;

        // Going through `Value` sorts the keys.
        let sorted = serde_json::to_value(self)?;
        serde_json::to_writer_pretty(
            BufWriter::new(File::create(dir.join(ARGS_READABLE_FILE))?),
            &sorted,
        )?;
        Ok(())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<TrainConfig> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_reference_run() {
        let cfg = TrainConfig::parse_from(["phyre-steve"]);
        assert_eq!(cfg.batch_size, 5);
        assert_eq!(cfg.vocab_size, 4096);
        assert_eq!(cfg.lr_half_life, 250000);
        assert_eq!(cfg.clip, 0.05);
        assert!(cfg.use_dp);
        assert!(!cfg.hard);
        assert_eq!(cfg.collate, CollatePolicy::Truncate);
        assert_eq!(cfg.val_data_path, None);
    }

    #[test]
    fn flags_override_defaults() {
        let cfg = TrainConfig::parse_from([
            "phyre-steve",
            "--batch-size",
            "2",
            "--hard",
            "--use-dp",
            "false",
            "--collate",
            "pad",
            "--data-path",
            "/videos",
            "-vv",
        ]);
        assert_eq!(cfg.batch_size, 2);
        assert!(cfg.hard);
        assert!(!cfg.use_dp);
        assert_eq!(cfg.replicas(), 1);
        assert_eq!(cfg.collate, CollatePolicy::Pad);
        assert_eq!(cfg.data_path, PathBuf::from("/videos"));
        assert_eq!(cfg.verbose, 2);
    }

    #[test]
    fn dumps_are_reloadable_and_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = TrainConfig::parse_from(["phyre-steve", "--seed", "9"]);
        cfg.save_dumps(tmp.path()).unwrap();

        let back = TrainConfig::load_json(tmp.path().join(ARGS_FILE)).unwrap();
        assert_eq!(back, cfg);

        let readable = std::fs::read_to_string(tmp.path().join(ARGS_READABLE_FILE)).unwrap();
        let batch = readable.find("\"batch_size\"").unwrap();
        let vocab = readable.find("\"vocab_size\"").unwrap();
        assert!(batch < vocab);
        assert!(readable.contains('\n'));
    }

    #[test]
    fn hparam_string_lists_every_field() {
        let cfg = TrainConfig::parse_from(["phyre-steve"]);
        let s = cfg.hparam_string().unwrap();
        assert!(s.contains("batch_size=5"));
        assert!(s.contains("data_path=data"));
        assert!(s.contains("__"));
        assert!(!s.contains("verbose"));
    }
}
