pub mod checkpoint;
pub mod epoch_stats;
pub mod loop_fn;
pub mod schedule;
pub mod train_config;
pub mod visualize;

pub use checkpoint::Checkpoint;
pub use epoch_stats::EpochStats;
pub use loop_fn::{create_run_dir, run, TrainReport};
pub use schedule::{CosineAnneal, LinearWarmup, StepSchedule, TrainingSchedule};
pub use train_config::TrainConfig;
