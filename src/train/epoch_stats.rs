use serde::{Serialize, Deserialize};

/// Per-epoch training statistics emitted by the training driver.
///
/// When a progress channel is attached, the driver sends one `EpochStats`
/// value at the end of every completed epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    /// 1-based epoch number.
    pub epoch: usize,
    /// Total epochs requested for this run.
    pub total_epochs: usize,
    /// Global step of the last training batch in this epoch.
    pub global_step: u64,
    /// Mean of `mse + cross_entropy` over this epoch's training batches.
    pub train_loss: f64,
    pub val_loss: f64,
    pub val_cross_entropy: f64,
    pub val_mse: f64,
    /// Best validation loss so far, including this epoch.
    pub best_val_loss: f64,
    pub best_epoch: usize,
    /// Whether this epoch set a new best.
    pub improved: bool,
    /// Wall-clock duration of this single epoch in milliseconds.
    pub elapsed_ms: u64,
}
