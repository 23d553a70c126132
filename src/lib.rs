pub mod data;
pub mod error;
pub mod logging;
pub mod loss;
pub mod model;
pub mod optim;
pub mod summary;
pub mod train;

// Convenience re-exports
pub use data::{Batch, CollatePolicy, DataLoader, PhyreVideoDataset, VideoDataset};
pub use error::{Error, Result};
pub use model::{PaletteModel, VideoModel};
pub use optim::Adam;
pub use summary::SummaryWriter;
pub use train::{run, TrainConfig};
