pub mod collate;
pub mod dataset;
pub mod fsvisit;
pub mod loader;
pub mod phyre;

pub use collate::{collate, make_batch_padded, make_batch_truncated, Batch, CollatePolicy};
pub use dataset::{PhyreVideoDataset, Video, VideoDataset};
pub use fsvisit::FsVisitor;
pub use loader::{BatchIter, DataLoader, LoaderConfig};
