use std::path::PathBuf;

use thiserror::Error;

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while loading data, training or persisting
/// state. Nothing here is retried; callers propagate and terminate.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to read video {path}: {reason}")]
    Npy { path: PathBuf, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("image encoding error: {0}")]
    Image(#[from] image::ImageError),

    #[error("scene code {code} has no colour in the PHYRE palette")]
    UnknownColor { code: i64 },

    #[error("collation failed: {0}")]
    Collate(String),

    #[error("invalid schedule: {0}")]
    Schedule(String),

    #[error("shape mismatch: {0}")]
    Shape(String),

    #[error("{name} loader yields no batches ({samples} samples, batch size {batch_size})")]
    EmptyLoader {
        name: &'static str,
        samples: usize,
        batch_size: usize,
    },

    #[error("state dict has no entry for parameter '{0}'")]
    MissingParam(String),

    #[error("loader worker {worker} failed: {reason}")]
    LoaderWorker { worker: usize, reason: String },
}
