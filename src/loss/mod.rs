pub mod composite;
pub mod cross_entropy;
pub mod mse;

pub use composite::CompositeLoss;
pub use cross_entropy::CrossEntropyLoss;
pub use mse::MseLoss;
