pub mod adam;
pub mod clip;

pub use adam::{Adam, AdamConfig, AdamState, ParamGroup};
pub use clip::{clip_grad_norm, GradNorm};
