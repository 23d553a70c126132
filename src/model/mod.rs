//! The model collaborator the training driver talks to.
//!
//! The driver never looks inside a model: it feeds batches through
//! [`VideoModel::forward`], asks for gradients with [`VideoModel::backward`]
//! and updates the named [`Param`]s it gets back from
//! [`VideoModel::params_mut`].

pub mod palette;
pub mod state;

use ndarray::{Array5, Array6};

use crate::data::collate::Batch;
use crate::error::{Error, Result};

pub use palette::{PaletteConfig, PaletteModel};
pub use state::{StateDict, TensorRecord};

/// A named, flat parameter tensor with its accumulated gradient.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub shape: Vec<usize>,
    pub value: Vec<f32>,
    pub grad: Vec<f32>,
}

impl Param {
    pub fn new(name: impl Into<String>, shape: Vec<usize>, value: Vec<f32>) -> Param {
        let grad = vec![0.0; value.len()];
        Param {
            name: name.into(),
            shape,
            value,
            grad,
        }
    }

    pub fn zeros(name: impl Into<String>, shape: Vec<usize>) -> Param {
        let n = shape.iter().product();
        Param::new(name, shape, vec![0.0; n])
    }

    pub fn zero_grad(&mut self) {
        self.grad.iter_mut().for_each(|g| *g = 0.0);
    }

    pub fn numel(&self) -> usize {
        self.value.len()
    }
}

/// Result of one forward pass.
///
/// Loss terms carry one entry per data-parallel replica.
#[derive(Debug, Clone)]
pub struct ModelOutput {
    /// `[B, T, C, H, W]`
    pub recon: Array5<f32>,
    pub cross_entropy: Vec<f32>,
    pub mse: Vec<f32>,
    /// Per-slot attention-weighted frames, `[B, T, S, C, H, W]`.
    pub attns: Array6<f32>,
}

/// A trainable video model.
pub trait VideoModel {
    /// Runs the model on `batch` at temperature `tau`; `hard` forces one-hot
    /// latent selection.
    fn forward(&mut self, batch: &Batch, tau: f32, hard: bool) -> Result<ModelOutput>;

    /// Accumulates gradients of the last training-mode forward pass into
    /// each parameter's `grad`.
    fn backward(&mut self) -> Result<()>;

    /// Generates a video by feeding the model's own predictions back in.
    /// Used for visualization only.
    fn reconstruct_autoregressive(&mut self, batch: &Batch) -> Result<Array5<f32>>;

    fn params(&self) -> Vec<&Param>;

    fn params_mut(&mut self) -> Vec<&mut Param>;

    /// Switches between training and evaluation behaviour.
    fn set_training(&mut self, training: bool);

    /// Number of slots drawn in attention maps.
    fn num_slots(&self) -> usize;

    fn zero_grad(&mut self) {
        for p in self.params_mut() {
            p.zero_grad();
        }
    }

    fn state_dict(&self) -> StateDict {
        StateDict::from_params(self.params())
    }

    /// Copies every parameter from `state`. Missing entries and shape
    /// mismatches are errors; extra entries are ignored.
    fn load_state_dict(&mut self, state: &StateDict) -> Result<()> {
        for p in self.params_mut() {
            let record = state
                .get(&p.name)
                .ok_or_else(|| Error::MissingParam(p.name.clone()))?;
            if record.shape != p.shape || record.data.len() != p.value.len() {
                return Err(Error::Shape(format!(
                    "parameter '{}' has shape {:?}, state dict has {:?}",
                    p.name, p.shape, record.shape
                )));
            }
            p.value.copy_from_slice(&record.data);
        }
        Ok(())
    }
}
