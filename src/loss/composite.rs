use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Training objective of one step: cross-entropy of the discrete latents plus
/// reconstruction MSE, each reduced over data-parallel replicas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompositeLoss {
    pub cross_entropy: f32,
    pub mse: f32,
}

impl CompositeLoss {
    /// Reduces per-replica losses.
    ///
    /// With `data_parallel` the replicas are averaged. Without it the model
    /// must report exactly one value per term.
    pub fn from_replicas(cross_entropy: &[f32], mse: &[f32], data_parallel: bool) -> Result<Self> {
        if data_parallel {
            Ok(CompositeLoss {
                cross_entropy: mean(cross_entropy, "cross_entropy")?,
                mse: mean(mse, "mse")?,
            })
        } else {
            match (cross_entropy, mse) {
                ([ce], [m]) => Ok(CompositeLoss { cross_entropy: *ce, mse: *m }),
                _ => Err(Error::Shape(format!(
                    "expected one loss value per term without data parallelism, got {} cross_entropy and {} mse",
                    cross_entropy.len(),
                    mse.len()
                ))),
            }
        }
    }

    pub fn total(&self) -> f32 {
        self.mse + self.cross_entropy
    }
}

fn mean(values: &[f32], term: &str) -> Result<f32> {
    if values.is_empty() {
        return Err(Error::Shape(format!("model reported no {} replicas", term)));
    }
    Ok(values.iter().sum::<f32>() / values.len() as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averages_replicas_under_data_parallelism() {
        let loss = CompositeLoss::from_replicas(&[1.0, 3.0], &[0.5, 0.25, 0.0], true).unwrap();
        assert_eq!(loss.cross_entropy, 2.0);
        assert_eq!(loss.mse, 0.25);
        assert_eq!(loss.total(), 2.25);
    }

    #[test]
    fn single_replica_is_required_otherwise() {
        let loss = CompositeLoss::from_replicas(&[1.5], &[0.5], false).unwrap();
        assert_eq!(loss.total(), 2.0);
        assert!(CompositeLoss::from_replicas(&[1.0, 2.0], &[0.5, 0.5], false).is_err());
        assert!(CompositeLoss::from_replicas(&[], &[], true).is_err());
    }
}
