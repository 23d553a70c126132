use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::model::StateDict;
use crate::optim::AdamState;

pub const CHECKPOINT_FILE: &str = "checkpoint.json";
pub const BEST_MODEL_FILE: &str = "best_model.json";

pub fn best_model_until_file(steps: u64) -> String {
    format!("best_model_until_{}_steps.json", steps)
}

/// Resumable training state. All fields are written together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Number of completed epochs.
    pub epoch: usize,
    /// `null` in JSON until a validation pass has finished.
    #[serde(with = "infinite_as_null")]
    pub best_val_loss: f64,
    pub best_epoch: usize,
    pub model: StateDict,
    pub optimizer: AdamState,
}

impl Checkpoint {
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Checkpoint> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Loads `path` if it exists. A missing file means a fresh run; a file
    /// that exists but does not parse is an error.
    pub fn load_if_present(path: impl AsRef<Path>) -> Result<Option<Checkpoint>> {
        let path = path.as_ref();
        if !path.is_file() {
            info!(path = %path.display(), "no checkpoint found, starting fresh");
            return Ok(None);
        }
        let checkpoint = Checkpoint::load_json(path)?;
        info!(
            path = %path.display(),
            epoch = checkpoint.epoch,
            best_epoch = checkpoint.best_epoch,
            "resuming from checkpoint"
        );
        Ok(Some(checkpoint))
    }
}

/// JSON has no infinity; store it as `null`.
mod infinite_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_some(value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Param;
    use crate::optim::{Adam, AdamConfig, ParamGroup};

    fn checkpoint(best: f64) -> Checkpoint {
        let mut p = Param::new("dvae.palette", vec![1, 3], vec![0.25, 0.5, 0.125]);
        p.grad = vec![0.1, 0.2, 0.3];
        let mut adam = Adam::new(vec![ParamGroup::new("dvae", 1e-3)], AdamConfig::default());
        adam.step(&mut [&mut p]);
        Checkpoint {
            epoch: 3,
            best_val_loss: best,
            best_epoch: 2,
            model: StateDict::from_params([&p]),
            optimizer: adam.state(),
        }
    }

    #[test]
    fn round_trip_preserves_everything() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(CHECKPOINT_FILE);
        let original = checkpoint(0.75);
        original.save_json(&path).unwrap();

        let loaded = Checkpoint::load_if_present(&path).unwrap().unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn infinite_best_loss_survives_as_null() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(CHECKPOINT_FILE);
        checkpoint(f64::INFINITY).save_json(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"best_val_loss\":null"));
        assert_eq!(Checkpoint::load_json(&path).unwrap().best_val_loss, f64::INFINITY);
    }

    #[test]
    fn missing_file_is_fresh_but_corrupt_file_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(Checkpoint::load_if_present(tmp.path().join("none.json")).unwrap().is_none());

        let bad = tmp.path().join("bad.json");
        std::fs::write(&bad, b"{").unwrap();
        assert!(Checkpoint::load_if_present(&bad).is_err());
    }

    #[test]
    fn best_model_file_name() {
        assert_eq!(best_model_until_file(200000), "best_model_until_200000_steps.json");
    }
}
