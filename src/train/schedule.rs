//! Step-indexed hyperparameter schedules.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Linear ramp from `start_value` at `start_step` to `final_value` at
/// `final_step`, flat outside that range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearWarmup {
    pub start_value: f64,
    pub final_value: f64,
    pub start_step: u64,
    pub final_step: u64,
}

impl LinearWarmup {
    pub fn new(start_value: f64, final_value: f64, start_step: u64, final_step: u64) -> Result<Self> {
        if start_value > final_value {
            return Err(Error::Schedule(format!(
                "warmup must not decrease ({} -> {})",
                start_value, final_value
            )));
        }
        if start_step > final_step {
            return Err(Error::Schedule(format!(
                "warmup ends (step {}) before it starts (step {})",
                final_step, start_step
            )));
        }
        Ok(LinearWarmup {
            start_value,
            final_value,
            start_step,
            final_step,
        })
    }

    pub fn value_at(&self, step: u64) -> f64 {
        if step < self.start_step {
            self.start_value
        } else if step >= self.final_step {
            self.final_value
        } else {
            let progress =
                (step - self.start_step) as f64 / (self.final_step - self.start_step) as f64;
            self.start_value + (self.final_value - self.start_value) * progress
        }
    }
}

/// Half-cosine from `start_value` at `start_step` down to `final_value` at
/// `final_step`, flat outside that range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CosineAnneal {
    pub start_value: f64,
    pub final_value: f64,
    pub start_step: u64,
    pub final_step: u64,
}

impl CosineAnneal {
    pub fn new(start_value: f64, final_value: f64, start_step: u64, final_step: u64) -> Result<Self> {
        if start_value < final_value {
            return Err(Error::Schedule(format!(
                "annealing must not increase ({} -> {})",
                start_value, final_value
            )));
        }
        if start_step > final_step {
            return Err(Error::Schedule(format!(
                "annealing ends (step {}) before it starts (step {})",
                final_step, start_step
            )));
        }
        Ok(CosineAnneal {
            start_value,
            final_value,
            start_step,
            final_step,
        })
    }

    pub fn value_at(&self, step: u64) -> f64 {
        if step < self.start_step {
            self.start_value
        } else if step >= self.final_step {
            self.final_value
        } else {
            let a = 0.5 * (self.start_value - self.final_value);
            let b = 0.5 * (self.start_value + self.final_value);
            let progress =
                (step - self.start_step) as f64 / (self.final_step - self.start_step) as f64;
            a * (PI * progress).cos() + b
        }
    }
}

/// Halves every `half_life` steps: `exp(step / half_life * ln 0.5)`.
pub fn exponential_decay(step: u64, half_life: u64) -> Result<f64> {
    if half_life == 0 {
        return Err(Error::Schedule("half-life must be positive".into()));
    }
    Ok(decay_factor(step, half_life))
}

fn decay_factor(step: u64, half_life: u64) -> f64 {
    (step as f64 / half_life as f64 * 0.5f64.ln()).exp()
}

/// Hyperparameters derived for one training step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepSchedule {
    pub tau: f64,
    pub lr_dvae: f64,
    pub lr_enc: f64,
    pub lr_dec: f64,
}

/// Temperature and per-group learning-rate schedules of a run.
#[derive(Debug, Clone)]
pub struct TrainingSchedule {
    tau: CosineAnneal,
    warmup_enc: LinearWarmup,
    warmup_dec: LinearWarmup,
    half_life: u64,
    lr_dvae: f64,
    lr_enc: f64,
    lr_dec: f64,
}

impl TrainingSchedule {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tau_start: f64,
        tau_final: f64,
        tau_steps: u64,
        lr_warmup_steps: u64,
        lr_half_life: u64,
        lr_dvae: f64,
        lr_enc: f64,
        lr_dec: f64,
    ) -> Result<Self> {
        if lr_half_life == 0 {
            return Err(Error::Schedule("half-life must be positive".into()));
        }
        Ok(TrainingSchedule {
            tau: CosineAnneal::new(tau_start, tau_final, 0, tau_steps)?,
            warmup_enc: LinearWarmup::new(0.0, 1.0, 0, lr_warmup_steps)?,
            warmup_dec: LinearWarmup::new(0.0, 1.0, 0, lr_warmup_steps)?,
            half_life: lr_half_life,
            lr_dvae,
            lr_enc,
            lr_dec,
        })
    }

    pub fn at(&self, step: u64) -> StepSchedule {
        let decay = decay_factor(step, self.half_life);
        StepSchedule {
            tau: self.tau.value_at(step),
            lr_dvae: self.lr_dvae,
            lr_enc: decay * self.warmup_enc.value_at(step) * self.lr_enc,
            lr_dec: decay * self.warmup_dec.value_at(step) * self.lr_dec,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warmup_endpoints_and_midpoint() {
        let w = LinearWarmup::new(0.0, 1.0, 0, 100).unwrap();
        assert_eq!(w.value_at(0), 0.0);
        assert_eq!(w.value_at(50), 0.5);
        assert_eq!(w.value_at(100), 1.0);
        assert_eq!(w.value_at(10_000), 1.0);

        let delayed = LinearWarmup::new(0.2, 0.4, 10, 20).unwrap();
        assert_eq!(delayed.value_at(3), 0.2);
    }

    #[test]
    fn zero_length_warmup_is_immediately_complete() {
        let w = LinearWarmup::new(0.0, 1.0, 0, 0).unwrap();
        assert_eq!(w.value_at(0), 1.0);
    }

    #[test]
    fn cosine_anneal_is_monotone_between_endpoints() {
        let c = CosineAnneal::new(1.0, 0.1, 0, 300).unwrap();
        assert_eq!(c.value_at(0), 1.0);
        assert_eq!(c.value_at(300), 0.1);
        assert_eq!(c.value_at(301), 0.1);
        assert!((c.value_at(150) - 0.55).abs() < 1e-12);

        let mut prev = c.value_at(0);
        for step in 1..=300 {
            let v = c.value_at(step);
            assert!(v <= prev);
            prev = v;
        }
    }

    #[test]
    fn invalid_ranges_are_rejected() {
        assert!(LinearWarmup::new(1.0, 0.0, 0, 10).is_err());
        assert!(LinearWarmup::new(0.0, 1.0, 10, 0).is_err());
        assert!(CosineAnneal::new(0.1, 1.0, 0, 10).is_err());
        assert!(exponential_decay(5, 0).is_err());
    }

    #[test]
    fn decay_halves_each_half_life() {
        assert_eq!(exponential_decay(0, 10).unwrap(), 1.0);
        assert!((exponential_decay(10, 10).unwrap() - 0.5).abs() < 1e-12);
        assert!((exponential_decay(20, 10).unwrap() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn training_schedule_combines_factors() {
        let s = TrainingSchedule::new(1.0, 0.1, 100, 100, 100, 3e-4, 1e-4, 3e-4).unwrap();

        let start = s.at(0);
        assert_eq!(start.tau, 1.0);
        assert_eq!(start.lr_dvae, 3e-4);
        assert_eq!(start.lr_enc, 0.0);
        assert_eq!(start.lr_dec, 0.0);

        let warm = s.at(100);
        assert!((warm.tau - 0.1).abs() < 1e-12);
        assert!((warm.lr_enc - 0.5e-4).abs() < 1e-12);
        assert!((warm.lr_dec - 1.5e-4).abs() < 1e-12);
    }
}
