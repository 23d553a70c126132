use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};
use crate::model::Param;

/// A set of parameters sharing one learning rate.
///
/// A parameter belongs to the first group whose `pattern` occurs in its
/// name. Parameters matching no group are never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamGroup {
    pub pattern: String,
    pub lr: f64,
}

impl ParamGroup {
    pub fn new(pattern: impl Into<String>, lr: f64) -> Self {
        ParamGroup {
            pattern: pattern.into(),
            lr,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdamConfig {
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
}

impl Default for AdamConfig {
    fn default() -> Self {
        AdamConfig {
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
        }
    }
}

/// Running moments of one parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Moments {
    pub step: u64,
    pub exp_avg: Vec<f32>,
    pub exp_avg_sq: Vec<f32>,
}

/// Everything needed to resume an `Adam` optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdamState {
    pub config: AdamConfig,
    pub groups: Vec<ParamGroup>,
    pub moments: BTreeMap<String, Moments>,
}

pub struct Adam {
    config: AdamConfig,
    groups: Vec<ParamGroup>,
    moments: BTreeMap<String, Moments>,
}

impl Adam {
    pub fn new(groups: Vec<ParamGroup>, config: AdamConfig) -> Adam {
        Adam {
            config,
            groups,
            moments: BTreeMap::new(),
        }
    }

    pub fn groups(&self) -> &[ParamGroup] {
        &self.groups
    }

    pub fn lr(&self, group: usize) -> f64 {
        self.groups[group].lr
    }

    pub fn set_lr(&mut self, group: usize, lr: f64) {
        self.groups[group].lr = lr;
    }

    /// Index of the group `name` belongs to.
    pub fn group_of(&self, name: &str) -> Option<usize> {
        self.groups.iter().position(|g| name.contains(&g.pattern))
    }

    /// Logs parameters no group will ever update.
    pub fn warn_unmatched(&self, params: &[&mut Param]) {
        for p in params {
            if self.group_of(&p.name).is_none() {
                warn!(param = %p.name, "parameter belongs to no optimizer group and will not train");
            }
        }
    }

    /// Applies one Adam update to every grouped parameter from its `grad`.
    pub fn step(&mut self, params: &mut [&mut Param]) {
        let AdamConfig { beta1, beta2, eps } = self.config;

        for param in params.iter_mut() {
            let Some(group) = self.group_of(&param.name) else {
                continue;
            };
            let lr = self.groups[group].lr;
            let n = param.numel();

            let m = self
                .moments
                .entry(param.name.clone())
                .or_insert_with(|| Moments {
                    step: 0,
                    exp_avg: vec![0.0; n],
                    exp_avg_sq: vec![0.0; n],
                });
            m.step += 1;

            let bias1 = 1.0 - beta1.powi(m.step as i32);
            let bias2 = 1.0 - beta2.powi(m.step as i32);
            let step_size = lr / bias1;

            for i in 0..n {
                let g = param.grad[i] as f64;
                let avg = beta1 * m.exp_avg[i] as f64 + (1.0 - beta1) * g;
                let avg_sq = beta2 * m.exp_avg_sq[i] as f64 + (1.0 - beta2) * g * g;
                m.exp_avg[i] = avg as f32;
                m.exp_avg_sq[i] = avg_sq as f32;

                let denom = (avg_sq / bias2).sqrt() + eps;
                param.value[i] -= (step_size * avg / denom) as f32;
            }
        }
    }

    pub fn state(&self) -> AdamState {
        AdamState {
            config: self.config,
            groups: self.groups.clone(),
            moments: self.moments.clone(),
        }
    }

    /// Restores moments and hyperparameters. The saved groups must line up
    /// with this optimizer's groups.
    pub fn load_state(&mut self, state: AdamState) -> Result<()> {
        let same_layout = state.groups.len() == self.groups.len()
            && state
                .groups
                .iter()
                .zip(self.groups.iter())
                .all(|(a, b)| a.pattern == b.pattern);
        if !same_layout {
            return Err(Error::Shape(format!(
                "optimizer state has groups {:?}, expected {:?}",
                state.groups.iter().map(|g| &g.pattern).collect::<Vec<_>>(),
                self.groups.iter().map(|g| &g.pattern).collect::<Vec<_>>()
            )));
        }
        self.config = state.config;
        self.groups = state.groups;
        self.moments = state.moments;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> (Param, Param, Param) {
        let mut a = Param::new("dvae.w", vec![2], vec![1.0, -1.0]);
        let mut b = Param::new("steve_encoder.w", vec![1], vec![0.5]);
        let mut c = Param::new("other.w", vec![1], vec![2.0]);
        a.grad = vec![1.0, -1.0];
        b.grad = vec![1.0];
        c.grad = vec![1.0];
        (a, b, c)
    }

    fn groups() -> Vec<ParamGroup> {
        vec![ParamGroup::new("dvae", 0.1), ParamGroup::new("steve_encoder", 0.0)]
    }

    #[test]
    fn first_step_moves_by_learning_rate() {
        let (mut a, mut b, mut c) = params();
        let mut adam = Adam::new(groups(), AdamConfig::default());
        adam.step(&mut [&mut a, &mut b, &mut c]);

        // Bias-corrected first step is lr * sign(grad).
        assert!((a.value[0] - 0.9).abs() < 1e-5);
        assert!((a.value[1] + 0.9).abs() < 1e-5);
        // Zero learning rate and unmatched params stay put.
        assert_eq!(b.value, vec![0.5]);
        assert_eq!(c.value, vec![2.0]);
        assert_eq!(adam.state().moments.len(), 2);
    }

    #[test]
    fn state_round_trips_through_json() {
        let (mut a, mut b, mut c) = params();
        let mut adam = Adam::new(groups(), AdamConfig::default());
        adam.step(&mut [&mut a, &mut b, &mut c]);
        adam.set_lr(1, 0.01);

        let json = serde_json::to_string(&adam.state()).unwrap();
        let mut restored = Adam::new(groups(), AdamConfig::default());
        restored.load_state(serde_json::from_str(&json).unwrap()).unwrap();

        assert_eq!(restored.state(), adam.state());
        assert_eq!(restored.lr(1), 0.01);
    }

    #[test]
    fn mismatched_groups_are_rejected() {
        let adam = Adam::new(groups(), AdamConfig::default());
        let mut other = Adam::new(vec![ParamGroup::new("dvae", 0.1)], AdamConfig::default());
        assert!(other.load_state(adam.state()).is_err());
        assert_eq!(other.group_of("steve_decoder.bias"), None);
    }
}
