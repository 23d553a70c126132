/// Cross-entropy of a categorical assignment against a hard target.
pub struct CrossEntropyLoss;

/// Small epsilon added inside log() to prevent log(0) = -inf.
const EPS: f32 = 1e-12;

impl CrossEntropyLoss {
    /// `-sum(expected[i] * ln(predicted[i] + eps))` for one distribution.
    pub fn loss(predicted: &[f32], expected: &[f32]) -> f32 {
        predicted.iter().zip(expected.iter())
            .map(|(p, e)| -e * (p + EPS).ln())
            .sum()
    }

    /// Same as `loss` with a one-hot target at `target`.
    pub fn loss_for_index(predicted: &[f32], target: usize) -> f32 {
        predicted.get(target).map(|p| -(p + EPS).ln()).unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_hot_matches_index_form() {
        let p = [0.25, 0.5, 0.25];
        let dense = CrossEntropyLoss::loss(&p, &[0.0, 1.0, 0.0]);
        let sparse = CrossEntropyLoss::loss_for_index(&p, 1);
        assert!((dense - sparse).abs() < 1e-7);
        assert!((sparse - std::f32::consts::LN_2).abs() < 1e-6);
        assert!(CrossEntropyLoss::loss_for_index(&[1.0], 0).abs() < 1e-6);
    }
}
