pub struct MseLoss;

impl MseLoss {
    /// Scalar MSE: mean((predicted - expected)²). Empty inputs give 0.
    pub fn loss(predicted: &[f32], expected: &[f32]) -> f32 {
        if predicted.is_empty() {
            return 0.0;
        }
        let n = predicted.len() as f32;
        predicted.iter().zip(expected.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>() / n
    }

    /// ∂MSE/∂predicted: 2·(predicted - expected) / n
    pub fn derivative(predicted: &[f32], expected: &[f32]) -> Vec<f32> {
        let scale = 2.0 / predicted.len().max(1) as f32;
        predicted.iter().zip(expected.iter())
            .map(|(a, b)| scale * (a - b))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loss_and_gradient() {
        let p = [1.0, 2.0, 4.0, 0.0];
        let y = [1.0, 0.0, 2.0, 0.0];
        assert_eq!(MseLoss::loss(&p, &y), 2.0);
        assert_eq!(MseLoss::derivative(&p, &y), vec![0.0, 1.0, 1.0, 0.0]);
        assert_eq!(MseLoss::loss(&[], &[]), 0.0);
    }
}
