use crate::model::Param;

/// Added to the norm before dividing, as the usual clip implementations do.
const CLIP_EPS: f32 = 1e-6;

/// Which norm `clip_grad_norm` measures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GradNorm {
    /// Largest absolute gradient entry.
    Inf,
    /// p-norm over all gradient entries.
    P(f32),
}

/// Rescales all gradients in place so their joint norm is at most
/// `max_norm`. Returns the norm measured before clipping.
pub fn clip_grad_norm(params: &mut [&mut Param], max_norm: f32, norm: GradNorm) -> f32 {
    let total = match norm {
        GradNorm::Inf => params
            .iter()
            .flat_map(|p| p.grad.iter())
            .fold(0.0f32, |acc, g| acc.max(g.abs())),
        GradNorm::P(p) => params
            .iter()
            .flat_map(|param| param.grad.iter())
            .map(|g| g.abs().powf(p))
            .sum::<f32>()
            .powf(1.0 / p),
    };

    let coef = max_norm / (total + CLIP_EPS);
    if coef < 1.0 {
        for param in params.iter_mut() {
            param.grad.iter_mut().for_each(|g| *g *= coef);
        }
    }
    total
}
