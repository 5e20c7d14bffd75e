//! Gradient pre-correction (MARS) and update masking (caution).

use ballast_core::{BallastError, Tensor};

/// MARS variance reduction: `g + γ·β₁/(1-β₁)·(g - g_prev)`.
pub fn mars_correction(
    grad: &Tensor,
    previous: &Tensor,
    gamma: f32,
    beta1: f32,
) -> Result<Tensor, BallastError> {
    let coef = if beta1 < 1.0 {
        gamma * beta1 / (1.0 - beta1)
    } else {
        0.0
    };
    grad.zip_map(previous, "mars_correction", |g, old| g + coef * (g - old))
}

/// Zeroes update entries whose sign disagrees with the gradient and rescales
/// the survivors by `numel / kept`.
///
/// Signs are compared by sign bit, so `-0.0` and `0.0` disagree. If every entry
/// is masked the result is all zeros.
pub fn caution(update: &Tensor, grad: &Tensor) -> Result<Tensor, BallastError> {
    update.check_same_shape(grad, "caution")?;
    let numel = update.numel();
    let masked = update
        .data()
        .iter()
        .zip(grad.data())
        .filter(|(u, g)| u.is_sign_negative() != g.is_sign_negative())
        .count();
    let scale = numel as f32 / (numel - masked).max(1) as f32;
    update.zip_map(grad, "caution", |u, g| {
        if u.is_sign_negative() != g.is_sign_negative() {
            0.0
        } else {
            u * scale
        }
    })
}

#[cfg(test)]
#[path = "blend_test.rs"]
mod tests;
