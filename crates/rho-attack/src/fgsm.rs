//! Fast-gradient-sign baseline.

use ndarray::{Array1, ArrayD};
use rho_core::{Result, RhoError};
use rho_lp::RegionConfig;

/// Perturb `input` by `ε · sign(gradient)`, clamped to the pixel box.
///
/// Zero gradient components leave their pixel untouched, matching
/// `numpy.sign` rather than `f32::signum` (which maps +0 to 1).
pub fn fgsm(input: &ArrayD<f32>, gradient: &Array1<f32>, config: &RegionConfig) -> Result<ArrayD<f32>> {
    if gradient.len() != input.len() {
        return Err(RhoError::ShapeMismatch {
            expected: vec![input.len()],
            got: vec![gradient.len()],
        });
    }
    let mut out = input.clone();
    for (pixel, &g) in out.iter_mut().zip(gradient.iter()) {
        let step = if g > 0.0 {
            1.0
        } else if g < 0.0 {
            -1.0
        } else {
            0.0
        };
        *pixel = (*pixel + config.epsilon * step).clamp(config.min_val, config.max_val);
    }
    Ok(out)
}
