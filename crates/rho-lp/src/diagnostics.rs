//! Region-soundness diagnostics.
//!
//! The LP constrains the *linearized* pre-activations; because the network
//! is exactly linear inside the region, a feasible δ can only cross a ReLU
//! boundary through floating-point slack. These checks recompute the real
//! forward pass and report any sign flips.

use ndarray::ArrayD;
use rho_core::{Result, RhoError};
use rho_net::Network;

/// One ReLU unit whose pre-activation changed sides after perturbation.
#[derive(Debug, Clone)]
pub struct RegionViolation {
    /// Index of the ReLU in `Network::layers`.
    pub layer_index: usize,
    /// Flat unit index within that layer.
    pub unit: usize,
    /// Pre-activation at the original input.
    pub original: f32,
    /// Pre-activation at the perturbed input.
    pub perturbed: f32,
}

/// Compare activation patterns before and after a perturbation.
///
/// A unit counts as violated when it was inactive (`z < 0`) and its
/// perturbed pre-activation exceeds `tolerance`, or was active (`z ≥ 0`)
/// and drops below `−tolerance`.
pub fn region_violations(
    network: &Network,
    input: &ArrayD<f32>,
    delta: &ArrayD<f32>,
    tolerance: f32,
) -> Result<Vec<RegionViolation>> {
    if input.shape() != delta.shape() {
        return Err(RhoError::ShapeMismatch {
            expected: input.shape().to_vec(),
            got: delta.shape().to_vec(),
        });
    }
    let perturbed_input = input + delta;
    let (_, before) = network.forward_trace(input)?;
    let (_, after) = network.forward_trace(&perturbed_input)?;

    let mut violations = Vec::new();
    for ((layer_index, pre_before), (_, pre_after)) in before
        .pre_activations
        .iter()
        .zip(after.pre_activations.iter())
    {
        for (unit, (&z0, &z1)) in pre_before.iter().zip(pre_after.iter()).enumerate() {
            let crossed = if z0 < 0.0 {
                z1 > tolerance
            } else {
                z1 < -tolerance
            };
            if crossed {
                violations.push(RegionViolation {
                    layer_index: *layer_index,
                    unit,
                    original: z0,
                    perturbed: z1,
                });
            }
        }
    }
    Ok(violations)
}
