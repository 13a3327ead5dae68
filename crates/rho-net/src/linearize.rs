//! Exact linearization of a network inside one activation region.
//!
//! A piecewise-linear network restricted to the ReLU activation region of a
//! concrete input *is* a linear map. This module propagates that map forward
//! layer by layer: the Jacobian starts as the identity over the input,
//! affine layers multiply it, and ReLU layers zero the rows of units that
//! are inactive at the probe point. Pre-activation values and Jacobians are
//! snapshotted at every ReLU; they are exactly the data the region linear
//! program is built from.

use ndarray::{Array1, Array2, ArrayD};
use rayon::prelude::*;
use rho_core::{AttackGoal, Result, RhoError};
use tracing::debug;

use crate::layers::{Conv2dLayer, Layer};
use crate::network::{apply_layer, as_image, flatten, Network};

/// Below this many output units a conv Jacobian is computed sequentially;
/// the rayon fan-out only pays for itself on larger layers.
const PARALLEL_ROW_THRESHOLD: usize = 64;

/// Pre-activation state captured at one ReLU layer.
#[derive(Debug, Clone)]
pub struct ReluSnapshot {
    /// Index of the ReLU in `Network::layers`.
    pub layer_index: usize,
    /// Flattened pre-activation values at the probe point.
    pub pre_activation: Array1<f32>,
    /// Exact Jacobian of the pre-activations with respect to the input,
    /// `[units, input_size]`.
    pub jacobian: Array2<f32>,
}

/// The exact local linear structure of a network around one input.
#[derive(Debug, Clone)]
pub struct Linearization {
    /// Flattened probe input.
    pub input: Array1<f32>,
    /// Original input shape.
    pub input_shape: Vec<usize>,
    /// One snapshot per ReLU layer, in layer order.
    pub relu: Vec<ReluSnapshot>,
    /// Output logits at the probe point.
    pub logits: Array1<f32>,
    /// Exact Jacobian of the logits with respect to the input.
    pub logit_jacobian: Array2<f32>,
}

impl Linearization {
    /// Total number of ReLU units across all snapshots.
    pub fn num_relu_units(&self) -> usize {
        self.relu.iter().map(|s| s.pre_activation.len()).sum()
    }
}

impl Network {
    /// Compute the exact linearization of the network at `input`.
    ///
    /// `parallel` gates the rayon fan-out used for convolution Jacobian rows.
    pub fn linearize(&self, input: &ArrayD<f32>, parallel: bool) -> Result<Linearization> {
        let input_flat = flatten(input);
        let n = input_flat.len();
        let mut cur = input.clone();
        let mut jac = Array2::<f32>::eye(n);
        let mut relu = Vec::new();

        for (i, layer) in self.layers.iter().enumerate() {
            // Validates shapes and computes the next value first; the
            // Jacobian update below can then assume a well-formed layer.
            let next = apply_layer(layer, cur.clone()).map_err(|e| e.at_layer(i, layer.kind()))?;
            match layer {
                Layer::Linear(l) => {
                    jac = l.weight.dot(&jac);
                }
                Layer::Conv2d(c) => {
                    let image = as_image(&cur).map_err(|e| e.at_layer(i, layer.kind()))?;
                    jac = conv_jacobian(c, &jac, image.dim(), parallel)
                        .map_err(|e| e.at_layer(i, layer.kind()))?;
                }
                Layer::Relu => {
                    let pre = flatten(&cur);
                    relu.push(ReluSnapshot {
                        layer_index: i,
                        pre_activation: pre.clone(),
                        jacobian: jac.clone(),
                    });
                    for (row, &z) in pre.iter().enumerate() {
                        if z <= 0.0 {
                            jac.row_mut(row).fill(0.0);
                        }
                    }
                }
                Layer::Flatten => {}
            }
            cur = next;
        }

        let logits = flatten(&cur);
        debug!(
            relu_layers = relu.len(),
            relu_units = relu.iter().map(|s| s.pre_activation.len()).sum::<usize>(),
            outputs = logits.len(),
            "linearized network"
        );
        Ok(Linearization {
            input: input_flat,
            input_shape: input.shape().to_vec(),
            relu,
            logits,
            logit_jacobian: jac,
        })
    }
}

/// Push an input Jacobian through a convolution.
///
/// Each output unit's row is the weighted sum of the rows of its receptive
/// field, so the update never materializes the layer's own (huge) matrix.
fn conv_jacobian(
    conv: &Conv2dLayer,
    jac: &Array2<f32>,
    input_dim: (usize, usize, usize),
    parallel: bool,
) -> Result<Array2<f32>> {
    let (in_c, h, w) = input_dim;
    let (kh, kw) = conv.kernel();
    let (oh, ow) = conv.output_spatial(h, w)?;
    let out_units = conv.out_channels() * oh * ow;
    let cols = jac.ncols();
    let stride = conv.stride;

    let compute_row = |idx: usize| -> Vec<f32> {
        let o = idx / (oh * ow);
        let rem = idx % (oh * ow);
        let oy = rem / ow;
        let ox = rem % ow;
        let mut acc = vec![0.0f32; cols];
        for c in 0..in_c {
            for ky in 0..kh {
                for kx in 0..kw {
                    let weight = conv.weight[[o, c, ky, kx]];
                    if weight == 0.0 {
                        continue;
                    }
                    let src = (c * h + oy * stride + ky) * w + ox * stride + kx;
                    for (a, s) in acc.iter_mut().zip(jac.row(src).iter()) {
                        *a += weight * s;
                    }
                }
            }
        }
        acc
    };

    let rows: Vec<Vec<f32>> = if parallel && out_units >= PARALLEL_ROW_THRESHOLD {
        (0..out_units).into_par_iter().map(compute_row).collect()
    } else {
        (0..out_units).map(compute_row).collect()
    };
    let flat: Vec<f32> = rows.into_iter().flatten().collect();
    Ok(Array2::from_shape_vec((out_units, cols), flat).expect("rows match declared shape"))
}

/// Numerically stable softmax.
pub fn softmax(logits: &Array1<f32>) -> Array1<f32> {
    let max = logits.fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let exp = logits.mapv(|v| (v - max).exp());
    let sum = exp.sum();
    exp.mapv(|v| v / sum)
}

/// Numerically stable log-softmax.
pub fn log_softmax(logits: &Array1<f32>) -> Array1<f32> {
    let max = logits.fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let lse = max + logits.mapv(|v| (v - max).exp()).sum().ln();
    logits.mapv(|v| v - lse)
}

/// Negative log-likelihood of `label` under the logits.
pub fn nll_loss(logits: &Array1<f32>, label: usize) -> Result<f32> {
    if label >= logits.len() {
        return Err(RhoError::InvalidConfig(format!(
            "label {} out of range for {} logits",
            label,
            logits.len()
        )));
    }
    Ok(-log_softmax(logits)[label])
}

/// Gradient of the attack objective with respect to the input.
///
/// The objective is linear in the logits' log-probabilities, so its logit
/// gradient is `softmax − onehot` (loss maximization) or `onehot − softmax`
/// (targeted), and the input gradient is one vector-Jacobian product.
pub fn loss_gradient(lin: &Linearization, goal: &AttackGoal) -> Result<Array1<f32>> {
    goal.validate(lin.logits.len())?;
    let p = softmax(&lin.logits);
    let g_logits = match goal {
        AttackGoal::MaximizeLoss { label } => {
            let mut g = p;
            g[*label] -= 1.0;
            g
        }
        AttackGoal::MaximizeTarget { target } => {
            let mut g = p.mapv(|v| -v);
            g[*target] += 1.0;
            g
        }
    };
    Ok(g_logits.dot(&lin.logit_jacobian))
}
