//! Sequential network container and forward evaluation.

use ndarray::{Array1, Array3, Array4, ArrayD, Ix3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rho_core::{Result, RhoError};
use tracing::debug;

use crate::layers::{Conv2dLayer, Layer, LinearLayer};

/// A sequential piecewise-linear network.
#[derive(Debug, Clone, Default)]
pub struct Network {
    pub layers: Vec<Layer>,
}

/// Pre-activation values recorded at every ReLU layer during a forward pass.
///
/// Each entry is `(layer_index, flattened pre-activation)`. The signs of
/// these vectors identify the activation region the input lives in.
#[derive(Debug, Clone)]
pub struct Trace {
    pub pre_activations: Vec<(usize, Array1<f32>)>,
}

impl Network {
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    pub fn add_layer(&mut self, layer: Layer) {
        self.layers.push(layer);
    }

    pub fn num_params(&self) -> usize {
        self.layers.iter().map(Layer::num_params).sum()
    }

    /// Evaluate the network on a concrete input.
    pub fn forward(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        let mut cur = input.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            cur = apply_layer(layer, cur).map_err(|e| e.at_layer(i, layer.kind()))?;
        }
        Ok(cur)
    }

    /// Evaluate the network, recording pre-activations at every ReLU.
    pub fn forward_trace(&self, input: &ArrayD<f32>) -> Result<(ArrayD<f32>, Trace)> {
        let mut cur = input.clone();
        let mut pre_activations = Vec::new();
        for (i, layer) in self.layers.iter().enumerate() {
            if matches!(layer, Layer::Relu) {
                pre_activations.push((i, flatten(&cur)));
            }
            cur = apply_layer(layer, cur).map_err(|e| e.at_layer(i, layer.kind()))?;
        }
        Ok((cur, Trace { pre_activations }))
    }

    /// Evaluate the network and return the flattened output logits.
    pub fn logits(&self, input: &ArrayD<f32>) -> Result<Array1<f32>> {
        Ok(flatten(&self.forward(input)?))
    }
}

pub(crate) fn apply_layer(layer: &Layer, cur: ArrayD<f32>) -> Result<ArrayD<f32>> {
    match layer {
        Layer::Linear(l) => {
            let x = as_vector(&cur, l.in_features())?;
            Ok(l.forward(&x)?.into_dyn())
        }
        Layer::Conv2d(c) => {
            let x = as_image(&cur)?;
            Ok(c.forward(&x.view())?.into_dyn())
        }
        Layer::Relu => Ok(cur.mapv(|v| v.max(0.0))),
        Layer::Flatten => Ok(flatten(&cur).into_dyn()),
    }
}

/// Flatten any tensor to a vector in row-major order.
pub(crate) fn flatten(x: &ArrayD<f32>) -> Array1<f32> {
    x.iter().copied().collect()
}

pub(crate) fn as_vector(x: &ArrayD<f32>, expected_len: usize) -> Result<Array1<f32>> {
    if x.ndim() != 1 || x.len() != expected_len {
        return Err(RhoError::ShapeMismatch {
            expected: vec![expected_len],
            got: x.shape().to_vec(),
        });
    }
    Ok(flatten(x))
}

pub(crate) fn as_image(x: &ArrayD<f32>) -> Result<Array3<f32>> {
    x.view()
        .into_dimensionality::<Ix3>()
        .map(|v| v.to_owned())
        .map_err(|_| RhoError::ShapeMismatch {
            expected: vec![0, 0, 0],
            got: x.shape().to_vec(),
        })
}

/// Identify a known architecture from layer kinds and shapes.
///
/// The reference MNIST classifier is conv(1→20,5,s2) → ReLU →
/// conv(20→50,5,s2) → ReLU → flatten → 800→500 → ReLU → 500→10.
pub fn detect_architecture(network: &Network) -> &'static str {
    if is_mnist_classifier(network) {
        return "mnist-cnn";
    }
    let has_conv = network
        .layers
        .iter()
        .any(|l| matches!(l, Layer::Conv2d(_)));
    let has_linear = network
        .layers
        .iter()
        .any(|l| matches!(l, Layer::Linear(_)));
    if has_conv {
        "cnn"
    } else if has_linear {
        "mlp"
    } else {
        "custom"
    }
}

fn is_mnist_classifier(network: &Network) -> bool {
    let kinds: Vec<&str> = network.layers.iter().map(Layer::kind).collect();
    if kinds
        != [
            "conv2d", "relu", "conv2d", "relu", "flatten", "linear", "relu", "linear",
        ]
    {
        return false;
    }
    match (&network.layers[0], &network.layers[2], &network.layers[5], &network.layers[7]) {
        (Layer::Conv2d(c1), Layer::Conv2d(c2), Layer::Linear(l1), Layer::Linear(l2)) => {
            c1.weight.shape() == [20, 1, 5, 5]
                && c1.stride == 2
                && c2.weight.shape() == [50, 20, 5, 5]
                && c2.stride == 2
                && l1.weight.shape() == [500, 800]
                && l2.weight.shape() == [10, 500]
        }
        _ => false,
    }
}

/// Build the reference MNIST architecture with small random weights.
///
/// Used by tests and the synthetic example; real weights come from a
/// checkpoint.
pub fn random_mnist_classifier(seed: u64) -> Network {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut network = Network::new();
    network.add_layer(Layer::Conv2d(
        Conv2dLayer::new(random_array4(&mut rng, (20, 1, 5, 5)), None, 2)
            .expect("reference conv shapes are valid"),
    ));
    network.add_layer(Layer::Relu);
    network.add_layer(Layer::Conv2d(
        Conv2dLayer::new(random_array4(&mut rng, (50, 20, 5, 5)), None, 2)
            .expect("reference conv shapes are valid"),
    ));
    network.add_layer(Layer::Relu);
    network.add_layer(Layer::Flatten);
    network.add_layer(Layer::Linear(
        LinearLayer::new(random_array2(&mut rng, (500, 800)), None)
            .expect("reference linear shapes are valid"),
    ));
    network.add_layer(Layer::Relu);
    network.add_layer(Layer::Linear(
        LinearLayer::new(random_array2(&mut rng, (10, 500)), None)
            .expect("reference linear shapes are valid"),
    ));
    debug!(params = network.num_params(), "built random reference classifier");
    network
}

fn random_array2(rng: &mut StdRng, shape: (usize, usize)) -> ndarray::Array2<f32> {
    let scale = 1.0 / (shape.1 as f32).sqrt();
    let data: Vec<f32> = (0..shape.0 * shape.1)
        .map(|_| rng.random_range(-scale..scale))
        .collect();
    ndarray::Array2::from_shape_vec(shape, data).expect("shape matches data length")
}

fn random_array4(rng: &mut StdRng, shape: (usize, usize, usize, usize)) -> Array4<f32> {
    let fan_in = (shape.1 * shape.2 * shape.3) as f32;
    let scale = 1.0 / fan_in.sqrt();
    let len = shape.0 * shape.1 * shape.2 * shape.3;
    let data: Vec<f32> = (0..len).map(|_| rng.random_range(-scale..scale)).collect();
    Array4::from_shape_vec(shape, data).expect("shape matches data length")
}
