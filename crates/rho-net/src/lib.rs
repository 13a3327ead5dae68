//! Network model for ρ-LP.
//!
//! A [`Network`] is a sequence of affine layers (fully-connected, 2-D
//! convolution), reshapes, and ReLU activations. Inside one ReLU activation
//! region such a network is exactly linear, which is what makes the
//! region-constrained linear program in `rho-lp` possible: the Jacobian
//! computed by [`Network::linearize`] is exact, not an approximation.

pub mod checkpoint;
pub mod layers;
pub mod linearize;
pub mod network;

pub use checkpoint::{load_checkpoint, save_checkpoint, LayerCheckpoint, NetworkCheckpoint, TensorData};
pub use layers::{Conv2dLayer, Layer, LinearLayer};
pub use linearize::{log_softmax, loss_gradient, nll_loss, softmax, Linearization, ReluSnapshot};
pub use network::{detect_architecture, random_mnist_classifier, Network, Trace};
