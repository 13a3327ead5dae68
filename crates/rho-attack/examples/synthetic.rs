//! Attack a small random convolutional classifier on a synthetic image.
//!
//! Run with: `cargo run --example synthetic -p rho-attack`

use ndarray::{Array2, Array4, ArrayD, IxDyn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rho_attack::{AttackConfig, LpAttacker};
use rho_net::{Conv2dLayer, Layer, LinearLayer, Network};

fn main() {
    let mut rng = StdRng::seed_from_u64(0);

    // conv(1→4, 3x3, stride 2) → ReLU → flatten → 64→10
    let conv_weight = Array4::from_shape_fn((4, 1, 3, 3), |_| rng.random_range(-0.3..0.3f32));
    let head = Array2::from_shape_fn((10, 64), |_| rng.random_range(-0.3..0.3f32));
    let mut network = Network::new();
    network.add_layer(Layer::Conv2d(
        Conv2dLayer::new(conv_weight, None, 2).expect("valid conv"),
    ));
    network.add_layer(Layer::Relu);
    network.add_layer(Layer::Flatten);
    network.add_layer(Layer::Linear(LinearLayer::new(head, None).expect("valid head")));

    let input = ArrayD::from_shape_fn(IxDyn(&[1, 9, 9]), |_| rng.random_range(0.0..1.0f32));
    let label = 3;

    let attacker = LpAttacker::new(AttackConfig::default());
    let result = attacker
        .attack(&network, &input, 0, label)
        .expect("attack succeeds on a well-formed network");

    let outcome = &result.outcome;
    println!(
        "correct prob went from {:.6} to {:.6} (fgsm {:.6})",
        outcome.clean_prob, outcome.lp_prob, outcome.fgsm_prob
    );
    println!(
        "{} constraints, objective {:.6}, |delta|_inf = {:.4}, region violations: {}",
        outcome.constraints, outcome.lp_objective, outcome.delta_linf, outcome.region_violations
    );
}
