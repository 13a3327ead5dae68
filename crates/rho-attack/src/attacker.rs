//! The LP attacker: linearize, build the region program, solve, compare.

use ndarray::{ArrayD, IxDyn};
use rho_core::{AttackGoal, Result, RhoError};
use rho_lp::{region_violations, RegionConfig, RegionProgram};
use rho_net::{loss_gradient, softmax, Network};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::fgsm::fgsm;

/// How the attack picks its objective class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetRule {
    /// Untargeted: maximize the loss of the true label.
    TrueLabelLoss,
    /// Targeted at `(label + 1) mod classes`.
    NextLabel,
    /// Targeted at a fixed class.
    Fixed(usize),
}

impl TargetRule {
    pub fn goal_for(&self, label: usize, num_classes: usize) -> Result<AttackGoal> {
        let goal = match self {
            TargetRule::TrueLabelLoss => AttackGoal::MaximizeLoss { label },
            TargetRule::NextLabel => AttackGoal::MaximizeTarget {
                target: (label + 1) % num_classes,
            },
            TargetRule::Fixed(target) => AttackGoal::MaximizeTarget { target: *target },
        };
        goal.validate(num_classes)?;
        Ok(goal)
    }
}

/// Configuration for one attack run.
#[derive(Debug, Clone, Copy)]
pub struct AttackConfig {
    /// Perturbation budget and pixel box.
    pub region: RegionConfig,
    /// Objective selection.
    pub target: TargetRule,
    /// Pre-activation slack tolerated before a unit counts as having left
    /// the region.
    pub region_tolerance: f32,
}

impl Default for AttackConfig {
    fn default() -> Self {
        Self {
            region: RegionConfig::default(),
            target: TargetRule::TrueLabelLoss,
            region_tolerance: 1e-4,
        }
    }
}

/// Per-sample report, serializable for the CLI's `--json` output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackOutcome {
    pub sample_index: usize,
    pub label: usize,
    /// Target class for targeted goals, `None` when untargeted.
    pub target: Option<usize>,
    /// True-label probability on the clean input.
    pub clean_prob: f32,
    /// True-label probability after the LP perturbation.
    pub lp_prob: f32,
    /// True-label probability after the FGSM perturbation.
    pub fgsm_prob: f32,
    /// Objective value `c·δ` at the LP optimum.
    pub lp_objective: f64,
    /// Number of rows in the region program.
    pub constraints: usize,
    /// ReLU units that changed sides after applying δ (should be 0).
    pub region_violations: usize,
    /// ℓ∞ norm of the solved perturbation.
    pub delta_linf: f32,
}

/// Full result of one attack, including the tensors the outcome summarizes.
#[derive(Debug, Clone)]
pub struct AttackResult {
    pub outcome: AttackOutcome,
    pub delta: ArrayD<f32>,
    pub adversarial: ArrayD<f32>,
    pub fgsm_input: ArrayD<f32>,
}

/// Attacker that solves the region program for each sample.
pub struct LpAttacker {
    config: AttackConfig,
}

impl LpAttacker {
    pub fn new(config: AttackConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AttackConfig {
        &self.config
    }

    /// Attack one sample and evaluate both perturbations.
    pub fn attack(
        &self,
        network: &Network,
        input: &ArrayD<f32>,
        sample_index: usize,
        label: usize,
    ) -> Result<AttackResult> {
        let lin = network.linearize(input, self.config.region.parallel)?;
        let num_classes = lin.logits.len();
        if label >= num_classes {
            return Err(RhoError::InvalidConfig(format!(
                "label {} out of range for {} classes",
                label, num_classes
            )));
        }
        let goal = self.config.target.goal_for(label, num_classes)?;
        let objective = loss_gradient(&lin, &goal)?;
        let program = RegionProgram::from_linearization(&lin, &objective, &self.config.region)?;
        let solution = program.solve()?;

        let delta = ArrayD::from_shape_vec(IxDyn(input.shape()), solution.delta.to_vec())
            .map_err(|e| RhoError::Solver(e.to_string()))?;
        // No clamp here: the budget rows already encode the pixel box.
        let adversarial = input + &delta;
        let fgsm_input = fgsm(input, &objective, &self.config.region)?;

        let clean_prob = softmax(&lin.logits)[label];
        let lp_prob = softmax(&network.logits(&adversarial)?)[label];
        let fgsm_prob = softmax(&network.logits(&fgsm_input)?)[label];

        let violations =
            region_violations(network, input, &delta, self.config.region_tolerance)?;
        let delta_linf = solution
            .delta
            .iter()
            .fold(0.0f32, |acc, d| acc.max(d.abs()));

        info!(
            sample_index,
            label,
            "correct prob went from {:.6} to {:.6} (fgsm {:.6})",
            clean_prob,
            lp_prob,
            fgsm_prob
        );

        let outcome = AttackOutcome {
            sample_index,
            label,
            target: match goal {
                AttackGoal::MaximizeTarget { target } => Some(target),
                AttackGoal::MaximizeLoss { .. } => None,
            },
            clean_prob,
            lp_prob,
            fgsm_prob,
            lp_objective: solution.objective,
            constraints: program.num_constraints(),
            region_violations: violations.len(),
            delta_linf,
        };
        Ok(AttackResult {
            outcome,
            delta,
            adversarial,
            fgsm_input,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};
    use rho_net::{Layer, LinearLayer};

    fn identity_logits_net() -> Network {
        let mut network = Network::new();
        network.add_layer(Layer::Linear(
            LinearLayer::new(arr2(&[[1.0, 0.0], [0.0, 1.0]]), None).unwrap(),
        ));
        network
    }

    fn relu_net() -> Network {
        let mut network = Network::new();
        network.add_layer(Layer::Linear(
            LinearLayer::new(
                arr2(&[[0.8, -0.3], [-0.6, 0.9], [0.4, 0.7]]),
                Some(arr1(&[0.05, -0.1, -0.2])),
            )
            .unwrap(),
        ));
        network.add_layer(Layer::Relu);
        network.add_layer(Layer::Linear(
            LinearLayer::new(arr2(&[[1.0, -0.5, 0.3], [-0.7, 0.6, 0.2]]), None).unwrap(),
        ));
        network
    }

    fn test_config() -> AttackConfig {
        AttackConfig {
            region: RegionConfig {
                epsilon: 0.1,
                min_val: 0.0,
                max_val: 1.0,
                parallel: false,
            },
            target: TargetRule::TrueLabelLoss,
            region_tolerance: 1e-4,
        }
    }

    #[test]
    fn test_target_rule_goal_for() {
        assert_eq!(
            TargetRule::TrueLabelLoss.goal_for(3, 10).unwrap(),
            AttackGoal::MaximizeLoss { label: 3 }
        );
        assert_eq!(
            TargetRule::NextLabel.goal_for(9, 10).unwrap(),
            AttackGoal::MaximizeTarget { target: 0 }
        );
        assert_eq!(
            TargetRule::Fixed(4).goal_for(0, 10).unwrap(),
            AttackGoal::MaximizeTarget { target: 4 }
        );
        assert!(TargetRule::Fixed(10).goal_for(0, 10).is_err());
    }

    #[test]
    fn test_attack_reduces_true_label_probability() {
        let network = identity_logits_net();
        let attacker = LpAttacker::new(test_config());
        let input = arr1(&[0.5, 0.5]).into_dyn();

        let result = attacker.attack(&network, &input, 0, 0).unwrap();
        let outcome = &result.outcome;

        // Equal logits give probability 0.5; pushing 0.1 of mass from
        // logit 0 to logit 1 lowers it.
        assert!((outcome.clean_prob - 0.5).abs() < 1e-6);
        assert!(outcome.lp_prob < outcome.clean_prob);
        // With an identity head the LP and FGSM moves coincide.
        assert!((outcome.lp_prob - outcome.fgsm_prob).abs() < 1e-5);
        assert_eq!(outcome.constraints, 4); // no ReLU rows, 2 per pixel
        assert_eq!(outcome.region_violations, 0);
        assert!((outcome.delta_linf - 0.1).abs() < 1e-5);
        assert!(outcome.target.is_none());
    }

    #[test]
    fn test_attack_through_relu_stays_in_region() {
        let network = relu_net();
        let attacker = LpAttacker::new(test_config());
        let input = arr1(&[0.4, 0.6]).into_dyn();

        let result = attacker.attack(&network, &input, 7, 0).unwrap();
        assert_eq!(result.outcome.sample_index, 7);
        assert_eq!(result.outcome.region_violations, 0);
        assert!(result.outcome.lp_prob <= result.outcome.clean_prob + 1e-6);
        assert!(result.outcome.delta_linf <= 0.1 + 1e-5);
        // 3 ReLU rows + 4 budget rows.
        assert_eq!(result.outcome.constraints, 7);

        // Adversarial input stays inside the pixel box.
        assert!(result
            .adversarial
            .iter()
            .all(|&v| (-1e-5..=1.0 + 1e-5).contains(&v)));
    }

    #[test]
    fn test_targeted_attack_reports_target() {
        let network = identity_logits_net();
        let mut config = test_config();
        config.target = TargetRule::Fixed(1);
        let attacker = LpAttacker::new(config);
        let input = arr1(&[0.5, 0.5]).into_dyn();

        let result = attacker.attack(&network, &input, 0, 0).unwrap();
        assert_eq!(result.outcome.target, Some(1));
        // Pulling toward class 1 is the same move as pushing away from 0.
        assert!(result.outcome.lp_prob < result.outcome.clean_prob);
    }

    #[test]
    fn test_next_label_rule_wraps() {
        let network = identity_logits_net();
        let mut config = test_config();
        config.target = TargetRule::NextLabel;
        let attacker = LpAttacker::new(config);
        let input = arr1(&[0.5, 0.5]).into_dyn();

        let result = attacker.attack(&network, &input, 0, 1).unwrap();
        assert_eq!(result.outcome.target, Some(0));
    }

    #[test]
    fn test_label_out_of_range_is_error() {
        let network = identity_logits_net();
        let attacker = LpAttacker::new(test_config());
        let input = arr1(&[0.5, 0.5]).into_dyn();
        let err = attacker.attack(&network, &input, 0, 2).unwrap_err();
        assert!(matches!(err, RhoError::InvalidConfig(_)));
    }

    #[test]
    fn test_outcome_serializes() {
        let network = identity_logits_net();
        let attacker = LpAttacker::new(test_config());
        let input = arr1(&[0.5, 0.5]).into_dyn();
        let result = attacker.attack(&network, &input, 0, 0).unwrap();
        let json = serde_json::to_string(&result.outcome).unwrap();
        assert!(json.contains("clean_prob"));
        assert!(json.contains("lp_prob"));
    }
}
