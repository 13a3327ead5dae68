//! Adversarial attack comparison: region-constrained LP vs FGSM.
//!
//! The LP attack solves for the loss-maximizing perturbation that stays
//! inside the sample's ReLU activation region and ℓ∞ budget; FGSM takes the
//! classic one-shot sign step with the same budget. Both are evaluated by
//! re-running the classifier and comparing the true label's probability.

pub mod attacker;
pub mod fgsm;
pub mod runner;

pub use attacker::{AttackConfig, AttackOutcome, AttackResult, LpAttacker, TargetRule};
pub use fgsm::fgsm;
pub use runner::{run_comparison, ComparisonReport, ComparisonSummary};
