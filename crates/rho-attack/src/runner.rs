//! Batch comparison over a set of labeled samples.

use ndarray::ArrayD;
use rho_core::{Result, RhoError};
use rho_net::Network;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::attacker::{AttackConfig, AttackOutcome, LpAttacker};

/// Probabilities closer than this count as a tie between the two attacks.
const TIE_TOLERANCE: f32 = 1e-6;

/// Aggregate statistics over a comparison run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonSummary {
    pub samples: usize,
    /// Samples where the LP attack left the true label less probable than
    /// FGSM did.
    pub lp_wins: usize,
    pub fgsm_wins: usize,
    pub ties: usize,
    pub mean_clean_prob: f32,
    pub mean_lp_prob: f32,
    pub mean_fgsm_prob: f32,
}

/// Everything a comparison run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub outcomes: Vec<AttackOutcome>,
    pub summary: ComparisonSummary,
}

/// Attack every sample sequentially and aggregate the results.
pub fn run_comparison(
    network: &Network,
    samples: &[(ArrayD<f32>, usize)],
    config: &AttackConfig,
) -> Result<ComparisonReport> {
    if samples.is_empty() {
        return Err(RhoError::InvalidConfig(
            "no samples to attack".to_string(),
        ));
    }
    let attacker = LpAttacker::new(*config);
    let mut outcomes = Vec::with_capacity(samples.len());
    for (index, (input, label)) in samples.iter().enumerate() {
        let result = attacker.attack(network, input, index, *label)?;
        outcomes.push(result.outcome);
    }

    let mut summary = ComparisonSummary {
        samples: outcomes.len(),
        lp_wins: 0,
        fgsm_wins: 0,
        ties: 0,
        mean_clean_prob: 0.0,
        mean_lp_prob: 0.0,
        mean_fgsm_prob: 0.0,
    };
    for outcome in &outcomes {
        summary.mean_clean_prob += outcome.clean_prob;
        summary.mean_lp_prob += outcome.lp_prob;
        summary.mean_fgsm_prob += outcome.fgsm_prob;
        if (outcome.lp_prob - outcome.fgsm_prob).abs() <= TIE_TOLERANCE {
            summary.ties += 1;
        } else if outcome.lp_prob < outcome.fgsm_prob {
            summary.lp_wins += 1;
        } else {
            summary.fgsm_wins += 1;
        }
    }
    let n = summary.samples as f32;
    summary.mean_clean_prob /= n;
    summary.mean_lp_prob /= n;
    summary.mean_fgsm_prob /= n;

    info!(
        samples = summary.samples,
        lp_wins = summary.lp_wins,
        fgsm_wins = summary.fgsm_wins,
        ties = summary.ties,
        "comparison finished"
    );
    Ok(ComparisonReport { outcomes, summary })
}
