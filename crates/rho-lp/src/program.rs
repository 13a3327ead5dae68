//! Construction of the region linear program.

use ndarray::{Array1, Array2, ArrayD};
use rho_core::{AttackGoal, Result, RhoError};
use rho_net::{loss_gradient, Linearization, Network};
use tracing::{debug, warn};

/// Perturbation budget and pixel box for the region program.
#[derive(Debug, Clone, Copy)]
pub struct RegionConfig {
    /// Maximum per-element perturbation (ℓ∞ budget).
    pub epsilon: f32,
    /// Minimum valid input value.
    pub min_val: f32,
    /// Maximum valid input value.
    pub max_val: f32,
    /// Parallelize Jacobian row computation during linearization.
    pub parallel: bool,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            epsilon: 0.1,
            min_val: 0.0,
            max_val: 1.0,
            parallel: true,
        }
    }
}

impl RegionConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.epsilon > 0.0) {
            return Err(RhoError::InvalidConfig(format!(
                "epsilon must be positive, got {}",
                self.epsilon
            )));
        }
        if !(self.min_val < self.max_val) {
            return Err(RhoError::InvalidConfig(format!(
                "pixel box [{}, {}] is empty",
                self.min_val, self.max_val
            )));
        }
        Ok(())
    }
}

/// The linear program `maximize c·δ subject to A·δ ≤ b`, with free variables.
///
/// Rows `0..relu_rows` are the activation-region constraints; the remaining
/// `2·num_vars` rows are the per-element ε/box constraints.
#[derive(Debug, Clone)]
pub struct RegionProgram {
    pub objective: Array1<f64>,
    pub a_ub: Array2<f64>,
    pub b_ub: Array1<f64>,
    pub relu_rows: usize,
}

impl RegionProgram {
    pub fn num_constraints(&self) -> usize {
        self.a_ub.nrows()
    }

    pub fn num_vars(&self) -> usize {
        self.a_ub.ncols()
    }

    /// δ = 0 satisfies `A·0 = 0 ≤ b` exactly when every rhs is non-negative.
    /// This holds by construction whenever the probe input lies in the pixel
    /// box.
    pub fn is_feasible_at_zero(&self) -> bool {
        self.b_ub.iter().all(|&b| b >= 0.0)
    }

    /// Largest constraint violation of a candidate δ (≤ 0 means feasible).
    pub fn max_violation(&self, delta: &Array1<f64>) -> f64 {
        let slack = self.a_ub.dot(delta) - &self.b_ub;
        slack.fold(f64::NEG_INFINITY, |a, &b| a.max(b))
    }

    /// Build the program from an exact linearization and a loss-gradient
    /// objective.
    pub fn from_linearization(
        lin: &Linearization,
        objective: &Array1<f32>,
        config: &RegionConfig,
    ) -> Result<Self> {
        config.validate()?;
        let n = lin.input.len();
        if objective.len() != n {
            return Err(RhoError::ShapeMismatch {
                expected: vec![n],
                got: vec![objective.len()],
            });
        }

        let relu_rows = lin.num_relu_units();
        let total_rows = relu_rows + 2 * n;
        let mut a_ub = Array2::<f64>::zeros((total_rows, n));
        let mut b_ub = Array1::<f64>::zeros(total_rows);

        // Region rows: each unit's pre-activation keeps its sign.
        // Exactly-zero pre-activations count as active.
        let mut row = 0;
        for snapshot in &lin.relu {
            for (unit, &z) in snapshot.pre_activation.iter().enumerate() {
                let gradient = snapshot.jacobian.row(unit);
                let sign = if z < 0.0 { 1.0 } else { -1.0 };
                for (dst, &g) in a_ub.row_mut(row).iter_mut().zip(gradient.iter()) {
                    *dst = sign * f64::from(g);
                }
                b_ub[row] = f64::from(z.abs());
                row += 1;
            }
        }

        // Budget rows: δ_i ≤ min(max−x_i, ε) and −δ_i ≤ min(x_i−min, ε).
        for (i, &x) in lin.input.iter().enumerate() {
            a_ub[[row, i]] = 1.0;
            b_ub[row] = f64::from((config.max_val - x).min(config.epsilon));
            row += 1;
            a_ub[[row, i]] = -1.0;
            b_ub[row] = f64::from((x - config.min_val).min(config.epsilon));
            row += 1;
        }

        let program = Self {
            objective: objective.mapv(f64::from),
            a_ub,
            b_ub,
            relu_rows,
        };
        if !program.is_feasible_at_zero() {
            warn!("probe input lies outside the pixel box; program may be infeasible");
        }
        debug!(
            constraints = program.num_constraints(),
            relu_rows = program.relu_rows,
            vars = program.num_vars(),
            "built region program"
        );
        Ok(program)
    }
}

/// Linearize `network` at `input` and build the region program for `goal`.
pub fn region_linear_program(
    network: &Network,
    input: &ArrayD<f32>,
    goal: &AttackGoal,
    config: &RegionConfig,
) -> Result<RegionProgram> {
    let lin = network.linearize(input, config.parallel)?;
    let objective = loss_gradient(&lin, goal)?;
    RegionProgram::from_linearization(&lin, &objective, config)
}
