//! Solver glue: hand the region program to `microlp`.

use microlp::{ComparisonOp, LinearExpr, OptimizationDirection, Problem, Variable};
use ndarray::Array1;
use rho_core::{Result, RhoError};
use tracing::debug;

use crate::program::RegionProgram;

/// Coefficients below this are dropped when building solver rows; the
/// region matrices are dense but mostly structural zeros.
const COEFF_EPSILON: f64 = 1e-12;

/// An optimal perturbation found by the solver.
#[derive(Debug, Clone)]
pub struct LpSolution {
    /// The flat perturbation δ, in the input's row-major order.
    pub delta: Array1<f32>,
    /// Objective value `c·δ` at the optimum.
    pub objective: f64,
}

impl RegionProgram {
    /// Solve the program, returning the loss-maximizing in-region δ.
    ///
    /// The ε/box rows bound every variable and δ = 0 is feasible for in-box
    /// inputs, so on well-formed programs this always returns `Ok`.
    pub fn solve(&self) -> Result<LpSolution> {
        let mut problem = Problem::new(OptimizationDirection::Maximize);
        let vars: Vec<Variable> = self
            .objective
            .iter()
            .map(|&c| problem.add_var(c, (f64::NEG_INFINITY, f64::INFINITY)))
            .collect();

        for (row, &rhs) in self.a_ub.rows().into_iter().zip(self.b_ub.iter()) {
            let mut expr = LinearExpr::empty();
            let mut nonzero = false;
            for (j, &coeff) in row.iter().enumerate() {
                if coeff.abs() > COEFF_EPSILON {
                    expr.add(vars[j], coeff);
                    nonzero = true;
                }
            }
            if nonzero {
                problem.add_constraint(expr, ComparisonOp::Le, rhs);
            } else if rhs < 0.0 {
                // An all-zero row demanding 0 ≤ rhs < 0 can never hold.
                return Err(RhoError::Infeasible);
            }
        }

        let solution = match problem.solve() {
            Ok(solution) => solution,
            Err(microlp::Error::Infeasible) => return Err(RhoError::Infeasible),
            Err(microlp::Error::Unbounded) => return Err(RhoError::Unbounded),
            Err(other) => return Err(RhoError::Solver(other.to_string())),
        };

        let delta: Array1<f32> = vars.iter().map(|&v| solution[v] as f32).collect();
        let objective = solution.objective();
        debug!(objective, "solved region program");
        Ok(LpSolution { delta, objective })
    }
}
