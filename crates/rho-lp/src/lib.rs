//! Activation-region linear programs.
//!
//! Inside the ReLU activation region of a sample, a piecewise-linear
//! classifier is exactly linear, so "maximize the loss without leaving the
//! region" is a linear program over the input perturbation δ:
//!
//! - one row per ReLU unit keeps that unit's pre-activation on its current
//!   side of zero (`g·δ ≤ −z` for inactive units, `−g·δ ≤ z` for active
//!   ones);
//! - two rows per input element keep `δ` inside the ℓ∞ budget and the valid
//!   pixel box;
//! - the objective is the local gradient of the classification loss,
//!   maximized.
//!
//! δ = 0 is feasible by construction, so the program always has a solution;
//! the simplex itself is delegated to the `microlp` crate.

pub mod diagnostics;
pub mod program;
pub mod solve;

pub use diagnostics::{region_violations, RegionViolation};
pub use program::{region_linear_program, RegionConfig, RegionProgram};
pub use solve::LpSolution;
