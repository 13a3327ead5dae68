//! Core types for ρ-LP activation-region attacks.
//!
//! This crate provides the shared error type and the attack-goal vocabulary
//! used by the network, program-construction, and attack crates.

use serde::{Deserialize, Serialize};

/// What the adversarial objective maximizes.
///
/// The objective is always a linear functional of the input perturbation,
/// obtained from the local gradient of a log-probability quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttackGoal {
    /// Maximize the negative log-likelihood of the true label
    /// (push probability mass away from the correct class).
    MaximizeLoss { label: usize },
    /// Maximize the log-probability of a chosen target label
    /// (pull the sample toward a specific wrong class).
    MaximizeTarget { target: usize },
}

impl AttackGoal {
    /// The class index whose logit gradient drives the objective.
    pub fn class(&self) -> usize {
        match self {
            AttackGoal::MaximizeLoss { label } => *label,
            AttackGoal::MaximizeTarget { target } => *target,
        }
    }

    /// Validate the goal against the classifier's output width.
    pub fn validate(&self, num_classes: usize) -> Result<()> {
        let class = self.class();
        if class >= num_classes {
            return Err(RhoError::InvalidConfig(format!(
                "class index {} out of range for {} outputs",
                class, num_classes
            )));
        }
        Ok(())
    }
}

/// Error type for ρ-LP operations.
#[derive(Debug)]
pub enum RhoError {
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    ModelLoad(String),

    DatasetLoad(String),

    InvalidConfig(String),

    /// The region program has no feasible point. δ = 0 is feasible by
    /// construction for in-box inputs, so this indicates a malformed input.
    Infeasible,

    /// The region program is unbounded. The per-pixel ε rows bound every
    /// variable, so this indicates a malformed program.
    Unbounded,

    Solver(String),

    LayerError {
        layer_index: usize,
        layer_kind: &'static str,
        source: Box<RhoError>,
    },
}

impl RhoError {
    /// Wrap an error with the layer it occurred in.
    pub fn at_layer(self, layer_index: usize, layer_kind: &'static str) -> Self {
        RhoError::LayerError {
            layer_index,
            layer_kind,
            source: Box::new(self),
        }
    }
}

impl std::fmt::Display for RhoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RhoError::ShapeMismatch { expected, got } => {
                write!(f, "Shape mismatch: expected {:?}, got {:?}", expected, got)
            }
            RhoError::ModelLoad(s) => write!(f, "Model loading failed: {}", s),
            RhoError::DatasetLoad(s) => write!(f, "Dataset loading failed: {}", s),
            RhoError::InvalidConfig(s) => write!(f, "Invalid configuration: {}", s),
            RhoError::Infeasible => write!(f, "Region program is infeasible"),
            RhoError::Unbounded => write!(f, "Region program is unbounded"),
            RhoError::Solver(s) => write!(f, "LP solver failed: {}", s),
            RhoError::LayerError {
                layer_index,
                layer_kind,
                source,
            } => write!(f, "Layer {} ({}) failed: {}", layer_index, layer_kind, source),
        }
    }
}

impl std::error::Error for RhoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RhoError::LayerError { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RhoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_goal_class() {
        assert_eq!(AttackGoal::MaximizeLoss { label: 3 }.class(), 3);
        assert_eq!(AttackGoal::MaximizeTarget { target: 7 }.class(), 7);
    }

    #[test]
    fn test_goal_validate() {
        assert!(AttackGoal::MaximizeLoss { label: 9 }.validate(10).is_ok());
        assert!(AttackGoal::MaximizeLoss { label: 10 }.validate(10).is_err());
        assert!(AttackGoal::MaximizeTarget { target: 0 }.validate(1).is_ok());
    }

    #[test]
    fn test_goal_serialization() {
        let goal = AttackGoal::MaximizeTarget { target: 5 };
        let json = serde_json::to_string(&goal).unwrap();
        let back: AttackGoal = serde_json::from_str(&json).unwrap();
        assert_eq!(goal, back);
    }

    #[test]
    fn test_shape_mismatch_display() {
        let err = RhoError::ShapeMismatch {
            expected: vec![2, 3],
            got: vec![2, 4],
        };
        let msg = format!("{}", err);
        assert!(msg.contains("[2, 3]"));
        assert!(msg.contains("[2, 4]"));
    }

    #[test]
    fn test_layer_error_display_and_source() {
        let err = RhoError::ShapeMismatch {
            expected: vec![10],
            got: vec![20],
        }
        .at_layer(2, "linear");
        let msg = format!("{}", err);
        assert!(msg.contains("Layer 2"));
        assert!(msg.contains("linear"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_non_layer_error_has_no_source() {
        let err = RhoError::Infeasible;
        assert!(std::error::Error::source(&err).is_none());
    }

    #[test]
    fn test_solver_error_display() {
        let err = RhoError::Solver("numerical trouble".to_string());
        assert!(format!("{}", err).contains("numerical trouble"));
    }
}
