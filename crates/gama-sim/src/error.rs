//! Errors raised while configuring or running a simulation.

use gama_core::ValidationError;
use gama_lp::LpError;
use thiserror::Error;

/// Result alias for simulation operations.
pub type SimResult<T> = Result<T, SimError>;

#[derive(Debug, Clone, Error)]
pub enum SimError {
    /// Grid, series or outage data rejected before any solve
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("invalid run configuration: {0}")]
    Config(#[from] ConfigError),

    /// Internal invariant violated while building a step's problem
    #[error("formulation error at step {step}: {message}")]
    Formulation { step: usize, message: String },

    #[error("step {step} is infeasible: {message}")]
    Infeasible { step: usize, message: String },

    #[error("step {step} is unbounded: {message}")]
    Unbounded { step: usize, message: String },

    #[error("no solver available at step {step}: {source}")]
    SolverUnavailable {
        step: usize,
        #[source]
        source: LpError,
    },

    #[error("solver failed at step {step}: {source}")]
    Solver {
        step: usize,
        #[source]
        source: LpError,
    },

    #[error("storage unit {unit} left its bounds at step {step}: {source}")]
    StorageConsistency {
        step: usize,
        unit: String,
        #[source]
        source: StorageConsistencyError,
    },

    /// Solved dispatch breaks power balance or a branch limit
    #[error("inconsistent solution at step {step}: {message}")]
    Consistency { step: usize, message: String },

    #[error(transparent)]
    Result(#[from] ResultError),
}

impl SimError {
    /// Classify a solver failure at `step`.
    pub fn from_lp(step: usize, err: LpError) -> Self {
        match err {
            LpError::Infeasible(message) => SimError::Infeasible { step, message },
            LpError::Unbounded(message) => SimError::Unbounded { step, message },
            err @ LpError::SolverUnavailable { .. } => {
                SimError::SolverUnavailable { step, source: err }
            }
            err => SimError::Solver { step, source: err },
        }
    }

    /// Step at which the run stopped, if the failure happened inside the loop
    pub fn step(&self) -> Option<usize> {
        match self {
            SimError::Formulation { step, .. }
            | SimError::Infeasible { step, .. }
            | SimError::Unbounded { step, .. }
            | SimError::SolverUnavailable { step, .. }
            | SimError::Solver { step, .. }
            | SimError::StorageConsistency { step, .. }
            | SimError::Consistency { step, .. } => Some(*step),
            SimError::Validation(_) | SimError::Config(_) | SimError::Result(_) => None,
        }
    }

    /// Short label for reports and manifests
    pub fn kind(&self) -> &'static str {
        match self {
            SimError::Validation(_) => "validation",
            SimError::Config(_) => "config",
            SimError::Formulation { .. } => "formulation",
            SimError::Infeasible { .. } => "infeasible",
            SimError::Unbounded { .. } => "unbounded",
            SimError::SolverUnavailable { .. } => "solver_unavailable",
            SimError::Solver { .. } => "solver",
            SimError::StorageConsistency { .. } => "storage_consistency",
            SimError::Consistency { .. } => "consistency",
            SimError::Result(_) => "result",
        }
    }
}

/// Every out-of-range option found in a [`crate::RunConfig`].
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{}", .problems.join("; "))]
pub struct ConfigError {
    pub problems: Vec<String>,
}

impl ConfigError {
    pub fn single(problem: impl Into<String>) -> Self {
        Self {
            problems: vec![problem.into()],
        }
    }
}

/// Post-solve storage level outside `[0, capacity]` by more than tolerance.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("level {level} outside [0, {capacity}] beyond tolerance {tolerance}")]
pub struct StorageConsistencyError {
    pub level: f64,
    pub capacity: f64,
    pub tolerance: f64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResultError {
    #[error("step {got} recorded out of order, expected step {expected}")]
    OutOfOrder { expected: usize, got: usize },

    #[error("step {step} has {got} {entity} values, store expects {expected}")]
    ShapeMismatch {
        step: usize,
        entity: &'static str,
        expected: usize,
        got: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lp_errors_keep_step() {
        let err = SimError::from_lp(3, LpError::Infeasible("demand".into()));
        assert!(matches!(err, SimError::Infeasible { step: 3, .. }));
        assert_eq!(err.step(), Some(3));
        assert_eq!(err.kind(), "infeasible");

        let err = SimError::from_lp(1, LpError::unavailable("highs", "missing"));
        assert!(matches!(err, SimError::SolverUnavailable { step: 1, .. }));

        let err = SimError::from_lp(0, LpError::numerical("clarabel", "max iterations"));
        assert!(matches!(err, SimError::Solver { step: 0, .. }));
        assert!(err.to_string().contains("max iterations"), "{err}");
    }

    #[test]
    fn test_config_error_lists_every_problem() {
        let err = ConfigError {
            problems: vec!["time_delta must be > 0".into(), "steps must be > 0".into()],
        };
        assert_eq!(err.to_string(), "time_delta must be > 0; steps must be > 0");
        assert_eq!(SimError::from(err).step(), None);
    }
}
