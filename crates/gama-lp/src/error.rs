//! Error types for solver communication.

use thiserror::Error;

/// Errors that can occur while solving a linear program.
#[derive(Debug, Clone, Error)]
pub enum LpError {
    /// The constraints cannot be satisfied jointly.
    #[error("Problem is infeasible: {0}")]
    Infeasible(String),

    /// The objective can decrease without bound.
    #[error("Problem is unbounded: {0}")]
    Unbounded(String),

    /// The backend could not be invoked (not compiled in, failed to start).
    #[error("Solver {backend} is unavailable: {reason}")]
    SolverUnavailable { backend: String, reason: String },

    /// The backend ran but stopped without a trustworthy answer.
    #[error("Numerical issue in {backend}: {message}")]
    Numerical { backend: String, message: String },

    /// The problem data itself is inconsistent.
    #[error("Malformed problem: {0}")]
    Malformed(String),
}

impl LpError {
    pub fn unavailable(backend: &str, reason: impl Into<String>) -> Self {
        LpError::SolverUnavailable {
            backend: backend.to_string(),
            reason: reason.into(),
        }
    }

    pub fn numerical(backend: &str, message: impl Into<String>) -> Self {
        LpError::Numerical {
            backend: backend.to_string(),
            message: message.into(),
        }
    }

    /// Only an unavailable backend is worth retrying elsewhere; infeasible or
    /// unbounded problems stay that way on any solver.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LpError::SolverUnavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unavailable_is_retryable() {
        assert!(LpError::unavailable("highs", "not compiled in").is_retryable());
        assert!(!LpError::Infeasible("x".into()).is_retryable());
        assert!(!LpError::Unbounded("x".into()).is_retryable());
        assert!(!LpError::numerical("clarabel", "max iterations").is_retryable());
        assert!(!LpError::Malformed("nan".into()).is_retryable());
    }

    #[test]
    fn test_display() {
        let err = LpError::unavailable("highs", "feature `solver-highs` disabled");
        assert_eq!(
            err.to_string(),
            "Solver highs is unavailable: feature `solver-highs` disabled"
        );
    }
}
