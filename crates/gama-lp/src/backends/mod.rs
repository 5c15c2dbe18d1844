//! Solver backends.
//!
//! Each backend consumes a [`LinearProgram`] and returns primal values plus
//! shadow prices in the sign convention documented on
//! [`LpSolution::row_duals`](crate::LpSolution::row_duals).

use crate::{LinearProgram, LpError, LpSolution};
use std::time::Duration;

pub mod clarabel;
pub mod highs;

pub use self::clarabel::ClarabelBackend;
pub use self::highs::HighsBackend;

/// Knobs shared by all backends. Backends ignore what they cannot honour.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveOptions {
    /// Feasibility and optimality tolerance
    pub tolerance: f64,
    pub max_iterations: u32,
    pub time_limit: Option<Duration>,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            tolerance: 1e-8,
            max_iterations: 200,
            time_limit: None,
        }
    }
}

pub trait SolverBackend: Send + Sync {
    /// Short lowercase name used in configuration and reports
    fn id(&self) -> &'static str;

    /// Whether the backend can be invoked in this build
    fn is_available(&self) -> bool {
        true
    }

    fn solve(&self, problem: &LinearProgram, options: &SolveOptions)
        -> Result<LpSolution, LpError>;
}
