use crate::{RowId, VarId};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SolutionStatus {
    Optimal,
    /// Converged to reduced tolerances
    AlmostOptimal,
}

/// Optimal point of a [`crate::LinearProgram`].
#[derive(Debug, Clone, PartialEq)]
pub struct LpSolution {
    pub status: SolutionStatus,
    /// Column values in variable order
    pub primal: Vec<f64>,
    /// Shadow price of every row: change in objective per unit increase of
    /// its right-hand side
    pub row_duals: Vec<f64>,
    /// Objective value including the constant offset
    pub objective: f64,
    pub iterations: u32,
    /// Backend that produced this solution
    pub backend: &'static str,
    pub solve_time_ms: u128,
}

impl LpSolution {
    pub fn value(&self, var: VarId) -> f64 {
        self.primal[var.index()]
    }

    pub fn dual(&self, row: RowId) -> f64 {
        self.row_duals[row.index()]
    }
}
