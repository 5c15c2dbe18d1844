//! Interior-point backend built on Clarabel.
//!
//! Clarabel solves conic programs in the form
//!
//! ```text
//! minimise    ½xᵀPx + qᵀx
//! subject to  Ax + s = b,  s ∈ K
//! ```
//!
//! A linear program maps onto it with `P = 0`, equality rows in the zero cone
//! and `≤` rows in the nonnegative cone. `≥` rows are negated, and finite
//! variable bounds become extra rows. Constraint coefficients come from
//! [`LinearProgram::constraint_matrix`], so repeated terms are already summed
//! when they reach the conic matrix. With this layout the row duals `z`
//! satisfy `q + Aᵀz = 0`, so the shadow price of an original row is `-z`,
//! flipped once more for rows that were negated.

use super::{SolveOptions, SolverBackend};
use crate::{ConstraintSense, LinearProgram, LpError, LpSolution, SolutionStatus};
use ::clarabel::{
    algebra::CscMatrix,
    solver::{DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus, SupportedConeT},
};
use tracing::debug;
use web_time::Instant;

const ID: &str = "clarabel";

#[derive(Debug, Clone, Copy, Default)]
pub struct ClarabelBackend;

/// Conic rows assembled column by column.
struct ConicRows {
    columns: Vec<Vec<(usize, f64)>>,
    rhs: Vec<f64>,
    cones: Vec<SupportedConeT<f64>>,
}

impl ConicRows {
    fn new(n_var: usize) -> Self {
        Self {
            columns: vec![Vec::new(); n_var],
            rhs: Vec::new(),
            cones: Vec::new(),
        }
    }

    fn push_row(&mut self, coeffs: impl IntoIterator<Item = (usize, f64)>, b: f64) -> usize {
        let row = self.rhs.len();
        for (col, val) in coeffs {
            self.columns[col].push((row, val));
        }
        self.rhs.push(b);
        row
    }

    /// `Σ aᵢxᵢ = b`
    fn push_eq(&mut self, coeffs: impl IntoIterator<Item = (usize, f64)>, b: f64) -> usize {
        let row = self.push_row(coeffs, b);
        match self.cones.last_mut() {
            Some(SupportedConeT::ZeroConeT(n)) => *n += 1,
            _ => self.cones.push(SupportedConeT::ZeroConeT(1)),
        }
        row
    }

    /// `Σ aᵢxᵢ ≤ b`
    fn push_leq(&mut self, coeffs: impl IntoIterator<Item = (usize, f64)>, b: f64) -> usize {
        let row = self.push_row(coeffs, b);
        match self.cones.last_mut() {
            Some(SupportedConeT::NonnegativeConeT(n)) => *n += 1,
            _ => self.cones.push(SupportedConeT::NonnegativeConeT(1)),
        }
        row
    }

    fn into_parts(self) -> (CscMatrix<f64>, Vec<f64>, Vec<SupportedConeT<f64>>) {
        let n_rows = self.rhs.len();
        let n_var = self.columns.len();
        let mut col_ptr = Vec::with_capacity(n_var + 1);
        let mut row_idx = Vec::new();
        let mut values: Vec<f64> = Vec::new();

        for mut entries in self.columns {
            let col_start = row_idx.len();
            col_ptr.push(col_start);
            entries.sort_by_key(|(r, _)| *r);
            for (r, v) in entries {
                // Repeated terms on one row collapse into a single entry
                if row_idx.len() > col_start && row_idx.last() == Some(&r) {
                    if let Some(last) = values.last_mut() {
                        *last += v;
                    }
                    continue;
                }
                row_idx.push(r);
                values.push(v);
            }
        }
        col_ptr.push(row_idx.len());

        let a = CscMatrix::new(n_rows, n_var, col_ptr, row_idx, values);
        (a, self.rhs, self.cones)
    }
}

impl SolverBackend for ClarabelBackend {
    fn id(&self) -> &'static str {
        ID
    }

    fn solve(
        &self,
        problem: &LinearProgram,
        options: &SolveOptions,
    ) -> Result<LpSolution, LpError> {
        problem.validate()?;
        let start = Instant::now();
        let n_var = problem.num_variables();
        let mut rows = ConicRows::new(n_var);

        // Rows are laid out first: equalities so they form one zero cone,
        // then all inequalities. `signs[i]` is the factor applied to
        // constraint i, and its coefficients are scattered in afterwards.
        let mut row_of = vec![0usize; problem.num_constraints()];
        let mut signs = vec![1.0; problem.num_constraints()];

        for (i, c) in problem.constraints().iter().enumerate() {
            if c.sense == ConstraintSense::Equal {
                row_of[i] = rows.push_eq([], c.rhs);
            }
        }
        for (j, v) in problem.variables().iter().enumerate() {
            if v.is_fixed() {
                rows.push_eq([(j, 1.0)], v.lower);
            }
        }
        for (i, c) in problem.constraints().iter().enumerate() {
            match c.sense {
                ConstraintSense::Equal => {}
                ConstraintSense::LessEqual => row_of[i] = rows.push_leq([], c.rhs),
                ConstraintSense::GreaterEqual => {
                    signs[i] = -1.0;
                    row_of[i] = rows.push_leq([], -c.rhs);
                }
            }
        }
        for (j, v) in problem.variables().iter().enumerate() {
            if v.is_fixed() {
                continue;
            }
            if v.lower.is_finite() {
                rows.push_leq([(j, -1.0)], -v.lower);
            }
            if v.upper.is_finite() {
                rows.push_leq([(j, 1.0)], v.upper);
            }
        }

        let a_lp = problem.constraint_matrix();
        for (j, column) in a_lp.outer_iterator().enumerate() {
            for (i, &value) in column.iter() {
                rows.columns[j].push((row_of[i], signs[i] * value));
            }
        }

        let (a, b, cones) = rows.into_parts();
        let q = problem.cost_vector();
        let p = CscMatrix::new(n_var, n_var, vec![0; n_var + 1], vec![], vec![]);

        debug!(
            variables = n_var,
            rows = b.len(),
            cones = cones.len(),
            "clarabel problem assembled"
        );

        let settings = DefaultSettingsBuilder::default()
            .verbose(false)
            .max_iter(options.max_iterations)
            .time_limit(options.time_limit.map_or(f64::INFINITY, |t| t.as_secs_f64()))
            .tol_feas(options.tolerance)
            .tol_gap_abs(options.tolerance)
            .tol_gap_rel(options.tolerance)
            .build()
            .map_err(|e| LpError::numerical(ID, format!("settings error: {:?}", e)))?;

        let mut solver = DefaultSolver::new(&p, &q, &a, &b, &cones, settings)
            .map_err(|e| LpError::numerical(ID, format!("initialization failed: {:?}", e)))?;
        solver.solve();

        let sol = &solver.solution;
        let status = match sol.status {
            SolverStatus::Solved => SolutionStatus::Optimal,
            SolverStatus::AlmostSolved => SolutionStatus::AlmostOptimal,
            SolverStatus::PrimalInfeasible | SolverStatus::AlmostPrimalInfeasible => {
                return Err(LpError::Infeasible(format!(
                    "{ID} reported {:?} after {} iterations",
                    sol.status, sol.iterations
                )));
            }
            SolverStatus::DualInfeasible | SolverStatus::AlmostDualInfeasible => {
                return Err(LpError::Unbounded(format!(
                    "{ID} reported {:?} after {} iterations",
                    sol.status, sol.iterations
                )));
            }
            other => {
                return Err(LpError::numerical(
                    ID,
                    format!("stopped with status {:?}", other),
                ));
            }
        };

        let row_duals = row_of
            .iter()
            .zip(&signs)
            .map(|(&r, &s)| -s * sol.z[r])
            .collect();

        Ok(LpSolution {
            status,
            primal: sol.x.clone(),
            row_duals,
            objective: sol.obj_val + problem.objective_offset(),
            iterations: sol.iterations,
            backend: ID,
            solve_time_ms: start.elapsed().as_millis(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merges_consecutive_cones() {
        let mut rows = ConicRows::new(2);
        rows.push_eq([(0, 1.0)], 1.0);
        rows.push_eq([(1, 1.0)], 2.0);
        rows.push_leq([(0, 1.0), (1, 1.0)], 5.0);
        rows.push_leq([(0, -1.0)], 0.0);
        assert_eq!(rows.cones.len(), 2);
        assert!(matches!(rows.cones[0], SupportedConeT::ZeroConeT(2)));
        assert!(matches!(rows.cones[1], SupportedConeT::NonnegativeConeT(2)));
    }

    #[test]
    fn test_repeated_terms_are_summed() {
        let mut rows = ConicRows::new(2);
        rows.push_eq([(0, 1.0), (1, 2.0), (0, 3.0)], 1.0);
        rows.push_leq([(0, 5.0)], 1.0);
        let (a, b, _) = rows.into_parts();
        assert_eq!(b, vec![1.0, 1.0]);
        assert_eq!(a.colptr, vec![0, 2, 3]);
        assert_eq!(a.rowval, vec![0, 1, 0]);
        assert_eq!(a.nzval, vec![4.0, 5.0, 2.0]);
    }

    #[test]
    fn test_greater_equal_rows_are_negated_and_priced_back() {
        let mut lp = LinearProgram::new();
        let x = lp.add_variable("x", 0.0, f64::INFINITY, 2.0);
        let y = lp.add_variable("y", 0.0, f64::INFINITY, 3.0);
        let demand = lp.add_constraint(
            "demand",
            vec![(x, 1.0), (y, 1.0)],
            ConstraintSense::GreaterEqual,
            4.0,
        );
        let cap = lp.add_constraint("cap", vec![(x, 1.0)], ConstraintSense::LessEqual, 3.0);

        let sol = ClarabelBackend
            .solve(&lp, &SolveOptions::default())
            .unwrap();
        assert!((sol.primal[x.index()] - 3.0).abs() < 1e-5);
        assert!((sol.primal[y.index()] - 1.0).abs() < 1e-5);
        assert!((sol.row_duals[demand.index()] - 3.0).abs() < 1e-4);
        assert!((sol.row_duals[cap.index()] + 1.0).abs() < 1e-4);
    }
}
