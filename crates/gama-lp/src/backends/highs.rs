//! Simplex backend built on HiGHS.
//!
//! Compiled only with the `solver-highs` feature. Without it the backend is
//! still constructible but reports itself unavailable, so a solver chain can
//! fall back to another backend.

use super::{SolveOptions, SolverBackend};
use crate::{LinearProgram, LpError, LpSolution};

const ID: &str = "highs";

#[derive(Debug, Clone, Copy, Default)]
pub struct HighsBackend;

impl SolverBackend for HighsBackend {
    fn id(&self) -> &'static str {
        ID
    }

    fn is_available(&self) -> bool {
        cfg!(feature = "solver-highs")
    }

    #[cfg(feature = "solver-highs")]
    fn solve(
        &self,
        problem: &LinearProgram,
        options: &SolveOptions,
    ) -> Result<LpSolution, LpError> {
        native::solve(problem, options)
    }

    #[cfg(not(feature = "solver-highs"))]
    fn solve(
        &self,
        _problem: &LinearProgram,
        _options: &SolveOptions,
    ) -> Result<LpSolution, LpError> {
        Err(LpError::unavailable(
            ID,
            "built without the `solver-highs` feature",
        ))
    }
}

#[cfg(feature = "solver-highs")]
mod native {
    use super::ID;
    use crate::{ConstraintSense, LinearProgram, LpError, LpSolution, SolutionStatus, SolveOptions};
    use highs::{HighsModelStatus, RowProblem, Sense};
    use tracing::debug;
    use web_time::Instant;

    pub(super) fn solve(
        problem: &LinearProgram,
        options: &SolveOptions,
    ) -> Result<LpSolution, LpError> {
        problem.validate()?;
        let start = Instant::now();

        let mut rows = RowProblem::default();
        let cols: Vec<highs::Col> = problem
            .variables()
            .iter()
            .map(|v| rows.add_column(v.cost, v.lower..=v.upper))
            .collect();

        for c in problem.constraints() {
            let factors: Vec<(highs::Col, f64)> =
                c.terms.iter().map(|&(v, a)| (cols[v.index()], a)).collect();
            match c.sense {
                ConstraintSense::Equal => rows.add_row(c.rhs..=c.rhs, &factors),
                ConstraintSense::LessEqual => rows.add_row(..=c.rhs, &factors),
                ConstraintSense::GreaterEqual => rows.add_row(c.rhs.., &factors),
            }
        }

        debug!(
            variables = problem.num_variables(),
            rows = problem.num_constraints(),
            "highs problem assembled"
        );

        let mut model = rows.optimise(Sense::Minimise);
        model.make_quiet();
        model.set_option("primal_feasibility_tolerance", options.tolerance.max(1e-10));
        model.set_option("dual_feasibility_tolerance", options.tolerance.max(1e-10));
        if let Some(limit) = options.time_limit {
            model.set_option("time_limit", limit.as_secs_f64());
        }

        let solved = model
            .try_solve()
            .map_err(|status| LpError::numerical(ID, format!("model rejected: {status:?}")))?;

        match solved.status() {
            HighsModelStatus::Optimal => {}
            HighsModelStatus::Infeasible => {
                return Err(LpError::Infeasible(format!("{ID} reported Infeasible")));
            }
            HighsModelStatus::Unbounded | HighsModelStatus::UnboundedOrInfeasible => {
                return Err(LpError::Unbounded(format!(
                    "{ID} reported {:?}",
                    solved.status()
                )));
            }
            status => {
                return Err(LpError::numerical(
                    ID,
                    format!("stopped with status {status:?}"),
                ));
            }
        }

        // HiGHS row duals already measure ∂objective/∂bound for minimisation.
        let solution = solved.get_solution();
        let primal = solution.columns().to_vec();
        let objective = problem.objective_value(&primal);
        Ok(LpSolution {
            status: SolutionStatus::Optimal,
            primal,
            row_duals: solution.dual_rows().to_vec(),
            objective,
            iterations: 0,
            backend: ID,
            solve_time_ms: start.elapsed().as_millis(),
        })
    }
}
