//! # gama-lp: linear programs and the solvers behind them
//!
//! The dispatch formulation is expressed as a solver-independent
//! [`LinearProgram`]. A [`SolverBackend`] turns it into an [`LpSolution`]
//! holding primal values and row shadow prices, and a [`SolverChain`] tries
//! backends in order when one is not available.
//!
//! | Backend | Method | Availability |
//! |---------|--------|--------------|
//! | Clarabel | Interior point | always |
//! | HiGHS | Dual simplex | `solver-highs` feature |
//!
//! ```
//! use gama_lp::{ConstraintSense, LinearProgram, SolveOptions, SolverChain};
//!
//! let mut lp = LinearProgram::new();
//! let p = lp.add_variable("p", 0.0, 100.0, 10.0);
//! let demand = lp.add_constraint("demand", vec![(p, 1.0)], ConstraintSense::Equal, 60.0);
//!
//! let solution = SolverChain::default().solve(&lp, &SolveOptions::default()).unwrap();
//! assert!((solution.value(p) - 60.0).abs() < 1e-5);
//! assert!((solution.dual(demand) - 10.0).abs() < 1e-5);
//! ```

pub mod backends;
pub mod error;
pub mod problem;
pub mod registry;
pub mod solution;

pub use backends::{ClarabelBackend, HighsBackend, SolveOptions, SolverBackend};
pub use error::LpError;
pub use problem::{Constraint, ConstraintSense, LinearProgram, RowId, VarId, Variable};
pub use registry::{SolverChain, SolverKind};
pub use solution::{LpSolution, SolutionStatus};
