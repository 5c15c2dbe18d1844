//! Solver-independent linear program.
//!
//! ```text
//! minimise    cᵀx + offset
//! subject to  aᵢᵀx {=, ≤, ≥} bᵢ     for every constraint i
//!             l ≤ x ≤ u
//! ```
//!
//! Backends translate this structure into their native format and report
//! row duals as shadow prices (`∂objective/∂bᵢ`).

use crate::LpError;
use sprs::{CsMat, TriMat};

/// Column handle returned by [`LinearProgram::add_variable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(usize);

impl VarId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Row handle returned by [`LinearProgram::add_constraint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowId(usize);

impl RowId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub lower: f64,
    pub upper: f64,
    pub cost: f64,
}

impl Variable {
    pub fn is_fixed(&self) -> bool {
        self.lower == self.upper
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintSense {
    Equal,
    LessEqual,
    GreaterEqual,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub name: String,
    pub terms: Vec<(VarId, f64)>,
    pub sense: ConstraintSense,
    pub rhs: f64,
}

impl Constraint {
    /// `aᵀx` for a candidate point
    pub fn activity(&self, x: &[f64]) -> f64 {
        self.terms.iter().map(|(v, a)| a * x[v.index()]).sum()
    }

    /// Amount by which `x` violates the row (zero when satisfied)
    pub fn violation(&self, x: &[f64]) -> f64 {
        let lhs = self.activity(x);
        match self.sense {
            ConstraintSense::Equal => (lhs - self.rhs).abs(),
            ConstraintSense::LessEqual => (lhs - self.rhs).max(0.0),
            ConstraintSense::GreaterEqual => (self.rhs - lhs).max(0.0),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinearProgram {
    variables: Vec<Variable>,
    constraints: Vec<Constraint>,
    objective_offset: f64,
}

impl LinearProgram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(variables: usize, constraints: usize) -> Self {
        Self {
            variables: Vec::with_capacity(variables),
            constraints: Vec::with_capacity(constraints),
            objective_offset: 0.0,
        }
    }

    pub fn add_variable(
        &mut self,
        name: impl Into<String>,
        lower: f64,
        upper: f64,
        cost: f64,
    ) -> VarId {
        self.variables.push(Variable {
            name: name.into(),
            lower,
            upper,
            cost,
        });
        VarId(self.variables.len() - 1)
    }

    /// Variable pinned to a single value
    pub fn add_fixed(&mut self, name: impl Into<String>, value: f64, cost: f64) -> VarId {
        self.add_variable(name, value, value, cost)
    }

    pub fn add_constraint(
        &mut self,
        name: impl Into<String>,
        terms: Vec<(VarId, f64)>,
        sense: ConstraintSense,
        rhs: f64,
    ) -> RowId {
        self.constraints.push(Constraint {
            name: name.into(),
            terms,
            sense,
            rhs,
        });
        RowId(self.constraints.len() - 1)
    }

    pub fn set_cost(&mut self, var: VarId, cost: f64) {
        self.variables[var.0].cost = cost;
    }

    pub fn add_objective_offset(&mut self, offset: f64) {
        self.objective_offset += offset;
    }

    pub fn objective_offset(&self) -> f64 {
        self.objective_offset
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn variable(&self, var: VarId) -> &Variable {
        &self.variables[var.0]
    }

    pub fn constraint(&self, row: RowId) -> &Constraint {
        &self.constraints[row.0]
    }

    /// Objective coefficients in column order
    pub fn cost_vector(&self) -> Vec<f64> {
        self.variables.iter().map(|v| v.cost).collect()
    }

    /// Constraint matrix in compressed sparse column form, one row per
    /// constraint in insertion order. Backends assemble their own matrices
    /// from it.
    ///
    /// Repeated `(row, column)` entries are summed.
    pub fn constraint_matrix(&self) -> CsMat<f64> {
        let mut triplets = TriMat::new((self.constraints.len(), self.variables.len()));
        for (row, constraint) in self.constraints.iter().enumerate() {
            for &(var, coef) in &constraint.terms {
                triplets.add_triplet(row, var.0, coef);
            }
        }
        triplets.to_csc()
    }

    pub fn objective_value(&self, x: &[f64]) -> f64 {
        self.objective_offset
            + self
                .variables
                .iter()
                .zip(x)
                .map(|(v, value)| v.cost * value)
                .sum::<f64>()
    }

    /// Largest row or bound violation at `x`
    pub fn max_violation(&self, x: &[f64]) -> f64 {
        let rows = self.constraints.iter().map(|c| c.violation(x));
        let bounds = self
            .variables
            .iter()
            .zip(x)
            .map(|(v, &value)| (v.lower - value).max(value - v.upper).max(0.0));
        rows.chain(bounds).fold(0.0, f64::max)
    }

    /// Reject data no backend can make sense of.
    pub fn validate(&self) -> Result<(), LpError> {
        let n = self.variables.len();
        for v in &self.variables {
            if v.cost.is_nan() || !v.cost.is_finite() {
                return Err(LpError::Malformed(format!(
                    "variable {} has non-finite cost {}",
                    v.name, v.cost
                )));
            }
            if v.lower.is_nan()
                || v.upper.is_nan()
                || v.lower > v.upper
                || v.lower == f64::INFINITY
                || v.upper == f64::NEG_INFINITY
            {
                return Err(LpError::Malformed(format!(
                    "variable {} has invalid bounds [{}, {}]",
                    v.name, v.lower, v.upper
                )));
            }
        }
        for c in &self.constraints {
            if !c.rhs.is_finite() {
                return Err(LpError::Malformed(format!(
                    "constraint {} has non-finite right-hand side {}",
                    c.name, c.rhs
                )));
            }
            for &(var, coef) in &c.terms {
                if var.0 >= n {
                    return Err(LpError::Malformed(format!(
                        "constraint {} references column {} of {}",
                        c.name, var.0, n
                    )));
                }
                if !coef.is_finite() {
                    return Err(LpError::Malformed(format!(
                        "constraint {} has non-finite coefficient {} on {}",
                        c.name, coef, self.variables[var.0].name
                    )));
                }
            }
        }
        if !self.objective_offset.is_finite() {
            return Err(LpError::Malformed("non-finite objective offset".into()));
        }
        Ok(())
    }
}
