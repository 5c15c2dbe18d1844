//! Backend behaviour on small linear programs

use gama_lp::{
    ClarabelBackend, ConstraintSense, LinearProgram, LpError, LpSolution, SolveOptions,
    SolverBackend, SolverChain, SolverKind,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const TOL: f64 = 1e-5;

fn solve(lp: &LinearProgram) -> Result<LpSolution, LpError> {
    ClarabelBackend.solve(lp, &SolveOptions::default())
}

/// Two generators (10 and 20 per MWh, 100 MW each) serving 150 MW
fn merit_order() -> (LinearProgram, [gama_lp::VarId; 2], gama_lp::RowId) {
    let mut lp = LinearProgram::new();
    let cheap = lp.add_variable("cheap", 0.0, 100.0, 10.0);
    let dear = lp.add_variable("dear", 0.0, 100.0, 20.0);
    let balance = lp.add_constraint(
        "balance",
        vec![(cheap, 1.0), (dear, 1.0)],
        ConstraintSense::Equal,
        150.0,
    );
    (lp, [cheap, dear], balance)
}

#[test]
fn test_merit_order_and_marginal_price() {
    let (lp, [cheap, dear], balance) = merit_order();
    let solution = solve(&lp).unwrap();

    assert!((solution.value(cheap) - 100.0).abs() < TOL);
    assert!((solution.value(dear) - 50.0).abs() < TOL);
    assert!((solution.dual(balance) - 20.0).abs() < TOL);
    assert!((solution.objective - 2000.0).abs() < 1e-3);
    assert_eq!(solution.backend, "clarabel");
    assert!(lp.max_violation(&solution.primal) < TOL);
}

#[test]
fn test_dual_signs_follow_rhs_sensitivity() {
    // Relaxing a binding ≤ row lowers the cost
    let mut lp = LinearProgram::new();
    let x = lp.add_variable("x", 0.0, f64::INFINITY, -1.0);
    let cap = lp.add_constraint("cap", vec![(x, 1.0)], ConstraintSense::LessEqual, 5.0);
    let solution = solve(&lp).unwrap();
    assert!((solution.value(x) - 5.0).abs() < TOL);
    assert!((solution.dual(cap) + 1.0).abs() < TOL);

    // Tightening a binding ≥ row raises it
    let mut lp = LinearProgram::new();
    let x = lp.add_variable("x", 0.0, f64::INFINITY, 2.0);
    let floor = lp.add_constraint("floor", vec![(x, 1.0)], ConstraintSense::GreaterEqual, 3.0);
    let solution = solve(&lp).unwrap();
    assert!((solution.value(x) - 3.0).abs() < TOL);
    assert!((solution.dual(floor) - 2.0).abs() < TOL);
}

#[test]
fn test_fixed_variables_and_offset() {
    let mut lp = LinearProgram::new();
    let fixed = lp.add_fixed("fixed", 4.0, 3.0);
    let free = lp.add_variable("free", 0.0, 10.0, 1.0);
    lp.add_constraint(
        "sum",
        vec![(fixed, 1.0), (free, 1.0)],
        ConstraintSense::Equal,
        6.0,
    );
    lp.add_objective_offset(100.0);

    let solution = solve(&lp).unwrap();
    assert!((solution.value(fixed) - 4.0).abs() < TOL);
    assert!((solution.value(free) - 2.0).abs() < TOL);
    assert!((solution.objective - 114.0).abs() < 1e-3);
}

#[test]
fn test_infeasible_problem() {
    let mut lp = LinearProgram::new();
    let x = lp.add_variable("x", 0.0, 1.0, 1.0);
    lp.add_constraint("demand", vec![(x, 1.0)], ConstraintSense::Equal, 2.0);
    assert!(matches!(solve(&lp), Err(LpError::Infeasible(_))));
}

#[test]
fn test_unbounded_problem() {
    let mut lp = LinearProgram::new();
    let x = lp.add_variable("x", 0.0, f64::INFINITY, -1.0);
    let y = lp.add_variable("y", 0.0, f64::INFINITY, 0.0);
    lp.add_constraint("link", vec![(x, 1.0), (y, -1.0)], ConstraintSense::Equal, 0.0);
    assert!(matches!(solve(&lp), Err(LpError::Unbounded(_))));
}

#[test]
fn test_malformed_problem_is_rejected_before_solving() {
    let mut lp = LinearProgram::new();
    lp.add_variable("x", 1.0, 0.0, 1.0);
    assert!(matches!(solve(&lp), Err(LpError::Malformed(_))));
}

/// Backend that always fails with a fixed error and counts its calls
struct Failing {
    error: LpError,
    calls: AtomicUsize,
}

impl Failing {
    fn new(error: LpError) -> Arc<Self> {
        Arc::new(Self {
            error,
            calls: AtomicUsize::new(0),
        })
    }
}

impl SolverBackend for Failing {
    fn id(&self) -> &'static str {
        "failing"
    }

    fn solve(&self, _: &LinearProgram, _: &SolveOptions) -> Result<LpSolution, LpError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

#[test]
fn test_chain_falls_back_when_backend_unavailable() {
    let primary = Failing::new(LpError::unavailable("failing", "license server down"));
    let chain = SolverChain::new(primary.clone()).with_fallback(SolverKind::Clarabel.backend());

    let (lp, [cheap, _], _) = merit_order();
    let solution = chain.solve(&lp, &SolveOptions::default()).unwrap();

    assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
    assert_eq!(solution.backend, "clarabel");
    assert!((solution.value(cheap) - 100.0).abs() < TOL);
}

#[test]
fn test_chain_does_not_retry_infeasible() {
    let primary = Failing::new(LpError::Infeasible("demand exceeds supply".into()));
    let fallback = Failing::new(LpError::unavailable("failing", "unused"));
    let chain = SolverChain::new(primary.clone()).with_fallback(fallback.clone());

    let (lp, _, _) = merit_order();
    let err = chain.solve(&lp, &SolveOptions::default()).unwrap_err();

    assert!(matches!(err, LpError::Infeasible(_)));
    assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_chain_reports_last_unavailability() {
    let chain = SolverChain::new(Failing::new(LpError::unavailable("a", "missing")))
        .with_fallback(Failing::new(LpError::unavailable("b", "missing too")));
    let (lp, _, _) = merit_order();
    let err = chain.solve(&lp, &SolveOptions::default()).unwrap_err();
    assert!(err.to_string().contains("missing too"), "{err}");
}

#[cfg(not(feature = "solver-highs"))]
#[test]
fn test_highs_without_feature_falls_back_to_clarabel() {
    assert!(!SolverKind::Highs.backend().is_available());
    let chain = SolverChain::from_kinds(SolverKind::Highs, &[SolverKind::Clarabel]);
    let (lp, _, _) = merit_order();
    let solution = chain.solve(&lp, &SolveOptions::default()).unwrap();
    assert_eq!(solution.backend, "clarabel");
}

#[cfg(feature = "solver-highs")]
#[test]
fn test_highs_agrees_with_clarabel() {
    let (lp, [cheap, dear], balance) = merit_order();
    let solution = SolverKind::Highs
        .backend()
        .solve(&lp, &SolveOptions::default())
        .unwrap();
    assert_eq!(solution.backend, "highs");
    assert!((solution.value(cheap) - 100.0).abs() < TOL);
    assert!((solution.value(dear) - 50.0).abs() < TOL);
    assert!((solution.dual(balance) - 20.0).abs() < TOL);
}
