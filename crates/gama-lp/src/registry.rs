//! Backend selection and fallback.

use crate::backends::{ClarabelBackend, HighsBackend, SolveOptions, SolverBackend};
use crate::{LinearProgram, LpError, LpSolution};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolverKind {
    #[default]
    Clarabel,
    Highs,
}

const ALL_SOLVERS: &[SolverKind] = &[SolverKind::Clarabel, SolverKind::Highs];

impl SolverKind {
    pub fn all() -> &'static [SolverKind] {
        ALL_SOLVERS
    }

    /// Solvers that can be invoked in this build
    pub fn available() -> Vec<SolverKind> {
        ALL_SOLVERS
            .iter()
            .copied()
            .filter(|kind| kind.backend().is_available())
            .collect()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SolverKind::Clarabel => "clarabel",
            SolverKind::Highs => "highs",
        }
    }

    pub fn backend(&self) -> Arc<dyn SolverBackend> {
        match self {
            SolverKind::Clarabel => Arc::new(ClarabelBackend),
            SolverKind::Highs => Arc::new(HighsBackend),
        }
    }
}

impl fmt::Display for SolverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SolverKind {
    type Err = LpError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "clarabel" => Ok(SolverKind::Clarabel),
            "highs" => Ok(SolverKind::Highs),
            other => Err(LpError::unavailable(
                other,
                "unknown solver; supported values: clarabel, highs",
            )),
        }
    }
}

/// Ordered list of backends.
///
/// The first backend is tried first. The next one is tried only when the
/// previous one is unavailable; any other failure is final.
#[derive(Clone)]
pub struct SolverChain {
    backends: Vec<Arc<dyn SolverBackend>>,
}

impl SolverChain {
    pub fn new(primary: Arc<dyn SolverBackend>) -> Self {
        Self {
            backends: vec![primary],
        }
    }

    pub fn with_fallback(mut self, backend: Arc<dyn SolverBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    /// Chain from a primary kind and its fallbacks, skipping repeats
    pub fn from_kinds(primary: SolverKind, fallbacks: &[SolverKind]) -> Self {
        let mut seen = vec![primary];
        let mut chain = Self::new(primary.backend());
        for kind in fallbacks {
            if !seen.contains(kind) {
                seen.push(*kind);
                chain = chain.with_fallback(kind.backend());
            }
        }
        chain
    }

    pub fn backend_ids(&self) -> Vec<&'static str> {
        self.backends.iter().map(|b| b.id()).collect()
    }

    pub fn solve(
        &self,
        problem: &LinearProgram,
        options: &SolveOptions,
    ) -> Result<LpSolution, LpError> {
        let mut last_error = None;
        for backend in &self.backends {
            if !backend.is_available() {
                debug!(backend = backend.id(), "skipping unavailable backend");
                last_error = Some(LpError::unavailable(
                    backend.id(),
                    "not available in this build",
                ));
                continue;
            }
            match backend.solve(problem, options) {
                Ok(solution) => return Ok(solution),
                Err(err) if err.is_retryable() => {
                    warn!(backend = backend.id(), error = %err, "backend unavailable, trying next");
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_error.unwrap_or_else(|| LpError::unavailable("none", "no backends configured")))
    }
}

impl Default for SolverChain {
    fn default() -> Self {
        Self::new(SolverKind::Clarabel.backend())
    }
}

impl fmt::Debug for SolverChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SolverChain")
            .field("backends", &self.backend_ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_solver_kind() {
        assert_eq!("Clarabel".parse::<SolverKind>().unwrap(), SolverKind::Clarabel);
        assert_eq!("highs".parse::<SolverKind>().unwrap(), SolverKind::Highs);
        let err = "gurobi".parse::<SolverKind>().unwrap_err();
        assert!(err.to_string().contains("supported values"), "{err}");
    }

    #[test]
    fn test_clarabel_always_available() {
        assert!(SolverKind::available().contains(&SolverKind::Clarabel));
    }

    #[test]
    fn test_from_kinds_drops_repeats() {
        let chain = SolverChain::from_kinds(
            SolverKind::Highs,
            &[SolverKind::Highs, SolverKind::Clarabel, SolverKind::Clarabel],
        );
        assert_eq!(chain.backend_ids(), vec!["highs", "clarabel"]);
    }
}
