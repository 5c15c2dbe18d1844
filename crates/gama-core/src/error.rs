//! Validation failure shared by the grid model and the time-series layer.

use crate::diagnostics::{Diagnostics, Issue};
use std::fmt;
use thiserror::Error;

/// Malformed or inconsistent input data.
///
/// Holds every issue found during validation so that a data set can be fixed
/// in a single pass. Only error-severity issues cause a `ValidationError`;
/// warnings ride along so callers can still report them.
#[derive(Error, Debug, Clone)]
pub struct ValidationError {
    diagnostics: Diagnostics,
}

impl ValidationError {
    /// Turn diagnostics into a result: `Err` when any error was recorded.
    pub fn check(diagnostics: Diagnostics) -> Result<Diagnostics, ValidationError> {
        if diagnostics.has_errors() {
            Err(Self { diagnostics })
        } else {
            Ok(diagnostics)
        }
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Error-severity issues, in the order they were detected.
    pub fn errors(&self) -> impl Iterator<Item = &Issue> {
        self.diagnostics.errors()
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "validation failed with {} error(s)",
            self.diagnostics.error_count()
        )?;
        for issue in self.diagnostics.errors() {
            write!(f, "\n  {issue}")?;
        }
        Ok(())
    }
}
