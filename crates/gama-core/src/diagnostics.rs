//! Issues found while validating grid and time-series data.
//!
//! Validation never stops at the first problem: every check appends an
//! [`Issue`] naming the offending record, so an operator sees all broken
//! records at once.
//!
//! ```
//! use gama_core::diagnostics::{Diagnostics, EntityRef, IssueKind};
//! use gama_core::NodeId;
//!
//! let mut diag = Diagnostics::new();
//! diag.warning(IssueKind::Structure, EntityRef::Grid, "grid has no consumers");
//! diag.error(
//!     IssueKind::UnknownReference,
//!     EntityRef::Node(NodeId::new("X")),
//!     "unknown node 'X'",
//! );
//! assert_eq!(diag.summary(), "1 warning, 1 error");
//! ```

use crate::{BranchId, ConsumerId, GeneratorId, NodeId, ProfileId, StorageId};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Unusual but usable data, e.g. a node with nothing attached
    Warning,
    /// Data a simulation cannot run with
    Error,
}

/// What went wrong with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Points at a node, generator, branch or profile that does not exist
    UnknownReference,
    /// Identifier used twice within one entity kind
    Duplicate,
    /// Numeric field outside its allowed range
    OutOfRange,
    /// Inconsistent wiring, such as a self-loop or a reservoir on a
    /// dispatchable unit
    Structure,
    /// Time series too short or of unequal length
    Coverage,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IssueKind::UnknownReference => "reference",
            IssueKind::Duplicate => "duplicate",
            IssueKind::OutOfRange => "value",
            IssueKind::Structure => "structure",
            IssueKind::Coverage => "coverage",
        })
    }
}

/// The record an issue is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum EntityRef {
    /// The data set as a whole
    Grid,
    Node(NodeId),
    Branch(BranchId),
    Generator(GeneratorId),
    Consumer(ConsumerId),
    Storage(StorageId),
    Profile(ProfileId),
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Grid => f.write_str("grid"),
            EntityRef::Node(id) => write!(f, "node {id}"),
            EntityRef::Branch(id) => write!(f, "branch {id}"),
            EntityRef::Generator(id) => write!(f, "generator {id}"),
            EntityRef::Consumer(id) => write!(f, "consumer {id}"),
            EntityRef::Storage(id) => write!(f, "storage {id}"),
            EntityRef::Profile(id) => write!(f, "profile {id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Issue {
    pub severity: Severity,
    pub kind: IssueKind,
    pub entity: EntityRef,
    pub message: String,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "[{severity}:{}] {}: {}", self.kind, self.entity, self.message)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    issues: Vec<Issue>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, kind: IssueKind, entity: EntityRef, message: impl Into<String>) {
        self.push(Severity::Error, kind, entity, message.into());
    }

    pub fn warning(&mut self, kind: IssueKind, entity: EntityRef, message: impl Into<String>) {
        self.push(Severity::Warning, kind, entity, message.into());
    }

    fn push(&mut self, severity: Severity, kind: IssueKind, entity: EntityRef, message: String) {
        self.issues.push(Issue {
            severity,
            kind,
            entity,
            message,
        });
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn errors(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Issue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings().count()
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    pub fn summary(&self) -> String {
        let plural = |n: usize| if n == 1 { "" } else { "s" };
        match (self.warning_count(), self.error_count()) {
            (0, 0) => "no issues".to_string(),
            (w, 0) => format!("{w} warning{}", plural(w)),
            (0, e) => format!("{e} error{}", plural(e)),
            (w, e) => format!("{w} warning{}, {e} error{}", plural(w), plural(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_summary() {
        let mut diag = Diagnostics::new();
        assert_eq!(diag.summary(), "no issues");

        diag.warning(
            IssueKind::Structure,
            EntityRef::Node(NodeId::new("lonely")),
            "nothing attached",
        );
        assert_eq!(diag.summary(), "1 warning");
        assert!(!diag.has_errors());

        diag.error(
            IssueKind::OutOfRange,
            EntityRef::Branch(BranchId::new("L1")),
            "capacity = -5 outside [0, inf]",
        );
        diag.warning(IssueKind::Structure, EntityRef::Grid, "grid has no consumers");
        assert_eq!(diag.summary(), "2 warnings, 1 error");
        assert_eq!(diag.issues().len(), 3);
    }

    #[test]
    fn test_issue_display_names_the_record() {
        let mut diag = Diagnostics::new();
        diag.error(
            IssueKind::UnknownReference,
            EntityRef::Generator(GeneratorId::new("g1")),
            "unknown node 'Z'",
        );
        let text = diag.errors().next().unwrap().to_string();
        assert_eq!(text, "[error:reference] generator g1: unknown node 'Z'");
    }

    #[test]
    fn test_serialized_entity_is_tagged() {
        let mut diag = Diagnostics::new();
        diag.error(
            IssueKind::Duplicate,
            EntityRef::Storage(StorageId::new("bat")),
            "duplicate storage identifier",
        );
        let json = serde_json::to_value(&diag).unwrap();
        let issue = &json["issues"][0];
        assert_eq!(issue["kind"], "duplicate");
        assert_eq!(issue["entity"]["kind"], "storage");
        assert_eq!(issue["entity"]["id"], "bat");
    }
}
