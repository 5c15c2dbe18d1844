//! # gama-ts: time-series inputs for dispatch simulation
//!
//! Entities in the grid reference named profiles ([`ProfileId`]) for demand,
//! availability, cost, inflow and storage value. A [`TimeSeriesProvider`]
//! answers "value of profile p at step t". All profiles used in one run share
//! a fixed length.
//!
//! [`TimeSeriesTable`] is the in-memory provider. Loading tables from files is
//! left to callers; the table only checks that what it is given is usable.

use gama_core::{Diagnostics, EntityRef, IssueKind, ProfileId, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod resolve;

pub use resolve::{ensure_profiles, resolve_step, ResolvedStep};

/// Source of per-step profile values.
///
/// Providers are read-only during a run and may be shared across threads.
pub trait TimeSeriesProvider: Send + Sync {
    /// Number of steps every profile covers
    fn len(&self) -> usize;

    /// Value of `profile` at `step`, or `None` if the profile is unknown or
    /// the step is out of range.
    fn value(&self, profile: &ProfileId, step: usize) -> Option<f64>;

    fn contains(&self, profile: &ProfileId) -> bool;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Named profile columns of equal length.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<ProfileId, Vec<f64>>",
    into = "BTreeMap<ProfileId, Vec<f64>>"
)]
pub struct TimeSeriesTable {
    len: usize,
    columns: BTreeMap<ProfileId, Vec<f64>>,
}

impl TimeSeriesTable {
    /// Build a table, rejecting an empty column set, unequal lengths, empty
    /// columns and non-finite values. All problems are reported together.
    pub fn from_columns<I, K>(columns: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = (K, Vec<f64>)>,
        K: Into<ProfileId>,
    {
        let mut diag = Diagnostics::new();
        let mut table = BTreeMap::new();
        for (key, values) in columns {
            let key = key.into();
            let entity = EntityRef::Profile(key.clone());
            if values.is_empty() {
                diag.error(IssueKind::Coverage, entity.clone(), "profile has no values");
            }
            if let Some(step) = values.iter().position(|v| !v.is_finite()) {
                diag.error(
                    IssueKind::OutOfRange,
                    entity.clone(),
                    format!("non-finite value {} at step {step}", values[step]),
                );
            }
            if table.insert(key, values).is_some() {
                diag.error(IssueKind::Duplicate, entity, "duplicate profile name");
            }
        }
        if table.is_empty() {
            diag.error(
                IssueKind::Coverage,
                EntityRef::Grid,
                "time series table has no profiles",
            );
        }

        let len = table.values().map(Vec::len).max().unwrap_or(0);
        for (key, values) in &table {
            if values.len() != len {
                diag.error(
                    IssueKind::Coverage,
                    EntityRef::Profile(key.clone()),
                    format!("profile has {} values, expected {len}", values.len()),
                );
            }
        }

        ValidationError::check(diag)?;
        Ok(Self {
            len,
            columns: table,
        })
    }

    pub fn column(&self, profile: &str) -> Option<&[f64]> {
        self.columns.get(profile).map(Vec::as_slice)
    }

    pub fn profiles(&self) -> impl Iterator<Item = &ProfileId> {
        self.columns.keys()
    }
}

impl TimeSeriesProvider for TimeSeriesTable {
    fn len(&self) -> usize {
        self.len
    }

    fn value(&self, profile: &ProfileId, step: usize) -> Option<f64> {
        self.columns
            .get(profile)
            .and_then(|column| column.get(step))
            .copied()
    }

    fn contains(&self, profile: &ProfileId) -> bool {
        self.columns.contains_key(profile)
    }
}

impl TryFrom<BTreeMap<ProfileId, Vec<f64>>> for TimeSeriesTable {
    type Error = ValidationError;

    /// An empty map reads as "no profiles", the same as an omitted table.
    fn try_from(columns: BTreeMap<ProfileId, Vec<f64>>) -> Result<Self, Self::Error> {
        if columns.is_empty() {
            return Ok(Self::default());
        }
        Self::from_columns(columns)
    }
}

impl From<TimeSeriesTable> for BTreeMap<ProfileId, Vec<f64>> {
    fn from(table: TimeSeriesTable) -> Self {
        table.columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_lookup() {
        let table = TimeSeriesTable::from_columns([
            ("load", vec![1.0, 0.8, 1.2]),
            ("wind", vec![0.1, 0.5, 0.9]),
        ])
        .unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.value(&ProfileId::new("wind"), 1), Some(0.5));
        assert_eq!(table.value(&ProfileId::new("wind"), 3), None);
        assert_eq!(table.value(&ProfileId::new("solar"), 0), None);
        assert!(table.contains(&ProfileId::new("load")));
        assert_eq!(table.column("load"), Some(&[1.0, 0.8, 1.2][..]));
    }

    #[test]
    fn test_table_rejects_bad_columns_all_at_once() {
        let err = TimeSeriesTable::from_columns([
            ("a", vec![1.0, 2.0, 3.0]),
            ("b", vec![1.0, f64::NAN, 3.0]),
            ("c", vec![1.0]),
            ("d", vec![]),
        ])
        .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("non-finite value NaN at step 1"), "{text}");
        assert!(text.contains("profile has 1 values, expected 3"), "{text}");
        assert!(text.contains("profile has no values"), "{text}");
        // "d" is both empty and too short
        assert_eq!(err.diagnostics().error_count(), 4);
    }

    #[test]
    fn test_table_deserializes_from_json_map() {
        let table: TimeSeriesTable =
            serde_json::from_str(r#"{"load": [1.0, 2.0], "price": [3.0, 4.0]}"#).unwrap();
        assert_eq!(table.len(), 2);

        let bad: Result<TimeSeriesTable, _> =
            serde_json::from_str(r#"{"load": [1.0, 2.0], "price": [3.0]}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_table_without_columns_is_rejected() {
        let err = TimeSeriesTable::from_columns(Vec::<(&str, Vec<f64>)>::new()).unwrap_err();
        assert_eq!(err.diagnostics().error_count(), 1);
        assert!(err.to_string().contains("has no profiles"), "{err}");

        let table: TimeSeriesTable = serde_json::from_str("{}").unwrap();
        assert!(table.is_empty());
        assert_eq!(table.profiles().count(), 0);
    }
}
