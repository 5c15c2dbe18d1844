//! Case files: grid tables and named profiles in one JSON document.
//!
//! ```json
//! {
//!   "grid": { "nodes": [...], "branches": [...], "generators": [...] },
//!   "profiles": { "demand": [0.8, 1.0, 1.2] }
//! }
//! ```

use anyhow::{Context, Result};
use gama_core::{GridModel, GridTables};
use gama_ts::TimeSeriesTable;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CaseFile {
    pub grid: GridTables,
    #[serde(default)]
    pub profiles: TimeSeriesTable,
}

/// A case file turned into a validated grid and its series.
#[derive(Debug)]
pub struct Case {
    pub grid: GridModel,
    pub series: TimeSeriesTable,
}

impl CaseFile {
    pub fn read(path: &Path) -> Result<Self> {
        let json =
            fs::read_to_string(path).with_context(|| format!("reading case {}", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("parsing case {}", path.display()))
    }

    pub fn into_case(self) -> Result<Case> {
        let grid = GridModel::new(self.grid).context("grid tables failed validation")?;
        Ok(Case {
            grid,
            series: self.profiles,
        })
    }
}

pub fn load_case(path: &Path) -> Result<Case> {
    CaseFile::read(path)?.into_case()
}
