use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::Utc;
use gama_sim::{ResultStore, RunConfig, RunReport};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MANIFEST_FILE: &str = "manifest.json";

/// Record of one simulation run, written next to its result tables.
#[derive(Debug, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub command: String,
    pub version: String,
    pub timestamp: String,
    pub case: String,
    pub scenario: String,
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
    pub steps_requested: usize,
    pub steps_completed: usize,
    pub curtailed_steps: usize,
    pub elapsed_ms: u64,
    pub solvers: Vec<String>,
    pub objective_total: f64,
    pub total_curtailment_mwh: f64,
    pub spilled_energy_mwh: f64,
    pub config: RunConfig,
    pub outputs: Vec<String>,
}

impl RunManifest {
    pub fn new(
        case: &Path,
        config: &RunConfig,
        solvers: Vec<String>,
        report: &RunReport,
        results: &ResultStore,
        outputs: &[PathBuf],
    ) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            command: "simulate".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now().to_rfc3339(),
            case: case.display().to_string(),
            scenario: report.scenario.clone(),
            status: report.status_label().to_string(),
            error: report.error().map(ToString::to_string),
            steps_requested: report.steps_requested,
            steps_completed: report.steps_completed,
            curtailed_steps: report.curtailed_steps,
            elapsed_ms: u64::try_from(report.elapsed_ms).unwrap_or(u64::MAX),
            solvers,
            objective_total: results.objective_total(),
            total_curtailment_mwh: results.total_curtailment(),
            spilled_energy_mwh: results.spilled_energy(),
            config: config.clone(),
            outputs: outputs.iter().map(|p| p.display().to_string()).collect(),
        }
    }

    /// Write the manifest into `dir` and return its path.
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        let json = serde_json::to_string_pretty(self).context("serializing run manifest")?;
        let path = dir.join(MANIFEST_FILE);
        fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }
}

pub fn read_manifest(path: &Path) -> Result<RunManifest> {
    let json = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let manifest = serde_json::from_str(&json)
        .with_context(|| format!("parsing manifest {}", path.display()))?;
    Ok(manifest)
}
