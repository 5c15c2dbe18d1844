//! Run configuration.
//!
//! Loaded from TOML; every key is optional and unknown keys are rejected so
//! that typos surface instead of silently falling back to defaults.
//!
//! ```toml
//! steps = 24
//! time_delta = 1.0
//!
//! [curtailment]
//! policy = "penalized"
//! penalty = 3000.0
//!
//! [storage]
//! terminal = "at_least_initial"
//! initial_levels = { hydro_res = 400.0 }
//!
//! [solver]
//! backend = "highs"
//! fallback = ["clarabel"]
//!
//! [[contingencies]]
//! id = "lose-ab"
//! branches = ["AB"]
//! ```

use crate::error::ConfigError;
use crate::simulation::BASE_SCENARIO;
use crate::storage::TerminalPolicy;
use gama_core::{BranchId, StorageId};
use gama_lp::{SolveOptions, SolverChain, SolverKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

fn default_time_delta() -> f64 {
    1.0
}

fn default_base_mva() -> f64 {
    100.0
}

fn default_spill_penalty() -> f64 {
    0.1
}

fn default_balance_tolerance() -> f64 {
    1e-4
}

fn default_storage_tolerance() -> f64 {
    1e-4
}

fn default_curtailment_penalty() -> f64 {
    1000.0
}

fn default_solver_tolerance() -> f64 {
    1e-8
}

fn default_max_iterations() -> u32 {
    200
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Number of steps to simulate; defaults to the full series length
    #[serde(default)]
    pub steps: Option<usize>,
    /// Step length in hours
    #[serde(default = "default_time_delta")]
    pub time_delta: f64,
    /// Power base for angle scaling (MVA)
    #[serde(default = "default_base_mva")]
    pub base_mva: f64,
    #[serde(default)]
    pub curtailment: CurtailmentConfig,
    /// Cost per MWh of spilled storage inflow
    #[serde(default = "default_spill_penalty")]
    pub spill_penalty: f64,
    /// Largest accepted nodal imbalance or limit breach (MW)
    #[serde(default = "default_balance_tolerance")]
    pub balance_tolerance: f64,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub solver: SolverConfig,
    #[serde(default)]
    pub contingencies: Vec<Contingency>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            steps: None,
            time_delta: default_time_delta(),
            base_mva: default_base_mva(),
            curtailment: CurtailmentConfig::default(),
            spill_penalty: default_spill_penalty(),
            balance_tolerance: default_balance_tolerance(),
            storage: StorageConfig::default(),
            solver: SolverConfig::default(),
            contingencies: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurtailmentPolicy {
    /// Unserved demand is allowed at a penalty cost
    #[default]
    Penalized,
    /// Demand must be met; shortfall makes the step infeasible
    Forbidden,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CurtailmentConfig {
    #[serde(default)]
    pub policy: CurtailmentPolicy,
    /// Cost per MWh of unserved demand unless a consumer overrides it
    #[serde(default = "default_curtailment_penalty")]
    pub penalty: f64,
}

impl Default for CurtailmentConfig {
    fn default() -> Self {
        Self {
            policy: CurtailmentPolicy::default(),
            penalty: default_curtailment_penalty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    #[serde(default)]
    pub terminal: TerminalPolicy,
    /// Slack allowed on post-solve levels before they are rejected (MWh)
    #[serde(default = "default_storage_tolerance")]
    pub tolerance: f64,
    /// Replaces the initial level of the named units (MWh)
    #[serde(default)]
    pub initial_levels: BTreeMap<StorageId, f64>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            terminal: TerminalPolicy::default(),
            tolerance: default_storage_tolerance(),
            initial_levels: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SolverConfig {
    #[serde(default)]
    pub backend: SolverKind,
    /// Backends tried in order when the primary is unavailable
    #[serde(default)]
    pub fallback: Vec<SolverKind>,
    #[serde(default = "default_solver_tolerance")]
    pub tolerance: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default)]
    pub time_limit_secs: Option<f64>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            backend: SolverKind::default(),
            fallback: Vec::new(),
            tolerance: default_solver_tolerance(),
            max_iterations: default_max_iterations(),
            time_limit_secs: None,
        }
    }
}

impl SolverConfig {
    pub fn chain(&self) -> SolverChain {
        SolverChain::from_kinds(self.backend, &self.fallback)
    }

    pub fn options(&self) -> SolveOptions {
        SolveOptions {
            tolerance: self.tolerance,
            max_iterations: self.max_iterations,
            time_limit: self
                .time_limit_secs
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok()),
        }
    }
}

/// Named set of branches taken out of service together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Contingency {
    pub id: String,
    pub branches: Vec<BranchId>,
}

impl RunConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(text).map_err(|e| ConfigError::single(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::single(format!("reading {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::single(e.to_string()))
    }

    /// Check every option and report all problems together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();
        let mut positive = |name: &str, value: f64| {
            if !(value.is_finite() && value > 0.0) {
                problems.push(format!("{name} must be a positive number, got {value}"));
            }
        };
        positive("time_delta", self.time_delta);
        positive("base_mva", self.base_mva);
        positive("balance_tolerance", self.balance_tolerance);
        positive("storage.tolerance", self.storage.tolerance);
        positive("solver.tolerance", self.solver.tolerance);
        if let Some(limit) = self.solver.time_limit_secs {
            positive("solver.time_limit_secs", limit);
            if limit.is_finite() && Duration::try_from_secs_f64(limit).is_err() {
                problems.push(format!("solver.time_limit_secs = {limit} is too large"));
            }
        }

        if self.steps == Some(0) {
            problems.push("steps must be at least 1".to_string());
        }
        if !(self.spill_penalty.is_finite() && self.spill_penalty >= 0.0) {
            problems.push(format!(
                "spill_penalty must be a non-negative number, got {}",
                self.spill_penalty
            ));
        }
        if self.curtailment.policy == CurtailmentPolicy::Penalized
            && !(self.curtailment.penalty.is_finite() && self.curtailment.penalty > 0.0)
        {
            problems.push(format!(
                "curtailment.penalty must be a positive number, got {}",
                self.curtailment.penalty
            ));
        }
        if self.solver.max_iterations == 0 {
            problems.push("solver.max_iterations must be at least 1".to_string());
        }
        for (unit, level) in &self.storage.initial_levels {
            if !(level.is_finite() && *level >= 0.0) {
                problems.push(format!(
                    "storage.initial_levels.{unit} must be a non-negative number, got {level}"
                ));
            }
        }

        let mut seen = Vec::new();
        for contingency in &self.contingencies {
            if contingency.id.trim().is_empty() {
                problems.push("contingency id must not be empty".to_string());
            } else if contingency.id == BASE_SCENARIO {
                problems.push(format!("contingency id '{BASE_SCENARIO}' is reserved"));
            } else if seen.contains(&contingency.id.as_str()) {
                problems.push(format!("duplicate contingency id '{}'", contingency.id));
            } else {
                seen.push(contingency.id.as_str());
            }
            if contingency.branches.is_empty() {
                problems.push(format!(
                    "contingency '{}' lists no branches",
                    contingency.id
                ));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError { problems })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunConfig::from_toml_str("").unwrap();
        assert_eq!(config, RunConfig::default());
        assert_eq!(config.time_delta, 1.0);
        assert_eq!(config.base_mva, 100.0);
        assert_eq!(config.curtailment.policy, CurtailmentPolicy::Penalized);
        assert_eq!(config.solver.backend, SolverKind::Clarabel);
        assert_eq!(config.storage.terminal, TerminalPolicy::Free);
    }

    #[test]
    fn test_full_config_parsing() {
        let text = r#"
            steps = 24
            time_delta = 0.5

            [curtailment]
            policy = "forbidden"

            [storage]
            terminal = "match_initial"
            initial_levels = { res = 40.0 }

            [solver]
            backend = "highs"
            fallback = ["clarabel"]
            time_limit_secs = 30.0

            [[contingencies]]
            id = "n-1-ab"
            branches = ["AB"]
        "#;
        let config = RunConfig::from_toml_str(text).unwrap();
        assert_eq!(config.steps, Some(24));
        assert_eq!(config.curtailment.policy, CurtailmentPolicy::Forbidden);
        assert_eq!(config.storage.terminal, TerminalPolicy::MatchInitial);
        assert_eq!(config.storage.initial_levels[&StorageId::new("res")], 40.0);
        assert_eq!(config.solver.chain().backend_ids(), vec!["highs", "clarabel"]);
        assert_eq!(
            config.solver.options().time_limit,
            Some(Duration::from_secs(30))
        );
        assert_eq!(config.contingencies[0].branches, vec![BranchId::new("AB")]);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let err = RunConfig::from_toml_str("stepz = 3").unwrap_err();
        assert!(err.to_string().contains("stepz"), "{err}");

        let err = RunConfig::from_toml_str("[solver]\nbackend = \"cplex\"").unwrap_err();
        assert!(err.to_string().contains("cplex"), "{err}");
    }

    #[test]
    fn test_validate_reports_all_problems() {
        let mut config = RunConfig::default();
        config.steps = Some(0);
        config.time_delta = -1.0;
        config.spill_penalty = f64::NAN;
        config.curtailment.penalty = 0.0;
        config.contingencies = vec![
            Contingency {
                id: "c1".into(),
                branches: vec![],
            },
            Contingency {
                id: "c1".into(),
                branches: vec![BranchId::new("AB")],
            },
        ];
        let err = config.validate().unwrap_err();
        assert_eq!(err.problems.len(), 6, "{err}");
    }

    #[test]
    fn test_oversized_time_limit_is_rejected() {
        let mut config = RunConfig::default();
        config.solver.time_limit_secs = Some(1e30);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("is too large"), "{err}");
        assert_eq!(err.problems.len(), 1);
        assert_eq!(config.solver.options().time_limit, None);

        config.solver.time_limit_secs = Some(90.0);
        config.validate().unwrap();
        assert_eq!(config.solver.options().time_limit, Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_base_scenario_id_is_reserved() {
        let text = "[[contingencies]]\nid = \"base\"\nbranches = [\"AB\"]\n";
        let err = RunConfig::from_toml_str(text).unwrap_err();
        assert!(err.to_string().contains("reserved"), "{err}");
    }

    #[test]
    fn test_forbidden_policy_ignores_penalty() {
        let mut config = RunConfig::default();
        config.curtailment.policy = CurtailmentPolicy::Forbidden;
        config.curtailment.penalty = 0.0;
        config.validate().unwrap();
    }

    #[test]
    fn test_round_trip_through_toml() {
        let mut config = RunConfig::default();
        config.steps = Some(12);
        config.storage.terminal = TerminalPolicy::AtLeastInitial;
        let text = config.to_toml_string().unwrap();
        assert_eq!(RunConfig::from_toml_str(&text).unwrap(), config);
    }
}
