//! Per-step resolution of entity parameters against profiles.

use crate::TimeSeriesProvider;
use gama_core::{Diagnostics, EntityRef, GridModel, IssueKind, ProfileId, ValidationError};

/// Parameters of every entity for one step, indexed like the grid tables.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedStep {
    pub step: usize,
    /// Available capacity per generator (MW)
    pub generator_available: Vec<f64>,
    /// Marginal cost per generator (currency/MWh)
    pub generator_cost: Vec<f64>,
    /// Inflexible demand per consumer (MW); the flexible share is served
    /// through the consumer's flexible unit
    pub consumer_demand: Vec<f64>,
    /// Natural inflow per storage unit (MW)
    pub storage_inflow: Vec<f64>,
    /// Storage value before the filling-level adjustment (currency/MWh)
    pub storage_value: Vec<f64>,
    /// Value of consuming flexible load, per flexible unit, before the
    /// filling-level adjustment (currency/MWh)
    pub flexible_value: Vec<f64>,
}

/// Check that every profile the grid references exists, covers `steps`
/// steps, and holds values valid for its use.
///
/// Runs before the first solve so that data problems never surface halfway
/// through a simulation.
pub fn ensure_profiles(
    provider: &dyn TimeSeriesProvider,
    grid: &GridModel,
    steps: usize,
) -> Result<(), ValidationError> {
    let mut diag = Diagnostics::new();
    let references = grid.profile_references();

    if !references.is_empty() && steps > provider.len() {
        diag.error(
            IssueKind::Coverage,
            EntityRef::Grid,
            format!(
                "run needs {steps} steps but time series cover only {}",
                provider.len()
            ),
        );
    }

    let covered = steps.min(provider.len());
    for (profile, usage, entity) in references {
        if !provider.contains(profile) {
            diag.error(
                IssueKind::UnknownReference,
                entity,
                format!("unknown profile '{profile}'"),
            );
            continue;
        }
        if usage.allows_negative() {
            continue;
        }
        let negative = (0..covered).find_map(|step| {
            provider
                .value(profile, step)
                .filter(|v| *v < 0.0)
                .map(|v| (step, v))
        });
        if let Some((step, value)) = negative {
            diag.error(
                IssueKind::OutOfRange,
                entity,
                format!("profile '{profile}' is negative ({value}) at step {step}"),
            );
        }
    }

    ValidationError::check(diag).map(|_| ())
}

fn scale(provider: &dyn TimeSeriesProvider, profile: Option<&ProfileId>, step: usize) -> f64 {
    profile
        .and_then(|p| provider.value(p, step))
        .unwrap_or(1.0)
}

/// Resolve every entity's parameters for `step`.
///
/// Assumes [`ensure_profiles`] has passed; a missing value falls back to a
/// multiplier of one.
pub fn resolve_step(
    grid: &GridModel,
    provider: &dyn TimeSeriesProvider,
    step: usize,
) -> ResolvedStep {
    let generators = grid.generators();
    let storage = grid.storage_units();
    ResolvedStep {
        step,
        generator_available: generators
            .iter()
            .map(|g| g.pmax * scale(provider, g.availability_profile.as_ref(), step))
            .collect(),
        generator_cost: generators
            .iter()
            .map(|g| g.marginal_cost * scale(provider, g.cost_profile.as_ref(), step))
            .collect(),
        consumer_demand: grid
            .consumers()
            .iter()
            .map(|c| {
                let demand = c.demand * scale(provider, c.demand_profile.as_ref(), step);
                demand * (1.0 - c.flexible_fraction())
            })
            .collect(),
        storage_inflow: storage
            .iter()
            .map(|s| s.inflow * scale(provider, s.inflow_profile.as_ref(), step))
            .collect(),
        storage_value: storage
            .iter()
            .map(|s| s.storage_value * scale(provider, s.value_profile.as_ref(), step))
            .collect(),
        flexible_value: grid
            .flexible_units()
            .iter()
            .map(|f| f.storage_value * scale(provider, f.value_profile.as_ref(), step))
            .collect(),
    }
}
