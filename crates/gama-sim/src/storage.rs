//! Storage state between steps.
//!
//! Each unit's state is one scalar, its energy level (MWh). After a step's
//! dispatch is accepted the level moves by
//!
//! ```text
//! level' = level + Δt · (charge · η_c − discharge / η_d + inflow − spill)
//! ```
//!
//! Flexible load is tracked the same way over the grid's flexible units: its
//! backlog is charged by flexible consumption and discharged at the average
//! flexible demand.
//!
//! A result just outside `[0, capacity]` is rounding noise and is clamped.
//! Anything further out means the solved dispatch and the storage model
//! disagree, which is reported instead of corrected.

use crate::error::StorageConsistencyError;
use gama_core::{GridModel, StorageId, StorageUnit};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Constraint on storage levels at the end of the last step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalPolicy {
    #[default]
    Free,
    /// Final level equals the initial level
    MatchInitial,
    /// Final level is at least the initial level
    AtLeastInitial,
}

/// Energy moved in or out of a unit during one step (MW rates).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StorageFlows {
    pub charge: f64,
    pub discharge: f64,
    pub inflow: f64,
    pub spill: f64,
}

/// Flows of one solved step: storage units in grid order, then flexible
/// loads in the order of [`GridModel::flexible_units`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepFlows {
    pub storage: Vec<StorageFlows>,
    pub flexible: Vec<StorageFlows>,
}

/// Levels of every storage unit, indexed like the grid's storage table.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageState {
    levels: Vec<f64>,
}

impl StorageState {
    pub fn new(levels: Vec<f64>) -> Self {
        Self { levels }
    }

    /// Initial levels from the grid with per-unit overrides applied.
    pub fn initial(grid: &GridModel, overrides: &BTreeMap<StorageId, f64>) -> Self {
        let levels = grid
            .storage_units()
            .iter()
            .map(|unit| overrides.get(&unit.id).copied().unwrap_or(unit.initial_level))
            .collect();
        Self { levels }
    }

    /// Initial backlog of every flexible consumer.
    pub fn flexible(grid: &GridModel) -> Self {
        Self {
            levels: grid.flexible_units().iter().map(|u| u.initial_level).collect(),
        }
    }

    pub fn levels(&self) -> &[f64] {
        &self.levels
    }

    pub fn level(&self, unit: usize) -> f64 {
        self.levels[unit]
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// Level after one step.
pub fn transition(
    unit: &StorageUnit,
    level: f64,
    flows: StorageFlows,
    time_delta: f64,
    tolerance: f64,
) -> Result<f64, StorageConsistencyError> {
    let next = level
        + time_delta
            * (flows.charge * unit.charge_efficiency
                - flows.discharge / unit.discharge_efficiency
                + flows.inflow
                - flows.spill);

    let capacity = unit.energy_capacity;
    if next < -tolerance || next > capacity + tolerance || !next.is_finite() {
        return Err(StorageConsistencyError {
            level: next,
            capacity,
            tolerance,
        });
    }
    Ok(next.clamp(0.0, capacity))
}

/// Applies [`transition`] to every unit of a grid.
#[derive(Debug, Clone, Copy)]
pub struct StorageTracker<'a> {
    units: &'a [StorageUnit],
    time_delta: f64,
    tolerance: f64,
}

impl<'a> StorageTracker<'a> {
    pub fn new(grid: &'a GridModel, time_delta: f64, tolerance: f64) -> Self {
        Self {
            units: grid.storage_units(),
            time_delta,
            tolerance,
        }
    }

    /// Tracker over the flexible-load backlogs instead of the storage table
    pub fn flexible(grid: &'a GridModel, time_delta: f64, tolerance: f64) -> Self {
        Self {
            units: grid.flexible_units(),
            time_delta,
            tolerance,
        }
    }

    pub fn unit(&self, index: usize) -> &'a StorageUnit {
        &self.units[index]
    }

    /// Next state, or the index of the first unit whose level is out of bounds.
    pub fn advance(
        &self,
        state: &StorageState,
        flows: &[StorageFlows],
    ) -> Result<StorageState, (usize, StorageConsistencyError)> {
        let levels = self
            .units
            .iter()
            .zip(state.levels())
            .zip(flows)
            .enumerate()
            .map(|(i, ((unit, &level), &flow))| {
                transition(unit, level, flow, self.time_delta, self.tolerance).map_err(|e| (i, e))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(StorageState::new(levels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gama_core::{Consumer, FlexibleLoad, GridTables, Node};

    fn battery() -> StorageUnit {
        StorageUnit::at_node("bat", "A", 100.0)
            .with_power_limits(20.0, 20.0)
            .with_efficiencies(0.9, 0.8)
            .with_initial_level(50.0)
    }

    #[test]
    fn test_transition_applies_efficiencies() {
        let unit = battery();
        let charged = transition(
            &unit,
            50.0,
            StorageFlows {
                charge: 10.0,
                ..Default::default()
            },
            1.0,
            1e-6,
        )
        .unwrap();
        assert!((charged - 59.0).abs() < 1e-12);

        let discharged = transition(
            &unit,
            50.0,
            StorageFlows {
                discharge: 8.0,
                ..Default::default()
            },
            2.0,
            1e-6,
        )
        .unwrap();
        assert!((discharged - 30.0).abs() < 1e-12);
    }

    #[test]
    fn test_transition_inflow_and_spill() {
        let unit = StorageUnit::at_node("res", "A", 10.0);
        let flows = StorageFlows {
            inflow: 6.0,
            spill: 2.0,
            ..Default::default()
        };
        assert_eq!(transition(&unit, 5.0, flows, 1.0, 1e-6).unwrap(), 9.0);
    }

    #[test]
    fn test_transition_clamps_rounding_noise() {
        let unit = battery();
        let flows = StorageFlows {
            discharge: 40.0 + 1e-7,
            ..Default::default()
        };
        assert_eq!(transition(&unit, 50.0, flows, 1.0, 1e-4).unwrap(), 0.0);
    }

    #[test]
    fn test_transition_rejects_real_violations() {
        let unit = battery();
        let flows = StorageFlows {
            charge: 60.0,
            ..Default::default()
        };
        let err = transition(&unit, 50.0, flows, 1.0, 1e-4).unwrap_err();
        assert!((err.level - 104.0).abs() < 1e-9);
        assert_eq!(err.capacity, 100.0);
    }

    #[test]
    fn test_tracker_reports_failing_unit() {
        let tables = GridTables::default()
            .with_node(Node::new("A", "x"))
            .with_storage(battery())
            .with_storage(StorageUnit::at_node("small", "A", 1.0).with_power_limits(5.0, 5.0));
        let grid = GridModel::new(tables).unwrap();
        let tracker = StorageTracker::new(&grid, 1.0, 1e-6);
        let state = StorageState::initial(&grid, &BTreeMap::new());
        assert_eq!(state.levels(), &[50.0, 0.0]);

        let ok = tracker
            .advance(
                &state,
                &[
                    StorageFlows {
                        charge: 10.0,
                        ..Default::default()
                    },
                    StorageFlows {
                        charge: 1.0,
                        ..Default::default()
                    },
                ],
            )
            .unwrap();
        assert_eq!(ok.levels(), &[59.0, 1.0]);

        let (unit, _) = tracker
            .advance(
                &ok,
                &[
                    StorageFlows::default(),
                    StorageFlows {
                        charge: 3.0,
                        ..Default::default()
                    },
                ],
            )
            .unwrap_err();
        assert_eq!(unit, 1);
    }

    #[test]
    fn test_initial_overrides() {
        let tables = GridTables::default()
            .with_node(Node::new("A", "x"))
            .with_storage(battery());
        let grid = GridModel::new(tables).unwrap();
        let overrides = BTreeMap::from([(StorageId::new("bat"), 75.0)]);
        assert_eq!(StorageState::initial(&grid, &overrides).levels(), &[75.0]);
    }

    #[test]
    fn test_flexible_backlog_drains_at_average_demand() {
        let flex = FlexibleLoad::new(0.2, 2.0, 30.0).with_on_off_ratio(2.0);
        let tables = GridTables::default()
            .with_node(Node::new("A", "x"))
            .with_consumer(Consumer::new("ev", "A", 100.0).with_flexibility(flex));
        let grid = GridModel::new(tables).unwrap();
        let tracker = StorageTracker::flexible(&grid, 1.0, 1e-6);
        let state = StorageState::flexible(&grid);
        assert_eq!(state.levels(), &[20.0]);

        let drained = tracker
            .advance(
                &state,
                &[StorageFlows {
                    discharge: 20.0,
                    ..Default::default()
                }],
            )
            .unwrap();
        assert_eq!(drained.levels(), &[0.0]);

        let (unit, _) = tracker
            .advance(
                &drained,
                &[StorageFlows {
                    discharge: 20.0,
                    ..Default::default()
                }],
            )
            .unwrap_err();
        assert_eq!(unit, 0);
        assert_eq!(tracker.unit(0).id.as_str(), "ev");
    }
}
