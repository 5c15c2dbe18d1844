//! Per-step dispatch linear program.
//!
//! Columns (MW unless noted):
//!
//! | Block | Bounds |
//! |-------|--------|
//! | generator output `p_g` | `[min(pmin, avail), avail]` |
//! | branch flow `f_b` | free, limited by rows; fixed 0 when out of service |
//! | node angle `θ_n` (rad) | free; fixed 0 at each island's reference |
//! | storage charge `c_s` | `[0, charge_limit]` |
//! | storage discharge `d_s` | `[0, discharge_limit]`, node-attached units only |
//! | storage spill `w_s` | `[0, inflow]` |
//! | curtailment `u_c` | `[0, demand]`, fixed 0 when curtailment is forbidden |
//! | flexible consumption `x_k` | `[0, on_off_ratio · average flexible demand]` |
//!
//! Rows, in this order:
//!
//! 1. balance per node: `Σp + Σd − Σc − Σx + inflow − outflow + Σu = demand`;
//!    its dual is the nodal price
//! 2. per in-service branch: the DC flow equation (AC only) and the
//!    forward/reverse limit rows (finite limits only), whose duals give
//!    the capacity sensitivity
//! 3. per storage unit: the energy bounds after the step, plus the terminal
//!    row on the final step
//! 4. per flexible load: the backlog bounds after the step, which drains at
//!    the average flexible demand
//!
//! Reservoirs (storage attached to a generator) use the generator column as
//! their discharge. Charging is priced at the storage value less the unit's
//! charge deadband; flexible consumption at the flexibility value. Both
//! values are scaled by the filling curve at the start-of-step level.

use crate::config::{CurtailmentPolicy, RunConfig};
use crate::error::{SimError, SimResult};
use crate::results::StepResult;
use crate::storage::{StepFlows, StorageFlows, StorageState, TerminalPolicy};
use gama_core::{StorageUnit, TopologyView};
use gama_lp::{ConstraintSense, LinearProgram, LpSolution, RowId, VarId};
use gama_ts::ResolvedStep;
use rayon::prelude::*;

/// Parameters the formulator takes from the run configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct FormulationSettings {
    pub time_delta: f64,
    pub base_mva: f64,
    pub curtailment: CurtailmentPolicy,
    pub curtailment_penalty: f64,
    pub spill_penalty: f64,
    pub terminal: TerminalPolicy,
}

impl From<&RunConfig> for FormulationSettings {
    fn from(config: &RunConfig) -> Self {
        Self {
            time_delta: config.time_delta,
            base_mva: config.base_mva,
            curtailment: config.curtailment.policy,
            curtailment_penalty: config.curtailment.penalty,
            spill_penalty: config.spill_penalty,
            terminal: config.storage.terminal,
        }
    }
}

/// Where every entity's columns and rows live in a step problem.
#[derive(Debug, Clone, Default)]
pub struct VariableMap {
    pub generator: Vec<VarId>,
    pub flow: Vec<VarId>,
    pub angle: Vec<VarId>,
    pub charge: Vec<VarId>,
    /// `None` for reservoirs, whose discharge is the generator column
    pub discharge: Vec<Option<VarId>>,
    pub spill: Vec<VarId>,
    pub curtailment: Vec<VarId>,
    pub balance: Vec<RowId>,
    pub flow_equation: Vec<Option<RowId>>,
    pub forward_limit: Vec<Option<RowId>>,
    pub reverse_limit: Vec<Option<RowId>>,
    pub storage_upper: Vec<RowId>,
    pub storage_lower: Vec<RowId>,
    pub storage_terminal: Vec<Option<RowId>>,
    pub flexible: Vec<VarId>,
    pub flexible_upper: Vec<RowId>,
    pub flexible_lower: Vec<RowId>,
}

/// A formulated step ready for the solver.
#[derive(Debug, Clone)]
pub struct StepProblem {
    pub step: usize,
    pub lp: LinearProgram,
    pub map: VariableMap,
    /// Effective storage value per unit after the filling-curve adjustment
    pub storage_value: Vec<f64>,
    /// Effective flexibility value per flexible load, adjusted the same way
    pub flexible_value: Vec<f64>,
}

pub struct DispatchFormulator<'a> {
    view: &'a TopologyView<'a>,
    settings: FormulationSettings,
    initial_levels: &'a StorageState,
}

type Terms = Vec<(VarId, f64)>;

impl<'a> DispatchFormulator<'a> {
    pub fn new(
        view: &'a TopologyView<'a>,
        settings: FormulationSettings,
        initial_levels: &'a StorageState,
    ) -> Self {
        Self {
            view,
            settings,
            initial_levels,
        }
    }

    pub fn settings(&self) -> &FormulationSettings {
        &self.settings
    }

    fn check_inputs(
        &self,
        resolved: &ResolvedStep,
        levels: &StorageState,
        flexible_levels: &StorageState,
    ) -> SimResult<()> {
        let grid = self.view.grid();
        let n_gen = grid.generators().len();
        let n_storage = grid.storage_units().len();
        let n_flexible = grid.flexible_units().len();
        let sizes = [
            ("generator", resolved.generator_available.len(), n_gen),
            ("generator cost", resolved.generator_cost.len(), n_gen),
            ("consumer", resolved.consumer_demand.len(), grid.consumers().len()),
            ("storage inflow", resolved.storage_inflow.len(), n_storage),
            ("storage value", resolved.storage_value.len(), n_storage),
            ("storage level", levels.len(), n_storage),
            ("initial level", self.initial_levels.len(), n_storage),
            ("flexible value", resolved.flexible_value.len(), n_flexible),
            ("flexible level", flexible_levels.len(), n_flexible),
        ];
        for (what, got, expected) in sizes {
            if got != expected {
                return Err(SimError::Formulation {
                    step: resolved.step,
                    message: format!("{got} {what} values for {expected} entities"),
                });
            }
        }
        Ok(())
    }

    /// Build the linear program for one step.
    ///
    /// `levels` and `flexible_levels` are the storage levels and flexible
    /// backlogs at the start of the step; `last` adds the terminal storage
    /// rows.
    pub fn formulate(
        &self,
        resolved: &ResolvedStep,
        levels: &StorageState,
        flexible_levels: &StorageState,
        last: bool,
    ) -> SimResult<StepProblem> {
        self.check_inputs(resolved, levels, flexible_levels)?;
        let grid = self.view.grid();
        let s = &self.settings;
        let dt = s.time_delta;
        let units = grid.storage_units();
        let flexible = grid.flexible_units();

        let storage_value = effective_values(units, &resolved.storage_value, levels);
        let flexible_value = effective_values(flexible, &resolved.flexible_value, flexible_levels);

        let n_cols = grid.generators().len()
            + grid.branches().len()
            + grid.nodes().len()
            + 3 * units.len()
            + grid.consumers().len()
            + flexible.len();
        let n_rows = grid.nodes().len()
            + 3 * grid.branches().len()
            + 3 * units.len()
            + 2 * flexible.len();
        let mut lp = LinearProgram::with_capacity(n_cols, n_rows);
        let mut map = VariableMap::default();

        // Columns
        for (g, generator) in grid.generators().iter().enumerate() {
            let available = resolved.generator_available[g];
            let mut cost = resolved.generator_cost[g];
            if let Some(unit) = grid.generator_storage(g) {
                cost += storage_value[unit] / units[unit].discharge_efficiency;
            }
            map.generator.push(lp.add_variable(
                format!("p[{}]", generator.id),
                generator.pmin.min(available),
                available,
                cost,
            ));
        }
        for (b, branch) in grid.branches().iter().enumerate() {
            let name = format!("f[{}]", branch.id);
            map.flow.push(if self.view.is_in_service(b) {
                lp.add_variable(name, f64::NEG_INFINITY, f64::INFINITY, 0.0)
            } else {
                lp.add_fixed(name, 0.0, 0.0)
            });
        }
        for (n, node) in grid.nodes().iter().enumerate() {
            let name = format!("theta[{}]", node.id);
            map.angle.push(if self.view.is_reference(n) {
                lp.add_fixed(name, 0.0, 0.0)
            } else {
                lp.add_variable(name, f64::NEG_INFINITY, f64::INFINITY, 0.0)
            });
        }
        for (i, unit) in units.iter().enumerate() {
            map.charge.push(lp.add_variable(
                format!("c[{}]", unit.id),
                0.0,
                unit.charge_limit,
                -(storage_value[i] * unit.charge_efficiency - unit.charge_deadband),
            ));
            map.discharge.push(match grid.storage_generator(i) {
                Some(_) => None,
                None => Some(lp.add_variable(
                    format!("d[{}]", unit.id),
                    0.0,
                    unit.discharge_limit,
                    storage_value[i] / unit.discharge_efficiency,
                )),
            });
            map.spill.push(lp.add_variable(
                format!("w[{}]", unit.id),
                0.0,
                resolved.storage_inflow[i],
                s.spill_penalty,
            ));
        }
        for (c, consumer) in grid.consumers().iter().enumerate() {
            let name = format!("u[{}]", consumer.id);
            map.curtailment.push(match s.curtailment {
                CurtailmentPolicy::Penalized => lp.add_variable(
                    name,
                    0.0,
                    resolved.consumer_demand[c],
                    consumer.curtailment_cost.unwrap_or(s.curtailment_penalty),
                ),
                CurtailmentPolicy::Forbidden => lp.add_fixed(name, 0.0, 0.0),
            });
        }
        for (k, unit) in flexible.iter().enumerate() {
            map.flexible.push(lp.add_variable(
                format!("x[{}]", unit.id),
                0.0,
                unit.charge_limit,
                -flexible_value[k],
            ));
        }

        // Node balance rows, assembled in parallel and added in node order
        let balance_rows: Vec<(Terms, f64)> = (0..grid.nodes().len())
            .into_par_iter()
            .map(|n| {
                let at = grid.entities_at(n);
                let mut terms = Vec::new();
                for &g in &at.generators {
                    terms.push((map.generator[g], 1.0));
                }
                for &u in &at.storage {
                    if let Some(d) = map.discharge[u] {
                        terms.push((d, 1.0));
                    }
                    terms.push((map.charge[u], -1.0));
                }
                for &b in &at.branches {
                    let (from, to) = grid.branch_ends(b);
                    // Self-loops are rejected by the grid model
                    if to == n {
                        terms.push((map.flow[b], 1.0));
                    } else if from == n {
                        terms.push((map.flow[b], -1.0));
                    }
                }
                let mut demand = 0.0;
                for &c in &at.consumers {
                    terms.push((map.curtailment[c], 1.0));
                    if let Some(k) = grid.consumer_flexible(c) {
                        terms.push((map.flexible[k], -1.0));
                    }
                    demand += resolved.consumer_demand[c];
                }
                (terms, demand)
            })
            .collect();
        for (n, (terms, demand)) in balance_rows.into_iter().enumerate() {
            map.balance.push(lp.add_constraint(
                format!("balance[{}]", grid.nodes()[n].id),
                terms,
                ConstraintSense::Equal,
                demand,
            ));
        }

        // Branch rows
        let base_mva = s.base_mva;
        let branch_rows: Vec<Vec<(&'static str, Terms, ConstraintSense, f64)>> =
            (0..grid.branches().len())
                .into_par_iter()
                .map(|b| {
                    if !self.view.is_in_service(b) {
                        return Vec::new();
                    }
                    let branch = &grid.branches()[b];
                    let (from, to) = grid.branch_ends(b);
                    let f = map.flow[b];
                    let mut rows = Vec::with_capacity(3);
                    if branch.is_ac() {
                        let k = base_mva * branch.susceptance();
                        rows.push((
                            "flow",
                            vec![(f, 1.0), (map.angle[from], -k), (map.angle[to], k)],
                            ConstraintSense::Equal,
                            0.0,
                        ));
                    }
                    if branch.forward_limit().is_finite() {
                        rows.push((
                            "fwd",
                            vec![(f, 1.0)],
                            ConstraintSense::LessEqual,
                            branch.forward_limit(),
                        ));
                    }
                    if branch.reverse_limit().is_finite() {
                        rows.push((
                            "rev",
                            vec![(f, 1.0)],
                            ConstraintSense::GreaterEqual,
                            -branch.reverse_limit(),
                        ));
                    }
                    rows
                })
                .collect();
        map.flow_equation = vec![None; grid.branches().len()];
        map.forward_limit = vec![None; grid.branches().len()];
        map.reverse_limit = vec![None; grid.branches().len()];
        for (b, rows) in branch_rows.into_iter().enumerate() {
            let id = &grid.branches()[b].id;
            for (label, terms, sense, rhs) in rows {
                let row = lp.add_constraint(format!("{label}[{id}]"), terms, sense, rhs);
                match label {
                    "flow" => map.flow_equation[b] = Some(row),
                    "fwd" => map.forward_limit[b] = Some(row),
                    _ => map.reverse_limit[b] = Some(row),
                }
            }
        }

        // Storage rows: 0 ≤ level + Δt(η_c c − d/η_d + inflow − w) ≤ capacity
        for (i, unit) in units.iter().enumerate() {
            let discharge = match map.discharge[i] {
                Some(d) => d,
                None => match grid.storage_generator(i) {
                    Some(g) => map.generator[g],
                    None => {
                        return Err(SimError::Formulation {
                            step: resolved.step,
                            message: format!("storage {} has no discharge column", unit.id),
                        })
                    }
                },
            };
            let terms = vec![
                (map.charge[i], dt * unit.charge_efficiency),
                (discharge, -dt / unit.discharge_efficiency),
                (map.spill[i], -dt),
            ];
            let start = levels.level(i) + dt * resolved.storage_inflow[i];
            map.storage_upper.push(lp.add_constraint(
                format!("level_max[{}]", unit.id),
                terms.clone(),
                ConstraintSense::LessEqual,
                unit.energy_capacity - start,
            ));
            map.storage_lower.push(lp.add_constraint(
                format!("level_min[{}]", unit.id),
                terms.clone(),
                ConstraintSense::GreaterEqual,
                -start,
            ));
            let target = self.initial_levels.level(i) - start;
            map.storage_terminal.push(match (last, s.terminal) {
                (false, _) | (true, TerminalPolicy::Free) => None,
                (true, TerminalPolicy::MatchInitial) => Some(lp.add_constraint(
                    format!("terminal[{}]", unit.id),
                    terms,
                    ConstraintSense::Equal,
                    target,
                )),
                (true, TerminalPolicy::AtLeastInitial) => Some(lp.add_constraint(
                    format!("terminal[{}]", unit.id),
                    terms,
                    ConstraintSense::GreaterEqual,
                    target,
                )),
            });
        }

        // Flexible backlog: 0 ≤ level + Δt(x − average) ≤ capacity
        for (k, unit) in flexible.iter().enumerate() {
            let terms = vec![(map.flexible[k], dt)];
            let start = flexible_levels.level(k) - dt * unit.discharge_limit;
            map.flexible_upper.push(lp.add_constraint(
                format!("flex_max[{}]", unit.id),
                terms.clone(),
                ConstraintSense::LessEqual,
                unit.energy_capacity - start,
            ));
            map.flexible_lower.push(lp.add_constraint(
                format!("flex_min[{}]", unit.id),
                terms,
                ConstraintSense::GreaterEqual,
                -start,
            ));
        }

        Ok(StepProblem {
            step: resolved.step,
            lp,
            map,
            storage_value,
            flexible_value,
        })
    }

    /// Read dispatch, flows and prices out of a solved step.
    ///
    /// Storage and flexible levels are left empty; the caller fills them in
    /// once the transitions have been checked.
    pub fn extract(
        &self,
        resolved: &ResolvedStep,
        problem: &StepProblem,
        solution: &LpSolution,
    ) -> (StepResult, StepFlows) {
        let grid = self.view.grid();
        let map = &problem.map;

        let generator_output: Vec<f64> =
            map.generator.iter().map(|&v| solution.value(v)).collect();
        let generator_spill = grid
            .generators()
            .iter()
            .enumerate()
            .map(|(g, generator)| {
                if generator.inflow_constrained && grid.generator_storage(g).is_none() {
                    (resolved.generator_available[g] - generator_output[g]).max(0.0)
                } else {
                    0.0
                }
            })
            .collect();

        let storage: Vec<StorageFlows> = (0..grid.storage_units().len())
            .map(|i| StorageFlows {
                charge: solution.value(map.charge[i]),
                discharge: match (map.discharge[i], grid.storage_generator(i)) {
                    (Some(d), _) => solution.value(d),
                    (None, Some(g)) => generator_output[g],
                    (None, None) => 0.0,
                },
                inflow: resolved.storage_inflow[i],
                spill: solution.value(map.spill[i]),
            })
            .collect();
        let flexible: Vec<StorageFlows> = grid
            .flexible_units()
            .iter()
            .zip(&map.flexible)
            .map(|(unit, &x)| StorageFlows {
                charge: solution.value(x),
                discharge: unit.discharge_limit,
                ..Default::default()
            })
            .collect();

        let dual = |row: Option<RowId>| row.map_or(0.0, |r| solution.dual(r));
        let branch_sensitivity = (0..grid.branches().len())
            .map(|b| -dual(map.forward_limit[b]) + dual(map.reverse_limit[b]))
            .collect();

        let result = StepResult {
            step: problem.step,
            objective: solution.objective,
            backend: solution.backend.to_string(),
            iterations: solution.iterations,
            solve_time_ms: solution.solve_time_ms,
            generator_output,
            generator_spill,
            branch_flow: map.flow.iter().map(|&v| solution.value(v)).collect(),
            branch_sensitivity,
            node_angle: map.angle.iter().map(|&v| solution.value(v)).collect(),
            nodal_price: map.balance.iter().map(|&r| solution.dual(r)).collect(),
            consumer_demand: resolved.consumer_demand.clone(),
            consumer_curtailment: map.curtailment.iter().map(|&v| solution.value(v)).collect(),
            storage_charge: storage.iter().map(|f| f.charge).collect(),
            storage_discharge: storage.iter().map(|f| f.discharge).collect(),
            storage_spill: storage.iter().map(|f| f.spill).collect(),
            storage_level: Vec::new(),
            storage_value: problem.storage_value.clone(),
            flexible_consumption: flexible.iter().map(|f| f.charge).collect(),
            flexible_level: Vec::new(),
            flexible_value: problem.flexible_value.clone(),
        };
        (result, StepFlows { storage, flexible })
    }
}

/// Reference values scaled by each unit's filling curve at `levels`
fn effective_values(units: &[StorageUnit], values: &[f64], levels: &StorageState) -> Vec<f64> {
    units
        .iter()
        .zip(values)
        .enumerate()
        .map(|(i, (unit, &value))| {
            let fraction = unit.filling_fraction(levels.level(i));
            let multiplier = unit
                .filling_curve
                .as_ref()
                .map_or(1.0, |curve| curve.evaluate(fraction));
            value * multiplier
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gama_core::{Branch, Consumer, FlexibleLoad, Generator, GridModel, GridTables, Node};
    use gama_ts::{resolve_step, TimeSeriesTable};
    use std::collections::BTreeMap;

    fn settings() -> FormulationSettings {
        FormulationSettings::from(&RunConfig::default())
    }

    fn grid() -> GridModel {
        let tables = GridTables::default()
            .with_node(Node::new("A", "north"))
            .with_node(Node::new("B", "south"))
            .with_node(Node::new("C", "south"))
            .with_branch(Branch::ac("AB", "A", "B", 0.1, 50.0))
            .with_branch(Branch::dc("BC", "B", "C", 30.0))
            .with_branch(Branch::ac("AC", "A", "C", 0.2, f64::INFINITY).out_of_service())
            .with_generator(Generator::new("g1", "A", 100.0, 10.0))
            .with_generator(Generator::new("hydro", "C", 40.0, 0.0).inflow_constrained())
            .with_consumer(Consumer::new("load", "B", 80.0))
            .with_storage(
                StorageUnit::at_node("bat", "B", 20.0)
                    .with_power_limits(5.0, 5.0)
                    .with_storage_value(30.0),
            )
            .with_storage(
                StorageUnit::at_generator("res", "hydro", 500.0)
                    .with_initial_level(250.0)
                    .with_inflow(10.0, None)
                    .with_storage_value(20.0),
            );
        GridModel::new(tables).unwrap()
    }

    #[test]
    fn test_layout_and_row_order() {
        let grid = grid();
        let view = grid.base_view();
        let initial = StorageState::initial(&grid, &BTreeMap::new());
        let backlog = StorageState::flexible(&grid);
        let formulator = DispatchFormulator::new(&view, settings(), &initial);
        let resolved = resolve_step(&grid, &TimeSeriesTable::default(), 0);
        let problem = formulator.formulate(&resolved, &initial, &backlog, false).unwrap();
        let lp = &problem.lp;
        let map = &problem.map;

        // 2 generators, 3 flows, 3 angles, 2 charge, 1 discharge, 2 spill, 1 curtailment
        assert_eq!(lp.num_variables(), 14);
        assert_eq!(map.discharge[1], None);
        assert!(map.discharge[0].is_some());

        // Balance rows first, in node order
        let names: Vec<&str> = lp.constraints().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(&names[..3], &["balance[A]", "balance[B]", "balance[C]"]);
        assert_eq!(
            &names[3..7],
            &["flow[AB]", "fwd[AB]", "rev[AB]", "fwd[BC]"]
        );
        assert_eq!(names.len(), 3 + 5 + 4);

        // Out-of-service branch is pinned, DC link has no flow equation
        assert!(lp.variable(map.flow[2]).is_fixed());
        assert!(map.flow_equation[1].is_none());

        // A is the reference of island {A, B}; C is alone
        assert!(lp.variable(map.angle[0]).is_fixed());
        assert!(!lp.variable(map.angle[1]).is_fixed());
        assert!(lp.variable(map.angle[2]).is_fixed());

        // Reservoir value is priced into the generator column
        assert_eq!(lp.variable(map.generator[1]).cost, 20.0);
        assert_eq!(lp.variable(map.charge[0]).cost, -30.0);
    }

    #[test]
    fn test_flow_equation_uses_base_mva() {
        let grid = grid();
        let view = grid.base_view();
        let initial = StorageState::initial(&grid, &BTreeMap::new());
        let backlog = StorageState::flexible(&grid);
        let formulator = DispatchFormulator::new(&view, settings(), &initial);
        let resolved = resolve_step(&grid, &TimeSeriesTable::default(), 0);
        let problem = formulator.formulate(&resolved, &initial, &backlog, false).unwrap();
        let row = problem.lp.constraint(problem.map.flow_equation[0].unwrap());
        let theta_a = row
            .terms
            .iter()
            .find(|(v, _)| *v == problem.map.angle[0])
            .map(|(_, k)| *k)
            .unwrap();
        assert!((theta_a + 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_terminal_rows_only_on_last_step() {
        let grid = grid();
        let view = grid.base_view();
        let initial = StorageState::initial(&grid, &BTreeMap::new());
        let backlog = StorageState::flexible(&grid);
        let mut s = settings();
        s.terminal = TerminalPolicy::AtLeastInitial;
        let formulator = DispatchFormulator::new(&view, s, &initial);
        let resolved = resolve_step(&grid, &TimeSeriesTable::default(), 0);

        let early = formulator.formulate(&resolved, &initial, &backlog, false).unwrap();
        assert!(early.map.storage_terminal.iter().all(Option::is_none));

        let last = formulator.formulate(&resolved, &initial, &backlog, true).unwrap();
        let row = last.lp.constraint(last.map.storage_terminal[1].unwrap());
        assert_eq!(row.sense, ConstraintSense::GreaterEqual);
        // initial − (level + Δt·inflow) = 250 − 260
        assert_eq!(row.rhs, -10.0);
    }

    #[test]
    fn test_forbidden_curtailment_pins_columns() {
        let grid = grid();
        let view = grid.base_view();
        let initial = StorageState::initial(&grid, &BTreeMap::new());
        let backlog = StorageState::flexible(&grid);
        let mut s = settings();
        s.curtailment = CurtailmentPolicy::Forbidden;
        let formulator = DispatchFormulator::new(&view, s, &initial);
        let resolved = resolve_step(&grid, &TimeSeriesTable::default(), 0);
        let problem = formulator.formulate(&resolved, &initial, &backlog, false).unwrap();
        assert!(problem.lp.variable(problem.map.curtailment[0]).is_fixed());
    }

    #[test]
    fn test_mismatched_inputs_are_formulation_errors() {
        let grid = grid();
        let view = grid.base_view();
        let initial = StorageState::initial(&grid, &BTreeMap::new());
        let backlog = StorageState::flexible(&grid);
        let formulator = DispatchFormulator::new(&view, settings(), &initial);
        let mut resolved = resolve_step(&grid, &TimeSeriesTable::default(), 4);
        resolved.consumer_demand.clear();
        let err = formulator.formulate(&resolved, &initial, &backlog, false).unwrap_err();
        assert!(matches!(err, SimError::Formulation { step: 4, .. }), "{err}");
    }

    #[test]
    fn test_charge_deadband_lowers_charging_value() {
        let tables = GridTables::default()
            .with_node(Node::new("A", "x"))
            .with_generator(Generator::new("g", "A", 100.0, 10.0))
            .with_consumer(Consumer::new("load", "A", 50.0))
            .with_storage(
                StorageUnit::at_node("pump", "A", 100.0)
                    .with_power_limits(10.0, 10.0)
                    .with_storage_value(30.0)
                    .with_charge_deadband(5.0),
            );
        let grid = GridModel::new(tables).unwrap();
        let view = grid.base_view();
        let initial = StorageState::initial(&grid, &BTreeMap::new());
        let backlog = StorageState::flexible(&grid);
        let formulator = DispatchFormulator::new(&view, settings(), &initial);
        let resolved = resolve_step(&grid, &TimeSeriesTable::default(), 0);
        let problem = formulator.formulate(&resolved, &initial, &backlog, false).unwrap();
        let map = &problem.map;
        assert_eq!(problem.lp.variable(map.charge[0]).cost, -25.0);
        assert_eq!(problem.lp.variable(map.discharge[0].unwrap()).cost, 30.0);
    }

    #[test]
    fn test_flexible_load_columns_and_backlog_rows() {
        let flex = FlexibleLoad::new(0.2, 2.0, 30.0)
            .with_on_off_ratio(2.0)
            .with_initial_fraction(0.25);
        let tables = GridTables::default()
            .with_node(Node::new("A", "x"))
            .with_generator(Generator::new("g", "A", 200.0, 10.0))
            .with_consumer(Consumer::new("ev", "A", 100.0).with_flexibility(flex));
        let grid = GridModel::new(tables).unwrap();
        let view = grid.base_view();
        let initial = StorageState::initial(&grid, &BTreeMap::new());
        let backlog = StorageState::flexible(&grid);
        let formulator = DispatchFormulator::new(&view, settings(), &initial);
        let resolved = resolve_step(&grid, &TimeSeriesTable::default(), 0);
        let problem = formulator.formulate(&resolved, &initial, &backlog, false).unwrap();
        let lp = &problem.lp;
        let x = problem.map.flexible[0];

        let column = lp.variable(x);
        assert_eq!((column.lower, column.upper, column.cost), (0.0, 40.0, -30.0));
        // Inflexible demand only on the right-hand side
        let balance = lp.constraint(problem.map.balance[0]);
        assert!((balance.rhs - 80.0).abs() < 1e-12);
        assert!(balance.terms.contains(&(x, -1.0)));

        // level 10, drain 20: x must cover 10 and may add up to 40 − (−10)
        let upper = lp.constraint(problem.map.flexible_upper[0]);
        let lower = lp.constraint(problem.map.flexible_lower[0]);
        assert!((upper.rhs - 50.0).abs() < 1e-12);
        assert!((lower.rhs - 10.0).abs() < 1e-12);
        assert_eq!(problem.flexible_value, vec![30.0]);
    }
}
