//! Multi-period simulation loop.
//!
//! Steps run strictly in order because storage levels at step t depend on
//! the dispatch of step t−1. Each step resolves the time series, builds the
//! dispatch problem, solves it, checks the answer, advances storage and
//! records the result. Any failure halts the run at that step; steps already
//! recorded stay in the [`ResultStore`].
//!
//! Contingency scenarios are independent of one another and run in parallel.

use crate::config::{CurtailmentPolicy, RunConfig};
use crate::error::{ConfigError, SimError, SimResult};
use crate::formulation::{DispatchFormulator, FormulationSettings};
use crate::results::{ResultStore, StepResult};
use crate::storage::{StorageFlows, StorageState, StorageTracker};
use gama_core::{BranchId, GridModel, ProfileId, StorageUnit, TopologyView};
use gama_lp::{SolveOptions, SolverChain};
use gama_ts::{ensure_profiles, resolve_step, TimeSeriesProvider};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use web_time::Instant;

/// Name of the scenario without extra outages
pub const BASE_SCENARIO: &str = "base";

/// Cooperative stop signal, checked between steps.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub enum RunStatus {
    Completed,
    /// Stopped before `at_step` was started
    Cancelled { at_step: usize },
    Failed(SimError),
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub scenario: String,
    pub status: RunStatus,
    pub steps_requested: usize,
    pub steps_completed: usize,
    /// Steps in which some demand was curtailed
    pub curtailed_steps: usize,
    pub elapsed_ms: u128,
}

impl RunReport {
    pub fn is_completed(&self) -> bool {
        matches!(self.status, RunStatus::Completed)
    }

    pub fn error(&self) -> Option<&SimError> {
        match &self.status {
            RunStatus::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Short status label: `completed`, `cancelled` or the error kind
    pub fn status_label(&self) -> &'static str {
        match &self.status {
            RunStatus::Completed => "completed",
            RunStatus::Cancelled { .. } => "cancelled",
            RunStatus::Failed(err) => err.kind(),
        }
    }

    pub fn into_result(self) -> SimResult<Self> {
        match self.status {
            RunStatus::Failed(err) => Err(err),
            _ => Ok(self),
        }
    }
}

/// Result of one contingency scenario.
#[derive(Debug, Clone)]
pub struct ScenarioOutcome {
    pub id: String,
    pub outages: Vec<BranchId>,
    pub report: RunReport,
    pub results: ResultStore,
}

/// Level bookkeeping for storage units and flexible loads.
struct Trackers<'a> {
    storage: StorageTracker<'a>,
    flexible: StorageTracker<'a>,
}

pub struct Simulation<'a> {
    grid: &'a GridModel,
    series: &'a dyn TimeSeriesProvider,
    config: RunConfig,
    steps: usize,
    initial: StorageState,
    initial_flexible: StorageState,
    chain: SolverChain,
    options: SolveOptions,
}

impl<'a> Simulation<'a> {
    /// Validate everything a run needs before the first solve.
    pub fn new(
        grid: &'a GridModel,
        series: &'a dyn TimeSeriesProvider,
        config: RunConfig,
    ) -> SimResult<Self> {
        config.validate()?;
        check_against_grid(grid, &config)?;

        let steps = config.steps.unwrap_or(series.len());
        if steps == 0 {
            return Err(ConfigError::single(
                "nothing to simulate: `steps` is unset and the time series are empty",
            )
            .into());
        }
        ensure_profiles(series, grid, steps)?;
        check_penalty_margin(grid, series, &config, steps)?;

        let initial = StorageState::initial(grid, &config.storage.initial_levels);
        let initial_flexible = StorageState::flexible(grid);
        let chain = config.solver.chain();
        let options = config.solver.options();
        info!(
            "Prepared {} step(s) over {} nodes, {} branches, {} generators; solvers: {}",
            steps,
            grid.nodes().len(),
            grid.branches().len(),
            grid.generators().len(),
            chain.backend_ids().join(" -> ")
        );

        Ok(Self {
            grid,
            series,
            config,
            steps,
            initial,
            initial_flexible,
            chain,
            options,
        })
    }

    /// Replace the solver chain built from the configuration.
    pub fn with_solver_chain(mut self, chain: SolverChain) -> Self {
        self.chain = chain;
        self
    }

    pub fn grid(&self) -> &'a GridModel {
        self.grid
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn initial_state(&self) -> &StorageState {
        &self.initial
    }

    /// Flexible-load backlogs before the first step
    pub fn initial_flexible_state(&self) -> &StorageState {
        &self.initial_flexible
    }

    pub fn solver_chain(&self) -> &SolverChain {
        &self.chain
    }

    /// Empty store shaped for this grid
    pub fn new_store(&self) -> ResultStore {
        ResultStore::new(self.grid, self.config.time_delta)
    }

    /// Run on the base topology.
    pub fn run(&self, store: &mut ResultStore, cancel: &CancellationToken) -> RunReport {
        let view = self.grid.base_view();
        self.run_view(BASE_SCENARIO, &view, store, cancel)
    }

    /// Run with extra branches out of service. The grid itself is untouched.
    pub fn run_with_outages(
        &self,
        outages: &[BranchId],
        store: &mut ResultStore,
        cancel: &CancellationToken,
    ) -> SimResult<RunReport> {
        let view = self.grid.with_outages(outages)?;
        let name = outages
            .iter()
            .map(BranchId::as_str)
            .collect::<Vec<_>>()
            .join("+");
        Ok(self.run_view(&format!("outage:{name}"), &view, store, cancel))
    }

    /// Run the base case and every configured contingency in parallel.
    ///
    /// Outcomes are returned base case first, then in configuration order.
    pub fn run_contingencies(&self, cancel: &CancellationToken) -> SimResult<Vec<ScenarioOutcome>> {
        let mut scenarios = vec![(BASE_SCENARIO.to_string(), Vec::new())];
        scenarios.extend(
            self.config
                .contingencies
                .iter()
                .map(|c| (c.id.clone(), c.branches.clone())),
        );
        let views = scenarios
            .iter()
            .map(|(_, outages)| self.grid.with_outages(outages))
            .collect::<Result<Vec<_>, _>>()?;

        info!("Running {} scenario(s)", scenarios.len());
        let outcomes = scenarios
            .into_par_iter()
            .zip(views.into_par_iter())
            .map(|((id, outages), view)| {
                let mut results = self.new_store();
                let report = self.run_view(&id, &view, &mut results, cancel);
                ScenarioOutcome {
                    id,
                    outages,
                    report,
                    results,
                }
            })
            .collect();
        Ok(outcomes)
    }

    fn run_view(
        &self,
        scenario: &str,
        view: &TopologyView<'_>,
        store: &mut ResultStore,
        cancel: &CancellationToken,
    ) -> RunReport {
        let started = Instant::now();
        let formulator =
            DispatchFormulator::new(view, FormulationSettings::from(&self.config), &self.initial);
        let trackers = Trackers {
            storage: StorageTracker::new(
                self.grid,
                self.config.time_delta,
                self.config.storage.tolerance,
            ),
            flexible: StorageTracker::flexible(
                self.grid,
                self.config.time_delta,
                self.config.storage.tolerance,
            ),
        };
        store.set_topology(view);
        info!(
            "[{}] starting {} step(s), {} island(s), {} branch(es) out",
            scenario,
            self.steps,
            view.islands().len(),
            view.out_of_service().len()
        );

        let mut state = (self.initial.clone(), self.initial_flexible.clone());
        let mut status = RunStatus::Completed;
        let mut steps_completed = 0;
        let mut curtailed_steps = 0;
        for step in 0..self.steps {
            if cancel.is_cancelled() {
                warn!("[{}] cancelled before step {}", scenario, step);
                status = RunStatus::Cancelled { at_step: step };
                break;
            }
            let outcome = self
                .solve_step(&formulator, &trackers, view, &state, step)
                .and_then(|(result, next)| {
                    let curtailed = result.consumer_curtailment.iter().sum::<f64>();
                    store.record(result)?;
                    Ok((next, curtailed))
                });
            match outcome {
                Ok((next, curtailed)) => {
                    steps_completed += 1;
                    if curtailed > self.config.balance_tolerance {
                        curtailed_steps += 1;
                        warn!("[{}] step {}: {:.3} MW curtailed", scenario, step, curtailed);
                    }
                    state = next;
                }
                Err(err) => {
                    error!("[{}] halted: {}", scenario, err);
                    status = RunStatus::Failed(err);
                    break;
                }
            }
        }

        let report = RunReport {
            scenario: scenario.to_string(),
            status,
            steps_requested: self.steps,
            steps_completed,
            curtailed_steps,
            elapsed_ms: started.elapsed().as_millis(),
        };
        info!(
            "[{}] {} after {}/{} step(s) in {} ms",
            scenario,
            report.status_label(),
            report.steps_completed,
            report.steps_requested,
            report.elapsed_ms
        );
        report
    }

    fn solve_step(
        &self,
        formulator: &DispatchFormulator<'_>,
        trackers: &Trackers<'_>,
        view: &TopologyView<'_>,
        (levels, backlog): &(StorageState, StorageState),
        step: usize,
    ) -> SimResult<(StepResult, (StorageState, StorageState))> {
        let resolved = resolve_step(self.grid, self.series, step);
        let last = step + 1 == self.steps;
        let problem = formulator.formulate(&resolved, levels, backlog, last)?;
        let solution = self
            .chain
            .solve(&problem.lp, &self.options)
            .map_err(|e| SimError::from_lp(step, e))?;

        let (mut result, flows) = formulator.extract(&resolved, &problem, &solution);
        self.check_solution(view, &result)?;

        let next = advance(&trackers.storage, levels, &flows.storage, step, "")?;
        let next_backlog = advance(
            &trackers.flexible,
            backlog,
            &flows.flexible,
            step,
            " (flexible load)",
        )?;
        result.storage_level = next.levels().to_vec();
        result.flexible_level = next_backlog.levels().to_vec();

        debug!(
            "step {}: objective {:.4}, {} in {} ms ({} iterations)",
            step, result.objective, result.backend, result.solve_time_ms, result.iterations
        );
        Ok((result, (next, next_backlog)))
    }

    /// Power balance at every node and flow within every branch limit.
    fn check_solution(&self, view: &TopologyView<'_>, result: &StepResult) -> SimResult<()> {
        let tol = self.config.balance_tolerance;
        let step = result.step;
        let grid = self.grid;

        for (n, imbalance) in result.node_imbalance(grid).iter().enumerate() {
            if imbalance.abs() > tol {
                return Err(SimError::Consistency {
                    step,
                    message: format!(
                        "node {} is out of balance by {:.6} MW",
                        grid.nodes()[n].id,
                        imbalance
                    ),
                });
            }
        }
        for (b, &flow) in result.branch_flow.iter().enumerate() {
            let branch = &grid.branches()[b];
            let (upper, lower) = if view.is_in_service(b) {
                (branch.forward_limit(), -branch.reverse_limit())
            } else {
                (0.0, 0.0)
            };
            if flow > upper + tol || flow < lower - tol {
                return Err(SimError::Consistency {
                    step,
                    message: format!(
                        "branch {} carries {:.6} MW outside [{}, {}]",
                        branch.id, flow, lower, upper
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Move one tracker forward, naming the failing unit in the error.
fn advance(
    tracker: &StorageTracker<'_>,
    state: &StorageState,
    flows: &[StorageFlows],
    step: usize,
    label: &str,
) -> SimResult<StorageState> {
    tracker
        .advance(state, flows)
        .map_err(|(unit, source)| SimError::StorageConsistency {
            step,
            unit: format!("{}{label}", tracker.unit(unit).id),
            source,
        })
}

/// Storage overrides and contingencies must name real entities.
fn check_against_grid(grid: &GridModel, config: &RunConfig) -> Result<(), ConfigError> {
    let mut problems = Vec::new();
    for (unit, &level) in &config.storage.initial_levels {
        match grid.storage(unit.as_str()) {
            None => problems.push(format!("storage.initial_levels names unknown unit '{unit}'")),
            Some(s) if level > s.energy_capacity => problems.push(format!(
                "storage.initial_levels.{unit} = {level} exceeds capacity {}",
                s.energy_capacity
            )),
            Some(_) => {}
        }
    }
    for contingency in &config.contingencies {
        for branch in &contingency.branches {
            if grid.branch_idx(branch.as_str()).is_none() {
                problems.push(format!(
                    "contingency '{}' names unknown branch '{branch}'",
                    contingency.id
                ));
            }
        }
    }
    if problems.is_empty() {
        Ok(())
    } else {
        Err(ConfigError { problems })
    }
}

/// Highest value of `profile` over the run, or one without a profile
fn profile_peak(
    series: &dyn TimeSeriesProvider,
    profile: Option<&ProfileId>,
    steps: usize,
) -> f64 {
    profile.map_or(1.0, |profile| {
        (0..steps)
            .filter_map(|t| series.value(profile, t))
            .fold(f64::NEG_INFINITY, f64::max)
    })
}

/// Largest value a unit's stored energy can take over the run, before the
/// discharge efficiency is applied
fn peak_storage_value(unit: &StorageUnit, series: &dyn TimeSeriesProvider, steps: usize) -> f64 {
    let value = unit.storage_value * profile_peak(series, unit.value_profile.as_ref(), steps);
    let multipliers = unit.filling_curve.as_ref().map_or((1.0, 1.0), |curve| {
        curve
            .points()
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &(_, m)| {
                (lo.min(m), hi.max(m))
            })
    });
    // A negative value is largest at the smallest multiplier
    (value * multipliers.0).max(value * multipliers.1)
}

/// The curtailment penalty has to sit above every dispatch cost it may be
/// compared against, or curtailment would undercut supply. That covers
/// generator costs, reservoir water values behind their generators,
/// storage discharge and flexible consumption.
fn check_penalty_margin(
    grid: &GridModel,
    series: &dyn TimeSeriesProvider,
    config: &RunConfig,
    steps: usize,
) -> Result<(), ConfigError> {
    let uses_global = grid
        .consumers()
        .iter()
        .any(|c| c.curtailment_cost.is_none());
    if config.curtailment.policy == CurtailmentPolicy::Forbidden || !uses_global {
        return Ok(());
    }

    let mut costs: Vec<(f64, String)> = Vec::new();
    for (g, generator) in grid.generators().iter().enumerate() {
        let mut cost = generator.marginal_cost
            * profile_peak(series, generator.cost_profile.as_ref(), steps);
        if let Some(s) = grid.generator_storage(g) {
            let unit = &grid.storage_units()[s];
            cost += peak_storage_value(unit, series, steps) / unit.discharge_efficiency;
        }
        costs.push((cost, format!("generator {}", generator.id)));
    }
    for (s, unit) in grid.storage_units().iter().enumerate() {
        if grid.storage_generator(s).is_none() {
            let cost = peak_storage_value(unit, series, steps) / unit.discharge_efficiency;
            costs.push((cost, format!("storage {}", unit.id)));
        }
    }
    for (k, unit) in grid.flexible_units().iter().enumerate() {
        let consumer = &grid.consumers()[grid.flexible_consumer(k)];
        let value = peak_storage_value(unit, series, steps);
        costs.push((value, format!("flexible load {}", consumer.id)));
    }

    let Some((max_cost, entity)) = costs
        .into_iter()
        .filter(|(cost, _)| *cost > 0.0)
        .max_by(|a, b| a.0.total_cmp(&b.0))
    else {
        return Ok(());
    };

    let penalty = config.curtailment.penalty;
    if penalty <= max_cost {
        return Err(ConfigError::single(format!(
            "curtailment.penalty {penalty} does not exceed the highest dispatch cost \
             {max_cost} ({entity})"
        )));
    }
    if penalty < 10.0 * max_cost {
        warn!(
            "Curtailment penalty {} is less than ten times the highest dispatch cost {} ({}); \
             prices near scarcity may be distorted",
            penalty, max_cost, entity
        );
    }
    Ok(())
}
