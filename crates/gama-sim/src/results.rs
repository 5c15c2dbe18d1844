//! Recorded dispatch results and the queries run over them.

use crate::error::ResultError;
use gama_core::{BranchId, ConsumerId, GeneratorId, GridModel, NodeId, StorageId, TopologyView};
use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::Range;

/// Solved dispatch of one step, indexed like the grid tables.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepResult {
    pub step: usize,
    /// Objective value (currency per hour)
    pub objective: f64,
    pub backend: String,
    pub iterations: u32,
    pub solve_time_ms: u128,
    pub generator_output: Vec<f64>,
    /// Available energy not dispatched by inflow-constrained generators
    pub generator_spill: Vec<f64>,
    pub branch_flow: Vec<f64>,
    /// Objective reduction per MW of extra branch capacity
    pub branch_sensitivity: Vec<f64>,
    pub node_angle: Vec<f64>,
    pub nodal_price: Vec<f64>,
    pub consumer_demand: Vec<f64>,
    pub consumer_curtailment: Vec<f64>,
    pub storage_charge: Vec<f64>,
    pub storage_discharge: Vec<f64>,
    pub storage_spill: Vec<f64>,
    /// Level after the step (MWh)
    pub storage_level: Vec<f64>,
    /// Storage value used in the objective (currency/MWh)
    pub storage_value: Vec<f64>,
    /// Flexible consumption per flexible load (MW), on top of `consumer_demand`
    pub flexible_consumption: Vec<f64>,
    /// Flexible backlog after the step (MWh)
    pub flexible_level: Vec<f64>,
    pub flexible_value: Vec<f64>,
}

impl StepResult {
    /// Net injection at every node implied by this dispatch
    pub fn node_imbalance(&self, grid: &GridModel) -> Vec<f64> {
        let mut imbalance = vec![0.0; grid.nodes().len()];
        for (g, p) in self.generator_output.iter().enumerate() {
            imbalance[grid.generator_node(g)] += p;
        }
        for (c, demand) in self.consumer_demand.iter().enumerate() {
            imbalance[grid.consumer_node(c)] -= demand - self.consumer_curtailment[c];
        }
        for (k, consumption) in self.flexible_consumption.iter().enumerate() {
            imbalance[grid.consumer_node(grid.flexible_consumer(k))] -= consumption;
        }
        for (s, charge) in self.storage_charge.iter().enumerate() {
            let node = grid.storage_node(s);
            imbalance[node] -= charge;
            if grid.storage_generator(s).is_none() {
                imbalance[node] += self.storage_discharge[s];
            }
        }
        for (b, flow) in self.branch_flow.iter().enumerate() {
            let (from, to) = grid.branch_ends(b);
            imbalance[from] -= flow;
            imbalance[to] += flow;
        }
        imbalance
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Node,
    Branch,
    Generator,
    Consumer,
    Storage,
    System,
}

/// One value in long format.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRow {
    pub step: usize,
    pub kind: EntityKind,
    pub entity: String,
    pub quantity: &'static str,
    pub value: f64,
}

/// Append-only record of solved steps.
#[derive(Debug, Clone)]
pub struct ResultStore {
    time_delta: f64,
    nodes: Vec<NodeId>,
    node_areas: Vec<String>,
    branches: Vec<BranchId>,
    branch_ends: Vec<(usize, usize)>,
    branch_limits: Vec<(f64, f64)>,
    branch_in_service: Vec<bool>,
    generators: Vec<GeneratorId>,
    generator_kinds: Vec<String>,
    consumers: Vec<ConsumerId>,
    storage: Vec<StorageId>,
    flexible: Vec<ConsumerId>,
    steps: Vec<StepResult>,
}

impl ResultStore {
    pub fn new(grid: &GridModel, time_delta: f64) -> Self {
        Self {
            time_delta,
            nodes: grid.nodes().iter().map(|n| n.id.clone()).collect(),
            node_areas: grid.nodes().iter().map(|n| n.area.clone()).collect(),
            branches: grid.branches().iter().map(|b| b.id.clone()).collect(),
            branch_ends: (0..grid.branches().len())
                .map(|b| grid.branch_ends(b))
                .collect(),
            branch_limits: grid
                .branches()
                .iter()
                .map(|b| (b.forward_limit(), b.reverse_limit()))
                .collect(),
            branch_in_service: grid.branches().iter().map(|b| b.in_service).collect(),
            generators: grid.generators().iter().map(|g| g.id.clone()).collect(),
            generator_kinds: grid.generators().iter().map(|g| g.kind.clone()).collect(),
            consumers: grid.consumers().iter().map(|c| c.id.clone()).collect(),
            storage: grid.storage_units().iter().map(|s| s.id.clone()).collect(),
            flexible: (0..grid.flexible_units().len())
                .map(|k| grid.consumers()[grid.flexible_consumer(k)].id.clone())
                .collect(),
            steps: Vec::new(),
        }
    }

    /// Take branch availability from the topology the steps are solved on.
    pub fn set_topology(&mut self, view: &TopologyView<'_>) {
        self.branch_in_service = (0..self.branches.len())
            .map(|b| view.is_in_service(b))
            .collect();
    }

    pub fn time_delta(&self) -> f64 {
        self.time_delta
    }

    /// Append the next step. Steps must arrive as 0, 1, 2, ...
    pub fn record(&mut self, result: StepResult) -> Result<(), ResultError> {
        let expected = self.steps.len();
        if result.step != expected {
            return Err(ResultError::OutOfOrder {
                expected,
                got: result.step,
            });
        }
        let shapes = [
            ("generator", self.generators.len(), result.generator_output.len()),
            ("generator spill", self.generators.len(), result.generator_spill.len()),
            ("branch", self.branches.len(), result.branch_flow.len()),
            ("branch sensitivity", self.branches.len(), result.branch_sensitivity.len()),
            ("angle", self.nodes.len(), result.node_angle.len()),
            ("price", self.nodes.len(), result.nodal_price.len()),
            ("demand", self.consumers.len(), result.consumer_demand.len()),
            ("curtailment", self.consumers.len(), result.consumer_curtailment.len()),
            ("charge", self.storage.len(), result.storage_charge.len()),
            ("discharge", self.storage.len(), result.storage_discharge.len()),
            ("storage spill", self.storage.len(), result.storage_spill.len()),
            ("level", self.storage.len(), result.storage_level.len()),
            ("storage value", self.storage.len(), result.storage_value.len()),
            ("flexible", self.flexible.len(), result.flexible_consumption.len()),
            ("flexible level", self.flexible.len(), result.flexible_level.len()),
            ("flexible value", self.flexible.len(), result.flexible_value.len()),
        ];
        for (entity, expected, got) in shapes {
            if expected != got {
                return Err(ResultError::ShapeMismatch {
                    step: result.step,
                    entity,
                    expected,
                    got,
                });
            }
        }
        self.steps.push(result);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, step: usize) -> Option<&StepResult> {
        self.steps.get(step)
    }

    pub fn steps(&self) -> &[StepResult] {
        &self.steps
    }

    /// Recorded steps within `range`, truncated to what exists
    pub fn range(&self, range: Range<usize>) -> &[StepResult] {
        let end = range.end.min(self.steps.len());
        let start = range.start.min(end);
        &self.steps[start..end]
    }

    pub fn node_ids(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn branch_ids(&self) -> &[BranchId] {
        &self.branches
    }

    pub fn generator_ids(&self) -> &[GeneratorId] {
        &self.generators
    }

    pub fn consumer_ids(&self) -> &[ConsumerId] {
        &self.consumers
    }

    pub fn storage_ids(&self) -> &[StorageId] {
        &self.storage
    }

    /// Consumers with a flexible share, in flexible-load order
    pub fn flexible_ids(&self) -> &[ConsumerId] {
        &self.flexible
    }

    pub fn node_area(&self, node: usize) -> &str {
        &self.node_areas[node]
    }

    pub fn generator_kind(&self, generator: usize) -> &str {
        &self.generator_kinds[generator]
    }

    fn series<T: AsRef<str>>(
        &self,
        ids: &[T],
        id: &str,
        column: impl Fn(&StepResult) -> &[f64],
    ) -> Option<Vec<f64>> {
        let idx = ids.iter().position(|x| x.as_ref() == id)?;
        Some(self.steps.iter().map(|s| column(s)[idx]).collect())
    }

    // =========================================================================
    // Per-entity series
    // =========================================================================

    pub fn generator_output(&self, id: &str) -> Option<Vec<f64>> {
        self.series(&self.generators, id, |s| &s.generator_output)
    }

    pub fn generator_spill(&self, id: &str) -> Option<Vec<f64>> {
        self.series(&self.generators, id, |s| &s.generator_spill)
    }

    pub fn branch_flow(&self, id: &str) -> Option<Vec<f64>> {
        self.series(&self.branches, id, |s| &s.branch_flow)
    }

    pub fn branch_sensitivity(&self, id: &str) -> Option<Vec<f64>> {
        self.series(&self.branches, id, |s| &s.branch_sensitivity)
    }

    pub fn nodal_price(&self, id: &str) -> Option<Vec<f64>> {
        self.series(&self.nodes, id, |s| &s.nodal_price)
    }

    pub fn node_angle(&self, id: &str) -> Option<Vec<f64>> {
        self.series(&self.nodes, id, |s| &s.node_angle)
    }

    pub fn curtailment(&self, id: &str) -> Option<Vec<f64>> {
        self.series(&self.consumers, id, |s| &s.consumer_curtailment)
    }

    pub fn storage_level(&self, id: &str) -> Option<Vec<f64>> {
        self.series(&self.storage, id, |s| &s.storage_level)
    }

    pub fn storage_charge(&self, id: &str) -> Option<Vec<f64>> {
        self.series(&self.storage, id, |s| &s.storage_charge)
    }

    pub fn storage_discharge(&self, id: &str) -> Option<Vec<f64>> {
        self.series(&self.storage, id, |s| &s.storage_discharge)
    }

    pub fn storage_spill(&self, id: &str) -> Option<Vec<f64>> {
        self.series(&self.storage, id, |s| &s.storage_spill)
    }

    pub fn flexible_consumption(&self, consumer: &str) -> Option<Vec<f64>> {
        self.series(&self.flexible, consumer, |s| &s.flexible_consumption)
    }

    pub fn flexible_level(&self, consumer: &str) -> Option<Vec<f64>> {
        self.series(&self.flexible, consumer, |s| &s.flexible_level)
    }

    // =========================================================================
    // Aggregates
    // =========================================================================

    /// Sum of step objectives weighted by step length (currency)
    pub fn objective_total(&self) -> f64 {
        self.steps.iter().map(|s| s.objective).sum::<f64>() * self.time_delta
    }

    /// Average price per node over all recorded steps
    pub fn mean_nodal_prices(&self) -> Vec<(NodeId, f64)> {
        let n = self.steps.len().max(1) as f64;
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let sum: f64 = self.steps.iter().map(|s| s.nodal_price[i]).sum();
                (id.clone(), sum / n)
            })
            .collect()
    }

    /// Mean nodal price per area, one value per recorded step
    pub fn area_prices(&self) -> BTreeMap<String, Vec<f64>> {
        let mut members: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (i, area) in self.node_areas.iter().enumerate() {
            members.entry(area.as_str()).or_default().push(i);
        }
        members
            .into_iter()
            .map(|(area, nodes)| {
                let prices = self
                    .steps
                    .iter()
                    .map(|s| {
                        nodes.iter().map(|&i| s.nodal_price[i]).sum::<f64>() / nodes.len() as f64
                    })
                    .collect();
                (area.to_string(), prices)
            })
            .collect()
    }

    /// Unserved energy over the run (MWh)
    pub fn total_curtailment(&self) -> f64 {
        self.steps
            .iter()
            .flat_map(|s| s.consumer_curtailment.iter())
            .sum::<f64>()
            * self.time_delta
    }

    /// Energy produced per generator kind (MWh)
    pub fn generation_by_kind(&self) -> BTreeMap<String, f64> {
        let mut totals = BTreeMap::new();
        for step in &self.steps {
            for (g, p) in step.generator_output.iter().enumerate() {
                *totals.entry(self.generator_kinds[g].clone()).or_insert(0.0) +=
                    p * self.time_delta;
            }
        }
        totals
    }

    /// Energy spilled by generators and storage units (MWh)
    pub fn spilled_energy(&self) -> f64 {
        self.steps
            .iter()
            .map(|s| {
                s.generator_spill.iter().sum::<f64>() + s.storage_spill.iter().sum::<f64>()
            })
            .sum::<f64>()
            * self.time_delta
    }

    /// `Σ |price_to − price_from| · |flow| · Δt` over the run
    pub fn congestion_rent(&self, branch: &str) -> Option<f64> {
        let b = self.branches.iter().position(|id| id.as_str() == branch)?;
        let (from, to) = self.branch_ends[b];
        Some(
            self.steps
                .iter()
                .map(|s| (s.nodal_price[to] - s.nodal_price[from]).abs() * s.branch_flow[b].abs())
                .sum::<f64>()
                * self.time_delta,
        )
    }

    /// In-service branches whose flow reached a positive finite limit
    /// (within `tolerance` MW), with the number of steps they were binding
    pub fn binding_branches(&self, tolerance: f64) -> Vec<(BranchId, usize)> {
        let binding = |limit: f64| limit.is_finite() && limit > tolerance;
        self.branches
            .iter()
            .enumerate()
            .filter(|&(b, _)| self.branch_in_service[b])
            .filter_map(|(b, id)| {
                let (forward, reverse) = self.branch_limits[b];
                let count = self
                    .steps
                    .iter()
                    .filter(|s| {
                        let f = s.branch_flow[b];
                        (binding(forward) && f >= forward - tolerance)
                            || (binding(reverse) && f <= -reverse + tolerance)
                    })
                    .count();
                (count > 0).then(|| (id.clone(), count))
            })
            .collect()
    }

    // =========================================================================
    // Long format
    // =========================================================================

    /// One row per (entity, quantity, step)
    pub fn rows(&self) -> Vec<ResultRow> {
        let mut rows = Vec::new();
        for s in &self.steps {
            let mut push = |kind, entity: &str, quantity, value| {
                rows.push(ResultRow {
                    step: s.step,
                    kind,
                    entity: entity.to_string(),
                    quantity,
                    value,
                })
            };
            push(EntityKind::System, "system", "objective", s.objective);
            for (i, id) in self.nodes.iter().enumerate() {
                push(EntityKind::Node, id.as_str(), "price", s.nodal_price[i]);
                push(EntityKind::Node, id.as_str(), "angle", s.node_angle[i]);
            }
            for (i, id) in self.branches.iter().enumerate() {
                push(EntityKind::Branch, id.as_str(), "flow", s.branch_flow[i]);
                push(EntityKind::Branch, id.as_str(), "sensitivity", s.branch_sensitivity[i]);
            }
            for (i, id) in self.generators.iter().enumerate() {
                push(EntityKind::Generator, id.as_str(), "output", s.generator_output[i]);
                push(EntityKind::Generator, id.as_str(), "spill", s.generator_spill[i]);
            }
            for (i, id) in self.consumers.iter().enumerate() {
                push(EntityKind::Consumer, id.as_str(), "demand", s.consumer_demand[i]);
                push(EntityKind::Consumer, id.as_str(), "curtailment", s.consumer_curtailment[i]);
            }
            for (i, id) in self.storage.iter().enumerate() {
                push(EntityKind::Storage, id.as_str(), "charge", s.storage_charge[i]);
                push(EntityKind::Storage, id.as_str(), "discharge", s.storage_discharge[i]);
                push(EntityKind::Storage, id.as_str(), "spill", s.storage_spill[i]);
                push(EntityKind::Storage, id.as_str(), "level", s.storage_level[i]);
                push(EntityKind::Storage, id.as_str(), "value", s.storage_value[i]);
            }
            for (k, id) in self.flexible.iter().enumerate() {
                push(EntityKind::Consumer, id.as_str(), "flexible", s.flexible_consumption[k]);
                push(EntityKind::Consumer, id.as_str(), "flexible_level", s.flexible_level[k]);
                push(EntityKind::Consumer, id.as_str(), "flexible_value", s.flexible_value[k]);
            }
        }
        rows
    }
}
