//! Validated, read-only grid model.

use crate::diagnostics::{Diagnostics, EntityRef, IssueKind};
use crate::error::ValidationError;
use crate::topology::TopologyView;
use crate::{
    Branch, BranchId, Consumer, ConsumerId, FillingCurve, Generator, GeneratorId, Node, NodeId,
    ProfileId, StorageAttachment, StorageId, StorageUnit,
};
use petgraph::graph::{NodeIndex, UnGraph};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Raw input tables as handed over by an external loader.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GridTables {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub branches: Vec<Branch>,
    #[serde(default)]
    pub generators: Vec<Generator>,
    #[serde(default)]
    pub consumers: Vec<Consumer>,
    #[serde(default)]
    pub storage: Vec<StorageUnit>,
}

impl GridTables {
    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_branch(mut self, branch: Branch) -> Self {
        self.branches.push(branch);
        self
    }

    pub fn with_generator(mut self, generator: Generator) -> Self {
        self.generators.push(generator);
        self
    }

    pub fn with_consumer(mut self, consumer: Consumer) -> Self {
        self.consumers.push(consumer);
        self
    }

    pub fn with_storage(mut self, unit: StorageUnit) -> Self {
        self.storage.push(unit);
        self
    }
}

/// What an entity uses a profile for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileUse {
    Cost,
    Availability,
    Demand,
    StorageValue,
    Inflow,
}

impl ProfileUse {
    /// Prices may go negative; physical quantities may not.
    pub fn allows_negative(self) -> bool {
        matches!(self, ProfileUse::Cost | ProfileUse::StorageValue)
    }
}

/// Indices of everything attached to one node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeEntities {
    pub branches: Vec<usize>,
    pub generators: Vec<usize>,
    pub consumers: Vec<usize>,
    pub storage: Vec<usize>,
}

impl NodeEntities {
    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
            && self.generators.is_empty()
            && self.consumers.is_empty()
            && self.storage.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GridStats {
    pub num_nodes: usize,
    pub num_branches: usize,
    pub num_dc_branches: usize,
    pub num_generators: usize,
    pub num_consumers: usize,
    pub num_flexible_consumers: usize,
    pub num_storage: usize,
    pub num_areas: usize,
    pub total_gen_capacity_mw: f64,
    pub total_demand_mw: f64,
    pub total_storage_mwh: f64,
}

/// Validated grid. Entities keep their input order, which fixes variable and
/// row order in every formulated problem.
#[derive(Debug, Clone)]
pub struct GridModel {
    nodes: Vec<Node>,
    branches: Vec<Branch>,
    generators: Vec<Generator>,
    consumers: Vec<Consumer>,
    storage: Vec<StorageUnit>,
    node_index: HashMap<NodeId, usize>,
    branch_index: HashMap<BranchId, usize>,
    generator_index: HashMap<String, usize>,
    consumer_index: HashMap<String, usize>,
    storage_index: HashMap<String, usize>,
    branch_ends: Vec<(usize, usize)>,
    generator_nodes: Vec<usize>,
    consumer_nodes: Vec<usize>,
    storage_nodes: Vec<usize>,
    storage_generators: Vec<Option<usize>>,
    generator_storage: Vec<Option<usize>>,
    flexible_units: Vec<StorageUnit>,
    flexible_consumers: Vec<usize>,
    consumer_flexible: Vec<Option<usize>>,
    attached: Vec<NodeEntities>,
    graph: UnGraph<usize, usize>,
    warnings: Diagnostics,
}

fn index_ids<'a>(
    label: &str,
    ids: impl Iterator<Item = &'a str>,
    entity: impl Fn(&str) -> EntityRef,
    diag: &mut Diagnostics,
) -> HashMap<String, usize> {
    let mut index = HashMap::new();
    for (i, id) in ids.enumerate() {
        if id.is_empty() {
            diag.error(
                IssueKind::Structure,
                EntityRef::Grid,
                format!("{label} #{i} has an empty identifier"),
            );
            continue;
        }
        if index.insert(id.to_string(), i).is_some() {
            diag.error(
                IssueKind::Duplicate,
                entity(id),
                format!("duplicate {label} identifier"),
            );
        }
    }
    index
}

/// Record an out-of-range error unless `min ≤ value ≤ max`.
fn check_range(
    diag: &mut Diagnostics,
    entity: &EntityRef,
    field: &str,
    value: f64,
    (min, max): (f64, f64),
) {
    if value.is_nan() || value < min || value > max {
        diag.error(
            IssueKind::OutOfRange,
            entity.clone(),
            format!("{field} = {value} outside [{min}, {max}]"),
        );
    }
}

fn check_finite(diag: &mut Diagnostics, entity: &EntityRef, field: &str, value: f64) {
    if !value.is_finite() {
        diag.error(
            IssueKind::OutOfRange,
            entity.clone(),
            format!("{field} must be finite, got {value}"),
        );
    }
}

fn check_filling_curve(diag: &mut Diagnostics, entity: &EntityRef, curve: &FillingCurve) {
    let points = curve.points();
    if points.is_empty() {
        diag.error(
            IssueKind::OutOfRange,
            entity.clone(),
            "filling curve has no points",
        );
    }
    if points.windows(2).any(|w| w[1].0 < w[0].0) {
        diag.error(
            IssueKind::OutOfRange,
            entity.clone(),
            "filling curve fractions must be non-decreasing",
        );
    }
    for &(fraction, multiplier) in points {
        check_range(diag, entity, "filling fraction", fraction, UNIT);
        check_range(diag, entity, "filling multiplier", multiplier, NON_NEGATIVE);
    }
}

const NON_NEGATIVE: (f64, f64) = (0.0, f64::MAX);
const NON_NEGATIVE_OR_INF: (f64, f64) = (0.0, f64::INFINITY);
const UNIT: (f64, f64) = (0.0, 1.0);
const EFFICIENCY: (f64, f64) = (f64::MIN_POSITIVE, 1.0);

impl GridModel {
    /// Validate the tables and build the model.
    ///
    /// Every violation is collected; the returned [`ValidationError`] lists
    /// all of them.
    pub fn new(tables: GridTables) -> Result<Self, ValidationError> {
        let GridTables {
            nodes,
            branches,
            generators,
            consumers,
            storage,
        } = tables;
        let mut diag = Diagnostics::new();

        if nodes.is_empty() {
            diag.error(IssueKind::Structure, EntityRef::Grid, "grid has no nodes");
        }

        let node_index: HashMap<NodeId, usize> = index_ids(
            "node",
            nodes.iter().map(|n| n.id.as_str()),
            |id| EntityRef::Node(NodeId::new(id)),
            &mut diag,
        )
        .into_iter()
        .map(|(id, i)| (NodeId::new(id), i))
        .collect();
        let branch_index: HashMap<BranchId, usize> = index_ids(
            "branch",
            branches.iter().map(|b| b.id.as_str()),
            |id| EntityRef::Branch(BranchId::new(id)),
            &mut diag,
        )
        .into_iter()
        .map(|(id, i)| (BranchId::new(id), i))
        .collect();
        let generator_index = index_ids(
            "generator",
            generators.iter().map(|g| g.id.as_str()),
            |id| EntityRef::Generator(GeneratorId::new(id)),
            &mut diag,
        );
        let consumer_index = index_ids(
            "consumer",
            consumers.iter().map(|c| c.id.as_str()),
            |id| EntityRef::Consumer(ConsumerId::new(id)),
            &mut diag,
        );
        let storage_index = index_ids(
            "storage",
            storage.iter().map(|s| s.id.as_str()),
            |id| EntityRef::Storage(StorageId::new(id)),
            &mut diag,
        );

        let resolve = |diag: &mut Diagnostics, node: &NodeId, entity: &EntityRef| -> usize {
            match node_index.get(node) {
                Some(&idx) => idx,
                None => {
                    diag.error(
                        IssueKind::UnknownReference,
                        entity.clone(),
                        format!("unknown node '{node}'"),
                    );
                    usize::MAX
                }
            }
        };

        for node in &nodes {
            let entity = EntityRef::Node(node.id.clone());
            if let Some(lat) = node.lat {
                check_range(&mut diag, &entity, "lat", lat, (-90.0, 90.0));
            }
            if let Some(lon) = node.lon {
                check_range(&mut diag, &entity, "lon", lon, (-180.0, 180.0));
            }
        }

        let mut branch_ends = Vec::with_capacity(branches.len());
        for branch in &branches {
            let entity = EntityRef::Branch(branch.id.clone());
            let from = resolve(&mut diag, &branch.from, &entity);
            let to = resolve(&mut diag, &branch.to, &entity);
            if branch.from == branch.to {
                diag.error(
                    IssueKind::Structure,
                    entity.clone(),
                    "branch connects a node to itself",
                );
            }
            check_range(&mut diag, &entity, "capacity", branch.capacity, NON_NEGATIVE_OR_INF);
            if let Some(reverse) = branch.reverse_capacity {
                check_range(&mut diag, &entity, "reverse_capacity", reverse, NON_NEGATIVE_OR_INF);
            }
            if branch.is_ac() && (!branch.reactance.is_finite() || branch.reactance == 0.0) {
                diag.error(
                    IssueKind::OutOfRange,
                    entity.clone(),
                    format!(
                        "AC branch reactance must be finite and non-zero, got {}",
                        branch.reactance
                    ),
                );
            }
            branch_ends.push((from, to));
        }

        let mut generator_nodes = Vec::with_capacity(generators.len());
        for generator in &generators {
            let entity = EntityRef::Generator(generator.id.clone());
            generator_nodes.push(resolve(&mut diag, &generator.node, &entity));
            check_finite(&mut diag, &entity, "pmax", generator.pmax);
            check_range(&mut diag, &entity, "pmin", generator.pmin, (0.0, generator.pmax));
            check_finite(&mut diag, &entity, "marginal_cost", generator.marginal_cost);
        }

        let mut consumer_nodes = Vec::with_capacity(consumers.len());
        for consumer in &consumers {
            let entity = EntityRef::Consumer(consumer.id.clone());
            consumer_nodes.push(resolve(&mut diag, &consumer.node, &entity));
            check_range(&mut diag, &entity, "demand", consumer.demand, NON_NEGATIVE);
            if let Some(cost) = consumer.curtailment_cost {
                check_range(&mut diag, &entity, "curtailment_cost", cost, NON_NEGATIVE);
            }
            if let Some(flex) = &consumer.flexibility {
                check_range(&mut diag, &entity, "flexibility.fraction", flex.fraction, UNIT);
                check_range(
                    &mut diag,
                    &entity,
                    "flexibility.on_off_ratio",
                    flex.on_off_ratio,
                    (1.0, f64::MAX),
                );
                check_range(
                    &mut diag,
                    &entity,
                    "flexibility.storage_hours",
                    flex.storage_hours,
                    (f64::MIN_POSITIVE, f64::MAX),
                );
                check_finite(&mut diag, &entity, "flexibility.value", flex.value);
                check_range(
                    &mut diag,
                    &entity,
                    "flexibility.initial_fraction",
                    flex.initial_fraction,
                    UNIT,
                );
                if let Some(curve) = &flex.filling_curve {
                    check_filling_curve(&mut diag, &entity, curve);
                }
            }
        }

        let mut storage_nodes = Vec::with_capacity(storage.len());
        let mut storage_generators = Vec::with_capacity(storage.len());
        let mut generator_storage = vec![None; generators.len()];
        for (s, unit) in storage.iter().enumerate() {
            let entity = EntityRef::Storage(unit.id.clone());
            match &unit.attachment {
                StorageAttachment::Node(node) => {
                    storage_nodes.push(resolve(&mut diag, node, &entity));
                    storage_generators.push(None);
                }
                StorageAttachment::Generator(gen_id) => {
                    match generator_index.get(gen_id.as_str()).copied() {
                        Some(g) => {
                            storage_nodes.push(generator_nodes[g]);
                            storage_generators.push(Some(g));
                            if !generators[g].inflow_constrained {
                                diag.error(
                                    IssueKind::Structure,
                                    entity.clone(),
                                    format!(
                                        "attached generator '{gen_id}' is not inflow-constrained"
                                    ),
                                );
                            }
                            if generator_storage[g].replace(s).is_some() {
                                diag.error(
                                    IssueKind::Structure,
                                    entity.clone(),
                                    format!("generator '{gen_id}' already has a storage unit"),
                                );
                            }
                        }
                        None => {
                            diag.error(
                                IssueKind::UnknownReference,
                                entity.clone(),
                                format!("unknown generator '{gen_id}'"),
                            );
                            storage_nodes.push(usize::MAX);
                            storage_generators.push(None);
                        }
                    }
                }
            }

            let capacity = unit.energy_capacity;
            check_range(&mut diag, &entity, "energy_capacity", capacity, NON_NEGATIVE);
            check_range(&mut diag, &entity, "charge_limit", unit.charge_limit, NON_NEGATIVE);
            check_range(
                &mut diag,
                &entity,
                "charge_deadband",
                unit.charge_deadband,
                NON_NEGATIVE,
            );
            check_range(
                &mut diag,
                &entity,
                "discharge_limit",
                unit.discharge_limit,
                NON_NEGATIVE,
            );
            check_range(
                &mut diag,
                &entity,
                "charge_efficiency",
                unit.charge_efficiency,
                EFFICIENCY,
            );
            check_range(
                &mut diag,
                &entity,
                "discharge_efficiency",
                unit.discharge_efficiency,
                EFFICIENCY,
            );
            check_range(
                &mut diag,
                &entity,
                "initial_level",
                unit.initial_level,
                (0.0, capacity),
            );
            check_finite(&mut diag, &entity, "storage_value", unit.storage_value);
            check_range(&mut diag, &entity, "inflow", unit.inflow, NON_NEGATIVE);
            if let Some(curve) = &unit.filling_curve {
                check_filling_curve(&mut diag, &entity, curve);
            }
        }

        ValidationError::check(diag.clone())?;

        let mut attached = vec![NodeEntities::default(); nodes.len()];
        for (b, &(from, to)) in branch_ends.iter().enumerate() {
            attached[from].branches.push(b);
            attached[to].branches.push(b);
        }
        for (g, &n) in generator_nodes.iter().enumerate() {
            attached[n].generators.push(g);
        }
        for (c, &n) in consumer_nodes.iter().enumerate() {
            attached[n].consumers.push(c);
        }
        for (s, &n) in storage_nodes.iter().enumerate() {
            attached[n].storage.push(s);
        }

        let mut flexible_units = Vec::new();
        let mut flexible_consumers = Vec::new();
        let mut consumer_flexible = vec![None; consumers.len()];
        for (c, consumer) in consumers.iter().enumerate() {
            if let Some(unit) = consumer.flexible_storage() {
                consumer_flexible[c] = Some(flexible_units.len());
                flexible_units.push(unit);
                flexible_consumers.push(c);
            }
        }

        let mut graph = UnGraph::with_capacity(nodes.len(), branches.len());
        for n in 0..nodes.len() {
            graph.add_node(n);
        }
        for (b, &(from, to)) in branch_ends.iter().enumerate() {
            graph.add_edge(NodeIndex::new(from), NodeIndex::new(to), b);
        }

        for (n, entities) in attached.iter().enumerate() {
            if entities.is_empty() {
                diag.warning(
                    IssueKind::Structure,
                    EntityRef::Node(nodes[n].id.clone()),
                    "node has no branches or attached entities",
                );
            }
        }
        if consumers.is_empty() {
            diag.warning(IssueKind::Structure, EntityRef::Grid, "grid has no consumers");
        }
        if generators.is_empty() && storage.is_empty() {
            diag.warning(
                IssueKind::Structure,
                EntityRef::Grid,
                "grid has no generators or storage",
            );
        }

        Ok(Self {
            nodes,
            branches,
            generators,
            consumers,
            storage,
            node_index,
            branch_index,
            generator_index,
            consumer_index,
            storage_index,
            branch_ends,
            generator_nodes,
            consumer_nodes,
            storage_nodes,
            storage_generators,
            generator_storage,
            flexible_units,
            flexible_consumers,
            consumer_flexible,
            attached,
            graph,
            warnings: diag,
        })
    }

    // =========================================================================
    // Entity tables
    // =========================================================================

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn branches(&self) -> &[Branch] {
        &self.branches
    }

    pub fn generators(&self) -> &[Generator] {
        &self.generators
    }

    pub fn consumers(&self) -> &[Consumer] {
        &self.consumers
    }

    pub fn storage_units(&self) -> &[StorageUnit] {
        &self.storage
    }

    /// Non-fatal issues found during construction
    pub fn warnings(&self) -> &Diagnostics {
        &self.warnings
    }

    /// Topology graph: node weights are node indices, edge weights branch indices
    pub fn graph(&self) -> &UnGraph<usize, usize> {
        &self.graph
    }

    // =========================================================================
    // Lookup by identifier
    // =========================================================================

    pub fn node_idx(&self, id: &str) -> Option<usize> {
        self.node_index.get(id).copied()
    }

    pub fn branch_idx(&self, id: &str) -> Option<usize> {
        self.branch_index.get(id).copied()
    }

    pub fn generator_idx(&self, id: &str) -> Option<usize> {
        self.generator_index.get(id).copied()
    }

    pub fn consumer_idx(&self, id: &str) -> Option<usize> {
        self.consumer_index.get(id).copied()
    }

    pub fn storage_idx(&self, id: &str) -> Option<usize> {
        self.storage_index.get(id).copied()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.node_idx(id).map(|i| &self.nodes[i])
    }

    pub fn branch(&self, id: &str) -> Option<&Branch> {
        self.branch_idx(id).map(|i| &self.branches[i])
    }

    pub fn generator(&self, id: &str) -> Option<&Generator> {
        self.generator_idx(id).map(|i| &self.generators[i])
    }

    pub fn consumer(&self, id: &str) -> Option<&Consumer> {
        self.consumer_idx(id).map(|i| &self.consumers[i])
    }

    pub fn storage(&self, id: &str) -> Option<&StorageUnit> {
        self.storage_idx(id).map(|i| &self.storage[i])
    }

    // =========================================================================
    // Index-level relations
    // =========================================================================

    /// `(from, to)` node indices of a branch
    pub fn branch_ends(&self, branch: usize) -> (usize, usize) {
        self.branch_ends[branch]
    }

    pub fn generator_node(&self, generator: usize) -> usize {
        self.generator_nodes[generator]
    }

    pub fn consumer_node(&self, consumer: usize) -> usize {
        self.consumer_nodes[consumer]
    }

    /// Node of a storage unit (the generator's node for reservoirs)
    pub fn storage_node(&self, unit: usize) -> usize {
        self.storage_nodes[unit]
    }

    /// Generator fed by a reservoir, if the unit is generator-attached
    pub fn storage_generator(&self, unit: usize) -> Option<usize> {
        self.storage_generators[unit]
    }

    /// Reservoir feeding a generator, if any
    pub fn generator_storage(&self, generator: usize) -> Option<usize> {
        self.generator_storage[generator]
    }

    pub fn entities_at(&self, node: usize) -> &NodeEntities {
        &self.attached[node]
    }

    /// Storage equivalents of the flexible consumers, in consumer order
    pub fn flexible_units(&self) -> &[StorageUnit] {
        &self.flexible_units
    }

    /// Consumer index behind a flexible unit
    pub fn flexible_consumer(&self, unit: usize) -> usize {
        self.flexible_consumers[unit]
    }

    /// Flexible unit of a consumer, if it shifts part of its demand
    pub fn consumer_flexible(&self, consumer: usize) -> Option<usize> {
        self.consumer_flexible[consumer]
    }

    // =========================================================================
    // Identifier-level queries
    // =========================================================================

    /// Everything attached to a node
    pub fn attached_to(&self, node: &str) -> Option<&NodeEntities> {
        self.node_idx(node).map(|n| &self.attached[n])
    }

    /// Distinct neighbouring nodes over any branch, in input order
    pub fn neighbors(&self, node: &str) -> Vec<&NodeId> {
        let Some(n) = self.node_idx(node) else {
            return Vec::new();
        };
        let unique: BTreeSet<usize> = self
            .graph
            .neighbors(NodeIndex::new(n))
            .map(|idx| self.graph[idx])
            .collect();
        unique.into_iter().map(|i| &self.nodes[i].id).collect()
    }

    pub fn incident_branches(&self, node: &str) -> Vec<&Branch> {
        self.attached_to(node)
            .map(|e| e.branches.iter().map(|&b| &self.branches[b]).collect())
            .unwrap_or_default()
    }

    pub fn generators_at(&self, node: &str) -> Vec<&Generator> {
        self.attached_to(node)
            .map(|e| e.generators.iter().map(|&g| &self.generators[g]).collect())
            .unwrap_or_default()
    }

    pub fn consumers_at(&self, node: &str) -> Vec<&Consumer> {
        self.attached_to(node)
            .map(|e| e.consumers.iter().map(|&c| &self.consumers[c]).collect())
            .unwrap_or_default()
    }

    pub fn storage_at(&self, node: &str) -> Vec<&StorageUnit> {
        self.attached_to(node)
            .map(|e| e.storage.iter().map(|&s| &self.storage[s]).collect())
            .unwrap_or_default()
    }

    /// Sorted distinct area tags
    pub fn areas(&self) -> Vec<&str> {
        let areas: BTreeSet<&str> = self.nodes.iter().map(|n| n.area.as_str()).collect();
        areas.into_iter().collect()
    }

    /// Every profile referenced by some entity, with its use and the
    /// referencing record
    pub fn profile_references(&self) -> Vec<(&ProfileId, ProfileUse, EntityRef)> {
        let mut refs = Vec::new();
        for g in &self.generators {
            let entity = || EntityRef::Generator(g.id.clone());
            if let Some(p) = &g.cost_profile {
                refs.push((p, ProfileUse::Cost, entity()));
            }
            if let Some(p) = &g.availability_profile {
                refs.push((p, ProfileUse::Availability, entity()));
            }
        }
        for c in &self.consumers {
            let entity = || EntityRef::Consumer(c.id.clone());
            if let Some(p) = &c.demand_profile {
                refs.push((p, ProfileUse::Demand, entity()));
            }
            if let Some(p) = c.flexibility.as_ref().and_then(|f| f.value_profile.as_ref()) {
                refs.push((p, ProfileUse::StorageValue, entity()));
            }
        }
        for s in &self.storage {
            let entity = || EntityRef::Storage(s.id.clone());
            if let Some(p) = &s.value_profile {
                refs.push((p, ProfileUse::StorageValue, entity()));
            }
            if let Some(p) = &s.inflow_profile {
                refs.push((p, ProfileUse::Inflow, entity()));
            }
        }
        refs
    }

    pub fn stats(&self) -> GridStats {
        GridStats {
            num_nodes: self.nodes.len(),
            num_branches: self.branches.len(),
            num_dc_branches: self.branches.iter().filter(|b| !b.is_ac()).count(),
            num_generators: self.generators.len(),
            num_consumers: self.consumers.len(),
            num_flexible_consumers: self.flexible_units.len(),
            num_storage: self.storage.len(),
            num_areas: self.areas().len(),
            total_gen_capacity_mw: self.generators.iter().map(|g| g.pmax).sum(),
            total_demand_mw: self.consumers.iter().map(|c| c.demand).sum(),
            total_storage_mwh: self.storage.iter().map(|s| s.energy_capacity).sum(),
        }
    }

    // =========================================================================
    // Topology views
    // =========================================================================

    /// View honouring each branch's initial in-service status
    pub fn base_view(&self) -> TopologyView<'_> {
        TopologyView::new(self, vec![false; self.branches.len()])
    }

    /// View with additional branches taken out of service.
    ///
    /// The base model is untouched; unknown identifiers are reported together.
    pub fn with_outages(
        &self,
        outages: &[BranchId],
    ) -> Result<TopologyView<'_>, ValidationError> {
        let mut forced_out = vec![false; self.branches.len()];
        let mut diag = Diagnostics::new();
        for id in outages {
            match self.branch_idx(id.as_str()) {
                Some(b) => forced_out[b] = true,
                None => diag.error(
                    IssueKind::UnknownReference,
                    EntityRef::Branch(id.clone()),
                    "unknown branch in outage list",
                ),
            }
        }
        ValidationError::check(diag)?;
        Ok(TopologyView::new(self, forced_out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FillingCurve;

    fn three_node_tables() -> GridTables {
        GridTables::default()
            .with_node(Node::new("A", "north"))
            .with_node(Node::new("B", "north"))
            .with_node(Node::new("C", "south"))
            .with_branch(Branch::ac("AB", "A", "B", 0.1, 100.0))
            .with_branch(Branch::ac("BC", "B", "C", 0.1, 100.0))
            .with_branch(Branch::dc("AC-link", "A", "C", 50.0))
            .with_generator(Generator::new("g1", "A", 200.0, 20.0))
            .with_consumer(Consumer::new("c1", "C", 120.0))
            .with_storage(StorageUnit::at_node("bat", "B", 40.0).with_power_limits(10.0, 10.0))
    }

    #[test]
    fn test_valid_grid_accessors() {
        let grid = GridModel::new(three_node_tables()).expect("valid grid");

        let neighbors: Vec<&str> = grid.neighbors("A").iter().map(|n| n.as_str()).collect();
        assert_eq!(neighbors, vec!["B", "C"]);
        assert_eq!(grid.incident_branches("B").len(), 2);
        assert_eq!(grid.generators_at("A").len(), 1);
        assert_eq!(grid.consumers_at("C")[0].id.as_str(), "c1");
        assert_eq!(grid.storage_at("B").len(), 1);
        assert_eq!(grid.areas(), vec!["north", "south"]);
        assert_eq!(grid.branch_ends(2), (0, 2));

        let stats = grid.stats();
        assert_eq!(stats.num_nodes, 3);
        assert_eq!(stats.num_dc_branches, 1);
        assert!((stats.total_demand_mw - 120.0).abs() < 1e-12);
    }

    #[test]
    fn test_all_violations_are_reported() {
        let tables = three_node_tables()
            .with_node(Node::new("A", "dup"))
            .with_branch(Branch::ac("bad-x", "A", "B", 0.0, 10.0))
            .with_branch(Branch::ac("neg", "A", "B", 0.1, -5.0))
            .with_generator(Generator::new("g2", "Z", 10.0, 5.0))
            .with_consumer(Consumer::new("c2", "Y", -1.0))
            .with_storage(StorageUnit::at_node("s2", "B", 10.0).with_initial_level(20.0));

        let err = GridModel::new(tables).unwrap_err();
        let messages: Vec<String> = err.errors().map(|i| i.to_string()).collect();

        assert!(messages.iter().any(|m| m.contains("duplicate node")), "{messages:?}");
        assert!(messages.iter().any(|m| m.contains("reactance")), "{messages:?}");
        assert!(messages.iter().any(|m| m.contains("capacity = -5")), "{messages:?}");
        assert!(messages.iter().any(|m| m.contains("unknown node 'Z'")), "{messages:?}");
        assert!(messages.iter().any(|m| m.contains("unknown node 'Y'")), "{messages:?}");
        assert!(messages.iter().any(|m| m.contains("demand")), "{messages:?}");
        assert!(messages.iter().any(|m| m.contains("initial_level")), "{messages:?}");
        assert_eq!(err.diagnostics().error_count(), 7);
    }

    #[test]
    fn test_reservoir_requires_inflow_constrained_generator() {
        let tables = GridTables::default()
            .with_node(Node::new("A", "x"))
            .with_generator(Generator::new("thermal", "A", 100.0, 30.0))
            .with_generator(Generator::new("hydro", "A", 100.0, 0.0).inflow_constrained())
            .with_storage(StorageUnit::at_generator("r1", "thermal", 100.0))
            .with_storage(StorageUnit::at_generator("r2", "hydro", 100.0))
            .with_storage(StorageUnit::at_generator("r3", "hydro", 100.0))
            .with_storage(StorageUnit::at_generator("r4", "missing", 100.0));

        let err = GridModel::new(tables).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("not inflow-constrained"), "{text}");
        assert!(text.contains("already has a storage unit"), "{text}");
        assert!(text.contains("unknown generator 'missing'"), "{text}");
        assert_eq!(err.diagnostics().error_count(), 3);
    }

    #[test]
    fn test_reservoir_links_generator_and_node() {
        let tables = GridTables::default()
            .with_node(Node::new("A", "x"))
            .with_node(Node::new("B", "x"))
            .with_branch(Branch::ac("AB", "A", "B", 0.1, 10.0))
            .with_generator(Generator::new("hydro", "B", 100.0, 0.0).inflow_constrained())
            .with_storage(
                StorageUnit::at_generator("res", "hydro", 500.0)
                    .with_filling_curve(FillingCurve::new(vec![(0.0, 1.5), (1.0, 0.5)])),
            );
        let grid = GridModel::new(tables).unwrap();
        assert_eq!(grid.storage_node(0), 1);
        assert_eq!(grid.storage_generator(0), Some(0));
        assert_eq!(grid.generator_storage(0), Some(0));
        assert_eq!(grid.storage_at("B").len(), 1);
    }

    #[test]
    fn test_warnings_do_not_block_construction() {
        let tables = GridTables::default()
            .with_node(Node::new("A", "x"))
            .with_node(Node::new("lonely", "x"))
            .with_generator(Generator::new("g", "A", 10.0, 1.0));
        let grid = GridModel::new(tables).unwrap();
        assert!(grid.warnings().warning_count() > 0);
        assert!(grid
            .warnings()
            .warnings()
            .any(|w| w.entity == EntityRef::Node(NodeId::new("lonely"))));
    }

    #[test]
    fn test_outage_view_leaves_base_untouched() {
        let grid = GridModel::new(three_node_tables()).unwrap();
        let view = grid.with_outages(&[BranchId::new("BC")]).unwrap();
        assert!(!view.is_in_service(1));
        assert!(grid.base_view().is_in_service(1));
        assert!(grid.branches()[1].in_service);

        let err = grid
            .with_outages(&[BranchId::new("nope"), BranchId::new("gone")])
            .unwrap_err();
        assert_eq!(err.diagnostics().error_count(), 2);
    }

    #[test]
    fn test_profile_references() {
        let tables = three_node_tables();
        let mut tables = tables;
        tables.consumers[0].demand_profile = Some(ProfileId::new("load"));
        tables.generators[0].cost_profile = Some(ProfileId::new("fuel"));
        let grid = GridModel::new(tables).unwrap();
        let refs: Vec<&str> = grid
            .profile_references()
            .iter()
            .map(|(p, _, _)| p.as_str())
            .collect();
        assert_eq!(refs, vec!["fuel", "load"]);
    }

    #[test]
    fn test_flexible_consumers_become_storage_units() {
        let flex = crate::FlexibleLoad::new(0.25, 4.0, 40.0).with_value_profile("flexval");
        let tables = three_node_tables()
            .with_consumer(Consumer::new("c2", "A", 80.0).with_flexibility(flex))
            .with_consumer(
                Consumer::new("c3", "B", 0.0)
                    .with_flexibility(crate::FlexibleLoad::new(0.5, 2.0, 10.0)),
            );
        let grid = GridModel::new(tables).unwrap();

        assert_eq!(grid.flexible_units().len(), 1, "zero demand is never flexible");
        assert_eq!(grid.flexible_consumer(0), 1);
        assert_eq!(grid.consumer_flexible(1), Some(0));
        assert_eq!(grid.consumer_flexible(2), None);
        let unit = &grid.flexible_units()[0];
        assert!((unit.energy_capacity - 80.0).abs() < 1e-12);
        assert!((unit.discharge_limit - 20.0).abs() < 1e-12);
        assert_eq!(grid.stats().num_flexible_consumers, 1);

        let flex_ref = grid
            .profile_references()
            .into_iter()
            .find(|(p, _, _)| p.as_str() == "flexval")
            .unwrap();
        assert_eq!(flex_ref.1, ProfileUse::StorageValue);
        assert_eq!(flex_ref.2, EntityRef::Consumer(ConsumerId::new("c2")));
    }

    #[test]
    fn test_flexibility_and_deadband_ranges() {
        let flex = crate::FlexibleLoad::new(1.5, 0.0, 10.0)
            .with_on_off_ratio(0.5)
            .with_initial_fraction(2.0);
        let tables = three_node_tables()
            .with_consumer(Consumer::new("c2", "A", 80.0).with_flexibility(flex))
            .with_storage(StorageUnit::at_node("pump", "A", 10.0).with_charge_deadband(-1.0));

        let err = GridModel::new(tables).unwrap_err();
        let fields: Vec<String> = err.errors().map(|i| i.message.clone()).collect();
        for field in [
            "flexibility.fraction",
            "flexibility.on_off_ratio",
            "flexibility.storage_hours",
            "flexibility.initial_fraction",
            "charge_deadband",
        ] {
            assert!(fields.iter().any(|m| m.starts_with(field)), "{field}: {fields:?}");
        }
        assert_eq!(err.diagnostics().error_count(), 5);
        assert!(err
            .errors()
            .any(|i| i.entity == EntityRef::Storage(StorageId::new("pump"))));
    }
}
