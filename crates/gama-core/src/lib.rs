//! # gama-core: grid model for market dispatch simulation
//!
//! Static description of a transmission grid operated as a wholesale market:
//! nodes grouped into price areas, AC lines and controllable DC links,
//! generators with time-varying cost and availability, consumers with demand
//! profiles, and storage units (batteries, pumped hydro, reservoirs).
//!
//! ## Design Philosophy
//!
//! Input tables ([`GridTables`]) are validated once and frozen into a
//! [`GridModel`]. Validation never stops at the first problem: every broken
//! reference, duplicate identifier and out-of-range value is collected into
//! a single [`ValidationError`].
//!
//! Topology lives in an undirected `petgraph` graph whose node weights are
//! node indices and whose edge weights are branch indices. Contingency
//! studies use a [`TopologyView`], a derived view that marks branches out of
//! service without touching the base model.
//!
//! ## Quick Start
//!
//! ```rust
//! use gama_core::*;
//!
//! let tables = GridTables::default()
//!     .with_node(Node::new("A", "north"))
//!     .with_node(Node::new("B", "south"))
//!     .with_branch(Branch::ac("A-B", "A", "B", 0.1, 50.0))
//!     .with_generator(Generator::new("g1", "A", 100.0, 12.0))
//!     .with_consumer(Consumer::new("c1", "B", 80.0));
//!
//! let grid = GridModel::new(tables).expect("valid grid");
//! assert_eq!(grid.base_view().islands().len(), 1);
//! ```
//!
//! ## Modules
//!
//! - [`diagnostics`] - Validation issues keyed by the offending record
//! - [`error`] - [`ValidationError`]
//! - [`grid`] - [`GridModel`] construction and accessors
//! - [`topology`] - Outage views, islands and angle references
//! - [`graph_utils`] - Connected components and graph statistics

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

pub mod diagnostics;
pub mod error;
pub mod graph_utils;
pub mod grid;
pub mod topology;

pub use diagnostics::{Diagnostics, EntityRef, Issue, IssueKind, Severity};
pub use error::ValidationError;
pub use graph_utils::{graph_stats, GraphStats};
pub use grid::{GridModel, GridStats, GridTables, NodeEntities, ProfileUse};
pub use topology::{Island, TopologyView};

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

entity_id!(
    /// Identifier of a grid node
    NodeId
);
entity_id!(
    /// Identifier of a branch (AC line or DC link)
    BranchId
);
entity_id!(
    /// Identifier of a generator
    GeneratorId
);
entity_id!(
    /// Identifier of a consumer (load)
    ConsumerId
);
entity_id!(
    /// Identifier of a storage unit
    StorageId
);
entity_id!(
    /// Name of a time-series profile referenced by entities
    ProfileId
);

fn unbounded() -> f64 {
    f64::INFINITY
}

fn unity() -> f64 {
    1.0
}

fn in_service() -> bool {
    true
}

/// A grid node (bus) belonging to a price area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(default)]
    pub area: String,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, area: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            area: area.into(),
            lat: None,
            lon: None,
        }
    }

    pub fn with_coordinates(mut self, lat: f64, lon: f64) -> Self {
        self.lat = Some(lat);
        self.lon = Some(lon);
        self
    }
}

/// Physical type of a branch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchKind {
    /// AC line: flow follows the angle difference across its reactance.
    #[default]
    Ac,
    /// HVDC link: flow is set directly, limited only by capacity.
    Dc,
}

/// A transmission branch between two nodes.
///
/// `capacity` limits flow in the from→to direction. When `reverse_capacity`
/// is absent the limit is symmetric. An infinite capacity means the branch
/// is unconstrained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub id: BranchId,
    pub from: NodeId,
    pub to: NodeId,
    #[serde(default)]
    pub kind: BranchKind,
    /// Series reactance in per-unit on the system base (AC only)
    #[serde(default)]
    pub reactance: f64,
    #[serde(default = "unbounded")]
    pub capacity: f64,
    #[serde(default)]
    pub reverse_capacity: Option<f64>,
    #[serde(default = "in_service")]
    pub in_service: bool,
}

impl Branch {
    pub fn ac(
        id: impl Into<BranchId>,
        from: impl Into<NodeId>,
        to: impl Into<NodeId>,
        reactance: f64,
        capacity: f64,
    ) -> Self {
        Self {
            id: id.into(),
            from: from.into(),
            to: to.into(),
            kind: BranchKind::Ac,
            reactance,
            capacity,
            reverse_capacity: None,
            in_service: true,
        }
    }

    pub fn dc(
        id: impl Into<BranchId>,
        from: impl Into<NodeId>,
        to: impl Into<NodeId>,
        capacity: f64,
    ) -> Self {
        Self {
            id: id.into(),
            from: from.into(),
            to: to.into(),
            kind: BranchKind::Dc,
            reactance: 0.0,
            capacity,
            reverse_capacity: None,
            in_service: true,
        }
    }

    pub fn with_reverse_capacity(mut self, capacity: f64) -> Self {
        self.reverse_capacity = Some(capacity);
        self
    }

    pub fn out_of_service(mut self) -> Self {
        self.in_service = false;
        self
    }

    pub fn is_ac(&self) -> bool {
        self.kind == BranchKind::Ac
    }

    /// Susceptance in per-unit (1 / x). Only meaningful for AC branches.
    pub fn susceptance(&self) -> f64 {
        1.0 / self.reactance
    }

    /// Maximum flow in the from→to direction (MW)
    pub fn forward_limit(&self) -> f64 {
        self.capacity
    }

    /// Maximum flow in the to→from direction (MW)
    pub fn reverse_limit(&self) -> f64 {
        self.reverse_capacity.unwrap_or(self.capacity)
    }
}

/// A dispatchable or energy-limited generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generator {
    pub id: GeneratorId,
    pub node: NodeId,
    /// Technology tag used for aggregation (e.g. "hydro", "wind")
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub pmin: f64,
    pub pmax: f64,
    /// Marginal cost (currency/MWh), scaled per step by `cost_profile`
    pub marginal_cost: f64,
    #[serde(default)]
    pub cost_profile: Option<ProfileId>,
    /// Capacity factor profile; available capacity is `pmax × profile(t)`
    #[serde(default)]
    pub availability_profile: Option<ProfileId>,
    /// Energy-limited unit whose unused energy is spilled rather than saved
    #[serde(default)]
    pub inflow_constrained: bool,
}

impl Generator {
    pub fn new(
        id: impl Into<GeneratorId>,
        node: impl Into<NodeId>,
        pmax: f64,
        marginal_cost: f64,
    ) -> Self {
        Self {
            id: id.into(),
            node: node.into(),
            kind: String::new(),
            pmin: 0.0,
            pmax,
            marginal_cost,
            cost_profile: None,
            availability_profile: None,
            inflow_constrained: false,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_pmin(mut self, pmin: f64) -> Self {
        self.pmin = pmin;
        self
    }

    pub fn with_cost_profile(mut self, profile: impl Into<ProfileId>) -> Self {
        self.cost_profile = Some(profile.into());
        self
    }

    pub fn with_availability_profile(mut self, profile: impl Into<ProfileId>) -> Self {
        self.availability_profile = Some(profile.into());
        self
    }

    pub fn inflow_constrained(mut self) -> Self {
        self.inflow_constrained = true;
        self
    }
}

/// A consumer (load) with a demand profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consumer {
    pub id: ConsumerId,
    pub node: NodeId,
    /// Reference demand (MW), scaled per step by `demand_profile`
    pub demand: f64,
    #[serde(default)]
    pub demand_profile: Option<ProfileId>,
    /// Price of curtailment for this consumer; the run default applies when unset
    #[serde(default)]
    pub curtailment_cost: Option<f64>,
    #[serde(default)]
    pub flexibility: Option<FlexibleLoad>,
}

impl Consumer {
    pub fn new(id: impl Into<ConsumerId>, node: impl Into<NodeId>, demand: f64) -> Self {
        Self {
            id: id.into(),
            node: node.into(),
            demand,
            demand_profile: None,
            curtailment_cost: None,
            flexibility: None,
        }
    }

    pub fn with_demand_profile(mut self, profile: impl Into<ProfileId>) -> Self {
        self.demand_profile = Some(profile.into());
        self
    }

    pub fn with_curtailment_cost(mut self, cost: f64) -> Self {
        self.curtailment_cost = Some(cost);
        self
    }

    pub fn with_flexibility(mut self, flexibility: FlexibleLoad) -> Self {
        self.flexibility = Some(flexibility);
        self
    }

    /// Share of demand that can be shifted in time; zero for rigid loads.
    pub fn flexible_fraction(&self) -> f64 {
        self.flexibility.as_ref().map_or(0.0, |f| f.fraction)
    }

    /// Whether the consumer has a flexible share worth modelling
    pub fn is_flexible(&self) -> bool {
        self.flexible_fraction() > 0.0 && self.demand > 0.0
    }

    /// The flexible share seen as a storage unit at the consumer's node.
    ///
    /// Flexible consumption charges it; the average flexible demand
    /// (`fraction × demand`) is its fixed discharge. Energy is counted in
    /// MWh of deferred demand, so both efficiencies are one.
    pub fn flexible_storage(&self) -> Option<StorageUnit> {
        let flex = self.flexibility.as_ref().filter(|_| self.is_flexible())?;
        let average = self.demand * flex.fraction;
        let capacity = average * flex.storage_hours;
        let mut unit = StorageUnit::at_node(self.id.as_str(), self.node.clone(), capacity)
            .with_power_limits(average * flex.on_off_ratio, average)
            .with_initial_level(capacity * flex.initial_fraction)
            .with_storage_value(flex.value);
        unit.value_profile = flex.value_profile.clone();
        unit.filling_curve = flex.filling_curve.clone();
        Some(unit)
    }
}

fn half() -> f64 {
    0.5
}

/// Demand that can be moved in time within a bounded backlog.
///
/// `fraction` of the consumer's reference demand is flexible. It may be
/// served at up to `on_off_ratio` times its average rate whenever the nodal
/// price is below the flexibility value, and must be caught up before the
/// backlog of `storage_hours` of average flexible demand runs dry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlexibleLoad {
    pub fraction: f64,
    /// Peak flexible consumption relative to the average flexible demand
    #[serde(default = "unity")]
    pub on_off_ratio: f64,
    /// Backlog size in hours of average flexible demand
    pub storage_hours: f64,
    /// Willingness to pay for flexible consumption (currency/MWh)
    pub value: f64,
    #[serde(default)]
    pub value_profile: Option<ProfileId>,
    #[serde(default)]
    pub filling_curve: Option<FillingCurve>,
    /// Backlog filling before the first step, as a fraction of its size
    #[serde(default = "half")]
    pub initial_fraction: f64,
}

impl FlexibleLoad {
    pub fn new(fraction: f64, storage_hours: f64, value: f64) -> Self {
        Self {
            fraction,
            on_off_ratio: 1.0,
            storage_hours,
            value,
            value_profile: None,
            filling_curve: None,
            initial_fraction: 0.5,
        }
    }

    pub fn with_on_off_ratio(mut self, ratio: f64) -> Self {
        self.on_off_ratio = ratio;
        self
    }

    pub fn with_initial_fraction(mut self, fraction: f64) -> Self {
        self.initial_fraction = fraction;
        self
    }

    pub fn with_value_profile(mut self, profile: impl Into<ProfileId>) -> Self {
        self.value_profile = Some(profile.into());
        self
    }

    pub fn with_filling_curve(mut self, curve: FillingCurve) -> Self {
        self.filling_curve = Some(curve);
        self
    }
}

/// Where a storage unit connects to the grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum StorageAttachment {
    /// Stand-alone storage with its own charge and discharge
    Node(NodeId),
    /// Reservoir feeding a generator; the generator output is the discharge
    Generator(GeneratorId),
}

/// Piecewise-linear multiplier on storage value as a function of filling
/// fraction, given as `(fraction, multiplier)` breakpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FillingCurve {
    points: Vec<(f64, f64)>,
}

impl FillingCurve {
    pub fn new(points: Vec<(f64, f64)>) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[(f64, f64)] {
        &self.points
    }

    /// Multiplier at the given filling fraction, flat beyond the end points.
    pub fn evaluate(&self, fraction: f64) -> f64 {
        let (first, last) = match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return 1.0,
        };
        if fraction <= first.0 {
            return first.1;
        }
        if fraction >= last.0 {
            return last.1;
        }
        for pair in self.points.windows(2) {
            let (x0, y0) = pair[0];
            let (x1, y1) = pair[1];
            if fraction >= x0 && fraction <= x1 {
                if x1 - x0 <= f64::EPSILON {
                    return y1;
                }
                let t = (fraction - x0) / (x1 - x0);
                return y0 + t * (y1 - y0);
            }
        }
        last.1
    }
}

/// Battery, pumped-hydro or reservoir storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageUnit {
    pub id: StorageId,
    pub attachment: StorageAttachment,
    /// Usable energy capacity (MWh)
    pub energy_capacity: f64,
    /// Charging (pumping) power limit (MW)
    #[serde(default)]
    pub charge_limit: f64,
    /// Charging only pays when the price sits this far below the storage value
    #[serde(default)]
    pub charge_deadband: f64,
    /// Discharge power limit (MW); generator-attached units use the generator limit
    #[serde(default)]
    pub discharge_limit: f64,
    #[serde(default = "unity")]
    pub charge_efficiency: f64,
    #[serde(default = "unity")]
    pub discharge_efficiency: f64,
    /// Level before the first step (MWh)
    #[serde(default)]
    pub initial_level: f64,
    /// Opportunity value of stored energy (currency/MWh)
    #[serde(default)]
    pub storage_value: f64,
    #[serde(default)]
    pub value_profile: Option<ProfileId>,
    #[serde(default)]
    pub filling_curve: Option<FillingCurve>,
    /// Natural inflow (MW), scaled per step by `inflow_profile`
    #[serde(default)]
    pub inflow: f64,
    #[serde(default)]
    pub inflow_profile: Option<ProfileId>,
}

impl StorageUnit {
    pub fn at_node(
        id: impl Into<StorageId>,
        node: impl Into<NodeId>,
        energy_capacity: f64,
    ) -> Self {
        Self::new(id, StorageAttachment::Node(node.into()), energy_capacity)
    }

    pub fn at_generator(
        id: impl Into<StorageId>,
        generator: impl Into<GeneratorId>,
        energy_capacity: f64,
    ) -> Self {
        Self::new(
            id,
            StorageAttachment::Generator(generator.into()),
            energy_capacity,
        )
    }

    fn new(
        id: impl Into<StorageId>,
        attachment: StorageAttachment,
        energy_capacity: f64,
    ) -> Self {
        Self {
            id: id.into(),
            attachment,
            energy_capacity,
            charge_limit: 0.0,
            charge_deadband: 0.0,
            discharge_limit: 0.0,
            charge_efficiency: 1.0,
            discharge_efficiency: 1.0,
            initial_level: 0.0,
            storage_value: 0.0,
            value_profile: None,
            filling_curve: None,
            inflow: 0.0,
            inflow_profile: None,
        }
    }

    pub fn with_power_limits(mut self, charge: f64, discharge: f64) -> Self {
        self.charge_limit = charge;
        self.discharge_limit = discharge;
        self
    }

    pub fn with_charge_deadband(mut self, deadband: f64) -> Self {
        self.charge_deadband = deadband;
        self
    }

    pub fn with_efficiencies(mut self, charge: f64, discharge: f64) -> Self {
        self.charge_efficiency = charge;
        self.discharge_efficiency = discharge;
        self
    }

    pub fn with_initial_level(mut self, level: f64) -> Self {
        self.initial_level = level;
        self
    }

    pub fn with_storage_value(mut self, value: f64) -> Self {
        self.storage_value = value;
        self
    }

    pub fn with_value_profile(mut self, profile: impl Into<ProfileId>) -> Self {
        self.value_profile = Some(profile.into());
        self
    }

    pub fn with_filling_curve(mut self, curve: FillingCurve) -> Self {
        self.filling_curve = Some(curve);
        self
    }

    pub fn with_inflow(mut self, inflow: f64, profile: Option<ProfileId>) -> Self {
        self.inflow = inflow;
        self.inflow_profile = profile;
        self
    }

    pub fn round_trip_efficiency(&self) -> f64 {
        self.charge_efficiency * self.discharge_efficiency
    }

    /// Level as a fraction of capacity; zero-capacity units count as empty.
    pub fn filling_fraction(&self, level: f64) -> f64 {
        if self.energy_capacity > 0.0 {
            (level / self.energy_capacity).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}
