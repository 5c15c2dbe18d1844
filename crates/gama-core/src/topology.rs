//! Derived topology views for contingency analysis.
//!
//! A [`TopologyView`] pairs the immutable [`GridModel`] with a set of branches
//! taken out of service. It precomputes the two partitions the dispatch
//! problem needs:
//!
//! - **islands**: components connected by in-service AC branches. Angles are
//!   only comparable within an island, so each island fixes exactly one
//!   reference node (its lowest-index node) to zero angle.
//! - **balance regions**: components connected by any in-service branch, AC
//!   or DC. Power can only be exchanged inside a region.

use crate::graph_utils::components;
use crate::{BranchId, GridModel};
use serde::Serialize;

/// AC-connected component with its angle reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Island {
    pub id: usize,
    /// Node indices, ascending
    pub nodes: Vec<usize>,
    /// Node whose angle is fixed to zero
    pub reference: usize,
}

#[derive(Debug, Clone)]
pub struct TopologyView<'a> {
    grid: &'a GridModel,
    in_service: Vec<bool>,
    islands: Vec<Island>,
    node_island: Vec<usize>,
    regions: Vec<Vec<usize>>,
}

impl<'a> TopologyView<'a> {
    pub(crate) fn new(grid: &'a GridModel, forced_out: Vec<bool>) -> Self {
        let in_service: Vec<bool> = grid
            .branches()
            .iter()
            .zip(forced_out)
            .map(|(branch, out)| branch.in_service && !out)
            .collect();

        let ac_components = components(grid, |b| in_service[b] && grid.branches()[b].is_ac());
        let mut node_island = vec![0; grid.nodes().len()];
        let islands: Vec<Island> = ac_components
            .into_iter()
            .enumerate()
            .map(|(id, nodes)| {
                for &n in &nodes {
                    node_island[n] = id;
                }
                Island {
                    id,
                    reference: nodes[0],
                    nodes,
                }
            })
            .collect();
        let regions = components(grid, |b| in_service[b]);

        Self {
            grid,
            in_service,
            islands,
            node_island,
            regions,
        }
    }

    pub fn grid(&self) -> &'a GridModel {
        self.grid
    }

    pub fn is_in_service(&self, branch: usize) -> bool {
        self.in_service[branch]
    }

    pub fn in_service_branches(&self) -> impl Iterator<Item = usize> + '_ {
        self.in_service
            .iter()
            .enumerate()
            .filter_map(|(b, &on)| on.then_some(b))
    }

    /// Identifiers of every branch that is out in this view
    pub fn out_of_service(&self) -> Vec<&'a BranchId> {
        let grid = self.grid;
        self.in_service
            .iter()
            .enumerate()
            .filter(|(_, &on)| !on)
            .map(|(b, _)| &grid.branches()[b].id)
            .collect()
    }

    pub fn islands(&self) -> &[Island] {
        &self.islands
    }

    pub fn island_of(&self, node: usize) -> &Island {
        &self.islands[self.node_island[node]]
    }

    pub fn is_reference(&self, node: usize) -> bool {
        self.island_of(node).reference == node
    }

    pub fn balance_regions(&self) -> &[Vec<usize>] {
        &self.regions
    }
}

#[cfg(test)]
mod tests {
    use crate::{Branch, BranchId, GridModel, GridTables, Node};

    /// Two AC islands {A, B} and {C, D} joined by a DC link B-C.
    fn two_islands() -> GridModel {
        let tables = GridTables::default()
            .with_node(Node::new("A", "west"))
            .with_node(Node::new("B", "west"))
            .with_node(Node::new("C", "east"))
            .with_node(Node::new("D", "east"))
            .with_branch(Branch::ac("AB", "A", "B", 0.1, 100.0))
            .with_branch(Branch::dc("BC", "B", "C", 100.0))
            .with_branch(Branch::ac("CD", "C", "D", 0.1, 100.0));
        GridModel::new(tables).unwrap()
    }

    #[test]
    fn test_each_ac_island_gets_one_reference() {
        let grid = two_islands();
        let view = grid.base_view();
        assert_eq!(view.islands().len(), 2);
        assert_eq!(view.islands()[0].reference, 0);
        assert_eq!(view.islands()[1].reference, 2);
        assert!(view.is_reference(2));
        assert!(!view.is_reference(3));
        assert_eq!(view.balance_regions().len(), 1);
    }

    #[test]
    fn test_outage_splits_balance_region() {
        let grid = two_islands();
        let view = grid.with_outages(&[BranchId::new("BC")]).unwrap();
        assert_eq!(view.balance_regions(), &[vec![0, 1], vec![2, 3]]);
        assert_eq!(view.out_of_service(), vec![&BranchId::new("BC")]);
        assert_eq!(view.in_service_branches().collect::<Vec<_>>(), vec![0, 2]);

        let view = grid.with_outages(&[BranchId::new("CD")]).unwrap();
        assert_eq!(view.islands().len(), 3);
        assert_eq!(view.island_of(3).nodes, vec![3]);
        assert!(view.is_reference(3));
    }

    #[test]
    fn test_initial_status_is_honoured() {
        let tables = GridTables::default()
            .with_node(Node::new("A", "x"))
            .with_node(Node::new("B", "x"))
            .with_branch(Branch::ac("AB", "A", "B", 0.1, 10.0).out_of_service());
        let grid = GridModel::new(tables).unwrap();
        let view = grid.base_view();
        assert!(!view.is_in_service(0));
        assert_eq!(view.islands().len(), 2);
    }
}
