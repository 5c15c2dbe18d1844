use crate::GridModel;
use petgraph::algo::connected_components;
use petgraph::graph::NodeIndex;
use serde::Serialize;
use std::collections::VecDeque;

/// Summary statistics of the grid topology (density/degree/connected components).
#[derive(Debug, Clone, Serialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub connected_components: usize,
    pub min_degree: usize,
    pub avg_degree: f64,
    pub max_degree: usize,
    pub density: f64,
}

/// Graph-level statistics over all branches regardless of status.
pub fn graph_stats(grid: &GridModel) -> GraphStats {
    let graph = grid.graph();
    let node_count = graph.node_count();
    let edge_count = graph.edge_count();
    let degrees: Vec<usize> = graph
        .node_indices()
        .map(|node| graph.neighbors(node).count())
        .collect();
    let min_degree = degrees.iter().copied().min().unwrap_or(0);
    let max_degree = degrees.iter().copied().max().unwrap_or(0);
    let avg_degree = if node_count == 0 {
        0.0
    } else {
        degrees.iter().sum::<usize>() as f64 / node_count as f64
    };
    let density = if node_count < 2 {
        0.0
    } else {
        2.0 * edge_count as f64 / (node_count as f64 * (node_count as f64 - 1.0))
    };
    GraphStats {
        node_count,
        edge_count,
        connected_components: connected_components(graph),
        min_degree,
        avg_degree,
        max_degree,
        density,
    }
}

/// Connected components (breadth-first search) over the branches accepted by
/// `include_branch`.
///
/// Components come out ordered by their lowest node index and each member
/// list is sorted, so the first member is the lowest-index node.
pub fn components<F>(grid: &GridModel, include_branch: F) -> Vec<Vec<usize>>
where
    F: Fn(usize) -> bool,
{
    let graph = grid.graph();
    let mut visited = vec![false; graph.node_count()];
    let mut result = Vec::new();
    for start in 0..graph.node_count() {
        if visited[start] {
            continue;
        }
        let mut queue = VecDeque::from([start]);
        visited[start] = true;
        let mut members = Vec::new();
        while let Some(node) = queue.pop_front() {
            members.push(node);
            for edge in graph.edges(NodeIndex::new(node)) {
                let branch = *edge.weight();
                if !include_branch(branch) {
                    continue;
                }
                let (from, to) = grid.branch_ends(branch);
                let other = if from == node { to } else { from };
                if !visited[other] {
                    visited[other] = true;
                    queue.push_back(other);
                }
            }
        }
        members.sort_unstable();
        result.push(members);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Branch, GridTables, Node};

    fn ring_with_tail() -> GridModel {
        let tables = GridTables::default()
            .with_node(Node::new("1", "a"))
            .with_node(Node::new("2", "a"))
            .with_node(Node::new("3", "a"))
            .with_node(Node::new("4", "b"))
            .with_branch(Branch::ac("12", "1", "2", 0.1, 10.0))
            .with_branch(Branch::ac("23", "2", "3", 0.1, 10.0))
            .with_branch(Branch::ac("31", "3", "1", 0.1, 10.0))
            .with_branch(Branch::dc("34", "3", "4", 10.0));
        GridModel::new(tables).unwrap()
    }

    #[test]
    fn test_graph_stats() {
        let stats = graph_stats(&ring_with_tail());
        assert_eq!(stats.node_count, 4);
        assert_eq!(stats.edge_count, 4);
        assert_eq!(stats.connected_components, 1);
        assert_eq!(stats.min_degree, 1);
        assert_eq!(stats.max_degree, 3);
    }

    #[test]
    fn test_components_respect_filter() {
        let grid = ring_with_tail();
        assert_eq!(components(&grid, |_| true), vec![vec![0, 1, 2, 3]]);
        let ac_only = components(&grid, |b| grid.branches()[b].is_ac());
        assert_eq!(ac_only, vec![vec![0, 1, 2], vec![3]]);
        assert_eq!(components(&grid, |_| false).len(), 4);
    }
}
