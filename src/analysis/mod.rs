//! Static analysis of the unified graph: wiring, soft-cycle clustering and scheduling.
pub mod builder;
pub mod clusters;
pub mod topology;

pub use builder::{build, ModuleNode};
pub use clusters::{detect, Clusters};
pub use topology::{schedule, CycleError, Schedule, Step};

use crate::store::Registry;
use petgraph::graph::{DiGraph, NodeIndex};

/// Describes how a node reads one of its dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// Read in the same period.
    Ordinary,
    /// Read `n` periods back through the lag operator.
    Lag,
}

/// The registry as a petgraph graph, edges pointing from a node to what it reads.
/// Node indices coincide with `NodeId` indices.
pub(crate) fn dependency_graph(registry: &Registry) -> DiGraph<(), EdgeKind> {
    let mut graph = DiGraph::with_capacity(registry.count(), registry.count() * 2);
    for _ in 0..registry.count() {
        graph.add_node(());
    }
    for node in registry.node_ids() {
        let from = NodeIndex::new(node.index());
        for parent in registry.get_parents(node) {
            graph.add_edge(from, NodeIndex::new(parent.index()), EdgeKind::Ordinary);
        }
        for lag in registry.get_lags(node) {
            graph.add_edge(from, NodeIndex::new(lag.target.index()), EdgeKind::Lag);
        }
    }
    graph
}
