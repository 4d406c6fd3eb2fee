use super::clusters::Clusters;
use crate::store::{NodeId, NodeKind, Registry};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use smallvec::SmallVec;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// One unit of work for the evaluation driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Calculation(NodeId),
    Module(NodeId),
    /// All members of a cluster, evaluated together at its last member's position.
    Cluster(usize),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schedule {
    /// Every node, dependencies first.
    pub order: Vec<NodeId>,
    pub steps: Vec<Step>,
    /// Per cluster, members in evaluation order.
    pub cluster_orders: Vec<Vec<NodeId>>,
}

/// Nodes that could not be ordered: those on a cycle, and those merely
/// waiting on one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleError {
    pub cycle: Vec<NodeId>,
    pub blocked: Vec<NodeId>,
}

/// Orders every node with a stable Kahn sort (ready nodes leave in id order).
///
/// A node reading any member of a cluster it does not belong to is made to
/// wait for *all* of that cluster's members, since the cluster publishes its
/// results only once its last member has been evaluated.
pub fn schedule(registry: &Registry, clusters: &Clusters) -> Result<Schedule, CycleError> {
    let count = registry.count();
    let deps = scheduling_dependencies(registry, clusters);

    let mut in_degree = vec![0usize; count];
    let mut children: Vec<SmallVec<[NodeId; 4]>> = vec![SmallVec::new(); count];
    for node in registry.node_ids() {
        in_degree[node.index()] = deps[node.index()].len();
        for &parent in &deps[node.index()] {
            children[parent.index()].push(node);
        }
    }

    let mut ready: BinaryHeap<Reverse<NodeId>> =
        registry.node_ids().filter(|n| in_degree[n.index()] == 0).map(Reverse).collect();
    let mut order = Vec::with_capacity(count);

    while let Some(Reverse(node)) = ready.pop() {
        order.push(node);
        for &child in &children[node.index()] {
            let d = &mut in_degree[child.index()];
            *d -= 1;
            if *d == 0 {
                ready.push(Reverse(child));
            }
        }
    }

    if order.len() != count {
        return Err(residual_cycles(registry, &deps, &in_degree));
    }

    let mut cluster_orders: Vec<Vec<NodeId>> = vec![Vec::new(); clusters.len()];
    let mut steps = Vec::with_capacity(count);
    for &node in &order {
        match clusters.cluster_of(node) {
            Some(c) => {
                cluster_orders[c].push(node);
                if cluster_orders[c].len() == clusters.members[c].len() {
                    steps.push(Step::Cluster(c));
                }
            }
            None => steps.push(match registry.kinds[node.index()] {
                NodeKind::Calculation(_) => Step::Calculation(node),
                NodeKind::Module(_) => Step::Module(node),
            }),
        }
    }

    tracing::debug!(nodes = count, steps = steps.len(), "schedule built");
    Ok(Schedule { order, steps, cluster_orders })
}

/// Per node, the nodes that must be evaluated before it.
fn scheduling_dependencies(registry: &Registry, clusters: &Clusters) -> Vec<SmallVec<[NodeId; 4]>> {
    let mut raw: Vec<SmallVec<[NodeId; 4]>> =
        registry.node_ids().map(|n| registry.get_parents(n).iter().copied().collect()).collect();
    for &(node, target) in &clusters.ordered_lags {
        raw[node.index()].push(target);
    }

    raw.into_iter()
        .enumerate()
        .map(|(i, parents)| {
            let own = clusters.assignment[i];
            let mut out: SmallVec<[NodeId; 4]> = SmallVec::new();
            let mut push = |n: NodeId| {
                if !out.contains(&n) {
                    out.push(n);
                }
            };
            for parent in parents {
                match clusters.cluster_of(parent) {
                    Some(c) if Some(c) != own => clusters.members[c].iter().for_each(|m| push(*m)),
                    _ => push(parent),
                }
            }
            out
        })
        .collect()
}

fn residual_cycles(registry: &Registry, deps: &[SmallVec<[NodeId; 4]>], in_degree: &[usize]) -> CycleError {
    let residual: Vec<NodeId> = registry.node_ids().filter(|n| in_degree[n.index()] > 0).collect();

    let mut graph: DiGraph<NodeId, ()> = DiGraph::new();
    let mut index: HashMap<NodeId, NodeIndex> = HashMap::new();
    for &n in &residual {
        index.insert(n, graph.add_node(n));
    }
    for &n in &residual {
        for parent in &deps[n.index()] {
            if let Some(&p) = index.get(parent) {
                graph.add_edge(index[&n], p, ());
            }
        }
    }

    let mut cycle = Vec::new();
    for scc in tarjan_scc(&graph) {
        let on_cycle = scc.len() > 1 || graph.contains_edge(scc[0], scc[0]);
        if on_cycle {
            cycle.extend(scc.iter().map(|i| graph[*i]));
        }
    }
    cycle.sort();
    let blocked = residual.into_iter().filter(|n| !cycle.contains(n)).collect();

    CycleError { cycle, blocked }
}
