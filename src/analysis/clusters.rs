//! Separates lag-closed recurrences ("soft" cycles) from ordinary dependencies.
//!
//! A lag read `source -> target` closes a soft cycle when `target` leads back
//! to `source`. Every node on such a path must be evaluated period by period
//! together with the pair, so overlapping path sets are merged into clusters.
use super::{dependency_graph, EdgeKind};
use crate::store::{NodeId, NodeKind, Registry};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::unionfind::UnionFind;
use petgraph::visit::{Dfs, Reversed};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Clusters {
    /// Cluster id per node, `None` outside any cluster.
    pub assignment: Vec<Option<usize>>,
    /// Members per cluster, ascending by node id. Evaluation order comes from the schedule.
    pub members: Vec<Vec<NodeId>>,
    /// Lag reads that do not close a soft cycle, as `(node, target)`. They are
    /// scheduled like ordinary reads.
    pub ordered_lags: Vec<(NodeId, NodeId)>,
}

impl Clusters {
    pub fn cluster_of(&self, node: NodeId) -> Option<usize> {
        self.assignment.get(node.index()).copied().flatten()
    }

    pub fn len(&self) -> usize { self.members.len() }

    pub fn is_empty(&self) -> bool { self.members.is_empty() }
}

/// Groups every lag read that closes a soft cycle into clusters.
///
/// Reachability follows lag edges as well as ordinary ones, so `A = SHIFT(B, 1)`
/// with `B = SHIFT(A, 1)` is one cluster and not a fatal cycle. Any lag that
/// breaks the loop is enough for period-by-period stepping to resolve it.
/// A path through a native module is never clustered; its lag stays an
/// ordered edge and the scheduler reports the cycle.
pub fn detect(registry: &Registry) -> Clusters {
    let count = registry.count();
    let graph = dependency_graph(registry);

    let mut union = UnionFind::<usize>::new(count);
    let mut clustered = vec![false; count];
    let mut ordered_lags = Vec::new();

    for source in registry.node_ids() {
        for lag in registry.get_lags(source) {
            match soft_cycle_path(&graph, source, lag.target) {
                Some(path) if path.iter().all(|n| matches!(registry.kinds[n.index()], NodeKind::Calculation(_))) => {
                    for member in &path {
                        clustered[member.index()] = true;
                        union.union(source.index(), member.index());
                    }
                }
                Some(_) => {
                    // A module cannot be stepped period by period; leave the
                    // edge in place so the scheduler reports the cycle.
                    tracing::warn!(
                        source = registry.name(source),
                        target = registry.name(lag.target),
                        "lagged recurrence passes through a module"
                    );
                    ordered_lags.push((source, lag.target));
                }
                None => ordered_lags.push((source, lag.target)),
            }
        }
    }

    // Number clusters by their smallest member so ids are stable across runs.
    let mut groups: BTreeMap<usize, Vec<NodeId>> = BTreeMap::new();
    for i in (0..count).filter(|&i| clustered[i]) {
        groups.entry(union.find(i)).or_default().push(NodeId::new(i));
    }
    let mut members: Vec<Vec<NodeId>> = groups.into_values().collect();
    members.sort_by_key(|m| m[0]);

    let mut assignment = vec![None; count];
    for (cluster, nodes) in members.iter().enumerate() {
        for node in nodes {
            assignment[node.index()] = Some(cluster);
        }
    }

    tracing::debug!(clusters = members.len(), ordered_lags = ordered_lags.len(), "soft cycles detected");

    Clusters { assignment, members, ordered_lags }
}

/// Every node on a path `target ->* x ->* source`, or `None` if `target` never
/// leads back to `source`. Paths may run through other lag reads, so a
/// recurrence closed by two lags is still a soft cycle.
fn soft_cycle_path(graph: &DiGraph<(), EdgeKind>, source: NodeId, target: NodeId) -> Option<Vec<NodeId>> {
    if source == target {
        return Some(vec![source]);
    }

    let reach_from_target = reachable(graph, target);
    if !reach_from_target.contains(&source) {
        return None;
    }

    let mut reaching_source = HashSet::new();
    let reversed = Reversed(graph);
    let mut dfs = Dfs::new(reversed, NodeIndex::new(source.index()));
    while let Some(n) = dfs.next(reversed) {
        reaching_source.insert(NodeId::new(n.index()));
    }

    let mut path: Vec<NodeId> = reach_from_target.intersection(&reaching_source).copied().collect();
    path.sort();
    Some(path)
}

fn reachable(graph: &DiGraph<(), EdgeKind>, start: NodeId) -> HashSet<NodeId> {
    let mut seen = HashSet::new();
    let mut dfs = Dfs::new(graph, NodeIndex::new(start.index()));
    while let Some(n) = dfs.next(graph) {
        seen.insert(NodeId::new(n.index()));
    }
    seen
}
