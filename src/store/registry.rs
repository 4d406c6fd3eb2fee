use super::types::*;
use std::collections::HashMap;

/// Dense node storage for the unified dependency graph.
///
/// Nodes are registered first (one per calculation and per native module) and
/// wired afterwards, since formulas may reference nodes declared later.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    pub kinds: Vec<NodeKind>,
    pub meta: Vec<NodeMetadata>,

    // Topology: ordinary reads and reads through the lag operator.
    pub parents: Vec<Dependencies>,
    pub lags: Vec<LagDependencies>,

    by_name: HashMap<String, NodeId>,
}

impl Registry {
    pub fn new() -> Self { Self::default() }
    pub fn count(&self) -> usize { self.kinds.len() }

    /// Registers a node. Returns `None` if the name is already taken.
    pub fn add_node(&mut self, kind: NodeKind, meta: NodeMetadata) -> Option<NodeId> {
        if self.by_name.contains_key(&meta.name) {
            return None;
        }
        let id = NodeId::new(self.kinds.len());
        self.by_name.insert(meta.name.clone(), id);
        self.kinds.push(kind);
        self.meta.push(meta);
        self.parents.push(Dependencies::new());
        self.lags.push(LagDependencies::new());
        Some(id)
    }

    /// Records that `node` reads `parent` in the current period. A self-read is
    /// kept: it is a genuine cycle the scheduler has to report.
    pub fn add_parent(&mut self, node: NodeId, parent: NodeId) {
        let deps = &mut self.parents[node.index()];
        if !deps.contains(&parent) {
            deps.push(parent);
        }
    }

    /// Records that `node` reads `target` shifted back by `periods`.
    pub fn add_lag(&mut self, node: NodeId, target: NodeId, periods: u32) {
        let lags = &mut self.lags[node.index()];
        if !lags.iter().any(|l| l.target == target) {
            lags.push(LagEdge { target, periods });
        }
    }

    pub fn lookup(&self, name: &str) -> Option<NodeId> { self.by_name.get(name).copied() }

    #[inline(always)]
    pub fn get_parents(&self, id: NodeId) -> &[NodeId] { &self.parents[id.index()] }

    #[inline(always)]
    pub fn get_lags(&self, id: NodeId) -> &[LagEdge] { &self.lags[id.index()] }

    pub fn name(&self, id: NodeId) -> &str { &self.meta[id.index()].name }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> { (0..self.count()).map(NodeId::new) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_meta(name: &str) -> NodeMetadata {
        NodeMetadata { name: name.into() }
    }

    #[test]
    fn test_forward_references_wire_after_registration() {
        let mut reg = Registry::new();
        let a = reg.add_node(NodeKind::Calculation(0), make_meta("R1")).unwrap();
        let b = reg.add_node(NodeKind::Calculation(1), make_meta("R2")).unwrap();
        reg.add_parent(a, b);
        reg.add_parent(a, b);
        assert_eq!(reg.get_parents(a), &[b]);
        assert!(reg.get_parents(b).is_empty());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut reg = Registry::new();
        assert!(reg.add_node(NodeKind::Calculation(0), make_meta("R1")).is_some());
        assert!(reg.add_node(NodeKind::Calculation(1), make_meta("R1")).is_none());
        assert_eq!(reg.lookup("R1"), Some(NodeId(0)));
    }
}
