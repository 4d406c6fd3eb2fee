//! Builds the unified dependency graph over calculations and native modules.
use crate::formula::{Formula, FormulaError};
use crate::store::{
    module_output_reference, module_reference, Calculation, NodeId, NodeKind, NodeMetadata, Registry,
};
use std::collections::HashMap;

/// A native module as the graph sees it: its position, output count and the
/// reference names embedded in its inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleNode {
    pub index: usize,
    pub outputs: usize,
    pub references: Vec<String>,
}

/// Wires one node per calculation and per native module.
///
/// References that do not name a node (resolver inputs, deleted calculations,
/// typos) are dropped here; reporting them is the evaluator's job. Formulas
/// that failed to parse get no edges.
pub fn build(
    calculations: &[Calculation],
    formulas: &[Result<Formula, FormulaError>],
    modules: &[ModuleNode],
    aliases: &HashMap<String, String>,
) -> Registry {
    let mut registry = Registry::new();
    let mut calc_nodes = Vec::with_capacity(calculations.len());

    for (i, calc) in calculations.iter().enumerate() {
        let meta = NodeMetadata { name: calc.reference_name() };
        calc_nodes.push(registry.add_node(NodeKind::Calculation(i), meta));
    }

    let mut outputs: HashMap<String, NodeId> = HashMap::new();
    let mut module_nodes = Vec::with_capacity(modules.len());
    for module in modules {
        let meta = NodeMetadata { name: module_reference(module.index) };
        let node = registry.add_node(NodeKind::Module(module.index), meta);
        if let Some(node) = node {
            for k in 0..module.outputs {
                outputs.insert(module_output_reference(module.index, k), node);
            }
        }
        module_nodes.push(node);
    }

    let resolve = |registry: &Registry, name: &str| -> Option<NodeId> {
        let name = aliases.get(name).map(String::as_str).unwrap_or(name);
        registry.lookup(name).filter(|id| matches!(registry.kinds[id.index()], NodeKind::Calculation(_)))
            .or_else(|| outputs.get(name).copied())
    };

    for (node, parsed) in calc_nodes.iter().zip(formulas) {
        let (Some(node), Ok(formula)) = (node, parsed) else { continue };

        for name in formula.references() {
            match resolve(&registry, name) {
                Some(parent) => registry.add_parent(*node, parent),
                None => tracing::trace!(node = registry.name(*node), reference = %name, "dependency dropped"),
            }
        }
        for (name, periods) in formula.lagged_references() {
            if let Some(target) = resolve(&registry, name) {
                registry.add_lag(*node, target, periods);
            }
        }
    }

    for (node, module) in module_nodes.iter().zip(modules) {
        let Some(node) = node else { continue };
        for name in &module.references {
            if let Some(parent) = resolve(&registry, name) {
                registry.add_parent(*node, parent);
            }
        }
    }

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::parse;

    fn calcs(formulas: &[(u32, &str)]) -> (Vec<Calculation>, Vec<Result<Formula, FormulaError>>) {
        let calcs: Vec<Calculation> = formulas.iter().map(|(id, f)| Calculation::new(*id, *f)).collect();
        let parsed = calcs.iter().map(|c| parse(&c.formula)).collect();
        (calcs, parsed)
    }

    fn parent_names(reg: &Registry, name: &str) -> Vec<String> {
        let id = reg.lookup(name).unwrap();
        reg.get_parents(id).iter().map(|p| reg.name(*p).to_string()).collect()
    }

    #[test]
    fn test_edges_follow_formula_references() {
        let (c, f) = calcs(&[(1, "R2 + R3 * V1"), (2, "R3"), (3, "C1.2")]);
        let reg = build(&c, &f, &[], &HashMap::new());
        assert_eq!(reg.count(), 3);
        assert_eq!(parent_names(&reg, "R1"), vec!["R2", "R3"]);
        assert_eq!(parent_names(&reg, "R2"), vec!["R3"]);
        assert!(parent_names(&reg, "R3").is_empty());
    }

    #[test]
    fn test_unknown_targets_dropped_silently() {
        let (c, f) = calcs(&[(1, "R99 + 1"), (2, "(R1")]);
        let reg = build(&c, &f, &[], &HashMap::new());
        assert!(parent_names(&reg, "R1").is_empty());
        assert!(parent_names(&reg, "R2").is_empty());
    }

    #[test]
    fn test_lag_references_recorded_separately() {
        let (c, f) = calcs(&[(1, "R2 + SHIFT(R1, 1)"), (2, "PREV(R1) + V1")]);
        let reg = build(&c, &f, &[], &HashMap::new());
        let r1 = reg.lookup("R1").unwrap();
        let r2 = reg.lookup("R2").unwrap();
        assert_eq!(reg.get_parents(r1), &[r2]);
        assert!(reg.get_parents(r2).is_empty());
        assert_eq!(reg.get_lags(r1)[0].target, r1);
        assert_eq!(reg.get_lags(r2)[0].target, r1);
        assert_eq!(reg.get_lags(r2)[0].periods, 1);
    }

    #[test]
    fn test_aliases_and_native_module_outputs() {
        let (c, f) = calcs(&[(1, "M1.2 + M2.1"), (7, "V1 * 2")]);
        let modules = vec![ModuleNode {
            index: 0,
            outputs: 3,
            references: vec!["R7".into(), "quarterly".into()],
        }];
        // Module 2 is converted; its first output is calculation 7.
        let aliases = HashMap::from([("M2.1".to_string(), "R7".to_string())]);
        let reg = build(&c, &f, &modules, &aliases);

        assert_eq!(parent_names(&reg, "R1"), vec!["M1", "R7"]);
        assert_eq!(parent_names(&reg, "M1"), vec!["R7"]);
        assert!(reg.lookup("M2").is_none());
    }
}
