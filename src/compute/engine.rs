//! The unified evaluation driver: one graph, one schedule, one pass.
use super::cluster::{evaluate_cluster, ClusterMember};
use super::ledger::{ComputationError, Ledger};
use crate::analysis::{self, ModuleNode, Step};
use crate::config::{ConfigError, EngineConfig};
use crate::formula::{parse, Formula, FormulaError, PeriodEvaluator};
use crate::modules::{InputKind, InputSpec, ModuleCatalog, ModuleInputs, ModuleTemplate, Template};
use crate::store::{
    module_output_reference, module_reference, InputValue, Model, ModuleInstance, NodeId, NodeKind,
    ReferenceContext, Registry, SymbolId, SymbolOrigin, SymbolTable,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors that abort a whole run. Per-calculation failures are reported in
/// [`Evaluation`] instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("circular dependency between {}", .cycle.join(", "))]
    CircularDependency { cycle: Vec<String>, blocked: Vec<String> },
    #[error("reference '{name}' has {found} periods, expected {expected}")]
    LengthMismatch { name: String, expected: usize, found: usize },
    #[error("reference name '{name}' clashes with an existing {existing}")]
    DuplicateReference { name: String, existing: SymbolOrigin },
    #[error("module {module} uses unknown template '{template}'")]
    UnknownTemplate { module: String, template: String },
}

/// Result maps of one run. Failed nodes appear zero-filled alongside an error entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub calculation_results: BTreeMap<String, Vec<f64>>,
    /// Native module outputs and alias entries for converted ones.
    pub module_outputs: BTreeMap<String, Vec<f64>>,
    pub calculation_errors: BTreeMap<String, String>,
    pub module_errors: BTreeMap<String, String>,
    /// Cluster members in evaluation order.
    pub clusters: Vec<Vec<String>>,
    /// Node names in the order they were evaluated.
    pub order: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Engine {
    config: EngineConfig,
    catalog: ModuleCatalog,
}

impl Default for Engine {
    fn default() -> Self { Self { config: EngineConfig::default(), catalog: ModuleCatalog::standard() } }
}

impl Engine {
    /// An engine with the standard module catalog. Rejects configs that fail [`EngineConfig::validate`].
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        Self::with_catalog(config, ModuleCatalog::standard())
    }

    pub fn with_catalog(config: EngineConfig, catalog: ModuleCatalog) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, catalog })
    }

    pub fn config(&self) -> &EngineConfig { &self.config }

    pub fn catalog_mut(&mut self) -> &mut ModuleCatalog { &mut self.catalog }

    /// Evaluates every calculation and native module of `model`.
    ///
    /// Each node is written exactly once, in an order where everything it
    /// reads has already been written. Lag-closed recurrences are evaluated
    /// period by period as a unit.
    pub fn evaluate(&self, model: &Model, context: &ReferenceContext) -> Result<Evaluation, EngineError> {
        let _span = tracing::info_span!(
            "evaluate",
            periods = model.timeline.len(),
            calculations = model.calculations.len(),
            modules = model.modules.len()
        )
        .entered();

        let plan = Plan::compile(model, context, &self.catalog)?;
        let schedule = {
            let _phase = tracing::info_span!("schedule", nodes = plan.registry.count()).entered();
            let clusters = analysis::detect(&plan.registry);
            analysis::schedule(&plan.registry, &clusters).map_err(|e| {
                let names = |nodes: &[NodeId]| -> Vec<String> {
                    nodes.iter().map(|n| plan.registry.name(*n).to_string()).collect()
                };
                let err = EngineError::CircularDependency { cycle: names(&e.cycle), blocked: names(&e.blocked) };
                tracing::error!(error = %err, "run aborted");
                err
            })?
        };

        let mut run = Run::new(&plan, model, context, &self.config);
        {
            let _phase = tracing::info_span!("execute", steps = schedule.steps.len()).entered();
            for step in &schedule.steps {
                match *step {
                    Step::Calculation(node) => {
                        if let NodeKind::Calculation(i) = plan.registry.kinds[node.index()] {
                            run.calculation(i);
                        }
                    }
                    Step::Module(node) => {
                        if let NodeKind::Module(i) = plan.registry.kinds[node.index()] {
                            run.module(i);
                        }
                    }
                    Step::Cluster(c) => run.cluster(&schedule.cluster_orders[c]),
                }
            }
        }

        let mut evaluation = run.finish(model);
        evaluation.clusters = schedule
            .cluster_orders
            .iter()
            .map(|members| members.iter().map(|n| plan.registry.name(*n).to_string()).collect())
            .collect();
        evaluation.order = schedule.order.iter().map(|n| plan.registry.name(*n).to_string()).collect();
        Ok(evaluation)
    }
}

/// A native module instance with its template resolved and inputs parsed.
struct NativeModule<'a> {
    instance: &'a ModuleInstance,
    template: &'a dyn ModuleTemplate,
    outputs: Vec<SymbolId>,
    /// Parsed text for evaluated inputs; `None` for numbers, choices and missing inputs.
    inputs: Vec<(InputSpec, Option<Result<Formula, FormulaError>>)>,
}

/// Everything derived from the model before evaluation starts.
struct Plan<'a> {
    symbols: SymbolTable,
    calc_symbols: Vec<SymbolId>,
    formulas: Vec<Result<Formula<SymbolId>, ComputationError>>,
    natives: Vec<Option<NativeModule<'a>>>,
    registry: Registry,
}

impl<'a> Plan<'a> {
    fn compile(model: &'a Model, context: &ReferenceContext, catalog: &'a ModuleCatalog) -> Result<Self, EngineError> {
        let _phase = tracing::info_span!("compile").entered();
        let periods = model.timeline.len();

        let mut symbols = SymbolTable::new();
        for (name, values) in context.iter() {
            if values.len() != periods {
                return Err(EngineError::LengthMismatch { name: name.clone(), expected: periods, found: values.len() });
            }
            intern(&mut symbols, name, SymbolOrigin::Reference)?;
        }

        let calc_symbols = model
            .calculations
            .iter()
            .map(|c| intern(&mut symbols, &c.reference_name(), SymbolOrigin::Calculation))
            .collect::<Result<Vec<_>, _>>()?;

        let mut natives = Vec::with_capacity(model.modules.len());
        let mut module_nodes = Vec::new();
        for (i, instance) in model.modules.iter().enumerate() {
            let template = match catalog.get(&instance.template_id) {
                Some(Template::Native(t)) => t,
                Some(Template::Converted { outputs }) => {
                    for (k, output) in outputs.iter().enumerate() {
                        let reference = module_output_reference(i, k);
                        if !model.aliases.contains_key(&reference) {
                            tracing::warn!(%reference, output = %output, "converted module output has no alias");
                        }
                    }
                    natives.push(None);
                    continue;
                }
                None => {
                    return Err(EngineError::UnknownTemplate {
                        module: module_reference(i),
                        template: instance.template_id.clone(),
                    })
                }
            };

            let outputs = (0..template.outputs().len())
                .map(|k| intern(&mut symbols, &module_output_reference(i, k), SymbolOrigin::ModuleOutput))
                .collect::<Result<Vec<_>, _>>()?;

            let inputs: Vec<_> = template
                .inputs()
                .iter()
                .map(|spec| {
                    let parsed = match instance.inputs.get(spec.name) {
                        Some(InputValue::Text(src)) if spec.is_evaluated() => Some(parse(src)),
                        _ => None,
                    };
                    (*spec, parsed)
                })
                .collect();

            // A disabled module does not read its inputs.
            let references = if instance.enabled {
                inputs
                    .iter()
                    .filter_map(|(_, parsed)| parsed.as_ref()?.as_ref().ok())
                    .flat_map(|f| f.all_references().into_iter().cloned())
                    .collect()
            } else {
                Vec::new()
            };
            module_nodes.push(ModuleNode {
                index: i,
                outputs: outputs.len(),
                references,
            });
            natives.push(Some(NativeModule { instance, template, outputs, inputs }));
        }

        let mut aliases: Vec<(&String, &String)> = model.aliases.iter().collect();
        aliases.sort();
        for (alias, target) in aliases {
            match symbols.get(target) {
                Some(sym) => symbols
                    .alias(alias, sym)
                    .map_err(|existing| EngineError::DuplicateReference { name: alias.clone(), existing })?,
                None => tracing::warn!(alias = %alias, target = %target, "alias target does not exist"),
            }
        }

        let parsed: Vec<Result<Formula, FormulaError>> = model.calculations.iter().map(|c| parse(&c.formula)).collect();
        let registry = analysis::build(&model.calculations, &parsed, &module_nodes, &model.aliases);
        let formulas = parsed.iter().map(|p| bind(p, &symbols)).collect();

        tracing::debug!(symbols = symbols.len(), nodes = registry.count(), "model compiled");
        Ok(Plan { symbols, calc_symbols, formulas, natives, registry })
    }
}

fn intern(symbols: &mut SymbolTable, name: &str, origin: SymbolOrigin) -> Result<SymbolId, EngineError> {
    symbols.intern(name, origin).map_err(|existing| EngineError::DuplicateReference { name: name.to_string(), existing })
}

/// Resolves a parsed formula's reference names to symbols.
fn bind(parsed: &Result<Formula, FormulaError>, symbols: &SymbolTable) -> Result<Formula<SymbolId>, ComputationError> {
    let formula = parsed.as_ref().map_err(|e| ComputationError::Formula(e.clone()))?;
    formula.try_map_refs(|name| symbols.get(name).ok_or_else(|| ComputationError::UnknownReference { name: name.clone() }))
}

/// Mutable state of one run.
struct Run<'p, 'a> {
    plan: &'p Plan<'a>,
    model: &'a Model,
    config: &'p EngineConfig,
    evaluator: PeriodEvaluator<'a>,
    ledger: Ledger,
    module_errors: BTreeMap<String, String>,
}

impl<'p, 'a> Run<'p, 'a> {
    fn new(plan: &'p Plan<'a>, model: &'a Model, context: &ReferenceContext, config: &'p EngineConfig) -> Self {
        let mut ledger = Ledger::new();
        ledger.ensure_capacity(plan.symbols.len());
        for (name, values) in context.iter() {
            if let Some(sym) = plan.symbols.get(name) {
                ledger.insert(sym, Ok(values.clone()));
            }
        }
        Self {
            plan,
            model,
            config,
            evaluator: PeriodEvaluator::new(&model.timeline, config.zero_non_finite),
            ledger,
            module_errors: BTreeMap::new(),
        }
    }

    fn periods(&self) -> usize { self.model.timeline.len() }

    /// An upstream error if any reference of `formula` failed.
    fn upstream_failure(&self, formula: &Formula<SymbolId>) -> Option<ComputationError> {
        self.ledger
            .first_failure(formula.all_references().into_iter().copied())
            .map(|(sym, cause)| ComputationError::upstream(self.plan.symbols.name(sym), cause))
    }

    fn calculation(&mut self, i: usize) {
        let symbol = self.plan.calc_symbols[i];
        let result = match &self.plan.formulas[i] {
            Err(e) => Err(e.clone()),
            Ok(formula) => match self.upstream_failure(formula) {
                Some(err) => Err(err),
                None => Ok(Arc::new(self.evaluator.evaluate_series(formula, &self.ledger))),
            },
        };
        if let Err(e) = &result {
            tracing::warn!(calculation = self.plan.symbols.name(symbol), error = %e, "calculation failed");
        }
        self.ledger.insert(symbol, result);
    }

    fn cluster(&mut self, members: &[NodeId]) {
        let plan = self.plan;
        let members: Vec<ClusterMember> = members
            .iter()
            .filter_map(|node| match plan.registry.kinds[node.index()] {
                NodeKind::Calculation(i) => {
                    Some(ClusterMember { symbol: plan.calc_symbols[i], formula: plan.formulas[i].as_ref() })
                }
                NodeKind::Module(_) => None,
            })
            .collect();
        let periods = self.periods();
        evaluate_cluster(&members, &plan.symbols, &mut self.ledger, &self.evaluator, periods);

        for m in &members {
            if let Some(Err(e)) = self.ledger.get(m.symbol) {
                tracing::warn!(calculation = plan.symbols.name(m.symbol), error = %e, "calculation failed");
            }
        }
    }

    fn module(&mut self, i: usize) {
        let plan = self.plan;
        let Some(native) = plan.natives[i].as_ref() else { return };
        let periods = self.periods();

        if !native.instance.enabled {
            for sym in &native.outputs {
                self.ledger.insert_values(*sym, vec![0.0; periods]);
            }
            return;
        }

        match self.module_inputs(native) {
            Ok(inputs) => {
                let mut outputs = native.template.evaluate(&inputs, &self.model.timeline, &self.config.solver).into_iter();
                for sym in &native.outputs {
                    let mut values = outputs.next().unwrap_or_default();
                    values.resize(periods, 0.0);
                    self.ledger.insert_values(*sym, values);
                }
            }
            Err(e) => {
                let name = module_reference(i);
                tracing::warn!(module = %name, template = native.template.id(), error = %e, "module failed");
                self.module_errors.insert(name, e.to_string());
                for sym in &native.outputs {
                    self.ledger.insert(*sym, Err(e.clone()));
                }
            }
        }
    }

    fn module_inputs(&self, native: &NativeModule<'_>) -> Result<ModuleInputs, ComputationError> {
        let periods = self.periods();
        let mut inputs = ModuleInputs::new();

        for (spec, parsed) in &native.inputs {
            let value = native.instance.inputs.get(spec.name);
            match spec.kind {
                InputKind::Choice { default } => {
                    let text = match value {
                        Some(InputValue::Text(s)) => s.clone(),
                        Some(InputValue::Number(n)) => n.to_string(),
                        None => default.to_string(),
                    };
                    inputs.set_choice(spec.name, &text);
                }
                InputKind::Series | InputKind::Scalar { .. } => {
                    let values = match (value, parsed) {
                        (Some(InputValue::Number(n)), _) => vec![*n; periods],
                        (_, Some(parsed)) => self.evaluate_input(parsed).map_err(|cause| {
                            ComputationError::ModuleInput { input: spec.name.to_string(), cause: Box::new(cause) }
                        })?,
                        _ => match spec.kind {
                            InputKind::Scalar { default } => vec![default; periods],
                            _ => vec![0.0; periods],
                        },
                    };
                    inputs.set_series(spec.name, values);
                }
            }
        }
        Ok(inputs)
    }

    fn evaluate_input(&self, parsed: &Result<Formula, FormulaError>) -> Result<Vec<f64>, ComputationError> {
        let formula = bind(parsed, &self.plan.symbols)?;
        match self.upstream_failure(&formula) {
            Some(err) => Err(err),
            None => Ok(self.evaluator.evaluate_series(&formula, &self.ledger)),
        }
    }

    /// Assembles the result maps. Failed nodes are reported zero-filled.
    fn finish(self, model: &Model) -> Evaluation {
        let periods = self.periods();
        let values_of = |sym: SymbolId| match self.ledger.get(sym) {
            Some(Ok(series)) => series.to_vec(),
            _ => vec![0.0; periods],
        };

        let mut evaluation = Evaluation::default();
        for (calc, &sym) in model.calculations.iter().zip(&self.plan.calc_symbols) {
            let name = calc.reference_name();
            if let Some(Err(e)) = self.ledger.get(sym) {
                evaluation.calculation_errors.insert(name.clone(), e.to_string());
            }
            evaluation.calculation_results.insert(name, values_of(sym));
        }

        for native in self.plan.natives.iter().flatten() {
            for &sym in &native.outputs {
                evaluation.module_outputs.insert(self.plan.symbols.name(sym).to_string(), values_of(sym));
            }
        }
        for alias in model.aliases.keys() {
            if let Some(sym) = self.plan.symbols.get(alias) {
                evaluation.module_outputs.insert(alias.clone(), values_of(sym));
            }
        }

        evaluation.module_errors = self.module_errors;
        evaluation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SolverConfig;
    use crate::store::{Calculation, Timeline};
    use std::collections::HashMap;

    fn model(periods: usize, formulas: &[(u32, &str)]) -> Model {
        Model {
            timeline: Timeline::monthly(2024, 1, periods),
            calculations: formulas.iter().map(|(id, f)| Calculation::new(*id, *f)).collect(),
            ..Default::default()
        }
    }

    fn debt_module(cfads: &str) -> ModuleInstance {
        ModuleInstance::new("debt_sizing")
            .with_input("cfads", InputValue::Text(cfads.into()))
            .with_input("debt_flag", InputValue::Text("F1".into()))
            .with_input("total_funding", InputValue::Text("S2".into()))
            .with_input("max_gearing", InputValue::Number(100.0))
            .with_input("interest_rate", InputValue::Number(0.0))
            .with_input("tenor_years", InputValue::Number(1.0))
            .with_input("target_dscr", InputValue::Number(1.4))
            .with_input("debt_period", InputValue::Text("quarterly".into()))
    }

    fn debt_context() -> ReferenceContext {
        let mut ctx = ReferenceContext::new(12);
        let mut funding = vec![0.0; 12];
        funding[0] = 1000.0;
        ctx.insert_series("S1", vec![10.0; 12]).insert_series("S2", funding).insert_flag("F1", 0, 11);
        ctx
    }

    #[test]
    fn test_lag_recurrence_is_one_cluster() {
        // A = B, B = lag(A, 1)
        let m = model(4, &[(1, "R2"), (2, "SHIFT(R1, 1)")]);
        let out = Engine::default().evaluate(&m, &ReferenceContext::new(4)).unwrap();
        assert_eq!(out.clusters.len(), 1);
        assert_eq!(out.clusters[0].len(), 2);
        let a = &out.calculation_results["R1"];
        assert_eq!(a[0], 0.0);
        assert_eq!(a[1], a[0]);
        assert!(out.calculation_errors.is_empty());
    }

    #[test]
    fn test_unknown_reference_propagates_to_dependents() {
        // X = Y + 1, Y = Z99
        let m = model(3, &[(1, "R2 + 1"), (2, "Z99 * 2"), (3, "V1")]);
        let mut ctx = ReferenceContext::new(3);
        ctx.insert_constant("V1", 4.0);
        let out = Engine::default().evaluate(&m, &ctx).unwrap();

        assert_eq!(out.calculation_results["R1"], vec![0.0; 3]);
        assert!(out.calculation_errors["R1"].contains("Z99"));
        assert_eq!(out.calculation_errors["R2"], "unknown reference 'Z99'");
        // Siblings are unaffected.
        assert_eq!(out.calculation_results["R3"], vec![4.0; 3]);
        assert!(!out.calculation_errors.contains_key("R3"));
    }

    #[test]
    fn test_direct_mutual_reference_is_fatal() {
        let m = model(2, &[(1, "R2"), (2, "R1")]);
        let err = Engine::default().evaluate(&m, &ReferenceContext::new(2)).unwrap_err();
        match err {
            EngineError::CircularDependency { cycle, blocked } => {
                assert_eq!(cycle, vec!["R1".to_string(), "R2".to_string()]);
                assert!(blocked.is_empty());
            }
            other => panic!("Expected CircularDependency, got {:?}", other),
        }
    }

    #[test]
    fn test_lag_recurrence_through_native_module_is_fatal() {
        // R1 = prev(R2), R2 = M1.1, M1 reads R1: the lag cannot be stepped through a module.
        let mut m = model(12, &[(1, "PREV(R2)"), (2, "M1.1")]);
        m.modules.push(debt_module("R1"));
        let err = Engine::default().evaluate(&m, &debt_context()).unwrap_err();
        match err {
            EngineError::CircularDependency { mut cycle, blocked } => {
                cycle.sort();
                assert_eq!(cycle, vec!["M1".to_string(), "R1".to_string(), "R2".to_string()]);
                assert!(blocked.is_empty());
            }
            other => panic!("Expected CircularDependency, got {:?}", other),
        }
    }

    #[test]
    fn test_large_formulas_stay_per_calculation() {
        let long_sum = vec!["V1"; 3000].join(" + ");
        let deep = format!("{}V1{}", "(".repeat(1000), ")".repeat(1000));
        let m = model(2, &[(1, long_sum.as_str()), (2, deep.as_str()), (3, "V1 * 2")]);
        let mut ctx = ReferenceContext::new(2);
        ctx.insert_constant("V1", 1.0);
        let out = Engine::default().evaluate(&m, &ctx).unwrap();

        assert_eq!(out.calculation_results["R1"], vec![3000.0, 3000.0]);
        assert_eq!(out.calculation_results["R2"], vec![0.0, 0.0]);
        assert!(out.calculation_errors["R2"].starts_with("malformed formula: formula nests deeper than"));
        assert_eq!(out.calculation_results["R3"], vec![2.0, 2.0]);
        assert_eq!(out.calculation_errors.len(), 1);
    }

    #[test]
    fn test_non_finite_values_kept_when_configured() {
        let m = model(2, &[(1, "1 / V1"), (2, "R1 * 0 + 1")]);
        let mut ctx = ReferenceContext::new(2);
        ctx.insert_constant("V1", 0.0);
        let config = EngineConfig { zero_non_finite: false, ..Default::default() };
        let out = Engine::new(config).unwrap().evaluate(&m, &ctx).unwrap();
        assert!(out.calculation_results["R1"].iter().all(|v| v.is_infinite() && *v > 0.0));
        // inf * 0 is NaN, which is also kept.
        assert!(out.calculation_results["R2"].iter().all(|v| v.is_nan()));

        let out = Engine::default().evaluate(&m, &ctx).unwrap();
        assert_eq!(out.calculation_results["R1"], vec![0.0, 0.0]);
        assert_eq!(out.calculation_results["R2"], vec![1.0, 1.0]);
    }

    #[rstest::rstest]
    #[case::no_iterations(SolverConfig { max_iterations: 0, ..Default::default() })]
    #[case::nan_tolerance(SolverConfig { tolerance: f64::NAN, ..Default::default() })]
    fn test_invalid_config_rejected_at_construction(#[case] solver: SolverConfig) {
        let config = EngineConfig { solver, ..Default::default() };
        assert!(matches!(Engine::new(config), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_alias_with_unknown_target_is_skipped() {
        let mut m = model(2, &[(1, "M1.1 + 1"), (2, "V1")]);
        m.aliases = HashMap::from([("M1.1".to_string(), "R99".to_string())]);
        let mut ctx = ReferenceContext::new(2);
        ctx.insert_constant("V1", 3.0);
        let out = Engine::default().evaluate(&m, &ctx).unwrap();

        assert_eq!(out.calculation_errors["R1"], "unknown reference 'M1.1'");
        assert_eq!(out.calculation_results["R1"], vec![0.0, 0.0]);
        assert!(!out.module_outputs.contains_key("M1.1"));
        assert_eq!(out.calculation_results["R2"], vec![3.0, 3.0]);
    }

    #[test]
    fn test_malformed_formula_is_zero_filled() {
        let m = model(2, &[(1, "(V1 + 2"), (2, "V1 * 3")]);
        let mut ctx = ReferenceContext::new(2);
        ctx.insert_constant("V1", 1.0);
        let out = Engine::default().evaluate(&m, &ctx).unwrap();
        assert_eq!(out.calculation_results["R1"], vec![0.0, 0.0]);
        assert!(out.calculation_errors["R1"].starts_with("malformed formula"));
        assert_eq!(out.calculation_results["R2"], vec![3.0, 3.0]);
    }

    #[test]
    fn test_debt_module_between_calculations() {
        // R5 feeds the module, R6 reads its sized debt.
        let mut m = model(12, &[(5, "S1 * 1"), (6, "M1.1 + 0"), (7, "M1.6")]);
        m.modules.push(debt_module("R5"));
        let out = Engine::default().evaluate(&m, &debt_context()).unwrap();

        assert!(out.module_errors.is_empty());
        let sized = out.calculation_results["R6"][0];
        assert!((sized - 120.0 / 1.4).abs() < 0.05, "sized {}", sized);
        assert!(out.calculation_results["R7"][11].abs() < 1e-9);
        for (dscr, service) in out.module_outputs["M1.7"].iter().zip(&out.module_outputs["M1.5"]) {
            if *service > 0.0 {
                assert!(*dscr >= 1.4 - 1e-3);
            }
        }

        let pos = |name: &str| out.order.iter().position(|n| n == name).unwrap();
        assert!(pos("R5") < pos("M1"));
        assert!(pos("M1") < pos("R6"));
    }

    #[test]
    fn test_module_input_error_reaches_dependents() {
        let mut m = model(12, &[(6, "M1.1 * 2")]);
        m.modules.push(debt_module("Q42"));
        let out = Engine::default().evaluate(&m, &debt_context()).unwrap();

        assert_eq!(out.module_errors["M1"], "input 'cfads': unknown reference 'Q42'");
        assert_eq!(out.module_outputs["M1.1"], vec![0.0; 12]);
        assert!(out.calculation_errors["R6"].starts_with("depends on 'M1.1'"));
    }

    #[test]
    fn test_disabled_module_outputs_zeros() {
        let mut m = model(12, &[(6, "M1.1 + 1")]);
        let mut module = debt_module("Q42");
        module.enabled = false;
        m.modules.push(module);
        let out = Engine::default().evaluate(&m, &debt_context()).unwrap();
        assert!(out.module_errors.is_empty());
        assert_eq!(out.calculation_results["R6"], vec![1.0; 12]);
    }

    #[test]
    fn test_converted_module_alias_resolves_both_names() {
        let mut catalog = ModuleCatalog::standard();
        catalog.register_converted("capex", &["spend"]);
        let mut m = model(3, &[(7, "V1 * 5"), (8, "M1.1 * 2")]);
        m.modules.push(ModuleInstance::new("capex"));
        m.aliases = HashMap::from([("M1.1".to_string(), "R7".to_string())]);
        let mut ctx = ReferenceContext::new(3);
        ctx.insert_constant("V1", 1.0);

        let out = Engine::with_catalog(EngineConfig::default(), catalog).unwrap().evaluate(&m, &ctx).unwrap();
        assert_eq!(out.calculation_results["R8"], vec![10.0; 3]);
        assert_eq!(out.module_outputs["M1.1"], out.calculation_results["R7"]);
    }

    #[test]
    fn test_year_gated_running_sum_end_to_end() {
        let mut m = model(24, &[(1, "CUMSUM_Y(V1)")]);
        m.timeline = Timeline::monthly(2024, 1, 24);
        let mut ctx = ReferenceContext::new(24);
        ctx.insert_series("V1", (0..24).map(|i| if i < 12 { 5.0 } else { 7.0 }).collect());
        let out = Engine::default().evaluate(&m, &ctx).unwrap();
        let r = &out.calculation_results["R1"];
        assert!(r[..12].iter().all(|v| *v == 5.0));
        assert!(r[12..].iter().all(|v| *v == 12.0));
    }

    #[test]
    fn test_rerun_is_bit_identical() {
        let m = model(6, &[(1, "SHIFT(R2, 1)"), (2, "R1 + V1 / 3"), (3, "CUMPROD(1 + R2 / 100)"), (4, "MAX(R3, R1) ^ 0.5")]);
        let mut ctx = ReferenceContext::new(6);
        ctx.insert_series("V1", vec![1.0, 2.5, -0.7, 3.3, 0.1, 9.0]);
        let engine = Engine::default();
        let a = engine.evaluate(&m, &ctx).unwrap();
        let b = engine.evaluate(&m, &ctx).unwrap();
        for (name, values) in &a.calculation_results {
            let other = &b.calculation_results[name];
            assert!(values.iter().zip(other).all(|(x, y)| x.to_bits() == y.to_bits()));
        }
    }

    #[test]
    fn test_order_respects_non_cluster_dependencies() {
        let m = model(
            3,
            &[(1, "R4 + R2"), (2, "R3 * 2"), (3, "V1"), (4, "PREV(R5) + R3"), (5, "R4 - 1"), (6, "R5 + R1")],
        );
        let mut ctx = ReferenceContext::new(3);
        ctx.insert_constant("V1", 2.0);
        let out = Engine::default().evaluate(&m, &ctx).unwrap();
        let pos = |name: &str| out.order.iter().position(|n| n == name).unwrap();
        assert!(pos("R3") < pos("R2"));
        assert!(pos("R2") < pos("R1"));
        // R1 reads one member of the R4/R5 cluster, so it follows both.
        assert!(pos("R4") < pos("R1") && pos("R5") < pos("R1"));
        assert!(pos("R1") < pos("R6"));
        assert_eq!(out.clusters, vec![vec!["R4".to_string(), "R5".to_string()]]);
        // R4 = prev(R4 - 1) + 2
        assert_eq!(out.calculation_results["R4"], vec![2.0, 3.0, 4.0]);
    }

    #[rstest::rstest]
    #[case::calc_shadows_input(&[(1, "1")], "R1", None, SymbolOrigin::Reference)]
    #[case::duplicate_ids(&[(1, "1"), (1, "2")], "V9", None, SymbolOrigin::Calculation)]
    #[case::alias_shadows_input(&[(1, "1")], "V9", Some(("V9", "R1")), SymbolOrigin::Reference)]
    fn test_duplicate_reference_names_rejected(
        #[case] formulas: &[(u32, &str)],
        #[case] input: &str,
        #[case] alias: Option<(&str, &str)>,
        #[case] expected: SymbolOrigin,
    ) {
        let mut m = model(2, formulas);
        if let Some((from, to)) = alias {
            m.aliases.insert(from.to_string(), to.to_string());
        }
        let mut ctx = ReferenceContext::new(2);
        ctx.insert_constant(input, 1.0);
        let err = Engine::default().evaluate(&m, &ctx).unwrap_err();
        match err {
            EngineError::DuplicateReference { existing, .. } => assert_eq!(existing, expected),
            other => panic!("Expected DuplicateReference, got {:?}", other),
        }
    }

    #[test]
    fn test_length_mismatch_and_unknown_template_are_fatal() {
        let m = model(3, &[(1, "V1")]);
        let mut ctx = ReferenceContext::new(3);
        ctx.insert_series("V1", vec![1.0, 2.0]);
        assert_eq!(
            Engine::default().evaluate(&m, &ctx).unwrap_err(),
            EngineError::LengthMismatch { name: "V1".into(), expected: 3, found: 2 }
        );

        let mut m = model(3, &[]);
        m.modules.push(ModuleInstance::new("equity_waterfall"));
        let err = Engine::default().evaluate(&m, &ReferenceContext::new(3)).unwrap_err();
        assert_eq!(err, EngineError::UnknownTemplate { module: "M1".into(), template: "equity_waterfall".into() });
    }

    #[test]
    fn test_evaluation_serializes_with_camel_case_keys() {
        let m = model(2, &[(1, "Q1")]);
        let out = Engine::default().evaluate(&m, &ReferenceContext::new(2)).unwrap();
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["calculationResults"]["R1"], serde_json::json!([0.0, 0.0]));
        assert_eq!(json["calculationErrors"]["R1"], "unknown reference 'Q1'");
    }
}
