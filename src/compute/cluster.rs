//! Period-by-period evaluation of a lag-closed recurrence.
use super::ledger::{ComputationError, Ledger};
use crate::formula::{Formula, Memo, PeriodEvaluator, SeriesSource};
use crate::store::{SymbolId, SymbolTable};
use std::collections::HashMap;
use std::sync::Arc;

/// One cluster member, in evaluation order.
pub struct ClusterMember<'a> {
    pub symbol: SymbolId,
    pub formula: Result<&'a Formula<SymbolId>, &'a ComputationError>,
}

/// Reads members from the cluster's in-progress buffers and everything else
/// from the shared ledger.
struct ClusterScope<'a> {
    ledger: &'a Ledger,
    local: &'a HashMap<SymbolId, usize>,
    buffers: &'a [Vec<f64>],
}

impl SeriesSource for ClusterScope<'_> {
    fn value(&self, symbol: SymbolId, period: usize) -> f64 {
        match self.local.get(&symbol) {
            Some(&k) => self.buffers[k].get(period).copied().unwrap_or(0.0),
            None => self.ledger.value(symbol, period),
        }
    }
}

/// Evaluates all members together, one period at a time, and writes each
/// member's result into the ledger exactly once.
///
/// If one member cannot be evaluated (its own error, or a failed input from
/// outside the cluster) no member is trustworthy: the culprit records its
/// error and every other member an upstream error naming it.
pub fn evaluate_cluster(
    members: &[ClusterMember<'_>],
    symbols: &SymbolTable,
    ledger: &mut Ledger,
    evaluator: &PeriodEvaluator<'_>,
    periods: usize,
) {
    let local: HashMap<SymbolId, usize> = members.iter().enumerate().map(|(k, m)| (m.symbol, k)).collect();

    if let Some((culprit, err)) = find_failure(members, symbols, &local, ledger) {
        let culprit_name = symbols.name(members[culprit].symbol);
        tracing::debug!(culprit = culprit_name, members = members.len(), "cluster not evaluated");
        for (k, m) in members.iter().enumerate() {
            let value = if k == culprit { err.clone() } else { ComputationError::upstream(culprit_name, &err) };
            ledger.insert(m.symbol, Err(value));
        }
        return;
    }

    let formulas: Vec<&Formula<SymbolId>> = members.iter().filter_map(|m| m.formula.ok()).collect();
    let mut memos: Vec<Memo> = formulas.iter().map(|f| Memo::for_formula(f, periods)).collect();
    let mut buffers: Vec<Vec<f64>> = vec![Vec::with_capacity(periods); members.len()];

    for period in 0..periods {
        for (k, formula) in formulas.iter().enumerate() {
            let scope = ClusterScope { ledger, local: &local, buffers: &buffers };
            let v = evaluator.evaluate_period(formula, period, &scope, &mut memos[k]);
            buffers[k].push(v);
        }
    }

    for (m, values) in members.iter().zip(buffers) {
        ledger.insert(m.symbol, Ok(Arc::new(values)));
    }
}

/// The first member that cannot be evaluated, with its error.
fn find_failure(
    members: &[ClusterMember<'_>],
    symbols: &SymbolTable,
    local: &HashMap<SymbolId, usize>,
    ledger: &Ledger,
) -> Option<(usize, ComputationError)> {
    for (k, m) in members.iter().enumerate() {
        let formula = match m.formula {
            Ok(f) => f,
            Err(e) => return Some((k, e.clone())),
        };
        let external = formula.all_references().into_iter().copied().filter(|s| !local.contains_key(s));
        if let Some((failed, cause)) = ledger.first_failure(external) {
            return Some((k, ComputationError::upstream(symbols.name(failed), cause)));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::parse;
    use crate::store::{SymbolOrigin, SymbolTable, Timeline};

    struct Fixture {
        symbols: SymbolTable,
        ledger: Ledger,
        timeline: Timeline,
    }

    impl Fixture {
        fn new(periods: usize) -> Self {
            Self { symbols: SymbolTable::new(), ledger: Ledger::new(), timeline: Timeline::monthly(2024, 1, periods) }
        }

        fn input(&mut self, name: &str, values: Vec<f64>) {
            let sym = self.symbols.intern(name, SymbolOrigin::Reference).unwrap();
            self.ledger.insert_values(sym, values);
        }

        fn declare(&mut self, name: &str) -> SymbolId { self.symbols.intern(name, SymbolOrigin::Calculation).unwrap() }

        fn bind(&self, src: &str) -> Result<Formula<SymbolId>, ComputationError> {
            let parsed = parse(src)?;
            parsed.try_map_refs(|name| {
                self.symbols.get(name).ok_or_else(|| ComputationError::UnknownReference { name: name.clone() })
            })
        }

        fn series(&self, name: &str) -> Vec<f64> {
            match self.ledger.get(self.symbols.get(name).unwrap()) {
                Some(Ok(s)) => s.to_vec(),
                other => panic!("{} not computed: {:?}", name, other),
            }
        }

        fn error(&self, name: &str) -> String {
            match self.ledger.get(self.symbols.get(name).unwrap()) {
                Some(Err(e)) => e.to_string(),
                other => panic!("{} did not fail: {:?}", name, other),
            }
        }

        fn run(&mut self, defs: &[(&str, &str)]) {
            let syms: Vec<SymbolId> = defs.iter().map(|(n, _)| self.declare(n)).collect();
            let bound: Vec<_> = defs.iter().map(|(_, f)| self.bind(f)).collect();
            let members: Vec<ClusterMember> = syms
                .iter()
                .zip(&bound)
                .map(|(sym, f)| ClusterMember { symbol: *sym, formula: f.as_ref() })
                .collect();
            let evaluator = PeriodEvaluator::new(&self.timeline, true);
            let periods = self.timeline.len();
            evaluate_cluster(&members, &self.symbols, &mut self.ledger, &evaluator, periods);
        }
    }

    #[test]
    fn test_corkscrew_resolves_in_period_order() {
        let mut fx = Fixture::new(4);
        fx.input("V1", vec![10.0, 5.0, -3.0, 0.0]);
        // opening = prior closing, closing = opening + flow
        fx.run(&[("R1", "SHIFT(R2, 1)"), ("R2", "R1 + V1")]);
        assert_eq!(fx.series("R1"), vec![0.0, 10.0, 15.0, 12.0]);
        assert_eq!(fx.series("R2"), vec![10.0, 15.0, 12.0, 12.0]);
    }

    #[test]
    fn test_two_member_recurrence_reads_zero_before_start() {
        let mut fx = Fixture::new(3);
        fx.run(&[("R2", "PREV(R1)"), ("R1", "R2")]);
        assert_eq!(fx.series("R1"), vec![0.0, 0.0, 0.0]);
        assert_eq!(fx.series("R2"), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_self_recurrence_with_running_function() {
        let mut fx = Fixture::new(4);
        fx.input("V1", vec![1.0, 1.0, 1.0, 1.0]);
        fx.run(&[("R1", "PREV(R1) + CUMSUM(V1)")]);
        assert_eq!(fx.series("R1"), vec![1.0, 3.0, 6.0, 10.0]);
    }

    #[test]
    fn test_member_failure_poisons_whole_cluster() {
        let mut fx = Fixture::new(2);
        fx.run(&[("R1", "SHIFT(R2, 1)"), ("R2", "R1 + Z99")]);
        assert_eq!(fx.error("R2"), "unknown reference 'Z99'");
        assert_eq!(fx.error("R1"), "depends on 'R2' which failed: unknown reference 'Z99'");
    }

    #[test]
    fn test_failed_external_input_is_upstream_error() {
        let mut fx = Fixture::new(2);
        let bad = fx.declare("R9");
        fx.ledger.insert(bad, Err(ComputationError::UnknownReference { name: "Q1".into() }));
        fx.run(&[("R1", "PREV(R2) + R9"), ("R2", "R1")]);
        assert_eq!(fx.error("R1"), "depends on 'R9' which failed: unknown reference 'Q1'");
        assert!(fx.error("R2").starts_with("depends on 'R1'"));
    }
}
