//! Period-by-period evaluation of bound formulas.
//!
//! Every formula is evaluated one period at a time. Running functions keep a
//! per-call-site memo of the prefix they have already produced, so a
//! `CUMSUM` costs O(P) over a whole array and can also be read back at an
//! earlier period through `SHIFT`.
use super::ast::{Expr, Formula};
use crate::store::{SymbolId, Timeline};

/// Read access to already computed arrays.
pub trait SeriesSource {
    /// The value of `symbol` at `period`. Periods past the computed prefix read as 0.
    fn value(&self, symbol: SymbolId, period: usize) -> f64;
}

/// Running-function state for one formula.
#[derive(Debug, Clone, Default)]
pub struct Memo {
    slots: Vec<Vec<f64>>,
}

impl Memo {
    pub fn for_formula<R>(formula: &Formula<R>, periods: usize) -> Self {
        Self { slots: (0..formula.slots).map(|_| Vec::with_capacity(periods)).collect() }
    }
}

pub struct PeriodEvaluator<'a> {
    timeline: &'a Timeline,
    zero_non_finite: bool,
}

impl<'a> PeriodEvaluator<'a> {
    pub fn new(timeline: &'a Timeline, zero_non_finite: bool) -> Self {
        Self { timeline, zero_non_finite }
    }

    /// Evaluates `formula` over the whole timeline.
    pub fn evaluate_series(&self, formula: &Formula<SymbolId>, src: &dyn SeriesSource) -> Vec<f64> {
        let periods = self.timeline.len();
        let mut memo = Memo::for_formula(formula, periods);
        (0..periods).map(|i| self.evaluate_period(formula, i, src, &mut memo)).collect()
    }

    /// The value stored for `formula` at `period`.
    pub fn evaluate_period(&self, formula: &Formula<SymbolId>, period: usize, src: &dyn SeriesSource, memo: &mut Memo) -> f64 {
        let v = self.eval_at(&formula.expr, period, src, memo);
        if self.zero_non_finite && !v.is_finite() {
            tracing::debug!(period, value = v, "non-finite result replaced with 0");
            0.0
        } else {
            v
        }
    }

    fn eval_at(&self, expr: &Expr<SymbolId>, period: usize, src: &dyn SeriesSource, memo: &mut Memo) -> f64 {
        match expr {
            Expr::Number(n) => *n,
            Expr::Ref(sym) => src.value(*sym, period),
            Expr::Neg(e) => -self.eval_at(e, period, src, memo),
            Expr::Binary { op, lhs, rhs } => {
                let l = self.eval_at(lhs, period, src, memo);
                let r = self.eval_at(rhs, period, src, memo);
                op.apply(l, r)
            }
            Expr::Chain { head, tail } => {
                let mut acc = self.eval_at(head, period, src, memo);
                for (op, e) in tail {
                    acc = op.apply(acc, self.eval_at(e, period, src, memo));
                }
                acc
            }
            Expr::Call { func, args } => {
                let values: smallvec::SmallVec<[f64; 4]> =
                    args.iter().map(|a| self.eval_at(a, period, src, memo)).collect();
                func.apply(&values)
            }
            Expr::Accumulate { func, arg, slot } => loop {
                let done = memo.slots[*slot].len();
                if done > period {
                    return memo.slots[*slot][period];
                }
                let x = self.eval_at(arg, done, src, memo);
                let prev = memo.slots[*slot].last().copied();
                let next = func.step(prev, x, self.timeline.is_year_start(done));
                memo.slots[*slot].push(next);
            },
            Expr::Shift { arg, periods } => {
                let lag = *periods as usize;
                if period < lag {
                    0.0
                } else {
                    self.eval_at(arg, period - lag, src, memo)
                }
            }
        }
    }
}
