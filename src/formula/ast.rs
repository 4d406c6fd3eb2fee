//! Parsed formula tree, generic over how references are named.
//!
//! The parser produces `Expr<String>`. The graph builder reads reference names
//! from it directly; the evaluator binds it once to `Expr<SymbolId>`.
use super::functions::{ArrayFn, BinaryOp, ScalarFn};

#[derive(Debug, Clone, PartialEq)]
pub enum Expr<R = String> {
    Number(f64),
    Ref(R),
    Neg(Box<Expr<R>>),
    Binary { op: BinaryOp, lhs: Box<Expr<R>>, rhs: Box<Expr<R>> },
    /// A left-associative run of operators of one precedence level, folded left to right.
    /// Keeps `a + b + c + ...` flat however long it is.
    Chain { head: Box<Expr<R>>, tail: Vec<(BinaryOp, Expr<R>)> },
    Call { func: ScalarFn, args: Vec<Expr<R>> },
    /// A running function. `slot` indexes its memo within the owning formula.
    Accumulate { func: ArrayFn, arg: Box<Expr<R>>, slot: usize },
    Shift { arg: Box<Expr<R>>, periods: u32 },
}

impl<R> Expr<R> {
    /// Visits every reference with the total lag it is read at (0 = current period).
    pub fn for_each_ref<'s>(&'s self, f: &mut impl FnMut(&'s R, u32)) {
        self.walk(0, f);
    }

    fn walk<'s>(&'s self, lag: u32, f: &mut impl FnMut(&'s R, u32)) {
        match self {
            Expr::Number(_) => {}
            Expr::Ref(r) => f(r, lag),
            Expr::Neg(e) => e.walk(lag, f),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.walk(lag, f);
                rhs.walk(lag, f);
            }
            Expr::Chain { head, tail } => {
                head.walk(lag, f);
                tail.iter().for_each(|(_, e)| e.walk(lag, f));
            }
            Expr::Call { args, .. } => args.iter().for_each(|a| a.walk(lag, f)),
            Expr::Accumulate { arg, .. } => arg.walk(lag, f),
            Expr::Shift { arg, periods } => arg.walk(lag.saturating_add(*periods), f),
        }
    }

    /// Rebuilds the tree with every reference mapped through `f`, stopping at the first error.
    pub fn try_map_refs<S, E>(&self, f: &mut impl FnMut(&R) -> Result<S, E>) -> Result<Expr<S>, E> {
        Ok(match self {
            Expr::Number(n) => Expr::Number(*n),
            Expr::Ref(r) => Expr::Ref(f(r)?),
            Expr::Neg(e) => Expr::Neg(Box::new(e.try_map_refs(f)?)),
            Expr::Binary { op, lhs, rhs } => Expr::Binary {
                op: *op,
                lhs: Box::new(lhs.try_map_refs(f)?),
                rhs: Box::new(rhs.try_map_refs(f)?),
            },
            Expr::Chain { head, tail } => Expr::Chain {
                head: Box::new(head.try_map_refs(f)?),
                tail: tail.iter().map(|(op, e)| e.try_map_refs(f).map(|e| (*op, e))).collect::<Result<_, _>>()?,
            },
            Expr::Call { func, args } => Expr::Call {
                func: *func,
                args: args.iter().map(|a| a.try_map_refs(f)).collect::<Result<_, _>>()?,
            },
            Expr::Accumulate { func, arg, slot } => Expr::Accumulate {
                func: *func,
                arg: Box::new(arg.try_map_refs(f)?),
                slot: *slot,
            },
            Expr::Shift { arg, periods } => Expr::Shift { arg: Box::new(arg.try_map_refs(f)?), periods: *periods },
        })
    }
}

/// A parsed formula: its tree plus the number of running-function memo slots it needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula<R = String> {
    pub expr: Expr<R>,
    pub slots: usize,
}

impl<R> Formula<R> {
    /// References read in the current period, deduplicated, in first-seen order.
    pub fn references(&self) -> Vec<&R>
    where
        R: PartialEq,
    {
        let mut out: Vec<&R> = Vec::new();
        self.expr.for_each_ref(&mut |r, lag| {
            if lag == 0 && !out.contains(&r) {
                out.push(r);
            }
        });
        out
    }

    /// References read through the lag operator, with the smallest lag each is read at.
    pub fn lagged_references(&self) -> Vec<(&R, u32)>
    where
        R: PartialEq,
    {
        let mut out: Vec<(&R, u32)> = Vec::new();
        self.expr.for_each_ref(&mut |r, lag| {
            if lag == 0 {
                return;
            }
            match out.iter_mut().find(|(seen, _)| *seen == r) {
                Some(entry) => entry.1 = entry.1.min(lag),
                None => out.push((r, lag)),
            }
        });
        out
    }

    /// Every reference regardless of lag.
    pub fn all_references(&self) -> Vec<&R>
    where
        R: PartialEq,
    {
        let mut out: Vec<&R> = Vec::new();
        self.expr.for_each_ref(&mut |r, _| {
            if !out.contains(&r) {
                out.push(r);
            }
        });
        out
    }

    pub fn try_map_refs<S, E>(&self, mut f: impl FnMut(&R) -> Result<S, E>) -> Result<Formula<S>, E> {
        Ok(Formula { expr: self.expr.try_map_refs(&mut f)?, slots: self.slots })
    }
}
