//! Operators and built-in functions of the formula language.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl BinaryOp {
    /// Comparisons yield 1/0; division is plain f64 division.
    #[inline]
    pub fn apply(self, l: f64, r: f64) -> f64 {
        match self {
            BinaryOp::Add => l + r,
            BinaryOp::Sub => l - r,
            BinaryOp::Mul => l * r,
            BinaryOp::Div => l / r,
            BinaryOp::Pow => l.powf(r),
            BinaryOp::Lt => truth(l < r),
            BinaryOp::Le => truth(l <= r),
            BinaryOp::Gt => truth(l > r),
            BinaryOp::Ge => truth(l >= r),
            BinaryOp::Eq => truth(l == r),
            BinaryOp::Ne => truth(l != r),
        }
    }
}

#[inline(always)]
fn truth(b: bool) -> f64 { if b { 1.0 } else { 0.0 } }

/// Functions evaluated on the values of a single period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarFn {
    Min,
    Max,
    Abs,
}

impl ScalarFn {
    pub fn apply(self, args: &[f64]) -> f64 {
        match self {
            ScalarFn::Min => args.iter().copied().fold(f64::INFINITY, f64::min),
            ScalarFn::Max => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            ScalarFn::Abs => args.first().map_or(0.0, |v| v.abs()),
        }
    }
}

/// Running functions whose value at period `i` depends on periods `0..=i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayFn {
    CumSum,
    CumProd,
    /// Accumulates only on year-start periods and holds flat in between.
    CumSumYearly,
    CumProdYearly,
    /// Running count of non-zero values.
    Count,
}

impl ArrayFn {
    /// Advances the running value by one period.
    #[inline]
    pub fn step(self, prev: Option<f64>, x: f64, year_start: bool) -> f64 {
        match self {
            ArrayFn::CumSum => prev.unwrap_or(0.0) + x,
            ArrayFn::CumProd => prev.unwrap_or(1.0) * x,
            ArrayFn::CumSumYearly => {
                let base = prev.unwrap_or(0.0);
                if year_start { base + x } else { base }
            }
            ArrayFn::CumProdYearly => {
                let base = prev.unwrap_or(1.0);
                if year_start { base * x } else { base }
            }
            ArrayFn::Count => prev.unwrap_or(0.0) + truth(x != 0.0),
        }
    }
}

/// A function name as it appears in formula text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Scalar(ScalarFn),
    Array(ArrayFn),
    /// `SHIFT(expr, n)`: the value of `expr` `n` periods earlier.
    Shift,
    /// `PREV(expr)`, shorthand for `SHIFT(expr, 1)`.
    Prev,
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Self> {
        let f = match name.to_ascii_uppercase().as_str() {
            "MIN" => Builtin::Scalar(ScalarFn::Min),
            "MAX" => Builtin::Scalar(ScalarFn::Max),
            "ABS" => Builtin::Scalar(ScalarFn::Abs),
            "CUMSUM" => Builtin::Array(ArrayFn::CumSum),
            "CUMPROD" => Builtin::Array(ArrayFn::CumProd),
            "CUMSUM_Y" => Builtin::Array(ArrayFn::CumSumYearly),
            "CUMPROD_Y" => Builtin::Array(ArrayFn::CumProdYearly),
            "COUNT" => Builtin::Array(ArrayFn::Count),
            "SHIFT" => Builtin::Shift,
            "PREV" => Builtin::Prev,
            _ => return None,
        };
        Some(f)
    }

    /// Accepted argument counts, inclusive.
    pub fn arity(self) -> (usize, usize) {
        match self {
            Builtin::Scalar(ScalarFn::Abs) => (1, 1),
            Builtin::Scalar(_) => (1, usize::MAX),
            Builtin::Array(_) | Builtin::Prev => (1, 1),
            Builtin::Shift => (1, 2),
        }
    }
}
