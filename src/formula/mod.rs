//! The formula language: tokenizer, parser and the period evaluator.
pub mod ast;
pub mod eval;
pub mod functions;
pub mod lexer;
pub mod parser;

pub use ast::{Expr, Formula};
pub use eval::{Memo, PeriodEvaluator, SeriesSource};
pub use parser::parse;

use thiserror::Error;

/// Why a formula's text could not be parsed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormulaError {
    #[error("formula is empty")]
    Empty,
    #[error("unexpected character '{ch}' at {pos}")]
    UnexpectedChar { ch: char, pos: usize },
    #[error("unexpected '{found}' at {pos}")]
    UnexpectedToken { found: String, pos: usize },
    #[error("formula ends unexpectedly")]
    UnexpectedEnd,
    #[error("unbalanced parentheses at {pos}")]
    UnbalancedParens { pos: usize },
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("{func} does not accept {found} argument(s)")]
    Arity { func: String, found: usize },
    #[error("lag at {pos} must be a non-negative whole number")]
    InvalidLag { pos: usize },
    #[error("formula nests deeper than {limit} levels at {pos}")]
    TooDeep { limit: usize, pos: usize },
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
}
