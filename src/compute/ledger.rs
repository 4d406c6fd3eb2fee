//! ledger.rs
//! The shared result context of one run: every symbol's array, or the reason it failed.

use crate::formula::{FormulaError, SeriesSource};
use crate::store::{Series, SymbolId};
use std::sync::Arc;

pub use self::error::ComputationError;
mod error {
    use super::*;
    use thiserror::Error;

    /// Why a single node produced no trustworthy array. Recorded per node; never fatal to the run.
    #[derive(Error, Debug, Clone, PartialEq)]
    pub enum ComputationError {
        #[error("unknown reference '{name}'")]
        UnknownReference { name: String },
        #[error("malformed formula: {0}")]
        Formula(#[from] FormulaError),
        #[error("depends on '{reference}' which failed: {cause}")]
        Upstream { reference: String, cause: Box<ComputationError> },
        #[error("input '{input}': {cause}")]
        ModuleInput { input: String, cause: Box<ComputationError> },
    }

    impl ComputationError {
        pub fn upstream(reference: &str, cause: &ComputationError) -> Self {
            ComputationError::Upstream { reference: reference.to_string(), cause: Box::new(cause.clone()) }
        }

        /// The error at the bottom of an upstream chain.
        pub fn root_cause(&self) -> &ComputationError {
            match self {
                ComputationError::Upstream { cause, .. } | ComputationError::ModuleInput { cause, .. } => {
                    cause.root_cause()
                }
                other => other,
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Ledger {
    // Dense storage indexed by SymbolId. `None` means not yet written.
    values: Vec<Option<Result<Series, ComputationError>>>,
}

impl Ledger {
    pub fn new() -> Self { Self::default() }

    pub fn ensure_capacity(&mut self, size: usize) {
        if self.values.len() < size {
            self.values.resize(size, None);
        }
    }

    #[inline(always)]
    pub fn get(&self, symbol: SymbolId) -> Option<&Result<Series, ComputationError>> {
        self.values.get(symbol.index())?.as_ref()
    }

    #[inline(always)]
    pub fn insert(&mut self, symbol: SymbolId, value: Result<Series, ComputationError>) {
        let idx = symbol.index();
        if idx >= self.values.len() {
            self.values.resize(idx + 1, None);
        }
        self.values[idx] = Some(value);
    }

    pub fn insert_values(&mut self, symbol: SymbolId, values: Vec<f64>) {
        self.insert(symbol, Ok(Arc::new(values)));
    }

    /// The first of `symbols` whose slot holds an error.
    pub fn first_failure<'a>(&'a self, symbols: impl IntoIterator<Item = SymbolId>) -> Option<(SymbolId, &'a ComputationError)> {
        symbols.into_iter().find_map(|s| match self.get(s) {
            Some(Err(e)) => Some((s, e)),
            _ => None,
        })
    }
}

impl SeriesSource for Ledger {
    #[inline]
    fn value(&self, symbol: SymbolId, period: usize) -> f64 {
        match self.get(symbol) {
            Some(Ok(series)) => series.get(period).copied().unwrap_or(0.0),
            _ => 0.0,
        }
    }
}
