//! Executes a scheduled model: the shared ledger, cluster stepping and the run driver.
pub mod cluster;
pub mod engine;
pub mod ledger;

pub use engine::{Engine, EngineError, Evaluation};
pub use ledger::{ComputationError, Ledger};
