//! Numerical search used by native modules.
pub mod bisection;

pub use bisection::{largest_feasible, BisectionOutcome};
