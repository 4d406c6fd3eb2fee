//! Recalculation core for multi-period financial models.
//!
//! A run takes a [`Model`] (timeline, calculations, module instances, alias
//! map) and a [`ReferenceContext`] of resolver arrays, and produces an
//! [`Evaluation`]: one array per calculation and module output, plus
//! per-node error messages. Calculations and native modules share a single
//! dependency graph, so one topological pass evaluates everything; lag-closed
//! recurrences are stepped period by period as clusters.
//!
//! ```no_run
//! use model_recalc_core::{Calculation, Engine, Model, ReferenceContext, Timeline};
//!
//! let model = Model {
//!     timeline: Timeline::monthly(2025, 1, 24),
//!     calculations: vec![Calculation::new(1, "SHIFT(R2, 1)"), Calculation::new(2, "R1 + V1")],
//!     ..Default::default()
//! };
//! let mut context = ReferenceContext::for_timeline(&model.timeline);
//! context.insert_constant("V1", 100.0);
//!
//! let result = Engine::default().evaluate(&model, &context).unwrap();
//! assert_eq!(result.calculation_results["R2"][23], 2400.0);
//! ```
pub mod analysis;
pub mod compute;
pub mod config;
pub mod formula;
pub mod modules;
pub mod solver;
pub mod store;

pub use compute::{ComputationError, Engine, EngineError, Evaluation};
pub use config::{ConfigError, EngineConfig, SolverConfig};
pub use formula::FormulaError;
pub use modules::{ModuleCatalog, ModuleTemplate};
pub use store::{Calculation, CalcType, InputValue, Model, ModuleInstance, Period, ReferenceContext, Timeline};
