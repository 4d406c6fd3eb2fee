//! Templates for modules that cannot be written as ordinary formulas.
//!
//! A *native* template is evaluated here and produces its outputs directly.
//! A *converted* template only names its outputs: the model has already
//! rewritten them into calculations and maps `M{n}.{k}` to those through its
//! alias table.
pub mod debt_sizing;

use crate::config::SolverConfig;
use crate::store::Timeline;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub use debt_sizing::DebtSizing;

/// How an input value is read by the template.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputKind {
    /// A formula or number evaluated over the whole timeline. Missing means zeros.
    Series,
    /// A formula or number; only its first period is used.
    Scalar { default: f64 },
    /// A keyword, lowercased.
    Choice { default: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputSpec {
    pub name: &'static str,
    pub kind: InputKind,
}

impl InputSpec {
    pub const fn series(name: &'static str) -> Self { Self { name, kind: InputKind::Series } }

    pub const fn scalar(name: &'static str, default: f64) -> Self {
        Self { name, kind: InputKind::Scalar { default } }
    }

    pub const fn choice(name: &'static str, default: &'static str) -> Self {
        Self { name, kind: InputKind::Choice { default } }
    }

    /// Whether the input text is a formula that may reference other nodes.
    pub fn is_evaluated(&self) -> bool { !matches!(self.kind, InputKind::Choice { .. }) }
}

/// Resolved input values handed to a template.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleInputs {
    series: HashMap<&'static str, Vec<f64>>,
    choices: HashMap<&'static str, String>,
}

impl ModuleInputs {
    pub fn new() -> Self { Self::default() }

    pub fn set_series(&mut self, name: &'static str, values: Vec<f64>) -> &mut Self {
        self.series.insert(name, values);
        self
    }

    pub fn set_choice(&mut self, name: &'static str, value: &str) -> &mut Self {
        self.choices.insert(name, value.trim().to_lowercase());
        self
    }

    /// The evaluated array for `name`, empty when it was never set.
    pub fn series(&self, name: &str) -> &[f64] {
        self.series.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn scalar(&self, name: &str) -> f64 { self.series(name).first().copied().unwrap_or(0.0) }

    pub fn choice(&self, name: &str) -> Option<&str> { self.choices.get(name).map(String::as_str) }
}

pub trait ModuleTemplate: Send + Sync {
    fn id(&self) -> &str;
    fn inputs(&self) -> &[InputSpec];
    /// Output names, in `M{n}.{k}` order.
    fn outputs(&self) -> &[&'static str];
    /// One array of timeline length per output. Infeasible inputs give zeros, never an error.
    fn evaluate(&self, inputs: &ModuleInputs, timeline: &Timeline, solver: &SolverConfig) -> Vec<Vec<f64>>;
}

/// A template as seen by the engine.
#[derive(Clone, Copy)]
pub enum Template<'a> {
    Native(&'a dyn ModuleTemplate),
    Converted { outputs: &'a [String] },
}

#[derive(Clone, Default)]
pub struct ModuleCatalog {
    native: HashMap<String, Arc<dyn ModuleTemplate>>,
    converted: HashMap<String, Vec<String>>,
}

impl ModuleCatalog {
    pub fn new() -> Self { Self::default() }

    /// The built-in native templates.
    pub fn standard() -> Self {
        let mut catalog = Self::new();
        catalog.register(DebtSizing::new());
        catalog
    }

    pub fn register<T: ModuleTemplate + 'static>(&mut self, template: T) -> &mut Self {
        self.converted.remove(template.id());
        self.native.insert(template.id().to_string(), Arc::new(template));
        self
    }

    pub fn register_converted(&mut self, id: &str, outputs: &[&str]) -> &mut Self {
        self.native.remove(id);
        self.converted.insert(id.to_string(), outputs.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn get(&self, id: &str) -> Option<Template<'_>> {
        if let Some(t) = self.native.get(id) {
            return Some(Template::Native(t.as_ref()));
        }
        self.converted.get(id).map(|outputs| Template::Converted { outputs })
    }
}

impl fmt::Debug for ModuleCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut native: Vec<&String> = self.native.keys().collect();
        let mut converted: Vec<&String> = self.converted.keys().collect();
        native.sort();
        converted.sort();
        f.debug_struct("ModuleCatalog").field("native", &native).field("converted", &converted).finish()
    }
}
