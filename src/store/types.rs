use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::HashMap;

use super::timeline::Timeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    #[inline(always)]
    pub fn index(&self) -> usize { self.0 as usize }
    pub fn new(idx: usize) -> Self { Self(idx as u32) }
}

/// How a calculation's value relates to time. Carried as metadata; the
/// evaluator treats every kind identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalcType {
    #[default]
    Flow,
    Stock,
    StockStart,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calculation {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    pub formula: String,
    #[serde(default, rename = "type")]
    pub calc_type: CalcType,
}

impl Calculation {
    pub fn new(id: u32, formula: impl Into<String>) -> Self {
        Self { id, name: String::new(), formula: formula.into(), calc_type: CalcType::Flow }
    }

    /// The name other formulas use to address this calculation.
    pub fn reference_name(&self) -> String { calc_reference(self.id) }
}

pub fn calc_reference(id: u32) -> String { format!("R{}", id) }

/// Output `output` (0-based) of module instance `module` (0-based), as `M{n}.{k}`.
pub fn module_output_reference(module: usize, output: usize) -> String {
    format!("M{}.{}", module + 1, output + 1)
}

pub fn module_reference(module: usize) -> String { format!("M{}", module + 1) }

/// A module input is either a literal number or text. Text is interpreted by
/// the template: a formula for series/scalar inputs, a keyword for choices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputValue {
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleInstance {
    #[serde(rename = "templateId")]
    pub template_id: String,
    #[serde(default)]
    pub inputs: HashMap<String, InputValue>,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

fn enabled_default() -> bool { true }

impl ModuleInstance {
    pub fn new(template_id: impl Into<String>) -> Self {
        Self { template_id: template_id.into(), inputs: HashMap::new(), enabled: true }
    }

    pub fn with_input(mut self, key: &str, value: InputValue) -> Self {
        self.inputs.insert(key.to_string(), value);
        self
    }
}

/// Everything a run needs apart from the resolver's reference arrays.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Model {
    pub timeline: Timeline,
    #[serde(default)]
    pub calculations: Vec<Calculation>,
    #[serde(default)]
    pub modules: Vec<ModuleInstance>,
    /// Converted-module output name (`M3.1`) to generated calculation name (`R120`).
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Index into `Model::calculations`.
    Calculation(usize),
    /// Index into `Model::modules`; only native modules become nodes.
    Module(usize),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeMetadata {
    /// Reference name (`R12`) or module prefix (`M2`).
    pub name: String,
}

/// A dependency read through the lag operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LagEdge {
    pub target: NodeId,
    pub periods: u32,
}

pub type Dependencies = SmallVec<[NodeId; 4]>;
pub type LagDependencies = SmallVec<[LagEdge; 2]>;
