//! Engine and solver settings.
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse engine config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid engine config: {0}")]
    Invalid(String),
}

/// Bounds for the bisection used by native modules.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub max_iterations: u32,
    /// Bisection stops once the bracket is narrower than this.
    pub tolerance: f64,
    /// Slack allowed below the target DSCR before a candidate is infeasible.
    pub dscr_tolerance: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self { max_iterations: 100, tolerance: 1e-4, dscr_tolerance: 1e-3 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub solver: SolverConfig,
    /// Store non-finite period values (division by zero, overflow) as 0.
    pub zero_non_finite: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { solver: SolverConfig::default(), zero_non_finite: true }
    }
}

impl EngineConfig {
    pub fn from_json_str(src: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(src)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.solver;
        if s.max_iterations == 0 {
            return Err(ConfigError::Invalid("solver.max_iterations must be at least 1".into()));
        }
        if !(s.tolerance.is_finite() && s.tolerance > 0.0) {
            return Err(ConfigError::Invalid(format!("solver.tolerance must be positive, got {}", s.tolerance)));
        }
        if !(s.dscr_tolerance.is_finite() && s.dscr_tolerance >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "solver.dscr_tolerance must be non-negative, got {}",
                s.dscr_tolerance
            )));
        }
        Ok(())
    }
}
