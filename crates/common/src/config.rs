//! # Analyzer Configuration
//!
//! Every bound that keeps the analyzer itself terminating lives here, together
//! with the Decision Synthesizer's weight table. All fields have defaults;
//! a JSON file only needs to name the keys it overrides.

use crate::Phase;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Errors from loading or validating an [`AnalyzerConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Malformed config: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// The function candidates import to ask for a verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryPoint {
    /// Module name used in `from <module> import <function>`.
    pub module: String,
    /// Function name.
    pub function: String,
}

impl Default for EntryPoint {
    fn default() -> Self {
        Self {
            module: "main".to_string(),
            function: "analyze_halting".to_string(),
        }
    }
}

/// Ceilings for one sandboxed execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerLimits {
    /// Live call depth allowed per function.
    pub max_call_depth: usize,
    /// State fingerprints recorded before the run counts as runaway.
    pub max_trace_len: usize,
    /// Wall-clock budget in milliseconds.
    pub max_execution_ms: u64,
    /// Largest list or string the sandbox will materialize.
    pub max_collection_len: usize,
    /// Deepest analysis chain a sandboxed candidate may open.
    pub max_nested_analyses: usize,
}

impl Default for TracerLimits {
    fn default() -> Self {
        Self {
            max_call_depth: 200,
            max_trace_len: 20_000,
            max_execution_ms: 10_000,
            max_collection_len: 1_000_000,
            max_nested_analyses: 8,
        }
    }
}

/// Confidence weight per phase for the Decision Synthesizer's vote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseWeights {
    pub paradox: f64,
    pub static_preparation: f64,
    pub heuristic: f64,
    pub prover: f64,
    pub tracer: f64,
}

impl Default for PhaseWeights {
    fn default() -> Self {
        Self {
            paradox: 0.9,
            static_preparation: 0.8,
            heuristic: 0.5,
            prover: 0.7,
            tracer: 0.6,
        }
    }
}

impl PhaseWeights {
    /// Weight for `phase`. The synthesizer never votes for itself.
    pub fn weight(&self, phase: Phase) -> f64 {
        match phase {
            Phase::Paradox => self.paradox,
            Phase::StaticPreparation => self.static_preparation,
            Phase::Heuristic => self.heuristic,
            Phase::Prover => self.prover,
            Phase::Tracer => self.tracer,
            Phase::Synthesis => 0.0,
        }
    }

    fn all(&self) -> [f64; 5] {
        [
            self.paradox,
            self.static_preparation,
            self.heuristic,
            self.prover,
            self.tracer,
        ]
    }
}

/// Full analyzer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub entry_point: EntryPoint,
    pub tracer: TracerLimits,
    /// Per-obligation solver budget in milliseconds.
    pub solver_timeout_ms: u64,
    /// Minimum similarity ratio for the known-hard snippet library.
    pub similarity_threshold: f64,
    pub weights: PhaseWeights,
    /// Accumulated weight the winning vote must exceed.
    pub vote_threshold: f64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            entry_point: EntryPoint::default(),
            tracer: TracerLimits::default(),
            solver_timeout_ms: 5_000,
            similarity_threshold: 0.8,
            weights: PhaseWeights::default(),
            vote_threshold: 1.0,
        }
    }
}

impl AnalyzerConfig {
    /// Parses and validates a JSON document.
    ///
    /// # Errors
    /// `Malformed` for JSON/shape errors, `Invalid` for out-of-range values.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: AnalyzerConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON config file.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Rejects settings that would let the analyzer run unbounded or make the
    /// vote meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = &self.tracer;
        if limits.max_call_depth == 0
            || limits.max_trace_len == 0
            || limits.max_execution_ms == 0
            || limits.max_collection_len == 0
        {
            return Err(ConfigError::Invalid(
                "tracer limits must be greater than zero".to_string(),
            ));
        }
        if self.solver_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "solver_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if !(self.similarity_threshold > 0.0 && self.similarity_threshold <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "similarity_threshold must be in (0, 1], got {}",
                self.similarity_threshold
            )));
        }
        if self.weights.all().iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ConfigError::Invalid(
                "phase weights must be finite and non-negative".to_string(),
            ));
        }
        if !self.vote_threshold.is_finite() || self.vote_threshold < 0.0 {
            return Err(ConfigError::Invalid(
                "vote_threshold must be finite and non-negative".to_string(),
            ));
        }
        if self.entry_point.function.is_empty() {
            return Err(ConfigError::Invalid(
                "entry_point.function must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        assert!(AnalyzerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config =
            AnalyzerConfig::from_json(r#"{ "tracer": { "max_call_depth": 50 } }"#).unwrap();
        assert_eq!(config.tracer.max_call_depth, 50);
        assert_eq!(config.tracer.max_trace_len, 20_000);
        assert_eq!(config.entry_point.function, "analyze_halting");
        assert_eq!(config.vote_threshold, 1.0);
    }

    #[test]
    fn test_rejects_zero_trace_len() {
        let err = AnalyzerConfig::from_json(r#"{ "tracer": { "max_trace_len": 0 } }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_threshold_out_of_range() {
        let err = AnalyzerConfig::from_json(r#"{ "similarity_threshold": 1.5 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_malformed_json() {
        let err = AnalyzerConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::Malformed(_)));
    }

    #[test]
    fn test_weight_lookup() {
        let weights = PhaseWeights::default();
        assert_eq!(weights.weight(Phase::StaticPreparation), 0.8);
        assert_eq!(weights.weight(Phase::Synthesis), 0.0);
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "solver_timeout_ms": 250 }}"#).unwrap();
        let config = AnalyzerConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.solver_timeout_ms, 250);
    }
}
