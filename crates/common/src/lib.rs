//! # Common: Verdict Vocabulary
//!
//! Types shared by every analysis crate:
//! - [`Outcome`]: the tri-state answer handed back to callers.
//! - [`Signal`] / [`PhaseResult`]: what a single phase reports, including the
//!   phase-internal `Continue` signal.
//! - [`Phase`]: the fixed pipeline stages, in execution order.
//! - [`Verdict`]: the immutable `(outcome, reason)` pair.
//! - [`config::AnalyzerConfig`]: bounds, weights and thresholds.

pub mod config;

pub use config::{AnalyzerConfig, ConfigError, EntryPoint, PhaseWeights, TracerLimits};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Final answer of one full analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Halts,
    DoesNotHalt,
    ImpossibleToDetermine,
}

impl Outcome {
    /// Human-readable form, as returned to candidates calling the entry point.
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Halts => "halts",
            Outcome::DoesNotHalt => "does not halt",
            Outcome::ImpossibleToDetermine => "impossible to determine",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signal emitted by one phase.
///
/// `Continue` never leaves the Orchestrator; it means "no answer here, run the
/// next phase".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Halts,
    DoesNotHalt,
    ImpossibleToDetermine,
    Continue,
}

impl Signal {
    /// Maps to an [`Outcome`], or `None` for `Continue`.
    pub fn outcome(self) -> Option<Outcome> {
        match self {
            Signal::Halts => Some(Outcome::Halts),
            Signal::DoesNotHalt => Some(Outcome::DoesNotHalt),
            Signal::ImpossibleToDetermine => Some(Outcome::ImpossibleToDetermine),
            Signal::Continue => None,
        }
    }
}

/// A phase's signal plus its free-text justification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub signal: Signal,
    pub reason: String,
}

impl PhaseResult {
    pub fn new(signal: Signal, reason: impl Into<String>) -> Self {
        Self {
            signal,
            reason: reason.into(),
        }
    }

    pub fn halts(reason: impl Into<String>) -> Self {
        Self::new(Signal::Halts, reason)
    }

    pub fn does_not_halt(reason: impl Into<String>) -> Self {
        Self::new(Signal::DoesNotHalt, reason)
    }

    pub fn impossible(reason: impl Into<String>) -> Self {
        Self::new(Signal::ImpossibleToDetermine, reason)
    }

    pub fn proceed(reason: impl Into<String>) -> Self {
        Self::new(Signal::Continue, reason)
    }

    /// `true` for `Halts` and `DoesNotHalt`, the only signals that end the
    /// pipeline regardless of which phase produced them.
    pub fn is_definitive(&self) -> bool {
        matches!(self.signal, Signal::Halts | Signal::DoesNotHalt)
    }
}

/// Pipeline stages, in the order the Orchestrator runs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Paradox,
    StaticPreparation,
    Heuristic,
    Prover,
    Tracer,
    Synthesis,
}

impl Phase {
    /// Prefix used in verdict reasons (e.g. `"Static analysis: ..."`).
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Paradox => "Paradox detection",
            Phase::StaticPreparation => "Static analysis",
            Phase::Heuristic => "Heuristic classification",
            Phase::Prover => "Symbolic prover",
            Phase::Tracer => "Dynamic tracing",
            Phase::Synthesis => "Decision synthesis",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The final `(outcome, reason)` pair. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub outcome: Outcome,
    pub reason: String,
}

impl Verdict {
    pub fn new(outcome: Outcome, reason: impl Into<String>) -> Self {
        Self {
            outcome,
            reason: reason.into(),
        }
    }

    /// Builds a verdict from a phase result, prefixing the reason with the
    /// phase label. Returns `None` for `Continue`.
    pub fn from_phase(phase: Phase, result: &PhaseResult) -> Option<Self> {
        let outcome = result.signal.outcome()?;
        Some(Self::new(outcome, format!("{}: {}", phase.label(), result.reason)))
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.outcome, self.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_text() {
        assert_eq!(Outcome::Halts.as_str(), "halts");
        assert_eq!(Outcome::DoesNotHalt.to_string(), "does not halt");
        assert_eq!(
            Outcome::ImpossibleToDetermine.to_string(),
            "impossible to determine"
        );
    }

    #[test]
    fn test_continue_has_no_outcome() {
        assert_eq!(Signal::Continue.outcome(), None);
        assert_eq!(Signal::Halts.outcome(), Some(Outcome::Halts));
    }

    #[test]
    fn test_definitive_signals() {
        assert!(PhaseResult::halts("x").is_definitive());
        assert!(PhaseResult::does_not_halt("x").is_definitive());
        assert!(!PhaseResult::impossible("x").is_definitive());
        assert!(!PhaseResult::proceed("x").is_definitive());
    }

    #[test]
    fn test_verdict_from_phase_prefixes_reason() {
        let result = PhaseResult::halts("no loops");
        let verdict = Verdict::from_phase(Phase::StaticPreparation, &result).unwrap();
        assert_eq!(verdict.outcome, Outcome::Halts);
        assert_eq!(verdict.reason, "Static analysis: no loops");

        assert!(Verdict::from_phase(Phase::Prover, &PhaseResult::proceed("n/a")).is_none());
    }

    #[test]
    fn test_phase_order() {
        assert!(Phase::Paradox < Phase::StaticPreparation);
        assert!(Phase::Tracer < Phase::Synthesis);
    }

    #[test]
    fn test_outcome_serde_names() {
        let json = serde_json::to_string(&Outcome::DoesNotHalt).unwrap();
        assert_eq!(json, "\"does_not_halt\"");
    }
}
