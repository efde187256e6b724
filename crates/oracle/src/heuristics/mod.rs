//! Heuristic classification of known-hard programs.
//!
//! This module defines the `Heuristic` trait and the classifier that runs
//! each implementation in turn. A match means "a human would not expect a
//! mechanical answer here", so the classifier reports
//! `ImpossibleToDetermine` instead of guessing.

pub mod ackermann;
pub mod collatz;
pub mod known_hard;

use anatomist::{Module, Program};
use common::{AnalyzerConfig, PhaseResult};
use tracing::debug;

/// A recogniser for one family of hard-to-decide programs.
///
/// # Implementation Notes
/// - Matchers are pure: same input, same answer.
/// - The first heuristic to return `Some` wins.
pub trait Heuristic {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Returns the reason text when `module` (or its `source`) matches.
    fn apply(&self, source: &str, module: &Module) -> Option<String>;
}

pub struct HeuristicClassifier {
    heuristics: Vec<Box<dyn Heuristic>>,
}

impl HeuristicClassifier {
    /// The standard set: Collatz iteration, Ackermann recursion and the
    /// known-hard snippet library.
    pub fn new(config: &AnalyzerConfig) -> Self {
        Self {
            heuristics: vec![
                Box::new(collatz::CollatzIteration),
                Box::new(ackermann::AckermannRecursion),
                Box::new(known_hard::KnownHardSnippets::new(config.similarity_threshold)),
            ],
        }
    }

    pub fn with_heuristics(heuristics: Vec<Box<dyn Heuristic>>) -> Self {
        Self { heuristics }
    }

    /// Advisory only: a program that does not parse is deferred, not decided.
    pub fn run(&self, program: &Program) -> PhaseResult {
        let Ok(module) = program.module() else {
            return PhaseResult::proceed("Could not parse program; deferring.");
        };
        for heuristic in &self.heuristics {
            if let Some(reason) = heuristic.apply(program.source(), module) {
                debug!(heuristic = heuristic.name(), "known-hard pattern matched");
                return PhaseResult::impossible(reason);
            }
        }
        PhaseResult::proceed("No known-hard pattern matched.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Signal;

    struct Always;

    impl Heuristic for Always {
        fn name(&self) -> &'static str {
            "always"
        }

        fn apply(&self, _source: &str, _module: &Module) -> Option<String> {
            Some("always matches".to_string())
        }
    }

    #[test]
    fn test_first_match_wins() {
        let classifier = HeuristicClassifier::with_heuristics(vec![Box::new(Always)]);
        let result = classifier.run(&Program::parse("x = 1\n"));
        assert_eq!(result.signal, Signal::ImpossibleToDetermine);
        assert_eq!(result.reason, "always matches");
    }

    #[test]
    fn test_plain_program_continues() {
        let classifier = HeuristicClassifier::new(&AnalyzerConfig::default());
        let result = classifier.run(&Program::parse("x = 0\nwhile x < 10:\n    x = x + 1\n"));
        assert_eq!(result.signal, Signal::Continue);
    }

    #[test]
    fn test_parse_failure_defers() {
        let classifier = HeuristicClassifier::new(&AnalyzerConfig::default());
        let result = classifier.run(&Program::parse("def broken(:\n"));
        assert_eq!(result.signal, Signal::Continue);
    }
}
