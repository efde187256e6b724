//! # Decision Synthesizer
//!
//! Runs when no phase produced a definitive verdict. Never returns
//! `Continue`.
//!
//! ## Order
//! 1. **Priority**: any `Halts`/`DoesNotHalt` among the phase results wins
//!    (re-checked here for direct callers).
//! 2. **Weighted vote**: every phase that said halts or does-not-halt adds
//!    its configured weight to that side; the leader wins if its total
//!    exceeds the vote threshold. Undecided phases abstain.
//! 3. **Structural self-reference**: the program opens `__file__` and calls
//!    the analysis entry point ⇒ does not halt.
//! 4. **Textual self-reference**: the entry point's name occurs anywhere in
//!    the source ⇒ does not halt.
//! 5. Otherwise impossible to determine.

use aho_corasick::AhoCorasick;
use anatomist::ast::{Expr, Module};
use anatomist::visit::{all_exprs, names_in};
use anatomist::Program;
use common::{AnalyzerConfig, Outcome, Phase, PhaseResult, Signal};
use tracing::{debug, warn};

pub struct DecisionSynthesizer<'c> {
    config: &'c AnalyzerConfig,
}

impl<'c> DecisionSynthesizer<'c> {
    pub fn new(config: &'c AnalyzerConfig) -> Self {
        Self { config }
    }

    /// Combines the results of the phases that ran.
    pub fn decide(&self, program: &Program, results: &[(Phase, PhaseResult)]) -> PhaseResult {
        if let Some((phase, result)) = results.iter().find(|(_, r)| r.is_definitive()) {
            return PhaseResult::new(result.signal, format!("{}: {}", phase.label(), result.reason));
        }

        if let Some(result) = self.vote(results) {
            return result;
        }

        let entry = &self.config.entry_point.function;
        if let Ok(module) = program.module() {
            if reads_own_file(module) && calls_entry_point(module, entry) {
                return PhaseResult::does_not_halt(
                    "The program reads its own source and passes it to the analyzer.",
                );
            }
        }
        if mentions(program.source(), entry) {
            return PhaseResult::does_not_halt(format!(
                "The program references the analysis entry point `{entry}`."
            ));
        }
        PhaseResult::impossible("No phase reached a confident verdict.")
    }

    /// Weighted vote over halts/does-not-halt opinions. "Impossible to
    /// determine" is an abstention, not a ballot.
    fn vote(&self, results: &[(Phase, PhaseResult)]) -> Option<PhaseResult> {
        let mut halts = 0.0;
        let mut loops = 0.0;
        for (phase, result) in results {
            let weight = self.config.weights.weight(*phase);
            match result.signal {
                Signal::Halts => halts += weight,
                Signal::DoesNotHalt => loops += weight,
                Signal::Continue | Signal::ImpossibleToDetermine => {}
            }
        }
        let (signal, outcome, total) = if halts >= loops {
            (Signal::Halts, Outcome::Halts, halts)
        } else {
            (Signal::DoesNotHalt, Outcome::DoesNotHalt, loops)
        };
        debug!(halts, loops, threshold = self.config.vote_threshold, "weighted vote");
        if total <= self.config.vote_threshold {
            return None;
        }
        Some(PhaseResult::new(
            signal,
            format!(
                "Weighted vote for '{outcome}' ({total:.2} > {:.2}).",
                self.config.vote_threshold
            ),
        ))
    }
}

/// `open(...)` with `__file__` somewhere in its first argument.
fn reads_own_file(module: &Module) -> bool {
    all_exprs(&module.body).into_iter().any(|e| match e {
        Expr::Call { args, .. } if e.is_call_to("open") => args
            .first()
            .is_some_and(|a| names_in(a).contains(&"__file__")),
        _ => false,
    })
}

/// A call to `entry` by name or attribute, or `getattr(_, "entry")`.
fn calls_entry_point(module: &Module, entry: &str) -> bool {
    all_exprs(&module.body).into_iter().any(|e| match e {
        Expr::Call { func, args, .. } => {
            let direct = match func.as_ref() {
                Expr::Name(id) => id == entry,
                Expr::Attribute { attr, .. } => attr == entry,
                _ => false,
            };
            direct || (e.is_call_to("getattr") && args.get(1).and_then(Expr::as_str_literal) == Some(entry))
        }
        _ => false,
    })
}

fn mentions(source: &str, entry: &str) -> bool {
    match AhoCorasick::new([entry]) {
        Ok(automaton) => automaton.is_match(source),
        Err(err) => {
            warn!(error = %err, "could not build entry-point matcher");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decide(src: &str, results: &[(Phase, PhaseResult)]) -> PhaseResult {
        let config = AnalyzerConfig::default();
        DecisionSynthesizer::new(&config).decide(&Program::parse(src), results)
    }

    #[test]
    fn test_definitive_result_has_priority() {
        let results = [
            (Phase::Heuristic, PhaseResult::impossible("hard")),
            (Phase::Tracer, PhaseResult::halts("finished")),
        ];
        let result = decide("x = 1\n", &results);
        assert_eq!(result.signal, Signal::Halts);
        assert_eq!(result.reason, "Dynamic tracing: finished");
    }

    #[test]
    fn test_vote_above_threshold() {
        let config = AnalyzerConfig::default();
        let synthesizer = DecisionSynthesizer::new(&config);
        let results = [
            (Phase::StaticPreparation, PhaseResult::does_not_halt("loop")),
            (Phase::Tracer, PhaseResult::does_not_halt("cycle")),
            (Phase::Prover, PhaseResult::halts("ranked")),
        ];
        let result = synthesizer.vote(&results).unwrap();
        assert_eq!(result.signal, Signal::DoesNotHalt);
        assert!(result.reason.starts_with("Weighted vote"), "{}", result.reason);
    }

    #[test]
    fn test_undecided_phases_abstain() {
        let config = AnalyzerConfig::default();
        let synthesizer = DecisionSynthesizer::new(&config);
        let results = [
            (Phase::StaticPreparation, PhaseResult::impossible("parse")),
            (Phase::Tracer, PhaseResult::impossible("unsupported")),
        ];
        assert!(synthesizer.vote(&results).is_none());
    }

    #[test]
    fn test_vote_below_threshold_falls_through() {
        let results = [
            (Phase::Prover, PhaseResult::proceed("shape")),
            (Phase::Tracer, PhaseResult::impossible("unsupported")),
        ];
        let result = decide("x = 1\n", &results);
        assert_eq!(result.signal, Signal::ImpossibleToDetermine);
        assert_eq!(result.reason, "No phase reached a confident verdict.");
    }

    #[test]
    fn test_structural_self_reference() {
        let src = "m = __import__('main')\nsrc = open(__file__).read()\nprint(getattr(m, 'analyze_halting')(src))\n";
        let result = decide(src, &[]);
        assert_eq!(result.signal, Signal::DoesNotHalt);
        assert!(result.reason.contains("own source"));
    }

    #[test]
    fn test_textual_self_reference() {
        let src = "name = 'analyze_halting'\nprint(name)\n";
        let result = decide(src, &[]);
        assert_eq!(result.signal, Signal::DoesNotHalt);
        assert!(result.reason.contains("`analyze_halting`"));
    }

    #[test]
    fn test_unparseable_source_still_scanned() {
        let result = decide("analyze_halting(:\n", &[]);
        assert_eq!(result.signal, Signal::DoesNotHalt);
    }

    #[test]
    fn test_unparseable_pipeline_results_reach_textual_fallback() {
        let results = [
            (Phase::Paradox, PhaseResult::proceed("no parse tree")),
            (Phase::StaticPreparation, PhaseResult::impossible("syntax error")),
            (Phase::Heuristic, PhaseResult::proceed("no parse tree")),
            (Phase::Prover, PhaseResult::proceed("no parse tree")),
            (Phase::Tracer, PhaseResult::impossible("syntax error")),
        ];
        let result = decide("analyze_halting(:\n", &results);
        assert_eq!(result.signal, Signal::DoesNotHalt);
        assert!(result.reason.contains("`analyze_halting`"), "{}", result.reason);
    }

    #[test]
    fn test_never_continues() {
        let results = [(Phase::Prover, PhaseResult::proceed("n/a"))];
        assert_ne!(decide("x = 1\n", &results).signal, Signal::Continue);
    }
}
