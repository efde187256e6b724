//! # Halting: The Orchestrator
//!
//! Sequences the phases for one analysis and owns the recursion guard.
//!
//! ```text
//! canonical hash ─► enter chain
//!   Paradox ─► Static ─► Heuristic ─► Prover ─► Tracer ─► Synthesizer
//! exit chain ─► Verdict
//! ```
//!
//! The pipeline stops at the first `Halts`/`DoesNotHalt`. An
//! "impossible to determine" from the Paradox Detector or the Heuristic
//! Classifier also stops it: both are positive recognitions of an
//! undecidable shape, and later phases would only guess. Every other result
//! is handed to the Decision Synthesizer.
//!
//! A [`Session`] is one logical call stack: its [`AnalysisChain`] and
//! [`VirtualFs`] are shared by the top-level analysis and every analysis a
//! sandboxed candidate requests. Independent analyses use independent
//! sessions.

pub mod chain;

pub use chain::{AnalysisChain, ChainError};

use anatomist::Program;
use common::{AnalyzerConfig, Outcome, Phase, PhaseResult, Signal, Verdict};
use forge::{canonical_form, hash_source, CanonicalForm};
use oracle::{DecisionSynthesizer, HeuristicClassifier, ParadoxDetector, StaticPreparation};
use reaper::ConstraintProver;
use shadow::{NestedFailure, SandboxHost, SandboxedTracer, VirtualFs};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Where the top-level candidate lives in the session filesystem.
pub const CANDIDATE_PATH: &str = "/sandbox/candidate.py";

/// Phases run before the Decision Synthesizer, in order.
const PHASES: [Phase; 5] = [
    Phase::Paradox,
    Phase::StaticPreparation,
    Phase::Heuristic,
    Phase::Prover,
    Phase::Tracer,
];

/// Progress of the innermost pipeline a session is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    NotStarted,
    Running(Phase),
    Decided,
}

pub struct Analyzer {
    config: AnalyzerConfig,
}

impl Analyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Analyzes `source` in a fresh session.
    ///
    /// # Errors
    /// [`ChainError::Corrupted`] only; every property of the program itself
    /// ends in a verdict.
    pub fn analyze(&self, source: &str) -> Result<Verdict, ChainError> {
        self.session().analyze(source)
    }

    pub fn session(&self) -> Session<'_> {
        Session::new(&self.config)
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new(AnalyzerConfig::default())
    }
}

pub struct Session<'c> {
    config: &'c AnalyzerConfig,
    chain: AnalysisChain,
    fs: VirtualFs,
    state: PipelineState,
    /// Shared by every sandboxed run of the current top-level analysis.
    deadline: Option<Instant>,
    /// A guard fault raised inside a nested analysis, surfaced once the
    /// top-level call returns.
    fault: Option<ChainError>,
}

impl<'c> Session<'c> {
    pub fn new(config: &'c AnalyzerConfig) -> Self {
        Self {
            config,
            chain: AnalysisChain::new(),
            fs: VirtualFs::new(),
            state: PipelineState::NotStarted,
            deadline: None,
            fault: None,
        }
    }

    /// Analyzes `source` as [`CANDIDATE_PATH`]. Files the candidate writes
    /// stay in the session filesystem afterwards.
    ///
    /// # Errors
    /// [`ChainError::Corrupted`] when the guard's pairing is broken.
    pub fn analyze(&mut self, source: &str) -> Result<Verdict, ChainError> {
        if let Err(err) = self.fs.write(CANDIDATE_PATH, source) {
            warn!(error = %err, "could not place candidate in the sandbox filesystem");
        }
        let budget = Duration::from_millis(self.config.tracer.max_execution_ms);
        self.deadline = Some(Instant::now() + budget);
        let result = self.run(source, CANDIDATE_PATH);
        self.deadline = None;
        if let Some(fault) = self.fault.take() {
            return Err(fault);
        }
        match result {
            Ok(verdict) => {
                info!(outcome = %verdict.outcome, "analysis complete");
                Ok(verdict)
            }
            Err(err @ ChainError::CycleDetected { .. }) => {
                Ok(Verdict::new(Outcome::DoesNotHalt, format!("Recursion guard: {err}")))
            }
            Err(err) => Err(err),
        }
    }

    pub fn chain(&self) -> &AnalysisChain {
        &self.chain
    }

    pub fn fs(&self) -> &VirtualFs {
        &self.fs
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// One guarded analysis: enter the chain, run the phases, exit the chain.
    fn run(&mut self, source: &str, file_path: &str) -> Result<Verdict, ChainError> {
        let program = Program::parse(source);
        let canonical = canonical_form(&program);
        self.chain.enter(canonical.hash)?;
        debug!(hash = %canonical.hash.short(), depth = self.chain.len(), "analysis entered");
        let verdict = self.pipeline(&program, &canonical, file_path);
        self.chain.exit(canonical.hash)?;
        Ok(verdict)
    }

    fn pipeline(&mut self, program: &Program, canonical: &CanonicalForm, file_path: &str) -> Verdict {
        let config = self.config;
        let mut results: Vec<(Phase, PhaseResult)> = Vec::with_capacity(PHASES.len());

        for phase in PHASES {
            self.state = PipelineState::Running(phase);
            let result = match phase {
                Phase::Paradox => ParadoxDetector::new(&config.entry_point).run(canonical.module.as_ref()),
                Phase::StaticPreparation => StaticPreparation::run(program),
                Phase::Heuristic => HeuristicClassifier::new(config).run(program),
                Phase::Prover => ConstraintProver::with_timeout(config.solver_timeout_ms).run(program),
                Phase::Tracer => SandboxedTracer::new(config).run(program, file_path, self),
                Phase::Synthesis => continue,
            };
            debug!(%phase, signal = ?result.signal, reason = %result.reason, "phase result");

            let recognized_undecidable = result.signal == Signal::ImpossibleToDetermine
                && matches!(phase, Phase::Paradox | Phase::Heuristic);
            if result.is_definitive() || recognized_undecidable {
                if let Some(verdict) = Verdict::from_phase(phase, &result) {
                    self.state = PipelineState::Decided;
                    return verdict;
                }
            }
            results.push((phase, result));
        }

        self.state = PipelineState::Running(Phase::Synthesis);
        let result = DecisionSynthesizer::new(config).decide(program, &results);
        debug!(signal = ?result.signal, reason = %result.reason, "synthesis result");
        self.state = PipelineState::Decided;
        Verdict::from_phase(Phase::Synthesis, &result).unwrap_or_else(|| {
            Verdict::new(
                Outcome::ImpossibleToDetermine,
                format!("{}: {}", Phase::Synthesis.label(), result.reason),
            )
        })
    }

    /// Path a nested candidate runs as: the file that holds exactly its
    /// source, or a fresh file named after its hash.
    fn nested_path(&mut self, source: &str) -> String {
        if let Some(path) = self.fs.find_by_content(source) {
            return path.to_string();
        }
        let path = format!("{}/nested_{}.py", shadow::SANDBOX_ROOT, hash_source(source).short());
        if let Err(err) = self.fs.write(&path, source) {
            warn!(error = %err, %path, "could not place nested candidate");
        }
        path
    }
}

impl SandboxHost for Session<'_> {
    fn fs(&mut self) -> &mut VirtualFs {
        &mut self.fs
    }

    fn analyze(&mut self, source: &str) -> Result<Outcome, NestedFailure> {
        let limit = self.config.tracer.max_nested_analyses;
        if self.chain.len() >= limit {
            return Err(NestedFailure::DepthLimit(limit));
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(NestedFailure::DeadlineExceeded);
        }
        let path = self.nested_path(source);
        let outer = self.state;
        let result = self.run(source, &path);
        self.state = outer;
        match result {
            Ok(verdict) => {
                debug!(outcome = %verdict.outcome, %path, "nested analysis returned");
                Ok(verdict.outcome)
            }
            Err(err @ ChainError::CycleDetected { .. }) => {
                debug!(error = %err, "nested analysis closed a cycle");
                Err(NestedFailure::Cycle(err.to_string()))
            }
            Err(fault) => {
                self.fault.get_or_insert(fault);
                Err(NestedFailure::Unavailable)
            }
        }
    }

    fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions_to_decided() {
        let analyzer = Analyzer::default();
        let mut session = analyzer.session();
        assert_eq!(session.state(), PipelineState::NotStarted);
        session.analyze("x = 1\n").unwrap();
        assert_eq!(session.state(), PipelineState::Decided);
        assert!(session.chain().is_empty());
    }

    #[test]
    fn test_candidate_is_visible_in_sandbox() {
        let analyzer = Analyzer::default();
        let mut session = analyzer.session();
        session.analyze("print('hi')\n").unwrap();
        assert_eq!(session.fs().read(CANDIDATE_PATH).unwrap(), "print('hi')\n");
    }

    #[test]
    fn test_nested_depth_is_bounded() {
        let mut config = AnalyzerConfig::default();
        config.tracer.max_nested_analyses = 1;
        let mut session = Session::new(&config);
        session.chain.enter(forge::hash_source("outer")).unwrap();
        assert_eq!(
            SandboxHost::analyze(&mut session, "x = 1\n"),
            Err(NestedFailure::DepthLimit(1))
        );
    }

    #[test]
    fn test_nested_analysis_refused_after_deadline() {
        let analyzer = Analyzer::default();
        let mut session = analyzer.session();
        session.deadline = Some(Instant::now());
        assert_eq!(
            SandboxHost::analyze(&mut session, "x = 1\n"),
            Err(NestedFailure::DeadlineExceeded)
        );
        assert!(session.chain().is_empty());
    }

    #[test]
    fn test_nested_analysis_returns_outcome() {
        let analyzer = Analyzer::default();
        let mut session = analyzer.session();
        let outcome = SandboxHost::analyze(&mut session, "while True:\n    pass\n");
        assert_eq!(outcome, Ok(Outcome::DoesNotHalt));
        assert!(session.chain().is_empty());
        assert!(session.fs().find_by_content("while True:\n    pass\n").is_some());
    }
}
