//! # The Oracle: Structural Judgement
//!
//! The tree-only phases of the pipeline. Each one is a pure function from a
//! parsed program (and configuration) to a [`common::PhaseResult`]:
//!
//! - [`paradox::ParadoxDetector`]: the self-reading, self-analyzing, inverting construction.
//! - [`statics::StaticPreparation`]: literal infinite loops, frozen loop conditions,
//!   recursion cycles, and the "no repetition at all" fast path.
//! - [`heuristics::HeuristicClassifier`]: known-hard shapes (Collatz, Ackermann,
//!   machine simulators), answered with "impossible to determine".
//! - [`synthesis::DecisionSynthesizer`]: priority, weighted vote, and the
//!   residual self-reference check.
//!
//! None of these execute the candidate.

pub mod heuristics;
pub mod paradox;
pub mod statics;
pub mod synthesis;

pub use heuristics::HeuristicClassifier;
pub use paradox::ParadoxDetector;
pub use statics::StaticPreparation;
pub use synthesis::DecisionSynthesizer;
