//! # The Reaper: Termination Prover
//!
//! Constraint-based proofs for restricted loop shapes, discharged to Z3
//! under a bounded time budget.
//!
//! - [`smt`]: the integer term language, the [`smt::ConstraintSolver`] contract
//!   and the [`smt::Z3Backend`].
//! - [`prover`]: loop-shape extraction, ranking functions and the
//!   whole-program [`prover::ConstraintProver`].

pub mod prover;
pub mod smt;

pub use prover::{ConstraintProver, LoopProof, LoopShape};
pub use smt::{ConstraintSolver, Formula, SatResult, SolverError, Term, Z3Backend};
