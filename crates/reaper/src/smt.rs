//! # Integer Constraint Layer
//!
//! A tiny linear-integer term language, the [`ConstraintSolver`] contract
//! the prover talks to, and the Z3 backend that implements it.
//!
//! Every query gets a fresh Z3 context, so no solver state survives
//! between proof obligations.

use std::collections::HashMap;
use z3::ast::{Ast, Bool, Int};
use z3::SatResult as Z3SatResult;

/// Integer-valued term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    Var(String),
    Const(i64),
    Add(Box<Term>, Box<Term>),
    Sub(Box<Term>, Box<Term>),
}

impl Term {
    pub fn var(name: impl Into<String>) -> Self {
        Term::Var(name.into())
    }

    pub fn add(self, rhs: Term) -> Self {
        Term::Add(Box::new(self), Box::new(rhs))
    }

    pub fn sub(self, rhs: Term) -> Self {
        Term::Sub(Box::new(self), Box::new(rhs))
    }
}

/// Boolean constraint over [`Term`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Formula {
    Lt(Term, Term),
    Le(Term, Term),
    Gt(Term, Term),
    Ge(Term, Term),
    Eq(Term, Term),
    And(Vec<Formula>),
    Not(Box<Formula>),
}

/// Result of a satisfiability check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SatResult {
    Sat,
    Unsat,
    Unknown(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    #[error("Solver timeout of {0} ms does not fit the backend's 32-bit limit")]
    InvalidTimeout(u64),
    #[error("Empty query")]
    EmptyQuery,
}

/// Decides satisfiability of a conjunction of constraints.
pub trait ConstraintSolver {
    /// Checks whether all `assertions` can hold at once.
    ///
    /// # Errors
    /// Backend-specific setup failures. A solver that gives up (timeout,
    /// incompleteness) reports `Ok(SatResult::Unknown(_))` instead.
    fn check(&mut self, assertions: &[Formula]) -> Result<SatResult, SolverError>;
}

/// Z3 with a per-query time budget.
pub struct Z3Backend {
    timeout_ms: u64,
}

impl Z3Backend {
    pub fn new(timeout_ms: u64) -> Self {
        Self { timeout_ms }
    }
}

impl ConstraintSolver for Z3Backend {
    fn check(&mut self, assertions: &[Formula]) -> Result<SatResult, SolverError> {
        if assertions.is_empty() {
            return Err(SolverError::EmptyQuery);
        }
        let timeout =
            u32::try_from(self.timeout_ms).map_err(|_| SolverError::InvalidTimeout(self.timeout_ms))?;

        let cfg = z3::Config::new();
        let ctx = z3::Context::new(&cfg);
        let solver = z3::Solver::new(&ctx);
        let mut params = z3::Params::new(&ctx);
        params.set_u32("timeout", timeout);
        solver.set_params(&params);

        let mut vars = HashMap::new();
        for assertion in assertions {
            let encoded = encode_formula(&ctx, &mut vars, assertion);
            solver.assert(&encoded);
        }

        Ok(match solver.check() {
            Z3SatResult::Sat => SatResult::Sat,
            Z3SatResult::Unsat => SatResult::Unsat,
            Z3SatResult::Unknown => SatResult::Unknown(
                solver
                    .get_reason_unknown()
                    .unwrap_or_else(|| "unknown".to_string()),
            ),
        })
    }
}

fn encode_term<'ctx>(
    ctx: &'ctx z3::Context,
    vars: &mut HashMap<String, Int<'ctx>>,
    term: &Term,
) -> Int<'ctx> {
    match term {
        Term::Var(name) => vars
            .entry(name.clone())
            .or_insert_with(|| Int::new_const(ctx, name.as_str()))
            .clone(),
        Term::Const(value) => Int::from_i64(ctx, *value),
        Term::Add(lhs, rhs) => {
            let l = encode_term(ctx, vars, lhs);
            let r = encode_term(ctx, vars, rhs);
            Int::add(ctx, &[&l, &r])
        }
        Term::Sub(lhs, rhs) => {
            let l = encode_term(ctx, vars, lhs);
            let r = encode_term(ctx, vars, rhs);
            Int::sub(ctx, &[&l, &r])
        }
    }
}

fn encode_formula<'ctx>(
    ctx: &'ctx z3::Context,
    vars: &mut HashMap<String, Int<'ctx>>,
    formula: &Formula,
) -> Bool<'ctx> {
    match formula {
        Formula::Lt(a, b) => encode_term(ctx, vars, a).lt(&encode_term(ctx, vars, b)),
        Formula::Le(a, b) => encode_term(ctx, vars, a).le(&encode_term(ctx, vars, b)),
        Formula::Gt(a, b) => encode_term(ctx, vars, a).gt(&encode_term(ctx, vars, b)),
        Formula::Ge(a, b) => encode_term(ctx, vars, a).ge(&encode_term(ctx, vars, b)),
        Formula::Eq(a, b) => encode_term(ctx, vars, a)._eq(&encode_term(ctx, vars, b)),
        Formula::And(parts) => {
            let encoded: Vec<Bool<'ctx>> = parts
                .iter()
                .map(|p| encode_formula(ctx, vars, p))
                .collect();
            let refs: Vec<&Bool<'ctx>> = encoded.iter().collect();
            Bool::and(ctx, &refs)
        }
        Formula::Not(inner) => encode_formula(ctx, vars, inner).not(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x() -> Term {
        Term::var("x")
    }

    #[test]
    fn test_contradiction_is_unsat() {
        let mut solver = Z3Backend::new(5_000);
        let result = solver
            .check(&[
                Formula::Lt(x(), Term::Const(10)),
                Formula::Lt(Term::Const(10).sub(x()), Term::Const(0)),
            ])
            .unwrap();
        assert_eq!(result, SatResult::Unsat);
    }

    #[test]
    fn test_satisfiable_query() {
        let mut solver = Z3Backend::new(5_000);
        let result = solver
            .check(&[Formula::Eq(x().add(Term::Const(1)), Term::Const(3))])
            .unwrap();
        assert_eq!(result, SatResult::Sat);
    }

    #[test]
    fn test_shared_variables_are_one_constant() {
        let mut solver = Z3Backend::new(5_000);
        let result = solver
            .check(&[
                Formula::Gt(x(), Term::Const(5)),
                Formula::Not(Box::new(Formula::Gt(x(), Term::Const(4)))),
            ])
            .unwrap();
        assert_eq!(result, SatResult::Unsat);
    }

    #[test]
    fn test_empty_query_is_error() {
        let mut solver = Z3Backend::new(5_000);
        assert!(matches!(solver.check(&[]), Err(SolverError::EmptyQuery)));
    }

    #[test]
    fn test_oversized_timeout_is_error() {
        let mut solver = Z3Backend::new(u64::MAX);
        let err = solver.check(&[Formula::Eq(x(), x())]).unwrap_err();
        assert!(matches!(err, SolverError::InvalidTimeout(_)));
    }
}
