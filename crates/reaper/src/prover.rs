//! # Constraint-Based Prover
//!
//! Proves whole-program termination for a restricted family of loops. The
//! prover only ever answers `Halts` or `Continue`; it never claims
//! non-termination.
//!
//! ## Accepted shapes
//! - **Counted**: `for _ in range(<int literals>)` or over a literal
//!   sequence. Terminates by construction.
//! - **Single-variable `while`**: `v < c`, `v <= c`, `v > c` or `v >= c`
//!   (either operand order, `c` an integer literal) with exactly one
//!   top-level update `v = v ± k`, `v = k + v`, `v += k` or `v -= k`, no
//!   other store into `v`, and no `continue`.
//!
//! ## Obligations
//! For a `while` shape with ranking `r` (`c - v` when counting up, `v - c`
//! when counting down) both must be unsatisfiable:
//! 1. `cond(v) ∧ r(v) < 0`
//! 2. `cond(v) ∧ v' = v + δ ∧ r(v') ≥ r(v)`
//!
//! The program as a whole is proved only when it has no recursion cycle and
//! every loop in it is proved.

use crate::smt::{ConstraintSolver, Formula, SatResult, SolverError, Term, Z3Backend};
use anatomist::ast::{BinOp, CmpOp, Expr, FunctionDef, Stmt, StmtKind};
use anatomist::facts::{
    contains_unmodeled, function_defs, globals_written_by_calls, has_continue, has_unmodeled, is_counted_iter,
    written_names,
};
use anatomist::visit::all_stmts;
use anatomist::{CallGraph, Program};
use common::PhaseResult;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Direction the loop variable must move for the loop to finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// `v < c` / `v <= c`: ranking `c - v`.
    Up,
    /// `v > c` / `v >= c`: ranking `v - c`.
    Down,
}

/// A `while` loop reduced to its single-variable skeleton.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopShape {
    pub var: String,
    /// Test operator with the variable on the left.
    pub op: CmpOp,
    pub bound: i64,
    /// Signed change applied to `var` each iteration.
    pub delta: i64,
}

impl LoopShape {
    pub fn direction(&self) -> Direction {
        match self.op {
            CmpOp::Gt | CmpOp::GtE => Direction::Down,
            _ => Direction::Up,
        }
    }

    fn condition(&self, var: Term) -> Formula {
        let bound = Term::Const(self.bound);
        match self.op {
            CmpOp::Lt => Formula::Lt(var, bound),
            CmpOp::LtE => Formula::Le(var, bound),
            CmpOp::Gt => Formula::Gt(var, bound),
            _ => Formula::Ge(var, bound),
        }
    }

    fn ranking(&self, var: Term) -> Term {
        let bound = Term::Const(self.bound);
        match self.direction() {
            Direction::Up => bound.sub(var),
            Direction::Down => var.sub(bound),
        }
    }

    /// `cond ∧ r < 0`: must be unsatisfiable for `r` to be bounded below.
    pub fn bounded_obligation(&self) -> Vec<Formula> {
        let v = Term::var(&self.var);
        vec![
            self.condition(v.clone()),
            Formula::Lt(self.ranking(v), Term::Const(0)),
        ]
    }

    /// `cond ∧ v' = v + δ ∧ r(v') ≥ r(v)`: must be unsatisfiable for `r` to
    /// strictly decrease.
    pub fn decrease_obligation(&self) -> Vec<Formula> {
        let v = Term::var(&self.var);
        let next = Term::var(format!("{}'", self.var));
        vec![
            self.condition(v.clone()),
            Formula::Eq(next.clone(), v.clone().add(Term::Const(self.delta))),
            Formula::Ge(self.ranking(next), self.ranking(v)),
        ]
    }
}

/// Outcome of proving one loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopProof {
    Counted,
    Ranked,
    /// The shape is outside the accepted family.
    Unsupported,
    /// An obligation was satisfiable.
    Refuted,
    /// The solver gave up.
    Unknown(String),
}

pub struct ConstraintProver<S> {
    solver: S,
}

impl ConstraintProver<Z3Backend> {
    /// Prover backed by Z3 with a per-obligation budget.
    pub fn with_timeout(timeout_ms: u64) -> Self {
        Self::new(Z3Backend::new(timeout_ms))
    }
}

impl<S: ConstraintSolver> ConstraintProver<S> {
    pub fn new(solver: S) -> Self {
        Self { solver }
    }

    pub fn run(&mut self, program: &Program) -> PhaseResult {
        let Ok(module) = program.module() else {
            return PhaseResult::proceed("Could not parse program; nothing to prove.");
        };
        let graph = CallGraph::build(module);
        if graph.has_cycle() {
            return PhaseResult::proceed("Recursive calls are outside the prover's loop shapes.");
        }
        let defs = function_defs(module);
        let stmts = all_stmts(&module.body);
        if let Some(stmt) = stmts.iter().find(|s| matches!(s.kind, StmtKind::Unsupported(_))) {
            return PhaseResult::proceed(format!(
                "Statement at line {} is outside what the prover models.",
                stmt.line
            ));
        }

        let mut counted = 0usize;
        let mut ranked = 0usize;
        for stmt in stmts {
            let proof = match &stmt.kind {
                StmtKind::For { iter, .. } if is_counted_iter(iter) => LoopProof::Counted,
                StmtKind::For { .. } => LoopProof::Unsupported,
                StmtKind::While { test, body, .. } => match extract_shape(test, body, &defs) {
                    Some(shape) => self.prove(&shape),
                    None => LoopProof::Unsupported,
                },
                _ => continue,
            };
            debug!(line = stmt.line, ?proof, "loop proof");
            match proof {
                LoopProof::Counted => counted += 1,
                LoopProof::Ranked => ranked += 1,
                LoopProof::Unsupported => {
                    return PhaseResult::proceed(format!(
                        "Loop at line {} is outside the provable shapes.",
                        stmt.line
                    ))
                }
                LoopProof::Refuted => {
                    return PhaseResult::proceed(format!(
                        "No decreasing ranking function for the loop at line {}.",
                        stmt.line
                    ))
                }
                LoopProof::Unknown(reason) => {
                    warn!(line = stmt.line, %reason, "solver returned unknown");
                    return PhaseResult::proceed(format!(
                        "Solver could not decide the loop at line {}: {reason}.",
                        stmt.line
                    ));
                }
            }
        }

        if counted + ranked == 0 {
            return PhaseResult::proceed("No loops to prove.");
        }
        PhaseResult::halts(format!(
            "Proved termination of {} loop(s): {counted} counted, {ranked} by ranking function.",
            counted + ranked
        ))
    }

    /// Discharges both obligations for one loop.
    pub fn prove(&mut self, shape: &LoopShape) -> LoopProof {
        for obligation in [shape.bounded_obligation(), shape.decrease_obligation()] {
            match self.solver.check(&obligation) {
                Ok(SatResult::Unsat) => {}
                Ok(SatResult::Sat) => return LoopProof::Refuted,
                Ok(SatResult::Unknown(reason)) => return LoopProof::Unknown(reason),
                Err(err) => return LoopProof::Unknown(solver_failure(err)),
            }
        }
        LoopProof::Ranked
    }
}

fn solver_failure(err: SolverError) -> String {
    format!("solver error: {err}")
}

/// Reduces a `while` loop to a [`LoopShape`], if it has one.
pub fn extract_shape(test: &Expr, body: &[Stmt], defs: &HashMap<&str, &FunctionDef>) -> Option<LoopShape> {
    let (var, op, bound) = comparison(test)?;
    if has_continue(body) || has_unmodeled(body) || contains_unmodeled(test) {
        return None;
    }

    let mut updates = body
        .iter()
        .enumerate()
        .filter_map(|(i, s)| update_delta(s, var).map(|d| (i, d)));
    let (index, delta) = updates.next()?;
    if updates.next().is_some() {
        return None;
    }

    let rest: Vec<Stmt> = body
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != index)
        .map(|(_, s)| s.clone())
        .collect();
    if written_names(&rest).contains(var) || globals_written_by_calls(body, defs).contains(var) {
        return None;
    }

    Some(LoopShape {
        var: var.to_string(),
        op,
        bound,
        delta,
    })
}

/// `v <op> c` or `c <op> v`, normalized to the variable on the left.
fn comparison(test: &Expr) -> Option<(&str, CmpOp, i64)> {
    let Expr::Compare {
        left,
        ops,
        comparators,
    } = test
    else {
        return None;
    };
    let ([op], [right]) = (ops.as_slice(), comparators.as_slice()) else {
        return None;
    };
    if !matches!(op, CmpOp::Lt | CmpOp::LtE | CmpOp::Gt | CmpOp::GtE) {
        return None;
    }
    match (left.as_name(), right.as_int()) {
        (Some(var), Some(bound)) => Some((var, *op, bound)),
        _ => match (left.as_int(), right.as_name()) {
            (Some(bound), Some(var)) => Some((var, op.flipped(), bound)),
            _ => None,
        },
    }
}

/// Signed step when `stmt` is `v = v ± k`, `v = k + v`, `v += k` or `v -= k`.
fn update_delta(stmt: &Stmt, var: &str) -> Option<i64> {
    match &stmt.kind {
        StmtKind::AugAssign { target, op, value } if target.as_name() == Some(var) => {
            signed(*op, value.as_int()?)
        }
        StmtKind::Assign { targets, value } if targets.len() == 1 && targets[0].as_name() == Some(var) => {
            let Expr::BinOp { left, op, right } = value else {
                return None;
            };
            match (left.as_name(), right.as_name()) {
                (Some(l), _) if l == var => signed(*op, right.as_int()?),
                (_, Some(r)) if r == var && *op == BinOp::Add => left.as_int(),
                _ => None,
            }
        }
        _ => None,
    }
}

fn signed(op: BinOp, k: i64) -> Option<i64> {
    match op {
        BinOp::Add => Some(k),
        BinOp::Sub => k.checked_neg(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Signal;

    fn run(src: &str) -> PhaseResult {
        ConstraintProver::with_timeout(5_000).run(&Program::parse(src))
    }

    fn shape(src: &str) -> Option<LoopShape> {
        let program = Program::parse(src);
        let module = program.module().unwrap();
        let defs = function_defs(module);
        all_stmts(&module.body).into_iter().find_map(|s| match &s.kind {
            StmtKind::While { test, body, .. } => extract_shape(test, body, &defs),
            _ => None,
        })
    }

    #[test]
    fn test_increasing_loop_halts() {
        let result = run("x = 0\nwhile x < 10:\n    x = x + 1\n");
        assert_eq!(result.signal, Signal::Halts);
        assert!(result.reason.contains("1 by ranking function"), "{}", result.reason);
    }

    #[test]
    fn test_decreasing_loop_halts() {
        assert_eq!(run("n = 50\nwhile n > 0:\n    n -= 3\n").signal, Signal::Halts);
    }

    #[test]
    fn test_reversed_operands() {
        assert_eq!(run("i = 0\nwhile 10 >= i:\n    i = 2 + i\n").signal, Signal::Halts);
    }

    #[test]
    fn test_counted_loop_halts() {
        let result = run("for i in range(10):\n    pass\n");
        assert_eq!(result.signal, Signal::Halts);
        assert!(result.reason.contains("1 counted"));
    }

    #[test]
    fn test_wrong_direction_is_refuted() {
        let result = run("x = 0\nwhile x < 10:\n    x = x - 1\n");
        assert_eq!(result.signal, Signal::Continue);
        assert!(result.reason.contains("No decreasing ranking function"));
    }

    #[test]
    fn test_zero_step_is_refuted() {
        assert_eq!(run("x = 0\nwhile x < 10:\n    x += 0\n").signal, Signal::Continue);
    }

    #[test]
    fn test_two_updates_rejected() {
        assert!(shape("x = 0\nwhile x < 10:\n    x += 1\n    x += 1\n").is_none());
    }

    #[test]
    fn test_nested_store_rejected() {
        assert!(shape("x = 0\nwhile x < 10:\n    x += 1\n    if x == 5:\n        x = 0\n").is_none());
    }

    #[test]
    fn test_assignment_expression_rejected() {
        let src = "x = 0\nwhile x < 10:\n    x += 1\n    print((x := x - 5))\n";
        assert!(shape(src).is_none());
        assert_eq!(run(src).signal, Signal::Continue);
    }

    #[test]
    fn test_loop_inside_match_is_not_skipped() {
        let src = "x = 0\nmatch x:\n    case 0:\n        while True:\n            pass\n";
        let result = run(src);
        assert_eq!(result.signal, Signal::Continue);
        assert!(result.reason.contains("line 2"), "{}", result.reason);
    }

    #[test]
    fn test_continue_rejected() {
        assert!(shape("x = 0\nwhile x < 10:\n    if y:\n        continue\n    x += 1\n").is_none());
    }

    #[test]
    fn test_shape_extraction() {
        let s = shape("k = 9\nwhile 0 < k:\n    k = k - 2\n").unwrap();
        assert_eq!(s.var, "k");
        assert_eq!(s.op, CmpOp::Gt);
        assert_eq!(s.bound, 0);
        assert_eq!(s.delta, -2);
        assert_eq!(s.direction(), Direction::Down);
    }

    #[test]
    fn test_not_equal_test_is_unsupported() {
        let result = run("k = 3\nwhile k != 0:\n    k = k - 1\n");
        assert_eq!(result.signal, Signal::Continue);
        assert!(result.reason.contains("outside the provable shapes"));
    }

    #[test]
    fn test_recursion_is_out_of_scope() {
        assert_eq!(run("def f(n):\n    return f(n)\n").signal, Signal::Continue);
    }

    #[test]
    fn test_every_loop_must_be_proved() {
        let src = "x = 0\nwhile x < 10:\n    x += 1\nfor item in items:\n    pass\n";
        assert_eq!(run(src).signal, Signal::Continue);
    }

    struct Gives(SatResult);

    impl ConstraintSolver for Gives {
        fn check(&mut self, _assertions: &[Formula]) -> Result<SatResult, SolverError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_solver_unknown_continues() {
        let mut prover = ConstraintProver::new(Gives(SatResult::Unknown("timeout".into())));
        let result = prover.run(&Program::parse("x = 0\nwhile x < 10:\n    x += 1\n"));
        assert_eq!(result.signal, Signal::Continue);
        assert!(result.reason.contains("timeout"));
    }
}
