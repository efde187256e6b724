//! # Static Preparation
//!
//! A structural sweep over every loop and every function of the program.
//!
//! ## Rules (in order)
//! 1. `while <truthy literal>` anywhere ⇒ does not halt.
//! 2. A `while` whose test folds to true without naming any variable, and
//!    whose body cannot leave the loop ⇒ does not halt.
//! 3. A `while` whose test variables are never changed by its body (nor by
//!    the functions its body calls), whose test calls nothing and whose body
//!    cannot leave the loop ⇒ does not halt.
//! 4. No unresolved loops and no recursion cycle ⇒ halts. Counted `for`
//!    loops over literal bounds and `while` loops whose test folds to false
//!    are resolved.
//! 5. Otherwise continue, naming what is left open.

use anatomist::ast::{Expr, FunctionDef, Module, Stmt, StmtKind};
use anatomist::facts::{
    contains_call, contains_unmodeled, fold_truth, function_defs, globals_written_by_calls,
    has_unmodeled, is_counted_iter, loop_body_exits, possibly_mutated,
};
use anatomist::visit::{all_stmts, names_in};
use anatomist::{CallGraph, Program};
use common::PhaseResult;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// How the sweep classified one loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopFinding {
    /// Never terminates once entered.
    Infinite { line: u32, detail: String },
    /// Terminates on its own (counted, or never entered).
    Bounded,
    /// Needs a later phase.
    Open,
}

pub struct StaticPreparation;

impl StaticPreparation {
    /// Runs the sweep on the parsed program.
    pub fn run(program: &Program) -> PhaseResult {
        let module = match program.module() {
            Ok(module) => module,
            Err(err) => return PhaseResult::impossible(format!("Could not parse program: {err}")),
        };
        Self::analyze(module)
    }

    pub fn analyze(module: &Module) -> PhaseResult {
        let defs = function_defs(module);
        let mut open_loops = 0usize;
        let mut counted_loops = 0usize;
        let mut unmodeled = 0usize;

        for stmt in all_stmts(&module.body) {
            if matches!(stmt.kind, StmtKind::Unsupported(_)) {
                unmodeled += 1;
            }
            match Self::classify_loop(stmt, &defs) {
                Some(LoopFinding::Infinite { line, detail }) => {
                    debug!(line, "static sweep found an infinite loop");
                    return PhaseResult::does_not_halt(format!("{detail} (line {line})."));
                }
                Some(LoopFinding::Bounded) => counted_loops += 1,
                Some(LoopFinding::Open) => open_loops += 1,
                None => {}
            }
        }

        let graph = CallGraph::build(module);
        let recursive = graph.recursive_functions();
        debug!(
            open_loops,
            counted_loops,
            recursive = recursive.len(),
            functions = graph.stats().function_count,
            "static sweep finished"
        );

        if open_loops == 0 && recursive.is_empty() && unmodeled == 0 {
            let reason = if counted_loops == 0 {
                "No loops or recursion found.".to_string()
            } else {
                format!("Only {counted_loops} loop(s) with literal bounds and no recursion.")
            };
            return PhaseResult::halts(reason);
        }

        let mut open = Vec::new();
        if open_loops > 0 {
            open.push(format!("{open_loops} unresolved loop(s)"));
        }
        if !recursive.is_empty() {
            open.push(format!("recursive function(s): {}", recursive.join(", ")));
        }
        if unmodeled > 0 {
            open.push(format!("{unmodeled} unmodeled statement(s)"));
        }
        PhaseResult::proceed(format!("Unresolved structure: {}.", open.join("; ")))
    }

    /// Classifies one statement if it is a loop.
    pub fn classify_loop(
        stmt: &Stmt,
        defs: &HashMap<&str, &FunctionDef>,
    ) -> Option<LoopFinding> {
        match &stmt.kind {
            StmtKind::For { iter, .. } => Some(if is_counted_iter(iter) {
                LoopFinding::Bounded
            } else {
                LoopFinding::Open
            }),
            StmtKind::While { test, body, .. } => Some(Self::classify_while(stmt.line, test, body, defs)),
            _ => None,
        }
    }

    fn classify_while(
        line: u32,
        test: &Expr,
        body: &[Stmt],
        defs: &HashMap<&str, &FunctionDef>,
    ) -> LoopFinding {
        if let Expr::Constant(c) = test {
            return if c.is_truthy() {
                LoopFinding::Infinite {
                    line,
                    detail: "Found an infinite loop: the loop condition is always true".to_string(),
                }
            } else {
                LoopFinding::Bounded
            };
        }

        let names: BTreeSet<&str> = names_in(test).into_iter().collect();
        if names.is_empty() {
            return match fold_truth(test) {
                Some(true) if !loop_body_exits(body) && !has_unmodeled(body) => LoopFinding::Infinite {
                    line,
                    detail: "Found an infinite loop: the loop condition is constant and true"
                        .to_string(),
                },
                Some(false) => LoopFinding::Bounded,
                _ => LoopFinding::Open,
            };
        }

        if contains_call(test)
            || loop_body_exits(body)
            || contains_unmodeled(test)
            || has_unmodeled(body)
        {
            return LoopFinding::Open;
        }
        let mut changed = possibly_mutated(body);
        changed.extend(globals_written_by_calls(body, defs));
        if names.iter().all(|n| !changed.contains(*n)) {
            let listed: Vec<&str> = names.into_iter().collect();
            return LoopFinding::Infinite {
                line,
                detail: format!(
                    "Found an infinite loop: `{}` never changes inside the loop body",
                    listed.join("`, `")
                ),
            };
        }
        LoopFinding::Open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Signal;

    fn run(src: &str) -> PhaseResult {
        StaticPreparation::run(&Program::parse(src))
    }

    #[test]
    fn test_straight_line_program_halts() {
        let result = run("x = 1\ny = x + 2\nprint(y)\n");
        assert_eq!(result.signal, Signal::Halts);
        assert_eq!(result.reason, "No loops or recursion found.");
    }

    #[test]
    fn test_functions_without_cycles_halt() {
        let result = run("def f(a):\n    return g(a)\ndef g(b):\n    return b * 2\nprint(f(3))\n");
        assert_eq!(result.signal, Signal::Halts);
    }

    #[test]
    fn test_while_true_does_not_halt() {
        let result = run("while True:\n    pass\n");
        assert_eq!(result.signal, Signal::DoesNotHalt);
        assert!(result.reason.contains("line 1"), "{}", result.reason);
    }

    #[test]
    fn test_while_true_with_break_still_flagged() {
        let result = run("n = 0\nwhile True:\n    n += 1\n    if n > 3:\n        break\n");
        assert_eq!(result.signal, Signal::DoesNotHalt);
    }

    #[test]
    fn test_nested_while_true_in_function() {
        let result = run("def spin():\n    while 1:\n        pass\n");
        assert_eq!(result.signal, Signal::DoesNotHalt);
    }

    #[test]
    fn test_frozen_condition_does_not_halt() {
        let result = run("x = 5\nwhile x > 0:\n    print(x)\n");
        assert_eq!(result.signal, Signal::DoesNotHalt);
        assert!(result.reason.contains("`x`"), "{}", result.reason);
    }

    #[test]
    fn test_mutated_condition_continues() {
        let result = run("x = 5\nwhile x > 0:\n    x = x - 1\n");
        assert_eq!(result.signal, Signal::Continue);
        assert!(result.reason.contains("1 unresolved loop(s)"));
    }

    #[test]
    fn test_method_receiver_counts_as_change() {
        let result = run("xs = [1, 2]\nwhile xs:\n    xs.pop()\n");
        assert_eq!(result.signal, Signal::Continue);
    }

    #[test]
    fn test_global_written_by_callee_counts_as_change() {
        let src = "n = 3\ndef step():\n    global n\n    n = n - 1\nwhile n > 0:\n    step()\n";
        assert_eq!(run(src).signal, Signal::Continue);
    }

    #[test]
    fn test_loop_with_exit_is_left_open() {
        let result = run("x = 1\nwhile x > 0:\n    if ready():\n        break\n");
        assert_eq!(result.signal, Signal::Continue);
    }

    #[test]
    fn test_assignment_expression_in_body_leaves_loop_open() {
        let result = run("x = 3\nwhile x > 0:\n    print((x := x - 1))\n");
        assert_eq!(result.signal, Signal::Continue, "{}", result.reason);
    }

    #[test]
    fn test_match_statement_in_body_leaves_loop_open() {
        let result = run("x = 3\nwhile x > 0:\n    match x:\n        case _:\n            x -= 1\n");
        assert_eq!(result.signal, Signal::Continue, "{}", result.reason);
    }

    #[test]
    fn test_unmodeled_statement_blocks_halting_fast_path() {
        let result = run("x = 1\nmatch x:\n    case 1:\n        while True:\n            pass\n");
        assert_eq!(result.signal, Signal::Continue, "{}", result.reason);
        assert!(result.reason.contains("unmodeled"), "{}", result.reason);
    }

    #[test]
    fn test_counted_for_halts() {
        let result = run("for i in range(10):\n    pass\n");
        assert_eq!(result.signal, Signal::Halts);
        assert!(result.reason.contains("literal bounds"));
    }

    #[test]
    fn test_folded_false_loop_halts() {
        assert_eq!(run("while 1 > 2:\n    pass\n").signal, Signal::Halts);
    }

    #[test]
    fn test_folded_true_loop_does_not_halt() {
        assert_eq!(run("while 2 > 1:\n    pass\n").signal, Signal::DoesNotHalt);
    }

    #[test]
    fn test_recursion_continues() {
        let result = run("def f(n):\n    return f(n - 1)\n");
        assert_eq!(result.signal, Signal::Continue);
        assert!(result.reason.contains("recursive function(s): f"));
    }

    #[test]
    fn test_mutual_recursion_continues() {
        let result = run("def a():\n    b()\ndef b():\n    a()\n");
        assert!(result.reason.contains("a, b"), "{}", result.reason);
    }

    #[test]
    fn test_unparseable_is_impossible() {
        let result = run("def broken(:\n");
        assert_eq!(result.signal, Signal::ImpossibleToDetermine);
        assert!(result.reason.starts_with("Could not parse program"));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        const PREAMBLE: &str = "def helper(a):\n    return a * 2\nv0 = 0\nv1 = 1\nv2 = 2\nv3 = 3\n";

        /// One loop-free statement over `v0`..`v3`.
        fn statement() -> impl Strategy<Value = (u8, u8, u8, i64)> {
            (0u8..5, 0u8..4, 0u8..4, 0i64..100)
        }

        fn render(stmts: &[(u8, u8, u8, i64)], indent: &str) -> String {
            let mut out = String::new();
            for &(kind, i, j, k) in stmts {
                let line = match kind {
                    0 => format!("v{i} = {k}\n"),
                    1 => format!("v{i} = v{j} + {k}\n"),
                    2 => format!("print(v{j})\n"),
                    3 => format!("if v{j} > {k}:\n{indent}    v{i} = v{j} - 1\n"),
                    _ => format!("v{i} = helper(v{j})\n"),
                };
                out.push_str(indent);
                out.push_str(&line);
            }
            out
        }

        proptest! {
            #[test]
            fn prop_loop_free_programs_halt(
                stmts in proptest::collection::vec(statement(), 0..12)
            ) {
                let src = format!("{PREAMBLE}{}", render(&stmts, ""));
                let result = run(&src);
                prop_assert_eq!(result.signal, Signal::Halts, "{}\n{}", src, result.reason);
            }

            #[test]
            fn prop_literal_true_loops_do_not_halt(
                test in prop::sample::select(vec!["True", "1", "'spin'", "not 0", "1 and 2", "-3"]),
                before in proptest::collection::vec(statement(), 0..4),
                body in proptest::collection::vec(statement(), 1..6),
            ) {
                let src = format!(
                    "{PREAMBLE}{}while {test}:\n{}",
                    render(&before, ""),
                    render(&body, "    ")
                );
                let result = run(&src);
                prop_assert_eq!(result.signal, Signal::DoesNotHalt, "{}\n{}", src, result.reason);
            }
        }
    }
}
