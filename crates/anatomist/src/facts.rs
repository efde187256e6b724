//! Structural facts shared by the static phases.
//!
//! Write sets, loop exits and function lookups. None of these descend into
//! nested function or class definitions unless stated otherwise.

use crate::ast::*;
use crate::visit::{all_stmts, expr_nodes};
use std::collections::{BTreeSet, HashMap};

/// Every `def` in the module (any nesting), by name. Later definitions win.
pub fn function_defs(module: &Module) -> HashMap<&str, &FunctionDef> {
    all_stmts(&module.body)
        .into_iter()
        .filter_map(|s| match &s.kind {
            StmtKind::FunctionDef(def) => Some((def.name.as_str(), def)),
            _ => None,
        })
        .collect()
}

/// Statements of `body` in pre-order, without entering nested definitions.
pub fn local_stmts(body: &[Stmt]) -> Vec<&Stmt> {
    let mut out = Vec::new();
    let mut stack: Vec<&Stmt> = body.iter().rev().collect();
    while let Some(stmt) = stack.pop() {
        out.push(stmt);
        for child in child_blocks(stmt).into_iter().rev() {
            stack.extend(child.iter().rev());
        }
    }
    out
}

/// Nested statement blocks of a compound statement (definitions excluded).
pub fn child_blocks(stmt: &Stmt) -> Vec<&[Stmt]> {
    match &stmt.kind {
        StmtKind::If { body, orelse, .. }
        | StmtKind::While { body, orelse, .. }
        | StmtKind::For { body, orelse, .. } => vec![body.as_slice(), orelse.as_slice()],
        StmtKind::With { body, .. } => vec![body.as_slice()],
        StmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
        } => {
            let mut blocks: Vec<&[Stmt]> = vec![body.as_slice()];
            blocks.extend(handlers.iter().map(|h| h.body.as_slice()));
            blocks.push(orelse);
            blocks.push(finalbody);
            blocks
        }
        _ => Vec::new(),
    }
}

/// Expressions owned directly by `stmt` (not by its nested blocks).
pub fn stmt_exprs(stmt: &Stmt) -> Vec<&Expr> {
    match &stmt.kind {
        StmtKind::Expr(e) => vec![e],
        StmtKind::Assign { targets, value } => {
            let mut v: Vec<&Expr> = targets.iter().collect();
            v.push(value);
            v
        }
        StmtKind::AugAssign { target, value, .. } => vec![target, value],
        StmtKind::If { test, .. } | StmtKind::While { test, .. } => vec![test],
        StmtKind::For { target, iter, .. } => vec![target, iter],
        StmtKind::Return(Some(e)) | StmtKind::Raise(Some(e)) => vec![e],
        StmtKind::With { items, .. } => items
            .iter()
            .flat_map(|i| std::iter::once(&i.context).chain(i.target.as_ref()))
            .collect(),
        StmtKind::Try { handlers, .. } => handlers.iter().filter_map(|h| h.kind.as_ref()).collect(),
        StmtKind::Assert { test, msg } => std::iter::once(test).chain(msg.as_ref()).collect(),
        StmtKind::Delete(targets) => targets.iter().collect(),
        StmtKind::FunctionDef(def) => def.params.iter().filter_map(|p| p.default.as_ref()).collect(),
        StmtKind::ClassDef(class) => class.bases.iter().collect(),
        _ => Vec::new(),
    }
}

/// All expression nodes reachable from `body`'s statements, not entering
/// nested definitions.
pub fn local_exprs(body: &[Stmt]) -> Vec<&Expr> {
    local_stmts(body)
        .into_iter()
        .flat_map(stmt_exprs)
        .flat_map(expr_nodes)
        .collect()
}

/// `true` when `body` holds a statement or expression the lowering left
/// unmodeled. Its reads and writes are unknown, so write sets computed over
/// `body` may be incomplete.
pub fn has_unmodeled(body: &[Stmt]) -> bool {
    local_stmts(body)
        .into_iter()
        .any(|s| matches!(s.kind, StmtKind::Unsupported(_)))
        || local_exprs(body)
            .into_iter()
            .any(|e| matches!(e, Expr::Unsupported(_)))
}

/// `true` when `expr` contains an unmodeled sub-expression.
pub fn contains_unmodeled(expr: &Expr) -> bool {
    expr_nodes(expr)
        .into_iter()
        .any(|e| matches!(e, Expr::Unsupported(_)))
}

/// The variable a store into `target` ultimately changes: `a` for `a`,
/// `a[i]`, `a.x`, `a[i].x`.
pub fn target_root(target: &Expr) -> Option<&str> {
    match target {
        Expr::Name(id) => Some(id),
        Expr::Subscript { value, .. } | Expr::Attribute { value, .. } => target_root(value),
        Expr::Starred(inner) => target_root(inner),
        _ => None,
    }
}

fn collect_target(target: &Expr, out: &mut BTreeSet<String>) {
    match target {
        Expr::Tuple(items) | Expr::List(items) => {
            for item in items {
                collect_target(item, out);
            }
        }
        other => {
            if let Some(root) = target_root(other) {
                out.insert(root.to_string());
            }
        }
    }
}

/// Variables stored into by statements of `body`: assignment, augmented
/// assignment, `for`/`with`/`except` targets and `del`.
pub fn written_names(body: &[Stmt]) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for stmt in local_stmts(body) {
        match &stmt.kind {
            StmtKind::Assign { targets, .. } => {
                for t in targets {
                    collect_target(t, &mut out);
                }
            }
            StmtKind::AugAssign { target, .. } => collect_target(target, &mut out),
            StmtKind::For { target, .. } => collect_target(target, &mut out),
            StmtKind::With { items, .. } => {
                for t in items.iter().filter_map(|i| i.target.as_ref()) {
                    collect_target(t, &mut out);
                }
            }
            StmtKind::Try { handlers, .. } => {
                out.extend(handlers.iter().filter_map(|h| h.name.clone()));
            }
            StmtKind::Delete(targets) => {
                for t in targets {
                    collect_target(t, &mut out);
                }
            }
            _ => {}
        }
    }
    out
}

/// Builtins that never mutate their arguments.
const NON_MUTATING_BUILTINS: &[&str] = &[
    "abs", "all", "any", "bool", "chr", "divmod", "float", "format", "hash", "id", "int",
    "isinstance", "len", "max", "min", "ord", "pow", "print", "repr", "round", "sorted", "str",
    "sum", "type",
];

/// [`written_names`] plus receivers of method calls (`xs.append(..)`) and
/// names passed as call arguments, which the callee may mutate.
pub fn possibly_mutated(body: &[Stmt]) -> BTreeSet<String> {
    let mut out = written_names(body);
    for expr in local_exprs(body) {
        if let Expr::Call {
            func,
            args,
            keywords,
        } = expr
        {
            if let Expr::Attribute { value, .. } = func.as_ref() {
                if let Some(root) = target_root(value) {
                    out.insert(root.to_string());
                }
            }
            if func
                .as_name()
                .is_some_and(|f| NON_MUTATING_BUILTINS.contains(&f))
            {
                continue;
            }
            for arg in args.iter().chain(keywords.iter().map(|k| &k.value)) {
                if let Some(root) = target_root(arg) {
                    out.insert(root.to_string());
                }
            }
        }
    }
    out
}

/// Globals declared by user functions called from `body`, following calls
/// transitively.
pub fn globals_written_by_calls(body: &[Stmt], defs: &HashMap<&str, &FunctionDef>) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    let mut pending: Vec<&str> = local_exprs(body)
        .into_iter()
        .filter_map(Expr::call_target)
        .collect();
    while let Some(name) = pending.pop() {
        if !seen.insert(name) {
            continue;
        }
        let Some(def) = defs.get(name) else {
            continue;
        };
        for stmt in local_stmts(&def.body) {
            if let StmtKind::Global(names) = &stmt.kind {
                out.extend(names.iter().cloned());
            }
        }
        pending.extend(local_exprs(&def.body).into_iter().filter_map(Expr::call_target));
    }
    out
}

fn is_exit_call(expr: &Expr) -> bool {
    match expr {
        Expr::Call { func, .. } => matches!(
            func.dotted_path().as_deref(),
            Some("exit" | "quit" | "sys.exit" | "os._exit")
        ),
        _ => false,
    }
}

/// `true` when executing `body` as a loop body can leave the loop:
/// `break` at this loop's level, or `return`, `raise` or a process exit
/// anywhere inside it.
pub fn loop_body_exits(body: &[Stmt]) -> bool {
    fn walk(body: &[Stmt], nested_loop: bool) -> bool {
        body.iter().any(|stmt| match &stmt.kind {
            StmtKind::Break => !nested_loop,
            StmtKind::Return(_) | StmtKind::Raise(_) => true,
            StmtKind::Expr(e) => is_exit_call(e),
            StmtKind::While { body, orelse, .. } | StmtKind::For { body, orelse, .. } => {
                walk(body, true) || walk(orelse, nested_loop)
            }
            StmtKind::FunctionDef(_) | StmtKind::ClassDef(_) => false,
            _ => child_blocks(stmt).into_iter().any(|b| walk(b, nested_loop)),
        })
    }
    walk(body, false)
}

/// `true` when `body` contains `continue` at this loop's level.
pub fn has_continue(body: &[Stmt]) -> bool {
    body.iter().any(|stmt| match &stmt.kind {
        StmtKind::Continue => true,
        StmtKind::While { .. } | StmtKind::For { .. } => false,
        StmtKind::FunctionDef(_) | StmtKind::ClassDef(_) => false,
        _ => child_blocks(stmt).into_iter().any(has_continue),
    })
}

/// `true` when a `for` over `iter` runs a number of times fixed before the
/// loop starts: `range(..)` with integer-literal arguments and a non-zero
/// step, or a literal sequence or string.
pub fn is_counted_iter(iter: &Expr) -> bool {
    match iter {
        Expr::Call {
            func,
            args,
            keywords,
        } if func.as_name() == Some("range") && keywords.is_empty() => {
            (1..=3).contains(&args.len())
                && args.iter().all(|a| a.as_int().is_some())
                && args.get(2).and_then(Expr::as_int) != Some(0)
        }
        Expr::List(_) | Expr::Tuple(_) | Expr::Set(_) | Expr::Dict(_) => true,
        Expr::Constant(Constant::Str(_)) => true,
        _ => false,
    }
}

/// `true` when `expr` contains any call.
pub fn contains_call(expr: &Expr) -> bool {
    expr_nodes(expr)
        .into_iter()
        .any(|e| matches!(e, Expr::Call { .. }))
}

/// Evaluates a name-free test to a truth value, if it folds.
pub fn fold_truth(expr: &Expr) -> Option<bool> {
    fold(expr).map(|c| c.is_truthy())
}

fn fold(expr: &Expr) -> Option<Constant> {
    match expr {
        Expr::Constant(c) => Some(c.clone()),
        Expr::UnaryOp {
            op: UnaryOp::Not,
            operand,
        } => Some(Constant::Bool(!fold(operand)?.is_truthy())),
        Expr::UnaryOp {
            op: UnaryOp::Neg,
            operand,
        } => match fold(operand)? {
            Constant::Int(v) => v.checked_neg().map(Constant::Int),
            _ => None,
        },
        Expr::BoolOp { op, values } => {
            let mut last = None;
            for v in values {
                let c = fold(v)?;
                let truthy = c.is_truthy();
                last = Some(c);
                match op {
                    BoolOp::And if !truthy => break,
                    BoolOp::Or if truthy => break,
                    _ => {}
                }
            }
            last
        }
        Expr::Compare {
            left,
            ops,
            comparators,
        } => {
            let mut lhs = fold(left)?;
            for (op, rhs_expr) in ops.iter().zip(comparators) {
                let rhs = fold(rhs_expr)?;
                let holds = match (&lhs, &rhs) {
                    (Constant::Int(a), Constant::Int(b)) => match op {
                        CmpOp::Eq => a == b,
                        CmpOp::NotEq => a != b,
                        CmpOp::Lt => a < b,
                        CmpOp::LtE => a <= b,
                        CmpOp::Gt => a > b,
                        CmpOp::GtE => a >= b,
                        _ => return None,
                    },
                    (Constant::Str(a), Constant::Str(b)) => match op {
                        CmpOp::Eq => a == b,
                        CmpOp::NotEq => a != b,
                        _ => return None,
                    },
                    _ => return None,
                };
                if !holds {
                    return Some(Constant::Bool(false));
                }
                lhs = rhs;
            }
            Some(Constant::Bool(true))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ParserHost;

    fn parse(src: &str) -> Module {
        ParserHost::new().unwrap().parse(src).unwrap()
    }

    fn loop_body(module: &Module) -> &[Stmt] {
        match &module.body.last().unwrap().kind {
            StmtKind::While { body, .. } | StmtKind::For { body, .. } => body,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_written_names_covers_targets() {
        let m = parse("while c:\n    a = 1\n    b[0] = 2\n    d.x += 1\n    for e in r:\n        pass\n");
        let names = written_names(loop_body(&m));
        for n in ["a", "b", "d", "e"] {
            assert!(names.contains(n), "{n} missing from {names:?}");
        }
        assert!(!names.contains("c"));
    }

    #[test]
    fn test_unmodeled_constructs_are_reported() {
        let walrus = parse("x = 3\nwhile x > 0:\n    print((x := x - 1))\n");
        assert!(has_unmodeled(loop_body(&walrus)));
        let matched = parse("x = 3\nwhile x > 0:\n    match x:\n        case _:\n            x -= 1\n");
        assert!(has_unmodeled(loop_body(&matched)));
        let plain = parse("x = 3\nwhile x > 0:\n    x -= 1\n");
        assert!(!has_unmodeled(loop_body(&plain)));
        let test = parse("while (n := n - 1) > 0:\n    pass\n");
        match &test.body[0].kind {
            StmtKind::While { test, .. } => assert!(contains_unmodeled(test)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_possibly_mutated_includes_receivers_and_args() {
        let m = parse("while xs:\n    xs.pop()\n    consume(ys)\n    print(zs)\n");
        let names = possibly_mutated(loop_body(&m));
        assert!(names.contains("xs"));
        assert!(names.contains("ys"));
        assert!(!names.contains("zs"));
    }

    #[test]
    fn test_globals_written_by_calls() {
        let m = parse("def step():\n    global n\n    n -= 1\ndef go():\n    step()\nwhile n > 0:\n    go()\n");
        let defs = function_defs(&m);
        let written = globals_written_by_calls(loop_body(&m), &defs);
        assert!(written.contains("n"));
    }

    #[test]
    fn test_loop_exits() {
        let m = parse("while x:\n    if y:\n        break\n");
        assert!(loop_body_exits(loop_body(&m)));
        let m = parse("while x:\n    for i in r:\n        break\n");
        assert!(!loop_body_exits(loop_body(&m)));
        let m = parse("while x:\n    sys.exit(0)\n");
        assert!(loop_body_exits(loop_body(&m)));
    }

    #[test]
    fn test_continue_detection() {
        let m = parse("while x:\n    if y:\n        continue\n");
        assert!(has_continue(loop_body(&m)));
        let m = parse("while x:\n    for i in r:\n        continue\n");
        assert!(!has_continue(loop_body(&m)));
    }

    #[test]
    fn test_counted_iterables() {
        let m = parse("a = range(10)\nb = range(0, 10, 0)\nc = [1, 2]\nd = range(n)\ne = 'abc'\n");
        let counted: Vec<bool> = m
            .body
            .iter()
            .map(|s| match &s.kind {
                StmtKind::Assign { value, .. } => is_counted_iter(value),
                _ => false,
            })
            .collect();
        assert_eq!(counted, vec![true, false, true, false, true]);
    }

    #[test]
    fn test_fold_truth() {
        let m = parse("a = 1 < 2\nb = not 0\nc = 'x' == 'y'\nd = n < 2\n");
        let values: Vec<Option<bool>> = m
            .body
            .iter()
            .map(|s| match &s.kind {
                StmtKind::Assign { value, .. } => fold_truth(value),
                _ => None,
            })
            .collect();
        assert_eq!(values, vec![Some(true), Some(true), Some(false), None]);
    }

    #[test]
    fn test_local_stmts_skips_nested_defs() {
        let m = parse("x = 1\ndef f():\n    y = 2\nif x:\n    z = 3\n");
        let written = written_names(&m.body);
        assert!(written.contains("x"));
        assert!(written.contains("z"));
        assert!(!written.contains("y"));
    }
}
