//! Collatz-style iteration: `while n != 1`, halve when even, `3n + 1` when
//! odd. Whether this terminates for every start value is an open problem.

use super::Heuristic;
use anatomist::ast::{BinOp, CmpOp, Expr, Module, Stmt, StmtKind};
use anatomist::facts::local_stmts;
use anatomist::visit::all_stmts;

pub struct CollatzIteration;

impl Heuristic for CollatzIteration {
    fn name(&self) -> &'static str {
        "collatz"
    }

    fn apply(&self, _source: &str, module: &Module) -> Option<String> {
        all_stmts(&module.body)
            .into_iter()
            .any(is_collatz_loop)
            .then(|| "Detected a structure matching the Collatz conjecture.".to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Parity {
    Even,
    Odd,
}

/// `true` for a `while` loop with the Collatz guard and update rule.
pub fn is_collatz_loop(stmt: &Stmt) -> bool {
    let StmtKind::While { test, body, .. } = &stmt.kind else {
        return false;
    };
    let Some(var) = guard_variable(test) else {
        return false;
    };
    body.iter().any(|s| match &s.kind {
        StmtKind::If { test, body, orelse } => match parity_test(test, var) {
            Some(Parity::Even) => halves(body, var) && triples(orelse, var),
            Some(Parity::Odd) => triples(body, var) && halves(orelse, var),
            None => false,
        },
        StmtKind::Assign { targets, value } if targets.len() == 1 && targets[0].as_name() == Some(var) => {
            match value {
                Expr::IfExp { test, body, orelse } => match parity_test(test, var) {
                    Some(Parity::Even) => is_half(body, var) && is_triple_plus_one(orelse, var),
                    Some(Parity::Odd) => is_triple_plus_one(body, var) && is_half(orelse, var),
                    None => false,
                },
                _ => false,
            }
        }
        _ => false,
    })
}

/// `n != 1`, `1 != n`, `n > 1` or `1 < n`.
fn guard_variable(test: &Expr) -> Option<&str> {
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
    let (name, op) = match (left.as_name(), right.as_int()) {
        (Some(name), Some(1)) => (name, *op),
        _ => match (left.as_int(), right.as_name()) {
            (Some(1), Some(name)) => (name, op.flipped()),
            _ => return None,
        },
    };
    matches!(op, CmpOp::NotEq | CmpOp::Gt).then_some(name)
}

fn is_mod_two(expr: &Expr, var: &str) -> bool {
    matches!(expr, Expr::BinOp { left, op: BinOp::Mod, right }
        if left.as_name() == Some(var) && right.as_int() == Some(2))
}

/// `n % 2 == 0` style tests.
fn parity_test(test: &Expr, var: &str) -> Option<Parity> {
    if is_mod_two(test, var) {
        return Some(Parity::Odd);
    }
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
    if !is_mod_two(left, var) {
        return None;
    }
    match (op, right.as_int()?) {
        (CmpOp::Eq, 0) | (CmpOp::NotEq, 1) => Some(Parity::Even),
        (CmpOp::Eq, 1) | (CmpOp::NotEq, 0) => Some(Parity::Odd),
        _ => None,
    }
}

/// `n // 2`, `n / 2`, `n >> 1`, optionally wrapped in `int(..)`.
fn is_half(expr: &Expr, var: &str) -> bool {
    match expr {
        Expr::BinOp { left, op, right } if left.as_name() == Some(var) => match op {
            BinOp::FloorDiv | BinOp::Div => right.as_int() == Some(2),
            BinOp::RShift => right.as_int() == Some(1),
            _ => false,
        },
        Expr::Call { args, .. } if expr.is_call_to("int") && args.len() == 1 => is_half(&args[0], var),
        _ => false,
    }
}

fn is_triple(expr: &Expr, var: &str) -> bool {
    matches!(expr, Expr::BinOp { left, op: BinOp::Mult, right }
        if (left.as_int() == Some(3) && right.as_name() == Some(var))
            || (left.as_name() == Some(var) && right.as_int() == Some(3)))
}

/// `3 * n + 1` in any operand order.
fn is_triple_plus_one(expr: &Expr, var: &str) -> bool {
    matches!(expr, Expr::BinOp { left, op: BinOp::Add, right }
        if (is_triple(left, var) && right.as_int() == Some(1))
            || (left.as_int() == Some(1) && is_triple(right, var)))
}

fn assigns<'a>(body: &'a [Stmt], var: &'a str) -> impl Iterator<Item = &'a Stmt> + 'a {
    local_stmts(body).into_iter().filter(move |s| match &s.kind {
        StmtKind::Assign { targets, .. } => targets.iter().any(|t| t.as_name() == Some(var)),
        StmtKind::AugAssign { target, .. } => target.as_name() == Some(var),
        _ => false,
    })
}

fn halves(body: &[Stmt], var: &str) -> bool {
    assigns(body, var).any(|s| match &s.kind {
        StmtKind::Assign { value, .. } => is_half(value, var),
        StmtKind::AugAssign { op, value, .. } => match op {
            BinOp::FloorDiv | BinOp::Div => value.as_int() == Some(2),
            BinOp::RShift => value.as_int() == Some(1),
            _ => false,
        },
        _ => false,
    })
}

fn triples(body: &[Stmt], var: &str) -> bool {
    assigns(body, var).any(|s| matches!(&s.kind, StmtKind::Assign { value, .. } if is_triple_plus_one(value, var)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anatomist::Program;

    fn matches(src: &str) -> bool {
        let program = Program::parse(src);
        CollatzIteration
            .apply(program.source(), program.module().unwrap())
            .is_some()
    }

    #[test]
    fn test_classic_collatz() {
        let src = "def collatz(n):\n    while n != 1:\n        if n % 2 == 0:\n            n = n // 2\n        else:\n            n = 3 * n + 1\n    return n\n\ncollatz(27)\n";
        assert!(matches(src));
    }

    #[test]
    fn test_start_value_irrelevant() {
        let src = "n = 97\nwhile n != 1:\n    if n % 2 == 0:\n        n = n // 2\n    else:\n        n = 3 * n + 1\n";
        assert!(matches(src));
        assert!(matches(&src.replace("97", "6171")));
    }

    #[test]
    fn test_odd_first_and_augmented_halving() {
        let src = "while 1 != k:\n    if k % 2 == 1:\n        k = k * 3 + 1\n    else:\n        k //= 2\n";
        assert!(matches(src));
    }

    #[test]
    fn test_conditional_expression_form() {
        let src = "while n > 1:\n    n = n // 2 if n % 2 == 0 else 3 * n + 1\n";
        assert!(matches(src));
    }

    #[test]
    fn test_plain_countdown_is_not_collatz() {
        assert!(!matches("while n != 1:\n    n = n - 1\n"));
    }

    #[test]
    fn test_wrong_update_is_not_collatz() {
        let src = "while n != 1:\n    if n % 2 == 0:\n        n = n // 2\n    else:\n        n = n - 1\n";
        assert!(!matches(src));
    }
}
