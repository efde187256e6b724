//! Ackermann-style double recursion: a two-parameter function with a base
//! case, a branch making one recursive call, and a branch whose recursive
//! call takes another recursive call as an argument.

use super::Heuristic;
use anatomist::ast::{Expr, FunctionDef, Module, ParamKind, StmtKind};
use anatomist::facts::local_stmts;
use anatomist::visit::{all_stmts, expr_nodes};

pub struct AckermannRecursion;

impl Heuristic for AckermannRecursion {
    fn name(&self) -> &'static str {
        "ackermann"
    }

    fn apply(&self, _source: &str, module: &Module) -> Option<String> {
        all_stmts(&module.body)
            .into_iter()
            .any(|s| matches!(&s.kind, StmtKind::FunctionDef(def) if is_ackermann_shape(def)))
            .then(|| "Detected a structure matching the Ackermann function.".to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Branch {
    Base,
    Single,
    Nested,
}

/// `true` for a two-parameter function, selected by conditionals, whose
/// returns include a single recursive call and a recursive call nested
/// inside a recursive call's arguments. Every other return is a base case.
pub fn is_ackermann_shape(def: &FunctionDef) -> bool {
    let positional = def
        .params
        .iter()
        .filter(|p| p.kind == ParamKind::Positional)
        .count();
    if positional != 2 || def.params.len() != 2 {
        return false;
    }
    let stmts = local_stmts(&def.body);
    let conditionals = stmts
        .iter()
        .filter(|s| matches!(s.kind, StmtKind::If { .. }))
        .count();
    if conditionals < 2 {
        return false;
    }
    let branches: Vec<Branch> = stmts
        .iter()
        .filter_map(|s| match &s.kind {
            StmtKind::Return(value) => Some(classify(value.as_ref(), &def.name)),
            _ => None,
        })
        .collect();
    let singles = branches.iter().filter(|b| **b == Branch::Single).count();
    let nested = branches.iter().filter(|b| **b == Branch::Nested).count();
    singles == 1 && nested == 1 && branches.len() >= 3
}

fn classify(value: Option<&Expr>, name: &str) -> Branch {
    let Some(Expr::Call { args, keywords, .. }) = value.filter(|v| v.is_call_to(name)) else {
        return match value {
            Some(v) if calls(v, name) => Branch::Single,
            _ => Branch::Base,
        };
    };
    let nested = args
        .iter()
        .chain(keywords.iter().map(|k| &k.value))
        .any(|a| calls(a, name));
    if nested {
        Branch::Nested
    } else {
        Branch::Single
    }
}

fn calls(expr: &Expr, name: &str) -> bool {
    expr_nodes(expr).into_iter().any(|e| e.is_call_to(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anatomist::Program;

    fn matches(src: &str) -> bool {
        let program = Program::parse(src);
        AckermannRecursion
            .apply(program.source(), program.module().unwrap())
            .is_some()
    }

    const ACKERMANN: &str = "def ackermann(m, n):\n    if m == 0:\n        return n + 1\n    elif m > 0 and n == 0:\n        return ackermann(m - 1, 1)\n    elif m > 0 and n > 0:\n        return ackermann(m - 1, ackermann(m, n - 1))\n\nprint(ackermann(2, 2))\n";

    #[test]
    fn test_classic_ackermann() {
        assert!(matches(ACKERMANN));
    }

    #[test]
    fn test_renamed_ackermann() {
        assert!(matches(&ACKERMANN.replace("ackermann", "a")));
    }

    #[test]
    fn test_guard_clause_form() {
        let src = "def A(m, n):\n    if m == 0:\n        return n + 1\n    if n == 0:\n        return A(m - 1, 1)\n    return A(m - 1, A(m, n - 1))\n";
        assert!(matches(src));
    }

    #[test]
    fn test_trailing_fallback_return() {
        let src = ACKERMANN.replace(
            "\n\nprint(",
            "\n    return None\n\nprint(",
        );
        assert!(matches(&src));
    }

    #[test]
    fn test_single_recursion_is_not_ackermann() {
        let src = "def fact(n, acc):\n    if n == 0:\n        return acc\n    elif n > 0:\n        return fact(n - 1, acc * n)\n    else:\n        return 0\n";
        assert!(!matches(src));
    }

    #[test]
    fn test_three_parameters_is_not_ackermann() {
        let src = ACKERMANN
            .replace("(m, n)", "(m, n, k)")
            .replace("ackermann(2, 2)", "ackermann(2, 2, 0)");
        assert!(!matches(&src));
    }
}
