//! Visitor dispatch over the typed tree.
//!
//! Implementors override `visit_stmt`/`visit_expr` and call the matching
//! `walk_*` function to continue into children. Nested function and class
//! bodies are walked like any other block; visitors that need scope
//! boundaries stop at `StmtKind::FunctionDef` themselves.

use crate::ast::*;

pub trait Visitor<'a> {
    fn visit_stmt(&mut self, stmt: &'a Stmt) {
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &'a Expr) {
        walk_expr(self, expr);
    }
}

pub fn walk_body<'a, V: Visitor<'a> + ?Sized>(visitor: &mut V, body: &'a [Stmt]) {
    for stmt in body {
        visitor.visit_stmt(stmt);
    }
}

pub fn walk_stmt<'a, V: Visitor<'a> + ?Sized>(visitor: &mut V, stmt: &'a Stmt) {
    match &stmt.kind {
        StmtKind::Expr(e) => visitor.visit_expr(e),
        StmtKind::Assign { targets, value } => {
            for t in targets {
                visitor.visit_expr(t);
            }
            visitor.visit_expr(value);
        }
        StmtKind::AugAssign { target, value, .. } => {
            visitor.visit_expr(target);
            visitor.visit_expr(value);
        }
        StmtKind::If { test, body, orelse } | StmtKind::While { test, body, orelse } => {
            visitor.visit_expr(test);
            walk_body(visitor, body);
            walk_body(visitor, orelse);
        }
        StmtKind::For {
            target,
            iter,
            body,
            orelse,
        } => {
            visitor.visit_expr(target);
            visitor.visit_expr(iter);
            walk_body(visitor, body);
            walk_body(visitor, orelse);
        }
        StmtKind::FunctionDef(def) => {
            for p in &def.params {
                if let Some(d) = &p.default {
                    visitor.visit_expr(d);
                }
            }
            walk_body(visitor, &def.body);
        }
        StmtKind::ClassDef(class) => {
            for b in &class.bases {
                visitor.visit_expr(b);
            }
            walk_body(visitor, &class.body);
        }
        StmtKind::Return(value) | StmtKind::Raise(value) => {
            if let Some(v) = value {
                visitor.visit_expr(v);
            }
        }
        StmtKind::With { items, body } => {
            for item in items {
                visitor.visit_expr(&item.context);
                if let Some(t) = &item.target {
                    visitor.visit_expr(t);
                }
            }
            walk_body(visitor, body);
        }
        StmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
        } => {
            walk_body(visitor, body);
            for h in handlers {
                if let Some(k) = &h.kind {
                    visitor.visit_expr(k);
                }
                walk_body(visitor, &h.body);
            }
            walk_body(visitor, orelse);
            walk_body(visitor, finalbody);
        }
        StmtKind::Assert { test, msg } => {
            visitor.visit_expr(test);
            if let Some(m) = msg {
                visitor.visit_expr(m);
            }
        }
        StmtKind::Delete(targets) => {
            for t in targets {
                visitor.visit_expr(t);
            }
        }
        StmtKind::Pass
        | StmtKind::Break
        | StmtKind::Continue
        | StmtKind::Import(_)
        | StmtKind::ImportFrom { .. }
        | StmtKind::Global(_)
        | StmtKind::Nonlocal(_)
        | StmtKind::Unsupported(_) => {}
    }
}

pub fn walk_expr<'a, V: Visitor<'a> + ?Sized>(visitor: &mut V, expr: &'a Expr) {
    match expr {
        Expr::Name(_) | Expr::Constant(_) | Expr::Unsupported(_) => {}
        Expr::FString(parts) => {
            for part in parts {
                if let FStringPart::Expr(e) = part {
                    visitor.visit_expr(e);
                }
            }
        }
        Expr::BinOp { left, right, .. } => {
            visitor.visit_expr(left);
            visitor.visit_expr(right);
        }
        Expr::UnaryOp { operand, .. } => visitor.visit_expr(operand),
        Expr::BoolOp { values, .. } => {
            for v in values {
                visitor.visit_expr(v);
            }
        }
        Expr::Compare {
            left, comparators, ..
        } => {
            visitor.visit_expr(left);
            for c in comparators {
                visitor.visit_expr(c);
            }
        }
        Expr::Call {
            func,
            args,
            keywords,
        } => {
            visitor.visit_expr(func);
            for a in args {
                visitor.visit_expr(a);
            }
            for k in keywords {
                visitor.visit_expr(&k.value);
            }
        }
        Expr::Attribute { value, .. } => visitor.visit_expr(value),
        Expr::Subscript { value, index } => {
            visitor.visit_expr(value);
            visitor.visit_expr(index);
        }
        Expr::Slice { lower, upper, step } => {
            for part in [lower, upper, step].into_iter().flatten() {
                visitor.visit_expr(part);
            }
        }
        Expr::List(items) | Expr::Tuple(items) | Expr::Set(items) => {
            for i in items {
                visitor.visit_expr(i);
            }
        }
        Expr::Dict(pairs) => {
            for (k, v) in pairs {
                visitor.visit_expr(k);
                visitor.visit_expr(v);
            }
        }
        Expr::IfExp { test, body, orelse } => {
            visitor.visit_expr(test);
            visitor.visit_expr(body);
            visitor.visit_expr(orelse);
        }
        Expr::Lambda { params, body } => {
            for p in params {
                if let Some(d) = &p.default {
                    visitor.visit_expr(d);
                }
            }
            visitor.visit_expr(body);
        }
        Expr::ListComp { elt, generators } => {
            for g in generators {
                visitor.visit_expr(&g.iter);
                visitor.visit_expr(&g.target);
                for cond in &g.ifs {
                    visitor.visit_expr(cond);
                }
            }
            visitor.visit_expr(elt);
        }
        Expr::Starred(inner) => visitor.visit_expr(inner),
    }
}

// ----------------------------------------------------------------------
// Closure-driven collectors
// ----------------------------------------------------------------------

struct StmtCollector<'a> {
    out: Vec<&'a Stmt>,
}

impl<'a> Visitor<'a> for StmtCollector<'a> {
    fn visit_stmt(&mut self, stmt: &'a Stmt) {
        self.out.push(stmt);
        walk_stmt(self, stmt);
    }
}

/// Every statement in `body`, nested ones included, in pre-order.
pub fn all_stmts(body: &[Stmt]) -> Vec<&Stmt> {
    let mut collector = StmtCollector { out: Vec::new() };
    walk_body(&mut collector, body);
    collector.out
}

struct ExprCollector<'a> {
    out: Vec<&'a Expr>,
}

impl<'a> Visitor<'a> for ExprCollector<'a> {
    fn visit_expr(&mut self, expr: &'a Expr) {
        self.out.push(expr);
        walk_expr(self, expr);
    }
}

/// Every expression in `body`, nested ones included, in pre-order.
pub fn all_exprs(body: &[Stmt]) -> Vec<&Expr> {
    let mut collector = ExprCollector { out: Vec::new() };
    walk_body(&mut collector, body);
    collector.out
}

/// Every sub-expression of `expr`, itself included.
pub fn expr_nodes(expr: &Expr) -> Vec<&Expr> {
    let mut collector = ExprCollector { out: Vec::new() };
    collector.visit_expr(expr);
    collector.out
}

/// Names read or written anywhere inside `expr`.
pub fn names_in(expr: &Expr) -> Vec<&str> {
    expr_nodes(expr)
        .into_iter()
        .filter_map(Expr::as_name)
        .collect()
}

/// `true` when any loop statement occurs in `body`.
pub fn contains_loop(body: &[Stmt]) -> bool {
    all_stmts(body)
        .iter()
        .any(|s| matches!(s.kind, StmtKind::While { .. } | StmtKind::For { .. }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ParserHost;

    fn parse(src: &str) -> Module {
        ParserHost::new().unwrap().parse(src).unwrap()
    }

    #[test]
    fn test_all_stmts_reaches_nested_bodies() {
        let module = parse("def f():\n    while True:\n        pass\n");
        let kinds = all_stmts(&module.body)
            .iter()
            .filter(|s| matches!(s.kind, StmtKind::While { .. }))
            .count();
        assert_eq!(kinds, 1);
        assert!(contains_loop(&module.body));
    }

    #[test]
    fn test_names_in_expression() {
        let module = parse("y = a + b * c\n");
        match &module.body[0].kind {
            StmtKind::Assign { value, .. } => assert_eq!(names_in(value), vec!["a", "b", "c"]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_all_exprs_counts_calls() {
        let module = parse("print(len(x))\n");
        let calls = all_exprs(&module.body)
            .into_iter()
            .filter(|e| matches!(e, Expr::Call { .. }))
            .count();
        assert_eq!(calls, 2);
    }
}
