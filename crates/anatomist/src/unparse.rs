//! Deterministic Python-like serializer for the typed tree.
//!
//! Output is stable for a given tree (four-space indentation, single-quoted
//! strings, compound operands always parenthesized), which is all the
//! content hash needs. It is not guaranteed to be byte-identical to the
//! original source.

use std::fmt::Write;

use crate::ast::*;

/// Serializes a module.
pub fn unparse(module: &Module) -> String {
    let mut out = String::new();
    body(&mut out, &module.body, 0);
    out
}

/// Serializes one expression.
pub fn unparse_expr(expr: &Expr) -> String {
    let mut out = String::new();
    write_expr(&mut out, expr);
    out
}

fn indent(out: &mut String, level: usize) {
    for _ in 0..level {
        out.push_str("    ");
    }
}

fn body(out: &mut String, stmts: &[Stmt], level: usize) {
    if stmts.is_empty() {
        indent(out, level);
        out.push_str("pass\n");
        return;
    }
    for s in stmts {
        stmt(out, s, level);
    }
}

fn else_block(out: &mut String, keyword: &str, stmts: &[Stmt], level: usize) {
    if stmts.is_empty() {
        return;
    }
    indent(out, level);
    out.push_str(keyword);
    out.push_str(":\n");
    body(out, stmts, level + 1);
}

fn stmt(out: &mut String, s: &Stmt, level: usize) {
    indent(out, level);
    match &s.kind {
        StmtKind::Expr(e) => {
            write_expr(out, e);
            out.push('\n');
        }
        StmtKind::Assign { targets, value } => {
            for t in targets {
                write_expr(out, t);
                out.push_str(" = ");
            }
            write_expr(out, value);
            out.push('\n');
        }
        StmtKind::AugAssign { target, op, value } => {
            write_expr(out, target);
            let _ = write!(out, " {}= ", op.symbol());
            write_expr(out, value);
            out.push('\n');
        }
        StmtKind::If { test, body: b, orelse } => {
            out.push_str("if ");
            write_expr(out, test);
            out.push_str(":\n");
            body(out, b, level + 1);
            else_block(out, "else", orelse, level);
        }
        StmtKind::While { test, body: b, orelse } => {
            out.push_str("while ");
            write_expr(out, test);
            out.push_str(":\n");
            body(out, b, level + 1);
            else_block(out, "else", orelse, level);
        }
        StmtKind::For {
            target,
            iter,
            body: b,
            orelse,
        } => {
            out.push_str("for ");
            write_expr(out, target);
            out.push_str(" in ");
            write_expr(out, iter);
            out.push_str(":\n");
            body(out, b, level + 1);
            else_block(out, "else", orelse, level);
        }
        StmtKind::FunctionDef(def) => {
            if def.is_async {
                out.push_str("async ");
            }
            let _ = write!(out, "def {}(", def.name);
            params(out, &def.params);
            out.push_str("):\n");
            body(out, &def.body, level + 1);
        }
        StmtKind::ClassDef(class) => {
            let _ = write!(out, "class {}", class.name);
            if !class.bases.is_empty() {
                out.push('(');
                comma_list(out, &class.bases);
                out.push(')');
            }
            out.push_str(":\n");
            body(out, &class.body, level + 1);
        }
        StmtKind::Return(value) => keyword_value(out, "return", value.as_ref()),
        StmtKind::Raise(value) => keyword_value(out, "raise", value.as_ref()),
        StmtKind::Pass => out.push_str("pass\n"),
        StmtKind::Break => out.push_str("break\n"),
        StmtKind::Continue => out.push_str("continue\n"),
        StmtKind::Import(names) => {
            out.push_str("import ");
            aliases(out, names);
            out.push('\n');
        }
        StmtKind::ImportFrom { module, names } => {
            let _ = write!(out, "from {} import ", module);
            aliases(out, names);
            out.push('\n');
        }
        StmtKind::With { items, body: b } => {
            out.push_str("with ");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_expr(out, &item.context);
                if let Some(t) = &item.target {
                    out.push_str(" as ");
                    write_expr(out, t);
                }
            }
            out.push_str(":\n");
            body(out, b, level + 1);
        }
        StmtKind::Try {
            body: b,
            handlers,
            orelse,
            finalbody,
        } => {
            out.push_str("try:\n");
            body(out, b, level + 1);
            for h in handlers {
                indent(out, level);
                out.push_str("except");
                if let Some(k) = &h.kind {
                    out.push(' ');
                    write_expr(out, k);
                }
                if let Some(n) = &h.name {
                    let _ = write!(out, " as {}", n);
                }
                out.push_str(":\n");
                body(out, &h.body, level + 1);
            }
            else_block(out, "else", orelse, level);
            else_block(out, "finally", finalbody, level);
        }
        StmtKind::Global(names) => {
            let _ = writeln!(out, "global {}", names.join(", "));
        }
        StmtKind::Nonlocal(names) => {
            let _ = writeln!(out, "nonlocal {}", names.join(", "));
        }
        StmtKind::Assert { test, msg } => {
            out.push_str("assert ");
            write_expr(out, test);
            if let Some(m) = msg {
                out.push_str(", ");
                write_expr(out, m);
            }
            out.push('\n');
        }
        StmtKind::Delete(targets) => {
            out.push_str("del ");
            comma_list(out, targets);
            out.push('\n');
        }
        StmtKind::Unsupported(kind) => {
            let _ = writeln!(out, "<{}>", kind);
        }
    }
}

fn keyword_value(out: &mut String, keyword: &str, value: Option<&Expr>) {
    out.push_str(keyword);
    if let Some(v) = value {
        out.push(' ');
        write_expr(out, v);
    }
    out.push('\n');
}

fn aliases(out: &mut String, names: &[Alias]) {
    for (i, a) in names.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&a.name);
        if let Some(asname) = &a.asname {
            let _ = write!(out, " as {}", asname);
        }
    }
}

fn params(out: &mut String, ps: &[Param]) {
    for (i, p) in ps.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        match p.kind {
            ParamKind::Positional => {}
            ParamKind::VarArgs => out.push('*'),
            ParamKind::KwArgs => out.push_str("**"),
        }
        out.push_str(&p.name);
        if let Some(d) = &p.default {
            out.push('=');
            write_expr(out, d);
        }
    }
}

fn comma_list(out: &mut String, items: &[Expr]) {
    for (i, e) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_expr(out, e);
    }
}

fn is_compound(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::BinOp { .. }
            | Expr::UnaryOp { .. }
            | Expr::BoolOp { .. }
            | Expr::Compare { .. }
            | Expr::IfExp { .. }
            | Expr::Lambda { .. }
    )
}

fn operand(out: &mut String, expr: &Expr) {
    if is_compound(expr) {
        out.push('(');
        write_expr(out, expr);
        out.push(')');
    } else {
        write_expr(out, expr);
    }
}

fn write_str_literal(out: &mut String, s: &str) {
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c.is_control() => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('\'');
}

fn write_constant(out: &mut String, c: &Constant) {
    match c {
        Constant::None => out.push_str("None"),
        Constant::Bool(true) => out.push_str("True"),
        Constant::Bool(false) => out.push_str("False"),
        Constant::Int(v) => {
            let _ = write!(out, "{}", v);
        }
        Constant::Float(v) => out.push_str(&format_float(*v)),
        Constant::Str(s) => write_str_literal(out, s),
        Constant::Ellipsis => out.push_str("..."),
    }
}

/// Python-style `repr` of a float (`1.0`, `0.5`, `inf`).
pub fn format_float(v: f64) -> String {
    if v.is_nan() {
        "nan".to_string()
    } else if v.is_infinite() {
        let text = if v > 0.0 { "inf" } else { "-inf" };
        text.to_string()
    } else if v.fract() == 0.0 && v.abs() < 1e16 {
        format!("{:.1}", v)
    } else {
        format!("{}", v)
    }
}

fn write_expr(out: &mut String, expr: &Expr) {
    match expr {
        Expr::Name(id) => out.push_str(id),
        Expr::Constant(c) => write_constant(out, c),
        Expr::FString(parts) => {
            out.push_str("f'");
            for part in parts {
                match part {
                    FStringPart::Literal(s) => {
                        let mut escaped = String::new();
                        write_str_literal(&mut escaped, s);
                        let inner = &escaped[1..escaped.len() - 1];
                        out.push_str(&inner.replace('{', "{{").replace('}', "}}"));
                    }
                    FStringPart::Expr(e) => {
                        out.push('{');
                        write_expr(out, e);
                        out.push('}');
                    }
                }
            }
            out.push('\'');
        }
        Expr::BinOp { left, op, right } => {
            operand(out, left);
            let _ = write!(out, " {} ", op.symbol());
            operand(out, right);
        }
        Expr::UnaryOp { op, operand: inner } => {
            out.push_str(match op {
                UnaryOp::Neg => "-",
                UnaryOp::Pos => "+",
                UnaryOp::Not => "not ",
                UnaryOp::Invert => "~",
            });
            operand(out, inner);
        }
        Expr::BoolOp { op, values } => {
            let sep = match op {
                BoolOp::And => " and ",
                BoolOp::Or => " or ",
            };
            for (i, v) in values.iter().enumerate() {
                if i > 0 {
                    out.push_str(sep);
                }
                operand(out, v);
            }
        }
        Expr::Compare {
            left,
            ops,
            comparators,
        } => {
            operand(out, left);
            for (op, c) in ops.iter().zip(comparators) {
                let _ = write!(out, " {} ", op.symbol());
                operand(out, c);
            }
        }
        Expr::Call {
            func,
            args,
            keywords,
        } => {
            operand(out, func);
            out.push('(');
            comma_list(out, args);
            for (i, k) in keywords.iter().enumerate() {
                if i > 0 || !args.is_empty() {
                    out.push_str(", ");
                }
                match &k.arg {
                    Some(name) => {
                        let _ = write!(out, "{}=", name);
                    }
                    None => out.push_str("**"),
                }
                write_expr(out, &k.value);
            }
            out.push(')');
        }
        Expr::Attribute { value, attr } => {
            operand(out, value);
            let _ = write!(out, ".{}", attr);
        }
        Expr::Subscript { value, index } => {
            operand(out, value);
            out.push('[');
            match index.as_ref() {
                Expr::Tuple(items) if !items.is_empty() => comma_list(out, items),
                other => write_expr(out, other),
            }
            out.push(']');
        }
        Expr::Slice { lower, upper, step } => {
            if let Some(l) = lower {
                write_expr(out, l);
            }
            out.push(':');
            if let Some(u) = upper {
                write_expr(out, u);
            }
            if let Some(s) = step {
                out.push(':');
                write_expr(out, s);
            }
        }
        Expr::List(items) => {
            out.push('[');
            comma_list(out, items);
            out.push(']');
        }
        Expr::Tuple(items) => {
            out.push('(');
            comma_list(out, items);
            if items.len() == 1 {
                out.push(',');
            }
            out.push(')');
        }
        Expr::Set(items) => {
            out.push('{');
            comma_list(out, items);
            out.push('}');
        }
        Expr::Dict(pairs) => {
            out.push('{');
            for (i, (k, v)) in pairs.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_expr(out, k);
                out.push_str(": ");
                write_expr(out, v);
            }
            out.push('}');
        }
        Expr::IfExp { test, body, orelse } => {
            operand(out, body);
            out.push_str(" if ");
            operand(out, test);
            out.push_str(" else ");
            operand(out, orelse);
        }
        Expr::Lambda { params: ps, body } => {
            out.push_str("lambda");
            if !ps.is_empty() {
                out.push(' ');
                params(out, ps);
            }
            out.push_str(": ");
            write_expr(out, body);
        }
        Expr::ListComp { elt, generators } => {
            out.push('[');
            write_expr(out, elt);
            for g in generators {
                out.push_str(" for ");
                write_expr(out, &g.target);
                out.push_str(" in ");
                operand(out, &g.iter);
                for cond in &g.ifs {
                    out.push_str(" if ");
                    operand(out, cond);
                }
            }
            out.push(']');
        }
        Expr::Starred(inner) => {
            out.push('*');
            operand(out, inner);
        }
        Expr::Unsupported(kind) => {
            let _ = write!(out, "<{}>", kind);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ParserHost;

    fn roundtrip(src: &str) -> String {
        unparse(&ParserHost::new().unwrap().parse(src).unwrap())
    }

    #[test]
    fn test_simple_program() {
        let out = roundtrip("x = 0\nwhile x < 10:\n    x = x + 1\n");
        assert_eq!(out, "x = 0\nwhile x < 10:\n    x = x + 1\n");
    }

    #[test]
    fn test_nested_operators_are_parenthesized() {
        let out = roundtrip("y = (a + b) * c\n");
        assert_eq!(out, "y = (a + b) * c\n");
    }

    #[test]
    fn test_function_and_strings() {
        let out = roundtrip("def f(a, b=\"x\"):\n    return a\n");
        assert_eq!(out, "def f(a, b='x'):\n    return a\n");
    }

    #[test]
    fn test_comments_do_not_affect_output() {
        assert_eq!(roundtrip("x = 1  # note\n"), roundtrip("x = 1\n"));
    }

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(0.25), "0.25");
        assert_eq!(format_float(f64::INFINITY), "inf");
    }
}
