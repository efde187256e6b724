//! Scope-aware alpha-renaming.
//!
//! Every scope (module, function, lambda, comprehension) numbers its own
//! bindings in order of first appearance: parameters first, then function,
//! class and variable bindings as they occur in the body. Names in nested
//! scopes carry their depth (`var_2_0`) so an inner binding can never capture
//! an outer one. Methods are ordinary function scopes.
//!
//! Class members (methods, class variables and attributes stored through
//! the receiver) become `attr_N`, numbered program-wide, at their binding and
//! at every `.member` access. This holds only for members reached solely
//! through `self`/`cls` or a class name: a member also read through any
//! other receiver (`handle.read`) keeps its spelling, as do dunder names.
//!
//! Imported names, attributes and builtins are never renamed. Keyword
//! arguments are renamed when the callee resolves to a function defined in
//! the program.

use anatomist::ast::*;
use anatomist::visit::{all_exprs, all_stmts};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BindingKind {
    Function,
    Class,
    Param,
    Var,
}

impl BindingKind {
    fn prefix(self) -> &'static str {
        match self {
            BindingKind::Function => "func",
            BindingKind::Class => "class",
            BindingKind::Param => "arg",
            BindingKind::Var => "var",
        }
    }
}

fn canonical_name(kind: BindingKind, depth: usize, n: usize) -> String {
    if depth == 0 {
        format!("{}_{}", kind.prefix(), n)
    } else {
        format!("{}_{}_{}", kind.prefix(), depth, n)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    Module,
    Function,
    Class,
}

struct Scope {
    kind: ScopeKind,
    depth: usize,
    counter: usize,
    names: HashMap<String, String>,
    /// Parameter renames of functions bound in this scope, by original name.
    signatures: HashMap<String, HashMap<String, String>>,
}

impl Scope {
    fn new(kind: ScopeKind, depth: usize) -> Self {
        Self {
            kind,
            depth,
            counter: 0,
            names: HashMap::new(),
            signatures: HashMap::new(),
        }
    }

    fn bind(&mut self, original: &str, kind: BindingKind) {
        if self.names.contains_key(original) {
            return;
        }
        let renamed = if self.kind == ScopeKind::Class {
            original.to_string()
        } else {
            let name = canonical_name(kind, self.depth, self.counter);
            self.counter += 1;
            name
        };
        self.names.insert(original.to_string(), renamed);
    }
}

// ----------------------------------------------------------------------
// Binding discovery (one scope, not entering nested definitions)
// ----------------------------------------------------------------------

fn target_names<'a>(target: &'a Expr, out: &mut Vec<(&'a str, BindingKind)>) {
    match target {
        Expr::Name(id) => out.push((id, BindingKind::Var)),
        Expr::Tuple(items) | Expr::List(items) => {
            for item in items {
                target_names(item, out);
            }
        }
        Expr::Starred(inner) => target_names(inner, out),
        _ => {}
    }
}

fn bindings<'a>(body: &'a [Stmt], out: &mut Vec<(&'a str, BindingKind)>) {
    for stmt in body {
        match &stmt.kind {
            StmtKind::FunctionDef(def) => out.push((&def.name, BindingKind::Function)),
            StmtKind::ClassDef(class) => out.push((&class.name, BindingKind::Class)),
            StmtKind::Assign { targets, .. } => {
                for t in targets {
                    target_names(t, out);
                }
            }
            StmtKind::AugAssign { target, .. } => target_names(target, out),
            StmtKind::For {
                target,
                body,
                orelse,
                ..
            } => {
                target_names(target, out);
                bindings(body, out);
                bindings(orelse, out);
            }
            StmtKind::If { body, orelse, .. } | StmtKind::While { body, orelse, .. } => {
                bindings(body, out);
                bindings(orelse, out);
            }
            StmtKind::With { items, body } => {
                for item in items {
                    if let Some(t) = &item.target {
                        target_names(t, out);
                    }
                }
                bindings(body, out);
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                bindings(body, out);
                for h in handlers {
                    if let Some(name) = &h.name {
                        out.push((name, BindingKind::Var));
                    }
                    bindings(&h.body, out);
                }
                bindings(orelse, out);
                bindings(finalbody, out);
            }
            _ => {}
        }
    }
}

/// Names that must keep their spelling in this scope: `global`/`nonlocal`
/// declarations and import bindings.
fn pinned_names(body: &[Stmt], out: &mut HashSet<String>) {
    for stmt in body {
        match &stmt.kind {
            StmtKind::Global(names) | StmtKind::Nonlocal(names) => {
                out.extend(names.iter().cloned());
            }
            StmtKind::Import(aliases) | StmtKind::ImportFrom { names: aliases, .. } => {
                out.extend(aliases.iter().map(|a| a.bound_name().to_string()));
            }
            StmtKind::If { body, orelse, .. }
            | StmtKind::While { body, orelse, .. }
            | StmtKind::For { body, orelse, .. } => {
                pinned_names(body, out);
                pinned_names(orelse, out);
            }
            StmtKind::With { body, .. } => pinned_names(body, out),
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                pinned_names(body, out);
                for h in handlers {
                    pinned_names(&h.body, out);
                }
                pinned_names(orelse, out);
                pinned_names(finalbody, out);
            }
            _ => {}
        }
    }
}

fn direct_defs<'a>(body: &'a [Stmt], out: &mut Vec<&'a FunctionDef>) {
    for stmt in body {
        match &stmt.kind {
            StmtKind::FunctionDef(def) => out.push(def),
            StmtKind::If { body, orelse, .. }
            | StmtKind::While { body, orelse, .. }
            | StmtKind::For { body, orelse, .. } => {
                direct_defs(body, out);
                direct_defs(orelse, out);
            }
            StmtKind::With { body, .. } => direct_defs(body, out),
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                direct_defs(body, out);
                for h in handlers {
                    direct_defs(&h.body, out);
                }
                direct_defs(orelse, out);
                direct_defs(finalbody, out);
            }
            _ => {}
        }
    }
}

/// Names declared `global` anywhere below module level, in pre-order.
fn nested_globals(body: &[Stmt]) -> Vec<&str> {
    all_stmts(body)
        .into_iter()
        .filter_map(|s| match &s.kind {
            StmtKind::Global(names) => Some(names),
            _ => None,
        })
        .flatten()
        .map(String::as_str)
        .collect()
}

fn is_dunder(name: &str) -> bool {
    name.len() > 4 && name.starts_with("__") && name.ends_with("__")
}

// ----------------------------------------------------------------------
// Class members
// ----------------------------------------------------------------------

/// Attributes `receiver.<name> = ...` stored anywhere in `body`.
fn stored_attributes<'a>(body: &'a [Stmt], receiver: &str, out: &mut Vec<&'a str>) {
    for stmt in all_stmts(body) {
        let targets: Vec<&Expr> = match &stmt.kind {
            StmtKind::Assign { targets, .. } => targets.iter().collect(),
            StmtKind::AugAssign { target, .. } => vec![target],
            _ => continue,
        };
        for target in targets {
            if let Expr::Attribute { value, attr } = target {
                if value.as_name() == Some(receiver) {
                    out.push(attr);
                }
            }
        }
    }
}

/// Canonical spellings of the program's renamable class members.
fn member_names(module: &Module) -> HashMap<String, String> {
    let mut order: Vec<&str> = Vec::new();
    let mut own: HashSet<&str> = HashSet::new();
    for stmt in all_stmts(&module.body) {
        let StmtKind::ClassDef(class) = &stmt.kind else {
            continue;
        };
        own.insert(&class.name);
        let mut found = Vec::new();
        bindings(&class.body, &mut found);
        order.extend(found.into_iter().map(|(name, _)| name));
        let mut methods = Vec::new();
        direct_defs(&class.body, &mut methods);
        for method in methods {
            if let Some(receiver) = method.params.first() {
                own.insert(&receiver.name);
                stored_attributes(&method.body, &receiver.name, &mut order);
            }
        }
    }

    let foreign: HashSet<&str> = all_exprs(&module.body)
        .into_iter()
        .filter_map(|e| match e {
            Expr::Attribute { value, attr } if !value.as_name().is_some_and(|n| own.contains(n)) => {
                Some(attr.as_str())
            }
            _ => None,
        })
        .collect();

    let mut members = HashMap::new();
    for name in order {
        if is_dunder(name) || foreign.contains(name) || members.contains_key(name) {
            continue;
        }
        let renamed = format!("attr_{}", members.len());
        members.insert(name.to_string(), renamed);
    }
    members
}

fn is_docstring(stmt: &Stmt) -> bool {
    matches!(stmt.kind, StmtKind::Expr(Expr::Constant(Constant::Str(_))))
}

// ----------------------------------------------------------------------
// Rewriter
// ----------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct Renamer {
    scopes: Vec<Scope>,
    members: HashMap<String, String>,
}

impl Renamer {
    pub(crate) fn module(&mut self, module: &Module) -> Module {
        self.members = member_names(module);
        let mut scope = self.open_scope(ScopeKind::Module, &[], &module.body);
        for name in nested_globals(&module.body) {
            scope.bind(name, BindingKind::Var);
        }
        self.scopes.push(scope);
        let body = self.block(&module.body, false);
        self.scopes.pop();
        Module { body }
    }

    fn function_depth(&self) -> usize {
        self.scopes
            .iter()
            .filter(|s| s.kind != ScopeKind::Class)
            .count()
    }

    fn open_scope(&self, kind: ScopeKind, params: &[Param], body: &[Stmt]) -> Scope {
        let depth = match kind {
            ScopeKind::Module => 0,
            ScopeKind::Function | ScopeKind::Class => self.function_depth(),
        };
        let mut scope = Scope::new(kind, depth);
        for p in params {
            scope.bind(&p.name, BindingKind::Param);
        }
        let mut pinned = HashSet::new();
        pinned_names(body, &mut pinned);
        let mut found = Vec::new();
        bindings(body, &mut found);
        for (name, binding) in found {
            if !pinned.contains(name) {
                scope.bind(name, binding);
            }
        }
        if kind == ScopeKind::Class {
            for (original, renamed) in scope.names.iter_mut() {
                if let Some(member) = self.members.get(original) {
                    renamed.clone_from(member);
                }
            }
        } else {
            let inner_depth = depth + 1;
            let mut defs = Vec::new();
            direct_defs(body, &mut defs);
            for def in defs {
                let params = def
                    .params
                    .iter()
                    .enumerate()
                    .map(|(i, p)| (p.name.clone(), canonical_name(BindingKind::Param, inner_depth, i)))
                    .collect();
                scope.signatures.insert(def.name.clone(), params);
            }
        }
        scope
    }

    /// Innermost binding of `name`, skipping class scopes other than the
    /// current one.
    fn lookup(&self, name: &str) -> Option<&Scope> {
        let last = self.scopes.len().checked_sub(1)?;
        self.scopes.iter().enumerate().rev().find_map(|(i, scope)| {
            if scope.kind == ScopeKind::Class && i != last {
                return None;
            }
            scope.names.contains_key(name).then_some(scope)
        })
    }

    fn rename(&self, name: &str) -> String {
        self.lookup(name)
            .and_then(|scope| scope.names.get(name))
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    fn block(&mut self, stmts: &[Stmt], keep_nonempty: bool) -> Vec<Stmt> {
        let mut out: Vec<Stmt> = stmts
            .iter()
            .filter(|s| !is_docstring(s))
            .map(|s| self.stmt(s))
            .collect();
        if keep_nonempty && out.is_empty() {
            let line = stmts.first().map(|s| s.line).unwrap_or(0);
            out.push(Stmt::new(line, StmtKind::Pass));
        }
        out
    }

    fn opt_block(&mut self, stmts: &[Stmt]) -> Vec<Stmt> {
        if stmts.is_empty() {
            Vec::new()
        } else {
            self.block(stmts, true)
        }
    }

    fn params(&mut self, params: &[Param]) -> Vec<Param> {
        params
            .iter()
            .map(|p| Param {
                name: self.rename(&p.name),
                default: None,
                kind: p.kind,
            })
            .collect()
    }

    fn stmt(&mut self, stmt: &Stmt) -> Stmt {
        let kind = match &stmt.kind {
            StmtKind::Expr(e) => StmtKind::Expr(self.expr(e)),
            StmtKind::Assign { targets, value } => StmtKind::Assign {
                targets: targets.iter().map(|t| self.expr(t)).collect(),
                value: self.expr(value),
            },
            StmtKind::AugAssign { target, op, value } => StmtKind::AugAssign {
                target: self.expr(target),
                op: *op,
                value: self.expr(value),
            },
            StmtKind::If { test, body, orelse } => StmtKind::If {
                test: self.expr(test),
                body: self.block(body, true),
                orelse: self.opt_block(orelse),
            },
            StmtKind::While { test, body, orelse } => StmtKind::While {
                test: self.expr(test),
                body: self.block(body, true),
                orelse: self.opt_block(orelse),
            },
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => StmtKind::For {
                target: self.expr(target),
                iter: self.expr(iter),
                body: self.block(body, true),
                orelse: self.opt_block(orelse),
            },
            StmtKind::FunctionDef(def) => StmtKind::FunctionDef(self.function(def)),
            StmtKind::ClassDef(class) => {
                let name = self.rename(&class.name);
                let bases = class.bases.iter().map(|b| self.expr(b)).collect();
                let scope = self.open_scope(ScopeKind::Class, &[], &class.body);
                self.scopes.push(scope);
                let body = self.block(&class.body, true);
                self.scopes.pop();
                StmtKind::ClassDef(ClassDef { name, bases, body })
            }
            StmtKind::Return(v) => StmtKind::Return(v.as_ref().map(|e| self.expr(e))),
            StmtKind::Raise(v) => StmtKind::Raise(v.as_ref().map(|e| self.expr(e))),
            StmtKind::With { items, body } => StmtKind::With {
                items: items
                    .iter()
                    .map(|item| WithItem {
                        context: self.expr(&item.context),
                        target: item.target.as_ref().map(|t| self.expr(t)),
                    })
                    .collect(),
                body: self.block(body, true),
            },
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => StmtKind::Try {
                body: self.block(body, true),
                handlers: handlers
                    .iter()
                    .map(|h| ExceptHandler {
                        line: h.line,
                        kind: h.kind.as_ref().map(|k| self.expr(k)),
                        name: h.name.as_ref().map(|n| self.rename(n)),
                        body: self.block(&h.body, true),
                    })
                    .collect(),
                orelse: self.opt_block(orelse),
                finalbody: self.opt_block(finalbody),
            },
            StmtKind::Global(names) => StmtKind::Global(names.iter().map(|n| self.rename(n)).collect()),
            StmtKind::Nonlocal(names) => {
                StmtKind::Nonlocal(names.iter().map(|n| self.rename(n)).collect())
            }
            StmtKind::Assert { test, msg } => StmtKind::Assert {
                test: self.expr(test),
                msg: msg.as_ref().map(|m| self.expr(m)),
            },
            StmtKind::Delete(targets) => StmtKind::Delete(targets.iter().map(|t| self.expr(t)).collect()),
            other => other.clone(),
        };
        Stmt::new(stmt.line, kind)
    }

    fn function(&mut self, def: &FunctionDef) -> FunctionDef {
        let name = self.rename(&def.name);
        let defaults: Vec<Option<Expr>> = def
            .params
            .iter()
            .map(|p| p.default.as_ref().map(|d| self.expr(d)))
            .collect();
        let scope = self.open_scope(ScopeKind::Function, &def.params, &def.body);
        self.scopes.push(scope);
        let mut params = self.params(&def.params);
        let body = self.block(&def.body, true);
        self.scopes.pop();
        for (param, default) in params.iter_mut().zip(defaults) {
            param.default = default;
        }
        FunctionDef {
            name,
            params,
            body,
            is_async: def.is_async,
        }
    }

    fn keywords(&mut self, func: &Expr, keywords: &[Keyword]) -> Vec<Keyword> {
        let signature = func.as_name().and_then(|name| {
            self.lookup(name)
                .and_then(|scope| scope.signatures.get(name))
                .cloned()
        });
        keywords
            .iter()
            .map(|k| Keyword {
                arg: k.arg.as_ref().map(|arg| {
                    signature
                        .as_ref()
                        .and_then(|sig| sig.get(arg))
                        .cloned()
                        .unwrap_or_else(|| arg.clone())
                }),
                value: self.expr(&k.value),
            })
            .collect()
    }

    fn exprs(&mut self, items: &[Expr]) -> Vec<Expr> {
        items.iter().map(|e| self.expr(e)).collect()
    }

    fn boxed(&mut self, e: &Expr) -> Box<Expr> {
        Box::new(self.expr(e))
    }

    fn expr(&mut self, expr: &Expr) -> Expr {
        match expr {
            Expr::Name(id) => Expr::Name(self.rename(id)),
            Expr::Constant(_) | Expr::Unsupported(_) => expr.clone(),
            Expr::FString(parts) => Expr::FString(
                parts
                    .iter()
                    .map(|p| match p {
                        FStringPart::Literal(s) => FStringPart::Literal(s.clone()),
                        FStringPart::Expr(e) => FStringPart::Expr(self.expr(e)),
                    })
                    .collect(),
            ),
            Expr::BinOp { left, op, right } => Expr::BinOp {
                left: self.boxed(left),
                op: *op,
                right: self.boxed(right),
            },
            Expr::UnaryOp { op, operand } => Expr::UnaryOp {
                op: *op,
                operand: self.boxed(operand),
            },
            Expr::BoolOp { op, values } => Expr::BoolOp {
                op: *op,
                values: self.exprs(values),
            },
            Expr::Compare {
                left,
                ops,
                comparators,
            } => Expr::Compare {
                left: self.boxed(left),
                ops: ops.clone(),
                comparators: self.exprs(comparators),
            },
            Expr::Call {
                func,
                args,
                keywords,
            } => Expr::Call {
                keywords: self.keywords(func, keywords),
                func: self.boxed(func),
                args: self.exprs(args),
            },
            Expr::Attribute { value, attr } => Expr::Attribute {
                value: self.boxed(value),
                attr: self.members.get(attr).unwrap_or(attr).clone(),
            },
            Expr::Subscript { value, index } => Expr::Subscript {
                value: self.boxed(value),
                index: self.boxed(index),
            },
            Expr::Slice { lower, upper, step } => Expr::Slice {
                lower: lower.as_deref().map(|e| self.boxed(e)),
                upper: upper.as_deref().map(|e| self.boxed(e)),
                step: step.as_deref().map(|e| self.boxed(e)),
            },
            Expr::List(items) => Expr::List(self.exprs(items)),
            Expr::Tuple(items) => Expr::Tuple(self.exprs(items)),
            Expr::Set(items) => Expr::Set(self.exprs(items)),
            Expr::Dict(pairs) => Expr::Dict(
                pairs
                    .iter()
                    .map(|(k, v)| (self.expr(k), self.expr(v)))
                    .collect(),
            ),
            Expr::IfExp { test, body, orelse } => Expr::IfExp {
                test: self.boxed(test),
                body: self.boxed(body),
                orelse: self.boxed(orelse),
            },
            Expr::Lambda { params, body } => {
                let defaults: Vec<Option<Expr>> = params
                    .iter()
                    .map(|p| p.default.as_ref().map(|d| self.expr(d)))
                    .collect();
                let scope = self.open_scope(ScopeKind::Function, params, &[]);
                self.scopes.push(scope);
                let mut renamed = self.params(params);
                let body = self.boxed(body);
                self.scopes.pop();
                for (param, default) in renamed.iter_mut().zip(defaults) {
                    param.default = default;
                }
                Expr::Lambda {
                    params: renamed,
                    body,
                }
            }
            Expr::ListComp { elt, generators } => {
                // The first iterable is evaluated in the enclosing scope.
                let first_iter = generators.first().map(|g| self.expr(&g.iter));
                let mut scope = self.open_scope(ScopeKind::Function, &[], &[]);
                let mut found = Vec::new();
                for g in generators {
                    target_names(&g.target, &mut found);
                }
                for (name, kind) in found {
                    scope.bind(name, kind);
                }
                self.scopes.push(scope);
                let mut renamed = Vec::with_capacity(generators.len());
                for (i, g) in generators.iter().enumerate() {
                    let iter = match (i, &first_iter) {
                        (0, Some(it)) => it.clone(),
                        _ => self.expr(&g.iter),
                    };
                    renamed.push(Comprehension {
                        target: self.expr(&g.target),
                        iter,
                        ifs: self.exprs(&g.ifs),
                    });
                }
                let elt = self.boxed(elt);
                self.scopes.pop();
                Expr::ListComp {
                    elt,
                    generators: renamed,
                }
            }
            Expr::Starred(inner) => Expr::Starred(self.boxed(inner)),
        }
    }
}
