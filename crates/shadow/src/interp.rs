//! # Tree-Walking Interpreter
//!
//! Executes a parsed [`Module`] statement by statement, reporting each step
//! to a [`StepHook`]. Faults raised by the candidate travel as
//! [`Interrupt::Exception`] and can be caught by its own `try` blocks; hook
//! aborts and unmodeled constructs unwind the whole run.
//!
//! ## Scoping
//! Module code writes straight into the globals. Each call gets a fresh
//! [`Scope`] chained to the scope its function was defined in, so closures
//! see late-bound enclosing variables. `global`/`nonlocal` declarations are
//! tracked per frame.

use crate::builtins;
use crate::hook::{Abort, Location, StateDigest, StepHook};
use crate::host::{NestedFailure, SandboxHost};
use crate::ops;
use crate::value::{
    digest_bindings, is_exception_type, is_subclass, Body, ExceptionValue, Function, Range,
    Scope, Value,
};
use anatomist::ast::{
    BinOp, BoolOp, Comprehension, ExceptHandler, Expr, FStringPart, Module, ParamKind, Stmt,
    StmtKind,
};
use common::{EntryPoint, TracerLimits};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;
use tracing::trace;

/// Why execution stopped before reaching the end of the module.
#[derive(Debug, Clone)]
pub enum Interrupt {
    /// An exception the candidate raised or triggered.
    Exception(Rc<ExceptionValue>),
    /// The step hook or a nested analysis stopped the run.
    Abort(Abort),
    /// The program uses something the sandbox does not model.
    Unsupported(String),
}

pub type Exec<T> = Result<T, Interrupt>;

pub fn exception(kind: &str, message: impl Into<String>) -> Interrupt {
    Interrupt::Exception(Rc::new(ExceptionValue::new(kind, message)))
}

pub fn raise<T>(kind: &str, message: impl Into<String>) -> Exec<T> {
    Err(exception(kind, message))
}

pub fn unsupported<T>(what: impl Into<String>) -> Exec<T> {
    Err(Interrupt::Unsupported(what.into()))
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// What a `for` loop walks over.
enum IterSource {
    /// A list, read live so appends during iteration are seen.
    Live(Rc<RefCell<Vec<Value>>>),
    Range(Range),
    Items(Vec<Value>),
}

struct Frame {
    function: String,
    /// `None` for module level, where names live in the globals.
    scope: Option<Rc<Scope>>,
    declared_global: HashSet<String>,
    declared_nonlocal: HashSet<String>,
    line: u32,
    /// Calls this frame has made since its current step began. Tells apart
    /// two calls made by one statement, such as `f() + f()`.
    calls_this_step: u32,
    /// Iteration count of each active `for` loop, innermost last.
    loops: Vec<usize>,
    /// Exceptions being handled, for bare `raise`.
    handling: Vec<Rc<ExceptionValue>>,
}

impl Frame {
    fn new(function: impl Into<String>, scope: Option<Rc<Scope>>) -> Self {
        Self {
            function: function.into(),
            scope,
            declared_global: HashSet::new(),
            declared_nonlocal: HashSet::new(),
            line: 0,
            calls_this_step: 0,
            loops: Vec::new(),
            handling: Vec::new(),
        }
    }
}

/// Seconds since the epoch reported by the virtual clock at start.
const CLOCK_EPOCH: f64 = 1_700_000_000.0;
/// Virtual time consumed by each clock read.
const CLOCK_TICK: f64 = 0.001;

pub struct Interpreter<'r> {
    host: &'r mut dyn SandboxHost,
    hook: &'r mut dyn StepHook,
    pub(crate) limits: &'r TracerLimits,
    pub(crate) entry: &'r EntryPoint,
    pub(crate) file_path: String,
    globals: BTreeMap<String, Value>,
    frame: Frame,
    callers: Vec<Frame>,
    modules: HashMap<String, Value>,
    stdout: String,
    /// Virtual seconds elapsed.
    clock: f64,
    /// Bumped on every filesystem mutation, so loops driven by file
    /// contents never look like exact repeats.
    fs_generation: u64,
    steps: usize,
}

impl<'r> Interpreter<'r> {
    pub fn new(
        host: &'r mut dyn SandboxHost,
        hook: &'r mut dyn StepHook,
        limits: &'r TracerLimits,
        entry: &'r EntryPoint,
        file_path: impl Into<String>,
    ) -> Self {
        Self {
            host,
            hook,
            limits,
            entry,
            file_path: file_path.into(),
            globals: BTreeMap::new(),
            frame: Frame::new("<module>", None),
            callers: Vec::new(),
            modules: HashMap::new(),
            stdout: String::new(),
            clock: 0.0,
            fs_generation: 0,
            steps: 0,
        }
    }

    /// Executes `module` to completion.
    ///
    /// # Errors
    /// The [`Interrupt`] that ended the run early.
    pub fn run(&mut self, module: &Module) -> Exec<()> {
        self.globals
            .insert("__file__".to_string(), Value::str(&self.file_path));
        self.globals
            .insert("__name__".to_string(), Value::str("__main__"));
        self.exec_block(&module.body).map(|_| ())
    }

    /// Statements and loop re-tests executed so far.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Everything the candidate printed.
    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    // ------------------------------------------------------------------
    // Hook plumbing
    // ------------------------------------------------------------------

    fn step(&mut self, line: u32) -> Exec<()> {
        self.frame.line = line;
        self.frame.calls_this_step = 0;
        self.steps += 1;
        let location = Location {
            function: self.frame.function.clone(),
            line,
        };
        let digest = self.fingerprint(&location);
        self.hook
            .on_line(&location, digest)
            .map_err(Interrupt::Abort)
    }

    /// Digest of the whole machine state at `location`.
    fn fingerprint(&self, location: &Location) -> StateDigest {
        let mut hasher = blake3::Hasher::new();
        hasher.update(location.function.as_bytes());
        hasher.update(&location.line.to_le_bytes());
        for frame in self.callers.iter().chain(std::iter::once(&self.frame)) {
            hasher.update(b"|");
            hasher.update(frame.function.as_bytes());
            hasher.update(&frame.line.to_le_bytes());
            hasher.update(&frame.calls_this_step.to_le_bytes());
            for position in &frame.loops {
                hasher.update(&position.to_le_bytes());
            }
            let mut scope = frame.scope.as_deref();
            while let Some(s) = scope {
                digest_bindings(&mut hasher, &s.vars.borrow());
                scope = s.parent.as_deref();
            }
        }
        hasher.update(b"|");
        digest_bindings(&mut hasher, &self.globals);
        hasher.update(&self.clock.to_bits().to_le_bytes());
        hasher.update(&self.fs_generation.to_le_bytes());
        StateDigest(*hasher.finalize().as_bytes())
    }

    // ------------------------------------------------------------------
    // Services for builtins
    // ------------------------------------------------------------------

    pub(crate) fn host_fs(&mut self) -> &mut crate::vfs::VirtualFs {
        self.host.fs()
    }

    pub(crate) fn touch_fs(&mut self) {
        self.fs_generation += 1;
    }

    pub(crate) fn write_stdout(&mut self, text: &str) {
        if self.stdout.len() < self.limits.max_collection_len {
            self.stdout.push_str(text);
        }
        for line in text.lines() {
            trace!(output = %line, "candidate output");
        }
    }

    /// Reads the virtual clock; every read advances it by one tick.
    pub(crate) fn read_clock(&mut self, since_epoch: bool) -> f64 {
        let now = self.clock;
        self.clock += CLOCK_TICK;
        if since_epoch {
            CLOCK_EPOCH + now
        } else {
            now
        }
    }

    pub(crate) fn sleep(&mut self, seconds: f64) {
        self.clock += seconds;
    }

    /// Routes a call of the analysis entry point to the host.
    pub(crate) fn analyze_nested(&mut self, source: &str) -> Exec<Value> {
        trace!(bytes = source.len(), "nested analysis requested");
        let answer = self.host.analyze(source);
        self.hook.on_resume().map_err(Interrupt::Abort)?;
        match answer {
            Ok(outcome) => Ok(Value::str(outcome.as_str())),
            Err(NestedFailure::Cycle(path)) => Err(Interrupt::Abort(Abort::NestedCycle(path))),
            Err(NestedFailure::DepthLimit(limit)) => {
                Err(Interrupt::Abort(Abort::NestedLimit(limit)))
            }
            Err(NestedFailure::DeadlineExceeded) => Err(Interrupt::Abort(Abort::Timeout {
                limit_ms: self.limits.max_execution_ms,
            })),
            Err(NestedFailure::Unavailable) => unsupported("nested analysis outside a session"),
        }
    }

    pub(crate) fn check_len(&self, len: usize) -> Exec<()> {
        if len > self.limits.max_collection_len {
            return unsupported(format!(
                "collections longer than {} items",
                self.limits.max_collection_len
            ));
        }
        Ok(())
    }

    /// Loads a sandbox module, caching it like `sys.modules`.
    pub(crate) fn import(&mut self, name: &str) -> Exec<Value> {
        if let Some(module) = self.modules.get(name) {
            return Ok(module.clone());
        }
        let module = if name == self.entry.module {
            builtins::entry_module(self.entry)
        } else {
            match name {
                "os" => {
                    let path = self.import("os.path")?;
                    builtins::os_module(path)
                }
                "os.path" | "posixpath" => builtins::path_module(),
                "sys" => builtins::sys_module(&self.file_path),
                "math" => builtins::math_module(),
                "time" => builtins::time_module(),
                other => return unsupported(format!("import of module '{other}'")),
            }
        };
        self.modules.insert(name.to_string(), module.clone());
        Ok(module)
    }

    // ------------------------------------------------------------------
    // Names
    // ------------------------------------------------------------------

    fn lookup(&self, name: &str) -> Exec<Value> {
        if !self.frame.declared_global.contains(name) {
            if let Some(value) = self.frame.scope.as_ref().and_then(|s| s.lookup(name)) {
                return Ok(value);
            }
        }
        if let Some(value) = self.globals.get(name) {
            return Ok(value.clone());
        }
        if let Some(builtin) = crate::value::Builtin::global(name) {
            return Ok(Value::Builtin(builtin));
        }
        if is_exception_type(name) {
            return Ok(Value::ExceptionType(Rc::from(name)));
        }
        raise("NameError", format!("name '{name}' is not defined"))
    }

    fn store(&mut self, name: &str, value: Value) {
        let Some(scope) = self.frame.scope.as_ref() else {
            self.globals.insert(name.to_string(), value);
            return;
        };
        if self.frame.declared_global.contains(name) {
            self.globals.insert(name.to_string(), value);
            return;
        }
        if self.frame.declared_nonlocal.contains(name) {
            if let Some(owner) = scope.parent.as_ref().and_then(|p| p.owner(name)) {
                owner.vars.borrow_mut().insert(name.to_string(), value);
                return;
            }
        }
        scope.vars.borrow_mut().insert(name.to_string(), value);
    }

    fn delete(&mut self, name: &str) -> Exec<()> {
        let removed = match self.frame.scope.as_ref() {
            Some(scope) if !self.frame.declared_global.contains(name) => {
                scope.vars.borrow_mut().remove(name)
            }
            _ => self.globals.remove(name),
        };
        match removed {
            Some(_) => Ok(()),
            None => raise("NameError", format!("name '{name}' is not defined")),
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn exec_block(&mut self, body: &[Stmt]) -> Exec<Flow> {
        for stmt in body {
            match self.exec_stmt(stmt)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Exec<Flow> {
        self.step(stmt.line)?;
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value)?,
            StmtKind::If { test, body, orelse } => {
                let branch = if self.eval(test)?.truthy() { body } else { orelse };
                return self.exec_block(branch);
            }
            StmtKind::While { test, body, orelse } => loop {
                if !self.eval(test)?.truthy() {
                    return self.exec_block(orelse);
                }
                match self.exec_block(body)? {
                    Flow::Break => return Ok(Flow::Normal),
                    Flow::Return(v) => return Ok(Flow::Return(v)),
                    Flow::Normal | Flow::Continue => {}
                }
                self.step(stmt.line)?;
            },
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                let iterable = self.eval(iter)?;
                let source = self.iteration_source(iterable)?;
                self.frame.loops.push(0);
                let result = self.run_for(stmt.line, target, &source, body, orelse);
                self.frame.loops.pop();
                return result;
            }
            StmtKind::FunctionDef(def) => {
                if def.is_async {
                    return unsupported("async functions");
                }
                let function = self.make_function(
                    def.name.clone(),
                    &def.params,
                    Body::Block(Rc::from(def.body.clone())),
                )?;
                self.store(&def.name, function);
            }
            StmtKind::ClassDef(_) => return unsupported("class definitions"),
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Pass => {}
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Import(aliases) => {
                for alias in aliases {
                    let leaf = self.import(&alias.name)?;
                    match &alias.asname {
                        Some(asname) => self.store(asname, leaf),
                        None => {
                            let top = alias.bound_name().to_string();
                            let module = self.import(&top)?;
                            self.store(&top, module);
                        }
                    }
                }
            }
            StmtKind::ImportFrom { module, names } => self.import_from(module, names)?,
            StmtKind::With { items, body } => {
                let mut opened = Vec::new();
                for item in items {
                    let context = self.eval(&item.context)?;
                    let Value::File(handle) = &context else {
                        return unsupported(format!(
                            "context managers of type '{}'",
                            context.type_name()
                        ));
                    };
                    opened.push(Rc::clone(handle));
                    if let Some(target) = &item.target {
                        self.assign(target, context.clone())?;
                    }
                }
                let result = self.exec_block(body);
                for handle in opened {
                    handle.borrow_mut().closed = true;
                }
                return result;
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => return self.exec_try(body, handlers, orelse, finalbody),
            StmtKind::Raise(None) => {
                return match self.frame.handling.last() {
                    Some(active) => Err(Interrupt::Exception(Rc::clone(active))),
                    None => raise("RuntimeError", "No active exception to reraise"),
                };
            }
            StmtKind::Raise(Some(expr)) => {
                return match self.eval(expr)? {
                    Value::Exception(e) => Err(Interrupt::Exception(e)),
                    Value::ExceptionType(kind) => raise(&kind, ""),
                    _ => raise("TypeError", "exceptions must derive from BaseException"),
                };
            }
            StmtKind::Global(names) => {
                self.frame.declared_global.extend(names.iter().cloned());
            }
            StmtKind::Nonlocal(names) => {
                self.frame.declared_nonlocal.extend(names.iter().cloned());
            }
            StmtKind::Assert { test, msg } => {
                if !self.eval(test)?.truthy() {
                    let message = match msg {
                        Some(m) => self.eval(m)?.to_str(),
                        None => String::new(),
                    };
                    return raise("AssertionError", message);
                }
            }
            StmtKind::Delete(targets) => {
                for target in targets {
                    self.delete_target(target)?;
                }
            }
            StmtKind::Unsupported(kind) => return unsupported(format!("'{kind}' statements")),
        }
        Ok(Flow::Normal)
    }

    fn run_for(
        &mut self,
        line: u32,
        target: &Expr,
        source: &IterSource,
        body: &[Stmt],
        orelse: &[Stmt],
    ) -> Exec<Flow> {
        let mut index = 0;
        loop {
            let item = match source {
                IterSource::Live(items) => items.borrow().get(index).cloned(),
                IterSource::Range(r) => r.get(index).map(Value::Int),
                IterSource::Items(items) => items.get(index).cloned(),
            };
            let Some(item) = item else {
                return self.exec_block(orelse);
            };
            index += 1;
            if let Some(position) = self.frame.loops.last_mut() {
                *position = index;
            }
            if index > 1 {
                self.step(line)?;
            }
            self.assign(target, item)?;
            match self.exec_block(body)? {
                Flow::Break => return Ok(Flow::Normal),
                Flow::Return(v) => return Ok(Flow::Return(v)),
                Flow::Normal | Flow::Continue => {}
            }
        }
    }

    fn iteration_source(&self, iterable: Value) -> Exec<IterSource> {
        Ok(match iterable {
            Value::List(items) => IterSource::Live(items),
            Value::Range(r) => IterSource::Range(r),
            other => IterSource::Items(self.iterate(&other)?),
        })
    }

    fn exec_try(
        &mut self,
        body: &[Stmt],
        handlers: &[ExceptHandler],
        orelse: &[Stmt],
        finalbody: &[Stmt],
    ) -> Exec<Flow> {
        let result = match self.exec_block(body) {
            Err(Interrupt::Exception(exc)) => self.handle(exc, handlers),
            Ok(Flow::Normal) => self.exec_block(orelse),
            other => other,
        };
        if finalbody.is_empty()
            || matches!(result, Err(Interrupt::Abort(_) | Interrupt::Unsupported(_)))
        {
            return result;
        }
        match self.exec_block(finalbody)? {
            Flow::Normal => result,
            overriding => Ok(overriding),
        }
    }

    fn handle(&mut self, exc: Rc<ExceptionValue>, handlers: &[ExceptHandler]) -> Exec<Flow> {
        for handler in handlers {
            if !self.handler_matches(handler, &exc)? {
                continue;
            }
            if let Some(name) = &handler.name {
                self.store(name, Value::Exception(Rc::clone(&exc)));
            }
            self.frame.handling.push(exc);
            let result = self.exec_block(&handler.body);
            self.frame.handling.pop();
            return result;
        }
        Err(Interrupt::Exception(exc))
    }

    fn handler_matches(&mut self, handler: &ExceptHandler, exc: &ExceptionValue) -> Exec<bool> {
        let Some(kind) = &handler.kind else {
            return Ok(true);
        };
        let class = self.eval(kind)?;
        let matches = |c: &Value| matches!(c, Value::ExceptionType(name) if is_subclass(&exc.kind, name));
        Ok(match &class {
            Value::Tuple(classes) => classes.iter().any(matches),
            single => matches(single),
        })
    }

    fn import_from(&mut self, module_name: &str, names: &[anatomist::ast::Alias]) -> Exec<()> {
        let module = self.import(module_name)?;
        for alias in names {
            if alias.name == "*" {
                return unsupported("wildcard imports");
            }
            let value = match self.get_attr(&module, &alias.name) {
                Ok(value) => value,
                Err(Interrupt::Exception(_)) => {
                    return raise(
                        "ImportError",
                        format!("cannot import name '{}' from '{module_name}'", alias.name),
                    )
                }
                Err(other) => return Err(other),
            };
            let bound = alias.asname.as_deref().unwrap_or(&alias.name);
            self.store(bound, value);
        }
        Ok(())
    }

    fn make_function(
        &mut self,
        name: String,
        params: &[anatomist::ast::Param],
        body: Body,
    ) -> Exec<Value> {
        let mut defaults = Vec::with_capacity(params.len());
        for param in params {
            defaults.push(match &param.default {
                Some(expr) => Some(self.eval(expr)?),
                None => None,
            });
        }
        Ok(Value::Function(Rc::new(Function {
            name,
            params: params.to_vec(),
            defaults,
            body,
            closure: self.frame.scope.clone(),
        })))
    }

    // ------------------------------------------------------------------
    // Assignment
    // ------------------------------------------------------------------

    fn assign(&mut self, target: &Expr, value: Value) -> Exec<()> {
        match target {
            Expr::Name(id) => {
                self.store(id, value);
                Ok(())
            }
            Expr::Tuple(elts) | Expr::List(elts) => {
                if elts.iter().any(|e| matches!(e, Expr::Starred(_))) {
                    return unsupported("starred assignment");
                }
                let items = self.iterate(&value)?;
                if items.len() != elts.len() {
                    let message = if items.len() > elts.len() {
                        format!("too many values to unpack (expected {})", elts.len())
                    } else {
                        format!(
                            "not enough values to unpack (expected {}, got {})",
                            elts.len(),
                            items.len()
                        )
                    };
                    return raise("ValueError", message);
                }
                for (elt, item) in elts.iter().zip(items) {
                    self.assign(elt, item)?;
                }
                Ok(())
            }
            Expr::Subscript { value: container, index } => {
                if matches!(index.as_ref(), Expr::Slice { .. }) {
                    return unsupported("slice assignment");
                }
                let container = self.eval(container)?;
                let key = self.eval(index)?;
                set_item(&container, key, value)
            }
            Expr::Attribute { value: object, attr } => match self.eval(object)? {
                Value::Module(m) => {
                    m.attrs.borrow_mut().insert(attr.clone(), value);
                    Ok(())
                }
                other => unsupported(format!(
                    "attribute assignment on '{}' objects",
                    other.type_name()
                )),
            },
            _ => unsupported("this assignment target"),
        }
    }

    fn aug_assign(&mut self, target: &Expr, op: BinOp, value: &Expr) -> Exec<()> {
        let current = self.eval(target)?;
        let rhs = self.eval(value)?;
        let updated = match (&current, op) {
            (Value::List(items), BinOp::Add) => {
                let extra = self.iterate(&rhs)?;
                items.borrow_mut().extend(extra);
                current.clone()
            }
            _ => ops::binary(op, &current, &rhs, self.limits.max_collection_len)?,
        };
        self.assign(target, updated)
    }

    fn delete_target(&mut self, target: &Expr) -> Exec<()> {
        match target {
            Expr::Name(id) => self.delete(id),
            Expr::Subscript { value, index } => {
                let container = self.eval(value)?;
                let key = self.eval(index)?;
                match &container {
                    Value::List(items) => {
                        let i = key.as_int().unwrap_or(i64::MAX);
                        let mut items = items.borrow_mut();
                        match ops::normalize_index(i, items.len()) {
                            Some(i) => {
                                items.remove(i);
                                Ok(())
                            }
                            None => raise("IndexError", "list assignment index out of range"),
                        }
                    }
                    Value::Dict(pairs) => {
                        let mut pairs = pairs.borrow_mut();
                        match pairs.iter().position(|(k, _)| k.py_eq(&key)) {
                            Some(i) => {
                                pairs.remove(i);
                                Ok(())
                            }
                            None => raise("KeyError", key.repr()),
                        }
                    }
                    other => raise(
                        "TypeError",
                        format!("'{}' object doesn't support item deletion", other.type_name()),
                    ),
                }
            }
            Expr::Tuple(elts) | Expr::List(elts) => {
                for elt in elts {
                    self.delete_target(elt)?;
                }
                Ok(())
            }
            _ => unsupported("this deletion target"),
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    pub(crate) fn eval(&mut self, expr: &Expr) -> Exec<Value> {
        match expr {
            Expr::Name(id) => self.lookup(id),
            Expr::Constant(c) => Ok(match c {
                anatomist::ast::Constant::None => Value::None,
                anatomist::ast::Constant::Bool(b) => Value::Bool(*b),
                anatomist::ast::Constant::Int(v) => Value::Int(*v),
                anatomist::ast::Constant::Float(v) => Value::Float(*v),
                anatomist::ast::Constant::Str(s) => Value::str(s),
                anatomist::ast::Constant::Ellipsis => return unsupported("Ellipsis"),
            }),
            Expr::FString(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FStringPart::Literal(text) => out.push_str(text),
                        FStringPart::Expr(e) => out.push_str(&self.eval(e)?.to_str()),
                    }
                }
                Ok(Value::str(out))
            }
            Expr::BinOp { left, op, right } => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                ops::binary(*op, &l, &r, self.limits.max_collection_len)
            }
            Expr::UnaryOp { op, operand } => {
                let v = self.eval(operand)?;
                ops::unary(*op, &v)
            }
            Expr::BoolOp { op, values } => {
                let mut last = Value::Bool(*op == BoolOp::And);
                for value in values {
                    last = self.eval(value)?;
                    if last.truthy() == (*op == BoolOp::Or) {
                        return Ok(last);
                    }
                }
                Ok(last)
            }
            Expr::Compare {
                left,
                ops: cmp_ops,
                comparators,
            } => {
                let mut lhs = self.eval(left)?;
                for (op, comparator) in cmp_ops.iter().zip(comparators) {
                    let rhs = self.eval(comparator)?;
                    if !ops::compare(*op, &lhs, &rhs)? {
                        return Ok(Value::Bool(false));
                    }
                    lhs = rhs;
                }
                Ok(Value::Bool(true))
            }
            Expr::Call {
                func,
                args,
                keywords,
            } => {
                let callee = self.eval(func)?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    match arg {
                        Expr::Starred(inner) => {
                            let spread = self.eval(inner)?;
                            values.extend(self.iterate(&spread)?);
                        }
                        other => values.push(self.eval(other)?),
                    }
                }
                let mut named = Vec::new();
                for keyword in keywords {
                    let value = self.eval(&keyword.value)?;
                    match &keyword.arg {
                        Some(name) => named.push((name.clone(), value)),
                        None => named.extend(keyword_splat(&value)?),
                    }
                }
                self.call_value(callee, values, named)
            }
            Expr::Attribute { value, attr } => {
                let object = self.eval(value)?;
                self.get_attr(&object, attr)
            }
            Expr::Subscript { value, index } => {
                let object = self.eval(value)?;
                if let Expr::Slice { lower, upper, step } = index.as_ref() {
                    let lower = self.slice_bound(lower.as_deref())?;
                    let upper = self.slice_bound(upper.as_deref())?;
                    let step = self.slice_bound(step.as_deref())?;
                    return ops::slice(&object, lower, upper, step);
                }
                let key = self.eval(index)?;
                ops::index(&object, &key)
            }
            Expr::Slice { .. } => unsupported("slice objects"),
            Expr::List(elts) => {
                let items = self.eval_items(elts)?;
                Ok(Value::list(items))
            }
            Expr::Tuple(elts) => {
                let items = self.eval_items(elts)?;
                Ok(Value::tuple(items))
            }
            Expr::Set(elts) => {
                let items = self.eval_items(elts)?;
                if let Some(bad) = items.iter().find(|v| !v.is_hashable()) {
                    return raise("TypeError", format!("unhashable type: '{}'", bad.type_name()));
                }
                Ok(Value::set(items))
            }
            Expr::Dict(pairs) => {
                let out = Value::dict(Vec::with_capacity(pairs.len()));
                for (k, v) in pairs {
                    let key = self.eval(k)?;
                    let value = self.eval(v)?;
                    set_item(&out, key, value)?;
                }
                self.check_len(pairs.len())?;
                Ok(out)
            }
            Expr::IfExp { test, body, orelse } => {
                if self.eval(test)?.truthy() {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
            Expr::Lambda { params, body } => self.make_function(
                "<lambda>".to_string(),
                params,
                Body::Expr(Rc::new(body.as_ref().clone())),
            ),
            Expr::ListComp { elt, generators } => self.comprehension(elt, generators),
            Expr::Starred(_) => unsupported("starred expressions here"),
            Expr::Unsupported(kind) => unsupported(format!("'{kind}' expressions")),
        }
    }

    fn eval_items(&mut self, elts: &[Expr]) -> Exec<Vec<Value>> {
        let mut items = Vec::with_capacity(elts.len());
        for elt in elts {
            match elt {
                Expr::Starred(inner) => {
                    let spread = self.eval(inner)?;
                    items.extend(self.iterate(&spread)?);
                }
                other => items.push(self.eval(other)?),
            }
        }
        self.check_len(items.len())?;
        Ok(items)
    }

    fn slice_bound(&mut self, bound: Option<&Expr>) -> Exec<Option<i64>> {
        let Some(expr) = bound else {
            return Ok(None);
        };
        match self.eval(expr)? {
            Value::None => Ok(None),
            v => match v.as_int() {
                Some(i) => Ok(Some(i)),
                None => raise("TypeError", "slice indices must be integers or None"),
            },
        }
    }

    /// Evaluates a comprehension in its own scope layered over the current one.
    fn comprehension(&mut self, elt: &Expr, generators: &[Comprehension]) -> Exec<Value> {
        let outer = self.frame.scope.clone();
        self.frame.scope = Some(Rc::new(Scope::child(outer.clone())));
        let mut out = Vec::new();
        let result = self.comprehension_level(elt, generators, &mut out);
        self.frame.scope = outer;
        result.map(|()| Value::list(out))
    }

    fn comprehension_level(
        &mut self,
        elt: &Expr,
        generators: &[Comprehension],
        out: &mut Vec<Value>,
    ) -> Exec<()> {
        let Some((generator, rest)) = generators.split_first() else {
            out.push(self.eval(elt)?);
            return self.check_len(out.len());
        };
        let iterable = self.eval(&generator.iter)?;
        'items: for item in self.iterate(&iterable)? {
            self.assign(&generator.target, item)?;
            for condition in &generator.ifs {
                if !self.eval(condition)?.truthy() {
                    continue 'items;
                }
            }
            self.comprehension_level(elt, rest, out)?;
        }
        Ok(())
    }

    /// Materializes any iterable value.
    pub(crate) fn iterate(&self, value: &Value) -> Exec<Vec<Value>> {
        match value {
            Value::List(items) | Value::Set(items) => Ok(items.borrow().clone()),
            Value::Tuple(items) => Ok(items.to_vec()),
            Value::Str(s) => Ok(s.chars().map(|c| Value::str(c.to_string())).collect()),
            Value::Dict(pairs) => Ok(pairs.borrow().iter().map(|(k, _)| k.clone()).collect()),
            Value::Range(r) => {
                self.check_len(r.len())?;
                Ok((0..r.len()).filter_map(|i| r.get(i)).map(Value::Int).collect())
            }
            Value::File(handle) => {
                let handle = handle.borrow();
                let rest = handle.content.get(handle.pos..).unwrap_or_default();
                Ok(rest.split_inclusive('\n').map(Value::str).collect())
            }
            other => raise(
                "TypeError",
                format!("'{}' object is not iterable", other.type_name()),
            ),
        }
    }

    pub(crate) fn get_attr(&mut self, object: &Value, attr: &str) -> Exec<Value> {
        match object {
            Value::Module(m) => match m.attrs.borrow().get(attr) {
                Some(value) => Ok(value.clone()),
                None => raise(
                    "AttributeError",
                    format!("module '{}' has no attribute '{attr}'", m.name),
                ),
            },
            Value::Exception(e) if attr == "args" => Ok(Value::tuple(vec![Value::str(&e.message)])),
            Value::ExceptionType(name) if attr == "__name__" => Ok(Value::str(&**name)),
            Value::Function(f) if attr == "__name__" => Ok(Value::str(&f.name)),
            _ if builtins::has_method(object, attr) => {
                Ok(Value::Method(Rc::new(object.clone()), Rc::from(attr)))
            }
            _ => raise(
                "AttributeError",
                format!("'{}' object has no attribute '{attr}'", object.type_name()),
            ),
        }
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    pub(crate) fn call_value(
        &mut self,
        callee: Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Exec<Value> {
        match callee {
            Value::Function(f) => self.call_function(&f, args, kwargs),
            Value::Builtin(b) => builtins::call_builtin(self, b, args, kwargs),
            Value::Method(receiver, name) => {
                builtins::call_method(self, &receiver, &name, args, kwargs)
            }
            Value::ExceptionType(kind) => {
                let message = match args.as_slice() {
                    [] => String::new(),
                    [one] => one.to_str(),
                    many => Value::tuple(many.to_vec()).repr(),
                };
                Ok(Value::Exception(Rc::new(ExceptionValue::new(&*kind, message))))
            }
            other => raise(
                "TypeError",
                format!("'{}' object is not callable", other.type_name()),
            ),
        }
    }

    fn call_function(
        &mut self,
        f: &Rc<Function>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Exec<Value> {
        let scope = Rc::new(Scope::child(f.closure.clone()));
        bind_params(f, &scope, args, kwargs)?;
        self.hook.on_call(&f.name).map_err(Interrupt::Abort)?;

        self.frame.calls_this_step += 1;
        let caller = std::mem::replace(&mut self.frame, Frame::new(f.name.clone(), Some(scope)));
        self.callers.push(caller);
        let result = match &f.body {
            Body::Block(stmts) => {
                let stmts = Rc::clone(stmts);
                self.exec_block(&stmts).map(|flow| match flow {
                    Flow::Return(v) => v,
                    _ => Value::None,
                })
            }
            Body::Expr(expr) => {
                let expr = Rc::clone(expr);
                self.eval(&expr)
            }
        };
        if let Some(caller) = self.callers.pop() {
            self.frame = caller;
        }
        self.hook.on_return(&f.name);
        result
    }
}

fn bind_params(
    f: &Function,
    scope: &Scope,
    args: Vec<Value>,
    mut kwargs: Vec<(String, Value)>,
) -> Exec<()> {
    let mut positional = args.into_iter();
    let mut vars = scope.vars.borrow_mut();
    for (param, default) in f.params.iter().zip(&f.defaults) {
        let value = match param.kind {
            ParamKind::Positional => {
                let keyword = kwargs.iter().position(|(k, _)| *k == param.name);
                match (positional.next(), keyword) {
                    (Some(_), Some(_)) => {
                        return raise(
                            "TypeError",
                            format!(
                                "{}() got multiple values for argument '{}'",
                                f.name, param.name
                            ),
                        )
                    }
                    (Some(v), None) => v,
                    (None, Some(i)) => kwargs.remove(i).1,
                    (None, None) => match default {
                        Some(d) => d.clone(),
                        None => {
                            return raise(
                                "TypeError",
                                format!(
                                    "{}() missing required argument: '{}'",
                                    f.name, param.name
                                ),
                            )
                        }
                    },
                }
            }
            ParamKind::VarArgs => Value::tuple(positional.by_ref().collect()),
            ParamKind::KwArgs => Value::dict(
                std::mem::take(&mut kwargs)
                    .into_iter()
                    .map(|(k, v)| (Value::str(k), v))
                    .collect(),
            ),
        };
        vars.insert(param.name.clone(), value);
    }
    if positional.next().is_some() {
        return raise(
            "TypeError",
            format!("{}() takes {} positional arguments but more were given", f.name, f.params.len()),
        );
    }
    if let Some((name, _)) = kwargs.first() {
        return raise(
            "TypeError",
            format!("{}() got an unexpected keyword argument '{name}'", f.name),
        );
    }
    Ok(())
}

fn keyword_splat(value: &Value) -> Exec<Vec<(String, Value)>> {
    let Value::Dict(pairs) = value else {
        return raise("TypeError", "argument after ** must be a mapping");
    };
    pairs
        .borrow()
        .iter()
        .map(|(k, v)| match k {
            Value::Str(s) => Ok((s.to_string(), v.clone())),
            _ => raise("TypeError", "keywords must be strings"),
        })
        .collect()
}

/// `container[key] = value`.
pub(crate) fn set_item(container: &Value, key: Value, value: Value) -> Exec<()> {
    match container {
        Value::List(items) => {
            let Some(i) = key.as_int() else {
                return raise(
                    "TypeError",
                    format!("list indices must be integers or slices, not {}", key.type_name()),
                );
            };
            let mut items = items.borrow_mut();
            match ops::normalize_index(i, items.len()) {
                Some(i) => {
                    items[i] = value;
                    Ok(())
                }
                None => raise("IndexError", "list assignment index out of range"),
            }
        }
        Value::Dict(pairs) => {
            if !key.is_hashable() {
                return raise("TypeError", format!("unhashable type: '{}'", key.type_name()));
            }
            let mut pairs = pairs.borrow_mut();
            match pairs.iter_mut().find(|(k, _)| k.py_eq(&key)) {
                Some(slot) => slot.1 = value,
                None => pairs.push((key, value)),
            }
            Ok(())
        }
        other => raise(
            "TypeError",
            format!("'{}' object does not support item assignment", other.type_name()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::IsolatedHost;
    use crate::vfs::VirtualFs;
    use anatomist::Program;

    /// Counts steps and stops runaway tests.
    #[derive(Default)]
    struct CountingHook {
        lines: usize,
    }

    impl StepHook for CountingHook {
        fn on_call(&mut self, _function: &str) -> Result<(), Abort> {
            Ok(())
        }

        fn on_return(&mut self, _function: &str) {}

        fn on_line(&mut self, _location: &Location, _digest: StateDigest) -> Result<(), Abort> {
            self.lines += 1;
            if self.lines > 100_000 {
                return Err(Abort::TraceExceeded { limit: 100_000 });
            }
            Ok(())
        }
    }

    struct Run {
        result: Exec<()>,
        stdout: String,
        fs: VirtualFs,
    }

    fn run(src: &str) -> Run {
        let program = Program::parse(src);
        let module = program.module().unwrap();
        let mut host = IsolatedHost::default();
        let mut hook = CountingHook::default();
        let limits = TracerLimits::default();
        let entry = EntryPoint::default();
        let (result, stdout) = {
            let mut interp =
                Interpreter::new(&mut host, &mut hook, &limits, &entry, "/sandbox/candidate.py");
            let result = interp.run(module);
            (result, interp.stdout().to_string())
        };
        Run {
            result,
            stdout,
            fs: host.fs,
        }
    }

    fn output(src: &str) -> String {
        let run = run(src);
        if let Err(err) = &run.result {
            panic!("run failed: {err:?}");
        }
        run.stdout
    }

    fn raised(src: &str) -> String {
        match run(src).result {
            Err(Interrupt::Exception(e)) => e.kind.clone(),
            other => panic!("expected an exception, got {other:?}"),
        }
    }

    #[test]
    fn test_arithmetic_and_fstrings() {
        let out = output("x = 7\ny = x // 2\nprint(f'{x} {y} {x / 2} {x % 3}')\n");
        assert_eq!(out, "7 3 3.5 1\n");
    }

    #[test]
    fn test_closures_and_nonlocal() {
        let src = "def make():\n    n = 0\n    def inc():\n        nonlocal n\n        n += 1\n        return n\n    return inc\nf = make()\nf()\nprint(f())\n";
        assert_eq!(output(src), "2\n");
    }

    #[test]
    fn test_global_declaration() {
        let src = "count = 0\ndef bump():\n    global count\n    count += 1\nbump()\nbump()\nprint(count)\n";
        assert_eq!(output(src), "2\n");
    }

    #[test]
    fn test_loops_with_else_and_break() {
        let src = "for i in range(3):\n    pass\nelse:\n    print('done', i)\nwhile True:\n    break\nelse:\n    print('unreachable')\n";
        assert_eq!(output(src), "done 2\n");
    }

    #[test]
    fn test_list_aliasing() {
        let src = "a = [1]\nb = a\nb.append(2)\nb += [3]\nprint(a, len(a))\n";
        assert_eq!(output(src), "[1, 2, 3] 3\n");
    }

    #[test]
    fn test_try_except_finally() {
        let src = "try:\n    1 / 0\nexcept ZeroDivisionError as e:\n    print('caught', e)\nfinally:\n    print('cleanup')\n";
        assert_eq!(output(src), "caught division by zero\ncleanup\n");
    }

    #[test]
    fn test_uncaught_exception_surfaces() {
        assert_eq!(raised("d = {}\nd['missing']\n"), "KeyError");
        assert_eq!(raised("raise ValueError('bad')\n"), "ValueError");
        assert_eq!(raised("undefined_name\n"), "NameError");
    }

    #[test]
    fn test_except_clause_respects_hierarchy() {
        let src = "try:\n    [][1]\nexcept LookupError:\n    print('lookup')\n";
        assert_eq!(output(src), "lookup\n");
        assert_eq!(raised("try:\n    [][1]\nexcept KeyError:\n    pass\n"), "IndexError");
    }

    #[test]
    fn test_comprehension_and_lambda() {
        let src = "sq = [x * x for x in range(5) if x % 2 == 0]\nf = lambda a, b=1: a + b\nprint(sq, f(1), f(1, b=5))\n";
        assert_eq!(output(src), "[0, 4, 16] 2 6\n");
    }

    #[test]
    fn test_recursion() {
        let src = "def fact(n):\n    return 1 if n <= 1 else n * fact(n - 1)\nprint(fact(10))\n";
        assert_eq!(output(src), "3628800\n");
    }

    #[test]
    fn test_file_round_trip_through_vfs() {
        let src = "import os\np = os.path.join(os.path.dirname(__file__), 'b.py')\nwith open(p, 'w') as f:\n    f.write('print(1)\\n')\nprint(open(p).read().strip())\n";
        let run = run(src);
        assert!(run.result.is_ok(), "{:?}", run.result);
        assert_eq!(run.stdout, "print(1)\n");
        assert_eq!(run.fs.read("/sandbox/b.py").unwrap(), "print(1)\n");
    }

    #[test]
    fn test_reading_own_source() {
        let src = "text = open(__file__).read()\n";
        assert_eq!(raised(src), "FileNotFoundError");
    }

    #[test]
    fn test_repeated_calls_in_one_statement_have_distinct_states() {
        let mut digests = Vec::new();
        struct Collect<'d>(&'d mut Vec<StateDigest>);
        impl StepHook for Collect<'_> {
            fn on_call(&mut self, _function: &str) -> Result<(), Abort> {
                Ok(())
            }
            fn on_return(&mut self, _function: &str) {}
            fn on_line(&mut self, _location: &Location, digest: StateDigest) -> Result<(), Abort> {
                self.0.push(digest);
                Ok(())
            }
        }
        let program = Program::parse("def g():\n    return 1\nx = g() + g()\n");
        let mut host = IsolatedHost::default();
        let mut hook = Collect(&mut digests);
        let limits = TracerLimits::default();
        let entry = EntryPoint::default();
        let mut interp = Interpreter::new(&mut host, &mut hook, &limits, &entry, "/sandbox/c.py");
        assert!(interp.run(program.module().unwrap()).is_ok());
        drop(interp);
        let unique: HashSet<_> = digests.iter().collect();
        assert_eq!(unique.len(), digests.len());
    }

    #[test]
    fn test_class_is_unsupported() {
        let result = run("class A:\n    pass\n").result;
        assert!(matches!(result, Err(Interrupt::Unsupported(_))));
    }

    #[test]
    fn test_unknown_module_is_unsupported() {
        let result = run("import socket\n").result;
        assert!(matches!(result, Err(Interrupt::Unsupported(_))));
    }

    #[test]
    fn test_entry_point_without_session_is_unsupported() {
        let src = "from main import analyze_halting\nanalyze_halting('x = 1')\n";
        assert!(matches!(run(src).result, Err(Interrupt::Unsupported(_))));
    }

    #[test]
    fn test_dynamic_import_and_getattr() {
        let src = "m = __import__('math')\nf = getattr(m, ''.join(['s', 'q', 'r', 't']))\nprint(f(16))\n";
        assert_eq!(output(src), "4.0\n");
    }

    #[test]
    fn test_tuple_unpacking_errors() {
        assert_eq!(raised("a, b = [1, 2, 3]\n"), "ValueError");
        assert_eq!(output("a, (b, c) = 1, (2, 3)\nprint(a + b + c)\n"), "6\n");
    }

    #[test]
    fn test_sys_exit_raises_system_exit() {
        assert_eq!(raised("import sys\nsys.exit(0)\n"), "SystemExit");
    }
}
