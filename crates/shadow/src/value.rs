//! Runtime values of the sandboxed Python subset.
//!
//! Containers share through `Rc<RefCell<..>>` so aliasing behaves like
//! Python's reference semantics. Values never leave the sandbox thread.

use anatomist::ast::{Expr, Param, Stmt};
use anatomist::unparse::format_float;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Nesting beyond which rendering and digesting stop descending.
/// Containers already on the current path are cut off as well.
const MAX_DEPTH: usize = 48;

#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<[Value]>),
    /// Insertion-ordered key/value pairs.
    Dict(Rc<RefCell<Vec<(Value, Value)>>>),
    Set(Rc<RefCell<Vec<Value>>>),
    Range(Range),
    Function(Rc<Function>),
    Builtin(Builtin),
    /// A method bound to its receiver.
    Method(Rc<Value>, Rc<str>),
    Module(Rc<ModuleObj>),
    File(Rc<RefCell<FileHandle>>),
    Exception(Rc<ExceptionValue>),
    ExceptionType(Rc<str>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl Range {
    pub fn len(&self) -> usize {
        let span = if self.step > 0 {
            self.stop.saturating_sub(self.start)
        } else {
            self.start.saturating_sub(self.stop)
        };
        if span <= 0 {
            return 0;
        }
        let step = self.step.unsigned_abs();
        usize::try_from((span.unsigned_abs() + step - 1) / step).unwrap_or(usize::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<i64> {
        if index >= self.len() {
            return None;
        }
        let offset = i64::try_from(index).ok()?.checked_mul(self.step)?;
        self.start.checked_add(offset)
    }

    pub fn contains(&self, value: i64) -> bool {
        let in_bounds = if self.step > 0 {
            self.start <= value && value < self.stop
        } else {
            self.stop < value && value <= self.start
        };
        in_bounds && (value - self.start) % self.step == 0
    }
}

/// A lexical scope: one call's locals, chained to the defining scope.
#[derive(Debug, Default)]
pub struct Scope {
    pub vars: RefCell<BTreeMap<String, Value>>,
    pub parent: Option<Rc<Scope>>,
}

impl Scope {
    pub fn child(parent: Option<Rc<Scope>>) -> Self {
        Self {
            vars: RefCell::new(BTreeMap::new()),
            parent,
        }
    }

    /// Looks `name` up here and in enclosing scopes.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.vars.borrow().get(name) {
            return Some(v.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }

    /// Nearest scope (self included) that binds `name`.
    pub fn owner(self: &Rc<Self>, name: &str) -> Option<Rc<Scope>> {
        if self.vars.borrow().contains_key(name) {
            return Some(Rc::clone(self));
        }
        self.parent.as_ref().and_then(|p| p.owner(name))
    }
}

#[derive(Debug)]
pub enum Body {
    Block(Rc<[Stmt]>),
    Expr(Rc<Expr>),
}

#[derive(Debug)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    /// Evaluated at definition time, aligned with `params`.
    pub defaults: Vec<Option<Value>>,
    pub body: Body,
    /// Scope the function was defined in; `None` at module level.
    pub closure: Option<Rc<Scope>>,
}

#[derive(Debug)]
pub struct ModuleObj {
    pub name: String,
    pub attrs: RefCell<BTreeMap<String, Value>>,
}

impl ModuleObj {
    pub fn new(name: impl Into<String>, attrs: BTreeMap<String, Value>) -> Self {
        Self {
            name: name.into(),
            attrs: RefCell::new(attrs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    Read,
    Write,
    Append,
}

#[derive(Debug)]
pub struct FileHandle {
    pub path: String,
    pub mode: FileMode,
    /// Snapshot taken at open time (read mode only).
    pub content: String,
    pub pos: usize,
    pub closed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionValue {
    pub kind: String,
    pub message: String,
}

impl ExceptionValue {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// Exception classes the sandbox knows, with their parent class.
pub const EXCEPTION_TYPES: &[(&str, &str)] = &[
    ("BaseException", ""),
    ("SystemExit", "BaseException"),
    ("KeyboardInterrupt", "BaseException"),
    ("Exception", "BaseException"),
    ("ArithmeticError", "Exception"),
    ("ZeroDivisionError", "ArithmeticError"),
    ("OverflowError", "ArithmeticError"),
    ("LookupError", "Exception"),
    ("IndexError", "LookupError"),
    ("KeyError", "LookupError"),
    ("ValueError", "Exception"),
    ("TypeError", "Exception"),
    ("NameError", "Exception"),
    ("UnboundLocalError", "NameError"),
    ("AttributeError", "Exception"),
    ("AssertionError", "Exception"),
    ("RuntimeError", "Exception"),
    ("RecursionError", "RuntimeError"),
    ("NotImplementedError", "RuntimeError"),
    ("StopIteration", "Exception"),
    ("EOFError", "Exception"),
    ("ImportError", "Exception"),
    ("ModuleNotFoundError", "ImportError"),
    ("OSError", "Exception"),
    ("IOError", "Exception"),
    ("FileNotFoundError", "OSError"),
    ("IsADirectoryError", "OSError"),
    ("NotADirectoryError", "OSError"),
    ("UnsupportedOperation", "OSError"),
];

pub fn is_exception_type(name: &str) -> bool {
    EXCEPTION_TYPES.iter().any(|(n, _)| *n == name)
}

/// `true` when class `kind` is `ancestor` or derives from it.
pub fn is_subclass(kind: &str, ancestor: &str) -> bool {
    let mut current = kind;
    loop {
        if current == ancestor || (ancestor == "OSError" && current == "IOError") {
            return true;
        }
        match EXCEPTION_TYPES.iter().find(|(n, _)| *n == current) {
            Some((_, parent)) if !parent.is_empty() => current = parent,
            _ => return false,
        }
    }
}

/// Built-in callables: global builtins, sandbox module functions and the
/// analysis entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Print,
    Len,
    Range,
    Int,
    Float,
    Str,
    Bool,
    List,
    Tuple,
    Dict,
    Set,
    Abs,
    Min,
    Max,
    Sum,
    Sorted,
    Reversed,
    Enumerate,
    Zip,
    Map,
    Filter,
    Isinstance,
    Repr,
    Round,
    Divmod,
    Pow,
    Chr,
    Ord,
    Any,
    All,
    Open,
    Getattr,
    Hasattr,
    Import,
    Exit,
    Input,
    OsGetcwd,
    OsListdir,
    OsRemove,
    OsMakedirs,
    PathDirname,
    PathBasename,
    PathJoin,
    PathExists,
    PathIsfile,
    PathIsdir,
    PathAbspath,
    PathSplitext,
    SysExit,
    SysSetrecursionlimit,
    SysGetrecursionlimit,
    MathSqrt,
    MathFloor,
    MathCeil,
    MathGcd,
    MathFactorial,
    MathLog,
    MathLog2,
    MathLog10,
    MathExp,
    MathFabs,
    MathIsqrt,
    TimeTime,
    TimeSleep,
    TimePerfCounter,
    /// The analysis entry point exposed to candidates.
    Analyze,
}

impl Builtin {
    /// Global builtins reachable by bare name.
    pub fn global(name: &str) -> Option<Self> {
        Some(match name {
            "print" => Builtin::Print,
            "len" => Builtin::Len,
            "range" => Builtin::Range,
            "int" => Builtin::Int,
            "float" => Builtin::Float,
            "str" => Builtin::Str,
            "bool" => Builtin::Bool,
            "list" => Builtin::List,
            "tuple" => Builtin::Tuple,
            "dict" => Builtin::Dict,
            "set" => Builtin::Set,
            "abs" => Builtin::Abs,
            "min" => Builtin::Min,
            "max" => Builtin::Max,
            "sum" => Builtin::Sum,
            "sorted" => Builtin::Sorted,
            "reversed" => Builtin::Reversed,
            "enumerate" => Builtin::Enumerate,
            "zip" => Builtin::Zip,
            "map" => Builtin::Map,
            "filter" => Builtin::Filter,
            "isinstance" => Builtin::Isinstance,
            "repr" => Builtin::Repr,
            "round" => Builtin::Round,
            "divmod" => Builtin::Divmod,
            "pow" => Builtin::Pow,
            "chr" => Builtin::Chr,
            "ord" => Builtin::Ord,
            "any" => Builtin::Any,
            "all" => Builtin::All,
            "open" => Builtin::Open,
            "getattr" => Builtin::Getattr,
            "hasattr" => Builtin::Hasattr,
            "__import__" => Builtin::Import,
            "exit" | "quit" => Builtin::Exit,
            "input" => Builtin::Input,
            _ => return None,
        })
    }

    /// Type name for builtins that double as classes (`isinstance(x, int)`).
    pub fn type_name(self) -> Option<&'static str> {
        Some(match self {
            Builtin::Int => "int",
            Builtin::Float => "float",
            Builtin::Str => "str",
            Builtin::Bool => "bool",
            Builtin::List => "list",
            Builtin::Tuple => "tuple",
            Builtin::Dict => "dict",
            Builtin::Set => "set",
            Builtin::Range => "range",
            _ => return None,
        })
    }
}

impl Value {
    pub fn str(text: impl AsRef<str>) -> Self {
        Value::Str(Rc::from(text.as_ref()))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Rc::from(items))
    }

    pub fn dict(pairs: Vec<(Value, Value)>) -> Self {
        Value::Dict(Rc::new(RefCell::new(pairs)))
    }

    pub fn set(items: Vec<Value>) -> Self {
        let mut unique: Vec<Value> = Vec::with_capacity(items.len());
        for item in items {
            if !unique.iter().any(|u| u.py_eq(&item)) {
                unique.push(item);
            }
        }
        Value::Set(Rc::new(RefCell::new(unique)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Set(_) => "set",
            Value::Range(_) => "range",
            Value::Function(_) => "function",
            Value::Builtin(_) => "builtin_function_or_method",
            Value::Method(..) => "method",
            Value::Module(_) => "module",
            Value::File(_) => "TextIOWrapper",
            Value::Exception(_) => "exception",
            Value::ExceptionType(_) => "type",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(v) => *v != 0,
            Value::Float(v) => *v != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) | Value::Set(items) => !items.borrow().is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Dict(pairs) => !pairs.borrow().is_empty(),
            Value::Range(r) => !r.is_empty(),
            _ => true,
        }
    }

    /// Integer view of ints and bools.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Float view of any number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            other => other.as_int().map(|v| v as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_hashable(&self) -> bool {
        match self {
            Value::List(_) | Value::Dict(_) | Value::Set(_) => false,
            Value::Tuple(items) => items.iter().all(Value::is_hashable),
            _ => true,
        }
    }

    /// Python `==`.
    pub fn py_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Float(_), _) | (_, Value::Float(_)) => {
                matches!((self.as_f64(), other.as_f64()), (Some(a), Some(b)) if a == b)
            }
            (a, b) if a.as_int().is_some() && b.as_int().is_some() => a.as_int() == b.as_int(),
            (Value::List(a), Value::List(b)) => {
                Rc::ptr_eq(a, b) || seq_eq(&a.borrow(), &b.borrow())
            }
            (Value::Tuple(a), Value::Tuple(b)) => seq_eq(a, b),
            (Value::Set(a), Value::Set(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().all(|x| b.iter().any(|y| x.py_eq(y)))
            }
            (Value::Dict(a), Value::Dict(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.iter().all(|(k, v)| {
                        b.iter().any(|(k2, v2)| k.py_eq(k2) && v.py_eq(v2))
                    })
            }
            (Value::Range(a), Value::Range(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Module(a), Value::Module(b)) => Rc::ptr_eq(a, b),
            (Value::File(a), Value::File(b)) => Rc::ptr_eq(a, b),
            (Value::Exception(a), Value::Exception(b)) => Rc::ptr_eq(a, b),
            (Value::ExceptionType(a), Value::ExceptionType(b)) => a == b,
            _ => false,
        }
    }

    /// Python `is`.
    pub fn is_same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::List(a), Value::List(b)) | (Value::Set(a), Value::Set(b)) => Rc::ptr_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
            (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b),
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Bool(_), _) | (_, Value::Bool(_)) => false,
            _ => self.py_eq(other),
        }
    }

    /// `str(value)`.
    pub fn to_str(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            Value::Exception(e) => e.message.clone(),
            other => other.repr(),
        }
    }

    /// `repr(value)`.
    pub fn repr(&self) -> String {
        let mut out = String::new();
        self.write_repr(&mut out, &mut Vec::new());
        out
    }

    /// Address of the shared allocation behind containers and functions.
    fn identity(&self) -> Option<usize> {
        match self {
            Value::List(items) | Value::Set(items) => Some(Rc::as_ptr(items) as *const () as usize),
            Value::Dict(pairs) => Some(Rc::as_ptr(pairs) as *const () as usize),
            Value::Function(f) => Some(Rc::as_ptr(f) as *const () as usize),
            Value::Module(m) => Some(Rc::as_ptr(m) as *const () as usize),
            _ => None,
        }
    }

    fn write_repr(&self, out: &mut String, path: &mut Vec<usize>) {
        let id = self.identity();
        if path.len() > MAX_DEPTH || id.is_some_and(|id| path.contains(&id)) {
            out.push_str(match self {
                Value::List(_) => "[...]",
                Value::Dict(_) | Value::Set(_) => "{...}",
                _ => "...",
            });
            return;
        }
        path.extend(id);
        match self {
            Value::None => out.push_str("None"),
            Value::Bool(true) => out.push_str("True"),
            Value::Bool(false) => out.push_str("False"),
            Value::Int(v) => out.push_str(&v.to_string()),
            Value::Float(v) => out.push_str(&format_float(*v)),
            Value::Str(s) => quote(out, s),
            Value::List(items) => {
                out.push('[');
                write_items(out, &items.borrow(), path);
                out.push(']');
            }
            Value::Tuple(items) => {
                out.push('(');
                write_items(out, items, path);
                if items.len() == 1 {
                    out.push(',');
                }
                out.push(')');
            }
            Value::Set(items) => {
                let items = items.borrow();
                if items.is_empty() {
                    out.push_str("set()");
                } else {
                    out.push('{');
                    write_items(out, &items, path);
                    out.push('}');
                }
            }
            Value::Dict(pairs) => {
                out.push('{');
                for (i, (k, v)) in pairs.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    k.write_repr(out, path);
                    out.push_str(": ");
                    v.write_repr(out, path);
                }
                out.push('}');
            }
            Value::Range(r) => {
                if r.step == 1 {
                    out.push_str(&format!("range({}, {})", r.start, r.stop));
                } else {
                    out.push_str(&format!("range({}, {}, {})", r.start, r.stop, r.step));
                }
            }
            Value::Function(f) => out.push_str(&format!("<function {}>", f.name)),
            Value::Builtin(b) => out.push_str(&format!("<built-in function {b:?}>")),
            Value::Method(_, name) => out.push_str(&format!("<bound method {name}>")),
            Value::Module(m) => out.push_str(&format!("<module '{}'>", m.name)),
            Value::File(f) => out.push_str(&format!("<file '{}'>", f.borrow().path)),
            Value::Exception(e) => {
                out.push_str(&e.kind);
                out.push('(');
                if !e.message.is_empty() {
                    quote(out, &e.message);
                }
                out.push(')');
            }
            Value::ExceptionType(name) => out.push_str(&format!("<class '{name}'>")),
        }
        if id.is_some() {
            path.pop();
        }
    }

    /// Feeds a structural digest of this value into `hasher`.
    pub fn digest_into(&self, hasher: &mut blake3::Hasher) {
        self.digest_walk(hasher, &mut Vec::new());
    }

    fn digest_walk(&self, hasher: &mut blake3::Hasher, path: &mut Vec<usize>) {
        let id = self.identity();
        if path.len() > MAX_DEPTH || id.is_some_and(|id| path.contains(&id)) {
            hasher.update(b"~");
            return;
        }
        path.extend(id);
        match self {
            Value::None => {
                hasher.update(&[0]);
            }
            Value::Bool(b) => {
                hasher.update(&[1, u8::from(*b)]);
            }
            Value::Int(v) => {
                hasher.update(&[2]);
                hasher.update(&v.to_le_bytes());
            }
            Value::Float(v) => {
                hasher.update(&[3]);
                hasher.update(&v.to_bits().to_le_bytes());
            }
            Value::Str(s) => digest_str(hasher, 4, s),
            Value::List(items) => digest_seq(hasher, 5, &items.borrow(), path),
            Value::Tuple(items) => digest_seq(hasher, 6, items, path),
            Value::Dict(pairs) => {
                let pairs = pairs.borrow();
                hasher.update(&[7]);
                hasher.update(&pairs.len().to_le_bytes());
                for (k, v) in pairs.iter() {
                    k.digest_walk(hasher, path);
                    v.digest_walk(hasher, path);
                }
            }
            Value::Set(items) => digest_seq(hasher, 8, &items.borrow(), path),
            Value::Range(r) => {
                hasher.update(&[9]);
                for part in [r.start, r.stop, r.step] {
                    hasher.update(&part.to_le_bytes());
                }
            }
            Value::Function(f) => {
                digest_str(hasher, 10, &f.name);
                let mut scope = f.closure.as_deref();
                while let Some(s) = scope {
                    bindings_walk(hasher, &s.vars.borrow(), path);
                    scope = s.parent.as_deref();
                }
            }
            Value::Builtin(b) => digest_str(hasher, 11, &format!("{b:?}")),
            Value::Method(receiver, name) => {
                digest_str(hasher, 12, name);
                receiver.digest_walk(hasher, path);
            }
            Value::Module(m) => {
                digest_str(hasher, 13, &m.name);
                bindings_walk(hasher, &m.attrs.borrow(), path);
            }
            Value::File(f) => {
                let f = f.borrow();
                digest_str(hasher, 14, &f.path);
                hasher.update(&f.pos.to_le_bytes());
                hasher.update(&[u8::from(f.closed)]);
            }
            Value::Exception(e) => {
                digest_str(hasher, 15, &e.kind);
                digest_str(hasher, 15, &e.message);
            }
            Value::ExceptionType(name) => digest_str(hasher, 16, name),
        }
        if id.is_some() {
            path.pop();
        }
    }
}

/// Digests a name → value map in key order.
pub fn digest_bindings(hasher: &mut blake3::Hasher, bindings: &BTreeMap<String, Value>) {
    bindings_walk(hasher, bindings, &mut Vec::new());
}

fn bindings_walk(hasher: &mut blake3::Hasher, bindings: &BTreeMap<String, Value>, path: &mut Vec<usize>) {
    hasher.update(&bindings.len().to_le_bytes());
    for (name, value) in bindings {
        digest_str(hasher, b'=', name);
        value.digest_walk(hasher, path);
    }
}

fn digest_str(hasher: &mut blake3::Hasher, tag: u8, text: &str) {
    hasher.update(&[tag]);
    hasher.update(&text.len().to_le_bytes());
    hasher.update(text.as_bytes());
}

fn digest_seq(hasher: &mut blake3::Hasher, tag: u8, items: &[Value], path: &mut Vec<usize>) {
    hasher.update(&[tag]);
    hasher.update(&items.len().to_le_bytes());
    for item in items {
        item.digest_walk(hasher, path);
    }
}

fn seq_eq(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.py_eq(y))
}

fn write_items(out: &mut String, items: &[Value], path: &mut Vec<usize>) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        item.write_repr(out, path);
    }
}

fn quote(out: &mut String, s: &str) {
    let delim = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    out.push(delim);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c == delim => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(delim);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repr_matches_python() {
        let v = Value::list(vec![
            Value::Int(1),
            Value::str("a'b"),
            Value::tuple(vec![Value::None]),
            Value::Float(2.0),
        ]);
        assert_eq!(v.repr(), "[1, \"a'b\", (None,), 2.0]");
        assert_eq!(Value::set(vec![]).repr(), "set()");
        assert_eq!(Value::Bool(true).to_str(), "True");
    }

    #[test]
    fn test_numeric_equality_crosses_types() {
        assert!(Value::Int(1).py_eq(&Value::Float(1.0)));
        assert!(Value::Bool(true).py_eq(&Value::Int(1)));
        assert!(!Value::str("1").py_eq(&Value::Int(1)));
    }

    #[test]
    fn test_set_deduplicates() {
        let s = Value::set(vec![Value::Int(1), Value::Int(1), Value::Float(1.0), Value::Int(2)]);
        let Value::Set(items) = s else { panic!("not a set") };
        assert_eq!(items.borrow().len(), 2);
    }

    #[test]
    fn test_range_arithmetic() {
        let r = Range { start: 0, stop: 10, step: 3 };
        assert_eq!(r.len(), 4);
        assert_eq!(r.get(3), Some(9));
        assert!(r.contains(6));
        assert!(!r.contains(7));
        let down = Range { start: 5, stop: 0, step: -2 };
        assert_eq!(down.len(), 3);
        assert_eq!(down.get(2), Some(1));
        assert!(Range { start: 3, stop: 3, step: 1 }.is_empty());
    }

    #[test]
    fn test_exception_hierarchy() {
        assert!(is_subclass("ZeroDivisionError", "ArithmeticError"));
        assert!(is_subclass("KeyError", "Exception"));
        assert!(is_subclass("IOError", "OSError"));
        assert!(!is_subclass("SystemExit", "Exception"));
        assert!(is_subclass("SystemExit", "BaseException"));
    }

    #[test]
    fn test_digest_tracks_mutation() {
        let list = Value::list(vec![Value::Int(1)]);
        let digest = |v: &Value| {
            let mut h = blake3::Hasher::new();
            v.digest_into(&mut h);
            *h.finalize().as_bytes()
        };
        let before = digest(&list);
        if let Value::List(items) = &list {
            items.borrow_mut().push(Value::Int(2));
        }
        assert_ne!(before, digest(&list));
    }

    #[test]
    fn test_self_containing_list_is_bounded() {
        let list = Value::list(vec![]);
        if let Value::List(items) = &list {
            items.borrow_mut().push(list.clone());
        }
        assert_eq!(list.repr(), "[[...]]");
        let mut h = blake3::Hasher::new();
        list.digest_into(&mut h);
    }
}
