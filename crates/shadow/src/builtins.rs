//! # Builtins
//!
//! Global builtins, methods of the built-in value kinds, and the modules a
//! candidate may import (`os`, `os.path`, `sys`, `math`, `time` and the
//! analysis entry module). File operations go through the host's
//! [`VirtualFs`](crate::vfs::VirtualFs); the clock is virtual.

use crate::interp::{raise, unsupported, Exec, Interpreter, Interrupt};
use crate::ops;
use crate::value::{
    is_subclass, Builtin, FileHandle, FileMode, ModuleObj, Range, Value,
};
use crate::vfs::{self, ShadowError, VirtualFs, SANDBOX_ROOT};
use anatomist::ast::BinOp;
use common::EntryPoint;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::rc::Rc;

type Kwargs = Vec<(String, Value)>;

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> Exec<()> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            format!("exactly {min}")
        } else if args.len() < min {
            format!("at least {min}")
        } else {
            format!("at most {max}")
        };
        return raise(
            "TypeError",
            format!(
                "{name}() takes {expected} argument{} ({} given)",
                if expected.ends_with('1') { "" } else { "s" },
                args.len()
            ),
        );
    }
    Ok(())
}

fn no_kwargs(name: &str, kwargs: &Kwargs) -> Exec<()> {
    match kwargs.first() {
        Some((key, _)) => raise(
            "TypeError",
            format!("{name}() got an unexpected keyword argument '{key}'"),
        ),
        None => Ok(()),
    }
}

fn take_kwarg(kwargs: &mut Kwargs, key: &str) -> Option<Value> {
    let at = kwargs.iter().position(|(k, _)| k == key)?;
    Some(kwargs.remove(at).1)
}

fn int_arg(name: &str, v: &Value) -> Exec<i64> {
    match v.as_int() {
        Some(i) => Ok(i),
        None => raise(
            "TypeError",
            format!(
                "{name}() argument must be an integer, not '{}'",
                v.type_name()
            ),
        ),
    }
}

fn float_arg(name: &str, v: &Value) -> Exec<f64> {
    match v.as_f64() {
        Some(f) => Ok(f),
        None => raise(
            "TypeError",
            format!("{name}() argument must be a number, not '{}'", v.type_name()),
        ),
    }
}

fn str_arg<'v>(name: &str, v: &'v Value) -> Exec<&'v str> {
    match v.as_str() {
        Some(s) => Ok(s),
        None => raise(
            "TypeError",
            format!("{name}() argument must be str, not '{}'", v.type_name()),
        ),
    }
}

fn optional_str(name: &str, args: &[Value], at: usize, default: &str) -> Exec<String> {
    match args.get(at) {
        Some(v) => Ok(str_arg(name, v)?.to_string()),
        None => Ok(default.to_string()),
    }
}

fn fs_error(err: ShadowError) -> Interrupt {
    let (kind, errno, path) = match &err {
        ShadowError::NotFound(p) => ("FileNotFoundError", 2, p),
        ShadowError::IsADirectory(p) => ("IsADirectoryError", 21, p),
        ShadowError::NotADirectory(p) => ("NotADirectoryError", 20, p),
    };
    crate::interp::exception(
        kind,
        format!(
            "[Errno {errno}] {}: '{path}'",
            err.to_string().split(':').next().unwrap_or_default()
        ),
    )
}

fn float_to_int(f: f64) -> Exec<i64> {
    if f.is_nan() {
        return raise("ValueError", "cannot convert float NaN to integer");
    }
    if f.is_infinite() {
        return raise("OverflowError", "cannot convert float infinity to integer");
    }
    let truncated = f.trunc();
    if truncated < i64::MIN as f64 || truncated >= i64::MAX as f64 {
        return unsupported("integers wider than 64 bits");
    }
    Ok(truncated as i64)
}

fn math_domain<T>() -> Exec<T> {
    raise("ValueError", "math domain error")
}

/// Sorts by Python ordering, stable, optionally through a key function.
pub(crate) fn sort_values(
    interp: &mut Interpreter<'_>,
    items: Vec<Value>,
    key: Option<Value>,
    reverse: bool,
) -> Exec<Vec<Value>> {
    let mut keyed = Vec::with_capacity(items.len());
    for item in items {
        let k = match &key {
            Some(Value::None) | None => item.clone(),
            Some(f) => interp.call_value(f.clone(), vec![item.clone()], Vec::new())?,
        };
        keyed.push((k, item));
    }
    let mut failure = None;
    keyed.sort_by(|(a, _), (b, _)| {
        let ordering = match ops::order(a, b) {
            Ok(Some(o)) => o,
            Ok(None) => Ordering::Equal,
            Err(e) => {
                failure.get_or_insert(e);
                Ordering::Equal
            }
        };
        if reverse {
            ordering.reverse()
        } else {
            ordering
        }
    });
    if let Some(err) = failure {
        return Err(err);
    }
    Ok(keyed.into_iter().map(|(_, v)| v).collect())
}

fn extreme(
    interp: &mut Interpreter<'_>,
    name: &str,
    args: Vec<Value>,
    mut kwargs: Kwargs,
    wanted: Ordering,
) -> Exec<Value> {
    let key = take_kwarg(&mut kwargs, "key");
    let default = take_kwarg(&mut kwargs, "default");
    no_kwargs(name, &kwargs)?;
    let candidates = match args.as_slice() {
        [] => return arity(name, &args, 1, usize::MAX).map(|()| Value::None),
        [single] => interp.iterate(single)?,
        _ => args,
    };
    let mut best: Option<(Value, Value)> = None;
    for item in candidates {
        let k = match &key {
            Some(f) if !matches!(f, Value::None) => {
                interp.call_value(f.clone(), vec![item.clone()], Vec::new())?
            }
            _ => item.clone(),
        };
        let replace = match &best {
            None => true,
            Some((best_key, _)) => ops::order(&k, best_key)? == Some(wanted),
        };
        if replace {
            best = Some((k, item));
        }
    }
    match (best, default) {
        (Some((_, item)), _) => Ok(item),
        (None, Some(default)) => Ok(default),
        (None, None) => raise("ValueError", format!("{name}() arg is an empty sequence")),
    }
}

fn isinstance(value: &Value, class: &Value) -> Exec<bool> {
    match class {
        Value::Tuple(classes) => {
            for c in classes.iter() {
                if isinstance(value, c)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::Builtin(b) => match b.type_name() {
            Some("int") => Ok(matches!(value, Value::Int(_) | Value::Bool(_))),
            Some(name) => Ok(value.type_name() == name),
            None => raise("TypeError", "isinstance() arg 2 must be a type or tuple of types"),
        },
        Value::ExceptionType(kind) => Ok(matches!(value, Value::Exception(e) if is_subclass(&e.kind, kind))),
        _ => raise("TypeError", "isinstance() arg 2 must be a type or tuple of types"),
    }
}

fn parse_int(text: &str, base: u32) -> Exec<i64> {
    let cleaned: String = text.trim().chars().filter(|c| *c != '_').collect();
    let (negative, digits) = match cleaned.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, cleaned.strip_prefix('+').unwrap_or(&cleaned)),
    };
    match i64::from_str_radix(digits, base) {
        Ok(v) if !digits.is_empty() && !digits.starts_with(['+', '-']) => {
            Ok(if negative { -v } else { v })
        }
        _ => raise(
            "ValueError",
            format!("invalid literal for int() with base {base}: '{text}'"),
        ),
    }
}

fn parse_float(text: &str) -> Exec<f64> {
    let trimmed = text.trim();
    let parsed = match trimmed.to_ascii_lowercase().as_str() {
        "inf" | "+inf" | "infinity" => Some(f64::INFINITY),
        "-inf" | "-infinity" => Some(f64::NEG_INFINITY),
        "nan" | "+nan" | "-nan" => Some(f64::NAN),
        _ => trimmed.parse::<f64>().ok(),
    };
    match parsed {
        Some(f) => Ok(f),
        None => raise(
            "ValueError",
            format!("could not convert string to float: '{text}'"),
        ),
    }
}

fn round_half_even(x: f64, digits: i64) -> f64 {
    let Ok(exp) = i32::try_from(digits) else {
        return x;
    };
    let scale = 10f64.powi(exp);
    (x * scale).round_ties_even() / scale
}

fn int_pow(base: i64, exp: i64) -> Exec<Value> {
    if exp < 0 {
        return Ok(Value::Float((base as f64).powf(exp as f64)));
    }
    let exp = u32::try_from(exp).map_err(|_| Interrupt::Unsupported("integers wider than 64 bits".into()))?;
    match base.checked_pow(exp) {
        Some(v) => Ok(Value::Int(v)),
        None => unsupported("integers wider than 64 bits"),
    }
}

fn mod_pow(mut base: i64, mut exp: i64, modulus: i64) -> Exec<Value> {
    if modulus == 0 {
        return raise("ValueError", "pow() 3rd argument cannot be 0");
    }
    if exp < 0 {
        return unsupported("modular inverses");
    }
    let m = i128::from(modulus);
    let mut result: i128 = 1;
    let mut b = i128::from(base).rem_euclid(m);
    while exp > 0 {
        if exp & 1 == 1 {
            result = (result * b).rem_euclid(m);
        }
        b = (b * b).rem_euclid(m);
        exp >>= 1;
    }
    base = i64::try_from(result).unwrap_or_default();
    if modulus < 0 && base != 0 {
        base += modulus;
    }
    Ok(Value::Int(base))
}

fn exit_with(args: &[Value]) -> Exec<Value> {
    let message = match args.first() {
        None | Some(Value::None) => String::new(),
        Some(code) => code.to_str(),
    };
    raise("SystemExit", message)
}

/// Calls builtin `b`.
pub fn call_builtin(
    interp: &mut Interpreter<'_>,
    b: Builtin,
    args: Vec<Value>,
    mut kwargs: Kwargs,
) -> Exec<Value> {
    use Builtin as B;
    match b {
        B::Print => {
            let sep = match take_kwarg(&mut kwargs, "sep") {
                Some(Value::None) | None => " ".to_string(),
                Some(v) => v.to_str(),
            };
            let end = match take_kwarg(&mut kwargs, "end") {
                Some(Value::None) | None => "\n".to_string(),
                Some(v) => v.to_str(),
            };
            take_kwarg(&mut kwargs, "flush");
            take_kwarg(&mut kwargs, "file");
            no_kwargs("print", &kwargs)?;
            let line = args.iter().map(Value::to_str).collect::<Vec<_>>().join(&sep);
            interp.write_stdout(&format!("{line}{end}"));
            Ok(Value::None)
        }
        B::Len => {
            arity("len", &args, 1, 1)?;
            let n = match &args[0] {
                Value::Str(s) => s.chars().count(),
                Value::List(items) | Value::Set(items) => items.borrow().len(),
                Value::Tuple(items) => items.len(),
                Value::Dict(pairs) => pairs.borrow().len(),
                Value::Range(r) => r.len(),
                other => {
                    return raise(
                        "TypeError",
                        format!("object of type '{}' has no len()", other.type_name()),
                    )
                }
            };
            Ok(Value::Int(i64::try_from(n).unwrap_or(i64::MAX)))
        }
        B::Range => {
            no_kwargs("range", &kwargs)?;
            arity("range", &args, 1, 3)?;
            let ints = args
                .iter()
                .map(|a| int_arg("range", a))
                .collect::<Exec<Vec<_>>>()?;
            let (start, stop, step) = match ints.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => (0, 0, 1),
            };
            if step == 0 {
                return raise("ValueError", "range() arg 3 must not be zero");
            }
            Ok(Value::Range(Range { start, stop, step }))
        }
        B::Int => {
            arity("int", &args, 0, 2)?;
            let base = match args.get(1).or(kwargs.first().map(|(_, v)| v)) {
                Some(v) => Some(int_arg("int", v)?),
                None => None,
            };
            match (args.first(), base) {
                (None, _) => Ok(Value::Int(0)),
                (Some(Value::Str(s)), base) => {
                    let base = u32::try_from(base.unwrap_or(10)).unwrap_or(10).clamp(2, 36);
                    parse_int(s, base).map(Value::Int)
                }
                (Some(_), Some(_)) => raise("TypeError", "int() can't convert non-string with explicit base"),
                (Some(Value::Float(f)), None) => float_to_int(*f).map(Value::Int),
                (Some(v), None) => match v.as_int() {
                    Some(i) => Ok(Value::Int(i)),
                    None => raise(
                        "TypeError",
                        format!(
                            "int() argument must be a string or a number, not '{}'",
                            v.type_name()
                        ),
                    ),
                },
            }
        }
        B::Float => {
            arity("float", &args, 0, 1)?;
            match args.first() {
                None => Ok(Value::Float(0.0)),
                Some(Value::Str(s)) => parse_float(s).map(Value::Float),
                Some(v) => float_arg("float", v).map(Value::Float),
            }
        }
        B::Str => {
            arity("str", &args, 0, 1)?;
            Ok(Value::str(args.first().map(Value::to_str).unwrap_or_default()))
        }
        B::Bool => {
            arity("bool", &args, 0, 1)?;
            Ok(Value::Bool(args.first().is_some_and(Value::truthy)))
        }
        B::List | B::Tuple | B::Set => {
            let name = b.type_name().unwrap_or("list");
            arity(name, &args, 0, 1)?;
            let items = match args.first() {
                Some(v) => interp.iterate(v)?,
                None => Vec::new(),
            };
            interp.check_len(items.len())?;
            Ok(match b {
                B::List => Value::list(items),
                B::Tuple => Value::tuple(items),
                _ => {
                    if let Some(bad) = items.iter().find(|v| !v.is_hashable()) {
                        return raise("TypeError", format!("unhashable type: '{}'", bad.type_name()));
                    }
                    Value::set(items)
                }
            })
        }
        B::Dict => {
            arity("dict", &args, 0, 1)?;
            let out = Value::dict(Vec::new());
            if let Some(source) = args.first() {
                update_dict(interp, &out, source)?;
            }
            for (k, v) in kwargs {
                crate::interp::set_item(&out, Value::str(k), v)?;
            }
            Ok(out)
        }
        B::Abs => {
            arity("abs", &args, 1, 1)?;
            match &args[0] {
                Value::Float(f) => Ok(Value::Float(f.abs())),
                v => match v.as_int() {
                    Some(i) => i.checked_abs().map(Value::Int).ok_or_else(|| {
                        Interrupt::Unsupported("integers wider than 64 bits".into())
                    }),
                    None => raise(
                        "TypeError",
                        format!("bad operand type for abs(): '{}'", v.type_name()),
                    ),
                },
            }
        }
        B::Min => extreme(interp, "min", args, kwargs, Ordering::Less),
        B::Max => extreme(interp, "max", args, kwargs, Ordering::Greater),
        B::Sum => {
            arity("sum", &args, 1, 2)?;
            let mut total = args.get(1).cloned().or_else(|| take_kwarg(&mut kwargs, "start")).unwrap_or(Value::Int(0));
            for item in interp.iterate(&args[0])? {
                total = ops::binary(BinOp::Add, &total, &item, interp.limits.max_collection_len)?;
            }
            Ok(total)
        }
        B::Sorted => {
            arity("sorted", &args, 1, 1)?;
            let key = take_kwarg(&mut kwargs, "key");
            let reverse = take_kwarg(&mut kwargs, "reverse").is_some_and(|v| v.truthy());
            no_kwargs("sorted", &kwargs)?;
            let items = interp.iterate(&args[0])?;
            sort_values(interp, items, key, reverse).map(Value::list)
        }
        B::Reversed => {
            arity("reversed", &args, 1, 1)?;
            let mut items = interp.iterate(&args[0])?;
            items.reverse();
            Ok(Value::list(items))
        }
        B::Enumerate => {
            arity("enumerate", &args, 1, 2)?;
            let start = match args.get(1).cloned().or_else(|| take_kwarg(&mut kwargs, "start")) {
                Some(v) => int_arg("enumerate", &v)?,
                None => 0,
            };
            let items = interp.iterate(&args[0])?;
            Ok(Value::list(
                items
                    .into_iter()
                    .zip(start..)
                    .map(|(v, i)| Value::tuple(vec![Value::Int(i), v]))
                    .collect(),
            ))
        }
        B::Zip => {
            let columns = args
                .iter()
                .map(|a| interp.iterate(a))
                .collect::<Exec<Vec<_>>>()?;
            let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
            Ok(Value::list(
                (0..rows)
                    .map(|i| Value::tuple(columns.iter().map(|c| c[i].clone()).collect()))
                    .collect(),
            ))
        }
        B::Map => {
            arity("map", &args, 2, usize::MAX)?;
            let mut args = args.into_iter();
            let function = args.next().unwrap_or(Value::None);
            let columns = args.map(|a| interp.iterate(&a)).collect::<Exec<Vec<_>>>()?;
            let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
            let mut out = Vec::with_capacity(rows);
            for i in 0..rows {
                let call_args = columns.iter().map(|c| c[i].clone()).collect();
                out.push(interp.call_value(function.clone(), call_args, Vec::new())?);
            }
            Ok(Value::list(out))
        }
        B::Filter => {
            arity("filter", &args, 2, 2)?;
            let mut out = Vec::new();
            for item in interp.iterate(&args[1])? {
                let keep = match &args[0] {
                    Value::None => item.truthy(),
                    f => interp.call_value(f.clone(), vec![item.clone()], Vec::new())?.truthy(),
                };
                if keep {
                    out.push(item);
                }
            }
            Ok(Value::list(out))
        }
        B::Isinstance => {
            arity("isinstance", &args, 2, 2)?;
            isinstance(&args[0], &args[1]).map(Value::Bool)
        }
        B::Repr => {
            arity("repr", &args, 1, 1)?;
            Ok(Value::str(args[0].repr()))
        }
        B::Round => {
            arity("round", &args, 1, 2)?;
            let digits = match args.get(1).cloned().or_else(|| take_kwarg(&mut kwargs, "ndigits")) {
                Some(Value::None) | None => None,
                Some(v) => Some(int_arg("round", &v)?),
            };
            match (&args[0], digits) {
                (Value::Float(f), None) => float_to_int(f.round_ties_even()).map(Value::Int),
                (Value::Float(f), Some(d)) => Ok(Value::Float(round_half_even(*f, d))),
                (v, _) => int_arg("round", v).map(Value::Int),
            }
        }
        B::Divmod => {
            arity("divmod", &args, 2, 2)?;
            let max = interp.limits.max_collection_len;
            let q = ops::binary(BinOp::FloorDiv, &args[0], &args[1], max)?;
            let r = ops::binary(BinOp::Mod, &args[0], &args[1], max)?;
            Ok(Value::tuple(vec![q, r]))
        }
        B::Pow => {
            arity("pow", &args, 2, 3)?;
            match (args[0].as_int(), args[1].as_int(), args.get(2)) {
                (Some(base), Some(exp), Some(m)) => mod_pow(base, exp, int_arg("pow", m)?),
                (Some(base), Some(exp), None) => int_pow(base, exp),
                _ => ops::binary(BinOp::Pow, &args[0], &args[1], interp.limits.max_collection_len),
            }
        }
        B::Chr => {
            arity("chr", &args, 1, 1)?;
            let code = int_arg("chr", &args[0])?;
            match u32::try_from(code).ok().and_then(char::from_u32) {
                Some(c) => Ok(Value::str(c.to_string())),
                None => raise("ValueError", "chr() arg not in range(0x110000)"),
            }
        }
        B::Ord => {
            arity("ord", &args, 1, 1)?;
            let text = str_arg("ord", &args[0])?;
            let mut chars = text.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(Value::Int(i64::from(u32::from(c)))),
                _ => raise(
                    "TypeError",
                    format!(
                        "ord() expected a character, but string of length {} found",
                        text.chars().count()
                    ),
                ),
            }
        }
        B::Any => {
            arity("any", &args, 1, 1)?;
            Ok(Value::Bool(interp.iterate(&args[0])?.iter().any(Value::truthy)))
        }
        B::All => {
            arity("all", &args, 1, 1)?;
            Ok(Value::Bool(interp.iterate(&args[0])?.iter().all(Value::truthy)))
        }
        B::Open => {
            arity("open", &args, 1, 2)?;
            let mode = match args.get(1).cloned().or_else(|| take_kwarg(&mut kwargs, "mode")) {
                Some(v) => str_arg("open", &v)?.to_string(),
                None => "r".to_string(),
            };
            take_kwarg(&mut kwargs, "encoding");
            no_kwargs("open", &kwargs)?;
            open(interp, str_arg("open", &args[0])?, &mode)
        }
        B::Getattr => {
            arity("getattr", &args, 2, 3)?;
            let name = str_arg("getattr", &args[1])?.to_string();
            match (interp.get_attr(&args[0], &name), args.get(2)) {
                (Err(Interrupt::Exception(e)), Some(default)) if e.kind == "AttributeError" => {
                    Ok(default.clone())
                }
                (result, _) => result,
            }
        }
        B::Hasattr => {
            arity("hasattr", &args, 2, 2)?;
            let name = str_arg("hasattr", &args[1])?.to_string();
            match interp.get_attr(&args[0], &name) {
                Ok(_) => Ok(Value::Bool(true)),
                Err(Interrupt::Exception(e)) if e.kind == "AttributeError" => Ok(Value::Bool(false)),
                Err(other) => Err(other),
            }
        }
        B::Import => {
            arity("__import__", &args, 1, 5)?;
            let name = str_arg("__import__", &args[0])?.to_string();
            let top = name.split('.').next().unwrap_or(&name).to_string();
            interp.import(&name)?;
            interp.import(&top)
        }
        B::Exit | B::SysExit => {
            arity("exit", &args, 0, 1)?;
            exit_with(&args)
        }
        B::Input => raise("EOFError", "EOF when reading a line"),
        B::OsGetcwd => Ok(Value::str(SANDBOX_ROOT)),
        B::OsListdir => {
            arity("listdir", &args, 0, 1)?;
            let path = optional_str("listdir", &args, 0, ".")?;
            let entries = interp.host_fs().list_dir(&path).map_err(fs_error)?;
            Ok(Value::list(entries.into_iter().map(Value::str).collect()))
        }
        B::OsRemove => {
            arity("remove", &args, 1, 1)?;
            let path = str_arg("remove", &args[0])?.to_string();
            interp.host_fs().remove(&path).map_err(fs_error)?;
            interp.touch_fs();
            Ok(Value::None)
        }
        B::OsMakedirs => {
            arity("makedirs", &args, 1, 2)?;
            str_arg("makedirs", &args[0])?;
            Ok(Value::None)
        }
        B::PathDirname => {
            arity("dirname", &args, 1, 1)?;
            Ok(Value::str(vfs::dirname(str_arg("dirname", &args[0])?)))
        }
        B::PathBasename => {
            arity("basename", &args, 1, 1)?;
            Ok(Value::str(vfs::basename(str_arg("basename", &args[0])?)))
        }
        B::PathJoin => {
            arity("join", &args, 1, usize::MAX)?;
            let parts = args
                .iter()
                .map(|a| str_arg("join", a))
                .collect::<Exec<Vec<_>>>()?;
            Ok(Value::str(vfs::join(parts)))
        }
        B::PathExists | B::PathIsfile | B::PathIsdir => {
            arity("exists", &args, 1, 1)?;
            let path = str_arg("exists", &args[0])?.to_string();
            let fs = interp.host_fs();
            Ok(Value::Bool(match b {
                B::PathIsfile => fs.is_file(&path),
                B::PathIsdir => fs.is_dir(&path),
                _ => fs.exists(&path),
            }))
        }
        B::PathAbspath => {
            arity("abspath", &args, 1, 1)?;
            Ok(Value::str(VirtualFs::normalize(str_arg("abspath", &args[0])?)))
        }
        B::PathSplitext => {
            arity("splitext", &args, 1, 1)?;
            let path = str_arg("splitext", &args[0])?;
            let name_start = path.rfind('/').map_or(0, |i| i + 1);
            let split = path[name_start..]
                .rfind('.')
                .filter(|&i| path[name_start..][..i].chars().any(|c| c != '.'))
                .map(|i| name_start + i);
            let (root, ext) = match split {
                Some(i) => path.split_at(i),
                None => (path, ""),
            };
            Ok(Value::tuple(vec![Value::str(root), Value::str(ext)]))
        }
        B::SysSetrecursionlimit => {
            arity("setrecursionlimit", &args, 1, 1)?;
            int_arg("setrecursionlimit", &args[0])?;
            Ok(Value::None)
        }
        B::SysGetrecursionlimit => Ok(Value::Int(
            i64::try_from(interp.limits.max_call_depth).unwrap_or(i64::MAX),
        )),
        B::MathSqrt => {
            arity("sqrt", &args, 1, 1)?;
            let x = float_arg("sqrt", &args[0])?;
            if x < 0.0 {
                return math_domain();
            }
            Ok(Value::Float(x.sqrt()))
        }
        B::MathFloor | B::MathCeil => {
            arity("floor", &args, 1, 1)?;
            if let Some(i) = args[0].as_int() {
                return Ok(Value::Int(i));
            }
            let x = float_arg("floor", &args[0])?;
            float_to_int(if b == B::MathFloor { x.floor() } else { x.ceil() }).map(Value::Int)
        }
        B::MathGcd => {
            let mut acc: i64 = 0;
            for a in &args {
                let mut x = int_arg("gcd", a)?.unsigned_abs();
                let mut y = acc.unsigned_abs();
                while y != 0 {
                    (x, y) = (y, x % y);
                }
                acc = i64::try_from(x).unwrap_or(i64::MAX);
            }
            Ok(Value::Int(acc))
        }
        B::MathFactorial => {
            arity("factorial", &args, 1, 1)?;
            let n = int_arg("factorial", &args[0])?;
            if n < 0 {
                return raise("ValueError", "factorial() not defined for negative values");
            }
            let mut acc: i64 = 1;
            for k in 2..=n {
                acc = acc
                    .checked_mul(k)
                    .ok_or_else(|| Interrupt::Unsupported("integers wider than 64 bits".into()))?;
            }
            Ok(Value::Int(acc))
        }
        B::MathLog | B::MathLog2 | B::MathLog10 => {
            arity("log", &args, 1, 2)?;
            let x = float_arg("log", &args[0])?;
            if x <= 0.0 {
                return math_domain();
            }
            let value = match (b, args.get(1)) {
                (B::MathLog2, _) => x.log2(),
                (B::MathLog10, _) => x.log10(),
                (_, Some(base)) => {
                    let base = float_arg("log", base)?;
                    if base <= 0.0 || base == 1.0 {
                        return math_domain();
                    }
                    x.ln() / base.ln()
                }
                (_, None) => x.ln(),
            };
            Ok(Value::Float(value))
        }
        B::MathExp => {
            arity("exp", &args, 1, 1)?;
            let y = float_arg("exp", &args[0])?.exp();
            if y.is_infinite() {
                return raise("OverflowError", "math range error");
            }
            Ok(Value::Float(y))
        }
        B::MathFabs => {
            arity("fabs", &args, 1, 1)?;
            Ok(Value::Float(float_arg("fabs", &args[0])?.abs()))
        }
        B::MathIsqrt => {
            arity("isqrt", &args, 1, 1)?;
            let n = int_arg("isqrt", &args[0])?;
            if n < 0 {
                return raise("ValueError", "isqrt() argument must be nonnegative");
            }
            let mut r = (n as f64).sqrt() as i64;
            while r.checked_mul(r).map_or(true, |sq| sq > n) {
                r -= 1;
            }
            while (r + 1).checked_mul(r + 1).is_some_and(|sq| sq <= n) {
                r += 1;
            }
            Ok(Value::Int(r))
        }
        B::TimeTime => Ok(Value::Float(interp.read_clock(true))),
        B::TimePerfCounter => Ok(Value::Float(interp.read_clock(false))),
        B::TimeSleep => {
            arity("sleep", &args, 1, 1)?;
            let seconds = float_arg("sleep", &args[0])?;
            if seconds < 0.0 {
                return raise("ValueError", "sleep length must be non-negative");
            }
            interp.sleep(seconds);
            Ok(Value::None)
        }
        B::Analyze => {
            let source = match (args.first(), take_kwarg(&mut kwargs, "source")) {
                (Some(v), _) => v.clone(),
                (None, Some(v)) => v,
                (None, None) => {
                    return raise(
                        "TypeError",
                        format!(
                            "{}() missing required argument: 'source'",
                            interp.entry.function
                        ),
                    )
                }
            };
            let source = str_arg(&interp.entry.function, &source)?.to_string();
            interp.analyze_nested(&source)
        }
    }
}

fn update_dict(interp: &mut Interpreter<'_>, target: &Value, source: &Value) -> Exec<()> {
    if let Value::Dict(pairs) = source {
        let pairs = pairs.borrow().clone();
        for (k, v) in pairs {
            crate::interp::set_item(target, k, v)?;
        }
        return Ok(());
    }
    for item in interp.iterate(source)? {
        let pair = interp.iterate(&item)?;
        let [k, v] = <[Value; 2]>::try_from(pair).map_err(|p| {
            crate::interp::exception(
                "ValueError",
                format!(
                    "dictionary update sequence element has length {}; 2 is required",
                    p.len()
                ),
            )
        })?;
        crate::interp::set_item(target, k, v)?;
    }
    Ok(())
}

fn open(interp: &mut Interpreter<'_>, path: &str, mode: &str) -> Exec<Value> {
    if mode.contains('b') {
        return unsupported("binary file modes");
    }
    if mode.contains('+') {
        return unsupported("read-write file modes");
    }
    let resolved = VirtualFs::normalize(path);
    let handle = match mode.chars().next() {
        Some('r') => {
            let content = interp.host_fs().read(&resolved).map_err(fs_error)?.to_string();
            FileHandle {
                path: resolved,
                mode: FileMode::Read,
                content,
                pos: 0,
                closed: false,
            }
        }
        Some('w' | 'x') => {
            interp.host_fs().write(&resolved, "").map_err(fs_error)?;
            interp.touch_fs();
            FileHandle {
                path: resolved,
                mode: FileMode::Write,
                content: String::new(),
                pos: 0,
                closed: false,
            }
        }
        Some('a') => {
            interp.host_fs().append(&resolved, "").map_err(fs_error)?;
            FileHandle {
                path: resolved,
                mode: FileMode::Append,
                content: String::new(),
                pos: 0,
                closed: false,
            }
        }
        _ => return raise("ValueError", format!("invalid mode: '{mode}'")),
    };
    Ok(Value::File(Rc::new(RefCell::new(handle))))
}

// ----------------------------------------------------------------------
// Methods
// ----------------------------------------------------------------------

const STR_METHODS: &[&str] = &[
    "join", "split", "rsplit", "strip", "lstrip", "rstrip", "upper", "lower", "replace",
    "startswith", "endswith", "find", "index", "count", "isdigit", "isalpha", "isalnum",
    "isspace", "splitlines", "format", "zfill", "title", "capitalize",
];
const LIST_METHODS: &[&str] = &[
    "append", "extend", "pop", "insert", "remove", "index", "count", "reverse", "sort", "copy",
    "clear",
];
const TUPLE_METHODS: &[&str] = &["index", "count"];
const DICT_METHODS: &[&str] = &[
    "get", "keys", "values", "items", "pop", "setdefault", "update", "copy", "clear",
];
const SET_METHODS: &[&str] = &[
    "add", "remove", "discard", "pop", "copy", "clear", "union", "intersection", "difference",
];
const FILE_METHODS: &[&str] = &["read", "readline", "readlines", "write", "close"];

/// Whether `receiver.name` is a method the sandbox implements.
pub fn has_method(receiver: &Value, name: &str) -> bool {
    let table = match receiver {
        Value::Str(_) => STR_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Tuple(_) => TUPLE_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Set(_) => SET_METHODS,
        Value::File(_) => FILE_METHODS,
        _ => return false,
    };
    table.contains(&name)
}

/// Calls `receiver.name(*args, **kwargs)`.
pub fn call_method(
    interp: &mut Interpreter<'_>,
    receiver: &Value,
    name: &str,
    args: Vec<Value>,
    kwargs: Kwargs,
) -> Exec<Value> {
    match receiver {
        Value::Str(s) => str_method(interp, s, name, args, kwargs),
        Value::List(items) => list_method(interp, items, name, args, kwargs),
        Value::Tuple(items) => seq_query(items, name, &args),
        Value::Dict(pairs) => dict_method(interp, receiver, pairs, name, args),
        Value::Set(items) => set_method(interp, items, name, args),
        Value::File(handle) => file_method(interp, handle, name, args),
        other => raise(
            "AttributeError",
            format!("'{}' object has no attribute '{name}'", other.type_name()),
        ),
    }
}

fn seq_query(items: &[Value], name: &str, args: &[Value]) -> Exec<Value> {
    arity(name, args, 1, 1)?;
    match name {
        "index" => match items.iter().position(|x| x.py_eq(&args[0])) {
            Some(i) => Ok(Value::Int(i64::try_from(i).unwrap_or(i64::MAX))),
            None => raise("ValueError", format!("{} is not in list", args[0].repr())),
        },
        _ => Ok(Value::Int(
            i64::try_from(items.iter().filter(|x| x.py_eq(&args[0])).count()).unwrap_or(i64::MAX),
        )),
    }
}

fn str_method(
    interp: &mut Interpreter<'_>,
    s: &str,
    name: &str,
    args: Vec<Value>,
    kwargs: Kwargs,
) -> Exec<Value> {
    if name != "format" {
        no_kwargs(name, &kwargs)?;
    }
    let strip_chars = |args: &[Value]| -> Exec<Option<Vec<char>>> {
        match args.first() {
            None | Some(Value::None) => Ok(None),
            Some(v) => Ok(Some(str_arg(name, v)?.chars().collect())),
        }
    };
    match name {
        "join" => {
            arity(name, &args, 1, 1)?;
            let mut parts = Vec::new();
            for item in interp.iterate(&args[0])? {
                match item {
                    Value::Str(p) => parts.push(p),
                    other => {
                        return raise(
                            "TypeError",
                            format!("sequence item: expected str instance, {} found", other.type_name()),
                        )
                    }
                }
            }
            let joined = parts.iter().map(|p| &**p).collect::<Vec<_>>().join(s);
            interp.check_len(joined.len())?;
            Ok(Value::str(joined))
        }
        "split" | "rsplit" => {
            arity(name, &args, 0, 2)?;
            let limit = match args.get(1) {
                Some(v) => usize::try_from(int_arg(name, v)?).ok(),
                None => None,
            };
            let parts: Vec<Value> = match args.first() {
                None | Some(Value::None) => split_whitespace(s, limit),
                Some(sep) => {
                    let sep = str_arg(name, sep)?;
                    if sep.is_empty() {
                        return raise("ValueError", "empty separator");
                    }
                    match (name, limit) {
                        ("split", Some(n)) => s.splitn(n + 1, sep).map(Value::str).collect(),
                        ("rsplit", Some(n)) => {
                            let mut v: Vec<Value> = s.rsplitn(n + 1, sep).map(Value::str).collect();
                            v.reverse();
                            v
                        }
                        _ => s.split(sep).map(Value::str).collect(),
                    }
                }
            };
            Ok(Value::list(parts))
        }
        "strip" | "lstrip" | "rstrip" => {
            arity(name, &args, 0, 1)?;
            let chars = strip_chars(&args)?;
            let matcher = |c: char| match &chars {
                Some(set) => set.contains(&c),
                None => c.is_whitespace(),
            };
            Ok(Value::str(match name {
                "lstrip" => s.trim_start_matches(matcher),
                "rstrip" => s.trim_end_matches(matcher),
                _ => s.trim_matches(matcher),
            }))
        }
        "upper" => Ok(Value::str(s.to_uppercase())),
        "lower" => Ok(Value::str(s.to_lowercase())),
        "title" | "capitalize" => {
            let mut out = String::with_capacity(s.len());
            let mut at_start = true;
            for c in s.chars() {
                if at_start {
                    out.extend(c.to_uppercase());
                } else {
                    out.extend(c.to_lowercase());
                }
                at_start = if name == "title" { !c.is_alphabetic() } else { false };
            }
            Ok(Value::str(out))
        }
        "replace" => {
            arity(name, &args, 2, 3)?;
            let from = str_arg(name, &args[0])?;
            let to = str_arg(name, &args[1])?;
            let replaced = match args.get(2) {
                Some(n) => match usize::try_from(int_arg(name, n)?) {
                    Ok(n) => s.replacen(from, to, n),
                    Err(_) => s.replace(from, to),
                },
                None => s.replace(from, to),
            };
            interp.check_len(replaced.len())?;
            Ok(Value::str(replaced))
        }
        "startswith" | "endswith" => {
            arity(name, &args, 1, 1)?;
            let candidates = match &args[0] {
                Value::Tuple(items) => items.to_vec(),
                other => vec![other.clone()],
            };
            for c in &candidates {
                let c = str_arg(name, c)?;
                let hit = if name == "startswith" { s.starts_with(c) } else { s.ends_with(c) };
                if hit {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        "find" | "index" | "count" => {
            arity(name, &args, 1, 1)?;
            let needle = str_arg(name, &args[0])?;
            if name == "count" {
                let n = if needle.is_empty() {
                    s.chars().count() + 1
                } else {
                    s.matches(needle).count()
                };
                return Ok(Value::Int(i64::try_from(n).unwrap_or(i64::MAX)));
            }
            match s.find(needle) {
                Some(byte) => Ok(Value::Int(
                    i64::try_from(s[..byte].chars().count()).unwrap_or(i64::MAX),
                )),
                None if name == "find" => Ok(Value::Int(-1)),
                None => raise("ValueError", "substring not found"),
            }
        }
        "isdigit" => Ok(Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))),
        "isalpha" => Ok(Value::Bool(!s.is_empty() && s.chars().all(char::is_alphabetic))),
        "isalnum" => Ok(Value::Bool(!s.is_empty() && s.chars().all(char::is_alphanumeric))),
        "isspace" => Ok(Value::Bool(!s.is_empty() && s.chars().all(char::is_whitespace))),
        "splitlines" => Ok(Value::list(s.lines().map(Value::str).collect())),
        "zfill" => {
            arity(name, &args, 1, 1)?;
            let width = usize::try_from(int_arg(name, &args[0])?).unwrap_or(0);
            let len = s.chars().count();
            if len >= width {
                return Ok(Value::str(s));
            }
            let (sign, digits) = match s.chars().next() {
                Some(c @ ('+' | '-')) => (c.to_string(), &s[1..]),
                _ => (String::new(), s),
            };
            Ok(Value::str(format!("{sign}{}{digits}", "0".repeat(width - len))))
        }
        "format" => format_str(s, &args, &kwargs).map(Value::str),
        _ => raise("AttributeError", format!("'str' object has no attribute '{name}'")),
    }
}

/// `str.split()` without a separator, honoring `maxsplit`.
fn split_whitespace(s: &str, limit: Option<usize>) -> Vec<Value> {
    let mut out = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if limit.is_some_and(|n| out.len() == n) {
            out.push(Value::str(rest));
            break;
        }
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        out.push(Value::str(&rest[..end]));
        rest = rest[end..].trim_start();
    }
    out
}

/// `str.format` with positional (`{}`, `{0}`) and keyword (`{name}`) fields.
/// Format specs after `:` are ignored.
fn format_str(template: &str, args: &[Value], kwargs: &Kwargs) -> Exec<String> {
    let mut out = String::new();
    let mut auto = 0;
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut field = String::new();
                for f in chars.by_ref() {
                    if f == '}' {
                        break;
                    }
                    field.push(f);
                }
                let name = field.split([':', '!']).next().unwrap_or_default();
                let value = if name.is_empty() {
                    auto += 1;
                    args.get(auto - 1)
                } else if let Ok(i) = name.parse::<usize>() {
                    args.get(i)
                } else {
                    kwargs.iter().find(|(k, _)| k == name).map(|(_, v)| v)
                };
                match value {
                    Some(v) if field.contains("!r") => out.push_str(&v.repr()),
                    Some(v) => out.push_str(&v.to_str()),
                    None if name.is_empty() || name.parse::<usize>().is_ok() => {
                        return raise("IndexError", "Replacement index out of range for positional args tuple")
                    }
                    None => return raise("KeyError", format!("'{name}'")),
                }
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

fn list_method(
    interp: &mut Interpreter<'_>,
    items: &Rc<RefCell<Vec<Value>>>,
    name: &str,
    args: Vec<Value>,
    mut kwargs: Kwargs,
) -> Exec<Value> {
    if name != "sort" {
        no_kwargs(name, &kwargs)?;
    }
    match name {
        "append" => {
            arity(name, &args, 1, 1)?;
            interp.check_len(items.borrow().len() + 1)?;
            items.borrow_mut().extend(args);
            Ok(Value::None)
        }
        "extend" => {
            arity(name, &args, 1, 1)?;
            let extra = interp.iterate(&args[0])?;
            interp.check_len(items.borrow().len() + extra.len())?;
            items.borrow_mut().extend(extra);
            Ok(Value::None)
        }
        "insert" => {
            arity(name, &args, 2, 2)?;
            let index = int_arg(name, &args[0])?;
            let mut items = items.borrow_mut();
            let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
            let at = if index < 0 { (index + len).max(0) } else { index.min(len) };
            items.insert(usize::try_from(at).unwrap_or(0), args[1].clone());
            Ok(Value::None)
        }
        "pop" => {
            arity(name, &args, 0, 1)?;
            let mut items = items.borrow_mut();
            if items.is_empty() {
                return raise("IndexError", "pop from empty list");
            }
            let index = match args.first() {
                Some(v) => int_arg(name, v)?,
                None => -1,
            };
            match ops::normalize_index(index, items.len()) {
                Some(i) => Ok(items.remove(i)),
                None => raise("IndexError", "pop index out of range"),
            }
        }
        "remove" => {
            arity(name, &args, 1, 1)?;
            let mut items = items.borrow_mut();
            match items.iter().position(|x| x.py_eq(&args[0])) {
                Some(i) => {
                    items.remove(i);
                    Ok(Value::None)
                }
                None => raise("ValueError", "list.remove(x): x not in list"),
            }
        }
        "index" | "count" => {
            let snapshot = items.borrow().clone();
            seq_query(&snapshot, name, &args)
        }
        "reverse" => {
            items.borrow_mut().reverse();
            Ok(Value::None)
        }
        "sort" => {
            arity(name, &args, 0, 0)?;
            let key = take_kwarg(&mut kwargs, "key");
            let reverse = take_kwarg(&mut kwargs, "reverse").is_some_and(|v| v.truthy());
            no_kwargs(name, &kwargs)?;
            let snapshot = items.borrow().clone();
            let sorted = sort_values(interp, snapshot, key, reverse)?;
            *items.borrow_mut() = sorted;
            Ok(Value::None)
        }
        "copy" => Ok(Value::list(items.borrow().clone())),
        "clear" => {
            items.borrow_mut().clear();
            Ok(Value::None)
        }
        _ => raise("AttributeError", format!("'list' object has no attribute '{name}'")),
    }
}

fn dict_method(
    interp: &mut Interpreter<'_>,
    receiver: &Value,
    pairs: &Rc<RefCell<Vec<(Value, Value)>>>,
    name: &str,
    args: Vec<Value>,
) -> Exec<Value> {
    let position = |key: &Value| pairs.borrow().iter().position(|(k, _)| k.py_eq(key));
    match name {
        "get" => {
            arity(name, &args, 1, 2)?;
            Ok(match position(&args[0]) {
                Some(i) => pairs.borrow()[i].1.clone(),
                None => args.get(1).cloned().unwrap_or(Value::None),
            })
        }
        "keys" => Ok(Value::list(pairs.borrow().iter().map(|(k, _)| k.clone()).collect())),
        "values" => Ok(Value::list(pairs.borrow().iter().map(|(_, v)| v.clone()).collect())),
        "items" => Ok(Value::list(
            pairs
                .borrow()
                .iter()
                .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
                .collect(),
        )),
        "pop" => {
            arity(name, &args, 1, 2)?;
            match (position(&args[0]), args.get(1)) {
                (Some(i), _) => Ok(pairs.borrow_mut().remove(i).1),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => raise("KeyError", args[0].repr()),
            }
        }
        "setdefault" => {
            arity(name, &args, 1, 2)?;
            if let Some(i) = position(&args[0]) {
                return Ok(pairs.borrow()[i].1.clone());
            }
            let value = args.get(1).cloned().unwrap_or(Value::None);
            crate::interp::set_item(receiver, args[0].clone(), value.clone())?;
            Ok(value)
        }
        "update" => {
            arity(name, &args, 0, 1)?;
            if let Some(source) = args.first() {
                update_dict(interp, receiver, source)?;
            }
            Ok(Value::None)
        }
        "copy" => Ok(Value::dict(pairs.borrow().clone())),
        "clear" => {
            pairs.borrow_mut().clear();
            Ok(Value::None)
        }
        _ => raise("AttributeError", format!("'dict' object has no attribute '{name}'")),
    }
}

fn set_method(
    interp: &mut Interpreter<'_>,
    items: &Rc<RefCell<Vec<Value>>>,
    name: &str,
    args: Vec<Value>,
) -> Exec<Value> {
    let position = |v: &Value| items.borrow().iter().position(|x| x.py_eq(v));
    match name {
        "add" => {
            arity(name, &args, 1, 1)?;
            if !args[0].is_hashable() {
                return raise("TypeError", format!("unhashable type: '{}'", args[0].type_name()));
            }
            if position(&args[0]).is_none() {
                items.borrow_mut().push(args[0].clone());
            }
            Ok(Value::None)
        }
        "remove" | "discard" => {
            arity(name, &args, 1, 1)?;
            match position(&args[0]) {
                Some(i) => {
                    items.borrow_mut().remove(i);
                    Ok(Value::None)
                }
                None if name == "discard" => Ok(Value::None),
                None => raise("KeyError", args[0].repr()),
            }
        }
        "pop" => {
            let mut items = items.borrow_mut();
            if items.is_empty() {
                return raise("KeyError", "'pop from an empty set'");
            }
            Ok(items.remove(0))
        }
        "copy" => Ok(Value::set(items.borrow().clone())),
        "clear" => {
            items.borrow_mut().clear();
            Ok(Value::None)
        }
        "union" | "intersection" | "difference" => {
            let mut result = items.borrow().clone();
            for other in &args {
                let other = interp.iterate(other)?;
                match name {
                    "union" => result.extend(other),
                    "intersection" => result.retain(|x| other.iter().any(|y| x.py_eq(y))),
                    _ => result.retain(|x| !other.iter().any(|y| x.py_eq(y))),
                }
            }
            Ok(Value::set(result))
        }
        _ => raise("AttributeError", format!("'set' object has no attribute '{name}'")),
    }
}

fn file_method(
    interp: &mut Interpreter<'_>,
    handle: &Rc<RefCell<FileHandle>>,
    name: &str,
    args: Vec<Value>,
) -> Exec<Value> {
    if handle.borrow().closed && name != "close" {
        return raise("ValueError", "I/O operation on closed file.");
    }
    let mode = handle.borrow().mode;
    match (name, mode) {
        ("close", _) => {
            handle.borrow_mut().closed = true;
            Ok(Value::None)
        }
        ("write", FileMode::Write | FileMode::Append) => {
            arity(name, &args, 1, 1)?;
            let text = str_arg(name, &args[0])?.to_string();
            let path = handle.borrow().path.clone();
            interp.host_fs().append(&path, &text).map_err(fs_error)?;
            interp.touch_fs();
            Ok(Value::Int(i64::try_from(text.chars().count()).unwrap_or(i64::MAX)))
        }
        ("read" | "readline" | "readlines", FileMode::Read) => {
            let mut h = handle.borrow_mut();
            let rest = h.content.get(h.pos..).unwrap_or_default().to_string();
            let taken = match name {
                "readline" => rest.split_inclusive('\n').next().unwrap_or_default().to_string(),
                _ => rest,
            };
            h.pos += taken.len();
            Ok(match name {
                "readlines" => Value::list(taken.split_inclusive('\n').map(Value::str).collect()),
                _ => Value::str(taken),
            })
        }
        _ => raise("UnsupportedOperation", format!("not {}", if mode == FileMode::Read { "writable" } else { "readable" })),
    }
}

// ----------------------------------------------------------------------
// Modules
// ----------------------------------------------------------------------

fn module(name: &str, attrs: impl IntoIterator<Item = (&'static str, Value)>) -> Value {
    let attrs: BTreeMap<String, Value> = attrs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    Value::Module(Rc::new(ModuleObj::new(name, attrs)))
}

/// The module candidates import the analysis entry point from.
pub fn entry_module(entry: &EntryPoint) -> Value {
    let attrs = BTreeMap::from([(entry.function.clone(), Value::Builtin(Builtin::Analyze))]);
    Value::Module(Rc::new(ModuleObj::new(entry.module.clone(), attrs)))
}

pub fn os_module(path: Value) -> Value {
    module(
        "os",
        [
            ("path", path),
            ("sep", Value::str("/")),
            ("getcwd", Value::Builtin(Builtin::OsGetcwd)),
            ("listdir", Value::Builtin(Builtin::OsListdir)),
            ("remove", Value::Builtin(Builtin::OsRemove)),
            ("unlink", Value::Builtin(Builtin::OsRemove)),
            ("makedirs", Value::Builtin(Builtin::OsMakedirs)),
            ("mkdir", Value::Builtin(Builtin::OsMakedirs)),
        ],
    )
}

pub fn path_module() -> Value {
    module(
        "posixpath",
        [
            ("sep", Value::str("/")),
            ("dirname", Value::Builtin(Builtin::PathDirname)),
            ("basename", Value::Builtin(Builtin::PathBasename)),
            ("join", Value::Builtin(Builtin::PathJoin)),
            ("exists", Value::Builtin(Builtin::PathExists)),
            ("isfile", Value::Builtin(Builtin::PathIsfile)),
            ("isdir", Value::Builtin(Builtin::PathIsdir)),
            ("abspath", Value::Builtin(Builtin::PathAbspath)),
            ("realpath", Value::Builtin(Builtin::PathAbspath)),
            ("splitext", Value::Builtin(Builtin::PathSplitext)),
        ],
    )
}

pub fn sys_module(file_path: &str) -> Value {
    module(
        "sys",
        [
            ("argv", Value::list(vec![Value::str(file_path)])),
            ("path", Value::list(vec![Value::str(SANDBOX_ROOT)])),
            ("maxsize", Value::Int(i64::MAX)),
            ("platform", Value::str("linux")),
            ("exit", Value::Builtin(Builtin::SysExit)),
            ("setrecursionlimit", Value::Builtin(Builtin::SysSetrecursionlimit)),
            ("getrecursionlimit", Value::Builtin(Builtin::SysGetrecursionlimit)),
        ],
    )
}

pub fn math_module() -> Value {
    module(
        "math",
        [
            ("pi", Value::Float(std::f64::consts::PI)),
            ("e", Value::Float(std::f64::consts::E)),
            ("inf", Value::Float(f64::INFINITY)),
            ("nan", Value::Float(f64::NAN)),
            ("sqrt", Value::Builtin(Builtin::MathSqrt)),
            ("floor", Value::Builtin(Builtin::MathFloor)),
            ("ceil", Value::Builtin(Builtin::MathCeil)),
            ("gcd", Value::Builtin(Builtin::MathGcd)),
            ("factorial", Value::Builtin(Builtin::MathFactorial)),
            ("log", Value::Builtin(Builtin::MathLog)),
            ("log2", Value::Builtin(Builtin::MathLog2)),
            ("log10", Value::Builtin(Builtin::MathLog10)),
            ("exp", Value::Builtin(Builtin::MathExp)),
            ("fabs", Value::Builtin(Builtin::MathFabs)),
            ("isqrt", Value::Builtin(Builtin::MathIsqrt)),
        ],
    )
}

pub fn time_module() -> Value {
    module(
        "time",
        [
            ("time", Value::Builtin(Builtin::TimeTime)),
            ("sleep", Value::Builtin(Builtin::TimeSleep)),
            ("perf_counter", Value::Builtin(Builtin::TimePerfCounter)),
            ("monotonic", Value::Builtin(Builtin::TimePerfCounter)),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::{Abort, Location, StateDigest, StepHook};
    use crate::host::IsolatedHost;
    use anatomist::Program;
    use common::TracerLimits;

    struct Unlimited;

    impl StepHook for Unlimited {
        fn on_call(&mut self, _function: &str) -> Result<(), Abort> {
            Ok(())
        }
        fn on_return(&mut self, _function: &str) {}
        fn on_line(&mut self, _location: &Location, _digest: StateDigest) -> Result<(), Abort> {
            Ok(())
        }
    }

    fn output(src: &str) -> String {
        let program = Program::parse(src);
        let mut host = IsolatedHost::default();
        let limits = TracerLimits::default();
        let entry = EntryPoint::default();
        let mut hook = Unlimited;
        let mut interp = Interpreter::new(&mut host, &mut hook, &limits, &entry, "/sandbox/t.py");
        if let Err(err) = interp.run(program.module().unwrap()) {
            panic!("run failed: {err:?}");
        }
        interp.stdout().to_string()
    }

    #[test]
    fn test_print_separators() {
        assert_eq!(output("print(1, 2, sep='-', end='!')\n"), "1-2!");
    }

    #[test]
    fn test_sorting_with_key_and_reverse() {
        let src = "words = ['ccc', 'a', 'bb']\nprint(sorted(words, key=len))\nwords.sort(reverse=True)\nprint(words)\n";
        assert_eq!(output(src), "['a', 'bb', 'ccc']\n['ccc', 'bb', 'a']\n");
    }

    #[test]
    fn test_min_max_sum() {
        assert_eq!(output("print(min([3, 1, 2]), max(4, 9, 2), sum(range(5)))\n"), "1 9 10\n");
    }

    #[test]
    fn test_string_methods() {
        let src = "s = '  a b  c '\nprint(s.split(), s.split(None, 1), 'x,y'.split(','))\nprint('{} {name}'.format(1, name='n'), 'ab'.upper(), '7'.zfill(3))\n";
        assert_eq!(
            output(src),
            "['a', 'b', 'c'] ['a', 'b  c '] ['x', 'y']\n1 n AB 007\n"
        );
    }

    #[test]
    fn test_dict_methods() {
        let src = "d = dict(a=1)\nd.setdefault('b', 2)\nd.update({'c': 3})\nprint(d.get('z', 0), d.pop('a'), list(d.items()))\n";
        assert_eq!(output(src), "0 1 [('b', 2), ('c', 3)]\n");
    }

    #[test]
    fn test_numeric_conversions() {
        let src = "print(int('-12'), int(3.9), float('2.5'), round(2.5), round(3.5), pow(2, 10, 1000))\n";
        assert_eq!(output(src), "-12 3 2.5 2 4 24\n");
    }

    #[test]
    fn test_virtual_clock_advances() {
        let src = "import time\na = time.time()\ntime.sleep(2)\nb = time.time()\nprint(b - a > 2)\n";
        assert_eq!(output(src), "True\n");
    }

    #[test]
    fn test_splitext() {
        let src = "import os\nprint(os.path.splitext('/a/b.py'), os.path.splitext('/a/.rc'))\n";
        assert_eq!(output(src), "('/a/b', '.py') ('/a/.rc', '')\n");
    }
}
