//! Operator semantics: arithmetic, comparison, membership, indexing and
//! slicing, following Python's rules for the value kinds the sandbox has.
//!
//! Integers are 64-bit; a result that would need a wider integer stops the
//! run as unsupported rather than wrapping.

use crate::interp::{exception, raise, unsupported, Exec, Interrupt};
use crate::value::Value;
use anatomist::ast::{BinOp, CmpOp, UnaryOp};
use std::cmp::Ordering;

fn wide() -> Interrupt {
    Interrupt::Unsupported("integers wider than 64 bits".to_string())
}

fn operand_error<T>(op: &str, a: &Value, b: &Value) -> Exec<T> {
    raise(
        "TypeError",
        format!(
            "unsupported operand type(s) for {op}: '{}' and '{}'",
            a.type_name(),
            b.type_name()
        ),
    )
}

/// `a <op> b`. `max_len` bounds sequence repetition.
pub fn binary(op: BinOp, a: &Value, b: &Value, max_len: usize) -> Exec<Value> {
    if let (Some(x), Some(y)) = (a.as_int(), b.as_int()) {
        return int_op(op, x, y);
    }
    if matches!(a, Value::Float(_)) || matches!(b, Value::Float(_)) {
        if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
            return float_op(op, x, y).map(Value::Float);
        }
    }
    match (op, a, b) {
        (BinOp::Add, Value::Str(x), Value::Str(y)) => {
            check_len(x.len() + y.len(), max_len)?;
            Ok(Value::str(format!("{x}{y}")))
        }
        (BinOp::Add, Value::List(x), Value::List(y)) => {
            let mut items = x.borrow().clone();
            items.extend(y.borrow().iter().cloned());
            check_len(items.len(), max_len)?;
            Ok(Value::list(items))
        }
        (BinOp::Add, Value::Tuple(x), Value::Tuple(y)) => {
            Ok(Value::tuple(x.iter().chain(y.iter()).cloned().collect()))
        }
        (BinOp::Mult, seq, n) | (BinOp::Mult, n, seq)
            if n.as_int().is_some()
                && matches!(seq, Value::Str(_) | Value::List(_) | Value::Tuple(_)) =>
        {
            let count = usize::try_from(n.as_int().unwrap_or(0).max(0)).unwrap_or(usize::MAX);
            repeat(seq, count, max_len)
        }
        (BinOp::Mod, Value::Str(fmt), args) => percent_format(fmt, args).map(Value::str),
        _ => operand_error(op.symbol(), a, b),
    }
}

fn check_len(len: usize, max_len: usize) -> Exec<()> {
    if len > max_len {
        return unsupported(format!("collections longer than {max_len} items"));
    }
    Ok(())
}

fn repeat(seq: &Value, count: usize, max_len: usize) -> Exec<Value> {
    match seq {
        Value::Str(s) => {
            check_len(s.len().saturating_mul(count), max_len)?;
            Ok(Value::str(s.repeat(count)))
        }
        Value::List(items) => {
            let items = items.borrow();
            check_len(items.len().saturating_mul(count), max_len)?;
            Ok(Value::list(repeated(&items, count)))
        }
        Value::Tuple(items) => {
            check_len(items.len().saturating_mul(count), max_len)?;
            Ok(Value::tuple(repeated(items, count)))
        }
        _ => Ok(seq.clone()),
    }
}

fn repeated(items: &[Value], count: usize) -> Vec<Value> {
    items.iter().cloned().cycle().take(items.len() * count).collect()
}

fn int_op(op: BinOp, x: i64, y: i64) -> Exec<Value> {
    let v = match op {
        BinOp::Add => x.checked_add(y).ok_or_else(wide)?,
        BinOp::Sub => x.checked_sub(y).ok_or_else(wide)?,
        BinOp::Mult => x.checked_mul(y).ok_or_else(wide)?,
        BinOp::Div => {
            if y == 0 {
                return raise("ZeroDivisionError", "division by zero");
            }
            return Ok(Value::Float(x as f64 / y as f64));
        }
        BinOp::FloorDiv => {
            if y == 0 {
                return raise("ZeroDivisionError", "integer division or modulo by zero");
            }
            floor_div(x, y).ok_or_else(wide)?
        }
        BinOp::Mod => {
            if y == 0 {
                return raise("ZeroDivisionError", "integer division or modulo by zero");
            }
            floor_mod(x, y)
        }
        BinOp::Pow => {
            if y < 0 {
                if x == 0 {
                    return raise("ZeroDivisionError", "0.0 cannot be raised to a negative power");
                }
                return Ok(Value::Float((x as f64).powf(y as f64)));
            }
            let exp = u32::try_from(y).map_err(|_| wide())?;
            x.checked_pow(exp).ok_or_else(wide)?
        }
        BinOp::LShift => {
            if y < 0 {
                return raise("ValueError", "negative shift count");
            }
            if x == 0 {
                0
            } else if y >= 64 {
                return Err(wide());
            } else {
                i64::try_from(i128::from(x) << y).map_err(|_| wide())?
            }
        }
        BinOp::RShift => {
            if y < 0 {
                return raise("ValueError", "negative shift count");
            }
            if y >= 64 {
                if x < 0 {
                    -1
                } else {
                    0
                }
            } else {
                x >> y
            }
        }
        BinOp::BitAnd => x & y,
        BinOp::BitOr => x | y,
        BinOp::BitXor => x ^ y,
        BinOp::MatMult => return operand_error("@", &Value::Int(x), &Value::Int(y)),
    };
    Ok(Value::Int(v))
}

/// Python `//` on integers (rounds toward negative infinity).
pub fn floor_div(x: i64, y: i64) -> Option<i64> {
    let q = x.checked_div(y)?;
    if x % y != 0 && ((x < 0) != (y < 0)) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

/// Python `%` on integers (result takes the divisor's sign).
pub fn floor_mod(x: i64, y: i64) -> i64 {
    let r = x.checked_rem(y).unwrap_or(0);
    if r != 0 && ((r < 0) != (y < 0)) {
        r + y
    } else {
        r
    }
}

fn float_op(op: BinOp, x: f64, y: f64) -> Exec<f64> {
    Ok(match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mult => x * y,
        BinOp::Div => {
            if y == 0.0 {
                return raise("ZeroDivisionError", "float division by zero");
            }
            x / y
        }
        BinOp::FloorDiv => {
            if y == 0.0 {
                return raise("ZeroDivisionError", "float floor division by zero");
            }
            (x / y).floor()
        }
        BinOp::Mod => {
            if y == 0.0 {
                return raise("ZeroDivisionError", "float modulo");
            }
            x - y * (x / y).floor()
        }
        BinOp::Pow => {
            if x == 0.0 && y < 0.0 {
                return raise("ZeroDivisionError", "0.0 cannot be raised to a negative power");
            }
            x.powf(y)
        }
        other => {
            return operand_error(other.symbol(), &Value::Float(x), &Value::Float(y));
        }
    })
}

pub fn unary(op: UnaryOp, v: &Value) -> Exec<Value> {
    match (op, v) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.truthy())),
        (UnaryOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
        (UnaryOp::Pos, Value::Float(x)) => Ok(Value::Float(*x)),
        (UnaryOp::Neg, v) if v.as_int().is_some() => {
            v.as_int().and_then(i64::checked_neg).map(Value::Int).ok_or_else(wide)
        }
        (UnaryOp::Pos, v) if v.as_int().is_some() => Ok(Value::Int(v.as_int().unwrap_or(0))),
        (UnaryOp::Invert, v) if v.as_int().is_some() => Ok(Value::Int(!v.as_int().unwrap_or(0))),
        (op, v) => {
            let symbol = match op {
                UnaryOp::Neg => "-",
                UnaryOp::Pos => "+",
                _ => "~",
            };
            raise(
                "TypeError",
                format!("bad operand type for unary {symbol}: '{}'", v.type_name()),
            )
        }
    }
}

/// Evaluates one link of a comparison chain.
pub fn compare(op: CmpOp, a: &Value, b: &Value) -> Exec<bool> {
    Ok(match op {
        CmpOp::Eq => a.py_eq(b),
        CmpOp::NotEq => !a.py_eq(b),
        CmpOp::Is => a.is_same(b),
        CmpOp::IsNot => !a.is_same(b),
        CmpOp::In => contains(b, a)?,
        CmpOp::NotIn => !contains(b, a)?,
        CmpOp::Lt | CmpOp::LtE | CmpOp::Gt | CmpOp::GtE => {
            let Some(ordering) = order(a, b).map_err(|_| ordering_error(op, a, b))? else {
                return Ok(false);
            };
            match op {
                CmpOp::Lt => ordering == Ordering::Less,
                CmpOp::LtE => ordering != Ordering::Greater,
                CmpOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }
        }
    })
}

fn ordering_error(op: CmpOp, a: &Value, b: &Value) -> Interrupt {
    exception(
        "TypeError",
        format!(
            "'{}' not supported between instances of '{}' and '{}'",
            op.symbol(),
            a.type_name(),
            b.type_name()
        ),
    )
}

/// Total order used by `<` and sorting; `None` when unordered (NaN).
///
/// # Errors
/// `TypeError` for kinds Python refuses to order.
pub fn order(a: &Value, b: &Value) -> Exec<Option<Ordering>> {
    if let (Some(x), Some(y)) = (a.as_int(), b.as_int()) {
        return Ok(Some(x.cmp(&y)));
    }
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return Ok(x.partial_cmp(&y));
    }
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(Some(x.cmp(y))),
        (Value::List(x), Value::List(y)) => order_seq(&x.borrow(), &y.borrow()),
        (Value::Tuple(x), Value::Tuple(y)) => order_seq(x, y),
        _ => Err(ordering_error(CmpOp::Lt, a, b)),
    }
}

fn order_seq(a: &[Value], b: &[Value]) -> Exec<Option<Ordering>> {
    for (x, y) in a.iter().zip(b) {
        if !x.py_eq(y) {
            return order(x, y);
        }
    }
    Ok(Some(a.len().cmp(&b.len())))
}

/// `item in container`.
pub fn contains(container: &Value, item: &Value) -> Exec<bool> {
    match container {
        Value::Str(s) => match item {
            Value::Str(sub) => Ok(s.contains(&**sub)),
            other => raise(
                "TypeError",
                format!(
                    "'in <string>' requires string as left operand, not {}",
                    other.type_name()
                ),
            ),
        },
        Value::List(items) | Value::Set(items) => Ok(items.borrow().iter().any(|x| x.py_eq(item))),
        Value::Tuple(items) => Ok(items.iter().any(|x| x.py_eq(item))),
        Value::Dict(pairs) => Ok(pairs.borrow().iter().any(|(k, _)| k.py_eq(item))),
        Value::Range(r) => Ok(match item {
            Value::Float(f) if f.fract() == 0.0 => r.contains(*f as i64),
            other => other.as_int().is_some_and(|v| r.contains(v)),
        }),
        other => raise(
            "TypeError",
            format!("argument of type '{}' is not iterable", other.type_name()),
        ),
    }
}

/// Resolves a possibly negative index against `len`.
pub fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let i = if index < 0 { index + len } else { index };
    if (0..len).contains(&i) {
        usize::try_from(i).ok()
    } else {
        None
    }
}

fn index_of(key: &Value, container: &Value) -> Exec<i64> {
    key.as_int().map_or_else(
        || {
            raise(
                "TypeError",
                format!(
                    "{} indices must be integers or slices, not {}",
                    container.type_name(),
                    key.type_name()
                ),
            )
        },
        Ok,
    )
}

/// `obj[key]`.
pub fn index(obj: &Value, key: &Value) -> Exec<Value> {
    match obj {
        Value::List(items) => {
            let i = index_of(key, obj)?;
            let items = items.borrow();
            match normalize_index(i, items.len()) {
                Some(i) => Ok(items[i].clone()),
                None => raise("IndexError", "list index out of range"),
            }
        }
        Value::Tuple(items) => {
            let i = index_of(key, obj)?;
            match normalize_index(i, items.len()) {
                Some(i) => Ok(items[i].clone()),
                None => raise("IndexError", "tuple index out of range"),
            }
        }
        Value::Str(s) => {
            let i = index_of(key, obj)?;
            let count = s.chars().count();
            match normalize_index(i, count).and_then(|i| s.chars().nth(i)) {
                Some(c) => Ok(Value::str(c.to_string())),
                None => raise("IndexError", "string index out of range"),
            }
        }
        Value::Range(r) => {
            let i = index_of(key, obj)?;
            match normalize_index(i, r.len()).and_then(|i| r.get(i)) {
                Some(v) => Ok(Value::Int(v)),
                None => raise("IndexError", "range object index out of range"),
            }
        }
        Value::Dict(pairs) => {
            if !key.is_hashable() {
                return raise("TypeError", format!("unhashable type: '{}'", key.type_name()));
            }
            match pairs.borrow().iter().find(|(k, _)| k.py_eq(key)) {
                Some((_, v)) => Ok(v.clone()),
                None => raise("KeyError", key.repr()),
            }
        }
        other => raise(
            "TypeError",
            format!("'{}' object is not subscriptable", other.type_name()),
        ),
    }
}

/// Positions selected by `[start:stop:step]` on a sequence of `len`.
pub fn slice_indices(len: usize, start: Option<i64>, stop: Option<i64>, step: i64) -> Vec<usize> {
    let len = i64::try_from(len).unwrap_or(i64::MAX);
    let adjust = |bound: Option<i64>, default: i64| match bound {
        None => default,
        Some(v) => {
            let v = if v < 0 { v.saturating_add(len) } else { v };
            if step > 0 {
                v.clamp(0, len)
            } else {
                v.clamp(-1, len - 1)
            }
        }
    };
    let (first, last) = if step > 0 { (0, len) } else { (len - 1, -1) };
    let mut i = adjust(start, first);
    let stop = adjust(stop, last);
    let mut out = Vec::new();
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        if let Ok(pos) = usize::try_from(i) {
            out.push(pos);
        }
        i += step;
    }
    out
}

/// `obj[start:stop:step]`.
pub fn slice(obj: &Value, start: Option<i64>, stop: Option<i64>, step: Option<i64>) -> Exec<Value> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return raise("ValueError", "slice step cannot be zero");
    }
    match obj {
        Value::List(items) => {
            let items = items.borrow();
            let picked = slice_indices(items.len(), start, stop, step);
            Ok(Value::list(picked.into_iter().map(|i| items[i].clone()).collect()))
        }
        Value::Tuple(items) => {
            let picked = slice_indices(items.len(), start, stop, step);
            Ok(Value::tuple(picked.into_iter().map(|i| items[i].clone()).collect()))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let picked = slice_indices(chars.len(), start, stop, step);
            Ok(Value::str(picked.into_iter().map(|i| chars[i]).collect::<String>()))
        }
        other => raise(
            "TypeError",
            format!("'{}' object is not subscriptable", other.type_name()),
        ),
    }
}

/// printf-style `fmt % args` for `%s`, `%r`, `%d`, `%i`, `%f` and `%%`,
/// with an optional `.N` precision.
pub fn percent_format(fmt: &str, args: &Value) -> Exec<String> {
    let items: Vec<Value> = match args {
        Value::Tuple(items) => items.to_vec(),
        other => vec![other.clone()],
    };
    let mut items = items.into_iter();
    let mut out = String::new();
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut precision = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut digits = String::new();
            while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                digits.push(*d);
                chars.next();
            }
            precision = digits.parse::<usize>().ok();
        }
        let Some(spec) = chars.next() else {
            return raise("ValueError", "incomplete format");
        };
        if spec == '%' {
            out.push('%');
            continue;
        }
        let Some(arg) = items.next() else {
            return raise("TypeError", "not enough arguments for format string");
        };
        match spec {
            's' => out.push_str(&arg.to_str()),
            'r' => out.push_str(&arg.repr()),
            'd' | 'i' => match (&arg, arg.as_int()) {
                (Value::Float(f), _) => out.push_str(&(f.trunc() as i64).to_string()),
                (_, Some(v)) => out.push_str(&v.to_string()),
                _ => {
                    return raise(
                        "TypeError",
                        format!("%{spec} format: a real number is required, not {}", arg.type_name()),
                    )
                }
            },
            'f' => match arg.as_f64() {
                Some(f) => out.push_str(&format!("{:.*}", precision.unwrap_or(6), f)),
                None => {
                    return raise(
                        "TypeError",
                        format!("must be real number, not {}", arg.type_name()),
                    )
                }
            },
            other => return unsupported(format!("'%{other}' string formatting")),
        }
    }
    if items.next().is_some() {
        return raise("TypeError", "not all arguments converted during string formatting");
    }
    Ok(out)
}
