//! Source primitive library.
//!
//! Each entry is bound by name in the default top-level environment. The
//! operator symbols are bound too, since the compiler lowers `a + b` to an
//! application of whatever `+` names.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::operations::{Arity, OperationEntry};
use crate::value::Value;

pub fn source_primitives() -> Vec<OperationEntry> {
    vec![
        OperationEntry::primitive("+", Arity::Exact(2), |args| match (&args[0], &args[1]) {
            (Value::String(a), Value::String(b)) => Ok(Value::string(&format!("{a}{b}"))),
            (a, b) => Ok(Value::Number(a.as_number()? + b.as_number()?)),
        }),
        OperationEntry::primitive("-", Arity::Range(1, 2), |args| match args {
            [x] => Ok(Value::Number(-x.as_number()?)),
            [a, b, ..] => Ok(Value::Number(a.as_number()? - b.as_number()?)),
            [] => Err(Error::native("-: no operands")),
        }),
        numeric("*", |a, b| Ok(a * b)),
        numeric("/", |a, b| {
            if b == 0.0 {
                Err(Error::native("division by zero"))
            } else {
                Ok(a / b)
            }
        }),
        numeric("%", |a, b| Ok(a % b)),
        OperationEntry::primitive("===", Arity::Exact(2), |args| {
            Ok(Value::Bool(strict_equal(&args[0], &args[1])))
        }),
        OperationEntry::primitive("!==", Arity::Exact(2), |args| {
            Ok(Value::Bool(!strict_equal(&args[0], &args[1])))
        }),
        comparison("<", Ordering::is_lt),
        comparison("<=", Ordering::is_le),
        comparison(">", Ordering::is_gt),
        comparison(">=", Ordering::is_ge),
        OperationEntry::primitive("!", Arity::Exact(1), |args| match args[0] {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            ref other => Err(Error::type_mismatch("boolean", other)),
        }),
        math("math_abs", f64::abs),
        math("math_sqrt", f64::sqrt),
        math("math_floor", f64::floor),
        numeric("math_pow", |a, b| Ok(a.powf(b))),
        OperationEntry::primitive("pair", Arity::Exact(2), |args| {
            Ok(Value::cons(args[0].clone(), args[1].clone()))
        }),
        OperationEntry::primitive("head", Arity::Exact(1), |args| {
            Ok(args[0].as_pair()?.0.clone())
        }),
        OperationEntry::primitive("tail", Arity::Exact(1), |args| {
            Ok(args[0].as_pair()?.1.clone())
        }),
        predicate("is_null", |v| matches!(v, Value::Nil)),
        predicate("is_pair", |v| matches!(v, Value::Pair(_))),
        predicate("is_number", |v| matches!(v, Value::Number(_))),
        predicate("is_boolean", |v| matches!(v, Value::Bool(_))),
        predicate("is_string", |v| matches!(v, Value::String(_))),
        predicate("is_function", |v| {
            matches!(
                v,
                Value::CompiledProcedure(_) | Value::PrimitiveProcedure(_)
            )
        }),
        OperationEntry::primitive("error", Arity::AtLeast(1), |args| {
            let message = args
                .iter()
                .map(|arg| match arg {
                    Value::String(s) => s.to_string(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(" ");
            Err(Error::Native(message))
        }),
    ]
}

/// `===`: pairs compare by identity, everything else by value.
fn strict_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Pair(x), Value::Pair(y)) => Arc::ptr_eq(x, y),
        _ => a == b,
    }
}

fn numeric(
    name: &'static str,
    f: impl Fn(f64, f64) -> Result<f64> + Send + Sync + 'static,
) -> OperationEntry {
    OperationEntry::primitive(name, Arity::Exact(2), move |args| {
        Ok(Value::Number(f(args[0].as_number()?, args[1].as_number()?)?))
    })
}

fn math(name: &'static str, f: fn(f64) -> f64) -> OperationEntry {
    OperationEntry::primitive(name, Arity::Exact(1), move |args| {
        Ok(Value::Number(f(args[0].as_number()?)))
    })
}

/// Numbers compare numerically, strings lexicographically.
fn comparison(name: &'static str, accept: fn(Ordering) -> bool) -> OperationEntry {
    OperationEntry::primitive(name, Arity::Exact(2), move |args| {
        let ordering = match (&args[0], &args[1]) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (a, b) => a.as_number()?.partial_cmp(&b.as_number()?),
        };
        // NaN compares false against everything.
        Ok(Value::Bool(ordering.is_some_and(accept)))
    })
}

fn predicate(name: &'static str, test: fn(&Value) -> bool) -> OperationEntry {
    OperationEntry::primitive(name, Arity::Exact(1), move |args| {
        Ok(Value::Bool(test(&args[0])))
    })
}
