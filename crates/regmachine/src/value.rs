//! Machine values.
//!
//! Everything a register, the stack or a frame can hold is a [`Value`]:
//! Source data, closures, primitives, environments and instruction
//! positions alike. Values are cheap to clone; strings and pairs share
//! their payload through `Arc`, environments are arena handles.

use std::fmt;
use std::mem;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::operations::OpId;

/// Environment handle: the innermost frame of a chain.
pub type EnvId = regmachine_common::EnvId<Value>;

/// A Source closure: where its body starts and the environment it captured.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompiledProcedure {
    /// Instruction position of the procedure body.
    pub entry: usize,
    /// Environment the procedure was created in.
    pub env: EnvId,
}

/// A native function exposed to Source code by name.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimitiveProcedure {
    /// Name the primitive is bound to.
    pub name: Arc<str>,
    /// Operation-table entry implementing it.
    pub op: OpId,
}

/// A cons cell: `.0` is the head, `.1` the tail.
#[derive(Debug)]
pub struct Cons(pub Value, pub Value);

/// Unlinks nested cells into a worklist so that dropping a long list does
/// not recurse once per element.
impl Drop for Cons {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        detach_pair(&mut self.0, &mut pending);
        detach_pair(&mut self.1, &mut pending);
        while let Some(cell) = pending.pop() {
            // Cells still shared elsewhere are left to their other owners.
            if let Ok(mut cell) = Arc::try_unwrap(cell) {
                detach_pair(&mut cell.0, &mut pending);
                detach_pair(&mut cell.1, &mut pending);
            }
        }
    }
}

fn detach_pair(slot: &mut Value, pending: &mut Vec<Arc<Cons>>) {
    if matches!(slot, Value::Pair(_)) {
        if let Value::Pair(cell) = mem::replace(slot, Value::Nil) {
            pending.push(cell);
        }
    }
}

/// Values that can be stored in registers, on the stack or in frames
#[derive(Debug, Clone)]
pub enum Value {
    /// Unassigned register or not-yet-initialized declaration
    Unassigned,
    /// Source `undefined`
    Undefined,
    Number(f64),
    Bool(bool),
    String(Arc<str>),
    /// Cons cell
    Pair(Arc<Cons>),
    /// Empty list
    Nil,
    /// Instruction position (label values, return addresses)
    Label(usize),
    CompiledProcedure(CompiledProcedure),
    PrimitiveProcedure(PrimitiveProcedure),
    Env(EnvId),
}

impl Value {
    /// The machine's notion of falsity: only `false` is false.
    pub fn is_false(&self) -> bool {
        matches!(self, Value::Bool(false))
    }

    /// Short tag name used in type errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Unassigned => "unassigned",
            Value::Undefined => "undefined",
            Value::Number(_) => "number",
            Value::Bool(_) => "boolean",
            Value::String(_) => "string",
            Value::Pair(_) => "pair",
            Value::Nil => "null",
            Value::Label(_) => "label",
            Value::CompiledProcedure(_) => "compiled procedure",
            Value::PrimitiveProcedure(_) => "primitive procedure",
            Value::Env(_) => "environment",
        }
    }

    pub fn string(s: &str) -> Self {
        Value::String(Arc::from(s))
    }

    pub fn cons(head: Value, tail: Value) -> Self {
        Value::Pair(Arc::new(Cons(head, tail)))
    }

    /// Build a proper list from `items`.
    pub fn list<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Value>,
        I::IntoIter: DoubleEndedIterator,
    {
        items
            .into_iter()
            .rev()
            .fold(Value::Nil, |tail, head| Value::cons(head, tail))
    }

    /// Collect a proper list into a vector.
    pub fn list_to_vec(&self) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        let mut current = self;
        loop {
            match current {
                Value::Nil => return Ok(items),
                Value::Pair(cell) => {
                    items.push(cell.0.clone());
                    current = &cell.1;
                }
                other => return Err(Error::type_mismatch("list", other)),
            }
        }
    }

    pub fn as_number(&self) -> Result<f64> {
        match self {
            Value::Number(n) => Ok(*n),
            other => Err(Error::type_mismatch("number", other)),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            Value::String(s) => Ok(s.as_ref()),
            other => Err(Error::type_mismatch("string", other)),
        }
    }

    pub fn as_env(&self) -> Result<EnvId> {
        match self {
            Value::Env(env) => Ok(*env),
            other => Err(Error::type_mismatch("environment", other)),
        }
    }

    pub fn as_pair(&self) -> Result<&Cons> {
        match self {
            Value::Pair(cell) => Ok(cell.as_ref()),
            other => Err(Error::type_mismatch("pair", other)),
        }
    }

    pub fn as_compiled_procedure(&self) -> Result<CompiledProcedure> {
        match self {
            Value::CompiledProcedure(p) => Ok(*p),
            other => Err(Error::type_mismatch("compiled procedure", other)),
        }
    }

    pub fn as_primitive_procedure(&self) -> Result<&PrimitiveProcedure> {
        match self {
            Value::PrimitiveProcedure(p) => Ok(p),
            other => Err(Error::type_mismatch("primitive procedure", other)),
        }
    }

    /// `[head, [head, ... tail]]`, walking the tails in a loop.
    fn write_list(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut open = 0;
        let mut current = self;
        while let Value::Pair(cell) = current {
            write!(f, "[{}, ", cell.0)?;
            open += 1;
            current = &cell.1;
        }
        write!(f, "{}", current)?;
        for _ in 0..open {
            f.write_str("]")?;
        }
        Ok(())
    }
}

/// Source prints integral numbers without a fraction.
fn write_number(f: &mut fmt::Formatter<'_>, n: f64) -> fmt::Result {
    if n.is_nan() {
        write!(f, "NaN")
    } else if n.is_infinite() {
        write!(f, "{}Infinity", if n < 0.0 { "-" } else { "" })
    } else if n == 0.0 {
        write!(f, "0")
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        write!(f, "{:.0}", n)
    } else {
        write!(f, "{}", n)
    }
}

/// Structural equality. Lists are compared along their tails iteratively;
/// identical cells short-circuit.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        let (mut a, mut b) = (self, other);
        loop {
            match (a, b) {
                (Value::Pair(x), Value::Pair(y)) => {
                    if Arc::ptr_eq(x, y) {
                        return true;
                    }
                    if x.0 != y.0 {
                        return false;
                    }
                    a = &x.1;
                    b = &y.1;
                }
                (Value::Unassigned, Value::Unassigned)
                | (Value::Undefined, Value::Undefined)
                | (Value::Nil, Value::Nil) => return true,
                (Value::Number(x), Value::Number(y)) => return x == y,
                (Value::Bool(x), Value::Bool(y)) => return x == y,
                (Value::String(x), Value::String(y)) => return x == y,
                (Value::Label(x), Value::Label(y)) => return x == y,
                (Value::CompiledProcedure(x), Value::CompiledProcedure(y)) => return x == y,
                (Value::PrimitiveProcedure(x), Value::PrimitiveProcedure(y)) => return x == y,
                (Value::Env(x), Value::Env(y)) => return x == y,
                _ => return false,
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unassigned => write!(f, "*unassigned*"),
            Value::Undefined => write!(f, "undefined"),
            Value::Number(n) => write_number(f, *n),
            Value::Bool(b) => write!(f, "{}", b),
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::Pair(_) => self.write_list(f),
            Value::Nil => write!(f, "null"),
            Value::Label(ip) => write!(f, "@{}", ip),
            Value::CompiledProcedure(p) => write!(f, "<compiled-procedure @{}>", p.entry),
            Value::PrimitiveProcedure(p) => write!(f, "<primitive {}>", p.name),
            Value::Env(env) => write!(f, "<environment {:?}>", env),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}
