//! Operation table.
//!
//! The table maps operation names to native functions. It is the seam
//! between the engine and a language runtime: controller instructions name
//! operations with `(op name)`, the assembler resolves each name to an
//! [`OpId`] once, and execution indexes straight into the table.
//!
//! Entries come in two kinds. [`OpKind::Machine`] entries are called by
//! controller instructions (environment operations, list construction,
//! closure accessors). [`OpKind::Primitive`] entries are Source-level
//! functions that programs reach through `PrimitiveProcedure` values bound
//! in the default top-level environment.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::value::{EnvId, Value};
use regmachine_common::Frames;

/// Index of an entry in an [`OperationTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpId(u32);

impl OpId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Number of arguments an operation accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    /// Inclusive bounds.
    Range(usize, usize),
}

impl Arity {
    pub fn accepts(self, got: usize) -> bool {
        match self {
            Arity::Exact(n) => got == n,
            Arity::AtLeast(n) => got >= n,
            Arity::Range(lo, hi) => (lo..=hi).contains(&got),
        }
    }

    /// Fail with [`Error::ArityMismatch`] unless `got` is accepted.
    pub fn check(self, name: &str, got: usize) -> Result<()> {
        if self.accepts(got) {
            Ok(())
        } else {
            Err(Error::ArityMismatch {
                name: name.to_string(),
                expected: self,
                got,
            })
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "exactly {}", n),
            Arity::AtLeast(n) => write!(f, "at least {}", n),
            Arity::Range(lo, hi) => write!(f, "{} to {}", lo, hi),
        }
    }
}

/// Which side of the engine an entry serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// Invoked by controller instructions.
    Machine,
    /// Bound as a Source primitive procedure.
    Primitive,
}

/// Mutable machine state a native function may touch.
pub struct OpContext<'a> {
    /// Every frame of the current run.
    pub frames: &'a mut Frames<Value>,
    /// The table the running operation came from.
    pub operations: &'a OperationTable,
}

impl OpContext<'_> {
    /// Apply the primitive entry `id` to `args`, checking arity first.
    pub fn call(&mut self, id: OpId, args: &[Value]) -> Result<Value> {
        let operations = self.operations;
        operations.call(id, self, args)
    }

    /// A top-level environment binding every primitive entry of the table.
    pub fn default_top_environment(&mut self) -> Result<EnvId> {
        let env = self.frames.make_top();
        for (id, entry) in self.operations.primitives() {
            let value = Value::PrimitiveProcedure(crate::value::PrimitiveProcedure {
                name: entry.name.clone(),
                op: id,
            });
            self.frames.define(env, entry.name.clone(), value)?;
        }
        Ok(env)
    }
}

/// Native function signature shared by every entry.
pub type OpFn = Arc<dyn Fn(&mut OpContext<'_>, &[Value]) -> Result<Value> + Send + Sync>;

/// One named native function.
#[derive(Clone)]
pub struct OperationEntry {
    pub name: Arc<str>,
    pub arity: Arity,
    pub kind: OpKind,
    pub func: OpFn,
}

impl OperationEntry {
    /// An entry that needs machine state.
    pub fn new<F>(name: &str, kind: OpKind, arity: Arity, func: F) -> Self
    where
        F: Fn(&mut OpContext<'_>, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        OperationEntry {
            name: Arc::from(name),
            arity,
            kind,
            func: Arc::new(func),
        }
    }

    /// A machine operation that only looks at its arguments.
    pub fn pure<F>(name: &str, arity: Arity, func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Self::new(name, OpKind::Machine, arity, move |_, args| func(args))
    }

    /// A Source primitive procedure.
    pub fn primitive<F>(name: &str, arity: Arity, func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Self::new(name, OpKind::Primitive, arity, move |_, args| func(args))
    }
}

impl fmt::Debug for OperationEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationEntry")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Name-indexed registry of native operations, fixed once a machine is built.
#[derive(Debug, Clone, Default)]
pub struct OperationTable {
    entries: Vec<OperationEntry>,
    index: HashMap<Arc<str>, OpId>,
}

impl OperationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `entry`. A later entry with the same name replaces the earlier
    /// one but keeps its id.
    pub fn insert(&mut self, entry: OperationEntry) -> OpId {
        if let Some(&id) = self.index.get(&entry.name) {
            self.entries[id.index()] = entry;
            return id;
        }
        let id = OpId(self.entries.len() as u32);
        self.index.insert(entry.name.clone(), id);
        self.entries.push(entry);
        id
    }

    pub fn extend(&mut self, entries: impl IntoIterator<Item = OperationEntry>) {
        for entry in entries {
            self.insert(entry);
        }
    }

    pub fn resolve(&self, name: &str) -> Option<OpId> {
        self.index.get(name).copied()
    }

    pub fn entry(&self, id: OpId) -> Option<&OperationEntry> {
        self.entries.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries of kind [`OpKind::Primitive`], in insertion order.
    pub fn primitives(&self) -> impl Iterator<Item = (OpId, &OperationEntry)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.kind == OpKind::Primitive)
            .map(|(i, entry)| (OpId(i as u32), entry))
    }

    /// Invoke entry `id` after checking its arity.
    pub fn call(&self, id: OpId, ctx: &mut OpContext<'_>, args: &[Value]) -> Result<Value> {
        let entry = self
            .entry(id)
            .ok_or_else(|| Error::UnknownOperation(format!("#{}", id.index())))?;
        entry.arity.check(&entry.name, args.len())?;
        (entry.func)(ctx, args)
    }
}

impl FromIterator<OperationEntry> for OperationTable {
    fn from_iter<I: IntoIterator<Item = OperationEntry>>(iter: I) -> Self {
        let mut table = OperationTable::new();
        table.extend(iter);
        table
    }
}
