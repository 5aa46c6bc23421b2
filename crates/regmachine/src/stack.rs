//! The machine's save/restore stack, with push and depth statistics.

use std::fmt;

use crate::error::{Error, Result};
use crate::value::Value;

/// Counters collected since the last [`Stack::initialize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StackStatistics {
    pub total_pushes: usize,
    pub maximum_depth: usize,
    pub current_depth: usize,
}

impl fmt::Display for StackStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(total-pushes = {} maximum-depth = {})",
            self.total_pushes, self.maximum_depth
        )
    }
}

/// LIFO scratch storage for register contents.
#[derive(Debug, Default)]
pub struct Stack {
    data: Vec<Value>,
    pushes: usize,
    max_depth: usize,
}

impl Stack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Stack {
            data: Vec::with_capacity(capacity),
            pushes: 0,
            max_depth: 0,
        }
    }

    pub fn push(&mut self, value: Value) {
        self.data.push(value);
        self.pushes += 1;
        self.max_depth = self.max_depth.max(self.data.len());
    }

    /// Pop the most recent value; an empty stack is a machine fault.
    pub fn pop(&mut self) -> Result<Value> {
        self.data.pop().ok_or(Error::StackUnderflow)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.data.len()
    }

    /// Empty the stack and reset statistics.
    pub fn initialize(&mut self) {
        self.data.clear();
        self.pushes = 0;
        self.max_depth = 0;
    }

    pub fn statistics(&self) -> StackStatistics {
        StackStatistics {
            total_pushes: self.pushes,
            maximum_depth: self.max_depth,
            current_depth: self.data.len(),
        }
    }
}
