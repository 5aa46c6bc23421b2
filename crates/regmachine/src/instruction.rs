//! Controller instructions as produced by a compiler, before assembly.
//!
//! A controller is a flat `Vec<Inst>`. Labels are pseudo-instructions that
//! name the position of the instruction following them; the assembler
//! strips them and resolves every name to an index.
//!
//! ```
//! use regmachine::instruction::{GotoDest, Inst, VExp};
//!
//! let controller = vec![
//!     Inst::label("loop"),
//!     Inst::assign("val", VExp::op("cons", [VExp::reg("val"), VExp::reg("argl")])),
//!     Inst::Goto(GotoDest::Label("loop".to_string())),
//! ];
//! assert_eq!(controller[1].to_string(), "(assign val (op cons) (reg val) (reg argl))");
//! ```

use std::fmt;

use crate::value::Value;

/// Value expression: an instruction operand.
#[derive(Debug, Clone, PartialEq)]
pub enum VExp {
    /// Literal value
    Const(Value),
    /// Register contents
    Reg(String),
    /// Position of a label
    Label(String),
    /// Operation application
    Op(OpExp),
}

impl VExp {
    pub fn constant(value: impl Into<Value>) -> Self {
        VExp::Const(value.into())
    }

    pub fn reg(name: &str) -> Self {
        VExp::Reg(name.to_string())
    }

    pub fn label(name: &str) -> Self {
        VExp::Label(name.to_string())
    }

    pub fn op(name: &str, operands: impl IntoIterator<Item = VExp>) -> Self {
        VExp::Op(OpExp::new(name, operands))
    }
}

/// Operation expression: `(op name) operand...`
#[derive(Debug, Clone, PartialEq)]
pub struct OpExp {
    pub op_name: String,
    pub operands: Vec<VExp>,
}

impl OpExp {
    pub fn new(op_name: &str, operands: impl IntoIterator<Item = VExp>) -> Self {
        OpExp {
            op_name: op_name.to_string(),
            operands: operands.into_iter().collect(),
        }
    }
}

/// Goto destination
#[derive(Debug, Clone, PartialEq)]
pub enum GotoDest {
    Label(String),
    /// Position held in a register (returns, calls through `val`)
    Reg(String),
}

/// Controller instruction (before assembly)
#[derive(Debug, Clone, PartialEq)]
pub enum Inst {
    /// Label marker
    Label(String),
    /// Store a value into a register
    Assign(String, VExp),
    /// Evaluate a condition into the flag
    Test(OpExp),
    /// Jump to a label if the flag is set
    Branch(String),
    /// Unconditional jump
    Goto(GotoDest),
    /// Push a register
    Save(String),
    /// Pop into a register
    Restore(String),
    /// Apply an operation for its effect only
    Perform(OpExp),
}

impl Inst {
    pub fn label(name: &str) -> Self {
        Inst::Label(name.to_string())
    }

    pub fn assign(register: &str, value: VExp) -> Self {
        Inst::Assign(register.to_string(), value)
    }

    pub fn test(op_name: &str, operands: impl IntoIterator<Item = VExp>) -> Self {
        Inst::Test(OpExp::new(op_name, operands))
    }

    pub fn branch(label: &str) -> Self {
        Inst::Branch(label.to_string())
    }

    pub fn goto_label(label: &str) -> Self {
        Inst::Goto(GotoDest::Label(label.to_string()))
    }

    pub fn goto_reg(register: &str) -> Self {
        Inst::Goto(GotoDest::Reg(register.to_string()))
    }

    pub fn save(register: &str) -> Self {
        Inst::Save(register.to_string())
    }

    pub fn restore(register: &str) -> Self {
        Inst::Restore(register.to_string())
    }

    pub fn perform(op_name: &str, operands: impl IntoIterator<Item = VExp>) -> Self {
        Inst::Perform(OpExp::new(op_name, operands))
    }
}

impl fmt::Display for VExp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VExp::Const(v) => write!(f, "(const {})", v),
            VExp::Reg(r) => write!(f, "(reg {})", r),
            VExp::Label(l) => write!(f, "(label {})", l),
            VExp::Op(op) => write!(f, "{}", op),
        }
    }
}

impl fmt::Display for OpExp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(op {})", self.op_name)?;
        for operand in &self.operands {
            write!(f, " {}", operand)?;
        }
        Ok(())
    }
}

impl fmt::Display for GotoDest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GotoDest::Label(l) => write!(f, "(label {})", l),
            GotoDest::Reg(r) => write!(f, "(reg {})", r),
        }
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inst::Label(name) => write!(f, "{}:", name),
            Inst::Assign(reg, value) => write!(f, "(assign {} {})", reg, value),
            Inst::Test(op) => write!(f, "(test {})", op),
            Inst::Branch(label) => write!(f, "(branch (label {}))", label),
            Inst::Goto(dest) => write!(f, "(goto {})", dest),
            Inst::Save(reg) => write!(f, "(save {})", reg),
            Inst::Restore(reg) => write!(f, "(restore {})", reg),
            Inst::Perform(op) => write!(f, "(perform {})", op),
        }
    }
}
