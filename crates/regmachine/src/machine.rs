//! Assembler and execution engine.
//!
//! # Architecture
//!
//! - **Assembler**: turns a controller (`Vec<Inst>`) into resolved
//!   instructions. Labels become positions, register names become indices,
//!   operation names become [`OpId`]s.
//! - **Machine**: owns the registers, stack, operation table and frame
//!   arena, and runs the fetch-execute loop.
//!
//! # Memory Model
//!
//! ```text
//! Machine (owns all state)
//!   ├── registers: Vec<Value> (indexed; pc and flag live in their own fields)
//!   ├── stack: Stack (Vec<Value> + statistics)
//!   ├── frames: Frames<Value> (every environment of the current run)
//!   ├── instructions: Arc<[Resolved]> (immutable after assembly)
//!   ├── operations: OperationTable
//!   ├── pc: usize
//!   └── flag: bool
//! ```
//!
//! # Example
//!
//! ```
//! use regmachine::instruction::{Inst, VExp};
//! use regmachine::operations::{Arity, OperationEntry};
//! use regmachine::{MachineBuilder, Value};
//!
//! let mut machine = MachineBuilder::new()
//!     .registers(["a", "b", "t"])
//!     .operation(OperationEntry::pure("=", Arity::Exact(2), |args| {
//!         Ok(Value::Bool(args[0] == args[1]))
//!     }))
//!     .operation(OperationEntry::pure("rem", Arity::Exact(2), |args| {
//!         Ok(Value::Number(args[0].as_number()? % args[1].as_number()?))
//!     }))
//!     .controller(vec![
//!         Inst::label("test-b"),
//!         Inst::test("=", [VExp::reg("b"), VExp::constant(0.0)]),
//!         Inst::branch("gcd-done"),
//!         Inst::assign("t", VExp::op("rem", [VExp::reg("a"), VExp::reg("b")])),
//!         Inst::assign("a", VExp::reg("b")),
//!         Inst::assign("b", VExp::reg("t")),
//!         Inst::goto_label("test-b"),
//!         Inst::label("gcd-done"),
//!     ])
//!     .build()?;
//!
//! machine.set_register("a", Value::Number(206.0))?;
//! machine.set_register("b", Value::Number(40.0))?;
//! machine.start()?;
//! assert_eq!(machine.get_register("a")?, Value::Number(2.0));
//! # Ok::<(), regmachine::Error>(())
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use regmachine_common::Frames;
use tracing::{debug, instrument, trace};

use crate::config::MachineConfig;
use crate::error::{Error, Result};
use crate::instruction::{GotoDest, Inst, OpExp, VExp};
use crate::operations::{OpContext, OpId, OperationEntry, OperationTable};
use crate::stack::{Stack, StackStatistics};
use crate::value::{EnvId, Value};

/// Register index of the program counter.
const PC: usize = 0;
/// Register index of the test flag.
const FLAG: usize = 1;

// ============================================================================
// Resolved Instructions
// ============================================================================

#[derive(Debug, Clone)]
enum Operand {
    Const(Value),
    Reg(usize),
    Label(usize),
    Op(OpCall),
}

#[derive(Debug, Clone)]
struct OpCall {
    target: OpTarget,
    operands: Vec<Operand>,
}

#[derive(Debug, Clone)]
enum OpTarget {
    Resolved(OpId),
    /// Left unresolved when operations are not checked at construction.
    Missing(String),
}

#[derive(Debug, Clone)]
enum Resolved {
    Assign { target: usize, value: Operand },
    Test { condition: OpCall },
    Branch { destination: usize },
    Goto { destination: Destination },
    Save { reg: usize },
    Restore { reg: usize },
    Perform { action: OpCall },
}

#[derive(Debug, Clone, Copy)]
enum Destination {
    Label(usize),
    Reg(usize),
}

// ============================================================================
// Machine
// ============================================================================

/// Register machine
pub struct Machine {
    /// Register storage (indexed by register index)
    registers: Vec<Value>,
    /// Register name to index mapping
    register_map: HashMap<String, usize>,
    stack: Stack,
    pc: usize,
    flag: bool,
    instructions: Arc<[Resolved]>,
    /// Controller text with labels stripped, for diagnostics
    source: Arc<[Inst]>,
    operations: OperationTable,
    frames: Frames<Value>,
    instruction_count: usize,
    config: MachineConfig,
}

impl Machine {
    /// Run from the first instruction until the position passes the end.
    ///
    /// Registers, stack and frames are left as they are, so callers seed
    /// them beforehand and read `val` afterwards.
    #[instrument(skip(self))]
    pub fn start(&mut self) -> Result<()> {
        self.pc = 0;
        self.instruction_count = 0;
        while self.step()? {}
        let stats = self.stack.statistics();
        debug!(
            instructions = self.instruction_count,
            total_pushes = stats.total_pushes,
            maximum_depth = stats.maximum_depth,
            "machine halted"
        );
        Ok(())
    }

    /// Execute the instruction at the current position. Returns `false`
    /// once the machine has halted.
    pub fn step(&mut self) -> Result<bool> {
        let pc = self.pc;
        if pc >= self.instructions.len() {
            return Ok(false);
        }
        if self.config.trace_instructions {
            trace!(pc, instruction = %self.source[pc], "execute");
        }
        self.instruction_count += 1;

        let instructions = Arc::clone(&self.instructions);
        if let Err(err) = self.execute_instruction(&instructions[pc]) {
            debug!(pc, error = %err, "machine fault");
            return Err(Error::Fault {
                pc,
                instruction: self.source[pc].to_string(),
                source: Box::new(err),
            });
        }
        Ok(self.pc < self.instructions.len())
    }

    pub fn is_halted(&self) -> bool {
        self.pc >= self.instructions.len()
    }

    fn execute_instruction(&mut self, inst: &Resolved) -> Result<()> {
        match inst {
            Resolved::Assign { target, value } => {
                let value = self.eval(value)?;
                if *target == PC {
                    return self.jump(&value);
                }
                self.write_register(*target, value);
                self.pc += 1;
            }
            Resolved::Test { condition } => {
                let result = self.call(condition)?;
                self.flag = !result.is_false();
                self.pc += 1;
            }
            Resolved::Branch { destination } => {
                if self.flag {
                    self.pc = *destination;
                } else {
                    self.pc += 1;
                }
            }
            Resolved::Goto { destination } => match *destination {
                Destination::Label(dest) => self.pc = dest,
                Destination::Reg(reg) => {
                    let target = self.read_register(reg);
                    self.jump(&target)?;
                }
            },
            Resolved::Save { reg } => {
                let value = self.read_register(*reg);
                self.stack.push(value);
                self.pc += 1;
            }
            Resolved::Restore { reg } => {
                let value = self.stack.pop()?;
                if *reg == PC {
                    return self.jump(&value);
                }
                self.write_register(*reg, value);
                self.pc += 1;
            }
            Resolved::Perform { action } => {
                self.call(action)?;
                self.pc += 1;
            }
        }
        Ok(())
    }

    fn jump(&mut self, target: &Value) -> Result<()> {
        match target {
            Value::Label(ip) if *ip <= self.instructions.len() => {
                self.pc = *ip;
                Ok(())
            }
            other => Err(Error::InvalidJump(other.to_string())),
        }
    }

    fn eval(&mut self, operand: &Operand) -> Result<Value> {
        match operand {
            Operand::Const(v) => Ok(v.clone()),
            Operand::Reg(idx) => Ok(self.read_register(*idx)),
            Operand::Label(ip) => Ok(Value::Label(*ip)),
            Operand::Op(call) => self.call(call),
        }
    }

    fn call(&mut self, call: &OpCall) -> Result<Value> {
        let args = call
            .operands
            .iter()
            .map(|operand| self.eval(operand))
            .collect::<Result<Vec<_>>>()?;
        let id = match &call.target {
            OpTarget::Resolved(id) => *id,
            OpTarget::Missing(name) => return Err(Error::UnknownOperation(name.clone())),
        };
        let mut ctx = OpContext {
            frames: &mut self.frames,
            operations: &self.operations,
        };
        self.operations.call(id, &mut ctx, &args)
    }

    fn read_register(&self, idx: usize) -> Value {
        match idx {
            PC => Value::Label(self.pc),
            FLAG => Value::Bool(self.flag),
            _ => self.registers[idx].clone(),
        }
    }

    fn write_register(&mut self, idx: usize, value: Value) {
        match idx {
            FLAG => self.flag = !value.is_false(),
            _ => self.registers[idx] = value,
        }
    }

    fn register_index(&self, name: &str) -> Result<usize> {
        self.register_map
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownRegister(name.to_string()))
    }

    /// Get register value by name
    pub fn get_register(&self, name: &str) -> Result<Value> {
        Ok(self.read_register(self.register_index(name)?))
    }

    /// Set register value by name
    pub fn set_register(&mut self, name: &str, value: Value) -> Result<()> {
        let idx = self.register_index(name)?;
        if idx == PC {
            return self.jump(&value);
        }
        self.write_register(idx, value);
        Ok(())
    }

    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub fn pop(&mut self) -> Result<Value> {
        self.stack.pop()
    }

    /// Empty the stack and reset its statistics.
    pub fn initialize_stack(&mut self) {
        self.stack.initialize();
    }

    /// Return to the freshly built state: every register unassigned, the
    /// stack empty and every environment of the previous run released.
    /// Environment handles from before the reset are rejected afterwards.
    pub fn reset(&mut self) {
        self.registers.fill(Value::Unassigned);
        self.pc = 0;
        self.flag = false;
        self.instruction_count = 0;
        self.stack.initialize();
        self.frames.clear();
    }

    /// A new empty top-level environment.
    pub fn make_top_environment(&mut self) -> EnvId {
        self.frames.make_top()
    }

    /// A new top-level environment binding every primitive in the table.
    pub fn default_top_environment(&mut self) -> Result<EnvId> {
        let mut ctx = OpContext {
            frames: &mut self.frames,
            operations: &self.operations,
        };
        ctx.default_top_environment()
    }

    pub fn stack_statistics(&self) -> StackStatistics {
        self.stack.statistics()
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.depth()
    }

    /// Instructions executed since the last `start`.
    pub fn instruction_count(&self) -> usize {
        self.instruction_count
    }

    pub fn frames(&self) -> &Frames<Value> {
        &self.frames
    }

    pub fn operations(&self) -> &OperationTable {
        &self.operations
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("pc", &self.pc)
            .field("flag", &self.flag)
            .field("instructions", &self.instructions.len())
            .field("stack_depth", &self.stack.depth())
            .field("frames", &self.frames.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Assembler
// ============================================================================

struct Assembler<'a> {
    labels: HashMap<String, usize>,
    register_map: &'a HashMap<String, usize>,
    operations: &'a OperationTable,
    check_operations: bool,
}

/// Assemble controller text into executable instructions
fn assemble(
    controller: Vec<Inst>,
    register_map: &HashMap<String, usize>,
    operations: &OperationTable,
    check_operations: bool,
) -> Result<(Vec<Resolved>, Vec<Inst>)> {
    // Pass 1: positions of labels
    let (insts, labels) = extract_labels(controller)?;

    // Pass 2: resolve names
    let assembler = Assembler {
        labels,
        register_map,
        operations,
        check_operations,
    };
    let resolved = insts
        .iter()
        .filter_map(|inst| assembler.resolve_instruction(inst).transpose())
        .collect::<Result<Vec<_>>>()?;
    Ok((resolved, insts))
}

fn extract_labels(text: Vec<Inst>) -> Result<(Vec<Inst>, HashMap<String, usize>)> {
    let mut instructions = Vec::with_capacity(text.len());
    let mut labels = HashMap::new();

    for inst in text {
        match inst {
            Inst::Label(name) => {
                if labels.contains_key(&name) {
                    return Err(Error::DuplicateLabel(name));
                }
                labels.insert(name, instructions.len());
            }
            _ => instructions.push(inst),
        }
    }

    Ok((instructions, labels))
}

impl Assembler<'_> {
    fn resolve_instruction(&self, inst: &Inst) -> Result<Option<Resolved>> {
        Ok(Some(match inst {
            Inst::Assign(reg, value) => Resolved::Assign {
                target: self.register(reg)?,
                value: self.operand(value)?,
            },
            Inst::Test(op) => Resolved::Test {
                condition: self.op_call(op)?,
            },
            Inst::Branch(label) => Resolved::Branch {
                destination: self.label(label)?,
            },
            Inst::Goto(GotoDest::Label(label)) => Resolved::Goto {
                destination: Destination::Label(self.label(label)?),
            },
            Inst::Goto(GotoDest::Reg(reg)) => Resolved::Goto {
                destination: Destination::Reg(self.register(reg)?),
            },
            Inst::Save(reg) => Resolved::Save {
                reg: self.register(reg)?,
            },
            Inst::Restore(reg) => Resolved::Restore {
                reg: self.register(reg)?,
            },
            Inst::Perform(op) => Resolved::Perform {
                action: self.op_call(op)?,
            },
            Inst::Label(_) => return Ok(None),
        }))
    }

    fn operand(&self, exp: &VExp) -> Result<Operand> {
        Ok(match exp {
            VExp::Const(v) => Operand::Const(v.clone()),
            VExp::Reg(name) => Operand::Reg(self.register(name)?),
            VExp::Label(name) => Operand::Label(self.label(name)?),
            VExp::Op(op) => Operand::Op(self.op_call(op)?),
        })
    }

    fn op_call(&self, op: &OpExp) -> Result<OpCall> {
        let target = match self.operations.resolve(&op.op_name) {
            Some(id) => OpTarget::Resolved(id),
            None if self.check_operations => {
                return Err(Error::UnknownOperation(op.op_name.clone()))
            }
            None => OpTarget::Missing(op.op_name.clone()),
        };
        let operands = op
            .operands
            .iter()
            .map(|exp| self.operand(exp))
            .collect::<Result<Vec<_>>>()?;
        Ok(OpCall { target, operands })
    }

    fn register(&self, name: &str) -> Result<usize> {
        self.register_map
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownRegister(name.to_string()))
    }

    fn label(&self, name: &str) -> Result<usize> {
        self.labels
            .get(name)
            .copied()
            .ok_or_else(|| Error::UndefinedLabel(name.to_string()))
    }
}

// ============================================================================
// Machine Builder
// ============================================================================

/// Builder for constructing machines
#[derive(Debug)]
pub struct MachineBuilder {
    register_names: Vec<String>,
    operations: OperationTable,
    controller: Vec<Inst>,
    config: MachineConfig,
}

impl MachineBuilder {
    /// A builder with only `pc` and `flag` declared.
    pub fn new() -> Self {
        MachineBuilder {
            register_names: vec!["pc".to_string(), "flag".to_string()],
            operations: OperationTable::new(),
            controller: Vec::new(),
            config: MachineConfig::default(),
        }
    }

    /// Declare a register. Declaring a name twice has no effect.
    pub fn register(mut self, name: &str) -> Self {
        if !self.register_names.iter().any(|existing| existing == name) {
            self.register_names.push(name.to_string());
        }
        self
    }

    pub fn registers<'n>(self, names: impl IntoIterator<Item = &'n str>) -> Self {
        names.into_iter().fold(self, |builder, name| builder.register(name))
    }

    pub fn operation(mut self, entry: OperationEntry) -> Self {
        self.operations.insert(entry);
        self
    }

    /// Add every entry of `entries`; later names replace earlier ones.
    pub fn operations(mut self, entries: impl IntoIterator<Item = OperationEntry>) -> Self {
        self.operations.extend(entries);
        self
    }

    /// Replace the operation table wholesale.
    pub fn operation_table(mut self, table: OperationTable) -> Self {
        self.operations = table;
        self
    }

    pub fn controller(mut self, controller: Vec<Inst>) -> Self {
        self.controller = controller;
        self
    }

    pub fn config(mut self, config: MachineConfig) -> Self {
        self.config = config;
        self
    }

    /// Assemble the controller and build the machine.
    pub fn build(self) -> Result<Machine> {
        let register_map: HashMap<String, usize> = self
            .register_names
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.clone(), idx))
            .collect();

        let (instructions, source) = assemble(
            self.controller,
            &register_map,
            &self.operations,
            self.config.check_operations,
        )?;
        debug!(
            instructions = instructions.len(),
            registers = register_map.len(),
            operations = self.operations.len(),
            "assembled machine"
        );

        Ok(Machine {
            registers: vec![Value::Unassigned; self.register_names.len()],
            register_map,
            stack: Stack::with_capacity(self.config.stack_capacity),
            pc: 0,
            flag: false,
            instructions: instructions.into(),
            source: source.into(),
            operations: self.operations,
            frames: Frames::new(),
            instruction_count: 0,
            config: self.config,
        })
    }
}

impl Default for MachineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a machine with the default configuration.
pub fn make_machine(
    register_names: &[&str],
    operations: OperationTable,
    controller: Vec<Inst>,
) -> Result<Machine> {
    MachineBuilder::new()
        .operation_table(operations)
        .registers(register_names.iter().copied())
        .controller(controller)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::Arity;

    fn arithmetic() -> OperationTable {
        [
            OperationEntry::pure("=", Arity::Exact(2), |args| {
                Ok(Value::Bool(args[0] == args[1]))
            }),
            OperationEntry::pure("<", Arity::Exact(2), |args| {
                Ok(Value::Bool(args[0].as_number()? < args[1].as_number()?))
            }),
            OperationEntry::pure("+", Arity::Exact(2), |args| {
                Ok(Value::Number(args[0].as_number()? + args[1].as_number()?))
            }),
            OperationEntry::pure("-", Arity::Exact(2), |args| {
                Ok(Value::Number(args[0].as_number()? - args[1].as_number()?))
            }),
            OperationEntry::pure("*", Arity::Exact(2), |args| {
                Ok(Value::Number(args[0].as_number()? * args[1].as_number()?))
            }),
            OperationEntry::pure("rem", Arity::Exact(2), |args| {
                Ok(Value::Number(args[0].as_number()? % args[1].as_number()?))
            }),
        ]
        .into_iter()
        .collect()
    }

    fn n(x: f64) -> VExp {
        VExp::constant(x)
    }

    #[test]
    fn test_simple_gcd_machine() {
        let mut machine = make_machine(
            &["a", "b", "t"],
            arithmetic(),
            vec![
                Inst::label("test-b"),
                Inst::test("=", [VExp::reg("b"), n(0.0)]),
                Inst::branch("gcd-done"),
                Inst::assign("t", VExp::op("rem", [VExp::reg("a"), VExp::reg("b")])),
                Inst::assign("a", VExp::reg("b")),
                Inst::assign("b", VExp::reg("t")),
                Inst::goto_label("test-b"),
                Inst::label("gcd-done"),
            ],
        )
        .unwrap();

        machine.set_register("a", Value::Number(206.0)).unwrap();
        machine.set_register("b", Value::Number(40.0)).unwrap();
        machine.start().unwrap();

        assert_eq!(machine.get_register("a"), Ok(Value::Number(2.0)));
        assert!(machine.instruction_count() > 0);
        assert!(machine.is_halted());
    }

    fn factorial_controller() -> Vec<Inst> {
        vec![
            Inst::assign("continue", VExp::label("fact-done")),
            Inst::label("fact-loop"),
            Inst::test("=", [VExp::reg("n"), n(1.0)]),
            Inst::branch("base-case"),
            Inst::save("continue"),
            Inst::save("n"),
            Inst::assign("n", VExp::op("-", [VExp::reg("n"), n(1.0)])),
            Inst::assign("continue", VExp::label("after-fact")),
            Inst::goto_label("fact-loop"),
            Inst::label("after-fact"),
            Inst::restore("n"),
            Inst::restore("continue"),
            Inst::assign("val", VExp::op("*", [VExp::reg("n"), VExp::reg("val")])),
            Inst::goto_reg("continue"),
            Inst::label("base-case"),
            Inst::assign("val", n(1.0)),
            Inst::goto_reg("continue"),
            Inst::label("fact-done"),
        ]
    }

    #[test]
    fn test_factorial_machine() {
        let mut machine =
            make_machine(&["n", "val", "continue"], arithmetic(), factorial_controller())
                .unwrap();

        machine.set_register("n", Value::Number(5.0)).unwrap();
        machine.start().unwrap();
        assert_eq!(machine.get_register("val"), Ok(Value::Number(120.0)));

        // For n=5: 2*(n-1) pushes, all outstanding at the deepest point
        let stats = machine.stack_statistics();
        assert_eq!(stats.total_pushes, 8);
        assert_eq!(stats.maximum_depth, 8);
        assert_eq!(stats.current_depth, 0);
    }

    #[test]
    fn test_restart_after_initialize_stack() {
        let mut machine =
            make_machine(&["n", "val", "continue"], arithmetic(), factorial_controller())
                .unwrap();

        machine.set_register("n", Value::Number(5.0)).unwrap();
        machine.start().unwrap();
        let first_count = machine.instruction_count();

        machine.initialize_stack();
        machine.set_register("n", Value::Number(3.0)).unwrap();
        machine.start().unwrap();
        assert_eq!(machine.get_register("val"), Ok(Value::Number(6.0)));
        assert_eq!(machine.stack_statistics().total_pushes, 4);
        assert!(machine.instruction_count() < first_count);
    }

    #[test]
    fn test_fibonacci_machine() {
        let mut machine = make_machine(
            &["n", "val", "continue"],
            arithmetic(),
            vec![
                Inst::assign("continue", VExp::label("fib-done")),
                Inst::label("fib-loop"),
                Inst::test("<", [VExp::reg("n"), n(2.0)]),
                Inst::branch("immediate-answer"),
                Inst::save("continue"),
                Inst::assign("continue", VExp::label("afterfib-n-1")),
                Inst::save("n"),
                Inst::assign("n", VExp::op("-", [VExp::reg("n"), n(1.0)])),
                Inst::goto_label("fib-loop"),
                Inst::label("afterfib-n-1"),
                Inst::restore("n"),
                Inst::save("val"),
                Inst::assign("n", VExp::op("-", [VExp::reg("n"), n(2.0)])),
                Inst::assign("continue", VExp::label("afterfib-n-2")),
                Inst::goto_label("fib-loop"),
                Inst::label("afterfib-n-2"),
                Inst::assign("n", VExp::reg("val")),
                Inst::restore("val"),
                Inst::restore("continue"),
                Inst::assign("val", VExp::op("+", [VExp::reg("val"), VExp::reg("n")])),
                Inst::goto_reg("continue"),
                Inst::label("immediate-answer"),
                Inst::assign("val", VExp::reg("n")),
                Inst::goto_reg("continue"),
                Inst::label("fib-done"),
            ],
        )
        .unwrap();

        machine.set_register("n", Value::Number(10.0)).unwrap();
        machine.start().unwrap();
        assert_eq!(machine.get_register("val"), Ok(Value::Number(55.0)));
    }

    #[test]
    fn test_tail_loop_keeps_stack_depth() {
        // Counts n down to zero, jumping back through a register each time.
        let mut machine = make_machine(
            &["n", "continue"],
            arithmetic(),
            vec![
                Inst::label("loop"),
                Inst::test("=", [VExp::reg("n"), n(0.0)]),
                Inst::branch("done"),
                Inst::assign("n", VExp::op("-", [VExp::reg("n"), n(1.0)])),
                Inst::assign("continue", VExp::label("loop")),
                Inst::goto_reg("continue"),
                Inst::label("done"),
            ],
        )
        .unwrap();

        machine.push(Value::string("sentinel"));
        let before = machine.stack_depth();
        machine.set_register("n", Value::Number(10_000.0)).unwrap();
        machine.start().unwrap();

        assert_eq!(machine.get_register("n"), Ok(Value::Number(0.0)));
        assert_eq!(machine.stack_depth(), before);
        assert_eq!(machine.stack_statistics().maximum_depth, before);
    }

    #[test]
    fn test_save_restore_preserves_register() {
        let mut machine = make_machine(
            &["a"],
            OperationTable::new(),
            vec![Inst::save("a"), Inst::restore("a")],
        )
        .unwrap();

        machine.set_register("a", Value::string("kept")).unwrap();
        machine.start().unwrap();
        assert_eq!(machine.get_register("a"), Ok(Value::string("kept")));
        assert_eq!(machine.stack_depth(), 0);
        assert_eq!(machine.stack_statistics().total_pushes, 1);
    }

    #[test]
    fn test_restore_on_empty_stack_faults() {
        let mut machine = make_machine(
            &["a"],
            OperationTable::new(),
            vec![Inst::assign("a", n(1.0)), Inst::restore("a")],
        )
        .unwrap();

        let err = machine.start().unwrap_err();
        assert_eq!(err.root(), &Error::StackUnderflow);
        assert!(matches!(err, Error::Fault { pc: 1, ref instruction, .. } if instruction == "(restore a)"));
    }

    #[test]
    fn test_duplicate_label_detection() {
        let err = make_machine(
            &["a"],
            OperationTable::new(),
            vec![
                Inst::label("start"),
                Inst::assign("a", n(3.0)),
                Inst::label("start"),
            ],
        )
        .unwrap_err();
        assert_eq!(err, Error::DuplicateLabel("start".to_string()));
    }

    #[test]
    fn test_undefined_label_detection() {
        let err = make_machine(&[], OperationTable::new(), vec![Inst::goto_label("nowhere")])
            .unwrap_err();
        assert_eq!(err, Error::UndefinedLabel("nowhere".to_string()));
    }

    #[test]
    fn test_unknown_register() {
        let err = make_machine(&["a"], OperationTable::new(), vec![Inst::save("b")]).unwrap_err();
        assert_eq!(err, Error::UnknownRegister("b".to_string()));

        let mut machine = make_machine(&["a"], OperationTable::new(), vec![]).unwrap();
        assert_eq!(
            machine.get_register("val"),
            Err(Error::UnknownRegister("val".to_string()))
        );
        assert_eq!(
            machine.set_register("val", Value::Nil),
            Err(Error::UnknownRegister("val".to_string()))
        );
    }

    #[test]
    fn test_unknown_operation_checked_eagerly() {
        let err = make_machine(
            &["a"],
            OperationTable::new(),
            vec![Inst::assign("a", VExp::op("frobnicate", []))],
        )
        .unwrap_err();
        assert_eq!(err, Error::UnknownOperation("frobnicate".to_string()));
    }

    #[test]
    fn test_unknown_operation_fails_lazily_when_unchecked() {
        let config = MachineConfig {
            check_operations: false,
            ..MachineConfig::default()
        };
        let mut machine = MachineBuilder::new()
            .register("a")
            .config(config)
            .controller(vec![
                Inst::assign("a", n(1.0)),
                Inst::assign("a", VExp::op("frobnicate", [VExp::reg("a")])),
            ])
            .build()
            .unwrap();

        let err = machine.start().unwrap_err();
        assert_eq!(err.root(), &Error::UnknownOperation("frobnicate".to_string()));
        // The first instruction ran before the fault.
        assert_eq!(machine.get_register("a"), Ok(Value::Number(1.0)));
    }

    #[test]
    fn test_goto_non_label_is_invalid_jump() {
        let mut machine = make_machine(
            &["continue"],
            OperationTable::new(),
            vec![Inst::assign("continue", n(4.0)), Inst::goto_reg("continue")],
        )
        .unwrap();

        let err = machine.start().unwrap_err();
        assert_eq!(err.root(), &Error::InvalidJump("4".to_string()));
    }

    #[test]
    fn test_instruction_counting() {
        let mut machine = make_machine(
            &["a"],
            arithmetic(),
            vec![
                Inst::assign("a", n(0.0)),
                Inst::assign("a", VExp::op("+", [VExp::reg("a"), n(1.0)])),
                Inst::assign("a", VExp::op("+", [VExp::reg("a"), n(1.0)])),
            ],
        )
        .unwrap();

        machine.start().unwrap();
        assert_eq!(machine.instruction_count(), 3);
        assert_eq!(machine.get_register("a"), Ok(Value::Number(2.0)));
    }

    #[test]
    fn test_step_runs_one_instruction() {
        let mut machine = make_machine(
            &["a"],
            arithmetic(),
            vec![
                Inst::assign("a", n(0.0)),
                Inst::assign("a", VExp::op("+", [VExp::reg("a"), n(1.0)])),
            ],
        )
        .unwrap();

        assert_eq!(machine.step(), Ok(true));
        assert_eq!(machine.get_register("a"), Ok(Value::Number(0.0)));
        assert_eq!(machine.step(), Ok(false));
        assert_eq!(machine.get_register("a"), Ok(Value::Number(1.0)));
        assert_eq!(machine.step(), Ok(false));
        assert_eq!(machine.instruction_count(), 2);
    }

    #[test]
    fn test_flag_register_reflects_tests() {
        let mut machine = make_machine(
            &["a"],
            arithmetic(),
            vec![Inst::test("=", [n(1.0), n(1.0)])],
        )
        .unwrap();
        machine.start().unwrap();
        assert_eq!(machine.get_register("flag"), Ok(Value::Bool(true)));
        assert_eq!(machine.get_register("pc"), Ok(Value::Label(1)));
    }

    #[test]
    fn test_reset_releases_environments() {
        let mut machine = make_machine(&["env"], OperationTable::new(), vec![]).unwrap();
        let env = machine.make_top_environment();
        machine.set_register("env", Value::Env(env)).unwrap();
        assert_eq!(machine.frames().len(), 1);

        machine.reset();
        assert_eq!(machine.get_register("env"), Ok(Value::Unassigned));
        assert!(machine.frames().is_empty());
        assert!(machine.frames().frame(env).is_err());
    }

    #[test]
    fn test_default_top_environment_binds_primitives_only() {
        let mut machine = make_machine(&["env"], crate::source_operations(), vec![]).unwrap();
        let env = machine.default_top_environment().unwrap();

        let plus = machine.frames().lookup(env, "+").unwrap();
        assert!(matches!(plus, Some(Value::PrimitiveProcedure(p)) if &*p.name == "+"));
        // machine operations are not visible to Source code
        assert_eq!(machine.frames().lookup(env, "cons").unwrap(), None);
    }
}
