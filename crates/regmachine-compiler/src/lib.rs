//! Source compiler for the explicit-control register machine
//!
//! - [`ast`]: statement and expression trees (no parser)
//! - [`sequence`]: instruction sequences annotated with register use
//! - [`compile`]: target/linkage code generation with tail calls
//! - [`programs`]: sample programs, Newton's method among them
//!
//! [`source_machine`] puts the pieces together: it compiles a program,
//! assembles it against the Source operation table and seeds `env` with
//! the primitive environment. Starting the machine leaves the program's
//! value in `val`.

pub mod ast;
pub mod compile;
pub mod error;
pub mod programs;
pub mod sequence;

pub use ast::{BinaryOp, Expr, LogicalOp, Program, Stmt, UnaryOp};
pub use compile::{compile_program, Compiler};
pub use error::{CompileError, Result};
pub use sequence::{InstructionSeq, Linkage, Register, ALL_REGS};

use regmachine::{Machine, MachineBuilder, MachineConfig, Value};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize logging with a default filter.
///
/// `RUST_LOG` overrides the default, which is `info` everywhere and
/// `debug` for the machine and compiler.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,regmachine=debug,regmachine_compiler=debug"));

    fmt().with_env_filter(filter).with_target(false).init();
}

/// Compile `program` into a ready-to-start machine.
pub fn source_machine(program: &Program) -> Result<Machine> {
    source_machine_with_config(program, MachineConfig::default())
}

pub fn source_machine_with_config(program: &Program, config: MachineConfig) -> Result<Machine> {
    let controller = compile_program(program)?;
    let mut machine = MachineBuilder::new()
        .registers(ALL_REGS.iter().map(|reg| reg.name()))
        .operation_table(regmachine::source_operations())
        .controller(controller)
        .config(config)
        .build()?;
    machine.initialize_stack();
    let env = machine.default_top_environment()?;
    machine.set_register("env", Value::Env(env))?;
    Ok(machine)
}

/// Compile and run `program`, returning its value.
pub fn evaluate(program: &Program) -> Result<Value> {
    let mut machine = source_machine(program)?;
    machine.start()?;
    let value = machine.get_register("val")?;
    info!(
        result = %value,
        instructions = machine.instruction_count(),
        "program finished"
    );
    Ok(value)
}
