//! Explicit-control register machine
//!
//! The engine that runs compiled Source programs:
//! - Register set and save/restore stack with statistics
//! - Arena-backed environments holding closures and primitives
//! - Operation table resolved once at assembly
//! - Fetch-execute loop where tail calls are plain register jumps
//!
//! A compiler hands over a controller (`Vec<Inst>`); the embedder builds a
//! [`Machine`] from register names, an [`OperationTable`] and that
//! controller, seeds `env`, calls [`Machine::start`] and reads `val`.

pub mod config;
pub mod error;
pub mod instruction;
pub mod machine;
pub mod operations;
pub mod ops;
pub mod primitives;
pub mod stack;
pub mod value;

pub use config::MachineConfig;
pub use error::{Error, Result};
pub use instruction::{GotoDest, Inst, OpExp, VExp};
pub use machine::{make_machine, Machine, MachineBuilder};
pub use operations::{Arity, OpContext, OpId, OpKind, OperationEntry, OperationTable};
pub use stack::StackStatistics;
pub use value::{CompiledProcedure, Cons, EnvId, PrimitiveProcedure, Value};

/// Machine operations plus the Source primitive library.
pub fn source_operations() -> OperationTable {
    ops::machine_operations()
        .into_iter()
        .chain(primitives::source_primitives())
        .collect()
}
