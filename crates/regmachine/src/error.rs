//! Machine faults.
//!
//! Every fault aborts the running `start` call and is handed back to the
//! embedder. Nothing is retried or patched over inside the engine.
//!
//! # Error Categories
//!
//! - **Assembly**: [`Error::UnknownRegister`], [`Error::UnknownOperation`],
//!   [`Error::UndefinedLabel`], [`Error::DuplicateLabel`]
//! - **Control**: [`Error::StackUnderflow`], [`Error::InvalidJump`]
//! - **Environment**: [`Error::UnboundVariable`], [`Error::UnassignedVariable`],
//!   [`Error::InvalidEnvironment`]
//! - **Application**: [`Error::ArityMismatch`], [`Error::TypeMismatch`],
//!   [`Error::Primitive`], [`Error::Native`]
//!
//! Faults raised while an instruction executes are wrapped in
//! [`Error::Fault`], which records the instruction position and text. Use
//! [`Error::root`] to get at the underlying kind.

use regmachine_common::StaleEnvironment;
use thiserror::Error;

use crate::operations::Arity;
use crate::value::Value;

/// Machine result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while assembling or running a register machine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// A register name that the machine was not built with.
    #[error("unknown register: {0}")]
    UnknownRegister(String),

    /// An operation name missing from the operation table.
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    /// A `branch`, `goto` or label operand naming a label that does not exist.
    #[error("undefined label: {0}")]
    UndefinedLabel(String),

    /// The same label appears twice in one controller.
    #[error("multiply defined label: {0}")]
    DuplicateLabel(String),

    /// `restore` executed against an empty stack.
    #[error("empty stack: restore")]
    StackUnderflow,

    /// Variable lookup exhausted the frame chain.
    #[error("unbound variable: {0}")]
    UnboundVariable(String),

    /// The binding exists but still holds the unassigned sentinel.
    #[error("unassigned variable: {0}")]
    UnassignedVariable(String),

    /// Wrong number of arguments to an operation, primitive or procedure.
    #[error("{name}: expected {expected} arguments, got {got}")]
    ArityMismatch {
        /// What was applied.
        name: String,
        /// Accepted argument counts.
        expected: Arity,
        /// Number of arguments supplied.
        got: usize,
    },

    /// An operation received a value with the wrong tag.
    #[error("type mismatch: expected {expected}, got {found}")]
    TypeMismatch {
        /// Tag the operation wanted.
        expected: &'static str,
        /// Rendering of the value it got.
        found: String,
    },

    /// A native primitive failed; wraps the underlying cause with its name.
    #[error("primitive {name} failed: {source}")]
    Primitive {
        /// Name of the primitive procedure.
        name: String,
        /// What the native implementation raised.
        #[source]
        source: Box<Error>,
    },

    /// Failure raised by a native implementation itself.
    #[error("{0}")]
    Native(String),

    /// An environment handle from another machine or an earlier run.
    #[error("environment does not belong to this machine run")]
    InvalidEnvironment,

    /// `goto` through a register that does not hold an instruction position.
    #[error("goto target is not an instruction position: {0}")]
    InvalidJump(String),

    /// Any of the above, raised by the instruction at `pc`.
    #[error("at instruction {pc} `{instruction}`: {source}")]
    Fault {
        /// Position of the failing instruction.
        pc: usize,
        /// Rendered instruction text.
        instruction: String,
        /// The fault itself.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// The fault with every [`Error::Fault`] wrapper removed.
    #[must_use]
    pub fn root(&self) -> &Error {
        match self {
            Error::Fault { source, .. } => source.root(),
            other => other,
        }
    }

    /// Build a [`Error::TypeMismatch`] for `found`.
    #[must_use]
    pub fn type_mismatch(expected: &'static str, found: &Value) -> Self {
        Error::TypeMismatch {
            expected,
            found: format!("{} {}", found.type_name(), found),
        }
    }

    /// Build a [`Error::Native`] from any message.
    #[must_use]
    pub fn native(message: impl Into<String>) -> Self {
        Error::Native(message.into())
    }
}

impl From<StaleEnvironment> for Error {
    fn from(_: StaleEnvironment) -> Self {
        Error::InvalidEnvironment
    }
}
