use thiserror::Error;

use crate::sequence::Register;

pub type Result<T> = std::result::Result<T, CompileError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    /// `return` outside the tail position of a function body.
    #[error("return statement outside the tail position of a function body")]
    MisplacedReturn,

    #[error("program has no statements")]
    EmptyProgram,

    /// Return linkage asked for with a result register other than `val`.
    #[error("return linkage needs target val, got {0}")]
    ReturnTarget(Register),

    /// Building or running the compiled machine failed.
    #[error(transparent)]
    Machine(#[from] regmachine::Error),
}
