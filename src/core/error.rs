// This module defines error types for the eugen compiler using the thiserror crate for
// idiomatic Rust error handling. CompileError is the main error enum covering the fatal
// failure scenarios of the pipeline: malformed operands (bad region descriptors, an
// immediate in a position the instruction word cannot encode, unknown swizzle inputs),
// IR constructs the target generation cannot express, unbalanced or over-deep control
// flow, and emission-state stack misuse. Each variant carries relevant context for
// debugging. Register-file exhaustion is deliberately absent: the allocator degrades to
// a fallback register with a one-shot warning instead of failing the compile, so running
// out of registers produces wrong-but-loadable code rather than an error. The module
// also provides CompileResult<T> as a convenience type alias for Result<T, CompileError>.

//! Error types for the eugen compiler.
//!
//! Using thiserror for more idiomatic error handling.

use thiserror::Error;

/// Main error type for EU code generation.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("Invalid operand: {reason}")]
    InvalidOperand { reason: String },

    #[error("Unsupported opcode {opcode:?} on {generation:?}")]
    UnsupportedOpcode {
        opcode: crate::ir::IrOp,
        generation: crate::gen::TargetGeneration,
    },

    #[error("Malformed control flow: {reason}")]
    MalformedControlFlow { reason: String },

    #[error("Emission state stack {action} beyond its bound")]
    StateStack { action: &'static str },
}

/// Result type alias for compile operations.
pub type CompileResult<T> = Result<T, CompileError>;
