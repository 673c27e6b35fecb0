//! EUGEN - GPU execution-unit code generation.
//!
//! eugen lowers a small channel-oriented shader IR into the bit-packed
//! instruction stream of a SIMD, tile-based GPU execution unit (EU). The
//! pipeline is: bounded register allocation over the 128-entry general
//! register file (with live-interval reclaim on exhaustion), per-opcode
//! instruction encoding into 128-bit records (including multi-register SEND
//! messages for the sampler, dataport, URB and math units), linearization of
//! structured control flow into patched relative jumps, and a final lossless
//! compaction pass that re-encodes eligible instructions as 64-bit records
//! and renumbers every jump field for the new byte layout.
//!
//! # Primary Usage
//!
//! ```ignore
//! use eugen::{CompileContext, CompileOptions, TargetGeneration};
//!
//! let mut ctx = CompileContext::new(TargetGeneration::Gen6, CompileOptions::default());
//! let program: Vec<u8> = ctx.compile(&ir)?;
//! ```
//!
//! # Architecture
//!
//! - [`ir`] - input IR: opcodes, swizzled operands, write masks
//! - [`gen`] - target hardware generation selector and its strategies
//! - [`core`] - shared infrastructure (errors, register file, live intervals)
//! - [`isa`] - EU ISA specific code (records, encoder, control flow, compactor)
//! - [`translate`] - the per-compilation driver

pub mod core;
pub mod gen;
pub mod ir;
pub mod isa;
pub mod translate;

// Re-export the common surface.
pub use crate::core::{CompileError, CompileResult, RegisterFile, GRF_COUNT};
pub use crate::gen::TargetGeneration;
pub use crate::ir::{DstOperand, IrInstruction, IrOp, SrcOperand, WriteMask};
pub use crate::isa::{
    CompactInstruction, FullInstruction, HardwareRegister, Instruction, InstructionStream, Opcode,
};
pub use crate::translate::{CompileContext, CompileOptions};
