// This module is the hub for the EU instruction-set layer: everything that knows the
// bit layout of the hardware. It organizes the register descriptor model (files,
// types, region descriptors, immediates), the 128-bit and 64-bit instruction records
// with their field accessors, the instruction stream builder with its ambient emission
// state, the per-opcode encoder (ALU arities, math lowering, SEND message descriptor
// packing), the structured control-flow linearizer, and the lossless compaction pass.
// The split mirrors the hardware's own layering: registers describe operands, records
// hold bits, the stream owns position and ambient state, and the encoder and flow
// layers are impl blocks on the stream so every emission path shares one state model.

//! EU instruction-set encoding.
//!
//! - [`reg`] - operand descriptors: files, types, regions, immediates
//! - [`instruction`] - the 128-bit and 64-bit instruction records
//! - [`stream`] - instruction store, ambient state, operand encoding
//! - [`encode`] - per-opcode emission and SEND message descriptors
//! - [`flow`] - structured control flow lowered to patched jumps
//! - [`compact`] - the 16-byte to 8-byte compaction pass

pub mod compact;
pub mod encode;
pub mod flow;
pub mod instruction;
pub mod reg;
pub mod stream;

pub use compact::{compact_instructions, serialize};
pub use flow::FlowStacks;
pub use instruction::{CompactInstruction, FullInstruction, Instruction, Opcode};
pub use reg::HardwareRegister;
pub use stream::{InstructionHandle, InstructionStream};
