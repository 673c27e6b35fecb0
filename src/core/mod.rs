// This module serves as the central hub for eugen's core infrastructure components,
// providing building blocks shared by every stage of the EU code generator. It exports
// and organizes three subsystems: error handling (the CompileError taxonomy separating
// fatal operand/control-flow faults from the degrade-not-fail register exhaustion
// policy), the bounded general register file (first-fit bitmap allocation with a
// rolling cursor, live-interval reclaim, and the operand-to-register mapping cache),
// and live-interval analysis (per-temporary first/last reference ranges widened across
// loop bodies so reclaim never frees a register a later loop iteration still reads).

//! Core eugen infrastructure.
//!
//! Shared building blocks for the EU code generator: error types, the bounded
//! 128-entry general register file, and the live-interval analysis that lets
//! the allocator reclaim dead temporaries when the file fills up.

pub mod error;
pub mod intervals;
pub mod register_file;

// Re-export core components
pub use error::{CompileError, CompileResult};
pub use intervals::{scan_intervals, LiveIntervals};
pub use register_file::{RegisterFile, TrackedRegister, FALLBACK_GRF, GRF_COUNT};
