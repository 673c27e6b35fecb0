// This module defines the TargetGeneration selector, the single place where hardware
// generation differences are decided. Every other module asks the generation for a
// strategy instead of comparing version numbers inline: how far a unit branch reaches
// in instruction words (one on the earliest parts, two afterwards), whether structured
// control flow runs on the internal mask/address stacks or on explicit JIP/UIP offsets
// patched into the branch instructions, whether transcendental math is a message to the
// shared math unit or a native pipeline instruction, whether the IF instruction itself
// evaluates a comparison, which compaction table set applies (or none at all), where
// the SEND target-unit id lives in the instruction word, and whether a message-register
// source must first be resolved into a real register with an explicit move.

//! Target hardware generation and its per-generation strategies.

use crate::isa::compact::CompactionTables;

/// The EU hardware generations the backend can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TargetGeneration {
    Gen4,
    Gen5,
    Gen6,
    Gen7,
}

impl TargetGeneration {
    /// Branch distance scale: how many jump units one instruction word costs.
    /// Gen4 counts whole instructions, later parts count 64-bit halves.
    pub fn branch_scale(self) -> i32 {
        if self >= TargetGeneration::Gen5 {
            2
        } else {
            1
        }
    }

    /// Early parts run structured control flow on the EU's internal mask and
    /// address stacks; Gen6+ encodes explicit JIP/UIP offsets instead.
    pub fn uses_mask_stacks(self) -> bool {
        self < TargetGeneration::Gen6
    }

    /// Gen6+ has a native MATH instruction; earlier parts send a message to
    /// the shared math unit.
    pub fn has_native_math(self) -> bool {
        self >= TargetGeneration::Gen6
    }

    /// On Gen6 the IF instruction can evaluate the comparison itself,
    /// fusing the preceding CMP.
    pub fn has_if_compare(self) -> bool {
        self == TargetGeneration::Gen6
    }

    /// Gen6 dropped implicit message-register moves from SEND; the payload
    /// source must be copied into the message register explicitly first.
    pub fn needs_resolved_implied_move(self) -> bool {
        self == TargetGeneration::Gen6
    }

    /// Gen6+ moved the SEND target-unit id from the descriptor dword into
    /// the header's conditional-modifier field.
    pub fn sfid_in_header(self) -> bool {
        self >= TargetGeneration::Gen6
    }

    /// The compaction table set for this generation, or `None` when the
    /// part cannot compact at all.
    pub fn compaction_tables(self) -> Option<&'static CompactionTables> {
        match self {
            TargetGeneration::Gen4 => None,
            TargetGeneration::Gen5 => Some(&crate::isa::compact::G45_TABLES),
            TargetGeneration::Gen6 => Some(&crate::isa::compact::GEN6_TABLES),
            TargetGeneration::Gen7 => Some(&crate::isa::compact::GEN7_TABLES),
        }
    }

    /// Immediate operands may only be compacted from Gen6 on.
    pub fn compacts_immediates(self) -> bool {
        self >= TargetGeneration::Gen6
    }

    /// The flag-subregister bit exists in the compact format only through
    /// Gen6; Gen7 reuses the bit range for the operand index fields.
    pub fn compact_carries_flag_subreg(self) -> bool {
        self <= TargetGeneration::Gen6
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_scale() {
        assert_eq!(TargetGeneration::Gen4.branch_scale(), 1);
        assert_eq!(TargetGeneration::Gen5.branch_scale(), 2);
        assert_eq!(TargetGeneration::Gen7.branch_scale(), 2);
    }

    #[test]
    fn test_flow_strategy() {
        assert!(TargetGeneration::Gen5.uses_mask_stacks());
        assert!(!TargetGeneration::Gen6.uses_mask_stacks());
        assert!(TargetGeneration::Gen6.has_if_compare());
        assert!(!TargetGeneration::Gen7.has_if_compare());
    }

    #[test]
    fn test_compaction_tables() {
        assert!(TargetGeneration::Gen4.compaction_tables().is_none());
        assert!(TargetGeneration::Gen5.compaction_tables().is_some());
        assert!(!TargetGeneration::Gen5.compacts_immediates());
        assert!(TargetGeneration::Gen6.compacts_immediates());
    }
}
