// This module computes live intervals for IR temporaries: the first and last
// instruction index at which each temporary is referenced. The register allocator
// uses these to reclaim registers mid-program when the file fills up. References
// inside a loop are widened to the loop's closing instruction, because a value
// written before a BREAK or read on a later iteration is live for the whole loop
// body even if its last textual reference comes earlier. If any operand uses
// relative addressing the analysis declines entirely (returns None): an indirectly
// addressed temporary can alias any slot in its class, so no interval is safe and
// the allocator must never reclaim.

//! Live-interval analysis over the IR, for register reclaim.

use hashbrown::HashMap;

use crate::ir::{IrInstruction, IrOp, OperandClass};

/// First and last reference positions per temporary index.
#[derive(Debug, Default)]
pub struct LiveIntervals {
    ranges: HashMap<u32, (usize, usize)>,
}

impl LiveIntervals {
    fn update(&mut self, index: u32, position: usize) {
        self.ranges
            .entry(index)
            .and_modify(|range| range.1 = range.1.max(position))
            .or_insert((position, position));
    }

    /// Whether the temporary's last reference lies strictly before
    /// `position`, making its register reclaimable there.
    pub fn expired_before(&self, index: u32, position: usize) -> bool {
        match self.ranges.get(&index) {
            Some(&(_, end)) => end < position,
            // Never referenced at all; nothing holds it live.
            None => true,
        }
    }

    pub fn range(&self, index: u32) -> Option<(usize, usize)> {
        self.ranges.get(&index).copied()
    }
}

/// Scan the program for temporary live intervals. Returns `None` when any
/// operand is relatively addressed, in which case reclaim must stay off.
pub fn scan_intervals(program: &[IrInstruction]) -> Option<LiveIntervals> {
    let mut intervals = LiveIntervals::default();
    let mut loop_ends: Vec<usize> = Vec::new();

    for (position, inst) in program.iter().enumerate() {
        match inst.op {
            IrOp::BeginLoop => {
                loop_ends.push(find_loop_end(program, position)?);
            }
            IrOp::EndLoop => {
                loop_ends.pop()?;
            }
            _ => {}
        }

        let innermost_end = loop_ends.last().copied();
        let mut touch = |class: OperandClass, index: u32, rel_addr: bool| -> Option<()> {
            if rel_addr {
                return None;
            }
            if class == OperandClass::Temporary {
                intervals.update(index, position);
                if let Some(end) = innermost_end {
                    intervals.update(index, end);
                }
            }
            Some(())
        };

        for src in inst.srcs.iter().flatten() {
            touch(src.class, src.index, src.rel_addr)?;
        }
        if let Some(dst) = inst.dst {
            touch(dst.class, dst.index, dst.rel_addr)?;
        }
    }
    Some(intervals)
}

fn find_loop_end(program: &[IrInstruction], begin: usize) -> Option<usize> {
    let mut depth = 0;
    for (position, inst) in program.iter().enumerate().skip(begin + 1) {
        match inst.op {
            IrOp::BeginLoop => depth += 1,
            IrOp::EndLoop if depth == 0 => return Some(position),
            IrOp::EndLoop => depth -= 1,
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{DstOperand, SrcOperand};

    fn mov(dst_index: u32, src_index: u32) -> IrInstruction {
        IrInstruction::new(IrOp::Mov)
            .with_dst(DstOperand::new(OperandClass::Temporary, dst_index))
            .with_src(0, SrcOperand::new(OperandClass::Temporary, src_index))
    }

    fn marker(op: IrOp) -> IrInstruction {
        IrInstruction::new(op)
    }

    #[test]
    fn test_straight_line_intervals() {
        let program = vec![mov(0, 1), mov(2, 0), mov(3, 2)];
        let intervals = scan_intervals(&program).unwrap();
        assert_eq!(intervals.range(0), Some((0, 1)));
        assert_eq!(intervals.range(1), Some((0, 0)));
        assert!(intervals.expired_before(1, 1));
        assert!(!intervals.expired_before(0, 1));
        assert!(intervals.expired_before(0, 2));
    }

    #[test]
    fn test_loop_widens_to_loop_end() {
        // t0 referenced only at position 1, inside the loop closed at 3.
        let program = vec![
            marker(IrOp::BeginLoop),
            mov(0, 0),
            mov(1, 2),
            marker(IrOp::EndLoop),
            mov(3, 3),
        ];
        let intervals = scan_intervals(&program).unwrap();
        assert_eq!(intervals.range(0), Some((1, 3)));
        assert!(!intervals.expired_before(0, 3));
        assert!(intervals.expired_before(0, 4));
    }

    #[test]
    fn test_nested_loops_widen_to_innermost_end() {
        let program = vec![
            marker(IrOp::BeginLoop),
            marker(IrOp::BeginLoop),
            mov(0, 0),
            marker(IrOp::EndLoop),
            marker(IrOp::EndLoop),
        ];
        let intervals = scan_intervals(&program).unwrap();
        assert_eq!(intervals.range(0), Some((2, 3)));
    }

    #[test]
    fn test_relative_addressing_declines() {
        let mut inst = mov(0, 1);
        inst.srcs[0].as_mut().unwrap().rel_addr = true;
        assert!(scan_intervals(&[inst]).is_none());
    }

    #[test]
    fn test_unbalanced_loop_declines() {
        assert!(scan_intervals(&[marker(IrOp::EndLoop)]).is_none());
    }
}
