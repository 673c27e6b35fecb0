// This module implements the bounded general register file allocator. A 128-bit
// bitmap tracks which of the 128 registers are taken; allocation is first-fit from a
// rolling cursor so freshly released low registers are revisited only after the scan
// wraps. When the file is exhausted the allocator reclaims the registers of
// temporaries whose live interval ended before the current instruction and rescans
// from the bottom. If even that fails, it degrades instead of failing the compile:
// a warning is logged once per compilation and every further allocation lands on a
// fixed fallback register, producing wrong results but a loadable program. The file
// also carries the (class, index, channel) mapping cache that remembers which
// hardware register holds each IR component and whether it has been written yet, and
// the scratch-temporary discipline that lets emission helpers borrow registers and
// return them in one release.

//! The 128-entry general register file: first-fit bitmap allocation with
//! live-interval reclaim and a degrade-on-exhaustion policy.

use hashbrown::HashMap;
use log::warn;

use crate::core::intervals::LiveIntervals;
use crate::ir::OperandClass;

/// Size of the general register file.
pub const GRF_COUNT: usize = 128;

/// Where allocations land once the file is exhausted: any old register,
/// easy to spot in dumps.
pub const FALLBACK_GRF: u32 = 50;

/// One cached IR-component-to-register mapping.
#[derive(Debug, Clone, Copy)]
pub struct TrackedRegister {
    pub nr: u32,
    /// Whether the component has been written yet.
    pub inited: bool,
}

/// The allocator plus the component mapping cache.
pub struct RegisterFile {
    used: [u64; GRF_COUNT / 64],
    first_free: usize,
    out_of_regs: bool,
    cache: HashMap<(OperandClass, u32, usize), TrackedRegister>,
    tmp_regs: Vec<u32>,
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterFile {
    pub fn new() -> Self {
        RegisterFile {
            used: [0; GRF_COUNT / 64],
            first_free: 0,
            out_of_regs: false,
            cache: HashMap::new(),
            tmp_regs: Vec::new(),
        }
    }

    fn is_used(&self, nr: u32) -> bool {
        self.used[nr as usize / 64] & (1 << (nr % 64)) != 0
    }

    fn mark_used(&mut self, nr: u32) {
        self.used[nr as usize / 64] |= 1 << (nr % 64);
    }

    fn mark_free(&mut self, nr: u32) {
        self.used[nr as usize / 64] &= !(1 << (nr % 64));
    }

    /// Permanently take a register out of circulation (payload registers,
    /// known-bad registers).
    pub fn prealloc(&mut self, nr: u32) {
        self.mark_used(nr);
    }

    fn scan_from(&mut self, start: usize) -> Option<u32> {
        for nr in start..GRF_COUNT {
            if !self.is_used(nr as u32) {
                self.mark_used(nr as u32);
                self.first_free = nr + 1;
                return Some(nr as u32);
            }
        }
        None
    }

    /// Allocate one register. `position` is the current instruction index,
    /// used to decide which temporaries are dead when reclaim is needed;
    /// `intervals` is `None` when relative addressing disabled the analysis.
    pub fn alloc(&mut self, position: usize, intervals: Option<&LiveIntervals>) -> u32 {
        if let Some(nr) = self.scan_from(self.first_free) {
            return nr;
        }
        self.reclaim(position, intervals);
        self.first_free = 0;
        if let Some(nr) = self.scan_from(0) {
            return nr;
        }
        if !self.out_of_regs {
            self.out_of_regs = true;
            warn!(
                "general register file exhausted at instruction {position}; \
                 falling back to r{FALLBACK_GRF}, results will be wrong"
            );
        }
        FALLBACK_GRF
    }

    pub fn release(&mut self, nr: u32) {
        self.mark_free(nr);
        self.first_free = self.first_free.min(nr as usize);
    }

    /// Free the registers of temporaries whose live interval ended before
    /// `position`, forgetting their cached mappings.
    fn reclaim(&mut self, position: usize, intervals: Option<&LiveIntervals>) {
        let Some(intervals) = intervals else {
            return;
        };
        let dead: Vec<(OperandClass, u32, usize)> = self
            .cache
            .keys()
            .filter(|(class, index, _)| {
                *class == OperandClass::Temporary && intervals.expired_before(*index, position)
            })
            .copied()
            .collect();
        for key in dead {
            if let Some(entry) = self.cache.remove(&key) {
                self.release(entry.nr);
            }
        }
    }

    /// Register holding one channel of an IR operand, allocating on first
    /// touch. The `inited` flag reports whether the channel has been
    /// written; reads of uninitialized channels see garbage, not a fault.
    pub fn get_reg(
        &mut self,
        class: OperandClass,
        index: u32,
        channel: usize,
        position: usize,
        intervals: Option<&LiveIntervals>,
    ) -> TrackedRegister {
        if let Some(entry) = self.cache.get(&(class, index, channel)) {
            return *entry;
        }
        let nr = self.alloc(position, intervals);
        let entry = TrackedRegister { nr, inited: false };
        self.cache.insert((class, index, channel), entry);
        entry
    }

    /// Record that a channel now holds a value.
    pub fn mark_written(&mut self, class: OperandClass, index: u32, channel: usize) {
        if let Some(entry) = self.cache.get_mut(&(class, index, channel)) {
            entry.inited = true;
        }
    }

    /// Pin an IR component to a fixed register (payload setup).
    pub fn bind(&mut self, class: OperandClass, index: u32, channel: usize, nr: u32) {
        self.prealloc(nr);
        self.cache
            .insert((class, index, channel), TrackedRegister { nr, inited: true });
    }

    // -- scratch temporaries ----------------------------------------------

    /// Mark the scratch watermark; pass it to [`Self::release_tmps`].
    pub fn mark_tmps(&self) -> usize {
        self.tmp_regs.len()
    }

    pub fn alloc_tmp(&mut self, position: usize, intervals: Option<&LiveIntervals>) -> u32 {
        let nr = self.alloc(position, intervals);
        self.tmp_regs.push(nr);
        nr
    }

    /// Return every scratch register taken since the mark.
    pub fn release_tmps(&mut self, mark: usize) {
        for nr in self.tmp_regs.split_off(mark) {
            self.release(nr);
        }
    }

    pub fn ran_out(&self) -> bool {
        self.out_of_regs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::intervals::scan_intervals;
    use crate::ir::{DstOperand, IrInstruction, IrOp, SrcOperand};

    fn create_test_file() -> RegisterFile {
        let mut regs = RegisterFile::new();
        // Payload and known-bad registers, as the driver would reserve them.
        regs.prealloc(0);
        regs.prealloc(1);
        regs.prealloc(126);
        regs.prealloc(127);
        regs
    }

    #[test]
    fn test_first_fit_with_rolling_cursor() {
        let mut regs = create_test_file();
        assert_eq!(regs.alloc(0, None), 2);
        assert_eq!(regs.alloc(0, None), 3);
        regs.release(2);
        // The cursor keeps rolling forward; 2 is only found after a wrap.
        assert_eq!(regs.alloc(0, None), 4);
    }

    #[test]
    fn test_release_rewinds_cursor() {
        let mut regs = create_test_file();
        let a = regs.alloc(0, None);
        let b = regs.alloc(0, None);
        regs.release(a);
        regs.release(b);
        assert_eq!(regs.alloc(0, None), a);
    }

    #[test]
    fn test_exhaustion_degrades_to_fallback() {
        let mut regs = create_test_file();
        let mut seen = Vec::new();
        for _ in 0..(GRF_COUNT - 4) {
            seen.push(regs.alloc(0, None));
        }
        assert!(!regs.ran_out());
        // 125th allocation has nowhere to go.
        assert_eq!(regs.alloc(0, None), FALLBACK_GRF);
        assert!(regs.ran_out());
        assert_eq!(regs.alloc(0, None), FALLBACK_GRF);
        assert!(!seen.contains(&126));
    }

    #[test]
    fn test_reclaim_frees_dead_temporaries() {
        // t0 dies at instruction 0; t1 lives through instruction 2.
        let program = vec![
            IrInstruction::new(IrOp::Mov)
                .with_dst(DstOperand::new(OperandClass::Temporary, 1))
                .with_src(0, SrcOperand::new(OperandClass::Temporary, 0)),
            IrInstruction::new(IrOp::Mov)
                .with_dst(DstOperand::new(OperandClass::Temporary, 2))
                .with_src(0, SrcOperand::new(OperandClass::Temporary, 1)),
            IrInstruction::new(IrOp::Mov)
                .with_dst(DstOperand::new(OperandClass::Temporary, 3))
                .with_src(0, SrcOperand::new(OperandClass::Temporary, 2)),
        ];
        let intervals = scan_intervals(&program).unwrap();

        let mut regs = RegisterFile::new();
        let t0 = regs.get_reg(OperandClass::Temporary, 0, 0, 0, Some(&intervals));
        for nr in 0..GRF_COUNT as u32 {
            if nr != t0.nr {
                regs.prealloc(nr);
            }
        }
        // At instruction 2, t0 is dead; its register is reclaimed rather
        // than degrading.
        let t2 = regs.get_reg(OperandClass::Temporary, 2, 0, 2, Some(&intervals));
        assert_eq!(t2.nr, t0.nr);
        assert!(!regs.ran_out());
    }

    #[test]
    fn test_no_reclaim_without_intervals() {
        let mut regs = RegisterFile::new();
        let t0 = regs.get_reg(OperandClass::Temporary, 0, 0, 0, None);
        for nr in 0..GRF_COUNT as u32 {
            if nr != t0.nr {
                regs.prealloc(nr);
            }
        }
        let t1 = regs.get_reg(OperandClass::Temporary, 1, 0, 5, None);
        assert_eq!(t1.nr, FALLBACK_GRF);
        assert!(regs.ran_out());
    }

    #[test]
    fn test_mapping_cache_is_stable() {
        let mut regs = create_test_file();
        let first = regs.get_reg(OperandClass::Temporary, 7, 2, 0, None);
        assert!(!first.inited);
        regs.mark_written(OperandClass::Temporary, 7, 2);
        let again = regs.get_reg(OperandClass::Temporary, 7, 2, 1, None);
        assert_eq!(again.nr, first.nr);
        assert!(again.inited);
        // A different channel maps to a different register.
        let other = regs.get_reg(OperandClass::Temporary, 7, 3, 1, None);
        assert_ne!(other.nr, first.nr);
    }

    #[test]
    fn test_scratch_discipline() {
        let mut regs = create_test_file();
        let mark = regs.mark_tmps();
        let a = regs.alloc_tmp(0, None);
        let b = regs.alloc_tmp(0, None);
        regs.release_tmps(mark);
        assert_eq!(regs.alloc(0, None), a.min(b));
    }
}
