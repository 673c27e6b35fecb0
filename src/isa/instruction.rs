// This module holds the two instruction records of the EU ISA and their bit-level
// accessors. FullInstruction is the native 128-bit record: a header dword (opcode,
// execution controls, predication, conditional modifier), an operand-descriptor dword
// (register files and types, destination region), and two source dwords, where the
// final dword doubles as the 32-bit immediate payload, the SEND message descriptor, or
// the branch offset fields depending on the opcode. CompactInstruction is the 64-bit
// form produced by the compaction pass; most of its fields are 5-bit indices into
// per-generation lookup tables rather than the field values themselves. Both records
// expose a generic bits/set_bits accessor over absolute bit positions, with typed
// getters and setters layered on top, so the encoder and the compactor read and write
// exactly the positions the hardware documents. The tagged Instruction enum keeps the
// two widths apart in the type system instead of distinguishing them by a bit probe
// through a shared pointer.

//! Instruction records: the 128-bit native form and the 64-bit compact form.

/// EU opcodes, as encoded in bits 6:0 of both record forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Opcode {
    Mov = 0x01,
    Sel = 0x02,
    Not = 0x04,
    And = 0x05,
    Or = 0x06,
    Xor = 0x07,
    Shr = 0x08,
    Shl = 0x09,
    Asr = 0x0C,
    Cmp = 0x10,
    Jmpi = 0x20,
    If = 0x22,
    /// IF with an embedded ENDIF target, produced only by back-patching.
    Iff = 0x23,
    Else = 0x24,
    Endif = 0x25,
    Do = 0x26,
    While = 0x27,
    Break = 0x28,
    Continue = 0x29,
    Halt = 0x2A,
    Send = 0x31,
    Sendc = 0x32,
    Math = 0x38,
    Add = 0x40,
    Mul = 0x41,
    Frc = 0x43,
    Rndd = 0x45,
    Rndz = 0x47,
    Mac = 0x48,
    Nop = 0x7E,
}

impl Opcode {
    pub fn from_code(code: u32) -> Option<Opcode> {
        Some(match code {
            0x01 => Opcode::Mov,
            0x02 => Opcode::Sel,
            0x04 => Opcode::Not,
            0x05 => Opcode::And,
            0x06 => Opcode::Or,
            0x07 => Opcode::Xor,
            0x08 => Opcode::Shr,
            0x09 => Opcode::Shl,
            0x0C => Opcode::Asr,
            0x10 => Opcode::Cmp,
            0x20 => Opcode::Jmpi,
            0x22 => Opcode::If,
            0x23 => Opcode::Iff,
            0x24 => Opcode::Else,
            0x25 => Opcode::Endif,
            0x26 => Opcode::Do,
            0x27 => Opcode::While,
            0x28 => Opcode::Break,
            0x29 => Opcode::Continue,
            0x2A => Opcode::Halt,
            0x31 => Opcode::Send,
            0x32 => Opcode::Sendc,
            0x38 => Opcode::Math,
            0x40 => Opcode::Add,
            0x41 => Opcode::Mul,
            0x43 => Opcode::Frc,
            0x45 => Opcode::Rndd,
            0x47 => Opcode::Rndz,
            0x48 => Opcode::Mac,
            0x7E => Opcode::Nop,
            _ => return None,
        })
    }
}

/// Conditional modifier / flag test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CondModifier {
    None = 0,
    Z = 1,
    Nz = 2,
    G = 3,
    Ge = 4,
    L = 5,
    Le = 6,
}

/// Predication control.
pub const PREDICATE_NONE: u32 = 0;
pub const PREDICATE_NORMAL: u32 = 1;

/// Compression (quarter) control.
pub const COMPRESSION_NONE: u32 = 0;
pub const COMPRESSION_2NDHALF: u32 = 1;
pub const COMPRESSION_COMPRESSED: u32 = 2;

/// Channel-mask control.
pub const MASK_ENABLE: u32 = 0;
pub const MASK_DISABLE: u32 = 1;

/// Thread control.
pub const THREAD_NORMAL: u32 = 0;
pub const THREAD_SWITCH: u32 = 2;

/// Access mode.
pub const ALIGN_1: u32 = 0;

/// Shared-function ids for SEND.
pub const SFID_NULL: u32 = 0;
pub const SFID_MATH: u32 = 1;
pub const SFID_SAMPLER: u32 = 2;
pub const SFID_DATAPORT_READ: u32 = 4;
pub const SFID_DATAPORT_WRITE: u32 = 5;
pub const SFID_URB: u32 = 6;

/// The native 128-bit instruction record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FullInstruction {
    pub data: [u32; 4],
}

impl FullInstruction {
    pub fn new() -> Self {
        FullInstruction::default()
    }

    fn as_u128(&self) -> u128 {
        (self.data[0] as u128)
            | (self.data[1] as u128) << 32
            | (self.data[2] as u128) << 64
            | (self.data[3] as u128) << 96
    }

    fn from_u128(v: u128) -> Self {
        FullInstruction {
            data: [
                v as u32,
                (v >> 32) as u32,
                (v >> 64) as u32,
                (v >> 96) as u32,
            ],
        }
    }

    /// Bits `hi:lo` of the record, absolute positions.
    pub fn bits(&self, hi: u32, lo: u32) -> u32 {
        debug_assert!(hi >= lo && hi - lo < 32 && hi < 128);
        let mask = if hi - lo == 31 {
            u32::MAX as u128
        } else {
            (1u128 << (hi - lo + 1)) - 1
        };
        ((self.as_u128() >> lo) & mask) as u32
    }

    /// Replace bits `hi:lo` of the record.
    pub fn set_bits(&mut self, hi: u32, lo: u32, value: u32) {
        debug_assert!(hi >= lo && hi - lo < 32 && hi < 128);
        let mask = if hi - lo == 31 {
            u32::MAX as u128
        } else {
            (1u128 << (hi - lo + 1)) - 1
        };
        debug_assert!((value as u128) <= mask);
        let cleared = self.as_u128() & !(mask << lo);
        *self = Self::from_u128(cleared | ((value as u128 & mask) << lo));
    }

    // -- header dword ------------------------------------------------------

    pub fn opcode_raw(&self) -> u32 {
        self.bits(6, 0)
    }

    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_code(self.opcode_raw())
    }

    pub fn set_opcode(&mut self, opcode: Opcode) {
        self.set_bits(6, 0, opcode as u32);
    }

    pub fn set_access_mode(&mut self, mode: u32) {
        self.set_bits(8, 8, mode);
    }

    pub fn mask_control(&self) -> u32 {
        self.bits(9, 9)
    }

    pub fn set_mask_control(&mut self, control: u32) {
        self.set_bits(9, 9, control);
    }

    pub fn compression_control(&self) -> u32 {
        self.bits(13, 12)
    }

    pub fn set_compression_control(&mut self, control: u32) {
        self.set_bits(13, 12, control);
    }

    pub fn set_thread_control(&mut self, control: u32) {
        self.set_bits(15, 14, control);
    }

    pub fn pred_control(&self) -> u32 {
        self.bits(19, 16)
    }

    pub fn set_pred_control(&mut self, control: u32) {
        self.set_bits(19, 16, control);
    }

    pub fn set_pred_inverse(&mut self, inverse: bool) {
        self.set_bits(20, 20, inverse as u32);
    }

    pub fn exec_size(&self) -> u32 {
        self.bits(23, 21)
    }

    pub fn set_exec_size(&mut self, size_code: u32) {
        self.set_bits(23, 21, size_code);
    }

    /// Conditional modifier; also the math function and, on Gen6+, the SEND
    /// target-unit id.
    pub fn cond_modifier(&self) -> u32 {
        self.bits(27, 24)
    }

    pub fn set_cond_modifier(&mut self, cond: u32) {
        self.set_bits(27, 24, cond);
    }

    pub fn acc_wr_control(&self) -> u32 {
        self.bits(28, 28)
    }

    pub fn set_acc_wr_control(&mut self, control: u32) {
        self.set_bits(28, 28, control);
    }

    pub fn cmpt_control(&self) -> bool {
        self.bits(29, 29) != 0
    }

    pub fn debug_control(&self) -> u32 {
        self.bits(30, 30)
    }

    pub fn saturate(&self) -> bool {
        self.bits(31, 31) != 0
    }

    pub fn set_saturate(&mut self, saturate: bool) {
        self.set_bits(31, 31, saturate as u32);
    }

    // -- operand descriptor dword ------------------------------------------

    pub fn dest_reg_file(&self) -> u32 {
        self.bits(33, 32)
    }

    pub fn set_dest_reg_file(&mut self, file: u32) {
        self.set_bits(33, 32, file);
    }

    pub fn dest_reg_type(&self) -> u32 {
        self.bits(36, 34)
    }

    pub fn set_dest_reg_type(&mut self, ty: u32) {
        self.set_bits(36, 34, ty);
    }

    pub fn src0_reg_file(&self) -> u32 {
        self.bits(38, 37)
    }

    pub fn set_src0_reg_file(&mut self, file: u32) {
        self.set_bits(38, 37, file);
    }

    pub fn src0_reg_type(&self) -> u32 {
        self.bits(41, 39)
    }

    pub fn set_src0_reg_type(&mut self, ty: u32) {
        self.set_bits(41, 39, ty);
    }

    pub fn src1_reg_file(&self) -> u32 {
        self.bits(43, 42)
    }

    pub fn set_src1_reg_file(&mut self, file: u32) {
        self.set_bits(43, 42, file);
    }

    pub fn src1_reg_type(&self) -> u32 {
        self.bits(46, 44)
    }

    pub fn set_src1_reg_type(&mut self, ty: u32) {
        self.set_bits(46, 44, ty);
    }

    pub fn set_dest_subreg_nr(&mut self, subnr: u32) {
        self.set_bits(52, 48, subnr);
    }

    pub fn dest_reg_nr(&self) -> u32 {
        self.bits(60, 53)
    }

    pub fn set_dest_reg_nr(&mut self, nr: u32) {
        self.set_bits(60, 53, nr);
    }

    pub fn set_dest_hstride(&mut self, stride: u32) {
        self.set_bits(62, 61, stride);
    }

    pub fn set_dest_address_mode(&mut self, mode: u32) {
        self.set_bits(63, 63, mode);
    }

    /// Signed jump field overlaying the descriptor dword's upper half; used
    /// by Gen6 IF/ELSE/ENDIF/WHILE.
    pub fn gen6_jump_count(&self) -> i32 {
        self.bits(63, 48) as u16 as i16 as i32
    }

    pub fn set_gen6_jump_count(&mut self, count: i32) {
        self.set_bits(63, 48, count as i16 as u16 as u32);
    }

    // -- src0 dword --------------------------------------------------------

    pub fn src0_subreg_nr(&self) -> u32 {
        self.bits(68, 64)
    }

    pub fn set_src0_subreg_nr(&mut self, subnr: u32) {
        self.set_bits(68, 64, subnr);
    }

    pub fn src0_reg_nr(&self) -> u32 {
        self.bits(76, 69)
    }

    pub fn set_src0_reg_nr(&mut self, nr: u32) {
        self.set_bits(76, 69, nr);
    }

    pub fn set_src0_abs(&mut self, abs: bool) {
        self.set_bits(77, 77, abs as u32);
    }

    pub fn src0_negate(&self) -> bool {
        self.bits(78, 78) != 0
    }

    pub fn set_src0_negate(&mut self, negate: bool) {
        self.set_bits(78, 78, negate as u32);
    }

    pub fn set_src0_address_mode(&mut self, mode: u32) {
        self.set_bits(79, 79, mode);
    }

    pub fn set_src0_hstride(&mut self, stride: u32) {
        self.set_bits(81, 80, stride);
    }

    pub fn src0_width(&self) -> u32 {
        self.bits(84, 82)
    }

    pub fn set_src0_width(&mut self, width: u32) {
        self.set_bits(84, 82, width);
    }

    pub fn set_src0_vstride(&mut self, stride: u32) {
        self.set_bits(88, 85, stride);
    }

    pub fn flag_subreg_nr(&self) -> u32 {
        self.bits(89, 89)
    }

    pub fn set_flag_subreg_nr(&mut self, subnr: u32) {
        self.set_bits(89, 89, subnr);
    }

    // -- src1 / immediate / descriptor dword -------------------------------

    pub fn set_src1_subreg_nr(&mut self, subnr: u32) {
        self.set_bits(100, 96, subnr);
    }

    pub fn src1_reg_nr(&self) -> u32 {
        self.bits(108, 101)
    }

    pub fn set_src1_reg_nr(&mut self, nr: u32) {
        self.set_bits(108, 101, nr);
    }

    pub fn set_src1_abs(&mut self, abs: bool) {
        self.set_bits(109, 109, abs as u32);
    }

    pub fn src1_negate(&self) -> bool {
        self.bits(110, 110) != 0
    }

    pub fn set_src1_negate(&mut self, negate: bool) {
        self.set_bits(110, 110, negate as u32);
    }

    pub fn set_src1_address_mode(&mut self, mode: u32) {
        self.set_bits(111, 111, mode);
    }

    pub fn set_src1_hstride(&mut self, stride: u32) {
        self.set_bits(113, 112, stride);
    }

    pub fn src1_width(&self) -> u32 {
        self.bits(116, 114)
    }

    pub fn set_src1_width(&mut self, width: u32) {
        self.set_bits(116, 114, width);
    }

    pub fn set_src1_vstride(&mut self, stride: u32) {
        self.set_bits(120, 117, stride);
    }

    /// The whole final dword, as an immediate payload.
    pub fn imm_ud(&self) -> u32 {
        self.data[3]
    }

    pub fn set_imm_ud(&mut self, value: u32) {
        self.data[3] = value;
    }

    pub fn imm_d(&self) -> i32 {
        self.data[3] as i32
    }

    /// Signed whole-instruction jump count used by pre-Gen6 branches.
    pub fn gen4_jump_count(&self) -> i32 {
        self.bits(111, 96) as u16 as i16 as i32
    }

    pub fn set_gen4_jump_count(&mut self, count: i32) {
        self.set_bits(111, 96, count as i16 as u16 as u32);
    }

    /// Mask-stack pop count carried by pre-Gen6 branches.
    pub fn set_gen4_pop_count(&mut self, count: u32) {
        self.set_bits(115, 112, count);
    }

    /// Jump-if-predicate offset for Gen6+ control flow.
    pub fn jip(&self) -> i32 {
        self.bits(111, 96) as u16 as i16 as i32
    }

    pub fn set_jip(&mut self, jip: i32) {
        self.set_bits(111, 96, jip as i16 as u16 as u32);
    }

    /// Unconditional-jump offset for Gen6+ BREAK/CONTINUE/HALT.
    pub fn uip(&self) -> i32 {
        self.bits(127, 112) as u16 as i16 as i32
    }

    pub fn set_uip(&mut self, uip: i32) {
        self.set_bits(127, 112, uip as i16 as u16 as u32);
    }

    // -- SEND descriptor ---------------------------------------------------

    /// Shared-function control bits of the message descriptor. Gen4 keeps
    /// the target-unit id in the descriptor; Gen5+ widened this field and
    /// relocated the id.
    pub fn set_send_function_control(&mut self, gen5_plus: bool, control: u32) {
        if gen5_plus {
            self.set_bits(114, 96, control);
        } else {
            self.set_bits(111, 96, control);
        }
    }

    pub fn set_send_header_present(&mut self, present: bool) {
        self.set_bits(115, 115, present as u32);
    }

    pub fn set_send_lengths(&mut self, gen5_plus: bool, response_len: u32, msg_len: u32) {
        if gen5_plus {
            self.set_bits(120, 116, response_len);
            self.set_bits(124, 121, msg_len);
        } else {
            self.set_bits(115, 112, response_len);
            self.set_bits(119, 116, msg_len);
        }
    }

    /// Gen4 target-unit id slot in the descriptor dword.
    pub fn set_send_target_gen4(&mut self, sfid: u32) {
        self.set_bits(123, 120, sfid);
    }

    /// Gen5 target-unit id slot in the src0 dword.
    pub fn set_send_target_gen5(&mut self, sfid: u32) {
        self.set_bits(95, 92, sfid);
    }

    pub fn send_eot(&self) -> bool {
        self.bits(127, 127) != 0
    }

    pub fn set_send_eot(&mut self, eot: bool) {
        self.set_bits(127, 127, eot as u32);
    }
}

/// The 64-bit compacted record. Index fields select rows of the
/// per-generation lookup tables; the remaining fields are carried verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompactInstruction {
    pub data: u64,
}

impl CompactInstruction {
    pub fn new() -> Self {
        CompactInstruction::default()
    }

    pub fn bits(&self, hi: u32, lo: u32) -> u32 {
        debug_assert!(hi >= lo && hi - lo < 32 && hi < 64);
        let mask = (1u64 << (hi - lo + 1)) - 1;
        ((self.data >> lo) & mask) as u32
    }

    pub fn set_bits(&mut self, hi: u32, lo: u32, value: u32) {
        debug_assert!(hi >= lo && hi - lo < 32 && hi < 64);
        let mask = (1u64 << (hi - lo + 1)) - 1;
        debug_assert!((value as u64) <= mask);
        self.data = (self.data & !(mask << lo)) | ((value as u64 & mask) << lo);
    }

    pub fn opcode_raw(&self) -> u32 {
        self.bits(6, 0)
    }

    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_code(self.opcode_raw())
    }

    pub fn set_opcode(&mut self, opcode: Opcode) {
        self.set_bits(6, 0, opcode as u32);
    }

    pub fn set_debug_control(&mut self, control: u32) {
        self.set_bits(7, 7, control);
    }

    pub fn debug_control(&self) -> u32 {
        self.bits(7, 7)
    }

    pub fn set_control_index(&mut self, index: u32) {
        self.set_bits(12, 8, index);
    }

    pub fn control_index(&self) -> u32 {
        self.bits(12, 8)
    }

    pub fn set_datatype_index(&mut self, index: u32) {
        self.set_bits(17, 13, index);
    }

    pub fn datatype_index(&self) -> u32 {
        self.bits(17, 13)
    }

    pub fn set_subreg_index(&mut self, index: u32) {
        self.set_bits(22, 18, index);
    }

    pub fn subreg_index(&self) -> u32 {
        self.bits(22, 18)
    }

    pub fn set_acc_wr_control(&mut self, control: u32) {
        self.set_bits(23, 23, control);
    }

    pub fn acc_wr_control(&self) -> u32 {
        self.bits(23, 23)
    }

    pub fn set_cond_modifier(&mut self, cond: u32) {
        self.set_bits(27, 24, cond);
    }

    pub fn cond_modifier(&self) -> u32 {
        self.bits(27, 24)
    }

    /// Present through Gen6 only; Gen7 reclaimed the bit.
    pub fn set_flag_subreg_nr(&mut self, subnr: u32) {
        self.set_bits(28, 28, subnr);
    }

    pub fn flag_subreg_nr(&self) -> u32 {
        self.bits(28, 28)
    }

    pub fn set_cmpt_control(&mut self, compacted: bool) {
        self.set_bits(29, 29, compacted as u32);
    }

    pub fn set_src0_index(&mut self, index: u32) {
        self.set_bits(34, 30, index);
    }

    pub fn src0_index(&self) -> u32 {
        self.bits(34, 30)
    }

    pub fn set_src1_index(&mut self, index: u32) {
        self.set_bits(39, 35, index);
    }

    pub fn src1_index(&self) -> u32 {
        self.bits(39, 35)
    }

    pub fn set_dest_reg_nr(&mut self, nr: u32) {
        self.set_bits(47, 40, nr);
    }

    pub fn dest_reg_nr(&self) -> u32 {
        self.bits(47, 40)
    }

    pub fn set_src0_reg_nr(&mut self, nr: u32) {
        self.set_bits(55, 48, nr);
    }

    pub fn src0_reg_nr(&self) -> u32 {
        self.bits(55, 48)
    }

    pub fn set_src1_reg_nr(&mut self, nr: u32) {
        self.set_bits(63, 56, nr);
    }

    pub fn src1_reg_nr(&self) -> u32 {
        self.bits(63, 56)
    }
}

/// A finished instruction, either width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Full(FullInstruction),
    Compact(CompactInstruction),
}

impl Instruction {
    pub fn byte_len(&self) -> usize {
        match self {
            Instruction::Full(_) => 16,
            Instruction::Compact(_) => 8,
        }
    }

    pub fn is_compact(&self) -> bool {
        matches!(self, Instruction::Compact(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_cross_dword_boundary() {
        let mut insn = FullInstruction::new();
        // 63:48 straddles nothing; 68:60 straddles dwords 1 and 2.
        insn.set_bits(68, 60, 0x155);
        assert_eq!(insn.bits(68, 60), 0x155);
        assert_eq!(insn.data[1] >> 28, 0x5);
        insn.set_bits(68, 60, 0);
        assert_eq!(insn.data, [0; 4]);
    }

    #[test]
    fn test_signed_jump_fields() {
        let mut insn = FullInstruction::new();
        insn.set_gen4_jump_count(-5);
        assert_eq!(insn.gen4_jump_count(), -5);
        insn.set_jip(-2);
        insn.set_uip(7);
        assert_eq!(insn.jip(), -2);
        assert_eq!(insn.uip(), 7);
    }

    #[test]
    fn test_opcode_round_trip() {
        let mut insn = FullInstruction::new();
        insn.set_opcode(Opcode::While);
        assert_eq!(insn.opcode(), Some(Opcode::While));
        assert_eq!(Opcode::from_code(0x55), None);
    }

    #[test]
    fn test_header_fields_do_not_overlap() {
        let mut insn = FullInstruction::new();
        insn.set_saturate(true);
        insn.set_cond_modifier(CondModifier::Nz as u32);
        insn.set_exec_size(3);
        insn.set_pred_control(PREDICATE_NORMAL);
        assert!(insn.saturate());
        assert_eq!(insn.cond_modifier(), 2);
        assert_eq!(insn.exec_size(), 3);
        assert_eq!(insn.pred_control(), PREDICATE_NORMAL);
        insn.set_saturate(false);
        assert_eq!(insn.cond_modifier(), 2);
    }

    #[test]
    fn test_compact_field_layout() {
        let mut c = CompactInstruction::new();
        c.set_opcode(Opcode::Add);
        c.set_control_index(0x1F);
        c.set_datatype_index(0x10);
        c.set_subreg_index(0x05);
        c.set_src0_index(0x0A);
        c.set_src1_index(0x15);
        c.set_dest_reg_nr(0xFF);
        c.set_src0_reg_nr(0x01);
        c.set_src1_reg_nr(0x80);
        assert_eq!(c.opcode(), Some(Opcode::Add));
        assert_eq!(c.control_index(), 0x1F);
        assert_eq!(c.datatype_index(), 0x10);
        assert_eq!(c.subreg_index(), 0x05);
        assert_eq!(c.src0_index(), 0x0A);
        assert_eq!(c.src1_index(), 0x15);
        assert_eq!(c.dest_reg_nr(), 0xFF);
        assert_eq!(c.src0_reg_nr(), 0x01);
        assert_eq!(c.src1_reg_nr(), 0x80);
    }
}
