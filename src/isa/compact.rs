// This module implements the lossless instruction compaction pass. Eligible 128-bit
// records are re-encoded as 64-bit records whose control, datatype, subregister and
// source-region fields become 5-bit indices into per-generation lookup tables; an
// instruction compacts only if all four of its field groups appear in the tables, and
// it is skipped otherwise, so the pass is conservative by construction. Immediates
// ride along only from Gen6 on and only when the payload is 12 bits plus a replicated
// sign bit. Control-flow instructions are never compacted here because their jump
// fields live outside the table-covered bits; instead, once the stream has been
// packed, a renumbering pass rewrites every jump field for the new layout by counting
// how many instructions between a branch and its target were halved. An end-of-thread
// SEND must start on a 16-byte boundary or the hardware hangs, so a compacted NOP is
// inserted when packing would misalign one, and the stream is padded to a whole
// 16-byte multiple at the end. Round-tripping a compacted record through the
// decompactor reproduces the original bit for bit, which is what the tests lean on.

//! The 16-byte to 8-byte compaction pass and its jump renumbering.

use log::debug;

use crate::core::{CompileError, CompileResult};
use crate::gen::TargetGeneration;
use crate::isa::instruction::{
    CompactInstruction, FullInstruction, Instruction, Opcode,
};
use crate::isa::reg::{ARF_IP, RegFile};

/// One generation's four compaction lookup tables.
pub struct CompactionTables {
    pub control: [u32; 32],
    pub datatype: [u32; 32],
    pub subreg: [u16; 32],
    pub src: [u16; 32],
}

/// Table set shared by the first parts with compaction support; Gen5 uses it
/// unchanged.
pub static G45_TABLES: CompactionTables = CompactionTables {
    control: [
        0b00000000000000000,
        0b01000000000000000,
        0b00110000000000000,
        0b00000000000000010,
        0b00100000000000000,
        0b00010000000000000,
        0b01000000000100000,
        0b01000000100000000,
        0b01010000000100000,
        0b00000000100000010,
        0b11000000000000000,
        0b00001000100000010,
        0b01001000100000000,
        0b00000000100000000,
        0b11000000000100000,
        0b00001000100000000,
        0b10110000000000000,
        0b11010000000100000,
        0b00110000100000000,
        0b00100000100000000,
        0b01000000000001000,
        0b01000000000000100,
        0b00111100000000000,
        0b00101011000000000,
        0b00110000000010000,
        0b00010000100000000,
        0b01000000000100100,
        0b01000000000101000,
        0b00110000000000110,
        0b00000000000001010,
        0b01010000000101000,
        0b01010000000100100,
    ],
    datatype: [
        0b001000000000100001,
        0b001011010110101101,
        0b001000001000110001,
        0b001111011110111101,
        0b001011010110101100,
        0b001000000110101101,
        0b001000000000100000,
        0b010100010110110001,
        0b001100011000101101,
        0b001000000000100010,
        0b001000001000110110,
        0b010000001000110001,
        0b001000001000110010,
        0b011000001000110010,
        0b001111011110111100,
        0b001000000100101000,
        0b010100011000110001,
        0b001010010100101001,
        0b001000001000101001,
        0b010000001000110110,
        0b101000001000110001,
        0b001011011000101101,
        0b001000000100001001,
        0b001011011000101100,
        0b110100011000110001,
        0b001000001110111101,
        0b110000001000110001,
        0b011000000100101010,
        0b101000001000101001,
        0b001011010110001100,
        0b001000000110100001,
        0b001010010100001000,
    ],
    subreg: [
        0b000000000000000,
        0b000000010000000,
        0b000001000000000,
        0b000100000000000,
        0b000000000100000,
        0b100000000000000,
        0b000000000010000,
        0b001100000000000,
        0b001010000000000,
        0b000000100000000,
        0b001000000000000,
        0b000000000001000,
        0b000000001000000,
        0b000000000000001,
        0b000010000000000,
        0b000000010100000,
        0b000000000000111,
        0b000001000100000,
        0b011000000000000,
        0b000000110000000,
        0b000000000000010,
        0b000000000000100,
        0b000000001100000,
        0b000100000000010,
        0b001110011000110,
        0b001110100001000,
        0b000110011000110,
        0b000001000011000,
        0b000110010000100,
        0b001100000000110,
        0b000000010000110,
        0b000001000110000,
    ],
    src: [
        0b000000000000,
        0b010001101000,
        0b010110001000,
        0b011010010000,
        0b001101001000,
        0b010110001010,
        0b010101110000,
        0b011001111000,
        0b001000101000,
        0b000000101000,
        0b010001010000,
        0b111101101100,
        0b010110001100,
        0b010001101100,
        0b011010010100,
        0b010001001100,
        0b001100101000,
        0b000000000010,
        0b111101001100,
        0b011001101000,
        0b010101001000,
        0b000000000100,
        0b000000101100,
        0b010001101010,
        0b000000111000,
        0b010101011000,
        0b000100100000,
        0b010110000000,
        0b010000000100,
        0b010000111000,
        0b000101100000,
        0b111101110100,
    ],
};

pub static GEN6_TABLES: CompactionTables = CompactionTables {
    control: [
        0b00000000000000000,
        0b01000000000000000,
        0b00110000000000000,
        0b00000000100000000,
        0b00010000000000000,
        0b00001000100000000,
        0b00000000100000010,
        0b00000000000000010,
        0b01000000100000000,
        0b01010000000000000,
        0b10110000000000000,
        0b00100000000000000,
        0b11010000000000000,
        0b11000000000000000,
        0b01001000100000000,
        0b01000000000001000,
        0b01000000000000100,
        0b00000000000001000,
        0b00000000000000100,
        0b00111000100000000,
        0b00001000100000010,
        0b00110000100000000,
        0b00110000000000001,
        0b00100000000000001,
        0b00110000000000010,
        0b00110000000000101,
        0b00110000000001001,
        0b00110000000010000,
        0b00110000000000011,
        0b00110000000000100,
        0b00110000100001000,
        0b00100000000001001,
    ],
    datatype: [
        0b001001110000000000,
        0b001000110000100000,
        0b001001110000000001,
        0b001000000001100000,
        0b001010110100101001,
        0b001000000110101101,
        0b001100011000101100,
        0b001011110110101101,
        0b001000000111101100,
        0b001000000001100001,
        0b001000110010100101,
        0b001000000001000001,
        0b001000001000110001,
        0b001000001000101001,
        0b001000000000100000,
        0b001000001000110010,
        0b001010010100101001,
        0b001011010010100101,
        0b001000000110100101,
        0b001100011000101001,
        0b001011011000101100,
        0b001011010110100101,
        0b001011110110100101,
        0b001111011110111101,
        0b001111011110111100,
        0b001111011110111101,
        0b001111011110011101,
        0b001111011110111110,
        0b001000000000100001,
        0b001000000000100010,
        0b001001111111011101,
        0b001000001110111110,
    ],
    subreg: [
        0b000000000000000,
        0b000000000000100,
        0b000000110000000,
        0b111000000000000,
        0b011110000001000,
        0b000010000000000,
        0b000000000010000,
        0b000110000001100,
        0b001000000000000,
        0b000001000000000,
        0b000001010010100,
        0b000000001010110,
        0b010000000000000,
        0b110000000000000,
        0b000100000000000,
        0b000000010000000,
        0b000000000001000,
        0b100000000000000,
        0b000001010000000,
        0b001010000000000,
        0b001100000000000,
        0b000000001010100,
        0b101101010010100,
        0b010100000000000,
        0b000000010001111,
        0b011000000000000,
        0b111110000000000,
        0b101000000000000,
        0b000000000001111,
        0b000100010001111,
        0b001000010001111,
        0b000110000000000,
    ],
    src: [
        0b000000000000,
        0b010110001000,
        0b010001101000,
        0b001000101000,
        0b011010010000,
        0b000100100000,
        0b010001101100,
        0b010101110000,
        0b011001111000,
        0b001100101000,
        0b010110001100,
        0b001000100000,
        0b010110001010,
        0b000000000010,
        0b010101010000,
        0b010101101000,
        0b111101001100,
        0b111100101100,
        0b011001110000,
        0b010110001001,
        0b010101011000,
        0b001101001000,
        0b010000101100,
        0b010000000000,
        0b001101110000,
        0b001100010000,
        0b001100000000,
        0b010001101010,
        0b001101111000,
        0b000001110000,
        0b001100100000,
        0b001101010000,
    ],
};

pub static GEN7_TABLES: CompactionTables = CompactionTables {
    control: [
        0b0000000000000000010,
        0b0000100000000000000,
        0b0000100000000000001,
        0b0000100000000000010,
        0b0000100000000000011,
        0b0000100000000000100,
        0b0000100000000000101,
        0b0000100000000000111,
        0b0000100000000001000,
        0b0000100000000001001,
        0b0000100000000001101,
        0b0000110000000000000,
        0b0000110000000000001,
        0b0000110000000000010,
        0b0000110000000000011,
        0b0000110000000000100,
        0b0000110000000000101,
        0b0000110000000000111,
        0b0000110000000001001,
        0b0000110000000001101,
        0b0000110000000010000,
        0b0000110000100000000,
        0b0001000000000000000,
        0b0001000000000000010,
        0b0001000000000000100,
        0b0001000000100000000,
        0b0010110000000000000,
        0b0010110000000010000,
        0b0011000000000000000,
        0b0011000000100000000,
        0b0101000000000000000,
        0b0101000000100000000,
    ],
    datatype: [
        0b001000000000000001,
        0b001000000000100000,
        0b001000000000100001,
        0b001000000001100001,
        0b001000000010111101,
        0b001000001011111101,
        0b001000001110100001,
        0b001000001110100101,
        0b001000001110111101,
        0b001000010000100001,
        0b001000110000100000,
        0b001000110000100001,
        0b001001010010100101,
        0b001001110010100100,
        0b001001110010100101,
        0b001111001110111101,
        0b001111011110011101,
        0b001111011110111100,
        0b001111011110111101,
        0b001111111110111100,
        0b000000001000001100,
        0b001000000000111101,
        0b001000000010100101,
        0b001000010000100000,
        0b001001010010100100,
        0b001001110010000100,
        0b001010010100001001,
        0b001101111110111101,
        0b001111111110111101,
        0b001011110110101100,
        0b001010010100101000,
        0b001010110100101000,
    ],
    subreg: [
        0b000000000000000,
        0b000000000000001,
        0b000000000001000,
        0b000000000001111,
        0b000000000010000,
        0b000000010000000,
        0b000000100000000,
        0b000000110000000,
        0b000001000000000,
        0b000001000010000,
        0b000010100000000,
        0b001000000000000,
        0b001000000000001,
        0b001000010000001,
        0b001000010000010,
        0b001000010000011,
        0b001000010000100,
        0b001000010000111,
        0b001000010001000,
        0b001000010001110,
        0b001000010001111,
        0b001000110000000,
        0b001000111101000,
        0b010000000000000,
        0b010000110000000,
        0b011000000000000,
        0b011110010000111,
        0b100000000000000,
        0b101000000000000,
        0b110000000000000,
        0b111000000000000,
        0b111000000011100,
    ],
    src: [
        0b000000000000,
        0b000000000010,
        0b000000010000,
        0b000000010010,
        0b000000011000,
        0b000000100000,
        0b000000101000,
        0b000001001000,
        0b000001010000,
        0b000001110000,
        0b000001111000,
        0b001100000000,
        0b001100000010,
        0b001100001000,
        0b001100010000,
        0b001100010010,
        0b001100100000,
        0b001100101000,
        0b001100111000,
        0b001101000000,
        0b001101000010,
        0b001101001000,
        0b001101010000,
        0b001101100000,
        0b001101101000,
        0b001101110000,
        0b001101110001,
        0b001101111000,
        0b010001101000,
        0b010001101001,
        0b010001101010,
        0b010110001000,
    ],
};

fn table_index<T: Copy + PartialEq>(table: &[T; 32], value: T) -> Option<u32> {
    table.iter().position(|&entry| entry == value).map(|i| i as u32)
}

/// Compacted immediates carry 12 low bits plus one bit replicated through
/// the top 20.
fn is_compactable_immediate(imm: u32) -> bool {
    let high = imm & !0xFFF;
    high == 0 || high == 0xFFFF_F000
}

/// Jump fields live outside the table-covered bits, so branches never
/// compact; the renumbering pass depends on finding them full-width.
fn is_control_flow(opcode: Option<Opcode>) -> bool {
    matches!(
        opcode,
        Some(Opcode::If)
            | Some(Opcode::Iff)
            | Some(Opcode::Else)
            | Some(Opcode::Endif)
            | Some(Opcode::Do)
            | Some(Opcode::While)
            | Some(Opcode::Break)
            | Some(Opcode::Continue)
            | Some(Opcode::Halt)
            | Some(Opcode::Jmpi)
    )
}

/// Try to re-encode `src` as a 64-bit record. Returns `None` when any field
/// group misses the tables or the instruction is excluded outright.
pub fn try_compact(
    gen: TargetGeneration,
    tables: &CompactionTables,
    src: &FullInstruction,
) -> Option<CompactInstruction> {
    debug_assert!(!src.cmpt_control());

    if is_control_flow(src.opcode()) {
        return None;
    }
    // ADDs to the instruction pointer are jumps in disguise; the renumber
    // pass needs them full-width.
    if src.dest_reg_file() == RegFile::Architecture as u32 && src.dest_reg_nr() == ARF_IP {
        return None;
    }

    let is_immediate = src.src0_reg_file() == RegFile::Immediate as u32
        || src.src1_reg_file() == RegFile::Immediate as u32;
    if is_immediate && (!gen.compacts_immediates() || !is_compactable_immediate(src.imm_ud())) {
        return None;
    }

    let mut control_key = src.bits(31, 31) << 16 | src.bits(23, 8);
    if gen == TargetGeneration::Gen7 {
        // The flag register bits fold into the control index here.
        control_key |= src.bits(90, 89) << 17;
    }
    let datatype_key = src.bits(63, 61) << 15 | src.bits(46, 32);
    let mut subreg_key = (src.bits(52, 48) | src.bits(68, 64) << 5) as u16;
    if !is_immediate {
        subreg_key |= (src.bits(100, 96) << 10) as u16;
    }
    let src0_key = src.bits(88, 77) as u16;

    let mut dst = CompactInstruction::new();
    dst.set_bits(6, 0, src.opcode_raw());
    dst.set_debug_control(src.debug_control());
    dst.set_control_index(table_index(&tables.control, control_key)?);
    dst.set_datatype_index(table_index(&tables.datatype, datatype_key)?);
    dst.set_subreg_index(table_index(&tables.subreg, subreg_key)?);
    dst.set_acc_wr_control(src.acc_wr_control());
    dst.set_cond_modifier(src.cond_modifier());
    if gen.compact_carries_flag_subreg() {
        dst.set_flag_subreg_nr(src.flag_subreg_nr());
    }
    dst.set_cmpt_control(true);
    dst.set_src0_index(table_index(&tables.src, src0_key)?);
    if is_immediate {
        dst.set_src1_index(src.imm_ud() >> 8 & 0x1F);
    } else {
        let src1_key = src.bits(120, 109) as u16;
        dst.set_src1_index(table_index(&tables.src, src1_key)?);
    }
    dst.set_dest_reg_nr(src.dest_reg_nr());
    dst.set_src0_reg_nr(src.src0_reg_nr());
    if is_immediate {
        dst.set_src1_reg_nr(src.imm_ud() & 0xFF);
    } else {
        dst.set_src1_reg_nr(src.src1_reg_nr());
    }
    Some(dst)
}

/// Expand a 64-bit record back to the 128-bit form it was compacted from.
pub fn uncompact(
    gen: TargetGeneration,
    tables: &CompactionTables,
    src: &CompactInstruction,
) -> FullInstruction {
    let mut dst = FullInstruction::new();
    dst.set_bits(6, 0, src.opcode_raw());
    dst.set_bits(30, 30, src.debug_control());

    let control = tables.control[src.control_index() as usize];
    dst.set_bits(31, 31, control >> 16 & 0x1);
    dst.set_bits(23, 8, control & 0xFFFF);
    if gen == TargetGeneration::Gen7 {
        dst.set_bits(90, 89, control >> 17);
    }

    let datatype = tables.datatype[src.datatype_index() as usize];
    dst.set_bits(63, 61, datatype >> 15);
    dst.set_bits(46, 32, datatype & 0x7FFF);

    // The source register file fields travel in the datatype table.
    let is_immediate = dst.src0_reg_file() == RegFile::Immediate as u32
        || dst.src1_reg_file() == RegFile::Immediate as u32;

    let subreg = tables.subreg[src.subreg_index() as usize] as u32;
    dst.set_bits(100, 96, subreg >> 10);
    dst.set_bits(68, 64, subreg >> 5 & 0x1F);
    dst.set_bits(52, 48, subreg & 0x1F);

    dst.set_acc_wr_control(src.acc_wr_control());
    dst.set_cond_modifier(src.cond_modifier());
    if gen.compact_carries_flag_subreg() {
        dst.set_flag_subreg_nr(src.flag_subreg_nr());
    }

    dst.set_bits(88, 77, tables.src[src.src0_index() as usize] as u32);
    if is_immediate {
        // The 5-bit index is the immediate's bits 12:8, with its top bit
        // replicated through the high 20 bits.
        let high5 = src.src1_index() as i32;
        dst.set_imm_ud(((high5 << 27) >> 19) as u32 | src.src1_reg_nr());
    } else {
        dst.set_bits(120, 109, tables.src[src.src1_index() as usize] as u32);
        dst.set_src1_reg_nr(src.src1_reg_nr());
    }
    dst.set_dest_reg_nr(src.dest_reg_nr());
    dst.set_src0_reg_nr(src.src0_reg_nr());
    dst
}

fn compacted_nop() -> CompactInstruction {
    let mut nop = CompactInstruction::new();
    nop.set_opcode(Opcode::Nop);
    nop.set_cmpt_control(true);
    nop
}

/// Instructions halved between a branch and its target, from the
/// before-compaction position counts.
fn compacted_between(old_ip: i32, old_target_ip: i32, compacted_counts: &[i32]) -> i32 {
    compacted_counts[old_target_ip as usize] - compacted_counts[old_ip as usize]
}

/// Compact a finished stream and renumber every jump field for the new
/// byte layout.
pub fn compact_instructions(
    gen: TargetGeneration,
    insns: Vec<FullInstruction>,
) -> CompileResult<Vec<Instruction>> {
    let Some(tables) = gen.compaction_tables() else {
        return Ok(insns.into_iter().map(Instruction::Full).collect());
    };

    let count = insns.len();
    let mut out: Vec<Instruction> = Vec::with_capacity(count);
    // Source index of each output instruction.
    let mut old_ip: Vec<usize> = Vec::with_capacity(count);
    // Compacted instructions (minus alignment NOPs) before each source index.
    let mut compacted_counts: Vec<i32> = vec![0; count + 1];

    let mut byte_offset = 0usize;
    let mut compacted_count = 0i32;
    for (src_index, src) in insns.iter().enumerate() {
        compacted_counts[src_index] = compacted_count;

        if let Some(compact) = try_compact(gen, tables, src) {
            out.push(Instruction::Compact(compact));
            old_ip.push(src_index);
            compacted_count += 1;
            byte_offset += 8;
        } else {
            // An end-of-thread SEND must not straddle a 16-byte boundary.
            let is_eot_send = matches!(src.opcode(), Some(Opcode::Send) | Some(Opcode::Sendc))
                && src.send_eot();
            if byte_offset % 16 != 0 && is_eot_send {
                out.push(Instruction::Compact(compacted_nop()));
                old_ip.push(src_index);
                byte_offset += 8;
                compacted_count -= 1;
                compacted_counts[src_index] = compacted_count;
            }
            out.push(Instruction::Full(*src));
            old_ip.push(src_index);
            byte_offset += 16;
        }
    }
    compacted_counts[count] = compacted_count;

    renumber_jumps(gen, &mut out, &old_ip, &compacted_counts)?;

    if byte_offset % 16 != 0 {
        out.push(Instruction::Compact(compacted_nop()));
    }

    debug!(
        "compacted {} of {} instructions",
        out.iter().filter(|insn| insn.is_compact()).count(),
        count
    );
    Ok(out)
}

fn renumber_jumps(
    gen: TargetGeneration,
    out: &mut [Instruction],
    old_ip: &[usize],
    compacted_counts: &[i32],
) -> CompileResult<()> {
    let bound = compacted_counts.len() as i32 - 1;
    let check = |target: i32| -> CompileResult<i32> {
        if target < 0 || target > bound {
            return Err(CompileError::MalformedControlFlow {
                reason: format!("jump target {target} outside the program"),
            });
        }
        Ok(target)
    };

    for (index, slot) in out.iter_mut().enumerate() {
        let Instruction::Full(insn) = slot else {
            continue;
        };
        let this_old_ip = old_ip[index] as i32;

        match insn.opcode() {
            Some(Opcode::Break) | Some(Opcode::Continue) | Some(Opcode::Halt) => {
                if gen >= TargetGeneration::Gen6 {
                    let jip = insn.jip();
                    let jip_target = check(this_old_ip + jip / 2)?;
                    insn.set_jip(jip - compacted_between(this_old_ip, jip_target, compacted_counts));
                    let uip = insn.uip();
                    let uip_target = check(this_old_ip + uip / 2)?;
                    insn.set_uip(uip - compacted_between(this_old_ip, uip_target, compacted_counts));
                } else {
                    let jump = insn.gen4_jump_count();
                    let target = check(this_old_ip + jump / 2)?;
                    insn.set_gen4_jump_count(
                        jump - compacted_between(this_old_ip, target, compacted_counts),
                    );
                }
            }
            Some(Opcode::If)
            | Some(Opcode::Iff)
            | Some(Opcode::Else)
            | Some(Opcode::Endif)
            | Some(Opcode::While) => {
                if gen >= TargetGeneration::Gen6 {
                    let jump = insn.gen6_jump_count();
                    let target = check(this_old_ip + jump / 2)?;
                    insn.set_gen6_jump_count(
                        jump - compacted_between(this_old_ip, target, compacted_counts),
                    );
                } else {
                    let jump = insn.gen4_jump_count();
                    let target = check(this_old_ip + jump / 2)?;
                    insn.set_gen4_jump_count(
                        jump - compacted_between(this_old_ip, target, compacted_counts),
                    );
                }
            }
            Some(Opcode::Jmpi) => {
                // Forward landing jumps carry their count in the immediate.
                let jump = insn.imm_d();
                let target = check(this_old_ip + jump / 2 + 1)?;
                insn.set_imm_ud(
                    (jump - compacted_between(this_old_ip, target, compacted_counts)) as u32,
                );
            }
            Some(Opcode::Add)
                if insn.dest_reg_file() == RegFile::Architecture as u32
                    && insn.dest_reg_nr() == ARF_IP =>
            {
                // Single-program-flow branches: a byte offset in an
                // immediate ADD to the instruction pointer.
                let jump = insn.imm_d() >> 3;
                let target = check(this_old_ip + jump / 2)?;
                let jump = jump - compacted_between(this_old_ip, target, compacted_counts);
                insn.set_imm_ud((jump << 3) as u32);
            }
            _ => {}
        }
    }
    Ok(())
}

/// Flatten the mixed-width stream to loadable little-endian bytes.
pub fn serialize(instructions: &[Instruction]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(instructions.len() * 16);
    for insn in instructions {
        match insn {
            Instruction::Full(full) => {
                for dword in full.data {
                    bytes.extend_from_slice(&dword.to_le_bytes());
                }
            }
            Instruction::Compact(compact) => {
                bytes.extend_from_slice(&compact.data.to_le_bytes());
            }
        }
    }
    bytes
}
