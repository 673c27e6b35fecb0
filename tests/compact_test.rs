//! Stream-level compaction and jump-patching tests.
//!
//! Where the unit tests exercise single records, these build streams through
//! the real encoder entry points and check that compaction, padding, and the
//! relative-jump patches hold up over whole sequences.

use eugen::isa::compact::uncompact;
use eugen::isa::instruction::PREDICATE_NORMAL;
use eugen::isa::reg::{width_code, RegType};
use eugen::isa::{compact_instructions, serialize};
use eugen::{HardwareRegister, Instruction, InstructionStream, Opcode, TargetGeneration};

fn grf_ud(nr: u32) -> HardwareRegister {
    HardwareRegister::vec8_grf(nr, 0).retype(RegType::UD)
}

/// Emit `count` register-to-register UD MOVs, all of which the compaction
/// tables cover.
fn emit_movs(stream: &mut InstructionStream, count: u32) {
    for i in 0..count {
        stream.mov(grf_ud(10 + i), grf_ud(2)).unwrap();
    }
}

#[test]
fn test_jmpi_landing_scales_with_generation() {
    // Jump offsets count 16-byte units before Gen5 and 8-byte units after.
    for (gen, scale) in [(TargetGeneration::Gen4, 1), (TargetGeneration::Gen5, 2)] {
        let mut stream = InstructionStream::new(gen, false);
        let jmp = stream.emit_jmpi().unwrap();
        emit_movs(&mut stream, 3);
        stream.land_forward_jump(jmp);
        assert_eq!(stream.get(jmp).imm_ud(), 3 * scale);
    }
}

#[test]
fn test_single_program_flow_if_patches_ip_offset() {
    let mut stream = InstructionStream::new(TargetGeneration::Gen4, true);
    stream.set_predicate_control(PREDICATE_NORMAL);
    let open = stream.emit_if(width_code(8)).unwrap();
    emit_movs(&mut stream, 2);
    stream.emit_endif(open).unwrap();

    // The conditional degraded to a predicated ADD on the instruction
    // pointer; no branch opcode appears and the byte offset skips the body.
    assert_eq!(stream.len(), 3);
    let add = stream.get(open);
    assert_eq!(add.opcode(), Some(Opcode::Add));
    assert_eq!(add.imm_ud(), 3 * 16);
}

#[test]
fn test_encoder_stream_round_trips_through_compaction() {
    let gen = TargetGeneration::Gen7;
    let mut stream = InstructionStream::new(gen, false);
    emit_movs(&mut stream, 4);
    let originals = stream.into_instructions();

    let compacted = compact_instructions(gen, originals.clone()).unwrap();
    assert_eq!(compacted.len(), originals.len());

    let tables = gen.compaction_tables().unwrap();
    for (got, want) in compacted.iter().zip(&originals) {
        match got {
            Instruction::Compact(compact) => {
                assert_eq!(uncompact(gen, tables, compact).data, want.data);
            }
            Instruction::Full(_) => panic!("plain MOV failed to compact"),
        }
    }
}

#[test]
fn test_eot_send_realigned_to_sixteen_bytes() {
    // Three compactable MOVs put the SEND at byte 24; a compacted NOP must
    // slide it back onto a 16-byte boundary.
    let gen = TargetGeneration::Gen7;
    let mut stream = InstructionStream::new(gen, false);
    emit_movs(&mut stream, 3);
    stream
        .fb_write(
            HardwareRegister::null().retype(RegType::UW),
            0,
            HardwareRegister::vec8_grf(0, 0).retype(RegType::UW),
            0,
            6,
            0,
            false,
            true,
        )
        .unwrap();

    let compacted = compact_instructions(gen, stream.into_instructions()).unwrap();
    let bytes = serialize(&compacted);
    assert_eq!(bytes.len() % 16, 0);

    let mut offset = 0;
    let mut send_offset = None;
    let mut saw_nop_before_send = false;
    for insn in &compacted {
        match insn {
            Instruction::Full(full) if full.opcode() == Some(Opcode::Send) => {
                send_offset = Some(offset);
                break;
            }
            Instruction::Compact(compact) => {
                if compact.opcode() == Some(Opcode::Nop) {
                    saw_nop_before_send = true;
                }
            }
            Instruction::Full(_) => {}
        }
        offset += insn.byte_len();
    }
    assert!(saw_nop_before_send);
    assert_eq!(send_offset.map(|o| o % 16), Some(0));
}

#[test]
fn test_loop_jump_survives_renumbering() {
    // A backward WHILE jump measured in full-width records has to be
    // rewritten once the loop body shrinks to 8-byte records.
    let gen = TargetGeneration::Gen7;
    let mut stream = InstructionStream::new(gen, false);
    let do_handle = stream.emit_do(width_code(8)).unwrap();
    emit_movs(&mut stream, 2);
    let while_handle = stream.emit_while(do_handle, width_code(8)).unwrap();

    let originals = stream.into_instructions();
    let while_record = &originals[while_handle];
    assert_eq!(while_record.gen6_jump_count(), 2 * -2);

    let compacted = compact_instructions(gen, originals.clone()).unwrap();

    // The two body MOVs compacted, so the backward distance in 8-byte units
    // is unchanged: two compact records still span two units.
    let patched = compacted
        .iter()
        .find_map(|insn| match insn {
            Instruction::Full(full) if full.opcode() == Some(Opcode::While) => Some(full),
            _ => None,
        })
        .expect("WHILE must stay full-width");
    assert_eq!(patched.gen6_jump_count(), -2);
}
