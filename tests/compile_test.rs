//! End-to-end compilation tests.
//!
//! These tests run small shader programs through the whole pipeline —
//! translation, jump fixup, compaction, serialization — and decode the
//! returned byte buffer back into instruction records to check what the
//! hardware would actually see.

use eugen::ir::{OperandClass, SwizzleSel};
use eugen::isa::instruction::{SFID_DATAPORT_READ, SFID_MATH, SFID_SAMPLER};
use eugen::{
    CompactInstruction, CompileContext, CompileError, CompileOptions, DstOperand, FullInstruction,
    Instruction, IrInstruction, IrOp, Opcode, SrcOperand, TargetGeneration, WriteMask,
};

const ALL_GENERATIONS: [TargetGeneration; 4] = [
    TargetGeneration::Gen4,
    TargetGeneration::Gen5,
    TargetGeneration::Gen6,
    TargetGeneration::Gen7,
];

fn temp_src(index: u32) -> SrcOperand {
    SrcOperand::new(OperandClass::Temporary, index)
}

fn temp_dst(index: u32) -> DstOperand {
    DstOperand::new(OperandClass::Temporary, index)
}

fn input_src(index: u32) -> SrcOperand {
    SrcOperand::new(OperandClass::Input, index)
}

/// Walk the serialized buffer back into records. The compaction bit sits at
/// the same position in both widths, so the first dword decides how far to
/// step.
fn decode(bytes: &[u8]) -> Vec<Instruction> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let dword = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap());
        if dword >> 29 & 1 != 0 {
            let data = u64::from_le_bytes(bytes[pos..pos + 8].try_into().unwrap());
            out.push(Instruction::Compact(CompactInstruction { data }));
            pos += 8;
        } else {
            let mut data = [0u32; 4];
            for (i, word) in data.iter_mut().enumerate() {
                *word =
                    u32::from_le_bytes(bytes[pos + 4 * i..pos + 4 * i + 4].try_into().unwrap());
            }
            out.push(Instruction::Full(FullInstruction { data }));
            pos += 16;
        }
    }
    out
}

fn full_records(bytes: &[u8]) -> Vec<FullInstruction> {
    decode(bytes)
        .into_iter()
        .filter_map(|insn| match insn {
            Instruction::Full(full) => Some(full),
            Instruction::Compact(_) => None,
        })
        .collect()
}

fn compile(gen: TargetGeneration, program: &[IrInstruction]) -> Vec<u8> {
    CompileContext::new(gen, CompileOptions::default())
        .compile(program)
        .unwrap()
}

/// The smallest complete fragment program:
///
///     t0 = input0
///     fb_write(t0)  # end of thread
fn create_copy_shader() -> Vec<IrInstruction> {
    vec![
        IrInstruction::new(IrOp::Mov)
            .with_dst(temp_dst(0))
            .with_src(0, input_src(0)),
        IrInstruction::new(IrOp::FbWrite).with_src(0, temp_src(0)),
    ]
}

/// A shader exercising both branch shapes:
///
///     t1.x = t0.x        (updates the flag)
///     if
///         t0.x = t0.x + 1.0
///     else
///         t0.x = t0.x + t0.y
///     endif
///     loop
///         t1.x = t0.x    (updates the flag)
///         break          (predicated on it)
///     endloop
///     fb_write(t0)
fn create_branching_shader() -> Vec<IrInstruction> {
    let mut flag_update = IrInstruction::new(IrOp::Mov)
        .with_dst(temp_dst(1).masked(WriteMask::X))
        .with_src(0, temp_src(0));
    flag_update.cond_update = true;

    vec![
        IrInstruction::new(IrOp::Mov)
            .with_dst(temp_dst(0))
            .with_src(0, input_src(0)),
        flag_update,
        IrInstruction::new(IrOp::If),
        IrInstruction::new(IrOp::Add)
            .with_dst(temp_dst(0).masked(WriteMask::X))
            .with_src(0, temp_src(0))
            .with_src(1, temp_src(0).swizzled([SwizzleSel::One; 4])),
        IrInstruction::new(IrOp::Else),
        IrInstruction::new(IrOp::Add)
            .with_dst(temp_dst(0).masked(WriteMask::X))
            .with_src(0, temp_src(0))
            .with_src(1, temp_src(0).swizzled([SwizzleSel::Y; 4])),
        IrInstruction::new(IrOp::Endif),
        IrInstruction::new(IrOp::BeginLoop),
        flag_update,
        IrInstruction::new(IrOp::Break),
        IrInstruction::new(IrOp::EndLoop),
        IrInstruction::new(IrOp::FbWrite).with_src(0, temp_src(0)),
    ]
}

#[test]
fn test_copy_shader_compiles_on_every_generation() {
    for gen in ALL_GENERATIONS {
        let bytes = compile(gen, &create_copy_shader());
        assert!(!bytes.is_empty(), "{gen:?} produced nothing");
        assert_eq!(bytes.len() % 16, 0, "{gen:?} buffer not 16-byte aligned");

        let eot_count = full_records(&bytes)
            .iter()
            .filter(|record| record.send_eot())
            .count();
        assert_eq!(eot_count, 1, "{gen:?} must end the thread exactly once");
    }
}

#[test]
fn test_gen4_stays_full_width() {
    let bytes = compile(TargetGeneration::Gen4, &create_copy_shader());
    assert!(decode(&bytes).iter().all(|insn| !insn.is_compact()));

    // The thread-ending SEND is the final record.
    let records = full_records(&bytes);
    let last = records.last().unwrap();
    assert_eq!(last.opcode(), Some(Opcode::Send));
    assert!(last.send_eot());
}

#[test]
fn test_math_lowering_diverges_by_generation() {
    // t1.x = 1 / t0.x; fb_write(t1)
    let program = vec![
        IrInstruction::new(IrOp::Mov)
            .with_dst(temp_dst(0))
            .with_src(0, input_src(0)),
        IrInstruction::new(IrOp::Rcp)
            .with_dst(temp_dst(1).masked(WriteMask::X))
            .with_src(0, temp_src(0)),
        IrInstruction::new(IrOp::FbWrite).with_src(0, temp_src(1)),
    ];

    // Pre-Gen6: a SEND to the shared math unit.
    let bytes = compile(TargetGeneration::Gen4, &program);
    assert!(full_records(&bytes).iter().any(|record| {
        record.opcode() == Some(Opcode::Send) && record.bits(123, 120) == SFID_MATH
    }));

    // Gen6+: the native math pipeline instruction.
    let bytes = compile(TargetGeneration::Gen7, &program);
    assert!(full_records(&bytes)
        .iter()
        .any(|record| record.opcode() == Some(Opcode::Math)));
}

#[test]
fn test_branching_shader_compiles_on_every_generation() {
    for gen in ALL_GENERATIONS {
        let bytes = compile(gen, &create_branching_shader());
        assert_eq!(bytes.len() % 16, 0, "{gen:?} buffer not 16-byte aligned");
        let records = full_records(&bytes);
        assert_eq!(
            records.iter().filter(|r| r.send_eot()).count(),
            1,
            "{gen:?} must end the thread exactly once"
        );
        // Branches always survive compaction at full width.
        assert!(records
            .iter()
            .any(|r| matches!(r.opcode(), Some(Opcode::If) | Some(Opcode::Iff))));
        assert!(records.iter().any(|r| r.opcode() == Some(Opcode::While)));
    }
}

#[test]
fn test_gen4_loop_break_is_patched() {
    let bytes = compile(TargetGeneration::Gen4, &create_branching_shader());
    let records = full_records(&bytes);
    let brk = records
        .iter()
        .find(|r| r.opcode() == Some(Opcode::Break))
        .unwrap();
    // The loop back-patch pass filled the jump in; zero would fall through.
    assert!(brk.gen4_jump_count() > 0);
}

#[test]
fn test_gen6_break_gets_both_offsets() {
    let bytes = compile(TargetGeneration::Gen6, &create_branching_shader());
    let records = full_records(&bytes);
    let brk = records
        .iter()
        .find(|r| r.opcode() == Some(Opcode::Break))
        .unwrap();
    assert!(brk.jip() > 0);
    assert!(brk.uip() > brk.jip());
}

#[test]
fn test_single_program_flow_emits_no_branches() {
    // Same conditional, but lowered to predicated instruction-pointer
    // arithmetic; no loop, which has no single-program-flow form worth
    // testing here.
    let program = vec![
        IrInstruction::new(IrOp::Mov)
            .with_dst(temp_dst(0))
            .with_src(0, input_src(0)),
        {
            let mut inst = IrInstruction::new(IrOp::Mov)
                .with_dst(temp_dst(1).masked(WriteMask::X))
                .with_src(0, temp_src(0));
            inst.cond_update = true;
            inst
        },
        IrInstruction::new(IrOp::If),
        IrInstruction::new(IrOp::Add)
            .with_dst(temp_dst(0).masked(WriteMask::X))
            .with_src(0, temp_src(0))
            .with_src(1, temp_src(0).swizzled([SwizzleSel::One; 4])),
        IrInstruction::new(IrOp::Endif),
        IrInstruction::new(IrOp::FbWrite).with_src(0, temp_src(0)),
    ];
    let options = CompileOptions {
        single_program_flow: true,
        ..CompileOptions::default()
    };
    let bytes = CompileContext::new(TargetGeneration::Gen4, options)
        .compile(&program)
        .unwrap();
    for record in full_records(&bytes) {
        assert!(
            !matches!(
                record.opcode(),
                Some(Opcode::If) | Some(Opcode::Iff) | Some(Opcode::Else) | Some(Opcode::Endif)
            ),
            "branch instruction under single program flow"
        );
    }
}

#[test]
fn test_texture_sample_targets_the_sampler() {
    // t1 = sample(unit 0, t0.xy); fb_write(t1)
    let program = vec![
        IrInstruction::new(IrOp::Mov)
            .with_dst(temp_dst(0))
            .with_src(0, input_src(0)),
        IrInstruction::new(IrOp::Tex)
            .with_dst(temp_dst(1))
            .with_src(0, temp_src(0)),
        IrInstruction::new(IrOp::FbWrite).with_src(0, temp_src(1)),
    ];
    let bytes = compile(TargetGeneration::Gen4, &program);
    assert!(full_records(&bytes).iter().any(|record| {
        record.opcode() == Some(Opcode::Send) && record.bits(123, 120) == SFID_SAMPLER
    }));
}

#[test]
fn test_const_buffer_mode_reads_through_dataport() {
    let program = vec![
        IrInstruction::new(IrOp::Mov)
            .with_dst(temp_dst(0))
            .with_src(0, SrcOperand::new(OperandClass::Constant, 0)),
        IrInstruction::new(IrOp::FbWrite).with_src(0, temp_src(0)),
    ];
    let options = CompileOptions {
        const_buffer: Some(true),
        ..CompileOptions::default()
    };
    let bytes = CompileContext::new(TargetGeneration::Gen4, options)
        .compile(&program)
        .unwrap();
    assert!(full_records(&bytes).iter().any(|record| {
        record.opcode() == Some(Opcode::Send) && record.bits(123, 120) == SFID_DATAPORT_READ
    }));
}

#[test]
fn test_fragment_kill_masks_pixels() {
    let program = vec![
        IrInstruction::new(IrOp::Kil),
        IrInstruction::new(IrOp::FbWrite).with_src(0, input_src(0)),
    ];
    let bytes = compile(TargetGeneration::Gen4, &program);
    let records = full_records(&bytes);
    assert!(records.iter().any(|r| r.opcode() == Some(Opcode::Not)));
    assert!(records.iter().any(|r| r.opcode() == Some(Opcode::And)));
}

#[test]
fn test_unbalanced_control_flow_is_rejected() {
    for program in [
        vec![IrInstruction::new(IrOp::If)],
        vec![IrInstruction::new(IrOp::Endif)],
        vec![IrInstruction::new(IrOp::BeginLoop)],
        vec![IrInstruction::new(IrOp::Break)],
    ] {
        let result =
            CompileContext::new(TargetGeneration::Gen6, CompileOptions::default())
                .compile(&program);
        assert!(
            matches!(result, Err(CompileError::MalformedControlFlow { .. })),
            "{:?} must not compile",
            program[0].op
        );
    }
}
