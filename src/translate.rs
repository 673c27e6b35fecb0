// This module is the per-compilation driver: it walks the IR once and dispatches each
// instruction to an emission routine, bracketing every group with the ambient saturate
// and conditional-modifier state the way the hardware wants them armed. Vector IR
// operations are scalarized into one eight-wide instruction per channel of the write
// mask; the swizzle selectors Zero and One short-circuit into float immediates without
// touching the register file. Before emission the driver lays out the bottom of the
// register file: the two payload registers, the interpolated inputs, and either a block
// of pushed constants or three staging registers that constants are fetched into
// through the dataport, chosen by a register-pressure heuristic. Operations the
// hardware has no single instruction for are lowered as short sequences: MIN/MAX as a
// compare and a predicated move, set-on comparisons as a compare and a pair of literal
// moves, multiply-add as a multiply and an add, and fragment kill as a mask-register
// AND into the thread header. Structured control flow goes through the linearizer's
// bounded stacks, and the finished stream is jump-fixed, compacted and serialized.

//! The IR-to-instruction-stream translation driver.

use log::debug;

use crate::core::{
    scan_intervals, CompileError, CompileResult, LiveIntervals, RegisterFile, GRF_COUNT,
};
use crate::gen::TargetGeneration;
use crate::ir::{IrInstruction, IrOp, OperandClass, SwizzleSel, WriteMask};
use crate::isa::compact::{compact_instructions, serialize};
use crate::isa::encode::{
    MATH_COS, MATH_EXP, MATH_INVERSE, MATH_LOG, MATH_POW, MATH_RSQ, MATH_SIN,
    SAMPLER_MESSAGE_SAMPLE, SAMPLER_MESSAGE_SAMPLE_BIAS, SAMPLER_SIMD16, SAMPLER_SIMD8,
};
use crate::isa::flow::FlowStacks;
use crate::isa::instruction::{
    CondModifier, Opcode, COMPRESSION_NONE, MASK_DISABLE, PREDICATE_NONE, PREDICATE_NORMAL,
};
use crate::isa::reg::{
    hstride_code, vstride_code, width_code, HardwareRegister, RegFile, RegType, ARF_MASK,
};
use crate::isa::stream::InstructionStream;

/// Binding table slots the driver hands to the shared units.
pub const SURFACE_RENDER_TARGET: u32 = 0;
pub const SURFACE_CONST_BUFFER: u32 = 1;
/// Texture unit `n` binds at `SURFACE_TEXTURE_BASE + n`.
pub const SURFACE_TEXTURE_BASE: u32 = 2;

/// Message register the constant-fetch header is staged in.
const CONST_FETCH_MRF: u32 = 9;

/// Per-compilation options.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompileOptions {
    /// Collapse structured control flow into predicated instruction-pointer
    /// arithmetic instead of branch instructions.
    pub single_program_flow: bool,
    /// Fetch constants from a buffer surface through the dataport rather
    /// than reading them pushed into the register file. `None` decides from
    /// register pressure.
    pub const_buffer: Option<bool>,
}

/// One compilation: owns nothing between calls, hands back only the byte
/// buffer.
pub struct CompileContext {
    gen: TargetGeneration,
    options: CompileOptions,
}

impl CompileContext {
    pub fn new(gen: TargetGeneration, options: CompileOptions) -> Self {
        CompileContext { gen, options }
    }

    /// Translate, fix jumps, compact, serialize.
    pub fn compile(&mut self, program: &[IrInstruction]) -> CompileResult<Vec<u8>> {
        let stream = self.emit_stream(program)?;
        let compacted = compact_instructions(self.gen, stream.into_instructions())?;
        Ok(serialize(&compacted))
    }

    /// Everything up to compaction, for inspection of the full-width stream.
    fn emit_stream(&self, program: &[IrInstruction]) -> CompileResult<InstructionStream> {
        let mut translator = Translator::new(self.gen, self.options, program)?;
        translator.run()?;
        translator.stream.fixup_jumps()?;
        Ok(translator.stream)
    }
}

/// A scalar unsigned-word view of a general register, for the thread-header
/// pixel mask manipulations.
fn uw1_grf(nr: u32) -> HardwareRegister {
    HardwareRegister::with_region(
        RegFile::General,
        nr,
        0,
        RegType::UW,
        vstride_code(0),
        width_code(1),
        hstride_code(0),
    )
}

/// The execution-mask architecture register, one word in.
fn imask_reg() -> HardwareRegister {
    HardwareRegister::with_region(
        RegFile::Architecture,
        ARF_MASK,
        2,
        RegType::UW,
        vstride_code(0),
        width_code(1),
        hstride_code(0),
    )
}

fn same_reg(a: &HardwareRegister, b: &HardwareRegister) -> bool {
    a.file == b.file && a.nr == b.nr
}

/// Flip a comparison so its operands can swap sides.
fn reversed(cond: u32) -> u32 {
    match cond {
        c if c == CondModifier::L as u32 => CondModifier::G as u32,
        c if c == CondModifier::G as u32 => CondModifier::L as u32,
        c if c == CondModifier::Ge as u32 => CondModifier::Le as u32,
        c if c == CondModifier::Le as u32 => CondModifier::Ge as u32,
        c => c,
    }
}

/// Negate an operand; literal floats flip their sign bit instead of carrying
/// a negate flag the immediate encoding has no room for.
fn negated_operand(reg: HardwareRegister) -> HardwareRegister {
    if reg.is_immediate() {
        HardwareRegister::imm_f(-f32::from_bits(reg.imm))
    } else {
        reg.negated()
    }
}

struct Translator<'a> {
    gen: TargetGeneration,
    stream: InstructionStream,
    regs: RegisterFile,
    flow: FlowStacks,
    intervals: Option<LiveIntervals>,
    program: &'a [IrInstruction],
    position: usize,
    use_const_buffer: bool,
    /// First register of the pushed-constant block.
    const_base: u32,
    /// Staging registers constants are fetched into, one per source slot.
    const_regs: [u32; 3],
    /// Scratch word the kill sequence builds the inverted mask in.
    emit_mask_nr: u32,
}

impl<'a> Translator<'a> {
    fn new(
        gen: TargetGeneration,
        options: CompileOptions,
        program: &'a [IrInstruction],
    ) -> CompileResult<Self> {
        let mut nr_inputs = 0u32;
        let mut nr_consts = 0u32;
        let mut nr_temps = 0u32;
        {
            let mut note = |class: OperandClass, index: u32| match class {
                OperandClass::Input => nr_inputs = nr_inputs.max(index + 1),
                OperandClass::Constant => nr_consts = nr_consts.max(index + 1),
                OperandClass::Temporary => nr_temps = nr_temps.max(index + 1),
                OperandClass::Output => {}
            };
            for inst in program {
                for src in inst.srcs.iter().flatten() {
                    note(src.class, src.index);
                }
                if let Some(dst) = inst.dst {
                    note(dst.class, dst.index);
                }
            }
        }

        let mut regs = RegisterFile::new();

        // r0 thread header, r1 pixel setup.
        let mut reg_index = 2u32;

        // Interpolated inputs arrive as one eight-wide register per channel.
        for i in 0..nr_inputs {
            for channel in 0..4 {
                regs.bind(OperandClass::Input, i, channel, reg_index);
                reg_index += 1;
            }
        }

        let use_const_buffer = options
            .const_buffer
            .unwrap_or((nr_consts + nr_temps) * 4 + reg_index > 80);

        let mut const_base = 0;
        if !use_const_buffer {
            // Pushed constants pack eight floats per register.
            const_base = reg_index;
            reg_index += (4 * nr_consts).div_ceil(8);
        }

        let emit_mask_nr = reg_index;
        reg_index += 1;

        if reg_index as usize > GRF_COUNT - 2 {
            return Err(CompileError::InvalidOperand {
                reason: format!(
                    "payload layout needs {reg_index} registers, the file has {GRF_COUNT}"
                ),
            });
        }
        for nr in 0..reg_index {
            regs.prealloc(nr);
        }
        // GRF 126 and 127 are known to wedge the hardware.
        regs.prealloc(126);
        regs.prealloc(127);

        let mut const_regs = [0; 3];
        if use_const_buffer {
            for slot in &mut const_regs {
                *slot = regs.alloc(0, None);
            }
        }

        debug!(
            "layout: {nr_inputs} input(s), {nr_consts} constant(s) \
             ({}), first free register {reg_index}",
            if use_const_buffer { "fetched" } else { "pushed" }
        );

        let mut translator = Translator {
            gen,
            stream: InstructionStream::new(gen, options.single_program_flow),
            regs,
            flow: FlowStacks::new(),
            intervals: scan_intervals(program),
            program,
            position: 0,
            use_const_buffer,
            const_base,
            const_regs,
            emit_mask_nr,
        };
        translator.prealloc_sampler_results();
        Ok(translator)
    }

    /// The sampler writes four consecutive registers; claim the channels of
    /// every texture destination up front, while the file is still compact
    /// enough that first-fit hands them out adjacently.
    fn prealloc_sampler_results(&mut self) {
        let program = self.program;
        for inst in program {
            if !matches!(inst.op, IrOp::Tex | IrOp::Txb) {
                continue;
            }
            let Some(dst) = inst.dst else { continue };
            let mut prev = None;
            for channel in 0..4 {
                let reg = self.regs.get_reg(dst.class, dst.index, channel, 0, None);
                if let Some(prev) = prev {
                    debug_assert_eq!(reg.nr, prev + 1);
                }
                prev = Some(reg.nr);
            }
        }
    }

    fn run(&mut self) -> CompileResult<()> {
        self.stream.set_compression_control(COMPRESSION_NONE);
        for position in 0..self.program.len() {
            self.position = position;
            let inst = self.program[position];

            if self.use_const_buffer {
                self.fetch_constants(&inst)?;
            }
            if inst.cond_update {
                self.stream.set_conditional_mod(CondModifier::Nz as u32);
            } else {
                self.stream.set_conditional_mod(CondModifier::None as u32);
            }

            let mark = self.regs.mark_tmps();
            self.translate(&inst)?;
            self.regs.release_tmps(mark);

            if inst.cond_update {
                self.stream.set_predicate_control(PREDICATE_NORMAL);
            } else {
                self.stream.set_predicate_control(PREDICATE_NONE);
            }
        }
        self.flow.check_balanced()
    }

    fn translate(&mut self, inst: &IrInstruction) -> CompileResult<()> {
        match inst.op {
            IrOp::Mov => self.emit_alu1(inst, Opcode::Mov),
            IrOp::Frc => self.emit_alu1(inst, Opcode::Frc),
            IrOp::Flr => self.emit_alu1(inst, Opcode::Rndd),
            IrOp::Trunc => self.emit_alu1(inst, Opcode::Rndz),
            IrOp::Add => self.emit_alu2(inst, Opcode::Add, false),
            IrOp::Sub => self.emit_alu2(inst, Opcode::Add, true),
            IrOp::Mul => self.emit_alu2(inst, Opcode::Mul, false),
            IrOp::Mad => self.emit_mad(inst),
            IrOp::Min => self.emit_min_max(inst, true),
            IrOp::Max => self.emit_min_max(inst, false),
            IrOp::Slt => self.emit_sop(inst, CondModifier::L as u32),
            IrOp::Sge => self.emit_sop(inst, CondModifier::Ge as u32),
            IrOp::Seq => self.emit_sop(inst, CondModifier::Z as u32),
            IrOp::Sne => self.emit_sop(inst, CondModifier::Nz as u32),
            IrOp::Rcp => self.emit_math1(inst, MATH_INVERSE),
            IrOp::Rsq => self.emit_math1(inst, MATH_RSQ),
            IrOp::Sin => self.emit_math1(inst, MATH_SIN),
            IrOp::Cos => self.emit_math1(inst, MATH_COS),
            IrOp::Exp2 => self.emit_math1(inst, MATH_EXP),
            IrOp::Log2 => self.emit_math1(inst, MATH_LOG),
            IrOp::Pow => self.emit_pow(inst),
            IrOp::Tex => self.emit_tex(inst),
            IrOp::Txb => self.emit_txb(inst),
            IrOp::Kil => self.emit_kil(),
            IrOp::FbWrite => self.emit_fb_write(inst),
            IrOp::If => {
                let handle = self.stream.emit_if(width_code(8))?;
                self.flow.push_if(handle)
            }
            IrOp::Else => {
                let if_handle = self.flow.top_if()?;
                let else_handle = self.stream.emit_else(if_handle)?;
                self.flow.replace_top_if(else_handle)
            }
            IrOp::Endif => {
                let handle = self.flow.pop_if("ENDIF")?;
                self.stream.emit_endif(handle)
            }
            IrOp::BeginLoop => {
                let handle = self.stream.emit_do(width_code(8))?;
                self.flow.push_loop(handle)
            }
            IrOp::Break => {
                if !self.flow.in_loop() {
                    return Err(CompileError::MalformedControlFlow {
                        reason: "break outside of any loop".into(),
                    });
                }
                self.stream.emit_break(self.flow.open_ifs_in_loop())?;
                self.stream.set_predicate_control(PREDICATE_NONE);
                Ok(())
            }
            IrOp::Continue => {
                let do_handle = self.flow.top_loop()?;
                self.stream
                    .emit_continue(self.flow.open_ifs_in_loop(), do_handle)?;
                self.stream.set_predicate_control(PREDICATE_NONE);
                Ok(())
            }
            IrOp::EndLoop => {
                let do_handle = self.flow.pop_loop()?;
                let while_handle = self.stream.emit_while(do_handle, width_code(8))?;
                if self.gen.uses_mask_stacks() && !self.stream.single_program_flow {
                    self.stream.patch_loop_jumps(do_handle, while_handle);
                }
                Ok(())
            }
        }
    }

    // -- operand resolution -------------------------------------------------

    fn dst_operand(&self, inst: &IrInstruction) -> CompileResult<crate::ir::DstOperand> {
        inst.dst.ok_or_else(|| CompileError::InvalidOperand {
            reason: format!("{:?} needs a destination", inst.op),
        })
    }

    /// Register holding one destination channel, marked written.
    fn dst_reg(&mut self, inst: &IrInstruction, channel: usize) -> CompileResult<HardwareRegister> {
        let dst = self.dst_operand(inst)?;
        let tracked = self.regs.get_reg(
            dst.class,
            dst.index,
            channel,
            self.position,
            self.intervals.as_ref(),
        );
        self.regs.mark_written(dst.class, dst.index, channel);
        Ok(HardwareRegister::vec8_grf(tracked.nr, 0))
    }

    /// Resolve one channel of a source operand through its swizzle. The
    /// literal Zero and One lanes become float immediates; everything else
    /// reads a register, with the per-channel negate and the absolute-value
    /// modifier applied in that order.
    fn src_reg(
        &mut self,
        inst: &IrInstruction,
        slot: usize,
        channel: usize,
    ) -> CompileResult<HardwareRegister> {
        let src = inst.srcs[slot].ok_or_else(|| CompileError::InvalidOperand {
            reason: format!("{:?} needs source {slot}", inst.op),
        })?;
        let negate = src
            .negate
            .contains(WriteMask::from_bits_truncate(1 << channel));

        let component = match src.swizzle[channel] {
            SwizzleSel::X => 0,
            SwizzleSel::Y => 1,
            SwizzleSel::Z => 2,
            SwizzleSel::W => 3,
            sel => {
                let mut value = if sel == SwizzleSel::One { 1.0 } else { 0.0 };
                if negate {
                    value = -value;
                }
                return Ok(HardwareRegister::imm_f(value));
            }
        };

        let mut reg = match src.class {
            OperandClass::Constant if self.use_const_buffer => {
                // Fetched earlier in the instruction; extract the component
                // and smear it across the eight channels.
                HardwareRegister::vec8_grf(self.const_regs[slot], 0)
                    .stride(0, 1, 0)
                    .subreg(component as u32 * 4)
            }
            OperandClass::Constant => {
                let float_index = 4 * src.index + component as u32;
                HardwareRegister::vec1_grf(self.const_base + float_index / 8, float_index % 8)
            }
            class => {
                let tracked = self.regs.get_reg(
                    class,
                    src.index,
                    component,
                    self.position,
                    self.intervals.as_ref(),
                );
                HardwareRegister::vec8_grf(tracked.nr, 0)
            }
        };
        if negate {
            reg = reg.negated();
        }
        if src.abs {
            reg = reg.absolute();
        }
        Ok(reg)
    }

    /// Copy an immediate into a scratch register when it has to occupy a
    /// position the instruction word cannot encode it in.
    fn stage_if_immediate(
        &mut self,
        reg: HardwareRegister,
    ) -> CompileResult<HardwareRegister> {
        if !reg.is_immediate() {
            return Ok(reg);
        }
        let nr = self.regs.alloc_tmp(self.position, self.intervals.as_ref());
        let tmp = HardwareRegister::vec8_grf(nr, 0);
        self.stream.mov(tmp, reg)?;
        Ok(tmp)
    }

    /// Order two sources so any immediate lands in the second slot,
    /// staging through a scratch register when both are literals.
    fn route_commutative(
        &mut self,
        a: HardwareRegister,
        b: HardwareRegister,
    ) -> CompileResult<(HardwareRegister, HardwareRegister)> {
        if a.is_immediate() && !b.is_immediate() {
            Ok((b, a))
        } else {
            Ok((self.stage_if_immediate(a)?, b))
        }
    }

    /// Same, for a comparison: swapping sides flips the condition.
    fn route_compare(
        &mut self,
        a: HardwareRegister,
        b: HardwareRegister,
        cond: u32,
    ) -> CompileResult<(HardwareRegister, HardwareRegister, u32)> {
        if a.is_immediate() && !b.is_immediate() {
            Ok((b, a, reversed(cond)))
        } else {
            Ok((self.stage_if_immediate(a)?, b, cond))
        }
    }

    /// Native math takes plain general-register sources only; anything else
    /// goes through a scratch copy.
    fn math_operand(&mut self, reg: HardwareRegister) -> CompileResult<HardwareRegister> {
        if reg.file == RegFile::General && !reg.negate && !reg.abs {
            return Ok(reg);
        }
        let nr = self.regs.alloc_tmp(self.position, self.intervals.as_ref());
        let tmp = HardwareRegister::vec8_grf(nr, 0);
        self.stream.mov(tmp, reg)?;
        Ok(tmp)
    }

    // -- arithmetic groups --------------------------------------------------

    fn emit_alu1(&mut self, inst: &IrInstruction, opcode: Opcode) -> CompileResult<()> {
        let mask = self.dst_operand(inst)?.write_mask;
        self.stream.set_saturate(inst.saturate);
        for channel in mask.channels() {
            let dst = self.dst_reg(inst, channel)?;
            let src = self.src_reg(inst, 0, channel)?;
            self.stream.alu1(opcode, dst, src)?;
        }
        self.stream.set_saturate(false);
        Ok(())
    }

    fn emit_alu2(
        &mut self,
        inst: &IrInstruction,
        opcode: Opcode,
        negate_second: bool,
    ) -> CompileResult<()> {
        let mask = self.dst_operand(inst)?.write_mask;
        for channel in mask.channels() {
            let dst = self.dst_reg(inst, channel)?;
            let a = self.src_reg(inst, 0, channel)?;
            let mut b = self.src_reg(inst, 1, channel)?;
            if negate_second {
                b = negated_operand(b);
            }
            // Staging has to happen outside the saturate bracket.
            let (a, b) = self.route_commutative(a, b)?;
            self.stream.set_saturate(inst.saturate);
            self.stream.alu2(opcode, dst, a, b)?;
            self.stream.set_saturate(false);
        }
        Ok(())
    }

    /// Multiply-add as MUL then ADD; saturation belongs to the final ADD.
    fn emit_mad(&mut self, inst: &IrInstruction) -> CompileResult<()> {
        let mask = self.dst_operand(inst)?.write_mask;
        for channel in mask.channels() {
            let dst = self.dst_reg(inst, channel)?;
            let a = self.src_reg(inst, 0, channel)?;
            let b = self.src_reg(inst, 1, channel)?;
            let c = self.src_reg(inst, 2, channel)?;
            let (a, b) = self.route_commutative(a, b)?;
            self.stream.mul(dst, a, b)?;
            self.stream.set_saturate(inst.saturate);
            self.stream.add(dst, dst, c)?;
            self.stream.set_saturate(false);
        }
        Ok(())
    }

    /// MIN and MAX: copy the first source, then predicate-overwrite with the
    /// second where the comparison favors it. A destination aliasing either
    /// source works in a scratch register.
    fn emit_min_max(&mut self, inst: &IrInstruction, is_min: bool) -> CompileResult<()> {
        let mask = self.dst_operand(inst)?.write_mask;
        let base_cond = if is_min {
            CondModifier::L as u32
        } else {
            CondModifier::G as u32
        };
        self.stream.push_state()?;
        for channel in mask.channels() {
            let real_dst = self.dst_reg(inst, channel)?;
            let src0 = self.src_reg(inst, 0, channel)?;
            let src1 = self.src_reg(inst, 1, channel)?;

            let use_temp = same_reg(&real_dst, &src0) || same_reg(&real_dst, &src1);
            let dst = if use_temp {
                let nr = self.regs.alloc_tmp(self.position, self.intervals.as_ref());
                HardwareRegister::vec8_grf(nr, 0)
            } else {
                real_dst
            };

            self.stream.set_saturate(inst.saturate);
            self.stream.mov(dst, src0)?;
            self.stream.set_saturate(false);

            let (x, y, cond) = self.route_compare(src1, src0, base_cond)?;
            self.stream.cmp(HardwareRegister::null(), cond, x, y)?;

            self.stream.set_saturate(inst.saturate);
            self.stream.set_predicate_control(PREDICATE_NORMAL);
            self.stream.mov(dst, src1)?;
            self.stream.set_saturate(false);
            self.stream.set_predicate_control(PREDICATE_NONE);

            if use_temp {
                self.stream.mov(real_dst, dst)?;
            }
        }
        self.stream.pop_state()
    }

    /// Set-on comparisons produce 0.0 or 1.0 per channel: compare, write
    /// zero everywhere, then predicate-overwrite with one.
    fn emit_sop(&mut self, inst: &IrInstruction, cond: u32) -> CompileResult<()> {
        let mask = self.dst_operand(inst)?.write_mask;
        for channel in mask.channels() {
            let dst = self.dst_reg(inst, channel)?;
            let src0 = self.src_reg(inst, 0, channel)?;
            let src1 = self.src_reg(inst, 1, channel)?;
            self.stream.push_state()?;
            let (x, y, cond) = self.route_compare(src0, src1, cond)?;
            self.stream.cmp(HardwareRegister::null(), cond, x, y)?;
            self.stream.set_predicate_control(PREDICATE_NONE);
            self.stream.mov(dst, HardwareRegister::imm_f(0.0))?;
            self.stream.set_predicate_control(PREDICATE_NORMAL);
            self.stream.mov(dst, HardwareRegister::imm_f(1.0))?;
            self.stream.pop_state()?;
        }
        Ok(())
    }

    /// Scalar transcendental, broadcast from the first masked channel. The
    /// argument is always the source's first component.
    fn emit_math1(&mut self, inst: &IrInstruction, function: u32) -> CompileResult<()> {
        let mask = self.dst_operand(inst)?.write_mask;
        let Some(dst_chan) = mask.channels().next() else {
            return Ok(());
        };
        let dst = self.dst_reg(inst, dst_chan)?;
        let src = self.src_reg(inst, 0, 0)?;

        if self.gen.has_native_math() {
            let src = self.math_operand(src)?;
            self.stream.math1(dst, function, inst.saturate, 2, src)?;
        } else {
            self.stream.mov(HardwareRegister::message_reg(2), src)?;
            self.stream.math1(
                dst,
                function,
                inst.saturate,
                2,
                HardwareRegister::message_reg(2),
            )?;
        }
        Ok(())
    }

    fn emit_pow(&mut self, inst: &IrInstruction) -> CompileResult<()> {
        let mask = self.dst_operand(inst)?.write_mask;
        let Some(dst_chan) = mask.channels().next() else {
            return Ok(());
        };
        let dst = self.dst_reg(inst, dst_chan)?;
        let base = self.src_reg(inst, 0, 0)?;
        let exponent = self.src_reg(inst, 1, 0)?;

        if self.gen.has_native_math() {
            let base = self.math_operand(base)?;
            let exponent = self.math_operand(exponent)?;
            self.stream
                .math2(dst, MATH_POW, inst.saturate, base, exponent)?;
        } else {
            // Second argument rides in the following message register.
            self.stream.mov(HardwareRegister::message_reg(2), base)?;
            self.stream
                .mov(HardwareRegister::message_reg(3), exponent)?;
            self.stream.math1(
                dst,
                MATH_POW,
                inst.saturate,
                2,
                HardwareRegister::message_reg(2),
            )?;
        }
        Ok(())
    }

    // -- shared-function operations -----------------------------------------

    /// First response register of a sampler destination. All four channels
    /// were claimed contiguously up front; mark them written now.
    fn sampler_dst(&mut self, inst: &IrInstruction) -> CompileResult<HardwareRegister> {
        let dst = self.dst_operand(inst)?;
        let base = self.regs.get_reg(
            dst.class,
            dst.index,
            0,
            self.position,
            self.intervals.as_ref(),
        );
        for channel in 0..4 {
            self.regs.mark_written(dst.class, dst.index, channel);
        }
        Ok(HardwareRegister::vec8_grf(base.nr, 0).retype(RegType::UW))
    }

    fn coord_count(inst: &IrInstruction) -> usize {
        match inst.tex_target {
            crate::ir::TexTarget::Tex2d | crate::ir::TexTarget::TexRect => 2,
            crate::ir::TexTarget::Tex3d | crate::ir::TexTarget::TexCube => 3,
        }
    }

    fn emit_tex(&mut self, inst: &IrInstruction) -> CompileResult<()> {
        let unit = inst.tex_unit;
        let writemask = self.dst_operand(inst)?.write_mask.bits() as u32;
        let dest = self.sampler_dst(inst)?;

        for i in 0..Self::coord_count(inst) {
            let coord = self.src_reg(inst, 0, i)?;
            self.stream
                .mov(HardwareRegister::message_reg(2 + i as u32), coord)?;
        }

        self.stream.sample(
            dest,
            1,
            HardwareRegister::vec8_grf(0, 0).retype(RegType::UW),
            SURFACE_TEXTURE_BASE + unit,
            unit,
            writemask,
            SAMPLER_MESSAGE_SAMPLE,
            4,
            4,
            true,
            SAMPLER_SIMD8,
        )
    }

    /// Sample with LOD bias: three coordinate registers (zero-filled), the
    /// bias from the W channel, and a spare slot the unit expects.
    fn emit_txb(&mut self, inst: &IrInstruction) -> CompileResult<()> {
        let unit = inst.tex_unit;
        let writemask = self.dst_operand(inst)?.write_mask.bits() as u32;
        let dest = self.sampler_dst(inst)?;
        let coords = Self::coord_count(inst);

        for i in 0..3 {
            let coord = if i < coords {
                self.src_reg(inst, 0, i)?
            } else {
                HardwareRegister::imm_f(0.0)
            };
            self.stream
                .mov(HardwareRegister::message_reg(2 + i as u32), coord)?;
        }
        let bias = self.src_reg(inst, 0, 3)?;
        self.stream.mov(HardwareRegister::message_reg(5), bias)?;
        self.stream
            .mov(HardwareRegister::message_reg(6), HardwareRegister::imm_f(0.0))?;

        self.stream.sample(
            dest,
            1,
            HardwareRegister::vec8_grf(0, 0).retype(RegType::UW),
            SURFACE_TEXTURE_BASE + unit,
            unit,
            writemask,
            SAMPLER_MESSAGE_SAMPLE_BIAS,
            4,
            4,
            true,
            SAMPLER_SIMD16,
        )
    }

    /// Fragment kill: clear the killed channels' bits in the thread
    /// header's pixel mask so the eventual framebuffer write drops them.
    fn emit_kil(&mut self) -> CompileResult<()> {
        let depth = uw1_grf(0);
        let emit_mask = uw1_grf(self.emit_mask_nr);
        self.stream.push_state()?;
        self.stream.set_mask_control(MASK_DISABLE);
        self.stream.not(emit_mask, imask_reg())?;
        self.stream.and(depth, emit_mask, depth)?;
        self.stream.pop_state()
    }

    /// Final color write: colors into m2..m5, control header copied into m1,
    /// one SEND with end-of-thread.
    fn emit_fb_write(&mut self, inst: &IrInstruction) -> CompileResult<()> {
        self.stream.push_state()?;
        for channel in 0..4 {
            let color = self.src_reg(inst, 0, channel)?;
            self.stream
                .mov(HardwareRegister::message_reg(2 + channel as u32), color)?;
        }
        self.stream.pop_state()?;

        self.stream.push_state()?;
        self.stream.set_mask_control(MASK_DISABLE);
        self.stream.mov(
            HardwareRegister::message_reg(1),
            HardwareRegister::vec8_grf(1, 0),
        )?;
        self.stream.pop_state()?;

        self.stream.fb_write(
            HardwareRegister::null().retype(RegType::UW),
            0,
            HardwareRegister::vec8_grf(0, 0).retype(RegType::UW),
            SURFACE_RENDER_TARGET,
            6,
            0,
            false,
            true,
        )?;
        Ok(())
    }

    /// Fetch any constants this instruction reads into their per-slot
    /// staging registers, one aligned block each.
    fn fetch_constants(&mut self, inst: &IrInstruction) -> CompileResult<()> {
        for slot in 0..3 {
            let Some(src) = inst.srcs[slot] else { continue };
            if src.class != OperandClass::Constant {
                continue;
            }
            self.stream.oword_block_read(
                HardwareRegister::vec8_grf(self.const_regs[slot], 0),
                HardwareRegister::message_reg(CONST_FETCH_MRF),
                16 * src.index,
                SURFACE_CONST_BUFFER,
            )?;
        }
        Ok(())
    }
}
