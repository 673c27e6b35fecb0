// This module is the per-opcode emission layer on top of the instruction stream: the
// one- and two-source ALU routines with their named wrappers, comparison with a flag
// write, transcendental math, and the SEND message builders for the shared function
// units. Math is where the generations diverge most: Gen6+ has a native MATH pipeline
// instruction whose function rides in the conditional-modifier field, while earlier
// parts stage the argument in a message register and SEND it to the shared math unit.
// The message builders pack each unit's function-control word into the descriptor
// dword after seeding it with a zero immediate, then place the target-unit id wherever
// the generation keeps it. The sampler path carries the hardware's always-writes-four-
// registers quirk: a contiguous partial write mask is folded into the message header
// and the destination offset, while a sparse mask falls back to a full write plus a
// read-after dependency stall on the last response register. Gen6 additionally lost
// SEND's implicit payload move, so sources are resolved into message registers with an
// explicit unmasked MOV first.

//! Per-opcode emission: ALU routines, math, and SEND messages.

use crate::core::{CompileError, CompileResult};
use crate::gen::TargetGeneration;
use crate::isa::instruction::{
    Opcode, COMPRESSION_NONE, MASK_DISABLE, PREDICATE_NONE, SFID_DATAPORT_READ,
    SFID_DATAPORT_WRITE, SFID_MATH, SFID_SAMPLER, SFID_URB,
};
use crate::isa::reg::{HardwareRegister, RegFile, RegType};
use crate::isa::stream::{InstructionHandle, InstructionStream};

/// Math unit functions.
pub const MATH_INVERSE: u32 = 1;
pub const MATH_LOG: u32 = 2;
pub const MATH_EXP: u32 = 3;
pub const MATH_SQRT: u32 = 4;
pub const MATH_RSQ: u32 = 5;
pub const MATH_SIN: u32 = 6;
pub const MATH_COS: u32 = 7;
pub const MATH_SINCOS: u32 = 8;
pub const MATH_TAN: u32 = 9;
pub const MATH_POW: u32 = 10;

pub const MATH_PRECISION_FULL: u32 = 0;

/// Sampler message types.
pub const SAMPLER_MESSAGE_SAMPLE: u32 = 0;
pub const SAMPLER_MESSAGE_SAMPLE_BIAS: u32 = 1;
pub const SAMPLER_SIMD8: u32 = 1;
pub const SAMPLER_SIMD16: u32 = 2;

/// Dataport message types.
pub const DATAPORT_OWORD_BLOCK_READ: u32 = 0;
pub const DATAPORT_RENDER_TARGET_WRITE: u32 = 4;
pub const DATAPORT_OWORD_BLOCK_1_LOW: u32 = 0;
pub const DATAPORT_RENDER_TARGET_SIMD16: u32 = 0;
pub const DATAPORT_RENDER_TARGET_SIMD8_LOW: u32 = 2;
pub const DATAPORT_READ_TARGET_DATA_CACHE: u32 = 0;

/// URB swizzle controls.
pub const URB_SWIZZLE_NONE: u32 = 0;

impl InstructionStream {
    // -- ALU routines ------------------------------------------------------

    pub fn alu1(
        &mut self,
        opcode: Opcode,
        dest: HardwareRegister,
        src0: HardwareRegister,
    ) -> CompileResult<InstructionHandle> {
        let insn = self.next_insn(opcode);
        self.set_dest(insn, dest)?;
        self.set_src0(insn, src0)?;
        Ok(insn)
    }

    pub fn alu2(
        &mut self,
        opcode: Opcode,
        dest: HardwareRegister,
        src0: HardwareRegister,
        src1: HardwareRegister,
    ) -> CompileResult<InstructionHandle> {
        let insn = self.next_insn(opcode);
        self.set_dest(insn, dest)?;
        self.set_src0(insn, src0)?;
        self.set_src1(insn, src1)?;
        Ok(insn)
    }

    pub fn mov(
        &mut self,
        dest: HardwareRegister,
        src0: HardwareRegister,
    ) -> CompileResult<InstructionHandle> {
        self.alu1(Opcode::Mov, dest, src0)
    }

    pub fn not(
        &mut self,
        dest: HardwareRegister,
        src0: HardwareRegister,
    ) -> CompileResult<InstructionHandle> {
        self.alu1(Opcode::Not, dest, src0)
    }

    pub fn frc(
        &mut self,
        dest: HardwareRegister,
        src0: HardwareRegister,
    ) -> CompileResult<InstructionHandle> {
        self.alu1(Opcode::Frc, dest, src0)
    }

    pub fn rndd(
        &mut self,
        dest: HardwareRegister,
        src0: HardwareRegister,
    ) -> CompileResult<InstructionHandle> {
        self.alu1(Opcode::Rndd, dest, src0)
    }

    pub fn rndz(
        &mut self,
        dest: HardwareRegister,
        src0: HardwareRegister,
    ) -> CompileResult<InstructionHandle> {
        self.alu1(Opcode::Rndz, dest, src0)
    }

    pub fn add(
        &mut self,
        dest: HardwareRegister,
        src0: HardwareRegister,
        src1: HardwareRegister,
    ) -> CompileResult<InstructionHandle> {
        self.alu2(Opcode::Add, dest, src0, src1)
    }

    pub fn mul(
        &mut self,
        dest: HardwareRegister,
        src0: HardwareRegister,
        src1: HardwareRegister,
    ) -> CompileResult<InstructionHandle> {
        self.alu2(Opcode::Mul, dest, src0, src1)
    }

    pub fn mac(
        &mut self,
        dest: HardwareRegister,
        src0: HardwareRegister,
        src1: HardwareRegister,
    ) -> CompileResult<InstructionHandle> {
        self.alu2(Opcode::Mac, dest, src0, src1)
    }

    pub fn and(
        &mut self,
        dest: HardwareRegister,
        src0: HardwareRegister,
        src1: HardwareRegister,
    ) -> CompileResult<InstructionHandle> {
        self.alu2(Opcode::And, dest, src0, src1)
    }

    pub fn sel(
        &mut self,
        dest: HardwareRegister,
        src0: HardwareRegister,
        src1: HardwareRegister,
    ) -> CompileResult<InstructionHandle> {
        self.alu2(Opcode::Sel, dest, src0, src1)
    }

    /// Compare and write the flag register.
    pub fn cmp(
        &mut self,
        dest: HardwareRegister,
        conditional: u32,
        src0: HardwareRegister,
        src1: HardwareRegister,
    ) -> CompileResult<InstructionHandle> {
        let insn = self.next_insn(Opcode::Cmp);
        self.get_mut(insn).set_cond_modifier(conditional);
        self.set_dest(insn, dest)?;
        self.set_src0(insn, src0)?;
        self.set_src1(insn, src1)?;
        Ok(insn)
    }

    pub fn nop(&mut self) -> CompileResult<InstructionHandle> {
        let insn = self.next_insn(Opcode::Nop);
        let r0 = HardwareRegister::vec4_grf(0, 0).retype(RegType::UD);
        self.set_dest(insn, r0)?;
        self.set_src0(insn, r0)?;
        self.set_src1(insn, HardwareRegister::imm_ud(0))?;
        Ok(insn)
    }

    // -- message descriptor packing ----------------------------------------

    /// Seed the descriptor dword and place the lengths, target-unit id, and
    /// end-of-thread bit where this generation keeps them.
    fn set_message_descriptor(
        &mut self,
        insn: InstructionHandle,
        sfid: u32,
        msg_length: u32,
        response_length: u32,
        header_present: bool,
        eot: bool,
    ) -> CompileResult<()> {
        let gen = self.gen();
        let record = self.get_mut(insn);
        // The final dword holds the descriptor, not a source operand, so it
        // is seeded directly rather than through the operand checks.
        record.set_src1_reg_file(RegFile::Immediate as u32);
        record.set_src1_reg_type(RegType::D as u32);
        record.set_imm_ud(0);
        let gen5_plus = gen >= TargetGeneration::Gen5;
        record.set_send_lengths(gen5_plus, response_length, msg_length);
        if gen.sfid_in_header() {
            record.set_cond_modifier(sfid);
            record.set_send_header_present(header_present);
        } else if gen == TargetGeneration::Gen5 {
            record.set_send_target_gen5(sfid);
            record.set_send_header_present(header_present);
        } else {
            record.set_send_target_gen4(sfid);
        }
        record.set_send_eot(eot);
        Ok(())
    }

    fn set_math_message(
        &mut self,
        insn: InstructionHandle,
        msg_length: u32,
        response_length: u32,
        function: u32,
        saturate: bool,
    ) -> CompileResult<()> {
        self.set_message_descriptor(insn, SFID_MATH, msg_length, response_length, false, false)?;
        let gen5_plus = self.gen() >= TargetGeneration::Gen5;
        let control = function | (saturate as u32) << 6;
        self.get_mut(insn)
            .set_send_function_control(gen5_plus, control);
        Ok(())
    }

    fn set_sampler_message(
        &mut self,
        insn: InstructionHandle,
        binding_table_index: u32,
        sampler: u32,
        msg_type: u32,
        response_length: u32,
        msg_length: u32,
        eot: bool,
        header_present: bool,
        simd_mode: u32,
    ) -> CompileResult<()> {
        self.set_message_descriptor(
            insn,
            SFID_SAMPLER,
            msg_length,
            response_length,
            header_present,
            eot,
        )?;
        let gen5_plus = self.gen() >= TargetGeneration::Gen5;
        let mut control = binding_table_index | sampler << 8 | msg_type << 12;
        if gen5_plus {
            // The widened Gen5+ descriptor gained an explicit SIMD mode.
            control |= simd_mode << 16;
        }
        self.get_mut(insn)
            .set_send_function_control(gen5_plus, control);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn set_dp_write_message(
        &mut self,
        insn: InstructionHandle,
        binding_table_index: u32,
        msg_control: u32,
        msg_type: u32,
        msg_length: u32,
        header_present: bool,
        pixel_scoreboard_clear: bool,
        response_length: u32,
        eot: bool,
    ) -> CompileResult<()> {
        self.set_message_descriptor(
            insn,
            SFID_DATAPORT_WRITE,
            msg_length,
            response_length,
            header_present,
            eot,
        )?;
        let gen5_plus = self.gen() >= TargetGeneration::Gen5;
        let control = binding_table_index
            | msg_control << 8
            | (pixel_scoreboard_clear as u32) << 11
            | msg_type << 12;
        self.get_mut(insn)
            .set_send_function_control(gen5_plus, control);
        Ok(())
    }

    fn set_dp_read_message(
        &mut self,
        insn: InstructionHandle,
        binding_table_index: u32,
        msg_control: u32,
        msg_type: u32,
        target_cache: u32,
        msg_length: u32,
        response_length: u32,
    ) -> CompileResult<()> {
        self.set_message_descriptor(
            insn,
            SFID_DATAPORT_READ,
            msg_length,
            response_length,
            self.gen() >= TargetGeneration::Gen5,
            false,
        )?;
        let gen5_plus = self.gen() >= TargetGeneration::Gen5;
        let control = binding_table_index | msg_control << 8 | msg_type << 12 | target_cache << 14;
        self.get_mut(insn)
            .set_send_function_control(gen5_plus, control);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn set_urb_message(
        &mut self,
        insn: InstructionHandle,
        msg_length: u32,
        response_length: u32,
        offset: u32,
        swizzle_control: u32,
        allocate: bool,
        used: bool,
        complete: bool,
        eot: bool,
    ) -> CompileResult<()> {
        self.set_message_descriptor(insn, SFID_URB, msg_length, response_length, true, eot)?;
        let gen5_plus = self.gen() >= TargetGeneration::Gen5;
        let control = offset
            | swizzle_control << 10
            | (allocate as u32) << 12
            | (used as u32) << 13
            | (complete as u32) << 14;
        self.get_mut(insn)
            .set_send_function_control(gen5_plus, control);
        Ok(())
    }

    /// Gen6 SEND no longer pulls a general-register source into the message
    /// registers implicitly; do it with an explicit unmasked MOV and point
    /// the source at the message register instead.
    pub fn resolve_implied_move(
        &mut self,
        src: &mut HardwareRegister,
        msg_reg_nr: u32,
    ) -> CompileResult<()> {
        if !self.gen().needs_resolved_implied_move() || src.file == RegFile::Message {
            return Ok(());
        }
        self.push_state()?;
        self.set_mask_control(MASK_DISABLE);
        self.set_compression_control(COMPRESSION_NONE);
        self.mov(
            HardwareRegister::message_reg(msg_reg_nr).retype(RegType::UD),
            src.retype(RegType::UD),
        )?;
        self.pop_state()?;
        *src = HardwareRegister::message_reg(msg_reg_nr);
        Ok(())
    }

    // -- math --------------------------------------------------------------

    /// One-argument transcendental. The message register number matters only
    /// on parts where this is a SEND to the shared math unit.
    pub fn math1(
        &mut self,
        dest: HardwareRegister,
        function: u32,
        saturate: bool,
        msg_reg_nr: u32,
        src: HardwareRegister,
    ) -> CompileResult<InstructionHandle> {
        if self.gen().has_native_math() {
            if dest.file != RegFile::General || src.file != RegFile::General {
                return Err(CompileError::InvalidOperand {
                    reason: "native math operands must be general registers".into(),
                });
            }
            if src.abs || src.negate {
                return Err(CompileError::InvalidOperand {
                    reason: "native math source cannot carry modifiers".into(),
                });
            }
            let insn = self.next_insn(Opcode::Math);
            self.get_mut(insn).set_cond_modifier(function);
            self.get_mut(insn).set_saturate(saturate);
            self.set_dest(insn, dest)?;
            self.set_src0(insn, src)?;
            self.set_src1(insn, HardwareRegister::null())?;
            Ok(insn)
        } else {
            let msg_length = if function == MATH_POW { 2 } else { 1 };
            let response_length = if function == MATH_SINCOS { 2 } else { 1 };
            let insn = self.next_insn(Opcode::Send);
            let record = self.get_mut(insn);
            record.set_pred_control(PREDICATE_NONE);
            record.set_cond_modifier(msg_reg_nr);
            self.set_dest(insn, dest)?;
            self.set_src0(insn, src)?;
            self.set_math_message(insn, msg_length, response_length, function, saturate)?;
            Ok(insn)
        }
    }

    /// Two-argument math (POW). Pre-Gen6 callers stage the second argument
    /// in the following message register before calling [`Self::math1`];
    /// Gen6+ encodes it directly.
    pub fn math2(
        &mut self,
        dest: HardwareRegister,
        function: u32,
        saturate: bool,
        src0: HardwareRegister,
        src1: HardwareRegister,
    ) -> CompileResult<InstructionHandle> {
        debug_assert!(self.gen().has_native_math());
        let insn = self.next_insn(Opcode::Math);
        self.get_mut(insn).set_cond_modifier(function);
        self.get_mut(insn).set_saturate(saturate);
        self.set_dest(insn, dest)?;
        self.set_src0(insn, src0)?;
        self.set_src1(insn, src1)?;
        Ok(insn)
    }

    // -- shared-function messages ------------------------------------------

    /// Texture sample. The hardware writes four response registers per
    /// channel group no matter the mask, so a partial mask is folded into
    /// the message header when contiguous, and otherwise forces a full
    /// write plus a scheduling stall on the last response register.
    #[allow(clippy::too_many_arguments)]
    pub fn sample(
        &mut self,
        mut dest: HardwareRegister,
        msg_reg_nr: u32,
        mut src0: HardwareRegister,
        binding_table_index: u32,
        sampler: u32,
        writemask: u32,
        msg_type: u32,
        mut response_length: u32,
        msg_length: u32,
        header_present: bool,
        simd_mode: u32,
    ) -> CompileResult<()> {
        if writemask == 0 {
            return Ok(());
        }

        let mut need_stall = false;
        if writemask != 0xF {
            let mut dst_offset = 0;
            let mut i = 0;
            while i < 4 && writemask & (1 << i) == 0 {
                dst_offset += 2;
                i += 1;
            }
            let mut newmask = 0u32;
            let mut len = 0u32;
            while i < 4 && writemask & (1 << i) != 0 {
                newmask |= 1 << i;
                len += 1;
                i += 1;
            }
            while i < 4 {
                if writemask & (1 << i) != 0 {
                    need_stall = true;
                }
                i += 1;
            }

            if !need_stall {
                // Contiguous mask: tell the sampler which channels to send
                // via the header and land them at the shifted offset.
                let m1 = HardwareRegister::message_reg(msg_reg_nr).retype(RegType::UD);
                self.push_state()?;
                self.set_compression_control(COMPRESSION_NONE);
                self.set_mask_control(MASK_DISABLE);
                self.mov(m1, HardwareRegister::vec8_grf(0, 0).retype(RegType::UD))?;
                self.mov(
                    m1.stride(0, 1, 0).subreg(2 * 4),
                    HardwareRegister::imm_ud((newmask ^ 0xF) << 12),
                )?;
                self.pop_state()?;

                src0 = HardwareRegister::null().retype(RegType::UW);
                dest = dest.offset(dst_offset);
                // Sixteen-wide responses skip masked channels entirely;
                // eight-wide responses still reserve their slots.
                if simd_mode == SAMPLER_SIMD16 {
                    response_length = len * 2;
                }
            }
        }

        self.resolve_implied_move(&mut src0, msg_reg_nr)?;

        let insn = self.next_insn(Opcode::Send);
        let uses_header_sfid = self.gen().sfid_in_header();
        let record = self.get_mut(insn);
        record.set_pred_control(PREDICATE_NONE);
        record.set_compression_control(COMPRESSION_NONE);
        if !uses_header_sfid {
            record.set_cond_modifier(msg_reg_nr);
        }
        self.set_dest(insn, dest)?;
        self.set_src0(insn, src0)?;
        self.set_sampler_message(
            insn,
            binding_table_index,
            sampler,
            msg_type,
            response_length,
            msg_length,
            false,
            header_present,
            simd_mode,
        )?;

        if need_stall {
            // Force the scoreboard to wait on the whole response before
            // anything reads a masked-out channel.
            let reg =
                HardwareRegister::vec8_grf(dest.nr + response_length - 1, 0).retype(RegType::UD);
            self.push_state()?;
            self.set_compression_control(COMPRESSION_NONE);
            self.mov(reg, reg)?;
            self.pop_state()?;
        }
        Ok(())
    }

    /// Final render-target write; ends the thread when `eot` is set.
    #[allow(clippy::too_many_arguments)]
    pub fn fb_write(
        &mut self,
        dest: HardwareRegister,
        msg_reg_nr: u32,
        mut src0: HardwareRegister,
        binding_table_index: u32,
        msg_length: u32,
        response_length: u32,
        dispatch16: bool,
        eot: bool,
    ) -> CompileResult<InstructionHandle> {
        // Render-target writes to the bound surface have a dedicated
        // conditional SEND form on Gen6.
        let opcode = if self.gen() == TargetGeneration::Gen6 && binding_table_index == 0 {
            Opcode::Sendc
        } else {
            Opcode::Send
        };
        let msg_control = if dispatch16 {
            DATAPORT_RENDER_TARGET_SIMD16
        } else {
            DATAPORT_RENDER_TARGET_SIMD8_LOW
        };

        self.resolve_implied_move(&mut src0, msg_reg_nr)?;

        let insn = self.next_insn(opcode);
        let uses_header_sfid = self.gen().sfid_in_header();
        let record = self.get_mut(insn);
        record.set_pred_control(PREDICATE_NONE);
        record.set_compression_control(COMPRESSION_NONE);
        if !uses_header_sfid {
            record.set_cond_modifier(msg_reg_nr);
        }
        self.set_dest(insn, dest)?;
        self.set_src0(insn, src0)?;
        self.set_dp_write_message(
            insn,
            binding_table_index,
            msg_control,
            DATAPORT_RENDER_TARGET_WRITE,
            msg_length,
            self.gen() >= TargetGeneration::Gen5,
            true,
            response_length,
            eot,
        )?;
        Ok(insn)
    }

    /// Read one aligned owords block from a constant surface into `dest`.
    pub fn oword_block_read(
        &mut self,
        dest: HardwareRegister,
        mrf: HardwareRegister,
        offset: u32,
        binding_table_index: u32,
    ) -> CompileResult<()> {
        // Gen6 addresses the surface in owords rather than bytes.
        let offset = if self.gen() >= TargetGeneration::Gen6 {
            offset / 16
        } else {
            offset
        };
        let mrf = mrf.retype(RegType::UD);

        self.push_state()?;
        self.set_predicate_control(PREDICATE_NONE);
        self.set_compression_control(COMPRESSION_NONE);
        self.set_mask_control(MASK_DISABLE);

        self.mov(mrf, HardwareRegister::vec8_grf(0, 0).retype(RegType::UD))?;
        // Block offset rides in the third header dword.
        self.mov(
            mrf.stride(0, 1, 0).subreg(2 * 4),
            HardwareRegister::imm_ud(offset),
        )?;

        let insn = self.next_insn(Opcode::Send);
        let gen = self.gen();
        if !gen.sfid_in_header() {
            let mrf_nr = mrf.nr;
            self.get_mut(insn).set_cond_modifier(mrf_nr);
        }
        let dest = HardwareRegister::vec8(dest.file, dest.nr, 0).retype(RegType::UW);
        self.set_dest(insn, dest)?;
        if gen >= TargetGeneration::Gen6 {
            self.set_src0(insn, mrf)?;
        } else {
            self.set_src0(insn, HardwareRegister::null())?;
        }
        self.set_dp_read_message(
            insn,
            binding_table_index,
            DATAPORT_OWORD_BLOCK_1_LOW,
            DATAPORT_OWORD_BLOCK_READ,
            DATAPORT_READ_TARGET_DATA_CACHE,
            1,
            1,
        )?;
        self.pop_state()?;
        Ok(())
    }

    /// Write staged message registers out through the URB unit.
    #[allow(clippy::too_many_arguments)]
    pub fn urb_write(
        &mut self,
        dest: HardwareRegister,
        msg_reg_nr: u32,
        mut src0: HardwareRegister,
        msg_length: u32,
        response_length: u32,
        offset: u32,
        swizzle_control: u32,
        allocate: bool,
        used: bool,
        complete: bool,
        eot: bool,
    ) -> CompileResult<InstructionHandle> {
        self.resolve_implied_move(&mut src0, msg_reg_nr)?;

        let insn = self.next_insn(Opcode::Send);
        let uses_header_sfid = self.gen().sfid_in_header();
        if !uses_header_sfid {
            self.get_mut(insn).set_cond_modifier(msg_reg_nr);
        }
        self.set_dest(insn, dest)?;
        self.set_src0(insn, src0)?;
        self.set_urb_message(
            insn,
            msg_length,
            response_length,
            offset,
            swizzle_control,
            allocate,
            used,
            complete,
            eot,
        )?;
        Ok(insn)
    }
}
