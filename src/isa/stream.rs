// This module implements the instruction stream builder: the growable store of 128-bit
// records plus the ambient emission state that every new instruction inherits. The
// ambient state is itself an instruction template (execution size, predication,
// saturate, conditional modifier, mask/compression/thread controls); next_insn copies
// it into a fresh record and hands back a stable handle, and push_state/pop_state
// save and restore the whole template on a bounded stack so message-staging sequences
// can run unpredicated without disturbing the surrounding code. A set conditional
// modifier is one-shot: the instruction that consumes it resets the template's
// modifier and arms normal predication for the instruction after it. The operand
// encoders (set_dest, set_src0, set_src1) translate register descriptors into record
// fields, validate region descriptors against the hardware's rules, route immediates
// into the final dword with the src1-position and type-match restrictions, and alias
// message registers onto the top of the general file on parts without a real message
// register file.

//! Instruction store, ambient emission state, and operand encoding.

use log::trace;

use crate::core::{CompileError, CompileResult};
use crate::gen::TargetGeneration;
use crate::isa::instruction::{FullInstruction, Opcode, ALIGN_1, PREDICATE_NORMAL};
use crate::isa::reg::{
    decode_hstride, decode_vstride, decode_width, width_code, HardwareRegister, RegFile, RegType,
    ADDRESS_DIRECT,
};

/// Stable index of an emitted instruction in the stream.
pub type InstructionHandle = usize;

/// Emission-state stack depth bound.
pub const MAX_STATE_DEPTH: usize = 16;

/// First general register backing a message register on parts without a
/// message register file.
pub const MRF_ALIAS_BASE: u32 = 112;

/// The instruction stream under construction.
pub struct InstructionStream {
    gen: TargetGeneration,
    /// Collapse structured control flow to straight-line predicated code.
    pub single_program_flow: bool,
    store: Vec<FullInstruction>,
    template: FullInstruction,
    state_stack: Vec<FullInstruction>,
}

impl InstructionStream {
    pub fn new(gen: TargetGeneration, single_program_flow: bool) -> Self {
        let mut template = FullInstruction::new();
        template.set_exec_size(width_code(8));
        template.set_access_mode(ALIGN_1);
        InstructionStream {
            gen,
            single_program_flow,
            store: Vec::new(),
            template,
            state_stack: Vec::new(),
        }
    }

    pub fn gen(&self) -> TargetGeneration {
        self.gen
    }

    /// Index the next instruction will occupy.
    pub fn position(&self) -> usize {
        self.store.len()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn get(&self, handle: InstructionHandle) -> &FullInstruction {
        &self.store[handle]
    }

    pub fn get_mut(&mut self, handle: InstructionHandle) -> &mut FullInstruction {
        &mut self.store[handle]
    }

    pub fn instructions(&self) -> &[FullInstruction] {
        &self.store
    }

    pub fn into_instructions(self) -> Vec<FullInstruction> {
        self.store
    }

    // -- ambient emission state --------------------------------------------

    pub fn push_state(&mut self) -> CompileResult<()> {
        if self.state_stack.len() >= MAX_STATE_DEPTH {
            return Err(CompileError::StateStack { action: "pushed" });
        }
        self.state_stack.push(self.template);
        Ok(())
    }

    pub fn pop_state(&mut self) -> CompileResult<()> {
        self.template = self
            .state_stack
            .pop()
            .ok_or(CompileError::StateStack { action: "popped" })?;
        Ok(())
    }

    pub fn set_predicate_control(&mut self, pred: u32) {
        self.template.set_pred_control(pred);
    }

    pub fn set_predicate_inverse(&mut self, inverse: bool) {
        self.template.set_pred_inverse(inverse);
    }

    /// One-shot: consumed by the next emitted instruction, which then arms
    /// normal predication for its successor.
    pub fn set_conditional_mod(&mut self, cond: u32) {
        self.template.set_cond_modifier(cond);
    }

    pub fn set_saturate(&mut self, saturate: bool) {
        self.template.set_saturate(saturate);
    }

    pub fn set_compression_control(&mut self, control: u32) {
        self.template.set_compression_control(control);
    }

    pub fn set_mask_control(&mut self, control: u32) {
        self.template.set_mask_control(control);
    }

    pub fn set_access_mode(&mut self, mode: u32) {
        self.template.set_access_mode(mode);
    }

    /// Emit a new instruction seeded from the ambient template.
    pub fn next_insn(&mut self, opcode: Opcode) -> InstructionHandle {
        let mut insn = self.template;
        insn.set_opcode(opcode);
        if self.template.cond_modifier() != 0 {
            self.template.set_cond_modifier(0);
            self.template.set_pred_control(PREDICATE_NORMAL);
        }
        trace!("emit {:?} at {}", opcode, self.store.len());
        self.store.push(insn);
        self.store.len() - 1
    }

    // -- operand encoding --------------------------------------------------

    /// Resolve an operand's (file, nr) to the encoded pair, aliasing message
    /// registers onto the top of the general file where no real message file
    /// exists.
    fn resolve_file(&self, reg: &HardwareRegister) -> (u32, u32) {
        if reg.file == RegFile::Message && self.gen >= TargetGeneration::Gen7 {
            (RegFile::General as u32, MRF_ALIAS_BASE + reg.nr)
        } else {
            (reg.file as u32, reg.nr)
        }
    }

    /// The resolved number must fit the 128-entry general file; the 8-bit
    /// nr field would otherwise encode a register that does not exist.
    fn check_grf_bound(file: u32, nr: u32) -> CompileResult<()> {
        if file == RegFile::General as u32 && nr > 127 {
            return Err(CompileError::InvalidOperand {
                reason: format!("general register {nr} out of range"),
            });
        }
        Ok(())
    }

    fn validate_reg(
        &self,
        insn: &FullInstruction,
        reg: &HardwareRegister,
    ) -> CompileResult<()> {
        if reg.is_immediate() {
            return Ok(());
        }
        let hstride = decode_hstride(reg.hstride).ok_or_else(|| CompileError::InvalidOperand {
            reason: format!("bad horizontal stride code {}", reg.hstride),
        })?;
        let vstride = decode_vstride(reg.vstride).ok_or_else(|| CompileError::InvalidOperand {
            reason: format!("bad vertical stride code {}", reg.vstride),
        })?;
        let width = decode_width(reg.width).ok_or_else(|| CompileError::InvalidOperand {
            reason: format!("bad width code {}", reg.width),
        })?;
        let exec_size = decode_width(insn.exec_size()).ok_or_else(|| {
            CompileError::InvalidOperand {
                reason: format!("bad execution size code {}", insn.exec_size()),
            }
        })?;

        let fail = |reason: String| Err(CompileError::InvalidOperand { reason });
        if exec_size < width {
            return fail(format!("execution size {exec_size} below region width {width}"));
        }
        if exec_size == width && hstride != 0 && vstride != width * hstride {
            return fail(format!(
                "region <{vstride};{width},{hstride}> does not advance with execution size {exec_size}"
            ));
        }
        if width == 1 && hstride != 0 {
            return fail("width 1 region with nonzero horizontal stride".into());
        }
        if exec_size == 1 && width == 1 && (hstride != 0 || vstride != 0) {
            return fail("scalar operand must use a <0;1,0> region".into());
        }
        if vstride == 0 && hstride == 0 && width != 1 {
            return fail("zero-stride region wider than one element".into());
        }
        Ok(())
    }

    pub fn set_dest(
        &mut self,
        handle: InstructionHandle,
        dest: HardwareRegister,
    ) -> CompileResult<()> {
        let (file, nr) = self.resolve_file(&dest);
        Self::check_grf_bound(file, nr)?;
        let insn = &mut self.store[handle];
        insn.set_dest_reg_file(file);
        insn.set_dest_reg_type(dest.reg_type as u32);
        insn.set_dest_address_mode(dest.address_mode);
        insn.set_dest_subreg_nr(dest.subnr);
        insn.set_dest_reg_nr(nr);
        // An unset destination stride still has to step one element.
        insn.set_dest_hstride(if dest.hstride == 0 { 1 } else { dest.hstride });
        self.guess_execution_size(handle, &dest);
        Ok(())
    }

    /// Widen the execution size to the destination width, and to the full
    /// sixteen channels when a compressed instruction writes eight-wide.
    fn guess_execution_size(&mut self, handle: InstructionHandle, dest: &HardwareRegister) {
        let insn = &mut self.store[handle];
        if dest.width == width_code(8)
            && insn.compression_control() == crate::isa::instruction::COMPRESSION_COMPRESSED
        {
            insn.set_exec_size(width_code(16));
        } else if !dest.is_immediate() {
            insn.set_exec_size(dest.width);
        }
    }

    pub fn set_src0(
        &mut self,
        handle: InstructionHandle,
        reg: HardwareRegister,
    ) -> CompileResult<()> {
        self.validate_reg(&self.store[handle], &reg)?;
        let (file, nr) = self.resolve_file(&reg);
        Self::check_grf_bound(file, nr)?;
        let insn = &mut self.store[handle];
        insn.set_src0_reg_file(file);
        insn.set_src0_reg_type(reg.reg_type as u32);
        insn.set_src0_abs(reg.abs);
        insn.set_src0_negate(reg.negate);
        insn.set_src0_address_mode(reg.address_mode);

        if reg.is_immediate() {
            // The payload lives in the final dword, which forces the second
            // source's file and type fields to describe it.
            insn.set_imm_ud(reg.imm);
            insn.set_src1_reg_file(RegFile::Architecture as u32);
            insn.set_src1_reg_type(reg.reg_type as u32);
            return Ok(());
        }

        insn.set_src0_subreg_nr(reg.subnr);
        insn.set_src0_reg_nr(nr);
        if reg.width == width_code(1) && insn.exec_size() == width_code(1) {
            insn.set_src0_hstride(0);
            insn.set_src0_width(width_code(1));
            insn.set_src0_vstride(0);
        } else {
            insn.set_src0_hstride(reg.hstride);
            insn.set_src0_width(reg.width);
            insn.set_src0_vstride(reg.vstride);
        }
        Ok(())
    }

    pub fn set_src1(
        &mut self,
        handle: InstructionHandle,
        reg: HardwareRegister,
    ) -> CompileResult<()> {
        if reg.file == RegFile::Message {
            return Err(CompileError::InvalidOperand {
                reason: "message register in second source position".into(),
            });
        }
        if self.store[handle].src0_reg_file() == RegFile::Immediate as u32 {
            return Err(CompileError::InvalidOperand {
                reason: "second source after an immediate first source".into(),
            });
        }
        self.validate_reg(&self.store[handle], &reg)?;
        if reg.is_immediate() {
            self.check_immediate_type(handle, &reg)?;
        }
        let (file, nr) = self.resolve_file(&reg);
        Self::check_grf_bound(file, nr)?;
        let insn = &mut self.store[handle];
        insn.set_src1_reg_file(file);
        insn.set_src1_reg_type(reg.reg_type as u32);
        insn.set_src1_abs(reg.abs);
        insn.set_src1_negate(reg.negate);

        if reg.is_immediate() {
            insn.set_imm_ud(reg.imm);
            return Ok(());
        }

        insn.set_src1_address_mode(reg.address_mode);
        insn.set_src1_subreg_nr(reg.subnr);
        insn.set_src1_reg_nr(nr);
        if reg.width == width_code(1) && insn.exec_size() == width_code(1) {
            insn.set_src1_hstride(0);
            insn.set_src1_width(width_code(1));
            insn.set_src1_vstride(0);
        } else {
            insn.set_src1_hstride(reg.hstride);
            insn.set_src1_width(reg.width);
            insn.set_src1_vstride(reg.vstride);
        }
        Ok(())
    }

    /// Immediates execute in the first source's type. The one relaxation: an
    /// all-zero float payload reads back identically as unsigned, so it may
    /// be retyped against an integer first source to keep the instruction
    /// eligible for compaction.
    fn check_immediate_type(
        &self,
        handle: InstructionHandle,
        reg: &HardwareRegister,
    ) -> CompileResult<()> {
        let src0_is_float = self.store[handle].src0_reg_type() == RegType::F as u32;
        let imm_is_float = reg.reg_type == RegType::F;
        if imm_is_float == src0_is_float || (imm_is_float && reg.imm == 0) {
            return Ok(());
        }
        Err(CompileError::InvalidOperand {
            reason: "immediate type does not match first source type".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::instruction::COMPRESSION_COMPRESSED;

    fn create_test_stream() -> InstructionStream {
        InstructionStream::new(TargetGeneration::Gen6, false)
    }

    #[test]
    fn test_template_inheritance() {
        let mut stream = create_test_stream();
        stream.set_saturate(true);
        let insn = stream.next_insn(Opcode::Mov);
        assert!(stream.get(insn).saturate());
        stream.set_saturate(false);
        let insn = stream.next_insn(Opcode::Mov);
        assert!(!stream.get(insn).saturate());
    }

    #[test]
    fn test_conditional_mod_is_one_shot() {
        let mut stream = create_test_stream();
        stream.set_conditional_mod(2);
        let cmp = stream.next_insn(Opcode::Cmp);
        assert_eq!(stream.get(cmp).cond_modifier(), 2);
        // Successor is predicated, not flag-writing.
        let mov = stream.next_insn(Opcode::Mov);
        assert_eq!(stream.get(mov).cond_modifier(), 0);
        assert_eq!(stream.get(mov).pred_control(), PREDICATE_NORMAL);
    }

    #[test]
    fn test_state_stack_bounds() {
        let mut stream = create_test_stream();
        assert!(stream.pop_state().is_err());
        for _ in 0..MAX_STATE_DEPTH {
            stream.push_state().unwrap();
        }
        assert!(stream.push_state().is_err());
    }

    #[test]
    fn test_state_round_trip() {
        let mut stream = create_test_stream();
        stream.push_state().unwrap();
        stream.set_mask_control(crate::isa::instruction::MASK_DISABLE);
        stream.set_compression_control(crate::isa::instruction::COMPRESSION_NONE);
        stream.pop_state().unwrap();
        let insn = stream.next_insn(Opcode::Mov);
        assert_eq!(stream.get(insn).mask_control(), 0);
    }

    #[test]
    fn test_dest_sets_execution_size() {
        let mut stream = create_test_stream();
        let insn = stream.next_insn(Opcode::Mov);
        stream
            .set_dest(insn, HardwareRegister::vec1_grf(2, 0))
            .unwrap();
        assert_eq!(stream.get(insn).exec_size(), width_code(1));

        stream.set_compression_control(COMPRESSION_COMPRESSED);
        let insn = stream.next_insn(Opcode::Mov);
        stream
            .set_dest(insn, HardwareRegister::vec8_grf(2, 0))
            .unwrap();
        assert_eq!(stream.get(insn).exec_size(), width_code(16));
    }

    #[test]
    fn test_immediate_forces_src1_shadow() {
        let mut stream = create_test_stream();
        let insn = stream.next_insn(Opcode::Mov);
        stream
            .set_dest(insn, HardwareRegister::vec8_grf(2, 0))
            .unwrap();
        stream
            .set_src0(insn, HardwareRegister::imm_f(4.0))
            .unwrap();
        assert_eq!(stream.get(insn).imm_ud(), 4.0f32.to_bits());
        assert_eq!(stream.get(insn).src1_reg_type(), RegType::F as u32);
        // The descriptor dword is occupied now.
        assert!(stream
            .set_src1(insn, HardwareRegister::vec8_grf(3, 0))
            .is_err());
    }

    #[test]
    fn test_immediate_type_check() {
        let mut stream = create_test_stream();
        let insn = stream.next_insn(Opcode::Mov);
        stream
            .set_dest(
                insn,
                HardwareRegister::vec8_grf(2, 0).retype(RegType::UD),
            )
            .unwrap();
        stream
            .set_src0(insn, HardwareRegister::vec8_grf(3, 0).retype(RegType::UD))
            .unwrap();
        // Nonzero float payload against a UD first source is rejected.
        assert!(stream
            .set_src1(insn, HardwareRegister::imm_f(1.0))
            .is_err());
        // An all-zero float retypes to unsigned.
        assert!(stream.set_src1(insn, HardwareRegister::imm_f(0.0)).is_ok());
    }

    #[test]
    fn test_immediate_type_follows_first_source_not_destination() {
        let mut stream = create_test_stream();
        let insn = stream.next_insn(Opcode::Add);
        stream
            .set_dest(
                insn,
                HardwareRegister::vec8_grf(10, 0).retype(RegType::UD),
            )
            .unwrap();
        stream
            .set_src0(insn, HardwareRegister::vec8_grf(2, 0))
            .unwrap();
        // Float immediate, float first source; the destination type plays
        // no part.
        assert!(stream.set_src1(insn, HardwareRegister::imm_f(1.0)).is_ok());
    }

    #[test]
    fn test_zero_retyping_is_float_to_unsigned_only() {
        let mut stream = create_test_stream();
        let insn = stream.next_insn(Opcode::Add);
        stream
            .set_dest(insn, HardwareRegister::vec8_grf(10, 0))
            .unwrap();
        stream
            .set_src0(insn, HardwareRegister::vec8_grf(2, 0))
            .unwrap();
        // An integer zero against a float first source does not read back
        // as the same value, so it gets no relaxation.
        assert!(stream.set_src1(insn, HardwareRegister::imm_d(0)).is_err());
    }

    #[test]
    fn test_source_grf_bound_enforced() {
        let mut stream = create_test_stream();
        let insn = stream.next_insn(Opcode::Add);
        stream
            .set_dest(insn, HardwareRegister::vec8_grf(10, 0))
            .unwrap();
        assert!(stream
            .set_src0(insn, HardwareRegister::vec8_grf(200, 0))
            .is_err());
        stream
            .set_src0(insn, HardwareRegister::vec8_grf(2, 0))
            .unwrap();
        assert!(stream
            .set_src1(insn, HardwareRegister::vec8_grf(128, 0))
            .is_err());
        assert!(stream
            .set_src1(insn, HardwareRegister::vec8_grf(127, 0))
            .is_ok());
    }

    #[test]
    fn test_region_validation() {
        let mut stream = create_test_stream();
        let insn = stream.next_insn(Opcode::Mov);
        stream
            .set_dest(insn, HardwareRegister::vec8_grf(2, 0))
            .unwrap();
        // Width above execution size.
        let bad = HardwareRegister::vec16(RegFile::General, 3, 0);
        assert!(stream.set_src0(insn, bad).is_err());
        // Zero-stride wide region.
        let bad = HardwareRegister::vec8_grf(3, 0).stride(0, 8, 0);
        assert!(stream.set_src0(insn, bad).is_err());
        assert!(stream
            .set_src0(insn, HardwareRegister::vec8_grf(3, 0))
            .is_ok());
    }

    #[test]
    fn test_mrf_aliases_to_grf_top() {
        let mut stream = InstructionStream::new(TargetGeneration::Gen7, false);
        let insn = stream.next_insn(Opcode::Mov);
        stream
            .set_dest(insn, HardwareRegister::message_reg(2))
            .unwrap();
        assert_eq!(
            stream.get(insn).dest_reg_file(),
            RegFile::General as u32
        );
        assert_eq!(stream.get(insn).dest_reg_nr(), MRF_ALIAS_BASE + 2);
    }

    #[test]
    fn test_message_alias_past_file_top_rejected() {
        let mut stream = InstructionStream::new(TargetGeneration::Gen7, false);
        let insn = stream.next_insn(Opcode::Mov);
        // MRF 15 aliases to GRF 127; 16 would fall off the end of the file.
        stream
            .set_dest(insn, HardwareRegister::message_reg(15))
            .unwrap();
        assert!(stream
            .set_dest(insn, HardwareRegister::message_reg(16))
            .is_err());
    }
}
