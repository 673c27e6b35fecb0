// This module linearizes structured control flow. IF/ELSE/ENDIF and DO/WHILE arrive
// as matched markers from the translator; each opener emits a branch instruction with
// a zero jump field and hands back its handle, and the matching closer patches the
// opener with the now-known relative distance. Pre-Gen6 parts run the branches on the
// EU's internal mask and address stacks, so the patched fields are whole-instruction
// jump counts plus a stack pop count, the IF is rewritten to its resolved form once
// its target is known, and BREAK/CONTINUE inside a loop are back-patched in a reverse
// scan when the WHILE is emitted. Gen6+ parts drop the stacks: IF/ELSE/ENDIF/WHILE
// carry a jump field in the descriptor dword, while BREAK/CONTINUE carry JIP/UIP
// offsets that a deferred whole-program fixup pass resolves once every block end is
// known. Under single-program-flow the branches collapse to predicated ADDs to the
// instruction pointer, and a taken IF with no ELSE costs nothing at all. The bounded
// FlowStacks tracker pairs openers with closers and counts open IFs per loop so each
// BREAK knows how many mask-stack entries it unwinds.

//! Structured control flow lowered to patched relative jumps.

use crate::core::{CompileError, CompileResult};
use crate::gen::TargetGeneration;
use crate::isa::instruction::{
    FullInstruction, Opcode, COMPRESSION_NONE, MASK_DISABLE, MASK_ENABLE, PREDICATE_NONE,
    PREDICATE_NORMAL, THREAD_SWITCH,
};
use crate::isa::reg::{width_code, HardwareRegister, RegType};
use crate::isa::stream::{InstructionHandle, InstructionStream};

/// Nesting bound for the IF and loop stacks.
pub const MAX_FLOW_DEPTH: usize = 32;

/// Pairs control-flow openers with their closers and counts open IFs per
/// loop level for the mask-stack pop counts.
pub struct FlowStacks {
    if_stack: Vec<InstructionHandle>,
    loop_stack: Vec<InstructionHandle>,
    /// One counter per open loop, plus the base level.
    if_depth_in_loop: Vec<u32>,
}

impl Default for FlowStacks {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowStacks {
    pub fn new() -> Self {
        FlowStacks {
            if_stack: Vec::new(),
            loop_stack: Vec::new(),
            if_depth_in_loop: vec![0],
        }
    }

    pub fn push_if(&mut self, handle: InstructionHandle) -> CompileResult<()> {
        if self.if_stack.len() >= MAX_FLOW_DEPTH {
            return Err(CompileError::MalformedControlFlow {
                reason: format!("IF nesting deeper than {MAX_FLOW_DEPTH}"),
            });
        }
        self.if_stack.push(handle);
        if let Some(depth) = self.if_depth_in_loop.last_mut() {
            *depth += 1;
        }
        Ok(())
    }

    pub fn pop_if(&mut self, closer: &str) -> CompileResult<InstructionHandle> {
        match self.if_depth_in_loop.last_mut() {
            Some(depth) if *depth > 0 => *depth -= 1,
            _ => {
                return Err(CompileError::MalformedControlFlow {
                    reason: format!("{closer} crosses a loop boundary or has no matching IF"),
                })
            }
        }
        self.if_stack
            .pop()
            .ok_or_else(|| CompileError::MalformedControlFlow {
                reason: format!("{closer} without a matching IF"),
            })
    }

    /// ELSE replaces the IF on top of the stack as the patch target of the
    /// eventual ENDIF.
    pub fn replace_top_if(&mut self, handle: InstructionHandle) -> CompileResult<()> {
        *self
            .if_stack
            .last_mut()
            .ok_or_else(|| CompileError::MalformedControlFlow {
                reason: "ELSE without a matching IF".into(),
            })? = handle;
        Ok(())
    }

    pub fn top_if(&self) -> CompileResult<InstructionHandle> {
        self.if_stack
            .last()
            .copied()
            .ok_or_else(|| CompileError::MalformedControlFlow {
                reason: "ELSE without a matching IF".into(),
            })
    }

    pub fn push_loop(&mut self, handle: InstructionHandle) -> CompileResult<()> {
        if self.loop_stack.len() >= MAX_FLOW_DEPTH {
            return Err(CompileError::MalformedControlFlow {
                reason: format!("loop nesting deeper than {MAX_FLOW_DEPTH}"),
            });
        }
        self.loop_stack.push(handle);
        self.if_depth_in_loop.push(0);
        Ok(())
    }

    pub fn pop_loop(&mut self) -> CompileResult<InstructionHandle> {
        let handle = self
            .loop_stack
            .pop()
            .ok_or_else(|| CompileError::MalformedControlFlow {
                reason: "loop end without a matching loop begin".into(),
            })?;
        if self.if_depth_in_loop.pop() != Some(0) {
            return Err(CompileError::MalformedControlFlow {
                reason: "loop closed with an IF still open inside it".into(),
            });
        }
        Ok(handle)
    }

    pub fn in_loop(&self) -> bool {
        !self.loop_stack.is_empty()
    }

    /// Opener handle of the innermost open loop.
    pub fn top_loop(&self) -> CompileResult<InstructionHandle> {
        self.loop_stack
            .last()
            .copied()
            .ok_or_else(|| CompileError::MalformedControlFlow {
                reason: "continue outside of any loop".into(),
            })
    }

    /// Mask-stack entries a BREAK at this point must unwind.
    pub fn open_ifs_in_loop(&self) -> u32 {
        self.if_depth_in_loop.last().copied().unwrap_or(0)
    }

    /// Both stacks must drain by the end of the program.
    pub fn check_balanced(&self) -> CompileResult<()> {
        if !self.if_stack.is_empty() {
            return Err(CompileError::MalformedControlFlow {
                reason: format!("{} IF block(s) left open", self.if_stack.len()),
            });
        }
        if !self.loop_stack.is_empty() {
            return Err(CompileError::MalformedControlFlow {
                reason: format!("{} loop(s) left open", self.loop_stack.len()),
            });
        }
        Ok(())
    }
}

fn null_d() -> HardwareRegister {
    HardwareRegister::null().retype(RegType::D)
}

impl InstructionStream {
    /// Open a conditional block. The jump field stays zero until ELSE or
    /// ENDIF patches it. Under single-program-flow this degrades to an
    /// inverted-predicate ADD to the instruction pointer.
    pub fn emit_if(&mut self, exec_size: u32) -> CompileResult<InstructionHandle> {
        let insn = if self.single_program_flow {
            let insn = self.next_insn(Opcode::Add);
            self.set_dest(insn, HardwareRegister::ip())?;
            self.set_src0(insn, HardwareRegister::ip())?;
            self.set_src1(insn, HardwareRegister::imm_d(0))?;
            self.get_mut(insn).set_pred_inverse(true);
            insn
        } else {
            let insn = self.next_insn(Opcode::If);
            if self.gen().uses_mask_stacks() {
                self.set_dest(insn, HardwareRegister::ip())?;
                self.set_src0(insn, HardwareRegister::ip())?;
                self.set_src1(insn, HardwareRegister::imm_d(0))?;
            } else {
                self.set_dest(insn, HardwareRegister::imm_w(0))?;
                self.set_src0(insn, null_d())?;
                self.set_src1(insn, null_d())?;
                self.get_mut(insn).set_gen6_jump_count(0);
            }
            insn
        };

        let single_program_flow = self.single_program_flow;
        let record = self.get_mut(insn);
        record.set_exec_size(exec_size);
        record.set_compression_control(COMPRESSION_NONE);
        record.set_pred_control(PREDICATE_NORMAL);
        record.set_mask_control(MASK_ENABLE);
        if !single_program_flow {
            record.set_thread_control(THREAD_SWITCH);
        }
        // The predicate was consumed by the branch.
        self.set_predicate_control(PREDICATE_NONE);
        Ok(insn)
    }

    /// Gen6 fused compare-and-branch IF: evaluates the comparison itself
    /// instead of reading a flag a CMP wrote.
    pub fn emit_if_compare(
        &mut self,
        cond: u32,
        src0: HardwareRegister,
        src1: HardwareRegister,
    ) -> CompileResult<InstructionHandle> {
        let insn = self.next_insn(Opcode::If);
        self.set_dest(insn, HardwareRegister::imm_w(0))?;
        self.set_src0(insn, src0)?;
        self.set_src1(insn, src1)?;
        let record = self.get_mut(insn);
        record.set_exec_size(width_code(8));
        record.set_gen6_jump_count(0);
        record.set_cond_modifier(cond);
        record.set_thread_control(THREAD_SWITCH);
        Ok(insn)
    }

    /// Open the alternative arm and patch the IF to jump here when the
    /// predicate fails.
    pub fn emit_else(
        &mut self,
        if_handle: InstructionHandle,
    ) -> CompileResult<InstructionHandle> {
        let br = self.gen().branch_scale();

        let insn = if self.single_program_flow {
            let insn = self.next_insn(Opcode::Add);
            self.set_dest(insn, HardwareRegister::ip())?;
            self.set_src0(insn, HardwareRegister::ip())?;
            self.set_src1(insn, HardwareRegister::imm_d(0))?;
            insn
        } else {
            let insn = self.next_insn(Opcode::Else);
            if self.gen().uses_mask_stacks() {
                self.set_dest(insn, HardwareRegister::ip())?;
                self.set_src0(insn, HardwareRegister::ip())?;
                self.set_src1(insn, HardwareRegister::imm_d(0))?;
            } else {
                self.set_dest(insn, HardwareRegister::imm_w(0))?;
                self.set_src0(insn, null_d())?;
                self.set_src1(insn, null_d())?;
                self.get_mut(insn).set_gen6_jump_count(0);
            }
            insn
        };

        let single_program_flow = self.single_program_flow;
        let exec_size = self.get(if_handle).exec_size();
        let record = self.get_mut(insn);
        record.set_exec_size(exec_size);
        record.set_compression_control(COMPRESSION_NONE);
        record.set_mask_control(MASK_ENABLE);
        if !single_program_flow {
            record.set_thread_control(THREAD_SWITCH);
        }

        let delta = insn as i32 - if_handle as i32;
        let uses_mask_stacks = self.gen().uses_mask_stacks();
        let if_record = self.get_mut(if_handle);
        if single_program_flow {
            // The IF is a plain ADD; its byte offset skips past the ELSE.
            if_record.set_imm_ud(((delta + 1) * 16) as u32);
        } else if uses_mask_stacks {
            if_record.set_gen4_jump_count(br * delta);
            if_record.set_gen4_pop_count(0);
        } else {
            if_record.set_gen6_jump_count(br * (delta + 1));
        }
        Ok(insn)
    }

    /// Close a conditional block, patching whichever of IF or ELSE still
    /// points here.
    pub fn emit_endif(&mut self, patch_handle: InstructionHandle) -> CompileResult<()> {
        let br = self.gen().branch_scale();

        if self.single_program_flow {
            // No ENDIF at all; the open ADD jumps to the next instruction.
            let delta = self.position() as i32 - patch_handle as i32;
            self.get_mut(patch_handle).set_imm_ud((delta * 16) as u32);
            return Ok(());
        }

        let insn = self.next_insn(Opcode::Endif);
        if self.gen().uses_mask_stacks() {
            let r0 = HardwareRegister::vec4_grf(0, 0).retype(RegType::UD);
            self.set_dest(insn, r0)?;
            self.set_src0(insn, r0)?;
            self.set_src1(insn, HardwareRegister::imm_d(0))?;
        } else {
            self.set_dest(insn, HardwareRegister::imm_w(0))?;
            self.set_src0(insn, null_d())?;
            self.set_src1(insn, null_d())?;
        }

        let exec_size = self.get(patch_handle).exec_size();
        let uses_mask_stacks = self.gen().uses_mask_stacks();
        let record = self.get_mut(insn);
        record.set_exec_size(exec_size);
        record.set_mask_control(MASK_ENABLE);
        record.set_thread_control(THREAD_SWITCH);
        if uses_mask_stacks {
            record.set_gen4_jump_count(0);
            record.set_gen4_pop_count(1);
        } else {
            record.set_gen6_jump_count(2);
        }

        let delta = insn as i32 - patch_handle as i32;
        let patch_opcode = self.get(patch_handle).opcode();
        let patch = self.get_mut(patch_handle);
        match patch_opcode {
            Some(Opcode::If) if uses_mask_stacks => {
                // Resolved IF with an embedded end target.
                patch.set_opcode(Opcode::Iff);
                patch.set_gen4_jump_count(br * (delta + 1));
                patch.set_gen4_pop_count(0);
            }
            Some(Opcode::If) => patch.set_gen6_jump_count(br * delta),
            Some(Opcode::Else) if uses_mask_stacks => {
                patch.set_gen4_jump_count(br * (delta + 1));
                patch.set_gen4_pop_count(1);
            }
            Some(Opcode::Else) => patch.set_gen6_jump_count(br * delta),
            other => {
                return Err(CompileError::MalformedControlFlow {
                    reason: format!("ENDIF patches {other:?}, expected IF or ELSE"),
                })
            }
        }
        Ok(())
    }

    /// Open a loop. Parts with mask stacks emit a DO marker; later parts
    /// (and single-program-flow) just remember the body's first position.
    pub fn emit_do(&mut self, exec_size: u32) -> CompileResult<InstructionHandle> {
        if self.single_program_flow || !self.gen().uses_mask_stacks() {
            return Ok(self.position());
        }
        let insn = self.next_insn(Opcode::Do);
        self.set_dest(insn, null_d())?;
        self.set_src0(insn, null_d())?;
        self.set_src1(insn, null_d())?;
        let record = self.get_mut(insn);
        record.set_exec_size(exec_size);
        record.set_pred_control(PREDICATE_NONE);
        Ok(insn)
    }

    /// Close a loop with a backward branch to the DO position.
    pub fn emit_while(
        &mut self,
        do_handle: InstructionHandle,
        exec_size: u32,
    ) -> CompileResult<InstructionHandle> {
        let br = self.gen().branch_scale();

        let insn = if !self.gen().uses_mask_stacks() {
            let insn = self.next_insn(Opcode::While);
            self.set_dest(insn, HardwareRegister::imm_w(0))?;
            self.set_src0(insn, null_d())?;
            self.set_src1(insn, null_d())?;
            let delta = do_handle as i32 - insn as i32;
            let record = self.get_mut(insn);
            record.set_gen6_jump_count(br * delta);
            record.set_exec_size(exec_size);
            insn
        } else if self.single_program_flow {
            let insn = self.next_insn(Opcode::Add);
            self.set_dest(insn, HardwareRegister::ip())?;
            self.set_src0(insn, HardwareRegister::ip())?;
            let delta = do_handle as i32 - insn as i32;
            self.set_src1(insn, HardwareRegister::imm_d(delta * 16))?;
            self.get_mut(insn).set_exec_size(width_code(1));
            insn
        } else {
            let insn = self.next_insn(Opcode::While);
            self.set_dest(insn, HardwareRegister::ip())?;
            self.set_src0(insn, HardwareRegister::ip())?;
            self.set_src1(insn, HardwareRegister::imm_d(0))?;
            let delta = do_handle as i32 - insn as i32;
            let do_exec = self.get(do_handle).exec_size();
            let record = self.get_mut(insn);
            record.set_exec_size(do_exec);
            record.set_gen4_jump_count(br * (delta + 1));
            record.set_gen4_pop_count(0);
            insn
        };

        self.get_mut(insn).set_compression_control(COMPRESSION_NONE);
        self.set_predicate_control(PREDICATE_NONE);
        Ok(insn)
    }

    /// Leave the innermost loop, unwinding `pop_count` mask-stack entries
    /// on parts that have them. The Gen6+ JIP/UIP fields stay zero until
    /// the deferred fixup pass.
    pub fn emit_break(&mut self, pop_count: u32) -> CompileResult<InstructionHandle> {
        let insn = self.next_insn(Opcode::Break);
        if self.gen().uses_mask_stacks() {
            self.set_dest(insn, HardwareRegister::ip())?;
            self.set_src0(insn, HardwareRegister::ip())?;
            self.set_src1(insn, HardwareRegister::imm_d(0))?;
            self.get_mut(insn).set_gen4_pop_count(pop_count);
        } else {
            self.set_dest(insn, null_d())?;
            self.set_src0(insn, null_d())?;
            self.set_src1(insn, HardwareRegister::imm_d(0))?;
        }
        let record = self.get_mut(insn);
        record.set_exec_size(width_code(8));
        record.set_compression_control(COMPRESSION_NONE);
        Ok(insn)
    }

    /// Jump to the loop's WHILE for the next iteration. On Gen6+ the
    /// backward UIP to the loop head is known immediately; the forward JIP
    /// waits for the fixup pass.
    pub fn emit_continue(
        &mut self,
        pop_count: u32,
        do_handle: InstructionHandle,
    ) -> CompileResult<InstructionHandle> {
        let br = self.gen().branch_scale();
        let insn = self.next_insn(Opcode::Continue);
        self.set_dest(insn, HardwareRegister::ip())?;
        self.set_src0(insn, HardwareRegister::ip())?;
        self.set_src1(insn, HardwareRegister::imm_d(0))?;
        if self.gen().uses_mask_stacks() {
            self.get_mut(insn).set_gen4_pop_count(pop_count);
        } else {
            let delta = do_handle as i32 - insn as i32;
            self.get_mut(insn).set_uip(br * delta);
        }
        let record = self.get_mut(insn);
        record.set_exec_size(width_code(8));
        record.set_compression_control(COMPRESSION_NONE);
        Ok(insn)
    }

    /// Indexed jump; the offset lands in the immediate dword later via
    /// [`InstructionStream::land_forward_jump`].
    pub fn emit_jmpi(&mut self) -> CompileResult<InstructionHandle> {
        let insn = self.next_insn(Opcode::Jmpi);
        self.set_dest(insn, HardwareRegister::ip())?;
        self.set_src0(insn, HardwareRegister::ip())?;
        self.set_src1(insn, HardwareRegister::imm_d(0))?;
        let record = self.get_mut(insn);
        record.set_exec_size(width_code(1));
        record.set_compression_control(COMPRESSION_NONE);
        record.set_mask_control(MASK_DISABLE);
        self.set_predicate_control(PREDICATE_NONE);
        Ok(insn)
    }

    /// Point an earlier JMPI at the current position.
    pub fn land_forward_jump(&mut self, jmp_handle: InstructionHandle) {
        let scale = if self.gen() < TargetGeneration::Gen5 {
            1
        } else {
            2
        };
        let delta = self.position() as i32 - jmp_handle as i32 - 1;
        self.get_mut(jmp_handle).set_imm_ud((scale * delta) as u32);
    }

    /// Back-patch the BREAKs and CONTINUEs of a just-closed pre-Gen6 loop.
    /// Only zero jump fields are touched; inner loops already patched
    /// their own.
    pub fn patch_loop_jumps(&mut self, do_handle: InstructionHandle, while_handle: InstructionHandle) {
        let br = self.gen().branch_scale();
        for pos in (do_handle..while_handle).rev() {
            let insn = self.get(pos);
            match insn.opcode() {
                Some(Opcode::Break) if insn.gen4_jump_count() == 0 => {
                    let jump = br * (while_handle as i32 - pos as i32 + 1);
                    self.get_mut(pos).set_gen4_jump_count(jump);
                }
                Some(Opcode::Continue) if insn.gen4_jump_count() == 0 => {
                    let jump = br * (while_handle as i32 - pos as i32);
                    self.get_mut(pos).set_gen4_jump_count(jump);
                }
                _ => {}
            }
        }
    }

    /// Deferred Gen6+ fixup: give every BREAK and CONTINUE its forward JIP
    /// (next block end) and every BREAK its UIP (past the loop's WHILE).
    pub fn fixup_jumps(&mut self) -> CompileResult<()> {
        if self.gen().uses_mask_stacks() {
            return Ok(());
        }
        let br = 2;
        for pos in 0..self.len() {
            match self.get(pos).opcode() {
                Some(Opcode::Break) => {
                    let block_end = self.find_next_block_end(pos)?;
                    let loop_end = self.find_loop_end(pos)?;
                    let record = self.get_mut(pos);
                    record.set_jip(br * (block_end as i32 - pos as i32));
                    record.set_uip(br * (loop_end as i32 - pos as i32 + 1));
                }
                Some(Opcode::Continue) => {
                    let block_end = self.find_next_block_end(pos)?;
                    let record = self.get_mut(pos);
                    record.set_jip(br * (block_end as i32 - pos as i32));
                    debug_assert_ne!(record.uip(), 0);
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// First ENDIF, ELSE or WHILE after `start`.
    fn find_next_block_end(&self, start: usize) -> CompileResult<usize> {
        for pos in start + 1..self.len() {
            match self.get(pos).opcode() {
                Some(Opcode::Endif) | Some(Opcode::Else) | Some(Opcode::While) => return Ok(pos),
                _ => {}
            }
        }
        Err(CompileError::MalformedControlFlow {
            reason: "break or continue with no enclosing block end".into(),
        })
    }

    /// The WHILE of the innermost loop containing `start`: the first WHILE
    /// whose backward jump reaches to or before `start`.
    fn find_loop_end(&self, start: usize) -> CompileResult<usize> {
        let br = 2;
        for pos in start + 1..self.len() {
            let insn = self.get(pos);
            if insn.opcode() == Some(Opcode::While)
                && pos as i32 + insn.gen6_jump_count() / br <= start as i32
            {
                return Ok(pos);
            }
        }
        Err(CompileError::MalformedControlFlow {
            reason: "break outside of any loop".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::instruction::{CondModifier, Opcode};

    fn gen6_stream() -> InstructionStream {
        InstructionStream::new(TargetGeneration::Gen6, false)
    }

    fn gen4_stream() -> InstructionStream {
        InstructionStream::new(TargetGeneration::Gen4, false)
    }

    fn emit_mov(stream: &mut InstructionStream) {
        let insn = stream.next_insn(Opcode::Mov);
        stream
            .set_dest(insn, HardwareRegister::vec8_grf(2, 0))
            .unwrap();
        stream
            .set_src0(insn, HardwareRegister::vec8_grf(3, 0))
            .unwrap();
    }

    #[test]
    fn test_if_else_endif_patches_both_arms_gen6() {
        let mut stream = gen6_stream();
        let if_insn = stream.emit_if(width_code(8)).unwrap();
        emit_mov(&mut stream);
        let else_insn = stream.emit_else(if_insn).unwrap();
        emit_mov(&mut stream);
        stream.emit_endif(else_insn).unwrap();

        // IF at 0, MOV, ELSE at 2, MOV, ENDIF at 4.
        assert_eq!(stream.get(if_insn).opcode(), Some(Opcode::If));
        assert_eq!(stream.get(if_insn).gen6_jump_count(), 2 * (2 - 0 + 1));
        assert_eq!(stream.get(else_insn).gen6_jump_count(), 2 * (4 - 2));
        assert_eq!(stream.get(4).opcode(), Some(Opcode::Endif));
        assert_eq!(stream.get(4).gen6_jump_count(), 2);
    }

    #[test]
    fn test_fused_compare_if_gen6() {
        let mut stream = gen6_stream();
        let if_insn = stream
            .emit_if_compare(
                CondModifier::Nz as u32,
                HardwareRegister::vec8_grf(1, 0),
                HardwareRegister::imm_f(0.0),
            )
            .unwrap();
        emit_mov(&mut stream);
        stream.emit_endif(if_insn).unwrap();

        // The branch carries the comparison itself; ENDIF patches it like a
        // plain IF.
        let record = stream.get(if_insn);
        assert_eq!(record.opcode(), Some(Opcode::If));
        assert_eq!(record.cond_modifier(), CondModifier::Nz as u32);
        assert_eq!(record.gen6_jump_count(), 2 * 2);
    }

    #[test]
    fn test_if_becomes_resolved_form_gen4() {
        let mut stream = gen4_stream();
        let if_insn = stream.emit_if(width_code(8)).unwrap();
        emit_mov(&mut stream);
        stream.emit_endif(if_insn).unwrap();

        // IF at 0, MOV at 1, ENDIF at 2; branch scale 1.
        assert_eq!(stream.get(if_insn).opcode(), Some(Opcode::Iff));
        assert_eq!(stream.get(if_insn).gen4_jump_count(), 2 + 1);
        assert_eq!(stream.get(2).gen4_jump_count(), 0);
    }

    #[test]
    fn test_loop_backpatch_gen4() {
        let mut stream = gen4_stream();
        let do_insn = stream.emit_do(width_code(8)).unwrap();
        emit_mov(&mut stream);
        let brk = stream.emit_break(0).unwrap();
        emit_mov(&mut stream);
        let while_insn = stream.emit_while(do_insn, width_code(8)).unwrap();
        stream.patch_loop_jumps(do_insn, while_insn);

        // DO 0, MOV 1, BREAK 2, MOV 3, WHILE 4.
        assert_eq!(stream.get(while_insn).gen4_jump_count(), (0 - 4) + 1);
        assert_eq!(stream.get(brk).gen4_jump_count(), 4 - 2 + 1);
    }

    #[test]
    fn test_inner_loop_jumps_survive_outer_patch() {
        let mut stream = gen4_stream();
        let outer_do = stream.emit_do(width_code(8)).unwrap();
        let inner_do = stream.emit_do(width_code(8)).unwrap();
        let inner_brk = stream.emit_break(0).unwrap();
        let inner_while = stream.emit_while(inner_do, width_code(8)).unwrap();
        stream.patch_loop_jumps(inner_do, inner_while);
        let inner_jump = stream.get(inner_brk).gen4_jump_count();
        let outer_while = stream.emit_while(outer_do, width_code(8)).unwrap();
        stream.patch_loop_jumps(outer_do, outer_while);
        assert_eq!(stream.get(inner_brk).gen4_jump_count(), inner_jump);
    }

    #[test]
    fn test_gen6_break_fixup() {
        let mut stream = gen6_stream();
        let do_insn = stream.emit_do(width_code(8)).unwrap();
        emit_mov(&mut stream);
        let brk = stream.emit_break(0).unwrap();
        emit_mov(&mut stream);
        let while_insn = stream.emit_while(do_insn, width_code(8)).unwrap();
        stream.fixup_jumps().unwrap();

        // No DO record: body starts at 0; MOV 0, BREAK 1, MOV 2, WHILE 3.
        assert_eq!(while_insn, 3);
        assert_eq!(stream.get(brk).jip(), 2 * (3 - 1));
        assert_eq!(stream.get(brk).uip(), 2 * (3 - 1 + 1));
    }

    #[test]
    fn test_gen6_continue_keeps_emit_time_uip() {
        let mut stream = gen6_stream();
        let do_insn = stream.emit_do(width_code(8)).unwrap();
        emit_mov(&mut stream);
        let cont = stream.emit_continue(0, do_insn).unwrap();
        emit_mov(&mut stream);
        stream.emit_while(do_insn, width_code(8)).unwrap();
        let uip_at_emit = stream.get(cont).uip();
        stream.fixup_jumps().unwrap();
        assert_eq!(stream.get(cont).uip(), uip_at_emit);
        assert_eq!(uip_at_emit, 2 * (0 - cont as i32));
        assert_eq!(stream.get(cont).jip(), 2 * (3 - cont as i32));
    }

    #[test]
    fn test_single_program_flow_collapses_to_ip_adds() {
        let mut stream = InstructionStream::new(TargetGeneration::Gen4, true);
        let if_insn = stream.emit_if(width_code(8)).unwrap();
        emit_mov(&mut stream);
        stream.emit_endif(if_insn).unwrap();
        // ADD at 0, MOV at 1; jump lands past the MOV in bytes.
        assert_eq!(stream.len(), 2);
        assert_eq!(stream.get(if_insn).opcode(), Some(Opcode::Add));
        assert_eq!(stream.get(if_insn).imm_ud(), 2 * 16);
    }

    #[test]
    fn test_flow_stacks_balance() {
        let mut stacks = FlowStacks::new();
        stacks.push_loop(0).unwrap();
        stacks.push_if(1).unwrap();
        assert_eq!(stacks.open_ifs_in_loop(), 1);
        assert!(stacks.pop_loop().is_err());

        let mut stacks = FlowStacks::new();
        stacks.push_if(3).unwrap();
        assert!(stacks.pop_loop().is_err());
        assert!(stacks.check_balanced().is_err());
        stacks.pop_if("ENDIF").unwrap();
        assert!(stacks.check_balanced().is_ok());
        assert!(stacks.pop_if("ENDIF").is_err());
    }

    #[test]
    fn test_break_across_loop_boundary_rejected() {
        let mut stacks = FlowStacks::new();
        stacks.push_if(0).unwrap();
        stacks.push_loop(1).unwrap();
        // The IF outside the loop is not poppable from inside it.
        assert!(stacks.pop_if("ENDIF").is_err());
    }
}
