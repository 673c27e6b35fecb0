// This module defines the input IR of the eugen compiler: a flat, channel-oriented
// shader instruction list. Each IrInstruction names an opcode, an optional masked
// destination, and up to three swizzled sources. Operands address virtual registers in
// one of four classes (temporaries, interpolated inputs, constants, outputs) by index
// and per-channel swizzle; the swizzle selectors include the literal Zero and One
// lanes, which the translator short-circuits into float immediates instead of reading
// any register. Destinations carry a four-bit channel write mask (a bitflags type) and
// both operand kinds carry a relative-addressing flag, which disables live-interval
// reclaim for the whole program because an indirectly addressed temporary can alias
// any slot in its class. The IR is deliberately small: it is the surviving subset of a
// fuller shader IR that the hardware backend actually distinguishes.

//! Input IR for the EU code generator.
//!
//! A program is a `&[IrInstruction]` slice; the translator walks it once,
//! emitting hardware instructions per channel of each write mask.

use bitflags::bitflags;

/// Virtual register classes addressed by IR operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandClass {
    /// Scratch values, subject to live-interval reclaim.
    Temporary,
    /// Interpolated per-fragment inputs.
    Input,
    /// Program constants, fetched into registers on demand.
    Constant,
    /// Shader outputs (color, depth).
    Output,
}

/// Per-channel source selector. `Zero` and `One` select no register lane at
/// all; they become literal float immediates at translation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwizzleSel {
    X,
    Y,
    Z,
    W,
    Zero,
    One,
}

bitflags! {
    /// Destination channel write mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WriteMask: u8 {
        const X = 1 << 0;
        const Y = 1 << 1;
        const Z = 1 << 2;
        const W = 1 << 3;
    }
}

impl WriteMask {
    pub const XYZW: WriteMask = WriteMask::all();

    /// Channels in ascending order, for per-channel emission loops.
    pub fn channels(self) -> impl Iterator<Item = usize> {
        (0..4).filter(move |&c| self.bits() & (1 << c) != 0)
    }
}

/// A swizzled, optionally negated/absolute source operand.
#[derive(Debug, Clone, Copy)]
pub struct SrcOperand {
    pub class: OperandClass,
    pub index: u32,
    pub swizzle: [SwizzleSel; 4],
    /// Per-channel negate bits, indexed like the swizzle.
    pub negate: WriteMask,
    pub abs: bool,
    /// Indirect addressing through the address register.
    pub rel_addr: bool,
}

impl SrcOperand {
    pub fn new(class: OperandClass, index: u32) -> Self {
        SrcOperand {
            class,
            index,
            swizzle: [SwizzleSel::X, SwizzleSel::Y, SwizzleSel::Z, SwizzleSel::W],
            negate: WriteMask::empty(),
            abs: false,
            rel_addr: false,
        }
    }

    pub fn swizzled(mut self, swizzle: [SwizzleSel; 4]) -> Self {
        self.swizzle = swizzle;
        self
    }

    pub fn negated(mut self) -> Self {
        self.negate = WriteMask::XYZW;
        self
    }
}

/// A masked destination operand.
#[derive(Debug, Clone, Copy)]
pub struct DstOperand {
    pub class: OperandClass,
    pub index: u32,
    pub write_mask: WriteMask,
    pub rel_addr: bool,
}

impl DstOperand {
    pub fn new(class: OperandClass, index: u32) -> Self {
        DstOperand {
            class,
            index,
            write_mask: WriteMask::XYZW,
            rel_addr: false,
        }
    }

    pub fn masked(mut self, write_mask: WriteMask) -> Self {
        self.write_mask = write_mask;
        self
    }
}

/// Texture sampling targets the backend distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TexTarget {
    #[default]
    Tex2d,
    Tex3d,
    TexCube,
    TexRect,
}

/// IR opcodes. Arithmetic ops are emitted per channel of the destination
/// write mask; control-flow ops delimit structured regions that the
/// linearizer lowers to patched relative jumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrOp {
    Mov,
    Add,
    Sub,
    Mul,
    /// Multiply-add, lowered as MUL into a temporary then ADD.
    Mad,
    Frc,
    Flr,
    Trunc,
    Min,
    Max,
    /// Set-on comparisons produce 0.0 / 1.0 per channel.
    Slt,
    Sge,
    Seq,
    Sne,
    /// Scalar math-unit ops, broadcast from the first masked channel.
    Rcp,
    Rsq,
    Sin,
    Cos,
    Exp2,
    Log2,
    Pow,
    /// Texture sample (with optional LOD bias variant).
    Tex,
    Txb,
    /// Conditional fragment kill.
    Kil,
    /// Final framebuffer write; ends the thread.
    FbWrite,
    If,
    Else,
    Endif,
    BeginLoop,
    EndLoop,
    Break,
    Continue,
}

/// One IR instruction. Unused source slots stay `None`.
#[derive(Debug, Clone, Copy)]
pub struct IrInstruction {
    pub op: IrOp,
    pub dst: Option<DstOperand>,
    pub srcs: [Option<SrcOperand>; 3],
    pub saturate: bool,
    /// Update the flag register with a non-zero test of the result; the
    /// following instruction may then be predicated.
    pub cond_update: bool,
    pub tex_unit: u32,
    pub tex_target: TexTarget,
}

impl IrInstruction {
    pub fn new(op: IrOp) -> Self {
        IrInstruction {
            op,
            dst: None,
            srcs: [None; 3],
            saturate: false,
            cond_update: false,
            tex_unit: 0,
            tex_target: TexTarget::default(),
        }
    }

    pub fn with_dst(mut self, dst: DstOperand) -> Self {
        self.dst = Some(dst);
        self
    }

    pub fn with_src(mut self, slot: usize, src: SrcOperand) -> Self {
        self.srcs[slot] = Some(src);
        self
    }

    pub fn saturated(mut self) -> Self {
        self.saturate = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_mask_channels() {
        let mask = WriteMask::X | WriteMask::Z;
        let channels: Vec<usize> = mask.channels().collect();
        assert_eq!(channels, vec![0, 2]);
        assert_eq!(WriteMask::XYZW.channels().count(), 4);
    }

    #[test]
    fn test_operand_builders() {
        let src = SrcOperand::new(OperandClass::Temporary, 3)
            .swizzled([SwizzleSel::X; 4])
            .negated();
        assert_eq!(src.swizzle[3], SwizzleSel::X);
        assert!(src.negate.contains(WriteMask::W));

        let dst = DstOperand::new(OperandClass::Output, 0).masked(WriteMask::X | WriteMask::Y);
        assert!(!dst.write_mask.contains(WriteMask::Z));
    }
}
