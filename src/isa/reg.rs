// This module models EU operand descriptors: which register file an operand lives in,
// its register and subregister number, its data type, and the three-level region
// descriptor (vertical stride, width, horizontal stride) that tells the hardware how
// to walk the file for each execution channel. Strides and widths are stored in their
// encoded instruction-word form; the cvt helpers map element counts to codes the same
// way the instruction word does, and the decode tables invert them for validation.
// Immediate operands reuse the descriptor with the payload's bit image carried
// alongside. The constructors mirror the common shapes the encoder needs: vec8/vec1
// general registers, the null and instruction-pointer architecture registers, message
// registers, and typed immediates, plus the retype/negate/abs/stride combinators that
// derive one descriptor from another.

//! Hardware register descriptors and constructors.

/// Register files addressable by an instruction operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegFile {
    /// Architecture registers: null, address, accumulator, flag, mask, ip.
    Architecture = 0,
    /// The 128-entry general register file.
    General = 1,
    /// Message registers staged for SEND payloads.
    Message = 2,
    /// Immediate; the payload rides in the second source slot.
    Immediate = 3,
}

/// Operand data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegType {
    UD = 0,
    D = 1,
    UW = 2,
    W = 3,
    UB = 4,
    B = 5,
    F = 7,
}

/// Architecture register numbers (the file's high nibble selects the unit).
pub const ARF_NULL: u32 = 0x00;
pub const ARF_ADDRESS: u32 = 0x10;
pub const ARF_ACCUMULATOR: u32 = 0x20;
pub const ARF_FLAG: u32 = 0x30;
pub const ARF_MASK: u32 = 0x40;
pub const ARF_IP: u32 = 0xA0;

/// Direct register addressing.
pub const ADDRESS_DIRECT: u32 = 0;
/// Register-indirect addressing through the address register.
pub const ADDRESS_REGISTER_INDIRECT: u32 = 1;

/// Encode an element count as a vertical-stride code (0 -> 0, else log2+1).
pub const fn vstride_code(elems: u32) -> u32 {
    match elems {
        0 => 0,
        1 => 1,
        2 => 2,
        4 => 3,
        8 => 4,
        16 => 5,
        32 => 6,
        _ => 7,
    }
}

/// Encode an element count as a width (or execution-size) code.
pub const fn width_code(elems: u32) -> u32 {
    vstride_code(elems) - 1
}

/// Encode an element count as a horizontal-stride code.
pub const fn hstride_code(elems: u32) -> u32 {
    vstride_code(elems)
}

/// Decoded element counts, `None` for reserved encodings.
pub fn decode_vstride(code: u32) -> Option<u32> {
    match code {
        0 => Some(0),
        1 => Some(1),
        2 => Some(2),
        3 => Some(4),
        4 => Some(8),
        5 => Some(16),
        6 => Some(32),
        _ => None,
    }
}

pub fn decode_width(code: u32) -> Option<u32> {
    match code {
        0 => Some(1),
        1 => Some(2),
        2 => Some(4),
        3 => Some(8),
        4 => Some(16),
        _ => None,
    }
}

pub fn decode_hstride(code: u32) -> Option<u32> {
    match code {
        0 => Some(0),
        1 => Some(1),
        2 => Some(2),
        3 => Some(4),
        _ => None,
    }
}

/// One operand descriptor. Strides and width carry encoded codes, `subnr`
/// counts bytes, and `imm` holds the bit image for immediate operands.
#[derive(Debug, Clone, Copy)]
pub struct HardwareRegister {
    pub file: RegFile,
    pub nr: u32,
    pub subnr: u32,
    pub reg_type: RegType,
    pub vstride: u32,
    pub width: u32,
    pub hstride: u32,
    pub negate: bool,
    pub abs: bool,
    pub address_mode: u32,
    pub imm: u32,
}

impl HardwareRegister {
    pub fn with_region(
        file: RegFile,
        nr: u32,
        subnr: u32,
        reg_type: RegType,
        vstride: u32,
        width: u32,
        hstride: u32,
    ) -> Self {
        HardwareRegister {
            file,
            nr,
            subnr,
            reg_type,
            vstride,
            width,
            hstride,
            negate: false,
            abs: false,
            address_mode: ADDRESS_DIRECT,
            imm: 0,
        }
    }

    /// An eight-wide float region: <8;8,1>.
    pub fn vec8(file: RegFile, nr: u32, subnr: u32) -> Self {
        Self::with_region(
            file,
            nr,
            subnr * 4,
            RegType::F,
            vstride_code(8),
            width_code(8),
            hstride_code(1),
        )
    }

    /// A sixteen-wide float region: <16;16,1>.
    pub fn vec16(file: RegFile, nr: u32, subnr: u32) -> Self {
        Self::with_region(
            file,
            nr,
            subnr * 4,
            RegType::F,
            vstride_code(16),
            width_code(16),
            hstride_code(1),
        )
    }

    /// A four-wide float region: <4;4,1>.
    pub fn vec4(file: RegFile, nr: u32, subnr: u32) -> Self {
        Self::with_region(
            file,
            nr,
            subnr * 4,
            RegType::F,
            vstride_code(4),
            width_code(4),
            hstride_code(1),
        )
    }

    /// A scalar float region: <0;1,0>.
    pub fn vec1(file: RegFile, nr: u32, subnr: u32) -> Self {
        Self::with_region(
            file,
            nr,
            subnr * 4,
            RegType::F,
            vstride_code(0),
            width_code(1),
            hstride_code(0),
        )
    }

    pub fn vec8_grf(nr: u32, subnr: u32) -> Self {
        Self::vec8(RegFile::General, nr, subnr)
    }

    pub fn vec4_grf(nr: u32, subnr: u32) -> Self {
        Self::vec4(RegFile::General, nr, subnr)
    }

    pub fn vec1_grf(nr: u32, subnr: u32) -> Self {
        Self::vec1(RegFile::General, nr, subnr)
    }

    pub fn null() -> Self {
        Self::vec8(RegFile::Architecture, ARF_NULL, 0)
    }

    pub fn ip() -> Self {
        Self::with_region(
            RegFile::Architecture,
            ARF_IP,
            0,
            RegType::UD,
            vstride_code(0),
            width_code(1),
            hstride_code(0),
        )
    }

    pub fn address(subnr: u32) -> Self {
        Self::with_region(
            RegFile::Architecture,
            ARF_ADDRESS,
            subnr * 2,
            RegType::UW,
            vstride_code(0),
            width_code(1),
            hstride_code(0),
        )
    }

    pub fn message_reg(nr: u32) -> Self {
        Self::vec8(RegFile::Message, nr, 0)
    }

    fn imm_reg(reg_type: RegType, bits: u32) -> Self {
        let mut reg = Self::with_region(
            RegFile::Immediate,
            0,
            0,
            reg_type,
            vstride_code(0),
            width_code(1),
            hstride_code(0),
        );
        reg.imm = bits;
        reg
    }

    pub fn imm_f(value: f32) -> Self {
        Self::imm_reg(RegType::F, value.to_bits())
    }

    pub fn imm_d(value: i32) -> Self {
        Self::imm_reg(RegType::D, value as u32)
    }

    pub fn imm_ud(value: u32) -> Self {
        Self::imm_reg(RegType::UD, value)
    }

    pub fn imm_uw(value: u16) -> Self {
        Self::imm_reg(RegType::UW, value as u32)
    }

    pub fn imm_w(value: i16) -> Self {
        Self::imm_reg(RegType::W, value as u16 as u32)
    }

    pub fn is_immediate(&self) -> bool {
        self.file == RegFile::Immediate
    }

    pub fn is_null(&self) -> bool {
        self.file == RegFile::Architecture && self.nr == ARF_NULL
    }

    /// Same register, different type.
    pub fn retype(mut self, reg_type: RegType) -> Self {
        self.reg_type = reg_type;
        self
    }

    pub fn negated(mut self) -> Self {
        self.negate = !self.negate;
        self
    }

    pub fn absolute(mut self) -> Self {
        self.abs = true;
        self.negate = false;
        self
    }

    /// Same register shifted by whole registers.
    pub fn offset(mut self, delta: u32) -> Self {
        self.nr += delta;
        self
    }

    /// Override the region descriptor with raw element counts.
    pub fn stride(mut self, vstride: u32, width: u32, hstride: u32) -> Self {
        self.vstride = vstride_code(vstride);
        self.width = width_code(width);
        self.hstride = hstride_code(hstride);
        self
    }

    /// Byte subregister offset, preserving everything else.
    pub fn subreg(mut self, subnr: u32) -> Self {
        self.subnr = subnr;
        self
    }
}
