//! Memory operands to instructions.

use crate::api::CodeSink;
use crate::imm::Disp;
use crate::reg::{enc, Gpr, Size};
use crate::rex::{encode_modrm, encode_sib, RexFlags};
use std::fmt;

/// x64 memory addressing modes.
#[derive(Clone, Copy, Debug)]
pub enum Amode {
    /// `disp(base)`.
    ImmReg {
        /// Base register.
        base: Gpr,
        /// Signed 32-bit displacement.
        simm32: i32,
    },
    /// `disp(base, index, scale)`; the index register must not be `%rsp`.
    ImmRegRegShift {
        /// Base register.
        base: Gpr,
        /// Index register; `%rsp` is not encodable here.
        index: Gpr,
        /// Scale applied to the index register.
        scale: Scale,
        /// Signed 32-bit displacement.
        simm32: i32,
    },
}

impl Amode {
    /// Emit the REX prefix appropriate for this addressing mode.
    pub fn emit_rex_prefix(&self, rex: RexFlags, enc_g: u8, sink: &mut impl CodeSink) {
        match self {
            Amode::ImmReg { base, .. } => {
                rex.emit_two_op(sink, enc_g, base.enc());
            }
            Amode::ImmRegRegShift { base, index, .. } => {
                rex.emit_three_op(sink, enc_g, index.enc(), base.enc());
            }
        }
    }
}

impl fmt::Display for Amode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The address is always 64 bits wide, even if the addressed operand
        // is smaller.
        match self {
            Amode::ImmReg { simm32, base } => {
                write!(f, "{}({})", simm32, base.to_string(Size::Quadword))
            }
            Amode::ImmRegRegShift {
                simm32,
                base,
                index,
                scale,
            } => write!(
                f,
                "{}({}, {}, {})",
                simm32,
                base.to_string(Size::Quadword),
                index.to_string(Size::Quadword),
                scale.shift()
            ),
        }
    }
}

/// The scaling factor for the index register in certain [`Amode`]s.
#[derive(Clone, Copy, Debug)]
pub enum Scale {
    /// `index * 1`
    One,
    /// `index * 2`
    Two,
    /// `index * 4`
    Four,
    /// `index * 8`
    Eight,
}

impl Scale {
    /// Create a [`Scale`] from the multiplier itself (1, 2, 4 or 8).
    pub fn from_factor(factor: u8) -> Option<Self> {
        match factor {
            1 => Some(Scale::One),
            2 => Some(Scale::Two),
            4 => Some(Scale::Four),
            8 => Some(Scale::Eight),
            _ => None,
        }
    }

    /// Return the hardware encoding of this [`Scale`].
    fn enc(self) -> u8 {
        match self {
            Scale::One => 0b00,
            Scale::Two => 0b01,
            Scale::Four => 0b10,
            Scale::Eight => 0b11,
        }
    }

    /// Return how much this [`Scale`] shifts the index register's value.
    ///
    /// Useful for pretty-printing; when encoding, use [`Scale::enc`].
    fn shift(self) -> u8 {
        1 << self.enc()
    }
}

/// Emit the ModRM/SIB/displacement sequence for a memory operand.
pub fn emit_modrm_sib_disp(sink: &mut impl CodeSink, enc_g: u8, mem_e: &Amode) {
    match *mem_e {
        Amode::ImmReg { simm32, base } => {
            let enc_e = base.enc();
            let mut disp = Disp::new(simm32);

            // Most base registers allow for a single ModRM byte plus an
            // optional immediate. If rsp is the base register, however, then
            // a SIB byte must be used: index and base both encoded as rsp's
            // 0b100 means "no index", with or without a REX-extended 4th bit
            // (so rsp or r12).
            let enc_e_low3 = enc_e & 7;
            if enc_e_low3 == enc::RSP {
                sink.put1(encode_modrm(disp.m0d(), enc_g & 7, 0b100));
                sink.put1(0b00_100_100);
                disp.emit(sink);
            } else {
                // If the base register is rbp/r13 and there is no offset,
                // force a 1-byte zero offset: the displacement-free encoding
                // means RIP-relative instead.
                if enc_e_low3 == enc::RBP {
                    disp.force_immediate();
                }
                sink.put1(encode_modrm(disp.m0d(), enc_g & 7, enc_e & 7));
                disp.emit(sink);
            }
        }

        Amode::ImmRegRegShift {
            simm32,
            base,
            index,
            scale,
        } => {
            let enc_base = base.enc();
            let enc_index = index.enc();

            // The SIB byte cannot encode rsp as an index register. r12,
            // whose low three bits match rsp's, is explicitly allowed via
            // REX.X, so only rsp itself is rejected.
            assert!(enc_index != enc::RSP);

            // A base register whose low three bits are 101 (rbp/r13) has no
            // displacement-free SIB encoding and requires an explicit
            // displacement byte.
            let mut disp = Disp::new(simm32);
            if enc_base & 7 == enc::RBP {
                disp.force_immediate();
            }

            sink.put1(encode_modrm(disp.m0d(), enc_g & 7, 0b100));
            sink.put1(encode_sib(scale.enc(), enc_index & 7, enc_base & 7));
            disp.emit(sink);
        }
    }
}
