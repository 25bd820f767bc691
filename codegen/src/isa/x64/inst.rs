//! Instruction descriptors: the operand kinds each lowered opcode accepts
//! and the opcode bytes of its encodable forms.
//!
//! The emitter validates every statement against these tables before
//! encoding; a statement whose operands fall outside its descriptor mask is
//! reported as a diagnostic and skipped. Pseudo-ops with no two-operand
//! hardware form (division, remainder) carry an empty mask so they always
//! take that path.

use crate::ir::{OpStmt1, OpStmt2};

/// Operand-kind bitmasks.
pub(crate) mod arg {
    /// No operand is acceptable: the op is not encodable.
    pub const NONE: u8 = 0;
    /// A register.
    pub const REG: u8 = 1 << 0;
    /// A memory reference.
    pub const MEM: u8 = 1 << 1;
    /// An immediate.
    pub const IMM: u8 = 1 << 2;
    /// A label.
    pub const LABEL: u8 = 1 << 3;
    /// Register or memory.
    pub const RM: u8 = REG | MEM;
    /// Register, memory or immediate.
    pub const RMI: u8 = RM | IMM;
}

/// Descriptor of a one-operand instruction.
#[derive(Copy, Clone)]
pub(crate) struct Inst1 {
    /// Acceptable operand kinds.
    pub args: u8,
    /// Opcode byte of the 16/32/64-bit form; the 8-bit form is `opcode - 1`.
    pub opcode: u8,
    /// The `/digit` extension carried in the ModRM reg field.
    pub ext: u8,
}

pub(crate) fn inst1(op: OpStmt1) -> Option<Inst1> {
    Some(match op {
        OpStmt1::X86Inc => Inst1 {
            args: arg::RM,
            opcode: 0xff,
            ext: 0,
        },
        OpStmt1::X86Dec => Inst1 {
            args: arg::RM,
            opcode: 0xff,
            ext: 1,
        },
        OpStmt1::X86Not => Inst1 {
            args: arg::RM,
            opcode: 0xf7,
            ext: 2,
        },
        OpStmt1::X86Neg => Inst1 {
            args: arg::RM,
            opcode: 0xf7,
            ext: 3,
        },
        _ => return None,
    })
}

/// The condition-code nibble of a lowered conditional jump, used in both
/// the short (`0x70 + cc`) and near (`0x0f 0x80 + cc`) forms.
pub(crate) fn jcc_code(op: OpStmt1) -> Option<u8> {
    Some(match op {
        OpStmt1::X86Ja => 0x7,
        OpStmt1::X86Jae => 0x3,
        OpStmt1::X86Jb => 0x2,
        OpStmt1::X86Jbe => 0x6,
        OpStmt1::X86Je => 0x4,
        OpStmt1::X86Jg => 0xf,
        OpStmt1::X86Jge => 0xd,
        OpStmt1::X86Jl => 0xc,
        OpStmt1::X86Jle => 0xe,
        OpStmt1::X86Jne => 0x5,
        _ => return None,
    })
}

/// Descriptor of a two-operand instruction.
#[derive(Copy, Clone)]
pub(crate) struct Inst2 {
    /// Acceptable destination operand kinds.
    pub dst: u8,
    /// Acceptable source operand kinds.
    pub src: u8,
    /// Opcode of the `op r/m, r` form (0 when absent).
    pub mr: u8,
    /// Opcode of the `op r, r/m` form (0 when absent).
    pub rm: u8,
    /// The `/digit` of the `0x81`/`0x83` immediate group (or of `0xc7` for
    /// mov, `0xc1` for the shifts).
    pub imm_ext: u8,
}

pub(crate) fn inst2(op: OpStmt2) -> Option<Inst2> {
    let alu = |mr, rm, imm_ext| Inst2 {
        dst: arg::RM,
        src: arg::RMI,
        mr,
        rm,
        imm_ext,
    };
    Some(match op {
        OpStmt2::X86Add => alu(0x01, 0x03, 0),
        OpStmt2::X86Or => alu(0x09, 0x0b, 1),
        OpStmt2::X86And => alu(0x21, 0x23, 4),
        OpStmt2::X86Sub => alu(0x29, 0x2b, 5),
        OpStmt2::X86Xor => alu(0x31, 0x33, 6),
        OpStmt2::X86Cmp => alu(0x39, 0x3b, 7),
        OpStmt2::X86Mov => Inst2 {
            dst: arg::RM,
            src: arg::RMI | arg::LABEL,
            mr: 0x89,
            rm: 0x8b,
            imm_ext: 0,
        },
        OpStmt2::X86Mul => Inst2 {
            dst: arg::REG,
            src: arg::RMI,
            mr: 0,
            rm: 0xaf, // 0x0f-prefixed
            imm_ext: 0,
        },
        // Division and remainder have no two-operand encoding; their
        // rdx:rax sequence needs precolored operands this stub ABI layer
        // does not provide.
        OpStmt2::X86Div | OpStmt2::X86Rem => Inst2 {
            dst: arg::NONE,
            src: arg::NONE,
            mr: 0,
            rm: 0,
            imm_ext: 0,
        },
        OpStmt2::X86Shl => Inst2 {
            dst: arg::RM,
            src: arg::IMM,
            mr: 0,
            rm: 0,
            imm_ext: 4,
        },
        OpStmt2::X86Shr => Inst2 {
            dst: arg::RM,
            src: arg::IMM,
            mr: 0,
            rm: 0,
            imm_ext: 5, // 7 (sar) when the destination kind is signed
        },
        OpStmt2::X86Lea => Inst2 {
            dst: arg::REG,
            src: arg::MEM,
            mr: 0,
            rm: 0x8d,
            imm_ext: 0,
        },
        OpStmt2::X86Movsx | OpStmt2::X86Movzx => Inst2 {
            dst: arg::REG,
            src: arg::RM,
            mr: 0,
            rm: 0, // opcode picked from the source width
            imm_ext: 0,
        },
        _ => return None,
    })
}
