//! The x64 assembler: encodes the lowered statement list to bytes.
//!
//! Each statement is validated against its descriptor in [`super::inst`],
//! then encoded as prefix bytes, opcode, ModR/M, SIB, displacement and
//! immediate. Jumps to bound labels pick the short or near form by
//! distance; forward jumps emit a short-form placeholder that is
//! backpatched when the buffer is finalized, with an out-of-range
//! diagnostic if the optimism was misplaced. Encoding problems never abort
//! the walk: the offending instruction is skipped and reported.

use crate::binemit::{CodeBuffer, RelocKind};
use crate::ir::mem::{mem_child, X86MemLayout};
use crate::ir::{Arch, Func, Kind, Node, OpStmt1, OpStmt2, OpStmtN, Type, VarLoc};
use crate::isa::x64::inst::{arg, inst1, inst2, jcc_code, Inst2};
use crate::result::{CodegenError, CodegenResult, Error};
use ember_assembler_x64::{emit_modrm_sib_disp, enc, encode_modrm, Amode, CodeSink, Gpr, RexFlags, Scale};
use log::trace;

/// A classified instruction operand.
#[derive(Clone, Copy)]
enum Operand {
    Reg(u8, Kind),
    Mem(Amode, Kind),
    Imm(i64, Kind),
    Label(u16),
}

impl Operand {
    fn mask_bit(&self) -> u8 {
        match self {
            Operand::Reg(..) => arg::REG,
            Operand::Mem(..) => arg::MEM,
            Operand::Imm(..) => arg::IMM,
            Operand::Label(..) => arg::LABEL,
        }
    }

    fn kind(&self) -> Kind {
        match self {
            Operand::Reg(_, k) | Operand::Mem(_, k) | Operand::Imm(_, k) => *k,
            Operand::Label(_) => Kind::Ptr,
        }
    }
}

/// Encodes compiled functions to machine code.
///
/// Diagnostics collect per instance; their presence makes the produced
/// bytes unusable, their absence guarantees the bytes are valid.
pub struct Assembler {
    errors: Vec<Error>,
}

impl Assembler {
    /// Create an assembler with no diagnostics.
    pub fn new() -> Assembler {
        Assembler { errors: Vec::new() }
    }

    /// The diagnostics recorded so far.
    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    /// Encode the x64-compiled form of `func` to bytes.
    ///
    /// Requires `Compiler::compile_x64` to have run (the lowered statement
    /// list and the register assignment both come from it).
    pub fn x64(&mut self, func: &Func) -> CodegenResult<Vec<u8>> {
        if !func.is_good() {
            return Err(CodegenError::OutOfMemory);
        }
        let root = func
            .compiled(Arch::X64)
            .ok_or(CodegenError::NotCompiled("function not lowered to x64"))?;
        let mut buf = CodeBuffer::new(func.num_labels());
        self.stmt(func, &mut buf, root);
        for failure in buf.finalize() {
            let node = func
                .label_node(failure.reloc.label)
                .unwrap_or(Node::BAD);
            self.errors.push(Error::new(node, failure.msg));
        }
        trace!("assembled {} bytes for {}", buf.bytes().len(), func.name());
        Ok(buf.into_bytes())
    }

    fn error(&mut self, node: Node, msg: &'static str) {
        self.errors.push(Error::new(node, msg));
    }

    fn stmt(&mut self, func: &Func, buf: &mut CodeBuffer, node: Node) {
        let code = func.code();
        match node.ty() {
            Type::Label => {
                if let Some(index) = node.label_index() {
                    buf.bind_label(index);
                }
            }
            Type::StmtN => match OpStmtN::from_u16(node.raw_op()) {
                Some(OpStmtN::Block) => {
                    for i in 0..node.children(code) {
                        self.stmt(func, buf, node.child(code, i));
                    }
                }
                Some(OpStmtN::X86Ret) => buf.put1(0xc3),
                Some(OpStmtN::X86Call) => self.call(func, buf, node),
                _ => self.error(node, "statement survived lowering unexpectedly"),
            },
            Type::Stmt1 => self.stmt1(func, buf, node),
            Type::Stmt2 => self.stmt2(func, buf, node),
            _ => self.error(node, "statement survived lowering unexpectedly"),
        }
    }

    fn call(&mut self, func: &Func, buf: &mut CodeBuffer, node: Node) {
        let code = func.code();
        let target = node.child(code, 1);
        match target.label_index() {
            Some(label) => {
                buf.put1(0xe8);
                match buf.label_offset(label) {
                    Some(t) => {
                        let disp = t as i64 - (buf.current_offset() as i64 + 4);
                        buf.put4(disp as i32 as u32);
                    }
                    None => buf.use_label(label, RelocKind::Rel32),
                }
            }
            None => self.error(node, "call target is not a label"),
        }
    }

    fn stmt1(&mut self, func: &Func, buf: &mut CodeBuffer, node: Node) {
        let code = func.code();
        let op = match OpStmt1::from_u16(node.raw_op()) {
            Some(op) => op,
            None => return self.error(node, "malformed statement"),
        };
        let child = node.child(code, 0);

        if op == OpStmt1::SetLive {
            return; // liveness pseudo, no bytes
        }
        if op == OpStmt1::X86Jmp {
            match child.label_index() {
                Some(label) => self.jump(buf, None, label),
                None => self.error(node, "jump target is not a label"),
            }
            return;
        }
        if let Some(cc) = jcc_code(op) {
            match child.label_index() {
                Some(label) => self.jump(buf, Some(cc), label),
                None => self.error(node, "jump target is not a label"),
            }
            return;
        }

        let desc = match inst1(op) {
            Some(desc) => desc,
            None => return self.error(node, "statement survived lowering unexpectedly"),
        };
        let operand = match self.operand(func, child) {
            Ok(operand) => operand,
            Err(msg) => return self.error(node, msg),
        };
        if desc.args & operand.mask_bit() == 0 {
            return self.error(node, "instruction does not support the given operand types");
        }
        let bits = operand.kind().reg_bits();
        let opcode = width_opcode(desc.opcode, bits);
        emit_prefix_66(buf, bits);
        match operand {
            Operand::Reg(reg, _) => {
                let mut rex = rex_for(bits);
                if bits == 8 {
                    rex.always_emit_if_8bit_needed(reg);
                }
                rex.emit_one_op(buf, reg);
                buf.put1(opcode);
                buf.put1(encode_modrm(0b11, desc.ext, reg & 7));
            }
            Operand::Mem(amode, _) => {
                amode.emit_rex_prefix(rex_for(bits), desc.ext, buf);
                buf.put1(opcode);
                emit_modrm_sib_disp(buf, desc.ext, &amode);
            }
            _ => unreachable!("mask checked above"),
        }
    }

    /// Emit a jump: short form for bound labels in range, near form for
    /// bound labels out of range, optimistic short form with a relocation
    /// for forward references.
    fn jump(&mut self, buf: &mut CodeBuffer, cc: Option<u8>, label: u16) {
        let short_len: i64 = 2;
        match buf.label_offset(label) {
            Some(target) => {
                let disp8 = target as i64 - (buf.current_offset() as i64 + short_len);
                if let Ok(d) = i8::try_from(disp8) {
                    match cc {
                        Some(cc) => buf.put1(0x70 + cc),
                        None => buf.put1(0xeb),
                    }
                    buf.put1(d as u8);
                } else {
                    let near_len: i64 = match cc {
                        Some(_) => 6,
                        None => 5,
                    };
                    let disp32 = target as i64 - (buf.current_offset() as i64 + near_len);
                    match cc {
                        Some(cc) => {
                            buf.put1(0x0f);
                            buf.put1(0x80 + cc);
                        }
                        None => buf.put1(0xe9),
                    }
                    buf.put4(disp32 as i32 as u32);
                }
            }
            None => {
                match cc {
                    Some(cc) => buf.put1(0x70 + cc),
                    None => buf.put1(0xeb),
                }
                buf.use_label(label, RelocKind::Rel8);
            }
        }
    }

    fn stmt2(&mut self, func: &Func, buf: &mut CodeBuffer, node: Node) {
        let code = func.code();
        let op = match OpStmt2::from_u16(node.raw_op()) {
            Some(op) => op,
            None => return self.error(node, "malformed statement"),
        };
        let desc = match inst2(op) {
            Some(desc) => desc,
            None => return self.error(node, "statement survived lowering unexpectedly"),
        };
        let dst = match self.operand(func, node.child(code, 0)) {
            Ok(o) => o,
            Err(msg) => return self.error(node, msg),
        };
        let src = match self.operand(func, node.child(code, 1)) {
            Ok(o) => o,
            Err(msg) => return self.error(node, msg),
        };
        if desc.dst & dst.mask_bit() == 0 || desc.src & src.mask_bit() == 0 {
            return self.error(node, "instruction does not support the given operand types");
        }

        match op {
            OpStmt2::X86Mov => self.mov(buf, node, dst, src),
            OpStmt2::X86Mul => self.imul(buf, node, dst, src),
            OpStmt2::X86Shl | OpStmt2::X86Shr => self.shift(buf, node, desc, dst, src),
            OpStmt2::X86Lea => self.lea(buf, node, dst, src),
            OpStmt2::X86Movsx | OpStmt2::X86Movzx => {
                self.widen(buf, node, op == OpStmt2::X86Movsx, dst, src)
            }
            _ => self.alu(buf, node, desc, dst, src),
        }
    }

    /// The 0x01/0x03/0x81 ALU family (add, sub, and, or, xor, cmp).
    fn alu(&mut self, buf: &mut CodeBuffer, node: Node, desc: Inst2, dst: Operand, src: Operand) {
        let bits = dst.kind().reg_bits();
        emit_prefix_66(buf, bits);
        match (&dst, &src) {
            (Operand::Reg(d, _), Operand::Reg(s, _)) => {
                let mut rex = rex_for(bits);
                if bits == 8 {
                    rex.always_emit_if_8bit_needed(*d);
                    rex.always_emit_if_8bit_needed(*s);
                }
                rex.emit_two_op(buf, *s, *d);
                buf.put1(width_opcode(desc.mr, bits));
                buf.put1(encode_modrm(0b11, s & 7, d & 7));
            }
            (Operand::Reg(d, _), Operand::Mem(amode, _)) => {
                let mut rex = rex_for(bits);
                if bits == 8 {
                    rex.always_emit_if_8bit_needed(*d);
                }
                amode.emit_rex_prefix(rex, *d, buf);
                buf.put1(width_opcode(desc.rm, bits));
                emit_modrm_sib_disp(buf, *d, amode);
            }
            (Operand::Mem(amode, _), Operand::Reg(s, _)) => {
                let mut rex = rex_for(bits);
                if bits == 8 {
                    rex.always_emit_if_8bit_needed(*s);
                }
                amode.emit_rex_prefix(rex, *s, buf);
                buf.put1(width_opcode(desc.mr, bits));
                emit_modrm_sib_disp(buf, *s, amode);
            }
            (_, Operand::Imm(value, _)) => self.alu_imm(buf, node, desc, dst, *value),
            _ => self.error(node, "instruction does not support the given operand types"),
        }
    }

    fn alu_imm(&mut self, buf: &mut CodeBuffer, node: Node, desc: Inst2, dst: Operand, value: i64) {
        let bits = dst.kind().reg_bits();
        if bits == 64 && i32::try_from(value).is_err() {
            return self.error(node, "immediate does not fit a sign-extended 32-bit field");
        }
        // 0x83 takes a sign-extended 8-bit immediate, 0x81 the full-width
        // one, 0x80 is the 8-bit-operand group.
        let short = bits > 8 && i8::try_from(value).is_ok();
        let opcode = if bits == 8 {
            0x80
        } else if short {
            0x83
        } else {
            0x81
        };
        match dst {
            Operand::Reg(d, _) => {
                let mut rex = rex_for(bits);
                if bits == 8 {
                    rex.always_emit_if_8bit_needed(d);
                }
                rex.emit_one_op(buf, d);
                buf.put1(opcode);
                buf.put1(encode_modrm(0b11, desc.imm_ext, d & 7));
            }
            Operand::Mem(amode, _) => {
                amode.emit_rex_prefix(rex_for(bits), desc.imm_ext, buf);
                buf.put1(opcode);
                emit_modrm_sib_disp(buf, desc.imm_ext, &amode);
            }
            _ => return self.error(node, "instruction does not support the given operand types"),
        }
        if bits == 8 || short {
            buf.put1(value as u8);
        } else if bits == 16 {
            buf.put2(value as u16);
        } else {
            buf.put4(value as u32);
        }
    }

    fn mov(&mut self, buf: &mut CodeBuffer, node: Node, dst: Operand, src: Operand) {
        let bits = dst.kind().reg_bits();
        match (&dst, &src) {
            // Register loads of a label materialize the 64-bit address.
            (Operand::Reg(d, _), Operand::Label(label)) => {
                RexFlags::set_w().emit_one_op(buf, *d);
                buf.put1(0xb8 + (d & 7));
                buf.use_label(*label, RelocKind::Abs64);
            }
            (Operand::Reg(d, _), Operand::Imm(value, _)) => {
                if bits == 64 {
                    if i32::try_from(*value).is_ok() {
                        // Sign-extended imm32 via 0xc7.
                        RexFlags::set_w().emit_one_op(buf, *d);
                        buf.put1(0xc7);
                        buf.put1(encode_modrm(0b11, 0, d & 7));
                        buf.put4(*value as u32);
                    } else {
                        RexFlags::set_w().emit_one_op(buf, *d);
                        buf.put1(0xb8 + (d & 7));
                        buf.put8(*value as u64);
                    }
                } else {
                    emit_prefix_66(buf, bits);
                    let mut rex = RexFlags::clear_w();
                    if bits == 8 {
                        rex.always_emit_if_8bit_needed(*d);
                    }
                    rex.emit_one_op(buf, *d);
                    if bits == 8 {
                        buf.put1(0xb0 + (d & 7));
                        buf.put1(*value as u8);
                    } else {
                        buf.put1(0xb8 + (d & 7));
                        if bits == 16 {
                            buf.put2(*value as u16);
                        } else {
                            buf.put4(*value as u32);
                        }
                    }
                }
            }
            (Operand::Mem(amode, _), Operand::Imm(value, _)) => {
                if bits == 64 && i32::try_from(*value).is_err() {
                    return self
                        .error(node, "immediate does not fit a sign-extended 32-bit field");
                }
                emit_prefix_66(buf, bits);
                amode.emit_rex_prefix(rex_for(bits), 0, buf);
                buf.put1(if bits == 8 { 0xc6 } else { 0xc7 });
                emit_modrm_sib_disp(buf, 0, amode);
                if bits == 8 {
                    buf.put1(*value as u8);
                } else if bits == 16 {
                    buf.put2(*value as u16);
                } else {
                    buf.put4(*value as u32);
                }
            }
            _ => {
                // Register/memory forms share the ALU shape.
                let desc = inst2(OpStmt2::X86Mov).expect("mov descriptor");
                self.alu(buf, node, desc, dst, src);
            }
        }
    }

    fn imul(&mut self, buf: &mut CodeBuffer, node: Node, dst: Operand, src: Operand) {
        let bits = dst.kind().reg_bits();
        if bits == 8 {
            return self.error(node, "8-bit multiply is not encodable");
        }
        let d = match dst {
            Operand::Reg(d, _) => d,
            _ => return self.error(node, "instruction does not support the given operand types"),
        };
        emit_prefix_66(buf, bits);
        match src {
            Operand::Reg(s, _) => {
                rex_for(bits).emit_two_op(buf, d, s);
                buf.put1(0x0f);
                buf.put1(0xaf);
                buf.put1(encode_modrm(0b11, d & 7, s & 7));
            }
            Operand::Mem(amode, _) => {
                amode.emit_rex_prefix(rex_for(bits), d, buf);
                buf.put1(0x0f);
                buf.put1(0xaf);
                emit_modrm_sib_disp(buf, d, &amode);
            }
            Operand::Imm(value, _) => {
                if bits == 64 && i32::try_from(value).is_err() {
                    return self
                        .error(node, "immediate does not fit a sign-extended 32-bit field");
                }
                // imul r, r/m, imm: here r/m is the destination itself.
                let short = i8::try_from(value).is_ok();
                rex_for(bits).emit_two_op(buf, d, d);
                buf.put1(if short { 0x6b } else { 0x69 });
                buf.put1(encode_modrm(0b11, d & 7, d & 7));
                if short {
                    buf.put1(value as u8);
                } else if bits == 16 {
                    buf.put2(value as u16);
                } else {
                    buf.put4(value as u32);
                }
            }
            Operand::Label(_) => {
                self.error(node, "instruction does not support the given operand types")
            }
        }
    }

    fn shift(&mut self, buf: &mut CodeBuffer, node: Node, desc: Inst2, dst: Operand, src: Operand) {
        let bits = dst.kind().reg_bits();
        let amount = match src {
            Operand::Imm(v, _) => (v as u64 % bits.max(8) as u64) as u8,
            _ => return self.error(node, "shift amount must be an immediate"),
        };
        // Arithmetic right shift for signed destinations.
        let ext = if desc.imm_ext == 5 && dst.kind().is_signed() {
            7
        } else {
            desc.imm_ext
        };
        let opcode = if bits == 8 { 0xc0 } else { 0xc1 };
        emit_prefix_66(buf, bits);
        match dst {
            Operand::Reg(d, _) => {
                let mut rex = rex_for(bits);
                if bits == 8 {
                    rex.always_emit_if_8bit_needed(d);
                }
                rex.emit_one_op(buf, d);
                buf.put1(opcode);
                buf.put1(encode_modrm(0b11, ext, d & 7));
            }
            Operand::Mem(amode, _) => {
                amode.emit_rex_prefix(rex_for(bits), ext, buf);
                buf.put1(opcode);
                emit_modrm_sib_disp(buf, ext, &amode);
            }
            _ => return self.error(node, "instruction does not support the given operand types"),
        }
        buf.put1(amount);
    }

    fn lea(&mut self, buf: &mut CodeBuffer, node: Node, dst: Operand, src: Operand) {
        let bits = dst.kind().reg_bits();
        if bits < 32 {
            return self.error(node, "lea destination must be at least 32 bits");
        }
        match (dst, src) {
            (Operand::Reg(d, _), Operand::Mem(amode, _)) => {
                amode.emit_rex_prefix(rex_for(bits), d, buf);
                buf.put1(0x8d);
                emit_modrm_sib_disp(buf, d, &amode);
            }
            _ => self.error(node, "instruction does not support the given operand types"),
        }
    }

    /// movsx/movzx; the opcode depends on the source width, the REX.W bit
    /// on the destination width.
    fn widen(&mut self, buf: &mut CodeBuffer, node: Node, sign: bool, dst: Operand, src: Operand) {
        let dst_bits = dst.kind().reg_bits();
        let src_bits = src.kind().reg_bits();
        let d = match dst {
            Operand::Reg(d, _) => d,
            _ => return self.error(node, "instruction does not support the given operand types"),
        };
        if src_bits >= dst_bits {
            return self.error(node, "widening move from an equal or wider source");
        }
        let opcode: &[u8] = match (sign, src_bits) {
            (true, 8) => &[0x0f, 0xbe],
            (true, 16) => &[0x0f, 0xbf],
            (true, 32) => &[0x63], // movsxd
            (false, 8) => &[0x0f, 0xb6],
            (false, 16) => &[0x0f, 0xb7],
            // A 32-bit mov zero-extends to 64 bits for free.
            (false, 32) => &[0x8b],
            _ => return self.error(node, "widening move from an unsupported width"),
        };
        let bits = if !sign && src_bits == 32 { 32 } else { dst_bits };
        match src {
            Operand::Reg(s, _) => {
                let mut rex = rex_for(bits);
                if src_bits == 8 {
                    rex.always_emit_if_8bit_needed(s);
                }
                rex.emit_two_op(buf, d, s);
                for &b in opcode {
                    buf.put1(b);
                }
                buf.put1(encode_modrm(0b11, d & 7, s & 7));
            }
            Operand::Mem(amode, _) => {
                amode.emit_rex_prefix(rex_for(bits), d, buf);
                for &b in opcode {
                    buf.put1(b);
                }
                emit_modrm_sib_disp(buf, d, &amode);
            }
            _ => self.error(node, "instruction does not support the given operand types"),
        }
    }

    /// Classify a node into an instruction operand.
    fn operand(&mut self, func: &Func, node: Node) -> Result<Operand, &'static str> {
        let code = func.code();
        match node.ty() {
            Type::Var => {
                let var = node.to_var(code).ok_or("malformed variable")?;
                match func.location(var.id()) {
                    VarLoc::Reg(reg) => Ok(Operand::Reg(reg, var.kind())),
                    // Spill slots address through rsp: it is never in the
                    // allocatable bank, so a slot cannot alias a register
                    // the allocator handed to a live variable.
                    VarLoc::Stack(slot) => Ok(Operand::Mem(
                        Amode::ImmReg {
                            base: Gpr::new(enc::RSP),
                            simm32: 8 * slot as i32,
                        },
                        var.kind(),
                    )),
                    VarLoc::Unassigned => Err("variable was never assigned a register"),
                }
            }
            Type::Const => {
                let value = node.to_value(code).ok_or("malformed constant")?;
                Ok(Operand::Imm(value.as_i64(), value.kind()))
            }
            Type::Label => Ok(Operand::Label(node.label_index().unwrap_or(u16::MAX))),
            Type::Mem => self.amode(func, node),
            _ => Err("operand is not in an encodable form"),
        }
    }

    fn amode(&mut self, func: &Func, node: Node) -> Result<Operand, &'static str> {
        let code = func.code();
        if node.memtype() != Some(crate::ir::MemType::X86) {
            return Err("memory reference was not lowered to the x86 flavor");
        }
        let disp = mem_child(code, node, X86MemLayout::DISP)
            .and_then(|n| n.to_value(code))
            .map(|v| v.as_i64() as i32)
            .unwrap_or(0);
        let reg_of = |n: Node| -> Result<u8, &'static str> {
            let var = n.to_var(code).ok_or("address operand is not a variable")?;
            match func.location(var.id()) {
                VarLoc::Reg(reg) => Ok(reg),
                _ => Err("address register was spilled"),
            }
        };
        let base = match mem_child(code, node, X86MemLayout::BASE) {
            Some(b) => Some(reg_of(b)?),
            None => None,
        };
        let index = match mem_child(code, node, X86MemLayout::INDEX) {
            Some(i) => Some(reg_of(i)?),
            None => None,
        };
        let scale = mem_child(code, node, X86MemLayout::SCALE)
            .and_then(|n| n.to_value(code))
            .map(|v| v.as_u64() as u8)
            .unwrap_or(1);
        let amode = match (base, index) {
            (Some(base), None) => Amode::ImmReg {
                base: Gpr::new(base),
                simm32: disp,
            },
            (Some(base), Some(index)) => Amode::ImmRegRegShift {
                base: Gpr::new(base),
                index: Gpr::new(index),
                scale: Scale::from_factor(scale).ok_or("invalid index scale")?,
                simm32: disp,
            },
            _ => return Err("memory reference without a base register"),
        };
        Ok(Operand::Mem(amode, node.kind()))
    }
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

fn rex_for(bits: u32) -> RexFlags {
    if bits == 64 {
        RexFlags::set_w()
    } else {
        RexFlags::clear_w()
    }
}

fn emit_prefix_66(buf: &mut CodeBuffer, bits: u32) {
    if bits == 16 {
        buf.put1(0x66);
    }
}

fn width_opcode(opcode: u8, bits: u32) -> u8 {
    if bits == 8 {
        opcode - 1
    } else {
        opcode
    }
}
