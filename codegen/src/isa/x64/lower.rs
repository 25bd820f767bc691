//! Lowering from the portable linear form to x86-flavored statements.
//!
//! Every statement that leaves this pass is a native-shaped pseudo-op and
//! every operand is something the ISA accepts: a register-candidate
//! variable, an x86 memory reference, a constant, or a label. Arbitrary
//! expressions are decomposed by introducing temporaries; operands are
//! simplified left to right so side effects keep program order, and a
//! source is always simplified before its destination.

use crate::ir::{
    Func, Kind, MemType, Node, Op1, Op2, OpN, OpStmt1, OpStmt2, OpStmtN, Type, Var,
};
use crate::isa::x64::regs;
use crate::lower::cc_jump;
use crate::result::Error;
use crate::settings::Abi;
use log::trace;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

/// Additive terms of an expression recognized as an x86 effective address.
struct AddrParts {
    disp: i32,
    base: Option<Var>,
    index: Option<Var>,
    scale: u8,
}

pub(crate) struct X64Lower<'a> {
    func: &'a mut Func,
    out: &'a mut Vec<Node>,
    errors: &'a mut Vec<Error>,
    hints: &'a mut FxHashMap<u32, u8>,
    abi: Abi,
}

impl<'a> X64Lower<'a> {
    pub(crate) fn new(
        func: &'a mut Func,
        out: &'a mut Vec<Node>,
        errors: &'a mut Vec<Error>,
        hints: &'a mut FxHashMap<u32, u8>,
        abi: Abi,
    ) -> Self {
        X64Lower {
            func,
            out,
            errors,
            hints,
            abi,
        }
    }

    pub(crate) fn run(&mut self, root: Node) {
        self.lower_stmt(root);
    }

    fn emit(&mut self, node: Node) {
        if node.is_valid() {
            self.out.push(node);
        }
    }

    fn error(&mut self, node: Node, msg: &'static str) {
        self.errors.push(Error::new(node, msg));
    }

    fn lower_stmt(&mut self, node: Node) {
        if !self.func.is_good() {
            return;
        }
        let code_op = node.raw_op();
        match node.ty() {
            Type::Label => self.emit(node),
            Type::Stmt1 => match OpStmt1::from_u16(code_op) {
                Some(op) if op.to_x86().is_some() && op != OpStmt1::Inc && op != OpStmt1::Dec => {
                    // Goto and the portable conditional jumps map 1:1.
                    let target = node.child(self.func.code(), 0);
                    let stmt = self.func.stmt1(op.to_x86().expect("mapped"), target);
                    self.emit(stmt);
                }
                Some(OpStmt1::Inc) | Some(OpStmt1::Dec) => {
                    let operand = node.child(self.func.code(), 0);
                    let x86 = OpStmt1::from_u16(code_op).and_then(OpStmt1::to_x86).expect("mapped");
                    match operand.ty() {
                        Type::Var => {
                            let stmt = self.func.stmt1(x86, operand);
                            self.emit(stmt);
                        }
                        Type::Mem => {
                            let mem = self.legalize_mem(operand);
                            let stmt = self.func.stmt1(x86, mem);
                            self.emit(stmt);
                        }
                        _ => self.error(node, "inc/dec of a non-assignable expression"),
                    }
                }
                Some(op) if op as u16 >= OpStmt1::X86Jmp as u16 || op == OpStmt1::SetLive => {
                    self.emit(node)
                }
                _ => self.error(node, "statement not lowerable to x64"),
            },
            Type::Stmt2 => match OpStmt2::from_u16(code_op) {
                Some(OpStmt2::AsmCmp) => self.lower_cmp(node),
                Some(op) if op.is_assign() => self.lower_assign(node, op),
                Some(op) if op as u16 >= OpStmt2::X86Add as u16 => self.emit(node),
                _ => self.error(node, "unexpected portable statement in x64 lowering"),
            },
            Type::StmtN => match OpStmtN::from_u16(code_op) {
                Some(OpStmtN::Block) => {
                    for i in 0..node.children(self.func.code()) {
                        let child = node.child(self.func.code(), i);
                        self.lower_stmt(child);
                    }
                }
                Some(OpStmtN::Return) => self.lower_return(node),
                Some(OpStmtN::AssignCall) => {
                    let n = node.children(self.func.code());
                    if n == 0 {
                        self.error(node, "malformed call assignment");
                        return;
                    }
                    let call = node.child(self.func.code(), n - 1);
                    let results: SmallVec<[Node; 2]> = (0..n - 1)
                        .map(|i| node.child(self.func.code(), i))
                        .collect();
                    self.lower_call(&results, call);
                }
                Some(OpStmtN::X86Call) | Some(OpStmtN::X86Ret) => self.emit(node),
                _ => self.error(node, "unexpected portable statement in x64 lowering"),
            },
            Type::Stmt0 => self.error(node, "unexpected portable statement in x64 lowering"),
            _ => self.error(node, "expression at statement position"),
        }
    }

    fn lower_cmp(&mut self, node: Node) {
        let x = node.child(self.func.code(), 0);
        let y = node.child(self.func.code(), 1);
        let mut x = self.to_var_mem_const(x);
        let mut y = self.to_var_mem_const(y);
        x = self.legalize_imm(x);
        y = self.legalize_imm(y);
        // The left operand of cmp must be a register or memory.
        if x.ty() == Type::Const {
            x = self.to_var(x);
        }
        // The two-operand constraint: at most one memory operand.
        if x.ty() == Type::Mem && y.ty() == Type::Mem {
            y = self.to_var(y);
        }
        let stmt = self.func.stmt2(OpStmt2::X86Cmp, x, y);
        self.emit(stmt);
    }

    fn lower_return(&mut self, node: Node) {
        let mut values: SmallVec<[Node; 2]> = SmallVec::new();
        for i in 0..node.children(self.func.code()) {
            let value = node.child(self.func.code(), i);
            let value = self.to_var_const(value);
            if i == 0 {
                if let Some(var) = value.to_var(self.func.code()) {
                    self.hints.insert(var.id().index(), regs::RET);
                }
            }
            values.push(value);
        }
        let stmt = self.func.stmtn(OpStmtN::X86Ret, &values);
        self.emit(stmt);
    }

    fn lower_assign(&mut self, node: Node, op: OpStmt2) {
        let dst = node.child(self.func.code(), 0);
        let src = node.child(self.func.code(), 1);
        match op.assign_op() {
            None => self.assign_to(dst, src),
            Some(bin_op) => {
                // Op-assign: simplify the source first, then the
                // destination, then apply the two-operand constraint.
                let x86 = OpStmt2::x86_for_op(bin_op).expect("op-assign operator");
                let mut src = self.to_var_mem_const(src);
                src = self.legalize_imm(src);
                let dst = self.lower_dst(dst);
                if dst.ty() == Type::Mem && src.ty() == Type::Mem {
                    src = self.to_var(src);
                }
                let stmt = self.func.stmt2(x86, dst, src);
                self.emit(stmt);
            }
        }
    }

    /// Lower `dst = src` for an arbitrary source expression.
    fn assign_to(&mut self, dst: Node, src: Node) {
        match src.ty() {
            Type::Var | Type::Const | Type::Label => {
                let dst = self.lower_dst(dst);
                let src = if dst.ty() == Type::Mem {
                    // Address materialization and wide immediates only have
                    // register-destination forms.
                    if src.ty() == Type::Label {
                        self.to_var(src)
                    } else {
                        self.legalize_imm(src)
                    }
                } else {
                    src
                };
                self.emit_mov(dst, src);
            }
            Type::Mem => {
                let src = self.legalize_mem(src);
                let dst = self.lower_dst(dst);
                if dst.ty() == Type::Mem {
                    // Two memory operands: stage through a temporary.
                    let tmp = self.func.new_var(src.kind());
                    self.emit_mov(tmp.node(), src);
                    self.emit_mov(dst, tmp.node());
                } else {
                    self.emit_mov(dst, src);
                }
            }
            Type::Tuple => match OpN::from_u16(src.raw_op()) {
                Some(OpN::Call) => {
                    let results = [dst];
                    self.lower_call(&results, src);
                }
                Some(OpN::Add) if dst.ty() == Type::Var => {
                    // An addition shaped like an effective address becomes
                    // a single lea.
                    if let Some(mem) = self.mem_from_address(dst.kind(), src) {
                        let stmt = self.func.stmt2(OpStmt2::X86Lea, dst, mem);
                        self.emit(stmt);
                    } else {
                        self.accumulate_tuple(dst, src, Op2::Add);
                    }
                }
                Some(opn) => match op2_of_opn(opn) {
                    Some(op) => self.accumulate_tuple(dst, src, op),
                    None => self.error(src, "tuple expression not lowerable"),
                },
                None => self.error(src, "malformed tuple"),
            },
            Type::Binary => self.assign_binary(dst, src),
            Type::Unary => self.assign_unary(dst, src),
            _ => self.error(src, "expression not lowerable"),
        }
    }

    fn assign_binary(&mut self, dst: Node, src: Node) {
        let op = match Op2::from_u16(src.raw_op()) {
            Some(op) => op,
            None => return self.error(src, "malformed binary expression"),
        };
        let x = src.child(self.func.code(), 0);
        let y = src.child(self.func.code(), 1);

        if op.is_comparison() {
            return self.materialize_bool(dst, op, x, y);
        }
        // Logical and/or on materialized booleans reduce to the bitwise
        // ops; both operands are already 0/1 values here.
        let op = match op {
            Op2::Land => Op2::And,
            Op2::Lor => Op2::Or,
            other => other,
        };
        let x86 = match OpStmt2::x86_for_op(op) {
            Some(x86) => x86,
            None => return self.error(src, "operator not lowerable"),
        };

        // Left-to-right: simplify x before y.
        let mut x = self.to_var_mem_const(x);
        x = self.legalize_imm(x);
        let mut y = self.to_var_mem_const(y);
        y = self.legalize_imm(y);

        // `v = v op y` needs no temporary: a single two-operand op.
        let in_place_ok = dst.ty() == Type::Var || x86 != OpStmt2::X86Mul;
        if dst == x && in_place_ok {
            let dst = self.lower_dst(dst);
            let y = if dst.ty() == Type::Mem && y.ty() == Type::Mem {
                self.to_var(y)
            } else {
                y
            };
            let stmt = self.func.stmt2(x86, dst, y);
            self.emit(stmt);
            return;
        }

        if dst.ty() == Type::Var {
            if y == dst {
                if op.is_commutative() {
                    // d = x op d  ==  d op= x
                    let stmt = self.func.stmt2(x86, dst, x);
                    self.emit(stmt);
                } else {
                    // The mov below would clobber y; save it first.
                    let tmp = self.func.new_var(operand_kind(y));
                    self.emit_mov(tmp.node(), y);
                    self.emit_mov(dst, x);
                    let stmt = self.func.stmt2(x86, dst, tmp.node());
                    self.emit(stmt);
                }
            } else {
                self.emit_mov(dst, x);
                let stmt = self.func.stmt2(x86, dst, y);
                self.emit(stmt);
            }
        } else {
            let dst = self.lower_dst(dst);
            let tmp = self.func.new_var(src.kind());
            self.emit_mov(tmp.node(), x);
            let stmt = self.func.stmt2(x86, tmp.node(), y);
            self.emit(stmt);
            self.emit_mov(dst, tmp.node());
        }
    }

    fn assign_unary(&mut self, dst: Node, src: Node) {
        let op = match Op1::from_u16(src.raw_op()) {
            Some(op) => op,
            None => return self.error(src, "malformed unary expression"),
        };
        let x = src.child(self.func.code(), 0);
        match op {
            Op1::Neg | Op1::BitNot => {
                let x = self.to_var_mem_const(x);
                let x86 = if op == Op1::Neg {
                    OpStmt1::X86Neg
                } else {
                    OpStmt1::X86Not
                };
                if dst == x {
                    let dst = self.lower_dst(dst);
                    let stmt = self.func.stmt1(x86, dst);
                    self.emit(stmt);
                } else if dst.ty() == Type::Var {
                    self.emit_mov(dst, x);
                    let stmt = self.func.stmt1(x86, dst);
                    self.emit(stmt);
                } else {
                    let dst = self.lower_dst(dst);
                    let tmp = self.func.new_var(src.kind());
                    self.emit_mov(tmp.node(), x);
                    let stmt = self.func.stmt1(x86, tmp.node());
                    self.emit(stmt);
                    self.emit_mov(dst, tmp.node());
                }
            }
            Op1::Not => {
                // Boolean negation: dst = (x == false).
                let zero = self.func.bool_const(false);
                self.materialize_bool(dst, Op2::Eq, x, zero);
            }
            Op1::Cast => self.assign_cast(dst, src, x),
            Op1::Bitcast => {
                if src.kind().bits() == x.kind().bits() {
                    let x = self.to_var_mem_const(x);
                    let dst = self.lower_dst(dst);
                    if dst.ty() == Type::Mem && x.ty() == Type::Mem {
                        let tmp = self.func.new_var(src.kind());
                        self.emit_mov(tmp.node(), x);
                        self.emit_mov(dst, tmp.node());
                    } else {
                        self.emit_mov(dst, x);
                    }
                } else {
                    self.error(src, "bit copy requires equal widths");
                }
            }
            Op1::Bad => self.error(src, "malformed unary expression"),
        }
    }

    fn assign_cast(&mut self, dst: Node, src: Node, x: Node) {
        let from = x.kind();
        let to = src.kind();
        if from.is_float() || to.is_float() {
            return self.error(src, "float conversion not lowerable");
        }
        let x = self.to_var_mem_const(x);
        if to.reg_bits() <= from.reg_bits() {
            // Truncation and same-width conversions are register renames.
            let dst = self.lower_dst(dst);
            if dst.ty() == Type::Mem && x.ty() == Type::Mem {
                let tmp = self.func.new_var(to);
                self.emit_mov(tmp.node(), x);
                self.emit_mov(dst, tmp.node());
            } else {
                self.emit_mov(dst, x);
            }
            return;
        }
        // Widening: pick the extension by the source signedness.
        let x86 = if from.is_signed() {
            OpStmt2::X86Movsx
        } else {
            OpStmt2::X86Movzx
        };
        if dst.ty() == Type::Var {
            let stmt = self.func.stmt2(x86, dst, x);
            self.emit(stmt);
        } else {
            let dst = self.lower_dst(dst);
            let tmp = self.func.new_var(to);
            let stmt = self.func.stmt2(x86, tmp.node(), x);
            self.emit(stmt);
            self.emit_mov(dst, tmp.node());
        }
    }

    /// Materialize a boolean comparison result into `dst` with a branch
    /// diamond: compare, conditional jump, and two constant moves.
    fn materialize_bool(&mut self, dst: Node, op: Op2, x: Node, y: Node) {
        let mut x = self.to_var_mem_const(x);
        x = self.legalize_imm(x);
        let mut y = self.to_var_mem_const(y);
        y = self.legalize_imm(y);
        if x.ty() == Type::Const {
            x = self.to_var(x);
        }
        if x.ty() == Type::Mem && y.ty() == Type::Mem {
            y = self.to_var(y);
        }
        let cc = cc_jump(op, x.kind()).to_x86().unwrap_or(OpStmt1::Bad);
        let ltrue = self.func.new_label();
        let lend = self.func.new_label();
        let dst = self.lower_dst(dst);
        let tru = self.func.bool_const(true);
        let fal = self.func.bool_const(false);

        let cmp = self.func.stmt2(OpStmt2::X86Cmp, x, y);
        self.emit(cmp);
        let jcc = self.func.stmt1(cc, ltrue.node());
        self.emit(jcc);
        self.emit_mov(dst, fal);
        let jmp = self.func.stmt1(OpStmt1::X86Jmp, lend.node());
        self.emit(jmp);
        self.emit(ltrue.node());
        self.emit_mov(dst, tru);
        self.emit(lend.node());
    }

    fn lower_call(&mut self, results: &[Node], call: Node) {
        if call.children(self.func.code()) < 2 {
            return self.error(call, "malformed call");
        }
        let ftype = call.child(self.func.code(), 0);
        let target = call.child(self.func.code(), 1);
        let param_regs = regs::params(self.abi);

        let mut args: SmallVec<[Node; 4]> = SmallVec::new();
        for i in 2..call.children(self.func.code()) {
            let arg = call.child(self.func.code(), i);
            let arg = self.to_var_const(arg);
            if let Some(var) = arg.to_var(self.func.code()) {
                if let Some(&reg) = param_regs.get(i as usize - 2) {
                    self.hints.insert(var.id().index(), reg);
                }
            }
            args.push(arg);
        }

        if results.len() > 1 {
            self.error(call, "multiple call results not supported");
        }
        let set = match results.first() {
            Some(r) if r.ty() == Type::Var => {
                if let Some(var) = r.to_var(self.func.code()) {
                    self.hints.insert(var.id().index(), regs::RET);
                }
                self.func.stmt1(OpStmt1::SetLive, *r)
            }
            Some(r) => {
                self.error(*r, "call result must be a variable");
                self.func.void_expr()
            }
            None => self.func.void_expr(),
        };

        let mut children: SmallVec<[Node; 6]> = SmallVec::new();
        children.push(ftype);
        children.push(target);
        children.push(set);
        children.extend_from_slice(&args);
        let stmt = self.func.stmtn(OpStmtN::X86Call, &children);
        self.emit(stmt);
    }

    /// Lower `dst = t1 op t2 op ...` by accumulating into a register.
    fn accumulate_tuple(&mut self, dst: Node, src: Node, op: Op2) {
        let n = src.children(self.func.code());
        if n == 0 {
            return self.error(src, "empty tuple expression");
        }
        let x86 = OpStmt2::x86_for_op(op).expect("accumulable operator");
        let acc = if dst.ty() == Type::Var {
            dst
        } else {
            self.func.new_var(src.kind()).node()
        };
        let first = src.child(self.func.code(), 0);
        let first = self.to_var_mem_const(first);
        self.emit_mov(acc, first);
        for i in 1..n {
            let term = src.child(self.func.code(), i);
            let mut term = self.to_var_mem_const(term);
            term = self.legalize_imm(term);
            let stmt = self.func.stmt2(x86, acc, term);
            self.emit(stmt);
        }
        if acc != dst {
            let dst = self.lower_dst(dst);
            self.emit_mov(dst, acc);
        }
    }

    /// Emit a single mov; both operands are already in operand form and at
    /// most one of them is memory.
    fn emit_mov(&mut self, dst: Node, src: Node) {
        debug_assert!(!(dst.ty() == Type::Mem && src.ty() == Type::Mem));
        let stmt = self.func.stmt2(OpStmt2::X86Mov, dst, src);
        self.emit(stmt);
    }

    /// An assignment destination must be a variable or (x86) memory.
    fn lower_dst(&mut self, dst: Node) -> Node {
        match dst.ty() {
            Type::Var => dst,
            Type::Mem => self.legalize_mem(dst),
            _ => {
                self.error(dst, "assignment destination must be a variable or memory");
                Node::BAD
            }
        }
    }

    /// If `e` is already a variable, return it unchanged; otherwise copy
    /// its result into a fresh variable.
    fn to_var(&mut self, e: Node) -> Node {
        if e.ty() == Type::Var {
            return e;
        }
        let v = self.func.new_var(operand_kind(e));
        trace!("temporary {:?} for {e:?}", v);
        self.assign_to(v.node(), e);
        v.node()
    }

    /// Pass variables, constants and labels through; force anything else
    /// into a variable.
    fn to_var_const(&mut self, e: Node) -> Node {
        match e.ty() {
            Type::Var | Type::Const | Type::Label => e,
            _ => self.to_var(e),
        }
    }

    /// Pass variables, memory, constants and labels through; force anything
    /// else into a variable.
    fn to_var_mem_const(&mut self, e: Node) -> Node {
        match e.ty() {
            Type::Var | Type::Const | Type::Label => e,
            Type::Mem => self.legalize_mem(e),
            _ => self.to_var(e),
        }
    }

    /// Constants a two-operand instruction cannot take as an immediate
    /// (64-bit operand with a value outside the sign-extended 32-bit range)
    /// get staged through a register.
    fn legalize_imm(&mut self, e: Node) -> Node {
        if e.ty() != Type::Const {
            return e;
        }
        if e.kind().reg_bits() <= 32 {
            return e;
        }
        match e.to_value(self.func.code()) {
            Some(v) if i32::try_from(v.as_i64()).is_ok() => e,
            Some(_) => self.to_var(e),
            None => e,
        }
    }

    /// Rewrite a memory reference into the x86 flavor.
    fn legalize_mem(&mut self, mem: Node) -> Node {
        match mem.memtype() {
            Some(MemType::X86) => mem,
            Some(MemType::Generic) => {
                let kind = mem.kind();
                let addr = mem.child(self.func.code(), 0);
                if let Some(m) = self.mem_from_address(kind, addr) {
                    return m;
                }
                // Fallback: compute the address into a base register.
                let base = self.to_var(addr);
                match base.to_var(self.func.code()) {
                    Some(var) => self.func.x86_mem(kind, 0, Some(var), None, 1),
                    None => Node::BAD,
                }
            }
            _ => {
                self.error(mem, "memory flavor not supported by this target");
                Node::BAD
            }
        }
    }

    /// Try to express an additive expression as `disp + base + index*scale`.
    fn mem_from_address(&mut self, kind: Kind, addr: Node) -> Option<Node> {
        let parts = self.address_parts(addr)?;
        Some(self.func.x86_mem(kind, parts.disp, parts.base, parts.index, parts.scale))
    }

    fn address_parts(&mut self, e: Node) -> Option<AddrParts> {
        let code = self.func.code();
        let mut terms: SmallVec<[Node; 4]> = SmallVec::new();
        match e.ty() {
            Type::Var => terms.push(e),
            Type::Binary if Op2::from_u16(e.raw_op()) == Some(Op2::Add) => {
                terms.push(e.child(code, 0));
                terms.push(e.child(code, 1));
            }
            Type::Tuple if OpN::from_u16(e.raw_op()) == Some(OpN::Add) => {
                for i in 0..e.children(code) {
                    terms.push(e.child(code, i));
                }
            }
            _ => return None,
        }

        let mut parts = AddrParts {
            disp: 0,
            base: None,
            index: None,
            scale: 1,
        };
        for term in terms {
            let code = self.func.code();
            match term.ty() {
                Type::Const => {
                    let v = term.to_value(code)?;
                    let d = i32::try_from(v.as_i64()).ok()?;
                    parts.disp = parts.disp.checked_add(d)?;
                }
                Type::Var => {
                    let var = term.to_var(code)?;
                    if parts.base.is_none() {
                        parts.base = Some(var);
                    } else if parts.index.is_none() {
                        parts.index = Some(var);
                    } else {
                        return None;
                    }
                }
                Type::Binary => {
                    let (var, scale) = scaled_index(code, term)?;
                    if parts.index.is_some() {
                        return None;
                    }
                    parts.index = Some(var);
                    parts.scale = scale;
                }
                _ => return None,
            }
        }
        if parts.base.is_none() {
            match parts.index.take() {
                // An unscaled lone index serves as the base register.
                Some(var) if parts.scale == 1 => parts.base = Some(var),
                // A scaled index with no base has no SIB encoding here.
                Some(_) => return None,
                None => return None,
            }
        }
        Some(parts)
    }
}

/// Recognize `var * {1,2,4,8}` and `var << {0,1,2,3}` as a scaled index.
fn scaled_index(code: &crate::code::Code, e: Node) -> Option<(Var, u8)> {
    let op = Op2::from_u16(e.raw_op())?;
    let x = e.child(code, 0);
    let y = e.child(code, 1);
    let var = x.to_var(code)?;
    let c = y.to_value(code)?.as_i64();
    match op {
        Op2::Mul if matches!(c, 1 | 2 | 4 | 8) => Some((var, c as u8)),
        Op2::Shl if (0..=3).contains(&c) => Some((var, 1u8 << c)),
        _ => None,
    }
}

fn op2_of_opn(op: OpN) -> Option<Op2> {
    Some(match op {
        OpN::Add => Op2::Add,
        OpN::Mul => Op2::Mul,
        OpN::And => Op2::And,
        OpN::Or => Op2::Or,
        OpN::Xor => Op2::Xor,
        _ => return None,
    })
}

fn operand_kind(e: Node) -> Kind {
    match e.kind() {
        Kind::Void => Kind::Ptr,
        k => k,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::OpStmt0;

    fn lower(
        func: &mut Func,
        stmts: &[Node],
    ) -> (Vec<Node>, Vec<Error>, FxHashMap<u32, u8>) {
        let root = func.block(stmts);
        let mut out = Vec::new();
        let mut errors = Vec::new();
        let mut hints = FxHashMap::default();
        X64Lower::new(func, &mut out, &mut errors, &mut hints, Abi::SysV).run(root);
        (out, errors, hints)
    }

    #[test]
    fn mem_to_mem_assignment_uses_a_temporary() {
        let mut func = Func::new("t");
        let pa = func.new_var(Kind::Ptr);
        let pb = func.new_var(Kind::Ptr);
        let ma = func.mem(Kind::Int32, pa.node());
        let mb = func.mem(Kind::Int32, pb.node());
        let stmt = func.assign(OpStmt2::Assign, ma, mb);
        let (out, errors, _) = lower(&mut func, &[stmt]);
        assert!(errors.is_empty());
        assert_eq!(out.len(), 2);
        // mov tmp, [pb]; mov [pa], tmp
        assert_eq!(out[0].raw_op(), OpStmt2::X86Mov as u16);
        assert_eq!(out[0].child(func.code(), 0).ty(), Type::Var);
        assert_eq!(out[0].child(func.code(), 1).ty(), Type::Mem);
        assert_eq!(out[1].raw_op(), OpStmt2::X86Mov as u16);
        assert_eq!(out[1].child(func.code(), 0).ty(), Type::Mem);
        assert_eq!(
            out[1].child(func.code(), 1),
            out[0].child(func.code(), 0)
        );
    }

    #[test]
    fn in_place_add_needs_no_temporary() {
        let mut func = Func::new("t");
        let v = func.new_var(Kind::Int32);
        let one = func.int_const(Kind::Int32, 1);
        let sum = func.binary(Op2::Add, v.node(), one);
        let stmt = func.assign(OpStmt2::Assign, v.node(), sum);
        let (out, errors, _) = lower(&mut func, &[stmt]);
        assert!(errors.is_empty());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].raw_op(), OpStmt2::X86Add as u16);
        assert_eq!(out[0].child(func.code(), 0), v.node());
        assert_eq!(
            out[0].child(func.code(), 1).to_value(func.code()).unwrap().as_i64(),
            1
        );
    }

    #[test]
    fn general_binary_becomes_mov_plus_op() {
        let mut func = Func::new("t");
        let d = func.new_var(Kind::Int32);
        let a = func.new_var(Kind::Int32);
        let b = func.new_var(Kind::Int32);
        let sum = func.binary(Op2::Sub, a.node(), b.node());
        let stmt = func.assign(OpStmt2::Assign, d.node(), sum);
        let (out, errors, _) = lower(&mut func, &[stmt]);
        assert!(errors.is_empty());
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].raw_op(), OpStmt2::X86Mov as u16);
        assert_eq!(out[1].raw_op(), OpStmt2::X86Sub as u16);
    }

    #[test]
    fn addressable_addition_becomes_lea() {
        let mut func = Func::new("t");
        let d = func.new_var(Kind::Ptr);
        let base = func.new_var(Kind::Ptr);
        let index = func.new_var(Kind::Ptr);
        let four = func.int_const(Kind::Ptr, 4);
        let eight = func.int_const(Kind::Ptr, 8);
        let scaled = func.binary(Op2::Mul, index.node(), eight);
        let addr = func.tuple(Kind::Ptr, OpN::Add, &[base.node(), scaled, four]);
        let stmt = func.assign(OpStmt2::Assign, d.node(), addr);
        let (out, errors, _) = lower(&mut func, &[stmt]);
        assert!(errors.is_empty());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].raw_op(), OpStmt2::X86Lea as u16);
        let mem = out[0].child(func.code(), 1);
        assert_eq!(mem.memtype(), Some(MemType::X86));
        assert_eq!(mem.children(func.code()), 4);
    }

    #[test]
    fn cmp_of_two_mems_forces_a_register() {
        let mut func = Func::new("t");
        let pa = func.new_var(Kind::Ptr);
        let pb = func.new_var(Kind::Ptr);
        let ma = func.mem(Kind::Int32, pa.node());
        let mb = func.mem(Kind::Int32, pb.node());
        let stmt = func.stmt2(OpStmt2::AsmCmp, ma, mb);
        let (out, errors, _) = lower(&mut func, &[stmt]);
        assert!(errors.is_empty());
        // mov tmp, [pb]; cmp [pa], tmp
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].raw_op(), OpStmt2::X86Mov as u16);
        assert_eq!(out[1].raw_op(), OpStmt2::X86Cmp as u16);
        assert_eq!(out[1].child(func.code(), 0).ty(), Type::Mem);
        assert_eq!(out[1].child(func.code(), 1).ty(), Type::Var);
    }

    #[test]
    fn call_results_and_args_get_hints() {
        let mut func = Func::new("t");
        let r = func.new_var(Kind::Int32);
        let a = func.new_var(Kind::Int32);
        let b = func.new_var(Kind::Int32);
        let ft = func.functype(&[Kind::Int32], &[Kind::Int32, Kind::Int32]);
        let target = func.new_label();
        let call = func.call(ft, target.node(), &[a.node(), b.node()]);
        let stmt = func.assign(OpStmt2::Assign, r.node(), call);
        let (out, errors, hints) = lower(&mut func, &[stmt]);
        assert!(errors.is_empty());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].raw_op(), OpStmtN::X86Call as u16);
        assert_eq!(hints.get(&r.id().index()), Some(&regs::RET));
        assert_eq!(hints.get(&a.id().index()), Some(&regs::params(Abi::SysV)[0]));
        assert_eq!(hints.get(&b.id().index()), Some(&regs::params(Abi::SysV)[1]));
        // The set-live pseudo marks the result.
        let set = out[0].child(func.code(), 2);
        assert_eq!(set.raw_op(), OpStmt1::SetLive as u16);
    }

    #[test]
    fn comparison_value_is_materialized_with_branches() {
        let mut func = Func::new("t");
        let d = func.new_var(Kind::Bool);
        let a = func.new_var(Kind::Int32);
        let b = func.new_var(Kind::Int32);
        let cmp = func.binary(Op2::Lt, a.node(), b.node());
        let stmt = func.assign(OpStmt2::Assign, d.node(), cmp);
        let (out, errors, _) = lower(&mut func, &[stmt]);
        assert!(errors.is_empty());
        // cmp, jl, mov false, jmp, label, mov true, label
        assert_eq!(out[0].raw_op(), OpStmt2::X86Cmp as u16);
        assert_eq!(out[1].raw_op(), OpStmt1::X86Jl as u16);
        assert_eq!(out.len(), 7);
    }

    #[test]
    fn portable_jumps_map_one_to_one() {
        let mut func = Func::new("t");
        let l = func.new_label();
        let stmts = [
            func.stmt1(OpStmt1::Goto, l.node()),
            func.stmt1(OpStmt1::AsmJne, l.node()),
        ];
        let (out, errors, _) = lower(&mut func, &stmts);
        assert!(errors.is_empty());
        assert_eq!(out[0].raw_op(), OpStmt1::X86Jmp as u16);
        assert_eq!(out[1].raw_op(), OpStmt1::X86Jne as u16);
    }

    #[test]
    fn unexpected_statement_is_diagnosed_and_skipped() {
        let mut func = Func::new("t");
        let brk = Node::stmt0(OpStmt0::Break);
        let (out, errors, _) = lower(&mut func, &[brk]);
        assert!(out.is_empty());
        assert_eq!(errors.len(), 1);
    }
}
