//! Portable lowering: flattens structured statements into the linear
//! label/compare/jump/assign form the target backends consume.
//!
//! Input is an (already optimized) statement tree; output is a flat list
//! where the only control flow left is labels, `Goto`, the portable
//! conditional jumps preceded by `AsmCmp`, calls and returns. `Break` and
//! `Continue` resolve against stacks of enclosing loop labels.

use crate::ir::{
    Func, Kind, Label, Node, Op2, OpN, OpStmt0, OpStmt1, OpStmt2, OpStmtN, Type,
};
use crate::result::Error;
use log::trace;

/// Map a comparison to the portable conditional-jump mnemonic for operands
/// of `kind`. Signed kinds take the signed condition codes; unsigned and
/// floating-point kinds take the unsigned ones.
pub(crate) fn cc_jump(op: Op2, kind: Kind) -> OpStmt1 {
    let signed = kind.is_signed();
    match op {
        Op2::Lt => {
            if signed {
                OpStmt1::AsmJl
            } else {
                OpStmt1::AsmJb
            }
        }
        Op2::Le => {
            if signed {
                OpStmt1::AsmJle
            } else {
                OpStmt1::AsmJbe
            }
        }
        Op2::Gt => {
            if signed {
                OpStmt1::AsmJg
            } else {
                OpStmt1::AsmJa
            }
        }
        Op2::Ge => {
            if signed {
                OpStmt1::AsmJge
            } else {
                OpStmt1::AsmJae
            }
        }
        Op2::Eq => OpStmt1::AsmJe,
        Op2::Ne => OpStmt1::AsmJne,
        _ => OpStmt1::Bad,
    }
}

/// True for the shared `Void` constant used to mark absent optional
/// children.
fn is_void(node: Node) -> bool {
    node.ty() == Type::Const && node.kind() == Kind::Void
}

pub(crate) struct StmtLower<'a> {
    func: &'a mut Func,
    out: &'a mut Vec<Node>,
    errors: &'a mut Vec<Error>,
    breaks: Vec<Label>,
    continues: Vec<Label>,
}

impl<'a> StmtLower<'a> {
    pub(crate) fn new(
        func: &'a mut Func,
        out: &'a mut Vec<Node>,
        errors: &'a mut Vec<Error>,
    ) -> Self {
        StmtLower {
            func,
            out,
            errors,
            breaks: Vec::new(),
            continues: Vec::new(),
        }
    }

    pub(crate) fn run(&mut self, root: Node) {
        self.stmt(root);
    }

    fn emit(&mut self, node: Node) {
        if node.is_valid() {
            self.out.push(node);
        }
    }

    fn emit_label(&mut self, label: Label) {
        self.out.push(label.node());
    }

    fn error(&mut self, node: Node, msg: &'static str) {
        self.errors.push(Error::new(node, msg));
    }

    fn stmt(&mut self, node: Node) {
        if !self.func.is_good() {
            return;
        }
        match node.ty() {
            Type::Stmt0 => match OpStmt0::from_u16(node.raw_op()) {
                Some(OpStmt0::Break) => match self.breaks.last().copied() {
                    Some(label) => {
                        let goto = self.func.goto_(label);
                        self.emit(goto);
                    }
                    None => self.error(node, "break outside loop or switch"),
                },
                Some(OpStmt0::Continue) => match self.continues.last().copied() {
                    Some(label) => {
                        let goto = self.func.goto_(label);
                        self.emit(goto);
                    }
                    None => self.error(node, "continue outside loop"),
                },
                Some(OpStmt0::Fallthrough) => {
                    self.error(node, "fallthrough outside switch case")
                }
                _ => self.error(node, "malformed statement"),
            },
            Type::Stmt1 => self.emit(node),
            Type::Stmt2 => {
                let op = OpStmt2::from_u16(node.raw_op());
                match op {
                    Some(op) if op.is_assign() => self.emit(node),
                    Some(OpStmt2::JumpIf) => {
                        let to = node.child(self.func.code(), 0);
                        let test = node.child(self.func.code(), 1);
                        self.cond_jump(test, to, true);
                    }
                    Some(OpStmt2::Case) | Some(OpStmt2::Default) => {
                        self.error(node, "case outside switch")
                    }
                    _ => self.error(node, "statement not lowerable"),
                }
            }
            Type::Stmt3 => self.if_stmt(node),
            Type::Stmt4 => self.for_stmt(node),
            Type::StmtN => match OpStmtN::from_u16(node.raw_op()) {
                Some(OpStmtN::Block) => {
                    for i in 0..node.children(self.func.code()) {
                        let child = node.child(self.func.code(), i);
                        self.stmt(child);
                    }
                }
                Some(OpStmtN::Return) | Some(OpStmtN::AssignCall) => self.emit(node),
                Some(OpStmtN::Cond) => self.cond_stmt(node),
                Some(OpStmtN::Switch) => self.switch_stmt(node),
                _ => self.error(node, "statement not lowerable"),
            },
            Type::Label => self.emit(node),
            // A bare expression: keep calls for their effects, drop the
            // rest.
            Type::Tuple if node.raw_op() == OpN::Call as u16 => {
                let call = self.func.stmtn(OpStmtN::AssignCall, &[node]);
                self.emit(call);
            }
            _ => {
                trace!("dropping pure expression statement {node:?}");
            }
        }
    }

    /// Emit a jump to `to` taken when `test` equals `jump_if_true`.
    fn cond_jump(&mut self, test: Node, to: Node, jump_if_true: bool) {
        // A constant test becomes an unconditional jump or nothing at all.
        if test.ty() == Type::Const && test.kind() == Kind::Bool {
            if let Some(v) = test.to_value(self.func.code()) {
                if v.as_bool() == jump_if_true {
                    let goto = self.func.stmt1(OpStmt1::Goto, to);
                    self.emit(goto);
                }
                return;
            }
        }
        // A comparison maps to compare + the matching conditional jump.
        if test.ty() == Type::Binary {
            if let Some(op) = Op2::from_u16(test.raw_op()) {
                if op.is_comparison() {
                    let op = if jump_if_true { op } else { op.not_comparison() };
                    let x = test.child(self.func.code(), 0);
                    let y = test.child(self.func.code(), 1);
                    let cmp = self.func.stmt2(OpStmt2::AsmCmp, x, y);
                    self.emit(cmp);
                    let jump = self.func.stmt1(cc_jump(op, x.kind()), to);
                    self.emit(jump);
                    return;
                }
            }
        }
        // Any other boolean value: compare against zero.
        let zero = self.func.bool_const(false);
        let cmp = self.func.stmt2(OpStmt2::AsmCmp, test, zero);
        self.emit(cmp);
        let op = if jump_if_true {
            OpStmt1::AsmJne
        } else {
            OpStmt1::AsmJe
        };
        let jump = self.func.stmt1(op, to);
        self.emit(jump);
    }

    fn if_stmt(&mut self, node: Node) {
        let test = node.child(self.func.code(), 0);
        let then = node.child(self.func.code(), 1);
        let els = node.child(self.func.code(), 2);

        let else_label = self.func.new_label();
        self.cond_jump(test, else_label.node(), false);
        self.stmt(then);
        if is_void(els) {
            self.emit_label(else_label);
        } else {
            let end = self.func.new_label();
            let goto = self.func.goto_(end);
            self.emit(goto);
            self.emit_label(else_label);
            self.stmt(els);
            self.emit_label(end);
        }
    }

    fn for_stmt(&mut self, node: Node) {
        let init = node.child(self.func.code(), 0);
        let test = node.child(self.func.code(), 1);
        let post = node.child(self.func.code(), 2);
        let body = node.child(self.func.code(), 3);

        if !is_void(init) {
            self.stmt(init);
        }
        let top = self.func.new_label();
        let cont = self.func.new_label();
        let brk = self.func.new_label();

        self.emit_label(top);
        if !is_void(test) {
            // Child slot 1 is the only child whose value is consumed.
            self.cond_jump(test, brk.node(), false);
        }
        self.breaks.push(brk);
        self.continues.push(cont);
        self.stmt(body);
        self.continues.pop();
        self.breaks.pop();

        self.emit_label(cont);
        if !is_void(post) {
            self.stmt(post);
        }
        let goto = self.func.goto_(top);
        self.emit(goto);
        self.emit_label(brk);
    }

    fn cond_stmt(&mut self, node: Node) {
        let n = node.children(self.func.code());
        let end = self.func.new_label();
        let mut i = 0;
        while i + 1 < n {
            let test = node.child(self.func.code(), i);
            let body = node.child(self.func.code(), i + 1);
            let next = self.func.new_label();
            self.cond_jump(test, next.node(), false);
            self.stmt(body);
            let goto = self.func.goto_(end);
            self.emit(goto);
            self.emit_label(next);
            i += 2;
        }
        if i < n {
            let default = node.child(self.func.code(), i);
            self.stmt(default);
        }
        self.emit_label(end);
    }

    fn switch_stmt(&mut self, node: Node) {
        let n = node.children(self.func.code());
        if n == 0 {
            self.error(node, "switch without scrutinee");
            return;
        }
        let expr = node.child(self.func.code(), 0);
        let scrutinee = match expr.ty() {
            Type::Var | Type::Const => expr,
            _ => {
                let v = self.func.new_var(expr.kind());
                let assign = self.func.assign(OpStmt2::Assign, v.node(), expr);
                self.emit(assign);
                v.node()
            }
        };

        let brk = self.func.new_label();
        let mut body_labels = Vec::with_capacity(n as usize - 1);
        let mut default_arm = None;
        for i in 1..n {
            let arm = node.child(self.func.code(), i);
            body_labels.push(self.func.new_label());
            match OpStmt2::from_u16(arm.raw_op()) {
                Some(OpStmt2::Case) => {
                    let case_expr = arm.child(self.func.code(), 0);
                    let cmp = self.func.stmt2(OpStmt2::AsmCmp, scrutinee, case_expr);
                    self.emit(cmp);
                    let jump = self
                        .func
                        .stmt1(OpStmt1::AsmJe, body_labels[i as usize - 1].node());
                    self.emit(jump);
                }
                Some(OpStmt2::Default) => default_arm = Some(i),
                _ => self.error(arm, "switch arm is not a case"),
            }
        }
        let miss = match default_arm {
            Some(i) => body_labels[i as usize - 1],
            None => brk,
        };
        let goto = self.func.goto_(miss);
        self.emit(goto);

        self.breaks.push(brk);
        for i in 1..n {
            let arm = node.child(self.func.code(), i);
            self.emit_label(body_labels[i as usize - 1]);
            let body = arm.child(self.func.code(), 1);
            let falls = self.case_body(body);
            // Implicit break unless the body ends in a fallthrough marker
            // or this is the last arm.
            if !falls && i + 1 < n {
                let goto = self.func.goto_(brk);
                self.emit(goto);
            }
        }
        self.breaks.pop();
        self.emit_label(brk);
    }

    /// Lower a case body; returns true if it ends with an explicit
    /// fallthrough into the next case body.
    fn case_body(&mut self, body: Node) -> bool {
        let is_fallthrough = |n: Node| {
            n.ty() == Type::Stmt0 && n.raw_op() == OpStmt0::Fallthrough as u16
        };
        if is_fallthrough(body) {
            return true;
        }
        if body.ty() == Type::StmtN
            && OpStmtN::from_u16(body.raw_op()) == Some(OpStmtN::Block)
        {
            let n = body.children(self.func.code());
            let falls = n > 0 && is_fallthrough(body.child(self.func.code(), n - 1));
            let limit = if falls { n - 1 } else { n };
            for i in 0..limit {
                let child = body.child(self.func.code(), i);
                self.stmt(child);
            }
            return falls;
        }
        self.stmt(body);
        false
    }
}
