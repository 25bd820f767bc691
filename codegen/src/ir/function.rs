//! The function builder.
//!
//! A [`Func`] owns the code arena its IR lives in, mints variables and
//! labels, and provides a constructor per node form. Construction follows
//! two paths: small leaves (valueless statements, in-range constants and
//! variables) become direct handles with no arena footprint; everything
//! else is appended as an indirect record. On an allocation failure
//! mid-construction the arena is rolled back to the node's starting offset
//! and [`Node::BAD`] is returned; the poisoned arena makes every later
//! stage a no-op, and the condition surfaces as an out-of-memory error at
//! the next stage boundary.

use crate::code::{Code, Offset};
use crate::ir::constant::Const;
use crate::ir::{
    Header, Kind, Label, MemType, Node, Op1, Op2, OpN, OpStmt1, OpStmt2, OpStmtN, Type, Value,
    Var, VarId,
};
use smallvec::SmallVec;

/// Compilation targets a function can hold lowered forms for.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum Arch {
    /// The portable, architecture-independent lowered form.
    Noarch = 0,
    /// x86_64.
    X64 = 1,
    /// arm64; reserved, no backend yet.
    Arm64 = 2,
}

/// Where a variable ended up after register allocation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VarLoc {
    /// Not allocated (allocation never ran, or the variable is dead).
    Unassigned,
    /// A hardware register, by encoding.
    Reg(u8),
    /// Spilled to the numbered stack-frame slot.
    Stack(u32),
}

/// A function under construction and compilation.
pub struct Func {
    name: String,
    code: Code,
    num_vars: u32,
    labels: Vec<Offset>,
    body: Option<Node>,
    compiled: [Option<Node>; 3],
    locs: Vec<VarLoc>,
    void_expr: Option<Node>,
}

impl Func {
    /// Create an empty function.
    pub fn new(name: &str) -> Func {
        Func {
            name: name.to_string(),
            code: Code::new(),
            num_vars: 0,
            labels: Vec::new(),
            body: None,
            compiled: [None; 3],
            locs: Vec::new(),
            void_expr: None,
        }
    }

    /// The function's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The code arena backing this function's IR.
    pub fn code(&self) -> &Code {
        &self.code
    }

    /// False once the arena is poisoned by an allocation failure.
    pub fn is_good(&self) -> bool {
        self.code.is_good()
    }

    /// Number of variables minted so far.
    pub fn num_vars(&self) -> u32 {
        self.num_vars
    }

    /// Number of labels minted so far.
    pub fn num_labels(&self) -> usize {
        self.labels.len()
    }

    /// Mint a fresh variable of `kind`.
    pub fn new_var(&mut self, kind: Kind) -> Var {
        let id = VarId::new(self.num_vars);
        self.num_vars += 1;
        Var::new(kind, id)
    }

    /// The node for `var`, materializing an indirect record for the rare
    /// wide-id variables.
    pub fn var_node(&mut self, var: Var) -> Node {
        if var.is_direct() {
            return var.node();
        }
        let header = Header::new(Type::Var, var.kind(), 0);
        let off = self.code.len();
        if !self.code.append(header.raw()) || !self.code.append(var.id().index()) {
            self.code.truncate(off);
            return Node::BAD;
        }
        Node::new_indirect(header, off)
    }

    /// Mint a fresh label. Its address payload starts at zero (unresolved).
    pub fn new_label(&mut self) -> Label {
        let index = self.labels.len() as u16;
        let header = Label::header(index);
        let off = self.code.len();
        if !self.code.append(header.raw()) || !self.code.append_u64(0) {
            self.code.truncate(off);
        }
        self.labels.push(off);
        Label::from_node(Node::new_indirect(header, off)).expect("label node")
    }

    /// The node of the label with the given index.
    pub fn label_node(&self, index: u16) -> Option<Node> {
        let off = *self.labels.get(index as usize)?;
        Some(Node::at(&self.code, off))
    }

    /// Patch the absolute address payload of a label.
    pub fn resolve_label(&mut self, index: u16, address: u64) {
        if let Some(&off) = self.labels.get(index as usize) {
            self.code.patch(off + 4, address as u32);
            self.code.patch(off + 8, (address >> 32) as u32);
        }
    }

    /// Build a constant node; small integers stay inline.
    pub fn const_value(&mut self, value: Value) -> Node {
        if Const::is_direct(value) {
            return Const::direct_node(value);
        }
        let header = Const::header(value.kind());
        let off = self.code.len();
        let ok = self.code.append(header.raw())
            && if value.kind().bits() > 32 {
                self.code.append_u64(value.bits())
            } else {
                self.code.append(value.bits() as u32)
            };
        if !ok {
            self.code.truncate(off);
            return Node::BAD;
        }
        Node::new_indirect(header, off)
    }

    /// A boolean constant.
    pub fn bool_const(&mut self, v: bool) -> Node {
        self.const_value(Value::bool_(v))
    }

    /// An integer constant of `kind`.
    pub fn int_const(&mut self, kind: Kind, v: i64) -> Node {
        self.const_value(Value::int(kind, v))
    }

    /// The constant zero of `kind`.
    pub fn zero(&mut self, kind: Kind) -> Node {
        self.const_value(Value::from_bits(kind, 0))
    }

    /// The constant one of `kind`.
    pub fn one(&mut self, kind: Kind) -> Node {
        self.const_value(Value::one(kind))
    }

    /// The shared `Void` expression used for absent optional children.
    pub fn void_expr(&mut self) -> Node {
        if let Some(n) = self.void_expr {
            return n;
        }
        let n = self.const_value(Value::from_bits(Kind::Void, 0));
        self.void_expr = Some(n);
        n
    }

    /// Build a unary expression. `Not` yields `Bool`; other operators keep
    /// the child's kind. Conversions go through [`Func::cast`] and
    /// [`Func::bitcast`] instead.
    pub fn unary(&mut self, op: Op1, x: Node) -> Node {
        debug_assert!(!matches!(op, Op1::Cast | Op1::Bitcast));
        let kind = if op == Op1::Not { Kind::Bool } else { x.kind() };
        self.push_node(Header::new(Type::Unary, kind, op as u16), &[x])
    }

    /// Build a conversion to `kind`.
    pub fn cast(&mut self, kind: Kind, x: Node) -> Node {
        self.push_node(Header::new(Type::Unary, kind, Op1::Cast as u16), &[x])
    }

    /// Build a bit-pattern reinterpretation as `kind`.
    pub fn bitcast(&mut self, kind: Kind, x: Node) -> Node {
        self.push_node(Header::new(Type::Unary, kind, Op1::Bitcast as u16), &[x])
    }

    /// Build a binary expression. Comparisons yield `Bool`; arithmetic keeps
    /// the operands' kind.
    pub fn binary(&mut self, op: Op2, x: Node, y: Node) -> Node {
        let kind = if op.is_comparison() || op == Op2::Land || op == Op2::Lor {
            Kind::Bool
        } else {
            x.kind()
        };
        self.push_node(Header::new(Type::Binary, kind, op as u16), &[x, y])
    }

    /// Build a variadic expression.
    pub fn tuple(&mut self, kind: Kind, op: OpN, children: &[Node]) -> Node {
        self.push_node(Header::new(Type::Tuple, kind, op as u16), children)
    }

    /// Build a portable memory dereference of `kind` at `address`.
    pub fn mem(&mut self, kind: Kind, address: Node) -> Node {
        self.push_node(
            Header::new(Type::Mem, kind, MemType::Generic as u16),
            &[address],
        )
    }

    /// Build an x86 memory reference: `disp + base + index * scale`.
    /// Absent registers are `None`; `scale` must be 1, 2, 4 or 8.
    pub fn x86_mem(
        &mut self,
        kind: Kind,
        disp: i32,
        base: Option<Var>,
        index: Option<Var>,
        scale: u8,
    ) -> Node {
        let disp = self.int_const(Kind::Int32, disp as i64);
        let mut children: SmallVec<[Node; 4]> = SmallVec::new();
        children.push(disp);
        match (base, index) {
            (b, None) => {
                if let Some(b) = b {
                    children.push(b.node());
                }
            }
            (b, Some(i)) => {
                children.push(b.map(|b| b.node()).unwrap_or(Node::BAD));
                children.push(i.node());
                let scale = self.int_const(Kind::Uint8, scale as i64);
                children.push(scale);
            }
        }
        self.push_node(Header::new(Type::Mem, kind, MemType::X86 as u16), &children)
    }

    /// Build a function-type node from result and parameter kinds.
    pub fn functype(&mut self, results: &[Kind], params: &[Kind]) -> Node {
        let mut children: SmallVec<[Node; 8]> = SmallVec::new();
        for &k in results.iter().chain(params) {
            children.push(self.const_value(Value::uint(Kind::Uint8, k as u64)));
        }
        self.push_node(
            Header::new(Type::FuncType, Kind::Void, results.len() as u16),
            &children,
        )
    }

    /// Intern a name (of a callee, global, or the function itself).
    pub fn name_node(&mut self, s: &str) -> Node {
        let bytes = s.as_bytes();
        debug_assert!(bytes.len() < u16::MAX as usize);
        let header = Header::new(Type::Name, Kind::Void, bytes.len() as u16);
        let off = self.code.len();
        if !self.code.append(header.raw()) {
            return Node::BAD;
        }
        for chunk in bytes.chunks(4) {
            let mut item = [0u8; 4];
            item[..chunk.len()].copy_from_slice(chunk);
            if !self.code.append(u32::from_le_bytes(item)) {
                self.code.truncate(off);
                return Node::BAD;
            }
        }
        Node::new_indirect(header, off)
    }

    /// Build a call expression: `(functype, target, args...)`. Its kind is
    /// the callee's first result kind.
    pub fn call(&mut self, ftype: Node, target: Node, args: &[Node]) -> Node {
        let kind = crate::ir::FuncTypeData::from_node(&self.code, ftype)
            .and_then(|d| d.results.first().copied())
            .unwrap_or(Kind::Void);
        let mut children: SmallVec<[Node; 6]> = SmallVec::new();
        children.push(ftype);
        children.push(target);
        children.extend_from_slice(args);
        self.push_node(Header::new(Type::Tuple, kind, OpN::Call as u16), &children)
    }

    /// Build a one-child statement.
    pub fn stmt1(&mut self, op: OpStmt1, child: Node) -> Node {
        self.push_node(Header::new(Type::Stmt1, Kind::Void, op as u16), &[child])
    }

    /// Unconditional jump.
    pub fn goto_(&mut self, to: Label) -> Node {
        self.stmt1(OpStmt1::Goto, to.node())
    }

    /// Build a two-child statement.
    pub fn stmt2(&mut self, op: OpStmt2, child0: Node, child1: Node) -> Node {
        self.push_node(
            Header::new(Type::Stmt2, Kind::Void, op as u16),
            &[child0, child1],
        )
    }

    /// Assignment statement: plain or op-assign.
    pub fn assign(&mut self, op: OpStmt2, dst: Node, src: Node) -> Node {
        debug_assert!(op.is_assign());
        self.stmt2(op, dst, src)
    }

    /// Conditional jump to `to` when `test` holds.
    pub fn jump_if(&mut self, to: Label, test: Node) -> Node {
        self.stmt2(OpStmt2::JumpIf, to.node(), test)
    }

    /// A `case expr: body` switch arm.
    pub fn case_(&mut self, expr: Node, body: Node) -> Node {
        self.stmt2(OpStmt2::Case, expr, body)
    }

    /// The `default: body` switch arm.
    pub fn default_(&mut self, body: Node) -> Node {
        let expr = self.void_expr();
        self.stmt2(OpStmt2::Default, expr, body)
    }

    /// An `if` statement; pass `None` for a missing else branch.
    pub fn if_stmt(&mut self, test: Node, then: Node, els: Option<Node>) -> Node {
        let els = els.unwrap_or_else(|| self.void_expr());
        self.push_node(Header::new(Type::Stmt3, Kind::Void, 1), &[test, then, els])
    }

    /// A `for` statement; pass the shared void expression for absent
    /// init/test/post parts. Child slot 1 is the test, and only its value
    /// is consumed.
    pub fn for_stmt(&mut self, init: Node, test: Node, post: Node, body: Node) -> Node {
        self.push_node(
            Header::new(Type::Stmt4, Kind::Void, 1),
            &[init, test, post, body],
        )
    }

    /// Build a variadic statement.
    pub fn stmtn(&mut self, op: OpStmtN, children: &[Node]) -> Node {
        self.push_node(Header::new(Type::StmtN, Kind::Void, op as u16), children)
    }

    /// A statement block, executed in order.
    pub fn block(&mut self, children: &[Node]) -> Node {
        self.stmtn(OpStmtN::Block, children)
    }

    /// A return statement.
    pub fn return_(&mut self, values: &[Node]) -> Node {
        self.stmtn(OpStmtN::Return, values)
    }

    /// A switch: `(expr, case..., [default])`.
    pub fn switch(&mut self, expr: Node, arms: &[Node]) -> Node {
        let mut children: SmallVec<[Node; 6]> = SmallVec::new();
        children.push(expr);
        children.extend_from_slice(arms);
        self.stmtn(OpStmtN::Switch, &children)
    }

    /// An if/else-if chain: `(test1, body1, test2, body2, ..., [default])`.
    pub fn cond(&mut self, children: &[Node]) -> Node {
        self.stmtn(OpStmtN::Cond, children)
    }

    /// Assign a call's results: `(results..., call)`.
    pub fn assign_call(&mut self, results: &[Node], call: Node) -> Node {
        let mut children: SmallVec<[Node; 4]> = SmallVec::new();
        children.extend_from_slice(results);
        children.push(call);
        self.stmtn(OpStmtN::AssignCall, &children)
    }

    /// Set the statement tree compilation starts from.
    pub fn set_body(&mut self, body: Node) {
        self.body = Some(body);
    }

    /// The function body, if one was set.
    pub fn body(&self) -> Option<Node> {
        self.body
    }

    /// The compiled root for `arch`, if that stage has run.
    pub fn compiled(&self, arch: Arch) -> Option<Node> {
        self.compiled[arch as usize]
    }

    /// Store the compiled root for `arch`.
    pub fn set_compiled(&mut self, arch: Arch, node: Node) {
        self.compiled[arch as usize] = Some(node);
    }

    /// Record the register-allocation result.
    pub fn set_locations(&mut self, locs: Vec<VarLoc>) {
        self.locs = locs;
    }

    /// Where a variable lives after allocation.
    pub fn location(&self, id: VarId) -> VarLoc {
        self.locs
            .get(id.index() as usize)
            .copied()
            .unwrap_or(VarLoc::Unassigned)
    }

    /// The full register-allocation result, indexed by variable id. Empty
    /// until allocation has run.
    pub fn locations(&self) -> &[VarLoc] {
        &self.locs
    }

    /// Append an indirect node: header, child count for variadic types,
    /// then the tagged child items. Children always precede their parent in
    /// the arena, so the stored offsets point strictly backward.
    pub(crate) fn push_node(&mut self, header: Header, children: &[Node]) -> Node {
        let off = self.code.len();
        if !self.code.append(header.raw()) {
            return Node::BAD;
        }
        if header.ty().is_list() && !self.code.append(children.len() as u32) {
            self.code.truncate(off);
            return Node::BAD;
        }
        for child in children {
            if !self.code.append(child.child_item(off)) {
                self.code.truncate(off);
                return Node::BAD;
            }
        }
        Node::new_indirect(header, off)
    }
}

impl core::fmt::Debug for Func {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "Func({:?}, vars={}, labels={}, {:?})",
            self.name,
            self.num_vars,
            self.labels.len(),
            self.code
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mints_vars_and_labels_monotonically() {
        let mut func = Func::new("f");
        let a = func.new_var(Kind::Int32);
        let b = func.new_var(Kind::Int64);
        assert_eq!(a.id().index(), 0);
        assert_eq!(b.id().index(), 1);
        let l0 = func.new_label();
        let l1 = func.new_label();
        assert_eq!(l0.index(), 0);
        assert_eq!(l1.index(), 1);
        assert_eq!(func.num_labels(), 2);
    }

    #[test]
    fn label_address_patching() {
        let mut func = Func::new("f");
        let l = func.new_label();
        assert_eq!(l.address(func.code()), 0);
        func.resolve_label(l.index(), 0x1234_5678_9abc_def0);
        assert_eq!(l.address(func.code()), 0x1234_5678_9abc_def0);
    }

    #[test]
    fn binary_kind_rules() {
        let mut func = Func::new("f");
        let x = func.new_var(Kind::Int32);
        let y = func.new_var(Kind::Int32);
        let sum = func.binary(Op2::Add, x.node(), y.node());
        assert_eq!(sum.kind(), Kind::Int32);
        let cmp = func.binary(Op2::Lt, x.node(), y.node());
        assert_eq!(cmp.kind(), Kind::Bool);
    }

    #[test]
    fn list_nodes_store_child_counts() {
        let mut func = Func::new("f");
        let x = func.new_var(Kind::Int32);
        let one = func.int_const(Kind::Int32, 1);
        let asg = func.assign(OpStmt2::Assign, x.node(), one);
        let blk = func.block(&[asg, asg, asg]);
        assert_eq!(blk.children(func.code()), 3);
        assert_eq!(blk.child(func.code(), 2), asg);
    }

    #[test]
    fn name_round_trip() {
        let mut func = Func::new("f");
        let n = func.name_node("memcpy");
        assert_eq!(
            crate::ir::functype::name_to_string(func.code(), n).unwrap(),
            "memcpy"
        );
    }

    #[test]
    fn functype_round_trip() {
        let mut func = Func::new("f");
        let ft = func.functype(&[Kind::Int64], &[Kind::Int32, Kind::Ptr]);
        let data = crate::ir::FuncTypeData::from_node(func.code(), ft).unwrap();
        assert_eq!(data.results, vec![Kind::Int64]);
        assert_eq!(data.params, vec![Kind::Int32, Kind::Ptr]);
    }

    #[test]
    fn call_kind_is_first_result() {
        let mut func = Func::new("f");
        let ft = func.functype(&[Kind::Int32], &[]);
        let target = func.new_label();
        let call = func.call(ft, target.node(), &[]);
        assert_eq!(call.kind(), Kind::Int32);
    }
}
