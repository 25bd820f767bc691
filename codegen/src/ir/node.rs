//! Node handles and the tagged child-access protocol.
//!
//! A [`Node`] is a small copyable handle: a cached [`Header`] plus either the
//! byte offset of an indirect record in the arena or the inline ("direct")
//! encoding of a small leaf. Direct encodings use the two low bits of a child
//! item as a tag:
//!
//! - items `<= 3` are valueless statements ([`OpStmt0`]),
//! - `..1` is a constant: 24-bit immediate in bits 1..25, kind in bits 25..32,
//! - `.10` is a variable: kind in bits 2..9, 23-bit id in bits 9..32,
//! - `.00` is a relative backward offset to an indirect node.
//!
//! Indirect children always live at strictly smaller offsets than their
//! parent, so the arena is a DAG whose topological order is append order.

use crate::code::{Code, Offset};
use crate::ir::op::FALLTHROUGH_ITEM;
use crate::ir::{Header, Kind, MemType, OpStmt0, Type, Value, Var, VarId};
use core::fmt;

/// A value in the IR: either a direct leaf or a reference to an indirect
/// record in the code arena.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Node {
    header: Header,
    off_or_dir: u32,
    direct: bool,
}

impl Node {
    /// The invalid node; also what builders return when the arena is
    /// poisoned.
    pub const BAD: Node = Node::stmt0(OpStmt0::Bad);

    /// Construct a valueless statement leaf.
    pub const fn stmt0(op: OpStmt0) -> Node {
        Node {
            header: Header::new(Type::Stmt0, Kind::Void, op as u16),
            off_or_dir: op as u32,
            direct: true,
        }
    }

    pub(crate) fn new_direct(header: Header, item: u32) -> Node {
        Node {
            header,
            off_or_dir: item,
            direct: true,
        }
    }

    pub(crate) fn new_indirect(header: Header, offset: Offset) -> Node {
        Node {
            header,
            off_or_dir: offset,
            direct: false,
        }
    }

    /// Rebuild a handle for the indirect node starting at `offset`.
    pub fn at(code: &Code, offset: Offset) -> Node {
        Node::new_indirect(Header::from_raw(code.at(offset)), offset)
    }

    /// The node type.
    #[inline]
    pub fn ty(&self) -> Type {
        self.header.ty()
    }

    /// The node kind.
    #[inline]
    pub fn kind(&self) -> Kind {
        self.header.kind()
    }

    /// The raw operator discriminant; interpret it according to [`Self::ty`].
    #[inline]
    pub fn raw_op(&self) -> u16 {
        self.header.op()
    }

    /// The node header.
    #[inline]
    pub fn header(&self) -> Header {
        self.header
    }

    /// False only for the `Bad` statement leaf, which doubles as the
    /// out-of-memory sentinel returned by builders.
    #[inline]
    pub fn is_valid(&self) -> bool {
        !(self.ty() == Type::Stmt0 && self.raw_op() == OpStmt0::Bad as u16)
    }

    /// True if this handle encodes its leaf inline rather than pointing at
    /// an arena record.
    #[inline]
    pub fn is_direct(&self) -> bool {
        self.direct
    }

    /// The arena offset of an indirect node.
    #[inline]
    pub fn offset(&self) -> Offset {
        debug_assert!(!self.direct);
        self.off_or_dir
    }

    /// The inline encoding of a direct leaf, usable verbatim as a child item.
    #[inline]
    pub(crate) fn direct_item(&self) -> u32 {
        debug_assert!(self.direct);
        self.off_or_dir
    }

    /// Number of children.
    pub fn children(&self, code: &Code) -> u32 {
        if self.direct {
            return 0;
        }
        match self.ty().fixed_children() {
            Some(n) => n,
            None => code.at(self.off_or_dir + 4),
        }
    }

    /// Byte offset of the first child item (or payload) within the arena.
    fn payload_offset(&self) -> Offset {
        debug_assert!(!self.direct);
        if self.ty().is_list() {
            self.off_or_dir + 8
        } else {
            self.off_or_dir + 4
        }
    }

    /// Read child `i` following the tagged-item protocol.
    pub fn child(&self, code: &Code, i: u32) -> Node {
        debug_assert!(i < self.children(code));
        let item = code.at(self.payload_offset() + i * 4);
        Node::decode_child_item(code, self.off_or_dir, item)
    }

    pub(crate) fn decode_child_item(code: &Code, parent: Offset, item: u32) -> Node {
        if item <= FALLTHROUGH_ITEM {
            Node::new_direct(Header::new(Type::Stmt0, Kind::Void, item as u16), item)
        } else if item & 1 == 1 {
            let kind = Kind::from_u8((item >> 25) as u8).unwrap_or(Kind::Bad);
            Node::new_direct(Header::new(Type::Const, kind, 0), item)
        } else if item & 3 != 0 {
            let kind = Kind::from_u8(((item >> 2) & 0x7f) as u8).unwrap_or(Kind::Bad);
            Node::new_direct(Header::new(Type::Var, kind, 0), item)
        } else {
            let off = parent.wrapping_add(item);
            Node::at(code, off)
        }
    }

    /// The item a parent at `parent_off` stores to reference this node.
    pub(crate) fn child_item(&self, parent_off: Offset) -> u32 {
        if self.direct {
            self.off_or_dir
        } else {
            debug_assert!(self.off_or_dir < parent_off);
            self.off_or_dir.wrapping_sub(parent_off)
        }
    }

    /// Decode a `Var` leaf.
    pub fn to_var(&self, code: &Code) -> Option<Var> {
        if self.ty() != Type::Var {
            return None;
        }
        let id = if self.direct {
            VarId::new(self.off_or_dir >> 9)
        } else {
            VarId::new(code.at(self.off_or_dir + 4))
        };
        Some(Var::new(self.kind(), id))
    }

    /// Decode a `Const` leaf into its value.
    pub fn to_value(&self, code: &Code) -> Option<Value> {
        if self.ty() != Type::Const {
            return None;
        }
        let kind = self.kind();
        if self.direct {
            let imm = (self.off_or_dir >> 1) & 0x00ff_ffff;
            let bits = if kind.is_signed() {
                // Restore the sign from the 24-bit field.
                (((imm << 8) as i32 >> 8) as i64) as u64
            } else {
                imm as u64
            };
            Some(Value::from_bits(kind, bits))
        } else {
            let bits = if kind.bits() > 32 {
                code.uint64_at(self.off_or_dir + 4)
            } else {
                code.at(self.off_or_dir + 4) as u64
            };
            Some(Value::from_bits(kind, bits))
        }
    }

    /// The index of a `Label` node within its function's label table.
    pub fn label_index(&self) -> Option<u16> {
        if self.ty() == Type::Label {
            Some(self.raw_op())
        } else {
            None
        }
    }

    /// The memory flavor of a `Mem` node.
    pub fn memtype(&self) -> Option<MemType> {
        if self.ty() == Type::Mem {
            MemType::from_u16(self.raw_op())
        } else {
            None
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.direct {
            write!(
                f,
                "Node({:?}, {:?}, op={}, direct={:#x})",
                self.ty(),
                self.kind(),
                self.raw_op(),
                self.off_or_dir
            )
        } else {
            write!(
                f,
                "Node({:?}, {:?}, op={}, at={})",
                self.ty(),
                self.kind(),
                self.raw_op(),
                self.off_or_dir
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Func, Op2};

    #[test]
    fn stmt0_leaves_are_inline() {
        assert_eq!(Node::BAD.children(&Code::new()), 0);
        assert!(!Node::BAD.is_valid());
        let brk = Node::stmt0(OpStmt0::Break);
        assert!(brk.is_valid());
        assert_eq!(brk.direct_item(), 1);
        assert!(brk.direct_item() <= FALLTHROUGH_ITEM);
    }

    #[test]
    fn child_items_are_relative_backward_offsets() {
        let mut func = Func::new("t");
        let x = func.new_var(Kind::Int64);
        let big = func.int_const(Kind::Int64, 1 << 40); // forced indirect
        let sum = func.binary(Op2::Add, x.node(), big);
        assert!(!sum.is_direct());
        // The constant was appended before the binary node.
        let child1 = sum.child(func.code(), 1);
        assert!(!child1.is_direct());
        assert!(child1.offset() < sum.offset());
        assert_eq!(
            child1.to_value(func.code()).unwrap().as_i64(),
            1 << 40
        );
    }

    #[test]
    fn direct_var_round_trip() {
        let mut func = Func::new("t");
        let v = func.new_var(Kind::Uint32);
        let node = v.node();
        assert!(node.is_direct());
        let decoded = node.to_var(func.code()).unwrap();
        assert_eq!(decoded, v);
    }

    #[test]
    fn direct_const_never_collides_with_stmt0() {
        let mut func = Func::new("t");
        // false is the smallest direct constant; it must not decode as a
        // Break/Continue/Fallthrough leaf.
        let fals = func.bool_const(false);
        assert!(fals.is_direct());
        assert!(fals.direct_item() > FALLTHROUGH_ITEM);
        assert_eq!(fals.ty(), Type::Const);
        assert!(!fals.to_value(func.code()).unwrap().as_bool());
    }

    #[test]
    fn negative_direct_const_round_trip() {
        let mut func = Func::new("t");
        let c = func.int_const(Kind::Int32, -5);
        assert!(c.is_direct());
        assert_eq!(c.to_value(func.code()).unwrap().as_i64(), -5);
    }
}
