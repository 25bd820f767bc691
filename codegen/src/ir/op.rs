//! Operator tables: expression operators, statement operators, and their
//! algebraic properties.
//!
//! Portable conditional jumps and the op-assign statements occupy contiguous
//! discriminant ranges so the x64 lowering can translate them with plain
//! integer arithmetic, the way instruction sets map families of opcodes.

use core::fmt;

/// One-operand expression operators.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Op1 {
    /// Placeholder for malformed nodes.
    Bad = 0,
    /// Invert all bits: `!x` on integers.
    BitNot = 1,
    /// Boolean negation.
    Not = 2,
    /// Arithmetic negation: `-x`.
    Neg = 3,
    /// Truncate, sign/zero-extend, or int<->float conversion.
    Cast = 4,
    /// Reinterpret bits between equal-width integer and float kinds.
    Bitcast = 5,
}

impl Op1 {
    /// Decode from a header discriminant.
    pub fn from_u16(op: u16) -> Option<Op1> {
        use Op1::*;
        Some(match op {
            1 => BitNot,
            2 => Not,
            3 => Neg,
            4 => Cast,
            5 => Bitcast,
            _ => return None,
        })
    }
}

/// Two-operand expression operators.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Op2 {
    /// Placeholder for malformed nodes.
    Bad = 0,
    /// `x + y`
    Add = 1,
    /// `x - y`
    Sub = 2,
    /// `x * y`
    Mul = 3,
    /// `x / y`
    Div = 4,
    /// `x % y`
    Rem = 5,
    /// `x & y`
    And = 6,
    /// `x | y`
    Or = 7,
    /// `x ^ y`
    Xor = 8,
    /// `x << y`
    Shl = 9,
    /// `x >> y`; arithmetic on signed kinds, logical on unsigned.
    Shr = 10,
    /// `x && y`
    Land = 11,
    /// `x || y`
    Lor = 12,
    /// `x < y`
    Lt = 13,
    /// `x <= y`
    Le = 14,
    /// `x != y`
    Ne = 15,
    /// `x == y`
    Eq = 16,
    /// `x > y`
    Gt = 17,
    /// `x >= y`
    Ge = 18,
}

impl Op2 {
    /// Decode from a header discriminant.
    pub fn from_u16(op: u16) -> Option<Op2> {
        use Op2::*;
        Some(match op {
            1 => Add,
            2 => Sub,
            3 => Mul,
            4 => Div,
            5 => Rem,
            6 => And,
            7 => Or,
            8 => Xor,
            9 => Shl,
            10 => Shr,
            11 => Land,
            12 => Lor,
            13 => Lt,
            14 => Le,
            15 => Ne,
            16 => Eq,
            17 => Gt,
            18 => Ge,
            _ => return None,
        })
    }

    /// True for operators where `(x op y) op z == x op (y op z)` holds on
    /// integers. Floating-point evaluation is never treated as associative
    /// regardless of the operator; callers must check the kind.
    pub fn is_associative(self) -> bool {
        matches!(self, Op2::Add | Op2::Mul | Op2::And | Op2::Or | Op2::Xor)
    }

    /// True for operators where `x op y == y op x`.
    pub fn is_commutative(self) -> bool {
        matches!(self, Op2::Add | Op2::Mul | Op2::And | Op2::Or | Op2::Xor)
    }

    /// True for the six ordering/equality operators.
    pub fn is_comparison(self) -> bool {
        (self as u16) >= (Op2::Lt as u16) && (self as u16) <= (Op2::Ge as u16)
    }

    /// Exchange the operand roles of a comparison: `<` ⟷ `>`, `<=` ⟷ `>=`;
    /// equality operators are their own mirror.
    pub fn swap_comparison(self) -> Op2 {
        match self {
            Op2::Lt => Op2::Gt,
            Op2::Le => Op2::Ge,
            Op2::Gt => Op2::Lt,
            Op2::Ge => Op2::Le,
            Op2::Ne | Op2::Eq => self,
            _ => Op2::Bad,
        }
    }

    /// Logically negate a comparison: `<` ⟷ `>=`, `<=` ⟷ `>`, `==` ⟷ `!=`.
    pub fn not_comparison(self) -> Op2 {
        match self {
            Op2::Lt => Op2::Ge,
            Op2::Le => Op2::Gt,
            Op2::Gt => Op2::Le,
            Op2::Ge => Op2::Lt,
            Op2::Eq => Op2::Ne,
            Op2::Ne => Op2::Eq,
            _ => Op2::Bad,
        }
    }
}

impl fmt::Display for Op2 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Op2::Bad => "?",
            Op2::Add => "+",
            Op2::Sub => "-",
            Op2::Mul => "*",
            Op2::Div => "/",
            Op2::Rem => "%",
            Op2::And => "&",
            Op2::Or => "|",
            Op2::Xor => "^",
            Op2::Shl => "<<",
            Op2::Shr => ">>",
            Op2::Land => "&&",
            Op2::Lor => "||",
            Op2::Lt => "<",
            Op2::Le => "<=",
            Op2::Ne => "!=",
            Op2::Eq => "==",
            Op2::Gt => ">",
            Op2::Ge => ">=",
        };
        f.write_str(s)
    }
}

/// Variadic (tuple) expression operators.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum OpN {
    /// Placeholder for malformed nodes.
    Bad = 0,
    /// n-ary `+`
    Add = 1,
    /// n-ary `*`
    Mul = 2,
    /// n-ary `&`
    And = 3,
    /// n-ary `|`
    Or = 4,
    /// n-ary `^`
    Xor = 5,
    /// Function call: `(functype, target, args...)`.
    Call = 6,
    /// Evaluate all children, yield the last.
    Comma = 7,
}

impl OpN {
    /// Decode from a header discriminant.
    pub fn from_u16(op: u16) -> Option<OpN> {
        use OpN::*;
        Some(match op {
            1 => Add,
            2 => Mul,
            3 => And,
            4 => Or,
            5 => Xor,
            6 => Call,
            7 => Comma,
            _ => return None,
        })
    }
}

/// Valueless statement operators.
///
/// These discriminants double as the inline child encoding: any child item
/// at or below `Fallthrough as u32` is one of these leaves.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum OpStmt0 {
    /// Placeholder for malformed or missing nodes.
    Bad = 0,
    /// Exit the innermost loop or switch.
    Break = 1,
    /// Jump to the innermost loop's next iteration.
    Continue = 2,
    /// In a switch case body: continue into the next case body.
    Fallthrough = 3,
}

impl OpStmt0 {
    /// Decode from a header discriminant.
    pub fn from_u16(op: u16) -> Option<OpStmt0> {
        use OpStmt0::*;
        Some(match op {
            0 => Bad,
            1 => Break,
            2 => Continue,
            3 => Fallthrough,
            _ => return None,
        })
    }
}

/// The largest inline child item; see [`OpStmt0`].
pub(crate) const FALLTHROUGH_ITEM: u32 = OpStmt0::Fallthrough as u32;

/// One-child statement operators.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum OpStmt1 {
    /// Placeholder for malformed nodes.
    Bad = 0,
    /// Unconditional jump to a label.
    Goto = 1,
    /// `x += 1`
    Inc = 2,
    /// `x -= 1`
    Dec = 3,
    /// Pseudo-statement marking a variable as defined (call results).
    SetLive = 4,

    // Portable conditional jumps; flags were set by a preceding AsmCmp.
    // The range AsmJa..=AsmJne maps 1:1 onto X86Ja..=X86Jne below.
    /// Jump if above (unsigned `>`).
    AsmJa = 5,
    /// Jump if above or equal (unsigned `>=`).
    AsmJae = 6,
    /// Jump if below (unsigned `<`).
    AsmJb = 7,
    /// Jump if below or equal (unsigned `<=`).
    AsmJbe = 8,
    /// Jump if equal.
    AsmJe = 9,
    /// Jump if greater (signed `>`).
    AsmJg = 10,
    /// Jump if greater or equal (signed `>=`).
    AsmJge = 11,
    /// Jump if less (signed `<`).
    AsmJl = 12,
    /// Jump if less or equal (signed `<=`).
    AsmJle = 13,
    /// Jump if not equal.
    AsmJne = 14,

    /// x86 `jmp`.
    X86Jmp = 15,
    /// x86 `ja`.
    X86Ja = 16,
    /// x86 `jae`.
    X86Jae = 17,
    /// x86 `jb`.
    X86Jb = 18,
    /// x86 `jbe`.
    X86Jbe = 19,
    /// x86 `je`.
    X86Je = 20,
    /// x86 `jg`.
    X86Jg = 21,
    /// x86 `jge`.
    X86Jge = 22,
    /// x86 `jl`.
    X86Jl = 23,
    /// x86 `jle`.
    X86Jle = 24,
    /// x86 `jne`.
    X86Jne = 25,
    /// x86 `inc`.
    X86Inc = 26,
    /// x86 `dec`.
    X86Dec = 27,
    /// x86 `neg`.
    X86Neg = 28,
    /// x86 `not`.
    X86Not = 29,
}

impl OpStmt1 {
    /// Decode from a header discriminant.
    pub fn from_u16(op: u16) -> Option<OpStmt1> {
        if op >= OpStmt1::Goto as u16 && op <= OpStmt1::X86Not as u16 {
            // Discriminants are contiguous; transmute-free decode.
            Some(Self::ALL[op as usize - 1])
        } else if op == 0 {
            Some(OpStmt1::Bad)
        } else {
            None
        }
    }

    const ALL: [OpStmt1; 29] = [
        OpStmt1::Goto,
        OpStmt1::Inc,
        OpStmt1::Dec,
        OpStmt1::SetLive,
        OpStmt1::AsmJa,
        OpStmt1::AsmJae,
        OpStmt1::AsmJb,
        OpStmt1::AsmJbe,
        OpStmt1::AsmJe,
        OpStmt1::AsmJg,
        OpStmt1::AsmJge,
        OpStmt1::AsmJl,
        OpStmt1::AsmJle,
        OpStmt1::AsmJne,
        OpStmt1::X86Jmp,
        OpStmt1::X86Ja,
        OpStmt1::X86Jae,
        OpStmt1::X86Jb,
        OpStmt1::X86Jbe,
        OpStmt1::X86Je,
        OpStmt1::X86Jg,
        OpStmt1::X86Jge,
        OpStmt1::X86Jl,
        OpStmt1::X86Jle,
        OpStmt1::X86Jne,
        OpStmt1::X86Inc,
        OpStmt1::X86Dec,
        OpStmt1::X86Neg,
        OpStmt1::X86Not,
    ];

    /// True for the portable conditional jumps.
    pub fn is_cond_jump(self) -> bool {
        let op = self as u16;
        (OpStmt1::AsmJa as u16..=OpStmt1::AsmJne as u16).contains(&op)
    }

    /// True for the lowered x86 conditional jumps.
    pub fn is_x86_cond_jump(self) -> bool {
        let op = self as u16;
        (OpStmt1::X86Ja as u16..=OpStmt1::X86Jne as u16).contains(&op)
    }

    /// Translate a portable statement operator to its x86 counterpart.
    pub fn to_x86(self) -> Option<OpStmt1> {
        match self {
            OpStmt1::Goto => Some(OpStmt1::X86Jmp),
            OpStmt1::Inc => Some(OpStmt1::X86Inc),
            OpStmt1::Dec => Some(OpStmt1::X86Dec),
            _ if self.is_cond_jump() => {
                let delta = OpStmt1::X86Ja as u16 - OpStmt1::AsmJa as u16;
                OpStmt1::from_u16(self as u16 + delta)
            }
            _ => None,
        }
    }
}

/// Two-child statement operators.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum OpStmt2 {
    /// Placeholder for malformed nodes.
    Bad = 0,

    // Op-assign statements; the range AddAssign..=ShrAssign maps 1:1 onto
    // X86Add..=X86Shr below.
    /// `dst += src`
    AddAssign = 1,
    /// `dst -= src`
    SubAssign = 2,
    /// `dst *= src`
    MulAssign = 3,
    /// `dst /= src`
    DivAssign = 4,
    /// `dst %= src`
    RemAssign = 5,
    /// `dst &= src`
    AndAssign = 6,
    /// `dst |= src`
    OrAssign = 7,
    /// `dst ^= src`
    XorAssign = 8,
    /// `dst <<= src`
    ShlAssign = 9,
    /// `dst >>= src`
    ShrAssign = 10,
    /// `dst = src`
    Assign = 11,

    /// A `case expr: body` arm of a switch.
    Case = 12,
    /// The `default: body` arm of a switch.
    Default = 13,
    /// Conditional jump: `(label, test)`.
    JumpIf = 14,
    /// Portable flag-setting compare.
    AsmCmp = 15,

    /// x86 `add`.
    X86Add = 16,
    /// x86 `sub`.
    X86Sub = 17,
    /// x86 `imul`.
    X86Mul = 18,
    /// x86 division pseudo-op; has no two-operand encoding.
    X86Div = 19,
    /// x86 remainder pseudo-op; has no two-operand encoding.
    X86Rem = 20,
    /// x86 `and`.
    X86And = 21,
    /// x86 `or`.
    X86Or = 22,
    /// x86 `xor`.
    X86Xor = 23,
    /// x86 `shl`.
    X86Shl = 24,
    /// x86 `shr`/`sar` (picked by signedness).
    X86Shr = 25,
    /// x86 `mov`.
    X86Mov = 26,
    /// x86 `cmp`.
    X86Cmp = 27,
    /// x86 `lea`.
    X86Lea = 28,
    /// x86 `movsx` (sign-extending widening move).
    X86Movsx = 29,
    /// x86 `movzx` (zero-extending widening move).
    X86Movzx = 30,
}

impl OpStmt2 {
    /// Decode from a header discriminant.
    pub fn from_u16(op: u16) -> Option<OpStmt2> {
        if op >= OpStmt2::AddAssign as u16 && op <= OpStmt2::X86Movzx as u16 {
            Some(Self::ALL[op as usize - 1])
        } else if op == 0 {
            Some(OpStmt2::Bad)
        } else {
            None
        }
    }

    const ALL: [OpStmt2; 30] = [
        OpStmt2::AddAssign,
        OpStmt2::SubAssign,
        OpStmt2::MulAssign,
        OpStmt2::DivAssign,
        OpStmt2::RemAssign,
        OpStmt2::AndAssign,
        OpStmt2::OrAssign,
        OpStmt2::XorAssign,
        OpStmt2::ShlAssign,
        OpStmt2::ShrAssign,
        OpStmt2::Assign,
        OpStmt2::Case,
        OpStmt2::Default,
        OpStmt2::JumpIf,
        OpStmt2::AsmCmp,
        OpStmt2::X86Add,
        OpStmt2::X86Sub,
        OpStmt2::X86Mul,
        OpStmt2::X86Div,
        OpStmt2::X86Rem,
        OpStmt2::X86And,
        OpStmt2::X86Or,
        OpStmt2::X86Xor,
        OpStmt2::X86Shl,
        OpStmt2::X86Shr,
        OpStmt2::X86Mov,
        OpStmt2::X86Cmp,
        OpStmt2::X86Lea,
        OpStmt2::X86Movsx,
        OpStmt2::X86Movzx,
    ];

    /// True for any assignment statement, op-assign or plain.
    pub fn is_assign(self) -> bool {
        let op = self as u16;
        (OpStmt2::AddAssign as u16..=OpStmt2::Assign as u16).contains(&op)
    }

    /// The expression operator an op-assign applies, or `None` for plain
    /// assignment.
    pub fn assign_op(self) -> Option<Op2> {
        match self {
            OpStmt2::AddAssign => Some(Op2::Add),
            OpStmt2::SubAssign => Some(Op2::Sub),
            OpStmt2::MulAssign => Some(Op2::Mul),
            OpStmt2::DivAssign => Some(Op2::Div),
            OpStmt2::RemAssign => Some(Op2::Rem),
            OpStmt2::AndAssign => Some(Op2::And),
            OpStmt2::OrAssign => Some(Op2::Or),
            OpStmt2::XorAssign => Some(Op2::Xor),
            OpStmt2::ShlAssign => Some(Op2::Shl),
            OpStmt2::ShrAssign => Some(Op2::Shr),
            _ => None,
        }
    }

    /// Translate an op-assign to its two-operand x86 pseudo-op, or an
    /// expression operator to the same (used by two-address conversion).
    pub fn x86_for_op(op: Op2) -> Option<OpStmt2> {
        Some(match op {
            Op2::Add => OpStmt2::X86Add,
            Op2::Sub => OpStmt2::X86Sub,
            Op2::Mul => OpStmt2::X86Mul,
            Op2::Div => OpStmt2::X86Div,
            Op2::Rem => OpStmt2::X86Rem,
            Op2::And => OpStmt2::X86And,
            Op2::Or => OpStmt2::X86Or,
            Op2::Xor => OpStmt2::X86Xor,
            Op2::Shl => OpStmt2::X86Shl,
            Op2::Shr => OpStmt2::X86Shr,
            _ => return None,
        })
    }
}

/// Variadic statement operators.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum OpStmtN {
    /// Placeholder for malformed nodes.
    Bad = 0,
    /// `(results..., call)`: assign a call's results.
    AssignCall = 1,
    /// Execute children in order.
    Block = 2,
    /// `(test1, body1, test2, body2, ..., [default])`: if/else-if chain.
    Cond = 3,
    /// Return the child expressions to the caller.
    Return = 4,
    /// `(expr, case..., [default])`.
    Switch = 5,
    /// Lowered call: `(functype, target, set-live, args...)`.
    X86Call = 6,
    /// Lowered return wrapping its value operands.
    X86Ret = 7,
}

impl OpStmtN {
    /// Decode from a header discriminant.
    pub fn from_u16(op: u16) -> Option<OpStmtN> {
        use OpStmtN::*;
        Some(match op {
            0 => Bad,
            1 => AssignCall,
            2 => Block,
            3 => Cond,
            4 => Return,
            5 => Switch,
            6 => X86Call,
            7 => X86Ret,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMPARISONS: [Op2; 6] = [Op2::Lt, Op2::Le, Op2::Ne, Op2::Eq, Op2::Gt, Op2::Ge];

    #[test]
    fn comparison_range() {
        for op in COMPARISONS {
            assert!(op.is_comparison());
        }
        assert!(!Op2::Add.is_comparison());
        assert!(!Op2::Lor.is_comparison());
    }

    #[test]
    fn swap_not_are_involutions() {
        for op in COMPARISONS {
            assert_eq!(op.swap_comparison().swap_comparison(), op);
            assert_eq!(op.not_comparison().not_comparison(), op);
        }
    }

    #[test]
    fn swap_and_not_commute() {
        for op in COMPARISONS {
            assert_eq!(
                op.swap_comparison().not_comparison(),
                op.not_comparison().swap_comparison()
            );
        }
    }

    #[test]
    fn algebraic_tables() {
        for op in [Op2::Add, Op2::Mul, Op2::And, Op2::Or, Op2::Xor] {
            assert!(op.is_associative() && op.is_commutative());
        }
        for op in [Op2::Sub, Op2::Div, Op2::Rem, Op2::Shl, Op2::Shr, Op2::Lt] {
            assert!(!op.is_associative() && !op.is_commutative());
        }
    }

    #[test]
    fn portable_to_x86_statement_map() {
        assert_eq!(OpStmt1::Goto.to_x86(), Some(OpStmt1::X86Jmp));
        assert_eq!(OpStmt1::Inc.to_x86(), Some(OpStmt1::X86Inc));
        assert_eq!(OpStmt1::AsmJa.to_x86(), Some(OpStmt1::X86Ja));
        assert_eq!(OpStmt1::AsmJne.to_x86(), Some(OpStmt1::X86Jne));
        assert_eq!(OpStmt1::AsmJle.to_x86(), Some(OpStmt1::X86Jle));
        assert_eq!(OpStmt1::X86Jmp.to_x86(), None);
    }

    #[test]
    fn op_assign_map() {
        assert_eq!(OpStmt2::AddAssign.assign_op(), Some(Op2::Add));
        assert_eq!(OpStmt2::ShrAssign.assign_op(), Some(Op2::Shr));
        assert_eq!(OpStmt2::Assign.assign_op(), None);
        assert_eq!(OpStmt2::x86_for_op(Op2::Add), Some(OpStmt2::X86Add));
        assert_eq!(OpStmt2::x86_for_op(Op2::Shr), Some(OpStmt2::X86Shr));
        assert_eq!(OpStmt2::x86_for_op(Op2::Eq), None);
    }

    #[test]
    fn discriminant_round_trips() {
        for raw in 0..=31u16 {
            if let Some(op) = OpStmt2::from_u16(raw) {
                assert_eq!(op as u16, raw);
            }
            if let Some(op) = OpStmt1::from_u16(raw) {
                assert_eq!(op as u16, raw);
            }
        }
    }
}
