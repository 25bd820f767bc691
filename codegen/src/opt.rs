//! The expression optimizer: a single bottom-up pass of constant folding,
//! canonicalization, and algebraic simplification.
//!
//! Rewrites append new nodes to the arena and never mutate old ones; the
//! append-only DAG makes reassociation safe because a rewritten subtree
//! cannot form a cycle. The pass is deliberately not a fixpoint: a node
//! built by a rewrite is not re-entered.

use crate::ir::{eval_binary, eval_unary, Func, Node, Op1, Op2, Type};
use crate::settings::Opt;
use log::trace;
use smallvec::SmallVec;

// Per-node result lattice, folded over children during the walk.
const IS_SAME: u8 = 1 << 0;
const IS_PURE: u8 = 1 << 1;
const IS_CONST: u8 = 1 << 2;
const IS_ALL: u8 = IS_SAME | IS_PURE | IS_CONST;

/// The rewriter. Holds a reusable scratch vector of optimized children so
/// repeated runs on the same pipeline allocate nothing.
pub struct Optimizer {
    nodes: Vec<Node>,
    flags: Opt,
}

impl Optimizer {
    /// Create an optimizer with empty scratch storage.
    pub fn new() -> Optimizer {
        Optimizer {
            nodes: Vec::new(),
            flags: Opt::empty(),
        }
    }

    /// Optimize `node` bottom-up, returning the replacement (or `node`
    /// itself when nothing changed). Does nothing unless `flags` enables
    /// constant folding or expression simplification.
    pub fn optimize(&mut self, func: &mut Func, node: Node, flags: Opt) -> Node {
        if !func.is_good()
            || !node.is_valid()
            || !flags.intersects(Opt::CONSTANT_FOLDING | Opt::EXPR_SIMPLIFICATION)
        {
            return node;
        }
        self.flags = flags;
        self.nodes.clear();
        let mut result = IS_ALL;
        self.walk(func, node, &mut result)
    }

    fn walk(&mut self, func: &mut Func, node: Node, in_out: &mut u8) -> Node {
        if !func.is_good() {
            *in_out &= IS_SAME;
            return node;
        }
        let n = node.children(func.code());
        let ty = node.ty();
        if Self::leaf(ty, n, in_out) {
            return node;
        }

        let scratch_mark = self.nodes.len();
        let mut result = IS_ALL;
        for i in 0..n {
            let child = node.child(func.code(), i);
            let optimized = self.walk(func, child, &mut result);
            self.nodes.push(optimized);
        }

        let mut new_node = match ty {
            Type::Unary => self.optimize_unary(func, node, scratch_mark, result),
            Type::Binary => self.optimize_binary(func, node, scratch_mark, result),
            _ => None,
        };
        if new_node.is_none() && result & IS_SAME == 0 {
            // No rewrite fired but some child changed: rebuild the node
            // around the new children.
            let children: SmallVec<[Node; 4]> =
                SmallVec::from_slice(&self.nodes[scratch_mark..]);
            new_node = Some(func.push_node(node.header(), &children));
        }
        self.nodes.truncate(scratch_mark);

        Self::finish(node, new_node, result, in_out)
    }

    fn leaf(ty: Type, children: u32, in_out: &mut u8) -> bool {
        // Leaves and non-optimizable types are returned as-is. Labels are
        // jump destinations and must anchor: they are never pure.
        if children == 0 || ty >= Type::Label {
            if ty != Type::Const {
                *in_out &= !IS_CONST;
            }
            if ty == Type::Label {
                *in_out &= !IS_PURE;
            }
            true
        } else {
            false
        }
    }

    fn finish(node: Node, new_node: Option<Node>, mut result: u8, in_out: &mut u8) -> Node {
        let out = match new_node {
            Some(n) if n.is_valid() && n != node => {
                result &= !IS_SAME;
                n
            }
            _ => {
                result |= IS_SAME;
                node
            }
        };
        if out.ty() == Type::Const {
            result |= IS_CONST | IS_PURE;
        } else {
            result &= !IS_CONST;
        }
        *in_out &= result;
        out
    }

    fn optimize_unary(
        &mut self,
        func: &mut Func,
        node: Node,
        scratch_mark: usize,
        result: u8,
    ) -> Option<Node> {
        let x = self.nodes[scratch_mark];
        let kind = node.kind();
        let op = Op1::from_u16(node.raw_op())?;

        if self.flags.contains(Opt::CONSTANT_FOLDING) && result & IS_CONST != 0 {
            if let Some(v0) = x.to_value(func.code()) {
                if let Some(ve) = eval_unary(kind, op, v0) {
                    trace!("fold {op:?} {v0:?} -> {ve:?}");
                    return Some(func.const_value(ve));
                }
            }
        }
        if self.flags.contains(Opt::EXPR_SIMPLIFICATION) {
            if let Some(rewritten) = Self::simplify_unary(func, node, op, x) {
                return Some(rewritten);
            }
        }
        None
    }

    fn simplify_unary(func: &mut Func, node: Node, op: Op1, x: Node) -> Option<Node> {
        if x.ty() == Type::Unary {
            let xop = Op1::from_u16(x.raw_op())?;
            let xx = x.child(func.code(), 0);
            match (op, xop) {
                // ~~x and --x cancel out.
                (Op1::BitNot, Op1::BitNot) | (Op1::Neg, Op1::Neg) => return Some(xx),
                // ~(-x) == x - 1
                (Op1::BitNot, Op1::Neg) => {
                    let one = func.one(xx.kind());
                    return Some(func.binary(Op2::Sub, xx, one));
                }
                // -(~x) == x + 1
                (Op1::Neg, Op1::BitNot) => {
                    let one = func.one(xx.kind());
                    return Some(func.binary(Op2::Add, xx, one));
                }
                _ => {}
            }
        } else if x.ty() == Type::Binary && op == Op1::Not {
            let bop = Op2::from_u16(x.raw_op())?;
            if bop.is_comparison() {
                // !(a cmp b) == a (not cmp) b
                let bx = x.child(func.code(), 0);
                let by = x.child(func.code(), 1);
                return Some(func.binary(bop.not_comparison(), bx, by));
            }
        }
        if matches!(op, Op1::Cast | Op1::Bitcast) && node.kind() == x.kind() {
            // Conversion from a kind to itself.
            return Some(x);
        }
        None
    }

    fn optimize_binary(
        &mut self,
        func: &mut Func,
        node: Node,
        scratch_mark: usize,
        result: u8,
    ) -> Option<Node> {
        let x = self.nodes[scratch_mark];
        let y = self.nodes[scratch_mark + 1];
        let op = Op2::from_u16(node.raw_op())?;

        if self.flags.contains(Opt::CONSTANT_FOLDING) && result & IS_CONST != 0 {
            if let (Some(v0), Some(v1)) = (x.to_value(func.code()), y.to_value(func.code())) {
                if let Some(ve) = eval_binary(op, v0, v1) {
                    trace!("fold {v0:?} {op} {v1:?} -> {ve:?}");
                    return Some(func.const_value(ve));
                }
            }
        }
        if self.flags.contains(Opt::EXPR_SIMPLIFICATION) {
            if let Some(rewritten) = Self::simplify_binary(func, op, x, y) {
                return Some(rewritten);
            }
        }
        None
    }

    fn simplify_binary(func: &mut Func, mut op: Op2, mut x: Node, mut y: Node) -> Option<Node> {
        let mut changed = false;
        if x.ty() > y.ty() {
            // Canonicalize: constants drift to the right (Const has the
            // highest expression ordinal).
            if op.is_commutative() {
                core::mem::swap(&mut x, &mut y);
                changed = true;
            } else if op.is_comparison() {
                op = op.swap_comparison();
                core::mem::swap(&mut x, &mut y);
                changed = true;
            }
        }
        // Reassociate (z op c1) op c2 and (z op c1) op (w op c2); integers
        // only, floating-point reordering would change rounding.
        if !x.kind().is_float()
            && op.is_associative()
            && x.ty() == Type::Binary
            && Op2::from_u16(x.raw_op()) == Some(op)
        {
            let z = x.child(func.code(), 0);
            let c1 = x.child(func.code(), 1).to_value(func.code());
            if let Some(c1) = c1 {
                if let Some(c2) = y.to_value(func.code()) {
                    if let Some(v) = eval_binary(op, c1, c2) {
                        // (z op c1) op c2 -> z op (c1 op c2)
                        x = z;
                        y = func.const_value(v);
                        changed = true;
                    }
                } else if op.is_commutative()
                    && y.ty() == Type::Binary
                    && Op2::from_u16(y.raw_op()) == Some(op)
                {
                    let w = y.child(func.code(), 0);
                    let c2 = y.child(func.code(), 1).to_value(func.code());
                    if let Some(v) = c2.and_then(|c2| eval_binary(op, c1, c2)) {
                        // (z op c1) op (w op c2) -> (z op w) op (c1 op c2)
                        let (mut z, mut w) = (z, w);
                        if z.ty() > w.ty() {
                            core::mem::swap(&mut z, &mut w);
                        }
                        x = func.binary(op, z, w);
                        y = func.const_value(v);
                        changed = true;
                    }
                }
            }
        }
        if changed && x.is_valid() && y.is_valid() {
            Some(func.binary(op, x, y))
        } else {
            None
        }
    }
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Kind;

    fn optimize_all(func: &mut Func, node: Node) -> Node {
        Optimizer::new().optimize(
            func,
            node,
            Opt::CONSTANT_FOLDING | Opt::EXPR_SIMPLIFICATION,
        )
    }

    #[test]
    fn double_negation_cancels() {
        let mut func = Func::new("t");
        let x = func.new_var(Kind::Int32);
        let neg = func.unary(Op1::Neg, x.node());
        let negneg = func.unary(Op1::Neg, neg);
        let out = optimize_all(&mut func, negneg);
        assert_eq!(out, x.node());
    }

    #[test]
    fn bitnot_of_neg_is_sub_one() {
        let mut func = Func::new("t");
        let x = func.new_var(Kind::Int32);
        let neg = func.unary(Op1::Neg, x.node());
        let bn = func.unary(Op1::BitNot, neg);
        let out = optimize_all(&mut func, bn);
        assert_eq!(out.ty(), Type::Binary);
        assert_eq!(Op2::from_u16(out.raw_op()), Some(Op2::Sub));
        assert_eq!(out.child(func.code(), 0), x.node());
        assert_eq!(out.child(func.code(), 1).to_value(func.code()).unwrap().as_i64(), 1);
    }

    #[test]
    fn reassociation_folds_constants() {
        let mut func = Func::new("t");
        let x = func.new_var(Kind::Int32);
        let one = func.int_const(Kind::Int32, 1);
        let two = func.int_const(Kind::Int32, 2);
        let inner = func.binary(Op2::Add, x.node(), one);
        let outer = func.binary(Op2::Add, inner, two);
        let out = optimize_all(&mut func, outer);
        assert_eq!(out.ty(), Type::Binary);
        assert_eq!(Op2::from_u16(out.raw_op()), Some(Op2::Add));
        assert_eq!(out.child(func.code(), 0), x.node());
        assert_eq!(out.child(func.code(), 1).to_value(func.code()).unwrap().as_i64(), 3);
    }

    #[test]
    fn float_addition_is_not_reassociated() {
        let mut func = Func::new("t");
        let x = func.new_var(Kind::Float64);
        let one = func.const_value(crate::ir::Value::float64(1.0));
        let two = func.const_value(crate::ir::Value::float64(2.0));
        let inner = func.binary(Op2::Add, x.node(), one);
        let outer = func.binary(Op2::Add, inner, two);
        let out = optimize_all(&mut func, outer);
        assert_eq!(out, outer);
    }

    #[test]
    fn comparison_constants_drift_right() {
        let mut func = Func::new("t");
        let x = func.new_var(Kind::Int32);
        let three = func.int_const(Kind::Int32, 3);
        let lss = func.binary(Op2::Lt, three, x.node());
        let out = optimize_all(&mut func, lss);
        assert_eq!(Op2::from_u16(out.raw_op()), Some(Op2::Gt));
        assert_eq!(out.child(func.code(), 0), x.node());
        assert_eq!(out.child(func.code(), 1).to_value(func.code()).unwrap().as_i64(), 3);
    }

    #[test]
    fn not_of_comparison_inverts() {
        let mut func = Func::new("t");
        let a = func.new_var(Kind::Int32);
        let b = func.new_var(Kind::Int32);
        let cmp = func.binary(Op2::Lt, a.node(), b.node());
        let not = func.unary(Op1::Not, cmp);
        let out = optimize_all(&mut func, not);
        assert_eq!(Op2::from_u16(out.raw_op()), Some(Op2::Ge));
        assert_eq!(out.child(func.code(), 0), a.node());
        assert_eq!(out.child(func.code(), 1), b.node());
    }

    #[test]
    fn constant_folding_respects_flags() {
        let mut func = Func::new("t");
        let two = func.int_const(Kind::Int32, 2);
        let three = func.int_const(Kind::Int32, 3);
        let sum = func.binary(Op2::Add, two, three);
        let folded = Optimizer::new().optimize(&mut func, sum, Opt::CONSTANT_FOLDING);
        assert_eq!(folded.to_value(func.code()).unwrap().as_i64(), 5);
        let kept = Optimizer::new().optimize(&mut func, sum, Opt::CHECK_ALL);
        assert_eq!(kept, sum);
    }

    #[test]
    fn division_by_zero_is_not_folded() {
        let mut func = Func::new("t");
        let ten = func.int_const(Kind::Int32, 10);
        let zero = func.int_const(Kind::Int32, 0);
        let div = func.binary(Op2::Div, ten, zero);
        let out = optimize_all(&mut func, div);
        assert_eq!(out, div);
    }

    #[test]
    fn cast_to_same_kind_vanishes() {
        let mut func = Func::new("t");
        let x = func.new_var(Kind::Int32);
        let cast = func.cast(Kind::Int32, x.node());
        let out = optimize_all(&mut func, cast);
        assert_eq!(out, x.node());
        let widen = func.cast(Kind::Int64, x.node());
        let out = optimize_all(&mut func, widen);
        assert_eq!(out, widen);
    }

    #[test]
    fn unchanged_trees_return_the_same_handle() {
        let mut func = Func::new("t");
        let x = func.new_var(Kind::Int32);
        let y = func.new_var(Kind::Int32);
        let sum = func.binary(Op2::Add, x.node(), y.node());
        let out = optimize_all(&mut func, sum);
        assert_eq!(out, sum);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // Reassociating a chain must agree with folding the constants
            // first: optimize((z op c1) op c2) == optimize(z op (c1 op c2)).
            #[test]
            fn reassociation_is_sound(c1 in any::<i32>(), c2 in any::<i32>(), which in 0usize..5) {
                let op = [Op2::Add, Op2::Mul, Op2::And, Op2::Or, Op2::Xor][which];
                let mut func = Func::new("p");
                let z = func.new_var(Kind::Int32);
                let c1n = func.int_const(Kind::Int32, c1 as i64);
                let c2n = func.int_const(Kind::Int32, c2 as i64);

                let left_inner = func.binary(op, z.node(), c1n);
                let left = func.binary(op, left_inner, c2n);
                let right_inner = func.binary(op, c1n, c2n);
                let right = func.binary(op, z.node(), right_inner);

                let mut opt = Optimizer::new();
                let flags = Opt::CONSTANT_FOLDING | Opt::EXPR_SIMPLIFICATION;
                let l = opt.optimize(&mut func, left, flags);
                let r = opt.optimize(&mut func, right, flags);

                // Both converge to (z op folded).
                prop_assert_eq!(Op2::from_u16(l.raw_op()), Some(op));
                prop_assert_eq!(l.child(func.code(), 0), z.node());
                prop_assert_eq!(Op2::from_u16(r.raw_op()), Some(op));
                prop_assert_eq!(r.child(func.code(), 0), z.node());
                let lc = l.child(func.code(), 1).to_value(func.code()).unwrap();
                let rc = r.child(func.code(), 1).to_value(func.code()).unwrap();
                prop_assert_eq!(lc, rc);
            }

            // Folding a closed expression must agree with direct evaluation.
            #[test]
            fn folding_matches_eval(a in any::<i32>(), b in any::<i32>(), raw_op in 1u16..=18) {
                let op = Op2::from_u16(raw_op).unwrap();
                let mut func = Func::new("p");
                let an = func.int_const(Kind::Int32, a as i64);
                let bn = func.int_const(Kind::Int32, b as i64);
                let expr = func.binary(op, an, bn);
                let out = Optimizer::new().optimize(&mut func, expr, Opt::CONSTANT_FOLDING);
                let va = crate::ir::Value::int(Kind::Int32, a as i64);
                let vb = crate::ir::Value::int(Kind::Int32, b as i64);
                match eval_binary(op, va, vb) {
                    Some(expected) => {
                        prop_assert_eq!(out.to_value(func.code()), Some(expected));
                    }
                    None => prop_assert_eq!(out, expr),
                }
            }
        }
    }
}
