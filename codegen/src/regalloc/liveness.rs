//! Approximate liveness analysis over a lowered instruction list.
//!
//! Walks the blocks of the flow graph in reverse layout order and each
//! block's instructions in reverse, maintaining a bitset of live variables:
//! at each instruction the defs are subtracted and the uses added, and an
//! interference edge is recorded between every pair of variables
//! simultaneously live after the instruction. This is a single pass, not a
//! dataflow fixpoint; variable ids are never reused within a function, so
//! values flowing around back edges stay conservatively live.

use crate::bitset::{BitSet, NO_POS};
use crate::flowgraph::FlowGraph;
use crate::ir::{Func, Node, OpStmt1, OpStmt2, OpStmtN, Type};
use crate::regalloc::interference::InterferenceGraph;
use smallvec::SmallVec;

/// The variables an instruction writes and reads.
#[derive(Default, Debug)]
pub struct DefUse {
    /// Variables defined (written) by the instruction.
    pub defs: SmallVec<[u32; 2]>,
    /// Variables used (read) by the instruction.
    pub uses: SmallVec<[u32; 8]>,
}

fn expr_vars(func: &Func, node: Node, out: &mut SmallVec<[u32; 8]>) {
    match node.ty() {
        Type::Var => {
            if let Some(var) = node.to_var(func.code()) {
                out.push(var.id().index());
            }
        }
        Type::Mem | Type::Unary | Type::Binary | Type::Tuple => {
            for i in 0..node.children(func.code()) {
                expr_vars(func, node.child(func.code(), i), out);
            }
        }
        _ => {}
    }
}

/// Classify the defs and uses of one lowered statement.
pub fn def_use(func: &Func, node: Node) -> DefUse {
    let mut du = DefUse::default();
    let code = func.code();
    match node.ty() {
        Type::Stmt1 => {
            let child = node.child(code, 0);
            match OpStmt1::from_u16(node.raw_op()) {
                Some(OpStmt1::SetLive) => {
                    if let Some(var) = child.to_var(code) {
                        du.defs.push(var.id().index());
                    }
                }
                Some(
                    OpStmt1::Inc
                    | OpStmt1::Dec
                    | OpStmt1::X86Inc
                    | OpStmt1::X86Dec
                    | OpStmt1::X86Neg
                    | OpStmt1::X86Not,
                ) => {
                    // Read-modify-write.
                    if let Some(var) = child.to_var(code) {
                        du.defs.push(var.id().index());
                    }
                    expr_vars(func, child, &mut du.uses);
                }
                _ => {} // jumps reference only labels
            }
        }
        Type::Stmt2 => {
            let dst = node.child(code, 0);
            let src = node.child(code, 1);
            match OpStmt2::from_u16(node.raw_op()) {
                Some(
                    OpStmt2::X86Mov | OpStmt2::X86Lea | OpStmt2::X86Movsx | OpStmt2::X86Movzx
                    | OpStmt2::Assign,
                ) => {
                    match dst.to_var(code) {
                        Some(var) => du.defs.push(var.id().index()),
                        // A memory destination reads its address registers.
                        None => expr_vars(func, dst, &mut du.uses),
                    }
                    expr_vars(func, src, &mut du.uses);
                }
                Some(OpStmt2::X86Cmp | OpStmt2::AsmCmp) => {
                    expr_vars(func, dst, &mut du.uses);
                    expr_vars(func, src, &mut du.uses);
                }
                Some(op)
                    if op.is_assign()
                        || (OpStmt2::X86Add as u16..=OpStmt2::X86Shr as u16)
                            .contains(&(op as u16)) =>
                {
                    // Two-address ops read and write the destination.
                    if let Some(var) = dst.to_var(code) {
                        du.defs.push(var.id().index());
                    }
                    expr_vars(func, dst, &mut du.uses);
                    expr_vars(func, src, &mut du.uses);
                }
                _ => {}
            }
        }
        Type::StmtN => match OpStmtN::from_u16(node.raw_op()) {
            Some(OpStmtN::Return | OpStmtN::X86Ret) => {
                for i in 0..node.children(code) {
                    expr_vars(func, node.child(code, i), &mut du.uses);
                }
            }
            Some(OpStmtN::X86Call) => {
                for i in 0..node.children(code) {
                    let child = node.child(code, i);
                    match child.ty() {
                        Type::FuncType | Type::Label | Type::Name => {}
                        Type::Stmt1 => {
                            // The set-live pseudo marks the result defined.
                            if let Some(var) = child.child(code, 0).to_var(code) {
                                du.defs.push(var.id().index());
                            }
                        }
                        _ => expr_vars(func, child, &mut du.uses),
                    }
                }
            }
            _ => {}
        },
        _ => {}
    }
    du
}

/// Build the interference graph for `nodes` into `graph`.
pub fn build_interference(
    func: &Func,
    nodes: &[Node],
    cfg: &FlowGraph,
    graph: &mut InterferenceGraph,
) {
    let n = func.num_vars() as usize;
    graph.reset(n);
    let mut live = BitSet::new();
    live.resize(n);
    let mut live_ids: SmallVec<[u32; 16]> = SmallVec::new();

    for block_id in (0..cfg.num_blocks() as u32).rev() {
        let block = cfg.block(block_id);
        for i in (block.start..block.end).rev() {
            // `live` currently holds the set live after instruction `i`.
            live_ids.clear();
            let mut at = 0;
            loop {
                let found = live.find(true, at, n);
                if found == NO_POS {
                    break;
                }
                live_ids.push(found as u32);
                at = found + 1;
            }
            for (a, &va) in live_ids.iter().enumerate() {
                for &vb in &live_ids[a + 1..] {
                    graph.set(va, vb, true);
                }
            }

            let du = def_use(func, nodes[i as usize]);
            for &d in &du.defs {
                live.set(d as usize, false);
            }
            for &u in &du.uses {
                live.set(u as usize, true);
            }
        }
    }
    log::trace!("liveness: {} vars, {} instructions", n, nodes.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Kind;

    #[test]
    fn def_use_of_mov_and_add() {
        let mut func = Func::new("t");
        let a = func.new_var(Kind::Int32);
        let b = func.new_var(Kind::Int32);
        let mov = func.stmt2(OpStmt2::X86Mov, a.node(), b.node());
        let du = def_use(&func, mov);
        assert_eq!(du.defs.as_slice(), &[0]);
        assert_eq!(du.uses.as_slice(), &[1]);

        let add = func.stmt2(OpStmt2::X86Add, a.node(), b.node());
        let du = def_use(&func, add);
        assert_eq!(du.defs.as_slice(), &[0]);
        let mut uses = du.uses.clone();
        uses.sort_unstable();
        assert_eq!(uses.as_slice(), &[0, 1]);
    }

    #[test]
    fn overlapping_lifetimes_interfere() {
        let mut func = Func::new("t");
        let a = func.new_var(Kind::Int32);
        let b = func.new_var(Kind::Int32);
        let c = func.new_var(Kind::Int32);
        let one = func.int_const(Kind::Int32, 1);
        // a = 1; b = 1; a += b; c = 1; ret (a, c)  -- a and b overlap,
        // a and c overlap, b and c do not.
        let nodes = vec![
            func.stmt2(OpStmt2::X86Mov, a.node(), one),
            func.stmt2(OpStmt2::X86Mov, b.node(), one),
            func.stmt2(OpStmt2::X86Add, a.node(), b.node()),
            func.stmt2(OpStmt2::X86Mov, c.node(), one),
            func.stmtn(OpStmtN::X86Ret, &[a.node(), c.node()]),
        ];
        let mut cfg = FlowGraph::new();
        cfg.compute(&func, &nodes);
        let mut graph = InterferenceGraph::new();
        build_interference(&func, &nodes, &cfg, &mut graph);

        assert!(graph.contains(0, 1));
        assert!(graph.contains(0, 2));
        assert!(!graph.contains(1, 2));
    }

    #[test]
    fn call_results_are_defined() {
        let mut func = Func::new("t");
        let r = func.new_var(Kind::Int32);
        let x = func.new_var(Kind::Int32);
        let ft = func.functype(&[Kind::Int32], &[Kind::Int32]);
        let target = func.new_label();
        let set = func.stmt1(OpStmt1::SetLive, r.node());
        let call = func.stmtn(OpStmtN::X86Call, &[ft, target.node(), set, x.node()]);
        let du = def_use(&func, call);
        assert_eq!(du.defs.as_slice(), &[r.id().index()]);
        assert_eq!(du.uses.as_slice(), &[x.id().index()]);
    }
}
