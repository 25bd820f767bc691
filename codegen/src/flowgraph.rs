//! A control flow graph over a lowered instruction list.
//!
//! The lowered form of a function is a flat list of statements where labels
//! mark jump destinations. A basic block begins at the first instruction, at
//! any label, and immediately after any jump, conditional jump or return;
//! it ends before the next such boundary. Successor edges come from jump
//! targets (resolved through the function's label table) plus fallthrough.

use crate::ir::{Func, Node, OpStmt1, OpStmtN, Type};
use smallvec::SmallVec;

/// A maximal straight-line range `[start, end)` of instruction indices, with
/// its successor and predecessor links.
#[derive(Clone, Debug, Default)]
pub struct BasicBlock {
    /// Index of the first instruction in the block.
    pub start: u32,
    /// Index one past the last instruction.
    pub end: u32,
    /// Successor block ids.
    pub succs: SmallVec<[u32; 2]>,
    /// Predecessor block ids.
    pub preds: SmallVec<[u32; 4]>,
}

/// What an instruction does to control flow.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Flow {
    Straight,
    Jump(u16),
    CondJump(u16),
    Ret,
}

fn flow_of(func: &Func, node: Node) -> Flow {
    match node.ty() {
        Type::Stmt1 => {
            let op = match OpStmt1::from_u16(node.raw_op()) {
                Some(op) => op,
                None => return Flow::Straight,
            };
            let target = || {
                node.child(func.code(), 0)
                    .label_index()
                    .unwrap_or(u16::MAX)
            };
            match op {
                OpStmt1::Goto | OpStmt1::X86Jmp => Flow::Jump(target()),
                _ if op.is_cond_jump() || op.is_x86_cond_jump() => Flow::CondJump(target()),
                _ => Flow::Straight,
            }
        }
        Type::StmtN => match OpStmtN::from_u16(node.raw_op()) {
            Some(OpStmtN::Return) | Some(OpStmtN::X86Ret) => Flow::Ret,
            _ => Flow::Straight,
        },
        _ => Flow::Straight,
    }
}

/// The control flow graph of one lowered instruction list.
#[derive(Default)]
pub struct FlowGraph {
    blocks: Vec<BasicBlock>,
    // label index -> block id containing the label
    label_block: Vec<Option<u32>>,
}

impl FlowGraph {
    /// Allocate a new blank control flow graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all data structures in this control flow graph.
    pub fn clear(&mut self) {
        self.blocks.clear();
        self.label_block.clear();
    }

    /// Number of basic blocks.
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// The block with the given id.
    pub fn block(&self, id: u32) -> &BasicBlock {
        &self.blocks[id as usize]
    }

    /// Iterate over the blocks in layout order.
    pub fn blocks(&self) -> impl Iterator<Item = &BasicBlock> {
        self.blocks.iter()
    }

    /// The block a label belongs to, if the label appears in the list.
    pub fn block_of_label(&self, label: u16) -> Option<u32> {
        self.label_block.get(label as usize).copied().flatten()
    }

    /// Compute the control flow graph for `nodes`, a lowered instruction
    /// list belonging to `func`.
    ///
    /// This clears and overwrites any information already stored.
    pub fn compute(&mut self, func: &Func, nodes: &[Node]) {
        self.clear();
        self.label_block.resize(func.num_labels(), None);
        if nodes.is_empty() {
            return;
        }

        // Pass 1: block boundaries.
        let mut start = 0u32;
        let mut prev_was_terminator = false;
        for (i, &node) in nodes.iter().enumerate() {
            let i = i as u32;
            let is_label = node.ty() == Type::Label;
            if i > 0 && (is_label || prev_was_terminator) {
                self.blocks.push(BasicBlock {
                    start,
                    end: i,
                    ..Default::default()
                });
                start = i;
            }
            if is_label {
                if let Some(index) = node.label_index() {
                    if let Some(slot) = self.label_block.get_mut(index as usize) {
                        *slot = Some(self.blocks.len() as u32);
                    }
                }
            }
            prev_was_terminator = flow_of(func, node) != Flow::Straight;
        }
        self.blocks.push(BasicBlock {
            start,
            end: nodes.len() as u32,
            ..Default::default()
        });

        // Pass 2: successor edges from each block's last instruction.
        for id in 0..self.blocks.len() as u32 {
            let last = nodes[self.blocks[id as usize].end as usize - 1];
            let fallthrough = if id + 1 < self.blocks.len() as u32 {
                Some(id + 1)
            } else {
                None
            };
            let mut succs: SmallVec<[u32; 2]> = SmallVec::new();
            match flow_of(func, last) {
                Flow::Straight => succs.extend(fallthrough),
                Flow::Ret => {}
                Flow::Jump(label) => succs.extend(self.block_of_label(label)),
                Flow::CondJump(label) => {
                    succs.extend(fallthrough);
                    if let Some(target) = self.block_of_label(label) {
                        if !succs.contains(&target) {
                            succs.push(target);
                        }
                    }
                }
            }
            for &s in &succs {
                self.blocks[s as usize].preds.push(id);
            }
            self.blocks[id as usize].succs = succs;
        }
        log::trace!("flowgraph: {} blocks over {} nodes", self.blocks.len(), nodes.len());
    }
}
