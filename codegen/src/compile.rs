//! The compilation pipeline context.
//!
//! A [`Compiler`] owns the scratch containers every stage needs (the
//! optimizer's node pool, the lowered statement list, the flow and
//! interference graphs, the hint map and the diagnostics vector) and reuses
//! them across compilations. Stages run to completion in order; per-node
//! problems are collected as diagnostics while the pipeline continues, and
//! only an out-of-memory condition (a poisoned arena) stops it early.

use crate::flowgraph::FlowGraph;
use crate::ir::{Arch, Func, Node};
use crate::isa::x64::lower::X64Lower;
use crate::isa::x64::regs;
use crate::lower::StmtLower;
use crate::opt::Optimizer;
use crate::regalloc::{build_interference, color, InterferenceGraph};
use crate::result::{CodegenError, CodegenResult, Error};
use crate::settings::{Abi, Opt};
use log::debug;
use rustc_hash::FxHashMap;

/// Drives a function through optimization, lowering and register
/// allocation. One instance per thread; scratch state is reused across
/// functions.
pub struct Compiler {
    optimizer: Optimizer,
    nodes: Vec<Node>,
    flowgraph: FlowGraph,
    graph: InterferenceGraph,
    hints: FxHashMap<u32, u8>,
    errors: Vec<Error>,
    abi: Abi,
}

impl Compiler {
    /// Create a compiler using the host calling convention for hints.
    pub fn new() -> Compiler {
        Compiler::with_abi(Abi::Auto)
    }

    /// Create a compiler hinting registers for the given ABI.
    pub fn with_abi(abi: Abi) -> Compiler {
        Compiler {
            optimizer: Optimizer::new(),
            nodes: Vec::new(),
            flowgraph: FlowGraph::new(),
            graph: InterferenceGraph::new(),
            hints: FxHashMap::default(),
            errors: Vec::new(),
            abi: abi.autodetect(),
        }
    }

    /// Diagnostics collected so far. Their presence makes the compiled
    /// artifact unusable; the pipeline still runs to completion to gather
    /// as many as possible.
    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    /// Take ownership of the collected diagnostics, clearing the list.
    pub fn take_errors(&mut self) -> Vec<Error> {
        core::mem::take(&mut self.errors)
    }

    /// Run portable lowering: optimize the body per `flags`, then flatten
    /// structured control flow into the linear portable form stored as the
    /// `Noarch` compiled root.
    pub fn compile(&mut self, func: &mut Func, flags: Opt) -> CodegenResult<()> {
        let body = func
            .body()
            .ok_or(CodegenError::NotCompiled("function has no body"))?;
        if !func.is_good() {
            return Err(CodegenError::OutOfMemory);
        }
        let body = self.optimizer.optimize(func, body, flags);

        self.nodes.clear();
        StmtLower::new(func, &mut self.nodes, &mut self.errors).run(body);
        let root = func.block(&self.nodes);
        debug!(
            "compiled {} to {} portable statements",
            func.name(),
            self.nodes.len()
        );
        self.nodes.clear();
        func.set_compiled(Arch::Noarch, root);

        if func.is_good() {
            Ok(())
        } else {
            Err(CodegenError::OutOfMemory)
        }
    }

    /// Run the full x64 pipeline: portable lowering, x64 lowering, control
    /// flow analysis, and register allocation. The lowered statement list
    /// becomes the `X64` compiled root and the register assignment is
    /// stored in the function.
    pub fn compile_x64(&mut self, func: &mut Func, flags: Opt) -> CodegenResult<()> {
        if func.compiled(Arch::Noarch).is_none() {
            self.compile(func, flags)?;
        }
        let portable = func
            .compiled(Arch::Noarch)
            .expect("portable form just compiled");

        self.nodes.clear();
        self.hints.clear();
        X64Lower::new(
            func,
            &mut self.nodes,
            &mut self.errors,
            &mut self.hints,
            self.abi,
        )
        .run(portable);

        self.flowgraph.compute(func, &self.nodes);
        build_interference(func, &self.nodes, &self.flowgraph, &mut self.graph);
        let alloc = color(&self.graph, &regs::ALLOCATABLE, &self.hints);
        debug!(
            "{}: {} x64 statements, {} blocks, {} spills",
            func.name(),
            self.nodes.len(),
            self.flowgraph.num_blocks(),
            alloc.spilled.len()
        );
        func.set_locations(alloc.locs);

        let root = func.block(&self.nodes);
        self.nodes.clear();
        func.set_compiled(Arch::X64, root);

        if func.is_good() {
            Ok(())
        } else {
            Err(CodegenError::OutOfMemory)
        }
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Kind, Op2, OpStmt2, VarLoc};

    // while (i < 10) { sum += i; i += 1; } return sum;
    fn sum_loop(func: &mut Func) {
        let i = func.new_var(Kind::Int32);
        let sum = func.new_var(Kind::Int32);
        let zero = func.int_const(Kind::Int32, 0);
        let ten = func.int_const(Kind::Int32, 10);
        let one = func.int_const(Kind::Int32, 1);

        let init_i = func.assign(OpStmt2::Assign, i.node(), zero);
        let init_sum = func.assign(OpStmt2::Assign, sum.node(), zero);
        let test = func.binary(Op2::Lt, i.node(), ten);
        let add = func.assign(OpStmt2::AddAssign, sum.node(), i.node());
        let step = func.assign(OpStmt2::AddAssign, i.node(), one);
        let body = func.block(&[add, step]);
        let void = func.void_expr();
        let loop_ = func.for_stmt(init_i, test, void, body);
        let ret = func.return_(&[sum.node()]);
        let root = func.block(&[init_sum, loop_, ret]);
        func.set_body(root);
    }

    #[test]
    fn portable_compilation_produces_a_linear_form() {
        let mut func = Func::new("sum");
        sum_loop(&mut func);
        let mut compiler = Compiler::new();
        compiler.compile(&mut func, Opt::default()).unwrap();
        assert!(compiler.errors().is_empty());
        let root = func.compiled(Arch::Noarch).unwrap();
        assert!(root.children(func.code()) > 0);
        assert!(func.compiled(Arch::X64).is_none());
    }

    #[test]
    fn x64_compilation_allocates_registers() {
        let mut func = Func::new("sum");
        sum_loop(&mut func);
        let mut compiler = Compiler::with_abi(Abi::SysV);
        compiler.compile_x64(&mut func, Opt::default()).unwrap();
        assert!(compiler.errors().is_empty(), "{:?}", compiler.errors());
        assert!(func.compiled(Arch::X64).is_some());
        // Both user variables got registers, and different ones (their
        // lifetimes overlap inside the loop).
        let i = crate::ir::VarId::new(0);
        let sum = crate::ir::VarId::new(1);
        let (ri, rs) = match (func.location(i), func.location(sum)) {
            (VarLoc::Reg(a), VarLoc::Reg(b)) => (a, b),
            other => panic!("expected registers, got {other:?}"),
        };
        assert_ne!(ri, rs);
    }

    #[test]
    fn missing_body_is_an_error() {
        let mut func = Func::new("empty");
        let err = Compiler::new().compile(&mut func, Opt::default());
        assert!(matches!(err, Err(CodegenError::NotCompiled(_))));
    }

    #[test]
    fn return_value_prefers_rax() {
        let mut func = Func::new("ret42");
        let v = func.new_var(Kind::Int32);
        let c = func.int_const(Kind::Int32, 42);
        let assign = func.assign(OpStmt2::Assign, v.node(), c);
        let ret = func.return_(&[v.node()]);
        let root = func.block(&[assign, ret]);
        func.set_body(root);
        let mut compiler = Compiler::with_abi(Abi::SysV);
        compiler.compile_x64(&mut func, Opt::default()).unwrap();
        assert_eq!(
            func.location(crate::ir::VarId::new(0)),
            VarLoc::Reg(regs::RET)
        );
    }
}
