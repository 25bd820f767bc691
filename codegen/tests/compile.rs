//! End-to-end pipeline tests: build IR, compile to x64, and encode bytes.

use ember_codegen::ir::{Func, Kind, Op2, OpStmt2, VarLoc};
use ember_codegen::isa::x64::regs;
use ember_codegen::settings::{Abi, Opt};
use ember_codegen::{Assembler, Compiler};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn constant_body_becomes_mov_and_ret() {
    init_logging();
    let mut func = Func::new("six");
    let v = func.new_var(Kind::Int32);
    let one = func.int_const(Kind::Int32, 1);
    let two = func.int_const(Kind::Int32, 2);
    let three = func.int_const(Kind::Int32, 3);
    let sum12 = func.binary(Op2::Add, one, two);
    let sum = func.binary(Op2::Add, sum12, three);
    let assign = func.assign(OpStmt2::Assign, v.node(), sum);
    let ret = func.return_(&[v.node()]);
    let root = func.block(&[assign, ret]);
    func.set_body(root);

    let mut compiler = Compiler::with_abi(Abi::SysV);
    compiler.compile_x64(&mut func, Opt::default()).unwrap();
    assert!(compiler.errors().is_empty(), "{:?}", compiler.errors());

    let mut asm = Assembler::new();
    let bytes = asm.x64(&func).unwrap();
    assert!(asm.errors().is_empty(), "{:?}", asm.errors());

    // Folding collapses the sum; the return hint lands the value in eax:
    //   mov eax, 6 ; ret
    assert_eq!(bytes, vec![0xb8, 0x06, 0x00, 0x00, 0x00, 0xc3]);
}

#[test]
fn counted_loop_assembles_without_diagnostics() {
    init_logging();
    let mut func = Func::new("sum_to_ten");
    let i = func.new_var(Kind::Int32);
    let sum = func.new_var(Kind::Int32);
    let zero = func.int_const(Kind::Int32, 0);
    let ten = func.int_const(Kind::Int32, 10);
    let one = func.int_const(Kind::Int32, 1);

    let init_sum = func.assign(OpStmt2::Assign, sum.node(), zero);
    let init_i = func.assign(OpStmt2::Assign, i.node(), zero);
    let test = func.binary(Op2::Lt, i.node(), ten);
    let acc = func.assign(OpStmt2::AddAssign, sum.node(), i.node());
    let step = func.assign(OpStmt2::AddAssign, i.node(), one);
    let body = func.block(&[acc, step]);
    let void = func.void_expr();
    let loop_ = func.for_stmt(init_i, test, void, body);
    let ret = func.return_(&[sum.node()]);
    let root = func.block(&[init_sum, loop_, ret]);
    func.set_body(root);

    let mut compiler = Compiler::with_abi(Abi::SysV);
    compiler.compile_x64(&mut func, Opt::default()).unwrap();
    assert!(compiler.errors().is_empty(), "{:?}", compiler.errors());

    let mut asm = Assembler::new();
    let bytes = asm.x64(&func).unwrap();
    assert!(asm.errors().is_empty(), "{:?}", asm.errors());
    assert!(!bytes.is_empty());
    // The function ends with the return.
    assert_eq!(*bytes.last().unwrap(), 0xc3);
}

#[test]
fn branches_resolve_across_the_join() {
    init_logging();
    // if (a < b) { r = a; } else { r = b; } return r;
    let mut func = Func::new("min");
    let a = func.new_var(Kind::Int64);
    let b = func.new_var(Kind::Int64);
    let r = func.new_var(Kind::Int64);
    let one = func.int_const(Kind::Int64, 1);
    let two = func.int_const(Kind::Int64, 2);

    let seed_a = func.assign(OpStmt2::Assign, a.node(), one);
    let seed_b = func.assign(OpStmt2::Assign, b.node(), two);
    let test = func.binary(Op2::Lt, a.node(), b.node());
    let then = func.assign(OpStmt2::Assign, r.node(), a.node());
    let els = func.assign(OpStmt2::Assign, r.node(), b.node());
    let branch = func.if_stmt(test, then, Some(els));
    let ret = func.return_(&[r.node()]);
    let root = func.block(&[seed_a, seed_b, branch, ret]);
    func.set_body(root);

    let mut compiler = Compiler::with_abi(Abi::SysV);
    compiler.compile_x64(&mut func, Opt::default()).unwrap();
    assert!(compiler.errors().is_empty(), "{:?}", compiler.errors());

    let mut asm = Assembler::new();
    let bytes = asm.x64(&func).unwrap();
    assert!(asm.errors().is_empty(), "{:?}", asm.errors());
    assert!(!bytes.is_empty());
}

#[test]
fn register_pressure_spills_and_still_assembles() {
    init_logging();
    // Fifteen mutually-overlapping live ranges, one more than the
    // allocatable bank: seed every variable, then fold them all into the
    // first. Something must spill, and the emitted bytes must stay valid.
    let mut func = Func::new("pressure");
    let vars: Vec<_> = (0..regs::ALLOCATABLE.len() + 1)
        .map(|_| func.new_var(Kind::Int64))
        .collect();
    let mut stmts = Vec::new();
    for (i, v) in vars.iter().enumerate() {
        let c = func.int_const(Kind::Int64, i as i64);
        stmts.push(func.assign(OpStmt2::Assign, v.node(), c));
    }
    for v in &vars[1..] {
        stmts.push(func.assign(OpStmt2::AddAssign, vars[0].node(), v.node()));
    }
    stmts.push(func.return_(&[vars[0].node()]));
    let root = func.block(&stmts);
    func.set_body(root);

    let mut compiler = Compiler::with_abi(Abi::SysV);
    compiler.compile_x64(&mut func, Opt::default()).unwrap();
    assert!(compiler.errors().is_empty(), "{:?}", compiler.errors());

    let spills = func
        .locations()
        .iter()
        .filter(|loc| matches!(loc, VarLoc::Stack(_)))
        .count();
    assert_eq!(spills, 1);
    // Every assigned register comes from the allocatable bank, and no two
    // of these mutually-live variables share one.
    let mut assigned: Vec<u8> = func
        .locations()
        .iter()
        .filter_map(|loc| match loc {
            VarLoc::Reg(r) => Some(*r),
            _ => None,
        })
        .collect();
    for reg in &assigned {
        assert!(regs::ALLOCATABLE.contains(reg));
    }
    assigned.sort_unstable();
    let before = assigned.len();
    assigned.dedup();
    assert_eq!(assigned.len(), before);

    let mut asm = Assembler::new();
    let bytes = asm.x64(&func).unwrap();
    assert!(asm.errors().is_empty(), "{:?}", asm.errors());
    assert_eq!(*bytes.last().unwrap(), 0xc3);
}

#[test]
fn disabled_folding_keeps_the_arithmetic() {
    init_logging();
    let mut func = Func::new("unfolded");
    let v = func.new_var(Kind::Int32);
    let one = func.int_const(Kind::Int32, 1);
    let two = func.int_const(Kind::Int32, 2);
    let sum = func.binary(Op2::Add, one, two);
    let assign = func.assign(OpStmt2::Assign, v.node(), sum);
    let ret = func.return_(&[v.node()]);
    let root = func.block(&[assign, ret]);
    func.set_body(root);

    let mut compiler = Compiler::with_abi(Abi::SysV);
    compiler.compile_x64(&mut func, Opt::CHECK_ALL).unwrap();
    assert!(compiler.errors().is_empty(), "{:?}", compiler.errors());

    let mut asm = Assembler::new();
    let bytes = asm.x64(&func).unwrap();
    assert!(asm.errors().is_empty(), "{:?}", asm.errors());
    // mov v, 1 ; add v, 2 ; ret -- longer than the folded form.
    assert!(bytes.len() > 6);
    assert_eq!(*bytes.last().unwrap(), 0xc3);
}
