//! Single-invocation stepping tests: statement granularity, scoping,
//! evaluation order, and the value rendering used while paused.

use crate::ast::{BinaryOp, Module};
use crate::builder::ProgramBuilder;
use crate::executor::ExecCtx;
use crate::invocation::{Invocation, State, UVec3};
use crate::source::Source;
use crate::types::AddressSpace;
use std::collections::HashMap;
use std::rc::Rc;

fn start(module: Module, entry: &str) -> (ExecCtx, Invocation) {
    let module = Rc::new(module);
    let func = module.find_function(entry).unwrap();
    let mut ctx = ExecCtx::new(module.clone());
    ctx.referenced = module.referenced_globals(func);
    let one = UVec3::new(1, 1, 1);
    let invocation = Invocation::new(
        &mut ctx,
        func,
        UVec3::default(),
        UVec3::default(),
        one,
        one,
        &HashMap::new(),
    )
    .unwrap();
    (ctx, invocation)
}

/// Steps until exactly one more statement has executed.
fn run_statement(ctx: &mut ExecCtx, invocation: &mut Invocation) {
    let before = invocation.statements_executed();
    while invocation.state() == State::Ready && invocation.statements_executed() == before {
        invocation.step(ctx).unwrap();
    }
    assert_eq!(invocation.statements_executed(), before + 1);
}

fn run_to_completion(ctx: &mut ExecCtx, invocation: &mut Invocation) {
    while invocation.state() == State::Ready {
        invocation.step(ctx).unwrap();
    }
    assert_eq!(invocation.state(), State::Finished);
}

#[test]
fn statements_execute_one_at_a_time() {
    let mut b = ProgramBuilder::new();
    let i32_ty = b.ty_i32();
    let c100 = b.lit_i32(100);
    let (d1, v1) = b.decl_var("v1", i32_ty, Some(c100));
    let cm7 = b.lit_i32(-7);
    let (d2, v2) = b.decl_var("v2", i32_ty, Some(cm7));
    let v1_ref = b.local(v1);
    let c42 = b.lit_i32(42);
    let s3 = b.assign(v1_ref, c42);
    let v1_ref2 = b.local(v1);
    let v2_ref = b.local(v2);
    let sum = b.binary(BinaryOp::Add, v1_ref2, v2_ref);
    let (d4, _v3) = b.decl_var("v3", i32_ty, Some(sum));
    let v2_ref2 = b.local(v2);
    let s5 = b.increment(v2_ref2);
    let body = b.block(&[d1, d2, s3, d4, s5]);
    b.entry_point("main", [None, None, None], vec![], body);

    let (mut ctx, mut inv) = start(b.build(), "main");
    run_statement(&mut ctx, &mut inv);
    assert_eq!(inv.get_value(&mut ctx, "v1"), "100");
    assert_eq!(inv.get_value(&mut ctx, "v2"), "<identifier not found>");
    run_statement(&mut ctx, &mut inv);
    assert_eq!(inv.get_value(&mut ctx, "v2"), "-7");
    run_statement(&mut ctx, &mut inv);
    assert_eq!(inv.get_value(&mut ctx, "v1"), "42");
    run_statement(&mut ctx, &mut inv);
    assert_eq!(inv.get_value(&mut ctx, "v3"), "35");
    run_statement(&mut ctx, &mut inv);
    assert_eq!(inv.get_value(&mut ctx, "v2"), "-6");
    run_to_completion(&mut ctx, &mut inv);
    assert!(ctx.take_diags().is_empty());
}

#[test]
fn block_scopes_shadow_and_unwind() {
    let mut b = ProgramBuilder::new();
    let i32_ty = b.ty_i32();
    let c42 = b.lit_i32(42);
    let (d1, _outer) = b.decl_var("v", i32_ty, Some(c42));
    let c7 = b.lit_i32(7);
    let (d2, _inner) = b.decl_var("v", i32_ty, Some(c7));
    let inner = b.block(&[d2]);
    let s2 = b.block_stmt(inner);
    let c0 = b.lit_i32(0);
    let s3 = b.phony(c0);
    let body = b.block(&[d1, s2, s3]);
    b.entry_point("main", [None, None, None], vec![], body);

    let (mut ctx, mut inv) = start(b.build(), "main");
    run_statement(&mut ctx, &mut inv); // var v = 42
    assert_eq!(inv.get_value(&mut ctx, "v"), "42");
    run_statement(&mut ctx, &mut inv); // enter the block
    run_statement(&mut ctx, &mut inv); // var v = 7
    assert_eq!(inv.get_value(&mut ctx, "v"), "7");
    run_statement(&mut ctx, &mut inv); // phony, after the block ended
    assert_eq!(inv.get_value(&mut ctx, "v"), "42");
}

#[test]
fn operands_evaluate_left_to_right() {
    let mut b = ProgramBuilder::new();
    let i32_ty = b.ty_i32();
    let zero = b.lit_i32(0);
    let counter = b.global_var("counter", AddressSpace::Private, i32_ty, None, Some(zero));

    // fn next() -> i32 { counter = counter + 1; return counter; }
    let c_lhs = b.global(counter);
    let c_load = b.global(counter);
    let one = b.lit_i32(1);
    let bump = b.binary(BinaryOp::Add, c_load, one);
    let sa = b.assign(c_lhs, bump);
    let c_ret = b.global(counter);
    let r = b.ret(Some(c_ret));
    let next_body = b.block(&[sa, r]);
    let next = b.function("next", vec![], Some(i32_ty), next_body);

    // var x = array(1, 2, 3, 4); x[next()] -= x[next()];
    let arr_ty = b.ty_array(i32_ty, 4);
    let elems = [1, 2, 3, 4].map(|v| b.lit_i32(v));
    let init = b.construct(arr_ty, &elems);
    let (dx, x) = b.decl_var("x", arr_ty, Some(init));
    let x_lhs = b.local(x);
    let call1 = b.call(next, &[]);
    let lhs = b.index(x_lhs, call1);
    let x_rhs = b.local(x);
    let call2 = b.call(next, &[]);
    let rhs = b.index(x_rhs, call2);
    let s = b.compound_assign(BinaryOp::Subtract, lhs, rhs);
    let body = b.block(&[dx, s]);
    b.entry_point("main", [None, None, None], vec![], body);

    let (mut ctx, mut inv) = start(b.build(), "main");
    run_statement(&mut ctx, &mut inv); // var x
    // The compound assignment plus the two statements of each next() call.
    while inv.statements_executed() < 6 {
        inv.step(&mut ctx).unwrap();
    }
    // First call picked index 1, second picked index 2: x[1] = 2 - 3.
    assert_eq!(inv.get_value(&mut ctx, "counter"), "2");
    assert_eq!(
        inv.get_value(&mut ctx, "x"),
        "array<i32, 4>{\n  [0] = 1,\n  [1] = -1,\n  [2] = 3,\n  [3] = 4,\n}"
    );
    run_to_completion(&mut ctx, &mut inv);
    assert!(ctx.take_diags().is_empty());
}

#[test]
fn short_circuit_skips_side_effects() {
    let mut b = ProgramBuilder::new();
    let i32_ty = b.ty_i32();
    let bool_ty = b.ty_bool();
    let zero = b.lit_i32(0);
    let counter = b.global_var("counter", AddressSpace::Private, i32_ty, None, Some(zero));

    // fn touch() -> bool { counter = counter + 1; return true; }
    let c_lhs = b.global(counter);
    let c_load = b.global(counter);
    let one = b.lit_i32(1);
    let bump = b.binary(BinaryOp::Add, c_load, one);
    let sa = b.assign(c_lhs, bump);
    let t = b.lit_bool(true);
    let r = b.ret(Some(t));
    let touch_body = b.block(&[sa, r]);
    let touch = b.function("touch", vec![], Some(bool_ty), touch_body);

    // let a = false && touch(); let b = true || touch(); let c = true && touch();
    let f1 = b.lit_bool(false);
    let call1 = b.call(touch, &[]);
    let and = b.binary(BinaryOp::LogicalAnd, f1, call1);
    let (da, _a) = b.decl_let("a", bool_ty, and);
    let t2 = b.lit_bool(true);
    let call2 = b.call(touch, &[]);
    let or = b.binary(BinaryOp::LogicalOr, t2, call2);
    let (db, _bv) = b.decl_let("b", bool_ty, or);
    let t3 = b.lit_bool(true);
    let call3 = b.call(touch, &[]);
    let and2 = b.binary(BinaryOp::LogicalAnd, t3, call3);
    let (dc, _c) = b.decl_let("c", bool_ty, and2);
    let body = b.block(&[da, db, dc]);
    b.entry_point("main", [None, None, None], vec![], body);

    let (mut ctx, mut inv) = start(b.build(), "main");
    run_statement(&mut ctx, &mut inv);
    assert_eq!(inv.get_value(&mut ctx, "a"), "false");
    assert_eq!(inv.get_value(&mut ctx, "counter"), "0");
    run_statement(&mut ctx, &mut inv);
    assert_eq!(inv.get_value(&mut ctx, "b"), "true");
    assert_eq!(inv.get_value(&mut ctx, "counter"), "0");
    // The third declaration runs touch() for real, two statements deep.
    while inv.statements_executed() < 5 {
        inv.step(&mut ctx).unwrap();
    }
    assert_eq!(inv.get_value(&mut ctx, "c"), "true");
    assert_eq!(inv.get_value(&mut ctx, "counter"), "1");
}

#[test]
fn else_if_chain_runs_the_matching_branch() {
    let mut b = ProgramBuilder::new();
    let i32_ty = b.ty_i32();
    let zero = b.lit_i32(0);
    let g = b.global_var("g", AddressSpace::Private, i32_ty, None, Some(zero));

    let g1 = b.global(g);
    let one = b.lit_i32(1);
    let a1 = b.assign(g1, one);
    let then1 = b.block(&[a1]);
    let g2 = b.global(g);
    let two = b.lit_i32(2);
    let a2 = b.assign(g2, two);
    let then2 = b.block(&[a2]);
    let g3 = b.global(g);
    let three = b.lit_i32(3);
    let a3 = b.assign(g3, three);
    let else3 = b.block(&[a3]);
    let else3_stmt = b.block_stmt(else3);
    let t = b.lit_bool(true);
    let if2 = b.if_stmt(t, then2, Some(else3_stmt));
    let f = b.lit_bool(false);
    let if1 = b.if_stmt(f, then1, Some(if2));
    let body = b.block(&[if1]);
    b.entry_point("main", [None, None, None], vec![], body);

    let (mut ctx, mut inv) = start(b.build(), "main");
    run_to_completion(&mut ctx, &mut inv);
    assert_eq!(inv.get_value(&mut ctx, "g"), "2");
    assert!(ctx.take_diags().is_empty());
}

#[test]
fn get_value_renders_composites_and_pointers() {
    let mut b = ProgramBuilder::new();
    let i32_ty = b.ty_i32();
    let f32_ty = b.ty_f32();
    let v4 = b.ty_vec(crate::types::ScalarKind::I32, 4);
    let elems = [1, 2, 3, 4].map(|v| b.lit_i32(v));
    let init = b.construct(v4, &elems);
    let (dv, v) = b.decl_var("v", v4, Some(init));
    let s_ty = b.ty_struct("Sample", &[("count", i32_ty), ("weight", f32_ty)]);
    let five = b.lit_i32(5);
    let half = b.lit_f32(1.5);
    let s_init = b.construct(s_ty, &[five, half]);
    let (ds, _s) = b.decl_var("s", s_ty, Some(s_init));
    let v_ref = b.local(v);
    let addr = b.addr_of(v_ref, AddressSpace::Function);
    let ptr_ty = b.ty_ptr(AddressSpace::Function, v4);
    let (dp, _p) = b.decl_let("p", ptr_ty, addr);
    let body = b.block(&[dv, ds, dp]);
    b.entry_point("main", [None, None, None], vec![], body);

    let (mut ctx, mut inv) = start(b.build(), "main");
    run_statement(&mut ctx, &mut inv);
    run_statement(&mut ctx, &mut inv);
    run_statement(&mut ctx, &mut inv);
    assert_eq!(inv.get_value(&mut ctx, "v"), "vec4<i32>{1, 2, 3, 4}");
    assert_eq!(
        inv.get_value(&mut ctx, "s"),
        "Sample{\n  .count = 5,\n  .weight = 1.500000,\n}"
    );
    assert_eq!(inv.get_value(&mut ctx, "p"), "ptr<function, vec4<i32>>");
    assert_eq!(inv.get_value(&mut ctx, "missing"), "<identifier not found>");
}

#[test]
fn swizzle_lane_is_writable() {
    let mut b = ProgramBuilder::new();
    let v4 = b.ty_vec(crate::types::ScalarKind::I32, 4);
    let (dv, v) = b.decl_var("v", v4, None);
    let v_ref = b.local(v);
    let lane = b.swizzle(v_ref, &[1]);
    let c42 = b.lit_i32(42);
    let s = b.assign(lane, c42);
    let body = b.block(&[dv, s]);
    b.entry_point("main", [None, None, None], vec![], body);

    let (mut ctx, mut inv) = start(b.build(), "main");
    run_statement(&mut ctx, &mut inv); // var v: vec4<i32>
    run_statement(&mut ctx, &mut inv); // v.y = 42
    assert_eq!(inv.get_value(&mut ctx, "v"), "vec4<i32>{0, 42, 0, 0}");
    run_to_completion(&mut ctx, &mut inv);
    assert!(ctx.take_diags().is_empty());
}

#[test]
fn pointer_parameter_indexes_without_deref() {
    let mut b = ProgramBuilder::new();
    let i32_ty = b.ty_i32();
    let arr_ty = b.ty_array(i32_ty, 4);
    let ptr_ty = b.ty_ptr(AddressSpace::Function, arr_ty);

    // fn bump(p: ptr<function, array<i32, 4>>) { p[2] = p[0] + 10; }
    let p = b.param("p", ptr_ty, None);
    let p_local = p.local;
    let p_lhs = b.local(p_local);
    let two = b.lit_i32(2);
    let lhs = b.index(p_lhs, two);
    let p_rhs = b.local(p_local);
    let zero = b.lit_i32(0);
    let first = b.index(p_rhs, zero);
    let ten = b.lit_i32(10);
    let sum = b.binary(BinaryOp::Add, first, ten);
    let sa = b.assign(lhs, sum);
    let bump_body = b.block(&[sa]);
    let bump = b.function("bump", vec![p], None, bump_body);

    let elems = [1, 2, 3, 4].map(|v| b.lit_i32(v));
    let init = b.construct(arr_ty, &elems);
    let (dx, x) = b.decl_var("x", arr_ty, Some(init));
    let x_ref = b.local(x);
    let addr = b.addr_of(x_ref, AddressSpace::Function);
    let call = b.call(bump, &[addr]);
    let s_call = b.call_stmt(call);
    let body = b.block(&[dx, s_call]);
    b.entry_point("main", [None, None, None], vec![], body);

    let (mut ctx, mut inv) = start(b.build(), "main");
    run_statement(&mut ctx, &mut inv); // var x
    // The call statement plus the assignment inside bump().
    while inv.statements_executed() < 3 {
        inv.step(&mut ctx).unwrap();
    }
    assert_eq!(
        inv.get_value(&mut ctx, "x"),
        "array<i32, 4>{\n  [0] = 1,\n  [1] = 2,\n  [2] = 11,\n  [3] = 4,\n}"
    );
    run_to_completion(&mut ctx, &mut inv);
    assert!(ctx.take_diags().is_empty());
}

#[test]
fn execution_points_report_their_sources() {
    let mut b = ProgramBuilder::new();
    let i32_ty = b.ty_i32();
    b.at(3, 13);
    let one = b.lit_i32(1);
    let two = b.lit_i32(2);
    let sum = b.binary(BinaryOp::Add, one, two);
    b.at(3, 5);
    let (d1, v) = b.decl_var("v", i32_ty, Some(sum));
    b.at(4, 9);
    let v_ref = b.local(v);
    b.at(4, 5);
    let s2 = b.increment(v_ref);
    let body = b.block(&[d1, s2]);
    b.entry_point("main", [None, None, None], vec![], body);

    let (mut ctx, mut inv) = start(b.build(), "main");
    assert_eq!(inv.current_statement_source(&ctx), Some(Source::new(3, 5)));
    run_statement(&mut ctx, &mut inv);
    assert_eq!(inv.current_statement_source(&ctx), Some(Source::new(4, 5)));
    assert_eq!(inv.current_expression_source(&ctx), Some(Source::new(4, 9)));
    run_to_completion(&mut ctx, &mut inv);
    assert_eq!(inv.current_statement_source(&ctx), None);
}

#[test]
fn bitcast_reinterprets_bits() {
    let mut b = ProgramBuilder::new();
    let f32_ty = b.ty_f32();
    let bits = b.lit_i32(0x40000042);
    let cast = b.bitcast(f32_ty, bits);
    let (d, _f) = b.decl_var("f", f32_ty, Some(cast));
    let body = b.block(&[d]);
    b.entry_point("main", [None, None, None], vec![], body);

    let (mut ctx, mut inv) = start(b.build(), "main");
    run_statement(&mut ctx, &mut inv);
    assert_eq!(inv.get_value(&mut ctx, "f"), "2.000016");
}
