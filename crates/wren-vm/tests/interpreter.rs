//! Core dispatch behavior: data movement, control flow, arithmetic and
//! calls, all over hand-assembled register code.

mod common;

use common::*;
use wren_runtime::Value;
use wren_vm::error::InterpretResult;
use wren_vm::{Instruction, Opcode};

#[test]
fn load_and_move() {
    let mut vm = new_vm();
    let module = test_module(&mut vm);
    let value = run_ok(
        &mut vm,
        module,
        Func {
            constants: vec![Value::Num(42.0)],
            code: vec![
                Instruction::abx(Opcode::LoadK, 1, 0),
                Instruction::abc(Opcode::Move, 2, 1, 0),
                Instruction::abc(Opcode::Return, 2, 1, 0),
            ],
            ..Func::default()
        },
    );
    assert_eq!(as_num(value), 42.0);
}

#[test]
fn load_null_and_bool() {
    let mut vm = new_vm();
    let module = test_module(&mut vm);
    let value = run_ok(
        &mut vm,
        module,
        Func {
            code: vec![
                Instruction::abc(Opcode::LoadNull, 1, 0, 0),
                Instruction::abc(Opcode::LoadBool, 2, 1, 0),
                Instruction::abc(Opcode::Return, 2, 1, 0),
            ],
            ..Func::default()
        },
    );
    assert!(value.is_true());
}

#[test]
fn load_bool_conditionally_skips_one_instruction() {
    let mut vm = new_vm();
    let module = test_module(&mut vm);
    // LOADBOOL with C=1 skips the next instruction, so r1 stays true.
    let value = run_ok(
        &mut vm,
        module,
        Func {
            code: vec![
                Instruction::abc(Opcode::LoadBool, 1, 1, 1),
                Instruction::abc(Opcode::LoadBool, 1, 0, 0),
                Instruction::abc(Opcode::Return, 1, 1, 0),
            ],
            ..Func::default()
        },
    );
    assert!(value.is_true());
}

#[test]
fn return_without_value_is_null() {
    let mut vm = new_vm();
    let module = test_module(&mut vm);
    let value = run_ok(
        &mut vm,
        module,
        Func {
            code: vec![Instruction::abc(Opcode::Return, 0, 0, 0)],
            ..Func::default()
        },
    );
    assert!(value.is_null());
}

#[test]
fn globals_roundtrip() {
    let mut vm = new_vm();
    let module = test_module(&mut vm);
    let slot = define_global(&mut vm, module, "g", Value::Null);
    let value = run_ok(
        &mut vm,
        module,
        Func {
            constants: vec![Value::Num(7.0)],
            code: vec![
                Instruction::abx(Opcode::LoadK, 1, 0),
                Instruction::abx(Opcode::SetGlobal, 1, slot),
                Instruction::abc(Opcode::LoadNull, 2, 0, 0),
                Instruction::abx(Opcode::GetGlobal, 2, slot),
                Instruction::abc(Opcode::Return, 2, 1, 0),
            ],
            ..Func::default()
        },
    );
    assert_eq!(as_num(value), 7.0);
    assert_eq!(as_num(global(&vm, module, "g")), 7.0);
}

#[test]
fn test_and_jump_take_the_true_branch() {
    let mut vm = new_vm();
    let module = test_module(&mut vm);
    // TEST with C=1: the paired jump runs when the register is truthy.
    let value = run_ok(
        &mut vm,
        module,
        Func {
            constants: vec![Value::Num(1.0), Value::Num(2.0)],
            code: vec![
                Instruction::abc(Opcode::LoadBool, 1, 1, 0),
                Instruction::abc(Opcode::Test, 0, 1, 1),
                Instruction::sjx_jump(Opcode::Jump, 1), // to 4
                Instruction::abx(Opcode::LoadK, 2, 0),  // false branch
                Instruction::abx(Opcode::LoadK, 2, 1),  // true branch
                Instruction::abc(Opcode::Return, 2, 1, 0),
            ],
            ..Func::default()
        },
    );
    // Truthy and C=1 match, so the jump executed: the false branch was
    // skipped over and the true branch also ran.
    assert_eq!(as_num(value), 2.0);
}

#[test]
fn test_skips_jump_on_mismatch() {
    let mut vm = new_vm();
    let module = test_module(&mut vm);
    let value = run_ok(
        &mut vm,
        module,
        Func {
            constants: vec![Value::Num(5.0)],
            code: vec![
                Instruction::abc(Opcode::LoadBool, 1, 0, 0), // false
                Instruction::abc(Opcode::Test, 0, 1, 1),
                Instruction::sjx_jump(Opcode::Jump, 1),
                Instruction::abx(Opcode::LoadK, 2, 0),
                Instruction::abc(Opcode::Return, 2, 1, 0),
            ],
            ..Func::default()
        },
    );
    // Falsy but C=1: mismatch skips the jump; the fall-through runs.
    assert_eq!(as_num(value), 5.0);
}

#[test]
fn backward_jumps_loop() {
    let mut vm = new_vm();
    let module = test_module(&mut vm);
    // Count r1 down from 3 with a backwards jump.
    let value = run_ok(
        &mut vm,
        module,
        Func {
            constants: vec![Value::Num(3.0), Value::Num(1.0), Value::Num(0.0)],
            code: vec![
                Instruction::abx(Opcode::LoadK, 1, 0),
                // loop: r1 = r1 - 1
                Instruction::abck(Opcode::SubK, 1, 1, 1, false),
                // if r1 == 0, run the jump to exit
                Instruction::abck(Opcode::EqK, 1, 1, 2, false),
                Instruction::sjx_jump(Opcode::Jump, 1), // to 5 (exit)
                Instruction::sjx_jump(Opcode::Jump, -4), // back to 1
                Instruction::abc(Opcode::Return, 1, 1, 0),
            ],
            ..Func::default()
        },
    );
    assert_eq!(as_num(value), 0.0);
}

#[test]
fn arithmetic_fallbacks() {
    let mut vm = new_vm();
    let module = test_module(&mut vm);
    let value = run_ok(
        &mut vm,
        module,
        Func {
            constants: vec![Value::Num(10.0), Value::Num(4.0), Value::Num(2.0)],
            code: vec![
                Instruction::abx(Opcode::LoadK, 1, 0),
                Instruction::abx(Opcode::LoadK, 2, 1),
                Instruction::abc(Opcode::Sub, 3, 1, 2),  // 6
                Instruction::abck(Opcode::MulK, 3, 3, 2, false), // 12
                Instruction::abck(Opcode::DivK, 3, 3, 1, false), // 3
                Instruction::abc(Opcode::Add, 3, 3, 3),  // 6
                Instruction::abc(Opcode::Return, 3, 1, 0),
            ],
            ..Func::default()
        },
    );
    assert_eq!(as_num(value), 6.0);
}

#[test]
fn k_flag_preserves_operand_order() {
    let mut vm = new_vm();
    let module = test_module(&mut vm);
    // K set: the constant is the LEFT operand. 10 - r1(4) = 6.
    let value = run_ok(
        &mut vm,
        module,
        Func {
            constants: vec![Value::Num(10.0), Value::Num(4.0)],
            code: vec![
                Instruction::abx(Opcode::LoadK, 1, 1),
                Instruction::abck(Opcode::SubK, 2, 1, 0, true),
                Instruction::abc(Opcode::Return, 2, 1, 0),
            ],
            ..Func::default()
        },
    );
    assert_eq!(as_num(value), 6.0);
}

#[test]
fn rk_operands_read_the_constant_table() {
    let mut vm = new_vm();
    let module = test_module(&mut vm);
    // MUL with both operands as RK constant indices (255 + i).
    let value = run_ok(
        &mut vm,
        module,
        Func {
            constants: vec![Value::Num(6.0), Value::Num(7.0)],
            code: vec![
                Instruction::abc(Opcode::Mul, 1, 255, 256),
                Instruction::abc(Opcode::Return, 1, 1, 0),
            ],
            ..Func::default()
        },
    );
    assert_eq!(as_num(value), 42.0);
}

#[test]
fn string_concatenation_through_add() {
    let mut vm = new_vm();
    let module = test_module(&mut vm);
    let hello = str_const(&mut vm, "Hello, ");
    let world = str_const(&mut vm, "world");
    let value = run_ok(
        &mut vm,
        module,
        Func {
            constants: vec![hello, world],
            code: vec![
                Instruction::abx(Opcode::LoadK, 1, 0),
                Instruction::abx(Opcode::LoadK, 2, 1),
                Instruction::abc(Opcode::Add, 3, 1, 2),
                Instruction::abc(Opcode::Return, 3, 1, 0),
            ],
            ..Func::default()
        },
    );
    assert_eq!(as_str(value), "Hello, world");
}

#[test]
fn type_errors_abort_the_fiber() {
    let mut vm = new_vm();
    let module = test_module(&mut vm);
    let (result, _) = run_fn(
        &mut vm,
        module,
        Func {
            constants: vec![Value::Num(1.0)],
            code: vec![
                Instruction::abx(Opcode::LoadK, 1, 0),
                Instruction::abc(Opcode::LoadNull, 2, 0, 0),
                Instruction::abc(Opcode::Sub, 3, 2, 1),
                Instruction::abc(Opcode::Return, 3, 1, 0),
            ],
            ..Func::default()
        },
    );
    assert_eq!(result, InterpretResult::RuntimeError);
}

#[test]
fn comparison_skips_next_on_mismatch() {
    let mut vm = new_vm();
    let module = test_module(&mut vm);
    // Materialize `3 < 5` into a register with the LT + LOADBOOL pair the
    // compiler emits.
    let value = run_ok(
        &mut vm,
        module,
        Func {
            constants: vec![Value::Num(3.0), Value::Num(5.0)],
            code: vec![
                Instruction::abx(Opcode::LoadK, 1, 0),
                Instruction::abx(Opcode::LoadK, 2, 1),
                // expect "less": when true, next runs; when false, skipped.
                Instruction::abc(Opcode::Lt, 1, 1, 2),
                Instruction::abc(Opcode::LoadBool, 3, 1, 1), // true, skip next
                Instruction::abc(Opcode::LoadBool, 3, 0, 0), // false
                Instruction::abc(Opcode::Return, 3, 1, 0),
            ],
            ..Func::default()
        },
    );
    assert!(value.is_true());

    // And the inverse: 5 < 3 picks the false leg.
    let value = run_ok(
        &mut vm,
        module,
        Func {
            constants: vec![Value::Num(5.0), Value::Num(3.0)],
            code: vec![
                Instruction::abx(Opcode::LoadK, 1, 0),
                Instruction::abx(Opcode::LoadK, 2, 1),
                Instruction::abc(Opcode::Lt, 1, 1, 2),
                Instruction::abc(Opcode::LoadBool, 3, 1, 1),
                Instruction::abc(Opcode::LoadBool, 3, 0, 0),
                Instruction::abc(Opcode::Return, 3, 1, 0),
            ],
            ..Func::default()
        },
    );
    assert!(value.is_false());
}

#[test]
fn unary_negate_and_not() {
    let mut vm = new_vm();
    let module = test_module(&mut vm);
    let value = run_ok(
        &mut vm,
        module,
        Func {
            constants: vec![Value::Num(9.0)],
            code: vec![
                Instruction::abx(Opcode::LoadK, 1, 0),
                Instruction::abc(Opcode::Neg, 2, 1, 0),
                Instruction::abc(Opcode::Return, 2, 1, 0),
            ],
            ..Func::default()
        },
    );
    assert_eq!(as_num(value), -9.0);

    let value = run_ok(
        &mut vm,
        module,
        Func {
            code: vec![
                Instruction::abc(Opcode::LoadNull, 1, 0, 0),
                Instruction::abc(Opcode::Not, 2, 1, 0),
                Instruction::abc(Opcode::Return, 2, 1, 0),
            ],
            ..Func::default()
        },
    );
    assert!(value.is_true());
}

#[test]
fn function_calls_deliver_results_to_the_call_register() {
    let mut vm = new_vm();
    let module = test_module(&mut vm);

    // double(x) = x + x
    let double = Func {
        name: "double",
        arity: 1,
        max_slots: 4,
        code: vec![
            Instruction::abc(Opcode::Add, 2, 1, 1),
            Instruction::abc(Opcode::Return, 2, 1, 0),
        ],
        ..Func::default()
    };
    let double_fn = build_fn(&mut vm, module, double);
    let double_closure = make_closure(&mut vm, double_fn);
    let double_slot = define_global(&mut vm, module, "double", Value::obj(double_closure));

    let call1 = method(&mut vm, "call(_)");
    let value = run_ok(
        &mut vm,
        module,
        Func {
            constants: vec![Value::Num(21.0)],
            code: vec![
                Instruction::abx(Opcode::GetGlobal, 1, double_slot),
                Instruction::abx(Opcode::LoadK, 2, 0),
                Instruction::vabc(Opcode::CallK, 1, 1, call1),
                Instruction::abc(Opcode::Return, 1, 1, 0),
            ],
            ..Func::default()
        },
    );
    assert_eq!(as_num(value), 42.0);
}

#[test]
fn call_arity_is_checked() {
    let mut vm = new_vm();
    let module = test_module(&mut vm);

    let two_args = Func {
        name: "two",
        arity: 2,
        max_slots: 4,
        code: vec![Instruction::abc(Opcode::Return, 1, 1, 0)],
        ..Func::default()
    };
    let fn_obj = build_fn(&mut vm, module, two_args);
    let closure = make_closure(&mut vm, fn_obj);
    let slot = define_global(&mut vm, module, "two", Value::obj(closure));

    let call1 = method(&mut vm, "call(_)");
    let (result, _) = run_fn(
        &mut vm,
        module,
        Func {
            constants: vec![Value::Num(1.0)],
            code: vec![
                Instruction::abx(Opcode::GetGlobal, 1, slot),
                Instruction::abx(Opcode::LoadK, 2, 0),
                Instruction::vabc(Opcode::CallK, 1, 1, call1),
                Instruction::abc(Opcode::Return, 1, 1, 0),
            ],
            ..Func::default()
        },
    );
    assert_eq!(result, InterpretResult::RuntimeError);
}

#[test]
fn method_not_found_is_a_runtime_error() {
    let mut vm = new_vm();
    let module = test_module(&mut vm);
    let missing = method(&mut vm, "definitelyNotAMethod()");
    let (result, _) = run_fn(
        &mut vm,
        module,
        Func {
            constants: vec![Value::Num(1.0)],
            code: vec![
                Instruction::abx(Opcode::LoadK, 1, 0),
                Instruction::vabc(Opcode::CallK, 1, 0, missing),
                Instruction::abc(Opcode::Return, 1, 1, 0),
            ],
            ..Func::default()
        },
    );
    assert_eq!(result, InterpretResult::RuntimeError);
}

#[test]
fn fib_is_stable_over_many_iterations() {
    let mut vm = new_vm();
    let module = test_module(&mut vm);

    // fib(n, a, b): n == 0 ? a : fib(n - 1, b, a + b)
    let call3 = method(&mut vm, "call(_,_,_)");
    let fib_slot = define_global(&mut vm, module, "fib", Value::Null);
    let fib = Func {
        name: "fib",
        arity: 3,
        max_slots: 10,
        constants: vec![Value::Num(0.0), Value::Num(1.0)],
        code: vec![
            // if n == 0, jump to the return of a
            Instruction::abck(Opcode::EqK, 1, 1, 0, false),
            Instruction::sjx_jump(Opcode::Jump, 6), // to 8
            Instruction::abx(Opcode::GetGlobal, 4, fib_slot),
            Instruction::abck(Opcode::SubK, 5, 1, 1, false), // n - 1
            Instruction::abc(Opcode::Move, 6, 3, 0),         // b
            Instruction::abc(Opcode::Add, 7, 2, 3),          // a + b
            Instruction::vabc(Opcode::CallK, 4, 3, call3),
            Instruction::abc(Opcode::Return, 4, 1, 0),
            Instruction::abc(Opcode::Return, 2, 1, 0),
        ],
        ..Func::default()
    };
    let fib_fn = build_fn(&mut vm, module, fib);
    let fib_closure = make_closure(&mut vm, fib_fn);
    // SAFETY: module is live.
    unsafe {
        (&mut (*module).variables)[fib_slot as usize] = Value::obj(fib_closure);
    }

    let mut steady_state = None;
    for round in 0..50 {
        let value = run_ok(
            &mut vm,
            module,
            Func {
                constants: vec![Value::Num(60.0), Value::Num(0.0), Value::Num(1.0)],
                code: vec![
                    Instruction::abx(Opcode::GetGlobal, 1, fib_slot),
                    Instruction::abx(Opcode::LoadK, 2, 0),
                    Instruction::abx(Opcode::LoadK, 3, 1),
                    Instruction::abx(Opcode::LoadK, 4, 2),
                    Instruction::vabc(Opcode::CallK, 1, 3, call3),
                    Instruction::abc(Opcode::Return, 1, 1, 0),
                ],
                ..Func::default()
            },
        );
        assert_eq!(as_num(value), 1548008755920.0, "round {round}");

        // Allocation settles into a steady-state band across iterations.
        vm.fiber = std::ptr::null_mut();
        vm.collect_garbage();
        let live = vm.gc.bytes_allocated;
        match steady_state {
            None => steady_state = Some(live),
            Some(baseline) => assert_eq!(live, baseline, "round {round}"),
        }
    }
}
