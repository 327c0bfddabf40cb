//! The embedding surface: slots, handles, call handles, foreign methods
//! and classes, and host error reporting.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use common::*;
use wren_runtime::Value;
use wren_vm::api::WrenType;
use wren_vm::config::{ForeignClassMethods, WrenErrorKind};
use wren_vm::error::InterpretResult;
use wren_vm::{Instruction, Opcode, WrenConfig, WrenVm};

#[test]
fn slots_roundtrip_scalars_and_strings() {
    let mut vm = new_vm();
    vm.ensure_slots(4);
    assert!(vm.slot_count() >= 4);

    vm.set_slot_bool(0, true);
    vm.set_slot_double(1, 6.5);
    vm.set_slot_null(2);
    vm.set_slot_string(3, "hello");

    assert_eq!(vm.get_slot_type(0), WrenType::Bool);
    assert_eq!(vm.get_slot_type(1), WrenType::Num);
    assert_eq!(vm.get_slot_type(2), WrenType::Null);
    assert_eq!(vm.get_slot_type(3), WrenType::String);

    assert!(vm.get_slot_bool(0));
    assert_eq!(vm.get_slot_double(1), 6.5);
    assert_eq!(vm.get_slot_string(3), "hello");
    assert_eq!(vm.get_slot_bytes(3), b"hello");
}

#[test]
fn slot_lists_and_maps() {
    let mut vm = new_vm();
    vm.ensure_slots(4);

    vm.set_slot_new_list(0);
    vm.set_slot_double(1, 1.0);
    vm.insert_in_list(0, -1, 1);
    vm.set_slot_double(1, 2.0);
    vm.insert_in_list(0, -1, 1);
    assert_eq!(vm.get_list_count(0), 2);

    vm.get_list_element(0, 1, 2);
    assert_eq!(vm.get_slot_double(2), 2.0);

    vm.set_slot_double(2, 9.0);
    vm.set_list_element(0, 0, 2);
    vm.get_list_element(0, 0, 3);
    assert_eq!(vm.get_slot_double(3), 9.0);

    vm.set_slot_new_map(0);
    vm.set_slot_string(1, "key");
    vm.set_slot_double(2, 5.0);
    vm.set_map_value(0, 1, 2);
    assert_eq!(vm.get_map_count(0), 1);
    assert!(vm.get_map_contains_key(0, 1));

    vm.get_map_value(0, 1, 3);
    assert_eq!(vm.get_slot_double(3), 5.0);

    vm.remove_map_value(0, 1, 3);
    assert_eq!(vm.get_slot_double(3), 5.0);
    assert_eq!(vm.get_map_count(0), 0);
    assert!(!vm.get_map_contains_key(0, 1));
}

#[test]
fn module_variable_lookup() {
    let mut vm = new_vm();
    let module = test_module(&mut vm);
    define_global(&mut vm, module, "answer", Value::Num(42.0));

    assert!(vm.has_module("test"));
    assert!(!vm.has_module("missing"));
    assert!(vm.has_variable("test", "answer"));
    assert!(!vm.has_variable("test", "question"));

    vm.ensure_slots(1);
    vm.get_variable("test", "answer", 0);
    assert_eq!(vm.get_slot_double(0), 42.0);
}

#[test]
fn call_handles_invoke_methods_on_host_data() {
    let mut vm = new_vm();

    vm.ensure_slots(1);
    vm.set_slot_new_list(0);
    let list_handle = vm.get_slot_handle(0);

    let add = vm.make_call_handle("add(_)");
    let count = vm.make_call_handle("count");

    vm.ensure_slots(2);
    vm.set_slot_handle(0, list_handle);
    vm.set_slot_double(1, 9.0);
    assert_eq!(vm.call(add), InterpretResult::Success);
    // add(_) returns the appended element.
    assert_eq!(vm.get_slot_double(0), 9.0);

    vm.ensure_slots(1);
    vm.set_slot_handle(0, list_handle);
    assert_eq!(vm.call(count), InterpretResult::Success);
    assert_eq!(vm.get_slot_double(0), 1.0);

    vm.release_handle(add);
    vm.release_handle(count);
    vm.release_handle(list_handle);
}

// =============================================================================
// Foreign methods
// =============================================================================

fn bind_triple(
    _vm: &mut WrenVm,
    _module: &str,
    class_name: &str,
    _is_static: bool,
    signature: &str,
) -> Option<wren_vm::ForeignMethodFn> {
    if class_name == "Ext" && signature == "triple(_)" {
        Some(triple)
    } else {
        None
    }
}

fn triple(vm: &mut WrenVm) {
    let n = vm.get_slot_double(1);
    vm.set_slot_double(0, n * 3.0);
}

#[test]
fn foreign_methods_bind_and_run() {
    let mut vm = new_vm_with(WrenConfig {
        bind_foreign_method: Some(bind_triple),
        ..WrenConfig::default()
    });
    let module = test_module(&mut vm);
    let object = {
        let core = vm.core_module();
        vm.find_variable(core, "Object").expect("Object")
    };

    let class_name = str_const(&mut vm, "Ext");
    let signature = str_const(&mut vm, "triple(_)");
    let triple_sym = method(&mut vm, "triple(_)") as i32;
    let value = run_ok(
        &mut vm,
        module,
        Func {
            max_slots: 8,
            constants: vec![class_name, object, signature, Value::Num(5.0)],
            code: vec![
                Instruction::abx(Opcode::LoadK, 1, 0),
                Instruction::abx(Opcode::LoadK, 2, 1),
                Instruction::asbx(Opcode::Class, 2, 0),
                // bind the foreign method: signature string as the value
                Instruction::abc(Opcode::Move, 3, 1, 0),
                Instruction::abx(Opcode::LoadK, 2, 2),
                Instruction::asbx(Opcode::Method, 3, triple_sym),
                // instance.triple(5)
                Instruction::abc(Opcode::Move, 4, 3, 0),
                Instruction::abx(Opcode::Construct, 4, 0),
                Instruction::abx(Opcode::LoadK, 5, 3),
                Instruction::vabc(Opcode::CallK, 4, 1, triple_sym as u32),
                Instruction::abc(Opcode::Return, 4, 1, 0),
            ],
            ..Func::default()
        },
    );
    assert_eq!(as_num(value), 15.0);
}

#[test]
fn unbound_foreign_methods_abort() {
    let mut vm = new_vm(); // no binder configured
    let module = test_module(&mut vm);
    let object = {
        let core = vm.core_module();
        vm.find_variable(core, "Object").expect("Object")
    };

    let class_name = str_const(&mut vm, "Ext");
    let signature = str_const(&mut vm, "missing()");
    let missing_sym = method(&mut vm, "missing()") as i32;
    let (result, _) = run_fn(
        &mut vm,
        module,
        Func {
            constants: vec![class_name, object, signature],
            code: vec![
                Instruction::abx(Opcode::LoadK, 1, 0),
                Instruction::abx(Opcode::LoadK, 2, 1),
                Instruction::asbx(Opcode::Class, 2, 0),
                Instruction::abc(Opcode::Move, 3, 1, 0),
                Instruction::abx(Opcode::LoadK, 2, 2),
                Instruction::asbx(Opcode::Method, 3, missing_sym),
                Instruction::abc(Opcode::Return, 0, 0, 0),
            ],
            ..Func::default()
        },
    );
    assert_eq!(result, InterpretResult::RuntimeError);
}

// =============================================================================
// Foreign classes
// =============================================================================

static FINALIZED: AtomicUsize = AtomicUsize::new(0);

fn bind_counter_class(
    _vm: &mut WrenVm,
    _module: &str,
    class_name: &str,
) -> ForeignClassMethods {
    if class_name == "Counter" {
        ForeignClassMethods {
            allocate: Some(counter_allocate),
            finalize: Some(counter_finalize),
        }
    } else {
        ForeignClassMethods::default()
    }
}

fn counter_allocate(vm: &mut WrenVm) {
    let data = vm.set_slot_new_foreign(0, 0, 8);
    // SAFETY: eight zeroed bytes were just allocated.
    unsafe { *(data as *mut u64) = 42 };
}

fn counter_finalize(_data: *mut u8) {
    FINALIZED.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn foreign_classes_allocate_and_finalize() {
    let mut vm = new_vm_with(WrenConfig {
        bind_foreign_class: Some(bind_counter_class),
        ..WrenConfig::default()
    });
    let module = test_module(&mut vm);
    let object = {
        let core = vm.core_module();
        vm.find_variable(core, "Object").expect("Object")
    };

    let before = FINALIZED.load(Ordering::SeqCst);

    let class_name = str_const(&mut vm, "Counter");
    let value = run_ok(
        &mut vm,
        module,
        Func {
            constants: vec![class_name, object],
            code: vec![
                Instruction::abx(Opcode::LoadK, 1, 0),
                Instruction::abx(Opcode::LoadK, 2, 1),
                // foreign class (negative field count)
                Instruction::asbx(Opcode::Class, 2, -1),
                // construct with the foreign flag
                Instruction::abx(Opcode::Construct, 1, 1),
                Instruction::abc(Opcode::Return, 1, 1, 0),
            ],
            ..Func::default()
        },
    );

    assert!(value.is_foreign());
    // SAFETY: the foreign object is live; the allocator zero-filled and then
    // wrote its marker.
    unsafe {
        let data = (*value.as_foreign()).data.as_ptr() as *const u64;
        assert_eq!(*data, 42);
    }

    // Dropping every reference lets the sweep run the finalizer.
    vm.fiber = std::ptr::null_mut();
    vm.collect_garbage();
    assert_eq!(FINALIZED.load(Ordering::SeqCst), before + 1);
}

#[test]
fn foreign_classes_may_not_be_subclassed() {
    let mut vm = new_vm_with(WrenConfig {
        bind_foreign_class: Some(bind_counter_class),
        ..WrenConfig::default()
    });
    let module = test_module(&mut vm);
    let object = {
        let core = vm.core_module();
        vm.find_variable(core, "Object").expect("Object")
    };

    let counter_name = str_const(&mut vm, "Counter");
    let sub_name = str_const(&mut vm, "Sub");
    let (result, _) = run_fn(
        &mut vm,
        module,
        Func {
            constants: vec![counter_name, object, sub_name],
            code: vec![
                Instruction::abx(Opcode::LoadK, 1, 0),
                Instruction::abx(Opcode::LoadK, 2, 1),
                Instruction::asbx(Opcode::Class, 2, -1),
                // class Sub is Counter, which is rejected
                Instruction::abc(Opcode::Move, 3, 1, 0),
                Instruction::abx(Opcode::LoadK, 2, 2),
                Instruction::abc(Opcode::Move, 1, 2, 0),
                Instruction::abc(Opcode::Move, 2, 3, 0),
                Instruction::asbx(Opcode::Class, 2, 0),
                Instruction::abc(Opcode::Return, 0, 0, 0),
            ],
            ..Func::default()
        },
    );
    assert_eq!(result, InterpretResult::RuntimeError);
}

// =============================================================================
// Host error reporting
// =============================================================================

static ERRORS: Mutex<Vec<(WrenErrorKind, Option<String>, i32, String)>> = Mutex::new(Vec::new());

fn record_error(
    _vm: &mut WrenVm,
    kind: WrenErrorKind,
    module: Option<&str>,
    line: i32,
    message: &str,
) {
    ERRORS
        .lock()
        .unwrap()
        .push((kind, module.map(str::to_string), line, message.to_string()));
}

#[test]
fn uncaught_errors_report_a_stack_trace() {
    ERRORS.lock().unwrap().clear();

    let mut vm = new_vm_with(WrenConfig {
        error: Some(record_error),
        ..WrenConfig::default()
    });
    let module = test_module(&mut vm);
    let fiber_class = {
        let core = vm.core_module();
        vm.find_variable(core, "Fiber").expect("Fiber")
    };

    let oops = str_const(&mut vm, "oops");
    let abort_sym = method(&mut vm, "abort(_)");
    let (result, _) = run_fn(
        &mut vm,
        module,
        Func {
            name: "exploder",
            constants: vec![fiber_class, oops],
            code: vec![
                Instruction::abx(Opcode::LoadK, 1, 0),
                Instruction::abx(Opcode::LoadK, 2, 1),
                Instruction::vabc(Opcode::CallK, 1, 1, abort_sym),
                Instruction::abc(Opcode::Return, 0, 0, 0),
            ],
            ..Func::default()
        },
    );
    assert_eq!(result, InterpretResult::RuntimeError);

    let errors = ERRORS.lock().unwrap();
    assert!(!errors.is_empty());
    let (kind, module_name, _, message) = &errors[0];
    assert_eq!(*kind, WrenErrorKind::Runtime);
    assert!(module_name.is_none());
    assert_eq!(message, "oops");

    // One stack-trace line for the erroring function in the test module.
    let trace: Vec<_> = errors
        .iter()
        .filter(|(kind, _, _, _)| *kind == WrenErrorKind::StackTrace)
        .collect();
    assert_eq!(trace.len(), 1);
    assert_eq!(trace[0].1.as_deref(), Some("test"));
    assert_eq!(trace[0].3, "exploder");
}

// =============================================================================
// Writing
// =============================================================================

static PRINTED: Mutex<String> = Mutex::new(String::new());

fn record_write(_vm: &mut WrenVm, text: &str) {
    PRINTED.lock().unwrap().push_str(text);
}

#[test]
fn system_print_goes_through_the_write_callback() {
    PRINTED.lock().unwrap().clear();

    let mut vm = new_vm_with(WrenConfig {
        write: Some(record_write),
        ..WrenConfig::default()
    });
    let module = test_module(&mut vm);
    let system_class = {
        let core = vm.core_module();
        vm.find_variable(core, "System").expect("System")
    };

    let print_sym = method(&mut vm, "print(_)");
    run_ok(
        &mut vm,
        module,
        Func {
            constants: vec![system_class, Value::Num(3.5)],
            code: vec![
                Instruction::abx(Opcode::LoadK, 1, 0),
                Instruction::abx(Opcode::LoadK, 2, 1),
                Instruction::vabc(Opcode::CallK, 1, 1, print_sym),
                Instruction::abc(Opcode::Return, 0, 0, 0),
            ],
            ..Func::default()
        },
    );
    assert_eq!(PRINTED.lock().unwrap().as_str(), "3.5\n");
}

#[test]
fn abort_fiber_from_a_foreign_method() {
    fn bind_abort(
        _vm: &mut WrenVm,
        _module: &str,
        class_name: &str,
        _is_static: bool,
        signature: &str,
    ) -> Option<wren_vm::ForeignMethodFn> {
        if class_name == "Ext" && signature == "explode()" {
            Some(explode)
        } else {
            None
        }
    }
    fn explode(vm: &mut WrenVm) {
        vm.set_slot_string(0, "kaboom");
        vm.abort_fiber(0);
    }

    let mut vm = new_vm_with(WrenConfig {
        bind_foreign_method: Some(bind_abort),
        ..WrenConfig::default()
    });
    let module = test_module(&mut vm);
    let object = {
        let core = vm.core_module();
        vm.find_variable(core, "Object").expect("Object")
    };

    let class_name = str_const(&mut vm, "Ext");
    let signature = str_const(&mut vm, "explode()");
    let explode_sym = method(&mut vm, "explode()") as i32;
    let (result, _) = run_fn(
        &mut vm,
        module,
        Func {
            constants: vec![class_name, object, signature],
            code: vec![
                Instruction::abx(Opcode::LoadK, 1, 0),
                Instruction::abx(Opcode::LoadK, 2, 1),
                Instruction::asbx(Opcode::Class, 2, 0),
                Instruction::abc(Opcode::Move, 3, 1, 0),
                Instruction::abx(Opcode::LoadK, 2, 2),
                Instruction::asbx(Opcode::Method, 3, explode_sym),
                Instruction::abc(Opcode::Move, 4, 3, 0),
                Instruction::abx(Opcode::Construct, 4, 0),
                Instruction::vabc(Opcode::CallK, 4, 0, explode_sym as u32),
                Instruction::abc(Opcode::Return, 0, 0, 0),
            ],
            ..Func::default()
        },
    );
    assert_eq!(result, InterpretResult::RuntimeError);
}
