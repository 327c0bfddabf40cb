//! Module import machinery, driven through the external-compiler seam in
//! the configuration.

mod common;

use common::*;
use wren_runtime::objects::function::ObjFn;
use wren_runtime::objects::module::{self, ObjModule};
use wren_runtime::Value;
use wren_vm::error::InterpretResult;
use wren_vm::{Instruction, Opcode, WrenConfig, WrenError, WrenVm};

/// Stands in for the compiler: ignores the source text and emits a module
/// body that stores 7 into a fresh `exported` variable.
fn compile_lib(vm: &mut WrenVm, target: *mut ObjModule, _source: &str) -> Option<*mut ObjFn> {
    let slot = module::define_variable(&mut vm.gc, target, "exported", Value::Null, None);
    assert!(slot >= 0);

    let body = build_fn(
        vm,
        target,
        Func {
            name: "lib body",
            constants: vec![Value::Num(7.0)],
            code: vec![
                Instruction::abx(Opcode::LoadK, 1, 0),
                Instruction::abx(Opcode::SetGlobal, 1, slot as u32),
                // C=1 marks the module end so IMPORTVAR can find it.
                Instruction::abc(Opcode::Return, 0, 0, 1),
            ],
            ..Func::default()
        },
    );
    Some(body)
}

fn load_lib(_vm: &mut WrenVm, name: &str) -> Option<String> {
    if name == "lib" {
        Some("var exported = 7".to_string())
    } else {
        None
    }
}

#[test]
fn import_compiles_runs_and_exposes_variables() {
    let mut vm = new_vm_with(WrenConfig {
        load_module: Some(load_lib),
        compile: Some(compile_lib),
        ..WrenConfig::default()
    });
    let module = test_module(&mut vm);

    let lib_name = str_const(&mut vm, "lib");
    let var_name = str_const(&mut vm, "exported");
    let value = run_ok(
        &mut vm,
        module,
        Func {
            constants: vec![lib_name, var_name],
            code: vec![
                Instruction::abx(Opcode::ImportModule, 1, 0),
                Instruction::abx(Opcode::ImportVar, 2, 1),
                Instruction::abc(Opcode::Return, 2, 1, 0),
            ],
            ..Func::default()
        },
    );
    assert_eq!(as_num(value), 7.0);

    // The module is cached: importing again hands back the module itself
    // without recompiling, and its variables still resolve.
    let lib_name = str_const(&mut vm, "lib");
    let var_name = str_const(&mut vm, "exported");
    let value = run_ok(
        &mut vm,
        module,
        Func {
            constants: vec![lib_name, var_name],
            code: vec![
                Instruction::abx(Opcode::ImportModule, 1, 0),
                Instruction::abx(Opcode::ImportVar, 2, 1),
                Instruction::abc(Opcode::Return, 2, 1, 0),
            ],
            ..Func::default()
        },
    );
    assert_eq!(as_num(value), 7.0);
}

#[test]
fn imported_modules_see_core_variables() {
    let mut vm = new_vm_with(WrenConfig {
        load_module: Some(load_lib),
        compile: Some(compile_lib),
        ..WrenConfig::default()
    });

    let lib_name = str_const(&mut vm, "lib");
    let module = test_module(&mut vm);
    run_ok(
        &mut vm,
        module,
        Func {
            constants: vec![lib_name],
            code: vec![
                Instruction::abx(Opcode::ImportModule, 1, 0),
                Instruction::abc(Opcode::Return, 0, 0, 0),
            ],
            ..Func::default()
        },
    );

    let lib_value = str_const(&mut vm, "lib");
    let lib = vm.get_module(lib_value);
    assert!(!lib.is_null());
    // The implicit core import makes Object visible inside the module.
    assert!(vm.find_variable(lib, "Object").is_some());
    assert_eq!(as_num(vm.find_variable(lib, "exported").unwrap()), 7.0);
}

#[test]
fn missing_modules_are_runtime_errors() {
    let mut vm = new_vm_with(WrenConfig {
        load_module: Some(load_lib),
        compile: Some(compile_lib),
        ..WrenConfig::default()
    });
    let module = test_module(&mut vm);

    let name = str_const(&mut vm, "nowhere");
    let (result, _) = run_fn(
        &mut vm,
        module,
        Func {
            constants: vec![name],
            code: vec![
                Instruction::abx(Opcode::ImportModule, 1, 0),
                Instruction::abc(Opcode::Return, 0, 0, 0),
            ],
            ..Func::default()
        },
    );
    assert_eq!(result, InterpretResult::RuntimeError);
}

#[test]
fn missing_variables_are_runtime_errors() {
    let mut vm = new_vm_with(WrenConfig {
        load_module: Some(load_lib),
        compile: Some(compile_lib),
        ..WrenConfig::default()
    });
    let module = test_module(&mut vm);

    let lib_name = str_const(&mut vm, "lib");
    let var_name = str_const(&mut vm, "unexported");
    let (result, _) = run_fn(
        &mut vm,
        module,
        Func {
            constants: vec![lib_name, var_name],
            code: vec![
                Instruction::abx(Opcode::ImportModule, 1, 0),
                Instruction::abx(Opcode::ImportVar, 2, 1),
                Instruction::abc(Opcode::Return, 2, 1, 0),
            ],
            ..Func::default()
        },
    );
    assert_eq!(result, InterpretResult::RuntimeError);
}

#[test]
fn interpret_without_a_compiler_is_a_compile_error() {
    let mut vm = new_vm();
    assert_eq!(
        vm.interpret(Some("main"), "System.print(1)"),
        InterpretResult::CompileError
    );
}

#[test]
fn interpret_runs_the_compiled_body() {
    let mut vm = new_vm_with(WrenConfig {
        compile: Some(compile_lib),
        ..WrenConfig::default()
    });
    assert_eq!(
        vm.interpret(Some("main"), "var exported = 7"),
        InterpretResult::Success
    );

    vm.ensure_slots(1);
    vm.get_variable("main", "exported", 0);
    assert_eq!(vm.get_slot_double(0), 7.0);
}

#[test]
fn interpret_results_convert_to_std_errors() {
    // Embedders threading VM failures through `?` get a std error.
    let mut vm = new_vm();
    let result: Result<(), WrenError> = vm.interpret(Some("main"), "1 + 1").into();
    assert_eq!(result, Err(WrenError::Compile));

    let mut vm = new_vm_with(WrenConfig {
        compile: Some(compile_lib),
        ..WrenConfig::default()
    });
    let result: Result<(), WrenError> = vm.interpret(Some("main"), "var exported = 7").into();
    assert_eq!(result, Ok(()));

    let runtime: Result<(), WrenError> = InterpretResult::RuntimeError.into();
    assert_eq!(runtime, Err(WrenError::Runtime));
}

#[test]
fn resolver_rewrites_module_names() {
    fn resolve(_vm: &mut WrenVm, importer: &str, name: &str) -> Option<String> {
        assert_eq!(importer, "test");
        Some(format!("{name}2"))
    }
    fn load(_vm: &mut WrenVm, name: &str) -> Option<String> {
        if name == "lib2" {
            Some(String::new())
        } else {
            None
        }
    }

    let mut vm = new_vm_with(WrenConfig {
        resolve_module: Some(resolve),
        load_module: Some(load),
        compile: Some(compile_lib),
        ..WrenConfig::default()
    });
    let module = test_module(&mut vm);

    let name = str_const(&mut vm, "lib");
    run_ok(
        &mut vm,
        module,
        Func {
            constants: vec![name],
            code: vec![
                Instruction::abx(Opcode::ImportModule, 1, 0),
                Instruction::abc(Opcode::Return, 0, 0, 0),
            ],
            ..Func::default()
        },
    );

    let resolved = str_const(&mut vm, "lib2");
    assert!(!vm.get_module(resolved).is_null());
    let unresolved = str_const(&mut vm, "lib");
    assert!(vm.get_module(unresolved).is_null());
}
