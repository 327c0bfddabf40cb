//! Shared helpers for assembling function objects and running them.
//!
//! Tests play the role of the external compiler: they build `ObjFn`s with
//! raw register instructions and hand them to the VM.

#![allow(dead_code)]

use wren_runtime::objects::closure::{self, CompilerUpvalue, ObjClosure};
use wren_runtime::objects::function::{self, ObjFn};
use wren_runtime::objects::map;
use wren_runtime::objects::module::{self, ObjModule};
use wren_runtime::objects::string;
use wren_runtime::Value;
use wren_vm::error::InterpretResult;
use wren_vm::{Instruction, WrenConfig, WrenVm};

pub fn new_vm() -> WrenVm {
    WrenVm::new(WrenConfig::default())
}

pub fn new_vm_with(config: WrenConfig) -> WrenVm {
    WrenVm::new(config)
}

/// A function under assembly.
pub struct Func {
    pub name: &'static str,
    pub arity: usize,
    pub max_slots: usize,
    pub num_upvalues: usize,
    pub constants: Vec<Value>,
    pub code: Vec<Instruction>,
}

impl Default for Func {
    fn default() -> Self {
        Func {
            name: "test",
            arity: 0,
            max_slots: 16,
            num_upvalues: 0,
            constants: Vec::new(),
            code: Vec::new(),
        }
    }
}

/// Materializes a `Func` into a heap function object belonging to `module`.
pub fn build_fn(vm: &mut WrenVm, module: *mut ObjModule, func: Func) -> *mut ObjFn {
    let code_len = func.code.len();
    let fn_obj = function::new(&mut vm.gc, module, func.max_slots);
    // SAFETY: just allocated; nothing else references it yet.
    unsafe {
        (*fn_obj).arity = func.arity;
        (*fn_obj).num_upvalues = func.num_upvalues;
        (*fn_obj).constants = func.constants;
        (*fn_obj).code = func.code;
        // Watermark at the frame size: overload scratch lands above every
        // register the function uses.
        (*fn_obj).stack_top = vec![func.max_slots as u32; code_len];
        (*fn_obj).debug.source_lines = vec![1; code_len];
        (*fn_obj).debug.name = func.name.to_string();
    }
    fn_obj
}

/// Wraps a function in a plain closure.
pub fn make_closure(vm: &mut WrenVm, fn_obj: *mut ObjFn) -> *mut ObjClosure {
    closure::new(&mut vm.gc, fn_obj)
}

/// Builds a compiler-style prototype closure carrying capture descriptors
/// for use as a `CLOSURE` constant.
pub fn make_proto(
    vm: &mut WrenVm,
    fn_obj: *mut ObjFn,
    captures: Vec<CompilerUpvalue>,
) -> *mut ObjClosure {
    closure::new_proto(&mut vm.gc, fn_obj, captures)
}

/// Creates a scratch module for a test, registered in the VM's module map
/// so it (and everything its variables reference) survives collections.
pub fn test_module(vm: &mut WrenVm) -> *mut ObjModule {
    let name = string::new(&mut vm.gc, "test");
    vm.gc.push_root(name);
    let module = module::new(&mut vm.gc, name);
    vm.gc.push_root(module);
    map::set(&mut vm.gc, vm.modules, Value::obj(name), Value::obj(module));
    vm.gc.pop_root();
    vm.gc.pop_root();
    module
}

/// Defines a module variable, returning its global symbol for `GETGLOBAL`.
pub fn define_global(vm: &mut WrenVm, module: *mut ObjModule, name: &str, value: Value) -> u32 {
    let symbol = module::define_variable(&mut vm.gc, module, name, value, None);
    assert!(symbol >= 0, "defining {name} failed");
    symbol as u32
}

pub fn global(vm: &WrenVm, module: *mut ObjModule, name: &str) -> Value {
    vm.find_variable(module, name).expect("global should exist")
}

/// Assembles `func` in `module`, runs it on a fresh fiber and returns the
/// interpret result plus the value the fiber completed with.
pub fn run_fn(vm: &mut WrenVm, module: *mut ObjModule, func: Func) -> (InterpretResult, Value) {
    let fn_obj = build_fn(vm, module, func);
    vm.gc.push_root(fn_obj);
    let closure = make_closure(vm, fn_obj);
    vm.gc.pop_root();
    let result = vm.run_closure(closure);
    (result, vm.last_fiber_result())
}

/// Like `run_fn` but asserts success.
pub fn run_ok(vm: &mut WrenVm, module: *mut ObjModule, func: Func) -> Value {
    let (result, value) = run_fn(vm, module, func);
    assert_eq!(result, InterpretResult::Success, "program should succeed");
    value
}

pub fn as_num(value: Value) -> f64 {
    assert!(value.is_num(), "expected a number, got {}", value.type_name());
    value.as_num()
}

pub fn as_str(value: Value) -> String {
    assert!(value.is_string(), "expected a string, got {}", value.type_name());
    // SAFETY: the value is a live string.
    unsafe { (*value.as_string()).to_display().into_owned() }
}

/// Interns a method-call signature, for assembling `CALLK`.
pub fn method(vm: &mut WrenVm, signature: &str) -> u32 {
    vm.method_names.ensure(signature)
}

/// A string constant value.
pub fn str_const(vm: &mut WrenVm, text: &str) -> Value {
    string::value(&mut vm.gc, text)
}
