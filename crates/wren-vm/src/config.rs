//! VM configuration: host callbacks and heap tuning.
//!
//! Callbacks are plain function pointers so the VM can copy one out and
//! invoke it with `&mut WrenVm` without aliasing itself.

use wren_runtime::objects::class::FinalizerFn;
use wren_runtime::objects::function::ObjFn;
use wren_runtime::objects::module::ObjModule;

use crate::vm::WrenVm;

/// A method implemented by the host. Receives the VM with the argument
/// window exposed through the slot API; writes its result to slot 0.
pub type ForeignMethodFn = fn(&mut WrenVm);

/// Resolves an imported module name relative to the importing module.
/// Returning `None` aborts the import.
pub type ResolveModuleFn = fn(vm: &mut WrenVm, importer: &str, name: &str) -> Option<String>;

/// Loads the source of a module. Returning `None` reports the module as
/// missing.
pub type LoadModuleFn = fn(vm: &mut WrenVm, name: &str) -> Option<String>;

/// Binds a foreign method declared in script code to its host function.
pub type BindForeignMethodFn = fn(
    vm: &mut WrenVm,
    module: &str,
    class_name: &str,
    is_static: bool,
    signature: &str,
) -> Option<ForeignMethodFn>;

/// The `<allocate>`/`<finalize>` pair of a foreign class.
#[derive(Clone, Copy, Default)]
pub struct ForeignClassMethods {
    pub allocate: Option<ForeignMethodFn>,
    pub finalize: Option<FinalizerFn>,
}

/// Binds a foreign class declared in script code to its host hooks.
pub type BindForeignClassFn =
    fn(vm: &mut WrenVm, module: &str, class_name: &str) -> ForeignClassMethods;

/// Receives text written by `System.print` and friends.
pub type WriteFn = fn(vm: &mut WrenVm, text: &str);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrenErrorKind {
    Compile,
    Runtime,
    StackTrace,
}

/// Receives compile errors, the runtime error message, and one call per
/// stack-trace line.
pub type ErrorFn =
    fn(vm: &mut WrenVm, kind: WrenErrorKind, module: Option<&str>, line: i32, message: &str);

/// The external compiler seam: compiles `source` into a function object in
/// `module`, returning `None` on a compile error. The function's code,
/// constants, `max_slots` and watermark table must conform to the register
/// instruction set.
pub type CompileFn = fn(vm: &mut WrenVm, module: *mut ObjModule, source: &str) -> Option<*mut ObjFn>;

pub struct WrenConfig {
    pub resolve_module: Option<ResolveModuleFn>,
    pub load_module: Option<LoadModuleFn>,
    pub bind_foreign_method: Option<BindForeignMethodFn>,
    pub bind_foreign_class: Option<BindForeignClassFn>,
    pub write: Option<WriteFn>,
    pub error: Option<ErrorFn>,
    pub compile: Option<CompileFn>,
    pub initial_heap_size: usize,
    pub min_heap_size: usize,
    /// Percent growth over the live size after a collection.
    pub heap_growth_percent: usize,
    /// Debug mode: collect at every allocation point.
    pub gc_stress: bool,
}

impl Default for WrenConfig {
    fn default() -> Self {
        WrenConfig {
            resolve_module: None,
            load_module: None,
            bind_foreign_method: None,
            bind_foreign_class: None,
            write: None,
            error: None,
            compile: None,
            initial_heap_size: 1024 * 1024 * 10,
            min_heap_size: 1024 * 1024,
            heap_growth_percent: 50,
            gc_stress: false,
        }
    }
}
