//! The VM structure: heap, symbol tables, module registry, fiber, handles.

mod dispatch;

use wren_core::SymbolTable;
use wren_runtime::gc::ObjHeader;
use wren_runtime::objects::class::ObjClass;
use wren_runtime::objects::closure::{self, ObjClosure};
use wren_runtime::objects::fiber::{self, FiberState, ObjFiber};
use wren_runtime::objects::map;
use wren_runtime::objects::module::{self, ObjModule};
use wren_runtime::objects::string::{self, FmtArg};
use wren_runtime::{Gc, Value};

use crate::config::{ForeignMethodFn, WrenConfig};
use crate::corelib;
use crate::debug as debug_trace;
use crate::error::InterpretResult;

/// An engine-implemented method. Receives the VM and the absolute stack
/// index of the receiver; arguments follow it. Returns true when the result
/// has been stored into the receiver slot, false when the fiber switched,
/// aborted, or a frame was pushed.
pub type PrimitiveFn = fn(&mut WrenVm, usize) -> bool;

/// A host-held reference that keeps a value alive across collections.
pub struct WrenHandle {
    pub value: Value,
    prev: *mut WrenHandle,
    next: *mut WrenHandle,
}

/// Method symbols the interpreter's fast paths look up on every dispatch,
/// interned once at startup.
#[derive(Clone, Copy)]
pub struct CoreSymbols {
    pub plus: u32,
    pub minus: u32,
    pub star: u32,
    pub slash: u32,
    pub eq_eq: u32,
    pub bang_eq: u32,
    pub lt: u32,
    pub lt_eq: u32,
    pub gt: u32,
    pub gt_eq: u32,
    pub not_op: u32,
    pub negate: u32,
    pub subscript: u32,
    pub subscript_set: u32,
    pub iterate: u32,
    pub iterator_value: u32,
    pub allocate: u32,
    pub finalize: u32,
}

impl CoreSymbols {
    fn intern(names: &mut SymbolTable) -> CoreSymbols {
        CoreSymbols {
            plus: names.ensure("+(_)"),
            minus: names.ensure("-(_)"),
            star: names.ensure("*(_)"),
            slash: names.ensure("/(_)"),
            eq_eq: names.ensure("==(_)"),
            bang_eq: names.ensure("!=(_)"),
            lt: names.ensure("<(_)"),
            lt_eq: names.ensure("<=(_)"),
            gt: names.ensure(">(_)"),
            gt_eq: names.ensure(">=(_)"),
            not_op: names.ensure("!"),
            negate: names.ensure("-"),
            subscript: names.ensure("[_]"),
            subscript_set: names.ensure("[_]=(_)"),
            iterate: names.ensure("iterate(_)"),
            iterator_value: names.ensure("iteratorValue(_)"),
            allocate: names.ensure("<allocate>"),
            finalize: names.ensure("<finalize>"),
        }
    }
}

pub struct WrenVm {
    pub gc: Gc,
    /// VM-global method name table; symbols are shared by every class.
    pub method_names: SymbolTable,
    /// Loaded modules, keyed by name value. The core module sits under Null.
    pub modules: *mut map::ObjMap,
    /// The currently executing fiber, or null when idle.
    pub fiber: *mut ObjFiber,
    /// Module most recently completed or re-imported; `IMPORTVAR` reads it.
    pub last_module: *mut ObjModule,
    /// Absolute stack index of the host slot window in the current fiber.
    pub api_stack: Option<usize>,
    handles: *mut WrenHandle,
    pub config: WrenConfig,
    /// Dense registries backing `Method::Primitive` / `Method::Foreign`.
    pub(crate) primitives: Vec<PrimitiveFn>,
    pub(crate) foreign_methods: Vec<ForeignMethodFn>,
    pub symbols: CoreSymbols,
}

impl WrenVm {
    pub fn new(config: WrenConfig) -> WrenVm {
        let mut gc = Gc::new(
            config.initial_heap_size,
            config.min_heap_size,
            config.heap_growth_percent,
        );
        gc.stress = config.gc_stress;

        let mut vm = WrenVm {
            gc,
            method_names: SymbolTable::new(),
            modules: std::ptr::null_mut(),
            fiber: std::ptr::null_mut(),
            last_module: std::ptr::null_mut(),
            api_stack: None,
            handles: std::ptr::null_mut(),
            config,
            primitives: Vec::new(),
            foreign_methods: Vec::new(),
            symbols: CoreSymbols {
                plus: 0,
                minus: 0,
                star: 0,
                slash: 0,
                eq_eq: 0,
                bang_eq: 0,
                lt: 0,
                lt_eq: 0,
                gt: 0,
                gt_eq: 0,
                not_op: 0,
                negate: 0,
                subscript: 0,
                subscript_set: 0,
                iterate: 0,
                iterator_value: 0,
                allocate: 0,
                finalize: 0,
            },
        };

        vm.symbols = CoreSymbols::intern(&mut vm.method_names);
        vm.gc.finalize_symbol = Some(vm.symbols.finalize);

        vm.modules = map::new(&mut vm.gc);
        corelib::initialize(&mut vm);
        vm
    }

    // =========================================================================
    // Garbage collection
    // =========================================================================

    /// A full collection: gray the root set, drain the worklist, sweep.
    pub fn collect_garbage(&mut self) {
        self.gc.begin_collect();

        self.gc.gray_obj(self.modules as *mut ObjHeader);
        self.gc.gray_obj(self.fiber as *mut ObjHeader);

        let mut handle = self.handles;
        while !handle.is_null() {
            // SAFETY: the handle list only holds live boxed handles.
            unsafe {
                self.gc.gray_value((*handle).value);
                handle = (*handle).next;
            }
        }

        self.gc.finish_collect();
    }

    /// Collects when the allocated bytes pass the trigger (or always, under
    /// stress). Called at every allocation point.
    #[inline]
    pub fn maybe_collect(&mut self) {
        if self.gc.should_collect() {
            self.collect_garbage();
        }
    }

    // =========================================================================
    // Registries
    // =========================================================================

    pub(crate) fn register_primitive(&mut self, function: PrimitiveFn) -> u32 {
        self.primitives.push(function);
        (self.primitives.len() - 1) as u32
    }

    pub fn register_foreign(&mut self, function: ForeignMethodFn) -> u32 {
        self.foreign_methods.push(function);
        (self.foreign_methods.len() - 1) as u32
    }

    // =========================================================================
    // Classes and errors
    // =========================================================================

    /// The class that defines `value`'s methods.
    #[inline]
    pub fn class_of(&self, value: Value) -> *mut ObjClass {
        match value {
            Value::Null => self.gc.core.null,
            Value::Bool(_) => self.gc.core.bool_,
            Value::Num(_) => self.gc.core.num,
            // SAFETY: object values point at live headers.
            Value::Obj(obj) => unsafe { (*obj).class_obj },
            Value::Undefined => {
                debug_assert!(false, "undefined has no class");
                std::ptr::null_mut()
            }
        }
    }

    /// Aborts the current fiber with `message`.
    pub fn fiber_abort(&mut self, message: Value) {
        debug_assert!(!self.fiber.is_null());
        // SAFETY: the current fiber is live.
        unsafe { (*self.fiber).error = message };
    }

    pub(crate) fn fiber_abort_str(&mut self, message: &str) {
        let value = string::value(&mut self.gc, message);
        self.fiber_abort(value);
    }

    pub(crate) fn method_not_found(&mut self, class: *mut ObjClass, symbol: u32) {
        let signature = self
            .method_names
            .name(symbol)
            .unwrap_or("<unknown>")
            .to_string();
        // SAFETY: the class is live.
        let class_name = unsafe { Value::obj((*class).name) };
        let error = string::format_value(
            &mut self.gc,
            "@ does not implement '$'.",
            &[FmtArg::Val(class_name), FmtArg::Str(&signature)],
        );
        self.fiber_abort(error);
    }

    /// Handles the current fiber having aborted: walks the caller chain
    /// until a `try` fiber catches the error, otherwise reports the stack
    /// trace and stops the interpreter.
    pub(crate) fn register_runtime_error(&mut self) {
        // SAFETY: fibers along the caller chain are live heap objects.
        unsafe {
            debug_assert!((*self.fiber).has_error(), "should only be called after an error");
            let error = (*self.fiber).error;

            let mut current = self.fiber;
            while !current.is_null() {
                // Every fiber along the call chain aborts with the same
                // error.
                (*current).error = error;

                // A fiber run with `try` delivers the error as the result of
                // the call that started it.
                if (*current).state == FiberState::Try {
                    let caller = (*current).caller;
                    debug_assert!(!caller.is_null(), "try fiber must have a caller");
                    let reg = (*caller).last_call_reg;
                    fiber::ensure_stack(caller, reg + 1);
                    (&mut (*caller).stack)[reg] = error;
                    self.fiber = caller;
                    return;
                }

                // This fiber will never resume; unhook its caller.
                let caller = (*current).caller;
                (*current).caller = std::ptr::null_mut();
                current = caller;
            }
        }

        // Nothing caught the error.
        debug_trace::print_stack_trace(self);
        self.fiber = std::ptr::null_mut();
        self.api_stack = None;
    }

    // =========================================================================
    // Modules
    // =========================================================================

    /// The loaded module registered under `name`, or null.
    pub fn get_module(&self, name: Value) -> *mut ObjModule {
        let value = map::get(self.modules, name);
        if value.is_undefined() {
            std::ptr::null_mut()
        } else {
            value.as_module()
        }
    }

    /// The implicit core module.
    pub fn core_module(&self) -> *mut ObjModule {
        self.get_module(Value::Null)
    }

    /// Compiles `source` in the module named `name`, creating and
    /// registering the module (with the core module's variables imported)
    /// if this is its first load. Returns the closure over the module body,
    /// or `None` on a compile error or missing compiler hook.
    pub fn compile_in_module(&mut self, name: Value, source: &str) -> Option<*mut ObjClosure> {
        let mut module = self.get_module(name);
        if module.is_null() {
            let name_string = if name.is_null() {
                std::ptr::null_mut()
            } else {
                name.as_string()
            };
            module = module::new(&mut self.gc, name_string);

            // The fresh module is only reachable once it is in the map.
            self.gc.push_root(module);
            map::set(&mut self.gc, self.modules, name, Value::obj(module));
            self.gc.pop_root();

            // Implicitly import the core module.
            let core_module = self.core_module();
            if !core_module.is_null() && core_module != module {
                // SAFETY: both modules are live.
                unsafe {
                    for i in 0..(*core_module).variables.len() {
                        let var_name = (*core_module)
                            .variable_names
                            .name(i as u32)
                            .expect("dense symbol")
                            .to_string();
                        module::define_variable(
                            &mut self.gc,
                            module,
                            &var_name,
                            (&(*core_module).variables)[i],
                            None,
                        );
                    }
                }
            }
        }

        let compile = self.config.compile?;
        let function = compile(self, module, source)?;

        // Module bodies are always wrapped in closures.
        self.gc.push_root(function);
        let closure = closure::new(&mut self.gc, function);
        self.gc.pop_root();
        Some(closure)
    }

    /// Reads a top-level variable from a loaded module.
    pub fn find_variable(&self, module: *mut ObjModule, name: &str) -> Option<Value> {
        module::find_variable(module, name)
    }

    // =========================================================================
    // Interpretation entry points
    // =========================================================================

    /// Compiles `source` via the configured compiler hook and runs it as the
    /// body of `module` (the core module when `None`).
    pub fn interpret(&mut self, module: Option<&str>, source: &str) -> InterpretResult {
        let Some(closure) = self.compile_source(module, source) else {
            return InterpretResult::CompileError;
        };

        self.gc.push_root(closure);
        let fiber = fiber::new(&mut self.gc, closure);
        self.gc.pop_root();
        self.api_stack = None;

        self.run_interpreter(fiber)
    }

    pub fn compile_source(&mut self, module: Option<&str>, source: &str) -> Option<*mut ObjClosure> {
        let name_value = match module {
            Some(name) => {
                let value = string::value(&mut self.gc, name);
                self.gc.push_root(value.as_obj());
                value
            }
            None => Value::Null,
        };

        let closure = self.compile_in_module(name_value, source);

        if module.is_some() {
            self.gc.pop_root();
        }
        closure
    }

    /// Runs a pre-built closure on a fresh fiber. The entry point used by
    /// tests and embedders that assemble function objects directly.
    pub fn run_closure(&mut self, closure: *mut ObjClosure) -> InterpretResult {
        self.gc.push_root(closure);
        let fiber = fiber::new(&mut self.gc, closure);
        self.gc.pop_root();
        self.run_interpreter(fiber)
    }

    /// The result a finished fiber left in its first stack slot.
    pub fn last_fiber_result(&self) -> Value {
        if self.fiber.is_null() {
            return Value::Null;
        }
        // SAFETY: the fiber is live.
        unsafe { (&(*self.fiber).stack)[0] }
    }

    // =========================================================================
    // Handles
    // =========================================================================

    pub fn make_handle(&mut self, value: Value) -> *mut WrenHandle {
        let handle = Box::into_raw(Box::new(WrenHandle {
            value,
            prev: std::ptr::null_mut(),
            next: self.handles,
        }));
        if !self.handles.is_null() {
            // SAFETY: the old head is live.
            unsafe { (*self.handles).prev = handle };
        }
        self.handles = handle;
        handle
    }

    pub fn release_handle(&mut self, handle: *mut WrenHandle) {
        assert!(!handle.is_null(), "handle cannot be null");
        // SAFETY: the handle came from make_handle and is unlinked exactly
        // once.
        unsafe {
            if self.handles == handle {
                self.handles = (*handle).next;
            }
            if !(*handle).prev.is_null() {
                (*(*handle).prev).next = (*handle).next;
            }
            if !(*handle).next.is_null() {
                (*(*handle).next).prev = (*handle).prev;
            }
            drop(Box::from_raw(handle));
        }
    }
}

impl Drop for WrenVm {
    fn drop(&mut self) {
        // Handles still held by the host keep pointers into this VM; letting
        // go of them here would hide the bug, so complain in debug builds
        // and reclaim the memory anyway.
        debug_assert!(self.handles.is_null(), "all handles have not been released");
        let mut handle = self.handles;
        while !handle.is_null() {
            // SAFETY: each node is freed once after its link is read.
            unsafe {
                let next = (*handle).next;
                drop(Box::from_raw(handle));
                handle = next;
            }
        }
        self.handles = std::ptr::null_mut();
    }
}
