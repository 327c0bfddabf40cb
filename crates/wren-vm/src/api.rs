//! The embedding slot API.
//!
//! Hosts exchange data with the VM through a window of slots that alias a
//! fiber's stack. The window is set up around foreign calls automatically,
//! or explicitly via [`WrenVm::ensure_slots`].

use wren_core::{Instruction, Opcode};
use wren_runtime::objects::closure;
use wren_runtime::objects::fiber;
use wren_runtime::objects::{foreign, function, list, map, string};
use wren_runtime::{ops, Value};

use crate::error::InterpretResult;
use crate::exec::call;
use crate::vm::{WrenHandle, WrenVm};

/// Host-visible classification of a slot's contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrenType {
    Bool,
    Num,
    Foreign,
    List,
    Map,
    Null,
    String,
    Unknown,
}

impl WrenVm {
    // =========================================================================
    // Window management
    // =========================================================================

    /// Number of slots currently visible to the host.
    pub fn slot_count(&self) -> usize {
        let Some(api_stack) = self.api_stack else {
            return 0;
        };
        // SAFETY: a live fiber backs the API window.
        unsafe { (*self.fiber).api_stack_top - api_stack }
    }

    /// Makes sure the host has at least `num_slots` slots to work with,
    /// creating a scratch fiber when none is executing.
    pub fn ensure_slots(&mut self, num_slots: usize) {
        if self.api_stack.is_none() {
            self.maybe_collect();
            self.fiber = fiber::new(&mut self.gc, std::ptr::null_mut());
            self.api_stack = Some(0);
            // SAFETY: just created.
            unsafe { (*self.fiber).api_stack_top = 0 };
        }

        let api_stack = self.api_stack.expect("window exists");
        // SAFETY: a live fiber backs the API window.
        unsafe {
            let current = (*self.fiber).api_stack_top - api_stack;
            if current >= num_slots {
                return;
            }
            fiber::ensure_stack(self.fiber, api_stack + num_slots);
            (*self.fiber).api_stack_top = api_stack + num_slots;
        }
    }

    fn validate_slot(&self, slot: usize) {
        assert!(slot < self.slot_count(), "not that many slots");
    }

    /// Raw read of a slot value.
    pub fn slot_value(&self, slot: usize) -> Value {
        self.validate_slot(slot);
        let api_stack = self.api_stack.expect("no slot window");
        // SAFETY: validate_slot checked the window.
        unsafe { (&(*self.fiber).stack)[api_stack + slot] }
    }

    /// Raw write of a slot value.
    pub fn set_slot_value(&mut self, slot: usize, value: Value) {
        self.validate_slot(slot);
        let api_stack = self.api_stack.expect("no slot window");
        // SAFETY: validate_slot checked the window.
        unsafe { (&mut (*self.fiber).stack)[api_stack + slot] = value };
    }

    // =========================================================================
    // Getters
    // =========================================================================

    pub fn get_slot_type(&self, slot: usize) -> WrenType {
        let value = self.slot_value(slot);
        match value {
            Value::Bool(_) => WrenType::Bool,
            Value::Num(_) => WrenType::Num,
            Value::Null => WrenType::Null,
            _ if value.is_foreign() => WrenType::Foreign,
            _ if value.is_list() => WrenType::List,
            _ if value.is_map() => WrenType::Map,
            _ if value.is_string() => WrenType::String,
            _ => WrenType::Unknown,
        }
    }

    pub fn get_slot_bool(&self, slot: usize) -> bool {
        let value = self.slot_value(slot);
        assert!(value.is_bool(), "slot must hold a bool");
        value.as_bool()
    }

    pub fn get_slot_double(&self, slot: usize) -> f64 {
        let value = self.slot_value(slot);
        assert!(value.is_num(), "slot must hold a number");
        value.as_num()
    }

    /// The raw bytes of a string slot.
    pub fn get_slot_bytes(&self, slot: usize) -> &[u8] {
        let value = self.slot_value(slot);
        assert!(value.is_string(), "slot must hold a string");
        // SAFETY: the string stays alive while the host holds the VM borrow.
        unsafe { (*value.as_string()).as_bytes() }
    }

    /// A string slot as UTF-8 text.
    pub fn get_slot_string(&self, slot: usize) -> std::borrow::Cow<'_, str> {
        let value = self.slot_value(slot);
        assert!(value.is_string(), "slot must hold a string");
        // SAFETY: as above.
        unsafe { (*value.as_string()).to_display() }
    }

    /// The payload of a foreign object slot.
    pub fn get_slot_foreign(&self, slot: usize) -> *mut u8 {
        let value = self.slot_value(slot);
        assert!(value.is_foreign(), "slot must hold a foreign instance");
        // SAFETY: the foreign object is live.
        unsafe { (*value.as_foreign()).data.as_mut_ptr() }
    }

    pub fn get_slot_handle(&mut self, slot: usize) -> *mut WrenHandle {
        let value = self.slot_value(slot);
        self.make_handle(value)
    }

    // =========================================================================
    // Setters
    // =========================================================================

    pub fn set_slot_bool(&mut self, slot: usize, value: bool) {
        self.set_slot_value(slot, Value::Bool(value));
    }

    pub fn set_slot_double(&mut self, slot: usize, value: f64) {
        self.set_slot_value(slot, Value::Num(value));
    }

    pub fn set_slot_null(&mut self, slot: usize) {
        self.set_slot_value(slot, Value::Null);
    }

    pub fn set_slot_bytes(&mut self, slot: usize, bytes: &[u8]) {
        self.maybe_collect();
        let value = Value::obj(string::from_bytes(&mut self.gc, bytes));
        self.set_slot_value(slot, value);
    }

    pub fn set_slot_string(&mut self, slot: usize, text: &str) {
        self.set_slot_bytes(slot, text.as_bytes());
    }

    pub fn set_slot_new_list(&mut self, slot: usize) {
        self.maybe_collect();
        let value = list::value(&mut self.gc, 0);
        self.set_slot_value(slot, value);
    }

    pub fn set_slot_new_map(&mut self, slot: usize) {
        self.maybe_collect();
        let value = map::value(&mut self.gc);
        self.set_slot_value(slot, value);
    }

    /// Creates a foreign object of the class in `class_slot` with `size`
    /// payload bytes, stores it in `slot` and returns the payload pointer.
    pub fn set_slot_new_foreign(&mut self, slot: usize, class_slot: usize, size: usize) -> *mut u8 {
        let class_value = self.slot_value(class_slot);
        assert!(class_value.is_class(), "slot must hold a class");
        let class = class_value.as_class();
        // SAFETY: the class is live.
        assert!(unsafe { (*class).is_foreign() }, "class must be a foreign class");

        self.maybe_collect();
        let object = foreign::new(&mut self.gc, class, size);
        self.set_slot_value(slot, Value::obj(object));
        // SAFETY: just allocated.
        unsafe { (*object).data.as_mut_ptr() }
    }

    pub fn set_slot_handle(&mut self, slot: usize, handle: *mut WrenHandle) {
        assert!(!handle.is_null(), "handle cannot be null");
        // SAFETY: handles are live until released.
        let value = unsafe { (*handle).value };
        self.set_slot_value(slot, value);
    }

    // =========================================================================
    // List operations
    // =========================================================================

    pub fn get_list_count(&self, slot: usize) -> usize {
        let value = self.slot_value(slot);
        assert!(value.is_list(), "slot must hold a list");
        // SAFETY: the list is live.
        unsafe { (*value.as_list()).len() }
    }

    pub fn get_list_element(&mut self, list_slot: usize, index: usize, element_slot: usize) {
        let value = self.slot_value(list_slot);
        assert!(value.is_list(), "slot must hold a list");
        // SAFETY: the list is live.
        let element = unsafe { (&(*value.as_list()).elements)[index] };
        self.set_slot_value(element_slot, element);
    }

    pub fn set_list_element(&mut self, list_slot: usize, index: usize, element_slot: usize) {
        let value = self.slot_value(list_slot);
        assert!(value.is_list(), "slot must hold a list");
        let element = self.slot_value(element_slot);
        // SAFETY: the list is live.
        unsafe { (&mut (*value.as_list()).elements)[index] = element };
    }

    /// Inserts ahead of `index`; negative indices count from the end, with
    /// -1 appending.
    pub fn insert_in_list(&mut self, list_slot: usize, index: i64, element_slot: usize) {
        let value = self.slot_value(list_slot);
        assert!(value.is_list(), "must insert into a list");
        let element = self.slot_value(element_slot);
        let target = value.as_list();

        // SAFETY: the list is live.
        let count = unsafe { (*target).len() } as i64;
        let index = if index < 0 { count + 1 + index } else { index };
        assert!(index >= 0 && index <= count, "index out of bounds");

        list::insert(&mut self.gc, target, element, index as usize);
    }

    // =========================================================================
    // Map operations
    // =========================================================================

    pub fn get_map_count(&self, slot: usize) -> usize {
        let value = self.slot_value(slot);
        assert!(value.is_map(), "slot must hold a map");
        // SAFETY: the map is live.
        unsafe { (*value.as_map()).count }
    }

    pub fn get_map_contains_key(&mut self, map_slot: usize, key_slot: usize) -> bool {
        let map_value = self.slot_value(map_slot);
        assert!(map_value.is_map(), "slot must hold a map");
        let key = self.slot_value(key_slot);
        if let Err(error) = ops::validate_key(&mut self.gc, key) {
            self.fiber_abort(error);
            return false;
        }
        !map::get(map_value.as_map(), key).is_undefined()
    }

    pub fn get_map_value(&mut self, map_slot: usize, key_slot: usize, value_slot: usize) {
        let map_value = self.slot_value(map_slot);
        assert!(map_value.is_map(), "slot must hold a map");
        let key = self.slot_value(key_slot);
        let value = map::get(map_value.as_map(), key);
        let value = if value.is_undefined() { Value::Null } else { value };
        self.set_slot_value(value_slot, value);
    }

    pub fn set_map_value(&mut self, map_slot: usize, key_slot: usize, value_slot: usize) {
        let map_value = self.slot_value(map_slot);
        assert!(map_value.is_map(), "must insert into a map");
        let key = self.slot_value(key_slot);
        if let Err(error) = ops::validate_key(&mut self.gc, key) {
            self.fiber_abort(error);
            return;
        }
        let value = self.slot_value(value_slot);
        map::set(&mut self.gc, map_value.as_map(), key, value);
    }

    pub fn remove_map_value(&mut self, map_slot: usize, key_slot: usize, removed_value_slot: usize) {
        let map_value = self.slot_value(map_slot);
        assert!(map_value.is_map(), "slot must hold a map");
        let key = self.slot_value(key_slot);
        if let Err(error) = ops::validate_key(&mut self.gc, key) {
            self.fiber_abort(error);
            return;
        }
        let removed = map::remove(&mut self.gc, map_value.as_map(), key);
        self.set_slot_value(removed_value_slot, removed);
    }

    // =========================================================================
    // Module variables
    // =========================================================================

    pub fn has_module(&mut self, module: &str) -> bool {
        let name = string::value(&mut self.gc, module);
        !self.get_module(name).is_null()
    }

    pub fn has_variable(&mut self, module: &str, name: &str) -> bool {
        let module_name = string::value(&mut self.gc, module);
        self.gc.push_root(module_name.as_obj());
        let module_obj = self.get_module(module_name);
        self.gc.pop_root();
        assert!(!module_obj.is_null(), "could not find module");
        self.find_variable(module_obj, name).is_some()
    }

    /// Loads a module's top-level variable into `slot`.
    pub fn get_variable(&mut self, module: &str, name: &str, slot: usize) {
        let module_name = string::value(&mut self.gc, module);
        self.gc.push_root(module_name.as_obj());
        let module_obj = self.get_module(module_name);
        self.gc.pop_root();
        assert!(!module_obj.is_null(), "could not find module");
        let value = self
            .find_variable(module_obj, name)
            .expect("could not find variable");
        self.set_slot_value(slot, value);
    }

    /// Aborts the current fiber with the error value in `slot`.
    pub fn abort_fiber(&mut self, slot: usize) {
        let error = self.slot_value(slot);
        self.fiber_abort(error);
    }

    // =========================================================================
    // Host-held roots
    // =========================================================================

    /// Roots a value for the duration of host-side work that may allocate.
    pub fn push_root(&mut self, value: Value) {
        if let Value::Obj(obj) = value {
            self.gc.push_root(obj);
        }
    }

    pub fn pop_root(&mut self) {
        self.gc.pop_root();
    }

    // =========================================================================
    // Call handles
    // =========================================================================

    /// Creates a callable handle for a method signature: a stub function
    /// that dispatches the interned symbol against whatever receiver the
    /// host placed in slot 0.
    pub fn make_call_handle(&mut self, signature: &str) -> *mut WrenHandle {
        assert!(!signature.is_empty(), "signature cannot be empty");

        // Count the parameters the method expects.
        let bytes = signature.as_bytes();
        let mut num_params = 0;
        if bytes[bytes.len() - 1] == b')' {
            for &byte in bytes.iter().rev().skip(1) {
                if byte == b'(' {
                    break;
                }
                if byte == b'_' {
                    num_params += 1;
                }
            }
        }

        // Count subscript arguments.
        if bytes[0] == b'[' {
            for &byte in bytes {
                if byte == b']' {
                    break;
                }
                if byte == b'_' {
                    num_params += 1;
                }
            }
        }

        let method = self.method_names.ensure(signature);

        self.maybe_collect();

        // A little stub function that assumes the arguments are in the slot
        // window and invokes the method on them.
        let stub = function::new(&mut self.gc, std::ptr::null_mut(), num_params + 1);
        self.gc.push_root(stub);
        let stub_closure = closure::new(&mut self.gc, stub);
        self.gc.pop_root();
        let handle = self.make_handle(Value::obj(stub_closure));

        // SAFETY: just allocated; the handle keeps everything alive.
        unsafe {
            (*stub).arity = num_params;
            (*stub).code = vec![
                Instruction::vabc(Opcode::CallK, 0, num_params as u32, method),
                Instruction::abc(Opcode::Return, 0, 1, 0),
            ];
            (*stub).stack_top = vec![(num_params + 1) as u32; 2];
            (*stub).debug.source_lines = vec![0; 2];
        }
        function::bind_name(stub, signature);

        handle
    }

    /// Invokes a call handle against the previously populated slot window.
    pub fn call(&mut self, handle: *mut WrenHandle) -> InterpretResult {
        assert!(!handle.is_null(), "method cannot be null");
        // SAFETY: the handle is live until released.
        let closure_value = unsafe { (*handle).value };
        assert!(closure_value.is_closure(), "method must be a method handle");
        let stub_closure = closure_value.as_closure();

        assert!(!self.fiber.is_null(), "must set up arguments for call first");
        assert!(self.api_stack.is_some(), "must set up arguments for call first");
        // SAFETY: the fiber is live.
        unsafe {
            assert!((*self.fiber).frames.is_empty(), "can not call from a foreign method");
            let arity = (*(*stub_closure).fn_obj).arity;
            assert!(
                (*self.fiber).api_stack_top >= arity,
                "stack must have enough arguments for method"
            );
        }

        // The window is reclaimed for the duration of the call so foreign
        // methods invoked underneath can open their own.
        self.api_stack = None;

        let fiber = self.fiber;
        // SAFETY: the fiber and stub are live.
        unsafe {
            let max_slots = (*(*stub_closure).fn_obj).max_slots;
            fiber::ensure_stack(fiber, max_slots);
            (*fiber).api_stack_top = max_slots;
        }
        call::call_function(fiber, stub_closure, 0, fiber::RETURN_TO_BASE);

        let result = self.run_interpreter(fiber);

        // Reopen the window over the return value.
        if !self.fiber.is_null() {
            self.api_stack = Some(0);
            // SAFETY: the surviving fiber is live.
            unsafe { (*self.fiber).api_stack_top = 1 };
        }

        result
    }
}
