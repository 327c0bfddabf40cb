//! The core class bootstrap.
//!
//! Wires up the Object/Class/metaclass cycle, creates the built-in classes
//! and binds their primitive methods. Everything here lives in the implicit
//! core module (registered under the Null name), whose variables are copied
//! into every module a host loads.

mod fiber;
mod primitives;

use wren_runtime::objects::class::{self, Method, ObjClass};
use wren_runtime::objects::module::{self, ObjModule};
use wren_runtime::objects::{map, string};
use wren_runtime::Value;

use crate::vm::{PrimitiveFn, WrenVm};

/// Reads an argument of the current primitive call. Index 0 is the
/// receiver.
#[inline]
pub(crate) fn arg(vm: &WrenVm, base: usize, index: usize) -> Value {
    // SAFETY: the current fiber is live and the window covers the call args.
    unsafe { (&(*vm.fiber).stack)[base + index] }
}

/// Stores a primitive's result into the receiver slot.
#[inline]
pub(crate) fn ret(vm: &mut WrenVm, base: usize, value: Value) -> bool {
    // SAFETY: as above.
    unsafe { (&mut (*vm.fiber).stack)[base] = value };
    true
}

/// Aborts the current fiber with a message value.
#[inline]
pub(crate) fn abort(vm: &mut WrenVm, message: Value) -> bool {
    vm.fiber_abort(message);
    false
}

#[inline]
pub(crate) fn abort_str(vm: &mut WrenVm, message: &str) -> bool {
    vm.fiber_abort_str(message);
    false
}

/// Binds an engine primitive under `signature`.
fn primitive(vm: &mut WrenVm, class: *mut ObjClass, signature: &str, function: PrimitiveFn) {
    let symbol = vm.method_names.ensure(signature);
    let id = vm.register_primitive(function);
    class::bind_method(&mut vm.gc, class, symbol, Method::Primitive(id));
}

/// Binds one of the arity-checked `call(...)` signatures.
fn function_call(vm: &mut WrenVm, class: *mut ObjClass, signature: &str) {
    let symbol = vm.method_names.ensure(signature);
    class::bind_method(&mut vm.gc, class, symbol, Method::FunctionCall);
}

/// The metaclass of `class`, where its static methods live.
fn metaclass_of(class: *mut ObjClass) -> *mut ObjClass {
    // SAFETY: the class is live and wired.
    unsafe { (*class).header.class_obj }
}

/// Creates a bare class (no metaclass wiring) and defines it as a core
/// module variable. Only the bootstrap trio uses this.
fn define_single_class(vm: &mut WrenVm, module: *mut ObjModule, name: &str) -> *mut ObjClass {
    let name_string = string::new(&mut vm.gc, name);
    vm.gc.push_root(name_string);
    let class = class::new_single_class(&mut vm.gc, 0, name_string);
    vm.gc.push_root(class);
    module::define_variable(&mut vm.gc, module, name, Value::obj(class), None);
    vm.gc.pop_root();
    vm.gc.pop_root();
    class
}

/// Creates a full class (metaclass included) inheriting Object, and defines
/// it as a core module variable.
fn define_class(vm: &mut WrenVm, module: *mut ObjModule, name: &str) -> *mut ObjClass {
    let name_string = string::new(&mut vm.gc, name);
    vm.gc.push_root(name_string);
    let object = vm.gc.core.object;
    let class = class::new_class(&mut vm.gc, object, 0, name_string);
    vm.gc.push_root(class);
    module::define_variable(&mut vm.gc, module, name, Value::obj(class), None);
    vm.gc.pop_root();
    vm.gc.pop_root();
    class
}

pub fn initialize(vm: &mut WrenVm) {
    // The implicit core module sits in the registry under Null.
    let core_module = module::new(&mut vm.gc, std::ptr::null_mut());
    vm.gc.push_root(core_module);
    map::set(&mut vm.gc, vm.modules, Value::Null, Value::obj(core_module));
    vm.gc.pop_root();

    // Define the root Object class. This has to be done a little specially
    // because it has no superclass.
    let object = define_single_class(vm, core_module, "Object");
    primitive(vm, object, "!", primitives::object_not);
    primitive(vm, object, "==(_)", primitives::object_eqeq);
    primitive(vm, object, "!=(_)", primitives::object_bangeq);
    primitive(vm, object, "is(_)", primitives::object_is);
    primitive(vm, object, "toString", primitives::object_to_string);
    primitive(vm, object, "type", primitives::object_type);

    // Now we can define Class, which is a subclass of Object.
    let class_class = define_single_class(vm, core_module, "Class");
    class::bind_superclass(&mut vm.gc, class_class, object);
    primitive(vm, class_class, "name", primitives::class_name);
    primitive(vm, class_class, "supertype", primitives::class_supertype);
    primitive(vm, class_class, "toString", primitives::class_to_string);

    // Finally, we can define Object's metaclass which is a subclass of
    // Class, closing the cycle at the top of the hierarchy.
    let object_metaclass = define_single_class(vm, core_module, "Object metaclass");
    // SAFETY: all three classes are live; this is the one place the cycle is
    // wired by hand.
    unsafe {
        (*object).header.class_obj = object_metaclass;
        (*object_metaclass).header.class_obj = class_class;
        (*class_class).header.class_obj = class_class;
    }
    class::bind_superclass(&mut vm.gc, object_metaclass, class_class);
    primitive(vm, object_metaclass, "same(_,_)", primitives::object_same);

    vm.gc.core.object = object;
    vm.gc.core.class = class_class;

    // The remaining built-ins get full metaclasses.
    let bool_class = define_class(vm, core_module, "Bool");
    vm.gc.core.bool_ = bool_class;
    primitive(vm, bool_class, "!", primitives::bool_not);
    primitive(vm, bool_class, "toString", primitives::bool_to_string);

    let null_class = define_class(vm, core_module, "Null");
    vm.gc.core.null = null_class;
    primitive(vm, null_class, "!", primitives::null_not);
    primitive(vm, null_class, "toString", primitives::null_to_string);

    let num_class = define_class(vm, core_module, "Num");
    vm.gc.core.num = num_class;
    primitive(vm, num_class, "+(_)", primitives::num_plus);
    primitive(vm, num_class, "-(_)", primitives::num_minus);
    primitive(vm, num_class, "*(_)", primitives::num_star);
    primitive(vm, num_class, "/(_)", primitives::num_slash);
    primitive(vm, num_class, "<(_)", primitives::num_lt);
    primitive(vm, num_class, "<=(_)", primitives::num_lte);
    primitive(vm, num_class, ">(_)", primitives::num_gt);
    primitive(vm, num_class, ">=(_)", primitives::num_gte);
    primitive(vm, num_class, "-", primitives::num_negate);
    primitive(vm, num_class, "abs", primitives::num_abs);
    primitive(vm, num_class, "floor", primitives::num_floor);
    primitive(vm, num_class, "toString", primitives::num_to_string);

    let string_class = define_class(vm, core_module, "String");
    vm.gc.core.string = string_class;
    primitive(
        vm,
        metaclass_of(string_class),
        "fromCodePoint(_)",
        primitives::string_from_code_point,
    );
    primitive(
        vm,
        metaclass_of(string_class),
        "fromByte(_)",
        primitives::string_from_byte,
    );
    primitive(vm, string_class, "+(_)", primitives::string_plus);
    primitive(vm, string_class, "count", primitives::string_count);
    primitive(vm, string_class, "byteCount", primitives::string_byte_count);
    primitive(vm, string_class, "contains(_)", primitives::string_contains);
    primitive(vm, string_class, "indexOf(_)", primitives::string_index_of);
    primitive(vm, string_class, "iterate(_)", primitives::string_iterate);
    primitive(vm, string_class, "iteratorValue(_)", primitives::string_iterator_value);
    primitive(vm, string_class, "[_]", primitives::string_subscript);
    primitive(vm, string_class, "toString", primitives::string_to_string);

    let list_class = define_class(vm, core_module, "List");
    vm.gc.core.list = list_class;
    primitive(vm, metaclass_of(list_class), "new()", primitives::list_new);
    primitive(vm, list_class, "add(_)", primitives::list_add);
    primitive(vm, list_class, "clear()", primitives::list_clear);
    primitive(vm, list_class, "count", primitives::list_count);
    primitive(vm, list_class, "insert(_,_)", primitives::list_insert);
    primitive(vm, list_class, "indexOf(_)", primitives::list_index_of);
    primitive(vm, list_class, "removeAt(_)", primitives::list_remove_at);
    primitive(vm, list_class, "iterate(_)", primitives::list_iterate);
    primitive(vm, list_class, "iteratorValue(_)", primitives::list_iterator_value);
    primitive(vm, list_class, "[_]", primitives::list_subscript);
    primitive(vm, list_class, "[_]=(_)", primitives::list_subscript_setter);

    let map_class = define_class(vm, core_module, "Map");
    vm.gc.core.map = map_class;
    primitive(vm, metaclass_of(map_class), "new()", primitives::map_new);
    primitive(vm, map_class, "clear()", primitives::map_clear);
    primitive(vm, map_class, "containsKey(_)", primitives::map_contains_key);
    primitive(vm, map_class, "count", primitives::map_count);
    primitive(vm, map_class, "remove(_)", primitives::map_remove);
    primitive(vm, map_class, "iterate(_)", primitives::map_iterate);
    primitive(vm, map_class, "iteratorValue(_)", primitives::map_iterator_value);
    primitive(vm, map_class, "[_]", primitives::map_subscript);
    primitive(vm, map_class, "[_]=(_)", primitives::map_subscript_setter);

    let map_entry_class = define_class(vm, core_module, "MapEntry");
    vm.gc.core.map_entry = map_entry_class;
    primitive(vm, map_entry_class, "key", primitives::map_entry_key);
    primitive(vm, map_entry_class, "value", primitives::map_entry_value);

    let range_class = define_class(vm, core_module, "Range");
    vm.gc.core.range = range_class;
    primitive(vm, range_class, "from", primitives::range_from);
    primitive(vm, range_class, "to", primitives::range_to);
    primitive(vm, range_class, "min", primitives::range_min);
    primitive(vm, range_class, "max", primitives::range_max);
    primitive(vm, range_class, "isInclusive", primitives::range_is_inclusive);
    primitive(vm, range_class, "iterate(_)", primitives::range_iterate);
    primitive(vm, range_class, "iteratorValue(_)", primitives::range_iterator_value);

    let fn_class = define_class(vm, core_module, "Fn");
    vm.gc.core.fn_ = fn_class;
    primitive(vm, metaclass_of(fn_class), "new(_)", primitives::fn_new);
    primitive(vm, fn_class, "arity", primitives::fn_arity);
    primitive(vm, fn_class, "toString", primitives::fn_to_string);
    let mut call_signature = String::from("call(");
    for num_params in 0..=16 {
        let signature = match num_params {
            0 => "call()".to_string(),
            _ => {
                if num_params > 1 {
                    call_signature.push(',');
                }
                call_signature.push('_');
                format!("{})", call_signature)
            }
        };
        function_call(vm, fn_class, &signature);
    }

    let fiber_class = define_class(vm, core_module, "Fiber");
    vm.gc.core.fiber = fiber_class;
    primitive(vm, metaclass_of(fiber_class), "new(_)", fiber::fiber_new);
    primitive(vm, metaclass_of(fiber_class), "abort(_)", fiber::fiber_abort);
    primitive(vm, metaclass_of(fiber_class), "current", fiber::fiber_current);
    primitive(vm, metaclass_of(fiber_class), "yield()", fiber::fiber_yield);
    primitive(vm, metaclass_of(fiber_class), "yield(_)", fiber::fiber_yield1);
    primitive(vm, fiber_class, "call()", fiber::fiber_call);
    primitive(vm, fiber_class, "call(_)", fiber::fiber_call1);
    primitive(vm, fiber_class, "try()", fiber::fiber_try);
    primitive(vm, fiber_class, "try(_)", fiber::fiber_try1);
    primitive(vm, fiber_class, "transfer()", fiber::fiber_transfer);
    primitive(vm, fiber_class, "transfer(_)", fiber::fiber_transfer1);
    primitive(vm, fiber_class, "error", fiber::fiber_error);
    primitive(vm, fiber_class, "isDone", fiber::fiber_is_done);

    let system_class = define_class(vm, core_module, "System");
    primitive(vm, metaclass_of(system_class), "print(_)", primitives::system_print);
    primitive(vm, metaclass_of(system_class), "write(_)", primitives::system_write);

    // Strings and other objects created while their classes did not exist
    // yet get classed now.
    vm.gc.fix_classes();
}
