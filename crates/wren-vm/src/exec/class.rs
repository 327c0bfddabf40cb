//! Class creation, method binding and foreign-class plumbing.

use wren_runtime::objects::class::{self, Method, ObjClass};
use wren_runtime::objects::instance;
use wren_runtime::objects::module::ObjModule;
use wren_runtime::objects::string::{self, FmtArg};
use wren_runtime::Value;

use crate::config::ForeignClassMethods;
use crate::vm::WrenVm;

/// `CLASS`: builds a class from the name in `stack[slot - 1]` and the
/// superclass in `stack[slot]`, leaving the class in `stack[slot - 1]`.
/// `num_fields` of -1 marks a foreign class. Aborts the fiber on a bad
/// superclass.
pub fn create_class(vm: &mut WrenVm, num_fields: i32, module: *mut ObjModule, slot: usize) {
    // SAFETY: the fiber and its stack are live; the compiler placed name and
    // superclass in these registers.
    let (name, superclass_value) =
        unsafe { ((&(*vm.fiber).stack)[slot - 1], (&(*vm.fiber).stack)[slot]) };

    let superclass = match class::validate_superclass(&mut vm.gc, name, superclass_value, num_fields)
    {
        Ok(superclass) => superclass,
        Err(error) => {
            vm.fiber_abort(error);
            return;
        }
    };

    let class = class::new_class(&mut vm.gc, superclass, num_fields, name.as_string());
    // SAFETY: as above.
    unsafe { (&mut (*vm.fiber).stack)[slot - 1] = Value::obj(class) };

    if num_fields == -1 {
        bind_foreign_class(vm, class, module);
    }
}

/// `ENDCLASS`: attaches the attributes value in `stack[slot]` to the class
/// in `stack[slot + 1]`.
pub fn end_class(vm: &mut WrenVm, slot: usize) {
    // SAFETY: the fiber and its stack are live.
    unsafe {
        let attributes = (&(*vm.fiber).stack)[slot];
        let class_value = (&(*vm.fiber).stack)[slot + 1];
        debug_assert!(class_value.is_class());
        (*class_value.as_class()).attributes = attributes;
    }
}

/// `METHOD`: binds `method_value` (a closure, or a signature string naming a
/// foreign method) as `symbol` on `class`, or its metaclass for statics.
/// Aborts the fiber when a foreign method cannot be found.
pub fn bind_register_method(
    vm: &mut WrenVm,
    is_static: bool,
    symbol: u32,
    module: *mut ObjModule,
    class: *mut ObjClass,
    method_value: Value,
) {
    // SAFETY: the class and module are live.
    let class_name = unsafe { (*class).name_str().into_owned() };
    let target = if is_static {
        unsafe { (*class).header.class_obj }
    } else {
        class
    };

    let method = if method_value.is_string() {
        let signature = unsafe { (*method_value.as_string()).to_display().into_owned() };
        let module_name = unsafe {
            (*module)
                .name_str()
                .map(|n| n.into_owned())
                .unwrap_or_default()
        };

        let foreign = vm.config.bind_foreign_method.and_then(|bind| {
            bind(vm, &module_name, &class_name, is_static, &signature)
        });

        match foreign {
            Some(function) => {
                let id = vm.register_foreign(function);
                Method::Foreign(id)
            }
            None => {
                let error = string::format_value(
                    &mut vm.gc,
                    "Could not find foreign method '@' for class $ in module '$'.",
                    &[
                        FmtArg::Val(method_value),
                        FmtArg::Str(&class_name),
                        FmtArg::Str(&module_name),
                    ],
                );
                vm.fiber_abort(error);
                return;
            }
        }
    } else {
        debug_assert!(method_value.is_closure());
        Method::Block(method_value.as_closure())
    };

    class::bind_method(&mut vm.gc, target, symbol, method);
}

/// Looks up the host hooks for a foreign class and binds its `<allocate>`
/// and `<finalize>` methods.
pub fn bind_foreign_class(vm: &mut WrenVm, class: *mut ObjClass, module: *mut ObjModule) {
    // SAFETY: the class and module are live.
    let class_name = unsafe { (*class).name_str().into_owned() };
    let module_name = unsafe {
        if module.is_null() {
            String::new()
        } else {
            (*module)
                .name_str()
                .map(|n| n.into_owned())
                .unwrap_or_default()
        }
    };

    let methods = vm
        .config
        .bind_foreign_class
        .map(|bind| bind(vm, &module_name, &class_name))
        .unwrap_or(ForeignClassMethods {
            allocate: None,
            finalize: None,
        });

    // The symbols are interned at startup even when the host provides no
    // hooks, so the finalizer lookup during sweep always has an index.
    let allocate_symbol = vm.symbols.allocate;
    let finalize_symbol = vm.symbols.finalize;

    if let Some(allocate) = methods.allocate {
        let id = vm.register_foreign(allocate);
        class::bind_method(&mut vm.gc, class, allocate_symbol, Method::Foreign(id));
    }
    if let Some(finalize) = methods.finalize {
        class::bind_method(&mut vm.gc, class, finalize_symbol, Method::Finalizer(finalize));
    }
}

/// `CONSTRUCT` with the foreign flag: invokes the class's `<allocate>` hook
/// with the constructor arguments visible through the slot API. The hook
/// replaces the class in slot 0 of the window with the new foreign object.
pub fn create_foreign(vm: &mut WrenVm, base: usize) {
    // SAFETY: the fiber and its stack are live.
    let class_value = unsafe { (&(*vm.fiber).stack)[base] };
    debug_assert!(class_value.is_class());
    let class = class_value.as_class();
    debug_assert!(unsafe { (*class).is_foreign() }, "class must be a foreign class");

    let method = unsafe { (*class).method(vm.symbols.allocate) };
    let Method::Foreign(id) = method else {
        vm.fiber_abort_str("Foreign class does not have an allocator.");
        return;
    };

    debug_assert!(vm.api_stack.is_none(), "cannot already be in foreign call");
    // The whole constructor window is visible to the allocator.
    // SAFETY: the fiber is live.
    unsafe { (*vm.fiber).api_stack_top = (*vm.fiber).stack.len() };
    vm.api_stack = Some(base);
    let allocate = vm.foreign_methods[id as usize];
    allocate(vm);
    vm.api_stack = None;
    unsafe { (*vm.fiber).api_stack_top = base + 1 };
}

/// `CONSTRUCT` without the foreign flag: replaces the class in the register
/// with a fresh, null-initialized instance.
pub fn construct_instance(vm: &mut WrenVm, slot: usize) {
    // SAFETY: the fiber and its stack are live.
    unsafe {
        let class_value = (&(*vm.fiber).stack)[slot];
        debug_assert!(class_value.is_class(), "'this' should be a class");
        (&mut (*vm.fiber).stack)[slot] = instance::value(&mut vm.gc, class_value.as_class());
    }
}
