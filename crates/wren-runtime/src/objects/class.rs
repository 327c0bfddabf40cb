//! Class objects, method tables and the metaclass machinery.

use crate::gc::{Gc, ObjHeader, ObjKind};
use crate::objects::closure::ObjClosure;
use crate::objects::string::{self, FmtArg, ObjString};
use crate::value::Value;

/// Called while a foreign object is swept; receives its payload bytes.
pub type FinalizerFn = fn(*mut u8);

/// One entry in a class's method table. Primitives and foreign methods are
/// dense indices into registries owned by the VM, so the heap never holds a
/// host function pointer with a VM-typed signature.
#[derive(Clone, Copy, Debug)]
pub enum Method {
    /// No method bound at this symbol.
    None,
    /// Engine-implemented method; index into the VM's primitive registry.
    Primitive(u32),
    /// The arity-checked `call(...)` family on closures; the interpreter
    /// handles it inline.
    FunctionCall,
    /// A method compiled to bytecode.
    Block(*mut ObjClosure),
    /// Host-implemented method; index into the VM's foreign registry.
    Foreign(u32),
    /// The `<finalize>` hook of a foreign class.
    Finalizer(FinalizerFn),
}

impl Method {
    #[inline]
    pub fn is_none(&self) -> bool {
        matches!(self, Method::None)
    }
}

/// Total fields per class, including inherited ones.
pub const MAX_FIELDS: i32 = 255;

#[repr(C)]
pub struct ObjClass {
    pub header: ObjHeader,
    pub superclass: *mut ObjClass,
    /// -1 marks a foreign class.
    pub num_fields: i32,
    /// Dense array indexed by method symbol.
    pub methods: Vec<Method>,
    pub name: *mut ObjString,
    pub attributes: Value,
}

impl ObjClass {
    #[inline]
    pub fn is_foreign(&self) -> bool {
        self.num_fields == -1
    }

    /// The method bound at `symbol`, if any.
    #[inline]
    pub fn method(&self, symbol: u32) -> Method {
        self.methods
            .get(symbol as usize)
            .copied()
            .unwrap_or(Method::None)
    }

    pub fn name_str(&self) -> std::borrow::Cow<'_, str> {
        if self.name.is_null() {
            return std::borrow::Cow::Borrowed("?");
        }
        // SAFETY: class names are live strings.
        unsafe { (*self.name).to_display() }
    }
}

/// Creates a bare class with no superclass and no metaclass wiring.
pub fn new_single_class(gc: &mut Gc, num_fields: i32, name: *mut ObjString) -> *mut ObjClass {
    let class = ObjClass {
        header: ObjHeader::new(ObjKind::Class, core::ptr::null_mut()),
        superclass: core::ptr::null_mut(),
        num_fields,
        methods: Vec::new(),
        name,
        attributes: Value::Null,
    };
    gc.link(Box::new(class))
}

/// Wires `superclass` in and inherits its method table by dense symbol copy.
pub fn bind_superclass(gc: &mut Gc, subclass: *mut ObjClass, superclass: *mut ObjClass) {
    debug_assert!(!superclass.is_null(), "must have superclass");
    // SAFETY: both classes are live.
    unsafe {
        (*subclass).superclass = superclass;

        // Include the superclass fields in the total.
        if (*subclass).num_fields != -1 {
            (*subclass).num_fields += (*superclass).num_fields;
        } else {
            debug_assert!(
                (*superclass).num_fields == 0,
                "a foreign class cannot inherit from a class with fields"
            );
        }

        for symbol in 0..(*superclass).methods.len() {
            bind_method(gc, subclass, symbol as u32, (&(*superclass).methods)[symbol]);
        }
    }
}

/// Creates a class complete with its metaclass. The metaclass inherits from
/// the root `Class` class; the class itself inherits `superclass`.
pub fn new_class(
    gc: &mut Gc,
    superclass: *mut ObjClass,
    num_fields: i32,
    name: *mut ObjString,
) -> *mut ObjClass {
    // SAFETY: the name is live and rooted by the caller.
    let metaclass_name_text = format!("{} metaclass", unsafe { (*name).to_display() });
    let metaclass_name = string::new(gc, &metaclass_name_text);
    gc.push_root(metaclass_name);

    let metaclass = new_single_class(gc, 0, metaclass_name);
    gc.pop_root();

    // Keep the metaclass alive while the class is allocated.
    gc.push_root(metaclass);

    // SAFETY: just created; the class-of-classes pointer is the bootstrap
    // Class class.
    unsafe {
        (*metaclass).header.class_obj = gc.core.class;
    }

    // Metaclasses always inherit Class and do not parallel the non-metaclass
    // hierarchy.
    bind_superclass(gc, metaclass, gc.core.class);

    let class = new_single_class(gc, num_fields, name);
    gc.push_root(class);

    unsafe {
        (*class).header.class_obj = metaclass;
    }
    bind_superclass(gc, class, superclass);

    gc.pop_root();
    gc.pop_root();

    class
}

/// Binds `method` at `symbol`, padding the table with `None` as needed.
pub fn bind_method(gc: &mut Gc, class: *mut ObjClass, symbol: u32, method: Method) {
    // SAFETY: the class is live.
    let methods = unsafe { &mut (*class).methods };
    let old_capacity = methods.capacity();
    if symbol as usize >= methods.len() {
        methods.resize(symbol as usize + 1, Method::None);
    }
    methods[symbol as usize] = method;
    if methods.capacity() > old_capacity {
        gc.add_bytes((methods.capacity() - old_capacity) * core::mem::size_of::<Method>());
    }
}

/// Checks that `superclass_value` may be inherited from by a class named
/// `name` declaring `num_fields` fields (-1 for foreign). Returns the error
/// message on failure.
pub fn validate_superclass(
    gc: &mut Gc,
    name: Value,
    superclass_value: Value,
    num_fields: i32,
) -> Result<*mut ObjClass, Value> {
    if !superclass_value.is_class() {
        return Err(string::format_value(
            gc,
            "Class '@' cannot inherit from a non-class object.",
            &[FmtArg::Val(name)],
        ));
    }

    let superclass = superclass_value.as_class();

    // The sealed built-ins: their primitive methods assume the receiver has
    // one of the built-in layouts, not an ObjInstance.
    let core = &gc.core;
    let sealed = [
        core.class,
        core.fiber,
        core.fn_,
        core.list,
        core.map,
        core.range,
        core.string,
        core.bool_,
        core.null,
        core.num,
    ];
    if sealed.contains(&superclass) {
        // SAFETY: the superclass is a live class.
        let super_name = unsafe { Value::obj((*superclass).name) };
        return Err(string::format_value(
            gc,
            "Class '@' cannot inherit from built-in class '@'.",
            &[FmtArg::Val(name), FmtArg::Val(super_name)],
        ));
    }

    // SAFETY: the superclass is a live class.
    unsafe {
        if (*superclass).num_fields == -1 {
            let super_name = Value::obj((*superclass).name);
            return Err(string::format_value(
                gc,
                "Class '@' cannot inherit from foreign class '@'.",
                &[FmtArg::Val(name), FmtArg::Val(super_name)],
            ));
        }

        if num_fields == -1 && (*superclass).num_fields > 0 {
            return Err(string::format_value(
                gc,
                "Foreign class '@' may not inherit from a class with fields.",
                &[FmtArg::Val(name)],
            ));
        }

        if (*superclass).num_fields + num_fields > MAX_FIELDS {
            return Err(string::format_value(
                gc,
                "Class '@' may not have more than 255 fields, including inherited ones.",
                &[FmtArg::Val(name)],
            ));
        }
    }

    Ok(superclass)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gc() -> Gc {
        Gc::new(1024 * 1024, 1024, 50)
    }

    #[test]
    fn bind_method_pads_with_none() {
        let mut gc = gc();
        let name = string::new(&mut gc, "Thing");
        let class = new_single_class(&mut gc, 0, name);
        bind_method(&mut gc, class, 5, Method::Primitive(7));
        unsafe {
            assert_eq!((*class).methods.len(), 6);
            assert!((*class).method(0).is_none());
            assert!(matches!((*class).method(5), Method::Primitive(7)));
            assert!((*class).method(99).is_none());
        }
    }

    #[test]
    fn subclass_inherits_methods_and_fields() {
        let mut gc = gc();
        let base_name = string::new(&mut gc, "Base");
        let base = new_single_class(&mut gc, 2, base_name);
        bind_method(&mut gc, base, 0, Method::Primitive(1));
        bind_method(&mut gc, base, 3, Method::Primitive(2));

        let sub_name = string::new(&mut gc, "Sub");
        let sub = new_single_class(&mut gc, 1, sub_name);
        bind_superclass(&mut gc, sub, base);

        unsafe {
            assert_eq!((*sub).superclass, base);
            assert_eq!((*sub).num_fields, 3);
            assert!(matches!((*sub).method(0), Method::Primitive(1)));
            assert!((*sub).method(1).is_none());
            assert!(matches!((*sub).method(3), Method::Primitive(2)));
        }
    }
}
