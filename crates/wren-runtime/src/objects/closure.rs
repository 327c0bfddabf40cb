//! Closures and upvalues.

use crate::gc::{Gc, ObjHeader, ObjKind};
use crate::objects::fiber::ObjFiber;
use crate::objects::function::ObjFn;
use crate::value::Value;

/// Compiler-produced capture descriptor carried by prototype closures and
/// consumed by the `CLOSURE` opcode.
#[derive(Clone, Copy, Debug)]
pub struct CompilerUpvalue {
    /// Capture the enclosing frame's local at `index`, as opposed to
    /// reusing the enclosing closure's upvalue at `index`.
    pub is_local: bool,
    pub index: usize,
}

#[repr(C)]
pub struct ObjClosure {
    pub header: ObjHeader,
    pub fn_obj: *mut ObjFn,
    /// Runtime upvalues, one per `fn_obj.num_upvalues`.
    pub upvalues: Vec<*mut ObjUpvalue>,
    /// Capture descriptors; non-empty only on prototype closures.
    pub proto_upvalues: Vec<CompilerUpvalue>,
}

impl ObjClosure {
    #[inline]
    pub fn is_proto(&self) -> bool {
        !self.proto_upvalues.is_empty()
    }
}

#[derive(Clone, Copy, Debug)]
pub enum UpvalueState {
    /// Still referencing a live stack slot of `fiber`.
    Open { fiber: *mut ObjFiber, slot: usize },
    /// The variable left scope; the upvalue owns the value now.
    Closed(Value),
}

#[repr(C)]
pub struct ObjUpvalue {
    pub header: ObjHeader,
    pub state: UpvalueState,
    /// Link in the owning fiber's open-upvalue list, sorted by decreasing
    /// slot. Null once closed.
    pub next: *mut ObjUpvalue,
}

pub fn new(gc: &mut Gc, function: *mut ObjFn) -> *mut ObjClosure {
    // SAFETY: the function is live.
    let num_upvalues = unsafe { (*function).num_upvalues };
    let closure = ObjClosure {
        header: ObjHeader::new(ObjKind::Closure, gc.core.fn_),
        fn_obj: function,
        // Filled by `CLOSURE`; null until then so a collection in between
        // sees no garbage.
        upvalues: vec![core::ptr::null_mut(); num_upvalues],
        proto_upvalues: Vec::new(),
    };
    gc.link(Box::new(closure))
}

/// A compiler-side prototype closure carrying capture descriptors.
pub fn new_proto(
    gc: &mut Gc,
    function: *mut ObjFn,
    proto_upvalues: Vec<CompilerUpvalue>,
) -> *mut ObjClosure {
    let closure = new(gc, function);
    // SAFETY: just allocated.
    unsafe { (*closure).proto_upvalues = proto_upvalues };
    closure
}

pub fn new_upvalue(gc: &mut Gc, fiber: *mut ObjFiber, slot: usize) -> *mut ObjUpvalue {
    let upvalue = ObjUpvalue {
        header: ObjHeader::new(ObjKind::Upvalue, core::ptr::null_mut()),
        state: UpvalueState::Open { fiber, slot },
        next: core::ptr::null_mut(),
    };
    gc.link(Box::new(upvalue))
}

/// Reads through an upvalue, open or closed.
#[inline]
pub fn load(upvalue: *mut ObjUpvalue) -> Value {
    // SAFETY: upvalues and their owning fibers are kept live by the GC.
    unsafe {
        match (*upvalue).state {
            UpvalueState::Open { fiber, slot } => (&(*fiber).stack)[slot],
            UpvalueState::Closed(value) => value,
        }
    }
}

/// Writes through an upvalue, open or closed.
#[inline]
pub fn store(upvalue: *mut ObjUpvalue, value: Value) {
    // SAFETY: upvalues and their owning fibers are kept live by the GC.
    unsafe {
        match (*upvalue).state {
            UpvalueState::Open { fiber, slot } => (&mut (*fiber).stack)[slot] = value,
            UpvalueState::Closed(_) => (*upvalue).state = UpvalueState::Closed(value),
        }
    }
}
