//! Foreign objects: host-defined payload bytes owned by a foreign class.

use crate::gc::{Gc, ObjHeader, ObjKind};
use crate::objects::class::ObjClass;
use crate::value::Value;

#[repr(C)]
pub struct ObjForeign {
    pub header: ObjHeader,
    /// Host payload, zero-filled at creation.
    pub data: Box<[u8]>,
}

pub fn new(gc: &mut Gc, class: *mut ObjClass, size: usize) -> *mut ObjForeign {
    debug_assert!(
        // SAFETY: the class is live.
        unsafe { (*class).num_fields == -1 },
        "class must be a foreign class"
    );
    let foreign = ObjForeign {
        header: ObjHeader::new(ObjKind::Foreign, class),
        data: vec![0u8; size].into_boxed_slice(),
    };
    gc.link(Box::new(foreign))
}

pub fn value(gc: &mut Gc, class: *mut ObjClass, size: usize) -> Value {
    Value::obj(new(gc, class, size))
}
