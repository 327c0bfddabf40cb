//! Instance objects: a class pointer plus its field storage.

use crate::gc::{Gc, ObjHeader, ObjKind};
use crate::objects::class::ObjClass;
use crate::value::Value;

#[repr(C)]
pub struct ObjInstance {
    pub header: ObjHeader,
    pub fields: Box<[Value]>,
}

pub fn new(gc: &mut Gc, class: *mut ObjClass) -> *mut ObjInstance {
    // SAFETY: the class is live; foreign classes never reach here.
    let num_fields = unsafe { (*class).num_fields };
    debug_assert!(num_fields >= 0, "class must not be foreign");
    let instance = ObjInstance {
        header: ObjHeader::new(ObjKind::Instance, class),
        fields: vec![Value::Null; num_fields as usize].into_boxed_slice(),
    };
    gc.link(Box::new(instance))
}

pub fn value(gc: &mut Gc, class: *mut ObjClass) -> Value {
    Value::obj(new(gc, class))
}
