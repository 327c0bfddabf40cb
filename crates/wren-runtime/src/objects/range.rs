//! Range object operations.

use crate::gc::{Gc, ObjHeader, ObjKind};
use crate::value::Value;

#[repr(C)]
pub struct ObjRange {
    pub header: ObjHeader,
    pub from: f64,
    pub to: f64,
    pub is_inclusive: bool,
}

pub fn new(gc: &mut Gc, from: f64, to: f64, is_inclusive: bool) -> *mut ObjRange {
    let range = ObjRange {
        header: ObjHeader::new(ObjKind::Range, gc.core.range),
        from,
        to,
        is_inclusive,
    };
    gc.link(Box::new(range))
}

pub fn value(gc: &mut Gc, from: f64, to: f64, is_inclusive: bool) -> Value {
    Value::obj(new(gc, from, to, is_inclusive))
}
