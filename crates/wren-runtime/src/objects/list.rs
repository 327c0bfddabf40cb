//! List object operations.

use crate::gc::{Gc, ObjHeader, ObjKind};
use crate::value::{values_equal, Value};

#[repr(C)]
pub struct ObjList {
    pub header: ObjHeader,
    pub elements: Vec<Value>,
}

impl ObjList {
    #[inline]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

pub fn new(gc: &mut Gc, num_elements: usize) -> *mut ObjList {
    let list = ObjList {
        header: ObjHeader::new(ObjKind::List, gc.core.list),
        elements: vec![Value::Null; num_elements],
    };
    gc.link(Box::new(list))
}

pub fn value(gc: &mut Gc, num_elements: usize) -> Value {
    Value::obj(new(gc, num_elements))
}

pub fn append(gc: &mut Gc, list: *mut ObjList, element: Value) {
    // SAFETY: callers pass a live list.
    let elements = unsafe { &mut (*list).elements };
    let old_capacity = elements.capacity();
    elements.push(element);
    if elements.capacity() > old_capacity {
        gc.add_bytes((elements.capacity() - old_capacity) * core::mem::size_of::<Value>());
    }
}

pub fn insert(gc: &mut Gc, list: *mut ObjList, element: Value, index: usize) {
    // SAFETY: callers validate the index against the live list.
    let elements = unsafe { &mut (*list).elements };
    debug_assert!(index <= elements.len(), "index out of bounds");
    let old_capacity = elements.capacity();
    elements.insert(index, element);
    if elements.capacity() > old_capacity {
        gc.add_bytes((elements.capacity() - old_capacity) * core::mem::size_of::<Value>());
    }
}

pub fn remove_at(list: *mut ObjList, index: usize) -> Value {
    // SAFETY: callers validate the index against the live list.
    let elements = unsafe { &mut (*list).elements };
    debug_assert!(index < elements.len(), "index out of bounds");
    elements.remove(index)
}

/// Lowest index holding an element equal to `element`, or -1 when absent.
pub fn index_of(list: *mut ObjList, element: Value) -> i64 {
    // SAFETY: callers pass a live list.
    let elements = unsafe { &(*list).elements };
    for (index, &item) in elements.iter().enumerate() {
        if values_equal(item, element) {
            return index as i64;
        }
    }
    -1
}

/// A new list holding `times` shallow copies of `list`'s elements. `times`
/// of 1 is how `LOADK` copies a list constant.
pub fn repeat(gc: &mut Gc, list: *mut ObjList, times: usize) -> *mut ObjList {
    // SAFETY: callers pass a live list; the new allocation cannot move it.
    let source: Vec<Value> = unsafe { (*list).elements.clone() };
    let result = new(gc, 0);
    let elements = unsafe { &mut (*result).elements };
    elements.reserve(source.len() * times);
    for _ in 0..times {
        elements.extend_from_slice(&source);
    }
    gc.add_bytes(elements.capacity() * core::mem::size_of::<Value>());
    result
}

/// A new list holding the elements of `a` followed by the elements of `b`.
pub fn concat(gc: &mut Gc, a: *mut ObjList, b: *mut ObjList) -> *mut ObjList {
    // SAFETY: callers pass live lists; cloning first keeps them safe across
    // the allocation below.
    let mut combined: Vec<Value> = unsafe { (*a).elements.clone() };
    unsafe { combined.extend_from_slice(&(*b).elements) };
    let result = new(gc, 0);
    unsafe { (*result).elements = combined };
    result
}
