//! The tagged value representation.
//!
//! A `Value` is a small `Copy` sum over the scalar variants and a heap
//! pointer. `Undefined` is the sentinel for "absent" map entries and is
//! never observable from script code.

use crate::gc::{ObjHeader, ObjKind};
use crate::objects::class::ObjClass;
use crate::objects::closure::{ObjClosure, ObjUpvalue};
use crate::objects::fiber::ObjFiber;
use crate::objects::foreign::ObjForeign;
use crate::objects::function::ObjFn;
use crate::objects::instance::ObjInstance;
use crate::objects::list::ObjList;
use crate::objects::map::{ObjMap, ObjMapEntry};
use crate::objects::module::ObjModule;
use crate::objects::range::ObjRange;
use crate::objects::string::ObjString;

#[derive(Clone, Copy, Debug)]
pub enum Value {
    Null,
    /// Internal "no value" sentinel, distinct from `Null`.
    Undefined,
    Bool(bool),
    Num(f64),
    Obj(*mut ObjHeader),
}

impl Value {
    pub const TRUE: Value = Value::Bool(true);
    pub const FALSE: Value = Value::Bool(false);

    #[inline]
    pub fn num(n: f64) -> Value {
        Value::Num(n)
    }

    #[inline]
    pub fn obj<T>(ptr: *mut T) -> Value {
        Value::Obj(ptr as *mut ObjHeader)
    }

    #[inline]
    pub fn is_null(self) -> bool {
        matches!(self, Value::Null)
    }

    #[inline]
    pub fn is_undefined(self) -> bool {
        matches!(self, Value::Undefined)
    }

    #[inline]
    pub fn is_bool(self) -> bool {
        matches!(self, Value::Bool(_))
    }

    #[inline]
    pub fn is_false(self) -> bool {
        matches!(self, Value::Bool(false))
    }

    #[inline]
    pub fn is_true(self) -> bool {
        matches!(self, Value::Bool(true))
    }

    #[inline]
    pub fn is_num(self) -> bool {
        matches!(self, Value::Num(_))
    }

    #[inline]
    pub fn is_obj(self) -> bool {
        matches!(self, Value::Obj(_))
    }

    /// Null and false are falsy; everything else is truthy.
    #[inline]
    pub fn is_falsy(self) -> bool {
        matches!(self, Value::Null | Value::Bool(false))
    }

    #[inline]
    pub fn as_bool(self) -> bool {
        match self {
            Value::Bool(b) => b,
            _ => panic!("value is not a bool"),
        }
    }

    #[inline]
    pub fn as_num(self) -> f64 {
        match self {
            Value::Num(n) => n,
            _ => panic!("value is not a number"),
        }
    }

    #[inline]
    pub fn as_obj(self) -> *mut ObjHeader {
        match self {
            Value::Obj(ptr) => ptr,
            _ => panic!("value is not an object"),
        }
    }

    #[inline]
    pub fn obj_kind(self) -> Option<ObjKind> {
        match self {
            // SAFETY: object values always point at a live header.
            Value::Obj(ptr) => Some(unsafe { (*ptr).kind }),
            _ => None,
        }
    }

    #[inline]
    fn is_obj_kind(self, kind: ObjKind) -> bool {
        self.obj_kind() == Some(kind)
    }

    #[inline]
    pub fn is_class(self) -> bool {
        self.is_obj_kind(ObjKind::Class)
    }

    #[inline]
    pub fn is_closure(self) -> bool {
        self.is_obj_kind(ObjKind::Closure)
    }

    #[inline]
    pub fn is_fiber(self) -> bool {
        self.is_obj_kind(ObjKind::Fiber)
    }

    #[inline]
    pub fn is_fn(self) -> bool {
        self.is_obj_kind(ObjKind::Fn)
    }

    #[inline]
    pub fn is_foreign(self) -> bool {
        self.is_obj_kind(ObjKind::Foreign)
    }

    #[inline]
    pub fn is_instance(self) -> bool {
        self.is_obj_kind(ObjKind::Instance)
    }

    #[inline]
    pub fn is_list(self) -> bool {
        self.is_obj_kind(ObjKind::List)
    }

    #[inline]
    pub fn is_map(self) -> bool {
        self.is_obj_kind(ObjKind::Map)
    }

    #[inline]
    pub fn is_map_entry(self) -> bool {
        self.is_obj_kind(ObjKind::MapEntry)
    }

    #[inline]
    pub fn is_module(self) -> bool {
        self.is_obj_kind(ObjKind::Module)
    }

    #[inline]
    pub fn is_range(self) -> bool {
        self.is_obj_kind(ObjKind::Range)
    }

    #[inline]
    pub fn is_string(self) -> bool {
        self.is_obj_kind(ObjKind::String)
    }

    #[inline]
    pub fn as_class(self) -> *mut ObjClass {
        debug_assert!(self.is_class());
        self.as_obj() as *mut ObjClass
    }

    #[inline]
    pub fn as_closure(self) -> *mut ObjClosure {
        debug_assert!(self.is_closure());
        self.as_obj() as *mut ObjClosure
    }

    #[inline]
    pub fn as_fiber(self) -> *mut ObjFiber {
        debug_assert!(self.is_fiber());
        self.as_obj() as *mut ObjFiber
    }

    #[inline]
    pub fn as_fn(self) -> *mut ObjFn {
        debug_assert!(self.is_fn());
        self.as_obj() as *mut ObjFn
    }

    #[inline]
    pub fn as_foreign(self) -> *mut ObjForeign {
        debug_assert!(self.is_foreign());
        self.as_obj() as *mut ObjForeign
    }

    #[inline]
    pub fn as_instance(self) -> *mut ObjInstance {
        debug_assert!(self.is_instance());
        self.as_obj() as *mut ObjInstance
    }

    #[inline]
    pub fn as_list(self) -> *mut ObjList {
        debug_assert!(self.is_list());
        self.as_obj() as *mut ObjList
    }

    #[inline]
    pub fn as_map(self) -> *mut ObjMap {
        debug_assert!(self.is_map());
        self.as_obj() as *mut ObjMap
    }

    #[inline]
    pub fn as_map_entry(self) -> *mut ObjMapEntry {
        debug_assert!(self.is_map_entry());
        self.as_obj() as *mut ObjMapEntry
    }

    #[inline]
    pub fn as_module(self) -> *mut ObjModule {
        debug_assert!(self.is_module());
        self.as_obj() as *mut ObjModule
    }

    #[inline]
    pub fn as_range(self) -> *mut ObjRange {
        debug_assert!(self.is_range());
        self.as_obj() as *mut ObjRange
    }

    #[inline]
    pub fn as_string(self) -> *mut ObjString {
        debug_assert!(self.is_string());
        self.as_obj() as *mut ObjString
    }

    /// The user-facing name of this value's type, for error messages.
    pub fn type_name(self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Undefined => "Undefined",
            Value::Bool(_) => "Bool",
            Value::Num(_) => "Num",
            Value::Obj(ptr) => match unsafe { (*ptr).kind } {
                ObjKind::Class => "Class",
                ObjKind::Closure => "Fn",
                ObjKind::Fiber => "Fiber",
                ObjKind::Fn => "Fn",
                ObjKind::Foreign => "Foreign",
                ObjKind::Instance => "Instance",
                ObjKind::List => "List",
                ObjKind::Map => "Map",
                ObjKind::MapEntry => "MapEntry",
                ObjKind::Module => "Module",
                ObjKind::Range => "Range",
                ObjKind::String => "String",
                ObjKind::Upvalue => "Upvalue",
            },
        }
    }
}

/// Identity equality: same variant, same bits. Numbers compare by value so
/// `0 == -0` holds and `nan != nan`.
#[inline]
pub fn values_same(a: Value, b: Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Undefined, Value::Undefined) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Num(x), Value::Num(y)) => x == y,
        (Value::Obj(x), Value::Obj(y)) => core::ptr::eq(x, y),
        _ => false,
    }
}

/// Structural equality: identity, plus deep comparison of the immutable
/// heap types (ranges and strings).
pub fn values_equal(a: Value, b: Value) -> bool {
    if values_same(a, b) {
        return true;
    }

    let (Value::Obj(a_obj), Value::Obj(b_obj)) = (a, b) else {
        return false;
    };

    // SAFETY: object values point at live headers.
    unsafe {
        if (*a_obj).kind != (*b_obj).kind {
            return false;
        }
        match (*a_obj).kind {
            ObjKind::Range => {
                let ra = &*(a_obj as *const ObjRange);
                let rb = &*(b_obj as *const ObjRange);
                ra.from == rb.from && ra.to == rb.to && ra.is_inclusive == rb.is_inclusive
            }
            ObjKind::String => {
                let sa = &*(a_obj as *const ObjString);
                let sb = &*(b_obj as *const ObjString);
                sa.hash == sb.hash && sa.bytes == sb.bytes
            }
            _ => false,
        }
    }
}

/// Thomas Wang's 64-bit integer mix, truncated to 30 bits.
#[inline]
pub fn hash_bits(bits: u64) -> u32 {
    let mut hash = bits;
    hash = (!hash).wrapping_add(hash << 18);
    hash ^= hash >> 31;
    hash = hash.wrapping_mul(21);
    hash ^= hash >> 11;
    hash = hash.wrapping_add(hash << 6);
    hash ^= hash >> 22;
    (hash & 0x3fff_ffff) as u32
}

#[inline]
fn hash_number(num: f64) -> u32 {
    hash_bits(num.to_bits())
}

fn hash_object(obj: *mut ObjHeader) -> u32 {
    // SAFETY: callers only hash live objects.
    unsafe {
        match (*obj).kind {
            // Classes hash by name.
            ObjKind::Class => hash_object((*(obj as *const ObjClass)).name as *mut ObjHeader),
            ObjKind::Fn => {
                let f = &*(obj as *const ObjFn);
                hash_number(f.arity as f64) ^ hash_number(f.code.len() as f64)
            }
            ObjKind::Closure => {
                let f = &*(*(obj as *const ObjClosure)).fn_obj;
                hash_number(f.arity as f64) ^ hash_number(f.code.len() as f64)
            }
            ObjKind::Range => {
                let r = &*(obj as *const ObjRange);
                hash_number(r.from) ^ hash_number(r.to)
            }
            ObjKind::String => (*(obj as *const ObjString)).hash,
            _ => {
                debug_assert!(false, "only immutable objects can be hashed");
                0
            }
        }
    }
}

/// Hash code of a value accepted by `ops::validate_key`.
pub fn hash_value(value: Value) -> u32 {
    match value {
        Value::Bool(false) => 0,
        Value::Null => 1,
        Value::Bool(true) => 2,
        Value::Num(n) => hash_number(n),
        Value::Obj(obj) => hash_object(obj),
        Value::Undefined => {
            debug_assert!(false, "undefined is not a hashable key");
            3
        }
    }
}
