//! Primitive methods of the built-in classes (fibers live in `fiber.rs`).
//!
//! Every primitive follows the same contract: receiver at `base`, arguments
//! after it, result stored back into the receiver slot. Returning false
//! means the fiber aborted or switched.

use wren_runtime::objects::string;
use wren_runtime::objects::{list, map};
use wren_runtime::value::values_equal;
use wren_runtime::{ops, Value};

use crate::vm::WrenVm;

use super::{abort, abort_str, arg, ret};

/// Shared by the `System` output primitives and `toString` fallbacks.
pub(crate) fn stringify(vm: &mut WrenVm, value: Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Undefined => "undefined".to_string(),
        Value::Bool(true) => "true".to_string(),
        Value::Bool(false) => "false".to_string(),
        Value::Num(n) => string::num_to_display(n),
        _ if value.is_string() => {
            // SAFETY: string values point at live strings.
            unsafe { (*value.as_string()).to_display().into_owned() }
        }
        _ if value.is_class() => {
            // SAFETY: class values point at live classes.
            unsafe { (*value.as_class()).name_str().into_owned() }
        }
        _ => {
            let class = vm.class_of(value);
            if class.is_null() {
                value.type_name().to_string()
            } else {
                // SAFETY: classes are live.
                format!("instance of {}", unsafe { (*class).name_str() })
            }
        }
    }
}

// =============================================================================
// Object
// =============================================================================

pub fn object_not(vm: &mut WrenVm, base: usize) -> bool {
    ret(vm, base, Value::FALSE)
}

pub fn object_eqeq(vm: &mut WrenVm, base: usize) -> bool {
    let result = values_equal(arg(vm, base, 0), arg(vm, base, 1));
    ret(vm, base, Value::Bool(result))
}

pub fn object_bangeq(vm: &mut WrenVm, base: usize) -> bool {
    let result = values_equal(arg(vm, base, 0), arg(vm, base, 1));
    ret(vm, base, Value::Bool(!result))
}

pub fn object_is(vm: &mut WrenVm, base: usize) -> bool {
    let expected = arg(vm, base, 1);
    if !expected.is_class() {
        return abort_str(vm, "Right operand must be a class.");
    }
    let expected = expected.as_class();

    let mut class = vm.class_of(arg(vm, base, 0));
    // Walk the superclass chain looking for the expected class.
    while !class.is_null() {
        if class == expected {
            return ret(vm, base, Value::TRUE);
        }
        // SAFETY: classes along the chain are live.
        class = unsafe { (*class).superclass };
    }
    ret(vm, base, Value::FALSE)
}

pub fn object_to_string(vm: &mut WrenVm, base: usize) -> bool {
    let receiver = arg(vm, base, 0);
    let text = stringify(vm, receiver);
    let value = string::value(&mut vm.gc, &text);
    ret(vm, base, value)
}

pub fn object_type(vm: &mut WrenVm, base: usize) -> bool {
    let class = vm.class_of(arg(vm, base, 0));
    ret(vm, base, Value::obj(class))
}

pub fn object_same(vm: &mut WrenVm, base: usize) -> bool {
    let result = values_equal(arg(vm, base, 1), arg(vm, base, 2));
    ret(vm, base, Value::Bool(result))
}

// =============================================================================
// Class
// =============================================================================

pub fn class_name(vm: &mut WrenVm, base: usize) -> bool {
    let class = arg(vm, base, 0).as_class();
    // SAFETY: the receiver is a live class.
    let name = unsafe { Value::obj((*class).name) };
    ret(vm, base, name)
}

pub fn class_supertype(vm: &mut WrenVm, base: usize) -> bool {
    let class = arg(vm, base, 0).as_class();
    // SAFETY: the receiver is a live class.
    let superclass = unsafe { (*class).superclass };
    if superclass.is_null() {
        // Object has no superclass.
        ret(vm, base, Value::Null)
    } else {
        ret(vm, base, Value::obj(superclass))
    }
}

pub fn class_to_string(vm: &mut WrenVm, base: usize) -> bool {
    class_name(vm, base)
}

// =============================================================================
// Bool and Null
// =============================================================================

pub fn bool_not(vm: &mut WrenVm, base: usize) -> bool {
    let value = !arg(vm, base, 0).as_bool();
    ret(vm, base, Value::Bool(value))
}

pub fn bool_to_string(vm: &mut WrenVm, base: usize) -> bool {
    let text = if arg(vm, base, 0).as_bool() { "true" } else { "false" };
    let value = string::value(&mut vm.gc, text);
    ret(vm, base, value)
}

pub fn null_not(vm: &mut WrenVm, base: usize) -> bool {
    ret(vm, base, Value::TRUE)
}

pub fn null_to_string(vm: &mut WrenVm, base: usize) -> bool {
    let value = string::value(&mut vm.gc, "null");
    ret(vm, base, value)
}

// =============================================================================
// Num
// =============================================================================

macro_rules! num_binary {
    ($name:ident, $fallback:path) => {
        pub fn $name(vm: &mut WrenVm, base: usize) -> bool {
            let left = arg(vm, base, 0);
            let right = arg(vm, base, 1);
            match $fallback(&mut vm.gc, left, right) {
                Ok(value) => ret(vm, base, value),
                Err(error) => abort(vm, error),
            }
        }
    };
}

num_binary!(num_plus, ops::add);
num_binary!(num_minus, ops::subtract);
num_binary!(num_star, ops::multiply);
num_binary!(num_slash, ops::divide);

macro_rules! num_compare {
    ($name:ident, $op:tt) => {
        pub fn $name(vm: &mut WrenVm, base: usize) -> bool {
            let left = arg(vm, base, 0).as_num();
            let right_value = arg(vm, base, 1);
            let right = match ops::validate_num(&mut vm.gc, right_value, "Right operand") {
                Ok(num) => num,
                Err(error) => return abort(vm, error),
            };
            ret(vm, base, Value::Bool(left $op right))
        }
    };
}

num_compare!(num_lt, <);
num_compare!(num_lte, <=);
num_compare!(num_gt, >);
num_compare!(num_gte, >=);

pub fn num_negate(vm: &mut WrenVm, base: usize) -> bool {
    let value = -arg(vm, base, 0).as_num();
    ret(vm, base, Value::Num(value))
}

pub fn num_abs(vm: &mut WrenVm, base: usize) -> bool {
    let value = arg(vm, base, 0).as_num().abs();
    ret(vm, base, Value::Num(value))
}

pub fn num_floor(vm: &mut WrenVm, base: usize) -> bool {
    let value = arg(vm, base, 0).as_num().floor();
    ret(vm, base, Value::Num(value))
}

pub fn num_to_string(vm: &mut WrenVm, base: usize) -> bool {
    let number = arg(vm, base, 0).as_num();
    let value = Value::obj(string::num_to_string(&mut vm.gc, number));
    ret(vm, base, value)
}

// =============================================================================
// String
// =============================================================================

pub fn string_from_code_point(vm: &mut WrenVm, base: usize) -> bool {
    let argument = arg(vm, base, 1);
    let code_point = match ops::validate_int(&mut vm.gc, argument, "Code point") {
        Ok(num) => num,
        Err(error) => return abort(vm, error),
    };
    if code_point < 0.0 {
        return abort_str(vm, "Code point cannot be negative.");
    }
    if code_point > 0x10FFFF as f64 {
        return abort_str(vm, "Code point cannot be greater than 0x10ffff.");
    }

    let value = Value::obj(string::from_code_point(&mut vm.gc, code_point as u32));
    ret(vm, base, value)
}

pub fn string_from_byte(vm: &mut WrenVm, base: usize) -> bool {
    let argument = arg(vm, base, 1);
    let byte = match ops::validate_int(&mut vm.gc, argument, "Byte") {
        Ok(num) => num,
        Err(error) => return abort(vm, error),
    };
    if byte < 0.0 {
        return abort_str(vm, "Byte cannot be negative.");
    }
    if byte > 0xFF as f64 {
        return abort_str(vm, "Byte cannot be greater than 0xff.");
    }

    let value = Value::obj(string::from_byte(&mut vm.gc, byte as u8));
    ret(vm, base, value)
}

pub fn string_plus(vm: &mut WrenVm, base: usize) -> bool {
    let left = arg(vm, base, 0);
    let right = arg(vm, base, 1);
    match ops::add(&mut vm.gc, left, right) {
        Ok(value) => ret(vm, base, value),
        Err(error) => abort(vm, error),
    }
}

pub fn string_count(vm: &mut WrenVm, base: usize) -> bool {
    // Code points, not bytes: count the non-continuation bytes.
    let receiver = arg(vm, base, 0).as_string();
    // SAFETY: the receiver is a live string.
    let count = unsafe {
        (*receiver)
            .as_bytes()
            .iter()
            .filter(|&&byte| byte & 0xC0 != 0x80)
            .count()
    };
    ret(vm, base, Value::Num(count as f64))
}

pub fn string_byte_count(vm: &mut WrenVm, base: usize) -> bool {
    let receiver = arg(vm, base, 0).as_string();
    // SAFETY: the receiver is a live string.
    let count = unsafe { (*receiver).len() };
    ret(vm, base, Value::Num(count as f64))
}

pub fn string_contains(vm: &mut WrenVm, base: usize) -> bool {
    let other = arg(vm, base, 1);
    if !other.is_string() {
        return abort_str(vm, "Argument must be a string.");
    }
    let receiver = arg(vm, base, 0).as_string();
    // SAFETY: both strings are live.
    let found = unsafe {
        string::find((*receiver).as_bytes(), (*other.as_string()).as_bytes(), 0).is_some()
    };
    ret(vm, base, Value::Bool(found))
}

pub fn string_index_of(vm: &mut WrenVm, base: usize) -> bool {
    let other = arg(vm, base, 1);
    if !other.is_string() {
        return abort_str(vm, "Argument must be a string.");
    }
    let receiver = arg(vm, base, 0).as_string();
    // SAFETY: both strings are live.
    let index = unsafe {
        string::find((*receiver).as_bytes(), (*other.as_string()).as_bytes(), 0)
            .map(|index| index as f64)
            .unwrap_or(-1.0)
    };
    ret(vm, base, Value::Num(index))
}

macro_rules! via_ops2 {
    ($name:ident, $fallback:path) => {
        pub fn $name(vm: &mut WrenVm, base: usize) -> bool {
            let receiver = arg(vm, base, 0);
            let argument = arg(vm, base, 1);
            match $fallback(&mut vm.gc, receiver, argument) {
                Ok(value) => ret(vm, base, value),
                Err(error) => abort(vm, error),
            }
        }
    };
}

via_ops2!(string_iterate, ops::iterate);
via_ops2!(string_iterator_value, ops::iterator_value);
via_ops2!(string_subscript, ops::subscript);

pub fn string_to_string(vm: &mut WrenVm, base: usize) -> bool {
    let receiver = arg(vm, base, 0);
    ret(vm, base, receiver)
}

// =============================================================================
// List
// =============================================================================

pub fn list_new(vm: &mut WrenVm, base: usize) -> bool {
    let value = list::value(&mut vm.gc, 0);
    ret(vm, base, value)
}

pub fn list_add(vm: &mut WrenVm, base: usize) -> bool {
    let receiver = arg(vm, base, 0).as_list();
    let element = arg(vm, base, 1);
    list::append(&mut vm.gc, receiver, element);
    ret(vm, base, element)
}

pub fn list_clear(vm: &mut WrenVm, base: usize) -> bool {
    let receiver = arg(vm, base, 0).as_list();
    // SAFETY: the receiver is a live list.
    unsafe { (*receiver).elements.clear() };
    ret(vm, base, Value::Null)
}

pub fn list_count(vm: &mut WrenVm, base: usize) -> bool {
    let receiver = arg(vm, base, 0).as_list();
    // SAFETY: the receiver is a live list.
    let count = unsafe { (*receiver).len() };
    ret(vm, base, Value::Num(count as f64))
}

pub fn list_insert(vm: &mut WrenVm, base: usize) -> bool {
    let receiver = arg(vm, base, 0).as_list();
    // SAFETY: the receiver is a live list.
    let count = unsafe { (*receiver).len() };
    // Insertion allows one index past the end.
    let index_value = arg(vm, base, 1);
    let index = match ops::validate_index(&mut vm.gc, index_value, count + 1, "Index") {
        Ok(index) => index,
        Err(error) => return abort(vm, error),
    };
    let element = arg(vm, base, 2);
    list::insert(&mut vm.gc, receiver, element, index);
    ret(vm, base, element)
}

pub fn list_index_of(vm: &mut WrenVm, base: usize) -> bool {
    let receiver = arg(vm, base, 0).as_list();
    let index = list::index_of(receiver, arg(vm, base, 1));
    ret(vm, base, Value::Num(index as f64))
}

pub fn list_remove_at(vm: &mut WrenVm, base: usize) -> bool {
    let receiver = arg(vm, base, 0).as_list();
    // SAFETY: the receiver is a live list.
    let count = unsafe { (*receiver).len() };
    let index_value = arg(vm, base, 1);
    let index = match ops::validate_index(&mut vm.gc, index_value, count, "Index") {
        Ok(index) => index,
        Err(error) => return abort(vm, error),
    };
    let removed = list::remove_at(receiver, index);
    ret(vm, base, removed)
}

via_ops2!(list_iterate, ops::iterate);
via_ops2!(list_iterator_value, ops::iterator_value);
via_ops2!(list_subscript, ops::subscript);

pub fn list_subscript_setter(vm: &mut WrenVm, base: usize) -> bool {
    let receiver = arg(vm, base, 0);
    let index = arg(vm, base, 1);
    let value = arg(vm, base, 2);
    match ops::set_subscript(&mut vm.gc, receiver, index, value) {
        Ok(value) => ret(vm, base, value),
        Err(error) => abort(vm, error),
    }
}

// =============================================================================
// Map
// =============================================================================

pub fn map_new(vm: &mut WrenVm, base: usize) -> bool {
    let value = map::value(&mut vm.gc);
    ret(vm, base, value)
}

pub fn map_clear(vm: &mut WrenVm, base: usize) -> bool {
    map::clear(arg(vm, base, 0).as_map());
    ret(vm, base, Value::Null)
}

pub fn map_contains_key(vm: &mut WrenVm, base: usize) -> bool {
    let key = arg(vm, base, 1);
    if let Err(error) = ops::validate_key(&mut vm.gc, key) {
        return abort(vm, error);
    }
    let contains = map::contains(arg(vm, base, 0).as_map(), key);
    ret(vm, base, Value::Bool(contains))
}

pub fn map_count(vm: &mut WrenVm, base: usize) -> bool {
    let receiver = arg(vm, base, 0).as_map();
    // SAFETY: the receiver is a live map.
    let count = unsafe { (*receiver).count };
    ret(vm, base, Value::Num(count as f64))
}

pub fn map_remove(vm: &mut WrenVm, base: usize) -> bool {
    let key = arg(vm, base, 1);
    if let Err(error) = ops::validate_key(&mut vm.gc, key) {
        return abort(vm, error);
    }
    let receiver = arg(vm, base, 0).as_map();
    let removed = map::remove(&mut vm.gc, receiver, key);
    ret(vm, base, removed)
}

via_ops2!(map_iterate, ops::iterate);
via_ops2!(map_iterator_value, ops::iterator_value);
via_ops2!(map_subscript, ops::subscript);

pub fn map_subscript_setter(vm: &mut WrenVm, base: usize) -> bool {
    let receiver = arg(vm, base, 0);
    let key = arg(vm, base, 1);
    let value = arg(vm, base, 2);
    match ops::set_subscript(&mut vm.gc, receiver, key, value) {
        Ok(value) => ret(vm, base, value),
        Err(error) => abort(vm, error),
    }
}

// =============================================================================
// MapEntry
// =============================================================================

pub fn map_entry_key(vm: &mut WrenVm, base: usize) -> bool {
    let entry = arg(vm, base, 0).as_map_entry();
    // SAFETY: the receiver is a live entry.
    let key = unsafe { (*entry).key };
    ret(vm, base, key)
}

pub fn map_entry_value(vm: &mut WrenVm, base: usize) -> bool {
    let entry = arg(vm, base, 0).as_map_entry();
    // SAFETY: the receiver is a live entry.
    let value = unsafe { (*entry).value };
    ret(vm, base, value)
}

// =============================================================================
// Range
// =============================================================================

pub fn range_from(vm: &mut WrenVm, base: usize) -> bool {
    let range = arg(vm, base, 0).as_range();
    // SAFETY: the receiver is a live range.
    let from = unsafe { (*range).from };
    ret(vm, base, Value::Num(from))
}

pub fn range_to(vm: &mut WrenVm, base: usize) -> bool {
    let range = arg(vm, base, 0).as_range();
    // SAFETY: the receiver is a live range.
    let to = unsafe { (*range).to };
    ret(vm, base, Value::Num(to))
}

pub fn range_min(vm: &mut WrenVm, base: usize) -> bool {
    let range = arg(vm, base, 0).as_range();
    // SAFETY: the receiver is a live range.
    let min = unsafe { (*range).from.min((*range).to) };
    ret(vm, base, Value::Num(min))
}

pub fn range_max(vm: &mut WrenVm, base: usize) -> bool {
    let range = arg(vm, base, 0).as_range();
    // SAFETY: the receiver is a live range.
    let max = unsafe { (*range).from.max((*range).to) };
    ret(vm, base, Value::Num(max))
}

pub fn range_is_inclusive(vm: &mut WrenVm, base: usize) -> bool {
    let range = arg(vm, base, 0).as_range();
    // SAFETY: the receiver is a live range.
    let inclusive = unsafe { (*range).is_inclusive };
    ret(vm, base, Value::Bool(inclusive))
}

via_ops2!(range_iterate, ops::iterate);
via_ops2!(range_iterator_value, ops::iterator_value);

// =============================================================================
// Fn
// =============================================================================

pub fn fn_new(vm: &mut WrenVm, base: usize) -> bool {
    let argument = arg(vm, base, 1);
    if !argument.is_closure() {
        return abort_str(vm, "Argument must be a function.");
    }
    // The block argument is already a closure; Fn.new just passes it
    // through.
    ret(vm, base, argument)
}

pub fn fn_arity(vm: &mut WrenVm, base: usize) -> bool {
    let closure = arg(vm, base, 0).as_closure();
    // SAFETY: the receiver closure and its function are live.
    let arity = unsafe { (*(*closure).fn_obj).arity };
    ret(vm, base, Value::Num(arity as f64))
}

pub fn fn_to_string(vm: &mut WrenVm, base: usize) -> bool {
    let value = string::value(&mut vm.gc, "<fn>");
    ret(vm, base, value)
}

// =============================================================================
// System
// =============================================================================

fn write_text(vm: &mut WrenVm, text: &str) {
    if let Some(write) = vm.config.write {
        write(vm, text);
    }
}

pub fn system_print(vm: &mut WrenVm, base: usize) -> bool {
    let value = arg(vm, base, 1);
    let mut text = stringify(vm, value);
    text.push('\n');
    write_text(vm, &text);
    ret(vm, base, value)
}

pub fn system_write(vm: &mut WrenVm, base: usize) -> bool {
    let value = arg(vm, base, 1);
    let text = stringify(vm, value);
    write_text(vm, &text);
    ret(vm, base, value)
}
