//! Built-in fallbacks behind the operator, subscript and iteration opcodes.
//!
//! The interpreter reaches these after the overload fast path declines.
//! Fallible operations return `Result<Value, Value>` where the error is the
//! runtime-error message the VM stores into the fiber's error slot.

use crate::gc::Gc;
use crate::objects::map::{self, ObjMap};
use crate::objects::range::ObjRange;
use crate::objects::string::{self, FmtArg, ObjString};
use crate::objects::{list, ObjList};
use crate::value::Value;

// =============================================================================
// Validation helpers
// =============================================================================

pub fn validate_num(gc: &mut Gc, value: Value, arg_name: &str) -> Result<f64, Value> {
    match value {
        Value::Num(n) => Ok(n),
        _ => Err(string::format_value(
            gc,
            "$ must be a number.",
            &[FmtArg::Str(arg_name)],
        )),
    }
}

pub fn validate_int_value(gc: &mut Gc, value: f64, arg_name: &str) -> Result<f64, Value> {
    if value.trunc() == value {
        Ok(value)
    } else {
        Err(string::format_value(
            gc,
            "$ must be an integer.",
            &[FmtArg::Str(arg_name)],
        ))
    }
}

pub fn validate_int(gc: &mut Gc, value: Value, arg_name: &str) -> Result<f64, Value> {
    let num = validate_num(gc, value, arg_name)?;
    validate_int_value(gc, num, arg_name)
}

fn validate_index_value(
    gc: &mut Gc,
    count: usize,
    value: f64,
    arg_name: &str,
) -> Result<usize, Value> {
    let value = validate_int_value(gc, value, arg_name)?;

    // Negative indices count from the end.
    let index = if value < 0.0 {
        count as f64 + value
    } else {
        value
    };

    if index >= 0.0 && index < count as f64 {
        Ok(index as usize)
    } else {
        Err(string::format_value(
            gc,
            "$ out of bounds.",
            &[FmtArg::Str(arg_name)],
        ))
    }
}

/// Validates `value` as an index into a sequence of `count` elements,
/// resolving negative indices.
pub fn validate_index(
    gc: &mut Gc,
    value: Value,
    count: usize,
    arg_name: &str,
) -> Result<usize, Value> {
    let num = validate_num(gc, value, arg_name)?;
    validate_index_value(gc, count, num, arg_name)
}

/// Only immutable value types may be map keys.
pub fn validate_key(gc: &mut Gc, key: Value) -> Result<(), Value> {
    let valid = match key {
        Value::Bool(_) | Value::Null | Value::Num(_) => true,
        Value::Undefined => false,
        _ => key.is_class() || key.is_range() || key.is_string(),
    };
    if valid {
        Ok(())
    } else {
        Err(string::format_value(gc, "Key must be a value type.", &[]))
    }
}

/// Resolves `range` against a sequence of `*length` elements. On success
/// returns the start index and rewrites `length` to the element count and
/// `step` to the walk direction.
pub fn calculate_range(
    gc: &mut Gc,
    range: *mut ObjRange,
    length: &mut usize,
    step: &mut isize,
) -> Result<usize, Value> {
    *step = 0;
    // SAFETY: the range is live.
    let (from, to, is_inclusive) = unsafe { ((*range).from, (*range).to, (*range).is_inclusive) };

    // An empty range at the very end of the sequence is allowed.
    let full = *length as f64;
    if from == full && to == if is_inclusive { -1.0 } else { full } {
        *length = 0;
        return Ok(0);
    }

    let start = validate_index_value(gc, *length, from, "Range start")?;

    // The end is bounds checked by hand because exclusivity moves it.
    let mut end = validate_int_value(gc, to, "Range end")?;
    if end < 0.0 {
        end += *length as f64;
    }

    if !is_inclusive {
        if end == start as f64 {
            *length = 0;
            return Ok(start);
        }
        end += if end >= start as f64 { -1.0 } else { 1.0 };
    }

    if end < 0.0 || end >= *length as f64 {
        return Err(string::format_value(
            gc,
            "Range end out of bounds.",
            &[],
        ));
    }

    let end = end as usize;
    *length = start.abs_diff(end) + 1;
    *step = if start < end { 1 } else { -1 };
    Ok(start)
}

// =============================================================================
// Arithmetic fallbacks
// =============================================================================

fn err_right_num(gc: &mut Gc) -> Value {
    string::format_value(gc, "Right operand must be a number.", &[])
}

fn err_left_num(gc: &mut Gc) -> Value {
    string::format_value(gc, "Left operand must be a number.", &[])
}

fn err_no_method(gc: &mut Gc, value: Value, signature: &str) -> Value {
    string::format_value(
        gc,
        "$ does not implement '$'.",
        &[FmtArg::Str(value.type_name()), FmtArg::Str(signature)],
    )
}

/// number + number, or string + string.
pub fn add(gc: &mut Gc, a: Value, b: Value) -> Result<Value, Value> {
    if let Value::Num(left) = a {
        let Value::Num(right) = b else {
            return Err(err_right_num(gc));
        };
        return Ok(Value::Num(left + right));
    }

    if a.is_string() {
        if !b.is_string() {
            return Err(string::format_value(
                gc,
                "Right operand must be a string.",
                &[],
            ));
        }
        return Ok(Value::obj(string::concat(gc, a.as_string(), b.as_string())));
    }

    Err(err_no_method(gc, a, "+(_)"))
}

pub fn subtract(gc: &mut Gc, a: Value, b: Value) -> Result<Value, Value> {
    let Value::Num(left) = a else {
        return Err(err_left_num(gc));
    };
    let Value::Num(right) = b else {
        return Err(err_right_num(gc));
    };
    Ok(Value::Num(left - right))
}

/// number * number, string repetition, or list repetition.
pub fn multiply(gc: &mut Gc, a: Value, b: Value) -> Result<Value, Value> {
    if let Value::Num(left) = a {
        let Value::Num(right) = b else {
            return Err(err_right_num(gc));
        };
        return Ok(Value::Num(left * right));
    }

    if a.is_string() || a.is_list() {
        let count = match b {
            Value::Num(n) if n >= 0.0 && n.trunc() == n => n as usize,
            _ => {
                return Err(string::format_value(
                    gc,
                    "Count must be a non-negative integer.",
                    &[],
                ))
            }
        };
        return Ok(if a.is_string() {
            Value::obj(string::repeat(gc, a.as_string(), count))
        } else {
            Value::obj(list::repeat(gc, a.as_list(), count))
        });
    }

    Err(err_no_method(gc, a, "*(_)"))
}

pub fn divide(gc: &mut Gc, a: Value, b: Value) -> Result<Value, Value> {
    let Value::Num(left) = a else {
        return Err(err_left_num(gc));
    };
    let Value::Num(right) = b else {
        return Err(err_right_num(gc));
    };
    Ok(Value::Num(left / right))
}

pub fn negate(gc: &mut Gc, value: Value) -> Result<Value, Value> {
    match value {
        Value::Num(n) => Ok(Value::Num(-n)),
        _ => Err(string::format_value(
            gc,
            "Operand must be a number.",
            &[],
        )),
    }
}

/// Logical not: booleans invert, null is true, everything else is false.
pub fn not(value: Value) -> Value {
    match value {
        Value::Bool(b) => Value::Bool(!b),
        Value::Null => Value::TRUE,
        _ => Value::FALSE,
    }
}

// =============================================================================
// List growth (`ADDELEM`)
// =============================================================================

/// Appends `value` to `list` in place, or concatenates `value` as a
/// sequence into a fresh list.
pub fn add_elem(
    gc: &mut Gc,
    list_value: Value,
    value: Value,
    is_concat: bool,
) -> Result<Value, Value> {
    debug_assert!(list_value.is_list());
    let list = list_value.as_list();
    if !is_concat {
        list::append(gc, list, value);
        return Ok(value);
    }

    let other = to_list(gc, value)?;
    gc.push_root(other);
    let combined = list::concat(gc, list, other);
    gc.pop_root();
    Ok(Value::obj(combined))
}

/// Coerces a value into a list for concatenation: lists pass through,
/// ranges materialize their numbers, strings become one-byte strings.
pub fn to_list(gc: &mut Gc, value: Value) -> Result<*mut ObjList, Value> {
    if value.is_list() {
        return Ok(value.as_list());
    }

    if value.is_range() {
        let range = value.as_range();
        // SAFETY: the range is live.
        let (from, to, is_inclusive) =
            unsafe { ((*range).from, (*range).to, (*range).is_inclusive) };
        let result = list::new(gc, 0);
        let step = if from <= to { 1.0 } else { -1.0 };
        let mut current = from;
        loop {
            let past_end = if step > 0.0 {
                if is_inclusive { current > to } else { current >= to }
            } else if is_inclusive {
                current < to
            } else {
                current <= to
            };
            if past_end {
                break;
            }
            list::append(gc, result, Value::Num(current));
            current += step;
        }
        return Ok(result);
    }

    if value.is_string() {
        let source = value.as_string();
        let result = list::new(gc, 0);
        gc.push_root(result);
        // SAFETY: the string is live and rooted by the caller.
        let len = unsafe { (*source).len() };
        for i in 0..len {
            let byte = unsafe { (*source).as_bytes()[i] };
            let single = string::from_byte(gc, byte);
            list::append(gc, result, Value::obj(single));
        }
        gc.pop_root();
        return Ok(result);
    }

    Err(err_no_method(gc, value, "iterate(_)"))
}

// =============================================================================
// Subscripts
// =============================================================================

pub fn subscript(gc: &mut Gc, receiver: Value, subscript: Value) -> Result<Value, Value> {
    if receiver.is_list() {
        return subscript_list(gc, receiver.as_list(), subscript);
    }
    if receiver.is_map() {
        return subscript_map(gc, receiver.as_map(), subscript);
    }
    if receiver.is_string() {
        return subscript_string(gc, receiver.as_string(), subscript);
    }
    Err(err_no_method(gc, receiver, "[_]"))
}

fn subscript_list(gc: &mut Gc, list: *mut ObjList, subscript: Value) -> Result<Value, Value> {
    // SAFETY: the list is live.
    let count = unsafe { (*list).len() };

    if subscript.is_num() {
        let index = validate_index(gc, subscript, count, "Subscript")?;
        return Ok(unsafe { (&(*list).elements)[index] });
    }

    if !subscript.is_range() {
        return Err(string::format_value(
            gc,
            "Subscript must be a number or a range.",
            &[],
        ));
    }

    let mut length = count;
    let mut step = 0isize;
    let start = calculate_range(gc, subscript.as_range(), &mut length, &mut step)?;

    let result = list::new(gc, length);
    for i in 0..length {
        // SAFETY: calculate_range bounds-checked the walk.
        unsafe {
            (&mut (*result).elements)[i] = (&(*list).elements)[(start as isize + i as isize * step) as usize];
        }
    }
    Ok(Value::obj(result))
}

fn subscript_map(gc: &mut Gc, map: *mut ObjMap, key: Value) -> Result<Value, Value> {
    validate_key(gc, key)?;
    let value = map::get(map, key);
    Ok(if value.is_undefined() { Value::Null } else { value })
}

fn subscript_string(
    gc: &mut Gc,
    string: *mut ObjString,
    subscript: Value,
) -> Result<Value, Value> {
    // SAFETY: the string is live.
    let len = unsafe { (*string).len() };

    if subscript.is_num() {
        let index = validate_index(gc, subscript, len, "Subscript")?;
        return Ok(string::code_point_at(gc, string, index));
    }

    if !subscript.is_range() {
        return Err(string::format_value(
            gc,
            "Subscript must be a number or a range.",
            &[],
        ));
    }

    let mut length = len;
    let mut step = 0isize;
    let start = calculate_range(gc, subscript.as_range(), &mut length, &mut step)?;
    Ok(Value::obj(string::from_byte_range(
        gc, string, start, length, step,
    )))
}

pub fn set_subscript(
    gc: &mut Gc,
    receiver: Value,
    subscript: Value,
    value: Value,
) -> Result<Value, Value> {
    if receiver.is_list() {
        let list = receiver.as_list();
        // SAFETY: the list is live.
        let count = unsafe { (*list).len() };
        let index = validate_index(gc, subscript, count, "Subscript")?;
        unsafe { (&mut (*list).elements)[index] = value };
        return Ok(value);
    }

    if receiver.is_map() {
        validate_key(gc, subscript)?;
        map::set(gc, receiver.as_map(), subscript, value);
        return Ok(value);
    }

    Err(err_no_method(gc, receiver, "[_]=(_)"))
}

// =============================================================================
// Iteration protocol
// =============================================================================

/// Advances the built-in iterator for `sequence`, or returns false when
/// iteration is over.
pub fn iterate(gc: &mut Gc, sequence: Value, iterator: Value) -> Result<Value, Value> {
    if sequence.is_list() {
        return iterate_list(gc, sequence.as_list(), iterator);
    }
    if sequence.is_map() {
        return iterate_map(gc, sequence.as_map(), iterator);
    }
    if sequence.is_range() {
        return iterate_range(gc, sequence.as_range(), iterator);
    }
    if sequence.is_string() {
        return iterate_string(gc, sequence.as_string(), iterator);
    }
    Err(err_no_method(gc, sequence, "iterate(_)"))
}

fn iterate_list(gc: &mut Gc, list: *mut ObjList, iterator: Value) -> Result<Value, Value> {
    // SAFETY: the list is live.
    let count = unsafe { (*list).len() } as i64;

    if iterator.is_null() {
        if count == 0 {
            return Ok(Value::FALSE);
        }
        return Ok(Value::Num(0.0));
    }

    let index = validate_int(gc, iterator, "Iterator")? as i64;
    // Signed comparison so an empty or exhausted list terminates cleanly.
    if index < 0 || index + 1 >= count {
        return Ok(Value::FALSE);
    }
    Ok(Value::Num((index + 1) as f64))
}

fn iterate_map(gc: &mut Gc, map: *mut ObjMap, iterator: Value) -> Result<Value, Value> {
    // SAFETY: the map is live.
    let capacity = unsafe { (*map).capacity() };
    if unsafe { (*map).count } == 0 {
        return Ok(Value::FALSE);
    }

    let mut index = 0usize;
    if !iterator.is_null() {
        let value = validate_int(gc, iterator, "Iterator")?;
        if value < 0.0 {
            return Ok(Value::FALSE);
        }
        if value as usize >= capacity {
            return Ok(Value::FALSE);
        }
        index = value as usize + 1;
    }

    match map::next_live_index(map, index) {
        Some(live) => Ok(Value::Num(live as f64)),
        None => Ok(Value::FALSE),
    }
}

fn iterate_range(gc: &mut Gc, range: *mut ObjRange, iterator: Value) -> Result<Value, Value> {
    // SAFETY: the range is live.
    let (from, to, is_inclusive) = unsafe { ((*range).from, (*range).to, (*range).is_inclusive) };

    // Special case: an empty exclusive range.
    if from == to && !is_inclusive {
        return Ok(Value::FALSE);
    }

    if iterator.is_null() {
        return Ok(Value::Num(from));
    }

    let mut value = validate_num(gc, iterator, "Iterator")?;

    // Iterate towards `to` from `from`.
    if from < to {
        value += 1.0;
        if value > to {
            return Ok(Value::FALSE);
        }
    } else {
        value -= 1.0;
        if value < to {
            return Ok(Value::FALSE);
        }
    }

    if !is_inclusive && value == to {
        return Ok(Value::FALSE);
    }

    Ok(Value::Num(value))
}

fn iterate_string(gc: &mut Gc, string: *mut ObjString, iterator: Value) -> Result<Value, Value> {
    // SAFETY: the string is live.
    let bytes = unsafe { (*string).as_bytes() };

    if iterator.is_null() {
        if bytes.is_empty() {
            return Ok(Value::FALSE);
        }
        return Ok(Value::Num(0.0));
    }

    let value = validate_int(gc, iterator, "Iterator")?;
    if value < 0.0 {
        return Ok(Value::FALSE);
    }
    let mut index = value as usize;

    // Advance to the start of the next UTF-8 sequence.
    loop {
        index += 1;
        if index >= bytes.len() {
            return Ok(Value::FALSE);
        }
        if bytes[index] & 0xC0 != 0x80 {
            break;
        }
    }

    Ok(Value::Num(index as f64))
}

/// The element the built-in iterator currently addresses.
pub fn iterator_value(gc: &mut Gc, sequence: Value, iterator: Value) -> Result<Value, Value> {
    if sequence.is_list() {
        let list = sequence.as_list();
        // SAFETY: the list is live.
        let count = unsafe { (*list).len() };
        let index = validate_index(gc, iterator, count, "Iterator")?;
        return Ok(unsafe { (&(*list).elements)[index] });
    }

    if sequence.is_map() {
        let map = sequence.as_map();
        // SAFETY: the map is live.
        let capacity = unsafe { (*map).capacity() };
        let index = validate_index(gc, iterator, capacity, "Iterator")?;
        let entry = unsafe { (&(*map).entries)[index] };
        if entry.key.is_undefined() {
            return Err(string::format_value(gc, "Invalid map iterator.", &[]));
        }
        return Ok(Value::obj(map::new_entry(gc, entry.key, entry.value)));
    }

    if sequence.is_range() {
        return Ok(iterator);
    }

    if sequence.is_string() {
        let string = sequence.as_string();
        // SAFETY: the string is live.
        let len = unsafe { (*string).len() };
        let index = validate_index(gc, iterator, len, "Iterator")?;
        return Ok(string::code_point_at(gc, string, index));
    }

    Err(err_no_method(gc, sequence, "iteratorValue(_)"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gc() -> Gc {
        Gc::new(1024 * 1024, 1024, 50)
    }

    #[test]
    fn numeric_arithmetic() {
        let mut gc = gc();
        assert_eq!(
            add(&mut gc, Value::Num(2.0), Value::Num(3.0)).unwrap().as_num(),
            5.0
        );
        assert_eq!(
            subtract(&mut gc, Value::Num(2.0), Value::Num(3.0)).unwrap().as_num(),
            -1.0
        );
        assert!(add(&mut gc, Value::Num(1.0), Value::TRUE).is_err());
        assert!(subtract(&mut gc, Value::Null, Value::Num(1.0)).is_err());
    }

    #[test]
    fn string_add_concatenates() {
        let mut gc = gc();
        let a = string::value(&mut gc, "foo");
        let b = string::value(&mut gc, "bar");
        let joined = add(&mut gc, a, b).unwrap();
        unsafe {
            assert_eq!((*joined.as_string()).as_bytes(), b"foobar");
        }
        assert!(add(&mut gc, a, Value::Num(1.0)).is_err());
    }

    #[test]
    fn list_iteration_protocol() {
        let mut gc = gc();
        let l = list::new(&mut gc, 0);
        for n in [10.0, 20.0] {
            list::append(&mut gc, l, Value::Num(n));
        }
        let seq = Value::obj(l);

        let it = iterate(&mut gc, seq, Value::Null).unwrap();
        assert_eq!(it.as_num(), 0.0);
        assert_eq!(iterator_value(&mut gc, seq, it).unwrap().as_num(), 10.0);

        let it = iterate(&mut gc, seq, it).unwrap();
        assert_eq!(it.as_num(), 1.0);
        assert_eq!(iterator_value(&mut gc, seq, it).unwrap().as_num(), 20.0);

        assert!(iterate(&mut gc, seq, it).unwrap().is_false());
    }

    #[test]
    fn empty_list_iteration_terminates() {
        let mut gc = gc();
        let l = list::new(&mut gc, 0);
        let seq = Value::obj(l);
        assert!(iterate(&mut gc, seq, Value::Null).unwrap().is_false());
        // A stale iterator on an empty list must not wrap around.
        assert!(iterate(&mut gc, seq, Value::Num(0.0)).unwrap().is_false());
    }

    #[test]
    fn range_iteration_directions() {
        let mut gc = gc();
        let up = crate::objects::range::value(&mut gc, 1.0, 3.0, true);
        let mut seen = Vec::new();
        let mut it = Value::Null;
        loop {
            it = iterate(&mut gc, up, it).unwrap();
            if it.is_false() {
                break;
            }
            seen.push(iterator_value(&mut gc, up, it).unwrap().as_num());
        }
        assert_eq!(seen, vec![1.0, 2.0, 3.0]);

        let down = crate::objects::range::value(&mut gc, 3.0, 1.0, false);
        let mut seen = Vec::new();
        let mut it = Value::Null;
        loop {
            it = iterate(&mut gc, down, it).unwrap();
            if it.is_false() {
                break;
            }
            seen.push(iterator_value(&mut gc, down, it).unwrap().as_num());
        }
        assert_eq!(seen, vec![3.0, 2.0]);
    }

    #[test]
    fn string_iteration_by_code_point() {
        let mut gc = gc();
        let s = string::value(&mut gc, "a\u{e9}b");
        let mut points = Vec::new();
        let mut it = Value::Null;
        loop {
            it = iterate(&mut gc, s, it).unwrap();
            if it.is_false() {
                break;
            }
            let v = iterator_value(&mut gc, s, it).unwrap();
            unsafe { points.push((*v.as_string()).to_display().into_owned()) };
        }
        assert_eq!(points, vec!["a", "\u{e9}", "b"]);
    }

    #[test]
    fn subscript_ranges_slice() {
        let mut gc = gc();
        let l = list::new(&mut gc, 0);
        for n in 0..5 {
            list::append(&mut gc, l, Value::Num(n as f64));
        }
        let r = crate::objects::range::value(&mut gc, 1.0, 3.0, true);
        let slice = subscript(&mut gc, Value::obj(l), r).unwrap();
        unsafe {
            let s = &(*slice.as_list()).elements;
            assert_eq!(s.len(), 3);
            assert_eq!(s[0].as_num(), 1.0);
            assert_eq!(s[2].as_num(), 3.0);
        }

        // Backwards slice.
        let r = crate::objects::range::value(&mut gc, 3.0, 1.0, true);
        let slice = subscript(&mut gc, Value::obj(l), r).unwrap();
        unsafe {
            let s = &(*slice.as_list()).elements;
            assert_eq!(s.len(), 3);
            assert_eq!(s[0].as_num(), 3.0);
            assert_eq!(s[2].as_num(), 1.0);
        }
    }

    #[test]
    fn negative_subscripts_count_from_end() {
        let mut gc = gc();
        let l = list::new(&mut gc, 0);
        for n in [1.0, 2.0, 3.0] {
            list::append(&mut gc, l, Value::Num(n));
        }
        let v = subscript(&mut gc, Value::obj(l), Value::Num(-1.0)).unwrap();
        assert_eq!(v.as_num(), 3.0);
        assert!(subscript(&mut gc, Value::obj(l), Value::Num(3.0)).is_err());
    }

    #[test]
    fn map_subscript_misses_are_null() {
        let mut gc = gc();
        let m = map::new(&mut gc);
        let key = string::value(&mut gc, "k");
        set_subscript(&mut gc, Value::obj(m), key, Value::Num(1.0)).unwrap();
        assert_eq!(subscript(&mut gc, Value::obj(m), key).unwrap().as_num(), 1.0);
        let missing = string::value(&mut gc, "other");
        assert!(subscript(&mut gc, Value::obj(m), missing).unwrap().is_null());

        // Mutable containers are rejected as keys.
        let bad_key = list::value(&mut gc, 0);
        assert!(set_subscript(&mut gc, Value::obj(m), bad_key, Value::Null).is_err());
    }

    #[test]
    fn add_elem_appends_and_concats() {
        let mut gc = gc();
        let l = list::new(&mut gc, 0);
        add_elem(&mut gc, Value::obj(l), Value::Num(1.0), false).unwrap();
        unsafe { assert_eq!((*l).len(), 1) };

        let r = crate::objects::range::value(&mut gc, 2.0, 3.0, true);
        let combined = add_elem(&mut gc, Value::obj(l), r, true).unwrap();
        unsafe {
            let s = &(*combined.as_list()).elements;
            assert_eq!(s.len(), 3);
            assert_eq!(s[1].as_num(), 2.0);
            assert_eq!(s[2].as_num(), 3.0);
            // The original list is untouched by concatenation.
            assert_eq!((*l).len(), 1);
        }
    }
}
