//! Map object operations.
//!
//! Open addressing with linear probing. A slot's state is encoded in the
//! entry itself: `key == Undefined && value == False` is empty,
//! `key == Undefined && value == True` is a tombstone left by a deletion,
//! anything else is live. Probes stop only on truly empty slots so chains
//! survive deletions.

use crate::gc::{Gc, ObjHeader, ObjKind};
use crate::value::{hash_value, values_equal, Value};

/// The initial (and minimum) capacity of a non-empty map.
const MIN_CAPACITY: usize = 16;

/// Geometric growth factor applied when the load factor is exceeded.
const GROW_FACTOR: usize = 2;

/// Maximum percentage of entries filled before the map grows.
const LOAD_PERCENT: usize = 75;

#[derive(Clone, Copy, Debug)]
pub struct MapEntry {
    pub key: Value,
    pub value: Value,
}

impl MapEntry {
    const EMPTY: MapEntry = MapEntry {
        key: Value::Undefined,
        value: Value::FALSE,
    };

    const TOMBSTONE: MapEntry = MapEntry {
        key: Value::Undefined,
        value: Value::TRUE,
    };

    #[inline]
    fn is_tombstone(&self) -> bool {
        self.key.is_undefined() && self.value.is_true()
    }
}

#[repr(C)]
pub struct ObjMap {
    pub header: ObjHeader,
    /// Number of live entries; tombstones are not counted.
    pub count: usize,
    /// The entry array; its length is the capacity.
    pub entries: Vec<MapEntry>,
}

impl ObjMap {
    #[inline]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }
}

/// A key/value snapshot handed to iteration.
#[repr(C)]
pub struct ObjMapEntry {
    pub header: ObjHeader,
    pub key: Value,
    pub value: Value,
}

pub fn new(gc: &mut Gc) -> *mut ObjMap {
    let map = ObjMap {
        header: ObjHeader::new(ObjKind::Map, gc.core.map),
        count: 0,
        entries: Vec::new(),
    };
    gc.link(Box::new(map))
}

pub fn value(gc: &mut Gc) -> Value {
    Value::obj(new(gc))
}

pub fn new_entry(gc: &mut Gc, key: Value, value: Value) -> *mut ObjMapEntry {
    let entry = ObjMapEntry {
        header: ObjHeader::new(ObjKind::MapEntry, gc.core.map_entry),
        key,
        value,
    };
    gc.link(Box::new(entry))
}

/// Shallow copy, used to protect map constants from mutation at `LOADK`.
pub fn copy(gc: &mut Gc, map: *mut ObjMap) -> *mut ObjMap {
    // SAFETY: callers pass a live map; cloning before allocating keeps the
    // data safe if a collection moves in.
    let (count, entries) = unsafe { ((*map).count, (*map).entries.clone()) };
    let copied = ObjMap {
        header: ObjHeader::new(ObjKind::Map, gc.core.map),
        count,
        entries,
    };
    gc.link(Box::new(copied))
}

/// Probes for `key`. `Ok` carries the index of the live entry holding it;
/// `Err` carries the slot an insert should use (the first tombstone passed,
/// or the empty slot ending the probe). `Err(None)` means the map has no
/// entry array at all.
fn find_entry(entries: &[MapEntry], key: Value) -> Result<usize, Option<usize>> {
    if entries.is_empty() {
        return Err(None);
    }

    let capacity = entries.len();
    let start_index = hash_value(key) as usize % capacity;
    let mut index = start_index;
    let mut tombstone = None;

    loop {
        let entry = &entries[index];

        if entry.key.is_undefined() {
            if entry.is_tombstone() {
                // Keep probing past the tombstone, but remember it as the
                // insertion point.
                if tombstone.is_none() {
                    tombstone = Some(index);
                }
            } else {
                // Truly empty: the key is absent.
                return Err(Some(tombstone.unwrap_or(index)));
            }
        } else if values_equal(entry.key, key) {
            return Ok(index);
        }

        index = (index + 1) % capacity;
        if index == start_index {
            break;
        }
    }

    // Every slot was live or a tombstone.
    debug_assert!(tombstone.is_some(), "map should have tombstones or empty entries");
    Err(tombstone)
}

/// Inserts into an entry array, returning true when the key is new.
fn insert_entry(entries: &mut [MapEntry], key: Value, value: Value) -> bool {
    debug_assert!(!entries.is_empty(), "should ensure capacity before inserting");
    match find_entry(entries, key) {
        Ok(index) => {
            entries[index].value = value;
            false
        }
        Err(slot) => {
            let index = slot.expect("insert requires a free slot");
            entries[index] = MapEntry { key, value };
            true
        }
    }
}

fn resize(gc: &mut Gc, map: *mut ObjMap, capacity: usize) {
    let mut entries = vec![MapEntry::EMPTY; capacity];
    // SAFETY: callers pass a live map.
    let old = unsafe { core::mem::take(&mut (*map).entries) };
    for entry in &old {
        if entry.key.is_undefined() {
            continue;
        }
        insert_entry(&mut entries, entry.key, entry.value);
    }
    gc.add_bytes(capacity * core::mem::size_of::<MapEntry>());
    unsafe { (*map).entries = entries };
}

/// Looks `key` up, returning `Undefined` when absent.
pub fn get(map: *mut ObjMap, key: Value) -> Value {
    // SAFETY: callers pass a live map.
    let entries = unsafe { &(*map).entries };
    match find_entry(entries, key) {
        Ok(index) => entries[index].value,
        Err(_) => Value::Undefined,
    }
}

pub fn contains(map: *mut ObjMap, key: Value) -> bool {
    !get(map, key).is_undefined()
}

pub fn set(gc: &mut Gc, map: *mut ObjMap, key: Value, value: Value) {
    // SAFETY: callers pass a live map.
    unsafe {
        if ((*map).count + 1) * 100 > (*map).capacity() * LOAD_PERCENT {
            let capacity = ((*map).capacity() * GROW_FACTOR).max(MIN_CAPACITY);
            resize(gc, map, capacity);
        }
        if insert_entry(&mut (*map).entries, key, value) {
            (*map).count += 1;
        }
    }
}

pub fn clear(map: *mut ObjMap) {
    // SAFETY: callers pass a live map.
    unsafe {
        (*map).entries = Vec::new();
        (*map).count = 0;
    }
}

/// Removes `key`, returning the removed value or `Null` when absent. The
/// slot becomes a tombstone so probe chains stay intact; removing the last
/// entry frees the whole array, and a mostly-empty map shrinks.
pub fn remove(gc: &mut Gc, map: *mut ObjMap, key: Value) -> Value {
    // SAFETY: callers pass a live map; the value is rooted across the
    // resize below.
    unsafe {
        let index = match find_entry(&(*map).entries, key) {
            Ok(index) => index,
            Err(_) => return Value::Null,
        };

        let value = (&(*map).entries)[index].value;
        (&mut (*map).entries)[index] = MapEntry::TOMBSTONE;
        (*map).count -= 1;

        if let Value::Obj(obj) = value {
            gc.push_root(obj);
        }

        if (*map).count == 0 {
            clear(map);
        } else if (*map).capacity() > MIN_CAPACITY
            && (*map).count * 100 < (*map).capacity() / GROW_FACTOR * LOAD_PERCENT
        {
            let capacity = ((*map).capacity() / GROW_FACTOR).max(MIN_CAPACITY);
            resize(gc, map, capacity);
        }

        if value.is_obj() {
            gc.pop_root();
        }

        value
    }
}

/// Index of the next live entry at or after `index`, for iteration.
pub fn next_live_index(map: *mut ObjMap, index: usize) -> Option<usize> {
    // SAFETY: callers pass a live map.
    let entries = unsafe { &(*map).entries };
    (index..entries.len()).find(|&i| !entries[i].key.is_undefined())
}
