//! The garbage collector.
//!
//! Mark-and-sweep with a gray worklist over an intrusive list of every heap
//! object. A collection resets the allocated-byte counter and re-counts each
//! object as it is blackened, so sweeping can free objects without knowing
//! their size. Collection is initiated by the VM (which owns the roots); the
//! `Gc` itself handles graying, blackening, sweeping and the trigger math.

use log::trace;

use crate::objects::class::{Method, ObjClass};
use crate::objects::closure::{ObjClosure, ObjUpvalue, UpvalueState};
use crate::objects::fiber::ObjFiber;
use crate::objects::foreign::ObjForeign;
use crate::objects::function::ObjFn;
use crate::objects::instance::ObjInstance;
use crate::objects::list::ObjList;
use crate::objects::map::{ObjMap, ObjMapEntry};
use crate::objects::module::ObjModule;
use crate::objects::range::ObjRange;
use crate::objects::string::ObjString;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjKind {
    Class,
    Closure,
    Fiber,
    Fn,
    Foreign,
    Instance,
    List,
    Map,
    MapEntry,
    Module,
    Range,
    String,
    Upvalue,
}

/// Common header at the start of every heap object. All object structs are
/// `#[repr(C)]` with this as their first field so a pointer to the object is
/// also a pointer to its header.
#[repr(C)]
#[derive(Debug)]
pub struct ObjHeader {
    pub kind: ObjKind,
    pub is_dark: bool,
    /// The object's runtime class. Null for `Module` and `Upvalue`, which
    /// are never first-class values.
    pub class_obj: *mut ObjClass,
    /// Link into the VM-wide allocation list.
    pub next: *mut ObjHeader,
}

impl ObjHeader {
    pub fn new(kind: ObjKind, class_obj: *mut ObjClass) -> ObjHeader {
        ObjHeader {
            kind,
            is_dark: false,
            class_obj,
            next: core::ptr::null_mut(),
        }
    }
}

/// Pointers to the built-in classes, filled in during the VM's core
/// bootstrap. The runtime needs them to class new strings, lists and ranges
/// it allocates on its own.
#[derive(Debug)]
pub struct CoreClasses {
    pub object: *mut ObjClass,
    pub class: *mut ObjClass,
    pub bool_: *mut ObjClass,
    pub null: *mut ObjClass,
    pub num: *mut ObjClass,
    pub string: *mut ObjClass,
    pub list: *mut ObjClass,
    pub map: *mut ObjClass,
    pub map_entry: *mut ObjClass,
    pub range: *mut ObjClass,
    pub fiber: *mut ObjClass,
    pub fn_: *mut ObjClass,
}

impl CoreClasses {
    fn empty() -> CoreClasses {
        CoreClasses {
            object: core::ptr::null_mut(),
            class: core::ptr::null_mut(),
            bool_: core::ptr::null_mut(),
            null: core::ptr::null_mut(),
            num: core::ptr::null_mut(),
            string: core::ptr::null_mut(),
            list: core::ptr::null_mut(),
            map: core::ptr::null_mut(),
            map_entry: core::ptr::null_mut(),
            range: core::ptr::null_mut(),
            fiber: core::ptr::null_mut(),
            fn_: core::ptr::null_mut(),
        }
    }

    fn all(&self) -> [*mut ObjClass; 12] {
        [
            self.object,
            self.class,
            self.bool_,
            self.null,
            self.num,
            self.string,
            self.list,
            self.map,
            self.map_entry,
            self.range,
            self.fiber,
            self.fn_,
        ]
    }
}

const MAX_TEMP_ROOTS: usize = 8;

pub struct Gc {
    /// Head of the intrusive allocation list.
    first: *mut ObjHeader,
    /// Marked-but-not-yet-scanned objects.
    gray: Vec<*mut ObjHeader>,
    pub bytes_allocated: usize,
    pub next_gc: usize,
    pub min_heap_size: usize,
    pub heap_growth_percent: usize,
    /// Debug mode: report a pending collection at every allocation point.
    pub stress: bool,
    temp_roots: Vec<*mut ObjHeader>,
    pub core: CoreClasses,
    /// Symbol of `<finalize>` once the VM has interned it.
    pub finalize_symbol: Option<u32>,
}

impl Gc {
    pub fn new(initial_heap_size: usize, min_heap_size: usize, heap_growth_percent: usize) -> Gc {
        Gc {
            first: core::ptr::null_mut(),
            gray: Vec::with_capacity(4),
            bytes_allocated: 0,
            next_gc: initial_heap_size,
            min_heap_size,
            heap_growth_percent,
            stress: false,
            temp_roots: Vec::with_capacity(MAX_TEMP_ROOTS),
            core: CoreClasses::empty(),
            finalize_symbol: None,
        }
    }

    /// Whether the next allocation point should run a collection.
    #[inline]
    pub fn should_collect(&self) -> bool {
        self.stress || self.bytes_allocated > self.next_gc
    }

    /// Records growth of a variable-size buffer owned by a live object.
    #[inline]
    pub fn add_bytes(&mut self, bytes: usize) {
        self.bytes_allocated += bytes;
    }

    /// Takes ownership of a freshly built object, linking it into the
    /// allocation list. The object struct must be `#[repr(C)]` with an
    /// `ObjHeader` as its first field.
    pub(crate) fn link<T>(&mut self, boxed: Box<T>) -> *mut T {
        let ptr = Box::into_raw(boxed);
        let header = ptr as *mut ObjHeader;
        // SAFETY: `ptr` was just produced by Box::into_raw and starts with
        // an ObjHeader.
        unsafe {
            (*header).next = self.first;
            self.bytes_allocated += obj_size(header);
        }
        self.first = header;
        ptr
    }

    // =========================================================================
    // Temporary roots
    // =========================================================================

    /// Keeps `obj` alive across allocations that may trigger a collection
    /// before the object is reachable from elsewhere.
    pub fn push_root<T>(&mut self, obj: *mut T) {
        debug_assert!(!obj.is_null(), "can't root null");
        debug_assert!(self.temp_roots.len() < MAX_TEMP_ROOTS, "too many temporary roots");
        self.temp_roots.push(obj as *mut ObjHeader);
    }

    pub fn pop_root(&mut self) {
        debug_assert!(!self.temp_roots.is_empty(), "no temporary roots to release");
        self.temp_roots.pop();
    }

    /// Gives objects allocated before their class existed (bootstrap name
    /// strings, the module registry map) their proper class pointer. Called
    /// once at the end of the core bootstrap.
    pub fn fix_classes(&mut self) {
        let mut obj = self.first;
        while !obj.is_null() {
            // SAFETY: walking the intact allocation list.
            unsafe {
                if (*obj).class_obj.is_null() {
                    let class = match (*obj).kind {
                        ObjKind::String => self.core.string,
                        ObjKind::List => self.core.list,
                        ObjKind::Map => self.core.map,
                        ObjKind::MapEntry => self.core.map_entry,
                        ObjKind::Range => self.core.range,
                        ObjKind::Fiber => self.core.fiber,
                        ObjKind::Fn | ObjKind::Closure => self.core.fn_,
                        // Classes are wired explicitly; modules and upvalues
                        // never have a class; instances and foreigns carry
                        // theirs from birth.
                        ObjKind::Class
                        | ObjKind::Instance
                        | ObjKind::Foreign
                        | ObjKind::Module
                        | ObjKind::Upvalue => core::ptr::null_mut(),
                    };
                    if !class.is_null() {
                        (*obj).class_obj = class;
                    }
                }
                obj = (*obj).next;
            }
        }
    }

    // =========================================================================
    // Marking
    // =========================================================================

    pub fn gray_obj(&mut self, obj: *mut ObjHeader) {
        if obj.is_null() {
            return;
        }
        // SAFETY: every pointer reaching here is to a live heap object.
        unsafe {
            // Already darkened; stopping here is what breaks cycles.
            if (*obj).is_dark {
                return;
            }
            (*obj).is_dark = true;
        }
        self.gray.push(obj);
    }

    pub fn gray_value(&mut self, value: Value) {
        if let Value::Obj(obj) = value {
            self.gray_obj(obj);
        }
    }

    /// Starts a collection: resets the byte counter (blackening re-counts
    /// live objects) and grays the roots the Gc owns itself. The VM grays
    /// its own roots after this.
    pub fn begin_collect(&mut self) {
        self.bytes_allocated = 0;

        for class in self.core.all() {
            self.gray_obj(class as *mut ObjHeader);
        }
        for i in 0..self.temp_roots.len() {
            let root = self.temp_roots[i];
            self.gray_obj(root);
        }
    }

    /// Drains the gray worklist, sweeps white objects and recomputes the
    /// next trigger point. Returns the number of bytes still live.
    pub fn finish_collect(&mut self) -> usize {
        let before = self.object_count();

        while let Some(obj) = self.gray.pop() {
            self.blacken(obj);
        }

        self.sweep();

        self.next_gc =
            self.bytes_allocated + self.bytes_allocated * self.heap_growth_percent / 100;
        if self.next_gc < self.min_heap_size {
            self.next_gc = self.min_heap_size;
        }

        trace!(
            "gc: {} objects before, {} bytes live, next at {}",
            before,
            self.bytes_allocated,
            self.next_gc
        );
        self.bytes_allocated
    }

    /// Number of objects currently on the allocation list.
    pub fn object_count(&self) -> usize {
        let mut count = 0;
        let mut obj = self.first;
        while !obj.is_null() {
            count += 1;
            // SAFETY: list links are maintained by link()/sweep().
            obj = unsafe { (*obj).next };
        }
        count
    }

    // =========================================================================
    // Blackening
    // =========================================================================

    /// Visits one object's outgoing references and re-counts its size.
    fn blacken(&mut self, obj: *mut ObjHeader) {
        // SAFETY: only marked live objects enter the gray list; field reads
        // below follow each kind's layout.
        unsafe {
            // Every object keeps its class alive. (Null for modules and
            // upvalues.)
            let class = (*obj).class_obj;
            self.gray_obj(class as *mut ObjHeader);

            self.bytes_allocated += obj_size(obj);

            match (*obj).kind {
                ObjKind::Class => {
                    let class = &*(obj as *const ObjClass);
                    self.gray_obj(class.superclass as *mut ObjHeader);
                    for method in &class.methods {
                        if let Method::Block(closure) = method {
                            self.gray_obj(*closure as *mut ObjHeader);
                        }
                    }
                    self.gray_obj(class.name as *mut ObjHeader);
                    self.gray_value(class.attributes);
                }
                ObjKind::Closure => {
                    let closure = &*(obj as *const ObjClosure);
                    self.gray_obj(closure.fn_obj as *mut ObjHeader);
                    for upvalue in &closure.upvalues {
                        self.gray_obj(*upvalue as *mut ObjHeader);
                    }
                }
                ObjKind::Fiber => {
                    let fiber = &*(obj as *const ObjFiber);
                    for frame in &fiber.frames {
                        self.gray_obj(frame.closure as *mut ObjHeader);
                    }
                    // The whole stack buffer is a conservative root.
                    for slot in &fiber.stack {
                        self.gray_value(*slot);
                    }
                    let mut upvalue = fiber.open_upvalues;
                    while !upvalue.is_null() {
                        self.gray_obj(upvalue as *mut ObjHeader);
                        upvalue = (*upvalue).next;
                    }
                    self.gray_obj(fiber.caller as *mut ObjHeader);
                    self.gray_value(fiber.error);
                }
                ObjKind::Fn => {
                    let function = &*(obj as *const ObjFn);
                    for constant in &function.constants {
                        self.gray_value(*constant);
                    }
                    self.gray_obj(function.module as *mut ObjHeader);
                }
                ObjKind::Foreign => {}
                ObjKind::Instance => {
                    let instance = &*(obj as *const ObjInstance);
                    for field in instance.fields.iter() {
                        self.gray_value(*field);
                    }
                }
                ObjKind::List => {
                    let list = &*(obj as *const ObjList);
                    for element in &list.elements {
                        self.gray_value(*element);
                    }
                }
                ObjKind::Map => {
                    let map = &*(obj as *const ObjMap);
                    for entry in &map.entries {
                        if entry.key.is_undefined() {
                            continue;
                        }
                        self.gray_value(entry.key);
                        self.gray_value(entry.value);
                    }
                }
                ObjKind::MapEntry => {
                    let entry = &*(obj as *const ObjMapEntry);
                    self.gray_value(entry.key);
                    self.gray_value(entry.value);
                }
                ObjKind::Module => {
                    let module = &*(obj as *const ObjModule);
                    for variable in &module.variables {
                        self.gray_value(*variable);
                    }
                    self.gray_obj(module.name as *mut ObjHeader);
                }
                ObjKind::Range => {}
                ObjKind::String => {}
                ObjKind::Upvalue => {
                    let upvalue = &*(obj as *const ObjUpvalue);
                    match upvalue.state {
                        // The owning fiber must outlive the open slot index.
                        UpvalueState::Open { fiber, .. } => {
                            self.gray_obj(fiber as *mut ObjHeader)
                        }
                        UpvalueState::Closed(value) => self.gray_value(value),
                    }
                }
            }
        }
    }

    // =========================================================================
    // Sweeping
    // =========================================================================

    fn sweep(&mut self) {
        // Finalize dying foreign objects first, while their classes are
        // still intact.
        let mut obj = self.first;
        while !obj.is_null() {
            // SAFETY: walking the intact allocation list.
            unsafe {
                if !(*obj).is_dark && (*obj).kind == ObjKind::Foreign {
                    finalize_foreign(self.finalize_symbol, obj as *mut ObjForeign);
                }
                obj = (*obj).next;
            }
        }

        // Unlink and free white objects; clear the mark on black ones.
        let mut link: *mut *mut ObjHeader = &mut self.first;
        // SAFETY: `link` always points at a valid list link.
        unsafe {
            while !(*link).is_null() {
                let obj = *link;
                if !(*obj).is_dark {
                    *link = (*obj).next;
                    free_obj(obj);
                } else {
                    (*obj).is_dark = false;
                    link = &mut (*obj).next;
                }
            }
        }
    }
}

impl Drop for Gc {
    fn drop(&mut self) {
        let mut obj = self.first;
        // Finalizers first, then frees, mirroring sweep.
        while !obj.is_null() {
            // SAFETY: the list is intact until the free loop below.
            unsafe {
                if (*obj).kind == ObjKind::Foreign {
                    finalize_foreign(self.finalize_symbol, obj as *mut ObjForeign);
                }
                obj = (*obj).next;
            }
        }
        obj = self.first;
        while !obj.is_null() {
            // SAFETY: each node is freed exactly once after its next link is
            // read.
            unsafe {
                let next = (*obj).next;
                free_obj(obj);
                obj = next;
            }
        }
    }
}

/// Runs the `<finalize>` method bound on a dying foreign object's class, if
/// any.
unsafe fn finalize_foreign(finalize_symbol: Option<u32>, foreign: *mut ObjForeign) {
    let Some(symbol) = finalize_symbol else {
        return;
    };
    let class = (*foreign).header.class_obj;
    if class.is_null() {
        return;
    }
    if let Some(Method::Finalizer(finalize)) = (&(*class).methods).get(symbol as usize) {
        finalize((*foreign).data.as_mut_ptr());
    }
}

/// Intrinsic size of an object plus its variable-size buffers, as re-counted
/// during blackening.
fn obj_size(obj: *mut ObjHeader) -> usize {
    // SAFETY: callers hand in live objects; reads follow each layout.
    unsafe {
        match (*obj).kind {
            ObjKind::Class => {
                let class = &*(obj as *const ObjClass);
                core::mem::size_of::<ObjClass>()
                    + class.methods.capacity() * core::mem::size_of::<Method>()
            }
            ObjKind::Closure => {
                let closure = &*(obj as *const ObjClosure);
                core::mem::size_of::<ObjClosure>()
                    + closure.upvalues.capacity() * core::mem::size_of::<*mut ObjUpvalue>()
            }
            ObjKind::Fiber => {
                let fiber = &*(obj as *const ObjFiber);
                core::mem::size_of::<ObjFiber>()
                    + fiber.stack.capacity() * core::mem::size_of::<Value>()
                    + fiber.frames.capacity()
                        * core::mem::size_of::<crate::objects::fiber::CallFrame>()
            }
            ObjKind::Fn => {
                let function = &*(obj as *const ObjFn);
                core::mem::size_of::<ObjFn>()
                    + function.code.capacity() * core::mem::size_of::<wren_core::Instruction>()
                    + function.constants.capacity() * core::mem::size_of::<Value>()
                    + function.stack_top.capacity() * core::mem::size_of::<u32>()
                    + function.debug.source_lines.capacity() * core::mem::size_of::<u32>()
            }
            ObjKind::Foreign => {
                let foreign = &*(obj as *const ObjForeign);
                core::mem::size_of::<ObjForeign>() + foreign.data.len()
            }
            ObjKind::Instance => {
                let instance = &*(obj as *const ObjInstance);
                core::mem::size_of::<ObjInstance>()
                    + instance.fields.len() * core::mem::size_of::<Value>()
            }
            ObjKind::List => {
                let list = &*(obj as *const ObjList);
                core::mem::size_of::<ObjList>()
                    + list.elements.capacity() * core::mem::size_of::<Value>()
            }
            ObjKind::Map => {
                let map = &*(obj as *const ObjMap);
                core::mem::size_of::<ObjMap>()
                    + map.entries.capacity()
                        * core::mem::size_of::<crate::objects::map::MapEntry>()
            }
            ObjKind::MapEntry => core::mem::size_of::<ObjMapEntry>(),
            ObjKind::Module => {
                let module = &*(obj as *const ObjModule);
                core::mem::size_of::<ObjModule>()
                    + module.variables.capacity() * core::mem::size_of::<Value>()
            }
            ObjKind::Range => core::mem::size_of::<ObjRange>(),
            ObjKind::String => {
                let string = &*(obj as *const ObjString);
                core::mem::size_of::<ObjString>() + string.bytes.len()
            }
            ObjKind::Upvalue => core::mem::size_of::<ObjUpvalue>(),
        }
    }
}

/// Frees one unlinked object.
unsafe fn free_obj(obj: *mut ObjHeader) {
    match (*obj).kind {
        ObjKind::Class => drop(Box::from_raw(obj as *mut ObjClass)),
        ObjKind::Closure => drop(Box::from_raw(obj as *mut ObjClosure)),
        ObjKind::Fiber => drop(Box::from_raw(obj as *mut ObjFiber)),
        ObjKind::Fn => drop(Box::from_raw(obj as *mut ObjFn)),
        ObjKind::Foreign => drop(Box::from_raw(obj as *mut ObjForeign)),
        ObjKind::Instance => drop(Box::from_raw(obj as *mut ObjInstance)),
        ObjKind::List => drop(Box::from_raw(obj as *mut ObjList)),
        ObjKind::Map => drop(Box::from_raw(obj as *mut ObjMap)),
        ObjKind::MapEntry => drop(Box::from_raw(obj as *mut ObjMapEntry)),
        ObjKind::Module => drop(Box::from_raw(obj as *mut ObjModule)),
        ObjKind::Range => drop(Box::from_raw(obj as *mut ObjRange)),
        ObjKind::String => drop(Box::from_raw(obj as *mut ObjString)),
        ObjKind::Upvalue => drop(Box::from_raw(obj as *mut ObjUpvalue)),
    }
}
