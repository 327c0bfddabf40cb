//! Fibers: cooperative coroutines with their own value stack, call frames,
//! open-upvalue list and error slot.
//!
//! Stack and frame positions are indices into the fiber's stack buffer, so
//! geometric growth never invalidates an interior reference.

use crate::gc::{Gc, ObjHeader, ObjKind};
use crate::objects::closure::{self, ObjClosure, ObjUpvalue, UpvalueState};
use crate::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FiberState {
    /// Directly invoked by the host; errors have nowhere left to go.
    Root,
    Other,
    /// Started with `try`; an error resumes the caller with the error value.
    Try,
}

#[derive(Clone, Copy, Debug)]
pub struct CallFrame {
    pub closure: *mut ObjClosure,
    /// Base of this frame's register window, as a stack index.
    pub stack_start: usize,
    /// Next instruction to execute in the closure's code.
    pub ip: usize,
    /// Absolute stack index the return value is delivered to, or -1 for the
    /// frame's own base slot.
    pub return_reg: i64,
}

pub const RETURN_TO_BASE: i64 = -1;

#[repr(C)]
pub struct ObjFiber {
    pub header: ObjHeader,
    /// The value stack. Grown geometrically to the next power of two; every
    /// slot always holds a real value so the GC can scan the whole buffer.
    pub stack: Vec<Value>,
    pub frames: Vec<CallFrame>,
    /// Open upvalues into this fiber's stack, sorted by decreasing slot.
    pub open_upvalues: *mut ObjUpvalue,
    /// The fiber that ran this one, if any.
    pub caller: *mut ObjFiber,
    /// Non-null once the fiber has aborted.
    pub error: Value,
    pub state: FiberState,
    /// One past the host-visible API slot window.
    pub api_stack_top: usize,
    /// Absolute stack index of the most recent method-call register; results
    /// and caught errors from other fibers land here.
    pub last_call_reg: usize,
}

impl ObjFiber {
    #[inline]
    pub fn has_error(&self) -> bool {
        !self.error.is_null()
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.frames.is_empty() || self.has_error()
    }
}

const INITIAL_CALL_FRAMES: usize = 4;

pub fn new(gc: &mut Gc, closure: *mut ObjClosure) -> *mut ObjFiber {
    // One slot extra for the implicit receiver slot the compiler assumes
    // every function has.
    let stack_capacity = if closure.is_null() {
        1
    } else {
        // SAFETY: the closure and its function are live.
        unsafe { ((*(*closure).fn_obj).max_slots + 1).next_power_of_two() }
    };

    let fiber = ObjFiber {
        header: ObjHeader::new(ObjKind::Fiber, gc.core.fiber),
        stack: vec![Value::Null; stack_capacity],
        frames: Vec::with_capacity(INITIAL_CALL_FRAMES),
        open_upvalues: core::ptr::null_mut(),
        caller: core::ptr::null_mut(),
        error: Value::Null,
        state: FiberState::Other,
        api_stack_top: 0,
        last_call_reg: 0,
    };
    let fiber = gc.link(Box::new(fiber));

    if !closure.is_null() {
        append_call_frame(fiber, closure, 0, RETURN_TO_BASE);
        // The first slot always holds the closure.
        // SAFETY: just allocated.
        unsafe { (&mut (*fiber).stack)[0] = Value::obj(closure) };
    }

    fiber
}

pub fn value(gc: &mut Gc, closure: *mut ObjClosure) -> Value {
    Value::obj(new(gc, closure))
}

/// Grows the stack to hold at least `needed` slots. Frames, upvalues and
/// API windows are indices, so nothing needs patching afterwards.
pub fn ensure_stack(fiber: *mut ObjFiber, needed: usize) {
    // SAFETY: the fiber is live.
    let stack = unsafe { &mut (*fiber).stack };
    if stack.len() >= needed {
        return;
    }
    stack.resize(needed.next_power_of_two(), Value::Null);
}

pub fn append_call_frame(
    fiber: *mut ObjFiber,
    closure: *mut ObjClosure,
    stack_start: usize,
    return_reg: i64,
) {
    // SAFETY: the fiber and closure are live.
    unsafe {
        let needed = stack_start + (*(*closure).fn_obj).max_slots;
        ensure_stack(fiber, needed);
        (*fiber).frames.push(CallFrame {
            closure,
            stack_start,
            ip: 0,
            return_reg,
        });
    }
}

fn open_slot(upvalue: *mut ObjUpvalue) -> usize {
    // SAFETY: the open-upvalue list only holds open upvalues.
    unsafe {
        match (*upvalue).state {
            UpvalueState::Open { slot, .. } => slot,
            UpvalueState::Closed(_) => unreachable!("closed upvalue on open list"),
        }
    }
}

/// Captures the local in `slot` into an upvalue. Reuses an existing open
/// upvalue for the slot so every closure over a variable sees the same
/// storage; otherwise inserts a new one keeping the list sorted by
/// decreasing slot.
pub fn capture_upvalue(gc: &mut Gc, fiber: *mut ObjFiber, slot: usize) -> *mut ObjUpvalue {
    // SAFETY: the fiber is live and the list links are maintained below.
    unsafe {
        if (*fiber).open_upvalues.is_null() {
            let created = closure::new_upvalue(gc, fiber, slot);
            (*fiber).open_upvalues = created;
            return created;
        }

        let mut prev: *mut ObjUpvalue = core::ptr::null_mut();
        let mut upvalue = (*fiber).open_upvalues;

        // Walk towards the bottom of the stack until we find a previously
        // existing upvalue or pass where it should be.
        while !upvalue.is_null() && open_slot(upvalue) > slot {
            prev = upvalue;
            upvalue = (*upvalue).next;
        }

        if !upvalue.is_null() && open_slot(upvalue) == slot {
            return upvalue;
        }

        let created = closure::new_upvalue(gc, fiber, slot);
        if prev.is_null() {
            (*fiber).open_upvalues = created;
        } else {
            (*prev).next = created;
        }
        (*created).next = upvalue;
        created
    }
}

/// Closes every open upvalue at or above stack slot `last`: the referent is
/// moved into the upvalue itself and the upvalue leaves the open list.
pub fn close_upvalues(fiber: *mut ObjFiber, last: usize) {
    // SAFETY: the fiber is live and the list is sorted by decreasing slot.
    unsafe {
        while !(*fiber).open_upvalues.is_null() && open_slot((*fiber).open_upvalues) >= last {
            let upvalue = (*fiber).open_upvalues;
            let slot = open_slot(upvalue);
            (*upvalue).state = UpvalueState::Closed((&(*fiber).stack)[slot]);
            (*fiber).open_upvalues = (*upvalue).next;
            (*upvalue).next = core::ptr::null_mut();
        }
    }
}
