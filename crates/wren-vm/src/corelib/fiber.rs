//! Fiber primitives: creation, transfer of control and error surface.
//!
//! These are the interpreter's only suspension points besides foreign
//! calls. A primitive returning false after changing `vm.fiber` tells the
//! dispatch loop to reload its frame state from the new fiber.

use wren_runtime::objects::fiber::{self, FiberState, ObjFiber};
use wren_runtime::objects::string::{self, FmtArg};
use wren_runtime::Value;

use crate::vm::WrenVm;

use super::{abort, abort_str, arg, ret};

pub fn fiber_new(vm: &mut WrenVm, base: usize) -> bool {
    let argument = arg(vm, base, 1);
    if !argument.is_closure() {
        return abort_str(vm, "Argument must be a function.");
    }
    let closure = argument.as_closure();
    // SAFETY: the closure and its function are live.
    if unsafe { (*(*closure).fn_obj).arity } > 1 {
        return abort_str(vm, "Function cannot take more than one parameter.");
    }

    let value = fiber::value(&mut vm.gc, closure);
    ret(vm, base, value)
}

pub fn fiber_current(vm: &mut WrenVm, base: usize) -> bool {
    let current = vm.fiber;
    ret(vm, base, Value::obj(current))
}

pub fn fiber_abort(vm: &mut WrenVm, base: usize) -> bool {
    let error = arg(vm, base, 1);
    vm.fiber_abort(error);

    // Aborting with null is a no-op rather than an abort.
    error.is_null()
}

pub fn fiber_error(vm: &mut WrenVm, base: usize) -> bool {
    let receiver = arg(vm, base, 0).as_fiber();
    // SAFETY: the receiver is a live fiber.
    let error = unsafe { (*receiver).error };
    ret(vm, base, error)
}

pub fn fiber_is_done(vm: &mut WrenVm, base: usize) -> bool {
    let receiver = arg(vm, base, 0).as_fiber();
    // SAFETY: the receiver is a live fiber.
    let done = unsafe { (*receiver).is_done() };
    ret(vm, base, Value::Bool(done))
}

/// Transfers control to `fiber`. `is_call` links the current fiber as the
/// caller so completion or a `yield` resumes it; `is_try` additionally marks
/// the callee so a runtime error is delivered back instead of unwinding.
fn run_fiber(
    vm: &mut WrenVm,
    fiber: *mut ObjFiber,
    base: usize,
    has_value: bool,
    is_call: bool,
    is_try: bool,
    verb: &str,
) -> bool {
    // SAFETY: both fibers are live heap objects.
    unsafe {
        if (*fiber).has_error() {
            let error = string::format_value(
                &mut vm.gc,
                "Cannot $ an aborted fiber.",
                &[FmtArg::Str(verb)],
            );
            return abort(vm, error);
        }

        if is_call {
            if !(*fiber).caller.is_null() {
                return abort_str(vm, "Fiber has already been called.");
            }
            if (*fiber).state == FiberState::Root {
                return abort_str(vm, "Cannot call root fiber.");
            }
            // Remember who ran it so it knows whom to resume.
            (*fiber).caller = vm.fiber;
            (*fiber).state = if is_try {
                FiberState::Try
            } else {
                FiberState::Other
            };
        }

        if (*fiber).frames.is_empty() {
            let error = string::format_value(
                &mut vm.gc,
                "Cannot $ a finished fiber.",
                &[FmtArg::Str(verb)],
            );
            return abort(vm, error);
        }

        let value = if has_value { arg(vm, base, 1) } else { Value::Null };

        let started = (*fiber).frames.len() > 1 || (&(*fiber).frames)[0].ip > 0;
        if started {
            // A resumed fiber receives the value as the result of the call
            // that suspended it.
            let dst = (*fiber).last_call_reg;
            fiber::ensure_stack(fiber, dst + 1);
            (&mut (*fiber).stack)[dst] = value;
        } else if has_value {
            // A fresh fiber receives it as its closure's parameter.
            let closure = (&(*fiber).frames)[0].closure;
            if (*(*closure).fn_obj).arity > 0 {
                fiber::ensure_stack(fiber, 2);
                (&mut (*fiber).stack)[1] = value;
            }
        }

        vm.fiber = fiber;
    }
    false
}

pub fn fiber_call(vm: &mut WrenVm, base: usize) -> bool {
    let receiver = arg(vm, base, 0).as_fiber();
    run_fiber(vm, receiver, base, false, true, false, "call")
}

pub fn fiber_call1(vm: &mut WrenVm, base: usize) -> bool {
    let receiver = arg(vm, base, 0).as_fiber();
    run_fiber(vm, receiver, base, true, true, false, "call")
}

pub fn fiber_try(vm: &mut WrenVm, base: usize) -> bool {
    let receiver = arg(vm, base, 0).as_fiber();
    run_fiber(vm, receiver, base, false, true, true, "try")
}

pub fn fiber_try1(vm: &mut WrenVm, base: usize) -> bool {
    let receiver = arg(vm, base, 0).as_fiber();
    run_fiber(vm, receiver, base, true, true, true, "try")
}

pub fn fiber_transfer(vm: &mut WrenVm, base: usize) -> bool {
    let receiver = arg(vm, base, 0).as_fiber();
    run_fiber(vm, receiver, base, false, false, false, "transfer to")
}

pub fn fiber_transfer1(vm: &mut WrenVm, base: usize) -> bool {
    let receiver = arg(vm, base, 0).as_fiber();
    run_fiber(vm, receiver, base, true, false, false, "transfer to")
}

fn yield_impl(vm: &mut WrenVm, value: Value) -> bool {
    let current = vm.fiber;
    // SAFETY: the current fiber and its caller are live.
    unsafe {
        // Unhook this fiber from the one that ran it; resuming later
        // re-links them.
        vm.fiber = (*current).caller;
        (*current).caller = std::ptr::null_mut();
        (*current).state = FiberState::Other;

        if !vm.fiber.is_null() {
            // Make the caller's run method return the yielded value.
            let dst = (*vm.fiber).last_call_reg;
            fiber::ensure_stack(vm.fiber, dst + 1);
            (&mut (*vm.fiber).stack)[dst] = value;
        }
    }
    false
}

pub fn fiber_yield(vm: &mut WrenVm, _base: usize) -> bool {
    yield_impl(vm, Value::Null)
}

pub fn fiber_yield1(vm: &mut WrenVm, base: usize) -> bool {
    let value = arg(vm, base, 1);
    yield_impl(vm, value)
}
