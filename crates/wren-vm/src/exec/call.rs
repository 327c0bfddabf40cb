//! Method invocation: frame pushes, arity checks and the operator-overload
//! dispatch shared by the arithmetic, comparison, subscript and iteration
//! opcodes.

use wren_runtime::objects::class::Method;
use wren_runtime::objects::closure::ObjClosure;
use wren_runtime::objects::fiber::{self, ObjFiber};
use wren_runtime::Value;

use crate::vm::WrenVm;

/// Pushes a frame for `closure` with its register window based at the
/// absolute stack index `stack_start`. Arguments are expected to already be
/// in place there.
pub fn call_function(
    fiber: *mut ObjFiber,
    closure: *mut ObjClosure,
    stack_start: usize,
    return_reg: i64,
) {
    fiber::append_call_frame(fiber, closure, stack_start, return_reg);
}

/// Arity check for the `call(...)` method family on closures. We only care
/// about missing arguments, not extras; `num_args` includes the receiver.
pub fn check_arity(vm: &mut WrenVm, value: Value, num_args: usize) -> bool {
    debug_assert!(value.is_closure(), "receiver must be a closure");
    // SAFETY: the closure and its function are live.
    let arity = unsafe { (*(*value.as_closure()).fn_obj).arity };

    if num_args - 1 >= arity {
        return true;
    }

    vm.fiber_abort_str("Function expects more arguments.");
    false
}

/// How an overload invocation left the interpreter.
pub enum OverloadOutcome {
    /// A primitive or foreign method produced this value directly.
    Value(Value),
    /// A frame was pushed or the fiber switched; reload the frame state.
    Reenter,
    /// The fiber aborted.
    Abort,
}

/// Invokes an overloaded operator method. Scratch registers are reserved at
/// the current instruction's watermark so live registers below it survive;
/// `return_reg` is the absolute stack slot a block method's result lands in.
pub fn invoke_overload(
    vm: &mut WrenVm,
    method: Method,
    args: &[Value],
    return_reg: i64,
) -> OverloadOutcome {
    let fiber = vm.fiber;
    // SAFETY: the current fiber, its top frame and the frame's function are
    // live for the whole call.
    let scratch_base = unsafe {
        let frame = (*fiber).frames.last().expect("active frame");
        let watermark = (*(*frame.closure).fn_obj).stack_top_at(frame.ip);
        frame.stack_start + watermark
    };

    fiber::ensure_stack(fiber, scratch_base + args.len());
    // SAFETY: just grown to cover the scratch window.
    unsafe {
        for (i, &arg) in args.iter().enumerate() {
            (&mut (*fiber).stack)[scratch_base + i] = arg;
        }
    }

    match method {
        Method::Block(closure) => {
            call_function(fiber, closure, scratch_base, return_reg);
            OverloadOutcome::Reenter
        }
        Method::Primitive(id) => {
            let primitive = vm.primitives[id as usize];
            if primitive(vm, scratch_base) {
                // SAFETY: the primitive stored its result in the base slot.
                OverloadOutcome::Value(unsafe { (&(*fiber).stack)[scratch_base] })
            } else if !vm.fiber.is_null() && unsafe { (*vm.fiber).has_error() } {
                OverloadOutcome::Abort
            } else {
                // A fiber switch; the dispatch loop reloads (or exits when
                // no fiber is left to run).
                OverloadOutcome::Reenter
            }
        }
        Method::Foreign(id) => {
            let foreign = vm.foreign_methods[id as usize];
            debug_assert!(vm.api_stack.is_none(), "cannot already be in foreign call");
            // SAFETY: the fiber is live.
            unsafe { (*fiber).api_stack_top = scratch_base + args.len() };
            vm.api_stack = Some(scratch_base);
            foreign(vm);
            vm.api_stack = None;
            // SAFETY: the fiber is still live.
            unsafe {
                (*fiber).api_stack_top = scratch_base + 1;
                if (*fiber).has_error() {
                    OverloadOutcome::Abort
                } else {
                    OverloadOutcome::Value((&(*fiber).stack)[scratch_base])
                }
            }
        }
        Method::None | Method::FunctionCall | Method::Finalizer(_) => {
            unreachable!("not an overloadable method kind")
        }
    }
}
