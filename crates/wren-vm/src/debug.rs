//! Runtime error reporting through the host's error callback.

use crate::config::WrenErrorKind;
use crate::vm::WrenVm;

/// Reports the current fiber's error and one line per call frame, newest
/// first. Stub frames (no module) and core-module frames (no module name)
/// are omitted; they are implementation detail, not user code.
pub(crate) fn print_stack_trace(vm: &mut WrenVm) {
    // Bail if the host doesn't enable printing errors.
    let Some(error_fn) = vm.config.error else {
        return;
    };

    let fiber = vm.fiber;
    debug_assert!(!fiber.is_null());

    // SAFETY: the fiber, its frames and their functions are live.
    unsafe {
        let error = (*fiber).error;
        if error.is_string() {
            let message = (*error.as_string()).to_display().into_owned();
            error_fn(vm, WrenErrorKind::Runtime, None, -1, &message);
        } else {
            error_fn(vm, WrenErrorKind::Runtime, None, -1, "[error object]");
        }

        for index in (0..(*fiber).frames.len()).rev() {
            let frame = (&(*fiber).frames)[index];
            let function = (*frame.closure).fn_obj;

            // Stub functions for calling methods from the host have no
            // module.
            let module = (*function).module;
            if module.is_null() {
                continue;
            }

            // The core module has no name; what part of it is implemented
            // where is not something to highlight to a user.
            let Some(module_name) = (*module).name_str() else {
                continue;
            };

            // The ip has advanced past the instruction that just executed.
            let line = (*function)
                .line_at(frame.ip.saturating_sub(1))
                .map(|line| line as i32)
                .unwrap_or(-1);
            let name = (*function).debug.name.clone();
            error_fn(
                vm,
                WrenErrorKind::StackTrace,
                Some(&module_name.into_owned()),
                line,
                &name,
            );
        }
    }
}
