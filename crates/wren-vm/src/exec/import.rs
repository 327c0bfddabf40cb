//! Module import: host name resolution, loading, and variable lookup for
//! the `IMPORTMODULE`/`IMPORTVAR` opcodes.

use log::debug;

use wren_runtime::objects::map;
use wren_runtime::objects::module::{self, ObjModule};
use wren_runtime::objects::string::{self, FmtArg};
use wren_runtime::Value;

use crate::vm::WrenVm;

/// Lets the host rewrite an imported module name relative to the importing
/// module. Errors become fiber aborts.
fn resolve_module_name(vm: &mut WrenVm, name: Value) -> Result<Value, Value> {
    let Some(resolve) = vm.config.resolve_module else {
        return Ok(name);
    };

    // SAFETY: the importing function and its module are live.
    let importer = unsafe {
        let frame = (*vm.fiber).frames.last().expect("active frame");
        let module = (*(*frame.closure).fn_obj).module;
        if module.is_null() {
            String::new()
        } else {
            (*module)
                .name_str()
                .map(|n| n.into_owned())
                .unwrap_or_default()
        }
    };
    let name_text = unsafe { (*name.as_string()).to_display().into_owned() };

    match resolve(vm, &importer, &name_text) {
        Some(resolved) => {
            if resolved == name_text {
                Ok(name)
            } else {
                Ok(string::value(&mut vm.gc, &resolved))
            }
        }
        None => Err(string::format_value(
            &mut vm.gc,
            "Could not resolve module '@' imported from '$'.",
            &[FmtArg::Val(name), FmtArg::Str(&importer)],
        )),
    }
}

/// `IMPORTMODULE`: returns the already-loaded module's value, or a closure
/// that executes the module body when called.
pub fn import_module(vm: &mut WrenVm, name: Value) -> Result<Value, Value> {
    let name = resolve_module_name(vm, name)?;

    let existing = map::get(vm.modules, name);
    if !existing.is_undefined() {
        return Ok(existing);
    }

    vm.gc.push_root(name.as_obj());
    // SAFETY: the name is a live, rooted string.
    let name_text = unsafe { (*name.as_string()).to_display().into_owned() };
    debug!("importing module '{}'", name_text);

    let source = vm.config.load_module.and_then(|load| load(vm, &name_text));

    let Some(source) = source else {
        vm.gc.pop_root();
        return Err(string::format_value(
            &mut vm.gc,
            "Could not load module '@'.",
            &[FmtArg::Val(name)],
        ));
    };

    let closure = vm.compile_in_module(name, &source);
    vm.gc.pop_root();

    match closure {
        Some(closure) => Ok(Value::obj(closure)),
        None => Err(string::format_value(
            &mut vm.gc,
            "Could not compile module '@'.",
            &[FmtArg::Val(name)],
        )),
    }
}

/// `IMPORTVAR`: looks a variable up in the most recently imported module.
pub fn get_module_variable(
    vm: &mut WrenVm,
    module: *mut ObjModule,
    variable: Value,
) -> Result<Value, Value> {
    debug_assert!(!module.is_null(), "should have already imported module");
    // SAFETY: the module and variable name are live.
    let name_text = unsafe { (*variable.as_string()).to_display().into_owned() };
    if let Some(value) = module::find_variable(module, &name_text) {
        return Ok(value);
    }

    let module_name = unsafe {
        if (*module).name.is_null() {
            FmtArg::Str("core")
        } else {
            FmtArg::Val(Value::obj((*module).name))
        }
    };
    Err(string::format_value(
        &mut vm.gc,
        "Could not find a variable named '@' in module '@'.",
        &[FmtArg::Val(variable), module_name],
    ))
}
