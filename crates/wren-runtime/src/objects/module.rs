//! Modules: a variable name table plus the parallel value array.

use crate::gc::{Gc, ObjHeader, ObjKind};
use crate::objects::string::ObjString;
use crate::value::Value;
use wren_core::SymbolTable;

/// Module-variable definition outcomes that are not plain success.
pub const DEFINE_TOO_MANY: i64 = -2;
pub const DEFINE_ALREADY_DEFINED: i64 = -1;

pub const MAX_MODULE_VARS: usize = 1 << 18;

#[repr(C)]
pub struct ObjModule {
    pub header: ObjHeader,
    pub variable_names: SymbolTable,
    pub variables: Vec<Value>,
    /// Null for the implicit core module.
    pub name: *mut ObjString,
}

impl ObjModule {
    pub fn name_str(&self) -> Option<std::borrow::Cow<'_, str>> {
        if self.name.is_null() {
            return None;
        }
        // SAFETY: module names are live strings.
        Some(unsafe { (*self.name).to_display() })
    }
}

pub fn new(gc: &mut Gc, name: *mut ObjString) -> *mut ObjModule {
    let module = ObjModule {
        // Modules are never first-class values, so they have no class.
        header: ObjHeader::new(ObjKind::Module, core::ptr::null_mut()),
        variable_names: SymbolTable::new(),
        variables: Vec::new(),
        name,
    };
    gc.link(Box::new(module))
}

pub fn find_variable(module: *mut ObjModule, name: &str) -> Option<Value> {
    // SAFETY: the module is live.
    unsafe {
        let symbol = (*module).variable_names.find(name)?;
        Some((&(*module).variables)[symbol as usize])
    }
}

/// Declares a forward reference to a variable first used on `line`. The
/// line number is stored as the variable's value so a later definition (or
/// an error report) can recover it.
pub fn declare_variable(gc: &mut Gc, module: *mut ObjModule, name: &str, line: u32) -> i64 {
    // SAFETY: the module is live.
    unsafe {
        if (*module).variables.len() >= MAX_MODULE_VARS {
            return DEFINE_TOO_MANY;
        }
        (*module).variables.push(Value::Num(line as f64));
        gc.add_bytes(core::mem::size_of::<Value>());
        (*module).variable_names.ensure(name) as i64
    }
}

/// Defines `name` to `value`. Returns the symbol on success,
/// `DEFINE_ALREADY_DEFINED` when the name already has a real definition, or
/// `DEFINE_TOO_MANY` when the module is full. An implicit declaration is
/// upgraded in place and its recorded use line handed back via `line`.
pub fn define_variable(
    gc: &mut Gc,
    module: *mut ObjModule,
    name: &str,
    value: Value,
    line: Option<&mut u32>,
) -> i64 {
    // SAFETY: the module is live.
    unsafe {
        if (*module).variables.len() >= MAX_MODULE_VARS {
            return DEFINE_TOO_MANY;
        }

        match (*module).variable_names.find(name) {
            None => {
                let symbol = (*module).variable_names.ensure(name);
                (*module).variables.push(value);
                gc.add_bytes(core::mem::size_of::<Value>());
                symbol as i64
            }
            Some(symbol) if (&(*module).variables)[symbol as usize].is_num() => {
                // An implicitly declared variable holds its first-use line.
                if let Some(line) = line {
                    *line = (&(*module).variables)[symbol as usize].as_num() as u32;
                }
                (&mut (*module).variables)[symbol as usize] = value;
                symbol as i64
            }
            Some(_) => DEFINE_ALREADY_DEFINED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gc() -> Gc {
        Gc::new(1024 * 1024, 1024, 50)
    }

    #[test]
    fn define_and_find() {
        let mut gc = gc();
        let module = new(&mut gc, core::ptr::null_mut());
        let symbol = define_variable(&mut gc, module, "x", Value::Num(9.0), None);
        assert!(symbol >= 0);
        assert_eq!(find_variable(module, "x").unwrap().as_num(), 9.0);
        assert!(find_variable(module, "y").is_none());
    }

    #[test]
    fn redefinition_is_rejected() {
        let mut gc = gc();
        let module = new(&mut gc, core::ptr::null_mut());
        define_variable(&mut gc, module, "x", Value::TRUE, None);
        assert_eq!(
            define_variable(&mut gc, module, "x", Value::FALSE, None),
            DEFINE_ALREADY_DEFINED
        );
    }

    #[test]
    fn implicit_declaration_upgrades() {
        let mut gc = gc();
        let module = new(&mut gc, core::ptr::null_mut());
        let declared = declare_variable(&mut gc, module, "later", 14);
        assert!(declared >= 0);

        let mut line = 0;
        let defined = define_variable(&mut gc, module, "later", Value::TRUE, Some(&mut line));
        assert_eq!(defined, declared);
        assert_eq!(line, 14);
        assert!(find_variable(module, "later").unwrap().is_true());
    }
}
