//! Function prototypes: the compiled units the interpreter executes.

use crate::gc::{Gc, ObjHeader, ObjKind};
use crate::objects::module::ObjModule;
use crate::value::Value;
use wren_core::Instruction;

/// Debug information carried alongside the code.
pub struct FnDebug {
    pub name: String,
    /// Source line per instruction.
    pub source_lines: Vec<u32>,
}

#[repr(C)]
pub struct ObjFn {
    pub header: ObjHeader,
    pub constants: Vec<Value>,
    pub code: Vec<Instruction>,
    /// Per-instruction register watermark: the first scratch register an
    /// overload call may clobber at that point.
    pub stack_top: Vec<u32>,
    pub module: *mut ObjModule,
    /// Registers this function's frame needs.
    pub max_slots: usize,
    pub num_upvalues: usize,
    pub arity: usize,
    pub debug: FnDebug,
}

impl ObjFn {
    /// The watermark at instruction `ip`, falling back to the frame size
    /// when the compiler provided no table.
    #[inline]
    pub fn stack_top_at(&self, ip: usize) -> usize {
        self.stack_top
            .get(ip)
            .map(|&top| top as usize)
            .unwrap_or(self.max_slots)
    }

    /// The source line of the instruction at `ip`, if known.
    pub fn line_at(&self, ip: usize) -> Option<u32> {
        self.debug.source_lines.get(ip).copied()
    }
}

pub fn new(gc: &mut Gc, module: *mut ObjModule, max_slots: usize) -> *mut ObjFn {
    let function = ObjFn {
        header: ObjHeader::new(ObjKind::Fn, gc.core.fn_),
        constants: Vec::new(),
        code: Vec::new(),
        stack_top: Vec::new(),
        module,
        max_slots,
        num_upvalues: 0,
        arity: 0,
        debug: FnDebug {
            name: String::new(),
            source_lines: Vec::new(),
        },
    };
    gc.link(Box::new(function))
}

pub fn bind_name(function: *mut ObjFn, name: &str) {
    // SAFETY: the function is live.
    unsafe { (*function).debug.name = name.to_string() };
}
