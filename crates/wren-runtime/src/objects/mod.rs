//! Heap object layouts and their operations, one module per kind.
//!
//! Every object struct is `#[repr(C)]` with an [`crate::gc::ObjHeader`] as
//! its first field. Constructors take `&mut Gc` so allocations are counted
//! and linked; operations that can grow buffers also take the Gc to keep the
//! byte counter honest.

pub mod class;
pub mod closure;
pub mod fiber;
pub mod foreign;
pub mod function;
pub mod instance;
pub mod list;
pub mod map;
pub mod module;
pub mod range;
pub mod string;

pub use class::{Method, ObjClass};
pub use closure::{CompilerUpvalue, ObjClosure, ObjUpvalue, UpvalueState};
pub use fiber::{CallFrame, FiberState, ObjFiber};
pub use foreign::ObjForeign;
pub use function::{FnDebug, ObjFn};
pub use instance::ObjInstance;
pub use list::ObjList;
pub use map::{MapEntry, ObjMap, ObjMapEntry};
pub use module::ObjModule;
pub use range::ObjRange;
pub use string::ObjString;
