//! The Wren register-bytecode virtual machine.
//!
//! An embedder builds a [`WrenVm`] from a [`WrenConfig`], hands it source
//! through [`WrenVm::interpret`] (with an external compiler plugged into the
//! config) or pre-built function objects, and exchanges data through the
//! slot API.

pub mod api;
pub mod config;
pub mod corelib;
pub mod debug;
pub mod error;
pub mod exec;
pub mod vm;

pub use config::{ForeignClassMethods, ForeignMethodFn, WrenConfig, WrenErrorKind};
pub use error::{InterpretResult, WrenError};
pub use vm::{WrenHandle, WrenVm};

pub use wren_core::{Instruction, Opcode};
pub use wren_runtime::{Gc, Value};
