//! Shared leaf definitions for the Wren register VM.
//!
//! This crate has no knowledge of the heap or the interpreter. It holds the
//! pieces both the compiler side and the runtime side agree on: the 32-bit
//! packed instruction encoding, the append-only symbol tables used for
//! method names and module variables, and UTF-8 code point helpers.

pub mod instruction;
pub mod symbol;
pub mod utf8;

pub use instruction::{Instruction, Opcode};
pub use symbol::SymbolTable;
