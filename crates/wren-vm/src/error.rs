//! Host-facing results of an interpretation.

/// What `interpret` and `call` report back to the embedder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretResult {
    Success,
    CompileError,
    RuntimeError,
}

impl InterpretResult {
    pub fn is_success(self) -> bool {
        matches!(self, InterpretResult::Success)
    }
}

/// `std::error::Error` wrapper for embedders that thread VM failures through
/// `?`-style error handling.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WrenError {
    #[error("compile error")]
    Compile,
    #[error("runtime error")]
    Runtime,
}

impl From<InterpretResult> for Result<(), WrenError> {
    fn from(result: InterpretResult) -> Self {
        match result {
            InterpretResult::Success => Ok(()),
            InterpretResult::CompileError => Err(WrenError::Compile),
            InterpretResult::RuntimeError => Err(WrenError::Runtime),
        }
    }
}
