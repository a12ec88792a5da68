use thiserror::Error;

use crate::value::Type;

/// A lexical or syntax error. The compiler accumulates these and refuses to
/// produce a runnable chunk if any were reported.
#[derive(Debug, Clone, Error)]
#[error("[line {line}] {message}")]
pub struct CompileError {
    pub line: u32,
    pub message: String,
}

/// Raised from inside the dispatch loop. Unwinds every active frame back to
/// the top-level `interpret` call; each abandoned frame prints one backtrace
/// line on the way out.
///
/// `line` is 0 until the VM locates the error against the executing chunk.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RuntimeError {
    pub message: String,
    pub line: u32,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        RuntimeError {
            message: message.into(),
            line: 0,
        }
    }
}

pub fn no_method(method: &str, ty: Type) -> RuntimeError {
    RuntimeError::new(format!("Unknown method '{}' for <{}>", method, ty))
}

pub fn compare_mismatch(t1: Type, t2: Type) -> RuntimeError {
    RuntimeError::new(format!("Can't compare <{}> and <{}>", t1, t2))
}

pub fn type_mismatch(expected: Type, got: Type) -> RuntimeError {
    RuntimeError::new(format!("expected <{}>, got <{}>", expected, got))
}

pub fn type_mismatch2(expected1: Type, expected2: Type, got: Type) -> RuntimeError {
    RuntimeError::new(format!(
        "expected <{}> or <{}>, got <{}>",
        expected1, expected2, got
    ))
}

pub fn division_by_zero() -> RuntimeError {
    RuntimeError::new("division by 0")
}
