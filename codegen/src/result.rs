//! Result and error types for the compilation pipeline.

use crate::ir::Node;
use core::fmt;
use std::borrow::Cow;

/// A diagnostic tied to the IR node that provoked it.
///
/// Diagnostics are collected in vectors owned by the [`crate::Compiler`] and
/// [`crate::Assembler`]; their presence makes the final artifact unusable,
/// their absence guarantees the emitted bytes are valid.
#[derive(Clone, Debug)]
pub struct Error {
    /// The offending node.
    pub node: Node,
    /// What went wrong.
    pub msg: Cow<'static, str>,
}

impl Error {
    /// Create a diagnostic for `node`.
    pub fn new(node: Node, msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            node,
            msg: msg.into(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {:?}", self.msg, self.node)
    }
}

/// A fatal compilation error.
///
/// Per-node problems are reported as [`Error`] diagnostics and do not abort
/// the pipeline; this type covers the conditions that do.
#[derive(Debug, PartialEq, Eq)]
pub enum CodegenError {
    /// The code arena (or a scratch container) failed to grow. The function
    /// is poisoned: subsequent stages are no-ops.
    OutOfMemory,
    /// The requested compilation stage was run out of order, e.g. encoding a
    /// function that was never lowered to the target.
    NotCompiled(&'static str),
    /// The requested target is not supported by this build.
    Unsupported(&'static str),
}

impl fmt::Display for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CodegenError::OutOfMemory => write!(f, "out of memory"),
            CodegenError::NotCompiled(what) => write!(f, "not compiled: {what}"),
            CodegenError::Unsupported(what) => write!(f, "unsupported: {what}"),
        }
    }
}

impl std::error::Error for CodegenError {}

/// A convenient alias for a `Result` that uses [`CodegenError`].
pub type CodegenResult<T> = Result<T, CodegenError>;
