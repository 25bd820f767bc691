//! ember code generation library.
//!
//! Callers build a functional intermediate representation through
//! [`ir::Func`], then drive it through the pipeline: the [`opt::Optimizer`]
//! folds and simplifies expressions, [`Compiler::compile`] flattens
//! structured control flow into a linear portable form,
//! [`Compiler::compile_x64`] lowers that form to x86_64 pseudo-instructions
//! and allocates registers, and [`Assembler::x64`] encodes the result to
//! bytes the caller can place in executable memory.
//!
//! All IR nodes live inside a single append-only arena owned by the
//! function; compilation appends new nodes and never mutates old ones.

#![warn(missing_docs, trivial_numeric_casts, unused_extern_crates)]

pub mod binemit;
pub mod flowgraph;
pub mod ir;
pub mod isa;
pub mod opt;
pub mod regalloc;
pub mod settings;

mod bitset;
mod code;
mod compile;
mod lower;
mod result;

pub use crate::code::{Code, Offset};
pub use crate::compile::Compiler;
pub use crate::isa::x64::emit::Assembler;
pub use crate::result::{CodegenError, CodegenResult, Error};

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
