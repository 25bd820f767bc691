//! Memory references.
//!
//! A `Mem` node is a tuple-like expression whose children describe an
//! address. The portable flavor has a single child, an arbitrary address
//! expression; the x86 flavor stores up to four children in the fixed order
//! `displacement, base, index, scale` and is what the x64 lowering builds
//! when it recognizes an addressable expression.

use crate::code::Code;
use crate::ir::{Node, Type};

/// Distinguishes the portable memory flavor from the machine-specific ones.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MemType {
    /// Portable: one child, the address expression.
    Generic = 0,
    /// x86: `disp + base + index * scale`.
    X86 = 1,
    /// arm64: reserved for the planned backend.
    Arm64 = 2,
}

impl MemType {
    /// Decode from a header discriminant.
    pub fn from_u16(op: u16) -> Option<MemType> {
        Some(match op {
            0 => MemType::Generic,
            1 => MemType::X86,
            2 => MemType::Arm64,
            _ => return None,
        })
    }
}

/// Child-slot layout of an x86 memory reference.
///
/// All slots are optional from the end: `[disp]`, `[disp, base]`,
/// `[disp, base, index]`, `[disp, base, index, scale]`.
pub struct X86MemLayout;

impl X86MemLayout {
    /// Child index of the constant displacement.
    pub const DISP: u32 = 0;
    /// Child index of the base variable.
    pub const BASE: u32 = 1;
    /// Child index of the index variable.
    pub const INDEX: u32 = 2;
    /// Child index of the constant scale (1, 2, 4 or 8).
    pub const SCALE: u32 = 3;
}

/// Read the optional child `i` of a mem node, treating a missing slot or a
/// `Bad` placeholder as absent.
pub fn mem_child(code: &Code, mem: Node, i: u32) -> Option<Node> {
    debug_assert_eq!(mem.ty(), Type::Mem);
    if i >= mem.children(code) {
        return None;
    }
    let child = mem.child(code, i);
    if child.is_valid() {
        Some(child)
    } else {
        None
    }
}
