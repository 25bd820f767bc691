//! x64 register bank and calling-convention register tables.

use crate::settings::Abi;
use ember_assembler_x64::enc;

/// The general-purpose registers handed to the allocator, in preference
/// order. `%rsp` and `%rbx` are excluded: the stack pointer is not
/// allocatable and `%rbx` is reserved for embedder use. Everything else,
/// `%rbp` included, is fair game; spill slots address through `%rsp`, so
/// coloring a variable to `%rbp` cannot alias spill addressing.
/// Caller-saved registers come first so short-lived values avoid the
/// callee-saved bank.
pub const ALLOCATABLE: [u8; 14] = [
    enc::RAX,
    enc::RCX,
    enc::RDX,
    enc::RSI,
    enc::RDI,
    enc::R8,
    enc::R9,
    enc::R10,
    enc::R11,
    enc::RBP,
    enc::R12,
    enc::R13,
    enc::R14,
    enc::R15,
];

/// The register integer return values prefer.
pub const RET: u8 = enc::RAX;

/// The integer parameter registers of `abi`, in order.
pub fn params(abi: Abi) -> &'static [u8] {
    match abi.autodetect() {
        Abi::Windows => &[enc::RCX, enc::RDX, enc::R8, enc::R9],
        _ => &[enc::RDI, enc::RSI, enc::RDX, enc::RCX, enc::R8, enc::R9],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourteen_allocatable_registers() {
        assert_eq!(ALLOCATABLE.len(), 14);
        assert!(!ALLOCATABLE.contains(&enc::RSP));
        assert!(!ALLOCATABLE.contains(&enc::RBX));
        // No duplicates.
        let mut regs = ALLOCATABLE.to_vec();
        regs.sort_unstable();
        regs.dedup();
        assert_eq!(regs.len(), 14);
    }

    #[test]
    fn sysv_parameter_order() {
        let p = params(Abi::SysV);
        assert_eq!(p, &[enc::RDI, enc::RSI, enc::RDX, enc::RCX, enc::R8, enc::R9]);
        assert_eq!(params(Abi::Windows), &[enc::RCX, enc::RDX, enc::R8, enc::R9]);
    }
}
