//! Target instruction-set support.
//!
//! x86_64 is the implemented target; arm64 has a reserved slot and no
//! backend yet. Targets are selected from a `target-lexicon` triple.

pub mod x64;

use crate::ir::Arch;
use crate::result::CodegenError;
use target_lexicon::{Architecture, Triple};

/// Pick the compilation target for a triple.
pub fn lookup(triple: &Triple) -> Result<Arch, CodegenError> {
    match triple.architecture {
        Architecture::X86_64 => Ok(Arch::X64),
        Architecture::Aarch64(_) => Err(CodegenError::Unsupported("arm64 backend not implemented")),
        _ => Err(CodegenError::Unsupported("unknown architecture")),
    }
}

/// Pick the compilation target for the host.
pub fn host() -> Result<Arch, CodegenError> {
    lookup(&Triple::host())
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::str::FromStr;

    #[test]
    fn x86_64_is_supported() {
        let triple = Triple::from_str("x86_64-unknown-linux-gnu").unwrap();
        assert_eq!(lookup(&triple).unwrap(), Arch::X64);
    }

    #[test]
    fn aarch64_is_reserved() {
        let triple = Triple::from_str("aarch64-unknown-linux-gnu").unwrap();
        assert!(matches!(
            lookup(&triple),
            Err(CodegenError::Unsupported(_))
        ));
    }
}
