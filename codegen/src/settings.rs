//! Pipeline configuration: optimization flags and the ABI selector.

use bitflags::bitflags;

bitflags! {
    /// Flags controlling the optimizer and which operations count as
    /// side-effecting.
    pub struct Opt: u8 {
        /// Evaluate expressions over constants at compile time.
        const CONSTANT_FOLDING = 1 << 0;
        /// Apply algebraic rewrites and canonicalization.
        const EXPR_SIMPLIFICATION = 1 << 1;
        /// Treat division as side-effecting: it must not be eliminated as
        /// dead code even when its result is unused.
        const CHECK_DIV_BY_ZERO = 1 << 2;
        /// Treat memory access as side-effecting.
        const CHECK_NULL_PTR = 1 << 3;
        /// No side-effect checks.
        const CHECK_NONE = 0;
        /// All side-effect checks.
        const CHECK_ALL = Self::CHECK_DIV_BY_ZERO.bits | Self::CHECK_NULL_PTR.bits;
    }
}

impl Default for Opt {
    /// Both optimizations on, all checks on.
    fn default() -> Self {
        Opt::CONSTANT_FOLDING | Opt::EXPR_SIMPLIFICATION | Opt::CHECK_ALL
    }
}

/// Which calling convention parameter/result register hints follow.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Abi {
    /// Pick the convention of the host platform.
    Auto,
    /// The System V AMD64 convention (Linux, macOS, BSDs).
    SysV,
    /// The Windows x64 convention.
    Windows,
}

impl Abi {
    /// Resolve `Auto` against the host.
    pub fn autodetect(self) -> Abi {
        match self {
            Abi::Auto => {
                if cfg!(windows) {
                    Abi::Windows
                } else {
                    Abi::SysV
                }
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_flags() {
        let opt = Opt::default();
        assert!(opt.contains(Opt::CONSTANT_FOLDING));
        assert!(opt.contains(Opt::EXPR_SIMPLIFICATION));
        assert!(opt.contains(Opt::CHECK_ALL));
    }

    #[test]
    fn autodetect_is_stable() {
        let abi = Abi::Auto.autodetect();
        assert_ne!(abi, Abi::Auto);
        assert_eq!(abi.autodetect(), abi);
        assert_eq!(Abi::SysV.autodetect(), Abi::SysV);
    }
}
