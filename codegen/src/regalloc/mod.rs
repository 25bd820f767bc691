//! Register allocation.
//!
//! The allocator runs in three steps over a lowered instruction list: an
//! approximate reverse-walk [liveness] pass records which variables are
//! simultaneously live, edges land in the [interference] graph, and
//! [coloring] assigns one of `K` registers per variable (or defers it as a
//! spill). The x64 pipeline drives these with the general-purpose bank from
//! `isa::x64::regs`.

pub mod coloring;
pub mod interference;
pub mod liveness;

pub use self::coloring::{color, Allocation};
pub use self::interference::{Degree, InterferenceGraph};
pub use self::liveness::{build_interference, def_use, DefUse};
