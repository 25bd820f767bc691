//! x64 encoding primitives for the ember code generator.
//!
//! This crate knows nothing about ember's IR: it provides general-purpose
//! register encodings, REX-prefix computation, ModR/M + SIB + displacement
//! emission over an [`Amode`], and immediate classification. The code
//! generator drives these primitives from its own instruction descriptors.
//!
//! ```
//! use ember_assembler_x64::{encode_modrm, CodeSink, Gpr, RexFlags};
//!
//! // add %rbx, %rax  =>  48 01 d8
//! let (rax, rbx) = (Gpr::new(0), Gpr::new(3));
//! let mut sink: Vec<u8> = Vec::new();
//! RexFlags::set_w().emit_two_op(&mut sink, rbx.enc(), rax.enc());
//! sink.put1(0x01);
//! sink.put1(encode_modrm(0b11, rbx.enc() & 7, rax.enc() & 7));
//! assert_eq!(sink, vec![0x48, 0x01, 0xd8]);
//! ```

mod api;
mod imm;
mod mem;
mod reg;
mod rex;

pub use api::CodeSink;
pub use imm::Disp;
pub use mem::{emit_modrm_sib_disp, Amode, Scale};
pub use reg::{enc, Gpr, Size};
pub use rex::{encode_modrm, encode_sib, low8_will_sign_extend_to_32, RexFlags};
