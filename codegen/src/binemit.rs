//! Binary emission: a byte buffer with label binding and relocation
//! backpatching.
//!
//! The assembler emits placeholder fields for jumps and calls whose target
//! label is not bound yet, recording a [`Reloc`] per use. After emission,
//! [`CodeBuffer::finalize`] walks the relocations and writes each
//! displacement as `label_offset - site_end_offset`; a displacement that
//! does not fit its field width is reported, not silently truncated.

use ember_assembler_x64::CodeSink;

/// The width and addressing of one relocation field.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RelocKind {
    /// An 8-bit displacement relative to the end of the field.
    Rel8,
    /// A 32-bit displacement relative to the end of the field.
    Rel32,
    /// A 64-bit absolute slot, patched with the label's byte offset within
    /// the buffer; the embedder adds the final placement address.
    Abs64,
}

impl RelocKind {
    fn field_bytes(self) -> u32 {
        match self {
            RelocKind::Rel8 => 1,
            RelocKind::Rel32 => 4,
            RelocKind::Abs64 => 8,
        }
    }
}

/// One recorded label use awaiting backpatch.
#[derive(Copy, Clone, Debug)]
pub struct Reloc {
    /// Byte offset of the field within the buffer.
    pub at: u32,
    /// Index of the target label.
    pub label: u16,
    /// Field width and addressing.
    pub kind: RelocKind,
}

/// A relocation that could not be resolved.
#[derive(Debug)]
pub struct RelocError {
    /// The failing relocation.
    pub reloc: Reloc,
    /// Why it failed.
    pub msg: &'static str,
}

/// A growable byte buffer collecting encoded instructions, bound labels and
/// relocations.
pub struct CodeBuffer {
    bytes: Vec<u8>,
    relocs: Vec<Reloc>,
    label_offsets: Vec<Option<u32>>,
}

impl CodeBuffer {
    /// Create a buffer prepared for `num_labels` labels.
    pub fn new(num_labels: usize) -> Self {
        CodeBuffer {
            bytes: Vec::new(),
            relocs: Vec::new(),
            label_offsets: vec![None; num_labels],
        }
    }

    /// Bind `label` to the current offset.
    pub fn bind_label(&mut self, label: u16) {
        if let Some(slot) = self.label_offsets.get_mut(label as usize) {
            *slot = Some(self.bytes.len() as u32);
        }
    }

    /// The offset a label was bound at, if it has been bound.
    pub fn label_offset(&self, label: u16) -> Option<u32> {
        self.label_offsets.get(label as usize).copied().flatten()
    }

    /// Emit a placeholder field for `label` at the current offset and
    /// record the relocation.
    pub fn use_label(&mut self, label: u16, kind: RelocKind) {
        self.relocs.push(Reloc {
            at: self.bytes.len() as u32,
            label,
            kind,
        });
        for _ in 0..kind.field_bytes() {
            self.bytes.push(0);
        }
    }

    /// The bytes emitted so far.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Resolve all recorded relocations. Returns the ones that failed.
    pub fn finalize(&mut self) -> Vec<RelocError> {
        let mut failed = Vec::new();
        for reloc in core::mem::take(&mut self.relocs) {
            let target = match self.label_offset(reloc.label) {
                Some(t) => t,
                None => {
                    failed.push(RelocError {
                        reloc,
                        msg: "unresolved label",
                    });
                    continue;
                }
            };
            let site_end = reloc.at + reloc.kind.field_bytes();
            let disp = target as i64 - site_end as i64;
            let at = reloc.at as usize;
            match reloc.kind {
                RelocKind::Rel8 => match i8::try_from(disp) {
                    Ok(d) => self.bytes[at] = d as u8,
                    Err(_) => failed.push(RelocError {
                        reloc,
                        msg: "8-bit branch displacement out of range",
                    }),
                },
                RelocKind::Rel32 => match i32::try_from(disp) {
                    Ok(d) => self.bytes[at..at + 4].copy_from_slice(&d.to_le_bytes()),
                    Err(_) => failed.push(RelocError {
                        reloc,
                        msg: "32-bit branch displacement out of range",
                    }),
                },
                RelocKind::Abs64 => {
                    self.bytes[at..at + 8].copy_from_slice(&(target as u64).to_le_bytes());
                }
            }
        }
        failed
    }

    /// Consume the buffer, yielding the bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl CodeSink for CodeBuffer {
    fn put1(&mut self, v: u8) {
        self.bytes.push(v);
    }

    fn put2(&mut self, v: u16) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    fn put4(&mut self, v: u32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    fn put8(&mut self, v: u64) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    fn current_offset(&self) -> u32 {
        self.bytes.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_rel8_backpatch() {
        let mut buf = CodeBuffer::new(1);
        buf.put1(0xeb);
        buf.use_label(0, RelocKind::Rel8);
        buf.bind_label(0);
        buf.put1(0x90);
        let errors = buf.finalize();
        assert!(errors.is_empty());
        // Displacement from the end of the field (offset 2) to the label
        // (offset 2) is zero.
        assert_eq!(buf.bytes(), &[0xeb, 0x00, 0x90]);
    }

    #[test]
    fn backward_rel32() {
        let mut buf = CodeBuffer::new(1);
        buf.bind_label(0);
        buf.put1(0x90);
        buf.put1(0xe9);
        buf.use_label(0, RelocKind::Rel32);
        let errors = buf.finalize();
        assert!(errors.is_empty());
        // Field at 2..6, site end 6, target 0: disp -6.
        assert_eq!(&buf.bytes()[2..6], &(-6i32).to_le_bytes());
    }

    #[test]
    fn out_of_range_rel8_is_reported() {
        let mut buf = CodeBuffer::new(1);
        buf.put1(0xeb);
        buf.use_label(0, RelocKind::Rel8);
        for _ in 0..200 {
            buf.put1(0x90);
        }
        buf.bind_label(0);
        let errors = buf.finalize();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].reloc.kind, RelocKind::Rel8);
    }

    #[test]
    fn unresolved_label_is_reported() {
        let mut buf = CodeBuffer::new(2);
        buf.put1(0xe9);
        buf.use_label(1, RelocKind::Rel32);
        let errors = buf.finalize();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].msg, "unresolved label");
    }

    #[test]
    fn abs64_patches_the_label_offset() {
        let mut buf = CodeBuffer::new(1);
        buf.put2(0xb848); // movabs %rax, imm64 (REX.W + b8)
        buf.use_label(0, RelocKind::Abs64);
        buf.bind_label(0);
        let errors = buf.finalize();
        assert!(errors.is_empty());
        assert_eq!(&buf.bytes()[2..10], &10u64.to_le_bytes());
    }
}
