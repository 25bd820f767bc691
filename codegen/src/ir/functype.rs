//! Function type signatures and interned names.

use crate::code::Code;
use crate::ir::{Kind, Node, Type};

/// Decoded view of a `FuncType` node.
///
/// The node stores the result kinds followed by the parameter kinds as
/// inline constants; the operator field holds the result count.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FuncTypeData {
    /// Kinds of the return values.
    pub results: Vec<Kind>,
    /// Kinds of the parameters.
    pub params: Vec<Kind>,
}

impl FuncTypeData {
    /// Decode a `FuncType` node.
    pub fn from_node(code: &Code, node: Node) -> Option<FuncTypeData> {
        if node.ty() != Type::FuncType {
            return None;
        }
        let nresults = node.raw_op() as u32;
        let total = node.children(code);
        let kind_at = |i: u32| -> Kind {
            node.child(code, i)
                .to_value(code)
                .and_then(|v| Kind::from_u8(v.as_u64() as u8))
                .unwrap_or(Kind::Bad)
        };
        Some(FuncTypeData {
            results: (0..nresults).map(kind_at).collect(),
            params: (nresults..total).map(kind_at).collect(),
        })
    }
}

/// Decode a `Name` node back into its string.
pub fn name_to_string(code: &Code, node: Node) -> Option<String> {
    if node.ty() != Type::Name {
        return None;
    }
    let len = node.raw_op() as usize;
    let mut bytes = Vec::with_capacity(len);
    let mut off = node.offset() + 4;
    while bytes.len() < len {
        let item = code.at(off);
        for b in item.to_le_bytes() {
            if bytes.len() < len {
                bytes.push(b);
            }
        }
        off += 4;
    }
    String::from_utf8(bytes).ok()
}
