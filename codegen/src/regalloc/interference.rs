//! The interference graph: a symmetric boolean matrix over variable ids
//! with per-node degree counters.

use crate::bitset::{BitSet, NO_POS};

/// Degree counters fit comfortably in 16 bits.
pub type Degree = u16;

/// An undirected graph over the variables of one function, stored as an
/// `n x n` bitset plus a degree counter per node.
#[derive(Clone, Default)]
pub struct InterferenceGraph {
    bits: BitSet,
    degree: Vec<Degree>,
}

impl InterferenceGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset to `n` nodes and no edges.
    pub fn reset(&mut self, n: usize) {
        self.bits.resize(n * n);
        self.bits.fill(false);
        self.degree.clear();
        self.degree.resize(n, 0);
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.degree.len()
    }

    /// True if the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.degree.is_empty()
    }

    /// True if `a` and `b` interfere.
    pub fn contains(&self, a: u32, b: u32) -> bool {
        let n = self.len();
        let (a, b) = (a as usize, b as usize);
        if a >= n || b >= n {
            return false;
        }
        self.bits.get(a + b * n)
    }

    /// Add or remove the undirected edge `a -- b`.
    pub fn set(&mut self, a: u32, b: u32, value: bool) {
        let n = self.len();
        let (a, b) = (a as usize, b as usize);
        if a >= n || b >= n {
            return;
        }
        let offset = a + b * n;
        if self.bits.get(offset) == value {
            return;
        }
        let delta = if value { 1 } else { Degree::MAX }; // wrapping -1
        self.degree[a] = self.degree[a].wrapping_add(delta);
        self.degree[b] = self.degree[b].wrapping_add(delta); // even if a == b
        self.bits.set(offset, value);
        if a != b {
            // Keep both halves of the matrix in sync.
            self.bits.set(b + a * n, value);
        }
    }

    /// The number of neighbors of `node`.
    pub fn degree(&self, node: u32) -> Degree {
        self.degree.get(node as usize).copied().unwrap_or(0)
    }

    /// The first neighbor of `node` whose id is `>= from`, if any.
    pub fn first_neighbor(&self, node: u32, from: u32) -> Option<u32> {
        let n = self.len();
        let (node, from) = (node as usize, from as usize);
        if from >= n || self.degree(node as u32) == 0 {
            return None;
        }
        let row = node * n;
        let offset = self.bits.find(true, row + from, row + n);
        if offset == NO_POS {
            None
        } else {
            Some((offset - row) as u32)
        }
    }

    /// Detach `node` from all of its neighbors.
    pub fn remove(&mut self, node: u32) {
        let mut from = 0;
        while let Some(other) = self.first_neighbor(node, from) {
            self.set(node, other, false);
            from = other + 1;
        }
    }
}
