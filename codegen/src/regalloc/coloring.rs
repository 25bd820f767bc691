//! Greedy graph coloring with register hints.
//!
//! Chaitin-style simplify/select: repeatedly remove a minimum-degree node
//! with degree below `K` and push it on a stack; when none qualifies, defer
//! the highest-degree node as a spill candidate. Nodes are then popped and
//! given the lowest color unused by any already-colored neighbor, preferring
//! a hinted register when it is free. Spill-code emission is out of scope
//! here: deferred nodes are assigned stack-frame slots and reported to the
//! next stage.

use crate::ir::function::VarLoc;
use crate::regalloc::interference::{Degree, InterferenceGraph};
use log::{debug, trace};
use rustc_hash::FxHashMap;

/// The result of register allocation.
#[derive(Debug, Default)]
pub struct Allocation {
    /// Per-variable location, indexed by variable id.
    pub locs: Vec<VarLoc>,
    /// Variable ids that did not get a register, in spill order.
    pub spilled: Vec<u32>,
}

/// Color `graph` with the registers in `regs` (one color per register).
///
/// `hints` maps variable ids to preferred register encodings, typically
/// dictated by the calling convention.
pub fn color(
    graph: &InterferenceGraph,
    regs: &[u8],
    hints: &FxHashMap<u32, u8>,
) -> Allocation {
    let n = graph.len();
    let k = regs.len();
    let mut work = graph.clone();
    let mut stack: Vec<u32> = Vec::with_capacity(n);
    let mut spilled: Vec<u32> = Vec::new();
    // 0 = still in the graph, 1 = stacked, 2 = deferred as a spill.
    let mut state = vec![0u8; n];

    for _ in 0..n {
        let mut colorable: Option<(u32, Degree)> = None;
        let mut heaviest: Option<(u32, Degree)> = None;
        for v in 0..n as u32 {
            if state[v as usize] != 0 {
                continue;
            }
            let d = work.degree(v);
            if d < k as Degree && colorable.map_or(true, |(_, best)| d < best) {
                colorable = Some((v, d));
            }
            if heaviest.map_or(true, |(_, worst)| d > worst) {
                heaviest = Some((v, d));
            }
        }
        match (colorable, heaviest) {
            (Some((v, _)), _) => {
                state[v as usize] = 1;
                stack.push(v);
                work.remove(v);
            }
            (None, Some((v, d))) => {
                debug!("spill candidate v{v} with degree {d}");
                state[v as usize] = 2;
                spilled.push(v);
                work.remove(v);
            }
            (None, None) => break,
        }
    }

    // Select: pop in reverse removal order, taking the lowest free color;
    // neighbors come from the original, untouched graph.
    let mut locs = vec![VarLoc::Unassigned; n];
    let mut used = vec![false; k];
    for &v in stack.iter().rev() {
        used.iter_mut().for_each(|u| *u = false);
        let mut from = 0;
        while let Some(nb) = graph.first_neighbor(v, from) {
            if let VarLoc::Reg(r) = locs[nb as usize] {
                if let Some(c) = regs.iter().position(|&x| x == r) {
                    used[c] = true;
                }
            }
            from = nb + 1;
        }
        let hinted = hints
            .get(&v)
            .and_then(|&r| regs.iter().position(|&x| x == r))
            .filter(|&c| !used[c]);
        let chosen = hinted.or_else(|| (0..k).find(|&c| !used[c]));
        match chosen {
            Some(c) => {
                trace!("v{v} -> reg {}", regs[c]);
                locs[v as usize] = VarLoc::Reg(regs[c]);
            }
            None => {
                // Unreachable for stacked nodes; report as a spill rather
                // than panic.
                spilled.push(v);
            }
        }
    }

    for (slot, &v) in spilled.iter().enumerate() {
        locs[v as usize] = VarLoc::Stack(slot as u32);
    }
    if !spilled.is_empty() {
        debug!("{} variables spilled", spilled.len());
    }
    Allocation { locs, spilled }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clique(n: usize) -> InterferenceGraph {
        let mut g = InterferenceGraph::new();
        g.reset(n);
        for a in 0..n as u32 {
            for b in (a + 1)..n as u32 {
                g.set(a, b, true);
            }
        }
        g
    }

    fn assert_proper_coloring(graph: &InterferenceGraph, alloc: &Allocation) {
        for a in 0..graph.len() as u32 {
            for b in (a + 1)..graph.len() as u32 {
                if !graph.contains(a, b) {
                    continue;
                }
                if let (VarLoc::Reg(ra), VarLoc::Reg(rb)) =
                    (alloc.locs[a as usize], alloc.locs[b as usize])
                {
                    assert_ne!(ra, rb, "v{a} and v{b} interfere but share a register");
                }
            }
        }
    }

    #[test]
    fn triangle_needs_three_colors() {
        let g = clique(3);
        let alloc = color(&g, &[10, 11, 12], &FxHashMap::default());
        assert!(alloc.spilled.is_empty());
        assert_proper_coloring(&g, &alloc);
    }

    #[test]
    fn clique_larger_than_k_spills() {
        let g = clique(4);
        let alloc = color(&g, &[10, 11, 12], &FxHashMap::default());
        assert_eq!(alloc.spilled.len(), 1);
        assert!(matches!(
            alloc.locs[alloc.spilled[0] as usize],
            VarLoc::Stack(0)
        ));
        assert_proper_coloring(&g, &alloc);
    }

    #[test]
    fn hints_are_preferred_when_free() {
        let mut g = InterferenceGraph::new();
        g.reset(2);
        g.set(0, 1, true);
        let mut hints = FxHashMap::default();
        hints.insert(1u32, 12u8);
        let alloc = color(&g, &[10, 11, 12], &hints);
        assert_eq!(alloc.locs[1], VarLoc::Reg(12));
        assert_proper_coloring(&g, &alloc);
    }

    #[test]
    fn real_register_bank_spills_cleanly() {
        use crate::isa::x64::regs::ALLOCATABLE;
        use ember_assembler_x64::enc;

        // One live range more than the x64 bank holds: exactly one spill,
        // and every register gets used, rbp included. Spill slots address
        // through rsp, which must never appear in the bank.
        let g = clique(ALLOCATABLE.len() + 1);
        let alloc = color(&g, &ALLOCATABLE, &FxHashMap::default());
        assert_eq!(alloc.spilled.len(), 1);
        assert_proper_coloring(&g, &alloc);

        let mut used: Vec<u8> = alloc
            .locs
            .iter()
            .filter_map(|loc| match loc {
                VarLoc::Reg(r) => Some(*r),
                _ => None,
            })
            .collect();
        used.sort_unstable();
        used.dedup();
        assert_eq!(used.len(), ALLOCATABLE.len());
        assert!(used.contains(&enc::RBP));
        assert!(!used.contains(&enc::RSP));
        assert!(!used.contains(&enc::RBX));
    }

    #[test]
    fn conflicting_hint_falls_back() {
        // Both vars hinted to the same register but they interfere.
        let mut g = InterferenceGraph::new();
        g.reset(2);
        g.set(0, 1, true);
        let mut hints = FxHashMap::default();
        hints.insert(0u32, 10u8);
        hints.insert(1u32, 10u8);
        let alloc = color(&g, &[10, 11], &hints);
        assert_proper_coloring(&g, &alloc);
        let regs: Vec<_> = alloc.locs.iter().collect();
        assert!(regs.contains(&&VarLoc::Reg(10)));
        assert!(regs.contains(&&VarLoc::Reg(11)));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn no_interfering_pair_shares_a_register(
                edges in proptest::collection::vec((0u32..10, 0u32..10), 0..40),
            ) {
                let mut g = InterferenceGraph::new();
                g.reset(10);
                for (a, b) in edges {
                    if a != b {
                        g.set(a, b, true);
                    }
                }
                let alloc = color(&g, &[0, 1, 2, 3], &FxHashMap::default());
                for a in 0..10u32 {
                    for b in (a + 1)..10u32 {
                        if !g.contains(a, b) { continue; }
                        if let (VarLoc::Reg(ra), VarLoc::Reg(rb)) =
                            (alloc.locs[a as usize], alloc.locs[b as usize])
                        {
                            prop_assert_ne!(ra, rb);
                        }
                    }
                }
            }
        }
    }
}
