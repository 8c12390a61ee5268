//! Register allocation by interference-graph colouring.
//!
//! Two variables interfere when they are simultaneously live at some
//! program point and would occupy the same register pool. Colours are
//! assigned greedily over a simplification order: repeatedly remove a node
//! with the fewest remaining neighbours, then colour in reverse removal
//! order with the smallest colour no neighbour holds. Virtual registers
//! are unbounded, so simplification never gets stuck and no spilling
//! exists here.

use crate::liveness::LivenessAnalyzer;
use crate::model::{Program, ValueType, VarId};
use crate::typing::TypeInferer;
use rustc_hash::FxHashSet;

/// Register pools. Wide values (`i64`, `f64`) occupy a double slot and
/// live in their own pool; everything integer-sized shares one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KindClass {
    Integer,
    Float,
    Reference,
    Wide,
}

/// Untyped variables (nothing ever constrained them) fall into the integer
/// pool; grouping them anywhere is sound since interference within a pool
/// is tracked exactly.
pub fn kind_class(ty: Option<ValueType>) -> KindClass {
    match ty {
        Some(ValueType::Float) => KindClass::Float,
        Some(ValueType::Long | ValueType::Double) => KindClass::Wide,
        Some(ValueType::Reference) => KindClass::Reference,
        Some(ValueType::Int | ValueType::Address) | None => KindClass::Integer,
    }
}

#[derive(Debug, Default)]
pub struct InterferenceGraph {
    neighbors: Vec<FxHashSet<usize>>,
}

impl InterferenceGraph {
    pub fn with_nodes(size: usize) -> Self {
        Self {
            neighbors: vec![FxHashSet::default(); size],
        }
    }

    pub fn add_edge(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.neighbors[a].insert(b);
        self.neighbors[b].insert(a);
    }

    pub fn interferes(&self, a: usize, b: usize) -> bool {
        self.neighbors[a].contains(&b)
    }

    /// Greedy colouring over the simplification order.
    pub fn color(&self) -> Vec<i32> {
        let size = self.neighbors.len();
        let mut degree: Vec<usize> = self.neighbors.iter().map(|set| set.len()).collect();
        let mut removed = vec![false; size];
        let mut stack = Vec::with_capacity(size);
        for _ in 0..size {
            let node = (0..size)
                .filter(|&node| !removed[node])
                .min_by_key(|&node| degree[node])
                .expect("one unremoved node per round");
            removed[node] = true;
            stack.push(node);
            for &neighbor in &self.neighbors[node] {
                if !removed[neighbor] {
                    degree[neighbor] -= 1;
                }
            }
        }

        let mut colors = vec![-1i32; size];
        while let Some(node) = stack.pop() {
            let taken: FxHashSet<i32> = self.neighbors[node]
                .iter()
                .map(|&neighbor| colors[neighbor])
                .filter(|&color| color >= 0)
                .collect();
            colors[node] = (0..).find(|color| !taken.contains(color)).expect("color exists");
        }
        colors
    }
}

pub struct RegisterAllocator<'a> {
    program: &'a Program,
    types: &'a TypeInferer,
}

impl<'a> RegisterAllocator<'a> {
    pub fn new(program: &'a Program, types: &'a TypeInferer) -> Self {
        Self { program, types }
    }

    /// Colours every program variable. The result is indexed by variable
    /// number; entries are always non-negative after this returns.
    pub fn allocate(&self) -> Vec<i32> {
        let liveness = LivenessAnalyzer::analyze(self.program);
        self.allocate_with(&liveness)
    }

    pub fn allocate_with(&self, liveness: &LivenessAnalyzer) -> Vec<i32> {
        let graph = self.build_interference(liveness);
        graph.color()
    }

    fn build_interference(&self, liveness: &LivenessAnalyzer) -> InterferenceGraph {
        let count = self.program.variable_count();
        let kind = |var: VarId| kind_class(self.types.type_of(var));
        let mut graph = InterferenceGraph::with_nodes(count);

        let mut connect = |graph: &mut InterferenceGraph, def: VarId, live: &FxHashSet<VarId>| {
            for &other in live {
                if other != def && kind(other) == kind(def) {
                    graph.add_edge(def.index(), other.index());
                }
            }
        };

        for (index, block) in self.program.blocks.iter().enumerate() {
            if let Some(var) = block.exception_variable {
                connect(&mut graph, var, liveness.live_in(index));
            }
            let live_outs = liveness.instruction_live_outs(self.program, index);
            for (insn, live) in block.instructions.iter().zip(&live_outs) {
                if let Some(def) = insn.defined_var() {
                    connect(&mut graph, def, live);
                }
            }
        }
        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::collection::vec;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn coloring_is_sound(edges in vec((0usize..12, 0usize..12), 0..40)) {
            let mut graph = InterferenceGraph::with_nodes(12);
            for &(a, b) in &edges {
                graph.add_edge(a, b);
            }
            let colors = graph.color();
            for &(a, b) in &edges {
                if a != b {
                    prop_assert_ne!(colors[a], colors[b]);
                }
            }
            for color in colors {
                prop_assert!(color >= 0);
            }
        }
    }

    #[test]
    fn isolated_nodes_share_the_first_color() {
        let graph = InterferenceGraph::with_nodes(3);
        assert_eq!(graph.color(), vec![0, 0, 0]);
    }
}
