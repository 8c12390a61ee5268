//! Directed graphs over basic blocks, with edges in both directions.

use crate::model::Program;

/// Adjacency in both directions. Node ids are block indices (or indexed
/// positions, after renumbering). Edges are deduplicated.
#[derive(Clone, Debug, Default)]
pub struct Graph {
    outgoing: Vec<Vec<usize>>,
    incoming: Vec<Vec<usize>>,
}

impl Graph {
    pub fn with_nodes(size: usize) -> Self {
        Self {
            outgoing: vec![Vec::new(); size],
            incoming: vec![Vec::new(); size],
        }
    }

    pub fn size(&self) -> usize {
        self.outgoing.len()
    }

    pub fn add_edge(&mut self, from: usize, to: usize) {
        if self.outgoing[from].contains(&to) {
            return;
        }
        self.outgoing[from].push(to);
        self.incoming[to].push(from);
    }

    pub fn outgoing_edges(&self, node: usize) -> &[usize] {
        &self.outgoing[node]
    }

    pub fn incoming_edges(&self, node: usize) -> &[usize] {
        &self.incoming[node]
    }
}

/// Builds the CFG of a program: terminator successors plus an edge to every
/// reachable handler of each protected block.
pub fn build_control_flow_graph(program: &Program) -> Graph {
    let mut graph = Graph::with_nodes(program.basic_block_count());
    let mut successors = Vec::new();
    for (index, block) in program.blocks.iter().enumerate() {
        if let Some(last) = block.instructions.last() {
            successors.clear();
            last.successors(&mut successors);
            for &successor in &successors {
                graph.add_edge(index, successor);
            }
        }
        for range in &block.try_catch {
            graph.add_edge(index, range.handler);
        }
    }
    graph
}
