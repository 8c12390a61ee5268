//! Natural-loop identification over an indexed graph.
//!
//! Runs after [`crate::indexer::GraphIndexer`], so a back-edge is simply an
//! edge `u -> h` with `h <= u`, and every loop header dominates its
//! members. Loops sharing a header are merged into one.

use crate::graph::Graph;
use rustc_hash::FxHashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoopId(usize);

#[derive(Debug)]
struct LoopInfo {
    header: usize,
    members: Vec<bool>,
    parent: Option<LoopId>,
}

#[derive(Debug)]
pub struct LoopGraph {
    /// Innermost loop per node.
    innermost: Vec<Option<LoopId>>,
    loops: Vec<LoopInfo>,
}

impl LoopGraph {
    pub fn new(graph: &Graph) -> Self {
        let mut bodies: FxHashMap<usize, Vec<bool>> = FxHashMap::default();
        for node in 0..graph.size() {
            for &successor in graph.outgoing_edges(node) {
                if successor > node {
                    continue;
                }
                let body = bodies
                    .entry(successor)
                    .or_insert_with(|| vec![false; graph.size()]);
                collect_body(graph, successor, node, body);
            }
        }

        let mut loops: Vec<LoopInfo> = bodies
            .into_iter()
            .map(|(header, members)| LoopInfo {
                header,
                members,
                parent: None,
            })
            .collect();
        // Smallest loop first, so the first hit while scanning is the
        // innermost containing loop.
        loops.sort_by_key(|l| {
            (
                l.members.iter().filter(|&&member| member).count(),
                l.header,
            )
        });
        for inner in 0..loops.len() {
            loops[inner].parent = (inner + 1..loops.len())
                .find(|&outer| loops[outer].members[loops[inner].header])
                .map(LoopId);
        }

        let innermost = (0..graph.size())
            .map(|node| {
                (0..loops.len())
                    .find(|&l| loops[l].members[node])
                    .map(LoopId)
            })
            .collect();

        Self { innermost, loops }
    }

    /// The innermost loop containing `node`, if any.
    pub fn loop_at(&self, node: usize) -> Option<LoopId> {
        self.innermost[node]
    }

    pub fn header(&self, id: LoopId) -> usize {
        self.loops[id.0].header
    }

    pub fn parent(&self, id: LoopId) -> Option<LoopId> {
        self.loops[id.0].parent
    }
}

fn collect_body(graph: &Graph, header: usize, latch: usize, body: &mut [bool]) {
    body[header] = true;
    if body[latch] {
        return;
    }
    let mut stack = vec![latch];
    body[latch] = true;
    while let Some(node) = stack.pop() {
        for &pred in graph.incoming_edges(node) {
            if !body[pred] {
                body[pred] = true;
                stack.push(pred);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(size: usize, edges: &[(usize, usize)]) -> Graph {
        let mut graph = Graph::with_nodes(size);
        for &(from, to) in edges {
            graph.add_edge(from, to);
        }
        graph
    }

    #[test]
    fn nested_loops_share_structure() {
        // 0 -> [1 -> [2 -> 3 -> 2] -> 4 -> 1] -> 5
        let graph = graph(
            6,
            &[(0, 1), (1, 2), (2, 3), (3, 2), (3, 4), (4, 1), (1, 5)],
        );
        let loops = LoopGraph::new(&graph);
        assert_eq!(loops.loop_at(0), None);
        assert_eq!(loops.loop_at(5), None);

        let inner = loops.loop_at(2).unwrap();
        assert_eq!(loops.header(inner), 2);
        assert_eq!(loops.loop_at(3), Some(inner));

        let outer = loops.loop_at(1).unwrap();
        assert_eq!(loops.header(outer), 1);
        assert_eq!(loops.loop_at(4), Some(outer));
        assert_eq!(loops.parent(inner), Some(outer));
        assert_eq!(loops.parent(outer), None);
    }

    #[test]
    fn self_loop_is_a_loop() {
        let graph = graph(2, &[(0, 0), (0, 1)]);
        let loops = LoopGraph::new(&graph);
        let l = loops.loop_at(0).unwrap();
        assert_eq!(loops.header(l), 0);
        assert_eq!(loops.loop_at(1), None);
    }
}
