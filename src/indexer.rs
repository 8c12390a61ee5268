//! Renumbers a CFG into a total order compatible with lexical folding.
//!
//! The produced linearisation satisfies:
//!
//! - every edge that is not a natural-loop back-edge points forward;
//! - the members of each natural loop occupy a contiguous index range
//!   starting at the header;
//! - among blocks that could equally come next, those with higher weight or
//!   a set priority are placed last, shrinking forward-jump spans.
//!
//! Irreducible graphs (a cycle entered at two places) cannot satisfy the
//! first two points at once, so the indexer refuses them instead of
//! emitting a wrong order; the caller must duplicate blocks or insert
//! dispatchers before retrying.

use crate::graph::Graph;
use core::cmp::Reverse;
use rustc_hash::FxHashMap;
use std::collections::BinaryHeap;
use thiserror::Error;

/// The CFG cannot be linearised with all non-loop edges forward.
#[derive(Debug, Error)]
#[error("irreducible control flow")]
pub struct IrreducibleControlFlow;

pub struct GraphIndexer {
    node_at: Vec<usize>,
    index_of: Vec<Option<usize>>,
    graph: Graph,
}

impl GraphIndexer {
    /// Linearises `graph` starting from node 0. `weights` and `priorities`
    /// are indexed by original node id.
    pub fn new(
        graph: &Graph,
        weights: &[u32],
        priorities: &[u32],
    ) -> Result<Self, IrreducibleControlFlow> {
        let analysis = DfsAnalysis::run(graph);
        let loops = analysis.natural_loops(graph)?;
        let forest = LoopForest::build(loops);
        let order = RegionSorter {
            graph,
            weights,
            priorities,
            forest: &forest,
            rpo_number: &analysis.rpo_number,
        }
        .sort();

        let mut index_of = vec![None; graph.size()];
        for (index, &node) in order.iter().enumerate() {
            index_of[node] = Some(index);
        }
        let mut indexed = Graph::with_nodes(order.len());
        for (index, &node) in order.iter().enumerate() {
            for &successor in graph.outgoing_edges(node) {
                if let Some(successor_index) = index_of[successor] {
                    indexed.add_edge(index, successor_index);
                }
            }
        }
        Ok(Self {
            node_at: order,
            index_of,
            graph: indexed,
        })
    }

    /// Number of indexed (reachable) nodes.
    pub fn size(&self) -> usize {
        self.node_at.len()
    }

    /// Original node at an indexed position; `None` past the end.
    pub fn node_at(&self, index: usize) -> Option<usize> {
        self.node_at.get(index).copied()
    }

    /// Indexed position of an original node; `None` if unreachable.
    pub fn index_of(&self, node: usize) -> Option<usize> {
        self.index_of[node]
    }

    /// The graph renumbered into indexed positions.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }
}

struct DfsAnalysis {
    /// Reachable nodes in reverse postorder.
    rpo: Vec<usize>,
    rpo_number: Vec<Option<usize>>,
    /// Immediate dominator, indexed by rpo number; entry points to itself.
    idom: Vec<usize>,
}

impl DfsAnalysis {
    fn run(graph: &Graph) -> Self {
        let mut postorder = Vec::new();
        let mut visited = vec![false; graph.size()];
        // Iterative DFS; deep methods must not overflow the call stack.
        let mut stack = vec![(0usize, 0usize)];
        visited[0] = true;
        while let Some(&mut (node, ref mut edge)) = stack.last_mut() {
            if let Some(&successor) = graph.outgoing_edges(node).get(*edge) {
                *edge += 1;
                if !visited[successor] {
                    visited[successor] = true;
                    stack.push((successor, 0));
                }
            } else {
                postorder.push(node);
                stack.pop();
            }
        }

        let rpo: Vec<usize> = postorder.into_iter().rev().collect();
        let mut rpo_number = vec![None; graph.size()];
        for (number, &node) in rpo.iter().enumerate() {
            rpo_number[node] = Some(number);
        }

        let mut analysis = Self {
            rpo,
            rpo_number,
            idom: Vec::new(),
        };
        analysis.compute_dominators(graph);
        analysis
    }

    // Cooper-Harvey-Kennedy iteration over reverse postorder.
    fn compute_dominators(&mut self, graph: &Graph) {
        const UNDEFINED: usize = usize::MAX;
        let mut idom = vec![UNDEFINED; self.rpo.len()];
        if !idom.is_empty() {
            idom[0] = 0;
        }
        let mut changed = true;
        while changed {
            changed = false;
            for number in 1..self.rpo.len() {
                let node = self.rpo[number];
                let mut new_idom = UNDEFINED;
                for &pred in graph.incoming_edges(node) {
                    let Some(pred_number) = self.rpo_number[pred] else {
                        continue;
                    };
                    if idom[pred_number] == UNDEFINED {
                        continue;
                    }
                    new_idom = if new_idom == UNDEFINED {
                        pred_number
                    } else {
                        intersect(&idom, new_idom, pred_number)
                    };
                }
                if new_idom != UNDEFINED && idom[number] != new_idom {
                    idom[number] = new_idom;
                    changed = true;
                }
            }
        }
        self.idom = idom;
    }

    fn dominates(&self, dominator: usize, node: usize) -> bool {
        let dominator = self.rpo_number[dominator].expect("unreachable dominator");
        let mut current = self.rpo_number[node].expect("unreachable node");
        loop {
            if current == dominator {
                return true;
            }
            if current == 0 {
                return false;
            }
            current = self.idom[current];
        }
    }

    /// Finds natural loops and checks reducibility: every retreating edge
    /// must target a dominator of its source.
    fn natural_loops(&self, graph: &Graph) -> Result<Vec<NaturalLoop>, IrreducibleControlFlow> {
        let mut bodies: FxHashMap<usize, Vec<bool>> = FxHashMap::default();
        for &node in &self.rpo {
            for &successor in graph.outgoing_edges(node) {
                let (Some(from), Some(to)) = (
                    self.rpo_number[node],
                    self.rpo_number.get(successor).copied().flatten(),
                ) else {
                    continue;
                };
                if to > from {
                    continue;
                }
                if !self.dominates(successor, node) {
                    return Err(IrreducibleControlFlow);
                }
                let body = bodies
                    .entry(successor)
                    .or_insert_with(|| vec![false; graph.size()]);
                collect_loop_body(graph, successor, node, &self.rpo_number, body);
            }
        }

        let mut loops: Vec<NaturalLoop> = bodies
            .into_iter()
            .map(|(header, body)| {
                let size = body.iter().filter(|&&member| member).count();
                NaturalLoop { header, body, size }
            })
            .collect();
        // Smallest first, so the first containing loop is the innermost.
        loops.sort_by_key(|l| (l.size, l.header));
        Ok(loops)
    }
}

fn intersect(idom: &[usize], mut a: usize, mut b: usize) -> usize {
    while a != b {
        while a > b {
            a = idom[a];
        }
        while b > a {
            b = idom[b];
        }
    }
    a
}

/// Marks every reachable node that reaches `latch` without passing through
/// `header`. Unreachable predecessors stay out; they never get an index.
fn collect_loop_body(
    graph: &Graph,
    header: usize,
    latch: usize,
    rpo_number: &[Option<usize>],
    body: &mut [bool],
) {
    body[header] = true;
    if body[latch] {
        return;
    }
    let mut stack = vec![latch];
    body[latch] = true;
    while let Some(node) = stack.pop() {
        for &pred in graph.incoming_edges(node) {
            if !body[pred] && rpo_number[pred].is_some() {
                body[pred] = true;
                stack.push(pred);
            }
        }
    }
}

struct NaturalLoop {
    header: usize,
    body: Vec<bool>,
    size: usize,
}

struct LoopForest {
    /// Sorted smallest-first; distinct loops are disjoint or nested.
    loops: Vec<NaturalLoop>,
    parent: Vec<Option<usize>>,
}

impl LoopForest {
    fn build(loops: Vec<NaturalLoop>) -> Self {
        let parent = (0..loops.len())
            .map(|l| {
                (l + 1..loops.len()).find(|&outer| loops[outer].body[loops[l].header])
            })
            .collect();
        Self { loops, parent }
    }

    fn children_of(&self, region: Option<usize>) -> Vec<usize> {
        (0..self.loops.len())
            .filter(|&l| self.parent[l] == region)
            .collect()
    }

    /// The child loop of `region` that contains `node`, if any.
    fn child_containing(&self, children: &[usize], node: usize) -> Option<usize> {
        children.iter().copied().find(|&l| self.loops[l].body[node])
    }
}

/// Orders each region (the whole graph, or one loop's body) by contracting
/// immediately nested loops to single items and running a
/// priority-directed topological sort over the resulting DAG. The region
/// header always comes first; a popped loop item recurses, which is what
/// keeps loop bodies contiguous.
struct RegionSorter<'a> {
    graph: &'a Graph,
    weights: &'a [u32],
    priorities: &'a [u32],
    forest: &'a LoopForest,
    rpo_number: &'a [Option<usize>],
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum Item {
    Node(usize),
    Loop(usize),
}

impl RegionSorter<'_> {
    fn sort(&self) -> Vec<usize> {
        let members: Vec<usize> = (0..self.graph.size())
            .filter(|&node| self.rpo_number[node].is_some())
            .collect();
        let mut order = Vec::with_capacity(members.len());
        self.sort_region(None, &members, &mut order);
        order
    }

    fn sort_region(&self, region: Option<usize>, members: &[usize], order: &mut Vec<usize>) {
        let header = region.map(|r| self.forest.loops[r].header);
        if let Some(header) = header {
            order.push(header);
        }

        let children = self.forest.children_of(region);
        let mut items: Vec<Item> = Vec::new();
        let mut item_of: FxHashMap<usize, usize> = FxHashMap::default();
        let mut loop_item: FxHashMap<usize, usize> = FxHashMap::default();
        for &node in members {
            if Some(node) == header {
                continue;
            }
            match self.forest.child_containing(&children, node) {
                Some(l) => {
                    let item = *loop_item.entry(l).or_insert_with(|| {
                        items.push(Item::Loop(l));
                        items.len() - 1
                    });
                    item_of.insert(node, item);
                }
                None => {
                    items.push(Item::Node(node));
                    item_of.insert(node, items.len() - 1);
                }
            }
        }

        let mut in_degree = vec![0usize; items.len()];
        let mut edges: Vec<Vec<usize>> = vec![Vec::new(); items.len()];
        for &node in members {
            let from = if Some(node) == header {
                None
            } else {
                Some(item_of[&node])
            };
            for &successor in self.graph.outgoing_edges(node) {
                let Some(&to) = item_of.get(&successor) else {
                    // Back edge to the region header, or an edge leaving
                    // the region; neither constrains this ordering.
                    continue;
                };
                if from == Some(to) {
                    continue;
                }
                match from {
                    // The header is emitted before everything, so its
                    // edges are already satisfied.
                    None => {}
                    Some(from) => {
                        edges[from].push(to);
                        in_degree[to] += 1;
                    }
                }
            }
        }

        // Ready items keyed by (priority, weight, source order): the
        // smallest is placed next, so heavy and pinned items land last.
        let mut ready = BinaryHeap::new();
        for (item, &degree) in in_degree.iter().enumerate() {
            if degree == 0 {
                ready.push(Reverse((self.item_key(items[item]), item)));
            }
        }
        let mut emitted = 0;
        while let Some(Reverse((_, item))) = ready.pop() {
            emitted += 1;
            match items[item] {
                Item::Node(node) => order.push(node),
                Item::Loop(l) => {
                    let body: Vec<usize> = (0..self.graph.size())
                        .filter(|&node| self.forest.loops[l].body[node])
                        .collect();
                    self.sort_region(Some(l), &body, order);
                }
            }
            for &to in &edges[item] {
                in_degree[to] -= 1;
                if in_degree[to] == 0 {
                    ready.push(Reverse((self.item_key(items[to]), to)));
                }
            }
        }
        // Reducibility makes the contracted region graph acyclic.
        assert!(emitted == items.len(), "cycle in contracted region graph");
    }

    fn item_key(&self, item: Item) -> (u32, u64, usize) {
        match item {
            Item::Node(node) => (
                self.priorities[node],
                u64::from(self.weights[node]),
                self.rpo_number[node].expect("unreachable member"),
            ),
            Item::Loop(l) => {
                let body = &self.forest.loops[l].body;
                let mut weight = 0u64;
                let mut priority = 0;
                for node in 0..body.len() {
                    if body[node] {
                        weight += u64::from(self.weights[node]);
                        priority = priority.max(self.priorities[node]);
                    }
                }
                let header = self.forest.loops[l].header;
                (
                    priority,
                    weight,
                    self.rpo_number[header].expect("unreachable header"),
                )
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

    fn index(graph: &Graph) -> Result<GraphIndexer, IrreducibleControlFlow> {
        let weights = vec![1; graph.size()];
        let priorities = vec![0; graph.size()];
        GraphIndexer::new(graph, &weights, &priorities)
    }

    #[test]
    fn straight_line_keeps_order() {
        let graph = graph(3, &[(0, 1), (1, 2)]);
        let indexer = index(&graph).unwrap();
        assert_eq!(
            (0..3).map(|i| indexer.node_at(i)).collect::<Vec<_>>(),
            vec![Some(0), Some(1), Some(2)],
        );
    }

    #[test]
    fn loop_body_is_contiguous() {
        // 0 -> 1 -> {2 -> 3 -> 2} -> 4, with 3 -> 1 as the outer latch.
        let graph = graph(5, &[(0, 1), (1, 2), (2, 3), (3, 2), (3, 1), (1, 4)]);
        let indexer = index(&graph).unwrap();
        let positions: Vec<usize> = (0..5).map(|node| indexer.index_of(node).unwrap()).collect();
        assert_eq!(positions[0], 0);
        // All non-back edges point forward.
        assert!(positions[1] < positions[2]);
        assert!(positions[2] < positions[3]);
        assert!(positions[1] < positions[4]);
        // The outer loop {1, 2, 3} sits in one contiguous run.
        let mut body = [positions[1], positions[2], positions[3]];
        body.sort_unstable();
        assert_eq!(body[2] - body[0], 2);
    }

    #[test]
    fn rejects_two_entries_into_a_cycle() {
        // 1 and 2 form a cycle entered both at 1 and at 2.
        let graph = graph(4, &[(0, 1), (0, 2), (1, 2), (2, 1), (1, 3)]);
        assert!(index(&graph).is_err());
    }

    #[test]
    fn self_loop_is_reducible() {
        let graph = graph(2, &[(0, 0), (0, 1)]);
        let indexer = index(&graph).unwrap();
        assert_eq!(indexer.index_of(0), Some(0));
        assert_eq!(indexer.index_of(1), Some(1));
    }

    #[test]
    fn unreachable_blocks_are_skipped() {
        let graph = graph(3, &[(0, 2)]);
        let indexer = index(&graph).unwrap();
        assert_eq!(indexer.size(), 2);
        assert_eq!(indexer.index_of(1), None);
    }
}
