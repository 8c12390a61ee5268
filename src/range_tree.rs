//! A forest of nested `[start, end)` intervals over indexed positions.
//!
//! Each node seeds one lexical block during statement generation. Sources
//! of ranges are loop extents and forward-jump spans; spans of sibling
//! jumps may partially overlap (the classic diamond produces `[0, 2)` and
//! `[1, 3)`), so insertion widens the later span's start back to the start
//! of the range it crosses. Widening only ever moves a block's opening
//! earlier, which keeps every jump source inside the block that implements
//! its jump.
//!
//! Nodes are arena-allocated and navigated by parent / first-child / next-
//! sibling ids, so the driver can walk the forest in step with the indexed
//! position counter without recursion.

use core::ops::Range;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeId(usize);

#[derive(Debug)]
struct NodeData {
    start: usize,
    end: usize,
    parent: Option<NodeId>,
    first_child: Option<NodeId>,
    last_child: Option<NodeId>,
    next: Option<NodeId>,
}

#[derive(Debug)]
pub struct RangeTree {
    nodes: Vec<NodeData>,
}

impl RangeTree {
    /// Builds the tree over positions `0..limit`. Duplicate ranges
    /// collapse; empty ranges are ignored.
    pub fn new(limit: usize, ranges: impl IntoIterator<Item = Range<usize>>) -> Self {
        let mut ranges: Vec<(usize, usize)> = ranges
            .into_iter()
            .filter(|range| range.start < range.end)
            .map(|range| (range.start, range.end))
            .collect();
        for &(_, end) in &ranges {
            assert!(end <= limit, "range out of bounds");
        }

        // Normalize to a proper nesting: sorted by start ascending / end
        // descending, a partial overlap means some range crosses the end
        // of a still-open one; widen its start and retry. Starts only
        // shrink, so this terminates.
        loop {
            ranges.sort_unstable_by_key(|&(start, end)| (start, usize::MAX - end));
            ranges.dedup();
            let mut open: Vec<(usize, usize)> = Vec::new();
            let mut widened = None;
            'scan: for (index, &(start, end)) in ranges.iter().enumerate() {
                while let Some(&(open_start, open_end)) = open.last() {
                    if open_end <= start {
                        open.pop();
                    } else if open_end < end {
                        widened = Some((index, open_start));
                        break 'scan;
                    } else {
                        break;
                    }
                }
                open.push((start, end));
            }
            match widened {
                Some((index, new_start)) => ranges[index].0 = new_start,
                None => break,
            }
        }

        let root = NodeData {
            start: 0,
            end: limit + 1,
            parent: None,
            first_child: None,
            last_child: None,
            next: None,
        };
        let mut tree = Self { nodes: vec![root] };
        let mut stack = vec![NodeId(0)];
        for (start, end) in ranges {
            while tree.end(*stack.last().expect("root never pops")) <= start {
                stack.pop();
            }
            let parent = *stack.last().expect("root never pops");
            let id = NodeId(tree.nodes.len());
            tree.nodes.push(NodeData {
                start,
                end,
                parent: Some(parent),
                first_child: None,
                last_child: None,
                next: None,
            });
            match tree.nodes[parent.0].last_child {
                Some(prev) => tree.nodes[prev.0].next = Some(id),
                None => tree.nodes[parent.0].first_child = Some(id),
            }
            tree.nodes[parent.0].last_child = Some(id);
            stack.push(id);
        }
        tree
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn start(&self, id: NodeId) -> usize {
        self.nodes[id.0].start
    }

    pub fn end(&self, id: NodeId) -> usize {
        self.nodes[id.0].end
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].first_child
    }

    pub fn next(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::collection::vec;
    use proptest::prelude::*;

    fn collect(tree: &RangeTree) -> Vec<(usize, usize, Option<NodeId>)> {
        let mut out = Vec::new();
        let mut stack = vec![tree.first_child(tree.root())];
        while let Some(slot) = stack.pop() {
            let Some(id) = slot else { continue };
            out.push((tree.start(id), tree.end(id), tree.parent(id)));
            stack.push(tree.next(id));
            stack.push(tree.first_child(id));
        }
        out
    }

    #[test]
    fn diamond_spans_nest() {
        // [0, 2) and [1, 3): the second widens to [0, 3) and becomes the
        // parent of the first.
        let tree = RangeTree::new(4, vec![0..2, 1..3]);
        let child = tree.first_child(tree.root()).unwrap();
        assert_eq!((tree.start(child), tree.end(child)), (0, 3));
        let inner = tree.first_child(child).unwrap();
        assert_eq!((tree.start(inner), tree.end(inner)), (0, 2));
    }

    #[test]
    fn duplicates_collapse() {
        let tree = RangeTree::new(3, vec![1..2, 1..2]);
        let child = tree.first_child(tree.root()).unwrap();
        assert_eq!(tree.first_child(child), None);
        assert_eq!(tree.next(child), None);
    }

    prop_compose! {
        fn range(limit: usize)(a in 0..limit, b in 0..limit) -> Range<usize> {
            a.min(b)..a.max(b) + 1
        }
    }

    prop_compose! {
        fn data()(limit in 2usize..24)(
            limit in Just(limit),
            ranges in vec(range(limit - 1), 1..12),
        ) -> (usize, Vec<Range<usize>>) {
            (limit, ranges)
        }
    }

    proptest! {
        #[test]
        fn nests_properly((limit, ranges) in data()) {
            let tree = RangeTree::new(limit, ranges.iter().cloned());
            for (start, end, parent) in collect(&tree) {
                prop_assert!(start < end);
                let parent = parent.unwrap();
                prop_assert!(tree.start(parent) <= start);
                prop_assert!(end <= tree.end(parent));
            }
            // Siblings are disjoint and ordered by start.
            let mut stack = vec![tree.root()];
            while let Some(id) = stack.pop() {
                let mut child = tree.first_child(id);
                let mut prev_end = None;
                while let Some(c) = child {
                    if let Some(prev_end) = prev_end {
                        prop_assert!(tree.start(c) >= prev_end);
                    }
                    prev_end = Some(tree.end(c));
                    stack.push(c);
                    child = tree.next(c);
                }
            }
        }

        #[test]
        fn every_jump_end_is_covered((limit, ranges) in data()) {
            // A jump to `end` from within `[start, end)` must find a block
            // whose extent ends at `end` and opens at or before `start`.
            let tree = RangeTree::new(limit, ranges.iter().cloned());
            let nodes = collect(&tree);
            for range in &ranges {
                prop_assert!(
                    nodes
                        .iter()
                        .any(|&(start, end, _)| end == range.end && start <= range.start),
                    "no node covers {range:?}",
                );
            }
        }
    }
}
