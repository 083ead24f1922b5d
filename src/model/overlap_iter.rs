//! Pull-based overlap queries.

use std::cmp::Ordering;
use std::iter::Peekable;
use std::ops::Range;

use crate::model::marker::Marker;
use crate::model::marker_tree::{
    intersects, past_query_end, to_coord, to_offset, RangeMarkerTree,
};
use crate::model::rb_tree::NodeId;

/// A marker returned by an overlap iterator, with its range at query time
#[derive(Debug, Clone, Copy)]
pub struct MarkerHit<'a> {
    pub marker: &'a Marker,
    pub start: usize,
    pub end: usize,
}

impl MarkerHit<'_> {
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    /// Order by start, then end
    pub fn by_position(a: &MarkerHit<'_>, b: &MarkerHit<'_>) -> Ordering {
        a.start.cmp(&b.start).then(a.end.cmp(&b.end))
    }
}

/// In-order iterator over the markers intersecting a query range.
///
/// Borrowing the tree keeps it from being mutated while the iterator lives.
pub struct OverlappingIter<'a> {
    tree: &'a RangeMarkerTree,
    query_start: i64,
    query_end: i64,
    /// Pending nodes with the delta (own plus ancestors') to apply to them
    stack: Vec<(NodeId, i64)>,
    /// Node being emitted: id, absolute range, index of the next marker
    current: Option<(NodeId, i64, i64, usize)>,
    disposed: bool,
}

impl<'a> OverlappingIter<'a> {
    fn new(tree: &'a RangeMarkerTree, start: usize, end: usize) -> Self {
        let mut iter = Self {
            tree,
            query_start: to_coord(start),
            query_end: to_coord(end),
            stack: Vec::new(),
            current: None,
            disposed: false,
        };
        iter.descend_left(tree.nodes.root(), 0);
        iter
    }

    /// Stop iterating and release the traversal state. Safe to call again.
    pub fn dispose(&mut self) {
        self.stack.clear();
        self.current = None;
        self.disposed = true;
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn descend_left(&mut self, mut node: Option<NodeId>, mut parent_delta: i64) {
        let tree = self.tree;
        let nodes = &tree.nodes;
        while let Some(id) = node {
            let n = nodes.value(id);
            let delta = parent_delta + n.delta;
            if n.max_end + delta < self.query_start {
                break;
            }
            self.stack.push((id, delta));
            node = nodes.left(id);
            parent_delta = delta;
        }
    }
}

impl<'a> Iterator for OverlappingIter<'a> {
    type Item = MarkerHit<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let tree = self.tree;
        loop {
            if let Some((id, start, end, index)) = self.current {
                let ids = &tree.nodes.value(id).markers;
                for (offset, marker_id) in ids.iter().enumerate().skip(index) {
                    let Some(marker) = tree.markers.get(marker_id) else {
                        continue;
                    };
                    if marker.is_alive() {
                        self.current = Some((id, start, end, offset + 1));
                        return Some(MarkerHit {
                            marker,
                            start: to_offset(start),
                            end: to_offset(end),
                        });
                    }
                }
                self.current = None;
            }

            let (id, delta) = self.stack.pop()?;
            let n = tree.nodes.value(id);
            let (start, end) = (n.start + delta, n.end + delta);
            if past_query_end(start, self.query_start, self.query_end) {
                // everything still on the stack starts later
                self.stack.clear();
                return None;
            }
            self.descend_left(tree.nodes.right(id), delta);
            if intersects(start, end, self.query_start, self.query_end) {
                self.current = Some((id, start, end, 0));
            }
        }
    }
}

impl RangeMarkerTree {
    /// Iterator form of [`process_overlapping_with`](Self::process_overlapping_with).
    pub fn overlapping_iter(&self, start: usize, end: usize) -> OverlappingIter<'_> {
        OverlappingIter::new(self, start, end)
    }
}

/// Two sorted hit streams merged into one by `cmp`
pub struct MergedOverlaps<A: Iterator, B: Iterator<Item = A::Item>, F> {
    a: Peekable<A>,
    b: Peekable<B>,
    cmp: F,
}

/// Merge two iterators that are each sorted by `cmp`. On ties `a` goes first.
pub fn merge_overlapping<A, B, F>(a: A, b: B, cmp: F) -> MergedOverlaps<A, B, F>
where
    A: Iterator,
    B: Iterator<Item = A::Item>,
    F: FnMut(&A::Item, &A::Item) -> Ordering,
{
    MergedOverlaps {
        a: a.peekable(),
        b: b.peekable(),
        cmp,
    }
}

impl<A, B, F> Iterator for MergedOverlaps<A, B, F>
where
    A: Iterator,
    B: Iterator<Item = A::Item>,
    F: FnMut(&A::Item, &A::Item) -> Ordering,
{
    type Item = A::Item;

    fn next(&mut self) -> Option<Self::Item> {
        let take_b = match (self.a.peek(), self.b.peek()) {
            (Some(x), Some(y)) => (self.cmp)(x, y) == Ordering::Greater,
            (Some(_), None) => false,
            (None, _) => true,
        };
        if take_b {
            self.b.next()
        } else {
            self.a.next()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TreeConfig;
    use crate::model::marker::MarkerOptions;

    fn tree_with(ranges: &[(usize, usize)]) -> RangeMarkerTree {
        let mut tree = RangeMarkerTree::with_config(TreeConfig::strong());
        for &(s, e) in ranges {
            tree.add_interval(s, e, MarkerOptions::new()).unwrap();
        }
        tree
    }

    #[test]
    fn test_iter_matches_process() {
        let ranges: Vec<(usize, usize)> = (0..50)
            .map(|i| (i * 3 % 40, i * 3 % 40 + i % 7))
            .collect();
        let tree = tree_with(&ranges);
        for (qs, qe) in [(0, 0), (5, 5), (3, 17), (0, 100), (39, 40), (60, 70)] {
            let mut expected = Vec::new();
            tree.process_overlapping_with(qs, qe, |m, r| {
                expected.push((m.id(), r));
                true
            });
            let actual: Vec<_> = tree
                .overlapping_iter(qs, qe)
                .map(|hit| (hit.marker.id(), hit.range()))
                .collect();
            assert_eq!(actual, expected, "query [{qs}, {qe})");
        }
    }

    #[test]
    fn test_three_way_overlap() {
        let tree = tree_with(&[(0, 5), (10, 15), (20, 30)]);
        let hits: Vec<_> = tree.overlapping_iter(4, 21).map(|h| h.range()).collect();
        assert_eq!(hits, vec![0..5, 10..15, 20..30]);
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let tree = tree_with(&[(0, 5), (10, 15)]);
        let mut iter = tree.overlapping_iter(0, 20);
        assert!(iter.next().is_some());
        iter.dispose();
        assert!(iter.is_disposed());
        iter.dispose();
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_merge_by_position() {
        let left = tree_with(&[(0, 2), (10, 12), (20, 22)]);
        let right = tree_with(&[(5, 6), (10, 11), (30, 31)]);
        let merged: Vec<_> = merge_overlapping(
            left.overlapping_iter(0, 100),
            right.overlapping_iter(0, 100),
            MarkerHit::by_position,
        )
        .map(|h| h.range())
        .collect();
        assert_eq!(merged, vec![0..2, 5..6, 10..11, 10..12, 20..22, 30..31]);
    }
}
