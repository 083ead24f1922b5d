//! Interval payload stored in each tree node.
//!
//! Offsets are kept relative: the absolute start of a node is its stored
//! `start` plus the `delta` of the node itself and of every ancestor. A shift
//! of a whole subtree is therefore a single addition to the subtree root's
//! `delta`. `max_end` lives in the same frame as `start`/`end` (it does not
//! include the node's own `delta`).

use std::cmp::Ordering;

use smallvec::{smallvec, SmallVec};

use crate::model::marker::{BoundaryPolicy, MarkerId};
use crate::model::rb_tree::{Augment, NodeId, RbTree};

#[derive(Debug, Clone)]
pub struct IntervalNode {
    pub(crate) start: i64,
    pub(crate) end: i64,
    pub(crate) delta: i64,
    pub(crate) max_end: i64,
    pub(crate) policy: BoundaryPolicy,
    pub(crate) layer: i32,
    /// Markers sharing this exact key, in insertion order
    pub(crate) markers: SmallVec<[MarkerId; 1]>,
    pub(crate) local_sum: i64,
    pub(crate) subtree_sum: i64,
}

impl IntervalNode {
    pub(crate) fn new(key: &IntervalKey, marker: MarkerId, value: i64) -> Self {
        Self {
            start: key.start,
            end: key.end,
            delta: 0,
            max_end: key.end,
            policy: key.policy,
            layer: key.layer,
            markers: smallvec![marker],
            local_sum: value,
            subtree_sum: value,
        }
    }

    /// `max_end` with the node's own delta applied
    pub(crate) fn max_end_in_parent_frame(&self) -> i64 {
        self.max_end + self.delta
    }
}

/// Ordering key of a node, in absolute offsets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IntervalKey {
    pub start: i64,
    pub end: i64,
    pub policy: BoundaryPolicy,
    pub layer: i32,
}

impl IntervalKey {
    /// Key of `node` with `delta` (the node's own plus its ancestors') applied
    pub fn of_node(node: &IntervalNode, delta: i64) -> Self {
        Self {
            start: node.start + delta,
            end: node.end + delta,
            policy: node.policy,
            layer: node.layer,
        }
    }

    pub fn cmp_key(&self, other: &IntervalKey) -> Ordering {
        self.start
            .cmp(&other.start)
            // higher layer first
            .then_with(|| other.layer.cmp(&self.layer))
            // greedy first
            .then_with(|| other.policy.greedy_to_left.cmp(&self.policy.greedy_to_left))
            .then_with(|| (self.end - self.start).cmp(&(other.end - other.start)))
            .then_with(|| other.policy.greedy_to_right.cmp(&self.policy.greedy_to_right))
            .then_with(|| {
                other
                    .policy
                    .sticking_to_right
                    .cmp(&self.policy.sticking_to_right)
            })
    }

    /// Order of `self` relative to `node`. The node must have been pushed
    /// down so its stored offsets are absolute.
    pub fn cmp_node(&self, node: &IntervalNode) -> Ordering {
        debug_assert_eq!(node.delta, 0, "comparing against a node with pending delta");
        self.cmp_key(&IntervalKey::of_node(node, 0))
    }
}

impl Augment for IntervalNode {
    fn push_down(tree: &mut RbTree<Self>, id: NodeId) {
        let delta = tree.value(id).delta;
        if delta == 0 {
            return;
        }
        let node = tree.value_mut(id);
        node.start += delta;
        node.end += delta;
        node.max_end += delta;
        node.delta = 0;
        for child in [tree.left(id), tree.right(id)].into_iter().flatten() {
            tree.value_mut(child).delta += delta;
        }
    }

    fn pull_up(tree: &mut RbTree<Self>, id: NodeId) {
        let mut max_end = tree.value(id).end;
        let mut sum = tree.value(id).local_sum;
        for child in [tree.left(id), tree.right(id)].into_iter().flatten() {
            let c = tree.value(child);
            max_end = max_end.max(c.max_end_in_parent_frame());
            sum += c.subtree_sum;
        }
        let node = tree.value_mut(id);
        node.max_end = max_end;
        node.subtree_sum = sum;
    }
}
