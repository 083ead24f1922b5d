//! Prefix sums over point markers.
//!
//! Every node already carries `local_sum` (its markers' values) and
//! `subtree_sum`; this wrapper restricts the tree to zero-width, non-greedy
//! markers so that "sum of values at offsets <= X" is a single root-to-leaf
//! descent.

use crate::config::TreeConfig;
use crate::error::{MarkerTreeError, Result};
use crate::model::edit::DocumentEvent;
use crate::model::marker::{MarkerId, MarkerOptions, RangeMarker};
use crate::model::marker_tree::{to_coord, RangeMarkerTree};

#[derive(Debug)]
pub struct PartialSumTree {
    tree: RangeMarkerTree,
}

impl Default for PartialSumTree {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialSumTree {
    /// Tree holding its markers strongly, so sums never depend on handle drops
    pub fn new() -> Self {
        Self::with_config(TreeConfig::strong())
    }

    pub fn with_config(config: TreeConfig) -> Self {
        Self {
            tree: RangeMarkerTree::with_config(config),
        }
    }

    /// Add a point marker carrying `value` at `offset`.
    pub fn add_marker(
        &mut self,
        offset: usize,
        value: i64,
        sticking_to_right: bool,
    ) -> Result<RangeMarker> {
        self.add_interval(
            offset,
            offset,
            MarkerOptions::new()
                .sticking_to_right(sticking_to_right)
                .value(value),
        )
    }

    pub fn add_interval(
        &mut self,
        start: usize,
        end: usize,
        options: MarkerOptions,
    ) -> Result<RangeMarker> {
        if start != end || options.policy.greedy_to_left || options.policy.greedy_to_right {
            return Err(MarkerTreeError::UnsupportedMarker { start, end });
        }
        self.tree.add_interval(start, end, options)
    }

    pub fn remove_interval(&mut self, id: MarkerId) -> Result<bool> {
        self.tree.remove_interval(id)
    }

    pub fn retarget(&mut self, event: &DocumentEvent) -> Result<()> {
        self.tree.retarget(event)
    }

    pub fn value_updated(&mut self, id: MarkerId) -> bool {
        self.tree.value_updated(id)
    }

    pub fn set_value(&mut self, id: MarkerId, value: i64) -> bool {
        self.tree.set_value(id, value)
    }

    /// Sum of the values of all live markers at offsets `<= offset`.
    pub fn sum_of_values_up_to_offset(&self, offset: usize) -> i64 {
        let nodes = &self.tree.nodes;
        let offset = to_coord(offset);
        let mut sum = 0;
        let mut parent_delta = 0;
        let mut current = nodes.root();
        while let Some(id) = current {
            let n = nodes.value(id);
            let delta = parent_delta + n.delta;
            if n.max_end + delta <= offset {
                // every marker below starts no later than max_end
                sum += n.subtree_sum;
                break;
            }
            if n.start + delta <= offset {
                sum += n.local_sum;
                if let Some(left) = nodes.left(id) {
                    sum += nodes.value(left).subtree_sum;
                }
                current = nodes.right(id);
            } else {
                current = nodes.left(id);
            }
            parent_delta = delta;
        }
        // handles dropped since the last mutation are still in the node sums
        for (start, value) in self.tree.queued_reclaims() {
            if start <= offset {
                sum -= value;
            }
        }
        sum
    }

    pub fn as_tree(&self) -> &RangeMarkerTree {
        &self.tree
    }
}
