//! Edit translation: keeping marker ranges in step with buffer changes.
//!
//! For a local edit only the nodes whose range touches the closed span
//! `[offset, offset + old_length]` are visited individually. Subtrees lying
//! wholly after the span are shifted through their root's `delta`, subtrees
//! wholly before it are not visited at all. The touched nodes are taken out
//! of the tree and their markers re-inserted at translated positions, or
//! invalidated when no coherent position exists.

use std::ops::Range;

use crate::error::Result;
use crate::model::edit::DocumentEvent;
use crate::model::interval_node::IntervalNode;
use crate::model::marker::{BoundaryPolicy, Marker, MarkerId, MarkerState, RemovalReason};
use crate::model::marker_tree::{to_coord, to_coords, to_offset, to_range, RangeMarkerTree};
use crate::model::rb_tree::{Augment, NodeId};

/// New range of a marker `[start, end)` after `event`, or `None` when the
/// edit leaves it without a coherent position.
pub fn translate(
    start: usize,
    end: usize,
    policy: BoundaryPolicy,
    event: &DocumentEvent,
) -> Option<(usize, usize)> {
    if start == end {
        return translate_point(start, policy, event);
    }
    let offset = event.offset;
    let old_end = event.old_end();
    let shifted = |v: usize| v + event.new_length - event.old_length;

    if end < offset || (end == offset && !policy.greedy_to_right) {
        return Some((start, end));
    }
    if start > old_end || (start == old_end && !policy.greedy_to_left) {
        return Some((shifted(start), shifted(end)));
    }
    // the edit happened inside the marker
    if start <= offset && end >= old_end {
        return Some((start, shifted(end)));
    }
    // prefix replaced
    if start >= offset && start <= old_end && end > old_end {
        return Some((event.new_end(), shifted(end)));
    }
    // suffix replaced
    if end >= offset && end <= old_end && start < offset {
        return Some((start, offset));
    }
    None
}

fn translate_point(
    point: usize,
    policy: BoundaryPolicy,
    event: &DocumentEvent,
) -> Option<(usize, usize)> {
    let offset = event.offset;
    let old_end = event.old_end();
    if offset < point && point < old_end {
        return None;
    }
    if point == offset && event.is_insertion() {
        if policy.sticking_to_right {
            return Some((event.new_end(), event.new_end()));
        }
        if policy.greedy_to_right {
            return Some((point, event.new_end()));
        }
        return Some((point, point));
    }
    if point > old_end || (point == old_end && event.old_length > 0) {
        let moved = point + event.new_length - event.old_length;
        return Some((moved, moved));
    }
    Some((point, point))
}

impl RangeMarkerTree {
    /// Update every marker for a buffer change that has already happened.
    pub fn retarget(&mut self, event: &DocumentEvent) -> Result<()> {
        self.ensure_live()?;
        let (lo, hi) = to_coords(event.offset, event.old_end())?;
        to_coords(event.offset, event.new_end())?;
        self.process_reclaimed();

        if event.whole_text_replaced {
            let event = *event;
            self.rebuild(|marker, range| {
                translate(range.start, range.end, marker.policy(), &event)
                    .filter(|&new| marker.kind.accepts_retarget((range.start, range.end), new))
                    .map(|(s, e)| s..e)
            });
            return Ok(());
        }

        let mut affected = Vec::new();
        self.collect_affected(self.nodes.root(), lo, hi, event.shift(), &mut affected);

        // detach the markers of every touched node, keeping tree order and
        // the FIFO order inside each node
        let mut pending: Vec<(MarkerId, i64, i64)> = Vec::new();
        for (node, start, end) in affected {
            let ids = std::mem::take(&mut self.nodes.value_mut(node).markers);
            self.nodes.remove(node);
            for id in ids {
                if let Some(marker) = self.markers.get_mut(&id) {
                    marker.node = None;
                }
                pending.push((id, start, end));
            }
        }

        let mut moved = 0usize;
        let mut invalidated = 0usize;
        for (id, start, end) in pending {
            let Some(marker) = self.markers.get(&id) else {
                continue;
            };
            if !marker.is_alive() {
                self.evict(id, RemovalReason::Reclaimed, MarkerState::Removed);
                continue;
            }
            let old = (to_offset(start), to_offset(end));
            let new = translate(old.0, old.1, marker.policy(), event)
                .filter(|&new| marker.kind.accepts_retarget(old, new));
            match new {
                Some((s, e)) => {
                    self.insert_marker(id, to_coord(s), to_coord(e));
                    moved += 1;
                }
                None => {
                    tracing::trace!("invalidated marker {:?} at [{}, {})", id, old.0, old.1);
                    self.evict(id, RemovalReason::Invalidated, MarkerState::Invalid);
                    invalidated += 1;
                }
            }
        }

        tracing::debug!(
            "retarget at {} (-{} +{}): {} markers re-inserted, {} invalidated",
            event.offset,
            event.old_length,
            event.new_length,
            moved,
            invalidated
        );
        self.verify_if_enabled();
        Ok(())
    }

    /// Rebuild the tree after the whole buffer was replaced. `reanchor` maps
    /// each live marker and its old range to a new range, or `None` to
    /// invalidate it.
    pub fn retarget_whole_text<F>(&mut self, event: &DocumentEvent, reanchor: F) -> Result<()>
    where
        F: FnMut(&Marker, Range<usize>) -> Option<Range<usize>>,
    {
        self.ensure_live()?;
        self.process_reclaimed();
        tracing::debug!(
            "whole text replaced ({} -> {} bytes)",
            event.old_length,
            event.new_length
        );
        self.rebuild(reanchor);
        Ok(())
    }

    /// Empty the tree and re-insert every live marker at the range chosen by
    /// `place`, in the previous tree order.
    fn rebuild<F>(&mut self, mut place: F)
    where
        F: FnMut(&Marker, Range<usize>) -> Option<Range<usize>>,
    {
        let ordered = self.collect_in_order();
        self.nodes.clear();
        for marker in self.markers.values_mut() {
            marker.node = None;
        }

        let mut invalidated = 0usize;
        for (id, start, end) in ordered {
            let Some(marker) = self.markers.get(&id) else {
                continue;
            };
            if !marker.is_alive() {
                self.evict(id, RemovalReason::Reclaimed, MarkerState::Removed);
                continue;
            }
            let placed = place(marker, to_range(start, end))
                .filter(|r| r.start <= r.end)
                .and_then(|r| to_coords(r.start, r.end).ok());
            match placed {
                Some((s, e)) => self.insert_marker(id, s, e),
                None => {
                    self.evict(id, RemovalReason::Invalidated, MarkerState::Invalid);
                    invalidated += 1;
                }
            }
        }
        tracing::debug!(
            "rebuilt tree with {} markers, {} invalidated",
            self.len(),
            invalidated
        );
        self.verify_if_enabled();
    }

    /// Walk the part of the tree touched by an edit of the closed span
    /// `[lo, hi]`: collect nodes overlapping it (with their pre-edit absolute
    /// range), shift nodes after it by `shift`.
    fn collect_affected(
        &mut self,
        node: Option<NodeId>,
        lo: i64,
        hi: i64,
        shift: i64,
        out: &mut Vec<(NodeId, i64, i64)>,
    ) {
        let Some(id) = node else {
            return;
        };
        IntervalNode::push_down(&mut self.nodes, id);
        if lo > self.nodes.value(id).max_end {
            return;
        }
        self.collect_affected(self.nodes.left(id), lo, hi, shift, out);

        let n = self.nodes.value_mut(id);
        let start = n.start;
        if start > hi {
            n.start += shift;
            n.end += shift;
        } else if n.end >= lo {
            out.push((id, start, n.end));
        }

        if let Some(right) = self.nodes.right(id) {
            if hi < start {
                self.nodes.value_mut(right).delta += shift;
            } else {
                self.collect_affected(Some(right), lo, hi, shift, out);
            }
        }
        IntervalNode::pull_up(&mut self.nodes, id);
    }
}
