//! Offset-tracking interval tree of range markers.
//!
//! Markers are grouped into [`IntervalNode`]s of a red-black tree ordered by
//! start offset and boundary policy. Each node keeps the maximum end offset of
//! its subtree, which lets overlap queries skip whole subtrees, and a lazy
//! `delta` so that an edit shifts everything after it in O(log n).
//!
//! Edit translation lives in `retarget.rs`, the pull-based overlap iterator in
//! `overlap_iter.rs` and the structural checks in `verify.rs`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::ops::{ControlFlow, Range};
use std::rc::Rc;

use crate::config::TreeConfig;
use crate::error::{MarkerTreeError, Result};
use crate::model::interval_node::{IntervalKey, IntervalNode};
use crate::model::marker::{
    BoundaryPolicy, Marker, MarkerId, MarkerOptions, MarkerState, MarkerToken, RangeMarker,
    RemovalReason, Retained, Retention,
};
use crate::model::rb_tree::{NodeId, RbTree, Search};

/// Called just before a marker leaves the tree
pub type RemovalListener = Box<dyn FnMut(&Marker, RemovalReason)>;

pub struct RangeMarkerTree {
    pub(crate) nodes: RbTree<IntervalNode>,
    pub(crate) markers: HashMap<MarkerId, Marker>,
    next_id: u64,
    config: TreeConfig,
    /// Ids of weakly held markers whose last handle was dropped
    reclaimed: Rc<RefCell<Vec<MarkerId>>>,
    dead_count: usize,
    listener: Option<RemovalListener>,
    disposed: bool,
}

impl fmt::Debug for RangeMarkerTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RangeMarkerTree")
            .field("markers", &self.markers.len())
            .field("nodes", &self.nodes.len())
            .field("config", &self.config)
            .field("dead_count", &self.dead_count)
            .field("disposed", &self.disposed)
            .finish()
    }
}

impl Default for RangeMarkerTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether `[s, e)` and the query `[qs, qe)` intersect. Empty ranges behave
/// as points: an empty marker matches a query that covers its offset, and an
/// empty query matches markers covering its offset.
pub(crate) fn intersects(s: i64, e: i64, qs: i64, qe: i64) -> bool {
    match (s == e, qs == qe) {
        (false, false) => s < qe && qs < e,
        (true, false) => qs <= s && s < qe,
        (false, true) => s <= qs && qs < e,
        (true, true) => s == qs,
    }
}

/// No node starting at `s` or later can intersect the query
pub(crate) fn past_query_end(s: i64, qs: i64, qe: i64) -> bool {
    s > qe || (s == qe && qs < qe)
}

pub(crate) fn to_offset(value: i64) -> usize {
    usize::try_from(value).unwrap_or(0)
}

pub(crate) fn to_range(start: i64, end: i64) -> Range<usize> {
    to_offset(start)..to_offset(end)
}

/// Offset as a tree coordinate, saturating at `i64::MAX`. No marker can lie
/// past that, so queries stay correct.
pub(crate) fn to_coord(offset: usize) -> i64 {
    i64::try_from(offset).unwrap_or(i64::MAX)
}

/// Range as tree coordinates, rejecting offsets past `i64::MAX`.
pub(crate) fn to_coords(start: usize, end: usize) -> Result<(i64, i64)> {
    match (i64::try_from(start), i64::try_from(end)) {
        (Ok(s), Ok(e)) => Ok((s, e)),
        _ => Err(MarkerTreeError::InvalidRange { start, end }),
    }
}

impl RangeMarkerTree {
    pub fn new() -> Self {
        Self::with_config(TreeConfig::default())
    }

    pub fn with_config(config: TreeConfig) -> Self {
        Self {
            nodes: RbTree::new(),
            markers: HashMap::new(),
            next_id: 0,
            config,
            reclaimed: Rc::new(RefCell::new(Vec::new())),
            dead_count: 0,
            listener: None,
            disposed: false,
        }
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Number of markers tracked, including reclaimed ones not purged yet
    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn max_height(&self) -> usize {
        self.nodes.height()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn set_removal_listener<F>(&mut self, listener: F)
    where
        F: FnMut(&Marker, RemovalReason) + 'static,
    {
        self.listener = Some(Box::new(listener));
    }

    pub fn marker(&self, id: MarkerId) -> Option<&Marker> {
        self.markers.get(&id)
    }

    /// Mutable access to a marker's payload. Call [`value_updated`] after
    /// changing `value`.
    ///
    /// [`value_updated`]: RangeMarkerTree::value_updated
    pub fn marker_mut(&mut self, id: MarkerId) -> Option<&mut Marker> {
        self.markers.get_mut(&id)
    }

    pub(crate) fn ensure_live(&self) -> Result<()> {
        if self.disposed {
            Err(MarkerTreeError::Disposed)
        } else {
            Ok(())
        }
    }

    // ===== Mutation =====

    /// Create a marker covering `[start, end)` and insert it.
    pub fn add_interval(
        &mut self,
        start: usize,
        end: usize,
        options: MarkerOptions,
    ) -> Result<RangeMarker> {
        self.ensure_live()?;
        if start > end {
            return Err(MarkerTreeError::InvalidRange { start, end });
        }
        let (s, e) = to_coords(start, end)?;
        self.process_reclaimed();

        let id = MarkerId(self.next_id);
        self.next_id += 1;
        let token = Rc::new(MarkerToken::new(id, Rc::downgrade(&self.reclaimed)));
        let retained = match self.config.retention {
            Retention::Strong => Retained::Strong(Rc::clone(&token)),
            Retention::Weak => Retained::Weak(Rc::downgrade(&token)),
        };
        self.markers
            .insert(id, Marker::new(id, options, retained));
        self.insert_marker(id, s, e);

        tracing::trace!("added marker {:?} at [{}, {})", id, start, end);
        self.verify_if_enabled();
        Ok(RangeMarker::new(token))
    }

    /// Remove a marker. Returns `false` when it is no longer in the tree.
    pub fn remove_interval(&mut self, id: MarkerId) -> Result<bool> {
        self.ensure_live()?;
        self.process_reclaimed();
        if !self.markers.contains_key(&id) {
            return Ok(false);
        }
        self.evict(id, RemovalReason::ExplicitDispose, MarkerState::Removed);
        tracing::trace!("removed marker {:?}", id);
        self.verify_if_enabled();
        Ok(true)
    }

    /// Move a marker to `[start, end)` and change its ordering key in one step.
    pub fn change_data(
        &mut self,
        id: MarkerId,
        start: usize,
        end: usize,
        policy: BoundaryPolicy,
        layer: i32,
    ) -> Result<bool> {
        self.ensure_live()?;
        if start > end {
            return Err(MarkerTreeError::InvalidRange { start, end });
        }
        let (s, e) = to_coords(start, end)?;
        self.process_reclaimed();
        let Some(marker) = self.markers.get(&id) else {
            return Ok(false);
        };
        if !marker.is_alive() {
            return Ok(false);
        }
        self.unlink_marker(id);
        if let Some(marker) = self.markers.get_mut(&id) {
            marker.set_key(policy, layer);
        }
        self.insert_marker(id, s, e);
        tracing::trace!("changed marker {:?} to [{}, {})", id, start, end);
        self.verify_if_enabled();
        Ok(true)
    }

    /// Remove every marker.
    pub fn clear(&mut self) {
        self.clear_with(RemovalReason::Cleared);
    }

    /// Clear the tree and reject further mutations. Calling it twice is a no-op.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.clear_with(RemovalReason::TreeDisposed);
        self.disposed = true;
    }

    fn clear_with(&mut self, reason: RemovalReason) {
        let ordered = self.collect_in_order();
        if let Some(listener) = self.listener.as_mut() {
            for (id, _, _) in &ordered {
                if let Some(marker) = self.markers.get(id) {
                    listener(marker, reason);
                }
            }
        }
        let count = self.markers.len();
        self.nodes.clear();
        for (_, marker) in self.markers.drain() {
            marker.set_state(MarkerState::Removed);
        }
        self.reclaimed.borrow_mut().clear();
        self.dead_count = 0;
        tracing::debug!("cleared {} markers ({:?})", count, reason);
    }

    /// Recompute partial sums after a marker's `value` changed.
    pub fn value_updated(&mut self, id: MarkerId) -> bool {
        let Some(node) = self.markers.get(&id).and_then(|m| m.node) else {
            return false;
        };
        self.recompute_local_sum(node);
        self.nodes.pull_up_from(Some(node));
        self.verify_if_enabled();
        true
    }

    pub fn set_value(&mut self, id: MarkerId, value: i64) -> bool {
        match self.markers.get_mut(&id) {
            Some(marker) => marker.value = value,
            None => return false,
        }
        self.value_updated(id)
    }

    // ===== Queries =====

    /// Current absolute range of a marker, `None` once it left the tree.
    pub fn range_of(&self, id: MarkerId) -> Option<Range<usize>> {
        let marker = self.markers.get(&id)?;
        if !marker.is_alive() {
            return None;
        }
        let (start, end) = self.absolute_range(marker.node?);
        Some(to_range(start, end))
    }

    /// Visit markers intersecting `[start, end)` in order. Stops when `f`
    /// returns `false`; the return value tells whether the walk completed.
    pub fn process_overlapping_with<F>(&self, start: usize, end: usize, mut f: F) -> bool
    where
        F: FnMut(&Marker, Range<usize>) -> bool,
    {
        let (qs, qe) = (to_coord(start), to_coord(end));
        self.walk_overlapping(self.nodes.root(), 0, qs, qe, &mut f)
            .is_continue()
    }

    /// Visit markers that start before `start` or end after `end`.
    pub fn process_overlapping_with_outside<F>(&self, start: usize, end: usize, mut f: F) -> bool
    where
        F: FnMut(&Marker, Range<usize>) -> bool,
    {
        let (qs, qe) = (to_coord(start), to_coord(end));
        self.walk_outside(self.nodes.root(), 0, qs, qe, &mut f)
            .is_continue()
    }

    /// Visit markers with `start <= offset < end`.
    pub fn process_containing<F>(&self, offset: usize, mut f: F) -> bool
    where
        F: FnMut(&Marker, Range<usize>) -> bool,
    {
        self.walk_containing(self.nodes.root(), 0, to_coord(offset), &mut f)
            .is_continue()
    }

    /// Visit every live marker in tree order.
    pub fn process_all<F>(&self, mut f: F) -> bool
    where
        F: FnMut(&Marker, Range<usize>) -> bool,
    {
        self.walk_all(self.nodes.root(), 0, &mut f).is_continue()
    }

    /// The live marker following `id` in tree order.
    pub fn find_marker_after(&self, id: MarkerId) -> Option<MarkerId> {
        let mut node = self.markers.get(&id)?.node;
        let mut found = false;
        while let Some(current) = node {
            for other in &self.nodes.value(current).markers {
                if *other == id {
                    found = true;
                } else if found && self.is_alive(*other) {
                    return Some(*other);
                }
            }
            found = true;
            node = self.nodes.next(current);
        }
        None
    }

    /// The live marker preceding `id` in tree order.
    pub fn find_marker_before(&self, id: MarkerId) -> Option<MarkerId> {
        let mut node = self.markers.get(&id)?.node;
        let mut found = false;
        while let Some(current) = node {
            for other in self.nodes.value(current).markers.iter().rev() {
                if *other == id {
                    found = true;
                } else if found && self.is_alive(*other) {
                    return Some(*other);
                }
            }
            found = true;
            node = self.nodes.prev(current);
        }
        None
    }

    fn is_alive(&self, id: MarkerId) -> bool {
        self.markers.get(&id).is_some_and(Marker::is_alive)
    }

    // ===== Walks =====

    fn emit_markers<F>(&self, node: &IntervalNode, start: i64, end: i64, f: &mut F) -> ControlFlow<()>
    where
        F: FnMut(&Marker, Range<usize>) -> bool,
    {
        for id in &node.markers {
            let Some(marker) = self.markers.get(id) else {
                continue;
            };
            if !marker.is_alive() {
                continue;
            }
            if !f(marker, to_range(start, end)) {
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn walk_overlapping<F>(
        &self,
        node: Option<NodeId>,
        parent_delta: i64,
        qs: i64,
        qe: i64,
        f: &mut F,
    ) -> ControlFlow<()>
    where
        F: FnMut(&Marker, Range<usize>) -> bool,
    {
        let Some(id) = node else {
            return ControlFlow::Continue(());
        };
        let n = self.nodes.value(id);
        let delta = parent_delta + n.delta;
        if n.max_end + delta < qs {
            return ControlFlow::Continue(());
        }
        self.walk_overlapping(self.nodes.left(id), delta, qs, qe, f)?;

        let (start, end) = (n.start + delta, n.end + delta);
        if past_query_end(start, qs, qe) {
            return ControlFlow::Continue(());
        }
        if intersects(start, end, qs, qe) {
            self.emit_markers(n, start, end, f)?;
        }
        self.walk_overlapping(self.nodes.right(id), delta, qs, qe, f)
    }

    fn walk_outside<F>(
        &self,
        node: Option<NodeId>,
        parent_delta: i64,
        qs: i64,
        qe: i64,
        f: &mut F,
    ) -> ControlFlow<()>
    where
        F: FnMut(&Marker, Range<usize>) -> bool,
    {
        let Some(id) = node else {
            return ControlFlow::Continue(());
        };
        let n = self.nodes.value(id);
        let delta = parent_delta + n.delta;
        self.walk_outside(self.nodes.left(id), delta, qs, qe, f)?;

        let (start, end) = (n.start + delta, n.end + delta);
        if start < qs || end > qe {
            self.emit_markers(n, start, end, f)?;
        }
        // everything to the right starts inside and ends no later than max_end
        if start >= qs && n.max_end + delta <= qe {
            return ControlFlow::Continue(());
        }
        self.walk_outside(self.nodes.right(id), delta, qs, qe, f)
    }

    fn walk_containing<F>(
        &self,
        node: Option<NodeId>,
        parent_delta: i64,
        offset: i64,
        f: &mut F,
    ) -> ControlFlow<()>
    where
        F: FnMut(&Marker, Range<usize>) -> bool,
    {
        let Some(id) = node else {
            return ControlFlow::Continue(());
        };
        let n = self.nodes.value(id);
        let delta = parent_delta + n.delta;
        if n.max_end + delta <= offset {
            return ControlFlow::Continue(());
        }
        self.walk_containing(self.nodes.left(id), delta, offset, f)?;

        let (start, end) = (n.start + delta, n.end + delta);
        if offset < start {
            return ControlFlow::Continue(());
        }
        if offset < end {
            self.emit_markers(n, start, end, f)?;
        }
        self.walk_containing(self.nodes.right(id), delta, offset, f)
    }

    fn walk_all<F>(&self, node: Option<NodeId>, parent_delta: i64, f: &mut F) -> ControlFlow<()>
    where
        F: FnMut(&Marker, Range<usize>) -> bool,
    {
        let Some(id) = node else {
            return ControlFlow::Continue(());
        };
        let n = self.nodes.value(id);
        let delta = parent_delta + n.delta;
        self.walk_all(self.nodes.left(id), delta, f)?;
        self.emit_markers(n, n.start + delta, n.end + delta, f)?;
        self.walk_all(self.nodes.right(id), delta, f)
    }

    /// Every marker id (live or not) with its absolute range, in tree order.
    pub(crate) fn collect_in_order(&self) -> Vec<(MarkerId, i64, i64)> {
        fn walk(
            tree: &RangeMarkerTree,
            node: Option<NodeId>,
            parent_delta: i64,
            out: &mut Vec<(MarkerId, i64, i64)>,
        ) {
            let Some(id) = node else {
                return;
            };
            let n = tree.nodes.value(id);
            let delta = parent_delta + n.delta;
            walk(tree, tree.nodes.left(id), delta, out);
            out.extend(
                n.markers
                    .iter()
                    .map(|m| (*m, n.start + delta, n.end + delta)),
            );
            walk(tree, tree.nodes.right(id), delta, out);
        }

        let mut out = Vec::with_capacity(self.markers.len());
        walk(self, self.nodes.root(), 0, &mut out);
        out
    }

    /// Absolute `(start, end)` of a node: stored offsets plus every delta on
    /// the path to the root.
    pub(crate) fn absolute_range(&self, node: NodeId) -> (i64, i64) {
        let mut delta = 0;
        let mut current = Some(node);
        while let Some(id) = current {
            delta += self.nodes.value(id).delta;
            current = self.nodes.parent(id);
        }
        let n = self.nodes.value(node);
        (n.start + delta, n.end + delta)
    }

    // ===== Linking =====

    /// Put a marker that is in `markers` but not linked into the node for
    /// `[start, end)`, merging with an existing node of identical key.
    pub(crate) fn insert_marker(&mut self, id: MarkerId, start: i64, end: i64) {
        let Some(marker) = self.markers.get(&id) else {
            return;
        };
        debug_assert!(marker.node.is_none(), "marker {id:?} is already linked");
        let key = IntervalKey {
            start,
            end,
            policy: marker.policy(),
            layer: marker.layer(),
        };
        let value = marker.value;

        let node = match self.nodes.locate(|n| key.cmp_node(n)) {
            Search::Found(node) => {
                let n = self.nodes.value_mut(node);
                n.markers.push(id);
                n.local_sum += value;
                self.nodes.pull_up_from(Some(node));
                node
            }
            Search::Vacant { parent, side } => {
                self.nodes
                    .insert_at(parent, side, IntervalNode::new(&key, id, value))
            }
        };
        if let Some(marker) = self.markers.get_mut(&id) {
            marker.node = Some(node);
        }
    }

    /// Detach a marker from its node, deleting the node when it empties.
    /// The marker stays in `markers`.
    pub(crate) fn unlink_marker(&mut self, id: MarkerId) {
        let Some(node) = self.markers.get_mut(&id).and_then(|m| m.node.take()) else {
            return;
        };
        let n = self.nodes.value_mut(node);
        if let Some(pos) = n.markers.iter().position(|m| *m == id) {
            n.markers.remove(pos);
        }
        if n.markers.is_empty() {
            self.nodes.remove(node);
        } else {
            self.recompute_local_sum(node);
            self.nodes.pull_up_from(Some(node));
        }
    }

    fn recompute_local_sum(&mut self, node: NodeId) {
        let sum = self
            .nodes
            .value(node)
            .markers
            .iter()
            .filter_map(|id| self.markers.get(id))
            .filter(|m| self.counts_toward_sums(m))
            .map(|m| m.value)
            .sum::<i64>();
        self.nodes.value_mut(node).local_sum = sum;
    }

    /// Whether a marker's value is part of the node sums: live markers, and
    /// dropped ones whose reclaim has not been processed yet.
    pub(crate) fn counts_toward_sums(&self, marker: &Marker) -> bool {
        marker.is_alive() || self.reclaimed.borrow().contains(&marker.id())
    }

    /// Start offsets and values of dropped markers still counted in the node
    /// sums because their reclaim is queued.
    pub(crate) fn queued_reclaims(&self) -> Vec<(i64, i64)> {
        self.reclaimed
            .borrow()
            .iter()
            .filter_map(|id| self.markers.get(id))
            .filter(|m| !m.is_alive())
            .filter_map(|m| m.node.map(|node| (self.absolute_range(node).0, m.value)))
            .collect()
    }

    /// Notify the listener, unlink and forget a marker.
    pub(crate) fn evict(&mut self, id: MarkerId, reason: RemovalReason, state: MarkerState) {
        let counted_dead = self.markers.get(&id).is_some_and(|m| !m.is_alive())
            && !self.reclaimed.borrow().contains(&id);
        if counted_dead {
            self.dead_count = self.dead_count.saturating_sub(1);
        }
        if let (Some(listener), Some(marker)) = (self.listener.as_mut(), self.markers.get(&id)) {
            listener(marker, reason);
        }
        self.unlink_marker(id);
        if let Some(marker) = self.markers.remove(&id) {
            marker.set_state(state);
        }
    }

    // ===== Reclaim =====

    /// Account for dropped weak handles and purge once enough accumulated.
    pub(crate) fn process_reclaimed(&mut self) {
        let drained = std::mem::take(&mut *self.reclaimed.borrow_mut());
        for id in drained {
            let Some(marker) = self.markers.get(&id) else {
                continue;
            };
            if marker.is_alive() {
                continue;
            }
            self.dead_count += 1;
            // the value leaves the sums now; the node itself goes at purge
            if let Some(node) = marker.node {
                self.recompute_local_sum(node);
                self.nodes.pull_up_from(Some(node));
            }
        }
        let threshold = (self.markers.len() / self.config.purge_divisor.max(1)).max(1);
        if self.dead_count > threshold {
            self.purge_dead();
        }
    }

    fn purge_dead(&mut self) {
        let mut dead: Vec<MarkerId> = self
            .markers
            .values()
            .filter(|m| !m.is_alive())
            .map(Marker::id)
            .collect();
        dead.sort_unstable();
        for id in &dead {
            self.evict(*id, RemovalReason::Reclaimed, MarkerState::Removed);
        }
        self.dead_count = 0;
        tracing::debug!(
            "purged {} reclaimed markers, {} remain",
            dead.len(),
            self.markers.len()
        );
    }

    pub(crate) fn verify_if_enabled(&self) {
        if !self.config.verify_invariants {
            return;
        }
        if let Err(err) = self.check_invariants() {
            panic!("{err}");
        }
    }
}
