//! Exhaustive structural checks, used by tests and by `verify_invariants`.

use std::collections::HashSet;

use crate::error::MarkerTreeError;
use crate::model::interval_node::IntervalKey;
use crate::model::marker::MarkerId;
use crate::model::marker_tree::RangeMarkerTree;
use crate::model::rb_tree::NodeId;

struct SubtreeStats {
    max_end: i64,
    sum: i64,
}

impl RangeMarkerTree {
    /// Check every structural invariant of the tree: red-black shape, key
    /// order, exact `max_end` and sum aggregates, and marker/node links.
    pub fn check_invariants(&self) -> Result<(), MarkerTreeError> {
        self.nodes
            .check_red_black()
            .map_err(MarkerTreeError::Corrupted)?;

        let mut seen = HashSet::new();
        let mut previous = None;
        if let Some(root) = self.nodes.root() {
            self.check_node(root, 0, &mut previous, &mut seen)?;
        }

        if seen.len() != self.markers.len() {
            return Err(MarkerTreeError::Corrupted(format!(
                "{} markers linked into nodes, {} tracked",
                seen.len(),
                self.markers.len()
            )));
        }
        Ok(())
    }

    fn check_node(
        &self,
        id: NodeId,
        parent_delta: i64,
        previous: &mut Option<IntervalKey>,
        seen: &mut HashSet<MarkerId>,
    ) -> Result<SubtreeStats, MarkerTreeError> {
        let corrupted = |msg: String| Err(MarkerTreeError::Corrupted(msg));
        let n = self.nodes.value(id);
        let delta = parent_delta + n.delta;

        let mut max_end = n.end + delta;
        let mut sum = n.local_sum;
        if let Some(left) = self.nodes.left(id) {
            let stats = self.check_node(left, delta, previous, seen)?;
            max_end = max_end.max(stats.max_end);
            sum += stats.sum;
        }

        let key = IntervalKey::of_node(n, delta);
        if key.start > key.end || key.start < 0 {
            return corrupted(format!("{id:?} has range [{}, {})", key.start, key.end));
        }
        if let Some(prev) = previous {
            if prev.cmp_key(&key).is_ge() {
                return corrupted(format!("{id:?} at {} is out of order", key.start));
            }
        }
        *previous = Some(key);

        if n.markers.is_empty() {
            return corrupted(format!("{id:?} holds no markers"));
        }
        let mut local_sum = 0;
        for marker_id in &n.markers {
            let Some(marker) = self.markers.get(marker_id) else {
                return corrupted(format!("{id:?} holds unknown marker {marker_id:?}"));
            };
            if marker.node != Some(id) {
                return corrupted(format!(
                    "{marker_id:?} points to {:?} but lives in {id:?}",
                    marker.node
                ));
            }
            if marker.policy() != n.policy || marker.layer() != n.layer {
                return corrupted(format!("{marker_id:?} key differs from its node {id:?}"));
            }
            if !seen.insert(*marker_id) {
                return corrupted(format!("{marker_id:?} linked twice"));
            }
            if self.counts_toward_sums(marker) {
                local_sum += marker.value;
            }
        }
        if local_sum != n.local_sum {
            return corrupted(format!(
                "{id:?} local sum {} but markers add up to {local_sum}",
                n.local_sum
            ));
        }

        if let Some(right) = self.nodes.right(id) {
            let stats = self.check_node(right, delta, previous, seen)?;
            max_end = max_end.max(stats.max_end);
            sum += stats.sum;
        }

        if n.max_end + delta != max_end {
            return corrupted(format!(
                "{id:?} max_end {} but subtree reaches {max_end}",
                n.max_end + delta
            ));
        }
        if n.subtree_sum != sum {
            return corrupted(format!(
                "{id:?} subtree sum {} but subtree adds up to {sum}",
                n.subtree_sum
            ));
        }
        Ok(SubtreeStats { max_end, sum })
    }
}

#[cfg(test)]
mod tests {
    use crate::config::TreeConfig;
    use crate::error::MarkerTreeError;
    use crate::model::marker::MarkerOptions;
    use crate::model::marker_tree::RangeMarkerTree;

    #[test]
    fn test_detects_stale_max_end() {
        let mut tree = RangeMarkerTree::with_config(TreeConfig::strong());
        for i in 0..10 {
            tree.add_interval(i * 2, i * 2 + 3, MarkerOptions::new()).unwrap();
        }
        tree.check_invariants().unwrap();

        let root = tree.nodes.root().unwrap();
        tree.nodes.value_mut(root).max_end += 1;
        assert!(matches!(
            tree.check_invariants(),
            Err(MarkerTreeError::Corrupted(_))
        ));
    }

    #[test]
    fn test_detects_stale_sum() {
        let mut tree = RangeMarkerTree::with_config(TreeConfig::strong());
        let m = tree.add_interval(1, 1, MarkerOptions::new().value(4)).unwrap();
        // value changed without value_updated
        tree.marker_mut(m.id()).unwrap().value = 5;
        assert!(tree.check_invariants().is_err());
        tree.value_updated(m.id());
        tree.check_invariants().unwrap();
    }
}
