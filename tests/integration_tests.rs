// Integration tests - exercising the marker tree through its public API

use std::cell::RefCell;
use std::ops::Range;
use std::rc::Rc;

use markers::{
    merge_overlapping, BoundaryPolicy, DocumentEvent, MarkerHit, MarkerKind, MarkerOptions,
    MarkerState, PartialSumTree, RangeMarker, RangeMarkerTree, RemovalReason, TreeConfig,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn checked_tree() -> RangeMarkerTree {
    RangeMarkerTree::with_config(TreeConfig {
        verify_invariants: true,
        ..TreeConfig::strong()
    })
}

fn ranges_overlapping(tree: &RangeMarkerTree, start: usize, end: usize) -> Vec<Range<usize>> {
    tree.overlapping_iter(start, end).map(|hit| hit.range()).collect()
}

/// Non-greedy marker [10,20): insertion at either boundary and a deletion
/// swallowing its head
#[test]
fn test_non_greedy_marker_edits() {
    let mut tree = checked_tree();
    let marker = tree.add_interval(10, 20, MarkerOptions::new()).unwrap();

    tree.retarget(&DocumentEvent::insert(10, 5)).unwrap();
    assert_eq!(tree.range_of(marker.id()), Some(15..25));

    let mut tree = checked_tree();
    let marker = tree.add_interval(10, 20, MarkerOptions::new()).unwrap();
    tree.retarget(&DocumentEvent::insert(20, 5)).unwrap();
    assert_eq!(tree.range_of(marker.id()), Some(10..20));

    let mut tree = checked_tree();
    let marker = tree.add_interval(10, 20, MarkerOptions::new()).unwrap();
    tree.retarget(&DocumentEvent::delete(5, 10)).unwrap();
    assert_eq!(tree.range_of(marker.id()), Some(5..10));
    assert!(marker.is_valid());
}

#[test]
fn test_partial_sums_example() {
    let mut tree = PartialSumTree::new();
    let _handles: Vec<RangeMarker> = [(3, 2), (7, 5), (7, 1), (12, 4)]
        .into_iter()
        .map(|(offset, value)| tree.add_marker(offset, value, false).unwrap())
        .collect();
    assert_eq!(tree.sum_of_values_up_to_offset(7), 8);
    assert_eq!(tree.sum_of_values_up_to_offset(2), 0);
    assert_eq!(tree.sum_of_values_up_to_offset(100), 12);
    // the two markers at 7 share a node
    assert_eq!(tree.as_tree().node_count(), 3);
}

#[test]
fn test_weak_partial_sums_forget_dropped_markers() {
    let mut tree = PartialSumTree::with_config(TreeConfig::default());
    let _kept = tree.add_marker(3, 2, false).unwrap();
    let dropped = tree.add_marker(5, 100, false).unwrap();
    let id = dropped.id();
    drop(dropped);

    let mut visible = 0;
    tree.as_tree().process_all(|_, _| {
        visible += 1;
        true
    });
    assert_eq!(visible, 1);
    assert_eq!(tree.as_tree().range_of(id), None);
    assert_eq!(tree.sum_of_values_up_to_offset(10), 2);
}

#[test]
fn test_overlap_returns_all_three() {
    let mut tree = checked_tree();
    for (s, e) in [(0, 5), (10, 15), (20, 30)] {
        tree.add_interval(s, e, MarkerOptions::new()).unwrap();
    }
    let mut count = 0;
    tree.process_overlapping_with(4, 21, |_, _| {
        count += 1;
        true
    });
    assert_eq!(count, 3);
    assert_eq!(ranges_overlapping(&tree, 4, 21), vec![0..5, 10..15, 20..30]);
}

#[test]
fn test_iterator_dispose_twice() {
    let mut tree = checked_tree();
    tree.add_interval(1, 2, MarkerOptions::new()).unwrap();
    let mut iter = tree.overlapping_iter(0, 10);
    iter.dispose();
    iter.dispose();
    assert!(iter.next().is_none());
}

#[test]
fn test_merging_two_trees() {
    let mut text_markers = checked_tree();
    let mut line_markers = checked_tree();
    text_markers.add_interval(3, 9, MarkerOptions::new()).unwrap();
    text_markers.add_interval(40, 45, MarkerOptions::new()).unwrap();
    line_markers.add_interval(0, 20, MarkerOptions::new()).unwrap();
    line_markers.add_interval(20, 40, MarkerOptions::new()).unwrap();

    let merged: Vec<_> = merge_overlapping(
        text_markers.overlapping_iter(0, 50),
        line_markers.overlapping_iter(0, 50),
        MarkerHit::by_position,
    )
    .map(|hit| hit.range())
    .collect();
    assert_eq!(merged, vec![0..20, 3..9, 20..40, 40..45]);
}

#[test]
fn test_listener_sees_invalidation() {
    let mut tree = checked_tree();
    let reasons = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&reasons);
    tree.set_removal_listener(move |marker, reason| {
        sink.borrow_mut().push((marker.id(), reason));
    });

    let doomed = tree.add_interval(12, 18, MarkerOptions::new()).unwrap();
    let survivor = tree.add_interval(0, 30, MarkerOptions::new()).unwrap();
    tree.retarget(&DocumentEvent::replace(10, 10, 2)).unwrap();

    assert_eq!(doomed.state(), MarkerState::Invalid);
    assert_eq!(
        *reasons.borrow(),
        vec![(doomed.id(), RemovalReason::Invalidated)]
    );
    assert_eq!(tree.range_of(survivor.id()), Some(0..22));
}

#[test]
fn test_fold_and_highlighter_kinds_travel_with_markers() {
    let mut tree = checked_tree();
    let highlight = tree
        .add_interval(
            5,
            8,
            MarkerOptions::new().kind(MarkerKind::Highlighter(markers::HighlighterData {
                attributes_key: "ERRORS".to_string(),
                persistent: false,
            })),
        )
        .unwrap();
    tree.retarget(&DocumentEvent::insert(6, 4)).unwrap();
    assert_eq!(tree.range_of(highlight.id()), Some(5..12));
    let marker = tree.marker(highlight.id()).unwrap();
    assert!(matches!(&marker.kind, MarkerKind::Highlighter(h) if h.attributes_key == "ERRORS"));
}

#[test]
fn test_weak_tree_reclaims_dropped_handles() {
    let mut tree = RangeMarkerTree::with_config(TreeConfig {
        verify_invariants: true,
        purge_divisor: 2,
        ..TreeConfig::default()
    });
    let kept: Vec<RangeMarker> = (0..10)
        .map(|i| tree.add_interval(i, i + 1, MarkerOptions::new()).unwrap())
        .collect();
    for i in 0..20 {
        // handle dropped immediately
        tree.add_interval(100 + i, 101 + i, MarkerOptions::new())
            .unwrap();
    }
    assert!(tree.len() < 30, "reclaimed markers were never purged");
    assert_eq!(ranges_overlapping(&tree, 0, 200).len(), 10);
    for m in &kept {
        assert!(m.is_valid());
    }
}

/// Large seeded workload checked against a flat list of expected ranges
#[test]
fn test_seeded_random_workload() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut tree = RangeMarkerTree::with_config(TreeConfig::strong());
    let mut expected: Vec<(RangeMarker, usize, usize, BoundaryPolicy)> = Vec::new();
    let mut doc_len = 5_000usize;

    for step in 0..12_000 {
        match rng.gen_range(0..10) {
            0..=4 => {
                let start = rng.gen_range(0..=doc_len);
                let end = (start + rng.gen_range(0..40)).min(doc_len);
                let policy = BoundaryPolicy {
                    greedy_to_left: rng.gen_bool(0.5),
                    greedy_to_right: rng.gen_bool(0.5),
                    sticking_to_right: rng.gen_bool(0.25),
                };
                let options = MarkerOptions {
                    policy,
                    layer: rng.gen_range(0..2),
                    ..MarkerOptions::default()
                };
                let marker = tree.add_interval(start, end, options).unwrap();
                expected.push((marker, start, end, policy));
            }
            5 | 6 if !expected.is_empty() => {
                let (marker, ..) = expected.swap_remove(rng.gen_range(0..expected.len()));
                assert!(tree.remove_interval(marker.id()).unwrap());
            }
            7 | 8 => {
                let offset = rng.gen_range(0..=doc_len);
                let old_length = rng.gen_range(0..=(doc_len - offset).min(25));
                let new_length = rng.gen_range(0..25);
                let event = DocumentEvent::replace(offset, old_length, new_length);
                tree.retarget(&event).unwrap();
                doc_len = doc_len - old_length + new_length;
                expected = expected
                    .into_iter()
                    .filter_map(|(marker, start, end, policy)| {
                        match markers::model::retarget::translate(start, end, policy, &event) {
                            Some((s, e)) => {
                                assert!(marker.is_valid(), "step {step}: marker lost");
                                Some((marker, s, e, policy))
                            }
                            None => {
                                assert_eq!(marker.state(), MarkerState::Invalid);
                                None
                            }
                        }
                    })
                    .collect();
            }
            _ => {
                let point = rng.gen_range(0..=doc_len);
                let mut hits = 0;
                tree.process_containing(point, |_, range| {
                    assert!(range.start <= point && point < range.end);
                    hits += 1;
                    true
                });
                let want = expected
                    .iter()
                    .filter(|(_, s, e, _)| *s <= point && point < *e)
                    .count();
                assert_eq!(hits, want, "containing {point} at step {step}");
            }
        }

        if step % 500 == 0 {
            tree.check_invariants().unwrap();
        }
    }

    tree.check_invariants().unwrap();
    assert_eq!(tree.len(), expected.len());
    for (marker, start, end, _) in &expected {
        assert_eq!(tree.range_of(marker.id()), Some(*start..*end));
    }
    // red-black height bound: 2 * log2(n + 1)
    let bound = 2 * (usize::BITS - (tree.node_count() + 1).leading_zeros()) as usize;
    assert!(tree.max_height() <= bound, "height {} > {}", tree.max_height(), bound);
}

#[test]
fn test_config_file_drives_tree() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tree.json");
    std::fs::write(&path, r#"{"retention": "strong", "verify_invariants": true}"#).unwrap();

    let config = TreeConfig::load_from_file(&path).unwrap();
    let mut tree = RangeMarkerTree::with_config(config);
    let id = tree.add_interval(1, 4, MarkerOptions::new()).unwrap().id();
    tree.add_interval(2, 3, MarkerOptions::new()).unwrap();
    // strong retention keeps markers whose handles are gone
    assert_eq!(tree.range_of(id), Some(1..4));
    assert_eq!(tree.len(), 2);
}
