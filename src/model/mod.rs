//! Marker tree data model
//!
//! Pure data structures with no I/O: the balanced tree, its interval
//! augmentation, and the marker-level API built on top.

pub mod edit;
pub mod interval_node;
pub mod marker;
pub mod marker_tree;
pub mod overlap_iter;
pub mod partial_sum;
pub mod rb_tree;
pub mod retarget;
pub mod verify;
