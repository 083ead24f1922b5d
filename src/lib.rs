// Marker tree library - offset-tracking range markers for editable text

pub mod config;
pub mod error;
pub mod model;

pub use config::{ConfigError, TreeConfig};
pub use error::MarkerTreeError;
pub use model::edit::DocumentEvent;
pub use model::marker::{
    BoundaryPolicy, FoldData, HighlighterData, InlayData, Marker, MarkerId, MarkerKind,
    MarkerOptions, MarkerState, RangeMarker, RemovalReason, Retention,
};
pub use model::marker_tree::RangeMarkerTree;
pub use model::overlap_iter::{merge_overlapping, MarkerHit, OverlappingIter};
pub use model::partial_sum::PartialSumTree;
