//! Marker types shared by the interval tree and its callers.
//!
//! A marker is created by [`RangeMarkerTree::add_interval`] and lives in the
//! tree until it is removed, invalidated by an edit, cleared, or (for weakly
//! retained trees) reclaimed once every [`RangeMarker`] handle is dropped.
//!
//! [`RangeMarkerTree::add_interval`]: crate::model::marker_tree::RangeMarkerTree::add_interval

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::model::rb_tree::NodeId;

/// Unique identifier for a marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarkerId(pub u64);

/// How a tree holds on to its markers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Retention {
    /// Markers stay in the tree only while a caller handle is alive
    #[default]
    Weak,
    /// The tree keeps markers until they are removed explicitly
    Strong,
}

/// Whether marker endpoints absorb text inserted exactly at them
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BoundaryPolicy {
    pub greedy_to_left: bool,
    pub greedy_to_right: bool,
    /// Zero-width markers only: stay after text inserted at the marker offset
    pub sticking_to_right: bool,
}

impl BoundaryPolicy {
    pub fn new(greedy_to_left: bool, greedy_to_right: bool) -> Self {
        Self {
            greedy_to_left,
            greedy_to_right,
            sticking_to_right: false,
        }
    }

    pub fn sticky(sticking_to_right: bool) -> Self {
        Self {
            sticking_to_right,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerState {
    Valid,
    /// An edit left the marker without a coherent position
    Invalid,
    /// Removed from the tree (explicitly, by `clear` or by disposal)
    Removed,
}

/// Why a marker is leaving the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    ExplicitDispose,
    Invalidated,
    Cleared,
    TreeDisposed,
    /// The last caller handle of a weakly held marker was dropped
    Reclaimed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighlighterData {
    pub attributes_key: String,
    pub persistent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldData {
    pub placeholder: String,
    pub expanded: bool,
    /// Fold regions created for fixed spans must not grow or vanish
    pub never_expands: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InlayData {
    pub relates_to_preceding_text: bool,
}

/// Caller payload attached to a marker
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MarkerKind {
    #[default]
    Plain,
    Highlighter(HighlighterData),
    Fold(FoldData),
    Inlay(InlayData),
}

impl MarkerKind {
    /// Last word on a translated range. `old` is the range before the edit,
    /// `new` the range the translation rules produced.
    pub fn accepts_retarget(&self, old: (usize, usize), new: (usize, usize)) -> bool {
        match self {
            MarkerKind::Fold(fold) if fold.never_expands => {
                let old_len = old.1 - old.0;
                let new_len = new.1 - new.0;
                new_len > 0 && new_len <= old_len
            }
            _ => true,
        }
    }
}

/// Everything about a marker except its range
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkerOptions {
    pub policy: BoundaryPolicy,
    pub layer: i32,
    pub kind: MarkerKind,
    pub value: i64,
}

impl MarkerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn greedy(mut self, to_left: bool, to_right: bool) -> Self {
        self.policy.greedy_to_left = to_left;
        self.policy.greedy_to_right = to_right;
        self
    }

    pub fn sticking_to_right(mut self, sticking: bool) -> Self {
        self.policy.sticking_to_right = sticking;
        self
    }

    pub fn layer(mut self, layer: i32) -> Self {
        self.layer = layer;
        self
    }

    pub fn kind(mut self, kind: MarkerKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn value(mut self, value: i64) -> Self {
        self.value = value;
        self
    }
}

/// Shared between the caller handle and the tree's record of the marker
#[derive(Debug)]
pub(crate) struct MarkerToken {
    id: MarkerId,
    state: Cell<MarkerState>,
    reclaimed: Weak<RefCell<Vec<MarkerId>>>,
}

impl MarkerToken {
    pub(crate) fn new(id: MarkerId, reclaimed: Weak<RefCell<Vec<MarkerId>>>) -> Self {
        Self {
            id,
            state: Cell::new(MarkerState::Valid),
            reclaimed,
        }
    }

    pub(crate) fn set_state(&self, state: MarkerState) {
        self.state.set(state);
    }
}

impl Drop for MarkerToken {
    fn drop(&mut self) {
        // only markers still in the tree need reporting
        if self.state.get() != MarkerState::Valid {
            return;
        }
        if let Some(queue) = self.reclaimed.upgrade() {
            if let Ok(mut queue) = queue.try_borrow_mut() {
                queue.push(self.id);
            }
        }
    }
}

#[derive(Debug)]
pub(crate) enum Retained {
    Strong(Rc<MarkerToken>),
    Weak(Weak<MarkerToken>),
}

impl Retained {
    pub(crate) fn token(&self) -> Option<Rc<MarkerToken>> {
        match self {
            Retained::Strong(token) => Some(Rc::clone(token)),
            Retained::Weak(token) => token.upgrade(),
        }
    }

    fn is_alive(&self) -> bool {
        match self {
            Retained::Strong(_) => true,
            Retained::Weak(token) => token.strong_count() > 0,
        }
    }
}

/// The tree's record of a marker
#[derive(Debug)]
pub struct Marker {
    id: MarkerId,
    policy: BoundaryPolicy,
    layer: i32,
    pub kind: MarkerKind,
    /// Scalar used by partial-sum queries; call `value_updated` after changing it
    pub value: i64,
    pub(crate) node: Option<NodeId>,
    pub(crate) retained: Retained,
}

impl Marker {
    pub(crate) fn new(id: MarkerId, options: MarkerOptions, retained: Retained) -> Self {
        Self {
            id,
            policy: options.policy,
            layer: options.layer,
            kind: options.kind,
            value: options.value,
            node: None,
            retained,
        }
    }

    pub fn id(&self) -> MarkerId {
        self.id
    }

    pub fn policy(&self) -> BoundaryPolicy {
        self.policy
    }

    pub fn layer(&self) -> i32 {
        self.layer
    }

    /// False once a weakly held marker has lost its last handle
    pub fn is_alive(&self) -> bool {
        self.retained.is_alive()
    }

    pub(crate) fn set_key(&mut self, policy: BoundaryPolicy, layer: i32) {
        self.policy = policy;
        self.layer = layer;
    }

    pub(crate) fn set_state(&self, state: MarkerState) {
        if let Some(token) = self.retained.token() {
            token.set_state(state);
        }
    }
}

/// Caller handle to a marker
///
/// Cloning is cheap. With [`Retention::Weak`] the marker is reclaimed by the
/// tree once every clone is dropped.
#[derive(Debug, Clone)]
pub struct RangeMarker {
    token: Rc<MarkerToken>,
}

impl RangeMarker {
    pub(crate) fn new(token: Rc<MarkerToken>) -> Self {
        Self { token }
    }

    pub fn id(&self) -> MarkerId {
        self.token.id
    }

    pub fn state(&self) -> MarkerState {
        self.token.state.get()
    }

    pub fn is_valid(&self) -> bool {
        self.state() == MarkerState::Valid
    }
}

impl PartialEq for RangeMarker {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.token, &other.token)
    }
}

impl Eq for RangeMarker {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_expanding_fold_rejects_growth() {
        let kind = MarkerKind::Fold(FoldData {
            placeholder: "...".to_string(),
            expanded: false,
            never_expands: true,
        });
        assert!(kind.accepts_retarget((10, 20), (15, 25)));
        assert!(kind.accepts_retarget((10, 20), (10, 15)));
        assert!(!kind.accepts_retarget((10, 20), (10, 25)), "fold grew");
        assert!(!kind.accepts_retarget((10, 20), (10, 10)), "fold collapsed");
        assert!(MarkerKind::Plain.accepts_retarget((10, 20), (10, 10)));
    }

    #[test]
    fn test_dropping_last_handle_reports_reclaim() {
        let queue = Rc::new(RefCell::new(Vec::new()));
        let token = Rc::new(MarkerToken::new(MarkerId(7), Rc::downgrade(&queue)));
        let handle = RangeMarker::new(token);
        let copy = handle.clone();
        drop(handle);
        assert!(queue.borrow().is_empty());
        drop(copy);
        assert_eq!(*queue.borrow(), vec![MarkerId(7)]);
    }

    #[test]
    fn test_removed_marker_is_not_reported() {
        let queue = Rc::new(RefCell::new(Vec::new()));
        let token = Rc::new(MarkerToken::new(MarkerId(1), Rc::downgrade(&queue)));
        let handle = RangeMarker::new(token);
        handle.token.set_state(MarkerState::Removed);
        assert!(!handle.is_valid());
        drop(handle);
        assert!(queue.borrow().is_empty());
    }

    #[test]
    fn test_options_builder() {
        let options = MarkerOptions::new().greedy(true, false).layer(3).value(-2);
        assert!(options.policy.greedy_to_left);
        assert!(!options.policy.greedy_to_right);
        assert_eq!(options.layer, 3);
        assert_eq!(options.value, -2);
        assert_eq!(options.kind, MarkerKind::Plain);
    }
}
