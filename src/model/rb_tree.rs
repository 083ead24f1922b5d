//! Arena-backed red-black tree with augmentation hooks.
//!
//! Nodes live in a `Vec` arena and are addressed by [`NodeId`]. Deletion relinks
//! nodes instead of moving payloads between slots, so a `NodeId` stays attached
//! to the same payload for as long as the node is in the tree. Layers built on
//! top (the interval tree) rely on this to keep marker-to-node links stable.
//!
//! Subtree aggregates and lazily propagated state are maintained through the
//! [`Augment`] trait: `push_down` is called on every node whose links are about
//! to change (top-down), `pull_up` on every node whose children changed
//! (bottom-up).

use std::cmp::Ordering;

/// Index into the node arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    #[inline(always)]
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Red,
    Black,
}

/// Which child slot of a parent a new node goes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// Result of [`RbTree::locate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Search {
    /// A node comparing equal was found.
    Found(NodeId),
    /// No equal node; a new node belongs under `parent` on `side`
    /// (`parent == None` means the tree is empty).
    Vacant { parent: Option<NodeId>, side: Side },
}

/// Hooks run around structural mutations. Both default to no-ops, so plain
/// ordered payloads need nothing beyond `impl Augment for T {}`.
pub trait Augment: Sized {
    /// Settle any lazily stored state of `id` into its children.
    fn push_down(_tree: &mut RbTree<Self>, _id: NodeId) {}

    /// Recompute the aggregates of `id` from its own payload and its children.
    fn pull_up(_tree: &mut RbTree<Self>, _id: NodeId) {}
}

#[derive(Debug, Clone)]
struct Slot<N> {
    parent: Option<NodeId>,
    left: Option<NodeId>,
    right: Option<NodeId>,
    color: Color,
    value: N,
    // false once the slot is on the free list
    alive: bool,
}

/// A red-black tree whose ordering is supplied per call by a comparator.
#[derive(Debug, Clone)]
pub struct RbTree<N> {
    slots: Vec<Slot<N>>,
    free_list: Vec<u32>,
    root: Option<NodeId>,
    len: usize,
}

impl<N> Default for RbTree<N> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            root: None,
            len: 0,
        }
    }
}

impl<N: Augment> RbTree<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes in the tree.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// Drop every node. Outstanding `NodeId`s become dangling.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free_list.clear();
        self.root = None;
        self.len = 0;
    }

    // ===== Accessors =====

    #[inline(always)]
    pub fn value(&self, id: NodeId) -> &N {
        debug_assert!(self.slots[id.index()].alive, "access to freed node {id:?}");
        &self.slots[id.index()].value
    }

    #[inline(always)]
    pub fn value_mut(&mut self, id: NodeId) -> &mut N {
        debug_assert!(self.slots[id.index()].alive, "access to freed node {id:?}");
        &mut self.slots[id.index()].value
    }

    #[inline(always)]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.slots[id.index()].parent
    }

    #[inline(always)]
    pub fn left(&self, id: NodeId) -> Option<NodeId> {
        self.slots[id.index()].left
    }

    #[inline(always)]
    pub fn right(&self, id: NodeId) -> Option<NodeId> {
        self.slots[id.index()].right
    }

    #[inline(always)]
    pub fn color(&self, id: NodeId) -> Color {
        self.slots[id.index()].color
    }

    /// Whether `id` refers to a node currently linked into this tree.
    pub fn contains(&self, id: NodeId) -> bool {
        self.slots.get(id.index()).is_some_and(|s| s.alive)
    }

    fn is_red(&self, id: Option<NodeId>) -> bool {
        id.is_some_and(|n| self.color(n) == Color::Red)
    }

    fn is_black(&self, id: Option<NodeId>) -> bool {
        !self.is_red(id)
    }

    fn set_color(&mut self, id: NodeId, color: Color) {
        self.slots[id.index()].color = color;
    }

    fn set_parent(&mut self, id: NodeId, parent: Option<NodeId>) {
        self.slots[id.index()].parent = parent;
    }

    fn set_left(&mut self, id: NodeId, left: Option<NodeId>) {
        self.slots[id.index()].left = left;
    }

    fn set_right(&mut self, id: NodeId, right: Option<NodeId>) {
        self.slots[id.index()].right = right;
    }

    // ===== Arena =====

    fn alloc(&mut self, value: N) -> NodeId {
        let slot = Slot {
            parent: None,
            left: None,
            right: None,
            color: Color::Red,
            value,
            alive: true,
        };
        if let Some(idx) = self.free_list.pop() {
            self.slots[idx as usize] = slot;
            NodeId(idx)
        } else {
            let idx = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
            debug_assert!(idx != u32::MAX, "node arena exhausted");
            self.slots.push(slot);
            NodeId(idx)
        }
    }

    fn release(&mut self, id: NodeId) {
        let slot = &mut self.slots[id.index()];
        slot.alive = false;
        slot.parent = None;
        slot.left = None;
        slot.right = None;
        self.free_list.push(id.0);
    }

    // ===== Navigation =====

    /// Leftmost node.
    pub fn first(&self) -> Option<NodeId> {
        let mut node = self.root?;
        while let Some(left) = self.left(node) {
            node = left;
        }
        Some(node)
    }

    /// Rightmost node.
    pub fn last(&self) -> Option<NodeId> {
        let mut node = self.root?;
        while let Some(right) = self.right(node) {
            node = right;
        }
        Some(node)
    }

    /// In-order successor.
    pub fn next(&self, id: NodeId) -> Option<NodeId> {
        if let Some(mut node) = self.right(id) {
            while let Some(left) = self.left(node) {
                node = left;
            }
            return Some(node);
        }
        let mut child = id;
        let mut parent = self.parent(id);
        while let Some(p) = parent {
            if self.left(p) == Some(child) {
                return Some(p);
            }
            child = p;
            parent = self.parent(p);
        }
        None
    }

    /// In-order predecessor.
    pub fn prev(&self, id: NodeId) -> Option<NodeId> {
        if let Some(mut node) = self.left(id) {
            while let Some(right) = self.right(node) {
                node = right;
            }
            return Some(node);
        }
        let mut child = id;
        let mut parent = self.parent(id);
        while let Some(p) = parent {
            if self.right(p) == Some(child) {
                return Some(p);
            }
            child = p;
            parent = self.parent(p);
        }
        None
    }

    /// Length of the longest root-to-leaf path.
    pub fn height(&self) -> usize {
        fn walk<N: Augment>(tree: &RbTree<N>, node: Option<NodeId>) -> usize {
            match node {
                None => 0,
                Some(id) => 1 + walk(tree, tree.left(id)).max(walk(tree, tree.right(id))),
            }
        }
        walk(self, self.root)
    }

    // ===== Lookup & insert =====

    /// Descend from the root, steering by `cmp(existing)`, which reports how
    /// the searched key orders relative to `existing`. Every visited node is
    /// pushed down first so its payload is expressed in absolute terms.
    pub fn locate(&mut self, mut cmp: impl FnMut(&N) -> Ordering) -> Search {
        let mut parent = None;
        let mut side = Side::Left;
        let mut current = self.root;
        while let Some(id) = current {
            N::push_down(self, id);
            parent = Some(id);
            match cmp(self.value(id)) {
                Ordering::Equal => return Search::Found(id),
                Ordering::Less => {
                    side = Side::Left;
                    current = self.left(id);
                }
                Ordering::Greater => {
                    side = Side::Right;
                    current = self.right(id);
                }
            }
        }
        Search::Vacant { parent, side }
    }

    /// Lookup only.
    pub fn find_by(&mut self, cmp: impl FnMut(&N) -> Ordering) -> Option<NodeId> {
        match self.locate(cmp) {
            Search::Found(id) => Some(id),
            Search::Vacant { .. } => None,
        }
    }

    /// Link `value` into the vacant slot returned by [`RbTree::locate`] and
    /// rebalance. The slot must not have been invalidated by another mutation.
    pub fn insert_at(&mut self, parent: Option<NodeId>, side: Side, value: N) -> NodeId {
        let id = self.alloc(value);
        match parent {
            None => {
                debug_assert!(self.root.is_none(), "vacant root slot on non-empty tree");
                self.root = Some(id);
            }
            Some(p) => {
                match side {
                    Side::Left => {
                        debug_assert!(self.left(p).is_none(), "left slot occupied");
                        self.set_left(p, Some(id));
                    }
                    Side::Right => {
                        debug_assert!(self.right(p).is_none(), "right slot occupied");
                        self.set_right(p, Some(id));
                    }
                }
                self.set_parent(id, Some(p));
            }
        }
        self.len += 1;
        self.pull_up_from(Some(id));
        self.insert_fixup(id);
        id
    }

    /// Find-or-insert. Returns the node holding an equal key and whether it
    /// was newly created; on a hit `value` is handed back unused.
    pub fn insert_by(
        &mut self,
        value: N,
        mut cmp: impl FnMut(&N, &N) -> Ordering,
    ) -> Result<NodeId, (NodeId, N)> {
        match self.locate(|existing| cmp(&value, existing)) {
            Search::Found(id) => Err((id, value)),
            Search::Vacant { parent, side } => Ok(self.insert_at(parent, side, value)),
        }
    }

    /// Recompute aggregates from `start` up to the root.
    pub fn pull_up_from(&mut self, start: Option<NodeId>) {
        let mut current = start;
        while let Some(id) = current {
            N::pull_up(self, id);
            current = self.parent(id);
        }
    }

    /// Push lazily stored state down along the path root..=`id`, so `id` and
    /// all of its ancestors carry no pending state.
    pub fn push_down_path(&mut self, id: NodeId) {
        let mut path = Vec::with_capacity(self.height_hint());
        let mut current = Some(id);
        while let Some(n) = current {
            path.push(n);
            current = self.parent(n);
        }
        for &n in path.iter().rev() {
            N::push_down(self, n);
        }
    }

    fn height_hint(&self) -> usize {
        2 * (usize::BITS - self.len.leading_zeros()) as usize + 2
    }

    // ===== Rotations =====

    pub(crate) fn rotate_left(&mut self, x: NodeId) {
        let Some(y) = self.right(x) else {
            debug_assert!(false, "rotate_left without right child");
            return;
        };
        N::push_down(self, x);
        N::push_down(self, y);

        let beta = self.left(y);
        self.set_right(x, beta);
        if let Some(b) = beta {
            self.set_parent(b, Some(x));
        }
        self.replace_in_parent(x, Some(y));
        self.set_left(y, Some(x));
        self.set_parent(x, Some(y));

        N::pull_up(self, x);
        N::pull_up(self, y);
    }

    pub(crate) fn rotate_right(&mut self, x: NodeId) {
        let Some(y) = self.left(x) else {
            debug_assert!(false, "rotate_right without left child");
            return;
        };
        N::push_down(self, x);
        N::push_down(self, y);

        let beta = self.right(y);
        self.set_left(x, beta);
        if let Some(b) = beta {
            self.set_parent(b, Some(x));
        }
        self.replace_in_parent(x, Some(y));
        self.set_right(y, Some(x));
        self.set_parent(x, Some(y));

        N::pull_up(self, x);
        N::pull_up(self, y);
    }

    /// Make `replacement` take `old`'s place under `old`'s parent.
    fn replace_in_parent(&mut self, old: NodeId, replacement: Option<NodeId>) {
        let parent = self.parent(old);
        match parent {
            None => self.root = replacement,
            Some(p) => {
                if self.left(p) == Some(old) {
                    self.set_left(p, replacement);
                } else {
                    self.set_right(p, replacement);
                }
            }
        }
        if let Some(r) = replacement {
            self.set_parent(r, parent);
        }
    }

    fn insert_fixup(&mut self, mut node: NodeId) {
        while let Some(parent) = self.parent(node).filter(|&p| self.color(p) == Color::Red) {
            // a red parent is never the root, so the grandparent exists
            let Some(grandparent) = self.parent(parent) else {
                break;
            };
            if self.left(grandparent) == Some(parent) {
                let uncle = self.right(grandparent);
                if let Some(u) = uncle.filter(|&u| self.color(u) == Color::Red) {
                    self.set_color(parent, Color::Black);
                    self.set_color(u, Color::Black);
                    self.set_color(grandparent, Color::Red);
                    node = grandparent;
                } else {
                    let mut parent = parent;
                    if self.right(parent) == Some(node) {
                        node = parent;
                        self.rotate_left(node);
                        parent = self.parent(node).unwrap_or(parent);
                    }
                    self.set_color(parent, Color::Black);
                    self.set_color(grandparent, Color::Red);
                    self.rotate_right(grandparent);
                }
            } else {
                let uncle = self.left(grandparent);
                if let Some(u) = uncle.filter(|&u| self.color(u) == Color::Red) {
                    self.set_color(parent, Color::Black);
                    self.set_color(u, Color::Black);
                    self.set_color(grandparent, Color::Red);
                    node = grandparent;
                } else {
                    let mut parent = parent;
                    if self.left(parent) == Some(node) {
                        node = parent;
                        self.rotate_right(node);
                        parent = self.parent(node).unwrap_or(parent);
                    }
                    self.set_color(parent, Color::Black);
                    self.set_color(grandparent, Color::Red);
                    self.rotate_left(grandparent);
                }
            }
        }
        if let Some(root) = self.root {
            self.set_color(root, Color::Black);
        }
    }

    // ===== Removal =====

    /// Unlink `z` from the tree and free its slot.
    ///
    /// When `z` has two children its in-order predecessor is relinked into
    /// `z`'s position; no payload moves between slots.
    pub fn remove(&mut self, z: NodeId) {
        debug_assert!(self.contains(z), "removing a node that is not in the tree");
        self.push_down_path(z);

        // y: the node physically spliced out of its position
        let y = match (self.left(z), self.right(z)) {
            (Some(left), Some(_)) => {
                let mut node = left;
                N::push_down(self, node);
                while let Some(right) = self.right(node) {
                    node = right;
                    N::push_down(self, node);
                }
                node
            }
            _ => z,
        };
        let x = self.left(y).or(self.right(y));
        let removed_color = self.color(y);
        let mut x_parent = self.parent(y);

        self.replace_in_parent(y, x);

        if y != z {
            if x_parent == Some(z) {
                x_parent = Some(y);
            }
            // y takes over z's links and color
            let z_left = self.left(z);
            let z_right = self.right(z);
            let z_color = self.color(z);
            self.replace_in_parent(z, Some(y));
            self.set_left(y, z_left);
            if let Some(l) = z_left {
                self.set_parent(l, Some(y));
            }
            self.set_right(y, z_right);
            if let Some(r) = z_right {
                self.set_parent(r, Some(y));
            }
            self.set_color(y, z_color);
        }

        self.release(z);
        self.len -= 1;
        self.pull_up_from(x_parent);

        if removed_color == Color::Black {
            self.remove_fixup(x, x_parent);
        }
    }

    /// Lookup-and-remove. Returns whether a node was removed.
    pub fn delete_by(&mut self, cmp: impl FnMut(&N) -> Ordering) -> bool {
        match self.find_by(cmp) {
            Some(id) => {
                self.remove(id);
                true
            }
            None => false,
        }
    }

    fn remove_fixup(&mut self, mut node: Option<NodeId>, mut parent: Option<NodeId>) {
        while node != self.root && self.is_black(node) {
            let Some(p) = parent else {
                break;
            };
            if self.left(p) == node {
                let Some(mut sibling) = self.right(p) else {
                    break;
                };
                if self.color(sibling) == Color::Red {
                    self.set_color(sibling, Color::Black);
                    self.set_color(p, Color::Red);
                    self.rotate_left(p);
                    let Some(s) = self.right(p) else {
                        break;
                    };
                    sibling = s;
                }
                if self.is_black(self.left(sibling)) && self.is_black(self.right(sibling)) {
                    self.set_color(sibling, Color::Red);
                    node = Some(p);
                    parent = self.parent(p);
                } else {
                    if self.is_black(self.right(sibling)) {
                        if let Some(sl) = self.left(sibling) {
                            self.set_color(sl, Color::Black);
                        }
                        self.set_color(sibling, Color::Red);
                        self.rotate_right(sibling);
                        let Some(s) = self.right(p) else {
                            break;
                        };
                        sibling = s;
                    }
                    self.set_color(sibling, self.color(p));
                    self.set_color(p, Color::Black);
                    if let Some(sr) = self.right(sibling) {
                        self.set_color(sr, Color::Black);
                    }
                    self.rotate_left(p);
                    node = self.root;
                    parent = None;
                }
            } else {
                let Some(mut sibling) = self.left(p) else {
                    break;
                };
                if self.color(sibling) == Color::Red {
                    self.set_color(sibling, Color::Black);
                    self.set_color(p, Color::Red);
                    self.rotate_right(p);
                    let Some(s) = self.left(p) else {
                        break;
                    };
                    sibling = s;
                }
                if self.is_black(self.left(sibling)) && self.is_black(self.right(sibling)) {
                    self.set_color(sibling, Color::Red);
                    node = Some(p);
                    parent = self.parent(p);
                } else {
                    if self.is_black(self.left(sibling)) {
                        if let Some(sr) = self.right(sibling) {
                            self.set_color(sr, Color::Black);
                        }
                        self.set_color(sibling, Color::Red);
                        self.rotate_left(sibling);
                        let Some(s) = self.left(p) else {
                            break;
                        };
                        sibling = s;
                    }
                    self.set_color(sibling, self.color(p));
                    self.set_color(p, Color::Black);
                    if let Some(sl) = self.left(sibling) {
                        self.set_color(sl, Color::Black);
                    }
                    self.rotate_right(p);
                    node = self.root;
                    parent = None;
                }
            }
        }
        if let Some(n) = node {
            self.set_color(n, Color::Black);
        }
    }

    // ===== Verification =====

    /// Check the red-black and link invariants. Returns the black height.
    pub fn check_red_black(&self) -> Result<usize, String> {
        let Some(root) = self.root else {
            return if self.len == 0 {
                Ok(0)
            } else {
                Err(format!("empty tree reports {} nodes", self.len))
            };
        };
        if self.parent(root).is_some() {
            return Err("root has a parent".to_string());
        }
        if self.color(root) != Color::Black {
            return Err("root is red".to_string());
        }
        let mut count = 0;
        let black_height = self.check_subtree(root, &mut count)?;
        if count != self.len {
            return Err(format!("reachable nodes {count} != len {}", self.len));
        }
        Ok(black_height)
    }

    fn check_subtree(&self, id: NodeId, count: &mut usize) -> Result<usize, String> {
        if !self.contains(id) {
            return Err(format!("{id:?} is linked but freed"));
        }
        *count += 1;
        let red = self.color(id) == Color::Red;
        let mut heights = [0usize; 2];
        for (i, child) in [self.left(id), self.right(id)].into_iter().enumerate() {
            if let Some(c) = child {
                if self.parent(c) != Some(id) {
                    return Err(format!("{c:?} does not point back to parent {id:?}"));
                }
                if red && self.color(c) == Color::Red {
                    return Err(format!("red {id:?} has red child {c:?}"));
                }
                heights[i] = self.check_subtree(c, count)?;
            }
        }
        if heights[0] != heights[1] {
            return Err(format!(
                "black height mismatch under {id:?}: {} vs {}",
                heights[0], heights[1]
            ));
        }
        Ok(heights[0] + usize::from(!red))
    }
}
