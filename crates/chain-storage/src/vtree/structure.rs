//! Generic B+-tree structure: routing nodes, descent, splits, merges.
//!
//! Inner nodes are structural (separator keys plus child references) and
//! are protected as a whole by the tree's structure lock; leaves live in
//! buffer frames with their own hybrid latches. The locking discipline:
//!
//! - descent holds the structure lock shared and acquires the target
//!   leaf's latch before releasing it, so the leaf still covers the key;
//! - splits and merges hold the structure lock exclusively and latch the
//!   affected leaves, so no operation can be positioned on them;
//! - nobody acquires the structure lock while holding a leaf latch.

use std::sync::Arc;

use chain_common::constants::PAGE_HEADER_SIZE;
use chain_common::PageId;

use crate::buffer::{BufferFrame, ExclusiveGuard, PagePool};
use crate::page::LeafPage;

/// Fan-out bound of inner nodes.
const MAX_INNER_KEYS: usize = 32;

/// A reference to a child node.
pub(crate) enum NodeRef {
    /// Structural routing node.
    Inner(Box<InnerNode>),
    /// Latched leaf frame.
    Leaf(Arc<BufferFrame>),
}

/// A routing node: `children[i]` covers keys below `keys[i]`, the last
/// child covers the rest.
pub(crate) struct InnerNode {
    pub page_id: PageId,
    pub keys: Vec<Vec<u8>>,
    pub children: Vec<NodeRef>,
}

impl InnerNode {
    /// Index of the child covering `key`.
    fn child_index(&self, key: &[u8]) -> usize {
        self.keys.partition_point(|sep| sep.as_slice() <= key)
    }

    /// Splits an overflowing inner node, returning the separator and the
    /// new right sibling.
    fn split(&mut self, pool: &PagePool) -> (Vec<u8>, NodeRef) {
        let mid = self.keys.len() / 2;
        let right_keys = self.keys.split_off(mid + 1);
        let separator = self.keys.pop().expect("split of a node with keys");
        let right_children = self.children.split_off(mid + 1);
        let right = InnerNode {
            page_id: pool.allocate_page_id(),
            keys: right_keys,
            children: right_children,
        };
        (separator, NodeRef::Inner(Box::new(right)))
    }
}

fn placeholder() -> NodeRef {
    NodeRef::Inner(Box::new(InnerNode {
        page_id: PageId::INVALID,
        keys: Vec::new(),
        children: Vec::new(),
    }))
}

/// The structural skeleton of one tree.
pub(crate) struct TreeStructure {
    root: NodeRef,
}

impl TreeStructure {
    /// Creates a single-leaf tree.
    pub fn new(pool: &PagePool) -> Self {
        Self {
            root: NodeRef::Leaf(pool.allocate_leaf()),
        }
    }

    fn page_id_of(node: &NodeRef) -> PageId {
        match node {
            NodeRef::Inner(inner) => inner.page_id,
            NodeRef::Leaf(frame) => frame.page_id(),
        }
    }

    /// Returns the root's page id.
    pub fn root_page_id(&self) -> PageId {
        Self::page_id_of(&self.root)
    }

    // =========================================================================
    // Descent
    // =========================================================================

    /// Returns the leaf frame covering `key`.
    pub fn leaf_for(&self, key: &[u8]) -> &Arc<BufferFrame> {
        let mut node = &self.root;
        loop {
            match node {
                NodeRef::Leaf(frame) => return frame,
                NodeRef::Inner(inner) => node = &inner.children[inner.child_index(key)],
            }
        }
    }

    fn leftmost(mut node: &NodeRef) -> &Arc<BufferFrame> {
        loop {
            match node {
                NodeRef::Leaf(frame) => return frame,
                NodeRef::Inner(inner) => node = &inner.children[0],
            }
        }
    }

    fn rightmost(mut node: &NodeRef) -> &Arc<BufferFrame> {
        loop {
            match node {
                NodeRef::Leaf(frame) => return frame,
                NodeRef::Inner(inner) => {
                    node = inner.children.last().expect("inner nodes have children");
                }
            }
        }
    }

    /// Returns the leaf immediately after the one covering `key`.
    pub fn leaf_after(&self, key: &[u8]) -> Option<&Arc<BufferFrame>> {
        Self::after_rec(&self.root, key)
    }

    fn after_rec<'a>(node: &'a NodeRef, key: &[u8]) -> Option<&'a Arc<BufferFrame>> {
        match node {
            NodeRef::Leaf(_) => None,
            NodeRef::Inner(inner) => {
                let idx = inner.child_index(key);
                if let Some(found) = Self::after_rec(&inner.children[idx], key) {
                    return Some(found);
                }
                inner.children.get(idx + 1).map(|c| Self::leftmost(c))
            }
        }
    }

    /// Returns the leaf immediately before the one covering `key`.
    pub fn leaf_before(&self, key: &[u8]) -> Option<&Arc<BufferFrame>> {
        Self::before_rec(&self.root, key)
    }

    fn before_rec<'a>(node: &'a NodeRef, key: &[u8]) -> Option<&'a Arc<BufferFrame>> {
        match node {
            NodeRef::Leaf(_) => None,
            NodeRef::Inner(inner) => {
                let idx = inner.child_index(key);
                if let Some(found) = Self::before_rec(&inner.children[idx], key) {
                    return Some(found);
                }
                match idx.checked_sub(1) {
                    Some(prev) => Some(Self::rightmost(&inner.children[prev])),
                    None => None,
                }
            }
        }
    }

    /// Visits every leaf frame in key order.
    pub fn for_each_leaf(&self, visit: &mut dyn FnMut(&Arc<BufferFrame>)) {
        Self::walk_leaves(&self.root, visit);
    }

    fn walk_leaves(node: &NodeRef, visit: &mut dyn FnMut(&Arc<BufferFrame>)) {
        match node {
            NodeRef::Leaf(frame) => visit(frame),
            NodeRef::Inner(inner) => {
                for child in &inner.children {
                    Self::walk_leaves(child, visit);
                }
            }
        }
    }

    // =========================================================================
    // Introspection (dispatch table)
    // =========================================================================

    fn find_node<'a>(node: &'a NodeRef, page: PageId) -> Option<&'a NodeRef> {
        if Self::page_id_of(node) == page {
            return Some(node);
        }
        if let NodeRef::Inner(inner) = node {
            for child in &inner.children {
                if let Some(found) = Self::find_node(child, page) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Returns the child page ids of `page` (empty for a leaf), or `None`
    /// if the page is not part of this tree.
    pub fn children_of(&self, page: PageId) -> Option<Vec<PageId>> {
        Self::find_node(&self.root, page).map(|node| match node {
            NodeRef::Leaf(_) => Vec::new(),
            NodeRef::Inner(inner) => inner.children.iter().map(Self::page_id_of).collect(),
        })
    }

    /// Returns the parent page id of `page` (`None` for the root or an
    /// unknown page).
    pub fn parent_of(&self, page: PageId) -> Option<PageId> {
        Self::parent_rec(&self.root, page)
    }

    fn parent_rec(node: &NodeRef, page: PageId) -> Option<PageId> {
        let NodeRef::Inner(inner) = node else {
            return None;
        };
        for child in &inner.children {
            if Self::page_id_of(child) == page {
                return Some(inner.page_id);
            }
            if let Some(found) = Self::parent_rec(child, page) {
                return Some(found);
            }
        }
        None
    }

    // =========================================================================
    // Splits
    // =========================================================================

    /// Splits the leaf covering `key` (and any overflowing ancestors).
    pub fn split_for_key(&mut self, pool: &PagePool, key: &[u8]) {
        if let Some((separator, right)) = Self::split_rec(&mut self.root, pool, key) {
            let old_root = std::mem::replace(&mut self.root, placeholder());
            self.root = NodeRef::Inner(Box::new(InnerNode {
                page_id: pool.allocate_page_id(),
                keys: vec![separator],
                children: vec![old_root, right],
            }));
        }
    }

    fn split_rec(node: &mut NodeRef, pool: &PagePool, key: &[u8]) -> Option<(Vec<u8>, NodeRef)> {
        match node {
            NodeRef::Inner(inner) => {
                let idx = inner.child_index(key);
                if let Some((separator, right)) = Self::split_rec(&mut inner.children[idx], pool, key)
                {
                    inner.keys.insert(idx, separator);
                    inner.children.insert(idx + 1, right);
                }
                if inner.keys.len() > MAX_INNER_KEYS {
                    return Some(inner.split(pool));
                }
                None
            }
            NodeRef::Leaf(frame) => {
                let mut guard = ExclusiveGuard::acquire(frame);
                match guard.leaf().slot_count() {
                    0 => None,
                    1 => {
                        // A single oversized record: route around it so the
                        // incoming key lands on a page with room.
                        let existing = guard.leaf().key_at(0).to_vec();
                        if key < existing.as_slice() {
                            let mut right = LeafPage::new(pool.page_size());
                            let moved = right.append_from(guard.leaf(), 0);
                            debug_assert!(moved);
                            guard.leaf_mut().remove_slot(0);
                            guard.leaf_mut().compact();
                            guard.mark_modified();
                            drop(guard);
                            Some((existing, NodeRef::Leaf(pool.adopt_leaf(right))))
                        } else {
                            drop(guard);
                            Some((key.to_vec(), NodeRef::Leaf(pool.allocate_leaf())))
                        }
                    }
                    _ => {
                        let (separator, right) = guard.leaf_mut().split_off();
                        guard.mark_modified();
                        drop(guard);
                        Some((separator, NodeRef::Leaf(pool.adopt_leaf(right))))
                    }
                }
            }
        }
    }

    // =========================================================================
    // Merges
    // =========================================================================

    /// Folds underflowing leaves along the path to `key` into a sibling
    /// and collapses trivial inner nodes. Garbage collection can leave
    /// completely empty leaves; this is where they are reclaimed.
    pub fn merge_for_key(&mut self, pool: &PagePool, key: &[u8]) {
        Self::merge_rec(&mut self.root, pool, key);
        loop {
            let single = matches!(&self.root, NodeRef::Inner(inner) if inner.children.len() == 1);
            if !single {
                break;
            }
            let NodeRef::Inner(mut inner) = std::mem::replace(&mut self.root, placeholder()) else {
                unreachable!();
            };
            self.root = inner.children.pop().expect("checked single child");
        }
    }

    fn merge_rec(node: &mut NodeRef, pool: &PagePool, key: &[u8]) {
        let NodeRef::Inner(inner) = node else {
            return;
        };
        let idx = inner.child_index(key);
        Self::merge_rec(&mut inner.children[idx], pool, key);

        // Collapse a child inner node left with a single grandchild.
        if let NodeRef::Inner(child) = &mut inner.children[idx] {
            if child.children.len() == 1 {
                let only = child.children.pop().expect("checked single child");
                inner.children[idx] = only;
            }
        }

        Self::try_merge_leaves(inner, pool, idx);
    }

    fn try_merge_leaves(inner: &mut InnerNode, pool: &PagePool, idx: usize) {
        let left_idx = if idx > 0 { idx - 1 } else { 0 };
        let right_idx = left_idx + 1;
        if right_idx >= inner.children.len() {
            return;
        }
        let (NodeRef::Leaf(left_frame), NodeRef::Leaf(right_frame)) =
            (&inner.children[left_idx], &inner.children[right_idx])
        else {
            return;
        };
        let left_frame = Arc::clone(left_frame);
        let right_frame = Arc::clone(right_frame);

        let mut left = ExclusiveGuard::acquire(&left_frame);
        let mut right = ExclusiveGuard::acquire(&right_frame);

        let capacity = pool.page_size() - PAGE_HEADER_SIZE;
        let combined = left.leaf().used_space() + right.leaf().used_space();
        let underflow = combined <= capacity / 2
            || left.leaf().slot_count() == 0
            || right.leaf().slot_count() == 0;
        if !underflow || combined > capacity {
            return;
        }

        for slot in 0..right.leaf().slot_count() {
            let moved = left.leaf_mut().append_from(right.leaf(), slot);
            debug_assert!(moved, "merge target must fit the combined records");
        }
        while right.leaf().slot_count() > 0 {
            right.leaf_mut().remove_slot(0);
        }
        left.mark_modified();
        right.mark_modified();
        drop(left);
        drop(right);

        inner.children.remove(right_idx);
        inner.keys.remove(left_idx);
        pool.free(right_frame.page_id());
    }

    // =========================================================================
    // Restore
    // =========================================================================

    /// Replaces the structure with one rebuilt from serialized leaves in
    /// key order (checkpoint restore).
    pub fn rebuild_from_leaves(&mut self, pool: &PagePool, leaves: Vec<LeafPage>) {
        let mut frames: Vec<NodeRef> = leaves
            .into_iter()
            .filter(|leaf| leaf.slot_count() > 0)
            .map(|leaf| NodeRef::Leaf(pool.adopt_leaf(leaf)))
            .collect();
        self.root = match frames.len() {
            0 => NodeRef::Leaf(pool.allocate_leaf()),
            1 => frames.pop().expect("checked length"),
            _ => {
                let keys = frames
                    .iter()
                    .skip(1)
                    .map(|node| match node {
                        NodeRef::Leaf(frame) => frame.node().read().key_at(0).to_vec(),
                        NodeRef::Inner(_) => unreachable!("restores produce leaves"),
                    })
                    .collect();
                NodeRef::Inner(Box::new(InnerNode {
                    page_id: pool.allocate_page_id(),
                    keys,
                    children: frames,
                }))
            }
        };
    }
}
