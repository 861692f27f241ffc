//! Per-map node storage: residence indexes and dirty tracking.
//!
//! Each map owns two indexes mapping a [`NodeId`] to the resident node of the
//! matching kind, **inner-by-ID** and **leaf-by-ID**, plus two optional
//! **dirty sets** recording every node written since the last drain.
//!
//! # Hash-checked reads
//!
//! The read operations accept an optional expected hash, normally the hash a
//! parent advertises for the slot. A resident node whose memoized hash does
//! not match is reported as absent, never handed back stale: the sync walk
//! relies on this to re-request children whose content disagrees with the
//! parent's commitment.
//!
//! # Dirty tracking
//!
//! When enabled, every insert records the node's ID in the dirty set of its
//! kind. An external snapshotter calls [`NodeStore::drain_dirty`] to collect
//! the serialized wire form of everything still resident and unpersisted,
//! clearing the sets. Removing a node also retracts it from the dirty set so
//! a snapshotter never sees a ghost entry.
use crate::node::{InnerNode, LeafNode};
use crate::types::{NodeHash, NodeId};

use rustc_hash::{FxHashMap, FxHashSet};

/// Serialized nodes drained from the dirty sets, ready for persistence.
#[derive(Debug, Default)]
pub struct DirtyNodes {
    /// Dirty inner nodes and their wire forms.
    pub inner: Vec<(NodeId, Vec<u8>)>,
    /// Dirty leaf nodes and their wire forms.
    pub leaves: Vec<(NodeId, Vec<u8>)>,
}

impl DirtyNodes {
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty() && self.leaves.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.len() + self.leaves.len()
    }
}

#[derive(Debug, Default)]
struct DirtySets {
    inner: FxHashSet<NodeId>,
    leaves: FxHashSet<NodeId>,
}

/// Node storage owned by a single map.
#[derive(Debug, Default)]
pub(crate) struct NodeStore {
    inner_by_id: FxHashMap<NodeId, InnerNode>,
    leaf_by_id: FxHashMap<NodeId, LeafNode>,
    dirty: Option<DirtySets>,
}

impl NodeStore {
    pub(crate) fn new(track_dirty: bool) -> Self {
        Self {
            inner_by_id: FxHashMap::default(),
            leaf_by_id: FxHashMap::default(),
            dirty: track_dirty.then(DirtySets::default),
        }
    }

    /// Inner node by ID. With `expected` set, a resident node whose memoized
    /// hash disagrees (or is pending recompute) is reported as absent.
    pub(crate) fn inner(&self, id: &NodeId, expected: Option<&NodeHash>) -> Option<&InnerNode> {
        let node = self.inner_by_id.get(id)?;
        match expected {
            Some(hash) if node.node_hash() != Some(*hash) => None,
            _ => Some(node),
        }
    }

    /// Leaf node by ID, with the same hash-checked semantics as [`Self::inner`].
    pub(crate) fn leaf(&self, id: &NodeId, expected: Option<&NodeHash>) -> Option<&LeafNode> {
        let node = self.leaf_by_id.get(id)?;
        match expected {
            Some(hash) if node.node_hash() != *hash => None,
            _ => Some(node),
        }
    }

    /// Mutable access for in-place edits. Does not touch the dirty sets; the
    /// mutation paths mark dirtiness explicitly via [`Self::mark_inner_dirty`].
    pub(crate) fn inner_mut(&mut self, id: &NodeId) -> Option<&mut InnerNode> {
        self.inner_by_id.get_mut(id)
    }

    /// Fast "already resident" test used by the sync walk.
    #[inline]
    pub(crate) fn contains_inner(&self, id: &NodeId) -> bool {
        self.inner_by_id.contains_key(id)
    }

    #[inline]
    pub(crate) fn contains_leaf(&self, id: &NodeId) -> bool {
        self.leaf_by_id.contains_key(id)
    }

    /// Insert (or replace) an inner node, recording it dirty.
    pub(crate) fn insert_inner(&mut self, node: InnerNode) {
        let id = node.id();
        self.inner_by_id.insert(id, node);
        if let Some(dirty) = self.dirty.as_mut() {
            dirty.inner.insert(id);
        }
    }

    /// Insert (or replace) a leaf node, recording it dirty.
    pub(crate) fn insert_leaf(&mut self, node: LeafNode) {
        let id = node.id();
        self.leaf_by_id.insert(id, node);
        if let Some(dirty) = self.dirty.as_mut() {
            dirty.leaves.insert(id);
        }
    }

    /// Record a content write to an already-resident inner node.
    pub(crate) fn mark_inner_dirty(&mut self, id: &NodeId) {
        if let Some(dirty) = self.dirty.as_mut() {
            dirty.inner.insert(*id);
        }
    }

    pub(crate) fn remove_inner(&mut self, id: &NodeId) -> Option<InnerNode> {
        if let Some(dirty) = self.dirty.as_mut() {
            dirty.inner.remove(id);
        }
        self.inner_by_id.remove(id)
    }

    pub(crate) fn remove_leaf(&mut self, id: &NodeId) -> Option<LeafNode> {
        if let Some(dirty) = self.dirty.as_mut() {
            dirty.leaves.remove(id);
        }
        self.leaf_by_id.remove(id)
    }

    /// Number of resident leaves, i.e. items.
    #[inline]
    pub(crate) fn leaf_count(&self) -> usize {
        self.leaf_by_id.len()
    }

    /// Iterate over every resident inner node, in no particular order.
    #[cfg(test)]
    pub(crate) fn inners(&self) -> impl Iterator<Item = &InnerNode> {
        self.inner_by_id.values()
    }

    pub(crate) fn tracking_dirty(&self) -> bool {
        self.dirty.is_some()
    }

    /// Serialize and hand off every dirty node still resident, clearing the
    /// sets. Returns an empty batch when tracking is disabled.
    pub(crate) fn drain_dirty(&mut self) -> DirtyNodes {
        let mut out = DirtyNodes::default();
        let Some(dirty) = self.dirty.as_mut() else {
            return out;
        };
        for id in dirty.inner.drain() {
            if let Some(node) = self.inner_by_id.get(&id) {
                out.inner.push((id, node.to_wire()));
            }
        }
        for id in dirty.leaves.drain() {
            if let Some(node) = self.leaf_by_id.get(&id) {
                out.leaves.push((id, node.to_wire()));
            }
        }
        out
    }
}
