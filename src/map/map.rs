//! This module implements [`AuthMap`].
//!
//! An `AuthMap` is a radix-16 trie over 256-bit keys. Inner nodes occupy
//! depths 0..64 and hold one 256-bit child hash per branch; leaves live at
//! depth 64 and hold one item each, so a leaf's key read as nibbles is
//! exactly the branch sequence from the root. The root hash commits to the
//! whole `(key, payload)` set: two maps agree on their root hash if and only
//! if they hold the same items.
//!
//! Hashes are recomputed lazily. Mutation records the inner nodes along the
//! touched path as stale; [`AuthMap::root_hash`] (and every sync entry point)
//! settles the stale set deepest-first, rewriting each parent's branch slot
//! on the way up. A freshly allocated inner node advertises the empty-inner
//! hash, so a non-zero branch slot always means "child exists" even while a
//! recompute is pending.
use crate::constant::LEAF_DEPTH;
use crate::node::{InnerNode, LeafNode};
use crate::store::{DirtyNodes, NodeStore};
use crate::types::{Item, Key, NodeHash, NodeId};
use crate::MapError;

use parking_lot::Mutex;
use rustc_hash::FxHashSet;

/// Lifecycle state of a map.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapState {
    /// Items may be inserted and removed.
    Mutable,
    /// Frozen: no further mutation of any kind.
    Immutable,
    /// Partial trees may exist; pushed nodes may be ingested, items may not
    /// be inserted.
    Synching,
}

/// A cryptographically authenticated map.
///
/// All public operations serialize under one non-reentrant per-map lock;
/// the lock is held for the full duration of each call and there are no
/// internal suspension points. Helpers that need to call each other live on
/// [`MapCore`] and assume the lock is already held.
#[derive(Debug)]
pub struct AuthMap {
    pub(crate) core: Mutex<MapCore>,
}

impl Default for AuthMap {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthMap {
    /// Create an empty mutable map without dirty tracking.
    pub fn new() -> Self {
        Self {
            core: Mutex::new(MapCore::new(false)),
        }
    }

    /// Create an empty mutable map that records every written node for a
    /// snapshotter to drain.
    pub fn with_dirty_tracking() -> Self {
        Self {
            core: Mutex::new(MapCore::new(true)),
        }
    }

    pub fn state(&self) -> MapState {
        self.core.lock().state
    }

    /// The current generation tag stamped onto written nodes.
    pub fn seq(&self) -> u64 {
        self.core.lock().seq
    }

    /// Freeze the map. Irreversible; mutation attempts fail from here on.
    pub fn set_immutable(&self) {
        let mut core = self.core.lock();
        core.state = MapState::Immutable;
        core.seq += 1;
    }

    /// Enter the synching state, during which the tree may be partial and
    /// pushed nodes are accepted.
    pub fn set_synching(&self) {
        let mut core = self.core.lock();
        debug_assert!(core.state != MapState::Immutable);
        core.state = MapState::Synching;
    }

    /// Leave the synching state. The tree is expected to be structurally
    /// complete again.
    pub fn clear_synching(&self) {
        let mut core = self.core.lock();
        core.state = MapState::Mutable;
        core.seq += 1;
    }

    /// Insert an item, replacing any previous payload under the same key.
    pub fn insert(&self, item: Item) -> Result<(), MapError> {
        self.core.lock().insert(item)
    }

    /// Fetch the item stored under `key`.
    pub fn lookup(&self, key: &Key) -> Option<Item> {
        self.core.lock().lookup(key)
    }

    /// Remove the item under `key`. Returns whether it was present.
    pub fn remove(&self, key: &Key) -> Result<bool, MapError> {
        self.core.lock().remove(key)
    }

    /// The root hash: the commitment to the full contents. Settles any
    /// pending hash recomputation first.
    pub fn root_hash(&self) -> NodeHash {
        self.core.lock().root_hash()
    }

    /// Number of items (resident leaves).
    pub fn item_count(&self) -> usize {
        self.core.lock().store.leaf_count()
    }

    /// The ID of the deepest resident inner node on the path to `id`, or
    /// `None` when no root is resident.
    pub fn walk_to(&self, id: &NodeId) -> Option<NodeId> {
        self.core.lock().walk_to(id).map(|node| node.id())
    }

    /// Whether this map records written nodes for a snapshotter.
    pub fn tracking_dirty(&self) -> bool {
        self.core.lock().store.tracking_dirty()
    }

    /// Hand off every node written since the last drain, serialized for
    /// persistence. Settles pending hashes so inner wire forms are final.
    pub fn drain_dirty(&self) -> DirtyNodes {
        let mut core = self.core.lock();
        core.flush_hashes();
        core.store.drain_dirty()
    }
}

/// Map internals. Every method assumes the owning [`AuthMap`] lock is held.
#[derive(Debug)]
pub(crate) struct MapCore {
    pub(crate) store: NodeStore,
    pub(crate) state: MapState,
    pub(crate) seq: u64,
    /// Inner nodes whose memoized hash is pending recomputation.
    stale: FxHashSet<NodeId>,
}

impl MapCore {
    fn new(track_dirty: bool) -> Self {
        let mut store = NodeStore::new(track_dirty);
        store.insert_inner(InnerNode::empty(NodeId::root(), 1));
        Self {
            store,
            state: MapState::Mutable,
            seq: 1,
            stale: FxHashSet::default(),
        }
    }

    pub(crate) fn insert(&mut self, item: Item) -> Result<(), MapError> {
        if self.state != MapState::Mutable {
            return Err(MapError::Immutable);
        }
        let key = *item.key();
        let leaf = LeafNode::new(item, self.seq);
        let leaf_hash = leaf.node_hash();

        // Materialize the inner path root..depth 63, then hook the leaf.
        let mut id = NodeId::root();
        for depth in 0..LEAF_DEPTH {
            if !self.store.contains_inner(&id) {
                self.store.insert_inner(InnerNode::empty(id, self.seq));
            } else {
                self.store.mark_inner_dirty(&id);
            }
            let node = self
                .store
                .inner_mut(&id)
                .expect("path node resident after insert");
            let branch = node.select_branch(&key);
            if depth == LEAF_DEPTH - 1 {
                node.set_child(branch, leaf_hash);
            } else if node.is_empty_branch(branch) {
                // A fresh child starts empty; its advertised hash keeps the
                // slot non-zero until the upward recompute settles it.
                node.set_child(branch, *crate::constant::EMPTY_INNER_HASH);
            }
            self.stale.insert(id);
            id = id.child(branch);
        }
        debug_assert_eq!(id, leaf.id());
        self.store.insert_leaf(leaf);
        Ok(())
    }

    pub(crate) fn lookup(&self, key: &Key) -> Option<Item> {
        self.store
            .leaf(&NodeId::leaf(*key), None)
            .map(|leaf| leaf.item().clone())
    }

    pub(crate) fn remove(&mut self, key: &Key) -> Result<bool, MapError> {
        if self.state != MapState::Mutable {
            return Err(MapError::Immutable);
        }
        if self.store.remove_leaf(&NodeId::leaf(*key)).is_none() {
            return Ok(false);
        }

        // Zero the vacated slot, pruning inner nodes left childless; the
        // first surviving ancestor and everything above it go stale.
        for depth in (0..LEAF_DEPTH).rev() {
            let id = NodeId::new(depth, *key);
            let branch = crate::types::nibble_at(key, depth);
            let node = self
                .store
                .inner_mut(&id)
                .ok_or(MapError::Invariant("inner path broken during remove"))?;
            node.set_child(branch, NodeHash::ZERO);
            if node.is_empty() && depth > 0 {
                self.store.remove_inner(&id);
                self.stale.remove(&id);
                continue;
            }
            self.store.mark_inner_dirty(&id);
            self.stale.insert(id);
            for above in 0..depth {
                let ancestor = NodeId::new(above, *key);
                self.store.mark_inner_dirty(&ancestor);
                self.stale.insert(ancestor);
            }
            break;
        }
        Ok(true)
    }

    /// Settle the stale set: recompute hashes deepest-first and rewrite each
    /// parent's branch slot on the way up. No-op when nothing is stale.
    pub(crate) fn flush_hashes(&mut self) {
        if self.stale.is_empty() {
            return;
        }
        let mut ids: Vec<NodeId> = self.stale.drain().collect();
        ids.sort_by(|a, b| b.depth().cmp(&a.depth()));
        for id in ids {
            let Some(node) = self.store.inner_mut(&id) else {
                continue;
            };
            let hash = node.compute_hash();
            if !id.is_root() {
                let parent_id = NodeId::new(id.depth() - 1, *id.prefix());
                let branch = crate::types::nibble_at(id.prefix(), id.depth() - 1);
                if let Some(parent) = self.store.inner_mut(&parent_id) {
                    parent.set_child(branch, hash);
                }
            }
        }
    }

    pub(crate) fn root_hash(&mut self) -> NodeHash {
        self.flush_hashes();
        self.store
            .inner(&NodeId::root(), None)
            .and_then(InnerNode::node_hash)
            .unwrap_or(NodeHash::ZERO)
    }

    /// Descend from the root toward `id`, stopping at the first empty or
    /// unresident branch. Returns the deepest resident inner node on the
    /// path, or `None` when the root itself is absent.
    pub(crate) fn walk_to(&self, id: &NodeId) -> Option<&InnerNode> {
        let mut node = self.store.inner(&NodeId::root(), None)?;
        while node.depth() < id.depth() {
            let branch = node.select_branch(id.prefix());
            if node.is_empty_branch(branch) {
                break;
            }
            match self.store.inner(&node.child_id(branch), None) {
                Some(next) => node = next,
                None => break,
            }
        }
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant::EMPTY_INNER_HASH;
    use crate::types::sha512_half;

    fn item(tag: &[u8]) -> Item {
        Item::new(*sha512_half(tag), tag.to_vec())
    }

    #[test]
    fn empty_map_root_hash_is_empty_inner_digest() {
        let map = AuthMap::new();
        assert_eq!(map.root_hash(), *EMPTY_INNER_HASH);
        assert_eq!(map.item_count(), 0);
    }

    #[test]
    fn insert_then_lookup_returns_payload() {
        let map = AuthMap::new();
        let a = item(b"alpha");
        let b = item(b"beta");
        map.insert(a.clone()).unwrap();
        map.insert(b.clone()).unwrap();

        assert_eq!(map.item_count(), 2);
        assert_eq!(map.lookup(a.key()), Some(a.clone()));
        assert_eq!(map.lookup(b.key()).unwrap().payload(), b.payload());
        assert_eq!(map.lookup(&sha512_half(b"missing")), None);
    }

    #[test]
    fn insert_replaces_payload_under_same_key() {
        let map = AuthMap::new();
        let key = *sha512_half(b"key");
        map.insert(Item::new(key, vec![1])).unwrap();
        let first = map.root_hash();
        map.insert(Item::new(key, vec![2])).unwrap();

        assert_eq!(map.item_count(), 1);
        assert_eq!(map.lookup(&key).unwrap().payload(), &[2]);
        assert_ne!(map.root_hash(), first);
    }

    #[test]
    fn root_hash_is_insertion_order_independent() {
        let items: Vec<Item> = (0u8..20).map(|i| item(&[i])).collect();

        let forward = AuthMap::new();
        for it in &items {
            forward.insert(it.clone()).unwrap();
        }
        let backward = AuthMap::new();
        for it in items.iter().rev() {
            backward.insert(it.clone()).unwrap();
        }
        assert_eq!(forward.root_hash(), backward.root_hash());
    }

    #[test]
    fn remove_restores_prior_root_hash() {
        let reference = AuthMap::new();
        reference.insert(item(b"stay")).unwrap();
        let reference_hash = reference.root_hash();

        let map = AuthMap::new();
        map.insert(item(b"stay")).unwrap();
        map.insert(item(b"go")).unwrap();
        assert_ne!(map.root_hash(), reference_hash);

        assert!(map.remove(item(b"go").key()).unwrap());
        assert_eq!(map.root_hash(), reference_hash);
        assert!(!map.remove(item(b"go").key()).unwrap());

        assert!(map.remove(item(b"stay").key()).unwrap());
        assert_eq!(map.root_hash(), *EMPTY_INNER_HASH);
        assert_eq!(map.item_count(), 0);
    }

    #[test]
    fn immutable_map_rejects_mutation() {
        let map = AuthMap::new();
        map.insert(item(b"frozen")).unwrap();
        map.set_immutable();
        assert_eq!(map.state(), MapState::Immutable);

        assert_eq!(map.insert(item(b"more")).unwrap_err(), MapError::Immutable);
        assert_eq!(
            map.remove(item(b"frozen").key()).unwrap_err(),
            MapError::Immutable
        );
        // Contents are untouched.
        assert!(map.lookup(item(b"frozen").key()).is_some());
    }

    #[test]
    fn synching_map_rejects_item_insertion() {
        let map = AuthMap::new();
        map.set_synching();
        assert_eq!(map.state(), MapState::Synching);
        assert_eq!(map.insert(item(b"x")).unwrap_err(), MapError::Immutable);
        map.clear_synching();
        map.insert(item(b"x")).unwrap();
    }

    #[test]
    fn walk_to_stops_at_deepest_resident_inner() {
        let map = AuthMap::new();
        let key = *sha512_half(b"walk");
        map.insert(Item::new(key, vec![0xaa])).unwrap();

        // The full chain to the leaf is resident, so the walk reaches the
        // deepest inner level.
        let deepest = map.walk_to(&NodeId::leaf(key)).unwrap();
        assert_eq!(deepest.depth(), LEAF_DEPTH - 1);
        assert_eq!(deepest, NodeId::new(LEAF_DEPTH - 1, key));

        // A key diverging at the first nibble stops at the root.
        let mut diverging = key;
        diverging[0] ^= 0xf0;
        let stop = map.walk_to(&NodeId::leaf(diverging)).unwrap();
        assert_eq!(stop, NodeId::root());
    }

    #[test]
    fn seq_advances_at_generation_boundaries() {
        let map = AuthMap::new();
        let initial = map.seq();
        map.set_synching();
        map.clear_synching();
        assert_eq!(map.seq(), initial + 1);
        map.set_immutable();
        assert_eq!(map.seq(), initial + 2);
    }

    #[test]
    fn drain_dirty_reports_written_nodes_once() {
        let map = AuthMap::with_dirty_tracking();
        let first = map.drain_dirty();
        // The initial empty root counts as written.
        assert_eq!(first.inner.len(), 1);
        assert!(first.leaves.is_empty());

        map.insert(item(b"dirty")).unwrap();
        let batch = map.drain_dirty();
        // One leaf plus the 64 inner nodes on its path.
        assert_eq!(batch.leaves.len(), 1);
        assert_eq!(batch.inner.len(), LEAF_DEPTH as usize);
        assert!(map.drain_dirty().is_empty());

        // Maps without tracking never report anything.
        let untracked = AuthMap::new();
        untracked.insert(item(b"quiet")).unwrap();
        assert!(untracked.drain_dirty().is_empty());
    }
}
