//! Pull-based node synchronization between two maps.
//!
//! The recipient repeatedly asks its own partial tree what it is missing
//! ([`AuthMap::missing_nodes`]), fetches each wanted node from the sender as
//! a "fat" response ([`AuthMap::node_fat`]: the node plus its resident
//! immediate children, halving round trips), and ingests the payloads with
//! [`AuthMap::add_root_node`] / [`AuthMap::add_known_node`]. Every ingested
//! node is validated against the hash its already-held parent advertises, so
//! a corrupt or mid-sync-mutated sender can only produce a rejected push,
//! never silent corruption. The loop terminates when `missing_nodes` returns
//! nothing.
use crate::constant::TRIE_WIDTH;
use crate::node::{InnerNode, LeafNode};
use crate::types::{NodeHash, NodeId};
use crate::MapError;

use tracing::{debug, trace};

use super::map::{AuthMap, MapCore, MapState};

/// A fat pull response: the wanted node first, then its resident non-empty
/// children, each as (ID, wire bytes). `complete` reports whether every
/// non-empty child was resident.
#[derive(Debug, Clone)]
pub struct FatResponse {
    pub ids: Vec<NodeId>,
    pub nodes: Vec<Vec<u8>>,
    pub complete: bool,
}

impl AuthMap {
    /// Diagnose which remote nodes are needed next, emitting up to `max`
    /// `(id, hash)` pairs naming children a resident inner node references
    /// but the local store does not contain.
    ///
    /// Subtrees proven complete are memoized via the `full_below` flag and
    /// skipped on later calls, which is what keeps repeated rounds at
    /// `O(delta)` instead of `O(tree)`. An empty result means nothing more
    /// is needed.
    pub fn missing_nodes(&self, max: usize) -> Vec<(NodeId, NodeHash)> {
        self.core.lock().missing_nodes(max)
    }

    /// Serve a pull request for `wanted`; see [`FatResponse`]. Fails with
    /// [`MapError::NotFound`] only when the wanted node itself is absent.
    pub fn node_fat(&self, wanted: &NodeId) -> Result<FatResponse, MapError> {
        self.core.lock().node_fat(wanted)
    }

    /// Install pushed root bytes. Idempotent: succeeds immediately when a
    /// non-empty root is already present.
    pub fn add_root_node(&self, bytes: &[u8]) -> Result<(), MapError> {
        self.core.lock().add_root_node(None, bytes)
    }

    /// [`Self::add_root_node`], additionally asserting the root hash the
    /// caller expects.
    pub fn add_root_node_checked(
        &self,
        expected: &NodeHash,
        bytes: &[u8],
    ) -> Result<(), MapError> {
        self.core.lock().add_root_node(Some(expected), bytes)
    }

    /// Attach a pushed non-root node to the partially built tree, validating
    /// it against the hash its resident parent advertises. Duplicate pushes
    /// succeed without effect.
    pub fn add_known_node(&self, id: &NodeId, bytes: &[u8]) -> Result<(), MapError> {
        self.core.lock().add_known_node(id, bytes)
    }

    /// Walk both trees in lockstep and report whether they are identical.
    /// Debug/test oracle; root-hash equality is the production check.
    pub fn deep_compare(&self, other: &AuthMap) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        let mut this = self.core.lock();
        let mut that = other.core.lock();
        this.flush_hashes();
        that.flush_hashes();
        this.deep_compare(&that)
    }
}

impl MapCore {
    pub(crate) fn missing_nodes(&mut self, max: usize) -> Vec<(NodeId, NodeHash)> {
        let mut wanted = Vec::new();
        if max == 0 {
            return wanted;
        }
        self.flush_hashes();
        match self.store.inner(&NodeId::root(), None) {
            None => return wanted,
            Some(root) if root.full_below() => {
                trace!("missing-nodes walk: root is full below");
                return wanted;
            }
            Some(_) => {}
        }

        // Two-phase depth-first walk. A node is first expanded (branches
        // scanned in index order, absent children emitted against the
        // budget, present non-full inner children pushed for descent), then
        // revisited after its subtree to decide the full-below flag. The
        // post-order revisit is what lets one complete walk memoize a whole
        // finished subtree instead of one level per round.
        let mut budget = max;
        let mut stack = vec![(NodeId::root(), false)];
        while budget > 0 {
            let Some((id, expanded)) = stack.pop() else {
                break;
            };
            if expanded {
                if self.subtree_fully_resident(&id) {
                    if let Some(node) = self.store.inner_mut(&id) {
                        node.set_full_below();
                    }
                }
                continue;
            }

            let mut descend = Vec::new();
            {
                let Some(node) = self.store.inner(&id, None) else {
                    continue;
                };
                let children_are_leaves = node.children_are_leaves();
                for branch in 0..TRIE_WIDTH {
                    if node.is_empty_branch(branch) {
                        continue;
                    }
                    let child_id = node.child_id(branch);
                    let child_hash = node.child_hash(branch);
                    if children_are_leaves {
                        if self.store.leaf(&child_id, Some(&child_hash)).is_none() {
                            if budget > 0 {
                                trace!(node = %child_id, "need leaf");
                                wanted.push((child_id, child_hash));
                                budget -= 1;
                            }
                        }
                    } else {
                        match self.store.inner(&child_id, Some(&child_hash)) {
                            None => {
                                if budget > 0 {
                                    trace!(node = %child_id, "need inner node");
                                    wanted.push((child_id, child_hash));
                                    budget -= 1;
                                }
                            }
                            Some(child) => {
                                if !child.full_below() {
                                    descend.push(child_id);
                                }
                            }
                        }
                    }
                }
            }
            stack.push((id, true));
            for child_id in descend {
                stack.push((child_id, false));
            }
        }
        wanted
    }

    /// Whether every non-empty branch of `id` resolves to a resident child
    /// whose own subtree is fully present (leaves count as full). The
    /// conservative test backing the full-below flag: it may say no for a
    /// subtree that is in fact complete, never yes for one with a missing
    /// descendant.
    fn subtree_fully_resident(&self, id: &NodeId) -> bool {
        let Some(node) = self.store.inner(id, None) else {
            return false;
        };
        let children_are_leaves = node.children_are_leaves();
        for branch in 0..TRIE_WIDTH {
            if node.is_empty_branch(branch) {
                continue;
            }
            let child_id = node.child_id(branch);
            let child_hash = node.child_hash(branch);
            if children_are_leaves {
                if self.store.leaf(&child_id, Some(&child_hash)).is_none() {
                    return false;
                }
            } else {
                match self.store.inner(&child_id, Some(&child_hash)) {
                    Some(child) if child.full_below() => {}
                    _ => return false,
                }
            }
        }
        true
    }

    pub(crate) fn node_fat(&mut self, wanted: &NodeId) -> Result<FatResponse, MapError> {
        self.flush_hashes();
        let mut ids = Vec::new();
        let mut nodes = Vec::new();

        if wanted.is_leaf() {
            // No fat way to serve a leaf; it has no children.
            let leaf = self.store.leaf(wanted, None).ok_or(MapError::NotFound)?;
            ids.push(leaf.id());
            nodes.push(leaf.to_wire());
            return Ok(FatResponse {
                ids,
                nodes,
                complete: true,
            });
        }

        let node = self.store.inner(wanted, None).ok_or(MapError::NotFound)?;
        ids.push(node.id());
        nodes.push(node.to_wire());

        let mut complete = true;
        let children_are_leaves = node.children_are_leaves();
        for branch in 0..TRIE_WIDTH {
            if node.is_empty_branch(branch) {
                continue;
            }
            let child_id = node.child_id(branch);
            let child_hash = node.child_hash(branch);
            if children_are_leaves {
                match self.store.leaf(&child_id, Some(&child_hash)) {
                    Some(leaf) => {
                        ids.push(leaf.id());
                        nodes.push(leaf.to_wire());
                    }
                    None => {
                        trace!(wanted = %wanted, child = %child_id, "fat response missing leaf");
                        complete = false;
                    }
                }
            } else {
                match self.store.inner(&child_id, Some(&child_hash)) {
                    Some(child) => {
                        ids.push(child.id());
                        nodes.push(child.to_wire());
                    }
                    None => {
                        trace!(wanted = %wanted, child = %child_id, "fat response missing inner");
                        complete = false;
                    }
                }
            }
        }
        Ok(FatResponse {
            ids,
            nodes,
            complete,
        })
    }

    pub(crate) fn add_root_node(
        &mut self,
        expected: Option<&NodeHash>,
        bytes: &[u8],
    ) -> Result<(), MapError> {
        self.flush_hashes();
        if let Some(root) = self.store.inner(&NodeId::root(), None) {
            if !root.is_empty() {
                debug!("add_root_node: already have a root");
                if let Some(hash) = expected {
                    if root.node_hash() != Some(*hash) {
                        return Err(MapError::HashMismatch);
                    }
                }
                return Ok(());
            }
        }

        let node = InnerNode::from_wire(NodeId::root(), bytes, self.seq)?;
        if let Some(hash) = expected {
            if node.node_hash() != Some(*hash) {
                return Err(MapError::HashMismatch);
            }
        }
        self.store.insert_inner(node);
        Ok(())
    }

    pub(crate) fn add_known_node(&mut self, id: &NodeId, bytes: &[u8]) -> Result<(), MapError> {
        if id.is_root() {
            return Err(MapError::Invariant("add_known_node: id names the root"));
        }
        if self.state != MapState::Synching {
            return Err(MapError::Invariant("add_known_node outside synching"));
        }

        if id.is_leaf() {
            if self.store.contains_leaf(id) {
                return Ok(());
            }
        } else if self.store.contains_inner(id) {
            return Ok(());
        }

        let (ancestor_depth, branch, expected) = {
            let Some(ancestor) = self.walk_to(id) else {
                return Err(MapError::Invariant("no root resident during add_known_node"));
            };
            if ancestor.depth() == id.depth() {
                debug!(node = %id, "already had pushed node (late arrival)");
                return Ok(());
            }
            let branch = ancestor.select_branch(id.prefix());
            (ancestor.depth(), branch, ancestor.child_hash(branch))
        };

        if ancestor_depth != id.depth() - 1 {
            // Either the node is broken or we never requested it.
            debug!(node = %id, "unable to hook pushed node");
            return Err(MapError::UnhookableNode);
        }
        if expected.is_zero() {
            debug!(node = %id, "pushed node targets an empty branch");
            return Err(MapError::EmptySlot);
        }

        if id.is_leaf() {
            let leaf = LeafNode::from_wire(bytes, self.seq)?;
            if leaf.node_hash() != expected || leaf.id() != *id {
                debug!(node = %id, "pushed leaf fails consistency check");
                return Err(MapError::ConsistencyFailure);
            }
            self.store.insert_leaf(leaf);
        } else {
            let node = InnerNode::from_wire(*id, bytes, self.seq)?;
            if node.node_hash() != Some(expected) {
                debug!(node = %id, "pushed inner node fails consistency check");
                return Err(MapError::ConsistencyFailure);
            }
            self.store.insert_inner(node);
        }
        Ok(())
    }

    pub(crate) fn deep_compare(&self, other: &MapCore) -> bool {
        let mut stack = vec![NodeId::root()];
        while let Some(id) = stack.pop() {
            let (Some(node), Some(other_node)) = (
                self.store.inner(&id, None),
                other.store.inner(&id, None),
            ) else {
                debug!(node = %id, "deep compare: unable to fetch inner node");
                return false;
            };
            if node.node_hash() != other_node.node_hash() {
                debug!(node = %id, "deep compare: inner hash mismatch");
                return false;
            }
            for branch in 0..TRIE_WIDTH {
                if node.is_empty_branch(branch) {
                    if !other_node.is_empty_branch(branch) {
                        return false;
                    }
                    continue;
                }
                if other_node.is_empty_branch(branch) {
                    return false;
                }
                let child_id = node.child_id(branch);
                let child_hash = node.child_hash(branch);
                if node.children_are_leaves() {
                    let (Some(leaf), Some(other_leaf)) = (
                        self.store.leaf(&child_id, Some(&child_hash)),
                        other.store.leaf(&child_id, Some(&child_hash)),
                    ) else {
                        debug!(node = %child_id, "deep compare: unable to fetch leaf");
                        return false;
                    };
                    if leaf.node_hash() != other_leaf.node_hash() {
                        debug!(node = %child_id, "deep compare: leaf hash mismatch");
                        return false;
                    }
                } else {
                    if self.store.inner(&child_id, Some(&child_hash)).is_none() {
                        debug!(node = %child_id, "deep compare: inner child not resident");
                        return false;
                    }
                    stack.push(child_id);
                }
            }
        }
        true
    }
}
