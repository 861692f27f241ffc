//! Inner and leaf nodes: the wire codec and node hashing.
//!
//! Both node kinds serialize to a canonical, bit-exact wire form:
//!
//! - **Inner node**: 16 × 32 bytes of child hashes in branch order, an
//!   all-zero hash marking an empty branch.
//! - **Leaf node**: the 32-byte item key followed by the payload bytes
//!   (payload length is carried out-of-band by the enclosing frame).
//!
//! A node's hash is [`sha512_half`] of its wire form and is the commitment
//! to the whole subtree beneath it.
use crate::constant::{EMPTY_INNER_HASH, HASH_LEN, INNER_WIRE_LEN, LEAF_DEPTH, TRIE_WIDTH};
use crate::map::MapError;
use crate::types::{sha512_half, Item, NodeHash, NodeId};

/// An inner node: 16 child-hash slots plus sync bookkeeping.
#[derive(Clone, Debug)]
pub struct InnerNode {
    id: NodeId,
    children: [NodeHash; TRIE_WIDTH],
    /// Memoized node hash. `None` while a lazy recompute is pending.
    hash: Option<NodeHash>,
    /// Monotone flag: every node reachable from this one is locally resident.
    full_below: bool,
    /// Generation tag at which this node was written.
    seq: u64,
}

impl InnerNode {
    /// A new inner node with all branches empty. Its hash is known up front:
    /// the digest of an all-zero wire form.
    pub(crate) fn empty(id: NodeId, seq: u64) -> Self {
        Self {
            id,
            children: [NodeHash::ZERO; TRIE_WIDTH],
            hash: Some(*EMPTY_INNER_HASH),
            full_below: false,
            seq,
        }
    }

    /// Deserialize an inner node received for slot `id`.
    pub fn from_wire(id: NodeId, bytes: &[u8], seq: u64) -> Result<Self, MapError> {
        if bytes.len() != INNER_WIRE_LEN {
            return Err(MapError::MalformedNode);
        }
        let mut children = [NodeHash::ZERO; TRIE_WIDTH];
        for (slot, chunk) in children.iter_mut().zip(bytes.chunks_exact(HASH_LEN)) {
            slot.0.copy_from_slice(chunk);
        }
        Ok(Self {
            id,
            children,
            hash: Some(sha512_half(bytes)),
            full_below: false,
            seq,
        })
    }

    /// The canonical serialization: child hashes in branch order.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(INNER_WIRE_LEN);
        for child in &self.children {
            out.extend_from_slice(&child.0);
        }
        out
    }

    #[inline]
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[inline]
    pub fn depth(&self) -> u8 {
        self.id.depth()
    }

    /// The memoized node hash, or `None` while a recompute is pending.
    #[inline]
    pub fn node_hash(&self) -> Option<NodeHash> {
        self.hash
    }

    /// Recompute and memoize the node hash from the current children.
    pub(crate) fn compute_hash(&mut self) -> NodeHash {
        let hash = sha512_half(&self.to_wire());
        self.hash = Some(hash);
        hash
    }

    #[inline]
    pub fn child_hash(&self, branch: usize) -> NodeHash {
        self.children[branch]
    }

    #[inline]
    pub fn child_id(&self, branch: usize) -> NodeId {
        self.id.child(branch)
    }

    #[inline]
    pub fn is_empty_branch(&self, branch: usize) -> bool {
        self.children[branch].is_zero()
    }

    /// Whether every branch is empty.
    pub fn is_empty(&self) -> bool {
        self.children.iter().all(NodeHash::is_zero)
    }

    /// Whether this node's children are leaves, i.e. it sits at the deepest
    /// inner level.
    #[inline]
    pub fn children_are_leaves(&self) -> bool {
        self.id.depth() == LEAF_DEPTH - 1
    }

    /// The branch toward `key`; forwards to [`NodeId::select_branch`].
    #[inline]
    pub fn select_branch(&self, key: &crate::types::Key) -> usize {
        self.id.select_branch(key)
    }

    /// Overwrite a branch slot and invalidate the memoized hash.
    pub(crate) fn set_child(&mut self, branch: usize, hash: NodeHash) {
        self.children[branch] = hash;
        self.hash = None;
    }

    #[inline]
    pub fn full_below(&self) -> bool {
        self.full_below
    }

    /// Latch the full-below flag. Monotone: there is no way to clear it short
    /// of discarding the node.
    pub(crate) fn set_full_below(&mut self) {
        self.full_below = true;
    }

    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

/// A leaf node holding a single [`Item`] at depth 64.
#[derive(Clone, Debug)]
pub struct LeafNode {
    id: NodeId,
    item: Item,
    hash: NodeHash,
    seq: u64,
}

impl LeafNode {
    /// Build the leaf for `item`. The ID is derived from the item key and the
    /// hash is computed eagerly; both are pure functions of the item.
    pub fn new(item: Item, seq: u64) -> Self {
        let id = NodeId::leaf(*item.key());
        let mut wire = Vec::with_capacity(HASH_LEN + item.payload().len());
        wire.extend_from_slice(item.key());
        wire.extend_from_slice(item.payload());
        let hash = sha512_half(&wire);
        Self {
            id,
            item,
            hash,
            seq,
        }
    }

    /// Deserialize a leaf: 32-byte key followed by the payload. The node ID
    /// is derived from the key, so callers can compare it against the slot
    /// the leaf claims to fill.
    pub fn from_wire(bytes: &[u8], seq: u64) -> Result<Self, MapError> {
        if bytes.len() < HASH_LEN {
            return Err(MapError::MalformedNode);
        }
        let mut key = [0u8; HASH_LEN];
        key.copy_from_slice(&bytes[..HASH_LEN]);
        Ok(Self::new(Item::new(key, bytes[HASH_LEN..].to_vec()), seq))
    }

    /// The canonical serialization: key then payload.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HASH_LEN + self.item.payload().len());
        out.extend_from_slice(self.item.key());
        out.extend_from_slice(self.item.payload());
        out
    }

    #[inline]
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[inline]
    pub fn item(&self) -> &Item {
        &self.item
    }

    #[inline]
    pub fn key(&self) -> &crate::types::Key {
        self.item.key()
    }

    /// Leaf hashes are always available; they never go stale.
    #[inline]
    pub fn node_hash(&self) -> NodeHash {
        self.hash
    }

    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq
    }
}
