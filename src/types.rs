//! Define the value types used for node identity and map contents.
use crate::constant::{HASH_LEN, LEAF_DEPTH};

use derive_more::{Deref, DerefMut};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use std::fmt;

/// A 256-bit item key. In practice keys are themselves digests of ledger
/// entries, so they are uniformly distributed and keep the trie balanced.
pub type Key = [u8; HASH_LEN];

/// A 256-bit node hash: the commitment to the subtree rooted at that node.
///
/// The all-zero value is reserved; it marks an empty branch slot and is never
/// produced by [`sha512_half`] in practice.
#[derive(
    Clone,
    Copy,
    Default,
    Deref,
    DerefMut,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
pub struct NodeHash(pub [u8; HASH_LEN]);

impl NodeHash {
    /// The reserved empty-slot marker.
    pub const ZERO: NodeHash = NodeHash([0u8; HASH_LEN]);

    /// Check whether this is the empty-slot marker.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        let mut i = 0;
        while i < HASH_LEN {
            if self.0[i] != 0 {
                return false;
            }
            i += 1;
        }
        true
    }
}

impl From<[u8; HASH_LEN]> for NodeHash {
    #[inline]
    fn from(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for NodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for NodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeHash({})", hex::encode(self.0))
    }
}

/// First 256 bits of a SHA-512 digest.
///
/// This is the single hashing primitive of the map: node hashes are the
/// half-digest of the node's wire form, and callers conventionally derive
/// item keys the same way.
pub fn sha512_half(data: &[u8]) -> NodeHash {
    let digest = Sha512::digest(data);
    let mut out = [0u8; HASH_LEN];
    out.copy_from_slice(&digest[..HASH_LEN]);
    NodeHash(out)
}

/// Return the nibble of `key` at `position` (big-endian, high nibble first).
#[inline]
pub(crate) fn nibble_at(key: &Key, position: u8) -> usize {
    let byte = key[(position / 2) as usize];
    if position % 2 == 0 {
        (byte >> 4) as usize
    } else {
        (byte & 0x0f) as usize
    }
}

/// Identifies a node by its path from the root: a depth in `[0, 64]` plus the
/// 256-bit key prefix whose leading `depth` nibbles are significant.
///
/// The prefix is normalized on construction (non-significant nibbles zeroed),
/// so equality and hashing are structural.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId {
    depth: u8,
    prefix: Key,
}

impl NodeId {
    /// The ID of a node at `depth` on the path to `key`.
    pub fn new(depth: u8, key: Key) -> Self {
        debug_assert!(depth <= LEAF_DEPTH);
        Self {
            depth,
            prefix: mask_prefix(depth, key),
        }
    }

    /// The root ID: depth 0, empty prefix.
    #[inline]
    pub fn root() -> Self {
        Self {
            depth: 0,
            prefix: [0u8; HASH_LEN],
        }
    }

    /// The ID of the leaf holding `key`: all 64 nibbles significant.
    #[inline]
    pub fn leaf(key: Key) -> Self {
        Self {
            depth: LEAF_DEPTH,
            prefix: key,
        }
    }

    #[inline]
    pub fn depth(&self) -> u8 {
        self.depth
    }

    #[inline]
    pub fn prefix(&self) -> &Key {
        &self.prefix
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.depth == 0
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.depth == LEAF_DEPTH
    }

    /// The branch an inner node at this ID takes toward `key`: the nibble of
    /// `key` at position `depth`. Only meaningful for inner IDs.
    #[inline]
    pub fn select_branch(&self, key: &Key) -> usize {
        debug_assert!(!self.is_leaf());
        nibble_at(key, self.depth)
    }

    /// The ID of the child in branch slot `branch`: one level deeper, with
    /// nibble `depth` set to `branch`.
    pub fn child(&self, branch: usize) -> NodeId {
        debug_assert!(!self.is_leaf());
        debug_assert!(branch < crate::constant::TRIE_WIDTH);
        let mut prefix = self.prefix;
        let index = (self.depth / 2) as usize;
        // Non-significant nibbles are zero, so the new nibble ORs in cleanly.
        if self.depth % 2 == 0 {
            prefix[index] |= (branch as u8) << 4;
        } else {
            prefix[index] |= branch as u8;
        }
        Self {
            depth: self.depth + 1,
            prefix,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.depth, hex::encode(self.prefix))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({}, {})", self.depth, hex::encode(self.prefix))
    }
}

/// Zero every nibble of `key` from position `depth` onward.
fn mask_prefix(depth: u8, key: Key) -> Key {
    let mut out = [0u8; HASH_LEN];
    let full_bytes = (depth / 2) as usize;
    out[..full_bytes].copy_from_slice(&key[..full_bytes]);
    if depth % 2 == 1 {
        out[full_bytes] = key[full_bytes] & 0xf0;
    }
    out
}

/// A keyed payload stored at a leaf.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    key: Key,
    payload: Vec<u8>,
}

impl Item {
    /// Create a new item. The payload may be empty.
    pub fn new(key: Key, payload: Vec<u8>) -> Self {
        Self { key, payload }
    }

    #[inline]
    pub fn key(&self) -> &Key {
        &self.key
    }

    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

impl fmt::Debug for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Item({}, {} bytes)",
            hex::encode(self.key),
            self.payload.len()
        )
    }
}
