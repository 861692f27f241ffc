//! Constants that fix the shape of the authenticated map.
use crate::types::{sha512_half, NodeHash};
use once_cell::sync::Lazy;

/// Number of key bits consumed per trie level.
pub const BRANCH_BITS: usize = 4;
/// Branch factor of inner nodes. Always a power of two.
pub const TRIE_WIDTH: usize = 1 << BRANCH_BITS;
/// Length in bytes of a node hash and of an item key.
pub const HASH_LEN: usize = 32;
/// Number of nibbles in a full key. Leaves live at exactly this depth;
/// inner nodes occupy depths `0..LEAF_DEPTH`.
pub const LEAF_DEPTH: u8 = (HASH_LEN * 2) as u8;
/// Wire length of an inner node: one hash per branch, in branch order.
pub const INNER_WIRE_LEN: usize = TRIE_WIDTH * HASH_LEN;
/// Fan-out budget callers typically pass to `missing_nodes` per sync round.
pub const DEFAULT_SYNC_BUDGET: usize = 128;

/// Hash advertised by an inner node with no children, i.e. the digest of an
/// all-zero wire form. This is also the root hash of an empty map.
pub static EMPTY_INNER_HASH: Lazy<NodeHash> =
    Lazy::new(|| sha512_half(&[0u8; INNER_WIRE_LEN]));
