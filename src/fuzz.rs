//! Randomized end-to-end exercise of the pull-based sync protocol.
//!
//! Simulates a full sync session from both perspectives:
//!
//! **Sender:** holds a frozen map of random items and answers pull requests
//! through fat responses.
//!
//! **Recipient:** starts from nothing, installs the pushed root, then loops
//! asking its own partial tree what is missing and ingesting the fetched
//! payloads until the diagnosis comes back empty.
//!
//! The harness validates three properties on every pass:
//! - **Full-below soundness**: no inner node is ever flagged full-below
//!   while one of its descendants is missing.
//! - **Bounded work**: every node is pushed at most twice (once as a fat
//!   child of its parent, once as the answer to its own request), so the
//!   whole session ingests `O(items)` nodes.
//! - **Convergence**: the reconstructed map deep-compares equal to the
//!   source, agrees on the root hash, and serves every item.

use crate::constant::{DEFAULT_SYNC_BUDGET, LEAF_DEPTH, TRIE_WIDTH};
use crate::types::{sha512_half, Item, NodeId};
use crate::AuthMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Generate `count` items with random payloads of 16 to 120 bytes, keyed by
/// the payload digest.
pub fn random_items(rng: &mut StdRng, count: usize) -> Vec<Item> {
    (0..count)
        .map(|_| {
            let len = rng.gen_range(16..=120);
            let mut payload = vec![0u8; len];
            rng.fill(payload.as_mut_slice());
            Item::new(*sha512_half(&payload), payload)
        })
        .collect()
}

/// Check that every inner node flagged full-below really has its whole
/// subtree resident.
pub fn assert_full_below_sound(map: &AuthMap) {
    let core = map.core.lock();
    let flagged: Vec<NodeId> = core
        .store
        .inners()
        .filter(|node| node.full_below())
        .map(|node| node.id())
        .collect();
    for id in flagged {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let node = core
                .store
                .inner(&current, None)
                .expect("full-below subtree has a missing inner node");
            for branch in 0..TRIE_WIDTH {
                if node.is_empty_branch(branch) {
                    continue;
                }
                let child_id = node.child_id(branch);
                let child_hash = node.child_hash(branch);
                if node.children_are_leaves() {
                    assert!(
                        core.store.leaf(&child_id, Some(&child_hash)).is_some(),
                        "full-below subtree has a missing leaf {child_id}"
                    );
                } else {
                    assert!(
                        core.store.inner(&child_id, Some(&child_hash)).is_some(),
                        "full-below subtree has a missing inner node {child_id}"
                    );
                    stack.push(child_id);
                }
            }
        }
    }
}

/// Run one complete sync session over `items` random items and validate the
/// result. Returns (passes, nodes pushed) for inspection.
pub fn sync_session(seed: u64, items: usize) -> (usize, usize) {
    let mut rng = StdRng::seed_from_u64(seed);

    let source = AuthMap::new();
    let items = random_items(&mut rng, items);
    for item in &items {
        source.insert(item.clone()).unwrap();
    }
    source.set_immutable();

    let dest = AuthMap::new();
    dest.set_synching();

    let root_fat = source.node_fat(&NodeId::root()).unwrap();
    assert!(root_fat.complete);
    dest.add_root_node(&root_fat.nodes[0]).unwrap();

    // Every pass either spends its whole budget or advances every pending
    // chain two levels, which bounds the pass count.
    let node_upper_bound = items.len() * (LEAF_DEPTH as usize + 1) + 1;
    let pass_bound = node_upper_bound / DEFAULT_SYNC_BUDGET + 2 * LEAF_DEPTH as usize + 2;

    let mut passes = 0;
    let mut pushed = 0;
    loop {
        let missing = dest.missing_nodes(DEFAULT_SYNC_BUDGET);
        if missing.is_empty() {
            break;
        }
        for (id, _) in missing {
            let fat = source.node_fat(&id).unwrap();
            assert!(fat.complete, "frozen source must serve complete responses");
            for (node_id, bytes) in fat.ids.iter().zip(fat.nodes.iter()) {
                dest.add_known_node(node_id, bytes).unwrap();
                pushed += 1;
            }
        }
        assert_full_below_sound(&dest);
        passes += 1;
        assert!(passes <= pass_bound, "sync did not converge");
    }
    dest.clear_synching();

    // Every node is ingested at most twice, keeping the session O(items).
    assert!(
        pushed <= 2 * node_upper_bound,
        "pushed {pushed} nodes for {} items",
        items.len()
    );

    assert_eq!(dest.root_hash(), source.root_hash());
    assert_eq!(dest.item_count(), items.len());
    assert!(source.deep_compare(&dest));
    assert!(dest.deep_compare(&source));
    assert!(dest.missing_nodes(DEFAULT_SYNC_BUDGET).is_empty());
    for item in &items {
        assert_eq!(dest.lookup(item.key()).as_ref(), Some(item));
    }

    (passes, pushed)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Mirrors the classic sync self-test: random item counts in 10..=400,
    /// several seeds.
    #[test]
    fn bulk_sync_random_sessions() {
        for seed in 0..4u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let count = rng.gen_range(10..=400);
            let (passes, pushed) = sync_session(seed, count);
            assert!(passes > 0);
            assert!(pushed > 0);
        }
    }

    #[test]
    fn bulk_sync_upper_bound_item_count() {
        sync_session(0xfeed, 400);
    }

    #[test]
    fn insertion_order_does_not_change_root() {
        let mut rng = StdRng::seed_from_u64(7);
        let items = random_items(&mut rng, 64);

        let forward = AuthMap::new();
        for item in &items {
            forward.insert(item.clone()).unwrap();
        }
        let shuffled = AuthMap::new();
        for item in items.iter().rev() {
            shuffled.insert(item.clone()).unwrap();
        }
        assert_eq!(forward.root_hash(), shuffled.root_hash());
        assert!(forward.deep_compare(&shuffled));
    }
}
